use futures::{SinkExt, StreamExt};
use palaver::connection::handshake::{
    self, CHECK_USER_PREFIX, PASSWORD_CORRECT, PASSWORD_INCORRECT, REGISTER_PASSWORD_PREFIX,
    USER_EXISTS, USER_NEW, VERIFY_PASSWORD_PREFIX,
};
use palaver::core::PalaverError;
use palaver::core::protocol::{Frame, FrameCodec, Inbound};
use palaver::core::storage::MessageStore;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

type Client = Framed<DuplexStream, FrameCodec>;

fn store(dir: &TempDir) -> MessageStore {
    MessageStore::open(dir.path().join("chat.db")).unwrap()
}

fn pair() -> (Client, Client) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    (
        Framed::new(client_io, FrameCodec::new()),
        Framed::new(server_io, FrameCodec::new()),
    )
}

async fn send_text(client: &mut Client, text: &str) {
    client.send(Frame::Text(text.to_string())).await.unwrap();
}

async fn expect_text(client: &mut Client) -> String {
    match client.next().await.unwrap().unwrap() {
        Inbound::Frame(Frame::Text(text)) => text,
        other => panic!("expected a TEXT frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_new_user_registration_path() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Alice")).await;
    assert_eq!(expect_text(&mut client).await, USER_NEW);
    send_text(&mut client, &format!("{REGISTER_PASSWORD_PREFIX}secret")).await;
    send_text(&mut client, "Alice").await;

    let username = server_task.await.unwrap().unwrap();
    assert_eq!(username, "Alice");

    // The credential record now exists and verifies.
    assert!(store.user_exists("Alice").await.unwrap());
    assert!(store.verify_password("Alice", "secret").await.unwrap());
    assert!(!store.verify_password("Alice", "wrong").await.unwrap());
}

#[tokio::test]
async fn test_returning_user_with_correct_password() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert!(store.register_user("Bob", "pw1").await.unwrap());
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Bob")).await;
    assert_eq!(expect_text(&mut client).await, USER_EXISTS);
    send_text(&mut client, &format!("{VERIFY_PASSWORD_PREFIX}pw1")).await;
    assert_eq!(expect_text(&mut client).await, PASSWORD_CORRECT);
    send_text(&mut client, "Bob").await;

    assert_eq!(server_task.await.unwrap().unwrap(), "Bob");
}

#[tokio::test]
async fn test_returning_user_with_wrong_password_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert!(store.register_user("Bob", "pw1").await.unwrap());
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Bob")).await;
    assert_eq!(expect_text(&mut client).await, USER_EXISTS);
    send_text(&mut client, &format!("{VERIFY_PASSWORD_PREFIX}wrong")).await;

    // The reject code arrives first, then the handshake fails server-side.
    assert_eq!(expect_text(&mut client).await, PASSWORD_INCORRECT);
    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, PalaverError::InvalidPassword));
}

#[tokio::test]
async fn test_legacy_bare_username_login() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    // No CHECK_USER request: the payload itself is the identity, no
    // password exchange happens.
    send_text(&mut client, "Carol").await;
    assert_eq!(server_task.await.unwrap().unwrap(), "Carol");
    assert!(!store.user_exists("Carol").await.unwrap());
}

#[tokio::test]
async fn test_final_username_must_match_identity_check() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Alice")).await;
    assert_eq!(expect_text(&mut client).await, USER_NEW);
    send_text(&mut client, &format!("{REGISTER_PASSWORD_PREFIX}secret")).await;
    send_text(&mut client, "Mallory").await;

    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, PalaverError::UsernameMismatch));
}

#[tokio::test]
async fn test_out_of_sequence_frame_is_a_protocol_violation() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Alice")).await;
    assert_eq!(expect_text(&mut client).await, USER_NEW);
    // A password step is expected here, not a chat line.
    send_text(&mut client, "hello?").await;

    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, PalaverError::ProtocolViolation(_)));
}

#[tokio::test]
async fn test_eof_during_handshake_aborts() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Alice")).await;
    assert_eq!(expect_text(&mut client).await, USER_NEW);
    drop(client);

    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, PalaverError::Io(_)));
}

#[tokio::test]
async fn test_registration_race_rejects_the_loser() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let (mut client, mut server) = pair();

    let server_store = store.clone();
    let server_task =
        tokio::spawn(async move { handshake::authenticate(&mut server, &server_store).await });

    send_text(&mut client, &format!("{CHECK_USER_PREFIX}Dana")).await;
    assert_eq!(expect_text(&mut client).await, USER_NEW);
    // Another connection claims the name between the existence check and
    // this session's insert.
    assert!(store.register_user("Dana", "other-pw").await.unwrap());
    send_text(&mut client, &format!("{REGISTER_PASSWORD_PREFIX}secret")).await;

    let err = server_task.await.unwrap().unwrap_err();
    assert!(matches!(err, PalaverError::RegistrationFailed(_)));

    // The winner's credentials are untouched.
    assert!(store.verify_password("Dana", "other-pw").await.unwrap());
    assert!(!store.verify_password("Dana", "secret").await.unwrap());
}
