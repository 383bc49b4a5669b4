//! End-to-end session tests driving `ConnectionHandler` over real TCP
//! sockets, with a framed client on the other end.

use futures::{SinkExt, StreamExt};
use palaver::config::Config;
use palaver::connection::ConnectionHandler;
use palaver::core::protocol::{Frame, FrameCodec, Inbound};
use palaver::core::state::ServerState;
use palaver::core::storage::MessageStore;
use palaver::server::AnyStream;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Client = Framed<TcpStream, FrameCodec>;

struct TestServer {
    state: Arc<ServerState>,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
    _dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(dir.path().join("chat.db")).unwrap();
        let state = ServerState::new(Arc::new(Config::default()), store);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state,
            listener,
            shutdown_tx,
            _dir: dir,
        }
    }

    /// Connects a client and spawns a handler for the server side of the
    /// socket, exactly as the accept loop would.
    async fn connect(&self) -> (Client, JoinHandle<()>) {
        let client_io = TcpStream::connect(self.listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server_io, peer_addr) = self.listener.accept().await.unwrap();
        let handler = ConnectionHandler::new(
            AnyStream::Tcp(server_io),
            peer_addr,
            self.state.clone(),
            self.shutdown_tx.subscribe(),
        );
        let task = tokio::spawn(async move {
            let _ = handler.run().await;
        });
        (Framed::new(client_io, FrameCodec::new()), task)
    }
}

async fn send_text(client: &mut Client, text: &str) {
    client.send(Frame::Text(text.to_string())).await.unwrap();
}

async fn next_text(client: &mut Client) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended unexpectedly")
        .expect("frame error");
    match frame {
        Inbound::Frame(Frame::Text(text)) => text,
        other => panic!("expected a TEXT frame, got {other:?}"),
    }
}

/// Reads frames until one contains `needle`, skipping unrelated notices.
async fn next_text_containing(client: &mut Client, needle: &str) -> String {
    for _ in 0..32 {
        let text = next_text(client).await;
        if text.contains(needle) {
            return text;
        }
    }
    panic!("no frame containing {needle:?} arrived");
}

/// Runs the registration handshake and consumes the welcome frame.
async fn login(client: &mut Client, name: &str, password: &str) {
    send_text(client, &format!("CHECK_USER:{name}")).await;
    let reply = next_text(client).await;
    match reply.as_str() {
        "USER_NEW" => send_text(client, &format!("REGISTER_PASSWORD:{password}")).await,
        "USER_EXISTS" => {
            send_text(client, &format!("VERIFY_PASSWORD:{password}")).await;
            assert_eq!(next_text(client).await, "PASSWORD_CORRECT");
        }
        other => panic!("unexpected handshake reply {other:?}"),
    }
    send_text(client, name).await;
    assert_eq!(next_text(client).await, format!("Welcome, {name}!"));
}

#[tokio::test]
async fn test_fresh_registration_joins_with_no_peers() {
    let server = TestServer::start().await;
    let (mut alice, _task) = server.connect().await;

    login(&mut alice, "Alice", "secret").await;

    // Alice is registered; the join notice went to zero other sessions.
    assert_eq!(server.state.registry.len(), 1);
    assert!(server.state.registry.find("Alice").is_some());
}

#[tokio::test]
async fn test_bye_deregisters_and_notifies_peers() {
    let server = TestServer::start().await;
    let (mut alice, alice_task) = server.connect().await;
    login(&mut alice, "Alice", "pw-a").await;
    let (mut bob, bob_task) = server.connect().await;
    login(&mut bob, "Bob", "pw-b").await;

    next_text_containing(&mut alice, "Bob has joined the chat!").await;

    send_text(&mut bob, "bye").await;
    tokio::time::timeout(Duration::from_secs(5), bob_task)
        .await
        .unwrap()
        .unwrap();

    next_text_containing(&mut alice, "Bob has left the chat!").await;
    assert_eq!(server.state.registry.len(), 1);
    assert!(!alice_task.is_finished());
}

#[tokio::test]
async fn test_list_and_broadcast_between_two_sessions() {
    let server = TestServer::start().await;
    let (mut alice, _a) = server.connect().await;
    login(&mut alice, "Alice", "pw-a").await;
    let (mut bob, _b) = server.connect().await;
    login(&mut bob, "Bob", "pw-b").await;
    next_text_containing(&mut alice, "Bob has joined the chat!").await;

    send_text(&mut alice, "/list").await;
    let listing = next_text_containing(&mut alice, "List of users").await;
    assert_eq!(listing, "List of users currently connected : [Alice, Bob]");

    send_text(&mut alice, "hello everyone").await;
    let line = next_text_containing(&mut bob, "hello everyone").await;
    assert!(line.contains("Alice: hello everyone"));
}

#[tokio::test]
async fn test_whisper_between_sessions() {
    let server = TestServer::start().await;
    let (mut alice, _a) = server.connect().await;
    login(&mut alice, "Alice", "pw-a").await;
    let (mut bob, _b) = server.connect().await;
    login(&mut bob, "Bob", "pw-b").await;
    next_text_containing(&mut alice, "Bob has joined the chat!").await;

    send_text(&mut alice, "/w Bob psst").await;
    let whisper = next_text_containing(&mut bob, "(Whisper)").await;
    assert!(whisper.contains("Alice (Whisper): psst"));
    let echo = next_text_containing(&mut alice, "You whispered").await;
    assert!(echo.contains("You whispered to Bob: psst"));
}

#[tokio::test]
async fn test_history_replay_on_rejoin() {
    let server = TestServer::start().await;
    {
        let (mut alice, task) = server.connect().await;
        login(&mut alice, "Alice", "pw-a").await;
        send_text(&mut alice, "message for the record").await;
        send_text(&mut alice, "bye").await;
        // Wait for the first session to fully tear down so the name is free.
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    let (mut again, _task) = server.connect().await;
    login(&mut again, "Alice", "pw-a").await;
    let replay = next_text_containing(&mut again, "message for the record").await;
    assert!(replay.contains("Alice: message for the record"));
}

#[tokio::test]
async fn test_duplicate_live_username_is_rejected() {
    let server = TestServer::start().await;
    let (mut alice, _a) = server.connect().await;
    login(&mut alice, "Alice", "secret").await;

    // A second connection authenticates as Alice but cannot register while
    // the first session is live.
    let (mut imposter, task) = server.connect().await;
    send_text(&mut imposter, "CHECK_USER:Alice").await;
    assert_eq!(next_text(&mut imposter).await, "USER_EXISTS");
    send_text(&mut imposter, "VERIFY_PASSWORD:secret").await;
    assert_eq!(next_text(&mut imposter).await, "PASSWORD_CORRECT");
    send_text(&mut imposter, "Alice").await;

    let rejection = next_text(&mut imposter).await;
    assert!(rejection.contains("already connected"));
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.state.registry.len(), 1);
}

#[tokio::test]
async fn test_shutdown_notice_reaches_clients() {
    let server = TestServer::start().await;
    let (mut alice, task) = server.connect().await;
    login(&mut alice, "Alice", "secret").await;

    // Broadcast the notice the way the supervisor does, then signal.
    let router = palaver::core::routing::Router::new(server.state.clone());
    router.broadcast("SERVER: Server is shutting down. All connections will be closed.", None);
    server.shutdown_tx.send(()).unwrap();

    let notice = next_text_containing(&mut alice, "shutting down").await;
    assert!(notice.starts_with("SERVER:"));
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
