// src/core/protocol/frame.rs

//! Implements the chat wire-protocol frame structure and the corresponding
//! `Encoder` and `Decoder` for network communication.
//!
//! Every frame starts with a one-byte type tag. A TEXT frame carries a
//! length-prefixed UTF-8 string; a FILE frame carries a length-prefixed
//! filename followed by an 8-byte big-endian payload length and the raw
//! payload bytes. All integers are big-endian.
//!
//! Decoding is strict: an unknown tag, invalid UTF-8, or a stream that ends
//! inside a frame is a fatal framing error for the connection. No
//! resynchronization is attempted. The one deliberate exception is a FILE
//! frame whose declared payload exceeds [`MAX_FILE_SIZE`]: its bytes are
//! drained from the stream without being buffered and the frame surfaces as
//! [`Inbound::OversizedFile`], so the session can reject the transfer and
//! keep the connection usable.
//!
//! Writers must treat encode-plus-flush as one atomic unit. The connection
//! handler guarantees this by being the only task that touches its sink;
//! every cross-session delivery travels through the session's outbox channel
//! first.

use crate::core::PalaverError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const TAG_TEXT: u8 = 1;
const TAG_FILE: u8 = 2;

/// The largest file payload the server will buffer and relay, in bytes.
pub const MAX_FILE_SIZE: u64 = 50_000_000;

/// A single frame of the chat wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame. Handshake control strings and chat text share
    /// this frame type.
    Text(String),
    /// A binary file transfer.
    File { name: String, data: Bytes },
}

/// An item produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete, well-formed frame.
    Frame(Frame),
    /// A FILE frame whose declared payload exceeded [`MAX_FILE_SIZE`]. The
    /// payload bytes have been consumed from the stream but were never
    /// stored.
    OversizedFile { name: String, declared_len: u64 },
}

/// Intermediate result of parsing one frame header + body from a slice.
enum Parsed {
    Complete(Frame),
    Oversized { name: String, declared_len: u64 },
}

/// State carried across `decode` calls while an oversized payload is being
/// discarded.
#[derive(Debug)]
struct DrainState {
    name: String,
    declared_len: u64,
    remaining: u64,
}

/// A `tokio_util::codec` implementation for encoding and decoding [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameCodec {
    draining: Option<DrainState>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a single frame from `bytes`, advancing the slice past the
    /// consumed input on success.
    fn parse_frame(bytes: &mut &[u8]) -> Result<Parsed, PalaverError> {
        match split_u8(bytes)? {
            TAG_TEXT => Ok(Parsed::Complete(Frame::Text(split_string(bytes)?))),
            TAG_FILE => {
                let name = split_string(bytes)?;
                let declared_len = split_u64(bytes)?;
                if declared_len > MAX_FILE_SIZE {
                    return Ok(Parsed::Oversized { name, declared_len });
                }
                let len = declared_len as usize;
                if bytes.len() < len {
                    return Err(PalaverError::IncompleteData);
                }
                let data = Bytes::copy_from_slice(&bytes[..len]);
                *bytes = &bytes[len..];
                Ok(Parsed::Complete(Frame::File { name, data }))
            }
            tag => Err(PalaverError::UnknownFrameTag(tag)),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = PalaverError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Text(text) => {
                dst.put_u8(TAG_TEXT);
                put_string(dst, &text)?;
            }
            Frame::File { name, data } => {
                dst.put_u8(TAG_FILE);
                put_string(dst, &name)?;
                dst.put_u64(data.len() as u64);
                dst.extend_from_slice(&data);
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = PalaverError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Finish discarding an oversized payload before looking for the next
        // frame header.
        if let Some(mut drain) = self.draining.take() {
            let take = drain.remaining.min(src.len() as u64) as usize;
            src.advance(take);
            drain.remaining -= take as u64;
            if drain.remaining == 0 {
                return Ok(Some(Inbound::OversizedFile {
                    name: drain.name,
                    declared_len: drain.declared_len,
                }));
            }
            self.draining = Some(drain);
            return Ok(None);
        }

        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match Self::parse_frame(&mut bytes) {
            Ok(Parsed::Complete(frame)) => {
                let consumed = src.len() - bytes.len();
                src.advance(consumed);
                Ok(Some(Inbound::Frame(frame)))
            }
            Ok(Parsed::Oversized { name, declared_len }) => {
                // Consume the header, then drain whatever portion of the
                // payload is already buffered.
                let consumed = src.len() - bytes.len();
                src.advance(consumed);
                self.draining = Some(DrainState {
                    name,
                    declared_len,
                    remaining: declared_len,
                });
                self.decode(src)
            }
            // `IncompleteData` signals that we need more bytes; any other
            // error is propagated and fatal for the connection.
            Err(PalaverError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Writes a u16-length-prefixed UTF-8 string into the buffer.
fn put_string(dst: &mut BytesMut, s: &str) -> Result<(), PalaverError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        PalaverError::FrameTooLarge(format!(
            "string payload of {} bytes exceeds the u16 length prefix",
            s.len()
        ))
    })?;
    dst.put_u16(len);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

fn split_u8(bytes: &mut &[u8]) -> Result<u8, PalaverError> {
    let (&first, rest) = bytes.split_first().ok_or(PalaverError::IncompleteData)?;
    *bytes = rest;
    Ok(first)
}

fn split_u16(bytes: &mut &[u8]) -> Result<u16, PalaverError> {
    if bytes.len() < 2 {
        return Err(PalaverError::IncompleteData);
    }
    let (head, rest) = bytes.split_at(2);
    *bytes = rest;
    Ok(u16::from_be_bytes([head[0], head[1]]))
}

fn split_u64(bytes: &mut &[u8]) -> Result<u64, PalaverError> {
    if bytes.len() < 8 {
        return Err(PalaverError::IncompleteData);
    }
    let (head, rest) = bytes.split_at(8);
    *bytes = rest;
    let arr: [u8; 8] = head.try_into().map_err(|_| PalaverError::IncompleteData)?;
    Ok(u64::from_be_bytes(arr))
}

/// Reads a u16-length-prefixed UTF-8 string from the slice.
fn split_string(bytes: &mut &[u8]) -> Result<String, PalaverError> {
    let len = split_u16(bytes)? as usize;
    if bytes.len() < len {
        return Err(PalaverError::IncompleteData);
    }
    let s = std::str::from_utf8(&bytes[..len])?.to_owned();
    *bytes = &bytes[len..];
    Ok(s)
}
