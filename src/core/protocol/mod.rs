// src/core/protocol/mod.rs

pub mod frame;

pub use frame::{Frame, FrameCodec, Inbound, MAX_FILE_SIZE};
