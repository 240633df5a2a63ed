//! Length-prefixed CBOR framing for the control stream.
//!
//! Wire format: `[4-byte big-endian length][payload]`. The same prefix is used
//! for the relay token that opens every data-plane connection.

use crate::error::{Border0Error, Border0Result};
use std::io::Cursor;

/// Largest payload accepted in a single frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Prefix raw bytes with their big-endian `u32` length.
pub fn frame_bytes(payload: &[u8]) -> Border0Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Border0Error::Codec(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            payload.len()
        )));
    }
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> Border0Result<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;
    frame_bytes(&payload)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Border0Result<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete CBOR-decoded messages.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> Border0Result<Vec<T>> {
        self.feed_raw(data)?
            .iter()
            .map(|payload| cbor_decode(payload))
            .collect()
    }

    /// Feed raw bytes and return complete raw frames (undecoded payloads).
    ///
    /// A length header announcing more than [`MAX_FRAME_SIZE`] poisons the
    /// stream and is reported as a codec error.
    pub fn feed_raw(&mut self, data: &[u8]) -> Border0Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        while self.buffer.len() >= 4 {
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;
            if len > MAX_FRAME_SIZE {
                return Err(Border0Error::Codec(format!(
                    "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
                )));
            }
            if self.buffer.len() < 4 + len {
                break;
            }

            frames.push(self.buffer[4..4 + len].to_vec());
            self.buffer.drain(..4 + len);
        }

        Ok(frames)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
