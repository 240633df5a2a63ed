//! border0-core: shared protocol library for the Border0 SDK.
//!
//! Provides the error type, length-prefixed CBOR codec, control-plane and
//! relay wire messages, the socket data model, and small data-shape helpers.

pub mod codec;
pub mod error;
pub mod messages;
pub mod socket;
pub mod util;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_bytes, frame_encode, FrameDecoder, MAX_FRAME_SIZE};
pub use error::{Border0Error, Border0Result};
pub use messages::{ControlMessage, DialFailure, ErrorCode, RelayStatus, PROTOCOL_VERSION};
pub use socket::{SocketRef, SocketType};
