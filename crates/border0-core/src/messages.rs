// Border0 listener protocol messages.
//
// Control stream: length-prefixed CBOR frames (see `codec`), each frame one
// `ControlMessage`. Data plane: one length-prefixed relay token followed by a
// single status byte from the relay.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version string sent in `Register`.
pub const PROTOCOL_VERSION: &str = "border0-listener-v1";

/// Every control message, adjacently tagged as `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ControlMessage {
    Register(RegisterPayload),
    Registered(RegisteredPayload),
    DialRequest(DialRequestPayload),
    DialResult(DialResultPayload),
    Heartbeat(HeartbeatPayload),
    HeartbeatAck(HeartbeatPayload),
    Error(ErrorPayload),
}

impl ControlMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Registered(_) => "registered",
            Self::DialRequest(_) => "dial_request",
            Self::DialResult(_) => "dial_result",
            Self::Heartbeat(_) => "heartbeat",
            Self::HeartbeatAck(_) => "heartbeat_ack",
            Self::Error(_) => "error",
        }
    }
}

// ── Message payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub socket_id: Uuid,
    pub version: String,
    /// Credential metadata (`token`, `connector_id`); absent keys are omitted.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredPayload {
    pub connector_id: Uuid,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DialRequestPayload {
    pub request_id: Uuid,
    pub relay_address: String,
    #[serde(with = "serde_bytes")]
    pub relay_token: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_hint: Option<String>,
}

// The relay token is a bearer secret; keep it out of logs.
impl fmt::Debug for DialRequestPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialRequestPayload")
            .field("request_id", &self.request_id)
            .field("relay_address", &self.relay_address)
            .field("relay_token", &format_args!("<{} bytes>", self.relay_token.len()))
            .field("peer_hint", &self.peer_hint)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialResultPayload {
    pub request_id: Uuid,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DialFailure>,
}

impl DialResultPayload {
    pub fn ok(request_id: Uuid) -> Self {
        Self {
            request_id,
            ok: true,
            reason: None,
        }
    }

    pub fn failed(request_id: Uuid, reason: DialFailure) -> Self {
        Self {
            request_id,
            ok: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes the control plane may send instead of (or after) `Registered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    UnsupportedVersion,
    Unavailable,
    Internal,
}

/// Reason code carried by a failed `DialResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialFailure {
    RelayUnreachable,
    Tls,
    RelayRefused,
    Protocol,
    Timeout,
    Backpressure,
    Closed,
}

impl DialFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelayUnreachable => "relay_unreachable",
            Self::Tls => "tls",
            Self::RelayRefused => "relay_refused",
            Self::Protocol => "protocol",
            Self::Timeout => "timeout",
            Self::Backpressure => "backpressure",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Data plane ────────────────────────────────────────────────────────

/// Status byte a relay sends after reading the relay token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayStatus {
    Ok = 0x00,
    Refused = 0x01,
    Unauthorized = 0x02,
}

impl From<RelayStatus> for u8 {
    fn from(s: RelayStatus) -> u8 {
        s as u8
    }
}

impl TryFrom<u8> for RelayStatus {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            0x00 => Ok(Self::Ok),
            0x01 => Ok(Self::Refused),
            0x02 => Ok(Self::Unauthorized),
            _ => Err(format!("unknown relay status: 0x{v:02x}")),
        }
    }
}

// ── Helper for bytes serde ───────────────────────────────────────────

mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf: ByteBuf = Deserialize::deserialize(deserializer)?;
        Ok(buf.0)
    }

    struct ByteBuf(Vec<u8>);

    impl<'de> Deserialize<'de> for ByteBuf {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            struct ByteBufVisitor;

            impl<'de> serde::de::Visitor<'de> for ByteBufVisitor {
                type Value = ByteBuf;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("bytes")
                }

                fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E> {
                    Ok(ByteBuf(v.to_vec()))
                }

                fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                    Ok(ByteBuf(v))
                }

                fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
                where
                    A: serde::de::SeqAccess<'de>,
                {
                    let mut bytes = Vec::new();
                    while let Some(b) = seq.next_element::<u8>()? {
                        bytes.push(b);
                    }
                    Ok(ByteBuf(bytes))
                }
            }

            deserializer.deserialize_byte_buf(ByteBufVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{cbor_decode, FrameDecoder, frame_encode};

    #[test]
    fn dial_request_survives_the_wire() {
        let req = ControlMessage::DialRequest(DialRequestPayload {
            request_id: Uuid::from_u128(0x1234),
            relay_address: "relay.test:443".into(),
            relay_token: vec![0xAA],
            peer_hint: None,
        });

        let frame = frame_encode(&req).unwrap();
        let decoded: Vec<ControlMessage> = FrameDecoder::new().feed(&frame).unwrap();
        assert_eq!(decoded, vec![req]);
    }

    #[test]
    fn dial_result_omits_reason_when_ok() {
        let ok = ControlMessage::DialResult(DialResultPayload::ok(Uuid::nil()));
        let frame = frame_encode(&ok).unwrap();
        let value: ciborium::Value = cbor_decode(&frame[4..]).unwrap();
        let text = format!("{value:?}");
        assert!(!text.contains("reason"));
    }

    #[test]
    fn remote_error_decodes_code() {
        let err = ControlMessage::Error(ErrorPayload {
            code: ErrorCode::Unauthorized,
            message: "token revoked".into(),
        });
        let frame = frame_encode(&err).unwrap();
        let decoded: ControlMessage = cbor_decode(&frame[4..]).unwrap();
        assert_eq!(decoded, err);
        assert_eq!(decoded.kind(), "error");
    }

    #[test]
    fn relay_token_hidden_from_debug() {
        let req = DialRequestPayload {
            request_id: Uuid::nil(),
            relay_address: "relay.test:443".into(),
            relay_token: b"super-secret".to_vec(),
            peer_hint: Some("203.0.113.9:51000".into()),
        };
        let out = format!("{req:?}");
        assert!(!out.contains("super"));
        assert!(out.contains("<12 bytes>"));
    }

    #[test]
    fn relay_status_bytes() {
        assert_eq!(RelayStatus::try_from(0x00).unwrap(), RelayStatus::Ok);
        assert_eq!(RelayStatus::try_from(0x01).unwrap(), RelayStatus::Refused);
        assert!(RelayStatus::try_from(0x7f).is_err());
        assert_eq!(u8::from(RelayStatus::Unauthorized), 0x02);
    }
}
