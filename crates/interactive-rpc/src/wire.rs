//! Wire format for the RPC protocol.
//!
//! Every message in either direction is a single JSON object tagged by `type`:
//!
//! ```text
//! {"type":"method","id":12,"method":"hello","params":{},"discard":false,"seq":3}
//! {"type":"reply","id":12,"result":"hi","error":null}
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric protocol error codes used by the core.
///
/// The full catalog belongs to the application layer; these are the codes the
/// socket and dispatcher produce on their own.
pub mod codes {
    /// The server or client failed to process a frame.
    pub const PROCESSING_ERROR: i32 = 4000;
    /// The frame could not be parsed.
    pub const INVALID_PAYLOAD: i32 = 4001;
    /// The frame's `type` discriminator is not recognised.
    pub const UNKNOWN_PACKET_TYPE: i32 = 4002;
    /// No handler is registered for the method name.
    pub const UNKNOWN_METHOD_NAME: i32 = 4003;
}

/// An RPC request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: u32,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub discard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
}

impl Method {
    /// Create a method with a freshly randomised id.
    pub fn new(method: impl Into<String>, params: Value, discard: bool) -> Self {
        Self {
            id: rand::random::<u32>(),
            method: method.into(),
            params,
            discard,
            seq: None,
        }
    }

    /// Build a successful reply addressed to this method.
    pub fn reply(&self, result: Value) -> Reply {
        Reply::ok(self.id, result)
    }

    /// Build an error reply addressed to this method.
    pub fn reply_error(&self, error: RpcError) -> Reply {
        Reply::err(self.id, error)
    }
}

/// The error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} ({}) at {}", self.message, self.code, path),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

impl std::error::Error for RpcError {}

/// A response frame correlated to a [`Method`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u32,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Reply {
    /// Create a success reply.
    pub fn ok(id: u32, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Create an error reply.
    pub fn err(id: u32, error: RpcError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error),
        }
    }

    /// Collapse the reply into the caller-facing result.
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Method(Method),
    Reply(Reply),
}

impl Frame {
    pub fn id(&self) -> u32 {
        match self {
            Frame::Method(method) => method.id,
            Frame::Reply(reply) => reply.id,
        }
    }
}

impl From<Method> for Frame {
    fn from(method: Method) -> Self {
        Frame::Method(method)
    }
}

impl From<Reply> for Frame {
    fn from(reply: Reply) -> Self {
        Frame::Reply(reply)
    }
}

/// Serialize a frame to its JSON text form.
pub fn encode(frame: &Frame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse one inbound text frame.
///
/// Malformed JSON and unknown `type` values both come back as
/// [`SocketError::Decode`](crate::SocketError::Decode).
pub fn decode(text: &str) -> Result<Frame> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SocketError;
    use serde_json::json;

    #[test]
    fn test_method_frame_shape() {
        let mut method = Method::new("hello", json!({"foo": "bar"}), false);
        method.seq = Some(7);
        let value: Value = serde_json::from_str(&encode(&method.clone().into()).unwrap()).unwrap();

        assert_eq!(value["type"], "method");
        assert_eq!(value["id"], json!(method.id));
        assert_eq!(value["method"], "hello");
        assert_eq!(value["params"], json!({"foo": "bar"}));
        assert_eq!(value["discard"], false);
        assert_eq!(value["seq"], 7);
    }

    #[test]
    fn test_method_without_seq_omits_field() {
        let method = Method::new("ready", json!({}), true);
        let text = encode(&Frame::Method(method)).unwrap();
        assert!(!text.contains("\"seq\""));
        assert!(text.contains("\"discard\":true"));
    }

    #[test]
    fn test_reply_frame_serializes_null_error() {
        let text = encode(&Frame::Reply(Reply::ok(3, json!("hi")))).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "reply", "id": 3, "result": "hi", "error": null}));
    }

    #[test]
    fn test_decode_received_method_keeps_id() {
        let frame = decode(
            r#"{"type":"method","id":4294967295,"method":"onParticipantJoin","params":{"x":1},"discard":true}"#,
        )
        .unwrap();
        match frame {
            Frame::Method(method) => {
                assert_eq!(method.id, u32::MAX);
                assert_eq!(method.method, "onParticipantJoin");
                assert!(method.discard);
                assert_eq!(method.seq, None);
            }
            other => panic!("Expected method, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_reply() {
        let frame = decode(
            r#"{"type":"reply","id":9,"result":null,"error":{"code":4003,"message":"Unknown method","path":"method"}}"#,
        )
        .unwrap();
        let Frame::Reply(reply) = frame else {
            panic!("Expected reply");
        };
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, 4003);
        assert_eq!(err.path.as_deref(), Some("method"));
    }

    #[test]
    fn test_decode_reply_with_missing_fields_defaults() {
        let frame = decode(r#"{"type":"reply","id":1}"#).unwrap();
        assert_eq!(frame, Frame::Reply(Reply::ok(1, Value::Null)));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let result = decode("{not json");
        assert!(matches!(result, Err(SocketError::Decode { .. })));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let result = decode(r#"{"type":"event","id":1}"#);
        assert!(matches!(result, Err(SocketError::Decode { .. })));
    }

    #[test]
    fn test_random_ids_differ() {
        let a = Method::new("a", Value::Null, false);
        let b = Method::new("a", Value::Null, false);
        // A collision here is a 1 in 2^32 event.
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::new(4003, "Unknown method name").with_path("method");
        assert_eq!(err.to_string(), "Unknown method name (4003) at method");
    }
}
