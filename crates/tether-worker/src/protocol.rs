//! Wire messages owned by the worker itself.
//!
//! Directives and results are defined by `tether-sandbox`; the worker only
//! adds the handshake and the decoding of raw frames.

use serde::Serialize;
use serde_json::Value;

/// First message of every session, sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handshake {
    /// Always `"connected"`.
    pub status: &'static str,
    /// Identifier the referee assigned to this environment.
    pub environment_id: String,
    /// Worker process id.
    pub pid: u32,
}

impl Handshake {
    /// Handshake for the current process.
    pub fn new(environment_id: impl Into<String>) -> Self {
        Self {
            status: "connected",
            environment_id: environment_id.into(),
            pid: std::process::id(),
        }
    }
}

/// Decode one frame into a directive.
pub fn decode_directive(frame: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_shape() {
        let handshake = Handshake::new("env-7");
        let value = serde_json::to_value(&handshake).unwrap();
        assert_eq!(
            value,
            json!({"status": "connected", "environment_id": "env-7", "pid": std::process::id()})
        );
    }

    #[test]
    fn test_decode_directive() {
        let directive = decode_directive(br#"{"action":"stop"}"#).unwrap();
        assert_eq!(directive["action"], "stop");

        assert!(decode_directive(b"not json").is_err());
        assert!(decode_directive(&[0xff, 0xfe]).is_err());
    }
}
