//! Protocol loop: handshake, then directive / result until `stop`.

use crate::protocol::{decode_directive, Handshake};
use crate::transport::{Channel, Reply, TransportError};
use tether_sandbox::{encode, Engine, ExecutionResult, Outcome, ProtocolFault};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Errors that end the protocol loop.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The referee sent a directive without a usable `action`.
    #[error("protocol fault: {0}")]
    Protocol(#[from] ProtocolFault),

    /// The handshake could not be serialized.
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drives one engine over one connection.
pub struct ClientLoop<S> {
    channel: Channel<S>,
    engine: Engine,
    environment_id: String,
}

impl<S> ClientLoop<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a loop over an established channel.
    pub fn new(channel: Channel<S>, engine: Engine, environment_id: impl Into<String>) -> Self {
        Self {
            channel,
            engine,
            environment_id: environment_id.into(),
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok` after `stop`; the connection is closed without sending
    /// anything further.
    pub async fn run(mut self) -> Result<(), ClientError> {
        debug!(environment_id = %self.environment_id, "sending handshake");
        let handshake = serde_json::to_vec(&Handshake::new(self.environment_id.as_str()))?;
        let mut frame = self
            .channel
            .request(&handshake, Reply::Expected)
            .await?
            .unwrap_or_default();

        loop {
            let result = match decode_directive(&frame) {
                Ok(directive) => match self.engine.execute(&directive) {
                    Ok(Outcome::Reply(result)) => result,
                    Ok(Outcome::Stop) => {
                        info!(environment_id = %self.environment_id, "stop received, closing connection");
                        return Ok(());
                    }
                    Err(fault) => {
                        error!(error = %fault, "protocol fault, terminating");
                        return Err(fault.into());
                    }
                },
                Err(err) => {
                    warn!(error = %err, bytes = frame.len(), "malformed request");
                    ExecutionResult::fail(format!("malformed request: {err}"))
                }
            };

            debug!(success = result.is_success(), "directive handled");
            let reply = encode(&result);
            frame = self
                .channel
                .request(reply.as_bytes(), Reply::Expected)
                .await?
                .unwrap_or_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tether_sandbox::SandboxConfig;
    use tokio_test::io::Builder;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.push(0);
        frame
    }

    fn handshake() -> Vec<u8> {
        frame(&serde_json::to_vec(&Handshake::new("env-1")).unwrap())
    }

    fn engine() -> Engine {
        Engine::new(SandboxConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_stop_after_handshake() {
        let mock = Builder::new()
            .write(&handshake())
            .read(&frame(br#"{"action":"stop"}"#))
            .build();
        ClientLoop::new(Channel::new(mock), engine(), "env-1")
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_is_answered() {
        let parse_error = serde_json::from_slice::<Value>(b"garbage").unwrap_err();
        let reply = encode(&ExecutionResult::fail(format!("malformed request: {parse_error}")));

        let mock = Builder::new()
            .write(&handshake())
            .read(&frame(b"garbage"))
            .write(&frame(reply.as_bytes()))
            .read(&frame(br#"{"action":"stop"}"#))
            .build();
        ClientLoop::new(Channel::new(mock), engine(), "env-1")
            .run()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_protocol_fault_ends_loop() {
        let mock = Builder::new()
            .write(&handshake())
            .read(&frame(br#"{"action":"teleport"}"#))
            .build();
        let err = ClientLoop::new(Channel::new(mock), engine(), "env-1")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolFault::UnknownAction(_))
        ));
    }
}
