//! # tether-worker
//!
//! Long-lived worker that connects to a referee, runs its directives in a
//! [`tether_sandbox::Engine`] and sends back the results.
//!
//! ## Session
//!
//! ```text
//!  worker                                   referee
//!    │  {"status":"connected",...}\0          │
//!    │ ─────────────────────────────────────▶ │
//!    │  {"action":"run_code",...}\0           │
//!    │ ◀───────────────────────────────────── │
//!    │  {"status":"success"}\0                │
//!    │ ─────────────────────────────────────▶ │
//!    │                  ...                   │
//!    │  {"action":"stop"}\0                   │
//!    │ ◀───────────────────────────────────── │
//!    ╳  (connection closed, nothing sent)     │
//! ```
//!
//! A directive without a usable `action` is a protocol fault and ends the
//! loop with an error; everything else is answered with a `success` or
//! `fail` result.

mod client;
mod config;
mod privileges;
mod protocol;
mod transport;

pub use client::{ClientError, ClientLoop};
pub use config::{ConfigError, WorkerConfig};
pub use privileges::{drop_privileges, PrivilegeOutcome};
pub use protocol::{decode_directive, Handshake};
pub use transport::{
    Channel, Reply, TransportError, DEFAULT_MAX_MESSAGE_SIZE, EMPTY_READ_LIMIT, READ_ATTEMPTS,
    READ_CHUNK_SIZE, TERMINATOR,
};
