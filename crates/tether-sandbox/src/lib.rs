//! # tether-sandbox
//!
//! Capability-restricted script execution for tether workers.
//!
//! An [`Engine`] owns one persistent JavaScript namespace and handles the
//! directives a referee sends over the wire: run code, call a function, or
//! evaluate console input, each optionally preceded by capability edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     tether-sandbox                       │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  directive (JSON)                                        │
//! │        │                                                 │
//! │        ▼                                                 │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │     Engine      │────▶│  CapabilitySet           │   │
//! │  │  - execute()    │     │  - builtins              │   │
//! │  │  - apply edits  │     │  - ModulePolicy (shared) │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │     │          │                      │ check           │
//! │     │          ▼                      ▼                 │
//! │     │   ┌─────────────┐     ┌──────────────────────┐   │
//! │     │   │  CoverHook  │────▶│  Interpreter          │   │
//! │     │   └─────────────┘     │  (QuickJs + require)  │   │
//! │     │                       └──────────────────────┘   │
//! │     ▼                                                   │
//! │  translate() ──▶ TraceSink (stderr)                     │
//! │     │                                                   │
//! │     ▼                                                   │
//! │  encode() ──▶ {"status": "success" | "fail", ...}       │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tether_sandbox::{encode, Engine, Outcome, SandboxConfig};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = Engine::new(SandboxConfig::default())?;
//!
//! engine.execute(&json!({"action": "run_code", "code": "function add(p) { return p[0] + p[1]; }"}))?;
//! let outcome = engine.execute(&json!({
//!     "action": "run_function",
//!     "function_name": "add",
//!     "function_args": [1, 2]
//! }))?;
//!
//! if let Outcome::Reply(result) = outcome {
//!     assert_eq!(encode(&result), r#"{"status":"success","result":3}"#);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Persistent Namespace**: Bindings survive across directives on one connection
//! - **Capability Edits**: Remove builtins, allow or revoke modules, reseed randomness
//! - **Import Policy**: Every `require` is checked against the live allow-list
//! - **Coverage Wrappers**: Typed callbacks wrapped around user function calls
//! - **Sanitized Failures**: The peer sees one line; traces stay local

mod capability;
mod config;
mod cover;
mod encode;
mod engine;
mod error;
mod interpreter;
mod modules;
mod quickjs;
mod request;
mod translate;

pub use capability::{CapabilitySet, ModulePolicy};
pub use config::{
    SandboxConfig, SandboxConfigBuilder, DEFAULT_ALLOWED_MODULES, DEFAULT_CLOSED_BUILTINS,
    DEFAULT_GLOBAL_NAME, DEFAULT_POLICY_URL,
};
pub use cover::{CoverHook, CoverRegistry, IdentityCover, Invoke, SpreadCover};
pub use encode::{encode, render_debug};
pub use engine::Engine;
pub use error::{ActionError, Frame, ImportDenied, ProtocolFault, Result, SandboxError, ScriptError};
pub use interpreter::{Binding, Evaluation, Interpreter, ScriptValue};
pub use modules::ModuleRegistry;
pub use quickjs::QuickJs;
pub use request::{seed_from_value, Action, EnvConfig, ExecutionRequest, ExecutionResult, Outcome};
pub use translate::{format_trace, translate, MemorySink, StderrSink, TraceSink, MAX_DESCRIPTION_LEN};
