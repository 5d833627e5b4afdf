//! Error types for tether-sandbox.

use thiserror::Error;

/// Result type alias for engine construction and configuration.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors raised while building an engine, before any directive is handled.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The embedded interpreter could not be created.
    #[error("interpreter setup failed: {0}")]
    Interpreter(String),

    /// Invalid sandbox configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error (module directory loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A malformed directive that the engine refuses to dispatch.
///
/// Protocol faults are never turned into `fail` results. They escape the
/// engine so the connection loop (and its supervisor) can tell them apart
/// from ordinary in-sandbox failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    /// The directive carried no `action`, or an empty one.
    #[error("`action` is required argument")]
    MissingAction,

    /// The `action` does not name a registered handler.
    #[error("unknown action `{0}`")]
    UnknownAction(String),
}

/// A failure raised inside one action. Always caught at the action boundary.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Expected failure raised explicitly by a handler.
    #[error("{0}")]
    Failed(String),

    /// A directive field is missing or has the wrong shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Exception raised by sandboxed code.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// One frame of a sandboxed stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function name, `<eval>` for top-level code.
    pub function: String,
    /// Line number inside the sandboxed source, when known.
    pub line: Option<u32>,
}

/// Exception raised by sandboxed code, as reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct ScriptError {
    /// Error class name (`ReferenceError`, `ImportError`, ...).
    pub name: String,
    /// Error message.
    pub message: String,
    /// Frames belonging to sandboxed code, innermost first.
    pub frames: Vec<Frame>,
}

impl ScriptError {
    /// Create an error without trace frames.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }
}

/// Import rejected by the module policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportDenied {
    /// The module is not in the allowed set.
    #[error("The module `{module}` is not allowed in this sandbox. Please see {policy_url}")]
    NotAllowed {
        /// Rejected module name.
        module: String,
        /// Where the module policy is documented.
        policy_url: String,
    },

    /// The module is allowed but nothing is registered under that name.
    #[error("No module named `{0}`")]
    NotFound(String),
}

impl ImportDenied {
    /// Error class name reported to sandboxed code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAllowed { .. } => "ImportError",
            Self::NotFound(_) => "ModuleNotFoundError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display() {
        let err = ScriptError::new("ReferenceError", "x is not defined");
        assert_eq!(err.to_string(), "ReferenceError: x is not defined");
    }

    #[test]
    fn test_import_denied_names_module() {
        let err = ImportDenied::NotAllowed {
            module: "clock".into(),
            policy_url: "https://example.org/modules".into(),
        };
        assert_eq!(err.kind(), "ImportError");
        let message = err.to_string();
        assert!(message.contains("`clock`"));
        assert!(message.contains("https://example.org/modules"));
    }

    #[test]
    fn test_protocol_fault_messages() {
        assert_eq!(
            ProtocolFault::MissingAction.to_string(),
            "`action` is required argument"
        );
        assert_eq!(
            ProtocolFault::UnknownAction("fly".into()).to_string(),
            "unknown action `fly`"
        );
    }
}
