//! Directive and result types exchanged with the referee.

use crate::error::ProtocolFault;
use crate::interpreter::ScriptValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The fixed set of sandbox operations a directive can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Execute statements against the namespace.
    RunCode,
    /// Call a function bound in the namespace.
    RunFunction,
    /// `RunCode` then `RunFunction` under one config application.
    RunCodeAndFunction,
    /// Evaluate an expression and render it, REPL style.
    RunInConsole,
    /// Apply capability edits only.
    Config,
    /// End the session.
    Stop,
}

impl Action {
    /// Every registered action.
    pub const ALL: [Action; 6] = [
        Action::RunCode,
        Action::RunFunction,
        Action::RunCodeAndFunction,
        Action::RunInConsole,
        Action::Config,
        Action::Stop,
    ];

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCode => "run_code",
            Self::RunFunction => "run_function",
            Self::RunCodeAndFunction => "run_code_and_function",
            Self::RunInConsole => "run_in_console",
            Self::Config => "config",
            Self::Stop => "stop",
        }
    }

    /// Resolve the `action` field of a raw directive.
    pub fn from_directive(directive: &Value) -> Result<Self, ProtocolFault> {
        match directive.get("action") {
            None | Some(Value::Null) => Err(ProtocolFault::MissingAction),
            Some(Value::String(name)) if name.is_empty() => Err(ProtocolFault::MissingAction),
            Some(Value::String(name)) => name.parse(),
            Some(other) => Err(ProtocolFault::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ProtocolFault::UnknownAction(s.to_string()))
    }
}

/// Capability edits carried by a directive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvConfig {
    /// Builtin identifiers to hide.
    #[serde(default)]
    pub remove_builtins: Option<Vec<String>>,
    /// Modules to allow.
    #[serde(default)]
    pub add_allowed_modules: Option<Vec<String>>,
    /// Modules to disallow.
    #[serde(default)]
    pub remove_allowed_modules: Option<Vec<String>>,
    /// Name of the registered coverage wrapper to install.
    #[serde(default)]
    pub cover_code: Option<String>,
    /// Seed for `Math.random`: any JSON value.
    #[serde(default)]
    pub random_seed: Option<Value>,
    /// New value for `__name__`.
    #[serde(default)]
    pub global_name: Option<String>,
}

/// A decoded directive. Fields are only required by the actions that use them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionRequest {
    /// Source text for `run_code`, `run_code_and_function`, `run_in_console`.
    #[serde(default)]
    pub code: Option<String>,
    /// Function to call for `run_function`, `run_code_and_function`.
    #[serde(default)]
    pub function_name: Option<String>,
    /// Data handed to the coverage wrapper.
    #[serde(default)]
    pub function_args: Value,
    /// Capability edits applied before the action runs.
    #[serde(default)]
    pub env_config: Option<EnvConfig>,
}

/// Result of one action, as sent back to the referee.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    /// The action completed.
    Success {
        /// Return value; omitted for statement-only actions.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ScriptValue>,
    },
    /// The action failed.
    Fail {
        /// Sanitized, human-readable failure description.
        description: String,
    },
}

impl ExecutionResult {
    /// Success without a result.
    pub fn empty() -> Self {
        Self::Success { result: None }
    }

    /// Success carrying a value.
    pub fn value(value: ScriptValue) -> Self {
        Self::Success {
            result: Some(value),
        }
    }

    /// Failure with a description.
    pub fn fail(description: impl Into<String>) -> Self {
        Self::Fail {
            description: description.into(),
        }
    }

    /// True for `status: success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Type name of a result value that cannot be encoded, if any.
    pub fn opaque_type(&self) -> Option<&str> {
        match self {
            Self::Success {
                result: Some(ScriptValue::Opaque { type_name, .. }),
            } => Some(type_name),
            _ => None,
        }
    }
}

/// What the engine wants the connection loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send this result and wait for the next directive.
    Reply(ExecutionResult),
    /// Leave the loop without sending anything.
    Stop,
}

/// Derive a `u64` seed from an arbitrary JSON seed value.
///
/// Integers seed directly, floats by bit pattern, strings by FNV-1a and
/// anything else by hashing its JSON text.
pub fn seed_from_value(seed: &Value) -> u64 {
    match seed {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i as u64))
            .or_else(|| n.as_f64().map(f64::to_bits))
            .unwrap_or_default(),
        Value::String(s) => fnv1a(s.as_bytes()),
        other => fnv1a(other.to_string().as_bytes()),
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_action_from_directive() {
        assert_eq!(
            Action::from_directive(&json!({"action": "run_code"})).unwrap(),
            Action::RunCode
        );
        assert_eq!(
            Action::from_directive(&json!({"code": "1"})).unwrap_err(),
            ProtocolFault::MissingAction
        );
        assert_eq!(
            Action::from_directive(&json!({"action": ""})).unwrap_err(),
            ProtocolFault::MissingAction
        );
        assert_eq!(
            Action::from_directive(&json!({"action": "fly"})).unwrap_err(),
            ProtocolFault::UnknownAction("fly".into())
        );
        assert!(matches!(
            Action::from_directive(&json!({"action": 3})),
            Err(ProtocolFault::UnknownAction(_))
        ));
    }

    #[test]
    fn test_request_decodes_partial_fields() {
        let req: ExecutionRequest = serde_json::from_value(json!({
            "action": "run_function",
            "function_name": "add",
            "function_args": [1, 2],
            "env_config": {"remove_builtins": ["Math"], "random_seed": "abc"}
        }))
        .unwrap();

        assert!(req.code.is_none());
        assert_eq!(req.function_name.as_deref(), Some("add"));
        assert_eq!(req.function_args, json!([1, 2]));
        let env = req.env_config.unwrap();
        assert_eq!(env.remove_builtins, Some(vec!["Math".to_string()]));
        assert_eq!(env.random_seed, Some(json!("abc")));
        assert!(env.cover_code.is_none());
    }

    #[test]
    fn test_result_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionResult::empty()).unwrap(),
            json!({"status": "success"})
        );
        assert_eq!(
            serde_json::to_value(ExecutionResult::value(ScriptValue::Data(json!(3)))).unwrap(),
            json!({"status": "success", "result": 3})
        );
        assert_eq!(
            serde_json::to_value(ExecutionResult::fail("boom")).unwrap(),
            json!({"status": "fail", "description": "boom"})
        );
    }

    #[test]
    fn test_opaque_type() {
        let result = ExecutionResult::value(ScriptValue::Opaque {
            type_name: "function".into(),
            repr: "<function f>".into(),
        });
        assert_eq!(result.opaque_type(), Some("function"));
        assert!(ExecutionResult::empty().opaque_type().is_none());
    }

    #[test]
    fn test_seed_from_value() {
        assert_eq!(seed_from_value(&json!(42)), 42);
        assert_eq!(seed_from_value(&json!(-1)), u64::MAX);
        assert_eq!(seed_from_value(&json!(1.5)), 1.5f64.to_bits());
        assert_eq!(seed_from_value(&json!("abc")), seed_from_value(&json!("abc")));
        assert_ne!(seed_from_value(&json!("abc")), seed_from_value(&json!("abd")));
        assert_eq!(seed_from_value(&json!("")), 0xcbf2_9ce4_8422_2325);
    }
}
