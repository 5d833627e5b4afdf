//! The seam between the sandbox policy layer and the code that actually
//! evaluates scripts.
//!
//! The engine decides *what* is allowed; an [`Interpreter`] only knows *how*
//! to run code against its namespace.

use crate::error::ScriptError;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A value produced by sandboxed code.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// Plain data with a JSON representation (`null` for undefined).
    Data(Value),
    /// A value with no data representation: functions, symbols, cyclic
    /// structures and the like.
    Opaque {
        /// Type of the value (`function`, `bigint`, a constructor name).
        type_name: String,
        /// Debug rendering, used by the console.
        repr: String,
    },
}

impl ScriptValue {
    /// The null value.
    pub fn null() -> Self {
        Self::Data(Value::Null)
    }

    /// True for `null` data.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Data(Value::Null))
    }
}

impl Serialize for ScriptValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Data(value) => value.serialize(serializer),
            Self::Opaque { type_name, .. } => Err(S::Error::custom(format!(
                "{type_name} is not serializable"
            ))),
        }
    }
}

/// What a namespace lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// No binding with that name.
    Missing,
    /// Bound to something callable.
    Callable,
    /// Bound to a value that cannot be called.
    NotCallable {
        /// Type of the bound value.
        type_name: String,
    },
}

/// Result of evaluating console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The input was an expression with this value.
    Expression(ScriptValue),
    /// The input was not an expression and ran as statements.
    Statements,
}

/// An embedded interpreter owning one persistent namespace.
pub trait Interpreter {
    /// Names bound in the namespace before any sandboxed code has run.
    fn builtin_names(&mut self) -> Result<Vec<String>, ScriptError>;

    /// Remove a global binding. Missing names are ignored.
    fn remove_global(&mut self, name: &str) -> Result<(), ScriptError>;

    /// Bind a global to plain data.
    fn set_global(&mut self, name: &str, value: &Value) -> Result<(), ScriptError>;

    /// Reseed the randomness available to sandboxed code.
    fn reseed(&mut self, seed: u64);

    /// Execute `code` as a sequence of statements.
    fn run_statements(&mut self, code: &str) -> Result<(), ScriptError>;

    /// Evaluate `code` as an expression, falling back to statements when it
    /// is not syntactically an expression.
    fn evaluate(&mut self, code: &str) -> Result<Evaluation, ScriptError>;

    /// Look up `name` in the namespace.
    fn probe(&mut self, name: &str) -> Result<Binding, ScriptError>;

    /// Call the function bound to `name` with positional arguments.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<ScriptValue, ScriptError>;
}
