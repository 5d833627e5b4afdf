//! Coverage wrappers invoked around every user function call.
//!
//! A wrapper receives the call itself plus the directive's `function_args`
//! and decides how to feed one into the other. Wrappers are plain Rust
//! callbacks selected by name; nothing is compiled from the wire.

use crate::error::ScriptError;
use crate::interpreter::ScriptValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Calls the user function with positional arguments.
pub type Invoke<'a> = dyn FnMut(Vec<Value>) -> Result<ScriptValue, ScriptError> + 'a;

/// A wrapper around user function execution.
pub trait CoverHook: Send + Sync {
    /// Run the user function (through `invoke`) on `data`.
    fn cover(&self, invoke: &mut Invoke<'_>, data: Value) -> Result<ScriptValue, ScriptError>;
}

impl<F> CoverHook for F
where
    F: Fn(&mut Invoke<'_>, Value) -> Result<ScriptValue, ScriptError> + Send + Sync,
{
    fn cover(&self, invoke: &mut Invoke<'_>, data: Value) -> Result<ScriptValue, ScriptError> {
        self(invoke, data)
    }
}

/// Passes `function_args` as the single argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCover;

impl CoverHook for IdentityCover {
    fn cover(&self, invoke: &mut Invoke<'_>, data: Value) -> Result<ScriptValue, ScriptError> {
        invoke(vec![data])
    }
}

/// Spreads an array of `function_args` into positional arguments.
/// Any other value is passed as the single argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadCover;

impl CoverHook for SpreadCover {
    fn cover(&self, invoke: &mut Invoke<'_>, data: Value) -> Result<ScriptValue, ScriptError> {
        match data {
            Value::Array(args) => invoke(args),
            other => invoke(vec![other]),
        }
    }
}

/// Wrappers selectable through `env_config.cover_code`.
#[derive(Clone)]
pub struct CoverRegistry {
    hooks: BTreeMap<String, Arc<dyn CoverHook>>,
}

impl CoverRegistry {
    /// Registry with `identity` and `spread`.
    pub fn new() -> Self {
        let mut registry = Self {
            hooks: BTreeMap::new(),
        };
        registry.register("identity", Arc::new(IdentityCover));
        registry.register("spread", Arc::new(SpreadCover));
        registry
    }

    /// Register (or replace) a wrapper.
    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn CoverHook>) {
        self.hooks.insert(name.into(), hook);
    }

    /// Look up a wrapper by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CoverHook>> {
        self.hooks.get(name).cloned()
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

impl Default for CoverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hooks.keys()).finish()
    }
}
