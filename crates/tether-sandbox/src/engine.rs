//! Sandbox execution engine.
//!
//! Dispatches one directive at a time against a persistent namespace. Every
//! failure inside an action is caught at the action boundary and turned into
//! a `fail` result; only a directive without a usable `action` escapes as a
//! [`ProtocolFault`].

use crate::capability::{CapabilitySet, ModulePolicy};
use crate::config::SandboxConfig;
use crate::cover::{CoverHook, CoverRegistry, IdentityCover};
use crate::encode::render_debug;
use crate::error::{ActionError, ProtocolFault, Result, SandboxError};
use crate::interpreter::{Binding, Evaluation, Interpreter, ScriptValue};
use crate::modules::ModuleRegistry;
use crate::quickjs::QuickJs;
use crate::request::{seed_from_value, Action, EnvConfig, ExecutionRequest, ExecutionResult, Outcome};
use crate::translate::{translate, StderrSink, TraceSink};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace binding that identifies the running code.
const NAME_BINDING: &str = "__name__";

/// Restricted evaluation environment serving one connection.
pub struct Engine {
    capabilities: CapabilitySet,
    interpreter: Box<dyn Interpreter>,
    cover: Arc<dyn CoverHook>,
    covers: CoverRegistry,
    sink: Box<dyn TraceSink>,
}

impl Engine {
    /// Create an engine backed by QuickJS.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let policy = ModulePolicy::new(config.allowed_modules.iter().cloned(), config.policy_url.clone());
        let mut modules = ModuleRegistry::bundled();
        if let Some(dir) = &config.module_dir {
            let loaded = modules.load_dir(dir)?;
            info!(dir = %dir.display(), loaded, "loaded module directory");
        }

        let interpreter = QuickJs::new(policy.clone(), modules)?;
        if let Some(bytes) = config.memory_limit {
            interpreter.set_memory_limit(bytes);
        }
        if let Some(bytes) = config.max_stack_size {
            interpreter.set_max_stack_size(bytes);
        }

        Self::with_interpreter(Box::new(interpreter), policy, &config)
    }

    /// Create an engine around an existing interpreter.
    ///
    /// `policy` must be the handle the interpreter consults on import.
    pub fn with_interpreter(
        mut interpreter: Box<dyn Interpreter>,
        policy: ModulePolicy,
        config: &SandboxConfig,
    ) -> Result<Self> {
        let builtins = interpreter
            .builtin_names()
            .map_err(|e| SandboxError::Interpreter(e.to_string()))?;
        let mut capabilities = CapabilitySet::new(builtins, policy);

        for name in &config.closed_builtins {
            if capabilities.remove_builtin(name) {
                interpreter
                    .remove_global(name)
                    .map_err(|e| SandboxError::Interpreter(e.to_string()))?;
            }
        }
        interpreter
            .set_global(NAME_BINDING, &Value::String(config.global_name.clone()))
            .map_err(|e| SandboxError::Interpreter(e.to_string()))?;
        if let Some(seed) = config.random_seed {
            interpreter.reseed(seed);
        }

        info!(
            builtins = capabilities.builtins().count(),
            modules = ?capabilities.modules().allowed(),
            "sandbox engine ready"
        );

        Ok(Self {
            capabilities,
            interpreter,
            cover: Arc::new(IdentityCover),
            covers: CoverRegistry::new(),
            sink: Box::new(StderrSink),
        })
    }

    /// Current capability set.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Install a coverage wrapper directly.
    pub fn set_cover(&mut self, cover: Arc<dyn CoverHook>) {
        self.cover = cover;
    }

    /// Make a coverage wrapper selectable through `cover_code`.
    pub fn register_cover(&mut self, name: impl Into<String>, cover: Arc<dyn CoverHook>) {
        self.covers.register(name, cover);
    }

    /// Replace the destination of developer-facing traces.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.sink = sink;
    }

    /// Handle one decoded directive.
    pub fn execute(&mut self, directive: &Value) -> std::result::Result<Outcome, ProtocolFault> {
        let action = Action::from_directive(directive)?;
        debug!(action = %action, "dispatching directive");

        if action == Action::Stop {
            return Ok(Outcome::Stop);
        }

        let result = match self.run(action, directive) {
            Ok(result) => result,
            Err(err) => translate(&err, self.sink.as_ref()),
        };
        Ok(Outcome::Reply(result))
    }

    fn run(&mut self, action: Action, directive: &Value) -> std::result::Result<ExecutionResult, ActionError> {
        let request: ExecutionRequest = serde_json::from_value(directive.clone())
            .map_err(|e| ActionError::InvalidRequest(e.to_string()))?;
        self.apply_config(request.env_config.as_ref())?;

        match action {
            Action::RunCode => {
                self.run_code(&request)?;
                Ok(ExecutionResult::empty())
            }
            Action::RunFunction => self.run_function(&request).map(ExecutionResult::value),
            Action::RunCodeAndFunction => {
                self.run_code(&request)?;
                self.run_function(&request).map(ExecutionResult::value)
            }
            Action::RunInConsole => self.run_in_console(&request),
            Action::Config | Action::Stop => Ok(ExecutionResult::empty()),
        }
    }

    fn apply_config(&mut self, env: Option<&EnvConfig>) -> std::result::Result<(), ActionError> {
        let Some(env) = env else {
            return Ok(());
        };

        if let Some(names) = &env.remove_builtins {
            for name in names {
                if self.capabilities.remove_builtin(name) {
                    self.interpreter.remove_global(name)?;
                    debug!(builtin = %name, "builtin removed");
                }
            }
        }
        if let Some(modules) = &env.add_allowed_modules {
            self.capabilities.modules().allow(modules.iter().cloned());
        }
        if let Some(modules) = &env.remove_allowed_modules {
            self.capabilities.modules().revoke(modules);
        }
        if let Some(name) = &env.cover_code {
            self.cover = self
                .covers
                .get(name)
                .ok_or_else(|| ActionError::Failed(format!("unknown cover `{name}`")))?;
            debug!(cover = %name, "cover selected");
        }
        if let Some(seed) = &env.random_seed {
            self.interpreter.reseed(seed_from_value(seed));
        }
        if let Some(name) = &env.global_name {
            self.interpreter
                .set_global(NAME_BINDING, &Value::String(name.clone()))?;
        }
        Ok(())
    }

    fn run_code(&mut self, request: &ExecutionRequest) -> std::result::Result<(), ActionError> {
        let code = required(&request.code, "code")?;
        self.interpreter.run_statements(code)?;
        Ok(())
    }

    fn run_function(&mut self, request: &ExecutionRequest) -> std::result::Result<ScriptValue, ActionError> {
        let name = required(&request.function_name, "function_name")?;

        match self.interpreter.probe(name)? {
            Binding::Missing => {
                return Err(ActionError::Failed(format!("function `{name}` is not defined")))
            }
            Binding::NotCallable { type_name } => {
                return Err(ActionError::Failed(format!(
                    "`{name}` is not callable ({type_name})"
                )))
            }
            Binding::Callable => {}
        }

        let cover = self.cover.clone();
        let interpreter = &mut self.interpreter;
        let mut invoke = |args: Vec<Value>| interpreter.call(name, args);
        Ok(cover.cover(&mut invoke, request.function_args.clone())?)
    }

    fn run_in_console(&mut self, request: &ExecutionRequest) -> std::result::Result<ExecutionResult, ActionError> {
        let code = required(&request.code, "code")?;
        let value = match self.interpreter.evaluate(code)? {
            Evaluation::Statements => ScriptValue::null(),
            Evaluation::Expression(value) => render_debug(&value),
        };
        Ok(ExecutionResult::value(value))
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> std::result::Result<&'a str, ActionError> {
    field
        .as_deref()
        .ok_or_else(|| ActionError::InvalidRequest(format!("`{name}` is required argument")))
}
