//! Sandbox configuration types.

use crate::error::SandboxError;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Where the module policy is documented; quoted in import errors.
pub const DEFAULT_POLICY_URL: &str = "https://github.com/vrn21/tether/blob/main/docs/modules.md";

/// Initial value of the namespace's `__name__` binding.
pub const DEFAULT_GLOBAL_NAME: &str = "MYCODE";

/// Globals removed from the namespace before any sandboxed code runs.
pub const DEFAULT_CLOSED_BUILTINS: &[&str] = &["eval", "Function"];

/// Modules sandboxed code may import without a `config` edit.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &["collections", "itertools", "random", "strings"];

/// Configuration for creating an engine.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Globals hidden from sandboxed code.
    pub closed_builtins: BTreeSet<String>,
    /// Modules importable from sandboxed code at startup.
    pub allowed_modules: BTreeSet<String>,
    /// Initial `__name__` value.
    pub global_name: String,
    /// Initial seed for `Math.random` (default: OS entropy).
    pub random_seed: Option<u64>,
    /// Documentation link quoted in import errors.
    pub policy_url: String,
    /// Interpreter heap limit in bytes (default: unlimited).
    pub memory_limit: Option<usize>,
    /// Interpreter stack limit in bytes (default: engine default).
    pub max_stack_size: Option<usize>,
    /// Directory of extra `*.js` modules.
    pub module_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            closed_builtins: DEFAULT_CLOSED_BUILTINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_modules: DEFAULT_ALLOWED_MODULES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            global_name: DEFAULT_GLOBAL_NAME.to_string(),
            random_seed: None,
            policy_url: DEFAULT_POLICY_URL.to_string(),
            memory_limit: None,
            max_stack_size: None,
            module_dir: None,
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.global_name.is_empty() {
            return Err(SandboxError::Config("global_name must not be empty".into()));
        }
        if self.policy_url.is_empty() {
            return Err(SandboxError::Config("policy_url must not be empty".into()));
        }
        if self.memory_limit == Some(0) {
            return Err(SandboxError::Config("memory_limit must be > 0".into()));
        }
        if self.max_stack_size == Some(0) {
            return Err(SandboxError::Config("max_stack_size must be > 0".into()));
        }
        if let Some(dir) = &self.module_dir {
            if !dir.is_dir() {
                return Err(SandboxError::Config(format!(
                    "module_dir is not a directory: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Hide an additional global from sandboxed code.
    pub fn close_builtin(mut self, name: impl Into<String>) -> Self {
        self.config.closed_builtins.insert(name.into());
        self
    }

    /// Allow an additional module.
    pub fn allow_module(mut self, name: impl Into<String>) -> Self {
        self.config.allowed_modules.insert(name.into());
        self
    }

    /// Allow several additional modules.
    pub fn allow_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .allowed_modules
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the initial `__name__` value.
    pub fn global_name(mut self, name: impl Into<String>) -> Self {
        self.config.global_name = name.into();
        self
    }

    /// Seed `Math.random` deterministically.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = Some(seed);
        self
    }

    /// Set the documentation link quoted in import errors.
    pub fn policy_url(mut self, url: impl Into<String>) -> Self {
        self.config.policy_url = url.into();
        self
    }

    /// Set the interpreter heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = Some(bytes);
        self
    }

    /// Set the interpreter stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.config.max_stack_size = Some(bytes);
        self
    }

    /// Load extra modules from a directory of `*.js` files.
    pub fn module_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.module_dir = Some(path.into());
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<SandboxConfig, SandboxError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
