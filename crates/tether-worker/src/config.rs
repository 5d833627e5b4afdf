//! Worker configuration.
//!
//! Loaded from command-line arguments, each with an environment fallback.
//!
//! | Argument | Variable | Default |
//! |----------|----------|---------|
//! | `<PORT>` | `TETHER_PORT` | required |
//! | `<ENVIRONMENT_ID>` | `TETHER_ENVIRONMENT_ID` | required |
//! | `--host` | `TETHER_HOST` | `127.0.0.1` |
//! | `--run-as` | `TETHER_RUN_AS` | `robot` |
//! | `--allow-module` | `TETHER_ALLOW_MODULES` (comma separated) | none |
//! | `--module-dir` | `TETHER_MODULE_DIR` | none |
//! | `--memory-limit` | `TETHER_MEMORY_LIMIT` | unlimited |
//! | `--max-stack-size` | `TETHER_MAX_STACK_SIZE` | engine default |
//! | `--max-message-size` | `TETHER_MAX_MESSAGE_SIZE` | `104857600` |
//! | `--policy-url` | `TETHER_POLICY_URL` | built-in documentation URL |

use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;
use clap::Parser;
use std::path::PathBuf;
use tether_sandbox::{SandboxConfig, SandboxError, DEFAULT_POLICY_URL};

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment id must not be empty")]
    EmptyEnvironmentId,

    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be > 0")]
    ZeroPort,

    #[error("max message size must be > 0")]
    ZeroMessageSize,

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Configuration for the tether worker.
#[derive(Debug, Clone, Parser)]
#[command(name = "tether-worker", author, version, about = "Runs referee directives in a restricted JavaScript sandbox")]
pub struct WorkerConfig {
    /// Port the referee listens on.
    #[arg(env = "TETHER_PORT")]
    pub port: u16,

    /// Identifier echoed back in the handshake.
    #[arg(env = "TETHER_ENVIRONMENT_ID")]
    pub environment_id: String,

    /// Host the referee listens on.
    #[arg(long, env = "TETHER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Account to switch to before serving directives.
    #[arg(long, env = "TETHER_RUN_AS", default_value = "robot")]
    pub run_as: String,

    /// Extra modules sandboxed code may import.
    #[arg(long = "allow-module", env = "TETHER_ALLOW_MODULES", value_delimiter = ',')]
    pub allow_modules: Vec<String>,

    /// Directory of extra `*.js` modules.
    #[arg(long, env = "TETHER_MODULE_DIR")]
    pub module_dir: Option<PathBuf>,

    /// Interpreter heap limit in bytes.
    #[arg(long, env = "TETHER_MEMORY_LIMIT")]
    pub memory_limit: Option<usize>,

    /// Interpreter stack limit in bytes.
    #[arg(long, env = "TETHER_MAX_STACK_SIZE")]
    pub max_stack_size: Option<usize>,

    /// Largest inbound message accepted, in bytes.
    #[arg(long, env = "TETHER_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Documentation link quoted in import errors.
    #[arg(long, env = "TETHER_POLICY_URL", default_value = DEFAULT_POLICY_URL)]
    pub policy_url: String,
}

impl WorkerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment_id.is_empty() {
            return Err(ConfigError::EmptyEnvironmentId);
        }
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        self.sandbox_config()?;
        Ok(())
    }

    /// Sandbox settings derived from the worker configuration.
    pub fn sandbox_config(&self) -> Result<SandboxConfig, SandboxError> {
        let mut builder = SandboxConfig::builder()
            .allow_modules(self.allow_modules.iter().filter(|m| !m.is_empty()).cloned())
            .policy_url(self.policy_url.clone());
        if let Some(dir) = &self.module_dir {
            builder = builder.module_dir(dir.clone());
        }
        if let Some(bytes) = self.memory_limit {
            builder = builder.memory_limit(bytes);
        }
        if let Some(bytes) = self.max_stack_size {
            builder = builder.max_stack_size(bytes);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> WorkerConfig {
        let mut argv = vec!["tether-worker"];
        argv.extend_from_slice(args);
        WorkerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["9000", "env-1"]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.environment_id, "env-1");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.run_as, "robot");
        assert_eq!(config.max_message_size, 100 * 1024 * 1024);
        assert_eq!(config.policy_url, DEFAULT_POLICY_URL);
        assert!(config.allow_modules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_positionals() {
        assert!(WorkerConfig::try_parse_from(["tether-worker", "9000"]).is_err());
    }

    #[test]
    fn test_allow_modules_are_split() {
        let config = parse(&["9000", "env-1", "--allow-module", "clock,strings"]);
        assert_eq!(config.allow_modules, vec!["clock", "strings"]);

        let sandbox = config.sandbox_config().unwrap();
        assert!(sandbox.allowed_modules.contains("clock"));
        assert!(sandbox.allowed_modules.contains("random"));
    }

    #[test]
    fn test_limits_reach_sandbox_config() {
        let config = parse(&[
            "9000",
            "env-1",
            "--memory-limit",
            "33554432",
            "--max-stack-size",
            "262144",
        ]);
        let sandbox = config.sandbox_config().unwrap();
        assert_eq!(sandbox.memory_limit, Some(32 * 1024 * 1024));
        assert_eq!(sandbox.max_stack_size, Some(256 * 1024));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            parse(&["0", "env-1"]).validate(),
            Err(ConfigError::ZeroPort)
        ));
        assert!(matches!(
            parse(&["9000", ""]).validate(),
            Err(ConfigError::EmptyEnvironmentId)
        ));
        assert!(matches!(
            parse(&["9000", "env-1", "--max-message-size", "0"]).validate(),
            Err(ConfigError::ZeroMessageSize)
        ));
        assert!(matches!(
            parse(&["9000", "env-1", "--module-dir", "/nonexistent/tether"]).validate(),
            Err(ConfigError::Sandbox(_))
        ));
    }
}
