//! tether-worker entry point.
//!
//! Builds the sandbox engine, drops privileges, connects to the referee and
//! serves directives until `stop`. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use tether_sandbox::Engine;
use tether_worker::{drop_privileges, Channel, ClientLoop, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tether_worker=info,tether_sandbox=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::parse();
    config.validate()?;
    tracing::info!(?config, "Configuration loaded");

    // The engine reads its module directory before privileges are dropped.
    let engine = Engine::new(config.sandbox_config()?).context("failed to start sandbox engine")?;

    let outcome = drop_privileges(&config.run_as);
    tracing::debug!(?outcome, "privilege drop finished");

    let channel = Channel::connect(&config.host, config.port)
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?
        .with_max_message_size(config.max_message_size);

    ClientLoop::new(channel, engine, config.environment_id.clone())
        .run()
        .await?;

    tracing::info!("tether-worker stopped");
    Ok(())
}
