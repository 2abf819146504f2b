use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio::signal;
use tracing::{error, info};

use super::CliContext;
use fitstream::config::load_config;
use fitstream::logger::{LogLevel, init_tracing};
use fitstream::supervisor::Supervisor;
use stream_channel::{LineSink, LineSource};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Worker configuration file (YAML or JSON)
    #[arg(long)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error, critical)
    #[arg(long, default_value = "info")]
    pub log_level: LogLevel,

    /// Write rolling log files here instead of stderr
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    init_tracing(args.log_dir.as_deref(), args.log_level)?;

    let config = load_config(&args.config, context.config_store.as_ref())
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    let source = Arc::new(LineSource::stdin());
    let sink = Arc::new(LineSink::stdout());
    let supervisor = Supervisor::new(config, source.clone(), sink, &context.registry)?;
    supervisor.start().await?;

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            supervisor.shutdown().await
        }
        _ = source.wait_until_finished() => {
            info!("end of input, draining queued work");
            supervisor.drain().await
        }
    };
    if let Err(e) = &result {
        error!("worker did not stop cleanly: {e}");
    }

    let stats = supervisor.status().stats;
    info!(
        received = stats.received,
        rejected = stats.rejected,
        processed = stats.processed,
        produced = stats.produced,
        skipped = stats.skipped,
        publish_failures = stats.publish_failures,
        "worker finished"
    );
    result.map_err(Into::into)
}
