use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::CliContext;
use fitstream::config::load_config;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Worker configuration file (YAML or JSON)
    #[arg(long)]
    pub config: PathBuf,
}

pub async fn execute(args: ValidateArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = load_config(&args.config, context.config_store.as_ref())
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    config
        .validate(&context.registry)
        .with_context(|| format!("validating {}", args.config.display()))?;
    println!(
        "{} is valid: {} -> {} using `{}` on ({}, {})",
        args.config.display(),
        config.stream,
        config.output,
        config.model,
        config.x_path(),
        config.y_path()
    );
    Ok(())
}
