use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

pub mod models;
pub mod run;
pub mod schema;
pub mod validate;

use run::RunArgs;
use schema::SchemaArgs;
use validate::ValidateArgs;

use fitstream::config::{ConfigStore, EnvConfigStore};
use fitstream::model::ModelRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "fitstream",
    about = "Fit models to streamed data points and publish the results",
    version
)]
pub struct Cli {
    /// `.env` file with FITSTREAM_* overrides
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a worker on stdin / stdout
    Run(RunArgs),

    /// Check a worker configuration
    Validate(ValidateArgs),

    /// List the built-in models
    Models,

    /// Emit JSON-Schema for the worker configuration
    Schema(SchemaArgs),
}

#[derive(Clone)]
pub struct CliContext {
    pub config_store: Arc<dyn ConfigStore>,
    pub registry: ModelRegistry,
}

impl CliContext {
    pub fn new(config_store: Arc<dyn ConfigStore>, registry: ModelRegistry) -> Self {
        Self {
            config_store,
            registry,
        }
    }

    /// Environment-backed store, with `env_file` loaded when it exists.
    pub fn from_env(env_file: PathBuf) -> Self {
        let env_file = env_file.exists().then_some(env_file);
        Self::new(Arc::new(EnvConfigStore::new(env_file)), ModelRegistry::builtin())
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Validate(args) => validate::execute(args, context).await,
        Commands::Models => models::execute(context),
        Commands::Schema(args) => schema::execute(args),
    }
}
