use clap::Parser;

mod cli;

use cli::{Cli, CliContext};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let context = CliContext::from_env(cli.env_file);
    cli::execute(&context, cli.command).await
}
