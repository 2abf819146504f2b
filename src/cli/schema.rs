use std::path::PathBuf;

use clap::Args;

use fitstream::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory
    #[arg(long, default_value = "schemas")]
    pub out: PathBuf,
}

pub fn execute(args: SchemaArgs) -> anyhow::Result<()> {
    let path = write_schema(&args.out)?;
    println!("Schema written to {}", path.display());
    Ok(())
}
