use std::path::PathBuf;

use clap::Parser;
use common::utils::config::get_config;
use taskdata::{
    cli::{Cli, Command},
    commands::execute,
    connect, init_tracing, run_worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = get_config()?;

    if matches!(cli.command, Command::Worker) {
        return run_worker(config).await;
    }

    let db = connect(&config).await?;
    let data_dir = PathBuf::from(&config.data_dir);
    let output = execute(cli.command, &data_dir, &db).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
