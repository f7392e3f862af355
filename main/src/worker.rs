use common::utils::config::get_config;
use taskdata::{init_tracing, run_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = get_config()?;
    run_worker(config).await
}
