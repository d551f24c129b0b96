use clap::Parser;
use ralph_hub::config::{load_config, Args};
use ralph_hub::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse());
    let _log_guard = init_logging(&config);
    ralph_hub::server::serve(config).await
}
