use santra_chat::config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    santra_chat::telemetry::init(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "santra-relay starting");

    santra_chat::run(config).await
}
