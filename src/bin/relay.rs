use codehive_relay::config::RelayConfig;
use codehive_relay::relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    server::run(config).await
}
