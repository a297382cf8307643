mod config;
mod hub;
mod ws;

use common::setup_logging;
use config::GatewayConfig;
use hub::RelayHub;
use mailbox::Namespace;
use std::sync::Arc;
use std::time::Duration;
use ws::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();
    setup_logging(config.environment.clone());

    let hub = Arc::new(RelayHub::new(Namespace::from_env(), config.poll_hz));

    // Self-healing: any reader whose module restarted is re-attached in the
    // background, invisibly to connected listeners.
    let refresh_hub = Arc::clone(&hub);
    let refresh_interval = Duration::from_millis(config.refresh_interval_ms);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        loop {
            interval.tick().await;
            refresh_hub.refresh_dead();
        }
    });

    let result = ws::run_server(config, AppState {
        hub: Arc::clone(&hub),
    })
    .await;

    hub.shutdown();
    result
}
