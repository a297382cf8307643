use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub ws_addr: String,
    pub poll_hz: f64,
    pub refresh_interval_ms: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let ws_addr = env::var("WS_ADDR").unwrap_or_else(|_| "0.0.0.0:8085".to_string());

        let poll_hz = env::var("GATEWAY_POLL_HZ")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30.0);

        let refresh_interval_ms = env::var("GATEWAY_REFRESH_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2000);

        Self {
            environment,
            ws_addr,
            poll_hz,
            refresh_interval_ms,
        }
    }
}
