use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub environment: Environment,
    pub channel: String,
    pub width: u64,
    pub height: u64,
    pub fps: f64,
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let channel = env::var("CAPTURE_CHANNEL").unwrap_or_else(|_| "forward".to_string());

        let width = env::var("CAPTURE_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(640);

        let height = env::var("CAPTURE_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(480);

        let fps = env::var("CAPTURE_FPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10.0);

        Self {
            environment,
            channel,
            width,
            height,
            fps,
        }
    }
}
