use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub environment: Environment,
    pub inputs: Vec<String>,
    pub fps: f64,
    pub performance_mode: bool,
}

impl ProcessingConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let inputs = env::var("MODULE_INPUTS")
            .unwrap_or_else(|_| "forward".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let fps = env::var("MODULE_FPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10.0);

        let performance_mode = env::var("MODULE_PERFORMANCE")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            environment,
            inputs,
            fps,
            performance_mode,
        }
    }
}
