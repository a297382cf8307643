pub mod clock;
pub mod config;
pub mod logging;

pub use config::Environment;
pub use logging::setup_logging;
use std::time::Duration;

/// Block until `connect` succeeds, logging progress while the resource is
/// still missing. Used by consumers that are allowed to start before the
/// process that provides the resource.
pub fn wait_for_resource<F, T, E>(mut connect: F, poll_interval_ms: u64, resource_name: &str) -> T
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempts = 0u64;
    loop {
        match connect() {
            Ok(resource) => {
                if attempts > 0 {
                    tracing::info!("{} available after {} attempts", resource_name, attempts);
                }
                return resource;
            }
            Err(e) => {
                attempts += 1;
                tracing::debug!("Waiting for {} ({})", resource_name, e);
                std::thread::sleep(Duration::from_millis(poll_interval_ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_resource_returns_on_first_success() {
        let value: u32 = wait_for_resource(|| Ok::<_, std::io::Error>(7), 1, "test resource");
        assert_eq!(value, 7);
    }

    #[test]
    fn wait_for_resource_retries_until_success() {
        let mut remaining_failures = 3;
        let value: &str = wait_for_resource(
            || {
                if remaining_failures > 0 {
                    remaining_failures -= 1;
                    Err("not yet")
                } else {
                    Ok("ready")
                }
            },
            1,
            "test resource",
        );
        assert_eq!(value, "ready");
    }
}
