use capture::config::CaptureConfig;
use capture::pattern::moving_gradient;
use capture::publisher::CaptureSource;
use common::setup_logging;
use mailbox::Namespace;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};

fn main() -> anyhow::Result<()> {
    let config = CaptureConfig::from_env();
    setup_logging(config.environment.clone());

    let ns = Namespace::from_env();
    let mut source = CaptureSource::new(ns);

    flag::register(SIGTERM, source.stop_flag())?;
    flag::register(SIGINT, source.stop_flag())?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    tracing::info!(
        "Publishing {}x{} test pattern on '{}' at {} Hz",
        config.width,
        config.height,
        config.channel,
        config.fps
    );
    source.register_capture(
        config.channel.clone(),
        moving_gradient(config.channel, config.width, config.height, config.fps),
    );

    source.run()?;
    tracing::info!("Capture source stopped gracefully");
    Ok(())
}
