use anyhow::Result;
use common::setup_logging;
use mailbox::Namespace;
use processing::config::ProcessingConfig;
use processing::{InputMessage, Module, ModuleCtx, ModuleManager, ModuleRunner, VideoInput};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use tuners::{Tuner, TunerValue};

/// Demo module: republishes each input frame, optionally inverted. Useful
/// for checking the whole bus end to end without any real vision code.
struct Passthrough;

impl Module for Passthrough {
    fn process(&mut self, ctx: &mut ModuleCtx, message: &InputMessage) -> Result<()> {
        let mut data = message.data.clone();
        if message.shape.elem_width == 1
            && matches!(ctx.tuner("invert"), Some(TunerValue::Bool(true)))
        {
            for b in &mut data {
                *b = 255 - *b;
            }
        }
        ctx.post("raw", message.shape, data);
        Ok(())
    }
}

fn main() -> Result<()> {
    let config = ProcessingConfig::from_env();
    setup_logging(config.environment.clone());

    let module_name = format!("passthrough-on-{}", config.inputs.join("-"));
    let inputs = config.inputs.iter().map(VideoInput::new).collect();
    let controls = vec![Tuner::bool("invert", false).expect("static tuner declaration")];

    let mut manager = ModuleManager::new(module_name, Namespace::from_env(), inputs, controls)?;
    manager.set_performance_mode(config.performance_mode);

    let mut runner = ModuleRunner::new(manager, config.fps);
    flag::register(SIGTERM, runner.stop_flag())?;
    flag::register(SIGINT, runner.stop_flag())?;

    runner.run(&mut Passthrough)
}
