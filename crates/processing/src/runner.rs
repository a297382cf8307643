use crate::health::SourceHealth;
use crate::manager::{InputMessage, ModuleError, ModuleManager};
use anyhow::Result;
use capture::Pacer;
use mailbox::FrameShape;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tuners::TunerValue;

/// User-supplied processing code, invoked once per fresh input frame at the
/// governed rate.
pub trait Module: Send {
    fn process(&mut self, ctx: &mut ModuleCtx, message: &InputMessage) -> Result<()>;
}

struct QueuedPost {
    name: String,
    shape: FrameShape,
    data: Vec<u8>,
}

/// What module code gets per batch: the current control values and a queue
/// of outgoing debug frames. Posts with the same name within one batch keep
/// their first-post position and the last payload wins.
pub struct ModuleCtx {
    tuner_values: HashMap<String, TunerValue>,
    queue: Vec<QueuedPost>,
}

impl ModuleCtx {
    fn new(tuner_values: HashMap<String, TunerValue>) -> Self {
        Self {
            tuner_values,
            queue: Vec::new(),
        }
    }

    pub fn tuner(&self, name: &str) -> Option<TunerValue> {
        self.tuner_values.get(name).copied()
    }

    pub fn post(&mut self, name: impl Into<String>, shape: FrameShape, data: Vec<u8>) {
        let name = name.into();
        if let Some(entry) = self.queue.iter_mut().find(|p| p.name == name) {
            entry.shape = shape;
            entry.data = data;
        } else {
            self.queue.push(QueuedPost { name, shape, data });
        }
    }
}

enum SessionEnd {
    Stopped,
    Retry,
}

/// Drives a [`Module`] against its [`ModuleManager`]: a governed read loop
/// with per-input health tracking, post flushing, and whole-session retry
/// when a producer goes away mid-run.
pub struct ModuleRunner {
    manager: ModuleManager,
    fps: f64,
    stop: Arc<AtomicBool>,
}

impl ModuleRunner {
    pub fn new(manager: ModuleManager, fps: f64) -> Self {
        Self {
            manager,
            fps,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The cancellation flag, for wiring up signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(&mut self, module: &mut dyn Module) -> Result<()> {
        while !self.stop.load(Ordering::Relaxed) {
            match self.run_session(module)? {
                SessionEnd::Stopped => break,
                SessionEnd::Retry => {
                    tracing::warn!(
                        "module '{}' lost a producer, retrying its session",
                        self.manager.module()
                    );
                }
            }
        }
        tracing::info!("module '{}' stopped", self.manager.module());
        Ok(())
    }

    fn run_session(&mut self, module: &mut dyn Module) -> Result<SessionEnd> {
        let module_name = self.manager.module().to_string();
        let declared = self.manager.input_channels().to_vec();
        let stop = Arc::clone(&self.stop);
        let fps = self.fps;

        let mut session = self.manager.session()?;
        let mut health: HashMap<String, SourceHealth> = declared
            .iter()
            .map(|c| (c.clone(), SourceHealth::new()))
            .collect();

        for _tick in Pacer::new(module_name, stop).rate(fps) {
            let messages = match session.read_messages() {
                Ok(messages) => messages,
                Err(ModuleError::PeerGone(channel)) => {
                    tracing::warn!("input channel '{}' released by its producer", channel);
                    return Ok(SessionEnd::Retry);
                }
                Err(ModuleError::ControlGone(channel)) => {
                    tracing::warn!("control channel '{}' released unexpectedly", channel);
                    return Ok(SessionEnd::Retry);
                }
                Err(e) => return Err(e.into()),
            };

            let mut ctx = ModuleCtx::new(session.tuner_values().into_iter().collect());

            for message in &messages {
                if let Some(h) = health.get_mut(&message.channel) {
                    h.record_frame(message.shape, message.acquired_at_ms);
                }
                module.process(&mut ctx, message)?;
            }

            for channel in &declared {
                if messages.iter().any(|m| &m.channel == channel) {
                    continue;
                }
                if let Some(h) = health.get_mut(channel)
                    && h.record_miss()
                {
                    tracing::warn!("input '{}' appears to be slow or dead", channel);
                }
            }

            let now = common::clock::now_ms();
            for post in ctx.queue.drain(..) {
                session.post(&post.name, now, post.shape, &post.data)?;
            }
        }

        Ok(SessionEnd::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::VideoInput;
    use mailbox::{Frame, Mailbox, Namespace, ReadStatus};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    struct Echo {
        seen: Vec<(String, u64)>,
    }

    impl Module for Echo {
        fn process(&mut self, ctx: &mut ModuleCtx, message: &InputMessage) -> Result<()> {
            self.seen.push((message.channel.clone(), message.acquired_at_ms));
            ctx.post("echo", message.shape, message.data.clone());
            Ok(())
        }
    }

    #[test]
    fn runner_processes_frames_and_flushes_posts() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut producer = Mailbox::create(&ns, "forward", 4).unwrap();
        let shape = FrameShape::bytes(4).unwrap();
        producer.write(111, shape, &[1, 2, 3, 4]).unwrap();

        let manager =
            ModuleManager::new("echo", ns.clone(), vec![VideoInput::new("forward")], vec![])
                .unwrap();
        let mut runner = ModuleRunner::new(manager, 100.0);
        let stop = runner.stop_flag();

        let feeder = thread::spawn(move || {
            for i in 0..10u8 {
                producer.write(200 + i as u64, shape, &[i; 4]).unwrap();
                thread::sleep(Duration::from_millis(10));
            }
            producer
        });

        let watcher_ns = ns.clone();
        let watcher = thread::spawn(move || {
            let echo = Mailbox::open(&watcher_ns, "module_echo_post%0%echo");
            let mut frame = Frame::new();
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if echo.read(&mut frame, true).unwrap() == ReadStatus::Success {
                    return true;
                }
            }
            false
        });

        let runner_handle = thread::spawn(move || {
            let mut module = Echo { seen: Vec::new() };
            runner.run(&mut module).unwrap();
            module.seen
        });

        assert!(watcher.join().unwrap(), "no echo post observed");
        let producer = feeder.join().unwrap();
        stop.store(true, Ordering::Relaxed);

        let seen = runner_handle.join().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(channel, _)| channel == "forward"));

        drop(producer);
    }

    #[test]
    fn ctx_posts_are_last_write_wins_per_name() {
        let mut ctx = ModuleCtx::new(HashMap::new());
        let shape = FrameShape::bytes(1).unwrap();
        ctx.post("a", shape, vec![1]);
        ctx.post("b", shape, vec![2]);
        ctx.post("a", shape, vec![3]);

        assert_eq!(ctx.queue.len(), 2);
        assert_eq!(ctx.queue[0].name, "a");
        assert_eq!(ctx.queue[0].data, vec![3]);
        assert_eq!(ctx.queue[1].name, "b");
    }
}
