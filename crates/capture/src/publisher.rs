use crate::pacing::Pacer;
use anyhow::{Context, Result};
use mailbox::{FrameShape, Mailbox, MailboxError, Namespace, WriteStatus};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// One frame yielded by a capture generator.
pub struct PublishedFrame {
    pub channel: String,
    pub acquired_at_ms: u64,
    pub shape: FrameShape,
    pub data: Vec<u8>,
}

/// The mailboxes one capture loop owns, keyed by channel name.
///
/// Mailboxes are created lazily, sized to the first payload published on
/// each channel. Teardown iterates the arena explicitly when the loop ends.
struct ChannelArena {
    ns: Namespace,
    owned: HashMap<String, Mailbox>,
}

impl ChannelArena {
    fn new(ns: Namespace) -> Self {
        Self {
            ns,
            owned: HashMap::new(),
        }
    }

    fn publish(&mut self, frame: &PublishedFrame) -> Result<(), MailboxError> {
        let mailbox = match self.owned.get_mut(&frame.channel) {
            Some(mailbox) => mailbox,
            None => {
                let created = Mailbox::create(&self.ns, &frame.channel, frame.data.len())?;
                self.owned.entry(frame.channel.clone()).or_insert(created)
            }
        };
        match mailbox.write(frame.acquired_at_ms, frame.shape, &frame.data)? {
            WriteStatus::Success => {}
            WriteStatus::OwnerGone => {
                tracing::warn!("channel '{}' marked released mid-write", frame.channel);
            }
        }
        Ok(())
    }

    fn release(mut self) {
        for (channel, mailbox) in self.owned.drain() {
            tracing::debug!("releasing channel '{}'", channel);
            mailbox.delete();
        }
    }
}

type CaptureGenerator =
    Box<dyn FnOnce(Pacer) -> Box<dyn Iterator<Item = Result<PublishedFrame>> + Send> + Send>;
type LogicalLoop = Box<dyn FnOnce(Pacer) -> Result<()> + Send>;

/// Runs independently-scheduled producing loops as OS threads sharing one
/// cancellation flag.
///
/// The failure model is fail-together: channels published by different loops
/// may be mutually dependent downstream, so one failed loop stops them all
/// rather than letting the rest keep feeding consumers from a half-dead
/// vehicle.
pub struct CaptureSource {
    ns: Namespace,
    stop: Arc<AtomicBool>,
    captures: Vec<(String, CaptureGenerator)>,
    logicals: Vec<(String, LogicalLoop)>,
}

impl CaptureSource {
    pub fn new(ns: Namespace) -> Self {
        Self {
            ns,
            stop: Arc::new(AtomicBool::new(false)),
            captures: Vec::new(),
            logicals: Vec::new(),
        }
    }

    /// The shared cancellation flag, for wiring up signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Register a frame-producing loop. The generator receives an unrated
    /// [`Pacer`] cursor, picks its own rate, and yields
    /// `(channel, acquisition time, payload)` frames until it is exhausted
    /// or the cursor runs dry.
    pub fn register_capture<F, I>(&mut self, name: impl Into<String>, generator: F)
    where
        F: FnOnce(Pacer) -> I + Send + 'static,
        I: Iterator<Item = Result<PublishedFrame>> + Send + 'static,
    {
        self.captures.push((
            name.into(),
            Box::new(move |pacer| Box::new(generator(pacer))),
        ));
    }

    /// Register a loop that shares scheduling and fail-together semantics
    /// but publishes nothing (housekeeping, external side channels).
    pub fn register_logical<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: FnOnce(Pacer) -> Result<()> + Send + 'static,
    {
        self.logicals.push((name.into(), Box::new(body)));
    }

    /// Run every registered loop to completion and release all owned
    /// mailboxes. Returns once all threads have been joined.
    pub fn run(self) -> Result<()> {
        let mut handles = Vec::new();

        for (name, generator) in self.captures {
            let ns = self.ns.clone();
            let stop = Arc::clone(&self.stop);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || capture_loop(name, generator, ns, stop))
                .context("failed to spawn capture loop thread")?;
            handles.push(handle);
        }

        for (name, body) in self.logicals {
            let stop = Arc::clone(&self.stop);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || logical_loop(name, body, stop))
                .context("failed to spawn logical loop thread")?;
            handles.push(handle);
        }

        for handle in handles {
            if handle.join().is_err() {
                // The loop body already set the stop flag before unwinding.
                tracing::error!("a producing loop panicked");
            }
        }

        tracing::info!("all producing loops joined, shut down complete");
        Ok(())
    }
}

fn capture_loop(
    name: String,
    generator: CaptureGenerator,
    ns: Namespace,
    stop: Arc<AtomicBool>,
) {
    tracing::info!("starting capture loop '{}'", name);
    let mut arena = ChannelArena::new(ns);

    let pacer = Pacer::new(name.clone(), Arc::clone(&stop));
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for item in generator(pacer) {
            let frame = item?;
            arena.publish(&frame)?;
        }
        Ok::<(), anyhow::Error>(())
    }));

    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!("capture loop '{}' failed: {:#}", name, e);
            true
        }
        Err(_) => {
            tracing::error!("capture loop '{}' panicked", name);
            true
        }
    };

    let first_to_stop = !stop.swap(true, Ordering::SeqCst);
    if failed {
        tracing::warn!("stopping all loops after failure in '{}'", name);
    } else if first_to_stop {
        tracing::info!("capture loop '{}' exhausted, stopping all loops", name);
    } else {
        tracing::info!("capture loop '{}' stopped by another loop's signal", name);
    }

    arena.release();
}

fn logical_loop(name: String, body: LogicalLoop, stop: Arc<AtomicBool>) {
    tracing::info!("starting logical loop '{}'", name);

    let pacer = Pacer::new(name.clone(), Arc::clone(&stop));
    let outcome = catch_unwind(AssertUnwindSafe(|| body(pacer)));

    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!("logical loop '{}' failed: {:#}", name, e);
            true
        }
        Err(_) => {
            tracing::error!("logical loop '{}' panicked", name);
            true
        }
    };

    let first_to_stop = !stop.swap(true, Ordering::SeqCst);
    if failed {
        tracing::warn!("stopping all loops after failure in '{}'", name);
    } else if first_to_stop {
        tracing::info!("logical loop '{}' finished, stopping all loops", name);
    } else {
        tracing::info!("logical loop '{}' stopped by another loop's signal", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailbox::{Frame, ReadStatus};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn frame(channel: &str, t: u64, data: Vec<u8>) -> Result<PublishedFrame> {
        Ok(PublishedFrame {
            channel: channel.to_string(),
            acquired_at_ms: t,
            shape: FrameShape::bytes(data.len()).unwrap(),
            data,
        })
    }

    #[test]
    fn frames_reach_their_channels_and_mailboxes_are_released() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut source = CaptureSource::new(ns.clone());
        // Paced slowly enough that the reader below attaches before the
        // generator is exhausted and the channel torn down.
        source.register_capture("cams", |pacer| {
            pacer
                .rate(10.0)
                .take(30)
                .enumerate()
                .map(|(i, _t)| frame("forward", 100 + i as u64, vec![i as u8; 8]))
        });

        // Keep a reader attached before the publisher tears down.
        let ns_reader = ns.clone();
        let reader_handle = std::thread::spawn(move || {
            let reader = Mailbox::open(&ns_reader, "forward");
            let mut scratch = Frame::new();
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                assert!(Instant::now() < deadline, "no frame arrived");
                match reader.read(&mut scratch, true).unwrap() {
                    ReadStatus::Success => break scratch.to_owned_bytes(),
                    _ => continue,
                }
            }
        });

        source.run().unwrap();
        let seen = reader_handle.join().unwrap();
        assert_eq!(seen.len(), 8);

        // Owner teardown unlinked the channel.
        assert!(matches!(
            Mailbox::try_open(&ns, "forward"),
            Err(MailboxError::NotFound(_))
        ));
    }

    #[test]
    fn one_failing_loop_stops_the_others() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut source = CaptureSource::new(ns);
        let stop = source.stop_flag();

        // An endless, well-behaved loop...
        source.register_capture("steady", |pacer| {
            pacer
                .rate(500.0)
                .map(|t| frame("steady", t, vec![0u8; 4]))
        });
        // ...and a sibling that dies immediately.
        source.register_capture("doomed", |pacer| {
            pacer
                .rate(500.0)
                .map(|_| Err(anyhow::anyhow!("sensor unplugged")))
        });

        let start = Instant::now();
        source.run().unwrap();
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "fail-together did not interrupt the healthy loop"
        );
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn exhausted_generator_triggers_shutdown() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut source = CaptureSource::new(ns);
        let stop = source.stop_flag();

        source.register_capture("finite", |pacer| {
            pacer.rate(0.0).take(2).map(|t| frame("finite", t, vec![1]))
        });
        source.register_logical("housekeeping", |pacer| {
            for _ in pacer.rate(500.0) {}
            Ok(())
        });

        source.run().unwrap();
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn logical_loop_error_is_fail_together_too() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut source = CaptureSource::new(ns);
        source.register_capture("steady", |pacer| {
            pacer.rate(500.0).map(|t| frame("steady", t, vec![0u8; 4]))
        });
        source.register_logical("watchdog", |mut pacer| {
            pacer.next();
            anyhow::bail!("watchdog tripped")
        });

        let start = Instant::now();
        source.run().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
