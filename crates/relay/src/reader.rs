use capture::Pacer;
use mailbox::{
    ChannelDirectory, Frame, FrameShape, Mailbox, MailboxError, Namespace, ReadStatus, names,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use thiserror::Error;
use tuners::{Tuner, TunerValue};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("module '{0}' is not active")]
    ModuleNotActive(String),

    #[error("unrecognized control channel '{0}'")]
    UnrecognizedControl(String),

    #[error("control value '{0}' is not subscribed")]
    UnknownTuner(String),

    #[error("value rejected for control '{0}'")]
    RejectedValue(String),

    #[error("the poll loop is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error("directory error: {0}")]
    Directory(#[from] io::Error),
}

/// A fresh output frame relayed to listeners.
pub struct PostUpdate<'a> {
    pub module: &'a str,
    pub name: &'a str,
    pub index: usize,
    pub shape: FrameShape,
    pub acquired_at_ms: u64,
    pub data: &'a [u8],
}

/// A fresh (or force-resent) control value relayed to listeners.
pub struct TunerUpdate<'a> {
    pub module: &'a str,
    pub index: usize,
    pub tuner: &'a Tuner,
}

type PostCallback = Box<dyn Fn(&PostUpdate<'_>) + Send + Sync>;
type TunerCallback = Box<dyn Fn(&TunerUpdate<'_>) + Send + Sync>;

struct PostChannel {
    name: String,
    index: usize,
    mailbox: Mailbox,
    frame: Frame,
}

struct TunerSlot {
    name: String,
    index: usize,
    mailbox: Mailbox,
    frame: Frame,
    tuner: Tuner,
}

/// Everything that moves onto the poll thread when it starts.
struct PollState {
    posts: Vec<PostChannel>,
    post_callbacks: Vec<PostCallback>,
    tuner_callbacks: Vec<TunerCallback>,
}

/// Attaches to a named module from outside its process: subscribes to the
/// module's output and control channels, relays fresh values to registered
/// callbacks from a background poll thread, and pushes control updates back.
///
/// The reader never creates the channels it polls. When any of them reports
/// the owner gone, the whole reader marks itself dead and stops; the owning
/// process is expected to notice via [`ModuleReader::is_dead`], discard this
/// reader, and attach a fresh one against the (possibly restarted) module.
pub struct ModuleReader {
    module: String,
    state: Option<PollState>,
    tuners: Arc<Mutex<Vec<TunerSlot>>>,
    quit: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    resend_once: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

fn lock_slots(slots: &Mutex<Vec<TunerSlot>>) -> MutexGuard<'_, Vec<TunerSlot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ModuleReader {
    /// Open accessors to every currently-declared output and control channel
    /// of `module`. Fails if the module is not active in the directory.
    pub fn attach(
        ns: &Namespace,
        directory: &dyn ChannelDirectory,
        module: &str,
    ) -> Result<Self, RelayError> {
        let channels = directory.channels()?;
        let active = names::active_modules(channels.iter().map(String::as_str));
        if !active.iter().any(|m| m == module) {
            return Err(RelayError::ModuleNotActive(module.to_string()));
        }

        let mut posts = Vec::new();
        let mut tuner_slots = Vec::new();
        for channel in &channels {
            if let Some(parsed) = names::parse_post_channel(module, channel) {
                posts.push(PostChannel {
                    name: parsed.name,
                    index: parsed.index,
                    mailbox: Mailbox::try_open(ns, channel)?,
                    frame: Frame::new(),
                });
            } else if let Some(parsed) = names::parse_tune_channel(module, channel) {
                let tuner = Tuner::from_label(&parsed.name)
                    .ok_or_else(|| RelayError::UnrecognizedControl(channel.clone()))?;
                tuner_slots.push(TunerSlot {
                    name: tuner.name().to_string(),
                    index: parsed.index,
                    mailbox: Mailbox::try_open(ns, channel)?,
                    frame: Frame::new(),
                    tuner,
                });
            }
        }

        // Declaration order is encoded in the channel names precisely so
        // listeners see a stable ordering.
        posts.sort_by_key(|p| p.index);
        tuner_slots.sort_by_key(|t| t.index);

        tracing::info!(
            "attached to module '{}': {} posts, {} control values",
            module,
            posts.len(),
            tuner_slots.len()
        );

        Ok(Self {
            module: module.to_string(),
            state: Some(PollState {
                posts,
                post_callbacks: Vec::new(),
                tuner_callbacks: Vec::new(),
            }),
            tuners: Arc::new(Mutex::new(tuner_slots)),
            quit: Arc::new(AtomicBool::new(false)),
            dead: Arc::new(AtomicBool::new(false)),
            resend_once: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Output channel names, in declaration order.
    pub fn post_names(&self) -> Vec<String> {
        match &self.state {
            Some(state) => state.posts.iter().map(|p| p.name.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Control value names, in declaration order.
    pub fn tuner_names(&self) -> Vec<String> {
        lock_slots(&self.tuners)
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn on_post(&mut self, callback: impl Fn(&PostUpdate<'_>) + Send + Sync + 'static) {
        if let Some(state) = self.state.as_mut() {
            state.post_callbacks.push(Box::new(callback));
        }
    }

    pub fn on_tuner(&mut self, callback: impl Fn(&TunerUpdate<'_>) + Send + Sync + 'static) {
        if let Some(state) = self.state.as_mut() {
            state.tuner_callbacks.push(Box::new(callback));
        }
    }

    /// Start the background poll loop at `poll_hz`.
    pub fn run_forever(&mut self, poll_hz: f64) -> Result<(), RelayError> {
        let state = self.state.take().ok_or(RelayError::AlreadyRunning)?;
        let module = self.module.clone();
        let tuners = Arc::clone(&self.tuners);
        let quit = Arc::clone(&self.quit);
        let dead = Arc::clone(&self.dead);
        let resend_once = Arc::clone(&self.resend_once);

        let handle = std::thread::Builder::new()
            .name(format!("relay-{module}"))
            .spawn(move || poll_loop(module, state, tuners, quit, dead, resend_once, poll_hz))
            .map_err(MailboxError::Io)?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Whether the watched module went away. The owner should discard this
    /// reader and attach a fresh one.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Force the next poll pass to re-emit every control value regardless of
    /// freshness, for a listener that just joined and needs full state.
    pub fn allow_resend_tuners_once(&self) {
        self.resend_once.store(true, Ordering::Release);
    }

    /// Apply a listener's control update: validate it against the cached
    /// value and republish its serialization so the owning module picks it
    /// up on its next poll.
    pub fn update_tuner_value(&self, name: &str, value: TunerValue) -> Result<(), RelayError> {
        let mut slots = lock_slots(&self.tuners);
        let slot = slots
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RelayError::UnknownTuner(name.to_string()))?;

        if !slot.tuner.set_value(value) {
            return Err(RelayError::RejectedValue(name.to_string()));
        }
        let bytes = slot.tuner.serialize();
        slot.mailbox.write(
            common::clock::now_ms(),
            FrameShape::bytes(bytes.len())?,
            &bytes,
        )?;
        Ok(())
    }

    /// Stop the poll loop and join it before the channel handles drop.
    pub fn shutdown(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            tracing::error!("poll loop for module '{}' panicked", self.module);
        }
    }
}

impl Drop for ModuleReader {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Destruction without an explicit shutdown is a defect in the
            // owner; make it visible but still stop the loop cleanly.
            tracing::warn!(
                "module reader for '{}' dropped without shutdown",
                self.module
            );
            self.shutdown();
        }
    }
}

fn poll_loop(
    module: String,
    mut state: PollState,
    tuners: Arc<Mutex<Vec<TunerSlot>>>,
    quit: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    resend_once: Arc<AtomicBool>,
    poll_hz: f64,
) {
    let mark_dead = |channel: &str| {
        tracing::info!(
            "module '{}' went away (channel '{}'), reader is dead",
            module,
            channel
        );
        dead.store(true, Ordering::Release);
        quit.store(true, Ordering::Release);
    };

    for _tick in Pacer::new(format!("relay-{module}"), Arc::clone(&quit)).rate(poll_hz) {
        for post in state.posts.iter_mut() {
            match post.mailbox.read(&mut post.frame, false) {
                Ok(ReadStatus::Success) => {
                    if let Some(shape) = post.frame.shape() {
                        let update = PostUpdate {
                            module: &module,
                            name: &post.name,
                            index: post.index,
                            shape,
                            acquired_at_ms: post.frame.acquired_at_ms(),
                            data: post.frame.bytes(),
                        };
                        for callback in &state.post_callbacks {
                            callback(&update);
                        }
                    }
                }
                Ok(ReadStatus::NoNewFrame) => {}
                Ok(ReadStatus::FrameworkDeleted) => {
                    mark_dead(post.mailbox.name());
                    break;
                }
                Err(e) => {
                    tracing::warn!("failed to poll output '{}': {}", post.name, e);
                }
            }
        }
        if quit.load(Ordering::Acquire) {
            break;
        }

        let force = resend_once.load(Ordering::Acquire);
        let mut emitted_forced = false;
        {
            let mut slots = lock_slots(&tuners);
            for slot in slots.iter_mut() {
                let emit = match slot.mailbox.read(&mut slot.frame, false) {
                    Ok(ReadStatus::Success) => {
                        slot.tuner.deserialize(slot.frame.bytes());
                        emitted_forced |= force;
                        true
                    }
                    Ok(ReadStatus::NoNewFrame) => {
                        // Re-emit cached state only if we ever had any.
                        let resend = force && slot.frame.uid() > 0;
                        emitted_forced |= resend;
                        resend
                    }
                    Ok(ReadStatus::FrameworkDeleted) => {
                        mark_dead(slot.mailbox.name());
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("failed to poll control '{}': {}", slot.name, e);
                        false
                    }
                };
                if emit {
                    let update = TunerUpdate {
                        module: &module,
                        index: slot.index,
                        tuner: &slot.tuner,
                    };
                    for callback in &state.tuner_callbacks {
                        callback(&update);
                    }
                }
            }
        }
        if force && emitted_forced {
            resend_once.store(false, Ordering::Release);
        }
        if quit.load(Ordering::Acquire) {
            break;
        }
    }

    tracing::info!("poll loop for module '{}' stopped", module);
}
