use mailbox::{Frame, FrameShape, Mailbox, MailboxError, Namespace, ReadStatus, names};
use thiserror::Error;
use tuners::{Tuner, TunerValue};

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("duplicate video input '{0}'")]
    DuplicateInput(String),

    #[error("duplicate control value '{0}'")]
    DuplicateTuner(String),

    #[error("post name '{0}' must not contain '%'")]
    InvalidPostName(String),

    #[error("input channel '{0}' was released by its producer")]
    PeerGone(String),

    #[error("control channel '{0}' was released unexpectedly")]
    ControlGone(String),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

/// One declared frame input of a module.
#[derive(Debug, Clone)]
pub struct VideoInput {
    pub channel: String,
}

impl VideoInput {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

/// One fresh input delivered by [`Session::read_messages`].
#[derive(Debug, Clone)]
pub struct InputMessage {
    pub channel: String,
    pub status: ReadStatus,
    pub shape: FrameShape,
    pub acquired_at_ms: u64,
    pub data: Vec<u8>,
}

/// A processing module's view of the bus: its declared frame inputs, its
/// control values, and the output channels it publishes debug frames on.
///
/// The manager itself is inert; all mailbox handles live inside a scoped
/// [`Session`], so every handle is released on every exit path. Control
/// values persist on the manager across sessions — a session retry after a
/// producer restart keeps the tuning the operator already applied.
pub struct ModuleManager {
    module: String,
    ns: Namespace,
    inputs: Vec<String>,
    tuners: Vec<Tuner>,
    defaults_published: bool,
    performance_mode: bool,
}

impl ModuleManager {
    /// Declare a module. Declaration order of inputs and control values is
    /// meaningful: it becomes the presentation order for remote listeners.
    pub fn new(
        module: impl Into<String>,
        ns: Namespace,
        video_inputs: Vec<VideoInput>,
        tuners: Vec<Tuner>,
    ) -> Result<Self, ModuleError> {
        let module = module.into();
        names::validate_module_name(&module)?;

        let mut inputs = Vec::with_capacity(video_inputs.len());
        for input in &video_inputs {
            names::validate_channel_name(&input.channel)?;
            if inputs.contains(&input.channel) {
                return Err(ModuleError::DuplicateInput(input.channel.clone()));
            }
            inputs.push(input.channel.clone());
        }

        for (i, tuner) in tuners.iter().enumerate() {
            if tuners[..i].iter().any(|t| t.name() == tuner.name()) {
                return Err(ModuleError::DuplicateTuner(tuner.name().to_string()));
            }
        }

        Ok(Self {
            module,
            ns,
            inputs,
            tuners,
            defaults_published: false,
            performance_mode: false,
        })
    }

    /// Disable `post` entirely. Used on competition runs where copying and
    /// publishing debug frames costs more than it is worth.
    pub fn set_performance_mode(&mut self, enabled: bool) {
        self.performance_mode = enabled;
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn input_channels(&self) -> &[String] {
        &self.inputs
    }

    pub fn tuner_value(&self, name: &str) -> Option<TunerValue> {
        self.tuners
            .iter()
            .find(|t| t.name() == name)
            .map(Tuner::value)
    }

    /// Enter a session: open every input (waiting for producers that have
    /// not started yet), create every control channel, and — once per
    /// manager lifetime — publish each control value's defaults so a
    /// late-joining remote reader sees initial state.
    pub fn session(&mut self) -> Result<Session<'_>, ModuleError> {
        let mut input_slots = Vec::with_capacity(self.inputs.len());
        for channel in &self.inputs {
            let mailbox = Mailbox::open(&self.ns, channel);
            input_slots.push(InputSlot {
                channel: channel.clone(),
                mailbox,
                frame: Frame::new(),
            });
        }

        let mut tuner_boxes = Vec::with_capacity(self.tuners.len());
        for (idx, tuner) in self.tuners.iter().enumerate() {
            let channel = names::tune_channel(&self.module, idx, &tuner.channel_label());
            let mailbox = Mailbox::create(&self.ns, &channel, tuner.byte_size())?;
            tuner_boxes.push(mailbox);
        }

        let publish_defaults = !self.defaults_published;
        if publish_defaults {
            let now = common::clock::now_ms();
            for (tuner, mailbox) in self.tuners.iter().zip(tuner_boxes.iter_mut()) {
                let bytes = tuner.serialize();
                mailbox.write(now, FrameShape::bytes(bytes.len())?, &bytes)?;
            }
            self.defaults_published = true;
        }

        let tuner_frames = self.tuners.iter().map(|_| Frame::new()).collect();
        tracing::info!(
            "module '{}' session opened: {} inputs, {} control values",
            self.module,
            input_slots.len(),
            tuner_boxes.len()
        );

        Ok(Session {
            manager: self,
            inputs: input_slots,
            tuner_boxes,
            tuner_frames,
            posts: Vec::new(),
        })
    }
}

struct InputSlot {
    channel: String,
    mailbox: Mailbox,
    frame: Frame,
}

/// A scoped view of a module's mailboxes. Dropping the session releases
/// every handle it opened or created, on any exit path.
pub struct Session<'m> {
    manager: &'m mut ModuleManager,
    inputs: Vec<InputSlot>,
    tuner_boxes: Vec<Mailbox>,
    tuner_frames: Vec<Frame>,
    posts: Vec<(String, Mailbox)>,
}

impl Session<'_> {
    /// Ingest pending control-value updates, then return one message per
    /// input whose generation advanced since the previous call.
    ///
    /// A released input channel aborts with [`ModuleError::PeerGone`]; the
    /// host loop decides whether to retry the whole session.
    pub fn read_messages(&mut self) -> Result<Vec<InputMessage>, ModuleError> {
        for (idx, mailbox) in self.tuner_boxes.iter().enumerate() {
            let frame = &mut self.tuner_frames[idx];
            match mailbox.read(frame, false)? {
                ReadStatus::Success => {
                    let tuner = &mut self.manager.tuners[idx];
                    if !tuner.deserialize(frame.bytes()) {
                        tracing::debug!(
                            "rejected out-of-range update for control value '{}'",
                            tuner.name()
                        );
                    }
                }
                ReadStatus::NoNewFrame => {}
                ReadStatus::FrameworkDeleted => {
                    return Err(ModuleError::ControlGone(mailbox.name().to_string()));
                }
            }
        }

        let mut out = Vec::new();
        for slot in &mut self.inputs {
            match slot.mailbox.read(&mut slot.frame, false)? {
                ReadStatus::Success => {
                    // A successful read always carries a shape.
                    if let Some(shape) = slot.frame.shape() {
                        out.push(InputMessage {
                            channel: slot.channel.clone(),
                            status: ReadStatus::Success,
                            shape,
                            acquired_at_ms: slot.frame.acquired_at_ms(),
                            data: slot.frame.to_owned_bytes(),
                        });
                    }
                }
                ReadStatus::NoNewFrame => {}
                ReadStatus::FrameworkDeleted => {
                    return Err(ModuleError::PeerGone(slot.channel.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Publish a debug frame on this module's output channel `name`,
    /// creating the channel (sized to this payload) on first use. A no-op in
    /// performance mode.
    pub fn post(
        &mut self,
        name: &str,
        acquired_at_ms: u64,
        shape: FrameShape,
        data: &[u8],
    ) -> Result<(), ModuleError> {
        if self.manager.performance_mode {
            return Ok(());
        }
        if name.contains('%') {
            return Err(ModuleError::InvalidPostName(name.to_string()));
        }

        if let Some((_, mailbox)) = self.posts.iter_mut().find(|(n, _)| n == name) {
            mailbox.write(acquired_at_ms, shape, data)?;
            return Ok(());
        }

        let index = self.posts.len();
        let channel = names::post_channel(&self.manager.module, index, name);
        let mut mailbox = Mailbox::create(&self.manager.ns, &channel, data.len())?;
        mailbox.write(acquired_at_ms, shape, data)?;
        self.posts.push((name.to_string(), mailbox));
        Ok(())
    }

    pub fn tuner_value(&self, name: &str) -> Option<TunerValue> {
        self.manager.tuner_value(name)
    }

    /// Snapshot of all control values, for handing to module code.
    pub fn tuner_values(&self) -> Vec<(String, TunerValue)> {
        self.manager
            .tuners
            .iter()
            .map(|t| (t.name().to_string(), t.value()))
            .collect()
    }

    pub fn module(&self) -> &str {
        &self.manager.module
    }

    pub fn performance_mode(&self) -> bool {
        self.manager.performance_mode
    }

    pub fn input_channels(&self) -> Vec<String> {
        self.inputs.iter().map(|s| s.channel.clone()).collect()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        // Arena teardown is explicit so the release order is defined:
        // outputs first, then control channels, then input handles.
        for (name, mailbox) in self.posts.drain(..) {
            tracing::debug!("releasing output channel '{}'", name);
            mailbox.delete();
        }
        for mailbox in self.tuner_boxes.drain(..) {
            mailbox.delete();
        }
        self.inputs.clear();
        tracing::info!("module '{}' session closed", self.manager.module);
    }
}
