use crate::errors::MailboxError;
use crate::frame::{Frame, FrameShape};
use crate::header::{BlockHeader, MAGIC, STATE_LIVE, STATE_RETIRED};
use crate::names::validate_channel_name;
use crate::namespace::Namespace;
use crate::retry::PollBackoff;
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Interval at which [`Mailbox::open`] retries a channel that has not been
/// created yet.
pub const OPEN_RETRY_INTERVAL_MS: u64 = 1000;

/// How long a blocking read waits for a new generation before giving up.
/// Bounded so cooperative cancellation is never starved by a writer that
/// stopped writing.
const BLOCKING_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Snapshot retries between owner-liveness re-checks, so a reader caught on
/// a write the owner died in the middle of cannot spin forever.
const SNAPSHOT_SPINS_PER_PROBE: u32 = 1024;

/// Exclusive lock on the namespace's lock file, held across mailbox
/// creation, attachment, and teardown. Serializes the attach count against
/// the unlink performed by the last detaching handle.
struct NamespaceLock {
    _file: std::fs::File,
}

impl NamespaceLock {
    fn acquire(path: &std::path::Path) -> Result<Self, MailboxError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
            return Err(io::Error::from_raw_os_error(Errno::last() as i32).into());
        }
        Ok(Self { _file: file })
    }
}
// The lock releases when the file handle closes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The generation advanced since this frame's last read; the frame now
    /// holds the freshest payload.
    Success,
    /// Nothing written since the last read. The frame's previous contents
    /// are untouched.
    NoNewFrame,
    /// The owning process released the mailbox or is gone. The payload must
    /// no longer be trusted.
    FrameworkDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    /// The mailbox was marked released concurrently; the write was dropped.
    OwnerGone,
}

/// A named shared-memory mailbox holding the single freshest payload for one
/// channel.
///
/// Exactly one process creates a mailbox and owns its lifetime; any number of
/// processes open it for polling. The creator's liveness is signalled by an
/// exclusive advisory `flock` held on the backing file for as long as the
/// process lives, so readers can tell a crashed owner from an idle one.
///
/// Writes are permitted through opened (non-owner) handles as well — control
/// channels are created by the consuming module but written by remote
/// controllers. Frame channels keep the one-writer discipline by convention.
pub struct Mailbox {
    name: String,
    path: PathBuf,
    lock_path: PathBuf,
    file: std::fs::File,
    mmap: MmapMut,
    owner: bool,
    abandoned: bool,
}

impl Mailbox {
    /// Create (or adopt) the mailbox for `name`, sized to hold payloads of up
    /// to `capacity` bytes, and register this process as its owner.
    ///
    /// A backing file left behind by a crashed owner is adopted: the region
    /// is re-claimed, the declared capacity must match, and the generation
    /// counter is preserved so surviving readers keep their freshness
    /// tracking. Creating a channel that a live process owns fails with
    /// [`MailboxError::AlreadyOwned`].
    pub fn create(ns: &Namespace, name: &str, capacity: usize) -> Result<Self, MailboxError> {
        validate_channel_name(name)?;
        if capacity == 0 {
            return Err(MailboxError::ZeroCapacity);
        }

        let path = ns.path_for(name);
        let lock_path = ns.lock_path();
        let _guard = NamespaceLock::acquire(&lock_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        // The liveness marker: held until the file handle closes, including
        // on abnormal process death.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let errno = Errno::last();
            if errno == Errno::EWOULDBLOCK {
                return Err(MailboxError::AlreadyOwned(name.to_string()));
            }
            return Err(io::Error::from_raw_os_error(errno as i32).into());
        }

        let adopting = file.metadata()?.len() as usize >= BlockHeader::SIZE;
        let required = BlockHeader::SIZE + capacity;
        if (file.metadata()?.len() as usize) < required {
            file.set_len(required as u64)?;
        }

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        if adopting {
            let header = unsafe { &*(mmap.as_ptr() as *const BlockHeader) };
            if header.magic != MAGIC {
                return Err(MailboxError::BadMagic(name.to_string()));
            }
            let existing = header.capacity as usize;
            if existing != capacity {
                return Err(MailboxError::CapacityMismatch {
                    name: name.to_string(),
                    existing,
                    requested: capacity,
                });
            }
            header.state.store(STATE_LIVE, Ordering::Release);
            // A crash mid-write leaves the seqlock words unequal, which
            // would spin readers forever; re-balance them. The payload of
            // that torn write is lost, the generation counter is kept.
            let begin = header.seq_begin.load(Ordering::Acquire);
            header.seq_end.store(begin, Ordering::Release);
            header.attached.fetch_add(1, Ordering::AcqRel);
            tracing::info!(
                "adopted mailbox '{}' at generation {}",
                name,
                header.generation.load(Ordering::Acquire)
            );
        } else {
            let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut BlockHeader) };
            header.magic = MAGIC;
            header.capacity = capacity as u64;
            header.state = AtomicU64::new(STATE_LIVE);
            header.attached = AtomicU64::new(1);
            header.generation = AtomicU64::new(0);
            header.seq_begin = AtomicU64::new(0);
            header.seq_end = AtomicU64::new(0);
            header.acquired_at_ms = 0;
            header.width = 0;
            header.height = 0;
            header.depth = 0;
            header.elem_width = 0;
            tracing::info!("created mailbox '{}' with {} payload bytes", name, capacity);
        }

        Ok(Self {
            name: name.to_string(),
            path,
            lock_path,
            file,
            mmap,
            owner: true,
            abandoned: false,
        })
    }

    /// Open an existing mailbox for polling. Fails with
    /// [`MailboxError::NotFound`] if the producer has not created it yet.
    pub fn try_open(ns: &Namespace, name: &str) -> Result<Self, MailboxError> {
        validate_channel_name(name)?;
        let path = ns.path_for(name);
        let lock_path = ns.lock_path();
        let _guard = NamespaceLock::acquire(&lock_path)?;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MailboxError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        // A file shorter than the header is a leftover of a creator that
        // died before sizing it.
        if (file.metadata()?.len() as usize) < BlockHeader::SIZE {
            return Err(MailboxError::NotFound(name.to_string()));
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = unsafe { &*(mmap.as_ptr() as *const BlockHeader) };
        if header.magic != MAGIC {
            return Err(MailboxError::BadMagic(name.to_string()));
        }
        header.attached.fetch_add(1, Ordering::AcqRel);

        Ok(Self {
            name: name.to_string(),
            path,
            lock_path,
            file,
            mmap,
            owner: false,
            abandoned: false,
        })
    }

    /// Open a mailbox, waiting for its producer to create it. Consumers may
    /// start before producers; progress is logged while waiting.
    pub fn open(ns: &Namespace, name: &str) -> Self {
        common::wait_for_resource(|| Self::try_open(ns, name), OPEN_RETRY_INTERVAL_MS, name)
    }

    /// Publish a payload: atomically replace the previous one, stamp the
    /// acquisition time, and advance the generation counter.
    pub fn write(
        &mut self,
        acquired_at_ms: u64,
        shape: FrameShape,
        data: &[u8],
    ) -> Result<WriteStatus, MailboxError> {
        let expected = shape.byte_len();
        if expected != data.len() {
            return Err(MailboxError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let capacity = self.capacity();
        if data.len() > capacity {
            return Err(MailboxError::PayloadTooLarge {
                len: data.len(),
                capacity,
            });
        }
        if self.header().state.load(Ordering::Acquire) == STATE_RETIRED {
            return Ok(WriteStatus::OwnerGone);
        }

        // Claimed atomically: control channels have a second legitimate
        // writer (the remote end), and colliding tickets would let a reader
        // accept a payload interleaved from both.
        let ticket = self.header().seq_begin.fetch_add(1, Ordering::AcqRel) + 1;

        {
            let header = unsafe { &mut *(self.mmap.as_mut_ptr() as *mut BlockHeader) };
            header.acquired_at_ms = acquired_at_ms;
            header.width = shape.width;
            header.height = shape.height;
            header.depth = shape.depth;
            header.elem_width = shape.elem_width;
        }
        self.mmap[BlockHeader::SIZE..BlockHeader::SIZE + data.len()].copy_from_slice(data);

        self.header().seq_end.store(ticket, Ordering::Release);
        self.header().generation.fetch_add(1, Ordering::AcqRel);
        Ok(WriteStatus::Success)
    }

    /// Poll for the freshest payload.
    ///
    /// With `block = false` the call returns immediately; with `block = true`
    /// it waits up to a bounded timeout for the generation to advance, then
    /// behaves the same. On [`ReadStatus::Success`] the frame's view holds a
    /// consistent snapshot of the newest payload, valid until the next read
    /// through the same frame.
    pub fn read(&self, frame: &mut Frame, block: bool) -> Result<ReadStatus, MailboxError> {
        if self.header().state.load(Ordering::Acquire) == STATE_RETIRED {
            return Ok(ReadStatus::FrameworkDeleted);
        }
        if !self.owner && self.owner_vanished() {
            return Ok(ReadStatus::FrameworkDeleted);
        }

        let mut generation = self.header().generation.load(Ordering::Acquire);
        if generation <= frame.last_uid {
            if !block {
                return Ok(ReadStatus::NoNewFrame);
            }
            let deadline = Instant::now() + BLOCKING_READ_TIMEOUT;
            let backoff = PollBackoff::default();
            let mut attempt = 0u32;
            loop {
                std::thread::sleep(backoff.delay_for_attempt(attempt));
                attempt += 1;
                if self.header().state.load(Ordering::Acquire) == STATE_RETIRED {
                    return Ok(ReadStatus::FrameworkDeleted);
                }
                if !self.owner && self.owner_vanished() {
                    return Ok(ReadStatus::FrameworkDeleted);
                }
                generation = self.header().generation.load(Ordering::Acquire);
                if generation > frame.last_uid {
                    break;
                }
                if Instant::now() >= deadline {
                    return Ok(ReadStatus::NoNewFrame);
                }
            }
        }

        let mut spins = 0u32;
        loop {
            let header = self.header();
            let end = header.seq_end.load(Ordering::Acquire);
            let shape = FrameShape {
                width: header.width,
                height: header.height,
                depth: header.depth,
                elem_width: header.elem_width,
            };
            let acquired_at_ms = header.acquired_at_ms;

            // A shape larger than the capacity is a half-written header;
            // skip the copy and let the seqlock check retry.
            let len = shape.byte_len();
            if len <= self.capacity() {
                if frame.buf.len() < len {
                    frame.buf.resize(len, 0);
                }
                frame.buf[..len]
                    .copy_from_slice(&self.mmap[BlockHeader::SIZE..BlockHeader::SIZE + len]);

                let begin = self.header().seq_begin.load(Ordering::Acquire);
                if begin == end {
                    frame.shape = Some(shape);
                    frame.acquired_at_ms = acquired_at_ms;
                    frame.last_uid = generation;
                    return Ok(ReadStatus::Success);
                }
            }

            spins += 1;
            if spins.is_multiple_of(SNAPSHOT_SPINS_PER_PROBE) {
                if !self.owner && self.owner_vanished() {
                    return Ok(ReadStatus::FrameworkDeleted);
                }
                std::thread::sleep(Duration::from_micros(100));
            }
            std::hint::spin_loop();
        }
    }

    /// Probe the owner's liveness lock. A shared non-blocking lock succeeds
    /// only once the exclusive owner lock is gone, and shared probes from
    /// concurrent readers do not block each other.
    fn owner_vanished(&self) -> bool {
        let ret = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
        if ret == 0 {
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
            return true;
        }
        // EWOULDBLOCK means the owner still holds it; on any other failure
        // keep trusting the owner rather than spuriously killing the channel.
        false
    }

    fn header(&self) -> &BlockHeader {
        unsafe { &*(self.mmap.as_ptr() as *const BlockHeader) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    /// Current generation counter; 0 means nothing has been written yet.
    pub fn generation(&self) -> u64 {
        self.header().generation.load(Ordering::Acquire)
    }

    /// Owner-side teardown. Equivalent to dropping, spelled out at call
    /// sites that release mailboxes on a specific exit path.
    pub fn delete(self) {}

    /// Release the handle the way a crashed owner would: the liveness lock
    /// is dropped but the region is neither retired nor unlinked. Lets tests
    /// and supervisors exercise crash detection without killing a process.
    pub fn abandon(mut self) {
        self.abandoned = true;
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.abandoned {
            // The handle vanishes the way a crashed process's would: the
            // liveness lock releases on close, nothing is decremented.
            return;
        }

        let _guard = NamespaceLock::acquire(&self.lock_path).ok();
        let header = self.header();
        if self.owner {
            header.state.store(STATE_RETIRED, Ordering::Release);
        }

        // The backing file persists while any handle is still attached, so
        // readers that outlive the owner observe the retired state rather
        // than a recycled channel. The last one out unlinks it.
        let remaining = header.attached.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("failed to unlink mailbox '{}': {}", self.name, e);
            } else {
                tracing::info!("released mailbox '{}'", self.name);
            }
        } else if self.owner {
            tracing::info!(
                "retired mailbox '{}', {} readers still attached",
                self.name,
                remaining
            );
        }
        // The advisory liveness lock, if held, goes away when the file
        // handle closes.
    }
}
