use std::sync::atomic::AtomicU64;

/// Value of the `magic` field in every mailbox mapping.
pub const MAGIC: u64 = u64::from_le_bytes(*b"VISIONDB");

/// `state` value while the owning process holds the mailbox.
pub const STATE_LIVE: u64 = 0;

/// `state` value after the owner released the mailbox cleanly.
pub const STATE_RETIRED: u64 = 1;

/// SAFETY & MEMORY ORDERING:
///
/// This header defines the shared memory layout for a mailbox. It is mapped
/// by independent processes compiled at different times, so the field order,
/// widths, and alignment below are a wire format and must never change
/// without bumping `MAGIC`.
///
/// Writer protocol:
/// 1. Store `seq_begin = n` with `Ordering::Release`
/// 2. Write acquisition time, dims, element width, payload bytes
/// 3. Store `seq_end = n` with `Ordering::Release`
/// 4. Increment `generation` with `Ordering::AcqRel`
///
/// Reader protocol:
/// 1. Load `generation` with `Ordering::Acquire`; unchanged means no new frame
/// 2. Load `seq_end`, copy metadata + payload, load `seq_begin` (`Acquire`)
/// 3. Accept the snapshot only if `seq_begin == seq_end`; otherwise the
///    writer was mid-write and the copy retries
///
/// The `seq_begin`/`seq_end` pair is what rejects torn payloads; the
/// Release-Acquire pairing is what makes an accepted snapshot's payload
/// bytes visible on every architecture.
///
/// The `#[repr(C, align(8))]` pins the layout and keeps every AtomicU64
/// 8-byte aligned regardless of the mapping offset.
#[repr(C, align(8))]
pub struct BlockHeader {
    /// Identifies a mapping as a mailbox of this layout revision.
    pub magic: u64,
    /// Maximum payload bytes, fixed at creation.
    pub capacity: u64,
    /// `STATE_LIVE` or `STATE_RETIRED`.
    pub state: AtomicU64,
    /// Number of handles currently mapping this region, owner included.
    /// The last handle to detach unlinks the backing file, so a reader that
    /// outlives the owner still observes the retired state instead of a
    /// recycled channel. Mutated only under the namespace lock.
    pub attached: AtomicU64,
    /// Monotonically increasing frame counter. 0 means "never written".
    pub generation: AtomicU64,
    /// Seqlock word incremented before each write.
    pub seq_begin: AtomicU64,
    /// Seqlock word set equal to `seq_begin` after each write.
    pub seq_end: AtomicU64,
    /// Producer-defined acquisition clock, milliseconds.
    pub acquired_at_ms: u64,
    /// Payload dimensions; unused trailing dims are 1.
    pub width: u64,
    pub height: u64,
    pub depth: u64,
    /// Bytes per element: 1, 4, or 8.
    pub elem_width: u64,
}

impl BlockHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}
