// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer descriptors, ownership tags, and per-port pools
//!
//! Buffers exchanged with a component are tracked by descriptor, never by
//! payload. Each descriptor carries an ownership tag naming the side that
//! may touch it:
//!
//! - [`Ownership::ClientFree`] - held by the client, free to submit
//! - [`Ownership::SubmittedToComponent`] - handed to the component
//! - [`Ownership::CompletedAwaitingDrain`] - returned by the component,
//!   queued for the drain worker
//!
//! Exactly one owner exists at any time. Every handoff asserts the tag it
//! expects and surfaces [`crate::Error::OwnershipViolation`] on a mismatch
//! instead of corrupting the buffer.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, Mutex};

use unix_ts::Timestamp;

use crate::{lock, Error};

/// Ownership tag of a buffer descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Held by the client, free to submit or release
    ClientFree,

    /// Handed to the component, untouchable until returned
    SubmittedToComponent,

    /// Returned by the component, waiting in a completion queue
    CompletedAwaitingDrain,
}

impl Ownership {
    /// Get human-readable name for this tag
    pub fn name(&self) -> &'static str {
        match self {
            Ownership::ClientFree => "ClientFree",
            Ownership::SubmittedToComponent => "SubmittedToComponent",
            Ownership::CompletedAwaitingDrain => "CompletedAwaitingDrain",
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Flags carried on a returned buffer
///
/// The bit values follow the component ABI. Only end-of-stream drives
/// behavior in this crate; the remaining bits ride along for policies to
/// inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set
    pub const NONE: BufferFlags = BufferFlags(0);

    /// End of stream, nothing further will be produced
    pub const EOS: BufferFlags = BufferFlags(0x0000_0001);

    /// Buffer holds the starting timestamp of the stream
    pub const START_TIME: BufferFlags = BufferFlags(0x0000_0002);

    /// Buffer should be decoded but not rendered
    pub const DECODE_ONLY: BufferFlags = BufferFlags(0x0000_0004);

    /// Payload is known to be corrupt
    pub const DATA_CORRUPT: BufferFlags = BufferFlags(0x0000_0008);

    /// Buffer ends a complete frame
    pub const END_OF_FRAME: BufferFlags = BufferFlags(0x0000_0010);

    /// Buffer starts a sync point (key frame)
    pub const SYNC_FRAME: BufferFlags = BufferFlags(0x0000_0020);

    /// Buffer carries codec configuration data rather than media
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(0x0000_0080);

    /// Build from the raw wire value
    pub fn from_raw(raw: u32) -> Self {
        BufferFlags(raw)
    }

    /// The raw wire value
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set
    pub fn contains(&self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the end-of-stream bit is set
    pub fn is_eos(&self) -> bool {
        self.contains(BufferFlags::EOS)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "none");
        }
        let names = [
            (BufferFlags::EOS, "EOS"),
            (BufferFlags::START_TIME, "STARTTIME"),
            (BufferFlags::DECODE_ONLY, "DECODEONLY"),
            (BufferFlags::DATA_CORRUPT, "DATACORRUPT"),
            (BufferFlags::END_OF_FRAME, "ENDOFFRAME"),
            (BufferFlags::SYNC_FRAME, "SYNCFRAME"),
            (BufferFlags::CODEC_CONFIG, "CODECCONFIG"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Identifier the component assigns to an exchanged buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

impl BufferId {
    /// The raw index value
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a buffer's backing memory was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBacking {
    /// Allocated by the component (`allocate_buffer`)
    Component,

    /// Supplied by the client (`use_buffer`)
    Client,
}

/// Descriptor of one buffer exchanged with the component
///
/// Created when the session populates a port during Loaded to Idle and
/// destroyed when the port is depopulated on the way back to Loaded. The
/// payload bytes live here; the component identifies the buffer by its
/// [`BufferId`] alone.
#[derive(Debug)]
pub struct BufferDescriptor {
    pub(crate) id: BufferId,
    pub(crate) port: u32,
    pub(crate) backing: BufferBacking,
    pub(crate) data: Vec<u8>,
    pub(crate) filled: usize,
    pub(crate) offset: usize,
    pub(crate) flags: BufferFlags,
    pub(crate) sequence: Option<u64>,
    pub(crate) timestamp: Option<Timestamp>,
    pub(crate) owner: Ownership,
}

impl BufferDescriptor {
    fn new(id: BufferId, port: u32, capacity: usize, backing: BufferBacking) -> Self {
        BufferDescriptor {
            id,
            port,
            backing,
            data: vec![0; capacity],
            filled: 0,
            offset: 0,
            flags: BufferFlags::NONE,
            sequence: None,
            timestamp: None,
            owner: Ownership::ClientFree,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn backing(&self) -> BufferBacking {
        self.backing
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn owner(&self) -> Ownership {
        self.owner
    }

    /// The valid payload bytes (offset through filled length)
    pub fn payload(&self) -> &[u8] {
        let end = (self.offset + self.filled).min(self.data.len());
        &self.data[self.offset..end]
    }
}

/// Per-port ownership counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnershipCensus {
    /// Buffers tagged [`Ownership::ClientFree`]
    pub client_free: usize,

    /// Buffers tagged [`Ownership::SubmittedToComponent`]
    pub submitted: usize,

    /// Buffers tagged [`Ownership::CompletedAwaitingDrain`]
    pub awaiting_drain: usize,
}

impl OwnershipCensus {
    /// Total buffers counted
    pub fn total(&self) -> usize {
        self.client_free + self.submitted + self.awaiting_drain
    }

    /// True when every counted buffer is client-free
    pub fn is_all_free(&self) -> bool {
        self.submitted == 0 && self.awaiting_drain == 0
    }
}

impl fmt::Display for OwnershipCensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free:{} submitted:{} draining:{}",
            self.client_free, self.submitted, self.awaiting_drain
        )
    }
}

/// Pool of buffer descriptors shared between the session, the callback
/// bridge, and the drain workers
///
/// Each descriptor sits behind its own lock. Under the single-owner
/// discipline those locks never contend: only the tagged owner touches a
/// descriptor, and the tag itself only changes through the guarded
/// `mark_*` transitions below.
pub struct BufferPool {
    slots: Mutex<HashMap<usize, Arc<Mutex<BufferDescriptor>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly created buffer, tagged client-free
    pub fn insert(&self, id: BufferId, port: u32, capacity: usize, backing: BufferBacking) {
        let descriptor = BufferDescriptor::new(id, port, capacity, backing);
        let mut slots = lock(&self.slots);
        if slots
            .insert(id.0, Arc::new(Mutex::new(descriptor)))
            .is_some()
        {
            log::warn!("buffer {} reinserted into pool, descriptor replaced", id);
        }
    }

    /// Look up a descriptor slot by id
    pub fn slot(&self, id: BufferId) -> Result<Arc<Mutex<BufferDescriptor>>, Error> {
        let slots = lock(&self.slots);
        slots.get(&id.0).cloned().ok_or(Error::UnknownBuffer(id.0))
    }

    /// Number of descriptors in the pool
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every descriptor on a port, in ascending order
    pub fn ids_for_port(&self, port: u32) -> Vec<BufferId> {
        let slots = lock(&self.slots);
        let mut ids: Vec<BufferId> = slots
            .values()
            .filter(|slot| lock(slot).port == port)
            .map(|slot| lock(slot).id)
            .collect();
        ids.sort();
        ids
    }

    /// Ids of every descriptor currently held under `owner`, in ascending
    /// order
    pub fn ids_with_owner(&self, owner: Ownership) -> Vec<BufferId> {
        let slots = lock(&self.slots);
        let mut ids: Vec<BufferId> = slots
            .values()
            .filter(|slot| lock(slot).owner == owner)
            .map(|slot| lock(slot).id)
            .collect();
        ids.sort();
        ids
    }

    /// Current ownership tag of a buffer
    pub fn owner(&self, id: BufferId) -> Result<Ownership, Error> {
        let slot = self.slot(id)?;
        let owner = lock(&slot).owner;
        Ok(owner)
    }

    /// Client hands the buffer to the component
    ///
    /// Requires `ClientFree`, tags `SubmittedToComponent`.
    pub fn mark_submitted(&self, id: BufferId) -> Result<(), Error> {
        self.transition(id, Ownership::ClientFree, Ownership::SubmittedToComponent)?;
        Ok(())
    }

    /// Undo a submission tag after the component refused the handoff
    ///
    /// The submit call failed synchronously, so ownership never actually
    /// moved; the buffer returns to whichever tag it held before.
    pub(crate) fn rollback_submit(&self, id: BufferId, back_to: Ownership) -> Result<(), Error> {
        self.transition(id, Ownership::SubmittedToComponent, back_to)?;
        Ok(())
    }

    /// Component returned the buffer with payload metadata
    ///
    /// Requires `SubmittedToComponent`, tags `CompletedAwaitingDrain` and
    /// records the completion metadata on the descriptor.
    pub fn mark_completed(
        &self,
        id: BufferId,
        filled: usize,
        flags: BufferFlags,
        sequence: u64,
        timestamp: Option<Timestamp>,
    ) -> Result<(), Error> {
        let slot = self.slot(id)?;
        let mut desc = lock(&slot);
        if desc.owner != Ownership::SubmittedToComponent {
            return Err(Error::OwnershipViolation {
                buffer: id.0,
                expected: Ownership::SubmittedToComponent,
                actual: desc.owner,
            });
        }
        desc.owner = Ownership::CompletedAwaitingDrain;
        desc.filled = filled.min(desc.data.len());
        desc.offset = 0;
        desc.flags = flags;
        desc.sequence = Some(sequence);
        desc.timestamp = timestamp;
        Ok(())
    }

    /// Drain side is done with the buffer, back to the client
    ///
    /// Requires `CompletedAwaitingDrain`, tags `ClientFree`.
    pub fn mark_reclaimed(&self, id: BufferId) -> Result<(), Error> {
        self.transition(id, Ownership::CompletedAwaitingDrain, Ownership::ClientFree)?;
        Ok(())
    }

    /// Destroy a descriptor during port depopulation
    ///
    /// Requires `ClientFree`; a buffer still submitted or queued cannot be
    /// freed without corrupting the exchange.
    pub fn remove(&self, id: BufferId) -> Result<(), Error> {
        let mut slots = lock(&self.slots);
        let slot = slots.get(&id.0).ok_or(Error::UnknownBuffer(id.0))?;
        let owner = lock(slot).owner;
        if owner != Ownership::ClientFree {
            return Err(Error::OwnershipViolation {
                buffer: id.0,
                expected: Ownership::ClientFree,
                actual: owner,
            });
        }
        slots.remove(&id.0);
        Ok(())
    }

    /// Ownership counts across the whole pool
    pub fn census(&self) -> OwnershipCensus {
        self.census_filter(None)
    }

    /// Ownership counts for one port
    pub fn census_port(&self, port: u32) -> OwnershipCensus {
        self.census_filter(Some(port))
    }

    fn census_filter(&self, port: Option<u32>) -> OwnershipCensus {
        let slots = lock(&self.slots);
        let mut census = OwnershipCensus::default();
        for slot in slots.values() {
            let desc = lock(slot);
            if let Some(port) = port {
                if desc.port != port {
                    continue;
                }
            }
            match desc.owner {
                Ownership::ClientFree => census.client_free += 1,
                Ownership::SubmittedToComponent => census.submitted += 1,
                Ownership::CompletedAwaitingDrain => census.awaiting_drain += 1,
            }
        }
        census
    }

    fn transition(
        &self,
        id: BufferId,
        expected: Ownership,
        next: Ownership,
    ) -> Result<(), Error> {
        let slot = self.slot(id)?;
        let mut desc = lock(&slot);
        if desc.owner != expected {
            return Err(Error::OwnershipViolation {
                buffer: id.0,
                expected,
                actual: desc.owner,
            });
        }
        desc.owner = next;
        Ok(())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new()
    }
}
