//! The shared sender slot table.
//!
//! Replaces the original shared-memory segment with a plain `Arc`-shared
//! fixed-size array; the per-slot lock protects exactly the fields the
//! original guarded with a spinlock, and is never held across an `.await`.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::pos::LogPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Startup,
    Backup,
    Catchup,
    Streaming,
    /// Never set by this crate's own code; mirrors the original's defensive
    /// default case in `WalSndGetStateString` for a state value outside the
    /// known set, so a monitoring consumer always gets one of the five wire
    /// strings back.
    Unknown,
}

impl SenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderState::Startup => "STARTUP",
            SenderState::Backup => "BACKUP",
            SenderState::Catchup => "CATCHUP",
            SenderState::Streaming => "STREAMING",
            SenderState::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug)]
struct SlotInner {
    owner: u64,
    state: SenderState,
    sent_pos: LogPosition,
}

/// One cell of the slot table. `latch` may be signalled by any task; the
/// mutex guards `owner`/`state`/`sent_pos` reads from other tasks. The
/// owning task may clear `owner` without the lock (see `release`).
pub struct Slot {
    inner: Mutex<SlotInner>,
    pub latch: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                owner: 0,
                state: SenderState::Startup,
                sent_pos: LogPosition::ZERO,
            }),
            latch: Notify::new(),
        }
    }

    pub fn owner(&self) -> u64 {
        self.inner.lock().owner
    }

    pub fn snapshot(&self) -> (u64, SenderState, LogPosition) {
        let g = self.inner.lock();
        (g.owner, g.state, g.sent_pos)
    }

    pub fn set_sent_pos(&self, pos: LogPosition) {
        let mut g = self.inner.lock();
        g.sent_pos = pos;
    }

    /// No-op if unchanged, matching the original's avoidance of taking the
    /// lock when nothing would change.
    pub fn set_state(&self, state: SenderState) {
        let mut g = self.inner.lock();
        if g.state != state {
            g.state = state;
        }
    }
}

/// Fixed-capacity table of sender slots, shared by every connection task and
/// by the stats reader.
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn shmem_size(max_senders: u32) -> usize {
        max_senders as usize * std::mem::size_of::<Slot>()
    }

    pub fn new(max_senders: u32) -> Self {
        Self {
            slots: (0..max_senders).map(|_| Slot::new()).collect(),
        }
    }

    /// Claims the first free slot for `owner_id`. Fails with
    /// `TooManySenders` if none are free.
    pub fn acquire(&self, owner_id: u64) -> Result<&Slot> {
        for slot in &self.slots {
            let mut g = slot.inner.lock();
            if g.owner == 0 {
                g.owner = owner_id;
                g.state = SenderState::Startup;
                g.sent_pos = LogPosition::ZERO;
                drop(g);
                return Ok(slot);
            }
        }
        Err(Error::TooManySenders)
    }

    /// Releases a slot. Only the owning task should call this; clearing
    /// `owner` needs no lock since the owner is the sole writer of it.
    pub fn release(&self, slot: &Slot) {
        let mut g = slot.inner.lock();
        g.owner = 0;
    }

    pub fn wake_all(&self) {
        for slot in &self.slots {
            slot.latch.notify_one();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
