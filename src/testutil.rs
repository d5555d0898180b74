//! In-memory fakes for the collaborator traits, used by unit tests across
//! the crate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::collaborators::{Supervisor, WalSource};
use crate::pos::LogPosition;

pub struct FakeWal {
    dir: PathBuf,
    durable_flush_pos: Mutex<LogPosition>,
    last_removed: Mutex<(u32, u32)>,
}

impl FakeWal {
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            durable_flush_pos: Mutex::new(LogPosition::ZERO),
            last_removed: Mutex::new((0, 0)),
        }
    }

    pub fn with_segment(dir: &Path, log_id: u32, seg_no: u32, data: &[u8]) -> Self {
        let wal = Self::empty(dir);
        wal.add_segment(log_id, seg_no, data);
        wal
    }

    pub fn add_segment(&self, log_id: u32, seg_no: u32, data: &[u8]) {
        std::fs::write(self.segment_path(log_id, seg_no), data).unwrap();
    }

    pub fn set_durable_flush_pos(&self, pos: LogPosition) {
        *self.durable_flush_pos.lock() = pos;
    }

    pub fn set_last_removed(&self, log_id: u32, seg_no: u32) {
        *self.last_removed.lock() = (log_id, seg_no);
    }
}

impl WalSource for FakeWal {
    fn durable_flush_pos(&self) -> LogPosition {
        *self.durable_flush_pos.lock()
    }

    fn last_removed(&self) -> (u32, u32) {
        *self.last_removed.lock()
    }

    fn system_id(&self) -> u64 {
        0xC0FFEE
    }

    fn timeline_id(&self) -> u32 {
        1
    }

    fn segment_path(&self, log_id: u32, seg_no: u32) -> PathBuf {
        self.dir.join(format!("{log_id:08}.{seg_no:08}.seg"))
    }

    fn retains_wal_for_replication(&self) -> bool {
        true
    }
}

pub struct FakeSupervisor {
    alive: AtomicBool,
    recovering: AtomicBool,
    marked: AtomicBool,
}

impl Default for FakeSupervisor {
    fn default() -> Self {
        Self {
            alive: AtomicBool::new(true),
            recovering: AtomicBool::new(false),
            marked: AtomicBool::new(false),
        }
    }
}

impl FakeSupervisor {
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn set_recovering(&self, v: bool) {
        self.recovering.store(v, Ordering::SeqCst);
    }

    pub fn was_marked_as_sender(&self) -> bool {
        self.marked.load(Ordering::SeqCst)
    }
}

impl Supervisor for FakeSupervisor {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_recovery_in_progress(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    fn mark_as_sender(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }
}
