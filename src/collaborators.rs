//! External collaborator interfaces: the durable WAL writer, the
//! supervisor process, and the base-backup sender. The sender core depends
//! only on these traits, never on a concrete writer implementation.

use std::future::Future;

use crate::command::BaseBackupOptions;
use crate::error::Result;
use crate::pos::LogPosition;

/// The durable WAL writer. Guarantees `durable_flush_pos()` never lands
/// mid-record: every position it reports is a valid frame boundary.
pub trait WalSource: Send + Sync + 'static {
    /// Largest WAL position guaranteed persisted on local storage.
    fn durable_flush_pos(&self) -> LogPosition;

    /// Highest `(log_id, seg_no)` that has been recycled and must no longer
    /// be read. Segments at or below this watermark are gone.
    fn last_removed(&self) -> (u32, u32);

    fn system_id(&self) -> u64;
    fn timeline_id(&self) -> u32;

    /// Path to the segment file holding `log_id`'s `seg_no`'th segment.
    fn segment_path(&self, log_id: u32, seg_no: u32) -> std::path::PathBuf;

    /// Whether the log is configured to retain enough detail for shipping
    /// (checked once, at `StartReplication` time).
    fn retains_wal_for_replication(&self) -> bool;
}

/// The supervisor/root process. A sender defers to it for liveness and for
/// the recovery-in-progress probe done before handshake.
pub trait Supervisor: Send + Sync + 'static {
    fn is_alive(&self) -> bool;
    fn is_recovery_in_progress(&self) -> bool;
    /// Tell the supervisor to keep this sender alive until last during an
    /// ordered shutdown (called once, on entering streaming mode).
    fn mark_as_sender(&self);
}

/// Delegate for the `BASE_BACKUP` handshake command.
pub trait BaseBackupSender: Send + Sync + 'static {
    fn send_base_backup(
        &self,
        opts: BaseBackupOptions,
    ) -> impl Future<Output = Result<()>> + Send;
}
