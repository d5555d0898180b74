//! Demonstration supervisor/listener binary: accepts TCP connections and
//! spawns one sender task per connection against a shared slot table and a
//! directory-backed WAL source, mirroring the original postmaster-forks-
//! walsender relationship inside a single OS process. Subscriber wiring
//! follows the same `tracing_subscriber` pattern as the teacher's
//! `main.rs`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use wal_sender::collaborators::{BaseBackupSender, Supervisor, WalSource};
use wal_sender::command::BaseBackupOptions;
use wal_sender::config::{ArcSwapConfigSource, Config};
use wal_sender::error::Result;
use wal_sender::pos::LogPosition;
use wal_sender::sender;
use wal_sender::signals;
use wal_sender::slots::SlotTable;

/// Reads the writer's published state off disk: a real deployment would
/// instead link against the process actually appending WAL. The segment
/// directory layout matches `segment_path`.
struct DirWal {
    dir: PathBuf,
}

impl DirWal {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn read_position_file(&self, name: &str) -> Option<LogPosition> {
        let text = std::fs::read_to_string(self.dir.join(name)).ok()?;
        let (a, b) = text.trim().split_once(':')?;
        Some(LogPosition::new(a.parse().ok()?, b.parse().ok()?))
    }
}

impl WalSource for DirWal {
    fn durable_flush_pos(&self) -> LogPosition {
        self.read_position_file("flush_pos").unwrap_or(LogPosition::ZERO)
    }

    fn last_removed(&self) -> (u32, u32) {
        self.read_position_file("last_removed")
            .map(|p| (p.log_id, p.rec_off))
            .unwrap_or((0, 0))
    }

    fn system_id(&self) -> u64 {
        std::fs::read_to_string(self.dir.join("system_id"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1)
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

struct AlwaysAliveSupervisor;

impl Supervisor for AlwaysAliveSupervisor {
    fn is_alive(&self) -> bool {
        true
    }

    fn is_recovery_in_progress(&self) -> bool {
        false
    }

    fn mark_as_sender(&self) {}
}

struct UnsupportedBaseBackup;

impl BaseBackupSender for UnsupportedBaseBackup {
    async fn send_base_backup(&self, _opts: BaseBackupOptions) -> Result<()> {
        Err(wal_sender::error::Error::ProtocolViolation(
            "base backup is not implemented by this demo binary".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::from_default_env())
        .init();

    let wal_dir = std::env::var("WAL_SENDER_DIR").unwrap_or_else(|_| "./wal".into());
    let listen_addr = std::env::var("WAL_SENDER_LISTEN").unwrap_or_else(|_| "127.0.0.1:5433".into());

    std::fs::create_dir_all(&wal_dir)?;

    let config = Config {
        max_senders: 16,
        ..Config::default()
    }
    .new_validated();

    tracing::info!(
        bytes = SlotTable::shmem_size(config.max_senders),
        max_senders = config.max_senders,
        "sizing slot table"
    );

    let wal = Arc::new(DirWal::new(Path::new(&wal_dir).to_path_buf()));
    let slot_table = Arc::new(SlotTable::new(config.max_senders));
    if slot_table.is_empty() {
        tracing::warn!("max_senders is 0; no sender slots available, all connections will fail");
    }
    let config_source: Arc<ArcSwapConfigSource> = Arc::new(ArcSwapConfigSource::fixed(config));
    let supervisor = Arc::new(AlwaysAliveSupervisor);
    let backup = Arc::new(UnsupportedBaseBackup);
    let signal_tx = signals::spawn_signal_forwarder();

    spawn_wal_notifier(wal.clone(), slot_table.clone());

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, %wal_dir, slots = slot_table.len(), "wal-sender listening");

    let next_owner_id = Arc::new(AtomicU64::new(1));

    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true).ok();

        let owner_id = next_owner_id.fetch_add(1, Ordering::SeqCst);
        let wal = wal.clone();
        let slot_table = slot_table.clone();
        let config_source = config_source.clone();
        let supervisor = supervisor.clone();
        let backup = backup.clone();
        let signal_rx = signal_tx.subscribe();

        tokio::spawn(async move {
            tracing::info!(%peer, owner_id, "connection accepted");
            let mut socket = socket;
            let result = sender::run_connection(
                &mut socket,
                owner_id,
                slot_table.as_ref(),
                wal,
                supervisor.as_ref(),
                backup.as_ref(),
                config_source.as_ref(),
                signal_rx,
                || chrono::Utc::now().timestamp_micros(),
            )
            .await;

            match result {
                Ok(()) => tracing::info!(%peer, owner_id, "connection closed"),
                Err(e) if e.ends_cleanly() => {
                    tracing::info!(%peer, owner_id, error = %e, "connection ended")
                }
                Err(e) => tracing::error!(%peer, owner_id, error = %e, "connection ended with error"),
            }
        });
    }
}

/// Polls the writer's `flush_pos` file and calls `wake_all` whenever it
/// advances, standing in for the durable WAL writer calling `WalSndWakeup`
/// after each flush to rouse every idle sender rather than waiting out its
/// own `nap_delay_ms`.
fn spawn_wal_notifier(wal: Arc<DirWal>, slot_table: Arc<SlotTable>) {
    tokio::spawn(async move {
        let mut last = wal.durable_flush_pos();
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let current = wal.durable_flush_pos();
            if current != last {
                last = current;
                slot_table.wake_all();
            }
        }
    });
}
