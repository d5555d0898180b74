use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;

use wal_sender::collaborators::{BaseBackupSender, Supervisor, WalSource};
use wal_sender::command::BaseBackupOptions;
use wal_sender::config::{ArcSwapConfigSource, Config};
use wal_sender::error::{Error, Result};
use wal_sender::pos::LogPosition;
use wal_sender::sender::run_connection;
use wal_sender::signals::SignalEvent;
use wal_sender::slots::SlotTable;

struct TestWal {
    dir: std::path::PathBuf,
    flush_pos: parking_lot::Mutex<LogPosition>,
}

impl TestWal {
    fn new(dir: &std::path::Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            flush_pos: parking_lot::Mutex::new(LogPosition::ZERO),
        }
    }

    fn add_segment(&self, log_id: u32, seg_no: u32, data: &[u8]) {
        std::fs::write(self.segment_path(log_id, seg_no), data).unwrap();
    }

    fn set_flush_pos(&self, pos: LogPosition) {
        *self.flush_pos.lock() = pos;
    }
}

impl WalSource for TestWal {
    fn durable_flush_pos(&self) -> LogPosition {
        *self.flush_pos.lock()
    }

    fn last_removed(&self) -> (u32, u32) {
        (0, 0)
    }

    fn system_id(&self) -> u64 {
        7
    }

    fn timeline_id(&self) -> u32 {
        1
    }

    fn segment_path(&self, log_id: u32, seg_no: u32) -> std::path::PathBuf {
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

struct NoOpBackup;

impl BaseBackupSender for NoOpBackup {
    async fn send_base_backup(&self, _opts: BaseBackupOptions) -> Result<()> {
        Ok(())
    }
}

fn query_message(text: &str) -> Vec<u8> {
    let mut payload = text.as_bytes().to_vec();
    payload.push(0);
    let mut buf = Vec::new();
    buf.push(wal_sender::proto::TAG_QUERY);
    buf.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
    buf.extend_from_slice(&payload);
    buf
}

/// End-to-end: a client identifies the system, starts replication from a
/// position with data already durable, and receives a CopyData frame
/// carrying exactly that data before the connection is closed gracefully.
#[tokio::test]
async fn full_handshake_then_one_frame_then_graceful_shutdown() {
    let dir = tempdir().unwrap();
    let config = Config {
        seg_size: 1_048_576,
        file_size: 1_048_576,
        page_size: 8192,
        max_frame: 131_072,
        max_senders: 4,
        ..Config::default()
    };

    let wal = Arc::new(TestWal::new(dir.path()));
    wal.add_segment(0, 0, &vec![42u8; 4096]);
    wal.set_flush_pos(LogPosition::new(0, 4096));

    let slot_table = SlotTable::new(config.max_senders);
    let supervisor = AlwaysAliveSupervisor;
    let backup = NoOpBackup;
    let config_source = ArcSwapConfigSource::fixed(config);
    let (tx, rx) = broadcast::channel(8);

    let (mut client, mut server) = duplex(1 << 16);

    client
        .write_all(&query_message("IDENTIFY_SYSTEM"))
        .await
        .unwrap();
    client
        .write_all(&query_message("START_REPLICATION 0/0"))
        .await
        .unwrap();

    let handle = tokio::spawn(async move {
        run_connection(
            &mut server,
            1,
            &slot_table,
            wal,
            &supervisor,
            &backup,
            &config_source,
            rx,
            || 1_700_000_000_000_000,
        )
        .await
    });

    let mut received = Vec::new();
    let mut buf = vec![0u8; 8192];
    // Read until we've seen a CopyData ('d') message.
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read should not time out")
            .unwrap();
        assert!(n > 0, "server closed before sending any data");
        received.extend_from_slice(&buf[..n]);
        if received.contains(&b'd') {
            break;
        }
    }

    tx.send(SignalEvent::Shutdown).unwrap();

    // Drain the rest of the stream (the COPY 0 trailer) and expect a clean
    // close.
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read should not time out")
            .unwrap();
        if n == 0 {
            break;
        }
    }

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sender task should finish")
        .unwrap();
    assert!(result.is_ok());
}

/// A client that terminates during the handshake never reaches streaming
/// and the connection ends with `Ok(())`.
#[tokio::test]
async fn terminate_during_handshake_ends_cleanly() {
    let dir = tempdir().unwrap();
    let config = Config::default();
    let wal = Arc::new(TestWal::new(dir.path()));
    let slot_table = SlotTable::new(config.max_senders.max(1));
    let supervisor = AlwaysAliveSupervisor;
    let backup = NoOpBackup;
    let config_source = ArcSwapConfigSource::fixed(config);
    let (_tx, rx) = broadcast::channel(8);

    let (mut client, mut server) = duplex(4096);
    client
        .write_all(&[wal_sender::proto::TAG_TERMINATE, 0, 0, 0, 4])
        .await
        .unwrap();
    drop(client);

    let result = run_connection(
        &mut server,
        1,
        &slot_table,
        wal,
        &supervisor,
        &backup,
        &config_source,
        rx,
        || 0,
    )
    .await;
    assert!(matches!(result, Ok(())));
}

/// A malformed command is a protocol violation and the connection ends
/// with that error rather than hanging or panicking.
#[tokio::test]
async fn malformed_command_is_protocol_violation() {
    let dir = tempdir().unwrap();
    let config = Config::default();
    let wal = Arc::new(TestWal::new(dir.path()));
    let slot_table = SlotTable::new(config.max_senders.max(1));
    let supervisor = AlwaysAliveSupervisor;
    let backup = NoOpBackup;
    let config_source = ArcSwapConfigSource::fixed(config);
    let (_tx, rx) = broadcast::channel(8);

    let (mut client, mut server) = duplex(4096);
    client.write_all(&query_message("NOT_A_COMMAND")).await.unwrap();
    drop(client);

    let result = run_connection(
        &mut server,
        1,
        &slot_table,
        wal,
        &supervisor,
        &backup,
        &config_source,
        rx,
        || 0,
    )
    .await;
    assert!(matches!(result, Err(Error::ProtocolViolation(_))));
}
