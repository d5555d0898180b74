//! The handshake dispatcher: the command phase that precedes
//! streaming.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::collaborators::{BaseBackupSender, Supervisor, WalSource};
use crate::command::{self, ReplicationCommand};
use crate::config::ConfigSource;
use crate::error::{Error, Result};
use crate::pos::LogPosition;
use crate::proto::{self, TAG_QUERY, TAG_TERMINATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    StartReplication(LogPosition),
    Closed,
}

/// Drives the handshake loop until the client either starts replication or
/// disconnects.
#[tracing::instrument(skip_all)]
pub async fn run<T, W, S, B>(
    transport: &mut T,
    wal: &W,
    supervisor: &S,
    backup: &B,
    config_source: &dyn ConfigSource,
    got_reload: &AtomicBool,
) -> Result<HandshakeOutcome>
where
    T: AsyncRead + AsyncWrite + Unpin,
    W: WalSource,
    S: Supervisor,
    B: BaseBackupSender,
{
    loop {
        if !supervisor.is_alive() {
            return Err(Error::SupervisorGone);
        }
        if got_reload.swap(false, Ordering::SeqCst) {
            config_source.reload();
        }

        proto::write_ready_for_query(transport).await?;

        let Some(msg) = proto::read_message(transport).await? else {
            tracing::warn!("protocol violation: unexpected EOF on standby connection");
            return Ok(HandshakeOutcome::Closed);
        };

        match msg.tag {
            TAG_TERMINATE => return Ok(HandshakeOutcome::Closed),
            TAG_QUERY => {
                let text = std::str::from_utf8(&msg.payload)
                    .map_err(|_| Error::ProtocolViolation("query is not valid utf-8".into()))?
                    .trim_end_matches('\0');
                let cmd = command::parse(text)?;
                match cmd {
                    ReplicationCommand::IdentifySystem => {
                        write_identify_system_result(transport, wal.system_id(), wal.timeline_id())
                            .await?;
                    }
                    ReplicationCommand::BaseBackup(opts) => {
                        backup.send_base_backup(opts).await?;
                        proto::write_command_complete(transport, "SELECT").await?;
                        proto::write_ready_for_query(transport).await?;
                    }
                    ReplicationCommand::StartReplication(start_point) => {
                        return Ok(HandshakeOutcome::StartReplication(start_point));
                    }
                }
            }
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "unexpected message type during handshake: {:?}",
                    other as char
                )))
            }
        }
    }
}

async fn write_identify_system_result<T: AsyncWrite + Unpin>(
    transport: &mut T,
    system_id: u64,
    timeline_id: u32,
) -> Result<()> {
    let mut row_desc = Vec::new();
    row_desc.extend_from_slice(&2u16.to_be_bytes());
    row_desc.extend_from_slice(b"systemid\0");
    row_desc.extend_from_slice(b"timeline\0");
    proto::write_message(transport, proto::TAG_ROW_DESCRIPTION, &row_desc).await?;

    let system_id_text = system_id.to_string();
    let timeline_text = timeline_id.to_string();
    let mut row = Vec::new();
    row.extend_from_slice(&2u16.to_be_bytes());
    row.extend_from_slice(&(system_id_text.len() as i32).to_be_bytes());
    row.extend_from_slice(system_id_text.as_bytes());
    row.extend_from_slice(&(timeline_text.len() as i32).to_be_bytes());
    row.extend_from_slice(timeline_text.as_bytes());
    proto::write_message(transport, proto::TAG_DATA_ROW, &row).await?;

    proto::write_command_complete(transport, "SELECT").await?;
    proto::write_ready_for_query(transport).await?;
    Ok(())
}
