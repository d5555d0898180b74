//! Parses the textual `Query` command sent during the handshake phase into
//! a typed `ReplicationCommand`.

use crate::error::{Error, Result};
use crate::pos::LogPosition;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BaseBackupOptions {
    pub label: Option<String>,
    pub progress: bool,
    pub fast_checkpoint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationCommand {
    IdentifySystem,
    StartReplication(LogPosition),
    BaseBackup(BaseBackupOptions),
}

/// Parses one command string, e.g. `"IDENTIFY_SYSTEM"`,
/// `"START_REPLICATION 3/FF00"`, or `"BASE_BACKUP LABEL 'x' PROGRESS FAST"`.
pub fn parse(input: &str) -> Result<ReplicationCommand> {
    let input = input.trim().trim_end_matches(';').trim();
    let mut tokens = input.split_whitespace();
    let keyword = tokens
        .next()
        .ok_or_else(|| Error::ProtocolViolation("empty command".into()))?;

    match keyword.to_ascii_uppercase().as_str() {
        "IDENTIFY_SYSTEM" => Ok(ReplicationCommand::IdentifySystem),
        "START_REPLICATION" => {
            let pos_tok = tokens
                .next()
                .ok_or_else(|| Error::ProtocolViolation("START_REPLICATION needs a position".into()))?;
            Ok(ReplicationCommand::StartReplication(parse_position(pos_tok)?))
        }
        "BASE_BACKUP" => {
            let mut opts = BaseBackupOptions::default();
            let rest: Vec<&str> = tokens.collect();
            let mut i = 0;
            while i < rest.len() {
                match rest[i].to_ascii_uppercase().as_str() {
                    "PROGRESS" => {
                        opts.progress = true;
                        i += 1;
                    }
                    "FAST" => {
                        opts.fast_checkpoint = true;
                        i += 1;
                    }
                    "LABEL" => {
                        let label = rest.get(i + 1).ok_or_else(|| {
                            Error::ProtocolViolation("LABEL needs a value".into())
                        })?;
                        opts.label = Some(label.trim_matches('\'').to_string());
                        i += 2;
                    }
                    other => {
                        return Err(Error::ProtocolViolation(format!(
                            "unexpected BASE_BACKUP option: {other}"
                        )))
                    }
                }
            }
            Ok(ReplicationCommand::BaseBackup(opts))
        }
        other => Err(Error::ProtocolViolation(format!("unknown command: {other}"))),
    }
}

fn parse_position(tok: &str) -> Result<LogPosition> {
    let (hi, lo) = tok
        .split_once('/')
        .ok_or_else(|| Error::ProtocolViolation(format!("malformed log position: {tok}")))?;
    let log_id = u32::from_str_radix(hi, 16)
        .map_err(|_| Error::ProtocolViolation(format!("malformed log position: {tok}")))?;
    let rec_off = u32::from_str_radix(lo, 16)
        .map_err(|_| Error::ProtocolViolation(format!("malformed log position: {tok}")))?;
    Ok(LogPosition::new(log_id, rec_off))
}
