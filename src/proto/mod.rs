//! Typed-message wire framing: one leading type byte, a big-endian
//! `i32` length (including itself), then payload.

pub mod frame;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const TAG_QUERY: u8 = b'Q';
pub const TAG_TERMINATE: u8 = b'X';
pub const TAG_ROW_DESCRIPTION: u8 = b'T';
pub const TAG_DATA_ROW: u8 = b'D';
pub const TAG_COMMAND_COMPLETE: u8 = b'C';
pub const TAG_READY_FOR_QUERY: u8 = b'Z';
pub const TAG_COPY_BOTH_RESPONSE: u8 = b'W';
pub const TAG_COPY_DATA: u8 = b'd';

/// Maximum accepted message length, guarding against a hostile or corrupt
/// peer advertising an unbounded length prefix.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// One message read off the wire during the handshake phase: its type tag
/// and payload (length prefix and tag already stripped).
#[derive(Debug, Clone)]
pub struct Message {
    pub tag: u8,
    pub payload: Bytes,
}

/// Reads one typed message, or `None` on a clean EOF before any bytes of a
/// new message were read.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Message>> {
    let mut tag_buf = [0u8; 1];
    match r.read_exact(&mut tag_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }
    let tag = tag_buf[0];

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let total_len = i32::from_be_bytes(len_buf);
    if total_len < 4 {
        return Err(Error::ProtocolViolation(format!(
            "message length {total_len} smaller than the length field itself"
        )));
    }
    let payload_len = total_len as usize - 4;
    if payload_len > MAX_MESSAGE_LEN {
        return Err(Error::ProtocolViolation(format!(
            "message length {payload_len} exceeds the maximum of {MAX_MESSAGE_LEN}"
        )));
    }

    let mut payload = BytesMut::zeroed(payload_len);
    r.read_exact(&mut payload).await?;

    Ok(Some(Message {
        tag,
        payload: payload.freeze(),
    }))
}

/// Writes one typed message with the given tag and payload.
pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    let total_len = (payload.len() + 4) as i32;
    let mut header = Vec::with_capacity(5);
    header.push(tag);
    header.extend_from_slice(&total_len.to_be_bytes());
    w.write_all(&header).await?;
    w.write_all(payload).await?;
    Ok(())
}

pub async fn write_ready_for_query<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    write_message(w, TAG_READY_FOR_QUERY, b"I").await
}

pub async fn write_command_complete<W: AsyncWrite + Unpin>(w: &mut W, tag: &str) -> Result<()> {
    let mut payload = tag.as_bytes().to_vec();
    payload.push(0);
    write_message(w, TAG_COMMAND_COMPLETE, &payload).await
}

pub async fn write_copy_both_response<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    // format = 0 (textual/binary unspecified), zero result columns.
    write_message(w, TAG_COPY_BOTH_RESPONSE, &[0u8, 0, 0]).await
}
