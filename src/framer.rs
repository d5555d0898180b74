//! The framer/batcher: picks the next `[start, end)` WAL slice and
//! writes one `'d'` CopyData frame.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::collaborators::WalSource;
use crate::config::Config;
use crate::error::Result;
use crate::pos::LogPosition;
use crate::proto::frame::{FrameHeader, FRAME_TAG};
use crate::proto::{self, TAG_COPY_DATA};
use crate::reader::LogReader;
use zerocopy::AsBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing durable beyond `sent_pos`; caller should treat this as
    /// caught up.
    NoFrame,
    Sent { bytes: usize, caught_up: bool },
}

pub struct Framer<W> {
    reader: LogReader<W>,
    wal: Arc<W>,
    buf: Vec<u8>,
}

impl<W: WalSource> Framer<W> {
    pub fn new(wal: Arc<W>, config: &Config) -> Self {
        let cap = 1 + FrameHeader::SIZE + config.max_frame as usize;
        Self {
            reader: LogReader::new(wal.clone()),
            wal,
            buf: vec![0u8; cap],
        }
    }

    /// Builds and sends one frame if there is new durable WAL beyond
    /// `sent_pos`, advancing `sent_pos` on success.
    #[tracing::instrument(skip_all, fields(sent_pos = %sent_pos))]
    pub async fn build_and_send<T: AsyncWrite + Unpin>(
        &mut self,
        transport: &mut T,
        sent_pos: &mut LogPosition,
        config: &Config,
        now_micros: impl FnOnce() -> i64,
    ) -> Result<FrameOutcome> {
        let req = self.wal.durable_flush_pos();
        if req <= *sent_pos {
            return Ok(FrameOutcome::NoFrame);
        }

        let start = sent_pos.skip_reserved_segment(config.file_size);

        let mut end = start.advance(config.max_frame, config.file_size);
        if end.log_id != start.log_id {
            end = LogPosition::new(start.log_id, config.file_size);
        }

        let caught_up = if end >= req {
            end = req;
            true
        } else {
            end = end.round_down_to_page(config.page_size);
            false
        };

        let nbytes = start.bytes_until(end) as usize;
        if nbytes == 0 {
            return Ok(FrameOutcome::NoFrame);
        }

        let hdr_size = FrameHeader::SIZE;
        self.buf[0] = FRAME_TAG;
        let data_region = &mut self.buf[1 + hdr_size..1 + hdr_size + nbytes];
        self.reader.read_bytes(data_region, start, config)?;

        // Header is filled after the read so the send timestamp is taken as
        // late as possible.
        let header = FrameHeader::new(start.to_packed(), req.to_packed(), now_micros());
        self.buf[1..1 + hdr_size].copy_from_slice(header.as_bytes());

        let payload = &self.buf[..1 + hdr_size + nbytes];
        proto::write_message(transport, TAG_COPY_DATA, payload)
            .await
            .map_err(|_| crate::error::Error::TransportClosed)?;
        transport
            .flush()
            .await
            .map_err(|_| crate::error::Error::TransportClosed)?;

        *sent_pos = end;

        Ok(FrameOutcome::Sent {
            bytes: nbytes,
            caught_up,
        })
    }
}
