//! The log reader: translates a log position into segment file
//! reads, caching one open segment and detecting post-hoc recycling.

use std::fs::File;
use std::io::{ErrorKind, Seek, SeekFrom};
use std::sync::Arc;

use crate::collaborators::WalSource;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pos::LogPosition;

/// Per-sender, exclusively owned: at most one open segment file plus the
/// cursor identifying it.
pub struct LogReader<W> {
    wal: Arc<W>,
    open: Option<(u32, u32, File)>,
    send_off: u32,
}

impl<W: WalSource> LogReader<W> {
    pub fn new(wal: Arc<W>) -> Self {
        Self {
            wal,
            open: None,
            send_off: 0,
        }
    }

    /// Copies exactly `dst.len()` bytes of WAL starting at `pos`. Caller
    /// guarantees `pos + dst.len() <= durable_flush_pos()` at call time.
    pub fn read_bytes(&mut self, dst: &mut [u8], pos: LogPosition, config: &Config) -> Result<()> {
        let start_pos = pos;
        let mut cur = pos;
        let mut remaining = dst.len();
        let mut written = 0usize;

        while remaining > 0 {
            let seg_off = cur.seg_off(config.seg_size);
            let seg_no = cur.seg_no(config.seg_size);

            let need_reopen = match &self.open {
                Some((log_id, seg, _)) => *log_id != cur.log_id || *seg != seg_no,
                None => true,
            };

            if need_reopen {
                self.open = None;
                let path = self.wal.segment_path(cur.log_id, seg_no);
                let file = File::open(&path).map_err(|e| {
                    if e.kind() == ErrorKind::NotFound {
                        Error::WalRemoved(path.display().to_string())
                    } else {
                        Error::Io(e)
                    }
                })?;
                self.open = Some((cur.log_id, seg_no, file));
                self.send_off = u32::MAX; // force a seek below
            }

            let (_, _, file) = self.open.as_mut().expect("just set");
            if self.send_off != seg_off {
                file.seek(SeekFrom::Start(seg_off as u64))?;
            }

            let chunk_len = std::cmp::min(remaining, (config.seg_size - seg_off) as usize);
            read_exact(file, &mut dst[written..written + chunk_len])?;

            written += chunk_len;
            remaining -= chunk_len;
            self.send_off = seg_off + chunk_len as u32;
            cur = cur.advance(chunk_len as u32, config.file_size);
        }

        let (removed_log, removed_seg) = self.wal.last_removed();
        let start_seg_no = start_pos.seg_no(config.seg_size);
        if (start_pos.log_id, start_seg_no) <= (removed_log, removed_seg) {
            let path = self
                .wal
                .segment_path(start_pos.log_id, start_seg_no);
            return Err(Error::WalRemoved(path.display().to_string()));
        }

        Ok(())
    }
}

fn read_exact(file: &mut File, buf: &mut [u8]) -> Result<()> {
    use std::io::Read;
    file.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "short read from segment file",
            ))
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeWal;
    use tempfile::tempdir;

    #[test]
    fn reads_within_one_segment() {
        let dir = tempdir().unwrap();
        let config = Config {
            seg_size: 1024,
            file_size: 1024,
            ..Config::default()
        };
        let wal = Arc::new(FakeWal::with_segment(dir.path(), 0, 0, &vec![7u8; 1024]));
        let mut reader = LogReader::new(wal);

        let mut buf = vec![0u8; 100];
        reader
            .read_bytes(&mut buf, LogPosition::new(0, 10), &config)
            .unwrap();
        assert!(buf.iter().all(|b| *b == 7));
    }

    #[test]
    fn missing_segment_is_wal_removed() {
        let dir = tempdir().unwrap();
        let config = Config {
            seg_size: 1024,
            file_size: 1024,
            ..Config::default()
        };
        let wal = Arc::new(FakeWal::empty(dir.path()));
        let mut reader = LogReader::new(wal);
        let mut buf = vec![0u8; 10];
        let err = reader
            .read_bytes(&mut buf, LogPosition::new(0, 0), &config)
            .unwrap_err();
        assert!(matches!(err, Error::WalRemoved(_)));
    }

    #[test]
    fn recycled_segment_detected_after_read() {
        let dir = tempdir().unwrap();
        let config = Config {
            seg_size: 1024,
            file_size: 1024,
            ..Config::default()
        };
        let wal = Arc::new(FakeWal::with_segment(dir.path(), 0, 0, &vec![1u8; 1024]));
        wal.set_last_removed(0, 0);
        let mut reader = LogReader::new(wal);
        let mut buf = vec![0u8; 10];
        let err = reader
            .read_bytes(&mut buf, LogPosition::new(0, 0), &config)
            .unwrap_err();
        assert!(matches!(err, Error::WalRemoved(_)));
    }

    #[test]
    fn crosses_segment_boundary() {
        let dir = tempdir().unwrap();
        let config = Config {
            seg_size: 1024,
            file_size: 2048,
            ..Config::default()
        };
        let wal = Arc::new(FakeWal::empty(dir.path()));
        wal.add_segment(0, 0, &vec![1u8; 1024]);
        wal.add_segment(0, 1, &vec![2u8; 1024]);
        let mut reader = LogReader::new(wal);

        let mut buf = vec![0u8; 20];
        reader
            .read_bytes(&mut buf, LogPosition::new(0, 1020), &config)
            .unwrap();
        assert!(buf[..4].iter().all(|b| *b == 1));
        assert!(buf[4..].iter().all(|b| *b == 2));
    }
}
