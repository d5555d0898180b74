//! The `'d'` CopyData frame payload layout: a one-byte tag, then a fixed
//! header, then the raw WAL slice. Field layout mirrors `segment::FrameHeader`
//! (zerocopy, explicit byte order) but uses network (big-endian) order since
//! this header crosses the wire rather than living on disk.

use zerocopy::byteorder::{I64, U64};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes};

pub const FRAME_TAG: u8 = b'w';

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    data_start: U64<BigEndian>,
    wal_end: U64<BigEndian>,
    send_time_micros: I64<BigEndian>,
}

impl FrameHeader {
    pub const SIZE: usize = std::mem::size_of::<FrameHeader>();

    pub fn new(data_start: u64, wal_end: u64, send_time_micros: i64) -> Self {
        Self {
            data_start: data_start.into(),
            wal_end: wal_end.into(),
            send_time_micros: send_time_micros.into(),
        }
    }

    pub fn data_start(&self) -> u64 {
        self.data_start.get()
    }

    pub fn wal_end(&self) -> u64 {
        self.wal_end.get()
    }

    pub fn send_time_micros(&self) -> i64 {
        self.send_time_micros.get()
    }
}
