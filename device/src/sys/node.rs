//! Device node transport.
//!
//! Each batch is written to the node as one record and each completion is read
//! back as one record. All fields are little-endian.
//!
//! ```text
//! batch:      magic u32 | client u32 | count u32 | op*
//! op:         tag u32 | fields
//!   write     tag 0 | offset u32 | len u32 | bytes
//!   read      tag 1 | offset u32 | size u32
//!   patch     tag 2 | reg_idx u32 | offset u32
//!   info      tag 3 | kind u32 | flag u32 | data u64
//! reset:      reset magic u32 | client u32 | token u32
//!
//! completion: done tag u32 | status u32 | count u32 | (len u32 | bytes)*
//! reset ack:  ack tag u32 | token u32
//! ```
//!
//! The node is read without blocking. Bytes are buffered until a whole
//! record has arrived, so a completion delivered in pieces is decoded once.
//! After a reset, completions are discarded until the acknowledgement
//! carrying the reset token comes back.

use super::Transport;
use crate::{Batch, ClientType, Completion, DeviceError, Op};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Cursor, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::{Duration, Instant};

const BATCH_MAGIC: u32 = 0x4d50_5043;
const RESET_MAGIC: u32 = 0x4d50_5052;
const REC_DONE: u32 = 0x4d50_4344;
const REC_ACK: u32 = 0x4d50_4b41;
const TAG_WRITE: u32 = 0;
const TAG_READ: u32 = 1;
const TAG_PATCH: u32 = 2;
const TAG_INFO: u32 = 3;
const RETRY_INTERVAL: Duration = Duration::from_millis(1);
const RX_CHUNK: usize = 4096;

trait Stream: Read + Write + Send + fmt::Debug {}

impl<T: Read + Write + Send + fmt::Debug> Stream for T {}

/// A hardware client reached through a device node.
#[derive(Debug)]
pub struct NodeDevice {
    path: String,
    client: ClientType,
    io: Option<Box<dyn Stream>>,
    rx: Vec<u8>,
    // read sizes of each sent command, oldest first
    expected: VecDeque<Vec<u32>>,
    // token of a reset whose acknowledgement has not arrived
    resync: Option<u32>,
    next_token: u32,
}

impl NodeDevice {
    /// Open `path` for the given client.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceUnavailable`] if the node cannot be opened.
    pub fn open(path: &str, client: ClientType) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| DeviceError::DeviceUnavailable(format!("{path}: {e}")))?;
        log::debug!("opened {path} for {client:?}");
        Ok(Self::from_stream(path, client, file))
    }

    /// Speak the node protocol over an already connected stream.
    ///
    /// Reads from `stream` must not block; a read with nothing available
    /// has to fail with [`io::ErrorKind::WouldBlock`].
    pub fn from_stream<S>(name: &str, client: ClientType, stream: S) -> Self
    where
        S: Read + Write + Send + fmt::Debug + 'static,
    {
        Self {
            path: name.to_string(),
            client,
            io: Some(Box::new(stream)),
            rx: Vec::new(),
            expected: VecDeque::new(),
            resync: None,
            next_token: 1,
        }
    }

    fn stream(&mut self) -> Result<&mut Box<dyn Stream>, DeviceError> {
        self.io.as_mut().ok_or(DeviceError::Closed)
    }

    fn write_record(&mut self, record: &[u8]) -> Result<(), DeviceError> {
        let stream = self.stream()?;
        let mut rest = record;
        while !rest.is_empty() {
            match stream.write(rest) {
                Ok(0) => return Err(DeviceError::DeviceIo("node accepted no bytes".into())),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RETRY_INTERVAL),
                Err(e) => return Err(io_err(&e)),
            }
        }
        stream.flush().map_err(|e| io_err(&e))
    }

    /// Move whatever the node has ready into the receive buffer.
    fn fill(&mut self) -> Result<(), DeviceError> {
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            let read = self.stream()?.read(&mut chunk);
            match read {
                Ok(0) => return Ok(()),
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(io_err(&e)),
            }
        }
    }

    /// Decode buffered records until a completion for the oldest command
    /// turns up.
    fn take_completion(&mut self) -> Result<Option<Completion>, DeviceError> {
        loop {
            let sizes = if self.resync.is_some() {
                None
            } else {
                Some(self.expected.front().map_or(&[][..], Vec::as_slice))
            };
            let (record, used) = match decode_record(&self.rx, sizes) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(None),
                Err(e) => {
                    // the stream cannot be trusted past a malformed record
                    self.rx.clear();
                    self.expected.pop_front();
                    return Err(e);
                }
            };
            self.rx.drain(..used);
            match record {
                Record::Ack(token) if self.resync == Some(token) => {
                    log::debug!("{}: reset {token} acknowledged", self.path);
                    self.resync = None;
                }
                Record::Ack(token) => log::debug!("{}: stale reset ack {token}", self.path),
                Record::Done(_) if self.resync.is_some() => {
                    log::debug!("{}: dropping completion voided by reset", self.path);
                }
                Record::Done(done) => {
                    self.expected.pop_front();
                    return Ok(Some(done));
                }
            }
        }
    }
}

fn io_err(e: &io::Error) -> DeviceError {
    DeviceError::DeviceIo(e.to_string())
}

fn len_u32(n: usize) -> io::Result<u32> {
    u32::try_from(n).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflows u32"))
}

pub(crate) fn encode_batch<W: Write>(out: &mut W, batch: &Batch) -> io::Result<()> {
    out.write_u32::<LittleEndian>(BATCH_MAGIC)?;
    out.write_u32::<LittleEndian>(batch.client.id())?;
    out.write_u32::<LittleEndian>(len_u32(batch.ops.len())?)?;
    for op in &batch.ops {
        match op {
            Op::Write { offset, data } => {
                out.write_u32::<LittleEndian>(TAG_WRITE)?;
                out.write_u32::<LittleEndian>(*offset)?;
                out.write_u32::<LittleEndian>(len_u32(data.len())?)?;
                out.write_all(data)?;
            }
            Op::Read { offset, size } => {
                out.write_u32::<LittleEndian>(TAG_READ)?;
                out.write_u32::<LittleEndian>(*offset)?;
                out.write_u32::<LittleEndian>(*size)?;
            }
            Op::Patch(cfg) => {
                out.write_u32::<LittleEndian>(TAG_PATCH)?;
                out.write_u32::<LittleEndian>(cfg.reg_idx)?;
                out.write_u32::<LittleEndian>(cfg.offset)?;
            }
            Op::Info(cfg) => {
                out.write_u32::<LittleEndian>(TAG_INFO)?;
                out.write_u32::<LittleEndian>(cfg.kind)?;
                out.write_u32::<LittleEndian>(cfg.flag)?;
                out.write_u64::<LittleEndian>(cfg.data)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Record {
    Done(Completion),
    Ack(u32),
}

/// Decode one record from the front of `buf`.
///
/// Returns the record and the bytes it used, or `None` while the record is
/// incomplete. With `sizes`, a completion must carry exactly that many reads,
/// each no longer than its queued size.
pub(crate) fn decode_record(
    buf: &[u8],
    sizes: Option<&[u32]>,
) -> Result<Option<(Record, usize)>, DeviceError> {
    let mut cur = Cursor::new(buf);
    match read_record(&mut cur, sizes) {
        Ok(record) => Ok(Some((record, usize::try_from(cur.position()).unwrap_or(buf.len())))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(io_err(&e)),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn read_record(cur: &mut Cursor<&[u8]>, sizes: Option<&[u32]>) -> io::Result<Record> {
    match cur.read_u32::<LittleEndian>()? {
        REC_ACK => Ok(Record::Ack(cur.read_u32::<LittleEndian>()?)),
        REC_DONE => {
            let status = cur.read_u32::<LittleEndian>()?;
            let count = cur.read_u32::<LittleEndian>()? as usize;
            if sizes.is_some_and(|s| s.len() != count) {
                return Err(invalid(format!(
                    "completion carries {count} reads, {} queued",
                    sizes.map_or(0, <[u32]>::len)
                )));
            }
            let mut reads = Vec::new();
            for i in 0..count {
                let len = cur.read_u32::<LittleEndian>()? as usize;
                let size = sizes.and_then(|s| s.get(i)).map_or(usize::MAX, |&n| n as usize);
                if len > size {
                    return Err(invalid(format!("read {i} carries {len} bytes, {size} queued")));
                }
                let rest = cur.get_ref().len().saturating_sub(cur.position() as usize);
                if len > rest {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                let mut data = vec![0; len];
                cur.read_exact(&mut data)?;
                reads.push(data);
            }
            Ok(Record::Done(Completion { status, reads }))
        }
        tag => Err(invalid(format!("unknown record tag {tag:#x}"))),
    }
}

impl Transport for NodeDevice {
    fn name(&self) -> &'static str {
        "node"
    }

    fn send(&mut self, batch: &Batch) -> Result<(), DeviceError> {
        let mut record = Vec::new();
        encode_batch(&mut record, batch).map_err(|e| io_err(&e))?;
        self.write_record(&record)?;
        let sizes = batch
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Read { size, .. } => Some(*size),
                _ => None,
            })
            .collect();
        self.expected.push_back(sizes);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Completion, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.fill()?;
            if let Some(done) = self.take_completion()? {
                return Ok(done);
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout(timeout));
            }
            thread::sleep(RETRY_INTERVAL);
        }
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        let mut record = Vec::with_capacity(12);
        record.write_u32::<LittleEndian>(RESET_MAGIC).map_err(|e| io_err(&e))?;
        record
            .write_u32::<LittleEndian>(self.client.id())
            .map_err(|e| io_err(&e))?;
        record.write_u32::<LittleEndian>(token).map_err(|e| io_err(&e))?;
        self.write_record(&record)?;
        log::debug!(
            "{}: reset {token} voids {} commands",
            self.path,
            self.expected.len()
        );
        self.expected.clear();
        self.resync = Some(token);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(stream) = self.io.take() {
            log::debug!("closing {} for {:?}", self.path, self.client);
            drop(stream);
        }
        self.rx.clear();
        self.expected.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegOffsetCfg, SetInfoCfg};

    fn done_record(status: u32, reads: &[&[u8]]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.write_u32::<LittleEndian>(REC_DONE).unwrap();
        raw.write_u32::<LittleEndian>(status).unwrap();
        raw.write_u32::<LittleEndian>(u32::try_from(reads.len()).unwrap()).unwrap();
        for read in reads {
            raw.write_u32::<LittleEndian>(u32::try_from(read.len()).unwrap()).unwrap();
            raw.extend_from_slice(read);
        }
        raw
    }

    #[test]
    fn batch_record_layout() {
        let batch = Batch {
            client: ClientType::Rkvdec,
            ops: vec![
                Op::Write {
                    offset: 0x10,
                    data: vec![0xaa, 0xbb, 0xcc, 0xdd],
                },
                Op::Patch(RegOffsetCfg {
                    reg_idx: 4,
                    offset: 0x80,
                }),
                Op::Info(SetInfoCfg {
                    kind: 1,
                    flag: 0,
                    data: 0x0102_0304_0506_0708,
                }),
            ],
        };
        let mut out = Vec::new();
        encode_batch(&mut out, &batch).unwrap();

        let mut words = Cursor::new(&out);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), BATCH_MAGIC);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), 5);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), 3);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), TAG_WRITE);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), 0x10);
        assert_eq!(words.read_u32::<LittleEndian>().unwrap(), 4);
        // header 12, write 12 + 4, patch 12, info 20
        assert_eq!(out.len(), 12 + 16 + 12 + 20);
        assert_eq!(&out[24..28], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn completion_record_is_parsed() {
        let mut raw = done_record(0x1, &[&[1, 2, 3, 4]]);
        raw.extend_from_slice(&[0xee; 3]);

        let (record, used) = decode_record(&raw, Some(&[4])).unwrap().unwrap();
        assert_eq!(used, 20);
        assert_eq!(
            record,
            Record::Done(Completion {
                status: 0x1,
                reads: vec![vec![1, 2, 3, 4]],
            })
        );
    }

    #[test]
    fn partial_record_waits_for_more_bytes() {
        let raw = done_record(0x1, &[&[1, 2, 3, 4]]);
        for cut in [0, 3, 6, 12, 19] {
            assert_eq!(decode_record(&raw[..cut], Some(&[4])), Ok(None), "cut at {cut}");
        }
    }

    #[test]
    fn oversized_lengths_are_rejected_without_allocating() {
        let mut huge_count = Vec::new();
        huge_count.write_u32::<LittleEndian>(REC_DONE).unwrap();
        huge_count.write_u32::<LittleEndian>(1).unwrap();
        huge_count.write_u32::<LittleEndian>(u32::MAX).unwrap();
        assert!(matches!(
            decode_record(&huge_count, Some(&[4])),
            Err(DeviceError::DeviceIo(_))
        ));
        // without queued sizes the record just never completes
        assert_eq!(decode_record(&huge_count, None), Ok(None));

        let mut huge_len = done_record(0x1, &[]);
        huge_len[8..12].copy_from_slice(&1u32.to_le_bytes());
        huge_len.write_u32::<LittleEndian>(u32::MAX).unwrap();
        assert!(matches!(
            decode_record(&huge_len, Some(&[4])),
            Err(DeviceError::DeviceIo(_))
        ));
    }

    #[test]
    fn unknown_record_tag_is_io_error() {
        assert!(matches!(
            decode_record(&[1, 0, 0, 0, 0, 0, 0, 0], None),
            Err(DeviceError::DeviceIo(_))
        ));
    }

    #[test]
    fn missing_node_is_unavailable() {
        let err = NodeDevice::open("/nonexistent/mpp_service", ClientType::Vdpu1).unwrap_err();
        assert!(matches!(err, DeviceError::DeviceUnavailable(_)));
    }
}
