//! Ioctl-style command set and the batch a channel hands to its transport.

use crate::ClientType;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Commands understood by [`Device::ioctl`](crate::Device::ioctl).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoctlCmd {
    /// Queue a register write.
    RegWr,
    /// Queue a register read.
    RegRd,
    /// Queue a register offset patch.
    RegOffset,
    /// Queue out-of-band metadata.
    SetInfo,
    /// Send the queued batch to hardware.
    CmdSend,
    /// Wait for the oldest sent batch to complete.
    CmdPoll,
}

impl IoctlCmd {
    /// Numeric command id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// Register buffer shared between the caller and a pending read.
///
/// Reads are filled in when the channel observes completion, so the caller
/// keeps a clone and inspects it after `poll`.
#[derive(Clone, Default)]
pub struct RegBuf(Arc<Mutex<Vec<u8>>>);

impl RegBuf {
    /// Zeroed buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0; len])))
    }

    /// Buffer holding `data`.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(data)))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Little-endian word at byte offset `at`, if in range.
    #[must_use]
    pub fn word(&self, at: usize) -> Option<u32> {
        let data = self.lock();
        let bytes = data.get(at..at.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn fill(&self, src: &[u8]) {
        let mut data = self.lock();
        let n = src.len().min(data.len());
        data[..n].copy_from_slice(&src[..n]);
    }
}

impl fmt::Debug for RegBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegBuf").field("len", &self.len()).finish()
    }
}

/// Payload of [`IoctlCmd::RegWr`].
#[derive(Debug, Clone, Copy)]
pub struct RegWrCfg<'a> {
    /// Source register bytes.
    pub reg: Option<&'a [u8]>,
    /// Number of bytes to write.
    pub size: u32,
    /// Byte offset of the first register.
    pub offset: u32,
}

/// Payload of [`IoctlCmd::RegRd`].
#[derive(Debug, Clone)]
pub struct RegRdCfg {
    /// Destination buffer, filled on completion.
    pub reg: Option<RegBuf>,
    /// Number of bytes to read.
    pub size: u32,
    /// Byte offset of the first register.
    pub offset: u32,
}

/// Payload of [`IoctlCmd::RegOffset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOffsetCfg {
    /// Index of the 32-bit register to patch.
    pub reg_idx: u32,
    /// Byte offset added to the register value.
    pub offset: u32,
}

/// Payload of [`IoctlCmd::SetInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetInfoCfg {
    /// Type tag.
    pub kind: u32,
    /// Flag word.
    pub flag: u32,
    /// Value.
    pub data: u64,
}

/// A command together with its payload.
#[derive(Debug, Clone)]
pub enum DevCmd<'a> {
    /// See [`IoctlCmd::RegWr`].
    RegWr(RegWrCfg<'a>),
    /// See [`IoctlCmd::RegRd`].
    RegRd(RegRdCfg),
    /// See [`IoctlCmd::RegOffset`].
    RegOffset(RegOffsetCfg),
    /// See [`IoctlCmd::SetInfo`].
    SetInfo(SetInfoCfg),
    /// See [`IoctlCmd::CmdSend`].
    CmdSend,
    /// See [`IoctlCmd::CmdPoll`].
    CmdPoll,
}

impl DevCmd<'_> {
    /// The command this payload belongs to.
    #[must_use]
    pub const fn cmd(&self) -> IoctlCmd {
        match self {
            Self::RegWr(_) => IoctlCmd::RegWr,
            Self::RegRd(_) => IoctlCmd::RegRd,
            Self::RegOffset(_) => IoctlCmd::RegOffset,
            Self::SetInfo(_) => IoctlCmd::SetInfo,
            Self::CmdSend => IoctlCmd::CmdSend,
            Self::CmdPoll => IoctlCmd::CmdPoll,
        }
    }
}

/// One queued operation, in the order it was configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Write `data` starting at byte `offset`.
    Write {
        /// Byte offset.
        offset: u32,
        /// Register bytes.
        data: Vec<u8>,
    },
    /// Read `size` bytes starting at byte `offset` once the command completes.
    Read {
        /// Byte offset.
        offset: u32,
        /// Byte count.
        size: u32,
    },
    /// Add an offset to an address register.
    Patch(RegOffsetCfg),
    /// Metadata.
    Info(SetInfoCfg),
}

/// Everything queued on a channel between two submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Client the batch is addressed to.
    pub client: ClientType,
    /// Operations in configuration order.
    pub ops: Vec<Op>,
}

impl Batch {
    pub(crate) const fn new(client: ClientType) -> Self {
        Self {
            client,
            ops: Vec::new(),
        }
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of read operations, which is also the number of entries a
    /// [`Completion`] must carry.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Read { .. }))
            .count()
    }
}

/// Result of a completed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Hardware status word.
    pub status: u32,
    /// Data for each read, in the order the reads were queued.
    pub reads: Vec<Vec<u8>>,
}
