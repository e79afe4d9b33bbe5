use crate::sys::{self, Transport};
use crate::{
    Batch, ClientType, DevCmd, DeviceConfig, DeviceError, Op, RegBuf, RegOffsetCfg, RegRdCfg,
    RegWrCfg, SetInfoCfg,
};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Command channel to one hardware client.
///
/// Configuration calls only queue work. [`submit`](Self::submit) sends the
/// queue as one command and [`poll`](Self::poll) waits for it.
pub struct Device {
    client: ClientType,
    transport: Box<dyn Transport>,
    pending: Batch,
    pending_reads: Vec<RegBuf>,
    // read destinations of submitted, not yet polled commands, oldest first
    in_flight: VecDeque<Vec<RegBuf>>,
    poll_timeout: Duration,
    closed: bool,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("client", &self.client)
            .field("transport", &self.transport.name())
            .field("pending", &self.pending.ops.len())
            .field("in_flight", &self.in_flight.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Connect to `client` using the transport selected by `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceUnavailable`] if the connection cannot be
    /// established.
    pub fn open(client: ClientType, cfg: &DeviceConfig) -> Result<Self, DeviceError> {
        let transport = sys::open(client, cfg).inspect_err(|e| {
            log::error!("failed to open {:?} transport for {client:?}: {e}", cfg.transport);
        })?;
        Ok(Self::with_transport(client, transport, cfg.poll_timeout()))
    }

    /// Wrap an already connected transport.
    #[must_use]
    pub fn with_transport(
        client: ClientType,
        transport: Box<dyn Transport>,
        poll_timeout: Duration,
    ) -> Self {
        log::info!("device channel open: client {client:?} via {}", transport.name());
        Self {
            client,
            transport,
            pending: Batch::new(client),
            pending_reads: Vec::new(),
            in_flight: VecDeque::new(),
            poll_timeout,
            closed: false,
        }
    }

    /// Client this channel talks to.
    #[must_use]
    pub const fn client(&self) -> ClientType {
        self.client
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.ops.len()
    }

    /// Number of submitted commands waiting to be polled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Current poll timeout.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Change the poll timeout.
    pub const fn set_poll_timeout(&mut self, timeout: Duration) {
        self.poll_timeout = timeout;
    }

    const fn check_open(&self) -> Result<(), DeviceError> {
        if self.closed {
            Err(DeviceError::Closed)
        } else {
            Ok(())
        }
    }

    /// Queue a write of `reg` at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidArgument`] if `reg` is empty.
    pub fn reg_write(&mut self, reg: &[u8], offset: u32) -> Result<(), DeviceError> {
        let size = u32::try_from(reg.len())
            .map_err(|_| DeviceError::InvalidArgument("register buffer too large".into()))?;
        self.enqueue_write(RegWrCfg {
            reg: Some(reg),
            size,
            offset,
        })
    }

    /// Queue a read of `size` bytes at byte `offset` into `reg`.
    ///
    /// `reg` is filled when the command completes.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidArgument`] if `size` is zero or exceeds
    /// the buffer.
    pub fn reg_read(&mut self, reg: &RegBuf, size: u32, offset: u32) -> Result<(), DeviceError> {
        self.enqueue_read(RegRdCfg {
            reg: Some(reg.clone()),
            size,
            offset,
        })
    }

    fn enqueue_write(&mut self, cfg: RegWrCfg<'_>) -> Result<(), DeviceError> {
        self.check_open()?;
        let reg = cfg
            .reg
            .ok_or_else(|| DeviceError::InvalidArgument("missing write buffer".into()))?;
        let size = cfg.size as usize;
        if size == 0 || size > reg.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "write size {size} with {} byte buffer",
                reg.len()
            )));
        }
        self.pending.ops.push(Op::Write {
            offset: cfg.offset,
            data: reg[..size].to_vec(),
        });
        Ok(())
    }

    fn enqueue_read(&mut self, cfg: RegRdCfg) -> Result<(), DeviceError> {
        self.check_open()?;
        let reg = cfg
            .reg
            .ok_or_else(|| DeviceError::InvalidArgument("missing read buffer".into()))?;
        let size = cfg.size as usize;
        if size == 0 || size > reg.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "read size {size} with {} byte buffer",
                reg.len()
            )));
        }
        self.pending.ops.push(Op::Read {
            offset: cfg.offset,
            size: cfg.size,
        });
        self.pending_reads.push(reg);
        Ok(())
    }

    /// Queue an offset patch of register `reg_idx`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] after `close`.
    pub fn reg_offset(&mut self, reg_idx: u32, offset: u32) -> Result<(), DeviceError> {
        self.check_open()?;
        self.pending.ops.push(Op::Patch(RegOffsetCfg { reg_idx, offset }));
        Ok(())
    }

    /// Queue out-of-band metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Closed`] after `close`.
    pub fn set_info(&mut self, kind: u32, flag: u32, data: u64) -> Result<(), DeviceError> {
        self.check_open()?;
        self.pending.ops.push(Op::Info(SetInfoCfg { kind, flag, data }));
        Ok(())
    }

    /// Send all queued operations as one command.
    ///
    /// An empty queue is a no-op. On success the queue is cleared; on failure
    /// it is kept so the caller may reset or retry.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceIo`] if the transport fails.
    pub fn submit(&mut self) -> Result<(), DeviceError> {
        self.check_open()?;
        if self.pending.is_empty() {
            log::warn!("{:?}: submit with nothing queued", self.client);
            return Ok(());
        }
        self.transport.send(&self.pending).inspect_err(|e| {
            log::error!("{:?}: send failed: {e}", self.client);
        })?;
        log::debug!("{:?}: sent {} ops", self.client, self.pending.ops.len());
        self.pending.ops.clear();
        self.in_flight.push_back(std::mem::take(&mut self.pending_reads));
        Ok(())
    }

    /// Wait for the oldest submitted command and return its status word.
    ///
    /// Its queued reads are filled in before this returns. A timeout leaves
    /// the command in flight so it can be polled again.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidState`] without a preceding submit,
    /// [`DeviceError::Timeout`] or [`DeviceError::DeviceIo`] on transport failure.
    pub fn poll(&mut self) -> Result<u32, DeviceError> {
        self.check_open()?;
        if self.in_flight.is_empty() {
            return Err(DeviceError::InvalidState("poll without submit"));
        }
        let result = self.transport.poll(self.poll_timeout);
        if matches!(result, Err(DeviceError::Timeout(_))) {
            log::warn!("{:?}: poll timed out after {:?}", self.client, self.poll_timeout);
            return result.map(|done| done.status);
        }
        let reads = self.in_flight.pop_front().unwrap_or_default();
        let done = result.inspect_err(|e| log::error!("{:?}: poll failed: {e}", self.client))?;
        if done.reads.len() != reads.len() {
            return Err(DeviceError::DeviceIo(format!(
                "expected {} reads, completion carried {}",
                reads.len(),
                done.reads.len()
            )));
        }
        for (dst, src) in reads.iter().zip(&done.reads) {
            dst.fill(src);
        }
        log::debug!("{:?}: completed with status {:#x}", self.client, done.status);
        Ok(done.status)
    }

    /// Execute one ioctl-style command.
    ///
    /// Returns the status word for [`DevCmd::CmdPoll`] and zero otherwise.
    ///
    /// # Errors
    ///
    /// Whatever the mapped operation returns.
    pub fn ioctl(&mut self, cmd: DevCmd<'_>) -> Result<u32, DeviceError> {
        match cmd {
            DevCmd::RegWr(cfg) => self.enqueue_write(cfg).map(|()| 0),
            DevCmd::RegRd(cfg) => self.enqueue_read(cfg).map(|()| 0),
            DevCmd::RegOffset(cfg) => self.reg_offset(cfg.reg_idx, cfg.offset).map(|()| 0),
            DevCmd::SetInfo(cfg) => self.set_info(cfg.kind, cfg.flag, cfg.data).map(|()| 0),
            DevCmd::CmdSend => self.submit().map(|()| 0),
            DevCmd::CmdPoll => self.poll(),
        }
    }

    /// Drop queued operations, leaving submitted commands in flight.
    pub fn discard_pending(&mut self) {
        self.pending.ops.clear();
        self.pending_reads.clear();
    }

    /// Drop operations queued after the first `len`, keeping the earlier
    /// ones for the next submission.
    pub fn truncate_pending(&mut self, len: usize) {
        let Some(dropped) = self.pending.ops.get(len..) else {
            return;
        };
        let reads = dropped
            .iter()
            .filter(|op| matches!(op, Op::Read { .. }))
            .count();
        let keep = self.pending_reads.len().saturating_sub(reads);
        self.pending_reads.truncate(keep);
        self.pending.ops.truncate(len);
    }

    /// Drop queued and in-flight work so a fresh command can be submitted.
    pub fn reset(&mut self) {
        if !self.in_flight.is_empty() || !self.pending.is_empty() {
            log::debug!(
                "{:?}: reset voids {} queued ops and {} commands in flight",
                self.client,
                self.pending.ops.len(),
                self.in_flight.len()
            );
        }
        self.discard_pending();
        self.in_flight.clear();
        if !self.closed {
            if let Err(e) = self.transport.reset() {
                log::warn!("{:?}: transport reset failed: {e}", self.client);
            }
        }
    }

    /// Release the connection. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceIo`] if the transport did not shut down
    /// cleanly; the channel is closed regardless.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }
        self.reset();
        self.closed = true;
        log::info!("device channel close: client {:?}", self.client);
        self.transport.close()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{:?}: close on drop failed: {e}", self.client);
        }
    }
}
