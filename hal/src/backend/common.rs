//! Register session shared by the hardware backends.
//!
//! Every register image starts with the same header:
//!
//! | word | contents                                   |
//! |------|--------------------------------------------|
//! | 0    | coding type                                |
//! | 1    | slot index (bits 0..8), eos (bit 8)        |
//! | 2    | syntax length in bytes                     |
//! | 3    | stream base, patched with the task offset  |
//!
//! Backend-specific control words follow, then the parser's syntax payload
//! from `Layout::payload_start` on.

use crate::{CodingType, HalCfg, HalCmd, HalError, HalReply, HalTask, RegSet, TaskHandle};
use mppkit_device::{ClientType, Device, DeviceError, RegBuf};
use std::collections::{HashMap, VecDeque};

pub(crate) const REG_MODE: usize = 0;
pub(crate) const REG_TASK: usize = 1;
pub(crate) const REG_STRM_LEN: usize = 2;
pub(crate) const REG_STRM_BASE: usize = 3;

/// Slots addressable by the 8-bit index field of `REG_TASK`.
pub(crate) const MAX_TASKS: i32 = 256;

pub(crate) const STATUS_READY: u32 = 1 << 0;
pub(crate) const STATUS_BUS_ERR: u32 = 1 << 1;
pub(crate) const STATUS_STRM_ERR: u32 = 1 << 2;
pub(crate) const STATUS_HW_TIMEOUT: u32 = 1 << 3;
const STATUS_ERR_MASK: u32 = STATUS_BUS_ERR | STATUS_STRM_ERR | STATUS_HW_TIMEOUT;

/// Register geometry of one hardware block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    pub regs: usize,
    pub payload_start: usize,
    pub readback_start: usize,
    pub readback_count: usize,
}

impl Layout {
    fn readback_bytes(self) -> u32 {
        u32::try_from(self.readback_count * 4).unwrap_or(u32::MAX)
    }

    fn readback_offset(self) -> u32 {
        u32::try_from(self.readback_start * 4).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
struct InFlight {
    handle: TaskHandle,
    readback: RegBuf,
    // the task was released before its completion was collected
    orphaned: bool,
}

#[derive(Debug)]
pub(crate) struct HwSession {
    name: &'static str,
    coding: CodingType,
    layout: Layout,
    dev: Device,
    generated: HashMap<TaskHandle, RegSet>,
    in_flight: VecDeque<InFlight>,
}

impl HwSession {
    pub(crate) fn open(
        name: &'static str,
        coding: CodingType,
        client: ClientType,
        layout: Layout,
        cfg: &HalCfg,
    ) -> Result<Self, HalError> {
        if cfg.task_count > MAX_TASKS {
            return Err(HalError::InvalidArgument(format!(
                "{name}: {} tasks, at most {MAX_TASKS}",
                cfg.task_count
            )));
        }
        let dev = Device::open(client, &cfg.device)?;
        Ok(Self {
            name,
            coding,
            layout,
            dev,
            generated: HashMap::new(),
            in_flight: VecDeque::new(),
        })
    }

    /// Build the header and payload of `task`, let `extra` fill the
    /// backend-specific words and keep the image until `start`.
    pub(crate) fn generate(
        &mut self,
        task: &HalTask,
        extra: impl FnOnce(&mut RegSet) -> Result<(), HalError>,
    ) -> Result<(), HalError> {
        let handle = task.handle();
        if task.flags.skips_hw() {
            log::debug!("{}: slot {} has stream errors, no registers", self.name, handle.index());
            self.generated.remove(&handle);
            return Ok(());
        }
        let syntax_len = u32::try_from(task.syntax.len())
            .map_err(|_| HalError::InvalidArgument("syntax too large".into()))?;
        let slot = u32::try_from(handle.index())
            .ok()
            .filter(|&n| n < MAX_TASKS.unsigned_abs())
            .ok_or_else(|| HalError::InvalidArgument(format!("slot {}", handle.index())))?;

        let mut regs = RegSet::new(self.layout.regs);
        regs.set(REG_MODE, self.coding.raw())?;
        regs.set_bits(REG_TASK, 0, 8, slot)?;
        regs.set_bits(REG_TASK, 8, 1, u32::from(task.flags.eos))?;
        regs.set(REG_STRM_LEN, syntax_len)?;
        extra(&mut regs)?;
        regs.load(self.layout.payload_start, &task.syntax)?;
        self.generated.insert(handle, regs);
        Ok(())
    }

    pub(crate) fn start(&mut self, task: &HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        if task.flags.skips_hw() {
            log::debug!("{}: slot {} skips hardware", self.name, handle.index());
            return Ok(());
        }
        let regs = self.generated.remove(&handle).ok_or_else(|| {
            HalError::InvalidState(format!("no registers generated for slot {}", handle.index()))
        })?;
        let readback = RegBuf::new(self.layout.readback_count * 4);
        // metadata queued through control before this point stays queued
        let mark = self.dev.pending();
        let queued = self.queue(&regs, task.stream_offset, &readback);
        let sent = queued.and_then(|()| self.dev.submit());
        if let Err(e) = sent {
            self.dev.truncate_pending(mark);
            self.generated.insert(handle, regs);
            return Err(e.into());
        }
        self.in_flight.push_back(InFlight {
            handle,
            readback,
            orphaned: false,
        });
        Ok(())
    }

    fn queue(&mut self, regs: &RegSet, stream_offset: u32, readback: &RegBuf) -> Result<(), DeviceError> {
        self.dev.reg_write(&regs.to_bytes(), 0)?;
        if stream_offset != 0 {
            self.dev
                .reg_offset(u32::try_from(REG_STRM_BASE).unwrap_or(u32::MAX), stream_offset)?;
        }
        if self.layout.readback_count > 0 {
            self.dev.reg_read(
                readback,
                self.layout.readback_bytes(),
                self.layout.readback_offset(),
            )?;
        }
        Ok(())
    }

    pub(crate) fn wait(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        if task.flags.skips_hw() {
            return Ok(());
        }
        self.drain_orphans()?;
        match self.in_flight.front() {
            Some(oldest) if oldest.handle == handle => {}
            Some(oldest) => {
                return Err(HalError::InvalidState(format!(
                    "slot {} waited before slot {}",
                    handle.index(),
                    oldest.handle.index()
                )));
            }
            None => {
                return Err(HalError::InvalidState(format!(
                    "slot {} has no command in flight",
                    handle.index()
                )));
            }
        }
        let status = match self.dev.poll() {
            Ok(status) => status,
            Err(e @ DeviceError::Timeout(_)) => return Err(e.into()),
            Err(e) => {
                self.in_flight.pop_front();
                return Err(e.into());
            }
        };
        let readback = self
            .in_flight
            .pop_front()
            .map(|c| c.readback)
            .unwrap_or_default();
        task.hw_status = Some(status);
        task.readback = (0..self.layout.readback_count)
            .filter_map(|i| readback.word(i * 4))
            .collect();
        if status & STATUS_READY == 0 || status & STATUS_ERR_MASK != 0 {
            log::warn!("{}: slot {} hardware status {status:#x}", self.name, handle.index());
            task.flags.hw_err = true;
        }
        Ok(())
    }

    /// Collect completions of released tasks ahead of the next live one.
    fn drain_orphans(&mut self) -> Result<(), HalError> {
        while self.in_flight.front().is_some_and(|c| c.orphaned) {
            match self.dev.poll() {
                Err(e @ DeviceError::Timeout(_)) => return Err(e.into()),
                Err(e) => log::warn!("{}: released task failed: {e}", self.name),
                Ok(status) => log::debug!("{}: released task done, {status:#x}", self.name),
            }
            self.in_flight.pop_front();
        }
        Ok(())
    }

    /// Drop everything kept for a task whose slot was released.
    pub(crate) fn forget(&mut self, handle: TaskHandle) {
        if self.generated.remove(&handle).is_some() {
            log::debug!("{}: dropped registers of slot {}", self.name, handle.index());
        }
        for cmd in self.in_flight.iter_mut().filter(|c| c.handle == handle) {
            log::debug!("{}: slot {} released in flight", self.name, handle.index());
            cmd.orphaned = true;
        }
    }

    pub(crate) fn reset(&mut self) {
        log::info!(
            "{}: reset with {} generated and {} in flight",
            self.name,
            self.generated.len(),
            self.in_flight.len()
        );
        self.dev.reset();
        self.generated.clear();
        self.in_flight.clear();
    }

    pub(crate) fn flush(&self) {
        // nothing is buffered between commands; generated images stay valid
        log::debug!("{}: flush, {} commands in flight", self.name, self.in_flight.len());
    }

    /// Commands every backend understands; `None` for the rest.
    pub(crate) fn control(&mut self, cmd: HalCmd) -> Option<Result<HalReply, HalError>> {
        let reply = match cmd {
            HalCmd::QueryName => Ok(HalReply::Name(self.name)),
            HalCmd::SetPollTimeout(ms) => {
                self.dev.set_poll_timeout(std::time::Duration::from_millis(ms));
                Ok(HalReply::Done)
            }
            HalCmd::SetInfo { kind, flag, data } => self
                .dev
                .set_info(kind, flag, data)
                .map(|()| HalReply::Done)
                .map_err(HalError::from),
            HalCmd::SetFastMode(_) | HalCmd::SetRateControl { .. } => return None,
        };
        Some(reply)
    }
}

pub(crate) fn unsupported(name: &str, cmd: HalCmd) -> HalError {
    HalError::InvalidArgument(format!("{name}: unsupported control {cmd:?}"))
}
