//! In-process register file acting as a software client.

use super::Transport;
use crate::{Batch, Completion, DeviceError, Op, SetInfoCfg};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scripted failure for the next matching transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The next `send` fails with [`DeviceError::DeviceIo`].
    SendFails,
    /// The next `poll` fails with [`DeviceError::DeviceIo`] and drops the command.
    PollFails,
    /// The next `poll` times out and leaves the command in flight.
    Hang,
    /// The next completed command reports this status word.
    Status(u32),
}

#[derive(Debug)]
struct State {
    regs: Vec<u8>,
    info: Vec<SetInfoCfg>,
    in_flight: VecDeque<Completion>,
    faults: VecDeque<Fault>,
    last_batch: Option<Batch>,
    sent: usize,
    completed: usize,
    closed: bool,
}

impl State {
    fn take_fault(&mut self, wanted: impl Fn(Fault) -> bool) -> Option<Fault> {
        let pos = self.faults.iter().position(|f| wanted(*f))?;
        self.faults.remove(pos)
    }

    fn execute(&mut self, batch: &Batch) -> Result<Completion, DeviceError> {
        // the batch runs on a copy and is committed only if every op fits
        let mut regs = self.regs.clone();
        let mut info = Vec::new();
        for op in &batch.ops {
            match op {
                Op::Write { offset, data } => {
                    let dst = span_mut(&mut regs, *offset, data.len()).ok_or_else(|| {
                        DeviceError::DeviceIo(format!(
                            "write of {} bytes at {offset:#x} outside register file",
                            data.len()
                        ))
                    })?;
                    dst.copy_from_slice(data);
                }
                Op::Patch(cfg) => {
                    let word = cfg
                        .reg_idx
                        .checked_mul(4)
                        .and_then(|at| span_mut(&mut regs, at, 4))
                        .ok_or_else(|| {
                            DeviceError::DeviceIo(format!(
                                "patch of register {} out of range",
                                cfg.reg_idx
                            ))
                        })?;
                    let val = u32::from_le_bytes([word[0], word[1], word[2], word[3]])
                        .wrapping_add(cfg.offset);
                    word.copy_from_slice(&val.to_le_bytes());
                }
                Op::Info(cfg) => info.push(*cfg),
                Op::Read { .. } => {}
            }
        }
        // reads observe the register file after the whole batch ran
        let mut reads = Vec::with_capacity(batch.read_count());
        for op in &batch.ops {
            if let Op::Read { offset, size } = op {
                let src = span_mut(&mut regs, *offset, *size as usize).ok_or_else(|| {
                    DeviceError::DeviceIo(format!(
                        "read of {size} bytes at {offset:#x} outside register file"
                    ))
                })?;
                reads.push(src.to_vec());
            }
        }
        self.regs = regs;
        self.info.extend(info);
        let status = match self.take_fault(|f| matches!(f, Fault::Status(_))) {
            Some(Fault::Status(s)) => s,
            _ => MemoryDevice::STATUS_DONE,
        };
        Ok(Completion { status, reads })
    }
}

fn span_mut(regs: &mut [u8], offset: u32, len: usize) -> Option<&mut [u8]> {
    let at = usize::try_from(offset).ok()?;
    regs.get_mut(at..at.checked_add(len)?)
}

/// Software client with a byte-addressed register file.
///
/// Every sent batch is applied immediately and its completion is queued for
/// the following `poll`. A [`DeviceProbe`] taken before the device is handed
/// to a channel can inspect the register file and script faults.
#[derive(Debug)]
pub struct MemoryDevice {
    state: Arc<Mutex<State>>,
}

impl MemoryDevice {
    /// Status word reported by a command that completed normally.
    pub const STATUS_DONE: u32 = 0x1;

    /// Register file of `size` bytes, zero-initialised.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                regs: vec![0; size],
                info: Vec::new(),
                in_flight: VecDeque::new(),
                faults: VecDeque::new(),
                last_batch: None,
                sent: 0,
                completed: 0,
                closed: false,
            })),
        }
    }

    /// Handle observing this device.
    #[must_use]
    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryDevice {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn send(&mut self, batch: &Batch) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DeviceError::Closed);
        }
        if state.take_fault(|f| f == Fault::SendFails).is_some() {
            return Err(DeviceError::DeviceIo("injected send failure".into()));
        }
        let done = state.execute(batch)?;
        state.in_flight.push_back(done);
        state.last_batch = Some(batch.clone());
        state.sent += 1;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Completion, DeviceError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DeviceError::Closed);
        }
        if state.take_fault(|f| f == Fault::Hang).is_some() {
            return Err(DeviceError::Timeout(timeout));
        }
        if state.take_fault(|f| f == Fault::PollFails).is_some() {
            state.in_flight.pop_front();
            return Err(DeviceError::DeviceIo("injected poll failure".into()));
        }
        let done = state
            .in_flight
            .pop_front()
            .ok_or_else(|| DeviceError::DeviceIo("no command in flight".into()))?;
        state.completed += 1;
        Ok(done)
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.lock().in_flight.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.in_flight.clear();
        state.closed = true;
        Ok(())
    }
}

/// Inspection and fault-injection handle for a [`MemoryDevice`].
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    state: Arc<Mutex<State>>,
}

impl DeviceProbe {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Another connection to the same register file.
    #[must_use]
    pub fn connect(&self) -> MemoryDevice {
        let device = MemoryDevice {
            state: Arc::clone(&self.state),
        };
        device.lock().closed = false;
        device
    }

    /// Queue a fault for a later transport call.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Copy of the register file.
    #[must_use]
    pub fn registers(&self) -> Vec<u8> {
        self.lock().regs.clone()
    }

    /// 32-bit register at word index `idx`.
    #[must_use]
    pub fn word(&self, idx: usize) -> Option<u32> {
        let state = self.lock();
        let at = idx.checked_mul(4)?;
        let b = state.regs.get(at..at.checked_add(4)?)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Metadata received through set-info, oldest first.
    #[must_use]
    pub fn info(&self) -> Vec<SetInfoCfg> {
        self.lock().info.clone()
    }

    /// The most recently sent batch.
    #[must_use]
    pub fn last_batch(&self) -> Option<Batch> {
        self.lock().last_batch.clone()
    }

    /// Number of batches sent.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.lock().sent
    }

    /// Number of completions delivered.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    /// Number of sent commands not yet polled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Whether the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientType, RegOffsetCfg};

    fn batch(ops: Vec<Op>) -> Batch {
        Batch {
            client: ClientType::Vdpu2,
            ops,
        }
    }

    #[test]
    fn patch_adds_offset_to_written_register() {
        let mut dev = MemoryDevice::new(64);
        let probe = dev.probe();
        let b = batch(vec![
            Op::Write {
                offset: 8,
                data: 0x1000_u32.to_le_bytes().to_vec(),
            },
            Op::Patch(RegOffsetCfg {
                reg_idx: 2,
                offset: 0x40,
            }),
            Op::Read { offset: 8, size: 4 },
        ]);
        dev.send(&b).unwrap();
        let done = dev.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(probe.word(2), Some(0x1040));
        assert_eq!(done.reads, vec![0x1040_u32.to_le_bytes().to_vec()]);
        assert_eq!(done.status, MemoryDevice::STATUS_DONE);
    }

    #[test]
    fn out_of_range_write_is_io_error() {
        let mut dev = MemoryDevice::new(16);
        let b = batch(vec![Op::Write {
            offset: 12,
            data: vec![0; 8],
        }]);
        assert!(matches!(dev.send(&b), Err(DeviceError::DeviceIo(_))));
    }

    #[test]
    fn failed_batch_leaves_register_file_untouched() {
        let mut dev = MemoryDevice::new(16);
        let probe = dev.probe();
        let b = batch(vec![
            Op::Write {
                offset: 0,
                data: vec![0xaa, 0xbb, 0xcc, 0xdd],
            },
            Op::Info(SetInfoCfg {
                kind: 1,
                flag: 0,
                data: 0x55,
            }),
            Op::Write {
                offset: 12,
                data: vec![1; 8],
            },
        ]);
        assert!(matches!(dev.send(&b), Err(DeviceError::DeviceIo(_))));
        assert_eq!(probe.word(0), Some(0));
        assert!(probe.info().is_empty());
        assert_eq!(probe.sent(), 0);
        assert_eq!(probe.in_flight(), 0);
    }

    #[test]
    fn huge_indexes_read_as_none() {
        let dev = MemoryDevice::new(16);
        let probe = dev.probe();
        assert_eq!(probe.word(3), Some(0));
        assert_eq!(probe.word(4), None);
        assert_eq!(probe.word(usize::MAX), None);
        assert_eq!(probe.word(usize::MAX / 4), None);
    }

    #[test]
    fn hang_keeps_command_in_flight() {
        let mut dev = MemoryDevice::new(16);
        let probe = dev.probe();
        dev.send(&batch(vec![Op::Read { offset: 0, size: 4 }])).unwrap();
        probe.inject(Fault::Hang);
        let timeout = Duration::from_millis(5);
        assert_eq!(dev.poll(timeout), Err(DeviceError::Timeout(timeout)));
        assert_eq!(probe.in_flight(), 1);
        assert!(dev.poll(timeout).is_ok());
        assert_eq!(probe.completed(), 1);
    }
}
