//! Capacity-bounded task slots and the per-task lifecycle.

use crate::mem::Allocation;
use crate::{CtxType, HalError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_GROUP: AtomicU32 = AtomicU32::new(1);

/// Stable reference to a held slot.
///
/// The generation changes every time a slot is released, so a handle kept
/// past its release is rejected instead of aliasing the next task. Handles
/// also carry the id of the group that issued them and are rejected by any
/// other group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    group: u32,
    index: u32,
    generation: u32,
}

impl TaskHandle {
    /// Slot index inside the group.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Lifecycle of one hardware task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Slot acquired, nothing prepared.
    Idle,
    /// Register payload computed, not yet sent.
    RegistersGenerated,
    /// Register payload sent to hardware.
    Submitted,
    /// Hardware completion observed.
    Completed,
    /// Aborted by a reset.
    Reset,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    // None while the slot is free
    state: Option<TaskState>,
}

/// Fixed-capacity registry of task slots.
///
/// The group only tracks state. Admission is immediate: when every slot is
/// held, [`acquire`](Self::acquire) fails with [`HalError::Exhausted`] and the
/// caller decides whether to wait.
#[derive(Debug)]
pub struct TaskGroup {
    id: u32,
    ctx_type: CtxType,
    slots: Vec<Slot>,
    used: usize,
    _alloc: Allocation,
}

impl TaskGroup {
    /// Group of `capacity` free slots.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if `capacity` is not positive and
    /// [`HalError::AllocationFailure`] if the slot table cannot be allocated.
    pub fn new(ctx_type: CtxType, capacity: i32) -> Result<Self, HalError> {
        let count = usize::try_from(capacity)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| HalError::InvalidArgument(format!("task count {capacity}")))?;
        let alloc = Allocation::new("task group", count * size_of::<Slot>())?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|e| HalError::AllocationFailure(format!("task group: {e}")))?;
        slots.resize(
            count,
            Slot {
                generation: 0,
                state: None,
            },
        );
        Ok(Self {
            id: NEXT_GROUP.fetch_add(1, Ordering::Relaxed),
            ctx_type,
            slots,
            used: 0,
            _alloc: alloc,
        })
    }

    /// Context class the group was created for.
    #[must_use]
    pub const fn ctx_type(&self) -> CtxType {
        self.ctx_type
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of held slots.
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.used
    }

    /// Whether every slot is held.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.used == self.slots.len()
    }

    /// Take a free slot, which starts out [`TaskState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Exhausted`] if every slot is held.
    pub fn acquire(&mut self) -> Result<TaskHandle, HalError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state.is_none())
            .ok_or(HalError::Exhausted(self.used))?;
        slot.state = Some(TaskState::Idle);
        self.used += 1;
        let handle = TaskHandle {
            group: self.id,
            index: u32::try_from(index).unwrap_or(u32::MAX),
            generation: slot.generation,
        };
        log::debug!("task slot {index} acquired ({}/{})", self.used, self.slots.len());
        Ok(handle)
    }

    /// Return a held slot to the group.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidHandle`] if `handle` is not currently held.
    pub fn release(&mut self, handle: TaskHandle) -> Result<(), HalError> {
        let slot = self.slot_mut(handle)?;
        if slot.state == Some(TaskState::Submitted) {
            log::warn!("task slot {} released while in flight", handle.index);
        }
        slot.state = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.used -= 1;
        log::debug!("task slot {} released", handle.index);
        Ok(())
    }

    /// Current state of a held slot.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidHandle`] if `handle` is not currently held.
    pub fn state(&self, handle: TaskHandle) -> Result<TaskState, HalError> {
        self.slots
            .get(handle.index())
            .filter(|s| handle.group == self.id && s.generation == handle.generation)
            .and_then(|s| s.state)
            .ok_or(HalError::InvalidHandle(handle))
    }

    fn slot_mut(&mut self, handle: TaskHandle) -> Result<&mut Slot, HalError> {
        if handle.group != self.id {
            return Err(HalError::InvalidHandle(handle));
        }
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.generation == handle.generation && s.state.is_some())
            .ok_or(HalError::InvalidHandle(handle))
    }

    /// Require `from` and fail fast otherwise.
    pub(crate) fn expect(&self, handle: TaskHandle, from: &[TaskState]) -> Result<(), HalError> {
        let state = self.state(handle)?;
        if from.contains(&state) {
            Ok(())
        } else {
            Err(HalError::InvalidState(format!(
                "task slot {} is {state:?}, expected one of {from:?}",
                handle.index
            )))
        }
    }

    pub(crate) fn set_state(&mut self, handle: TaskHandle, to: TaskState) -> Result<(), HalError> {
        let slot = self.slot_mut(handle)?;
        log::debug!("task slot {}: {:?} -> {to:?}", handle.index, slot.state);
        slot.state = Some(to);
        Ok(())
    }

    /// Move every held, non-idle slot to [`TaskState::Reset`].
    pub(crate) fn reset_all(&mut self) {
        for slot in &mut self.slots {
            if slot.state.is_some_and(|s| s != TaskState::Idle) {
                slot.state = Some(TaskState::Reset);
            }
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if self.used > 0 {
            log::warn!("task group destroyed with {} slots still held", self.used);
        }
    }
}

/// Per-task flags set by the parser or the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags {
    /// The parser found a syntax error.
    pub parse_err: bool,
    /// A reference frame is missing or broken.
    pub ref_err: bool,
    /// Last task of the stream.
    pub eos: bool,
    /// The hardware reported an error.
    pub hw_err: bool,
}

impl TaskFlags {
    /// Whether the hardware must not run this task.
    #[must_use]
    pub const fn skips_hw(self) -> bool {
        self.parse_err || self.ref_err
    }
}

/// One unit of hardware work bound to a slot.
#[derive(Debug, Clone)]
pub struct HalTask {
    handle: TaskHandle,
    /// Flags from the parser and the hardware.
    pub flags: TaskFlags,
    /// Codec-specific syntax produced by the parser.
    pub syntax: Arc<Vec<u8>>,
    /// Byte offset of the bitstream inside its buffer.
    pub stream_offset: u32,
    /// Status word reported by the hardware on completion.
    pub hw_status: Option<u32>,
    /// Registers read back after completion.
    pub readback: Vec<u32>,
}

impl HalTask {
    /// Task for a held slot.
    #[must_use]
    pub fn new(handle: TaskHandle, syntax: Arc<Vec<u8>>) -> Self {
        Self {
            handle,
            flags: TaskFlags::default(),
            syntax,
            stream_offset: 0,
            hw_status: None,
            readback: Vec::new(),
        }
    }

    /// Slot this task occupies.
    #[must_use]
    pub const fn handle(&self) -> TaskHandle {
        self.handle
    }
}
