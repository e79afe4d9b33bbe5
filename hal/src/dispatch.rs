//! The dispatch context binding one backend to one task group.

use crate::backend::{self, Backend, HalDescriptor};
use crate::mem::{Allocation, Tracked};
use crate::{
    CodingType, CtxType, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskGroup, TaskState,
};
use std::sync::Arc;

/// A dispatch context for one coding standard.
///
/// Owns the backend selected from the registry and the task group bounding
/// concurrent tasks. Lifecycle ordering is checked here before a backend is
/// reached; a failed operation leaves the task state unchanged.
#[derive(Debug)]
pub struct Hal {
    ctx_type: CtxType,
    coding: CodingType,
    api: &'static HalDescriptor,
    ctx: Tracked<Backend>,
    tasks: TaskGroup,
}

impl Hal {
    /// Look up the backend for `cfg.coding` and bring it up.
    ///
    /// Anything built before a failing step is released again, so a failed
    /// init leaves no memory behind.
    ///
    /// # Errors
    ///
    /// - [`HalError::UnsupportedCoding`] if no backend serves the coding.
    /// - [`HalError::AllocationFailure`] if context or task memory is unavailable.
    /// - [`HalError::InvalidArgument`] if `task_count` is not positive.
    /// - Any device error raised while the backend connects.
    pub fn init(cfg: &HalCfg) -> Result<Self, HalError> {
        let Some(api) = backend::find(cfg.coding) else {
            log::error!("could not find coding type {:?}", cfg.coding);
            return Err(HalError::UnsupportedCoding(cfg.coding));
        };
        if api.ctx_type != cfg.ctx_type {
            log::warn!(
                "{}: requested as {:?}, registered as {:?}",
                api.name,
                cfg.ctx_type,
                api.ctx_type
            );
        }
        let alloc = Allocation::new("hal ctx", api.ctx_size)?;
        let backend = api.create(cfg).inspect_err(|e| {
            log::error!("{}: init failed: {e}", api.name);
        })?;
        let ctx = Tracked::new(Box::new(backend), alloc);
        let tasks = TaskGroup::new(cfg.ctx_type, cfg.task_count)?;
        log::info!(
            "{}: ready for {:?} with {} tasks",
            api.name,
            cfg.coding,
            tasks.capacity()
        );
        Ok(Self {
            ctx_type: cfg.ctx_type,
            coding: cfg.coding,
            api,
            ctx,
            tasks,
        })
    }

    /// Tear the context down: the backend first, then the task group.
    ///
    /// # Errors
    ///
    /// Currently infallible; the result mirrors the other operations.
    pub fn deinit(self) -> Result<(), HalError> {
        let Self { api, ctx, tasks, .. } = self;
        if tasks.in_use() > 0 {
            log::warn!("{}: deinit with {} tasks held", api.name, tasks.in_use());
        }
        drop(ctx);
        drop(tasks);
        log::debug!("{}: deinit", api.name);
        Ok(())
    }

    /// Name of the selected backend.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.api.name
    }

    /// Coding standard served.
    #[must_use]
    pub const fn coding(&self) -> CodingType {
        self.coding
    }

    /// Context class requested at init.
    #[must_use]
    pub const fn ctx_type(&self) -> CtxType {
        self.ctx_type
    }

    /// Registry entry of the selected backend.
    #[must_use]
    pub const fn descriptor(&self) -> &'static HalDescriptor {
        self.api
    }

    /// The task group.
    #[must_use]
    pub const fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// Take a task slot for `syntax`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Exhausted`] if every slot is held.
    pub fn acquire_task(&mut self, syntax: Arc<Vec<u8>>) -> Result<HalTask, HalError> {
        let handle = self.tasks.acquire()?;
        Ok(HalTask::new(handle, syntax))
    }

    /// Return the slot of `task` to the group.
    ///
    /// The backend drops the task's generated registers; a command still in
    /// flight is collected by the next wait and its result discarded.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidHandle`] if the slot is not held by this
    /// context.
    pub fn release_task(&mut self, task: &HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        self.tasks.release(handle)?;
        self.ctx.release(handle);
        Ok(())
    }

    /// Lifecycle state of `task`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidHandle`] if the slot is not held.
    pub fn task_state(&self, task: &HalTask) -> Result<TaskState, HalError> {
        self.tasks.state(task.handle())
    }

    /// Generate the register payload of `task`.
    ///
    /// Allowed on an idle task and again on one whose registers were already
    /// generated.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidState`] out of order, or the backend's error.
    pub fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        self.tasks
            .expect(handle, &[TaskState::Idle, TaskState::RegistersGenerated])?;
        self.ctx.reg_gen(task)?;
        self.tasks.set_state(handle, TaskState::RegistersGenerated)
    }

    /// Submit the generated payload of `task` to the hardware.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidState`] unless registers were generated, or
    /// the backend's error.
    pub fn hw_start(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        self.tasks.expect(handle, &[TaskState::RegistersGenerated])?;
        self.ctx.start(task)?;
        self.tasks.set_state(handle, TaskState::Submitted)
    }

    /// Wait for `task` to complete.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidState`] unless the task was submitted, or
    /// the backend's error.
    pub fn hw_wait(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let handle = task.handle();
        self.tasks.expect(handle, &[TaskState::Submitted])?;
        self.ctx.wait(task)?;
        self.tasks.set_state(handle, TaskState::Completed)
    }

    /// Abort outstanding hardware work; every held task moves to
    /// [`TaskState::Reset`].
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn reset(&mut self) -> Result<(), HalError> {
        self.ctx.reset()?;
        self.tasks.reset_all();
        Ok(())
    }

    /// Flush backend state.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn flush(&mut self) -> Result<(), HalError> {
        self.ctx.flush()
    }

    /// Forward a control command to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] for commands the backend does not
    /// support.
    pub fn control(&mut self, cmd: HalCmd) -> Result<HalReply, HalError> {
        self.ctx.control(cmd)
    }
}
