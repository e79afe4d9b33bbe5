//! Free-function entry points.
//!
//! Each function takes its arguments as `Option` so that a caller bridging
//! from a handle-based API can pass absent values straight through; a missing
//! argument fails with [`HalError::NullArgument`] before anything is
//! forwarded.

use crate::{Hal, HalCfg, HalCmd, HalError, HalReply, HalTask};

fn require<T>(arg: Option<T>, name: &'static str, func: &str) -> Result<T, HalError> {
    arg.ok_or_else(|| {
        log::error!("{func} found NULL input {name}");
        HalError::NullArgument(name)
    })
}

/// Create a context from `cfg`.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] without a config, otherwise see
/// [`Hal::init`].
pub fn init(cfg: Option<&HalCfg>) -> Result<Hal, HalError> {
    let cfg = require(cfg, "cfg", "init")?;
    Hal::init(cfg)
}

/// Release a context.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] without a context.
pub fn deinit(ctx: Option<Hal>) -> Result<(), HalError> {
    require(ctx, "ctx", "deinit")?.deinit()
}

/// Generate registers for `task`.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] if an argument is missing, otherwise
/// see [`Hal::reg_gen`].
pub fn reg_gen(ctx: Option<&mut Hal>, task: Option<&mut HalTask>) -> Result<(), HalError> {
    let ctx = require(ctx, "ctx", "reg_gen")?;
    let task = require(task, "task", "reg_gen")?;
    ctx.reg_gen(task)
}

/// Start `task` on the hardware.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] if an argument is missing, otherwise
/// see [`Hal::hw_start`].
pub fn hw_start(ctx: Option<&mut Hal>, task: Option<&mut HalTask>) -> Result<(), HalError> {
    let ctx = require(ctx, "ctx", "hw_start")?;
    let task = require(task, "task", "hw_start")?;
    ctx.hw_start(task)
}

/// Wait for `task` on the hardware.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] if an argument is missing, otherwise
/// see [`Hal::hw_wait`].
pub fn hw_wait(ctx: Option<&mut Hal>, task: Option<&mut HalTask>) -> Result<(), HalError> {
    let ctx = require(ctx, "ctx", "hw_wait")?;
    let task = require(task, "task", "hw_wait")?;
    ctx.hw_wait(task)
}

/// Reset the context.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] without a context, otherwise see
/// [`Hal::reset`].
pub fn reset(ctx: Option<&mut Hal>) -> Result<(), HalError> {
    require(ctx, "ctx", "reset")?.reset()
}

/// Flush the context.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] without a context, otherwise see
/// [`Hal::flush`].
pub fn flush(ctx: Option<&mut Hal>) -> Result<(), HalError> {
    require(ctx, "ctx", "flush")?.flush()
}

/// Send a control command.
///
/// # Errors
///
/// Returns [`HalError::NullArgument`] if an argument is missing, otherwise
/// see [`Hal::control`].
pub fn control(ctx: Option<&mut Hal>, cmd: Option<HalCmd>) -> Result<HalReply, HalError> {
    let ctx = require(ctx, "ctx", "control")?;
    let cmd = require(cmd, "cmd", "control")?;
    ctx.control(cmd)
}
