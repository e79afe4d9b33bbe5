//! Capability interface every hardware backend implements.

use crate::{HalCfg, HalError, HalTask, TaskHandle};
use std::fmt;

/// Commands for [`HalApi::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalCmd {
    /// Report the backend name.
    QueryName,
    /// Change how long a wait polls the hardware, in milliseconds.
    SetPollTimeout(u64),
    /// Attach metadata to the next hardware command.
    SetInfo {
        /// Type tag.
        kind: u32,
        /// Flag word.
        flag: u32,
        /// Value.
        data: u64,
    },
    /// Decoders: trade error resilience for throughput.
    SetFastMode(bool),
    /// Encoders: target bitrate and frame rate.
    SetRateControl {
        /// Bits per second.
        bps: u32,
        /// Frames per second.
        fps: u32,
    },
}

/// Answer to a [`HalCmd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalReply {
    /// Nothing to report.
    Done,
    /// Backend name.
    Name(&'static str),
}

/// Operations a backend provides for one coding standard.
///
/// The dispatcher calls these after validating the task lifecycle, so a
/// backend only sees `start` for tasks whose registers it generated and
/// `wait` for tasks it started.
pub trait HalApi: Sized + Send + fmt::Debug {
    /// Backend name.
    const NAME: &'static str;

    /// Build a backend instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the hardware connection cannot be established.
    fn init(cfg: &HalCfg) -> Result<Self, HalError>;

    /// Compute the register payload of `task`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if the syntax does not fit.
    fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError>;

    /// Send the generated payload of `task` to the hardware.
    ///
    /// # Errors
    ///
    /// Returns a device error if the channel rejects the command.
    fn start(&mut self, task: &mut HalTask) -> Result<(), HalError>;

    /// Wait for `task` to complete.
    ///
    /// # Errors
    ///
    /// Returns a device error on timeout or transport failure.
    fn wait(&mut self, task: &mut HalTask) -> Result<(), HalError>;

    /// Drop whatever is kept for a task whose slot was released. A command
    /// still in flight is collected and discarded by a later `wait`.
    fn release(&mut self, handle: TaskHandle);

    /// Abort all outstanding work.
    ///
    /// # Errors
    ///
    /// Returns an error if the hardware cannot be brought back.
    fn reset(&mut self) -> Result<(), HalError>;

    /// Flush buffered state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot flush.
    fn flush(&mut self) -> Result<(), HalError>;

    /// Backend-specific command.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] for commands the backend does not
    /// understand.
    fn control(&mut self, cmd: HalCmd) -> Result<HalReply, HalError>;
}
