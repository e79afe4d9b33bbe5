//! Dispatch layer between a media pipeline and hardware video accelerators.
//!
//! A [`Hal`] context is created for one coding standard. Initialization looks
//! the coding up in a static table of backends, builds that backend and a
//! [`TaskGroup`] bounding how many tasks may be in flight at once. Each task
//! then goes through register generation, hardware start and hardware wait:
//!
//! ```ignore
//! use mppkit_hal::{CodingType, CtxType, Hal, HalCfg};
//!
//! let mut hal = Hal::init(&HalCfg::new(CtxType::Dec, CodingType::Avc, 2))?;
//! let mut task = hal.acquire_task(syntax)?;
//! hal.reg_gen(&mut task)?;
//! hal.hw_start(&mut task)?;
//! hal.hw_wait(&mut task)?;
//! hal.release_task(&task)?;
//! hal.deinit()?;
//! ```
//!
//! The [`entry`] module offers the same operations as free functions that
//! validate missing arguments before forwarding.

#![warn(missing_docs)]

mod api;
/// Hardware backends and the static registry.
pub mod backend;
mod coding;
mod config;
mod dispatch;
pub mod entry;
pub mod mem;
mod regs;
mod task;

pub use api::{HalApi, HalCmd, HalReply};
pub use backend::{Backend, HalDescriptor};
pub use coding::{CodingType, CtxType};
pub use config::HalCfg;
pub use dispatch::Hal;
pub use regs::RegSet;
pub use task::{HalTask, TaskFlags, TaskGroup, TaskHandle, TaskState};

pub use mppkit_device::{self as device, DeviceError};

use thiserror::Error;

/// Errors reported by the dispatch layer and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// A required argument was absent.
    #[error("found NULL input: {0}")]
    NullArgument(&'static str),
    /// Backend or task-group memory could not be obtained.
    #[error("allocation failed: {0}")]
    AllocationFailure(String),
    /// No backend is registered for the coding standard.
    #[error("could not find coding type {0:?}")]
    UnsupportedCoding(CodingType),
    /// A value was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Every task slot is held; carries the capacity.
    #[error("all {0} task slots in use")]
    Exhausted(usize),
    /// The task handle is not currently held.
    #[error("invalid task handle {0:?}")]
    InvalidHandle(TaskHandle),
    /// The task lifecycle was violated.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The device channel failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl HalError {
    /// Numeric result code; success is zero.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NullArgument(_) => -3,
            Self::AllocationFailure(_) => -4,
            Self::UnsupportedCoding(_) => -1,
            Self::InvalidArgument(_)
            | Self::InvalidHandle(_)
            | Self::Device(DeviceError::InvalidArgument(_)) => -6,
            Self::Exhausted(_) => -1012,
            Self::InvalidState(_) | Self::Device(DeviceError::InvalidState(_)) => -1007,
            Self::Device(DeviceError::DeviceUnavailable(_)) => -5,
            Self::Device(DeviceError::Timeout(_)) => -8,
            Self::Device(DeviceError::DeviceIo(_) | DeviceError::Closed) => -1008,
        }
    }
}

/// Result code of an operation, zero on success.
#[must_use]
pub const fn result_code<T>(result: &Result<T, HalError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn result_codes() {
        assert_eq!(result_code(&Ok::<(), HalError>(())), 0);
        assert_eq!(HalError::NullArgument("ctx").code(), -3);
        assert_eq!(HalError::UnsupportedCoding(CodingType::Av1).code(), -1);
        assert_eq!(
            HalError::from(DeviceError::Timeout(Duration::from_millis(1))).code(),
            -8
        );
    }
}
