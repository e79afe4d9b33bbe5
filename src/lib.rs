//! # mppkit
//!
//! Hardware-abstraction dispatch for video accelerators.
//!
//! A media pipeline asks for a context by coding standard; mppkit selects the
//! matching hardware backend from a static registry, bounds the number of
//! tasks in flight, and routes each task through register generation,
//! hardware start and hardware wait over a register command channel.
//!
//! ## Features
//!
//! - `device`: the register command channel and its transports.
//! - `hal`: the backend registry, dispatcher, task group and facade.
//!
//! Use the `full` feature to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! mppkit = { version = "0.1", features = ["hal"] }
//! ```
//!
//! ```rust,ignore
//! use mppkit::hal::{CodingType, CtxType, Hal, HalCfg};
//!
//! let mut hal = Hal::init(&HalCfg::new(CtxType::Dec, CodingType::Hevc, 4))?;
//! let mut task = hal.acquire_task(syntax)?;
//! hal.reg_gen(&mut task)?;
//! hal.hw_start(&mut task)?;
//! hal.hw_wait(&mut task)?;
//! ```

#[cfg(feature = "device")]
pub use mppkit_device as device;

#[cfg(feature = "hal")]
pub use mppkit_hal as hal;
