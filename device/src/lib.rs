//! Register command channel to hardware video accelerators.
//!
//! A [`Device`] owns one connection to a hardware (or software) client block.
//! Register writes, register reads, offset patches and metadata are queued on
//! the channel and only reach the hardware when the batch is submitted. The
//! result of a submission is then collected with a poll:
//!
//! ```ignore
//! use mppkit_device::{ClientType, Device, DeviceConfig, RegBuf};
//!
//! let mut dev = Device::open(ClientType::Rkvdec, &DeviceConfig::default())?;
//! dev.reg_write(&regs, 0)?;
//! let status = RegBuf::new(4);
//! dev.reg_read(&status, 4, 0x4)?;
//! dev.submit()?;
//! dev.poll()?;
//! ```
//!
//! The connection itself is abstracted by [`Transport`]:
//! - **Memory**: an in-process register file acting as a software client.
//! - **Node**: a device node opened as a file (unix only).

#![warn(missing_docs)]

mod channel;
mod cmd;
/// Platform-specific transports.
pub mod sys;

pub use channel::Device;
pub use cmd::{
    Batch, Completion, DevCmd, IoctlCmd, Op, RegBuf, RegOffsetCfg, RegRdCfg, RegWrCfg, SetInfoCfg,
};
pub use sys::Transport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the command channel and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// A register buffer was missing or a size was zero or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The submit/poll protocol was violated.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The connection could not be established.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The transport failed while sending or receiving.
    #[error("device i/o error: {0}")]
    DeviceIo(String),
    /// The hardware did not complete within the poll timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The channel was used after `close`.
    #[error("device closed")]
    Closed,
}

/// Hardware client blocks a channel can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientType {
    /// First generation video decoder.
    Vdpu1,
    /// Second generation video decoder.
    Vdpu2,
    /// H.264/VP9 decoder block.
    Rkvdec,
    /// Dedicated HEVC decoder block.
    HevcDec,
    /// JPEG decoder block.
    JpegDec,
    /// First generation video encoder.
    Vepu1,
    /// Second generation video encoder.
    Vepu2,
    /// H.264/HEVC encoder block.
    Rkvenc,
}

impl ClientType {
    /// Wire identifier of the client.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Vdpu1 => 0,
            Self::Vdpu2 => 1,
            Self::HevcDec => 4,
            Self::Rkvdec => 5,
            Self::JpegDec => 7,
            Self::Rkvenc => 8,
            Self::Vepu1 => 9,
            Self::Vepu2 => 10,
        }
    }

    /// Whether this client encodes rather than decodes.
    #[must_use]
    pub const fn is_encoder(self) -> bool {
        matches!(self, Self::Vepu1 | Self::Vepu2 | Self::Rkvenc)
    }
}

/// Which transport backs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process register file.
    Memory,
    /// Device node opened as a file.
    Node,
}

impl Default for TransportKind {
    fn default() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                Self::Node
            } else {
                Self::Memory
            }
        }
    }
}

type ConnectFn = dyn Fn(ClientType) -> Result<Box<dyn Transport>, DeviceError> + Send + Sync;

/// Caller-supplied way to connect a channel, overriding the transport kind.
#[derive(Clone)]
pub struct Connector(Arc<ConnectFn>);

impl Connector {
    /// Wrap a connect function.
    pub fn new(
        f: impl Fn(ClientType) -> Result<Box<dyn Transport>, DeviceError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn connect(&self, client: ClientType) -> Result<Box<dyn Transport>, DeviceError> {
        (self.0)(client)
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connector")
    }
}

impl PartialEq for Connector {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Connector {}

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Transport used to reach the hardware.
    pub transport: TransportKind,
    /// Path of the device node for [`TransportKind::Node`].
    pub node_path: String,
    /// How long `poll` waits for completion, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Size in bytes of the register file for [`TransportKind::Memory`].
    pub register_file_size: usize,
    /// Overrides `transport` when set.
    #[serde(skip)]
    pub connector: Option<Connector>,
}

impl DeviceConfig {
    /// Configuration for an in-process software client.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            transport: TransportKind::Memory,
            ..Self::default()
        }
    }

    /// Connect through `connector` instead of the configured transport.
    #[must_use]
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Poll timeout as a [`Duration`].
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            node_path: "/dev/mpp_service".to_string(),
            poll_timeout_ms: 200,
            register_file_size: 4096,
            connector: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: DeviceConfig =
            serde_json::from_str(r#"{ "transport": "memory", "poll_timeout_ms": 50 }"#).unwrap();
        assert_eq!(cfg.transport, TransportKind::Memory);
        assert_eq!(cfg.poll_timeout(), Duration::from_millis(50));
        assert_eq!(cfg.node_path, "/dev/mpp_service");
        assert_eq!(cfg.register_file_size, 4096);
    }

    #[test]
    fn encoder_clients() {
        assert!(ClientType::Vepu2.is_encoder());
        assert!(ClientType::Rkvenc.is_encoder());
        assert!(!ClientType::Rkvdec.is_encoder());
    }
}
