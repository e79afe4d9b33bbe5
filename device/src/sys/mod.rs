//! Transports carrying batches to the hardware.

mod memory;
#[cfg(unix)]
mod node;

pub use memory::{DeviceProbe, Fault, MemoryDevice};
#[cfg(unix)]
pub use node::NodeDevice;

use crate::{Batch, ClientType, Completion, DeviceConfig, DeviceError, TransportKind};
use std::fmt;
use std::time::Duration;

/// An opaque connection to one hardware client.
pub trait Transport: Send + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Send a batch as one hardware command.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceIo`] if the command could not be delivered.
    fn send(&mut self, batch: &Batch) -> Result<(), DeviceError>;

    /// Wait for the oldest sent command to complete.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Timeout`] if nothing completes within `timeout`,
    /// or [`DeviceError::DeviceIo`] if the transport fails.
    fn poll(&mut self, timeout: Duration) -> Result<Completion, DeviceError>;

    /// Abandon every sent command that has not been polled.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceIo`] if the hardware could not be reset.
    fn reset(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::DeviceIo`] if the connection did not shut down cleanly.
    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Open the transport selected by `cfg`.
pub(crate) fn open(
    client: ClientType,
    cfg: &DeviceConfig,
) -> Result<Box<dyn Transport>, DeviceError> {
    if let Some(connector) = &cfg.connector {
        return connector.connect(client);
    }
    match cfg.transport {
        TransportKind::Memory => Ok(Box::new(MemoryDevice::new(cfg.register_file_size))),
        #[cfg(unix)]
        TransportKind::Node => Ok(Box::new(NodeDevice::open(&cfg.node_path, client)?)),
        #[cfg(not(unix))]
        TransportKind::Node => Err(DeviceError::DeviceUnavailable(format!(
            "{} for {client:?}: device nodes are not supported on this platform",
            cfg.node_path
        ))),
    }
}
