mod common;
mod h264d;
mod h265d;
mod jpegd;
mod vp8e;

pub use h264d::H264dHal;
pub use h265d::H265dHal;
pub use jpegd::JpegdHal;
pub use vp8e::Vp8eHal;

use crate::{
    CodingType, CtxType, HalApi, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskHandle,
};

/// A running backend, one variant per registered hardware API.
#[derive(Debug)]
pub enum Backend {
    /// H.264 decoder.
    H264d(H264dHal),
    /// HEVC decoder.
    H265d(H265dHal),
    /// Motion JPEG decoder.
    Jpegd(JpegdHal),
    /// VP8 encoder.
    Vp8e(Vp8eHal),
}

macro_rules! forward {
    ($self:ident, $hal:ident => $call:expr) => {
        match $self {
            Backend::H264d($hal) => $call,
            Backend::H265d($hal) => $call,
            Backend::Jpegd($hal) => $call,
            Backend::Vp8e($hal) => $call,
        }
    };
}

impl Backend {
    /// Name of the active backend.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::H264d(_) => H264dHal::NAME,
            Self::H265d(_) => H265dHal::NAME,
            Self::Jpegd(_) => JpegdHal::NAME,
            Self::Vp8e(_) => Vp8eHal::NAME,
        }
    }

    pub(crate) fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        forward!(self, hal => hal.reg_gen(task))
    }

    pub(crate) fn start(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        forward!(self, hal => hal.start(task))
    }

    pub(crate) fn wait(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        forward!(self, hal => hal.wait(task))
    }

    pub(crate) fn release(&mut self, handle: TaskHandle) {
        forward!(self, hal => hal.release(handle));
    }

    pub(crate) fn reset(&mut self) -> Result<(), HalError> {
        forward!(self, hal => hal.reset())
    }

    pub(crate) fn flush(&mut self) -> Result<(), HalError> {
        forward!(self, hal => hal.flush())
    }

    pub(crate) fn control(&mut self, cmd: HalCmd) -> Result<HalReply, HalError> {
        forward!(self, hal => hal.control(cmd))
    }
}

impl From<H264dHal> for Backend {
    fn from(hal: H264dHal) -> Self {
        Self::H264d(hal)
    }
}

impl From<H265dHal> for Backend {
    fn from(hal: H265dHal) -> Self {
        Self::H265d(hal)
    }
}

impl From<JpegdHal> for Backend {
    fn from(hal: JpegdHal) -> Self {
        Self::Jpegd(hal)
    }
}

impl From<Vp8eHal> for Backend {
    fn from(hal: Vp8eHal) -> Self {
        Self::Vp8e(hal)
    }
}

/// Registry entry describing one hardware API.
#[derive(Debug)]
pub struct HalDescriptor {
    /// Backend name.
    pub name: &'static str,
    /// Coding standard the backend serves.
    pub coding: CodingType,
    /// Context class of the backend.
    pub ctx_type: CtxType,
    /// Bytes accounted for the backend context.
    pub ctx_size: usize,
    init: fn(&HalCfg) -> Result<Backend, HalError>,
}

impl HalDescriptor {
    pub(crate) fn create(&self, cfg: &HalCfg) -> Result<Backend, HalError> {
        (self.init)(cfg)
    }
}

fn construct<T>(cfg: &HalCfg) -> Result<Backend, HalError>
where
    T: HalApi,
    Backend: From<T>,
{
    T::init(cfg).map(Backend::from)
}

const fn entry<T>(coding: CodingType, ctx_type: CtxType) -> HalDescriptor
where
    T: HalApi,
    Backend: From<T>,
{
    HalDescriptor {
        name: T::NAME,
        coding,
        ctx_type,
        ctx_size: size_of::<T>(),
        init: construct::<T>,
    }
}

static HW_APIS: [HalDescriptor; 4] = [
    entry::<H264dHal>(CodingType::Avc, CtxType::Dec),
    entry::<H265dHal>(CodingType::Hevc, CtxType::Dec),
    entry::<JpegdHal>(CodingType::Mjpeg, CtxType::Dec),
    entry::<Vp8eHal>(CodingType::Vp8, CtxType::Enc),
];

/// Every registered hardware API.
#[must_use]
pub fn hw_apis() -> &'static [HalDescriptor] {
    &HW_APIS
}

/// The hardware API serving `coding`, if one is registered.
#[must_use]
pub fn find(coding: CodingType) -> Option<&'static HalDescriptor> {
    HW_APIS.iter().find(|api| api.coding == coding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_one_entry_per_coding() {
        for (i, api) in hw_apis().iter().enumerate() {
            assert_eq!(find(api.coding).map(|a| a.name), Some(api.name));
            assert!(hw_apis()[i + 1..].iter().all(|b| b.coding != api.coding));
            assert!(api.ctx_size > 0);
        }
    }

    #[test]
    fn unregistered_coding_is_not_found() {
        assert!(find(CodingType::Av1).is_none());
        assert!(find(CodingType::Mpeg2).is_none());
    }

    #[test]
    fn encoder_is_registered_as_enc() {
        assert_eq!(find(CodingType::Vp8).map(|a| a.ctx_type), Some(CtxType::Enc));
    }
}
