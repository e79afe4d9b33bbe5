//! VP8 encoding on the second generation encoder block.

use super::common::{HwSession, Layout, unsupported};
use crate::{CodingType, HalApi, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskHandle};
use mppkit_device::ClientType;

const LAYOUT: Layout = Layout {
    regs: 184,
    payload_start: 8,
    readback_start: 180,
    readback_count: 4,
};

const REG_RC_BPS: usize = 4;
const REG_RC_FPS: usize = 5;
const REG_ENC_CTRL: usize = 6;
const ENC_RC_ENABLE: u32 = 1 << 0;

const DEFAULT_BPS: u32 = 2_000_000;
const DEFAULT_FPS: u32 = 30;

/// VP8 encoder backend.
///
/// The first read-back word of a completed task holds the size in bytes of
/// the produced stream.
#[derive(Debug)]
pub struct Vp8eHal {
    hw: HwSession,
    bps: u32,
    fps: u32,
}

impl HalApi for Vp8eHal {
    const NAME: &'static str = "vp8e";

    fn init(cfg: &HalCfg) -> Result<Self, HalError> {
        let hw = HwSession::open(Self::NAME, CodingType::Vp8, ClientType::Vepu2, LAYOUT, cfg)?;
        Ok(Self {
            hw,
            bps: DEFAULT_BPS,
            fps: DEFAULT_FPS,
        })
    }

    fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let (bps, fps) = (self.bps, self.fps);
        self.hw.generate(task, |regs| {
            regs.set(REG_RC_BPS, bps)?;
            regs.set(REG_RC_FPS, fps)?;
            regs.set(REG_ENC_CTRL, ENC_RC_ENABLE)
        })
    }

    fn start(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        self.hw.start(task)
    }

    fn wait(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        self.hw.wait(task)
    }

    fn release(&mut self, handle: TaskHandle) {
        self.hw.forget(handle);
    }

    fn reset(&mut self) -> Result<(), HalError> {
        self.hw.reset();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HalError> {
        self.hw.flush();
        Ok(())
    }

    fn control(&mut self, cmd: HalCmd) -> Result<HalReply, HalError> {
        if let Some(reply) = self.hw.control(cmd) {
            return reply;
        }
        match cmd {
            HalCmd::SetRateControl { bps, fps } => {
                if bps == 0 || fps == 0 {
                    return Err(HalError::InvalidArgument(format!(
                        "rate control {bps} bps at {fps} fps"
                    )));
                }
                self.bps = bps;
                self.fps = fps;
                Ok(HalReply::Done)
            }
            _ => Err(unsupported(Self::NAME, cmd)),
        }
    }
}
