//! HEVC decoding on the dedicated HEVC block.

use super::common::{HwSession, Layout, unsupported};
use crate::{CodingType, HalApi, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskHandle};
use mppkit_device::ClientType;

const LAYOUT: Layout = Layout {
    regs: 68,
    payload_start: 6,
    readback_start: 64,
    readback_count: 4,
};

const REG_SYS_CTRL: usize = 4;
const SYS_FAST_MODE: u32 = 1 << 4;
const SYS_OUT_ENDIAN: u32 = 1 << 8;

/// HEVC decoder backend.
#[derive(Debug)]
pub struct H265dHal {
    hw: HwSession,
    fast_mode: bool,
}

impl HalApi for H265dHal {
    const NAME: &'static str = "h265d";

    fn init(cfg: &HalCfg) -> Result<Self, HalError> {
        let hw = HwSession::open(Self::NAME, CodingType::Hevc, ClientType::HevcDec, LAYOUT, cfg)?;
        Ok(Self {
            hw,
            fast_mode: false,
        })
    }

    fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let sys = if self.fast_mode {
            SYS_OUT_ENDIAN | SYS_FAST_MODE
        } else {
            SYS_OUT_ENDIAN
        };
        self.hw.generate(task, |regs| regs.set(REG_SYS_CTRL, sys))
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
            HalCmd::SetFastMode(on) => {
                self.fast_mode = on;
                Ok(HalReply::Done)
            }
            _ => Err(unsupported(Self::NAME, cmd)),
        }
    }
}
