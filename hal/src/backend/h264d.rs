//! H.264 decoding on the RKVDEC block.

use super::common::{HwSession, Layout, unsupported};
use crate::{CodingType, HalApi, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskHandle};
use mppkit_device::ClientType;

const LAYOUT: Layout = Layout {
    regs: 78,
    payload_start: 8,
    readback_start: 76,
    readback_count: 2,
};

const REG_DEC_CTRL: usize = 4;
const CTRL_FAST_MODE: u32 = 1 << 0;
const CTRL_ERR_CONCEAL: u32 = 1 << 1;

/// H.264 decoder backend.
#[derive(Debug)]
pub struct H264dHal {
    hw: HwSession,
    fast_mode: bool,
}

impl HalApi for H264dHal {
    const NAME: &'static str = "h264d";

    fn init(cfg: &HalCfg) -> Result<Self, HalError> {
        let hw = HwSession::open(Self::NAME, CodingType::Avc, ClientType::Rkvdec, LAYOUT, cfg)?;
        Ok(Self {
            hw,
            fast_mode: false,
        })
    }

    fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        let mut ctrl = CTRL_ERR_CONCEAL;
        if self.fast_mode {
            ctrl |= CTRL_FAST_MODE;
        }
        self.hw.generate(task, |regs| regs.set(REG_DEC_CTRL, ctrl))
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
