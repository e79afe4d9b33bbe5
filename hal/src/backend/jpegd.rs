//! Motion JPEG decoding on the JPEG block.

use super::common::{HwSession, Layout, unsupported};
use crate::{CodingType, HalApi, HalCfg, HalCmd, HalError, HalReply, HalTask, TaskHandle};
use mppkit_device::ClientType;

const LAYOUT: Layout = Layout {
    regs: 42,
    payload_start: 5,
    readback_start: 40,
    readback_count: 1,
};

const REG_PIC_CTRL: usize = 4;
// every frame is an intra picture
const PIC_INTRA: u32 = 1 << 0;

/// Motion JPEG decoder backend.
#[derive(Debug)]
pub struct JpegdHal {
    hw: HwSession,
}

impl HalApi for JpegdHal {
    const NAME: &'static str = "jpegd";

    fn init(cfg: &HalCfg) -> Result<Self, HalError> {
        let hw = HwSession::open(Self::NAME, CodingType::Mjpeg, ClientType::JpegDec, LAYOUT, cfg)?;
        Ok(Self { hw })
    }

    fn reg_gen(&mut self, task: &mut HalTask) -> Result<(), HalError> {
        self.hw.generate(task, |regs| regs.set(REG_PIC_CTRL, PIC_INTRA))
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
        self.hw
            .control(cmd)
            .unwrap_or_else(|| Err(unsupported(Self::NAME, cmd)))
    }
}
