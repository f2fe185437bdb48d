use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::DmaAddr;
use crate::config::{ISP_REG_WINDOW, YHIST_ENTRIES};
use crate::registers::*;

/// An in-memory ISP register file, for driving the pipeline without hardware.
///
/// Behaves like the real window where it matters to buffer scheduling: the status bits of [ISP_CTRL_0] are
/// write-one-to-clear, and every other register reads back what was last written.  Tests and demos play the
/// hardware's part with the helpers, raising status as frames progress.
pub struct SimulatedIsp {
    words: Box<[AtomicU32]>,
}

impl SimulatedIsp {
    pub fn new() -> Self {
        Self {
            words: (0..ISP_REG_WINDOW / 4).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn word(&self, reg: u32) -> Option<&AtomicU32> {
        debug_assert_eq!(reg % 4, 0, "unaligned register access at {reg:#x}");
        self.words.get(reg as usize / 4)
    }

    /// Set status bits in [ISP_CTRL_0], as the hardware would.
    pub fn raise_status(&self, status: IspStatus) {
        if let Some(w) = self.word(ISP_CTRL_0) {
            w.fetch_or(status.bits(), Ordering::AcqRel);
        }
    }

    pub fn status(&self) -> IspStatus {
        IspStatus::from_bits_retain(self.read(ISP_CTRL_0))
    }

    /// Turn the video output on or off.
    pub fn enable_output(&self, enable: bool) {
        let value = if enable { IspStatus::ENUO.bits() } else { 0 };
        // Not set_bit: writing back pending status would clear it.
        let control = self.read(ISP_CTRL_0) & !ISPC_INT_ALL_MASK & !IspStatus::ENUO.bits();
        self.write(ISP_CTRL_0, control | value);
    }

    /// Turn statistics collection on or off.
    pub fn enable_statistics(&self, enable: bool) {
        let value = if enable { CSI_SC_EN } else { 0 };
        self.set_bit(CSI_MODULE_CFG, CSI_SC_EN, value);
    }

    /// Load the luma histogram accumulators.
    pub fn set_yhist(&self, bins: &[u32; YHIST_ENTRIES]) {
        for (i, bin) in bins.iter().enumerate() {
            self.write(YHIST_ACC_0 + 4 * i as u32, *bin);
        }
    }

    /// The luma and chroma addresses the video output writes next.
    pub fn yuv_addrs(&self) -> [DmaAddr; 2] {
        [self.read(Y_PLANE_START_ADDR), self.read(UV_PLANE_START_ADDR)]
    }

    /// The histogram and statistics block addresses the statistics unit writes next.
    pub fn scd_addrs(&self) -> [DmaAddr; 2] {
        [self.read(YHIST_CFG_4), self.read(SCD_CFG_0)]
    }

    pub fn scd_type(&self) -> ScdType {
        ScdType::from_sc_cfg(self.read(SC_CFG_1))
    }

    /// The last line of a frame has gone out.
    pub fn end_of_frame(&self) {
        self.raise_status(IspStatus::LINE);
    }

    /// The frame, and its statistics if collection is on, are done.
    pub fn frame_done(&self) {
        let mut status = IspStatus::ISP | IspStatus::CSI;
        if self.read(CSI_MODULE_CFG) & CSI_SC_EN != 0 {
            status |= IspStatus::SC;
        }
        self.raise_status(status);
    }
}

impl Default for SimulatedIsp {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimulatedIsp {
    fn read(&self, reg: u32) -> u32 {
        self.word(reg)
            .map(|w| w.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn write(&self, reg: u32, value: u32) {
        let Some(w) = self.word(reg) else {
            return;
        };

        if reg != ISP_CTRL_0 {
            w.store(value, Ordering::Release);
            return;
        }

        // Status bits clear where written with one and are otherwise untouched.  Control bits take the new value.
        let mut current = w.load(Ordering::Acquire);
        loop {
            let status = current & ISPC_INT_ALL_MASK & !value;
            let next = status | (value & !ISPC_INT_ALL_MASK);
            match w.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_write_one_to_clear() {
        let isp = SimulatedIsp::new();
        isp.enable_output(true);
        isp.raise_status(IspStatus::LINE | IspStatus::ISP);

        let status = isp.status();
        isp.write(ISP_CTRL_0, status.acknowledge(IspStatus::LINE));

        assert_eq!(isp.status(), IspStatus::ISP | IspStatus::ENUO);
    }

    #[test]
    fn test_plain_registers_read_back() {
        let isp = SimulatedIsp::new();
        isp.write(Y_PLANE_START_ADDR, 0x1000);
        isp.write(UV_PLANE_START_ADDR, 0x1800);
        assert_eq!(isp.yuv_addrs(), [0x1000, 0x1800]);
        assert_eq!(isp.read(ISP_REG_WINDOW as u32 + 4), 0);
    }

    #[test]
    fn test_frame_done_includes_statistics_when_enabled() {
        let isp = SimulatedIsp::new();
        isp.frame_done();
        assert!(!isp.status().contains(IspStatus::SC));

        isp.write(
            ISP_CTRL_0,
            isp.status()
                .acknowledge(IspStatus::ISP | IspStatus::CSI | IspStatus::SC),
        );
        isp.enable_statistics(true);
        isp.frame_done();
        assert!(isp.status().contains(IspStatus::SC | IspStatus::ISP));
    }
}
