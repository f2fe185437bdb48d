//! The ISP register map, as far as buffer scheduling touches it.
//!
//! Offsets are relative to the base of the ISP register window.
use bitflags::bitflags;

/// CSI module configuration.
pub const CSI_MODULE_CFG: u32 = 0x010;

/// Statistics collection enable, in [CSI_MODULE_CFG].
pub const CSI_SC_EN: u32 = 1 << 17;

/// CSI interrupt mask register.
pub const CSIINTS: u32 = 0x008;

/// The interrupt enable field of [CSIINTS], bits 17:16.
pub const CSI_INTS_MASK: u32 = 0x3 << 16;

/// Interrupt status and control.  Bits 27:24 are write-one-to-clear status; see [IspStatus].
pub const ISP_CTRL_0: u32 = 0x500;

/// Every status bit of [ISP_CTRL_0].
pub const ISPC_INT_ALL_MASK: u32 = 0xf << 24;

/// Shadow register update control.
pub const IESHD: u32 = 0xa50;
pub const SHAD_UP_M: u32 = 1 << 1;
pub const SHAD_UP_EN: u32 = 1 << 0;

/// Luma plane address of the video output.
pub const Y_PLANE_START_ADDR: u32 = 0xa80;

/// Chroma plane address of the video output.
pub const UV_PLANE_START_ADDR: u32 = 0xa84;

/// Statistics block address.
pub const SCD_CFG_0: u32 = 0x098;

/// Statistics configuration.  Bits 31:30 select the statistics type; see [ScdType].
pub const SC_CFG_1: u32 = 0x0bc;
pub const ISP_SC_SEL_MASK: u32 = 0x3 << 30;
const ISP_SC_SEL_SHIFT: u32 = 30;

/// Luma histogram address.
pub const YHIST_CFG_4: u32 = 0xcd8;

/// First of the luma histogram accumulators, one 32-bit register per bin.
pub const YHIST_ACC_0: u32 = 0xd00;

bitflags! {
    /// Status bits of [ISP_CTRL_0].
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct IspStatus: u32 {
        /// A frame's last line has been written.
        const LINE = 1 << 27;

        /// The statistics of a frame are complete.
        const SC = 1 << 26;

        /// The CSI receiver finished a frame.
        const CSI = 1 << 25;

        /// The ISP finished a frame.
        const ISP = 1 << 24;

        /// Video output is enabled.  Not a status bit.
        const ENUO = 1 << 20;
    }
}

impl IspStatus {
    /// What to write back to [ISP_CTRL_0] to acknowledge `ack` while keeping every control bit of `self`.
    pub fn acknowledge(self, ack: IspStatus) -> u32 {
        (self.bits() & !ISPC_INT_ALL_MASK) | ack.bits()
    }
}

/// The statistics the ISP gathers into the statistics block, which rotates frame by frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::IsVariant)]
#[repr(u32)]
pub enum ScdType {
    Dec = 0,
    Obc = 1,
    Oecf = 2,
    Awb = 3,
}

impl ScdType {
    pub fn from_bits(bits: u32) -> ScdType {
        match bits & 0x3 {
            0 => ScdType::Dec,
            1 => ScdType::Obc,
            2 => ScdType::Oecf,
            _ => ScdType::Awb,
        }
    }

    /// Read the type the hardware is currently collecting out of a [SC_CFG_1] value.
    pub fn from_sc_cfg(value: u32) -> ScdType {
        Self::from_bits((value & ISP_SC_SEL_MASK) >> ISP_SC_SEL_SHIFT)
    }

    /// This type, positioned for [SC_CFG_1].
    pub fn sc_cfg_bits(self) -> u32 {
        (self as u32) << ISP_SC_SEL_SHIFT
    }
}

/// Access to the ISP's 32-bit registers.
///
/// Called from interrupt context: implementations must neither block nor allocate.
pub trait RegisterIo: Send + Sync {
    fn read(&self, reg: u32) -> u32;

    fn write(&self, reg: u32, value: u32);

    /// Read-modify-write: replace the bits of `reg` under `mask` with those of `value`.
    fn set_bit(&self, reg: u32, mask: u32, value: u32) {
        let old = self.read(reg);
        self.write(reg, (old & !mask) | (value & mask));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<(u32, u32)>>);

    impl RegisterIo for Recorded {
        fn read(&self, _reg: u32) -> u32 {
            0xffff_0000
        }

        fn write(&self, reg: u32, value: u32) {
            self.0.lock().unwrap().push((reg, value));
        }
    }

    #[test]
    fn test_set_bit_preserves_other_bits() {
        let regs = Recorded::default();
        regs.set_bit(SC_CFG_1, ISP_SC_SEL_MASK, ScdType::Oecf.sc_cfg_bits());
        assert_eq!(*regs.0.lock().unwrap(), vec![(SC_CFG_1, 0xbfff_0000)]);
    }

    #[test]
    fn test_scd_type_positions() {
        for t in [ScdType::Dec, ScdType::Obc, ScdType::Oecf, ScdType::Awb] {
            assert_eq!(ScdType::from_sc_cfg(t.sc_cfg_bits() | 0x1234), t);
        }
        assert_eq!(ScdType::Awb.sc_cfg_bits(), 0xc000_0000);
    }

    #[test]
    fn test_acknowledge_keeps_control_bits() {
        let status = IspStatus::from_bits_retain(0x0f10_0001);
        assert_eq!(status.acknowledge(IspStatus::LINE), 0x0810_0001);
    }
}
