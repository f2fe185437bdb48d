/// The most buffers the streaming framework will allocate for one queue.
pub const VIDEO_MAX_FRAME: usize = 64;

/// Number of buffer streams the ISP drives: YUV capture, statistics capture, and the parameters output.
pub const STREAM_COUNT: usize = 3;

/// Size in bytes of the ISP register window.
pub const ISP_REG_WINDOW: usize = 0x1000;

/// Entries in the luma histogram the ISP accumulates per frame.
pub const YHIST_ENTRIES: usize = 64;

// Layout of a statistics buffer as seen by userspace:
//
// ```text
// u32 y_histogram[64];
// u32 reserved0[33];
// u32 bright_sc[4096];
// u32 reserved1[96];
// u32 ae_hist_y[128];
// u32 reserved2[511];
// u16 flag;
// ```
//
// Only the histogram and the flag are written by the CPU; the rest is DMA'd by the ISP.

/// Byte offset of the luma histogram in a statistics buffer.
pub const SC_Y_HISTOGRAM_OFFSET: usize = 0;

/// Byte offset of the statistics type flag in a statistics buffer.
pub const SC_FLAG_OFFSET: usize = (YHIST_ENTRIES + 33 + 4096 + 96 + 128 + 511) * 4;

/// The smallest mapping a statistics buffer may have.
pub const SC_BUFFER_SIZE: usize = SC_FLAG_OFFSET + 4;

/// Flag value marking a statistics buffer holding white balance data.
pub const SC_FLAG_AWB: u16 = 0x0;

/// Flag value marking a statistics buffer holding exposure and focus data.
pub const SC_FLAG_AE_AF: u16 = 0xffff;

/// The smallest mapping a parameters buffer may have: its module enable mask.
pub const PARAMS_MIN_SIZE: usize = 4;
