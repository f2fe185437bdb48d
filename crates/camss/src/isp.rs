//! The per-device context and the ISP's interrupt handlers.
use std::sync::Arc;

use crate::buffer::{Buffer, BufferError, BufferState, DmaAddr, MappedMemory};
use crate::clock::{Clock, MonotonicClock};
use crate::config::*;
use crate::done_queue::BufferDone;
use crate::error::Result;
use crate::irq::IrqReturn;
use crate::options::{CamssOptions, OptionsError};
use crate::output::{StreamBuffers, StreamKind};
use crate::registers::*;

/// Applies a parameters buffer to the ISP.
///
/// The buffer starts with a 32-bit mask of the tuning modules it carries settings for.  Called from interrupt
/// context once per frame with the oldest queued parameters buffer.
pub trait ParamsApply: Send + Sync {
    fn apply(&self, regs: &dyn RegisterIo, params: &MappedMemory);
}

/// Consumes parameters buffers without touching the hardware.
#[derive(Debug, Default)]
pub struct NoParams;

impl ParamsApply for NoParams {
    fn apply(&self, _regs: &dyn RegisterIo, _params: &MappedMemory) {}
}

/// One ISP: its registers, its three buffer streams, and where finished buffers go.
///
/// Build one per device and share it, usually in an [Arc], between the interrupt lines ([crate::IspIrqs]) and the
/// threads which queue buffers and start or stop streams.
pub struct Camss {
    regs: Arc<dyn RegisterIo>,
    yuv: StreamBuffers,
    scd: StreamBuffers,
    params: StreamBuffers,
    sink: Arc<dyn BufferDone>,
    clock: Arc<dyn Clock>,
    params_apply: Box<dyn ParamsApply>,
    options: CamssOptions,
}

impl Camss {
    pub fn new(
        regs: Arc<dyn RegisterIo>,
        sink: Arc<dyn BufferDone>,
        options: CamssOptions,
    ) -> Result<Camss> {
        options.validate()?;
        if let Some(got) = sink.pending_capacity() {
            let needed = options.outstanding_buffers();
            if got < needed {
                return Err(OptionsError::DoneQueueTooSmall { needed, got }.into());
            }
        }
        crate::logging::ensure_log_ctx();

        let cap = options.max_buffers;
        Ok(Camss {
            regs,
            yuv: StreamBuffers::new(StreamKind::Yuv, cap),
            scd: StreamBuffers::new(StreamKind::Scd, cap),
            params: StreamBuffers::new(StreamKind::Params, cap),
            sink,
            clock: Arc::new(MonotonicClock::new()),
            params_apply: Box::new(NoParams),
            options,
        })
    }

    /// Stamp completed buffers with this clock instead of a [MonotonicClock].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_params_apply(mut self, params_apply: Box<dyn ParamsApply>) -> Self {
        self.params_apply = params_apply;
        self
    }

    pub fn options(&self) -> &CamssOptions {
        &self.options
    }

    pub fn stream(&self, kind: StreamKind) -> &StreamBuffers {
        match kind {
            StreamKind::Yuv => &self.yuv,
            StreamKind::Scd => &self.scd,
            StreamKind::Params => &self.params,
        }
    }

    pub fn reserve(&self, kind: StreamKind) -> Result<()> {
        self.stream(kind).reserve()?;
        Ok(())
    }

    pub fn release(&self, kind: StreamKind) {
        self.stream(kind).release();
    }

    /// Hand a buffer to a stream.
    ///
    /// Statistics buffers must be mapped and large enough for the statistics layout; parameters buffers must be
    /// mapped and hold at least the module mask.  A buffer which is refused is returned through the completion sink
    /// in the error state, and the reason is returned.
    pub fn queue_buffer(&self, kind: StreamKind, buffer: Buffer) -> Result<()> {
        let needed = match kind {
            StreamKind::Yuv => None,
            StreamKind::Scd => Some(SC_BUFFER_SIZE),
            StreamKind::Params => Some(PARAMS_MIN_SIZE),
        };
        if let Some(needed) = needed {
            if let Err(e) = buffer.require_mapping(needed) {
                self.refuse(kind, buffer, &e);
                return Err(e.into());
            }
        }

        let stream = self.stream(kind);
        let queued = match kind {
            StreamKind::Params => stream.queue_ready(buffer),
            StreamKind::Yuv | StreamKind::Scd => stream.queue_buffer(buffer),
        };
        queued.map_err(|buffer| {
            let e = BufferError::QueueFull {
                max: self.options.max_buffers,
            };
            self.refuse(kind, buffer, &e);
            e.into()
        })
    }

    fn refuse(&self, kind: StreamKind, buffer: Buffer, why: &BufferError) {
        log::warn!("Refusing {:?} buffer {}: {}", kind, buffer.index(), why);
        self.sink.buffer_done(kind, buffer, BufferState::Error);
    }

    /// Start a stream, programming the first buffer's addresses into the hardware.
    pub fn start_stream(&self, kind: StreamKind) -> Result<()> {
        let stream = self.stream(kind);
        // Programmed under the stream lock, so a line interrupt can't slip in between.
        let armed = stream.start_with(|b| {
            let addrs = b.addrs();
            match kind {
                StreamKind::Yuv => {
                    stream.frame_skip().set(self.options.frame_skip);
                    self.set_yuv_addr(addrs);
                }
                StreamKind::Scd => self.set_scd_addr(addrs, ScdType::Awb),
                StreamKind::Params => {}
            }
            addrs
        })?;

        log::debug!(
            "Started {:?} stream in {:?}, first buffer at {:x?}",
            kind,
            stream.state(),
            armed
        );
        Ok(())
    }

    /// Stop a stream and return all of its buffers in `terminal`.
    pub fn stop_stream(&self, kind: StreamKind, terminal: BufferState) {
        self.stream(kind).stop(terminal, &*self.sink);
        log::debug!("Stopped {:?} stream", kind);
    }

    fn set_yuv_addr(&self, addrs: [DmaAddr; 2]) {
        self.regs.write(Y_PLANE_START_ADDR, addrs[0]);
        self.regs.write(UV_PLANE_START_ADDR, addrs[1]);
    }

    fn set_scd_addr(&self, addrs: [DmaAddr; 2], next: ScdType) {
        self.regs
            .set_bit(SC_CFG_1, ISP_SC_SEL_MASK, next.sc_cfg_bits());
        self.regs.write(SCD_CFG_0, addrs[1]);
        self.regs.write(YHIST_CFG_4, addrs[0]);
    }

    /// Mark a statistics buffer with the type about to be collected into it, returning the type to collect next.
    fn fill_flag(&self, buffer: &mut Buffer) -> ScdType {
        let (flag, next) = match ScdType::from_sc_cfg(self.regs.read(SC_CFG_1)) {
            ScdType::Awb => (SC_FLAG_AWB, ScdType::Oecf),
            _ => (SC_FLAG_AE_AF, ScdType::Awb),
        };

        let index = buffer.index();
        let written = buffer
            .mapping_mut()
            .ok_or(BufferError::MissingMapping { index })
            .and_then(|m| m.write_u16(SC_FLAG_OFFSET, flag));
        if let Err(e) = written {
            irq_warn!("Cannot flag statistics buffer {}: {}", index, e);
        }
        next
    }

    /// Copy the luma histogram accumulators into a finished statistics buffer.
    fn fill_yhist(&self, buffer: &mut Buffer) {
        let mut hist = [0u32; YHIST_ENTRIES];
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin = self.regs.read(YHIST_ACC_0 + 4 * i as u32);
        }

        let index = buffer.index();
        let written = buffer
            .mapping_mut()
            .ok_or(BufferError::MissingMapping { index })
            .and_then(|m| m.write_words(SC_Y_HISTOGRAM_OFFSET, &hist));
        if let Err(e) = written {
            irq_warn!("Cannot fill histogram of statistics buffer {}: {}", index, e);
        }
    }

    fn deliver(&self, kind: StreamKind, buffer: Buffer) {
        self.sink.buffer_done(kind, buffer, BufferState::Done);
    }

    /// Handle the end of a frame's last line: rotate the video and statistics buffers.
    pub fn line_irq_handler(&self) -> IrqReturn {
        let status = IspStatus::from_bits_retain(self.regs.read(ISP_CTRL_0));
        if !status.contains(IspStatus::LINE) {
            return IrqReturn::None;
        }

        if !self.yuv.frame_skip().throttle() {
            if status.contains(IspStatus::ENUO) {
                if let Some(addrs) = self.yuv.change_buffer() {
                    self.set_yuv_addr(addrs);
                }
            }

            if self.regs.read(CSI_MODULE_CFG) & CSI_SC_EN != 0 {
                let next = self
                    .scd
                    .change_buffer_with(|b| (b.addrs(), self.fill_flag(b)));
                if let Some((addrs, scd_type)) = next {
                    self.set_scd_addr(addrs, scd_type);
                }
            }
        }

        self.regs.set_bit(CSIINTS, CSI_INTS_MASK, 0x3 << 16);
        self.regs
            .set_bit(IESHD, SHAD_UP_M | SHAD_UP_EN, SHAD_UP_M | SHAD_UP_EN);

        self.regs
            .write(ISP_CTRL_0, status.acknowledge(IspStatus::LINE));
        IrqReturn::Handled
    }

    /// Handle the end of a frame: apply the next parameters, deliver finished buffers.
    pub fn isp_irq_handler(&self) -> IrqReturn {
        let status = IspStatus::from_bits_retain(self.regs.read(ISP_CTRL_0));
        if !status.contains(IspStatus::ISP) {
            return IrqReturn::None;
        }

        if let Some(params) = self.params.complete_next(&*self.clock) {
            if let Some(m) = params.mapping() {
                self.params_apply.apply(&*self.regs, m);
            }
            self.deliver(StreamKind::Params, params);
        }

        if status.contains(IspStatus::ENUO) {
            if let Some(frame) = self.yuv.complete_next(&*self.clock) {
                self.deliver(StreamKind::Yuv, frame);
            }
        }

        if status.contains(IspStatus::SC) {
            if let Some(mut stats) = self.scd.complete_next(&*self.clock) {
                self.fill_yhist(&mut stats);
                self.deliver(StreamKind::Scd, stats);
            }
        }

        self.regs.write(
            ISP_CTRL_0,
            status.acknowledge(IspStatus::ISP | IspStatus::CSI | IspStatus::SC),
        );
        IrqReturn::Handled
    }
}
