//! The double-buffer slot manager and output state machine.
//!
//! The hardware writes each frame into the address last programmed for the stream.  A stream owns two slots for the
//! buffers behind those addresses and an index, `active_buf`, naming the slot the hardware is writing.  On each line
//! event the interrupt handler calls [StreamBuffers::change_buffer]: the buffer in the active slot has just been
//! finished, and the engine decides what the hardware writes next.
//!
//! ```text
//!              swap, pending available                  swap, pending available
//!            ┌──────────────────────┐                  (late buffer, no flip)
//!            ▼                      │           ┌──────────────────────────────┐
//!   start ─► CONTINUOUS ────────────┘           │                              │
//!              │  ▲                             ▼                              │
//!              │  └──────────────────────── CONTINUOUS ◄── SINGLE ◄────────────┘
//!              │ swap, pending empty                         │
//!              └──────────────────────────────► SINGLE       │ swap, pending empty
//!                                                            ▼
//!                                        STOPPING ─(last buffer delivered)─► IDLE
//! ```
//!
//! - CONTINUOUS: steady state.  The finishing buffer goes to the ready queue, the next pending buffer is installed in
//!   the other slot, and `active_buf` flips, so slots alternate 0, 1, 0, 1...
//! - CONTINUOUS with nothing pending: becomes SINGLE.  Nothing is installed; the finishing buffer stays in its slot and
//!   the hardware keeps writing into it.
//! - SINGLE with nothing pending: becomes STOPPING.  The in-flight buffer moves to the last buffer cell rather than the
//!   ready queue, and is delivered once the ready queue has drained, after which the stream is IDLE.
//! - SINGLE with a late buffer: back to CONTINUOUS.  The finishing buffer goes to the ready queue and the late buffer
//!   takes over the same slot without flipping `active_buf`; the next swap flips as usual.
//! - OFF, RESERVED, IDLE and STOPPING: swaps do nothing.
use camss_synchronization::{FrameSkip, IrqLock};

use crate::buffer::{Buffer, BufferQueues, BufferState, DmaAddr};
use crate::clock::Clock;
use crate::done_queue::BufferDone;

/// The buffer streams of the ISP.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash, derive_more::IsVariant)]
pub enum StreamKind {
    /// Processed video frames, written as a luma and a chroma plane.
    Yuv,

    /// Per-frame statistics: a luma histogram and the statistics block.
    Scd,

    /// Tuning parameters flowing the other way, applied to the ISP once per frame.
    Params,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::IsVariant)]
pub enum OutputState {
    Off,
    Reserved,
    Single,
    Continuous,
    Idle,
    Stopping,
}

impl OutputState {
    /// Is the hardware writing into this stream's buffers?
    pub fn is_running(&self) -> bool {
        matches!(self, OutputState::Single | OutputState::Continuous)
    }

    /// May finished buffers be handed back?
    fn delivers(&self) -> bool {
        !matches!(self, OutputState::Off | OutputState::Reserved)
    }

    fn can_start(&self) -> bool {
        matches!(
            self,
            OutputState::Off | OutputState::Reserved | OutputState::Idle
        )
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum StreamError {
    #[error("The {kind:?} stream is already streaming (state {state:?})")]
    AlreadyStreaming { kind: StreamKind, state: OutputState },

    #[error("The {kind:?} stream is in use (state {state:?})")]
    Busy { kind: StreamKind, state: OutputState },
}

/// Everything about a stream which the interrupt handler and process context share.
///
/// Only reachable through the lock in [StreamBuffers], so every transition is seen whole.
#[derive(Debug)]
pub struct StreamState {
    active_buf: usize,
    buf: [Option<Buffer>; 2],
    last_buffer: Option<Buffer>,
    queues: BufferQueues,
    state: OutputState,

    /// Sequence number for the next completed buffer.
    sequence: u32,
}

impl StreamState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            active_buf: 0,
            buf: [None, None],
            last_buffer: None,
            queues: BufferQueues::with_capacity(capacity),
            state: OutputState::Off,
            sequence: 0,
        }
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn active_buf(&self) -> usize {
        self.active_buf
    }

    pub fn slot(&self, index: usize) -> Option<&Buffer> {
        self.buf.get(index).and_then(|b| b.as_ref())
    }

    pub fn last_buffer(&self) -> Option<&Buffer> {
        self.last_buffer.as_ref()
    }

    pub fn queues(&self) -> &BufferQueues {
        &self.queues
    }

    /// The sequence number the next completed buffer will get.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// How many buffers this stream holds, wherever they are.
    pub fn buffer_count(&self) -> usize {
        self.queues.pending_len()
            + self.queues.ready_len()
            + self.buf.iter().flatten().count()
            + self.last_buffer.iter().count()
    }

    pub(crate) fn add_pending(&mut self, buffer: Buffer) {
        self.queues.add_pending(buffer);
    }

    pub(crate) fn add_ready(&mut self, buffer: Buffer) {
        self.queues.add_ready(buffer);
    }

    /// Arm the stream: install the oldest pending buffer into slot 0 and pick the starting state.
    ///
    /// Returns the armed buffer, whose addresses must be programmed before the hardware is enabled.
    pub(crate) fn start(&mut self) -> Option<&mut Buffer> {
        if !matches!(self.state, OutputState::Idle) {
            // A fresh session.  Restarting from IDLE keeps counting.
            self.sequence = 0;
        }
        self.state = OutputState::Idle;

        // Slots are empty unless something went wrong.  Put anything left back in front of the pending queue, oldest
        // first, so it isn't lost or reordered.
        if let Some(b) = self.buf[self.active_buf ^ 1].take() {
            self.queues.return_pending(b);
        }
        if let Some(b) = self.buf[self.active_buf].take() {
            self.queues.return_pending(b);
        }
        self.active_buf = 0;

        if let Some(first) = self.queues.get_pending() {
            self.buf[0] = Some(first);
            self.state = if self.queues.pending_len() > 0 {
                OutputState::Continuous
            } else {
                OutputState::Single
            };
        }

        self.buf[0].as_mut()
    }

    /// The hardware has finished the active buffer: decide what it writes next.
    ///
    /// Returns the buffer now in the active slot, which the caller must program into the hardware, or `None` if the
    /// stream is not running or has nothing left to write into.
    pub(crate) fn change_buffer(&mut self) -> Option<&mut Buffer> {
        if !self.state.is_running() {
            return None;
        }

        let mut active = self.active_buf;
        if self.buf[active].is_none() {
            irq_debug!("missing ready buf {} {:?}", active, self.state);
            active ^= 1;
            if self.buf[active].is_none() {
                irq_debug!("missing ready buf2 {} {:?}", active, self.state);
                return None;
            }
            self.active_buf = active;
        }

        match self.queues.get_pending() {
            Some(next) => self.update_on_next(next),
            None => self.update_on_last(),
        }

        self.buf[self.active_buf].as_mut()
    }

    fn update_on_last(&mut self) {
        match self.state {
            OutputState::Continuous => {
                self.state = OutputState::Single;
            }
            OutputState::Single => {
                self.state = OutputState::Stopping;
                self.last_buffer = self.buf[self.active_buf].take();
            }
            _ => {}
        }
    }

    fn update_on_next(&mut self, next: Buffer) {
        let active = self.active_buf;
        match self.state {
            OutputState::Continuous => {
                let other = active ^ 1;
                if self.buf[other].is_some() {
                    // Already armed; that buffer was popped before `next`, so it goes first.
                    irq_warn!(
                        "slot {} is already armed, buffer {} stays pending",
                        other,
                        next.index()
                    );
                    self.queues.return_pending(next);
                } else {
                    self.buf[other] = Some(next);
                }

                if let Some(ready) = self.buf[active].take() {
                    self.queues.add_ready(ready);
                }
                self.active_buf = other;
            }
            OutputState::Single => {
                if let Some(ready) = self.buf[active].take() {
                    self.queues.add_ready(ready);
                }
                self.buf[active] = Some(next);
                self.state = OutputState::Continuous;
            }
            _ => self.queues.return_pending(next),
        }
    }

    fn stamp(&mut self, buffer: &mut Buffer, now_ns: u64) {
        buffer.stamp(now_ns, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Pop the oldest finished buffer, stamped with `now_ns` and the next sequence number.
    pub(crate) fn buf_done(&mut self, now_ns: u64) -> Option<Buffer> {
        if !self.state.delivers() {
            return None;
        }

        let mut ready = self.queues.get_ready()?;
        self.stamp(&mut ready, now_ns);
        Some(ready)
    }

    /// Once everything ahead of it has been delivered, hand out the last buffer of a stopping stream and go idle.
    pub(crate) fn take_last_buffer(&mut self, now_ns: u64) -> Option<Buffer> {
        if !matches!(self.state, OutputState::Stopping) || self.queues.ready_len() != 0 {
            return None;
        }

        let mut last = self.last_buffer.take()?;
        self.stamp(&mut last, now_ns);
        self.state = OutputState::Idle;
        Some(last)
    }

    /// [Self::buf_done], falling back to [Self::take_last_buffer].
    pub(crate) fn complete_next(&mut self, now_ns: u64) -> Option<Buffer> {
        self.buf_done(now_ns)
            .or_else(|| self.take_last_buffer(now_ns))
    }

    /// Hand every buffer this stream holds to `done`: both queues, both slots, and the last buffer.
    pub(crate) fn flush(&mut self, state: BufferState, mut done: impl FnMut(Buffer, BufferState)) {
        self.queues.flush(state, &mut done);
        for slot in self.buf.iter_mut() {
            if let Some(b) = slot.take() {
                done(b, state);
            }
        }
        if let Some(b) = self.last_buffer.take() {
            done(b, state);
        }
    }
}

/// One buffer stream: its shared state behind an interrupt-safe lock, plus its frame skip counter.
pub struct StreamBuffers {
    kind: StreamKind,
    inner: IrqLock<StreamState>,
    frame_skip: FrameSkip,
    capacity: usize,
}

impl StreamBuffers {
    /// A stream in the OFF state which can hold up to `capacity` buffers.
    pub fn new(kind: StreamKind, capacity: usize) -> Self {
        Self {
            kind,
            inner: IrqLock::new(StreamState::new(capacity)),
            frame_skip: FrameSkip::new(0),
            capacity,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn frame_skip(&self) -> &FrameSkip {
        &self.frame_skip
    }

    pub fn state(&self) -> OutputState {
        self.inner.with(|s| s.state)
    }

    /// Look at the stream under its lock.
    pub fn inspect<R>(&self, what: impl FnOnce(&StreamState) -> R) -> R {
        self.inner.with(|s| what(s))
    }

    /// Claim an OFF stream for an opened video node.
    pub fn reserve(&self) -> Result<(), StreamError> {
        self.inner.with(|s| match s.state {
            OutputState::Off => {
                s.state = OutputState::Reserved;
                Ok(())
            }
            state => Err(StreamError::Busy {
                kind: self.kind,
                state,
            }),
        })
    }

    /// Give a reserved stream back.  Does nothing in any other state.
    pub fn release(&self) {
        self.inner.with(|s| {
            if matches!(s.state, OutputState::Reserved) {
                s.state = OutputState::Off;
            }
        });
    }

    /// Append a buffer to the pending queue.  If the stream is full, the buffer is handed back.
    pub fn queue_buffer(&self, buffer: Buffer) -> Result<(), Buffer> {
        self.inner.with(|s| {
            if s.buffer_count() >= self.capacity {
                return Err(buffer);
            }
            s.add_pending(buffer);
            Ok(())
        })
    }

    /// Append a buffer straight to the ready queue, for streams the CPU consumes in order without hardware slots.
    pub fn queue_ready(&self, buffer: Buffer) -> Result<(), Buffer> {
        self.inner.with(|s| {
            if s.buffer_count() >= self.capacity {
                return Err(buffer);
            }
            s.add_ready(buffer);
            Ok(())
        })
    }

    /// Start streaming, calling `arm` under the lock with the first buffer if there is one.
    pub fn start_with<R>(
        &self,
        arm: impl FnOnce(&mut Buffer) -> R,
    ) -> Result<Option<R>, StreamError> {
        self.inner.with(|s| {
            if !s.state.can_start() {
                return Err(StreamError::AlreadyStreaming {
                    kind: self.kind,
                    state: s.state,
                });
            }
            Ok(s.start().map(arm))
        })
    }

    /// Rotate buffers, returning the addresses the hardware must write next.
    pub fn change_buffer(&self) -> Option<[DmaAddr; 2]> {
        self.change_buffer_with(|b| b.addrs())
    }

    /// Rotate buffers, calling `program` under the lock with the buffer the hardware writes next.
    pub fn change_buffer_with<R>(&self, program: impl FnOnce(&mut Buffer) -> R) -> Option<R> {
        self.inner.with(|s| s.change_buffer().map(program))
    }

    /// Pop the oldest finished buffer, stamped with the time and the next sequence number.
    pub fn buf_done(&self, clock: &dyn Clock) -> Option<Buffer> {
        self.inner.with(|s| s.buf_done(clock.now_ns()))
    }

    /// Hand out the last buffer of a stopping stream, once nothing is ahead of it.
    pub fn take_last_buffer(&self, clock: &dyn Clock) -> Option<Buffer> {
        self.inner.with(|s| s.take_last_buffer(clock.now_ns()))
    }

    /// The next buffer to deliver for one hardware completion: the ready queue first, then the last buffer.
    pub fn complete_next(&self, clock: &dyn Clock) -> Option<Buffer> {
        self.inner.with(|s| s.complete_next(clock.now_ns()))
    }

    /// Return every buffer the stream holds through `sink`, in `state`.
    ///
    /// Runs under the same lock as the interrupt handler, so it cannot interleave with a swap or a completion.
    pub fn flush_buffers(&self, state: BufferState, sink: &dyn BufferDone) {
        self.inner.with(|s| {
            s.flush(state, |buffer, state| sink.buffer_done(self.kind, buffer, state));
        });
    }

    /// Stop streaming and return every buffer through `sink`, in `state`.
    pub fn stop(&self, state: BufferState, sink: &dyn BufferDone) {
        self.inner.with(|s| {
            s.state = OutputState::Off;
            s.flush(state, |buffer, state| sink.buffer_done(self.kind, buffer, state));
        });
        self.frame_skip.set(0);
    }
}
