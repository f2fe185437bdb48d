use thingbuf::ThingBuf;

use crate::buffer::{Buffer, BufferState};
use crate::option_recycler::OptionRecycler;
use crate::options::CamssOptions;
use crate::output::StreamKind;

/// Where buffers go when the engine is finished with them.
///
/// Called once per buffer, with the buffer's final state, from interrupt context as well as from process context
/// (when a stream is flushed).  Implementations must neither block nor allocate, and are called with the owning
/// stream's lock held.
pub trait BufferDone: Send + Sync {
    fn buffer_done(&self, stream: StreamKind, buffer: Buffer, state: BufferState);

    /// How many completions this sink can hold before the application takes them, or `None` if it never fills.
    ///
    /// A bounded sink must hold every buffer the streams can own at once, or stopping a full set of streams would
    /// have nowhere to put them; [crate::Camss::new] refuses sinks which can't.
    fn pending_capacity(&self) -> Option<usize> {
        None
    }
}

/// A buffer returned to the application.
#[derive(Debug)]
pub struct Completion {
    pub stream: StreamKind,
    pub state: BufferState,
    pub buffer: Buffer,
}

/// A bounded queue of completed buffers for the application to dequeue.
///
/// Pushing never blocks or allocates; the slots are allocated up front.  [crate::Camss::new] refuses a queue smaller
/// than the number of buffers its streams can hold.  A queue shared between devices can still fill, in which case the
/// completion is logged and the buffer is dropped as a last resort.
pub struct DoneQueue {
    queue: ThingBuf<Option<Completion>, OptionRecycler>,
}

impl DoneQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ThingBuf::with_recycle(capacity, OptionRecycler),
        }
    }

    /// Build a completion queue sized for `options`.
    pub fn for_options(options: &CamssOptions) -> Self {
        Self::new(options.done_queue_capacity.max(1))
    }

    /// Dequeue the oldest completion, if any.
    pub fn dequeue(&self) -> Option<Completion> {
        self.queue.pop().flatten()
    }

    /// Dequeue everything currently available.
    pub fn drain(&self) -> Vec<Completion> {
        std::iter::from_fn(|| self.dequeue()).collect()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl BufferDone for DoneQueue {
    fn buffer_done(&self, stream: StreamKind, buffer: Buffer, state: BufferState) {
        let completion = Completion {
            stream,
            state,
            buffer,
        };

        if let Err(full) = self.queue.push(Some(completion)) {
            let lost = full.into_inner();
            irq_error!(
                "Completion queue is full; dropping {:?} buffer {:?}",
                stream,
                lost.as_ref().map(|c| c.buffer.index())
            );
        }
    }

    fn pending_capacity(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo() {
        let q = DoneQueue::new(4);
        for i in 0..3 {
            q.buffer_done(StreamKind::Yuv, Buffer::new(i, [0, 0]), BufferState::Done);
        }
        let got = q
            .drain()
            .into_iter()
            .map(|c| c.buffer.index())
            .collect::<Vec<_>>();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let q = DoneQueue::new(1);
        q.buffer_done(StreamKind::Scd, Buffer::new(0, [0, 0]), BufferState::Done);
        q.buffer_done(StreamKind::Scd, Buffer::new(1, [0, 0]), BufferState::Done);
        let c = q.dequeue().unwrap();
        assert_eq!(c.buffer.index(), 0);
        assert_eq!(c.stream, StreamKind::Scd);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_reports_its_capacity() {
        let q = DoneQueue::for_options(&CamssOptions::default());
        assert_eq!(q.pending_capacity(), Some(CamssOptions::default().outstanding_buffers()));
    }
}
