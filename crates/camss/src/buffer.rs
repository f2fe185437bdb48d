//! Buffers and the two FIFO queues which hold them while they wait for hardware or for delivery.
use std::collections::VecDeque;

use crate::unique_id::UniqueId;

/// A bus address the ISP can DMA to.  The ISP's address registers are 32 bits wide.
pub type DmaAddr = u32;

/// What a buffer's owner is told when the buffer comes back.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::IsVariant)]
pub enum BufferState {
    /// The hardware wrote a frame into the buffer.
    Done,

    /// The buffer is returned without valid contents, for example because its stream was stopped.
    Error,

    /// The buffer is returned unused, because its stream failed to start.
    Queued,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum BufferError {
    #[error("Buffer {index} needs a CPU mapping on this stream but has none")]
    MissingMapping { index: u32 },

    #[error("Buffer {index} has a mapping of {got} bytes but this stream needs at least {needed}")]
    MappingTooSmall { index: u32, needed: usize, got: usize },

    #[error("Access of {len} bytes at offset {offset} is outside a mapping of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("The stream already holds its maximum of {max} buffers")]
    QueueFull { max: usize },
}

/// CPU-visible memory behind a buffer, for the metadata streams where the CPU reads or writes buffer contents.
///
/// Values are stored in native byte order, the same order the ISP and the CPU share.
pub struct MappedMemory {
    bytes: Box<[u8]>,
}

impl MappedMemory {
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, BufferError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(BufferError::OutOfBounds {
                offset,
                len,
                size: self.bytes.len(),
            })?;
        Ok(offset..end)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, BufferError> {
        let r = self.range(offset, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[r]);
        Ok(u32::from_ne_bytes(word))
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, BufferError> {
        let r = self.range(offset, 2)?;
        let mut half = [0u8; 2];
        half.copy_from_slice(&self.bytes[r]);
        Ok(u16::from_ne_bytes(half))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<(), BufferError> {
        let r = self.range(offset, 2)?;
        self.bytes[r].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Write a run of words starting at `offset`.
    pub fn write_words(&mut self, offset: usize, words: &[u32]) -> Result<(), BufferError> {
        let src: &[u8] = bytemuck::cast_slice(words);
        let r = self.range(offset, src.len())?;
        self.bytes[r].copy_from_slice(src);
        Ok(())
    }
}

impl From<Vec<u8>> for MappedMemory {
    fn from(value: Vec<u8>) -> Self {
        Self {
            bytes: value.into_boxed_slice(),
        }
    }
}

impl std::fmt::Debug for MappedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedMemory")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One frame-sized region of memory submitted by the application.
///
/// Buffers are move-only.  At any moment exactly one place owns a given buffer: a queue, a hardware slot, the last
/// buffer cell of a stopping stream, or the application.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct Buffer {
    id: UniqueId,

    /// The framework's index for this buffer.
    index: u32,

    /// Plane addresses: luma and chroma for video, histogram and statistics for the statistics stream.
    addr: [DmaAddr; 2],

    #[derivative(Debug = "ignore")]
    vaddr: Option<MappedMemory>,

    sequence: u32,

    timestamp_ns: u64,
}

impl Buffer {
    pub fn new(index: u32, addr: [DmaAddr; 2]) -> Self {
        Self {
            id: UniqueId::new(),
            index,
            addr,
            vaddr: None,
            sequence: 0,
            timestamp_ns: 0,
        }
    }

    /// Attach a CPU mapping to this buffer.
    pub fn with_mapping(mut self, mapping: MappedMemory) -> Self {
        self.vaddr = Some(mapping);
        self
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn addrs(&self) -> [DmaAddr; 2] {
        self.addr
    }

    pub fn mapping(&self) -> Option<&MappedMemory> {
        self.vaddr.as_ref()
    }

    pub fn mapping_mut(&mut self) -> Option<&mut MappedMemory> {
        self.vaddr.as_mut()
    }

    /// The sequence number stamped at completion.  Meaningless before then.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The completion timestamp in nanoseconds.  Meaningless before completion.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub(crate) fn stamp(&mut self, timestamp_ns: u64, sequence: u32) {
        self.timestamp_ns = timestamp_ns;
        self.sequence = sequence;
    }

    /// Check that this buffer has a mapping of at least `needed` bytes.
    pub(crate) fn require_mapping(&self, needed: usize) -> Result<(), BufferError> {
        let got = self
            .vaddr
            .as_ref()
            .ok_or(BufferError::MissingMapping { index: self.index })?
            .len();
        if got < needed {
            return Err(BufferError::MappingTooSmall {
                index: self.index,
                needed,
                got,
            });
        }
        Ok(())
    }
}

/// The pending and ready queues of one stream.
///
/// Both are FIFOs.  They are preallocated to the most buffers a stream can hold, so that pushes made from interrupt
/// context never allocate.
#[derive(Debug)]
pub struct BufferQueues {
    /// Submitted, not yet given to the hardware.
    pending: VecDeque<Buffer>,

    /// Given to the hardware and finished, or next to finish, awaiting delivery.
    ready: VecDeque<Buffer>,
}

impl BufferQueues {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            ready: VecDeque::with_capacity(capacity),
        }
    }

    pub fn add_pending(&mut self, buffer: Buffer) {
        self.pending.push_back(buffer);
    }

    pub fn get_pending(&mut self) -> Option<Buffer> {
        self.pending.pop_front()
    }

    /// Put a buffer back at the head of the pending queue, ahead of everything submitted after it.
    pub(crate) fn return_pending(&mut self, buffer: Buffer) {
        self.pending.push_front(buffer);
    }

    pub fn add_ready(&mut self, buffer: Buffer) {
        self.ready.push_back(buffer);
    }

    pub fn get_ready(&mut self) -> Option<Buffer> {
        self.ready.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty()
    }

    /// Drain the pending and then the ready queue, handing every buffer to `done` with `state`.
    pub fn flush(&mut self, state: BufferState, mut done: impl FnMut(Buffer, BufferState)) {
        for buffer in self.pending.drain(..) {
            done(buffer, state);
        }
        for buffer in self.ready.drain(..) {
            done(buffer, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn indices(queue: &mut BufferQueues, pending: bool) -> Vec<u32> {
        let mut out = vec![];
        loop {
            let next = if pending {
                queue.get_pending()
            } else {
                queue.get_ready()
            };
            match next {
                Some(b) => out.push(b.index()),
                None => return out,
            }
        }
    }

    #[test]
    fn test_queues_are_fifo() {
        let mut q = BufferQueues::with_capacity(4);
        for i in 0..4 {
            q.add_pending(Buffer::new(i, [0, 0]));
            q.add_ready(Buffer::new(10 + i, [0, 0]));
        }
        assert_eq!(indices(&mut q, true), vec![0, 1, 2, 3]);
        assert_eq!(indices(&mut q, false), vec![10, 11, 12, 13]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_empty_queues_return_none() {
        let mut q = BufferQueues::with_capacity(1);
        assert!(q.get_pending().is_none());
        assert!(q.get_ready().is_none());
    }

    #[test]
    fn test_return_pending_goes_to_head() {
        let mut q = BufferQueues::with_capacity(2);
        q.add_pending(Buffer::new(1, [0, 0]));
        q.return_pending(Buffer::new(0, [0, 0]));
        assert_eq!(indices(&mut q, true), vec![0, 1]);
    }

    #[test]
    fn test_flush_returns_everything_once() {
        let mut q = BufferQueues::with_capacity(8);
        let mut ids = vec![];
        for i in 0..3 {
            let b = Buffer::new(i, [0, 0]);
            ids.push(b.id());
            q.add_pending(b);
        }
        for i in 3..5 {
            let b = Buffer::new(i, [0, 0]);
            ids.push(b.id());
            q.add_ready(b);
        }

        let mut flushed = vec![];
        q.flush(BufferState::Error, |b, state| {
            assert_eq!(state, BufferState::Error);
            flushed.push(b.id());
        });

        assert_eq!(flushed, ids);
        assert!(q.is_empty());
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.ready_len(), 0);
    }

    #[test]
    fn test_mapping_access() {
        let mut m = MappedMemory::zeroed(8);
        m.write_words(0, &[1, 2]).unwrap();
        assert_eq!(m.read_u32(0).unwrap(), 1);
        assert_eq!(m.read_u32(4).unwrap(), 2);
        m.write_u16(6, 0xffff).unwrap();
        assert_eq!(m.read_u16(6).unwrap(), 0xffff);
        assert!(m.read_u32(5).is_err());
        assert!(m.write_words(4, &[1, 2]).is_err());
        assert!(m.read_u16(usize::MAX).is_err());
    }

    #[test]
    fn test_require_mapping() {
        let bare = Buffer::new(3, [0, 0]);
        assert!(matches!(
            bare.require_mapping(4),
            Err(BufferError::MissingMapping { index: 3 })
        ));

        let small = Buffer::new(4, [0, 0]).with_mapping(MappedMemory::zeroed(2));
        assert!(matches!(
            small.require_mapping(4),
            Err(BufferError::MappingTooSmall {
                index: 4,
                needed: 4,
                got: 2
            })
        ));

        let ok = Buffer::new(5, [0, 0]).with_mapping(MappedMemory::zeroed(4));
        assert!(ok.require_mapping(4).is_ok());
    }
}
