use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide unique ID.
///
/// Every [crate::Buffer] gets one when it is wrapped, so that a buffer can be followed through the queues and slots
/// and recognized when it comes back.  The ID contains a niche, meaning that `Option<UniqueId>` is never bigger than
/// the struct.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct UniqueId(NonZeroU64);

impl UniqueId {
    pub fn new() -> UniqueId {
        UniqueId(unique_u64())
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        UniqueId::new()
    }
}

fn unique_u64() -> NonZeroU64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let got = COUNTER.fetch_add(1, Ordering::Relaxed);
    NonZeroU64::new(got + 1).expect("the counter starts at 1 and would take centuries to wrap")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests run in parallel, so the values are not stable and must be checked against each other.
    #[test]
    fn test_unique_u64() {
        let (id1, id2, id3) = (unique_u64(), unique_u64(), unique_u64());
        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
        assert_ne!(id2, id3);
    }
}
