use crate::sync::{AtomicI32, Ordering};

/// A lock-free frame skip counter.
///
/// Set to `n` when a stream starts, the next `n` line interrupts are throttled: they still acknowledge hardware
/// status but neither rotate buffers nor program new addresses.  After that every frame goes through.
///
/// This is read at the very top of the line interrupt, before any stream lock is taken, so it is a plain atomic.
#[derive(Debug)]
pub struct FrameSkip {
    remaining: AtomicI32,
}

impl FrameSkip {
    pub fn new(frames: u32) -> Self {
        Self {
            remaining: AtomicI32::new(clamp_frames(frames)),
        }
    }

    /// Arm the counter to throttle the next `frames` frames.
    pub fn set(&self, frames: u32) {
        self.remaining.store(clamp_frames(frames), Ordering::Relaxed);
    }

    /// How many frames are still to be skipped.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed).max(0) as u32
    }

    /// Decrement the counter if it is positive, returning the decremented value.
    ///
    /// The returned value is negative exactly when the counter was already exhausted, in which case nothing is stored.
    pub fn dec_if_positive(&self) -> i32 {
        let mut current = self.remaining.load(Ordering::Relaxed);
        loop {
            let next = current - 1;
            if next < 0 {
                return next;
            }

            match self.remaining.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consume one frame of throttling.  Returns `true` if this frame should be skipped.
    pub fn throttle(&self) -> bool {
        self.dec_if_positive() >= 0
    }
}

impl Default for FrameSkip {
    fn default() -> Self {
        Self::new(0)
    }
}

fn clamp_frames(frames: u32) -> i32 {
    frames.min(i32::MAX as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sync::Arc;

    #[test]
    fn test_counts_down_then_stops() {
        crate::sync::wrap_test(|| {
            let skip = FrameSkip::new(2);
            assert_eq!(skip.dec_if_positive(), 1);
            assert_eq!(skip.dec_if_positive(), 0);
            assert_eq!(skip.dec_if_positive(), -1);
            assert_eq!(skip.dec_if_positive(), -1);
            assert_eq!(skip.remaining(), 0);
        });
    }

    #[test]
    fn test_only_one_winner() {
        crate::sync::wrap_test(|| {
            let skip = Arc::new(FrameSkip::new(1));

            let threads = (0..2)
                .map(|_| {
                    let skip = skip.clone();
                    crate::sync::spawn(move || skip.throttle())
                })
                .collect::<Vec<_>>();

            let winners = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|x| *x)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(skip.remaining(), 0);
        });
    }

    #[cfg(not(loom))]
    mod props {
        use crate::frame_skip::FrameSkip;

        use proptest::{prop_assert_eq, proptest};

        proptest! {
            #[test]
            fn throttles_exactly_n_frames(frames in 0u32..64, extra in 0u32..64) {
                let skip = FrameSkip::new(frames);
                let skipped = (0..frames + extra).filter(|_| skip.throttle()).count();
                prop_assert_eq!(skipped as u32, frames);
            }
        }
    }
}
