use crate::config::{STREAM_COUNT, VIDEO_MAX_FRAME};

/// Options used when building a [crate::Camss].
///
/// `Default::default()` is what the hardware is normally run with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CamssOptions {
    /// The most buffers any one stream may hold at once.
    ///
    /// Queue storage for this many buffers is allocated up front so that interrupt handlers never allocate.  Queueing
    /// more fails with a buffer error.
    pub max_buffers: usize,

    /// Frames to throttle after the video stream starts.
    ///
    /// Throttled frames still acknowledge the hardware but do not rotate buffers, which drops the first few frames
    /// while the sensor settles.
    pub frame_skip: u32,

    /// Capacity of the completion queue built by [crate::DoneQueue::for_options].
    ///
    /// Must cover every buffer that can be outstanding across all streams, or a burst of completions may be lost.
    pub done_queue_capacity: usize,
}

impl Default for CamssOptions {
    fn default() -> Self {
        Self {
            max_buffers: VIDEO_MAX_FRAME,
            frame_skip: 0,
            done_queue_capacity: VIDEO_MAX_FRAME * STREAM_COUNT,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum OptionsError {
    #[error("Streams must be able to hold at least one buffer")]
    ZeroBuffers,

    #[error("A completion queue of {got} entries cannot hold the {needed} buffers that may be outstanding")]
    DoneQueueTooSmall { needed: usize, got: usize },
}

impl CamssOptions {
    /// The most buffers all streams together can hold at once.
    pub fn outstanding_buffers(&self) -> usize {
        self.max_buffers.saturating_mul(STREAM_COUNT)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_buffers == 0 {
            return Err(OptionsError::ZeroBuffers);
        }

        let needed = self.outstanding_buffers();
        if self.done_queue_capacity < needed {
            return Err(OptionsError::DoneQueueTooSmall {
                needed,
                got: self.done_queue_capacity,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(CamssOptions::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_buffers() {
        let opts = CamssOptions {
            max_buffers: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate(), Err(OptionsError::ZeroBuffers));
    }

    #[test]
    fn test_rejects_small_done_queue() {
        let opts = CamssOptions {
            max_buffers: 4,
            done_queue_capacity: 11,
            ..Default::default()
        };
        assert_eq!(
            opts.validate(),
            Err(OptionsError::DoneQueueTooSmall {
                needed: 12,
                got: 11
            })
        );
    }
}
