use crate::buffer::BufferError;
use crate::options::OptionsError;
use crate::output::StreamError;

#[derive(Debug, derive_more::Display, derive_more::IsVariant)]
enum ErrorPayload {
    #[display(fmt = "Invalid options: {}", _0)]
    Options(OptionsError),

    #[display(fmt = "Stream error: {}", _0)]
    Stream(StreamError),

    #[display(fmt = "Buffer error: {}", _0)]
    Buffer(BufferError),
}

#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct Error {
    payload: ErrorPayload,
}

macro_rules! conv {
    ($variant: ident, $from_err: path) => {
        impl From<$from_err> for Error {
            fn from(value: $from_err) -> Error {
                Error {
                    payload: ErrorPayload::$variant(value),
                }
            }
        }
    };
}

conv!(Options, OptionsError);
conv!(Stream, StreamError);
conv!(Buffer, BufferError);

impl Error {
    /// Was this error caused by a bad [crate::CamssOptions]?
    pub fn is_invalid_options(&self) -> bool {
        self.payload.is_options()
    }

    /// Was this error caused by asking a stream to do something its current state doesn't allow?
    pub fn is_stream_state(&self) -> bool {
        self.payload.is_stream()
    }

    /// Was this error caused by a buffer the pipeline cannot accept?
    pub fn is_rejected_buffer(&self) -> bool {
        self.payload.is_buffer()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
