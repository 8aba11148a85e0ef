pub mod parser;
pub mod reader;

use bytes::Bytes;
use futures::stream::BoxStream;

pub use parser::{FrameEvent, FrameParser};
pub use reader::{read_stream, ReadOutcome, Utf8Decoder};

/// Raw event-stream body as handed over by a relay transport.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}
