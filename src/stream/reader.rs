use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::parser::{FrameEvent, FrameParser};
use super::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Completed,
    Cancelled,
}

/// UTF-8 decoder that carries an incomplete multi-byte sequence over to the
/// next chunk instead of mangling it. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut input: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let carry = input.to_vec();
        self.pending = carry;
        out
    }

    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// `on_done` runs at most once, and never after cancellation or an error.
pub async fn read_stream<S, D, F>(
    mut transport: S,
    mut on_delta: D,
    on_done: F,
    cancel: &CancellationToken,
) -> Result<ReadOutcome, StreamError>
where
    S: Stream<Item = Result<Bytes, StreamError>> + Unpin,
    D: FnMut(&str),
    F: FnOnce(),
{
    let mut decoder = Utf8Decoder::new();
    let mut parser = FrameParser::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream read cancelled");
                return Ok(ReadOutcome::Cancelled);
            }
            next = transport.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };
        let text = decoder.decode(&chunk?);
        if deliver(parser.push(&text), &mut on_delta) {
            drop(transport);
            on_done();
            return Ok(ReadOutcome::Completed);
        }
    }

    let mut events = parser.push(&decoder.finish());
    events.extend(parser.finish());
    deliver(events, &mut on_delta);
    on_done();
    Ok(ReadOutcome::Completed)
}

fn deliver<D: FnMut(&str)>(events: Vec<FrameEvent>, on_delta: &mut D) -> bool {
    for event in events {
        match event {
            FrameEvent::Delta(text) => on_delta(&text),
            FrameEvent::Done => return true,
        }
    }
    false
}
