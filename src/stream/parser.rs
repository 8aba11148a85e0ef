use serde_json::Value;
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Scanning,
    /// The head line is a complete `data:` line whose JSON did not parse.
    /// It cannot change, so later chunks are only buffered until `finish`.
    AwaitingFrame,
    Finished,
}

enum Line {
    Skip,
    Done,
    Delta(Option<String>),
    Incomplete,
}

#[derive(Debug)]
pub struct FrameParser {
    buffer: String,
    state: ParserState,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: ParserState::Scanning,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParserState::Finished
    }

    /// Bytes received but not yet resolved into a frame.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Appends a chunk and returns every event that became complete.
    pub fn push(&mut self, chunk: &str) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }

        self.buffer.push_str(chunk);
        if self.state == ParserState::AwaitingFrame {
            return events;
        }
        self.drain_lines(&mut events);
        events
    }

    /// Flushes whatever is left after the transport closed. A frame that
    /// still fails to parse is dropped.
    pub fn finish(&mut self) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }
        self.state = ParserState::Finished;

        let residual = std::mem::take(&mut self.buffer);
        for raw in residual.split('\n') {
            match classify(raw) {
                Line::Skip | Line::Delta(None) => {}
                Line::Delta(Some(text)) => events.push(FrameEvent::Delta(text)),
                Line::Done => {
                    events.push(FrameEvent::Done);
                    break;
                }
                Line::Incomplete => {
                    debug!(line = raw, "dropping unparseable frame at end of stream");
                }
            }
        }
        events
    }

    fn drain_lines(&mut self, events: &mut Vec<FrameEvent>) {
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset;
            match classify(&self.buffer[consumed..end]) {
                Line::Skip | Line::Delta(None) => {}
                Line::Delta(Some(text)) => events.push(FrameEvent::Delta(text)),
                Line::Done => {
                    events.push(FrameEvent::Done);
                    self.state = ParserState::Finished;
                    self.buffer.clear();
                    return;
                }
                Line::Incomplete => {
                    self.state = ParserState::AwaitingFrame;
                    break;
                }
            }
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);
    }
}

fn classify(line: &str) -> Line {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return Line::Skip;
    }
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Skip;
    };

    let payload = rest.trim();
    if payload.is_empty() {
        return Line::Skip;
    }
    if payload == DONE_SENTINEL {
        return Line::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Line::Delta(
            value
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        ),
        Err(_) => Line::Incomplete,
    }
}
