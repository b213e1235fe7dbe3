use serde_json::Value;

use crate::events::StreamEvent;
use crate::utf8::Utf8StreamDecoder;

/// Prefix of an event-data line.
pub const DATA_PREFIX: &str = "data: ";
/// Payload that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";
/// JSON pointer of the incremental assistant text inside a payload.
pub const DELTA_CONTENT_POINTER: &str = "/choices/0/delta/content";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// How many later chunks a re-buffered unparsable line may wait for
    /// before it is dropped as malformed.
    pub max_rebuffer_attempts: u32,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_rebuffer_attempts: 3,
        }
    }
}

/// Incremental decoder for newline-delimited SSE completion streams.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    utf8: Utf8StreamDecoder,
    buffer: String,
    options: DecoderOptions,
    /// Retries spent on the line currently parked at the front of `buffer`.
    stalled: Option<u32>,
    done: bool,
}

enum Line<'a> {
    Ignored,
    Done,
    Payload(&'a str),
}

impl SseLineDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Feed arbitrary bytes into the decoder and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let text = self.utf8.decode(bytes);
        self.buffer.push_str(&text);
        self.drain_lines(false, &mut events);
        events
    }

    /// Drain what is left once the byte source reports end of stream.
    ///
    /// Parked or unterminated text never becomes a delta here; it is reported
    /// as [`StreamEvent::Malformed`].
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        self.drain_lines(true, &mut events);
        if self.done {
            return events;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            tracing::debug!(len = rest.len(), "dropping unterminated trailing line");
            events.push(StreamEvent::Malformed { line: rest });
        }
        events
    }

    /// Decode a complete SSE body in one shot.
    pub fn parse_lines(input: &str) -> Vec<StreamEvent> {
        let mut decoder = Self::default();
        let mut events = decoder.feed(input.as_bytes());
        events.extend(decoder.finish());
        events
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && !self.utf8.has_pending()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.is_some()
    }

    fn drain_lines(&mut self, final_pass: bool, events: &mut Vec<StreamEvent>) {
        let mut front_is_parked = self.stalled.is_some();

        while let Some(newline) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=newline).collect();
            let retried_parked = std::mem::replace(&mut front_is_parked, false);
            let line = raw.strip_suffix('\n').unwrap_or(&raw);
            let line = line.strip_suffix('\r').unwrap_or(line);

            let payload = match classify_line(line) {
                Line::Ignored => continue,
                Line::Done => {
                    self.done = true;
                    self.stalled = None;
                    self.buffer.clear();
                    events.push(StreamEvent::Done);
                    return;
                }
                Line::Payload(payload) => payload,
            };

            match extract_delta(payload) {
                Ok(delta) => {
                    self.stalled = None;
                    if let Some(text) = delta {
                        events.push(StreamEvent::Delta { text });
                    }
                }
                Err(error) => {
                    if let Some((delta, consumed)) = self.join_continuation(payload) {
                        self.buffer.replace_range(..consumed, "");
                        self.stalled = None;
                        if let Some(text) = delta {
                            events.push(StreamEvent::Delta { text });
                        }
                        continue;
                    }

                    let attempts = if retried_parked {
                        self.stalled.map_or(1, |spent| spent + 1)
                    } else {
                        0
                    };

                    if final_pass || attempts > self.options.max_rebuffer_attempts {
                        tracing::debug!(%error, attempts, "dropping malformed event line");
                        self.stalled = None;
                        events.push(StreamEvent::Malformed {
                            line: line.to_owned(),
                        });
                        continue;
                    }

                    // The payload may have been cut by a chunk boundary: park the
                    // whole line at the front and wait for more bytes.
                    self.stalled = Some(attempts);
                    self.buffer.insert_str(0, &raw);
                    return;
                }
            }
        }
    }

    /// Tries to complete a payload that was cut by a line break by appending
    /// the complete lines that follow it in the buffer. Stops at the first
    /// blank or `data: ` line, since those start a new event. Returns the
    /// decoded delta and the number of buffered bytes the join used.
    fn join_continuation(&self, head: &str) -> Option<(Option<String>, usize)> {
        let mut joined = head.to_owned();
        let mut consumed = 0;
        for piece in self.buffer.split_inclusive('\n') {
            let body = piece.strip_suffix('\n')?;
            let body = body.strip_suffix('\r').unwrap_or(body);
            if body.trim().is_empty() || body.starts_with(DATA_PREFIX) {
                return None;
            }

            consumed += piece.len();
            joined.push_str(body);
            if let Ok(delta) = extract_delta(&joined) {
                return Some((delta, consumed));
            }
        }
        None
    }
}

fn classify_line(line: &str) -> Line<'_> {
    if line.trim().is_empty() || line.starts_with(':') {
        return Line::Ignored;
    }

    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Ignored;
    };

    match rest.trim() {
        "" => Line::Ignored,
        DONE_SENTINEL => Line::Done,
        payload => Line::Payload(payload),
    }
}

fn extract_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let value = serde_json::from_str::<Value>(payload)?;
    Ok(value
        .pointer(DELTA_CONTENT_POINTER)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned))
}
