//! Incremental SSE parser over a chunked response body.
//!
//! Chunk boundaries are arbitrary: a read may end mid-line, mid-frame or in the
//! middle of a UTF-8 sequence. Each call owns its own [`ParseState`].

use std::collections::VecDeque;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, field, info_span, warn};

use crate::error::{ChatStreamError, CoreResult};
use crate::model::RagMetadata;
use crate::source::{ByteStream, SseResponse};
use crate::sse::decoder::Utf8Decoder;
use crate::sse::frame::{Frame, take_frame};
use crate::stream::{BoxStreamEv, StreamEvent, StreamSink};
use crate::telemetry::{KEY_BYTES, KEY_DELTAS, KEY_FRAMES, KEY_OUTCOME};

/// How a parse ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseOutcome {
    /// A `done` frame arrived.
    Done,
    /// The body ended without `done`; the tail was flushed.
    Ended,
    /// The cancellation token fired. No terminal callback was made.
    Cancelled,
    /// Invalid response or transport failure.
    #[default]
    Failed,
}

impl ParseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseStats {
    pub bytes: u64,
    pub frames: u64,
    pub deltas: u64,
    pub errors: u64,
    pub outcome: ParseOutcome,
}

/// Whether more input should be fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Per-call parser state: the UTF-8 carry and the undecoded frame buffer.
#[derive(Debug, Default)]
pub struct ParseState {
    decoder: Utf8Decoder,
    buffer: String,
    stats: ParseStats,
}

impl ParseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Text received but not yet resolved into a complete frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feed one chunk and dispatch every complete frame it closes.
    /// Returns `Finished` once a `done` frame has been handled; anything after
    /// it in the buffer is abandoned.
    pub fn feed<S: StreamSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Flow {
        self.stats.bytes += chunk.len() as u64;
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);

        while let Some(block) = take_frame(&mut self.buffer) {
            if self.dispatch(&block, sink) == Flow::Finished {
                self.buffer.clear();
                self.stats.outcome = ParseOutcome::Done;
                return Flow::Finished;
            }
        }
        Flow::Continue
    }

    /// End of body without a `done` frame: best-effort flush of the first
    /// buffered `data:` line (event type ignored), then `on_done(None)`.
    pub fn finish<S: StreamSink + ?Sized>(&mut self, sink: &mut S) {
        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);

        if !self.buffer.trim().is_empty() {
            let data = self
                .buffer
                .split('\n')
                .find_map(|l| l.strip_prefix("data:"))
                .map(str::trim);
            if let Some(data) = data.filter(|d| !d.is_empty()) {
                match decode_delta(data) {
                    Ok(text) if !text.is_empty() => {
                        self.stats.deltas += 1;
                        sink.on_delta(&text);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to parse final buffer"),
                }
            }
        }
        self.buffer.clear();
        self.stats.outcome = ParseOutcome::Ended;
        sink.on_done(None);
    }

    fn dispatch<S: StreamSink + ?Sized>(&mut self, block: &str, sink: &mut S) -> Flow {
        let frame = Frame::parse(block);
        self.stats.frames += 1;
        debug!(event = %frame.event, data_len = frame.data.len(), "sse frame");

        if frame.is_done() {
            let meta = decode_metadata(&frame.data);
            sink.on_done(meta);
            return Flow::Finished;
        }

        if frame.data.is_empty() {
            return Flow::Continue;
        }

        match decode_delta(&frame.data) {
            Ok(text) => {
                self.stats.deltas += 1;
                sink.on_delta(&text);
            }
            Err(e) => {
                warn!(error = %e, "failed to parse SSE data");
                self.stats.errors += 1;
                sink.on_error(e);
            }
        }
        Flow::Continue
    }
}

/// Decode a delta payload. The object must carry a string `text` field.
pub fn decode_delta(data: &str) -> CoreResult<String> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ChatStreamError::MalformedPayload(format!("invalid JSON: {e}")))?;
    match value {
        Value::Object(mut map) => match map.remove("text") {
            Some(Value::String(text)) => Ok(text),
            _ => Err(ChatStreamError::MalformedPayload(
                "missing string field `text`".into(),
            )),
        },
        _ => Err(ChatStreamError::MalformedPayload(
            "payload is not a JSON object".into(),
        )),
    }
}

/// Metadata of a `done` frame. Corrupt metadata never blocks completion.
fn decode_metadata(data: &str) -> Option<RagMetadata> {
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<RagMetadata>(data) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!(error = %e, "ignoring unparsable done metadata");
            None
        }
    }
}

enum Step {
    Cancelled,
    Read(Option<CoreResult<Bytes>>),
}

/// Next read, unless the token fires first. A token that is already cancelled
/// wins before any read is attempted.
async fn next_read(body: &mut ByteStream, cancel: Option<&CancellationToken>) -> Step {
    match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return Step::Cancelled;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                item = body.next() => Step::Read(item),
            }
        }
        None => Step::Read(body.next().await),
    }
}

/// Parse `response` and report to `sink` until `done`, end of body, a
/// transport failure, or cancellation.
///
/// Failures are reported through `sink.on_error`, never returned. A cancelled
/// parse makes no further callbacks.
pub async fn parse_stream<S: StreamSink + ?Sized>(
    response: SseResponse,
    cancel: Option<&CancellationToken>,
    sink: &mut S,
) -> ParseStats {
    let span = info_span!(
        "sse.parse",
        sse.frames = field::Empty,
        sse.deltas = field::Empty,
        sse.bytes = field::Empty,
        sse.outcome = field::Empty,
    );
    let stats = run_parse(response, cancel, sink).instrument(span.clone()).await;
    span.record(KEY_FRAMES, stats.frames);
    span.record(KEY_DELTAS, stats.deltas);
    span.record(KEY_BYTES, stats.bytes);
    span.record(KEY_OUTCOME, stats.outcome.as_str());
    stats
}

async fn run_parse<S: StreamSink + ?Sized>(
    response: SseResponse,
    cancel: Option<&CancellationToken>,
    sink: &mut S,
) -> ParseStats {
    let mut body = match response.into_body() {
        Ok(body) => body,
        Err(e) => {
            sink.on_error(e);
            return ParseStats::default();
        }
    };

    let mut state = ParseState::new();
    loop {
        match next_read(&mut body, cancel).await {
            Step::Cancelled => {
                debug!("stream cancelled");
                state.stats.outcome = ParseOutcome::Cancelled;
                break;
            }
            Step::Read(Some(Ok(chunk))) => {
                if state.feed(&chunk, sink) == Flow::Finished {
                    break;
                }
            }
            Step::Read(Some(Err(e))) => {
                error!(error = %e, "stream read failed");
                state.stats.outcome = ParseOutcome::Failed;
                sink.on_error(e);
                break;
            }
            Step::Read(None) => {
                state.finish(sink);
                break;
            }
        }
    }
    // releases the reader / aborts the underlying request
    drop(body);
    state.stats
}

struct EventPump {
    body: Option<ByteStream>,
    state: ParseState,
    cancel: Option<CancellationToken>,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl EventPump {
    async fn pull(&mut self) {
        let Some(body) = self.body.as_mut() else {
            self.finished = true;
            return;
        };
        let mut out: Vec<StreamEvent> = Vec::new();
        match next_read(body, self.cancel.as_ref()).await {
            Step::Cancelled => self.finished = true,
            Step::Read(Some(Ok(chunk))) => {
                if self.state.feed(&chunk, &mut out) == Flow::Finished {
                    self.finished = true;
                }
            }
            Step::Read(Some(Err(e))) => {
                out.push(StreamEvent::Error(e));
                self.finished = true;
            }
            Step::Read(None) => {
                self.state.finish(&mut out);
                self.finished = true;
            }
        }
        if self.finished {
            self.body = None;
        }
        self.pending.extend(out);
    }
}

/// Lazy-sequence form of [`parse_stream`]: same events, same order, same
/// cancellation contract (a cancelled stream simply ends). Not restartable.
pub fn event_stream(response: SseResponse, cancel: Option<CancellationToken>) -> BoxStreamEv {
    let mut pump = EventPump {
        body: None,
        state: ParseState::new(),
        cancel,
        pending: VecDeque::new(),
        finished: false,
    };
    match response.into_body() {
        Ok(body) => pump.body = Some(body),
        Err(e) => {
            pump.pending.push_back(StreamEvent::Error(e));
            pump.finished = true;
        }
    }

    futures::stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(ev) = pump.pending.pop_front() {
                return Some((ev, pump));
            }
            if pump.finished {
                return None;
            }
            pump.pull().await;
        }
    })
    .boxed()
}
