//! One streaming chat turn, end to end: request, parse, batch, apply.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, field, info_span, warn};

use crate::conversation::{Conversation, Turn};
use crate::display::{BatchPolicy, DeltaBatcher};
use crate::error::{ChatStreamError, CoreResult};
use crate::model::{MessageRecord, OutgoingMessage, RagMetadata};
use crate::source::{EventSource, RequestCtx, stream_path};
use crate::sse::{ParseOutcome, ParseStats, parse_stream};
use crate::stream::{StreamEvent, StreamSink};
use crate::telemetry::{
    self, KEY_AGENT_ID, KEY_CONVERSATION_ID, KEY_ERROR_KIND, KEY_ERROR_MESSAGE, KEY_LATENCY_MS,
    KEY_MESSAGE_ID, KEY_RAG_DOCS, KEY_RAG_USED, StreamTrace,
};

/// What happened to a turn once its stream is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub message_id: String,
    pub stats: ParseStats,
    pub rag: Option<RagMetadata>,
    /// Last error shown to the user, if any.
    pub error: Option<String>,
}

impl TurnSummary {
    pub fn outcome(&self) -> ParseOutcome {
        self.stats.outcome
    }
}

/// Sends messages through an [`EventSource`] and folds the reply into a [`Conversation`].
pub struct ChatSession<E: EventSource> {
    source: E,
    batching: BatchPolicy,
    api_base: Option<String>,
}

impl<E: EventSource> ChatSession<E> {
    pub fn new(source: E) -> Self {
        Self {
            source,
            batching: BatchPolicy::default(),
            api_base: None,
        }
    }

    pub fn with_batching(mut self, policy: BatchPolicy) -> Self {
        self.batching = policy;
        self
    }

    /// Base URL named in "unable to reach" messages.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn source(&self) -> &E {
        &self.source
    }

    /// Start a turn for `text` and stream the reply into `conv`.
    ///
    /// `Err` is returned only when the turn cannot start (blank ids or text, or
    /// a reply already streaming). Request and stream failures end up in
    /// `conv.error()` and in the returned summary.
    pub async fn send_message<F>(
        &self,
        conv: &mut Conversation,
        agent_id: &str,
        conversation_id: &str,
        text: &str,
        on_update: F,
    ) -> CoreResult<TurnSummary>
    where
        F: FnMut(&MessageRecord),
    {
        if agent_id.trim().is_empty() || conversation_id.trim().is_empty() {
            let err = ChatStreamError::Validation("agent and conversation ids are required".into());
            conv.set_error(err.to_string());
            return Err(err);
        }
        let turn = conv.begin_turn(text)?;
        Ok(self
            .stream_turn(conv, &turn, agent_id, conversation_id, text, on_update)
            .await)
    }

    /// Stream the reply for a turn already begun with [`Conversation::begin_turn`].
    /// Cancel it through `turn.cancel`.
    pub async fn stream_turn<F>(
        &self,
        conv: &mut Conversation,
        turn: &Turn,
        agent_id: &str,
        conversation_id: &str,
        text: &str,
        on_update: F,
    ) -> TurnSummary
    where
        F: FnMut(&MessageRecord),
    {
        let span = info_span!(
            "chat.turn",
            chat.agent_id = field::Empty,
            chat.conversation_id = field::Empty,
            chat.message_id = field::Empty,
            latency.ms = field::Empty,
            rag.used = field::Empty,
            rag.docs_count = field::Empty,
            error.kind = field::Empty,
            error.message = field::Empty,
        );
        span.record(KEY_AGENT_ID, agent_id);
        span.record(KEY_CONVERSATION_ID, conversation_id);
        span.record(KEY_MESSAGE_ID, turn.message_id.as_str());
        let started = Instant::now();
        let (summary, last_error) = self
            .run_turn(conv, turn, agent_id, conversation_id, text, on_update)
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        span.record(KEY_LATENCY_MS, latency_ms);
        if let Some(meta) = summary.rag {
            span.record(KEY_RAG_USED, meta.rag_used);
            span.record(KEY_RAG_DOCS, meta.rag_docs_count);
        }
        if let Some(e) = last_error.as_ref() {
            span.record(KEY_ERROR_KIND, e.kind());
            span.record(KEY_ERROR_MESSAGE, e.to_string().as_str());
        }

        telemetry::emit(
            StreamTrace::new()
                .agent(agent_id)
                .conversation(conversation_id)
                .message_id(&turn.message_id)
                .counts(summary.stats.frames, summary.stats.deltas, summary.stats.bytes)
                .outcome(summary.stats.outcome.as_str())
                .latency_ms(latency_ms)
                .rag_opt(summary.rag)
                .error_opt(last_error.as_ref()),
        );
        summary
    }

    async fn run_turn<F>(
        &self,
        conv: &mut Conversation,
        turn: &Turn,
        agent_id: &str,
        conversation_id: &str,
        text: &str,
        mut on_update: F,
    ) -> (TurnSummary, Option<ChatStreamError>)
    where
        F: FnMut(&MessageRecord),
    {
        let id = turn.message_id.as_str();
        let path = stream_path(agent_id, conversation_id);
        // sent as typed; only the stored user record is trimmed
        let body = OutgoingMessage {
            content: text.to_string(),
        };
        let ctx = RequestCtx {
            request_id: None,
            turn_id: Some(id),
        };

        let response = match self.source.open_stream(&path, &body, &ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "failed to open stream");
                let message = e.user_message(self.api_base.as_deref());
                conv.set_error(message.clone());
                finalize(conv, id, &mut on_update);
                let summary = TurnSummary {
                    message_id: id.to_string(),
                    stats: ParseStats::default(),
                    rag: None,
                    error: Some(message),
                };
                return (summary, Some(e));
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = turn.cancel.clone();
        let producer = async move {
            let mut sink = ChannelSink(tx);
            parse_stream(response, Some(&cancel), &mut sink).await
        };

        let mut rag = None;
        let mut last_error: Option<ChatStreamError> = None;
        let mut shown_error: Option<String> = None;
        let consumer = async {
            let mut batcher = DeltaBatcher::new(self.batching);
            loop {
                let deadline = batcher.deadline();
                tokio::select! {
                    ev = rx.recv() => {
                        let Some(ev) = ev else { break };
                        match ev {
                            StreamEvent::Delta(text) => {
                                if let Some(batch) = batcher.push(&text, now()) {
                                    apply(conv, id, &batch, &mut on_update);
                                }
                            }
                            StreamEvent::Done(meta) => {
                                if let Some(batch) = batcher.flush() {
                                    apply(conv, id, &batch, &mut on_update);
                                }
                                rag = meta;
                            }
                            StreamEvent::Error(e) => {
                                if let Some(batch) = batcher.flush() {
                                    apply(conv, id, &batch, &mut on_update);
                                }
                                let message = e.user_message(self.api_base.as_deref());
                                conv.set_error(message.clone());
                                shown_error = Some(message);
                                last_error = Some(e);
                            }
                        }
                    }
                    _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                        if let Some(batch) = batcher.poll_due(now()) {
                            apply(conv, id, &batch, &mut on_update);
                        }
                    }
                }
            }
            if let Some(batch) = batcher.flush() {
                apply(conv, id, &batch, &mut on_update);
            }
        };

        let (stats, ()) = tokio::join!(producer, consumer);

        finalize(conv, id, &mut on_update);
        if let Some(meta) = rag {
            conv.set_rag_metadata(id, meta);
        }
        debug!(outcome = stats.outcome.as_str(), deltas = stats.deltas, "turn finished");

        let summary = TurnSummary {
            message_id: id.to_string(),
            stats,
            rag,
            error: shown_error,
        };
        (summary, last_error)
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    let at = deadline
        .map(tokio::time::Instant::from_std)
        .unwrap_or_else(tokio::time::Instant::now);
    tokio::time::sleep_until(at).await;
}

fn apply<F>(conv: &mut Conversation, id: &str, batch: &str, on_update: &mut F)
where
    F: FnMut(&MessageRecord),
{
    if let Some(msg) = conv.append_to_streaming(id, batch) {
        on_update(msg);
    }
}

fn finalize<F: FnMut(&MessageRecord)>(conv: &mut Conversation, id: &str, on_update: &mut F) {
    conv.finalize_streaming(id);
    if let Some(msg) = conv.message(id) {
        on_update(msg);
    }
}

/// Forwards parser callbacks to the turn's consumer.
struct ChannelSink(mpsc::UnboundedSender<StreamEvent>);

impl StreamSink for ChannelSink {
    fn on_delta(&mut self, text: &str) {
        let _ = self.0.send(StreamEvent::Delta(text.to_string()));
    }

    fn on_done(&mut self, meta: Option<RagMetadata>) {
        let _ = self.0.send(StreamEvent::Done(meta));
    }

    fn on_error(&mut self, err: ChatStreamError) {
        let _ = self.0.send(StreamEvent::Error(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SseResponse;
    use crate::telemetry::TelemetrySink;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use http::StatusCode;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    enum Reply {
        Chunks(Vec<&'static str>),
        /// Chunks, then a body that never ends.
        Stall(Vec<&'static str>),
        Status(StatusCode),
        Unreachable,
    }

    struct FakeSource {
        reply: Reply,
        requests: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl FakeSource {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn open_stream(
            &self,
            path: &str,
            body: &OutgoingMessage,
            ctx: &RequestCtx<'_>,
        ) -> CoreResult<SseResponse> {
            self.requests.lock().unwrap().push((
                path.to_string(),
                body.content.clone(),
                ctx.turn_id.map(str::to_string),
            ));
            match &self.reply {
                Reply::Chunks(chunks) => Ok(SseResponse::from_chunks(chunks.clone())),
                Reply::Stall(chunks) => {
                    let items: Vec<CoreResult<Bytes>> =
                        chunks.clone().into_iter().map(|c| Ok(Bytes::from(c))).collect();
                    let body = futures::stream::iter(items)
                        .chain(futures::stream::pending())
                        .boxed();
                    Ok(SseResponse::new(StatusCode::OK, Some(body)))
                }
                Reply::Status(status) => Ok(SseResponse::empty(*status)),
                Reply::Unreachable => Err(ChatStreamError::TransportFailure(
                    "connection refused".into(),
                )),
            }
        }
    }

    fn session(reply: Reply) -> ChatSession<FakeSource> {
        ChatSession::new(FakeSource::new(reply)).with_api_base("http://localhost:8000")
    }

    #[tokio::test]
    async fn streams_reply_into_conversation() {
        let chat = session(Reply::Chunks(vec![
            "data: {\"text\":\"Hel\"}\n\n",
            "data: {\"text\":\"lo\"}\n\n",
            "event: done\ndata: {\"rag_used\":true,\"rag_docs_count\":3}\n\n",
        ]));
        let mut conv = Conversation::new();
        let mut updates = Vec::new();
        let summary = chat
            .send_message(&mut conv, "agent-1", "conv-1", " hi ", |m| {
                updates.push((m.content.clone(), m.is_streaming))
            })
            .await
            .unwrap();

        assert_eq!(summary.outcome(), ParseOutcome::Done);
        assert_eq!(summary.stats.deltas, 2);
        assert_eq!(summary.error, None);
        let reply = conv.message(&summary.message_id).unwrap();
        assert_eq!(reply.content, "Hello");
        assert!(!reply.is_streaming);
        assert_eq!(
            reply.rag,
            Some(RagMetadata {
                rag_used: true,
                rag_docs_count: 3
            })
        );
        assert!(!conv.is_streaming());
        assert_eq!(updates.last(), Some(&("Hello".to_string(), false)));

        let requests = chat.source().requests.lock().unwrap();
        assert_eq!(
            requests[0],
            (
                "/agents/agent-1/conversations/conv-1/stream?stream=true".to_string(),
                " hi ".to_string(),
                Some(summary.message_id.clone())
            )
        );
    }

    #[tokio::test]
    async fn small_deltas_are_batched() {
        let chat = session(Reply::Chunks(vec![
            "data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n\ndata: {\"text\":\"c\"}\n\n",
            "event: done\n\n",
        ]));
        let mut conv = Conversation::new();
        let mut appended = Vec::new();
        let summary = chat
            .send_message(&mut conv, "a", "c", "q", |m| {
                if m.is_streaming {
                    appended.push(m.content.clone())
                }
            })
            .await
            .unwrap();
        // one flush on done, not one update per delta
        assert_eq!(appended, vec!["abc".to_string()]);
        assert_eq!(summary.stats.deltas, 3);
    }

    #[tokio::test]
    async fn large_pending_text_flushes_early() {
        let chat = session(Reply::Chunks(vec![
            "data: {\"text\":\"0123456789\"}\n\n",
            "data: {\"text\":\"abcdef\"}\n\nevent: done\n\n",
        ]))
        .with_batching(BatchPolicy {
            flush_interval: Duration::from_secs(60),
            flush_threshold: 8,
        });
        let mut conv = Conversation::new();
        let mut appended = Vec::new();
        chat.send_message(&mut conv, "a", "c", "q", |m| {
            if m.is_streaming {
                appended.push(m.content.clone())
            }
        })
        .await
        .unwrap();
        assert_eq!(
            appended,
            vec!["0123456789".to_string(), "0123456789abcdef".to_string()]
        );
    }

    #[tokio::test]
    async fn http_error_sets_error_and_finalizes() {
        let chat = session(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR));
        let mut conv = Conversation::new();
        let summary = chat
            .send_message(&mut conv, "a", "c", "q", |_| {})
            .await
            .unwrap();
        assert_eq!(summary.outcome(), ParseOutcome::Failed);
        assert_eq!(conv.error(), Some("Request failed: 500"));
        let reply = conv.message(&summary.message_id).unwrap();
        assert!(!reply.is_streaming);
        assert_eq!(reply.content, "");
    }

    #[tokio::test]
    async fn unreachable_backend_gets_friendly_error() {
        let chat = session(Reply::Unreachable);
        let mut conv = Conversation::new();
        let summary = chat
            .send_message(&mut conv, "a", "c", "q", |_| {})
            .await
            .unwrap();
        assert_eq!(
            summary.error.as_deref(),
            Some("Unable to reach http://localhost:8000. Is the backend running?")
        );
        assert_eq!(conv.error(), summary.error.as_deref());
        assert!(!conv.is_streaming());
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_but_stream_continues() {
        let chat = session(Reply::Chunks(vec![
            "data: {\"text\":\"A\"}\n\ndata: nope\n\ndata: {\"text\":\"B\"}\n\nevent: done\n\n",
        ]));
        let mut conv = Conversation::new();
        let summary = chat
            .send_message(&mut conv, "a", "c", "q", |_| {})
            .await
            .unwrap();
        assert_eq!(summary.outcome(), ParseOutcome::Done);
        assert!(summary.error.unwrap().starts_with("malformed payload"));
        assert_eq!(conv.message(&summary.message_id).unwrap().content, "AB");
    }

    #[tokio::test]
    async fn rejects_missing_ids_and_blank_text() {
        let chat = session(Reply::Chunks(vec![]));
        let mut conv = Conversation::new();
        assert!(matches!(
            chat.send_message(&mut conv, "", "c", "q", |_| {}).await,
            Err(ChatStreamError::Validation(_))
        ));
        assert!(matches!(
            chat.send_message(&mut conv, "a", "c", "  ", |_| {}).await,
            Err(ChatStreamError::Validation(_))
        ));
        assert!(conv.messages().is_empty());
        assert!(chat.source().requests.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_keeps_partial_text() {
        let chat = session(Reply::Stall(vec!["data: {\"text\":\"par\"}\n\n"]));
        let mut conv = Conversation::new();
        let turn = conv.begin_turn("q").unwrap();
        let token = turn.cancel.clone();

        let (summary, ()) = tokio::join!(
            chat.stream_turn(&mut conv, &turn, "a", "c", "q", |_| {}),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            }
        );

        assert_eq!(summary.outcome(), ParseOutcome::Cancelled);
        assert_eq!(summary.error, None);
        let reply = conv.message(&turn.message_id).unwrap();
        assert_eq!(reply.content, "par");
        assert!(!reply.is_streaming);
        assert!(!conv.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_batch_flushes_on_interval() {
        let chat = session(Reply::Stall(vec!["data: {\"text\":\"x\"}\n\n"]));
        let mut conv = Conversation::new();
        let turn = conv.begin_turn("q").unwrap();
        let token = turn.cancel.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let start = tokio::time::Instant::now();

        tokio::join!(
            chat.stream_turn(&mut conv, &turn, "a", "c", "q", move |m| {
                if m.is_streaming {
                    seen_in.lock().unwrap().push(start.elapsed());
                }
            }),
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                token.cancel();
            }
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Duration::from_millis(40));
    }

    #[tokio::test]
    async fn message_is_sent_as_typed_and_stored_trimmed() {
        let chat = session(Reply::Chunks(vec!["event: done\n\n"]));
        let mut conv = Conversation::new();
        chat.send_message(&mut conv, "a", "c", "  spaced out \n", |_| {})
            .await
            .unwrap();
        let requests = chat.source().requests.lock().unwrap();
        assert_eq!(requests[0].1, "  spaced out \n");
        assert_eq!(conv.messages()[0].content, "spaced out");
    }

    #[tokio::test]
    async fn turn_span_records_ids_and_error() {
        let (store, _guard) = crate::telemetry::test_span::install_capture();
        let chat = session(Reply::Status(StatusCode::BAD_GATEWAY));
        let mut conv = Conversation::new();
        let summary = chat
            .send_message(&mut conv, "agent-s", "conv-s", "q", |_| {})
            .await
            .unwrap();

        let fields = store.fields_of("chat.turn").expect("span captured");
        assert_eq!(fields.get(KEY_AGENT_ID).map(String::as_str), Some("agent-s"));
        assert_eq!(
            fields.get(KEY_CONVERSATION_ID).map(String::as_str),
            Some("conv-s")
        );
        assert_eq!(fields.get(KEY_MESSAGE_ID), Some(&summary.message_id));
        assert_eq!(
            fields.get(KEY_ERROR_KIND).map(String::as_str),
            Some("invalid_response")
        );
        assert_eq!(
            fields.get(KEY_ERROR_MESSAGE).map(String::as_str),
            Some("Request failed: 502")
        );
        assert!(fields.contains_key(KEY_LATENCY_MS));
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<StreamTrace>>);

    impl TelemetrySink for Collect {
        fn record(&self, trace: StreamTrace) {
            self.0.lock().unwrap().push(trace);
        }
    }

    #[tokio::test]
    async fn emits_stream_trace() {
        let sink = Arc::new(Collect::default());
        assert!(telemetry::set_telemetry_sink(sink.clone()));
        telemetry::test_set_capture_enabled(true);

        let chat = session(Reply::Chunks(vec![
            "data: {\"text\":\"hi\"}\n\nevent: done\n\n",
        ]));
        let mut conv = Conversation::new();
        let summary = chat
            .send_message(&mut conv, "agent-t", "conv-t", "q", |_| {})
            .await
            .unwrap();
        telemetry::test_set_capture_enabled(false);

        let traces = sink.0.lock().unwrap();
        let trace = traces
            .iter()
            .find(|t| t.agent_id.as_deref() == Some("agent-t"))
            .expect("trace recorded");
        assert_eq!(trace.conversation_id.as_deref(), Some("conv-t"));
        assert_eq!(trace.message_id.as_deref(), Some(summary.message_id.as_str()));
        assert_eq!(trace.deltas, 1);
        assert_eq!(trace.frames, 2);
        assert_eq!(trace.outcome.as_deref(), Some("done"));
        assert_eq!(trace.error_kind, None);
    }
}
