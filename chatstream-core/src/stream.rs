//! Streaming primitives exposed by chatstream.
//!
//! Contract:
//! - A parse emits 0..n `Delta` and `Error` events in arrival order.
//! - `Error(MalformedPayload)` is not terminal; later frames are still processed.
//! - The stream ends after `Done`, after a transport `Error`, or silently when cancelled.
//!
//! This module intentionally avoids deriving `Clone` / `PartialEq` because `Error` contains
//! `ChatStreamError`, which is not (and should not be) `Clone` or `Eq`.

use crate::error::ChatStreamError;
use crate::model::RagMetadata;

/// What the caller receives incrementally.
#[non_exhaustive]
#[derive(Debug)]
pub enum StreamEvent {
    /// Assistant text fragment. Empty string is allowed.
    Delta(String),
    /// Stream completed, with the optional metadata of the `done` frame.
    Done(Option<RagMetadata>),
    /// Decode or transport failure.
    Error(ChatStreamError),
}

impl StreamEvent {
    /// Returns true for `Done` and for transport errors, after which nothing follows.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Done(_) => true,
            Self::Error(e) => !matches!(e, ChatStreamError::MalformedPayload(_)),
            Self::Delta(_) => false,
        }
    }

    /// Convenience accessor for `Delta` contents.
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::Delta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of streaming events.
pub type BoxStreamEv = futures::stream::BoxStream<'static, StreamEvent>;

/// Receives parser notifications. Only `on_delta` is required.
pub trait StreamSink {
    fn on_delta(&mut self, text: &str);

    fn on_done(&mut self, _meta: Option<RagMetadata>) {}

    fn on_error(&mut self, _err: ChatStreamError) {}
}

impl StreamSink for Vec<StreamEvent> {
    fn on_delta(&mut self, text: &str) {
        self.push(StreamEvent::Delta(text.to_string()));
    }

    fn on_done(&mut self, meta: Option<RagMetadata>) {
        self.push(StreamEvent::Done(meta));
    }

    fn on_error(&mut self, err: ChatStreamError) {
        self.push(StreamEvent::Error(err));
    }
}

type DeltaFn<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type DoneFn<'a> = Box<dyn FnMut(Option<RagMetadata>) + Send + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(ChatStreamError) + Send + 'a>;

/// Closure-based sink for callers that prefer callbacks over a type.
pub struct Callbacks<'a> {
    on_delta: DeltaFn<'a>,
    on_done: Option<DoneFn<'a>>,
    on_error: Option<ErrorFn<'a>>,
}

impl<'a> Callbacks<'a> {
    pub fn new(on_delta: impl FnMut(&str) + Send + 'a) -> Self {
        Self {
            on_delta: Box::new(on_delta),
            on_done: None,
            on_error: None,
        }
    }

    pub fn with_on_done(mut self, f: impl FnMut(Option<RagMetadata>) + Send + 'a) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl FnMut(ChatStreamError) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl StreamSink for Callbacks<'_> {
    fn on_delta(&mut self, text: &str) {
        (self.on_delta)(text);
    }

    fn on_done(&mut self, meta: Option<RagMetadata>) {
        if let Some(f) = self.on_done.as_mut() {
            f(meta);
        }
    }

    fn on_error(&mut self, err: ChatStreamError) {
        if let Some(f) = self.on_error.as_mut() {
            f(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_work() {
        let d = StreamEvent::Delta("hi".into());
        assert!(!d.is_terminal());
        assert_eq!(d.as_text_delta(), Some("hi"));

        let s = StreamEvent::Done(None);
        assert!(s.is_terminal());
        assert_eq!(s.as_text_delta(), None);

        let m = StreamEvent::Error(ChatStreamError::MalformedPayload("x".into()));
        assert!(!m.is_terminal());
        let t = StreamEvent::Error(ChatStreamError::TransportFailure("reset".into()));
        assert!(t.is_terminal());
    }

    #[test]
    fn callbacks_without_optional_handlers() {
        let mut seen = Vec::new();
        {
            let mut cb = Callbacks::new(|t: &str| seen.push(t.to_string()));
            cb.on_delta("a");
            cb.on_done(None);
            cb.on_error(ChatStreamError::Validation("ignored".into()));
        }
        assert_eq!(seen, vec!["a".to_string()]);
    }

    #[test]
    fn callbacks_route_to_each_handler() {
        let mut deltas = Vec::new();
        let mut done = Vec::new();
        let mut errors = Vec::new();
        {
            let mut cb = Callbacks::new(|t: &str| deltas.push(t.to_string()))
                .with_on_done(|m| done.push(m))
                .with_on_error(|e| errors.push(e.kind()));
            cb.on_delta("x");
            cb.on_done(Some(RagMetadata {
                rag_used: true,
                rag_docs_count: 1,
            }));
            cb.on_error(ChatStreamError::MalformedPayload("bad".into()));
        }
        assert_eq!(deltas, vec!["x".to_string()]);
        assert_eq!(
            done,
            vec![Some(RagMetadata {
                rag_used: true,
                rag_docs_count: 1
            })]
        );
        assert_eq!(errors, vec!["malformed_payload"]);
    }
}
