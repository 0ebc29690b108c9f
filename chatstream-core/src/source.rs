//! The seam between the streaming core and whatever performs the HTTP request.
//!
//! `HttpClient` implements [`EventSource`] over reqwest; tests and the CLI's
//! replay mode build an [`SseResponse`] from in-memory chunks instead.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;

use crate::error::{ChatStreamError, CoreResult};
use crate::model::OutgoingMessage;

/// Boxed stream of raw body chunks. An `Err` item is a transport failure.
pub type ByteStream = futures::stream::BoxStream<'static, CoreResult<Bytes>>;

/// Request context carries correlation ids sent as headers.
#[derive(Clone, Copy, Default, Debug)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub turn_id: Option<&'a str>,
}

/// A response whose body is consumed as an event stream.
pub struct SseResponse {
    pub status: StatusCode,
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for SseResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl SseResponse {
    pub fn new(status: StatusCode, body: Option<ByteStream>) -> Self {
        Self { status, body }
    }

    /// 200 response delivering `chunks` one read at a time.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let items: Vec<CoreResult<Bytes>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::new(StatusCode::OK, Some(futures::stream::iter(items).boxed()))
    }

    /// 200 response whose reads yield `items` verbatim, errors included.
    pub fn from_results(items: Vec<CoreResult<Bytes>>) -> Self {
        Self::new(StatusCode::OK, Some(futures::stream::iter(items).boxed()))
    }

    /// Response with the given status and no body.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, None)
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Take the body if the response is usable; otherwise the `InvalidResponse` error.
    pub fn into_body(self) -> CoreResult<ByteStream> {
        match self.body {
            Some(body) if self.status.is_success() => Ok(body),
            _ => Err(ChatStreamError::InvalidResponse {
                status: self.status.as_u16(),
            }),
        }
    }
}

/// Anything that can open an event stream for an outgoing chat message.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// POST `body` to `path` with `Accept: text/event-stream`.
    ///
    /// A non-success status is not an error here; it is reported by the parser.
    /// `Err` means the request never produced a response.
    async fn open_stream(
        &self,
        path: &str,
        body: &OutgoingMessage,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<SseResponse>;
}

/// Path of the streaming endpoint for one agent conversation.
pub fn stream_path(agent_id: &str, conversation_id: &str) -> String {
    format!("/agents/{agent_id}/conversations/{conversation_id}/stream?stream=true")
}
