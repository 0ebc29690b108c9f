use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, error};

use crate::config::{Config, HttpCfg};
use crate::error::{ChatStreamError, CoreResult};
use crate::model::OutgoingMessage;
use crate::source::{EventSource, RequestCtx, SseResponse};

/// Thin wrapper around reqwest::Client bound to one backend.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    base_url: String,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg, base_url: impl Into<String>) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(max) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        let inner = builder
            .build()
            .map_err(|e| ChatStreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: concat!("chatstream/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Self::new(&cfg.http, cfg.api.base_url.as_str())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl EventSource for HttpClient {
    async fn open_stream(
        &self,
        path: &str,
        body: &OutgoingMessage,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<SseResponse> {
        let url = self.url(path);
        let mut req = self
            .inner
            .post(&url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(tid) = ctx.turn_id {
            req = req.header("X-Turn-Id", tid);
        }

        let resp = req.send().await.map_err(|e| {
            error!(url = %url, error = %e, "stream request failed");
            ChatStreamError::TransportFailure(e.to_string())
        })?;

        let status = resp.status();
        debug!(url = %url, status = status.as_u16(), "stream opened");
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatStreamError::TransportFailure(e.to_string())))
            .boxed();
        Ok(SseResponse::new(status, Some(body)))
    }
}
