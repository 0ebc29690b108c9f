use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::display::{AfterComplete, BatchPolicy, RevealConfig};
use crate::error::{ChatStreamError, CoreResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    /// Backend origin, e.g. `http://localhost:8000`. The stream path is appended to it.
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, streaming included (default 120000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DisplayCfg {
    #[serde(default = "default_reveal_interval_ms")]
    pub reveal_interval_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default)]
    pub after_complete: AfterComplete,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            reveal_interval_ms: default_reveal_interval_ms(),
            check_interval_ms: default_check_interval_ms(),
            after_complete: AfterComplete::default(),
        }
    }
}

impl DisplayCfg {
    pub fn reveal_config(&self) -> RevealConfig {
        RevealConfig {
            reveal_interval: Duration::from_millis(self.reveal_interval_ms),
            // a zero check interval would spin the driver
            check_interval: Duration::from_millis(self.check_interval_ms.max(1)),
            after_complete: self.after_complete,
        }
    }
}

fn default_reveal_interval_ms() -> u64 {
    20
}
fn default_check_interval_ms() -> u64 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BatchingCfg {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_threshold_chars")]
    pub flush_threshold_chars: usize,
}

impl Default for BatchingCfg {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            flush_threshold_chars: default_flush_threshold_chars(),
        }
    }
}

impl BatchingCfg {
    pub fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            flush_threshold: self.flush_threshold_chars,
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    40
}
fn default_flush_threshold_chars() -> usize {
    128
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub api: ApiCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub display: DisplayCfg,
    #[serde(default)]
    pub batching: BatchingCfg,
}

impl Config {
    /// All defaults, pointed at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiCfg {
                base_url: base_url.into(),
            },
            http: HttpCfg::default(),
            display: DisplayCfg::default(),
            batching: BatchingCfg::default(),
        }
    }

    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ChatStreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ChatStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))?
            }
            Some("toml") => {
                toml::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))?
            }
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ChatStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| ChatStreamError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        let base = self.api.base_url.trim();
        if base.is_empty() {
            return Err(ChatStreamError::Validation("api.base_url is empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ChatStreamError::Validation(format!(
                "api.base_url must be an http(s) URL, got {base:?}"
            )));
        }
        Ok(())
    }
}
