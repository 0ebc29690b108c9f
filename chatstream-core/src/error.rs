use thiserror::Error;

/// Core error type for chatstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatStreamError {
    /// Non-success status or a response without a body. The stream never starts.
    #[error("Request failed: {status}")]
    InvalidResponse { status: u16 },

    /// The request could not be sent, or the byte reader failed mid-stream.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A frame carried data that is not JSON or has no string `text` field.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatStreamError {
    /// True for failures where the backend could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    /// Stable short name, used for telemetry `error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidResponse { .. } => "invalid_response",
            Self::TransportFailure(_) => "transport_failure",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::Validation(_) => "validation",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// Text suitable for showing to a person. Network-class failures become a
    /// "backend unreachable" notice; everything else is the literal message.
    pub fn user_message(&self, api_base: Option<&str>) -> String {
        if self.is_network() {
            let base = api_base.unwrap_or("the API");
            format!("Unable to reach {base}. Is the backend running?")
        } else {
            self.to_string()
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatStreamError>;
