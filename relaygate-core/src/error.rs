use thiserror::Error;

/// Core error type for relaygate.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("upstream error: {code} {message}")]
    UpstreamError { code: String, message: String },

    /// The client connection went away while events were still being written.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// HTTP status a non-streaming response should carry for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::UpstreamUnavailable { .. } | Self::UpstreamError { .. } => 502,
            // Nobody is listening anymore; 499 is what proxies log for this.
            Self::ClientDisconnected => 499,
            Self::Execution(_) | Self::Io(_) | Self::Other(_) => 500,
        }
    }

    /// Error `type` as reported inside a client-facing error payload.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::RateLimited { .. } => "rate_limit_error",
            _ => "api_error",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, BridgeError>;
