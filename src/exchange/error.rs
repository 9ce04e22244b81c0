use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Exchange API credentials are not configured")]
    NotConfigured,

    #[error("Unsupported withdrawal network '{requested}', only {allowed} is verified")]
    UnsupportedNetwork { requested: String, allowed: String },

    #[error("HTTP request failed: {message}")]
    Transport { message: String, retryable: bool },

    #[error("Exchange returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response from exchange: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Transient failures worth another attempt: dropped or timed-out
    /// connections and the gateway/throttling statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Transport { retryable, .. } => *retryable,
            ExchangeError::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ExchangeError::InvalidResponse(e.to_string());
        }
        let retryable = e.is_timeout() || e.is_connect() || has_dropped_connection(&e);
        ExchangeError::Transport {
            message: e.to_string(),
            retryable,
        }
    }
}

fn has_dropped_connection(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = err.source();
    }
    false
}
