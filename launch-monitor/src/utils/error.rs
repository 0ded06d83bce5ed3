use thiserror::Error;

/// Error classes for the monitoring core.
///
/// The class decides what a call site may do about a failure:
/// - `Config` aborts the process (never recoverable)
/// - `Rpc` rotates the active endpoint and retries
/// - `Api` carries the HTTP status of an off-chain call
/// - `Notifier` is swallowed after logging
/// - `Generic` is recoverable by default
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error on {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("API error {status} for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("{0}")]
    Generic(String),
}

impl MonitorError {
    pub fn rpc(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Rpc {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn api(status: u16, url: impl Into<String>, message: impl ToString) -> Self {
        Self::Api {
            status,
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Whether the state machine may keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(!MonitorError::Config("bad address".into()).is_recoverable());
    }

    #[test]
    fn test_other_classes_are_recoverable() {
        assert!(MonitorError::rpc("https://rpc.example", "timeout").is_recoverable());
        assert!(MonitorError::api(503, "https://api.example", "unavailable").is_recoverable());
        assert!(MonitorError::Notifier("send failed".into()).is_recoverable());
        assert!(MonitorError::Generic("oops".into()).is_recoverable());
    }
}
