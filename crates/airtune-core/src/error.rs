//! Error taxonomy for the playback core.
//!
//! Metadata-fetch failures are recovered locally with backoff and never
//! surfaced as fatal; playback failures are surfaced and require explicit
//! user action to retry.

/// Errors on the metadata-endpoint path.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Transport-level failure (DNS, connect, TLS, CORS-style rejection).
    #[error("metadata request to {host} failed: {source}")]
    Transport {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    /// Endpoint responded with a non-2xx status.
    #[error("metadata endpoint returned HTTP {0}")]
    Status(u16),

    /// Body was not valid payload JSON.
    #[error("malformed metadata payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl MetadataError {
    /// Build a transport error, naming the offending hostname when it can be
    /// derived from the request URL.
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| url.to_string());
        Self::Transport { host, source }
    }

    /// Malformed payloads are treated as "no change" by the poller: the
    /// previous now-playing value is retained and no failure is counted.
    pub fn is_no_change(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Errors from playback control operations.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("no channel selected")]
    NoChannel,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("audio port: {0}")]
    Port(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_names_host() {
        let source = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = MetadataError::Malformed(source);
        assert!(err.is_no_change());

        // Host derivation falls back to the raw string for unparseable URLs.
        let parsed = reqwest::Url::parse("https://api.example.org/station/jazz").unwrap();
        assert_eq!(parsed.host_str(), Some("api.example.org"));
    }

    #[test]
    fn test_status_error_display() {
        let err = MetadataError::Status(503);
        assert_eq!(err.to_string(), "metadata endpoint returned HTTP 503");
        assert!(!err.is_no_change());
    }
}
