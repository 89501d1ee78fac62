//! # External Article Source
//!
//! The paginated data source the planner counts and the executor crawls. Only
//! two capabilities are needed: the total item count and "give me page N".
//! Pages are JSON objects carrying a `messages` metadata block and a
//! `collection` of items; anything else is [`SourceError::Malformed`].

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::constants::fields;

pub use http::HttpArticleSource;

/// Classifies errors as transient (worth another attempt) or permanent
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response for page {page}: {reason}")]
    Malformed { page: u64, reason: String },

    #[error("Source temporarily unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn malformed(page: u64, reason: impl Into<String>) -> Self {
        Self::Malformed {
            page,
            reason: reason.into(),
        }
    }
}

/// I/O failures of a connection that a fresh request can get past
fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Interrupted
    )
}

/// Transport failure with no HTTP status: timeouts, refused or dropped
/// connections, and bodies cut off mid-transfer
fn is_transient_transport(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        return true;
    }

    let mut cause = std::error::Error::source(error);
    while let Some(inner) = cause {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if is_transient_io(io.kind()) {
                return true;
            }
        }
        cause = inner.source();
    }
    false
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Request { source, .. } => {
                source.status().is_none() && is_transient_transport(source)
            }
            // Server errors and throttling clear up on their own
            SourceError::Status { status, .. } => *status >= 500 || *status == 429,
            SourceError::Unavailable(_) => true,
            SourceError::Malformed { .. } | SourceError::Client(_) => false,
        }
    }
}

/// One page of the external collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub messages: Vec<Value>,
    pub collection: Vec<Value>,
}

impl SourcePage {
    pub fn new(messages: Vec<Value>, collection: Vec<Value>) -> Self {
        Self {
            messages,
            collection,
        }
    }

    /// Accept only objects with `messages` and `collection` arrays
    pub fn from_value(page: u64, value: Value) -> Result<Self, SourceError> {
        let Value::Object(mut object) = value else {
            return Err(SourceError::malformed(page, "response is not a JSON object"));
        };

        let messages = match object.remove(fields::MESSAGES) {
            Some(Value::Array(messages)) => messages,
            Some(_) => return Err(SourceError::malformed(page, "`messages` is not an array")),
            None => return Err(SourceError::malformed(page, "missing `messages`")),
        };
        let collection = match object.remove(fields::COLLECTION) {
            Some(Value::Array(collection)) => collection,
            Some(_) => return Err(SourceError::malformed(page, "`collection` is not an array")),
            None => return Err(SourceError::malformed(page, "missing `collection`")),
        };

        Ok(Self {
            messages,
            collection,
        })
    }

    pub fn item_count(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }
}

/// `messages[0].total` as a non-negative integer, given as a number or a numeric string
pub fn parse_total(body: &Value) -> Option<u64> {
    let total = body
        .get(fields::MESSAGES)?
        .as_array()?
        .first()?
        .get(fields::TOTAL)?;

    match total {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Total items in the collection; 0 when the source fails or answers nonsense
    async fn total_count(&self) -> u64;

    async fn fetch_page(&self, page: u64) -> Result<SourcePage, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_requires_both_arrays() {
        let page = SourcePage::from_value(
            3,
            json!({"messages": [{"status": "ok"}], "collection": [{"rel_doi": "a"}]}),
        )
        .unwrap();
        assert_eq!(page.item_count(), 1);
        assert_eq!(page.messages.len(), 1);

        assert!(matches!(
            SourcePage::from_value(3, json!({"collection": []})),
            Err(SourceError::Malformed { page: 3, .. })
        ));
        assert!(matches!(
            SourcePage::from_value(3, json!({"messages": [], "collection": {}})),
            Err(SourceError::Malformed { .. })
        ));
        assert!(matches!(
            SourcePage::from_value(3, json!([1, 2, 3])),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_total() {
        assert_eq!(parse_total(&json!({"messages": [{"total": 250}]})), Some(250));
        assert_eq!(parse_total(&json!({"messages": [{"total": "1234"}]})), Some(1234));
        assert_eq!(parse_total(&json!({"messages": [{"total": -1}]})), None);
        assert_eq!(parse_total(&json!({"messages": [{"total": "many"}]})), None);
        assert_eq!(parse_total(&json!({"messages": []})), None);
        assert_eq!(parse_total(&json!({"collection": []})), None);
    }

    #[test]
    fn test_retry_classification() {
        let server_error = SourceError::Status {
            url: "http://x".into(),
            status: 503,
        };
        let throttled = SourceError::Status {
            url: "http://x".into(),
            status: 429,
        };
        let not_found = SourceError::Status {
            url: "http://x".into(),
            status: 404,
        };
        assert!(server_error.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!SourceError::malformed(0, "bad").is_retryable());
        assert!(SourceError::Unavailable("reset".into()).is_retryable());
    }

    #[test]
    fn test_dropped_connections_are_transient() {
        use std::io::ErrorKind;

        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
            ErrorKind::BrokenPipe,
            ErrorKind::UnexpectedEof,
        ] {
            assert!(is_transient_io(kind), "{kind:?}");
        }
        assert!(!is_transient_io(ErrorKind::PermissionDenied));
        assert!(!is_transient_io(ErrorKind::InvalidData));
    }
}
