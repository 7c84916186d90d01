//! Error types for the proxy core.
//!
//! # Design
//! A single `ProxyError` crosses every seam: configuration building, request
//! building, transport, response handling and the extension points. HTTP
//! status failures get their own `HttpFailure` payload so error handlers can
//! inspect status and headers without downcasting. Foreign errors raised by
//! user extension points are folded into `Extension` by `ProxyError::wrap`.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use crate::http::HttpMethod;

/// Upper bound on how much of a failed response body is kept for diagnostics.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 4096;

/// Errors raised while building or invoking a proxy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// Interface configuration could not be built or is inconsistent.
    #[error("configuration error for {target}: {reason}")]
    Config { target: String, reason: String },

    /// A `{placeholder}` in the request path had no bound value at build time.
    #[error("path placeholder '{{{placeholder}}}' has no bound value in '{path}'")]
    UnboundPlaceholder { placeholder: String, path: String },

    /// The call itself was malformed (unknown method, wrong argument count).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The transport failed before a response existed.
    #[error("transport failure for {method} {uri}: {source}")]
    Transport {
        method: HttpMethod,
        uri: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The server answered with a status other than the success status.
    #[error("HTTP {}: {}", .0.status, .0.body_preview)]
    Http(HttpFailure),

    /// A successful response could not be turned into the declared return type.
    #[error("response handling failed: {0}")]
    Handling(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// No decode slot became available before the wait timed out.
    #[error("no decode slot available within {0:?}")]
    DecodeTimeout(Duration),

    /// An argument could not be converted into its wire form.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A response body could not be decoded.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A foreign error raised by a user extension point.
    #[error("extension failure: {0}")]
    Extension(#[source] Box<dyn StdError + Send + Sync>),

    /// A user extension point panicked during an invocation.
    #[error("extension point panicked: {0}")]
    Panicked(String),
}

impl ProxyError {
    pub fn config(target: impl Into<String>, reason: impl Into<String>) -> Self {
        ProxyError::Config {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Fold any error into a `ProxyError`, keeping it unchanged if it already is one.
    pub fn wrap<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let boxed: Box<dyn StdError + Send + Sync> = Box::new(error);
        match boxed.downcast::<ProxyError>() {
            Ok(proxy) => *proxy,
            Err(other) => ProxyError::Extension(other),
        }
    }

    /// Status code of the failed response, if this is an HTTP status failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::Http(failure) => Some(failure.status),
            _ => None,
        }
    }
}

/// Best-effort snapshot of a response that did not carry the success status.
///
/// The body stream itself is closed once the preview is captured; only the
/// status, headers and a bounded prefix of the body survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body_preview: String,
}

impl HttpFailure {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("upstream quota exhausted")]
    struct QuotaError;

    #[test]
    fn wrap_keeps_proxy_errors_unchanged() {
        let original = ProxyError::IllegalState("stream consumed".to_string());
        let wrapped = ProxyError::wrap(original);
        assert!(matches!(wrapped, ProxyError::IllegalState(msg) if msg == "stream consumed"));
    }

    #[test]
    fn wrap_boxes_foreign_errors() {
        let wrapped = ProxyError::wrap(QuotaError);
        assert!(matches!(wrapped, ProxyError::Extension(_)));
        assert_eq!(wrapped.to_string(), "extension failure: upstream quota exhausted");
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn status_is_exposed_for_http_failures_only() {
        let err = ProxyError::Http(HttpFailure {
            status: 404,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body_preview: "missing".to_string(),
        });
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "HTTP 404: missing");
        assert_eq!(ProxyError::Handling("x".to_string()).status(), None);
    }

    #[test]
    fn failure_header_lookup_ignores_case() {
        let failure = HttpFailure {
            status: 503,
            headers: vec![("Retry-After".to_string(), "5".to_string())],
            body_preview: String::new(),
        };
        assert_eq!(failure.header("retry-after"), Some("5"));
        assert_eq!(failure.header("x-missing"), None);
    }

    #[test]
    fn placeholder_message_names_the_token() {
        let err = ProxyError::UnboundPlaceholder {
            placeholder: "id".to_string(),
            path: "http://h/items/{id}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "path placeholder '{id}' has no bound value in 'http://h/items/{id}'"
        );
    }
}
