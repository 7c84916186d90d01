//! Fallback values for unset configuration fields.
//!
//! Resolution order for every field is: explicit builder value, then the
//! matching `DefaultsOverrides` entry, then the constant below. `server` has
//! no constant and is therefore mandatory.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{Destination, ErrorPolicy};
use crate::error::ProxyError;
use crate::http::{fill_placeholders, HttpMethod};

pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_HTTP_METHOD: HttpMethod = HttpMethod::Get;
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PATH: &str = "";
pub const DEFAULT_DESTINATION: Destination = Destination::Query;
pub const DEFAULT_IGNORE_EMPTY: bool = false;
pub const DEFAULT_ERROR_POLICY: ErrorPolicy = ErrorPolicy::Rethrow;

/// Typed replacement for a global property bag.
///
/// Loadable from JSON; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsOverrides {
    pub server: Option<String>,
    pub path: Option<String>,
    pub encoding: Option<String>,
    pub http_method: Option<HttpMethod>,
    pub socket_timeout_ms: Option<u64>,
    pub connection_timeout_ms: Option<u64>,
    pub destination: Option<Destination>,
    pub ignore_empty: Option<bool>,
    pub error_policy: Option<ErrorPolicy>,
    /// `{token}` substitutions applied to server and path strings at build time.
    pub tokens: BTreeMap<String, String>,
}

impl DefaultsOverrides {
    pub fn from_json(json: &str) -> Result<Self, ProxyError> {
        serde_json::from_str(json).map_err(|e| ProxyError::config("defaults", e.to_string()))
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_PATH)
    }

    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or(DEFAULT_ENCODING)
    }

    pub fn http_method(&self) -> HttpMethod {
        self.http_method.unwrap_or(DEFAULT_HTTP_METHOD)
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SOCKET_TIMEOUT)
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT)
    }

    pub fn destination(&self) -> Destination {
        self.destination.unwrap_or(DEFAULT_DESTINATION)
    }

    pub fn ignore_empty(&self) -> bool {
        self.ignore_empty.unwrap_or(DEFAULT_IGNORE_EMPTY)
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy.unwrap_or(DEFAULT_ERROR_POLICY)
    }

    /// Replace known `{token}`s; unknown ones stay for request-time binding.
    pub fn substitute_tokens(&self, value: &str) -> String {
        if self.tokens.is_empty() {
            return value.to_string();
        }
        fill_placeholders(value, |name| self.tokens.get(name).cloned()).0
    }
}

pub fn parse_http_method(value: &str) -> Result<HttpMethod, ProxyError> {
    match value.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        "DELETE" => Ok(HttpMethod::Delete),
        "PATCH" => Ok(HttpMethod::Patch),
        "HEAD" => Ok(HttpMethod::Head),
        "OPTIONS" => Ok(HttpMethod::Options),
        other => Err(ProxyError::config("http_method", format!("unknown HTTP method '{other}'"))),
    }
}

pub fn parse_destination(value: &str) -> Result<Destination, ProxyError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "query" | "url" => Ok(Destination::Query),
        "path" => Ok(Destination::Path),
        "form" => Ok(Destination::Form),
        "header" => Ok(Destination::Header),
        "body" => Ok(Destination::Body),
        other => Err(ProxyError::config("destination", format!("unknown destination '{other}'"))),
    }
}

pub fn parse_duration_ms(value: &str) -> Result<Duration, ProxyError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ProxyError::config("timeout", format!("'{value}' is not a millisecond count: {e}")))
}

pub fn parse_bool(value: &str) -> Result<bool, ProxyError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(ProxyError::config("flag", format!("'{other}' is not a boolean"))),
    }
}
