//! Wire-level request model.
//!
//! # Design
//! `HttpRequest` is plain, immutable data handed to a `Transport`. It is
//! produced by `HttpRequestBuilder`, which interceptors and injectors mutate
//! in place while a call is being assembled. Path placeholders (`{name}` or
//! positional `{0}`) can be substituted eagerly with `replace_placeholder`
//! or bound lazily with `path_param`; `build` fails on any placeholder still
//! unbound at that point rather than substituting an empty string.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
///
/// `path` is the fully substituted base path; `uri()` appends the encoded
/// query. Form parameters and `body` are mutually exclusive on the wire:
/// a transport sends `body` when present, otherwise the encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub raw_query: Vec<String>,
    pub path_params: BTreeMap<String, String>,
    pub form: Vec<(String, String)>,
    pub body: Option<String>,
    pub encoding: String,
    pub socket_timeout: Duration,
    pub connection_timeout: Duration,
}

impl HttpRequest {
    /// Full request URI: substituted path plus the encoded query string.
    pub fn uri(&self) -> String {
        let mut parts: Vec<String> = self
            .query
            .iter()
            .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
            .collect();
        parts.extend(self.raw_query.iter().cloned());
        if parts.is_empty() {
            return self.path.clone();
        }
        let separator = if self.path.contains('?') { '&' } else { '?' };
        format!("{}{separator}{}", self.path, parts.join("&"))
    }

    /// Case-insensitive lookup of the first header with `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Entity bytes as sent on the wire: the raw body, else the url-encoded form.
    pub fn entity(&self) -> Option<String> {
        if let Some(body) = &self.body {
            return Some(body.clone());
        }
        if self.form.is_empty() {
            return None;
        }
        Some(encode_pairs(&self.form))
    }
}

/// Mutable, incremental builder for an `HttpRequest`.
#[derive(Debug, Clone)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    path: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    raw_query: Vec<String>,
    path_params: BTreeMap<String, String>,
    form: Vec<(String, String)>,
    body: Option<String>,
    encoding: String,
    socket_timeout: Duration,
    connection_timeout: Duration,
}

impl HttpRequestBuilder {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            raw_query: Vec::new(),
            path_params: BTreeMap::new(),
            form: Vec::new(),
            body: None,
            encoding: crate::config::defaults::DEFAULT_ENCODING.to_string(),
            socket_timeout: crate::config::defaults::DEFAULT_SOCKET_TIMEOUT,
            connection_timeout: crate::config::defaults::DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    pub fn http_method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn encoding(&mut self, encoding: impl Into<String>) -> &mut Self {
        self.encoding = encoding.into();
        self
    }

    pub fn socket_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn connection_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connection_timeout = timeout;
        self
    }

    /// Append a header, keeping any existing header with the same name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace every header named `name` with a single value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn query_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append an already-encoded query fragment such as `a=1&b=2`.
    pub fn raw_query(&mut self, fragment: impl Into<String>) -> &mut Self {
        let fragment = fragment.into();
        let fragment = fragment.trim_start_matches(&['?', '&'][..]);
        if !fragment.is_empty() {
            self.raw_query.push(fragment.to_string());
        }
        self
    }

    pub fn form_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.form.push((name.into(), value.into()));
        self
    }

    /// Bind a path placeholder; substitution happens in `build`.
    pub fn path_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn body(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    pub fn has_placeholder(&self, name: &str) -> bool {
        placeholder_names(&self.path).iter().any(|token| *token == name)
    }

    /// Substitute `{name}` in the path right away. Returns whether it was present.
    pub fn replace_placeholder(&mut self, name: &str, value: &str) -> bool {
        if !self.has_placeholder(name) {
            return false;
        }
        let encoded = urlencoding::encode(value);
        self.path = self.path.replace(&format!("{{{name}}}"), &encoded);
        true
    }

    /// Freeze into an `HttpRequest`, binding remaining placeholders.
    pub fn build(&self) -> Result<HttpRequest, ProxyError> {
        let (path, missing) = fill_placeholders(&self.path, |name| {
            self.path_params
                .get(name)
                .map(|value| urlencoding::encode(value).into_owned())
        });
        if let Some(placeholder) = missing.into_iter().next() {
            return Err(ProxyError::UnboundPlaceholder {
                placeholder,
                path: self.path.clone(),
            });
        }
        Ok(HttpRequest {
            method: self.method,
            path,
            headers: self.headers.clone(),
            query: self.query.clone(),
            raw_query: self.raw_query.clone(),
            path_params: self.path_params.clone(),
            form: self.form.clone(),
            body: self.body.clone(),
            encoding: self.encoding.clone(),
            socket_timeout: self.socket_timeout,
            connection_timeout: self.connection_timeout,
        })
    }
}

/// Names of every `{token}` occurring in `path`, in order.
pub(crate) fn placeholder_names(path: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty() && !name.contains('{') {
                    names.push(name);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Replace each `{token}` for which `lookup` yields a value.
///
/// Tokens without a value are left verbatim and reported in the second
/// element of the result.
pub(crate) fn fill_placeholders(
    path: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> (String, Vec<String>) {
    let mut out = String::with_capacity(path.len());
    let mut missing = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return (out, missing);
        };
        let name = &after[..close];
        match lookup(name) {
            Some(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                if !name.is_empty() {
                    missing.push(name.to_string());
                }
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    (out, missing)
}

pub(crate) fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
