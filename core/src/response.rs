//! Response model: status, headers, and a closable body.
//!
//! # Design
//! The body is a one-shot byte stream. It can be handed out raw
//! (`take_body`, `reader`), read incrementally (`stream`), or materialized
//! once as a string (`text`). Materializing is one-way: afterwards the stream
//! and reader accessors fail with `IllegalState`. Closing is idempotent and
//! also happens on drop, so every exit path releases the transport resource
//! exactly once.

use std::fmt;
use std::io::{self, BufRead, BufReader, Cursor, Read};

use flate2::read::GzDecoder;

use crate::error::{HttpFailure, ProxyError, ERROR_BODY_PREVIEW_LIMIT};

pub const DEFAULT_MIME_TYPE: &str = "text/html";
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

/// Owned response byte stream. Closed exactly once, at the latest on drop.
pub struct ResponseBody {
    inner: Option<Box<dyn Read>>,
    charset: String,
}

impl ResponseBody {
    pub fn new(reader: impl Read + 'static, charset: impl Into<String>) -> Self {
        Self {
            inner: Some(Box::new(reader)),
            charset: charset.into(),
        }
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the underlying stream. Further calls are no-ops.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::trace!(target: "restproxy::response", "response body closed");
        }
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(io::Error::other("response body is closed")),
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("charset", &self.charset)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum BodyState {
    Open(ResponseBody),
    Materialized(String),
    Detached,
}

/// An HTTP response as received from a transport.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    mime_type: String,
    charset: String,
    state: BodyState,
}

impl HttpResponse {
    /// Wrap a raw body. A `Content-Encoding: gzip` body is decoded transparently.
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Read + 'static) -> Self {
        let (mime_type, charset) = parse_content_type(find_header(&headers, "content-type"));
        let gzip = find_header(&headers, "content-encoding")
            .is_some_and(|value| value.split(',').any(|e| e.trim().eq_ignore_ascii_case("gzip")));
        let body = if gzip {
            ResponseBody::new(GzDecoder::new(body), charset.clone())
        } else {
            ResponseBody::new(body, charset.clone())
        };
        Self {
            status,
            headers,
            mime_type,
            charset,
            state: BodyState::Open(body),
        }
    }

    /// Convenience constructor over an in-memory body.
    pub fn from_bytes(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, headers, Cursor::new(body.into()))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive lookup of the first header with `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Read the whole body and decode it with the response charset.
    ///
    /// Memoized: later calls return the same string. Closes the stream.
    pub fn text(&mut self) -> Result<&str, ProxyError> {
        let decoded = match &mut self.state {
            BodyState::Open(body) => {
                let mut bytes = Vec::new();
                body.read_to_end(&mut bytes)?;
                body.close();
                Some(decode(&bytes, &self.charset))
            }
            BodyState::Materialized(_) => None,
            BodyState::Detached => {
                return Err(ProxyError::IllegalState(
                    "response body was handed out as a stream".to_string(),
                ))
            }
        };
        if let Some(text) = decoded {
            self.state = BodyState::Materialized(text);
        }
        match &self.state {
            BodyState::Materialized(text) => Ok(text.as_str()),
            _ => Err(ProxyError::IllegalState("response body is unavailable".to_string())),
        }
    }

    /// Borrow the live body stream.
    pub fn stream(&mut self) -> Result<&mut ResponseBody, ProxyError> {
        match &mut self.state {
            BodyState::Open(body) => Ok(body),
            BodyState::Materialized(_) => Err(materialized_error()),
            BodyState::Detached => Err(ProxyError::IllegalState(
                "response body was already taken".to_string(),
            )),
        }
    }

    /// Move the live body stream out; the caller becomes responsible for closing it.
    pub fn take_body(&mut self) -> Result<ResponseBody, ProxyError> {
        match std::mem::replace(&mut self.state, BodyState::Detached) {
            BodyState::Open(body) => Ok(body),
            BodyState::Materialized(text) => {
                self.state = BodyState::Materialized(text);
                Err(materialized_error())
            }
            BodyState::Detached => Err(ProxyError::IllegalState(
                "response body was already taken".to_string(),
            )),
        }
    }

    /// Move the live body out as a charset-aware reader.
    pub fn reader(&mut self) -> Result<BodyReader, ProxyError> {
        self.take_body().map(BodyReader::new)
    }

    pub fn close(&mut self) {
        if let BodyState::Open(body) = &mut self.state {
            body.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.state {
            BodyState::Open(body) => body.is_closed(),
            BodyState::Materialized(_) | BodyState::Detached => true,
        }
    }

    /// Snapshot status, headers and a bounded body prefix, then close the body.
    pub(crate) fn capture_failure(&mut self) -> HttpFailure {
        let body_preview = match &mut self.state {
            BodyState::Open(body) => {
                let mut bytes = Vec::new();
                let limit = ERROR_BODY_PREVIEW_LIMIT as u64;
                if let Err(err) = body.by_ref().take(limit).read_to_end(&mut bytes) {
                    tracing::debug!(target: "restproxy::response", error = %err, "failed to read error body");
                }
                body.close();
                decode(&bytes, &self.charset)
            }
            BodyState::Materialized(text) => text.chars().take(ERROR_BODY_PREVIEW_LIMIT).collect(),
            BodyState::Detached => String::new(),
        };
        HttpFailure {
            status: self.status,
            headers: self.headers.clone(),
            body_preview,
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("mime_type", &self.mime_type)
            .field("charset", &self.charset)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Line-oriented reader over a response body, decoding with its charset.
pub struct BodyReader {
    inner: BufReader<ResponseBody>,
    charset: String,
}

impl BodyReader {
    pub fn new(body: ResponseBody) -> Self {
        let charset = body.charset().to_string();
        Self {
            inner: BufReader::new(body),
            charset,
        }
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Append the next line (including its terminator) to `buf`.
    pub fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        let mut bytes = Vec::new();
        let read = self.inner.read_until(b'\n', &mut bytes)?;
        buf.push_str(&decode(&bytes, &self.charset));
        Ok(read)
    }

    pub fn read_to_string(&mut self) -> io::Result<String> {
        let mut bytes = Vec::new();
        self.inner.read_to_end(&mut bytes)?;
        Ok(decode(&bytes, &self.charset))
    }

    pub fn lines(self) -> Lines {
        Lines { reader: self }
    }

    pub fn close(&mut self) {
        self.inner.get_mut().close();
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

/// Iterator over decoded lines, without line terminators.
pub struct Lines {
    reader: BodyReader,
}

impl Iterator for Lines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
                line.truncate(trimmed);
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

fn materialized_error() -> ProxyError {
    ProxyError::IllegalState("response body was already materialized as a string".to_string())
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Split a Content-Type value into mime type and charset, applying defaults.
pub(crate) fn parse_content_type(value: Option<&str>) -> (String, String) {
    let Some(value) = value else {
        return (DEFAULT_MIME_TYPE.to_string(), DEFAULT_CHARSET.to_string());
    };
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let charset = parts
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, v)| v.trim().trim_matches('"').to_ascii_uppercase())
        .filter(|c| !c.is_empty());
    let charset = match charset {
        Some(charset) => charset,
        None if mime == "application/json" || mime.ends_with("+json") => "UTF-8".to_string(),
        None => DEFAULT_CHARSET.to_string(),
    };
    (mime, charset)
}

/// Decode bytes with `charset`. UTF-8 and Latin-1 are exact; anything else is lossy UTF-8.
pub(crate) fn decode(bytes: &[u8], charset: &str) -> String {
    match charset.to_ascii_uppercase().as_str() {
        "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "US-ASCII" => bytes.iter().map(|&b| char::from(b)).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
