//! HTTP transports.
//!
//! A `Transport` executes one `HttpRequest` and returns the raw response for
//! any status; classifying the status is the dispatcher's job. Instances are
//! shared by every proxy built from a factory, so implementations must be
//! safe for concurrent use.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::ProxyError;
use crate::http::HttpRequest;
use crate::response::HttpResponse;

pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProxyError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProxyError> {
        (**self).execute(request)
    }
}

/// Connection limits and negotiation options for `UreqTransport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub max_total_connections: usize,
    pub max_connections_per_route: usize,
    /// Advertise `Accept-Encoding: gzip`; gzip bodies are decoded either way.
    pub gzip: bool,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_total_connections: 100,
            max_connections_per_route: 10,
            gzip: true,
        }
    }
}

/// Caps in-flight exchanges in total and per route (`scheme://authority`).
///
/// A permit lives as long as the response body, so a caller holding an
/// unread stream keeps its connection counted.
#[derive(Debug)]
struct ConnectionGate {
    max_total: usize,
    max_per_route: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    total: usize,
    per_route: BTreeMap<String, usize>,
}

impl GateState {
    fn in_use(&self, route: &str) -> usize {
        self.per_route.get(route).copied().unwrap_or(0)
    }
}

impl ConnectionGate {
    fn new(limits: TransportLimits) -> Self {
        Self {
            max_total: limits.max_total_connections.max(1),
            max_per_route: limits.max_connections_per_route.max(1),
            state: Mutex::default(),
            released: Condvar::new(),
        }
    }

    /// Waits at most `wait` for a free connection to `route`.
    fn acquire(self: &Arc<Self>, route: &str, wait: Duration) -> Option<ConnectionPermit> {
        let deadline = Instant::now().checked_add(wait);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.total >= self.max_total || state.in_use(route) >= self.max_per_route {
            trace!(target: "restproxy::transport", route, in_flight = state.total, "waiting for a connection");
            match deadline {
                None => state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    state = self
                        .released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        state.total += 1;
        *state.per_route.entry(route.to_string()).or_default() += 1;
        Some(ConnectionPermit {
            gate: Arc::clone(self),
            route: route.to_string(),
        })
    }

    fn release(&self, route: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total = state.total.saturating_sub(1);
        let remaining = state.per_route.get_mut(route).map(|count| {
            *count = count.saturating_sub(1);
            *count
        });
        if remaining == Some(0) {
            state.per_route.remove(route);
        }
        drop(state);
        self.released.notify_all();
    }
}

struct ConnectionPermit {
    gate: Arc<ConnectionGate>,
    route: String,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.gate.release(&self.route);
    }
}

/// Response body that gives its connection back when dropped.
struct LeasedBody<R> {
    inner: R,
    _permit: ConnectionPermit,
}

impl<R: Read> Read for LeasedBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

fn route_of(uri: &ureq::http::Uri) -> String {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
        _ => uri.to_string(),
    }
}

/// Blocking transport over a pooled `ureq` agent.
///
/// Exchanges beyond the configured limits queue for up to the request's
/// connection timeout. Clones share one pool and one set of limits.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    limits: TransportLimits,
    gate: Arc<ConnectionGate>,
}

impl UreqTransport {
    pub fn new(limits: TransportLimits) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_idle_connections(limits.max_total_connections)
            .max_idle_connections_per_host(limits.max_connections_per_route)
            .build()
            .new_agent();
        Self {
            agent,
            limits,
            gate: Arc::new(ConnectionGate::new(limits)),
        }
    }

    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    fn to_ureq(&self, request: &HttpRequest) -> Result<ureq::http::Request<Vec<u8>>, ProxyError> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.uri());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if self.limits.gzip && request.header("Accept-Encoding").is_none() {
            builder = builder.header("Accept-Encoding", "gzip");
        }
        let entity = request.entity();
        if request.body.is_none() && entity.is_some() && request.header("Content-Type").is_none() {
            builder = builder.header(
                "Content-Type",
                format!("application/x-www-form-urlencoded; charset={}", request.encoding),
            );
        }
        builder
            .body(entity.map(String::into_bytes).unwrap_or_default())
            .map_err(|e| ProxyError::InvalidRequest(format!("{} {}: {e}", request.method, request.uri())))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(TransportLimits::default())
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").field("limits", &self.limits).finish()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProxyError> {
        let uri = request.uri();
        let converted = self.to_ureq(request)?;
        let route = route_of(converted.uri());
        let permit = self
            .gate
            .acquire(&route, request.connection_timeout)
            .ok_or_else(|| ProxyError::Transport {
                method: request.method,
                uri: uri.clone(),
                source: Box::new(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no free connection to {route} within {:?}", request.connection_timeout),
                )),
            })?;
        let configured = self
            .agent
            .configure_request(converted)
            .timeout_connect(Some(request.connection_timeout))
            .timeout_recv_response(Some(request.socket_timeout))
            .timeout_recv_body(Some(request.socket_timeout))
            .build();

        let response = self.agent.run(configured).map_err(|source| ProxyError::Transport {
            method: request.method,
            uri: uri.clone(),
            source: Box::new(source),
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        debug!(target: "restproxy::transport", method = %request.method, uri = %uri, status, "exchange completed");
        let body = LeasedBody {
            inner: response.into_body().into_reader(),
            _permit: permit,
        };
        Ok(HttpResponse::new(status, headers, body))
    }
}
