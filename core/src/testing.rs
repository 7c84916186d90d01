//! Test doubles shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::config::{Destination, ResolvedMethod, ResolvedParam};
use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::extension::{
    DefaultInjector, DefaultResponseHandler, DefaultSerializer, Flow, RequestInterceptor, RethrowErrors,
};
use crate::http::{HttpMethod, HttpRequest, HttpRequestBuilder};
use crate::response::HttpResponse;
use crate::transport::Transport;
use crate::types::{MethodId, ReturnType};

pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn fixture_param(index: usize, name: &str, destination: Destination) -> ResolvedParam {
    ResolvedParam {
        index,
        bound: true,
        name: name.to_string(),
        destination,
        serializer: Arc::new(DefaultSerializer),
        injector: Arc::new(DefaultInjector),
        default_value: None,
        ignore_empty: false,
    }
}

pub fn fixture_method(http_method: HttpMethod, path: &str, params: Vec<ResolvedParam>) -> ResolvedMethod {
    let types: Vec<&str> = params.iter().filter(|p| p.bound).map(|_| "serde_json::Value").collect();
    ResolvedMethod {
        id: MethodId::new("fixture", &types),
        returns: ReturnType::of::<String>(),
        server: "http://localhost".to_string(),
        interface_path: String::new(),
        path: path.to_string(),
        http_method,
        encoding: "UTF-8".to_string(),
        socket_timeout: Duration::from_secs(1),
        connection_timeout: Duration::from_secs(1),
        global_interceptor: None,
        interceptor: None,
        response_handler: Arc::new(DefaultResponseHandler::new()),
        error_handler: Arc::new(RethrowErrors),
        params,
    }
}

pub fn fixture_context(http_method: HttpMethod, path: &str, params: Vec<(ResolvedParam, Value)>) -> RequestContext {
    let (params, args): (Vec<_>, Vec<_>) = params.into_iter().unzip();
    RequestContext::new(fixture_method(http_method, path, params), args, Arc::new(BTreeMap::new()))
}

/// Records `label:hook` per call and optionally cancels at one hook.
pub struct RecordingInterceptor {
    label: String,
    calls: Calls,
    cancel_before: bool,
    cancel_after: bool,
}

impl RecordingInterceptor {
    pub fn new(label: &str, calls: Calls) -> Self {
        Self {
            label: label.to_string(),
            calls,
            cancel_before: false,
            cancel_after: false,
        }
    }

    pub fn cancelling_before(mut self) -> Self {
        self.cancel_before = true;
        self
    }

    pub fn cancelling_after(mut self) -> Self {
        self.cancel_after = true;
        self
    }

    fn record(&self, hook: &str, cancel: bool) -> Result<Flow, ProxyError> {
        self.calls.lock().unwrap().push(format!("{}:{hook}", self.label));
        Ok(if cancel { Flow::Cancel } else { Flow::Proceed })
    }
}

impl RequestInterceptor for RecordingInterceptor {
    fn before_params(&self, _ctx: &RequestContext, _builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        self.record("before", self.cancel_before)
    }

    fn after_params(&self, _ctx: &RequestContext, _builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        self.record("after", self.cancel_after)
    }
}

/// Replies with a canned response and keeps every request it saw.
pub struct RecordingTransport {
    pub requests: Mutex<Vec<HttpRequest>>,
    reply: Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, ProxyError> + Send + Sync>,
}

impl RecordingTransport {
    pub fn new(reply: impl Fn(&HttpRequest) -> Result<HttpResponse, ProxyError> + Send + Sync + 'static) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        }
    }

    pub fn replying(status: u16, body: &'static str) -> Self {
        Self::new(move |_| {
            Ok(HttpResponse::from_bytes(
                status,
                vec![("Content-Type".to_string(), "text/plain; charset=UTF-8".to_string())],
                body,
            ))
        })
    }

    pub fn sent(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_uri(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(HttpRequest::uri)
    }
}

impl Transport for RecordingTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ProxyError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.reply)(request)
    }
}
