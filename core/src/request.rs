//! Request assembly.
//!
//! Hooks run in a fixed order and may cancel at any point:
//! global before, method before, parameter injectors in declaration order,
//! method after, global after. A cancelled build never reaches the transport.

use tracing::{debug, info, trace};

use crate::config::Destination;
use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::extension::{Flow, RequestInterceptor};
use crate::http::{HttpMethod, HttpRequest, HttpRequestBuilder};

/// A parameter applied to every request a proxy sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticParam {
    pub destination: Destination,
    pub name: String,
    pub value: String,
}

impl StaticParam {
    pub fn new(destination: Destination, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            destination,
            name: name.into(),
            value: value.into(),
        }
    }

    fn apply(&self, builder: &mut HttpRequestBuilder) {
        match self.destination {
            Destination::Header => {
                builder.header(&self.name, &self.value);
            }
            Destination::Path => {
                builder.path_param(&self.name, &self.value);
            }
            Destination::Query => {
                builder.query_param(&self.name, &self.value);
            }
            Destination::Form if builder.http_method() == HttpMethod::Get => {
                builder.query_param(&self.name, &self.value);
            }
            Destination::Form => {
                builder.form_param(&self.name, &self.value);
            }
            Destination::Body if builder.http_method() == HttpMethod::Get => {
                builder.query_param(&self.name, &self.value);
            }
            Destination::Body => {
                builder.body(&self.value);
            }
        }
    }
}

/// Factory-wide request settings.
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub static_params: Vec<StaticParam>,
    /// Implicit `Accept` header, set unless the request already carries one.
    pub accept: Option<String>,
}

#[derive(Debug)]
pub enum Built {
    Ready(HttpRequest),
    Cancelled,
}

fn run_hook(
    ctx: &RequestContext,
    stage: &'static str,
    interceptor: Option<&dyn RequestInterceptor>,
    hook: impl FnOnce(&dyn RequestInterceptor) -> Result<Flow, ProxyError>,
) -> Result<bool, ProxyError> {
    let Some(interceptor) = interceptor else {
        return Ok(true);
    };
    if hook(interceptor)?.is_cancel() {
        info!(
            target: "restproxy::request",
            invocation = %ctx.invocation_id(),
            method = %ctx.method_id(),
            stage,
            "request cancelled by interceptor"
        );
        return Ok(false);
    }
    Ok(true)
}

pub fn build_request(ctx: &RequestContext, defaults: &RequestDefaults) -> Result<Built, ProxyError> {
    let method = ctx.method();
    let mut builder = HttpRequestBuilder::new(method.http_method, method.full_path());
    builder
        .encoding(method.encoding.as_str())
        .socket_timeout(method.socket_timeout)
        .connection_timeout(method.connection_timeout);
    for param in &defaults.static_params {
        param.apply(&mut builder);
    }

    let global = method.global_interceptor.as_deref();
    let local = method.interceptor.as_deref();

    if !run_hook(ctx, "global before params", global, |i| i.before_params(ctx, &mut builder))? {
        return Ok(Built::Cancelled);
    }
    if !run_hook(ctx, "method before params", local, |i| i.before_params(ctx, &mut builder))? {
        return Ok(Built::Cancelled);
    }
    for param in ctx.params() {
        trace!(
            target: "restproxy::request",
            invocation = %ctx.invocation_id(),
            index = param.index(),
            name = param.name(),
            destination = ?param.destination(),
            "injecting parameter"
        );
        param.param().injector.inject(&param, &mut builder)?;
    }
    if !run_hook(ctx, "method after params", local, |i| i.after_params(ctx, &mut builder))? {
        return Ok(Built::Cancelled);
    }
    if !run_hook(ctx, "global after params", global, |i| i.after_params(ctx, &mut builder))? {
        return Ok(Built::Cancelled);
    }

    if let Some(accept) = &defaults.accept {
        if !builder.has_header("Accept") {
            builder.header("Accept", accept);
        }
    }
    let request = builder.build()?;
    debug!(
        target: "restproxy::request",
        invocation = %ctx.invocation_id(),
        method = %request.method,
        uri = %request.uri(),
        "request built"
    );
    Ok(Built::Ready(request))
}
