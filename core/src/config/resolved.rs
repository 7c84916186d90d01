//! Per-invocation snapshot of a method's effective configuration.
//!
//! Resolution reads through the live override views once at the start of a
//! call, so a request is built from one consistent set of values even if the
//! underlying cells change concurrently.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Destination, InterfaceConfig, Layered, MethodConfig};
use crate::error::ProxyError;
use crate::extension::{
    ChainedInterceptor, ErrorHandler, RequestInjector, RequestInterceptor, ResponseHandler, Serializer,
};
use crate::http::HttpMethod;
use crate::types::{MethodId, ReturnType};

#[derive(Clone)]
pub struct ResolvedParam {
    pub index: usize,
    /// False for static params, which have no argument behind them.
    pub bound: bool,
    pub name: String,
    pub destination: Destination,
    pub serializer: Arc<dyn Serializer>,
    pub injector: Arc<dyn RequestInjector>,
    pub default_value: Option<String>,
    pub ignore_empty: bool,
}

#[derive(Clone)]
pub struct ResolvedMethod {
    pub id: MethodId,
    pub returns: ReturnType,
    pub server: String,
    pub interface_path: String,
    pub path: String,
    pub http_method: HttpMethod,
    pub encoding: String,
    pub socket_timeout: Duration,
    pub connection_timeout: Duration,
    /// Interface interceptor chained with the factory-wide ones.
    pub global_interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub response_handler: Arc<dyn ResponseHandler>,
    pub error_handler: Arc<dyn ErrorHandler>,
    pub params: Vec<ResolvedParam>,
}

fn missing(interface: &str, method: &MethodId, field: &str) -> ProxyError {
    ProxyError::config(format!("{interface}.{method}"), format!("no {field} in resolved configuration"))
}

impl ResolvedMethod {
    pub fn resolve(
        interface: &Layered<InterfaceConfig>,
        method: &Layered<MethodConfig>,
        returns: ReturnType,
        factory_interceptor: Option<Arc<dyn RequestInterceptor>>,
    ) -> Result<Self, ProxyError> {
        let name = interface.interface();
        let id = method.method_id();
        let arity = id.arity();

        let params = (0..method.param_count())
            .map(|index| {
                let param = method
                    .param(index)
                    .ok_or_else(|| missing(&name, &id, &format!("parameter {index}")))?;
                Ok(ResolvedParam {
                    index,
                    bound: index < arity,
                    name: param.name().unwrap_or_default(),
                    destination: param
                        .destination()
                        .ok_or_else(|| missing(&name, &id, &format!("destination for parameter {index}")))?,
                    serializer: param
                        .serializer()
                        .ok_or_else(|| missing(&name, &id, &format!("serializer for parameter {index}")))?,
                    injector: param
                        .injector()
                        .ok_or_else(|| missing(&name, &id, &format!("injector for parameter {index}")))?,
                    default_value: param.default_value(),
                    ignore_empty: param.ignore_empty().unwrap_or(false),
                })
            })
            .collect::<Result<Vec<_>, ProxyError>>()?;

        let global_interceptor = ChainedInterceptor::compose(
            interface.interceptor().into_iter().chain(factory_interceptor).collect(),
        );

        Ok(Self {
            server: interface.server().ok_or_else(|| missing(&name, &id, "server"))?,
            interface_path: interface.path().unwrap_or_default(),
            path: method.path().unwrap_or_default(),
            http_method: method.http_method().ok_or_else(|| missing(&name, &id, "http method"))?,
            encoding: interface.encoding().ok_or_else(|| missing(&name, &id, "encoding"))?,
            socket_timeout: method.socket_timeout().ok_or_else(|| missing(&name, &id, "socket timeout"))?,
            connection_timeout: method
                .connection_timeout()
                .ok_or_else(|| missing(&name, &id, "connection timeout"))?,
            interceptor: method.interceptor(),
            response_handler: method.response_handler().ok_or_else(|| missing(&name, &id, "response handler"))?,
            error_handler: method.error_handler().ok_or_else(|| missing(&name, &id, "error handler"))?,
            global_interceptor,
            params,
            returns,
            id,
        })
    }

    /// Server, interface path and method path joined with single slashes.
    pub fn full_path(&self) -> String {
        join_path(&[&self.server, &self.interface_path, &self.path])
    }
}

pub(crate) fn join_path(segments: &[&str]) -> String {
    let mut joined = String::new();
    for segment in segments.iter().filter(|s| !s.is_empty()) {
        if joined.is_empty() {
            joined.push_str(segment);
            continue;
        }
        match (joined.ends_with('/'), segment.starts_with('/')) {
            (true, true) => joined.push_str(&segment[1..]),
            (false, false) => {
                joined.push('/');
                joined.push_str(segment);
            }
            _ => joined.push_str(segment),
        }
    }
    joined
}
