//! Request-scoped contexts handed to extension points.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::{Destination, ResolvedMethod, ResolvedParam};
use crate::error::ProxyError;
use crate::extension::Deserializer;
use crate::http::HttpMethod;
use crate::response::HttpResponse;
use crate::types::{MethodId, ReturnType};

static NULL: Value = Value::Null;

/// One invocation: the resolved method, its arguments and the proxy's properties.
pub struct RequestContext {
    invocation: Uuid,
    method: ResolvedMethod,
    args: Vec<Value>,
    properties: Arc<BTreeMap<String, String>>,
}

impl RequestContext {
    pub fn new(method: ResolvedMethod, args: Vec<Value>, properties: Arc<BTreeMap<String, String>>) -> Self {
        Self {
            invocation: Uuid::new_v4(),
            method,
            args,
            properties,
        }
    }

    /// Fresh per call; attached to every log record of the invocation.
    pub fn invocation_id(&self) -> Uuid {
        self.invocation
    }

    pub fn method(&self) -> &ResolvedMethod {
        &self.method
    }

    pub fn method_id(&self) -> &MethodId {
        &self.method.id
    }

    pub fn http_method(&self) -> HttpMethod {
        self.method.http_method
    }

    pub fn return_type(&self) -> ReturnType {
        self.method.returns
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn param(&self, index: usize) -> Option<ParamContext<'_>> {
        self.method.params.get(index).map(|param| ParamContext { request: self, param })
    }

    /// Every configured parameter in declaration order, static params last.
    pub fn params(&self) -> impl Iterator<Item = ParamContext<'_>> {
        self.method.params.iter().map(move |param| ParamContext { request: self, param })
    }

    /// Serialized form of the parameter at `index`, on demand.
    pub fn serialized(&self, index: usize) -> Result<Option<String>, ProxyError> {
        match self.param(index) {
            Some(param) => param.serialized(),
            None => Ok(None),
        }
    }
}

/// A `RequestContext` narrowed to one parameter.
#[derive(Clone, Copy)]
pub struct ParamContext<'a> {
    request: &'a RequestContext,
    param: &'a ResolvedParam,
}

impl<'a> ParamContext<'a> {
    pub fn request(&self) -> &'a RequestContext {
        self.request
    }

    pub fn param(&self) -> &'a ResolvedParam {
        self.param
    }

    pub fn index(&self) -> usize {
        self.param.index
    }

    pub fn name(&self) -> &'a str {
        &self.param.name
    }

    pub fn destination(&self) -> Destination {
        self.param.destination
    }

    /// The raw argument; `Null` for static params and missing arguments.
    pub fn value(&self) -> &'a Value {
        if !self.param.bound {
            return &NULL;
        }
        self.request.args.get(self.param.index).unwrap_or(&NULL)
    }

    /// GET requests carry every parameter in the URL.
    pub fn is_for_url(&self) -> bool {
        self.request.http_method() == HttpMethod::Get || self.param.destination.is_url_class()
    }

    /// Serializer output, falling back to the default value when absent or blank.
    pub fn serialized(&self) -> Result<Option<String>, ProxyError> {
        let value = if self.param.bound {
            self.param.serializer.serialize(self)?
        } else {
            None
        };
        match value {
            Some(value) if !value.trim().is_empty() => Ok(Some(value)),
            blank => Ok(self.param.default_value.clone().or(blank)),
        }
    }
}

/// A `RequestContext` paired with the response, if one exists.
pub struct ResponseContext<'a> {
    request: &'a RequestContext,
    response: Option<HttpResponse>,
    deserializer: Option<Arc<dyn Deserializer>>,
}

impl<'a> ResponseContext<'a> {
    pub fn new(request: &'a RequestContext, deserializer: Option<Arc<dyn Deserializer>>) -> Self {
        Self {
            request,
            response: None,
            deserializer,
        }
    }

    pub fn request(&self) -> &'a RequestContext {
        self.request
    }

    pub fn return_type(&self) -> ReturnType {
        self.request.return_type()
    }

    /// The factory-wide deserializer, if one is configured.
    pub fn deserializer(&self) -> Option<&Arc<dyn Deserializer>> {
        self.deserializer.as_ref()
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut HttpResponse> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: HttpResponse) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }

    /// Close the response body if one is held. Safe to repeat.
    pub fn close(&mut self) {
        if let Some(response) = self.response.as_mut() {
            response.close();
        }
    }
}
