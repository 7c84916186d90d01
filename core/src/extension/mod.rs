//! Extension points that participate in an invocation.
//!
//! Every strategy is `Send + Sync`: configuration is shared across threads
//! and the same instance serves concurrent invocations.

pub mod decode;
pub mod handler;
pub mod inject;
pub mod intercept;
pub mod serialize;

use std::io::Read;

use serde_json::Value;

use crate::context::{ParamContext, RequestContext, ResponseContext};
use crate::error::ProxyError;
use crate::http::HttpRequestBuilder;
use crate::returns::Returned;
use crate::types::ReturnType;

pub use decode::{BoundedDeserializer, JsonDeserializer};
pub use handler::{error_handler_for, DefaultResponseHandler, RethrowErrors, ZeroOnError};
pub use inject::DefaultInjector;
pub use intercept::ChainedInterceptor;
pub use serialize::{value_to_string, DefaultSerializer, JsonSerializer, SerializerRegistry};

/// Outcome of an interceptor hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Proceed,
    /// Stop building; the call returns no value and nothing is sent.
    Cancel,
}

impl Flow {
    pub fn is_cancel(self) -> bool {
        self == Flow::Cancel
    }
}

/// Turns one argument into its string wire form. `None` means "no value".
pub trait Serializer: Send + Sync {
    fn serialize(&self, param: &ParamContext<'_>) -> Result<Option<String>, ProxyError>;
}

/// Writes one parameter's contribution directly into the request builder.
pub trait RequestInjector: Send + Sync {
    fn inject(&self, param: &ParamContext<'_>, builder: &mut HttpRequestBuilder) -> Result<(), ProxyError>;
}

/// Observes or edits the in-progress request around parameter injection.
pub trait RequestInterceptor: Send + Sync {
    fn before_params(&self, _ctx: &RequestContext, _builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        Ok(Flow::Proceed)
    }

    fn after_params(&self, _ctx: &RequestContext, _builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        Ok(Flow::Proceed)
    }
}

/// Converts a successful response into the method's return value.
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, ctx: &mut ResponseContext<'_>) -> Result<Returned, ProxyError>;
}

/// Converts a failure into a recovered value, or returns it as the call's error.
///
/// `ctx.response()` is `None` when the failure happened before a response existed.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, ctx: &mut ResponseContext<'_>, error: ProxyError) -> Result<Returned, ProxyError>;
}

/// Decodes a response body into an untyped value for the declared return type.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, body: &mut dyn Read, target: &ReturnType) -> Result<Value, ProxyError>;
}
