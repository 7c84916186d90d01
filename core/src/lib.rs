//! Declarative REST client proxies.
//!
//! # Overview
//! An interface is described once (`rest_interface!` or a hand-built
//! `InterfaceDescriptor`) and configured through a three-level model:
//! interface, method, parameter. `ProxyFactory` turns the pair into a
//! `Proxy` whose calls become HTTP requests and whose responses become
//! return values, with pluggable serializers, injectors, interceptors,
//! response handlers and error handlers at every step.
//!
//! # Design
//! - Configuration lives in shared cells; override templates layer on top
//!   through live views (`Layered`), so edits apply to the next call.
//! - Each call runs on the caller's thread: resolve, build, intercept,
//!   dispatch, handle. Only the transport's connection pool is shared.
//! - Exactly HTTP 200 is success. Everything else, and every transport or
//!   handling failure, goes through the method's error handler.
//! - Extension-point panics are contained and surface as
//!   `ProxyError::Panicked`.

pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod http;
#[doc(hidden)]
pub mod macros;
pub mod oauth;
pub mod request;
pub mod response;
pub mod returns;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{Proxy, ProxyFactory, ResponseFormat, RestInterface};
pub use config::{
    BuilderConfigFactory, DefaultsOverrides, Destination, ErrorPolicy, InterfaceConfig, InterfaceConfigBuilder,
    InterfaceConfigFactory, Layered, MethodConfig, ParamConfig, SharedContext,
};
pub use context::{ParamContext, RequestContext, ResponseContext};
pub use error::{HttpFailure, ProxyError};
pub use extension::{
    BoundedDeserializer, ChainedInterceptor, DefaultInjector, DefaultResponseHandler, DefaultSerializer, Deserializer,
    ErrorHandler, Flow, JsonDeserializer, JsonSerializer, RequestInjector, RequestInterceptor, ResponseHandler,
    RethrowErrors, Serializer, SerializerRegistry, ZeroOnError,
};
pub use http::{HttpMethod, HttpRequest, HttpRequestBuilder};
pub use oauth::{OAuthCredentials, OAuthSigner, TokenPlacement};
pub use request::StaticParam;
pub use response::{BodyReader, HttpResponse, ResponseBody};
pub use returns::{Decoded, ReturnValue, Returned};
pub use transport::{Transport, TransportLimits, UreqTransport};
pub use types::{InterfaceDescriptor, MethodDescriptor, MethodId, ReturnKind, ReturnType};
