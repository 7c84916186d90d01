//! Three-level configuration model: interface, method, parameter.
//!
//! # Design
//! Every field is optional so the same types describe both resolved
//! configurations and override templates. Nested levels are held in
//! `Shared` cells: an override view (`Layered`) reads through them on every
//! access, so later changes to either side are visible without re-composing.
//! Configuration is only written while it is being built; request handling
//! reads it.

pub mod builder;
pub mod defaults;
pub mod factory;
pub mod layered;
pub mod resolved;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extension::{ErrorHandler, RequestInjector, RequestInterceptor, ResponseHandler, Serializer};
use crate::http::HttpMethod;
use crate::types::MethodId;

pub use builder::{InterfaceConfigBuilder, MethodConfigBuilder, ParamConfigBuilder, SharedContext};
pub use defaults::DefaultsOverrides;
pub use factory::{validate, BuilderConfigFactory, InterfaceConfigFactory};
pub use layered::{override_config, Layered};
pub use resolved::{ResolvedMethod, ResolvedParam};

/// Shared, mutable configuration cell.
pub type Shared<T> = Arc<RwLock<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

/// Read a configuration cell, recovering from a poisoned lock.
pub(crate) fn read<T>(cell: &Shared<T>) -> RwLockReadGuard<'_, T> {
    cell.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write a configuration cell, recovering from a poisoned lock.
pub fn write<T>(cell: &Shared<T>) -> RwLockWriteGuard<'_, T> {
    cell.write().unwrap_or_else(PoisonError::into_inner)
}

/// Where a parameter's value is placed in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Query,
    Path,
    Form,
    Header,
    Body,
}

impl Destination {
    /// Query and path parameters always end up in the URL.
    pub fn is_url_class(self) -> bool {
        matches!(self, Destination::Query | Destination::Path)
    }
}

/// Built-in error handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Propagate the failure to the caller.
    Rethrow,
    /// Swallow the failure and return the zero value.
    ZeroValue,
}

/// One parameter's handling rule.
#[derive(Clone, Default)]
pub struct ParamConfig {
    /// Empty means "merge the value directly" into its destination.
    pub name: Option<String>,
    pub destination: Option<Destination>,
    pub serializer: Option<Arc<dyn Serializer>>,
    pub injector: Option<Arc<dyn RequestInjector>>,
    pub default_value: Option<String>,
    pub ignore_empty: Option<bool>,
}

/// One interface method's handling rule.
#[derive(Clone)]
pub struct MethodConfig {
    pub method: MethodId,
    pub path: Option<String>,
    pub http_method: Option<HttpMethod>,
    pub socket_timeout: Option<Duration>,
    pub connection_timeout: Option<Duration>,
    pub interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub response_handler: Option<Arc<dyn ResponseHandler>>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
    /// One entry per declared parameter, followed by static parameters.
    pub params: Vec<Shared<ParamConfig>>,
}

impl MethodConfig {
    /// An all-empty configuration with one empty parameter per declared argument.
    pub fn template(method: MethodId) -> Self {
        let params = (0..method.arity()).map(|_| shared(ParamConfig::default())).collect();
        Self {
            method,
            path: None,
            http_method: None,
            socket_timeout: None,
            connection_timeout: None,
            interceptor: None,
            response_handler: None,
            error_handler: None,
            params,
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// One described interface's complete handling rule.
#[derive(Clone)]
pub struct InterfaceConfig {
    pub interface: String,
    pub server: Option<String>,
    pub path: Option<String>,
    pub encoding: Option<String>,
    /// Fires around every method-level interceptor.
    pub interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub methods: BTreeMap<MethodId, Shared<MethodConfig>>,
}

impl InterfaceConfig {
    pub fn template(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            server: None,
            path: None,
            encoding: None,
            interceptor: None,
            methods: BTreeMap::new(),
        }
    }

    pub fn method(&self, id: &MethodId) -> Option<&Shared<MethodConfig>> {
        self.methods.get(id)
    }
}

impl fmt::Debug for ParamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamConfig")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("serializer", &self.serializer.is_some())
            .field("injector", &self.injector.is_some())
            .field("default_value", &self.default_value)
            .field("ignore_empty", &self.ignore_empty)
            .finish()
    }
}

impl fmt::Debug for MethodConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodConfig")
            .field("method", &self.method.to_string())
            .field("path", &self.path)
            .field("http_method", &self.http_method)
            .field("socket_timeout", &self.socket_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("interceptor", &self.interceptor.is_some())
            .field("response_handler", &self.response_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("params", &self.params.len())
            .finish()
    }
}

impl fmt::Debug for InterfaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceConfig")
            .field("interface", &self.interface)
            .field("server", &self.server)
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .field("interceptor", &self.interceptor.is_some())
            .field("methods", &self.methods.keys().map(ToString::to_string).collect::<Vec<_>>())
            .finish()
    }
}
