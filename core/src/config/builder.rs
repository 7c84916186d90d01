//! Mutable builders that freeze into configuration.
//!
//! # Design
//! Each field is a `Slot`: unset, inherited from a methods-level or
//! params-level default, or explicitly assigned. Explicit assignments win
//! over inherited ones, so a default pushed down later never clobbers a
//! value a parser already set. In ignore-blank mode, assigning `None` or a
//! blank string is a no-op, which lets adapters probe optional sources
//! without erasing earlier values.
//!
//! `build(true)` resolves every unset field from `DefaultsOverrides` and then
//! from the constants in `defaults`; `build(false)` leaves them empty and
//! yields an override template.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{
    defaults::{DefaultsOverrides, DEFAULT_PATH},
    shared, Destination, InterfaceConfig, MethodConfig, ParamConfig,
};
use crate::error::ProxyError;
use crate::extension::{
    error_handler_for, DefaultInjector, DefaultResponseHandler, DefaultSerializer, ErrorHandler, RequestInjector,
    RequestInterceptor, ResponseHandler, Serializer, SerializerRegistry,
};
use crate::http::HttpMethod;
use crate::types::{InterfaceDescriptor, MethodId};

/// Values shared by every builder of one factory.
#[derive(Clone, Default)]
pub struct SharedContext {
    pub defaults: Arc<DefaultsOverrides>,
    pub serializers: Arc<SerializerRegistry>,
    pub properties: Arc<BTreeMap<String, String>>,
}

impl SharedContext {
    pub fn new(defaults: DefaultsOverrides) -> Self {
        Self {
            defaults: Arc::new(defaults),
            ..Self::default()
        }
    }
}

/// Whether a value counts as "absent" in ignore-blank mode.
pub trait Blank {
    fn is_blank(&self) -> bool {
        false
    }
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for HttpMethod {}
impl Blank for Duration {}
impl Blank for Destination {}
impl Blank for bool {}
impl<T: ?Sized> Blank for Arc<T> {}

#[derive(Clone)]
enum Slot<T> {
    Unset,
    Inherited(T),
    Explicit(Option<T>),
}

impl<T: Clone + Blank> Slot<T> {
    fn value(&self) -> Option<T> {
        match self {
            Slot::Unset => None,
            Slot::Inherited(value) => Some(value.clone()),
            Slot::Explicit(value) => value.clone(),
        }
    }

    fn assign(&mut self, value: Option<T>, ignore_blank: bool) {
        if ignore_blank && value.as_ref().map_or(true, Blank::is_blank) {
            return;
        }
        *self = Slot::Explicit(value);
    }

    fn inherit(&mut self, value: Option<T>) {
        if matches!(self, Slot::Explicit(_)) {
            return;
        }
        *self = value.map_or(Slot::Unset, Slot::Inherited);
    }
}

fn ignored<T: Blank>(value: &Option<T>, ignore_blank: bool) -> bool {
    ignore_blank && value.as_ref().map_or(true, Blank::is_blank)
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

pub struct ParamConfigBuilder {
    ignore_blank: bool,
    type_name: Option<String>,
    name: Slot<String>,
    destination: Slot<Destination>,
    serializer: Slot<Arc<dyn Serializer>>,
    injector: Slot<Arc<dyn RequestInjector>>,
    default_value: Slot<String>,
    ignore_empty: Slot<bool>,
}

impl ParamConfigBuilder {
    /// `type_name` is the declared parameter type, used for registry lookups.
    pub fn new(type_name: Option<&str>) -> Self {
        Self {
            ignore_blank: false,
            type_name: owned(type_name),
            name: Slot::Unset,
            destination: Slot::Unset,
            serializer: Slot::Unset,
            injector: Slot::Unset,
            default_value: Slot::Unset,
            ignore_empty: Slot::Unset,
        }
    }

    pub fn set_ignore_blank(&mut self, on: bool) -> &mut Self {
        self.ignore_blank = on;
        self
    }

    pub fn name<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.name.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn destination(&mut self, value: impl Into<Option<Destination>>) -> &mut Self {
        self.destination.assign(value.into(), self.ignore_blank);
        self
    }

    pub fn serializer(&mut self, value: Option<Arc<dyn Serializer>>) -> &mut Self {
        self.serializer.assign(value, self.ignore_blank);
        self
    }

    pub fn injector(&mut self, value: Option<Arc<dyn RequestInjector>>) -> &mut Self {
        self.injector.assign(value, self.ignore_blank);
        self
    }

    pub fn default_value<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.default_value.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn ignore_empty(&mut self, value: impl Into<Option<bool>>) -> &mut Self {
        self.ignore_empty.assign(value.into(), self.ignore_blank);
        self
    }

    fn build(&self, context: &SharedContext, use_defaults: bool) -> ParamConfig {
        if !use_defaults {
            return ParamConfig {
                name: self.name.value(),
                destination: self.destination.value(),
                serializer: self.serializer.value(),
                injector: self.injector.value(),
                default_value: self.default_value.value(),
                ignore_empty: self.ignore_empty.value(),
            };
        }
        let defaults = &context.defaults;
        let serializer = self
            .serializer
            .value()
            .or_else(|| self.type_name.as_deref().and_then(|t| context.serializers.get(t)))
            .unwrap_or_else(|| Arc::new(DefaultSerializer));
        ParamConfig {
            name: Some(self.name.value().unwrap_or_default()),
            destination: Some(self.destination.value().unwrap_or_else(|| defaults.destination())),
            serializer: Some(serializer),
            injector: Some(self.injector.value().unwrap_or_else(|| Arc::new(DefaultInjector))),
            default_value: self.default_value.value(),
            ignore_empty: Some(self.ignore_empty.value().unwrap_or_else(|| defaults.ignore_empty())),
        }
    }
}

/// Params-level defaults remembered for params added later.
#[derive(Clone, Default)]
struct ParamDefaults {
    destination: Option<Destination>,
    serializer: Option<Arc<dyn Serializer>>,
    injector: Option<Arc<dyn RequestInjector>>,
    ignore_empty: Option<bool>,
}

impl ParamDefaults {
    fn apply(&self, param: &mut ParamConfigBuilder) {
        if self.destination.is_some() {
            param.destination.inherit(self.destination);
        }
        if self.serializer.is_some() {
            param.serializer.inherit(self.serializer.clone());
        }
        if self.injector.is_some() {
            param.injector.inherit(self.injector.clone());
        }
        if self.ignore_empty.is_some() {
            param.ignore_empty.inherit(self.ignore_empty);
        }
    }
}

pub struct MethodConfigBuilder {
    ignore_blank: bool,
    method: MethodId,
    path: Slot<String>,
    http_method: Slot<HttpMethod>,
    socket_timeout: Slot<Duration>,
    connection_timeout: Slot<Duration>,
    interceptor: Slot<Arc<dyn RequestInterceptor>>,
    response_handler: Slot<Arc<dyn ResponseHandler>>,
    error_handler: Slot<Arc<dyn ErrorHandler>>,
    params: Vec<ParamConfigBuilder>,
    param_defaults: ParamDefaults,
}

impl MethodConfigBuilder {
    /// One param builder per declared parameter type.
    pub fn new(method: MethodId) -> Self {
        let params = method.params().iter().map(|t| ParamConfigBuilder::new(Some(t.as_str()))).collect();
        Self {
            ignore_blank: false,
            method,
            path: Slot::Unset,
            http_method: Slot::Unset,
            socket_timeout: Slot::Unset,
            connection_timeout: Slot::Unset,
            interceptor: Slot::Unset,
            response_handler: Slot::Unset,
            error_handler: Slot::Unset,
            params,
            param_defaults: ParamDefaults::default(),
        }
    }

    pub fn method_id(&self) -> &MethodId {
        &self.method
    }

    pub fn set_ignore_blank(&mut self, on: bool) -> &mut Self {
        self.ignore_blank = on;
        for param in &mut self.params {
            param.set_ignore_blank(on);
        }
        self
    }

    pub fn path<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.path.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn http_method(&mut self, value: impl Into<Option<HttpMethod>>) -> &mut Self {
        self.http_method.assign(value.into(), self.ignore_blank);
        self
    }

    pub fn socket_timeout(&mut self, value: impl Into<Option<Duration>>) -> &mut Self {
        self.socket_timeout.assign(value.into(), self.ignore_blank);
        self
    }

    pub fn connection_timeout(&mut self, value: impl Into<Option<Duration>>) -> &mut Self {
        self.connection_timeout.assign(value.into(), self.ignore_blank);
        self
    }

    pub fn interceptor(&mut self, value: Option<Arc<dyn RequestInterceptor>>) -> &mut Self {
        self.interceptor.assign(value, self.ignore_blank);
        self
    }

    pub fn response_handler(&mut self, value: Option<Arc<dyn ResponseHandler>>) -> &mut Self {
        self.response_handler.assign(value, self.ignore_blank);
        self
    }

    pub fn error_handler(&mut self, value: Option<Arc<dyn ErrorHandler>>) -> &mut Self {
        self.error_handler.assign(value, self.ignore_blank);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param(&mut self, index: usize) -> Option<&mut ParamConfigBuilder> {
        self.params.get_mut(index)
    }

    /// Add a parameter with no argument behind it; its value is its default value.
    pub fn add_static_param(&mut self) -> &mut ParamConfigBuilder {
        let mut param = ParamConfigBuilder::new(None);
        param.set_ignore_blank(self.ignore_blank);
        self.param_defaults.apply(&mut param);
        let index = self.params.len();
        self.params.push(param);
        &mut self.params[index]
    }

    pub fn params_destination(&mut self, value: impl Into<Option<Destination>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.param_defaults.destination = value;
            self.params.iter_mut().for_each(|p| p.destination.inherit(value));
        }
        self
    }

    pub fn params_serializer(&mut self, value: Option<Arc<dyn Serializer>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.param_defaults.serializer = value.clone();
            self.params.iter_mut().for_each(|p| p.serializer.inherit(value.clone()));
        }
        self
    }

    pub fn params_injector(&mut self, value: Option<Arc<dyn RequestInjector>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.param_defaults.injector = value.clone();
            self.params.iter_mut().for_each(|p| p.injector.inherit(value.clone()));
        }
        self
    }

    pub fn params_ignore_empty(&mut self, value: impl Into<Option<bool>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.param_defaults.ignore_empty = value;
            self.params.iter_mut().for_each(|p| p.ignore_empty.inherit(value));
        }
        self
    }

    fn build(&self, context: &SharedContext, use_defaults: bool) -> MethodConfig {
        let params = self
            .params
            .iter()
            .map(|param| shared(param.build(context, use_defaults)))
            .collect();
        if !use_defaults {
            return MethodConfig {
                method: self.method.clone(),
                path: self.path.value().map(|p| context.defaults.substitute_tokens(&p)),
                http_method: self.http_method.value(),
                socket_timeout: self.socket_timeout.value(),
                connection_timeout: self.connection_timeout.value(),
                interceptor: self.interceptor.value(),
                response_handler: self.response_handler.value(),
                error_handler: self.error_handler.value(),
                params,
            };
        }
        let defaults = &context.defaults;
        let path = self.path.value().unwrap_or_else(|| DEFAULT_PATH.to_string());
        MethodConfig {
            method: self.method.clone(),
            path: Some(defaults.substitute_tokens(&path)),
            http_method: Some(self.http_method.value().unwrap_or_else(|| defaults.http_method())),
            socket_timeout: Some(self.socket_timeout.value().unwrap_or_else(|| defaults.socket_timeout())),
            connection_timeout: Some(
                self.connection_timeout
                    .value()
                    .unwrap_or_else(|| defaults.connection_timeout()),
            ),
            interceptor: self.interceptor.value(),
            response_handler: Some(
                self.response_handler
                    .value()
                    .unwrap_or_else(|| Arc::new(DefaultResponseHandler::new())),
            ),
            error_handler: Some(
                self.error_handler
                    .value()
                    .unwrap_or_else(|| error_handler_for(defaults.error_policy())),
            ),
            params,
        }
    }
}

/// Methods-level defaults remembered for methods added later.
#[derive(Clone, Default)]
struct MethodDefaults {
    http_method: Option<HttpMethod>,
    socket_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
    response_handler: Option<Arc<dyn ResponseHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    params: ParamDefaults,
}

impl MethodDefaults {
    fn apply(&self, method: &mut MethodConfigBuilder) {
        if self.http_method.is_some() {
            method.http_method.inherit(self.http_method);
        }
        if self.socket_timeout.is_some() {
            method.socket_timeout.inherit(self.socket_timeout);
        }
        if self.connection_timeout.is_some() {
            method.connection_timeout.inherit(self.connection_timeout);
        }
        if self.response_handler.is_some() {
            method.response_handler.inherit(self.response_handler.clone());
        }
        if self.error_handler.is_some() {
            method.error_handler.inherit(self.error_handler.clone());
        }
        for param in &mut method.params {
            self.params.apply(param);
        }
        merge_param_defaults(&mut method.param_defaults, &self.params);
    }
}

fn merge_param_defaults(target: &mut ParamDefaults, source: &ParamDefaults) {
    if target.destination.is_none() {
        target.destination = source.destination;
    }
    if target.serializer.is_none() {
        target.serializer = source.serializer.clone();
    }
    if target.injector.is_none() {
        target.injector = source.injector.clone();
    }
    if target.ignore_empty.is_none() {
        target.ignore_empty = source.ignore_empty;
    }
}

pub struct InterfaceConfigBuilder {
    context: SharedContext,
    ignore_blank: bool,
    interface: String,
    server: Slot<String>,
    path: Slot<String>,
    encoding: Slot<String>,
    interceptor: Slot<Arc<dyn RequestInterceptor>>,
    methods: BTreeMap<MethodId, MethodConfigBuilder>,
    method_defaults: MethodDefaults,
}

impl InterfaceConfigBuilder {
    pub fn new(interface: &str, context: SharedContext) -> Self {
        Self {
            context,
            ignore_blank: false,
            interface: interface.to_string(),
            server: Slot::Unset,
            path: Slot::Unset,
            encoding: Slot::Unset,
            interceptor: Slot::Unset,
            methods: BTreeMap::new(),
            method_defaults: MethodDefaults::default(),
        }
    }

    /// A builder with one method sub-builder per described method.
    pub fn for_descriptor(descriptor: &InterfaceDescriptor, context: SharedContext) -> Self {
        let mut builder = Self::new(&descriptor.name, context);
        for method in &descriptor.methods {
            builder.method(&method.id);
        }
        builder
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn set_ignore_blank(&mut self, on: bool) -> &mut Self {
        self.ignore_blank = on;
        for method in self.methods.values_mut() {
            method.set_ignore_blank(on);
        }
        self
    }

    pub fn server<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.server.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn path<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.path.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn encoding<'v>(&mut self, value: impl Into<Option<&'v str>>) -> &mut Self {
        self.encoding.assign(owned(value.into()), self.ignore_blank);
        self
    }

    pub fn interceptor(&mut self, value: Option<Arc<dyn RequestInterceptor>>) -> &mut Self {
        self.interceptor.assign(value, self.ignore_blank);
        self
    }

    /// The sub-builder for `id`, created with the current methods-level defaults if new.
    pub fn method(&mut self, id: &MethodId) -> &mut MethodConfigBuilder {
        let ignore_blank = self.ignore_blank;
        let defaults = &self.method_defaults;
        self.methods.entry(id.clone()).or_insert_with(|| {
            let mut method = MethodConfigBuilder::new(id.clone());
            method.set_ignore_blank(ignore_blank);
            defaults.apply(&mut method);
            method
        })
    }

    /// First existing sub-builder whose method has this name.
    pub fn method_named(&mut self, name: &str) -> Option<&mut MethodConfigBuilder> {
        self.methods.values_mut().find(|m| m.method_id().name() == name)
    }

    pub fn method_ids(&self) -> Vec<MethodId> {
        self.methods.keys().cloned().collect()
    }

    pub fn methods_http_method(&mut self, value: impl Into<Option<HttpMethod>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.http_method = value;
            self.methods.values_mut().for_each(|m| m.http_method.inherit(value));
        }
        self
    }

    pub fn methods_socket_timeout(&mut self, value: impl Into<Option<Duration>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.socket_timeout = value;
            self.methods.values_mut().for_each(|m| m.socket_timeout.inherit(value));
        }
        self
    }

    pub fn methods_connection_timeout(&mut self, value: impl Into<Option<Duration>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.connection_timeout = value;
            self.methods.values_mut().for_each(|m| m.connection_timeout.inherit(value));
        }
        self
    }

    pub fn methods_response_handler(&mut self, value: Option<Arc<dyn ResponseHandler>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.response_handler = value.clone();
            self.methods
                .values_mut()
                .for_each(|m| m.response_handler.inherit(value.clone()));
        }
        self
    }

    pub fn methods_error_handler(&mut self, value: Option<Arc<dyn ErrorHandler>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.error_handler = value.clone();
            self.methods.values_mut().for_each(|m| m.error_handler.inherit(value.clone()));
        }
        self
    }

    /// Params-level destination pushed into every method's parameters.
    pub fn params_destination(&mut self, value: impl Into<Option<Destination>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.params.destination = value;
            self.methods.values_mut().for_each(|m| {
                m.params_destination(value);
            });
        }
        self
    }

    pub fn params_serializer(&mut self, value: Option<Arc<dyn Serializer>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.params.serializer = value.clone();
            self.methods.values_mut().for_each(|m| {
                m.params_serializer(value.clone());
            });
        }
        self
    }

    pub fn params_injector(&mut self, value: Option<Arc<dyn RequestInjector>>) -> &mut Self {
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.params.injector = value.clone();
            self.methods.values_mut().for_each(|m| {
                m.params_injector(value.clone());
            });
        }
        self
    }

    pub fn params_ignore_empty(&mut self, value: impl Into<Option<bool>>) -> &mut Self {
        let value = value.into();
        if !ignored(&value, self.ignore_blank) {
            self.method_defaults.params.ignore_empty = value;
            self.methods.values_mut().for_each(|m| {
                m.params_ignore_empty(value);
            });
        }
        self
    }

    /// Freeze. With `use_defaults`, fails when no server can be resolved.
    pub fn build(&self, use_defaults: bool) -> Result<InterfaceConfig, ProxyError> {
        let context = &self.context;
        let defaults = &context.defaults;
        let substitute = |value: String| defaults.substitute_tokens(&value);

        let config = if use_defaults {
            let server = self
                .server
                .value()
                .or_else(|| defaults.server().map(str::to_string))
                .ok_or_else(|| {
                    ProxyError::config(
                        &self.interface,
                        "no server endpoint in the builder, the defaults overrides, or a constant",
                    )
                })?;
            InterfaceConfig {
                interface: self.interface.clone(),
                server: Some(substitute(server)),
                path: Some(substitute(self.path.value().unwrap_or_else(|| defaults.path().to_string()))),
                encoding: Some(self.encoding.value().unwrap_or_else(|| defaults.encoding().to_string())),
                interceptor: self.interceptor.value(),
                methods: BTreeMap::new(),
            }
        } else {
            InterfaceConfig {
                interface: self.interface.clone(),
                server: self.server.value().map(substitute),
                path: self.path.value().map(substitute),
                encoding: self.encoding.value(),
                interceptor: self.interceptor.value(),
                methods: BTreeMap::new(),
            }
        };

        let methods = self
            .methods
            .iter()
            .map(|(id, method)| (id.clone(), shared(method.build(context, use_defaults))))
            .collect();

        debug!(
            target: "restproxy::config",
            interface = %self.interface,
            methods = self.methods.len(),
            template = !use_defaults,
            "interface configuration built"
        );
        Ok(InterfaceConfig { methods, ..config })
    }
}
