//! Proxy construction and invocation.
//!
//! # Design
//! `ProxyFactory` is the global configuration surface. `build` asks the
//! configured `InterfaceConfigFactory` for the interface's configuration,
//! validates it, optionally layers an override template on top, and freezes
//! a method registry keyed by `MethodId`. A `Proxy` is cheap to clone and
//! safe to share; each call resolves its method from the live configuration
//! view, builds the request, and dispatches it on the caller's thread.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::debug;

use crate::config::builder::{InterfaceConfigBuilder, SharedContext};
use crate::config::factory::{validate, InterfaceConfigFactory};
use crate::config::{
    override_config, shared, DefaultsOverrides, Destination, ErrorPolicy, InterfaceConfig, Layered, MethodConfig,
    ResolvedMethod,
};
use crate::context::RequestContext;
use crate::dispatch::dispatch;
use crate::error::ProxyError;
use crate::extension::{
    ChainedInterceptor, Deserializer, JsonDeserializer, RequestInterceptor, Serializer, SerializerRegistry,
};
use crate::oauth::{OAuthCredentials, OAuthSigner};
use crate::request::{build_request, Built, RequestDefaults, StaticParam};
use crate::returns::{ReturnValue, Returned};
use crate::transport::{Transport, TransportLimits, UreqTransport};
use crate::types::{InterfaceDescriptor, MethodId, ReturnType};

/// A described interface whose implementation delegates to a `Proxy`.
///
/// Usually generated with `rest_interface!`.
pub trait RestInterface: Sized {
    fn descriptor() -> InterfaceDescriptor;

    fn from_proxy(proxy: Proxy) -> Self;
}

/// Expected response representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Raw,
    Json,
    Xml,
}

impl ResponseFormat {
    /// Implicit `Accept` header value.
    pub fn accept(self) -> Option<&'static str> {
        match self {
            ResponseFormat::Raw => None,
            ResponseFormat::Json => Some("application/json"),
            ResponseFormat::Xml => Some("application/xml"),
        }
    }
}

struct MethodEntry {
    returns: ReturnType,
    config: Layered<MethodConfig>,
}

struct ProxyInner {
    interface: Layered<InterfaceConfig>,
    methods: BTreeMap<MethodId, MethodEntry>,
    transport: Arc<dyn Transport>,
    request_defaults: RequestDefaults,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    deserializer: Option<Arc<dyn Deserializer>>,
    properties: Arc<BTreeMap<String, String>>,
}

/// Callable implementation of one described interface.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub fn interface(&self) -> String {
        self.inner.interface.interface()
    }

    /// The live configuration view this proxy resolves calls against.
    pub fn config(&self) -> &Layered<InterfaceConfig> {
        &self.inner.interface
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &MethodId> {
        self.inner.methods.keys()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.inner.properties.get(key).map(String::as_str)
    }

    /// Run one call. Panics raised by extension points surface as `ProxyError::Panicked`.
    pub fn invoke(&self, id: &MethodId, args: Vec<Value>) -> Result<Returned, ProxyError> {
        catch_unwind(AssertUnwindSafe(|| self.invoke_unguarded(id, args)))
            .unwrap_or_else(|panic| Err(ProxyError::Panicked(panic_message(panic.as_ref()))))
    }

    /// Run one call and convert its result. `Ok(None)` is the null result.
    pub fn call<R: ReturnValue>(&self, id: &MethodId, args: Vec<Value>) -> Result<Option<R>, ProxyError> {
        R::from_returned(self.invoke(id, args)?)
    }

    fn invoke_unguarded(&self, id: &MethodId, args: Vec<Value>) -> Result<Returned, ProxyError> {
        let inner = &self.inner;
        let entry = inner
            .methods
            .get(id)
            .ok_or_else(|| ProxyError::InvalidRequest(format!("{} has no method {id}", self.interface())))?;
        if args.len() != id.arity() {
            return Err(ProxyError::InvalidRequest(format!(
                "{id} takes {} arguments, got {}",
                id.arity(),
                args.len()
            )));
        }

        let method = ResolvedMethod::resolve(
            &inner.interface,
            &entry.config,
            entry.returns,
            inner.interceptor.clone(),
        )?;
        let ctx = RequestContext::new(method, args, Arc::clone(&inner.properties));
        match build_request(&ctx, &inner.request_defaults)? {
            Built::Cancelled => Ok(Returned::Cancelled),
            Built::Ready(request) => dispatch(&ctx, &request, inner.transport.as_ref(), inner.deserializer.clone()),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("interface", &self.interface())
            .field("methods", &self.inner.methods.keys().map(ToString::to_string).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "extension point panicked".to_string()
}

/// Builder-style global configuration; produces proxies.
pub struct ProxyFactory {
    transport: Option<Arc<dyn Transport>>,
    default_transport: OnceLock<Arc<dyn Transport>>,
    limits: TransportLimits,
    response_format: ResponseFormat,
    serializers: SerializerRegistry,
    static_params: Vec<StaticParam>,
    oauth: Option<OAuthCredentials>,
    defaults: DefaultsOverrides,
    properties: BTreeMap<String, String>,
    deserializer: Option<Arc<dyn Deserializer>>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    config_factory: Option<Arc<dyn InterfaceConfigFactory>>,
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            transport: None,
            default_transport: OnceLock::new(),
            limits: TransportLimits::default(),
            response_format: ResponseFormat::default(),
            serializers: SerializerRegistry::default(),
            static_params: Vec::new(),
            oauth: None,
            defaults: DefaultsOverrides::default(),
            properties: BTreeMap::new(),
            deserializer: None,
            interceptors: Vec::new(),
            config_factory: None,
        }
    }

    /// Use `transport` instead of the pooled `ureq` default.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn max_total_connections(mut self, max: usize) -> Self {
        self.limits.max_total_connections = max;
        self.default_transport = OnceLock::new();
        self
    }

    pub fn max_connections_per_route(mut self, max: usize) -> Self {
        self.limits.max_connections_per_route = max;
        self.default_transport = OnceLock::new();
        self
    }

    pub fn gzip(mut self, enabled: bool) -> Self {
        self.limits.gzip = enabled;
        self.default_transport = OnceLock::new();
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Serializer for every parameter declared with type `type_name`.
    pub fn serializer(mut self, type_name: &str, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.register(type_name, serializer);
        self
    }

    pub fn serializer_for<T: ?Sized>(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers.register_for::<T>(serializer);
        self
    }

    pub fn static_param(mut self, destination: Destination, name: &str, value: &str) -> Self {
        self.static_params.push(StaticParam::new(destination, name, value));
        self
    }

    pub fn oauth(mut self, credentials: OAuthCredentials) -> Self {
        self.oauth = Some(credentials);
        self
    }

    pub fn defaults(mut self, defaults: DefaultsOverrides) -> Self {
        self.defaults = defaults;
        self
    }

    /// Shortcut for the `server` defaults override.
    pub fn server(mut self, server: &str) -> Self {
        self.defaults.server = Some(server.to_string());
        self
    }

    /// `{name}` in server and path strings becomes `value` at configuration-build time.
    pub fn token(mut self, name: &str, value: &str) -> Self {
        self.defaults.tokens.insert(name.to_string(), value.to_string());
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.defaults.error_policy = Some(policy);
        self
    }

    /// Custom property visible to extension points through the request context.
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    /// Marshaller for decoded return types; overrides the response format's default.
    pub fn deserializer(mut self, deserializer: Arc<dyn Deserializer>) -> Self {
        self.deserializer = Some(deserializer);
        self
    }

    /// Interceptor run around every method of every proxy, after the interface's own.
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn config_factory(mut self, factory: Arc<dyn InterfaceConfigFactory>) -> Self {
        self.config_factory = Some(factory);
        self
    }

    pub fn build<I: RestInterface>(&self) -> Result<I, ProxyError> {
        self.build_proxy(&I::descriptor()).map(I::from_proxy)
    }

    /// Like `build`, with `template` layered over the produced configuration.
    pub fn build_with_template<I: RestInterface>(&self, template: &Layered<InterfaceConfig>) -> Result<I, ProxyError> {
        self.build_proxy_with(&I::descriptor(), Some(template)).map(I::from_proxy)
    }

    pub fn build_proxy(&self, descriptor: &InterfaceDescriptor) -> Result<Proxy, ProxyError> {
        self.build_proxy_with(descriptor, None)
    }

    pub fn build_proxy_with(
        &self,
        descriptor: &InterfaceDescriptor,
        template: Option<&Layered<InterfaceConfig>>,
    ) -> Result<Proxy, ProxyError> {
        catch_unwind(AssertUnwindSafe(|| self.assemble(descriptor, template)))
            .unwrap_or_else(|panic| Err(ProxyError::Panicked(panic_message(panic.as_ref()))))
    }

    /// The context handed to configuration factories.
    pub fn shared_context(&self) -> SharedContext {
        SharedContext {
            defaults: Arc::new(self.defaults.clone()),
            serializers: Arc::new(self.serializers.clone()),
            properties: Arc::new(self.properties.clone()),
        }
    }

    fn assemble(
        &self,
        descriptor: &InterfaceDescriptor,
        template: Option<&Layered<InterfaceConfig>>,
    ) -> Result<Proxy, ProxyError> {
        let context = self.shared_context();
        let config = match &self.config_factory {
            Some(factory) => factory.new_config(descriptor, &context)?,
            None => InterfaceConfigBuilder::for_descriptor(descriptor, context.clone()).build(true)?,
        };
        validate(descriptor, &config)?;
        let interface = override_config(&Layered::new(shared(config)), template);

        let interceptor = ChainedInterceptor::compose(
            self.interceptors
                .iter()
                .cloned()
                .chain(
                    self.oauth
                        .clone()
                        .map(|credentials| Arc::new(OAuthSigner::new(credentials)) as Arc<dyn RequestInterceptor>),
                )
                .collect(),
        );

        let mut methods = BTreeMap::new();
        for method in &descriptor.methods {
            let config = interface.method(&method.id).ok_or_else(|| {
                ProxyError::config(format!("{}.{}", descriptor.name, method.id), "method has no configuration")
            })?;
            // Fail now rather than on first call.
            ResolvedMethod::resolve(&interface, &config, method.returns, None)?;
            methods.insert(
                method.id.clone(),
                MethodEntry {
                    returns: method.returns,
                    config,
                },
            );
        }

        debug!(
            target: "restproxy::config",
            interface = %descriptor.name,
            methods = methods.len(),
            overridden = template.is_some(),
            "proxy built"
        );
        Ok(Proxy {
            inner: Arc::new(ProxyInner {
                interface,
                methods,
                transport: self.effective_transport(),
                request_defaults: RequestDefaults {
                    static_params: self.static_params.clone(),
                    accept: self.response_format.accept().map(str::to_string),
                },
                interceptor,
                deserializer: self.effective_deserializer(),
                properties: context.properties,
            }),
        })
    }

    fn effective_transport(&self) -> Arc<dyn Transport> {
        if let Some(transport) = &self.transport {
            return Arc::clone(transport);
        }
        let limits = self.limits;
        Arc::clone(
            self.default_transport
                .get_or_init(|| Arc::new(UreqTransport::new(limits)) as Arc<dyn Transport>),
        )
    }

    fn effective_deserializer(&self) -> Option<Arc<dyn Deserializer>> {
        match (&self.deserializer, self.response_format) {
            (Some(deserializer), _) => Some(Arc::clone(deserializer)),
            (None, ResponseFormat::Json) => Some(Arc::new(JsonDeserializer)),
            (None, _) => None,
        }
    }
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("limits", &self.limits)
            .field("response_format", &self.response_format)
            .field("serializers", &self.serializers)
            .field("static_params", &self.static_params)
            .field("oauth", &self.oauth)
            .field("defaults", &self.defaults)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::factory::BuilderConfigFactory;
    use crate::config::write;
    use crate::context::ParamContext;
    use crate::extension::{Flow, RequestInjector};
    use crate::http::HttpRequestBuilder;
    use crate::response::HttpResponse;
    use crate::returns::Decoded;
    use crate::testing::{calls, RecordingInterceptor, RecordingTransport};
    use crate::types::MethodDescriptor;

    fn get_item() -> MethodId {
        MethodId::new("get_item", &["u64", "&str"])
    }

    fn descriptor() -> InterfaceDescriptor {
        InterfaceDescriptor::new("ItemsApi")
            .method(MethodDescriptor::new("get_item", &["u64", "&str"], ReturnType::of::<String>()))
            .method(MethodDescriptor::new("detail", &["u64"], ReturnType::of::<Decoded<Value>>()))
    }

    fn items_factory() -> Arc<dyn InterfaceConfigFactory> {
        Arc::new(BuilderConfigFactory::new(|_, builder| {
            builder.method(&get_item()).path("/items/{id}");
            let method = builder.method(&get_item());
            if let Some(param) = method.param(0) {
                param.name("id").destination(Destination::Path);
            }
            if let Some(param) = method.param(1) {
                param.name("q");
            }
            builder
                .method(&MethodId::new("detail", &["u64"]))
                .path("/items/{0}/detail");
            Ok(())
        }))
    }

    fn factory(transport: Arc<RecordingTransport>) -> ProxyFactory {
        ProxyFactory::new()
            .server("http://items.local")
            .transport(transport)
            .config_factory(items_factory())
    }

    #[test]
    fn call_builds_sends_and_converts() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let proxy = factory(Arc::clone(&transport)).build_proxy(&descriptor()).unwrap();
        let result: Option<String> = proxy.call(&get_item(), vec![json!(42), json!("x")]).unwrap();
        assert_eq!(result.as_deref(), Some("ok"));
        assert_eq!(transport.last_uri().as_deref(), Some("http://items.local/items/42?q=x"));
    }

    #[test]
    fn not_found_is_an_http_error() {
        let transport = Arc::new(RecordingTransport::replying(404, "gone"));
        let proxy = factory(transport).build_proxy(&descriptor()).unwrap();
        let err = proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn zero_policy_returns_none() {
        let transport = Arc::new(RecordingTransport::replying(500, "boom"));
        let proxy = factory(transport)
            .error_policy(ErrorPolicy::ZeroValue)
            .build_proxy(&descriptor())
            .unwrap();
        assert_eq!(proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap(), None);
    }

    #[test]
    fn cancellation_returns_none_without_sending() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let log = calls();
        let proxy = factory(Arc::clone(&transport))
            .interceptor(Arc::new(RecordingInterceptor::new("global", Arc::clone(&log)).cancelling_before()))
            .build_proxy(&descriptor())
            .unwrap();
        assert_eq!(proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap(), None);
        assert_eq!(transport.sent(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["global:before"]);
    }

    #[test]
    fn json_format_sets_accept_and_decodes() {
        let transport = Arc::new(RecordingTransport::new(|_| {
            Ok(HttpResponse::from_bytes(
                200,
                vec![("Content-Type".to_string(), "application/json".to_string())],
                r#"{"id": 7}"#,
            ))
        }));
        let proxy = factory(Arc::clone(&transport))
            .response_format(ResponseFormat::Json)
            .build_proxy(&descriptor())
            .unwrap();
        let detail: Decoded<Value> = proxy
            .call(&MethodId::new("detail", &["u64"]), vec![json!(7)])
            .unwrap()
            .unwrap();
        assert_eq!(detail.0, json!({"id": 7}));
        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent[0].uri(), "http://items.local/items/7/detail");
        assert_eq!(sent[0].header("accept"), Some("application/json"));
    }

    #[test]
    fn missing_server_fails_the_build() {
        let err = ProxyFactory::new()
            .transport(Arc::new(RecordingTransport::replying(200, "")))
            .build_proxy(&descriptor())
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn template_overrides_are_live() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let template = shared(InterfaceConfig::template("ItemsApi"));
        let proxy = factory(Arc::clone(&transport))
            .build_proxy_with(&descriptor(), Some(&Layered::new(Arc::clone(&template))))
            .unwrap();

        proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap();
        assert_eq!(transport.last_uri().as_deref(), Some("http://items.local/items/1?q=x"));

        write(&template).server = Some("http://staging.local".to_string());
        proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap();
        assert_eq!(transport.last_uri().as_deref(), Some("http://staging.local/items/1?q=x"));
    }

    #[test]
    fn wrong_arity_is_rejected_before_sending() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let proxy = factory(Arc::clone(&transport)).build_proxy(&descriptor()).unwrap();
        let err = proxy.call::<String>(&get_item(), vec![json!(1)]).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
        assert!(proxy.call::<String>(&MethodId::new("nope", &[]), Vec::new()).is_err());
        assert_eq!(transport.sent(), 0);
    }

    struct Exploding;

    impl RequestInjector for Exploding {
        fn inject(&self, _param: &ParamContext<'_>, _builder: &mut HttpRequestBuilder) -> Result<(), ProxyError> {
            panic!("injector bug");
        }
    }

    #[test]
    fn extension_panics_are_contained() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let factory = ProxyFactory::new()
            .server("http://items.local")
            .transport(transport)
            .config_factory(Arc::new(BuilderConfigFactory::new(|_, builder| {
                builder
                    .method(&get_item())
                    .params_injector(Some(Arc::new(Exploding)));
                Ok(())
            })));
        let proxy = factory.build_proxy(&descriptor()).unwrap();
        let err = proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap_err();
        assert!(matches!(err, ProxyError::Panicked(ref message) if message == "injector bug"));
    }

    #[test]
    fn static_params_oauth_and_properties_reach_the_request() {
        struct SeesProperty(Arc<AtomicUsize>);

        impl RequestInterceptor for SeesProperty {
            fn before_params(
                &self,
                ctx: &RequestContext,
                _builder: &mut HttpRequestBuilder,
            ) -> Result<Flow, ProxyError> {
                if ctx.property("tenant") == Some("acme") {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Flow::Proceed)
            }
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let proxy = factory(Arc::clone(&transport))
            .static_param(Destination::Header, "X-Client", "restproxy")
            .static_param(Destination::Query, "v", "2")
            .oauth(OAuthCredentials::new("ck", "cs", "at", "ts"))
            .property("tenant", "acme")
            .interceptor(Arc::new(SeesProperty(Arc::clone(&seen))))
            .build_proxy(&descriptor())
            .unwrap();
        proxy.call::<String>(&get_item(), vec![json!(5), json!("x")]).unwrap();

        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent[0].uri(), "http://items.local/items/5?v=2&q=x");
        assert_eq!(sent[0].header("X-Client"), Some("restproxy"));
        assert!(sent[0].header("Authorization").unwrap().starts_with("OAuth "));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.property("tenant"), Some("acme"));
    }

    #[test]
    fn tokens_resolve_in_the_server() {
        let transport = Arc::new(RecordingTransport::replying(200, "ok"));
        let proxy = ProxyFactory::new()
            .server("http://{host}")
            .token("host", "tokens.local")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .config_factory(items_factory())
            .build_proxy(&descriptor())
            .unwrap();
        proxy.call::<String>(&get_item(), vec![json!(1), json!("x")]).unwrap();
        assert_eq!(transport.last_uri().as_deref(), Some("http://tokens.local/items/1?q=x"));
    }
}
