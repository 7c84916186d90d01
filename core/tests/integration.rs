//! End-to-end runs against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port, builds an
//! `ItemsApi` proxy over the default `ureq` transport and drives it
//! synchronously. Items are seeded with id 42; created items count up from 43.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mock_server::{Echo, Item, GZIP_PAYLOAD};
use restproxy_core::{
    rest_interface, BodyReader, BuilderConfigFactory, Decoded, DefaultResponseHandler, Destination, ErrorPolicy,
    Flow, HttpMethod, HttpRequestBuilder, InterfaceConfig, InterfaceConfigBuilder, InterfaceDescriptor,
    JsonDeserializer, Layered, OAuthCredentials, ProxyError, ProxyFactory, RequestContext, RequestInterceptor,
    ResponseHandler, TokenPlacement,
};
use restproxy_core::config::{shared, write, MethodConfigBuilder};

rest_interface! {
    pub struct ItemsApi {
        fn lookup(id: u64, q: &str) -> String;
        fn detail(id: u64) -> Decoded<Item>;
        fn create(name: &str) -> Decoded<Item>;
        fn rename(id: u64, body: &str) -> Decoded<Item>;
        fn remove(id: u64) -> ();
        fn echo(tag: &str) -> Decoded<Echo>;
        fn compressed() -> String;
        fn lines() -> BodyReader;
        fn slow(ms: u64) -> String;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the mock server on a random port and return its base URL.
fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn method<'b>(builder: &'b mut InterfaceConfigBuilder, name: &str) -> Result<&'b mut MethodConfigBuilder, ProxyError> {
    builder
        .method_named(name)
        .ok_or_else(|| ProxyError::config(name, "not declared"))
}

fn param(method: &mut MethodConfigBuilder, index: usize, name: &str, destination: Destination) {
    if let Some(param) = method.param(index) {
        param.name(name).destination(destination);
    }
}

fn configure(_: &InterfaceDescriptor, builder: &mut InterfaceConfigBuilder) -> Result<(), ProxyError> {
    let json: Arc<dyn ResponseHandler> =
        Arc::new(DefaultResponseHandler::with_deserializer(Arc::new(JsonDeserializer)));

    let lookup = method(builder, "lookup")?.path("/items/{id}");
    param(lookup, 0, "id", Destination::Path);
    param(lookup, 1, "q", Destination::Query);

    let detail = method(builder, "detail")?
        .path("/items/{id}/detail")
        .response_handler(Some(Arc::clone(&json)));
    param(detail, 0, "id", Destination::Path);

    let create = method(builder, "create")?
        .path("/items")
        .http_method(HttpMethod::Post)
        .response_handler(Some(Arc::clone(&json)));
    param(create, 0, "name", Destination::Form);

    let rename = method(builder, "rename")?
        .path("/items/{id}")
        .http_method(HttpMethod::Put)
        .response_handler(Some(Arc::clone(&json)));
    param(rename, 0, "id", Destination::Path);
    param(rename, 1, "", Destination::Body);
    rename
        .add_static_param()
        .name("Content-Type")
        .destination(Destination::Header)
        .default_value("application/json");

    let remove = method(builder, "remove")?.path("/items/{id}").http_method(HttpMethod::Delete);
    param(remove, 0, "id", Destination::Path);

    let echo = method(builder, "echo")?.path("/echo").response_handler(Some(json));
    param(echo, 0, "X-Tag", Destination::Header);

    method(builder, "compressed")?.path("/gzip");
    method(builder, "lines")?.path("/lines");

    let slow = method(builder, "slow")?
        .path("/slow")
        .socket_timeout(Duration::from_millis(100));
    param(slow, 0, "ms", Destination::Query);
    Ok(())
}

fn factory(server: &str) -> ProxyFactory {
    init_tracing();
    ProxyFactory::new()
        .server(server)
        .config_factory(Arc::new(BuilderConfigFactory::new(configure)))
}

#[test]
fn lookup_binds_path_and_query() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    assert_eq!(api.lookup(42, "x").unwrap().as_deref(), Some("ok"));
}

#[test]
fn missing_item_reaches_the_error_handler() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    match api.lookup(7, "x").unwrap_err() {
        ProxyError::Http(failure) => {
            assert_eq!(failure.status, 404);
            assert_eq!(failure.body_preview, "no such item");
        }
        other => panic!("expected an HTTP failure, got {other:?}"),
    }
}

#[test]
fn zero_policy_turns_failures_into_none() {
    let api: ItemsApi = factory(&start_server())
        .error_policy(ErrorPolicy::ZeroValue)
        .build()
        .unwrap();
    assert_eq!(api.lookup(7, "x").unwrap(), None);
    assert_eq!(api.lookup(42, "x").unwrap().as_deref(), Some("ok"));
}

#[test]
fn item_lifecycle() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();

    // 201 is not success, although the item is created.
    let err = api.create("lamp").unwrap_err();
    assert_eq!(err.status(), Some(201));
    assert_eq!(api.lookup(43, "x").unwrap().as_deref(), Some("ok"));

    let renamed = api.rename(43, r#"{"name":"desk"}"#).unwrap().unwrap();
    assert_eq!(renamed.0, Item { id: 43, name: "desk".to_string() });
    let fetched = api.detail(43).unwrap().unwrap();
    assert_eq!(fetched.0, renamed.0);

    assert_eq!(api.remove(43).unwrap(), Some(()));
    assert_eq!(api.lookup(43, "x").unwrap_err().status(), Some(404));
}

#[test]
fn static_params_and_oauth_reach_the_server() {
    let api: ItemsApi = factory(&start_server())
        .static_param(Destination::Header, "X-Client", "restproxy")
        .static_param(Destination::Query, "v", "2")
        .oauth(OAuthCredentials::new("ck", "cs", "at", "ts"))
        .build()
        .unwrap();
    let echo = api.echo("t1").unwrap().unwrap().into_inner();
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.query.as_deref(), Some("v=2"));
    assert_eq!(echo.headers["x-tag"], "t1");
    assert_eq!(echo.headers["x-client"], "restproxy");
    assert!(echo.headers["authorization"].starts_with("OAuth oauth_consumer_key=\"ck\", oauth_token=\"at\""));
}

#[test]
fn oauth_in_the_url() {
    let api: ItemsApi = factory(&start_server())
        .oauth(OAuthCredentials::new("ck", "cs", "at", "ts").placed_in(TokenPlacement::Url))
        .build()
        .unwrap();
    let echo = api.echo("t2").unwrap().unwrap().into_inner();
    let query = echo.query.unwrap_or_default();
    assert!(query.contains("oauth_token=at"));
    assert!(query.contains("oauth_signature_method=PLAINTEXT"));
    assert!(!echo.headers.contains_key("authorization"));
}

#[test]
fn gzip_bodies_are_decoded() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    assert_eq!(api.compressed().unwrap().as_deref(), Some(GZIP_PAYLOAD));
}

#[test]
fn reader_returns_stream_the_body() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    let reader = api.lines().unwrap().unwrap();
    let lines: Vec<String> = reader.lines().map(|line| line.unwrap()).collect();
    assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
}

struct CancelCreates;

impl RequestInterceptor for CancelCreates {
    fn before_params(&self, ctx: &RequestContext, _builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        Ok(if ctx.method_id().name() == "create" { Flow::Cancel } else { Flow::Proceed })
    }
}

#[test]
fn cancelled_calls_never_reach_the_server() {
    let api: ItemsApi = factory(&start_server())
        .interceptor(Arc::new(CancelCreates))
        .build()
        .unwrap();
    assert!(api.create("lamp").unwrap().is_none());
    assert_eq!(api.detail(43).unwrap_err().status(), Some(404));
}

#[test]
fn socket_timeout_is_a_transport_error() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    assert!(matches!(api.slow(2_000), Err(ProxyError::Transport { .. })));
    assert_eq!(api.slow(0).unwrap().as_deref(), Some("late"));
}

#[test]
fn connection_limits_queue_concurrent_calls() {
    let api: ItemsApi = factory(&start_server())
        .max_total_connections(1)
        .max_connections_per_route(1)
        .build()
        .unwrap();
    let started = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let api = api.clone();
            std::thread::spawn(move || api.slow(60))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("late"));
    }
    assert!(started.elapsed() >= Duration::from_millis(240));
}

#[test]
fn override_template_redirects_live() {
    let template = shared(InterfaceConfig::template("ItemsApi"));
    let api: ItemsApi = factory(&start_server())
        .build_with_template(&Layered::new(Arc::clone(&template)))
        .unwrap();
    assert_eq!(api.lookup(42, "x").unwrap().as_deref(), Some("ok"));

    write(&template).server = Some("http://127.0.0.1:1".to_string());
    assert!(matches!(api.lookup(42, "x"), Err(ProxyError::Transport { .. })));

    write(&template).server = None;
    assert_eq!(api.lookup(42, "x").unwrap().as_deref(), Some("ok"));
}

#[test]
fn one_proxy_serves_many_threads() {
    let api: ItemsApi = factory(&start_server()).build().unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let api = api.clone();
            std::thread::spawn(move || api.lookup(42, "x"))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("ok"));
    }
}
