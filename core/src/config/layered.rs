//! Override views over configuration cells.
//!
//! # Design
//! A `Layered<T>` is a base cell plus an ordered stack of override cells,
//! top-most first. Field reads walk the stack and return the first non-null
//! value, falling back to the base. Request interceptors are the exception:
//! every non-null interceptor in the stack is chained, top-most first,
//! instead of being replaced. Nothing is copied at composition time, so the
//! view always reflects the current contents of its cells.

use std::iter;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{read, Destination, InterfaceConfig, MethodConfig, ParamConfig, Shared};
use crate::extension::{
    ChainedInterceptor, ErrorHandler, RequestInjector, RequestInterceptor, ResponseHandler, Serializer,
};
use crate::http::HttpMethod;
use crate::types::MethodId;

/// A live override view: `overrides` (top-most first) layered over `base`.
pub struct Layered<T> {
    overrides: Vec<Shared<T>>,
    base: Shared<T>,
}

impl<T> Clone for Layered<T> {
    fn clone(&self) -> Self {
        Self {
            overrides: self.overrides.clone(),
            base: Arc::clone(&self.base),
        }
    }
}

impl<T> From<Shared<T>> for Layered<T> {
    fn from(base: Shared<T>) -> Self {
        Self::new(base)
    }
}

impl<T> Layered<T> {
    pub fn new(base: Shared<T>) -> Self {
        Self {
            overrides: Vec::new(),
            base,
        }
    }

    pub fn base(&self) -> &Shared<T> {
        &self.base
    }

    /// Number of cells in the view, base included.
    pub fn depth(&self) -> usize {
        self.overrides.len() + 1
    }

    fn cells(&self) -> impl Iterator<Item = &Shared<T>> {
        self.overrides.iter().chain(iter::once(&self.base))
    }

    /// First non-null value, top-most layer first.
    pub fn pick<R>(&self, field: impl Fn(&T) -> Option<R>) -> Option<R> {
        self.cells().find_map(|cell| field(&read(cell)))
    }

    /// Every non-null value, top-most layer first.
    pub fn collect<R>(&self, field: impl Fn(&T) -> Option<R>) -> Vec<R> {
        self.cells().filter_map(|cell| field(&read(cell))).collect()
    }

    /// Nested view built from the child each layer yields; `None` if the base has none.
    fn nested<C>(&self, child: impl Fn(&T) -> Option<Shared<C>>) -> Option<Layered<C>> {
        let base = child(&read(&self.base))?;
        let overrides = self
            .overrides
            .iter()
            .filter_map(|cell| child(&read(cell)))
            .collect();
        Some(Layered { overrides, base })
    }
}

/// Compose `template` over `base`. Without a template, `base` is returned unchanged.
pub fn override_config<T>(base: &Layered<T>, template: Option<&Layered<T>>) -> Layered<T> {
    let Some(template) = template else {
        return base.clone();
    };
    let overrides = template
        .cells()
        .chain(base.overrides.iter())
        .map(Arc::clone)
        .collect();
    Layered {
        overrides,
        base: Arc::clone(&base.base),
    }
}

impl Layered<ParamConfig> {
    pub fn name(&self) -> Option<String> {
        self.pick(|p| p.name.clone())
    }

    pub fn destination(&self) -> Option<Destination> {
        self.pick(|p| p.destination)
    }

    pub fn serializer(&self) -> Option<Arc<dyn Serializer>> {
        self.pick(|p| p.serializer.clone())
    }

    pub fn injector(&self) -> Option<Arc<dyn RequestInjector>> {
        self.pick(|p| p.injector.clone())
    }

    pub fn default_value(&self) -> Option<String> {
        self.pick(|p| p.default_value.clone())
    }

    pub fn ignore_empty(&self) -> Option<bool> {
        self.pick(|p| p.ignore_empty)
    }
}

impl Layered<MethodConfig> {
    pub fn method_id(&self) -> MethodId {
        read(&self.base).method.clone()
    }

    pub fn path(&self) -> Option<String> {
        self.pick(|m| m.path.clone())
    }

    pub fn http_method(&self) -> Option<HttpMethod> {
        self.pick(|m| m.http_method)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.pick(|m| m.socket_timeout)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.pick(|m| m.connection_timeout)
    }

    /// Chained interceptor of every layer, top-most first.
    pub fn interceptor(&self) -> Option<Arc<dyn RequestInterceptor>> {
        ChainedInterceptor::compose(self.collect(|m| m.interceptor.clone()))
    }

    pub fn response_handler(&self) -> Option<Arc<dyn ResponseHandler>> {
        self.pick(|m| m.response_handler.clone())
    }

    pub fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.pick(|m| m.error_handler.clone())
    }

    /// Parameter count as declared by the base configuration.
    pub fn param_count(&self) -> usize {
        read(&self.base).params.len()
    }

    pub fn param(&self, index: usize) -> Option<Layered<ParamConfig>> {
        self.nested(|m| m.params.get(index).cloned())
    }
}

impl Layered<InterfaceConfig> {
    pub fn interface(&self) -> String {
        read(&self.base).interface.clone()
    }

    pub fn server(&self) -> Option<String> {
        self.pick(|i| i.server.clone())
    }

    pub fn path(&self) -> Option<String> {
        self.pick(|i| i.path.clone())
    }

    pub fn encoding(&self) -> Option<String> {
        self.pick(|i| i.encoding.clone())
    }

    /// Chained global interceptor of every layer, top-most first.
    pub fn interceptor(&self) -> Option<Arc<dyn RequestInterceptor>> {
        ChainedInterceptor::compose(self.collect(|i| i.interceptor.clone()))
    }

    pub fn method_ids(&self) -> Vec<MethodId> {
        read(&self.base).methods.keys().cloned().collect()
    }

    pub fn method(&self, id: &MethodId) -> Option<Layered<MethodConfig>> {
        self.nested(|i| i.methods.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{shared, write};
    use crate::extension::Flow;
    use crate::testing::{fixture_context, RecordingInterceptor};

    fn method_id() -> MethodId {
        MethodId::new("get_item", &["u64"])
    }

    fn base_interface() -> Shared<InterfaceConfig> {
        let mut method = MethodConfig::template(method_id());
        method.path = Some("/items/{id}".to_string());
        method.http_method = Some(HttpMethod::Get);
        method.socket_timeout = Some(Duration::from_secs(5));
        {
            let mut param = write(&method.params[0]);
            param.name = Some("id".to_string());
            param.destination = Some(Destination::Path);
        }
        let mut config = InterfaceConfig::template("ItemsApi");
        config.server = Some("http://base".to_string());
        config.encoding = Some("UTF-8".to_string());
        config.methods.insert(method_id(), shared(method));
        shared(config)
    }

    fn template_interface() -> Shared<InterfaceConfig> {
        let mut method = MethodConfig::template(method_id());
        method.http_method = Some(HttpMethod::Post);
        write(&method.params[0]).destination = Some(Destination::Query);
        let mut config = InterfaceConfig::template("ItemsApi");
        config.server = Some("http://override".to_string());
        config.methods.insert(method_id(), shared(method));
        shared(config)
    }

    #[test]
    fn override_wins_where_set_and_base_fills_the_rest() {
        let base = Layered::new(base_interface());
        let template = Layered::new(template_interface());
        let view = override_config(&base, Some(&template));

        assert_eq!(view.server().as_deref(), Some("http://override"));
        assert_eq!(view.encoding().as_deref(), Some("UTF-8"));

        let method = view.method(&method_id()).unwrap();
        assert_eq!(method.http_method(), Some(HttpMethod::Post));
        assert_eq!(method.path().as_deref(), Some("/items/{id}"));
        assert_eq!(method.socket_timeout(), Some(Duration::from_secs(5)));

        let param = method.param(0).unwrap();
        assert_eq!(param.destination(), Some(Destination::Query));
        assert_eq!(param.name().as_deref(), Some("id"));
    }

    #[test]
    fn missing_template_returns_base() {
        let base = Layered::new(base_interface());
        let view = override_config(&base, None);
        assert_eq!(view.depth(), 1);
        assert!(Arc::ptr_eq(view.base(), base.base()));
    }

    #[test]
    fn views_are_live() {
        let base_cell = base_interface();
        let template_cell = shared(InterfaceConfig::template("ItemsApi"));
        let template = Layered::new(Arc::clone(&template_cell));
        let view = override_config(&Layered::new(Arc::clone(&base_cell)), Some(&template));

        assert_eq!(view.server().as_deref(), Some("http://base"));
        write(&template_cell).server = Some("http://late-override".to_string());
        assert_eq!(view.server().as_deref(), Some("http://late-override"));
        write(&template_cell).server = None;
        write(&base_cell).server = Some("http://moved".to_string());
        assert_eq!(view.server().as_deref(), Some("http://moved"));
    }

    #[test]
    fn method_absent_from_base_is_not_resolvable() {
        let template = template_interface();
        write(&template)
            .methods
            .insert(MethodId::new("extra", &[]), shared(MethodConfig::template(MethodId::new("extra", &[]))));
        let view = override_config(&Layered::new(base_interface()), Some(&Layered::new(template)));
        assert!(view.method(&MethodId::new("extra", &[])).is_none());
        assert_eq!(view.method_ids(), vec![method_id()]);
    }

    #[test]
    fn interceptors_chain_override_first() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let base = base_interface();
        let template = shared(InterfaceConfig::template("ItemsApi"));
        write(&base).interceptor = Some(Arc::new(RecordingInterceptor::new("base", Arc::clone(&calls))));
        write(&template).interceptor = Some(Arc::new(RecordingInterceptor::new("override", Arc::clone(&calls))));

        let view = override_config(&Layered::new(base), Some(&Layered::new(template)));
        let interceptor = view.interceptor().unwrap();
        let ctx = fixture_context(HttpMethod::Get, "/items", Vec::new());
        let mut builder = crate::http::HttpRequestBuilder::new(HttpMethod::Get, "/items");

        assert_eq!(interceptor.before_params(&ctx, &mut builder).unwrap(), Flow::Proceed);
        assert_eq!(interceptor.after_params(&ctx, &mut builder).unwrap(), Flow::Proceed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["override:before", "base:before", "override:after", "base:after"]
        );
    }

    #[test]
    fn method_interceptors_chain_override_first() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let base = base_interface();
        let template = template_interface();
        let base_method = Arc::clone(&write(&base).methods[&method_id()]);
        let template_method = Arc::clone(&write(&template).methods[&method_id()]);
        write(&base_method).interceptor = Some(Arc::new(RecordingInterceptor::new("base", Arc::clone(&calls))));
        write(&template_method).interceptor =
            Some(Arc::new(RecordingInterceptor::new("override", Arc::clone(&calls))));

        let view = override_config(&Layered::new(base), Some(&Layered::new(template)));
        let interceptor = view.method(&method_id()).unwrap().interceptor().unwrap();
        let ctx = fixture_context(HttpMethod::Get, "/items", Vec::new());
        let mut builder = crate::http::HttpRequestBuilder::new(HttpMethod::Get, "/items");

        assert_eq!(interceptor.before_params(&ctx, &mut builder).unwrap(), Flow::Proceed);
        assert_eq!(interceptor.after_params(&ctx, &mut builder).unwrap(), Flow::Proceed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["override:before", "base:before", "override:after", "base:after"]
        );
    }

    #[test]
    fn single_interceptor_is_used_unwrapped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let only: Arc<dyn RequestInterceptor> = Arc::new(RecordingInterceptor::new("only", Arc::clone(&calls)));
        let base = base_interface();
        write(&base).interceptor = Some(Arc::clone(&only));
        let view = override_config(&Layered::new(base), Some(&Layered::new(template_interface())));
        assert!(Arc::ptr_eq(&view.interceptor().unwrap(), &only));
    }

    #[test]
    fn stacked_overrides_resolve_top_down() {
        let base = Layered::new(base_interface());
        let middle = shared(InterfaceConfig::template("ItemsApi"));
        write(&middle).server = Some("http://middle".to_string());
        write(&middle).encoding = Some("ISO-8859-1".to_string());
        let once = override_config(&base, Some(&Layered::new(middle)));
        let twice = override_config(&once, Some(&Layered::new(template_interface())));
        assert_eq!(twice.depth(), 3);
        assert_eq!(twice.server().as_deref(), Some("http://override"));
        assert_eq!(twice.encoding().as_deref(), Some("ISO-8859-1"));
    }
}
