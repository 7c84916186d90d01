//! `rest_interface!`: declare an interface and get its proxy-backed implementation.

use serde::Serialize;
use serde_json::Value;

use crate::error::ProxyError;

/// Argument conversion used by generated methods.
#[doc(hidden)]
pub fn to_arg<T: Serialize + ?Sized>(value: &T) -> Result<Value, ProxyError> {
    serde_json::to_value(value).map_err(|e| ProxyError::Serialization(e.to_string()))
}

/// Declares a REST interface.
///
/// Generates a struct wrapping a `Proxy`, its `RestInterface` impl, and one
/// method per declared signature. Each method returns
/// `Result<Option<R>, ProxyError>`; `Ok(None)` is the null result of a
/// cancelled call or a zero-value error policy.
///
/// ```ignore
/// rest_interface! {
///     pub struct ItemsApi {
///         fn get_item(id: u64, q: &str) -> String;
///         fn delete_item(id: u64) -> ();
///     }
/// }
///
/// let api: ItemsApi = ProxyFactory::new().server("http://localhost:8080").build()?;
/// ```
#[macro_export]
macro_rules! rest_interface {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                fn $method:ident($($arg:ident : $ty:ty),* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            proxy: $crate::Proxy,
        }

        impl $crate::RestInterface for $name {
            fn descriptor() -> $crate::InterfaceDescriptor {
                $crate::InterfaceDescriptor::new(::std::stringify!($name))
                    $(.method($crate::MethodDescriptor::new(
                        ::std::stringify!($method),
                        &[$(::std::any::type_name::<$ty>()),*],
                        <$ret as $crate::ReturnValue>::return_type(),
                    )))*
            }

            fn from_proxy(proxy: $crate::Proxy) -> Self {
                Self { proxy }
            }
        }

        impl $name {
            #[allow(dead_code)]
            pub fn proxy(&self) -> &$crate::Proxy {
                &self.proxy
            }

            $(
                $(#[$fmeta])*
                #[allow(dead_code)]
                pub fn $method(
                    &self,
                    $($arg: $ty),*
                ) -> ::std::result::Result<::std::option::Option<$ret>, $crate::ProxyError> {
                    let id = $crate::MethodId::new(
                        ::std::stringify!($method),
                        &[$(::std::any::type_name::<$ty>()),*],
                    );
                    let args = ::std::vec![$($crate::macros::to_arg(&$arg)?),*];
                    self.proxy.call::<$ret>(&id, args)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use crate::config::Destination;
    use crate::http::HttpMethod;
    use crate::response::HttpResponse;
    use crate::returns::Decoded;
    use crate::testing::RecordingTransport;
    use crate::{BuilderConfigFactory, MethodId, ProxyFactory, RestInterface};

    #[derive(Debug, Deserialize, PartialEq)]
    pub struct Item {
        pub id: u64,
        pub name: String,
    }

    crate::rest_interface! {
        /// Items service.
        pub struct ItemsApi {
            fn get_item(id: u64, q: &str) -> String;
            fn fetch(id: u64) -> Decoded<Item>;
            fn delete_item(id: u64) -> ();
            fn ping() -> String;
        }
    }

    #[test]
    fn descriptor_lists_every_method() {
        let descriptor = ItemsApi::descriptor();
        assert_eq!(descriptor.name, "ItemsApi");
        assert_eq!(descriptor.methods.len(), 4);
        assert!(descriptor.find(&MethodId::new("get_item", &["u64", "&str"])).is_some());
        assert_eq!(descriptor.find_by_name("ping").unwrap().id.arity(), 0);
    }

    #[test]
    fn generated_methods_call_through_the_proxy() {
        let transport = Arc::new(RecordingTransport::new(|request| {
            let body = if request.path.ends_with("/7") { r#"{"id": 7, "name": "lamp"}"# } else { "\"pong\"" };
            Ok(HttpResponse::from_bytes(200, Vec::new(), body))
        }));
        let api: ItemsApi = ProxyFactory::new()
            .server("http://items.local")
            .transport(Arc::clone(&transport) as Arc<dyn crate::Transport>)
            .deserializer(Arc::new(crate::JsonDeserializer))
            .config_factory(Arc::new(BuilderConfigFactory::new(|_, builder| {
                if let Some(fetch) = builder.method_named("fetch") {
                    fetch.path("/items/{id}");
                    if let Some(param) = fetch.param(0) {
                        param.name("id").destination(Destination::Path);
                    }
                }
                if let Some(delete) = builder.method_named("delete_item") {
                    delete.path("/items").http_method(HttpMethod::Delete);
                }
                Ok(())
            })))
            .build()
            .unwrap();

        let item = api.fetch(7).unwrap().unwrap();
        assert_eq!(item.0, Item { id: 7, name: "lamp".to_string() });
        assert_eq!(api.ping().unwrap().as_deref(), Some("pong"));
        assert_eq!(api.delete_item(3).unwrap(), Some(()));

        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent[0].uri(), "http://items.local/items/7");
        assert_eq!(sent[2].method, HttpMethod::Delete);
        assert_eq!(sent[2].uri(), "http://items.local/items?3");
    }
}
