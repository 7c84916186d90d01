use serde_json::Value;
use tracing::trace;

use crate::config::Destination;
use crate::context::ParamContext;
use crate::error::ProxyError;
use crate::extension::serialize::value_to_string;
use crate::extension::RequestInjector;
use crate::http::HttpRequestBuilder;

/// Places each parameter by its destination.
///
/// Headers and path bindings keep their destination on every verb. Anything
/// else goes to the URL when `is_for_url` holds: first into a matching path
/// placeholder, otherwise as a query entry. Remaining parameters land in the
/// form or, for `Body`, as the whole entity. An empty name merges the value
/// directly: object values explode into one field each, strings become a raw
/// query fragment or the entity body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInjector;

impl RequestInjector for DefaultInjector {
    fn inject(&self, param: &ParamContext<'_>, builder: &mut HttpRequestBuilder) -> Result<(), ProxyError> {
        let Some(value) = param.serialized()? else {
            trace!(target: "restproxy::request", index = param.index(), "no value, parameter skipped");
            return Ok(());
        };
        if param.param().ignore_empty && value.trim().is_empty() {
            trace!(target: "restproxy::request", index = param.index(), "blank value ignored");
            return Ok(());
        }

        let name = param.name();
        let positional = param.index().to_string();
        match param.destination() {
            Destination::Header => {
                if name.is_empty() {
                    return Err(ProxyError::InvalidRequest(format!(
                        "header parameter {} has no name",
                        param.index()
                    )));
                }
                builder.header(name, value);
                return Ok(());
            }
            Destination::Path => {
                builder.path_param(if name.is_empty() { positional.as_str() } else { name }, value);
                return Ok(());
            }
            _ => {}
        }

        if !name.is_empty() && builder.replace_placeholder(name, &value) {
            return Ok(());
        }
        if name.is_empty() && param.param().bound && builder.replace_placeholder(&positional, &value) {
            return Ok(());
        }

        if param.is_for_url() {
            match (name.is_empty(), exploded(param.value())) {
                (false, _) => {
                    builder.query_param(name, value);
                }
                (true, Some(fields)) => {
                    for (key, field) in fields {
                        builder.query_param(key, field);
                    }
                }
                (true, None) => {
                    builder.raw_query(value);
                }
            }
        } else if param.destination() == Destination::Body {
            builder.body(value);
        } else {
            match (name.is_empty(), exploded(param.value())) {
                (false, _) => {
                    builder.form_param(name, value);
                }
                (true, Some(fields)) => {
                    for (key, field) in fields {
                        builder.form_param(key, field);
                    }
                }
                (true, None) => {
                    builder.body(value);
                }
            }
        }
        Ok(())
    }
}

fn exploded(value: &Value) -> Option<Vec<(String, String)>> {
    let Value::Object(fields) = value else {
        return None;
    };
    Some(
        fields
            .iter()
            .filter_map(|(key, field)| value_to_string(field).map(|v| (key.clone(), v)))
            .collect(),
    )
}
