use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::ParamContext;
use crate::error::ProxyError;
use crate::extension::Serializer;

/// Plain string form of a value: strings as-is, scalars via `Display`,
/// arrays comma-joined, objects as JSON. `null` has no string form.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(items.iter().filter_map(value_to_string).collect::<Vec<_>>().join(",")),
        Value::Object(_) => Some(value.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSerializer;

impl Serializer for DefaultSerializer {
    fn serialize(&self, param: &ParamContext<'_>) -> Result<Option<String>, ProxyError> {
        Ok(value_to_string(param.value()))
    }
}

/// Serializes any non-null value as JSON text, strings included.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, param: &ParamContext<'_>) -> Result<Option<String>, ProxyError> {
        match param.value() {
            Value::Null => Ok(None),
            value => serde_json::to_string(value)
                .map(Some)
                .map_err(|e| ProxyError::Serialization(format!("parameter {}: {e}", param.index()))),
        }
    }
}

/// Serializers keyed by declared parameter type name.
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    by_type: BTreeMap<String, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, serializer: Arc<dyn Serializer>) -> &mut Self {
        self.by_type.insert(type_name.into(), serializer);
        self
    }

    /// Register under `std::any::type_name::<T>()`, the name `rest_interface!` records.
    pub fn register_for<T: ?Sized>(&mut self, serializer: Arc<dyn Serializer>) -> &mut Self {
        self.register(std::any::type_name::<T>(), serializer)
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Serializer>> {
        self.by_type.get(type_name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_type.keys()).finish()
    }
}
