//! Interface descriptors.
//!
//! # Design
//! A described interface is plain data: a name plus one `MethodDescriptor`
//! per method. `MethodId` (name + parameter type names) is the stable key
//! into both the configuration map and the proxy's method registry, so no
//! runtime reflection happens on the call path.

use std::fmt;

use crate::returns::ReturnValue;

/// Stable identity of an interface method: name plus parameter type signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId {
    name: String,
    params: Vec<String>,
}

impl MethodId {
    pub fn new(name: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter type names, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// How a method's declared return type is produced from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Nothing; the response is discarded.
    Unit,
    /// The body as a string.
    Text,
    /// The live response byte stream, bypassing the response handler.
    Stream,
    /// The live response as a charset-aware reader, bypassing the response handler.
    Reader,
    /// A value decoded by the configured deserializer.
    Decoded,
}

impl ReturnKind {
    pub fn is_raw_body(self) -> bool {
        matches!(self, ReturnKind::Stream | ReturnKind::Reader)
    }
}

/// Statically known return type of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnType {
    pub kind: ReturnKind,
    pub type_name: &'static str,
}

impl ReturnType {
    pub fn of<R: ReturnValue>() -> Self {
        R::return_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub id: MethodId,
    pub returns: ReturnType,
}

impl MethodDescriptor {
    pub fn new(name: &str, params: &[&str], returns: ReturnType) -> Self {
        Self {
            id: MethodId::new(name, params),
            returns,
        }
    }
}

/// A described interface: everything the proxy factory needs besides configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn find(&self, id: &MethodId) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| &m.id == id)
    }

    /// First method with the given name, regardless of signature.
    pub fn find_by_name(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.id.name() == name)
    }
}
