//! Typed return values.
//!
//! Handlers produce an untyped `Returned`; `ReturnValue` turns it into the
//! method's declared type. `None` is the null result: a cancelled call, or a
//! failure recovered as the zero value.

use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProxyError;
use crate::response::{BodyReader, ResponseBody};
use crate::types::{ReturnKind, ReturnType};

/// Untyped outcome of an invocation.
#[derive(Debug)]
pub enum Returned {
    /// An interceptor declined to proceed; nothing was sent.
    Cancelled,
    /// An error handler recovered with the zero value.
    Zero,
    Unit,
    Text(String),
    Value(Value),
    /// The live body; the receiver closes it.
    Stream(ResponseBody),
}

pub trait ReturnValue: Sized {
    fn return_type() -> ReturnType;

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError>;
}

/// A value decoded by the configured deserializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decoded<T>(pub T);

impl<T> Decoded<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Decoded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Decoded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

fn mismatch(expected: &str, returned: &Returned) -> ProxyError {
    ProxyError::Handling(format!("expected {expected}, handler produced {returned:?}"))
}

impl ReturnValue for () {
    fn return_type() -> ReturnType {
        ReturnType {
            kind: ReturnKind::Unit,
            type_name: "()",
        }
    }

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError> {
        match returned {
            Returned::Cancelled | Returned::Zero => Ok(None),
            _ => Ok(Some(())),
        }
    }
}

impl ReturnValue for String {
    fn return_type() -> ReturnType {
        ReturnType {
            kind: ReturnKind::Text,
            type_name: std::any::type_name::<String>(),
        }
    }

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError> {
        match returned {
            Returned::Cancelled | Returned::Zero | Returned::Unit | Returned::Value(Value::Null) => Ok(None),
            Returned::Text(text) | Returned::Value(Value::String(text)) => Ok(Some(text)),
            Returned::Value(value) => Ok(Some(value.to_string())),
            Returned::Stream(body) => BodyReader::new(body).read_to_string().map(Some).map_err(Into::into),
        }
    }
}

impl ReturnValue for ResponseBody {
    fn return_type() -> ReturnType {
        ReturnType {
            kind: ReturnKind::Stream,
            type_name: std::any::type_name::<ResponseBody>(),
        }
    }

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError> {
        match returned {
            Returned::Stream(body) => Ok(Some(body)),
            Returned::Cancelled | Returned::Zero => Ok(None),
            other => Err(mismatch("a response stream", &other)),
        }
    }
}

impl ReturnValue for BodyReader {
    fn return_type() -> ReturnType {
        ReturnType {
            kind: ReturnKind::Reader,
            type_name: std::any::type_name::<BodyReader>(),
        }
    }

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError> {
        match returned {
            Returned::Stream(body) => Ok(Some(BodyReader::new(body))),
            Returned::Cancelled | Returned::Zero => Ok(None),
            other => Err(mismatch("a response reader", &other)),
        }
    }
}

impl<T: DeserializeOwned> ReturnValue for Decoded<T> {
    fn return_type() -> ReturnType {
        ReturnType {
            kind: ReturnKind::Decoded,
            type_name: std::any::type_name::<T>(),
        }
    }

    fn from_returned(returned: Returned) -> Result<Option<Self>, ProxyError> {
        let value = match returned {
            Returned::Cancelled | Returned::Zero => return Ok(None),
            Returned::Unit => Value::Null,
            Returned::Text(text) => Value::String(text),
            Returned::Value(value) => value,
            other @ Returned::Stream(_) => return Err(mismatch("a decoded value", &other)),
        };
        serde_json::from_value(value)
            .map(|decoded| Some(Decoded(decoded)))
            .map_err(|e| ProxyError::Deserialization(format!("{}: {e}", std::any::type_name::<T>())))
    }
}
