use std::sync::Arc;

use tracing::warn;

use crate::config::ErrorPolicy;
use crate::context::ResponseContext;
use crate::error::ProxyError;
use crate::extension::{Deserializer, ErrorHandler, ResponseHandler};
use crate::returns::Returned;
use crate::types::ReturnKind;

/// Converts a response by return kind.
///
/// Unit discards the body. Text without a deserializer returns the body as a
/// string. Anything else needs a deserializer; the body is closed after
/// decoding whatever the outcome.
#[derive(Clone, Default)]
pub struct DefaultResponseHandler {
    deserializer: Option<Arc<dyn Deserializer>>,
}

impl DefaultResponseHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `deserializer` instead of the factory-wide one.
    pub fn with_deserializer(deserializer: Arc<dyn Deserializer>) -> Self {
        Self {
            deserializer: Some(deserializer),
        }
    }
}

impl ResponseHandler for DefaultResponseHandler {
    fn handle(&self, ctx: &mut ResponseContext<'_>) -> Result<Returned, ProxyError> {
        let returns = ctx.return_type();
        let deserializer = self.deserializer.clone().or_else(|| ctx.deserializer().cloned());
        let response = ctx
            .response_mut()
            .ok_or_else(|| ProxyError::IllegalState("no response to handle".to_string()))?;

        match (returns.kind, deserializer) {
            (ReturnKind::Unit, _) => {
                response.close();
                Ok(Returned::Unit)
            }
            (ReturnKind::Stream | ReturnKind::Reader, _) => Ok(Returned::Stream(response.take_body()?)),
            (ReturnKind::Text, None) => {
                let text = response.text()?.to_string();
                response.close();
                Ok(Returned::Text(text))
            }
            (_, None) => Err(ProxyError::IllegalState(format!(
                "no deserializer configured for return type {}",
                returns.type_name
            ))),
            (_, Some(deserializer)) => {
                let decoded = response
                    .stream()
                    .and_then(|body| deserializer.deserialize(body, &returns));
                response.close();
                decoded.map(Returned::Value)
            }
        }
    }
}

/// Hands the failure back to the caller unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RethrowErrors;

impl ErrorHandler for RethrowErrors {
    fn handle(&self, _ctx: &mut ResponseContext<'_>, error: ProxyError) -> Result<Returned, ProxyError> {
        Err(error)
    }
}

/// Swallows the failure; the call returns the zero value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroOnError;

impl ErrorHandler for ZeroOnError {
    fn handle(&self, ctx: &mut ResponseContext<'_>, error: ProxyError) -> Result<Returned, ProxyError> {
        let request = ctx.request();
        warn!(
            target: "restproxy::response",
            invocation = %request.invocation_id(),
            method = %request.method_id(),
            error = %error,
            "failure replaced by zero value"
        );
        ctx.close();
        Ok(Returned::Zero)
    }
}

pub fn error_handler_for(policy: ErrorPolicy) -> Arc<dyn ErrorHandler> {
    match policy {
        ErrorPolicy::Rethrow => Arc::new(RethrowErrors),
        ErrorPolicy::ZeroValue => Arc::new(ZeroOnError),
    }
}
