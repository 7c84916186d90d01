//! Dispatch and response routing.
//!
//! ```text
//! transport error ─────────────────────────────┐
//! status != 200 ── capture failure, close ─────┤
//! raw stream/reader return ── hand out body    ├─> error handler
//! response handler ── ok ──> value             │
//!                  └─ err ── close ────────────┘
//! ```
//!
//! Exactly 200 counts as success. The body held by the response context is
//! closed on every path before control returns to the caller; a body handed
//! out raw belongs to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{RequestContext, ResponseContext};
use crate::error::ProxyError;
use crate::extension::Deserializer;
use crate::http::HttpRequest;
use crate::returns::Returned;
use crate::transport::Transport;

pub const SUCCESS_STATUS: u16 = 200;

pub fn dispatch(
    ctx: &RequestContext,
    request: &HttpRequest,
    transport: &dyn Transport,
    deserializer: Option<Arc<dyn Deserializer>>,
) -> Result<Returned, ProxyError> {
    let mut response_ctx = ResponseContext::new(ctx, deserializer);
    debug!(
        target: "restproxy::dispatch",
        invocation = %ctx.invocation_id(),
        method = %request.method,
        uri = %request.uri(),
        "sending request"
    );

    let outcome = match transport.execute(request) {
        Err(error) => Err(error),
        Ok(mut response) => {
            let status = response.status();
            debug!(
                target: "restproxy::dispatch",
                invocation = %ctx.invocation_id(),
                status,
                "response received"
            );
            if status != SUCCESS_STATUS {
                let failure = response.capture_failure();
                response_ctx.set_response(response);
                Err(ProxyError::Http(failure))
            } else {
                response_ctx.set_response(response);
                handle(&mut response_ctx)
            }
        }
    };

    let result = match outcome {
        Ok(returned) => Ok(returned),
        Err(error) => {
            response_ctx.close();
            warn!(
                target: "restproxy::dispatch",
                invocation = %ctx.invocation_id(),
                method = %ctx.method_id(),
                status = ?error.status(),
                error = %error,
                "routing failure to error handler"
            );
            let handler = Arc::clone(&ctx.method().error_handler);
            handler.handle(&mut response_ctx, error)
        }
    };
    response_ctx.close();
    result
}

fn handle(response_ctx: &mut ResponseContext<'_>) -> Result<Returned, ProxyError> {
    if response_ctx.return_type().kind.is_raw_body() {
        let body = response_ctx
            .response_mut()
            .ok_or_else(|| ProxyError::IllegalState("no response to hand out".to_string()))?
            .take_body()?;
        return Ok(Returned::Stream(body));
    }
    let handler = Arc::clone(&response_ctx.request().method().response_handler);
    handler.handle(response_ctx)
}
