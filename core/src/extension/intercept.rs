use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::extension::{Flow, RequestInterceptor};
use crate::http::HttpRequestBuilder;

/// Runs several interceptors in order at each hook, stopping at the first cancellation.
pub struct ChainedInterceptor {
    links: Vec<Arc<dyn RequestInterceptor>>,
}

impl ChainedInterceptor {
    pub fn new(links: Vec<Arc<dyn RequestInterceptor>>) -> Self {
        Self { links }
    }

    /// `None` for no links, the link itself for one, a chain otherwise.
    pub fn compose(mut links: Vec<Arc<dyn RequestInterceptor>>) -> Option<Arc<dyn RequestInterceptor>> {
        match links.len() {
            0 => None,
            1 => links.pop(),
            _ => Some(Arc::new(Self::new(links))),
        }
    }
}

impl RequestInterceptor for ChainedInterceptor {
    fn before_params(&self, ctx: &RequestContext, builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        for link in &self.links {
            if link.before_params(ctx, builder)?.is_cancel() {
                return Ok(Flow::Cancel);
            }
        }
        Ok(Flow::Proceed)
    }

    fn after_params(&self, ctx: &RequestContext, builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        for link in &self.links {
            if link.after_params(ctx, builder)?.is_cancel() {
                return Ok(Flow::Cancel);
            }
        }
        Ok(Flow::Proceed)
    }
}
