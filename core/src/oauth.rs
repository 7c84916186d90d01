//! Pre-authenticated OAuth 1.0a request signing.
//!
//! Credentials are obtained out of band; this module only signs outgoing
//! requests with the `PLAINTEXT` method. Secrets never reach the logs.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::ProxyError;
use crate::extension::{Flow, RequestInterceptor};
use crate::http::HttpRequestBuilder;

/// Where the OAuth parameters travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPlacement {
    /// `Authorization: OAuth ...`
    #[default]
    Header,
    /// One query parameter per OAuth field.
    Url,
}

#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub token_secret: String,
    pub placement: TokenPlacement,
}

impl OAuthCredentials {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        token_secret: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            token_secret: token_secret.into(),
            placement: TokenPlacement::default(),
        }
    }

    pub fn placed_in(mut self, placement: TokenPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// `PLAINTEXT` signature: both secrets, encoded, joined by `&`.
    pub fn signature(&self) -> String {
        format!(
            "{}&{}",
            urlencoding::encode(&self.consumer_secret),
            urlencoding::encode(&self.token_secret)
        )
    }

    fn fields(&self, nonce: &str, timestamp: u64) -> Vec<(&'static str, String)> {
        vec![
            ("oauth_consumer_key", self.consumer_key.clone()),
            ("oauth_token", self.access_token.clone()),
            ("oauth_signature_method", "PLAINTEXT".to_string()),
            ("oauth_signature", self.signature()),
            ("oauth_timestamp", timestamp.to_string()),
            ("oauth_nonce", nonce.to_string()),
            ("oauth_version", "1.0".to_string()),
        ]
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("consumer_key", &self.consumer_key)
            .field("access_token", &self.access_token)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

/// Signs every request after its parameters are in place.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: OAuthCredentials,
}

impl OAuthSigner {
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self { credentials }
    }

    fn sign(&self, builder: &mut HttpRequestBuilder, nonce: &str, timestamp: u64) {
        let fields = self.credentials.fields(nonce, timestamp);
        match self.credentials.placement {
            TokenPlacement::Header => {
                let value = fields
                    .iter()
                    .map(|(key, value)| format!("{key}=\"{}\"", urlencoding::encode(value)))
                    .collect::<Vec<_>>()
                    .join(", ");
                builder.set_header("Authorization", format!("OAuth {value}"));
            }
            TokenPlacement::Url => {
                for (key, value) in fields {
                    builder.query_param(key, value);
                }
            }
        }
    }
}

impl RequestInterceptor for OAuthSigner {
    fn after_params(&self, ctx: &RequestContext, builder: &mut HttpRequestBuilder) -> Result<Flow, ProxyError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let nonce = Uuid::new_v4().simple().to_string();
        self.sign(builder, &nonce, timestamp);
        trace!(
            target: "restproxy::oauth",
            invocation = %ctx.invocation_id(),
            consumer_key = %self.credentials.consumer_key,
            placement = ?self.credentials.placement,
            "request signed"
        );
        Ok(Flow::Proceed)
    }
}
