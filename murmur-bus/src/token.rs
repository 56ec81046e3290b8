//! OAuth access tokens for the Pub/Sub REST API.
//!
//! On Google Cloud runtimes the metadata server hands out tokens for the
//! attached service account; [`MetadataToken`] fetches and caches them.
//! [`StaticToken`] covers tokens minted elsewhere (`gcloud auth
//! print-access-token`), and [`NoToken`] is for the emulator.
use crate::BusError;
use async_trait::async_trait;
use murmur_http::{Auth, HttpClient, HttpError, RequestOpts};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const METADATA_BASE: &str = "http://metadata.google.internal/";
const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Bearer token for the next request, or `None` to send no auth.
    async fn token(&self) -> Result<Option<String>, BusError>;
}

pub struct NoToken;

#[async_trait]
impl TokenSource for NoToken {
    async fn token(&self) -> Result<Option<String>, BusError> {
        Ok(None)
    }
}

pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>, BusError> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Failed refreshes are remembered this long, so callers queued behind a
/// failing fetch get its error instead of repeating it.
const FAILURE_HOLD: Duration = Duration::from_secs(10);

enum Cached {
    Token { token: String, refresh_at: Instant },
    Failed { reason: String, retry_at: Instant },
}

pub struct MetadataToken {
    http: HttpClient,
    cached: Mutex<Option<Cached>>,
}

impl MetadataToken {
    /// Metadata server at `GCE_METADATA_HOST` if set, else the well-known host.
    pub fn from_env() -> Result<Self, BusError> {
        match std::env::var(METADATA_HOST_ENV) {
            Ok(host) if !host.trim().is_empty() => {
                Self::with_base_url(&format!("http://{}/", host.trim()))
            }
            _ => Self::with_base_url(METADATA_BASE),
        }
    }

    pub fn with_base_url(base: &str) -> Result<Self, BusError> {
        let http = HttpClient::new(base)?.with_timeout(Duration::from_secs(5));
        Ok(Self {
            http,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<MetadataTokenResponse, HttpError> {
        let opts = RequestOpts {
            auth: Some(Auth::Header {
                name: HeaderName::from_static("metadata-flavor"),
                value: HeaderValue::from_static("Google"),
            }),
            ..Default::default()
        };
        self.http.get_json(TOKEN_PATH, opts).await
    }
}

#[async_trait]
impl TokenSource for MetadataToken {
    async fn token(&self) -> Result<Option<String>, BusError> {
        // Held across the fetch so concurrent publishes share one refresh.
        let mut cached = self.cached.lock().await;
        let now = Instant::now();
        match cached.as_ref() {
            Some(Cached::Token { token, refresh_at }) if now < *refresh_at => {
                return Ok(Some(token.clone()));
            }
            Some(Cached::Failed { reason, retry_at }) if now < *retry_at => {
                return Err(BusError::Token(reason.clone()));
            }
            _ => {}
        }

        match self.fetch().await {
            Ok(fresh) => {
                let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
                tracing::debug!(expires_in = fresh.expires_in, "pubsub.token.refreshed");
                *cached = Some(Cached::Token {
                    token: fresh.access_token.clone(),
                    refresh_at: now + lifetime,
                });
                Ok(Some(fresh.access_token))
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "pubsub.token.refresh_failed");
                *cached = Some(Cached::Failed {
                    reason: reason.clone(),
                    retry_at: Instant::now() + FAILURE_HOLD,
                });
                Err(BusError::Token(reason))
            }
        }
    }
}
