//! Machine-to-machine bearer tokens (OAuth2 client credentials).
//!
//! The token is fetched lazily and reused until the cache window or the
//! token's own `expires_in` runs out, whichever comes first.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use mmr_ledger::LookupError;

/// Client-credentials settings. `client_secret` never appears in `Debug`.
#[derive(Clone)]
pub struct M2mCredentials {
    pub token_url: String,
    pub audience: String,
    pub client_id: String,
    pub client_secret: String,
    pub cache_for: Duration,
}

impl fmt::Debug for M2mCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("M2mCredentials")
            .field("token_url", &self.token_url)
            .field("audience", &self.audience)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("cache_for", &self.cache_for)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct Cached {
    token: String,
    valid_until: Instant,
}

pub struct TokenSource {
    creds: M2mCredentials,
    http: reqwest::Client,
    cached: Mutex<Option<Cached>>,
}

impl TokenSource {
    pub fn new(creds: M2mCredentials, http: reqwest::Client) -> Self {
        Self {
            creds,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, fetching a fresh one when the cached one is stale.
    pub async fn token(&self) -> Result<String, LookupError> {
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            if Instant::now() < c.valid_until {
                return Ok(c.token.clone());
            }
        }

        let resp = self
            .http
            .post(&self.creds.token_url)
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": self.creds.client_id,
                "client_secret": self.creds.client_secret,
                "audience": self.creds.audience,
            }))
            .send()
            .await
            .map_err(|e| LookupError::new(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::with_status(
                status.as_u16(),
                format!("token request rejected: http {}", status.as_u16()),
            ));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| LookupError::new(format!("token response decode failed: {e}")))?;

        let ttl = match body.expires_in {
            Some(secs) => self.creds.cache_for.min(Duration::from_secs(secs)),
            None => self.creds.cache_for,
        };
        debug!(ttl_secs = ttl.as_secs(), "fetched m2m token");
        *cached = Some(Cached {
            token: body.access_token.clone(),
            valid_until: Instant::now() + ttl,
        });
        Ok(body.access_token)
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("creds", &self.creds)
            .finish_non_exhaustive()
    }
}
