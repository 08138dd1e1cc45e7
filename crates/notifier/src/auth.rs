//! OAuth access tokens for the FCM HTTP v1 API.
//!
//! A service-account key signs a short-lived RS256 assertion, which is exchanged
//! at the account's `token_uri` for a bearer token. Tokens are cached and
//! refreshed a minute before they expire.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tidings_common::error::PushError;

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a Google service-account JSON key that token minting needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, PushError> {
        serde_json::from_str(json)
            .map_err(|e| PushError::Auth(format!("invalid service account key: {}", e)))
    }

    pub async fn from_file(path: &str) -> Result<Self, PushError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PushError::Auth(format!("cannot read {}: {}", path, e)))?;
        Self::from_json(&raw)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

enum Source {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cache: Mutex<Option<CachedToken>>,
    },
}

/// Supplies bearer tokens for FCM requests.
pub struct TokenSource {
    source: Source,
}

impl TokenSource {
    /// A fixed token, e.g. for an emulator or a token minted elsewhere.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    pub fn service_account(key: ServiceAccountKey) -> Self {
        Self {
            source: Source::ServiceAccount {
                key,
                cache: Mutex::new(None),
            },
        }
    }

    /// Current bearer token, minting a new one when the cached token is close
    /// to expiry.
    pub async fn token(&self, http: &reqwest::Client) -> Result<String, PushError> {
        let (key, cache) = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::ServiceAccount { key, cache } => (key, cache),
        };

        let mut cached = cache.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref()
            && token.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
        {
            return Ok(token.value.clone());
        }

        let fresh = exchange(http, key, now).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drop any cached token so the next request mints a new one.
    pub async fn invalidate(&self) {
        if let Source::ServiceAccount { cache, .. } = &self.source {
            *cache.lock().await = None;
        }
    }
}

/// Sign the JWT-bearer assertion for `key`.
pub fn build_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, PushError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: MESSAGING_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| PushError::Auth(format!("invalid private key: {}", e)))?;

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| PushError::Auth(format!("failed to sign assertion: {}", e)))
}

async fn exchange(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
    now: DateTime<Utc>,
) -> Result<CachedToken, PushError> {
    let assertion = build_assertion(key, now)?;

    let resp = http
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(|e| PushError::Transport(format!("token exchange failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(PushError::Auth(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| PushError::Auth(format!("malformed token response: {}", e)))?;

    tracing::debug!(expires_in = token.expires_in, "Minted FCM access token");

    Ok(CachedToken {
        value: token.access_token,
        expires_at: now + Duration::seconds(token.expires_in),
    })
}
