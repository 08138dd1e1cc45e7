//! Firebase Cloud Messaging (HTTP v1) push channel.

use async_trait::async_trait;
use serde::Deserialize;

use tidings_common::config::AppConfig;
use tidings_common::error::PushError;
use tidings_common::store::PushChannel;
use tidings_common::types::PushMessage;

use crate::auth::{ServiceAccountKey, TokenSource};

/// FCM error statuses that mean the device token itself is unusable.
const INVALID_TOKEN_STATUSES: &[&str] = &["UNREGISTERED", "NOT_FOUND"];

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// Push channel backed by the FCM `messages:send` endpoint.
pub struct FcmClient {
    http: reqwest::Client,
    send_url: String,
    tokens: TokenSource,
}

impl FcmClient {
    pub fn new(endpoint: &str, project_id: &str, tokens: TokenSource) -> Self {
        Self {
            http: reqwest::Client::new(),
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            tokens,
        }
    }

    /// Build a client from configuration.
    ///
    /// A static `FCM_ACCESS_TOKEN` wins over a service-account key. The project
    /// id comes from `FCM_PROJECT_ID`, falling back to the key's `project_id`.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if let Some(token) = &config.fcm_access_token {
            let project_id = config.fcm_project_id.as_deref().ok_or_else(|| {
                anyhow::anyhow!("FCM_PROJECT_ID is required when FCM_ACCESS_TOKEN is set")
            })?;
            tracing::info!(project_id, "Using static FCM access token");
            return Ok(Self::new(
                &config.fcm_endpoint,
                project_id,
                TokenSource::fixed(token.clone()),
            ));
        }

        let path = config.fcm_credentials_path.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "FCM_CREDENTIALS_PATH or GOOGLE_APPLICATION_CREDENTIALS must point to a service account key"
            )
        })?;
        let key = ServiceAccountKey::from_file(path).await?;
        let project_id = config
            .fcm_project_id
            .clone()
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| anyhow::anyhow!("FCM project id missing from config and key"))?;

        tracing::info!(project_id = %project_id, client_email = %key.client_email, "Using FCM service account");
        Ok(Self::new(
            &config.fcm_endpoint,
            &project_id,
            TokenSource::service_account(key),
        ))
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    /// Request body for one message.
    pub fn request_body(message: &PushMessage) -> serde_json::Value {
        serde_json::json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        })
    }

    /// Map an FCM error response onto a `PushError`.
    pub fn classify_error(http_status: u16, body: &str) -> PushError {
        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return PushError::Rejected {
                status: http_status.to_string(),
                message: body.to_string(),
            };
        };
        let error = envelope.error;

        let fcm_code = error
            .details
            .iter()
            .filter_map(|d| d.get("errorCode").and_then(|c| c.as_str()))
            .next()
            .unwrap_or_default();

        if INVALID_TOKEN_STATUSES.contains(&error.status.as_str())
            || INVALID_TOKEN_STATUSES.contains(&fcm_code)
            || error.message.contains("registration token")
        {
            return PushError::InvalidToken(error.message);
        }

        if http_status == 401 || error.status == "UNAUTHENTICATED" {
            return PushError::Auth(error.message);
        }

        PushError::Rejected {
            status: if error.status.is_empty() {
                http_status.to_string()
            } else {
                error.status
            },
            message: error.message,
        }
    }
}

#[async_trait]
impl PushChannel for FcmClient {
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        let bearer = self.tokens.token(&self.http).await?;

        let resp = self
            .http
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&Self::request_body(message))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = Self::classify_error(status.as_u16(), &body);
            if matches!(err, PushError::Auth(_)) {
                self.tokens.invalidate().await;
            }
            return Err(err);
        }

        let sent: SendResponse = resp
            .json()
            .await
            .map_err(|e| PushError::Transport(format!("malformed FCM response: {}", e)))?;

        tracing::debug!(message_name = %sent.name, "FCM accepted message");
        Ok(sent.name)
    }
}
