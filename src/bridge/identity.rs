use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::error::BridgeError;

#[async_trait]
pub(crate) trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<u64, BridgeError>;
}

pub(crate) struct HttpIdentityVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpIdentityVerifier {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| format!("failed to build identity client: {error}"))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<u64, BridgeError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|error| BridgeError::AuthFailure(format!("identity service unreachable: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::AuthFailure(format!(
                "identity service returned {status}"
            )));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|error| BridgeError::AuthFailure(format!("invalid identity response: {error}")))?;

        let user_id = read_user_id(&body)
            .ok_or_else(|| BridgeError::AuthFailure("credential rejected".to_string()))?;
        debug!(user_id, "credential verified");
        Ok(user_id)
    }
}

fn read_user_id(body: &Value) -> Option<u64> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return None;
    }

    body.get("user_id")
        .or_else(|| body.get("userId"))
        .or_else(|| body.get("data").and_then(|data| data.get("id")))
        .and_then(Value::as_u64)
}

pub(crate) struct StaticTokenVerifier {
    token: String,
    user_id: u64,
}

impl StaticTokenVerifier {
    pub(crate) fn new(token: impl Into<String>, user_id: u64) -> Self {
        Self {
            token: token.into(),
            user_id,
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<u64, BridgeError> {
        if credential == self.token {
            Ok(self.user_id)
        } else {
            Err(BridgeError::AuthFailure("token mismatch".to_string()))
        }
    }
}
