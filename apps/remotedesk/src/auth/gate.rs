use std::fmt;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use url::Url;

use crate::auth::config::AuthConfig;
use crate::auth::error::AuthError;

const DEFAULT_POLL_INTERVAL: u64 = 5;
const DEFAULT_EXPIRES_IN: u64 = 600;
const MIN_POLL_INTERVAL: u64 = 1;

/// Client for the application's device authorization endpoints.
#[derive(Debug, Clone)]
pub struct DeviceAuthClient {
    client: Client,
    config: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceStartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DeviceApproval {
    pub app_token: String,
    pub user_id: Option<String>,
}

impl fmt::Debug for DeviceApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceApproval")
            .field("app_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    Pending,
    Approved(DeviceApproval),
}

#[derive(Debug, Deserialize)]
struct PollBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    app_token: Option<String>,
    #[serde(default)]
    user: Option<PollUser>,
}

#[derive(Debug, Deserialize)]
struct PollUser {
    #[serde(default)]
    id: Option<Value>,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

impl DeviceAuthClient {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AuthError::Config(err.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn url(&self, path: &str) -> Result<Url, AuthError> {
        self.config
            .api_base
            .join(path)
            .map_err(|err| AuthError::Config(format!("invalid api path '{path}': {err}")))
    }

    pub async fn start_device_flow(&self) -> Result<DeviceStartResponse, AuthError> {
        const CONTEXT: &str = "device/start";
        let url = self.url("/api/device/start")?;
        tracing::debug!(target: "remotedesk::auth", %url, "starting device flow");
        let response = self.client.post(url).json(&json!({})).send().await?;
        let response = ensure_success(CONTEXT, response).await?;
        let start: DeviceStartResponse = response.json().await?;
        if start.device_code.is_empty() {
            return Err(AuthError::Gateway {
                context: CONTEXT,
                message: "response carried no device code".into(),
            });
        }
        Ok(start)
    }

    pub async fn poll_device_code(&self, device_code: &str) -> Result<DevicePoll, AuthError> {
        const CONTEXT: &str = "device/poll";
        let url = self.url("/api/device/poll")?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "device_code": device_code }))
            .send()
            .await?;
        let response = ensure_success(CONTEXT, response).await?;
        let body: PollBody = response.json().await?;

        match body.status.as_str() {
            "approved" => {
                let app_token = body
                    .app_token
                    .filter(|token| !token.is_empty())
                    .ok_or_else(|| AuthError::Gateway {
                        context: CONTEXT,
                        message: "approval carried no app token".into(),
                    })?;
                let user_id = body.user.and_then(|user| user.id).map(|id| match id {
                    Value::String(id) => id,
                    other => other.to_string(),
                });
                Ok(DevicePoll::Approved(DeviceApproval { app_token, user_id }))
            }
            "denied" => Err(AuthError::AuthorizationDenied),
            "expired" => Err(AuthError::Expired),
            _ => Ok(DevicePoll::Pending),
        }
    }

    /// Polls at the advertised interval until the device code is approved,
    /// denied, or expires.
    pub async fn wait_for_approval(
        &self,
        start: &DeviceStartResponse,
    ) -> Result<DeviceApproval, AuthError> {
        let interval = Duration::from_secs(start.interval.max(MIN_POLL_INTERVAL));
        let deadline = Instant::now() + Duration::from_secs(start.expires_in);
        loop {
            if Instant::now() + interval > deadline {
                return Err(AuthError::Expired);
            }
            sleep(interval).await;
            match self.poll_device_code(&start.device_code).await? {
                DevicePoll::Approved(approval) => {
                    tracing::info!(target: "remotedesk::auth", user = ?approval.user_id, "device authorization approved");
                    return Ok(approval);
                }
                DevicePoll::Pending => {
                    tracing::trace!(target: "remotedesk::auth", "device authorization pending");
                }
            }
        }
    }
}

async fn ensure_success(context: &'static str, response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.get("error")
                .or_else(|| body.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);
    tracing::warn!(target: "remotedesk::auth", context, %status, "api request failed");
    Err(AuthError::Gateway {
        context,
        message: format!("({status}) {detail}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_response_defaults_timing() {
        let start: DeviceStartResponse = serde_json::from_value(json!({
            "device_code": "dev-1",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://ruoshui.fun.vercel.app/device",
        }))
        .unwrap();
        assert_eq!(start.interval, 5);
        assert_eq!(start.expires_in, 600);
    }

    #[test]
    fn approval_debug_redacts_token() {
        let approval = DeviceApproval {
            app_token: "secret-token".into(),
            user_id: Some("u-1".into()),
        };
        assert!(!format!("{approval:?}").contains("secret-token"));
    }

    #[test]
    fn api_paths_resolve_against_base() {
        let client = DeviceAuthClient::new(AuthConfig::new("https://api.example.com/ignored/").unwrap()).unwrap();
        assert_eq!(
            client.url("/api/device/poll").unwrap().as_str(),
            "https://api.example.com/api/device/poll"
        );
    }
}
