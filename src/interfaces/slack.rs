use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::config::{SlackConfig, secret_from_env};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::orchestrator::Dispatcher;
use crate::core::reporter::{MessageRef, MessagingSurface};
use crate::core::scheduler::spawn_logged;

const SLACK_API_BASE: &str = "https://slack.com/api";
const MAX_REQUEST_AGE_SECS: u64 = 300;

/// Thread ids are `channel` or `channel:thread_ts`.
pub fn split_thread_id(thread_id: &str) -> (&str, Option<&str>) {
    match thread_id.split_once(':') {
        Some((channel, ts)) if !ts.is_empty() => (channel, Some(ts)),
        Some((channel, _)) => (channel, None),
        None => (thread_id, None),
    }
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

/// Posts task output to Slack threads with a bot token.
pub struct SlackSurface {
    client: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl SlackSurface {
    pub fn new(bot_token: String) -> Self {
        Self::with_api_base(bot_token, SLACK_API_BASE)
    }

    pub fn with_api_base(bot_token: String, api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<SlackResponse> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Slack {} returned HTTP {}", method, response.status()));
        }
        let parsed: SlackResponse = response.json().await?;
        if !parsed.ok {
            return Err(anyhow!(
                "Slack {} failed: {}",
                method,
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl MessagingSurface for SlackSurface {
    async fn send_message(&self, thread_id: &str, text: &str) -> Result<MessageRef> {
        let (channel, thread_ts) = split_thread_id(thread_id);
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::json!(ts);
        }
        let response = self.call("chat.postMessage", body).await?;
        let ts = response
            .ts
            .ok_or_else(|| anyhow!("chat.postMessage returned no ts"))?;
        Ok(MessageRef {
            thread_id: thread_id.to_string(),
            message_id: ts,
        })
    }

    async fn update_message(&self, message: &MessageRef, text: &str) -> Result<()> {
        let (channel, _) = split_thread_id(&message.thread_id);
        self.call(
            "chat.update",
            serde_json::json!({ "channel": channel, "ts": message.message_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(&self, thread_id: &str, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let (channel, thread_ts) = split_thread_id(thread_id);

        let ticket: SlackResponse = self
            .client
            .post(format!("{}/files.getUploadURLExternal", self.api_base))
            .bearer_auth(&self.bot_token)
            .form(&[
                ("filename", filename.to_string()),
                ("length", bytes.len().to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;
        if !ticket.ok {
            return Err(anyhow!(
                "files.getUploadURLExternal failed: {}",
                ticket.error.unwrap_or_default()
            ));
        }
        let (Some(upload_url), Some(file_id)) = (ticket.upload_url, ticket.file_id) else {
            return Err(anyhow!("files.getUploadURLExternal returned no upload target"));
        };

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let uploaded = self
            .client
            .post(&upload_url)
            .multipart(reqwest::multipart::Form::new().part("file", part))
            .send()
            .await?;
        if !uploaded.status().is_success() {
            return Err(anyhow!("file upload returned HTTP {}", uploaded.status()));
        }

        let mut complete = serde_json::json!({
            "files": [{ "id": file_id, "title": filename }],
            "channel_id": channel,
        });
        if let Some(ts) = thread_ts {
            complete["thread_ts"] = serde_json::json!(ts);
        }
        self.call("files.completeUploadExternal", complete).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct SlackState {
    dispatcher: Arc<Dispatcher>,
    signing_secret: String,
}

#[derive(Deserialize, Debug)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    challenge: Option<String>,
    event: Option<SlackEventDetails>,
}

#[derive(Deserialize, Debug)]
struct SlackEventDetails {
    #[serde(rename = "type")]
    inner_type: String,
    text: Option<String>,
    user: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Expected `x-slack-signature` for a request body.
fn sign_request(signing_secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    use hmac::Mac;
    use sha2::Sha256;
    type HmacSha256 = hmac::Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes()).ok()?;
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    Some(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify a Slack request signature (v0 scheme) and reject stale timestamps.
pub fn verify_slack_signature(
    headers: &HeaderMap,
    body: &[u8],
    signing_secret: &str,
    now: u64,
) -> bool {
    let Some(timestamp) = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Ok(ts) = timestamp.parse::<u64>() else {
        return false;
    };
    if now.abs_diff(ts) > MAX_REQUEST_AGE_SECS {
        return false;
    }

    let Some(sig) = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(expected) = sign_request(signing_secret, timestamp, body) else {
        return false;
    };

    // Constant-time comparison
    if sig.len() != expected.len() {
        return false;
    }
    sig.as_bytes()
        .iter()
        .zip(expected.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

async fn slack_events(
    State(state): State<SlackState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.signing_secret.is_empty()
        && !verify_slack_signature(&headers, &body, &state.signing_secret, unix_now())
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid signature" })),
        )
            .into_response();
    }

    let payload: SlackEventPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid JSON" })),
            )
                .into_response();
        }
    };

    if payload.event_type == "url_verification"
        && let Some(challenge) = payload.challenge
    {
        return Json(serde_json::json!({ "challenge": challenge })).into_response();
    }

    if payload.event_type == "event_callback"
        && let Some(event) = payload.event
    {
        // Our own posts and edits come back as events too.
        if event.bot_id.is_some() || event.subtype.is_some() {
            return Json(serde_json::json!({ "status": "ignored" })).into_response();
        }

        if (event.inner_type == "message" || event.inner_type == "app_mention")
            && let (Some(text), Some(user), Some(channel)) = (event.text, event.user, event.channel)
        {
            let root_ts = event.thread_ts.or(event.ts).unwrap_or_default();
            let thread_id = format!("{}:{}", channel, root_ts);
            info!("[slack] message from {} on {}", user, thread_id);

            let dispatcher = state.dispatcher.clone();
            let label = format!("slack:{}", thread_id);
            spawn_logged(label, async move {
                let outcome = dispatcher.handle_inbound(&thread_id, &text).await?;
                info!("[slack] {} -> {:?}", thread_id, outcome);
                Ok(())
            });
        }
    }

    Json(serde_json::json!({ "status": "ok" })).into_response()
}

fn events_router(dispatcher: Arc<Dispatcher>, signing_secret: String) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .with_state(SlackState {
            dispatcher,
            signing_secret,
        })
}

/// Slack inbound channel: receives Events API callbacks and feeds them to the dispatcher.
pub struct SlackChannel {
    config: SlackConfig,
    dispatcher: Arc<Dispatcher>,
}

impl SlackChannel {
    pub fn new(config: SlackConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }
}

#[async_trait]
impl LifecycleComponent for SlackChannel {
    async fn on_init(&mut self) -> Result<()> {
        info!("Slack Channel Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        if secret_from_env(&self.config.bot_token_env).is_none() {
            warn!(
                "No Slack bot token in ${}. Slack Channel disabled.",
                self.config.bot_token_env
            );
            return Ok(());
        }
        let signing_secret = secret_from_env(&self.config.signing_secret_env).unwrap_or_default();
        if signing_secret.is_empty() {
            warn!(
                "No Slack signing secret in ${}. Slack webhook requests will NOT be verified.",
                self.config.signing_secret_env
            );
        }

        let app = events_router(self.dispatcher.clone(), signing_secret);
        let addr = format!("127.0.0.1:{}", self.config.port);
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!("Slack Webhook listening at http://{}/slack/events", addr);
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("Slack Webhook crashed: {}", e);
                    }
                }
                Err(e) => error!("Slack Webhook could not bind {}: {}", addr, e),
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Slack Channel Interface shutting down...");
        Ok(())
    }
}
