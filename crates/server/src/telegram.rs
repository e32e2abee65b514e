//! # Telegram Bot API Client
//!
//! Two calls are used:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `getChatMember` | channel membership for the Telegram follow task |
//! | `sendMessage` | spin-available reminder with a web-app button |
//!
//! Every response is the Bot API envelope `{ok, result?, description?}`;
//! `ok: false` is surfaced as [`TelegramError::Api`].

use std::time::Duration;

use async_trait::async_trait;
use readearn_common::{Account, TelegramConfig};
use readearn_ledger::{NotifyError, SpinNotifier};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SPIN_REMINDER_TEXT: &str = "🎉 Your daily spin is ready!\n\n\
💫 Spin the wheel to win points, bonuses and daily prizes.\n\n\
Don't miss out! 🎯";

const SPIN_BUTTON_TEXT: &str = "🎡 Spin The Wheel";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telegram api error: {0}")]
    Api(String),

    #[error("telegram integration not configured: {0}")]
    NotConfigured(&'static str),
}

/// Channel-membership lookup used by the Telegram follow task.
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    async fn is_channel_member(&self, telegram_id: i64) -> Result<bool, TelegramError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
    #[serde(default)]
    is_member: Option<bool>,
}

fn counts_as_member(member: &ChatMember) -> bool {
    match member.status.as_str() {
        "creator" | "administrator" | "member" => true,
        "restricted" => member.is_member.unwrap_or(false),
        _ => false,
    }
}

/// `sendMessage` body for a spin reminder.
pub fn spin_reminder_body(chat_id: i64, web_app_url: Option<&str>) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": SPIN_REMINDER_TEXT,
        "disable_web_page_preview": true,
    });
    if let Some(url) = web_app_url {
        body["reply_markup"] = json!({
            "inline_keyboard": [[{ "text": SPIN_BUTTON_TEXT, "web_app": { "url": url } }]]
        });
    }
    body
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    /// `<api_base>/bot<token>`
    endpoint: String,
    channel: Option<String>,
    spin_url: Option<String>,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("channel", &self.channel)
            .field("spin_url", &self.spin_url)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// `None` when no bot token is configured.
    pub fn from_config(cfg: &TelegramConfig) -> Result<Option<Self>, TelegramError> {
        let Some(token) = cfg.bot_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/bot{}", cfg.api_base.trim_end_matches('/'), token),
            channel: cfg.channel.clone(),
            spin_url: cfg.spin_url.clone(),
        }))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        let envelope: Envelope<T> = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api(
                envelope
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
            )),
        }
    }

    pub async fn send_spin_reminder(&self, chat_id: i64) -> Result<(), TelegramError> {
        let body = spin_reminder_body(chat_id, self.spin_url.as_deref());
        let _message: Value = self.call("sendMessage", &body).await?;
        debug!(chat_id, "spin reminder delivered");
        Ok(())
    }
}

#[async_trait]
impl ChannelMembership for TelegramClient {
    async fn is_channel_member(&self, telegram_id: i64) -> Result<bool, TelegramError> {
        let channel = self
            .channel
            .as_deref()
            .ok_or(TelegramError::NotConfigured("channel"))?;
        let body = json!({ "chat_id": channel, "user_id": telegram_id });
        let member: ChatMember = self.call("getChatMember", &body).await?;
        Ok(counts_as_member(&member))
    }
}

#[async_trait]
impl SpinNotifier for TelegramClient {
    async fn notify_spin_available(&self, account: &Account) -> Result<(), NotifyError> {
        let chat_id = account
            .identity
            .telegram_id
            .ok_or_else(|| NotifyError::Rejected("account has no telegram id".into()))?;
        self.send_spin_reminder(chat_id).await.map_err(|e| match e {
            TelegramError::Api(desc) => NotifyError::Rejected(desc),
            other => NotifyError::Transport(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use readearn_common::Identity;

    fn member(status: &str, is_member: Option<bool>) -> ChatMember {
        ChatMember {
            status: status.to_string(),
            is_member,
        }
    }

    #[test]
    fn test_membership_statuses() {
        assert!(counts_as_member(&member("creator", None)));
        assert!(counts_as_member(&member("administrator", None)));
        assert!(counts_as_member(&member("member", None)));
        assert!(counts_as_member(&member("restricted", Some(true))));
        assert!(!counts_as_member(&member("restricted", Some(false))));
        assert!(!counts_as_member(&member("left", None)));
        assert!(!counts_as_member(&member("kicked", None)));
    }

    #[test]
    fn test_reminder_body() {
        let body = spin_reminder_body(42, Some("https://app.example/spin"));
        assert_eq!(body["chat_id"], 42);
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["web_app"]["url"],
            "https://app.example/spin"
        );
        assert!(spin_reminder_body(42, None).get("reply_markup").is_none());
    }

    #[test]
    fn test_disabled_without_token() {
        let cfg = TelegramConfig::default();
        assert!(TelegramClient::from_config(&cfg).expect("config").is_none());
    }

    /// Serves a fake Bot API on an ephemeral port.
    async fn fake_bot_api(status: &'static str) -> String {
        let app = Router::new()
            .route(
                "/botTEST/getChatMember",
                post(move || async move {
                    Json(json!({ "ok": true, "result": { "status": status, "user": { "id": 7 } } }))
                }),
            )
            .route(
                "/botTEST/sendMessage",
                post(|Json(body): Json<Value>| async move {
                    if body["chat_id"] == 404 {
                        Json(json!({ "ok": false, "description": "Bad Request: chat not found" }))
                    } else {
                        Json(json!({ "ok": true, "result": { "message_id": 1 } }))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client_for(base: String) -> TelegramClient {
        let cfg = TelegramConfig {
            bot_token: Some("TEST".into()),
            channel: Some("@readearn".into()),
            spin_url: Some("https://app.example/spin".into()),
            api_base: base,
        };
        TelegramClient::from_config(&cfg).expect("config").expect("enabled")
    }

    #[tokio::test]
    async fn test_membership_against_fake_api() {
        let joined = client_for(fake_bot_api("member").await);
        assert!(joined.is_channel_member(7).await.expect("lookup"));

        let left = client_for(fake_bot_api("left").await);
        assert!(!left.is_channel_member(7).await.expect("lookup"));
    }

    #[tokio::test]
    async fn test_notifier_maps_api_errors() {
        let client = client_for(fake_bot_api("member").await);
        let ok = Account::new(Identity::telegram(7), chrono::Utc::now());
        assert!(client.notify_spin_available(&ok).await.is_ok());

        let missing_chat = Account::new(Identity::telegram(404), chrono::Utc::now());
        assert!(matches!(
            client.notify_spin_available(&missing_chat).await,
            Err(NotifyError::Rejected(_))
        ));

        let wallet_only = Account::new(Identity::wallet("0xabc"), chrono::Utc::now());
        assert!(matches!(
            client.notify_spin_available(&wallet_only).await,
            Err(NotifyError::Rejected(_))
        ));
    }
}
