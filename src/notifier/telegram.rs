//! Telegram Bot API transport (`sendMessage`)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::errors::{NotifyError, NotifyResult};
use super::traits::NotificationTransport;
use crate::config::SanitizedValue;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram bot credentials and destination chat
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// API host; overridden in tests
    pub api_base: String,
}

impl TelegramConfig {
    /// Load `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`
    pub fn from_env() -> NotifyResult<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| NotifyError::NotConfigured("TELEGRAM_BOT_TOKEN is not set".into()))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| NotifyError::NotConfigured("TELEGRAM_CHAT_ID is not set".into()))?;

        info!(
            bot_token = %SanitizedValue::new(&bot_token),
            chat_id = %chat_id,
            "Telegram configuration loaded"
        );
        Ok(Self {
            bot_token,
            chat_id,
            api_base: TELEGRAM_API_BASE.to_string(),
        })
    }
}

pub struct TelegramTransport {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> NotifyResult<Self> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl NotificationTransport for TelegramTransport {
    async fn send(&self, text: &str) -> NotifyResult<()> {
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });

        // reqwest errors embed the URL, which carries the token
        let response = self
            .client
            .post(self.send_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(chat_id = %self.config.chat_id, "Telegram message sent");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                Err(NotifyError::Rejected(format!("Telegram returned {}: {}", status, body)))
            }
            _ => Err(NotifyError::Transport(format!("Telegram returned {}: {}", status, body))),
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serial_test::serial;

    fn transport(server: &mockito::Server) -> TelegramTransport {
        TelegramTransport::new(TelegramConfig {
            bot_token: "123:abc".into(),
            chat_id: "-100200".into(),
            api_base: server.url(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_chat_and_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .match_body(Matcher::Json(serde_json::json!({
                "chat_id": "-100200",
                "text": "[AAPL] bull_flag: breakout"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        transport(&server).send("[AAPL] bull_flag: breakout").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_transport_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(502)
            .create_async()
            .await;

        let err = transport(&server).send("hi").await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(401)
            .with_body(r#"{"ok":false,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let err = transport(&server).send("hi").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(ref m) if m.contains("Unauthorized")));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_both_vars() {
        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        std::env::remove_var("TELEGRAM_CHAT_ID");
        assert!(matches!(TelegramConfig::from_env(), Err(NotifyError::NotConfigured(_))));

        std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        assert!(TelegramConfig::from_env().is_err());

        std::env::set_var("TELEGRAM_CHAT_ID", "42");
        let config = TelegramConfig::from_env().unwrap();
        assert_eq!(config.chat_id, "42");
        assert_eq!(config.api_base, TELEGRAM_API_BASE);

        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        std::env::remove_var("TELEGRAM_CHAT_ID");
    }
}
