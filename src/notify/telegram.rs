use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::settings::TelegramSettings;
use super::{escape_html, Channel, Notification};

pub struct TelegramChannel {
    client: reqwest::Client,
    settings: TelegramSettings,
}

impl TelegramChannel {
    pub fn new(settings: TelegramSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn api_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.settings.token)
    }
}

/// Message body in Telegram's HTML parse mode
pub fn format_message(notification: &Notification) -> String {
    format!(
        "{} <b>{}</b>\n\n{}",
        notification.severity.emoji(),
        escape_html(&notification.title),
        escape_html(&notification.body)
    )
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let text = format_message(notification);
        let response = self
            .client
            .post(self.api_url())
            .form(&[
                ("chat_id", self.settings.chat_id.as_str()),
                ("text", text.as_str()),
                ("parse_mode", "HTML"),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Telegram API error {}: {}", status, body);
        }
        Ok(())
    }
}
