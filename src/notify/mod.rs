pub mod email;
pub mod settings;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, error, info};

use self::email::EmailChannel;
use self::settings::NotificationSettings;
use self::telegram::TelegramChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn emoji(self) -> &'static str {
        match self {
            Severity::Success => "✅",
            Severity::Error => "❌",
            Severity::Warning => "⚠️",
            Severity::Info => "ℹ️",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub timestamp: DateTime<Local>,
}

impl Notification {
    pub fn new(title: &str, body: &str, severity: Severity) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            severity,
            timestamp: Local::now(),
        }
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Fans a notification out to every configured channel. Delivery errors are
/// logged and swallowed.
#[derive(Default)]
pub struct Notifier {
    channels: Vec<Box<dyn Channel>>,
}

impl Notifier {
    pub fn new(channels: Vec<Box<dyn Channel>>) -> Self {
        Self { channels }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        if let Some(telegram) = &settings.telegram {
            channels.push(Box::new(TelegramChannel::new(telegram.clone())));
        }
        if let Some(email) = &settings.email {
            channels.push(Box::new(EmailChannel::new(email.clone())));
        }
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_enabled(&self) -> bool {
        !self.channels.is_empty()
    }

    pub async fn notify(&self, title: &str, body: &str, severity: Severity) {
        if self.channels.is_empty() {
            debug!("No notification channel enabled, skipping '{}'", title);
            return;
        }

        let notification = Notification::new(title, body, severity);
        for channel in &self.channels {
            match channel.send(&notification).await {
                Ok(()) => info!("Notification '{}' sent via {}", title, channel.name()),
                Err(e) => error!("Failed to send '{}' via {}: {:#}", title, channel.name(), e),
            }
        }
    }
}

/// Escapes text placed inside HTML markup
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Current local time as shown in notification bodies
pub fn now_label() -> String {
    Local::now().format("%d/%m/%Y %H:%M:%S").to_string()
}


#[cfg(test)]
mod tests {
    use super::settings::{EmailSettings, TelegramSettings};
    use super::testing::RecordingChannel;
    use super::*;

    #[test]
    fn test_channels_follow_settings() {
        assert!(Notifier::from_settings(&NotificationSettings::default())
            .channel_names()
            .is_empty());

        let settings = NotificationSettings {
            telegram: Some(TelegramSettings {
                token: "t".into(),
                chat_id: "c".into(),
            }),
            email: Some(EmailSettings {
                smtp_server: "smtp.example.com".into(),
                smtp_port: 587,
                email_from: "a@example.com".into(),
                email_password: "p".into(),
                email_to: "b@example.com".into(),
            }),
        };
        assert_eq!(Notifier::from_settings(&settings).channel_names(), vec!["telegram", "email"]);
    }

    #[tokio::test]
    async fn test_every_channel_receives_the_notification() {
        let (first, first_sent) = RecordingChannel::new();
        let (mut second, second_sent) = RecordingChannel::new();
        second.fail = true;
        let notifier = Notifier::new(vec![Box::new(second), Box::new(first)]);

        notifier.notify("Fichaje Exitoso", "Usuario: 1234", Severity::Success).await;

        // A failing channel does not stop the others
        assert_eq!(second_sent.lock().unwrap().len(), 1);
        let sent = first_sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Fichaje Exitoso");
        assert_eq!(sent[0].severity, Severity::Success);
    }
}
