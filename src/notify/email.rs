use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::settings::EmailSettings;
use super::{escape_html, Channel, Notification};

pub struct EmailChannel {
    settings: EmailSettings,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }
}

pub fn subject(notification: &Notification) -> String {
    format!("[Fichaje] {}", notification.title)
}

pub fn format_html(notification: &Notification) -> String {
    format!(
        r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2 style="color: #2c3e50;">{emoji} {title}</h2>
        <div style="background-color: #ecf0f1; padding: 15px; border-radius: 5px;">
            <pre style="white-space: pre-wrap;">{body}</pre>
        </div>
        <hr>
        <p style="color: #7f8c8d; font-size: 12px;">
            Sistema de Fichaje Automatizado<br>
            {timestamp}
        </p>
    </body>
</html>"#,
        emoji = notification.severity.emoji(),
        title = escape_html(&notification.title),
        body = escape_html(&notification.body),
        timestamp = notification.timestamp.format("%d/%m/%Y %H:%M:%S"),
    )
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let email = Message::builder()
            .from(self.settings.email_from.parse()?)
            .to(self.settings.email_to.parse()?)
            .subject(subject(notification))
            .header(ContentType::TEXT_HTML)
            .body(format_html(notification))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.smtp_server)?
            .port(self.settings.smtp_port)
            .credentials(Credentials::new(
                self.settings.email_from.clone(),
                self.settings.email_password.clone(),
            ))
            .build();

        mailer.send(email).await?;
        Ok(())
    }
}
