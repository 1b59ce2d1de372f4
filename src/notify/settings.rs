use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;

use crate::config::ini::{parse_ini, Ini};

const PLACEHOLDERS: &[&str] = &[
    "AQUI_TU_TOKEN",
    "AQUI_TU_CHAT_ID",
    "AQUI_TU_SERVIDOR_SMTP",
    "AQUI_TU_EMAIL",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub email_from: String,
    pub email_password: String,
    pub email_to: String,
}

/// Delivery channels from `notificaciones.ini`. A channel is `None` when
/// its section is missing, incomplete or still holds placeholder values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSettings {
    pub telegram: Option<TelegramSettings>,
    pub email: Option<EmailSettings>,
}

fn usable(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.get(section, key)
        .map(str::trim)
        .filter(|v| !v.is_empty() && !PLACEHOLDERS.contains(v))
        .map(str::to_string)
}

impl NotificationSettings {
    pub fn from_ini(ini: &Ini) -> Self {
        let telegram = match (usable(ini, "telegram", "token"), usable(ini, "telegram", "chat_id")) {
            (Some(token), Some(chat_id)) => Some(TelegramSettings { token, chat_id }),
            _ => None,
        };

        let email = Self::email_from_ini(ini);

        Self { telegram, email }
    }

    fn email_from_ini(ini: &Ini) -> Option<EmailSettings> {
        let smtp_server = usable(ini, "email", "smtp_server")?;
        let port = usable(ini, "email", "smtp_port")?;
        let email_from = usable(ini, "email", "email_from")?;
        let email_password = usable(ini, "email", "email_password")?;
        let email_to = usable(ini, "email", "email_to")?;

        let Ok(smtp_port) = port.parse::<u16>() else {
            warn!("Invalid smtp_port '{}', email notifications disabled", port);
            return None;
        };

        Some(EmailSettings {
            smtp_server,
            smtp_port,
            email_from,
            email_password,
            email_to,
        })
    }

    /// Reads the settings file. A missing file disables every channel.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("{} not found, notifications disabled", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        let ini = parse_ini(&content).with_context(|| format!("Malformed {}", path.display()))?;
        let settings = Self::from_ini(&ini);

        if settings.telegram.is_some() {
            info!("Telegram notifications configured");
        }
        if settings.email.is_some() {
            info!("Email notifications configured");
        }
        Ok(settings)
    }
}
