use chrono_tz::Tz;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::config::file::ConfigFile;
use crate::config::logging::{LogOutput, DEFAULT_LOG_FILE};
use crate::config::CAPTCHA_KEY_ENV;
use crate::notify::settings::NotificationSettings;
use crate::records::load_credentials;
use crate::schedule::ScheduleBook;
use crate::utils::expand_timestamp;

#[derive(Debug, Clone)]
pub enum ValidationResult {
    Error(String),
    Warning(String),
}

fn validate_output_path(path: &str) -> Option<String> {
    let path = Path::new(path);

    // If path exists, it must be a file
    if path.exists() && !path.is_file() {
        return Some(format!("Path '{}' exists but is not a file", path.display()));
    }

    // Check if parent directory exists and is writable
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            return Some(format!("Parent directory '{}' does not exist", parent.display()));
        }

        if !Command::new("test")
            .args(["-w", &parent.to_string_lossy()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
        {
            return Some(format!("Parent directory '{}' is not writable", parent.display()));
        }
    }

    None
}

fn validate_url(field: &str, url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => None,
        Ok(parsed) => Some(format!("{}: unsupported scheme '{}' in '{}'", field, parsed.scheme(), url)),
        Err(e) => Some(format!("{}: invalid URL '{}': {}", field, url, e)),
    }
}

fn validate_logging_config(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];

    if let Some(logging) = &conf.logging {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&logging.level.as_str()) {
            result.push(ValidationResult::Error(format!(
                "Invalid log level '{}'. Must be one of: {}",
                logging.level,
                valid_levels.join(", ")
            )));
        }

        if logging.output == LogOutput::File {
            let template = logging
                .file
                .as_deref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
            if let Some(err) = validate_output_path(&expand_timestamp(&template)) {
                result.push(ValidationResult::Error(format!("Invalid log file: {}", err)));
            }
        }
    }

    result
}

fn validate_captcha(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];
    let captcha = conf.captcha.clone().unwrap_or_default();

    let key_in_file = captcha.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
    let key_in_env = std::env::var(CAPTCHA_KEY_ENV).is_ok_and(|k| !k.trim().is_empty());
    if !key_in_file && !key_in_env {
        result.push(ValidationResult::Warning(format!(
            "No captcha API key (config 'captcha.api_key' or env {}), the fallback value '{}' will be used",
            CAPTCHA_KEY_ENV, captcha.fallback
        )));
    }

    if captcha.poll_interval == Duration::ZERO {
        result.push(ValidationResult::Error("captcha.poll_interval must be at least 1 second".to_string()));
    } else if captcha.timeout < captcha.poll_interval {
        result.push(ValidationResult::Warning(format!(
            "captcha.timeout ({} s) is shorter than captcha.poll_interval ({} s), only one poll will be made",
            captcha.timeout.as_secs(),
            captcha.poll_interval.as_secs()
        )));
    }

    result
}

fn validate_files(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];

    let credentials = conf
        .credentials_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("datos.csv"));
    if let Err(e) = load_credentials(&credentials) {
        result.push(ValidationResult::Error(format!("Credentials: {:#}", e)));
    }

    let results = conf
        .results_file
        .clone()
        .unwrap_or_else(|| "resultados_%Y%m%d_%H%M%S.csv".to_string());
    if let Some(err) = validate_output_path(&expand_timestamp(&results)) {
        result.push(ValidationResult::Error(format!("Invalid results file: {}", err)));
    }

    if let Some(dir) = &conf.screenshots_dir {
        if dir.exists() && !dir.is_dir() {
            result.push(ValidationResult::Error(format!(
                "Screenshots path '{}' exists but is not a directory",
                dir.display()
            )));
        }
    }

    let schedule = conf
        .schedule_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("horarios_config.json"));
    match ScheduleBook::load(&schedule) {
        Ok(book) if book.is_empty() => result.push(ValidationResult::Warning(format!(
            "No schedule entries in '{}', the scheduler cannot be started",
            schedule.display()
        ))),
        Ok(_) => {}
        Err(e) => result.push(ValidationResult::Error(e.to_string())),
    }

    let notifications = conf
        .notifications_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("notificaciones.ini"));
    if !notifications.exists() {
        result.push(ValidationResult::Warning(format!(
            "Notification settings '{}' not found, notifications are disabled",
            notifications.display()
        )));
    } else {
        match NotificationSettings::load(&notifications) {
            Ok(settings) if settings.telegram.is_none() && settings.email.is_none() => {
                result.push(ValidationResult::Warning(format!(
                    "No notification channel configured in '{}'",
                    notifications.display()
                )))
            }
            Ok(_) => {}
            Err(e) => result.push(ValidationResult::Error(format!("{:#}", e))),
        }
    }

    result
}

pub fn validate_config(conf: &ConfigFile) -> Vec<ValidationResult> {
    let mut result = vec![];

    if let Some(tz_name) = &conf.timezone {
        let tz: Result<Tz, _> = tz_name.parse();
        if tz.is_err() {
            result.push(ValidationResult::Error(format!("Unable to parse timezone: '{}'", tz_name)));
        }
    }

    if let Some(url) = &conf.url {
        if let Some(err) = validate_url("url", url) {
            result.push(ValidationResult::Error(err));
        }
    }
    if let Some(url) = &conf.webdriver_url {
        if let Some(err) = validate_url("webdriver_url", url) {
            result.push(ValidationResult::Error(err));
        }
    }

    result.extend(validate_files(conf));
    result.extend(validate_captcha(conf));
    result.extend(validate_logging_config(conf));

    result
}
