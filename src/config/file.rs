use anyhow::Context;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::path::PathBuf;
use std::time::Duration;

use super::logging::LoggingConfig;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub results_file: Option<String>,
    pub screenshots_dir: Option<PathBuf>,
    pub schedule_file: Option<PathBuf>,
    pub notifications_file: Option<PathBuf>,
    pub headless: Option<bool>,
    pub webdriver_url: Option<String>,
    pub timezone: Option<String>,
    pub captcha: Option<CaptchaDefinition>,
    pub timeouts: Option<TimeoutsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
pub struct CaptchaDefinition {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_captcha_timeout")]
    pub timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_captcha_poll")]
    pub poll_interval: Duration,
    #[serde(default = "default_captcha_fallback")]
    pub fallback: String,
}

impl Default for CaptchaDefinition {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout: default_captcha_timeout(),
            poll_interval: default_captcha_poll(),
            fallback: default_captcha_fallback(),
        }
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TimeoutsConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_element_wait")]
    pub element_wait: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_page_load")]
    pub page_load: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            element_wait: default_element_wait(),
            page_load: default_page_load(),
        }
    }
}

fn default_captcha_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_captcha_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_captcha_fallback() -> String {
    "0000".to_string()
}

fn default_element_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_page_load() -> Duration {
    Duration::from_secs(60)
}

pub fn read_config_file(path: &str) -> anyhow::Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config = serde_yml::from_str(&content).context("Failed to parse config file")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_yaml() {
        let file: ConfigFile = serde_yml::from_str(
            "url: http://fichaje.local/\n\
             headless: true\n\
             captcha:\n  timeout: 60\n\
             timeouts:\n  element_wait: 3\n\
             logging:\n  output: file\n  level: debug\n",
        )
        .unwrap();

        assert_eq!(file.url.as_deref(), Some("http://fichaje.local/"));
        assert_eq!(file.headless, Some(true));
        let captcha = file.captcha.unwrap();
        assert_eq!(captcha.timeout, Duration::from_secs(60));
        assert_eq!(captcha.poll_interval, Duration::from_secs(5));
        assert_eq!(captcha.fallback, "0000");
        let timeouts = file.timeouts.unwrap();
        assert_eq!(timeouts.element_wait, Duration::from_secs(3));
        assert_eq!(timeouts.page_load, Duration::from_secs(60));
        assert_eq!(file.logging.unwrap().level, "debug");
        assert!(file.credentials_file.is_none());
    }
}
