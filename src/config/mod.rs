pub mod dayofweek;
pub mod file;
pub mod ini;
pub mod logging;
pub mod validation;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use nom::character::complete::{digit1, multispace0};
use nom::combinator::map_res;
use nom::error::ParseError;
use nom::sequence::delimited;
use nom::{AsChar, IResult, InputTakeAtPosition, Parser};
use std::path::PathBuf;

use self::file::{CaptchaDefinition, ConfigFile, TimeoutsConfig};
use self::logging::LoggingConfig;

pub const DEFAULT_URL: &str = "http://172.22.0.132/";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const CAPTCHA_KEY_ENV: &str = "API_KEY_2CAPTCHA";

#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub credentials_file: PathBuf,
    /// strftime template, expanded once per batch run
    pub results_file: String,
    pub screenshots_dir: PathBuf,
    pub schedule_file: PathBuf,
    pub notifications_file: PathBuf,
    pub headless: bool,
    pub webdriver_url: String,
    pub timezone: Tz,
    pub captcha: CaptchaConfig,
    pub timeouts: TimeoutsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub api_key: Option<String>,
    pub timeout: std::time::Duration,
    pub poll_interval: std::time::Duration,
    pub fallback: String,
}

pub fn parse_config_file(file: &ConfigFile) -> Result<Config> {
    let timezone: Tz = match &file.timezone {
        Some(name) => name
            .parse()
            .map_err(|e| anyhow::anyhow!("Unable to parse timezone '{}': {}", name, e))?,
        None => system_timezone(),
    };

    let captcha = file.captcha.clone().unwrap_or_default();

    Ok(Config {
        url: file.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
        credentials_file: file
            .credentials_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("datos.csv")),
        results_file: file
            .results_file
            .clone()
            .unwrap_or_else(|| "resultados_%Y%m%d_%H%M%S.csv".to_string()),
        screenshots_dir: file
            .screenshots_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("screenshots")),
        schedule_file: file
            .schedule_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("horarios_config.json")),
        notifications_file: file
            .notifications_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("notificaciones.ini")),
        headless: file.headless.unwrap_or(false),
        webdriver_url: file
            .webdriver_url
            .clone()
            .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        timezone,
        captcha: CaptchaConfig::resolve(captcha, std::env::var(CAPTCHA_KEY_ENV).ok()),
        timeouts: file.timeouts.clone().unwrap_or_default(),
        logging: file.logging.clone().unwrap_or_default(),
    })
}

/// Loads the config file when given, otherwise starts from the defaults
pub fn load_config(path: Option<&str>) -> Result<(ConfigFile, Config)> {
    let file = match path {
        Some(path) => file::read_config_file(path)?,
        None => ConfigFile::default(),
    };
    let config = parse_config_file(&file).context("Invalid configuration")?;
    Ok((file, config))
}

fn system_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| name.parse().ok())
        .unwrap_or(Tz::UTC)
}

impl CaptchaConfig {
    fn resolve(definition: CaptchaDefinition, env_key: Option<String>) -> Self {
        let api_key = definition
            .api_key
            .or(env_key)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Self {
            api_key,
            timeout: definition.timeout,
            poll_interval: definition.poll_interval,
            fallback: definition.fallback,
        }
    }
}

pub fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

pub fn ws<I, O, E: ParseError<I>, F>(inner: F) -> impl FnMut(I) -> IResult<I, O, E>
where
    F: Parser<I, O, E>,
    I: InputTakeAtPosition,
    <I as InputTakeAtPosition>::Item: AsChar + Clone,
{
    delimited(multispace0, inner, multispace0)
}
