use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[serde(rename = "stdout")]
    #[default]
    Stdout,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "syslog")]
    Syslog,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub output: LogOutput,
    /// Log file path, strftime placeholders are expanded at startup
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_level")]
    pub level: String,
}

pub const DEFAULT_LOG_FILE: &str = "fichajes_%Y%m%d.log";

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stdout,
            file: None,
            level: default_level(),
        }
    }
}
