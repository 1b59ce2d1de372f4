use crate::config::logging::{LogOutput, LoggingConfig, DEFAULT_LOG_FILE};
use crate::utils::expand_timestamp;
use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::PathBuf;

pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = config
        .level
        .parse::<LevelFilter>()
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    match &config.output {
        LogOutput::Stdout => {
            env_logger::Builder::new()
                .filter_level(level)
                .format_timestamp_secs()
                .init();
        }
        LogOutput::File => {
            let template = config
                .file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
            let path = PathBuf::from(expand_timestamp(&template.to_string_lossy()));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Unable to open log file {}", path.display()))?;

            env_logger::Builder::new()
                .filter_level(level)
                .format_timestamp_secs()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
        LogOutput::Syslog => {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_USER,
                hostname: None,
                process: "fichaje-rs".into(),
                pid: std::process::id(),
            };

            let logger = syslog::unix(formatter)
                .map_err(|e| anyhow::anyhow!("Failed to connect to syslog: {}", e))?;
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|()| log::set_max_level(level))?;
        }
    }

    Ok(())
}
