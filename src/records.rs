use anyhow::{bail, Context, Result};
use chrono::Local;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// One account from the credentials file (`tarjeta,contrasena`)
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Credential {
    #[serde(rename = "tarjeta")]
    pub identifier: String,
    #[serde(rename = "contrasena")]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "ÉXITO")]
    Success,
    #[serde(rename = "FALLO")]
    Failure,
    #[serde(rename = "DESCONOCIDO")]
    Unknown,
    #[serde(rename = "ERROR")]
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Success => "ÉXITO",
            Outcome::Failure => "FALLO",
            Outcome::Unknown => "DESCONOCIDO",
            Outcome::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultRecord {
    #[serde(rename = "fecha_hora")]
    pub timestamp: String,
    #[serde(rename = "usuario")]
    pub identifier: String,
    #[serde(rename = "estado")]
    pub outcome: Outcome,
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "screenshot")]
    pub screenshot: String,
}

impl ResultRecord {
    pub fn now(identifier: &str, outcome: Outcome, message: &str, screenshot: Option<&Path>) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            identifier: identifier.to_string(),
            outcome,
            message: message.to_string(),
            screenshot: screenshot
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Reads every credential row. A missing or empty file aborts the run.
pub fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    if !path.exists() {
        bail!("Credentials file {} does not exist", path.display());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Unable to open {}", path.display()))?;

    let mut credentials = Vec::new();
    for (i, row) in reader.deserialize::<Credential>().enumerate() {
        let row = row.with_context(|| format!("Malformed row {} in {}", i + 1, path.display()))?;
        credentials.push(row);
    }

    if credentials.is_empty() {
        bail!("Credentials file {} is empty", path.display());
    }
    Ok(credentials)
}

/// Append-only results file; the header is written when the file is created
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ResultRecord) -> Result<()> {
        let exists = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Unable to open results file {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Appends and logs, never fails the caller
    pub fn record(&self, record: &ResultRecord) {
        match self.append(record) {
            Ok(()) => info!("Result saved for {} ({})", record.identifier, record.outcome),
            Err(e) => error!("Unable to save result for {}: {:#}", record.identifier, e),
        }
    }

    pub fn read_all(&self) -> Result<Vec<ResultRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Unable to open {}", self.path.display()))?;
        let records = reader.deserialize().collect::<Result<Vec<ResultRecord>, _>>()?;
        Ok(records)
    }
}
