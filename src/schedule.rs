//! Clock-in schedule entries and their JSON store.
//!
//! ```json
//! {"horarios": [{"horario": "07:30", "dias": ["L", "M"], "dias_str": "LM",
//!                "activo": true, "ultima_ejecucion": "Nunca"}]}
//! ```

use chrono::{NaiveDateTime, NaiveTime};
use log::{debug, info};
use nom::character::complete::char;
use nom::combinator::{all_consuming, opt};
use nom::multi::many1;
use nom::sequence::{separated_pair, terminated};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;

use crate::config::dayofweek::DayOfWeek;
use crate::config::{number, ws};

pub const LAST_RUN_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const NEVER: &str = "Nunca";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid time '{0}', expected HH:MM")]
    BadTime(String),
    #[error("Invalid days '{0}', expected letters among L M X J V S D")]
    BadDays(String),
    #[error("Select at least one day")]
    NoDays,
    #[error("Schedule {time} for days {days} already exists")]
    Duplicate { time: TimeOfDay, days: String },
    #[error("No schedule with index {index}, there are {len}")]
    BadIndex { index: usize, len: usize },
    #[error("Unable to access schedule file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed schedule file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Wall-clock time with minute precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or_default()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed: nom::IResult<&str, (u32, u32)> =
            all_consuming(ws(separated_pair(number, char(':'), number)))(s);
        match parsed {
            Ok((_, (hour, minute))) => {
                TimeOfDay::new(hour, minute).ok_or_else(|| ScheduleError::BadTime(s.to_string()))
            }
            Err(_) => Err(ScheduleError::BadTime(s.to_string())),
        }
    }
}

/// Parses "LMXJV", "l,m,x" or "L M X" into a weekday set, sorted from Monday
pub fn parse_days(input: &str) -> Result<Vec<DayOfWeek>, ScheduleError> {
    if input.trim().is_empty() {
        return Err(ScheduleError::NoDays);
    }
    let parsed: nom::IResult<&str, Vec<DayOfWeek>> =
        all_consuming(many1(ws(terminated(DayOfWeek::parse, opt(char(','))))))(input);
    match parsed {
        Ok((_, days)) => Ok(canonical_days(&days)),
        Err(_) => Err(ScheduleError::BadDays(input.to_string())),
    }
}

fn canonical_days(days: &[DayOfWeek]) -> Vec<DayOfWeek> {
    let mut days = days.to_vec();
    days.sort();
    days.dedup();
    days
}

fn days_label(days: &[DayOfWeek]) -> String {
    days.iter().map(|d| d.letter()).collect()
}

mod last_run {
    use super::{LAST_RUN_FORMAT, NEVER};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => serializer.collect_str(&at.format(LAST_RUN_FORMAT)),
            None => serializer.serialize_str(NEVER),
        }
    }

    /// Anything that is not a date in the expected format reads as "never"
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NaiveDateTime::parse_from_str(s.trim(), LAST_RUN_FORMAT).ok())
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(rename = "horario")]
    pub time: TimeOfDay,
    #[serde(rename = "dias")]
    pub days: Vec<DayOfWeek>,
    #[serde(rename = "dias_str", default)]
    pub days_label: String,
    #[serde(rename = "activo", default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(rename = "ultima_ejecucion", with = "last_run", default)]
    pub last_run: Option<NaiveDateTime>,
}

impl ScheduleEntry {
    pub fn new(time: TimeOfDay, days: &[DayOfWeek]) -> Self {
        let days = canonical_days(days);
        Self {
            time,
            days_label: days_label(&days),
            days,
            enabled: true,
            last_run: None,
        }
    }

    /// Same time and same weekday set
    pub fn same_slot(&self, other: &ScheduleEntry) -> bool {
        self.time == other.time && self.days == other.days
    }

    fn normalize(&mut self) {
        self.days = canonical_days(&self.days);
        self.days_label = days_label(&self.days);
    }

    pub fn last_run_label(&self) -> String {
        self.last_run
            .map(|at| at.format(LAST_RUN_FORMAT).to_string())
            .unwrap_or_else(|| NEVER.to_string())
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Días: {} - {} - Última: {}",
            self.time,
            self.days_label,
            if self.enabled { "ACTIVO" } else { "INACTIVO" },
            self.last_run_label()
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleDocument {
    #[serde(default)]
    horarios: Vec<ScheduleEntry>,
}

/// Modification time and size of the schedule file as last read or written
type FileStamp = (SystemTime, u64);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// The persisted list of entries, kept sorted by time so that the 1-based
/// indexes shown in listings stay valid for `remove` and `set_enabled`.
#[derive(Debug, Clone)]
pub struct ScheduleBook {
    path: PathBuf,
    entries: Vec<ScheduleEntry>,
    stamp: Option<FileStamp>,
}

impl ScheduleBook {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            stamp: None,
        }
    }

    /// A missing file is an empty schedule
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ScheduleError> {
        let path = path.into();
        if !path.exists() {
            debug!("Schedule file {} not found, starting empty", path.display());
            return Ok(Self::empty(path));
        }

        let text = std::fs::read_to_string(&path).map_err(|source| ScheduleError::Io {
            path: path.clone(),
            source,
        })?;
        let document: ScheduleDocument = serde_json::from_str(&text).map_err(|source| ScheduleError::Json {
            path: path.clone(),
            source,
        })?;

        let mut book = Self {
            stamp: file_stamp(&path),
            path,
            entries: document.horarios,
        };
        for entry in &mut book.entries {
            entry.normalize();
        }
        book.sort();
        info!("Loaded {} schedule entries from {}", book.entries.len(), book.path.display());
        Ok(book)
    }

    pub fn save(&mut self) -> Result<(), ScheduleError> {
        let document = ScheduleDocument {
            horarios: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&document).map_err(|source| ScheduleError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ScheduleError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, json).map_err(|source| ScheduleError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.stamp = file_stamp(&self.path);
        debug!("Schedule saved to {}", self.path.display());
        Ok(())
    }

    /// Re-reads the file if it was written by someone else since this book
    /// last loaded or saved it. Returns true when the entries were replaced.
    pub fn reload_if_changed(&mut self) -> Result<bool, ScheduleError> {
        if file_stamp(&self.path) == self.stamp {
            return Ok(false);
        }
        *self = Self::load(self.path.clone())?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| (a.time, &a.days).cmp(&(b.time, &b.days)));
    }

    pub fn add(&mut self, time: TimeOfDay, days: &[DayOfWeek]) -> Result<&ScheduleEntry, ScheduleError> {
        if days.is_empty() {
            return Err(ScheduleError::NoDays);
        }
        let entry = ScheduleEntry::new(time, days);
        if self.entries.iter().any(|e| e.same_slot(&entry)) {
            return Err(ScheduleError::Duplicate {
                time,
                days: entry.days_label,
            });
        }

        info!("Schedule added: {} {}", entry.time, entry.days_label);
        self.entries.push(entry.clone());
        self.sort();
        let position = self.entries.iter().position(|e| e.same_slot(&entry)).unwrap_or(0);
        Ok(&self.entries[position])
    }

    fn position(&self, index: usize) -> Result<usize, ScheduleError> {
        if index == 0 || index > self.entries.len() {
            return Err(ScheduleError::BadIndex {
                index,
                len: self.entries.len(),
            });
        }
        Ok(index - 1)
    }

    /// Removes the entry at the 1-based `index`
    pub fn remove(&mut self, index: usize) -> Result<ScheduleEntry, ScheduleError> {
        let position = self.position(index)?;
        let entry = self.entries.remove(position);
        info!("Schedule removed: {} {}", entry.time, entry.days_label);
        Ok(entry)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<&ScheduleEntry, ScheduleError> {
        let position = self.position(index)?;
        let entry = &mut self.entries[position];
        entry.enabled = enabled;
        info!(
            "Schedule {} {} {}",
            entry.time,
            entry.days_label,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(entry)
    }

    /// Stamps the last run of the entry occupying the given slot. Returns
    /// false when the entry was removed in the meantime.
    pub fn mark_run(&mut self, time: TimeOfDay, days: &[DayOfWeek], at: NaiveDateTime) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.time == time && e.days.as_slice() == days)
        {
            Some(entry) => {
                entry.last_run = Some(at);
                true
            }
            None => false,
        }
    }

    /// One line per entry, numbered from 1
    pub fn listing(&self) -> Vec<String> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{:>2}. {}", i + 1, entry))
            .collect()
    }
}
