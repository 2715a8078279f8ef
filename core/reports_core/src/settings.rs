//! Line-oriented `key=value` settings file (`ReportSettings.txt`).
//!
//! Lines starting with `#` are comments. Keys match case-insensitively and the
//! existing line layout (comments, ordering) survives a `set`.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;
use tracing::warn;

const COMMENT: &str = "#";
const SEPARATOR: char = '=';

pub const SETTINGS_FILE_NAME: &str = "ReportSettings.txt";

const DEFAULT_REPORTS_PER_PAGE: usize = 4;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to find settings file {}", .0.display())]
    NotFound(PathBuf),

    #[error("settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {}: type '{type_name}' does not match value '{value}' for key '{key}' on line {line}", .path.display())]
    Parse {
        path: PathBuf,
        key: String,
        value: String,
        type_name: &'static str,
        line: usize,
    },

    #[error("settings file {}: line {line} has no '=' separator", .path.display())]
    Malformed { path: PathBuf, line: usize },

    #[error("settings file {}: {key} {reason}", .path.display())]
    Invalid {
        path: PathBuf,
        key: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl SettingsFile {
    /// Writes `lines` to `path` and keeps them as the loaded content.
    pub fn create(path: impl Into<PathBuf>, lines: &[&str]) -> Result<Self, SettingsError> {
        let file = SettingsFile {
            path: path.into(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        };
        file.flush()?;
        Ok(file)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Err(SettingsError::NotFound(path));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        if let Some(idx) = lines
            .iter()
            .position(|line| !is_skipped(line) && !line.contains(SEPARATOR))
        {
            return Err(SettingsError::Malformed { path, line: idx + 1 });
        }
        Ok(SettingsFile { path, lines })
    }

    /// Loads `path`, or writes `defaults` there first when it does not exist.
    pub fn load_or_create(
        path: impl Into<PathBuf>,
        defaults: &[&str],
    ) -> Result<Self, SettingsError> {
        let path = path.into();
        if path.exists() {
            Self::load(path)
        } else {
            Self::create(path, defaults)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the value for `key` converted to `T`, or `None` when the key is absent.
    pub fn get<T: FromStr>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let Some((line, raw)) = self.find(key)? else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| SettingsError::Parse {
                path: self.path.clone(),
                key: key.to_string(),
                value: raw.to_string(),
                type_name: short_type_name::<T>(),
                line: line + 1,
            })
    }

    /// Replaces the line holding `key` (appending one if it is missing) and
    /// writes the file back.
    pub fn set<T: Display>(&mut self, key: &str, value: T) -> Result<(), SettingsError> {
        let new_line = format!("{key}{SEPARATOR}{value}");
        match self.find(key)? {
            Some((idx, _)) => self.lines[idx] = new_line,
            None => self.lines.push(new_line),
        }
        self.flush()
    }

    /// Keys of every `key=value` line, in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|line| !is_skipped(line))
            .filter_map(|line| line.split_once(SEPARATOR))
            .map(|(k, _)| k.trim())
    }

    fn find(&self, key: &str) -> Result<Option<(usize, &str)>, SettingsError> {
        for (idx, line) in self.lines.iter().enumerate() {
            if is_skipped(line) {
                continue;
            }
            let Some((k, v)) = line.split_once(SEPARATOR) else {
                return Err(SettingsError::Malformed {
                    path: self.path.clone(),
                    line: idx + 1,
                });
            };
            if k.trim().eq_ignore_ascii_case(key) {
                return Ok(Some((idx, v.trim())));
            }
        }
        Ok(None)
    }

    fn flush(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        std::fs::write(&self.path, text).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn is_skipped(line: &str) -> bool {
    let line = line.trim_start();
    line.is_empty() || line.starts_with(COMMENT)
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Typed view of `ReportSettings.txt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportSettings {
    pub reports_per_page: usize,
    pub query_timeout_ms: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            reports_per_page: DEFAULT_REPORTS_PER_PAGE,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

impl ReportSettings {
    pub const DEFAULT_LINES: &'static [&'static str] = &[
        "# Reports settings",
        "# Number of report lines shown per /checkreports page.",
        "ReportsPerPage=4",
        "# How long a database call may wait on a locked database (milliseconds).",
        "QueryTimeoutMs=5000",
    ];

    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let file = SettingsFile::load_or_create(path, Self::DEFAULT_LINES)?;
        Self::from_file(&file)
    }

    const KEYS: &'static [&'static str] = &["ReportsPerPage", "QueryTimeoutMs"];

    pub fn from_file(file: &SettingsFile) -> Result<Self, SettingsError> {
        for key in file.keys() {
            if !Self::KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                warn!("{}: ignoring unknown setting '{key}'", file.path().display());
            }
        }
        let defaults = ReportSettings::default();
        let settings = ReportSettings {
            reports_per_page: file
                .get("ReportsPerPage")?
                .unwrap_or(defaults.reports_per_page),
            query_timeout_ms: file
                .get("QueryTimeoutMs")?
                .unwrap_or(defaults.query_timeout_ms),
        };
        if settings.reports_per_page == 0 {
            return Err(SettingsError::Invalid {
                path: file.path().to_path_buf(),
                key: "ReportsPerPage",
                reason: "must be at least 1",
            });
        }
        Ok(settings)
    }
}
