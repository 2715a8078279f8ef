//! `Reports.json`: status headers and chat phrase warnings.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use thiserror::Error;

use crate::report::ReportStatus;

pub const CONFIG_FILE_NAME: &str = "Reports.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {} is malformed: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub unread_report_header: String,
    pub unhandled_report_header: String,
    pub default_report_header: String,
    pub phrase_warnings: PhraseWarnings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            unread_report_header: "[Unread]".to_string(),
            unhandled_report_header: "[Unhandled]".to_string(),
            default_report_header: String::new(),
            phrase_warnings: PhraseWarnings::default(),
        }
    }
}

impl Config {
    pub fn header_for(&self, status: ReportStatus) -> &str {
        match status {
            ReportStatus::Unread => &self.unread_report_header,
            ReportStatus::Unhandled => &self.unhandled_report_header,
            ReportStatus::Handled => &self.default_report_header,
        }
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_err)
    }

    /// Reads `path`, writing the defaults there first when the file is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Config::default().write(path)?;
        }
        Config::read(path)
    }
}

/// Phrase → warning pairs, kept in file order so the first listed phrase wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhraseWarnings(Vec<(String, String)>);

impl PhraseWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a phrase, keeping its position when replaced.
    pub fn insert(&mut self, phrase: impl Into<String>, warning: impl Into<String>) {
        let phrase = phrase.into();
        let warning = warning.into();
        match self.0.iter_mut().find(|(p, _)| *p == phrase) {
            Some(entry) => entry.1 = warning,
            None => self.0.push((phrase, warning)),
        }
    }

    /// Warning for the first phrase contained in `text` (case-sensitive).
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(phrase, _)| text.contains(phrase.as_str()))
            .map(|(_, warning)| warning.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<String>, W: Into<String>> FromIterator<(P, W)> for PhraseWarnings {
    fn from_iter<I: IntoIterator<Item = (P, W)>>(iter: I) -> Self {
        let mut out = PhraseWarnings::new();
        for (p, w) in iter {
            out.insert(p, w);
        }
        out
    }
}

impl Serialize for PhraseWarnings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (phrase, warning) in &self.0 {
            map.serialize_entry(phrase, warning)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PhraseWarnings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMap;

        impl<'de> Visitor<'de> for OrderedMap {
            type Value = PhraseWarnings;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of phrase to warning text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = PhraseWarnings::new();
                while let Some((phrase, warning)) = access.next_entry::<String, String>()? {
                    out.insert(phrase, warning);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedMap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let cfg = Config::load_or_create(&path).unwrap();
        assert_eq!(cfg, Config::default());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"UnreadReportHeader\": \"[Unread]\""));
        assert!(text.contains("\"PhraseWarnings\": {}"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "UnreadReportHeader": "NEW" }"#).unwrap();
        let cfg = Config::read(&path).unwrap();
        assert_eq!(cfg.unread_report_header, "NEW");
        assert_eq!(cfg.unhandled_report_header, "[Unhandled]");
        assert_eq!(cfg.header_for(ReportStatus::Handled), "");
    }

    #[test]
    fn malformed_file_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{\n  \"UnreadReportHeader\": \n}").unwrap();
        let err = Config::read(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn phrase_warnings_keep_file_order() {
        let json = r#"{ "PhraseWarnings": { "zzz": "last letter", "aaa": "first letter" } }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.phrase_warnings.len(), 2);
        assert_eq!(cfg.phrase_warnings.first_match("aaa zzz"), Some("last letter"));

        let back = serde_json::to_string(&cfg.phrase_warnings).unwrap();
        assert_eq!(back, r#"{"zzz":"last letter","aaa":"first letter"}"#);
    }

    #[test]
    fn phrase_match_is_case_sensitive_substring() {
        let warnings: PhraseWarnings = [("spam", "please don't spam")].into_iter().collect();
        assert_eq!(warnings.first_match("no spamming"), Some("please don't spam"));
        assert_eq!(warnings.first_match("SPAM"), None);
    }
}
