use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

/// Value stored in `ReportedID` when a report names nobody.
pub const NO_REPORTED_USER: i64 = -1;

/// Workflow state of a report. The numeric values are the on-disk `State` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Unread = 0,
    Unhandled = 1,
    Handled = 2,
}

impl ReportStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(ReportStatus::Unread),
            1 => Some(ReportStatus::Unhandled),
            2 => Some(ReportStatus::Handled),
            _ => None,
        }
    }
}

/// In-world coordinate, persisted as `"<x>:<y>"`. Both components are finite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Position { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Deserialize)]
struct RawPosition {
    x: f32,
    y: f32,
}

impl TryFrom<RawPosition> for Position {
    type Error = PositionParseError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        let position = Position::new(raw.x, raw.y);
        if position.is_finite() {
            Ok(position)
        } else {
            Err(PositionParseError(position.to_string()))
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid position '{0}', expected '<x>:<y>'")]
pub struct PositionParseError(pub String);

impl FromStr for Position {
    type Err = PositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PositionParseError(s.to_string());
        let mut parts = s.split(':');
        let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(err());
        };
        let x: f32 = x.trim().parse().map_err(|_| err())?;
        let y: f32 = y.trim().parse().map_err(|_| err())?;
        let position = Position { x, y };
        if !position.is_finite() {
            return Err(err());
        }
        Ok(position)
    }
}

/// One row of the `Reports` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub id: i64,
    pub reporter_user_id: i64,
    pub reported_user_id: Option<i64>,
    pub message: String,
    pub position: Position,
    pub status: ReportStatus,
    /// Unix seconds at filing. Absent on rows that predate the `Created` column.
    pub created_time: Option<i64>,
}

impl Report {
    pub fn header<'a>(&self, config: &'a Config) -> &'a str {
        config.header_for(self.status)
    }

    /// Short list entry, `"<header> <id>"`.
    pub fn list_entry(&self, config: &Config) -> String {
        format!("{} {}", self.header(config), self.id)
    }
}

/// Orders reports for display: least-handled first, newest first within a status.
pub fn sort_for_display(reports: &mut [Report]) {
    reports.sort_by(|a, b| a.status.cmp(&b.status).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: i64, status: ReportStatus) -> Report {
        Report {
            id,
            reporter_user_id: 1,
            reported_user_id: None,
            message: format!("report {id}"),
            position: Position::default(),
            status,
            created_time: None,
        }
    }

    #[test]
    fn display_order_is_status_then_newest() {
        let mut reports = vec![
            report(1, ReportStatus::Handled),
            report(2, ReportStatus::Unread),
            report(3, ReportStatus::Unhandled),
            report(4, ReportStatus::Unread),
        ];
        sort_for_display(&mut reports);
        let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn position_round_trips_through_column_text() {
        let p = Position::new(1024.5, -16.0);
        assert_eq!(p.to_string(), "1024.5:-16");
        assert_eq!("1024.5:-16".parse::<Position>().unwrap(), p);
    }

    #[test]
    fn position_requires_exactly_two_numbers() {
        for bad in ["", "1", "1:2:3", "a:2", "1:", "NaN:1"] {
            assert!(bad.parse::<Position>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn json_position_must_be_finite() {
        let p: Position = serde_json::from_str(r#"{"x": 3.5, "y": -2}"#).unwrap();
        assert_eq!(p, Position::new(3.5, -2.0));
        // Out of f32 range, so it would decode as infinity.
        assert!(serde_json::from_str::<Position>(r#"{"x": 1e39, "y": 0}"#).is_err());
        assert!(!Position::new(f32::NAN, 0.0).is_finite());
    }

    #[test]
    fn list_entry_uses_status_header() {
        let cfg = Config::default();
        assert_eq!(report(7, ReportStatus::Unread).list_entry(&cfg), "[Unread] 7");
        assert_eq!(report(8, ReportStatus::Handled).list_entry(&cfg), " 8");
    }

    #[test]
    fn status_column_values() {
        assert_eq!(ReportStatus::from_i64(1), Some(ReportStatus::Unhandled));
        assert_eq!(ReportStatus::from_i64(3), None);
        assert_eq!(ReportStatus::Handled.as_i64(), 2);
    }
}
