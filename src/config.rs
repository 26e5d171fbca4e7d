//! Run configuration
//!
//! Every domain constant of a synchronization run lives here: the matching
//! window, the column layout of each input table, the observation identifier
//! convention and the worker pool size. Defaults reproduce the layout of the
//! classroom study exports; a TOML file can override any subset.

use crate::error::SyncError;
use crate::normalizer::TimestampFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Worker threads for per-student synchronization (None = one per core)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Test/debug student ids removed from the action log and affect stream
    pub excluded_students: Vec<String>,
    /// Matching window constants
    pub window: WindowConfig,
    /// Action log layout
    pub action_log: ActionLogLayout,
    /// Affect stream layout
    pub affect: AffectLayout,
    /// Observation linking convention
    pub linker: LinkerConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: None,
            excluded_students: ["test1", "test2", "test3", "test6"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            window: WindowConfig::default(),
            action_log: ActionLogLayout::default(),
            affect: AffectLayout::default(),
            linker: LinkerConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, SyncError> {
        let config: SyncConfig =
            toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        Self::from_toml(&text)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, SyncError> {
        toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.window.tolerance_ms < 0 {
            return Err(SyncError::Config(format!(
                "window.tolerance_ms must be non-negative, got {}",
                self.window.tolerance_ms
            )));
        }
        if self.workers == Some(0) {
            return Err(SyncError::Config("workers must be at least 1".to_string()));
        }
        if self.affect.categories.is_empty() {
            return Err(SyncError::Config(
                "affect.categories must name at least one column".to_string(),
            ));
        }
        if self.linker.year_marker.is_empty() {
            return Err(SyncError::Config(
                "linker.year_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tolerances used by the synchronization sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Maximum lead of an affect prediction over an action event (ms).
    /// Tied to the webcam sampling cadence of the affect detector.
    pub tolerance_ms: i64,
    /// Correction added to observation timestamps before comparison (ms).
    /// Compensates the observation tablet's clock offset.
    pub observation_offset_ms: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 20_000,
            observation_offset_ms: 3_600_000,
        }
    }
}

/// Column layout of the action log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionLogLayout {
    pub student_column: usize,
    pub timestamp_column: usize,
    pub timestamp_format: TimestampFormat,
    pub utc_offset_minutes: i32,
}

impl Default for ActionLogLayout {
    fn default() -> Self {
        Self {
            student_column: 0,
            timestamp_column: 7,
            timestamp_format: TimestampFormat::EpochMillis,
            utc_offset_minutes: 0,
        }
    }
}

/// How a raw affect cell is mapped onto [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryScale {
    /// Logistic transform of a logit
    Logit,
    /// Regression output clipped to [0,1]
    Clip,
}

/// One emotion category column of the affect stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryColumn {
    pub column: usize,
    pub scale: CategoryScale,
}

/// Raw cell value identifying a placeholder prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureValue {
    pub column: usize,
    pub value: f64,
}

/// Column layout and scaling of the affect stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectLayout {
    pub student_column: usize,
    pub timestamp_column: usize,
    pub timestamp_format: TimestampFormat,
    pub utc_offset_minutes: i32,
    /// Emotion categories; the header cell of each column names the category
    pub categories: Vec<CategoryColumn>,
    /// Rows matching every value here were produced before recording started.
    /// An empty signature disables the filter.
    pub idle_signature: Vec<SignatureValue>,
}

impl Default for AffectLayout {
    fn default() -> Self {
        let logit = |column| CategoryColumn {
            column,
            scale: CategoryScale::Logit,
        };
        let signature = |column, value| SignatureValue { column, value };

        Self {
            student_column: 1,
            timestamp_column: 9,
            timestamp_format: TimestampFormat::EpochMillis,
            utc_offset_minutes: 0,
            categories: vec![
                logit(10),
                logit(11),
                logit(12),
                logit(13),
                CategoryColumn {
                    column: 14,
                    scale: CategoryScale::Clip,
                },
                logit(15),
            ],
            idle_signature: vec![
                signature(10, -0.168),
                signature(11, 0.283),
                signature(12, 0.013),
                signature(13, 0.157),
                signature(15, 0.446),
            ],
        }
    }
}

/// Observation identifier convention and session log layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Literal token the identifier is split on (the study year)
    pub year_marker: String,
    /// Token removed from the started stamp
    pub started_prefix: String,
    /// Token removed from the in-session index
    pub index_suffix: String,
    /// Format of the assigned/started stamps
    pub timestamp_format: TimestampFormat,
    pub utc_offset_minutes: i32,
    pub session_log: SessionLogLayout,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            year_marker: "2019".to_string(),
            started_prefix: "audioindex".to_string(),
            index_suffix: ".3gp".to_string(),
            timestamp_format: TimestampFormat::pattern("%Y.%m.%d.%H.%M.%S%.f"),
            utc_offset_minutes: 0,
            session_log: SessionLogLayout::default(),
        }
    }
}

/// Column layout of the observation-system session logs.
///
/// Labelled cells (`Student:A101`) keep only the text after `label_separator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLogLayout {
    pub assigned_column: usize,
    pub index_column: usize,
    pub student_column: usize,
    pub emotion_column: usize,
    pub behavior_column: usize,
    pub type_column: usize,
    pub label_separator: char,
}

impl Default for SessionLogLayout {
    fn default() -> Self {
        Self {
            assigned_column: 2,
            index_column: 7,
            student_column: 9,
            emotion_column: 11,
            behavior_column: 12,
            type_column: 13,
            label_separator: ':',
        }
    }
}

impl SessionLogLayout {
    /// Widest column index a session log row must reach
    pub fn max_column(&self) -> usize {
        [
            self.assigned_column,
            self.index_column,
            self.student_column,
            self.emotion_column,
            self.behavior_column,
            self.type_column,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = SyncConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = SyncConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_override() {
        let config = SyncConfig::from_toml(
            r#"
            workers = 4
            excluded_students = []

            [window]
            tolerance_ms = 5000

            [action_log]
            timestamp_column = 3
            timestamp_format = "%Y-%m-%d %H:%M:%S"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, Some(4));
        assert!(config.excluded_students.is_empty());
        assert_eq!(config.window.tolerance_ms, 5000);
        assert_eq!(config.window.observation_offset_ms, 3_600_000);
        assert_eq!(config.action_log.timestamp_column, 3);
        assert_eq!(
            config.action_log.timestamp_format,
            TimestampFormat::pattern("%Y-%m-%d %H:%M:%S")
        );
        assert_eq!(config.affect.categories.len(), 6);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(SyncConfig::from_toml("workers = 0").is_err());
        assert!(SyncConfig::from_toml("[window]\ntolerance_ms = -1").is_err());
        assert!(SyncConfig::from_toml("[affect]\ncategories = []").is_err());
        assert!(SyncConfig::from_toml("[linker]\nyear_marker = \"\"").is_err());
        assert!(SyncConfig::from_toml("window = 3").is_err());
    }

    #[test]
    fn test_session_log_max_column() {
        assert_eq!(SessionLogLayout::default().max_column(), 13);
    }
}
