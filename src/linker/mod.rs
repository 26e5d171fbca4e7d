//! Observation linking
//!
//! Joins human-coded transcript rows to the observation-system session logs.
//! Each coded row names its session file fragment, assigned stamp and
//! in-session index through the identifier convention in [`identifier`]; the
//! matching session log row supplies the student, emotion, behavior and type.
//!
//! Pipeline: coded table + session log directory → [`ObservationLinker`] →
//! [`LinkedObservations`] (one [`CodedObservation`] per linked row).

pub mod identifier;

pub use identifier::{ObservationIdentifier, IDENTIFIER_CONVENTION_VERSION};

use crate::config::{LinkerConfig, SessionLogLayout};
use crate::error::SyncError;
use crate::normalizer::normalize_timestamp;
use crate::table::Table;
use crate::types::CodedObservation;
use serde::Serialize;
use std::path::Path;

/// Fixed leading columns of the linked observation stream
const LINKED_HEADER_PREFIX: [&str; 9] = [
    "Filename",
    "Observation Assigned",
    "Observation Started",
    "Observation Index",
    "Observation ID",
    "Student ID",
    "Emotion",
    "Behavior",
    "Type",
];

/// Trailing normalized-timestamp columns of the linked observation stream
const LINKED_HEADER_SUFFIX: [&str; 2] = ["Observation Assigned (ms)", "Observation Started (ms)"];

/// One observation-system session log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// All session logs of a recording period, ordered by file name
#[derive(Debug, Clone, Default)]
pub struct SessionLogDirectory {
    logs: Vec<SessionLog>,
}

impl SessionLogDirectory {
    /// Build from already-read logs
    pub fn from_logs(mut logs: Vec<SessionLog>) -> Self {
        logs.sort_by(|a, b| a.name.cmp(&b.name));
        Self { logs }
    }

    /// Read every file of a directory once
    pub fn load(dir: &Path) -> Result<Self, SyncError> {
        let entries = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;
        let mut logs = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| SyncError::io(dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let file = std::fs::File::open(&path).map_err(|e| SyncError::io(&path, e))?;
            logs.push(SessionLog {
                name: entry.file_name().to_string_lossy().into_owned(),
                rows: Table::read_rows(file)?,
            });
        }

        tracing::debug!("Loaded {} session logs from {}", logs.len(), dir.display());
        Ok(Self::from_logs(logs))
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Outcome counters of a linking pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkReport {
    /// Coded rows considered (blank trailing rows excluded)
    pub coded_rows: usize,
    /// Rows linked to a session log entry
    pub linked: usize,
    /// Identifiers of rows with no session log entry
    pub unlinked: Vec<String>,
}

impl LinkReport {
    /// Fraction of coded rows that were linked (1.0 when there were none)
    pub fn link_ratio(&self) -> f64 {
        if self.coded_rows == 0 {
            1.0
        } else {
            self.linked as f64 / self.coded_rows as f64
        }
    }
}

/// The linked observation stream
#[derive(Debug, Clone)]
pub struct LinkedObservations {
    pub header: Vec<String>,
    pub observations: Vec<CodedObservation>,
    pub report: LinkReport,
}

impl LinkedObservations {
    /// Render as a table in linked-stream column order
    pub fn to_table(&self) -> Table {
        Table::new(
            self.header.clone(),
            self.observations.iter().map(CodedObservation::to_fields).collect(),
        )
    }
}

/// Links coded transcript rows to session log entries
pub struct ObservationLinker<'a> {
    config: &'a LinkerConfig,
}

impl<'a> ObservationLinker<'a> {
    pub fn new(config: &'a LinkerConfig) -> Self {
        Self { config }
    }

    /// Header of the linked stream for a given coded table header
    pub fn linked_header(codes_header: &[String]) -> Vec<String> {
        let mut header: Vec<String> = LINKED_HEADER_PREFIX.iter().map(|s| s.to_string()).collect();
        header.extend(codes_header.iter().skip(1).cloned());
        header.extend(LINKED_HEADER_SUFFIX.iter().map(|s| s.to_string()));
        header
    }

    /// Link every coded row; unmatched rows are dropped and reported.
    ///
    /// Observation ids are assigned from 1 in coded-row order, so they are
    /// strictly increasing and unique within the run.
    pub fn link(
        &self,
        codes: &Table,
        logs: &SessionLogDirectory,
    ) -> Result<LinkedObservations, SyncError> {
        codes.require_column(0, "observation identifier")?;

        let mut report = LinkReport::default();
        let mut observations = Vec::new();

        for (row_index, row) in codes.rows.iter().enumerate() {
            let Some(identifier) = row.first().filter(|id| !id.trim().is_empty()) else {
                continue;
            };
            report.coded_rows += 1;

            // Row numbers in errors count the header as row 1
            let parsed = ObservationIdentifier::parse(identifier, row_index + 2, self.config)?;

            match self.find_entry(&parsed, logs) {
                Some(entry) => {
                    let observation_id = observations.len() as u64 + 1;
                    observations.push(self.build_observation(observation_id, parsed, entry, row)?);
                }
                None => {
                    tracing::debug!("No session log entry for observation {}", identifier);
                    report.unlinked.push(identifier.clone());
                }
            }
        }

        report.linked = observations.len();
        tracing::info!(
            "Matched {} observations of a possible {} ({:.1}%)",
            report.linked,
            report.coded_rows,
            report.link_ratio() * 100.0
        );

        Ok(LinkedObservations {
            header: Self::linked_header(&codes.header),
            observations,
            report,
        })
    }

    /// First session log row matching the identifier, scanning files in name order
    fn find_entry<'l>(
        &self,
        id: &ObservationIdentifier,
        logs: &'l SessionLogDirectory,
    ) -> Option<&'l [String]> {
        let layout = &self.config.session_log;
        // Candidate files are those whose name contains the filename fragment
        logs.logs
            .iter()
            .filter(|log| log.name.contains(id.filename.as_str()))
            .flat_map(|log| log.rows.iter())
            .find(|row| {
                row.get(layout.assigned_column)
                    .is_some_and(|stamp| *stamp == id.assigned_stamp)
                    && row
                        .get(layout.index_column)
                        .is_some_and(|cell| labelled(cell, layout) == id.session_index)
            })
            .map(Vec::as_slice)
    }

    fn build_observation(
        &self,
        observation_id: u64,
        id: ObservationIdentifier,
        entry: &[String],
        coded_row: &[String],
    ) -> Result<CodedObservation, SyncError> {
        let layout = &self.config.session_log;
        if entry.len() <= layout.max_column() {
            return Err(SyncError::missing_column(
                "session log",
                layout.max_column(),
                entry.len(),
            ));
        }
        let field = |column: usize| labelled(&entry[column], layout).to_string();

        let assigned_timestamp_ms = normalize_timestamp(
            &id.assigned_stamp,
            &self.config.timestamp_format,
            self.config.utc_offset_minutes,
        )?;
        let started_timestamp_ms = normalize_timestamp(
            &id.started_stamp,
            &self.config.timestamp_format,
            self.config.utc_offset_minutes,
        )?;

        Ok(CodedObservation {
            observation_id,
            student_id: field(layout.student_column),
            assigned_timestamp_ms,
            started_timestamp_ms,
            emotion: field(layout.emotion_column),
            behavior: field(layout.behavior_column),
            kind: field(layout.type_column),
            filename: id.filename,
            assigned_stamp: id.assigned_stamp,
            started_stamp: id.started_stamp,
            session_index: id.session_index,
            source_fields: coded_row.iter().skip(1).cloned().collect(),
        })
    }
}

/// Text after the last label separator (`"Student:A101"` → `"A101"`)
fn labelled<'c>(cell: &'c str, layout: &SessionLogLayout) -> &'c str {
    cell.rsplit(layout.label_separator).next().unwrap_or(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Session log row in the default layout
    fn log_row(assigned: &str, index: &str, student: &str, emotion: &str) -> Vec<String> {
        cells(&[
            "QRF",
            "tablet3",
            assigned,
            "",
            "",
            "",
            "",
            &format!("Obs:{index}"),
            "",
            &format!("Student:{student}"),
            "",
            &format!("Emotion:{emotion}"),
            "Behavior:ON-TASK",
            "Type:BROMP",
        ])
    }

    fn directory() -> SessionLogDirectory {
        SessionLogDirectory::from_logs(vec![
            SessionLog {
                name: "tabletB_2019_feb.csv".to_string(),
                rows: vec![log_row("2019.02.12.10.15.32.250", "4", "A102", "BORED")],
            },
            SessionLog {
                name: "tabletA_2019_feb.csv".to_string(),
                rows: vec![
                    log_row("2019.02.12.10.15.32.250", "3", "A101", "CONFUSED"),
                    log_row("2019.02.12.10.15.32.250", "4", "A101", "ENGAGED"),
                ],
            },
        ])
    }

    fn codes() -> Table {
        Table::new(
            cells(&["Identifier", "Help", "Strategy"]),
            vec![
                cells(&[
                    "tablet2019.02.12.10.15.32.2502019.02.12.10.16.01.500audioindex_4.3gp",
                    "yes",
                    "planning",
                ]),
                cells(&[
                    "tabletC2019.02.12.10.15.32.2502019.02.12.10.16.01.500audioindex_4.3gp",
                    "no",
                    "",
                ]),
                cells(&["", "", ""]),
                cells(&[
                    "tabletA2019.02.12.10.15.32.2502019.02.12.10.17.00.000audioindex_3.3gp",
                    "no",
                    "monitoring",
                ]),
            ],
        )
    }

    #[test]
    fn test_link_first_match_wins() {
        let config = LinkerConfig::default();
        let linked = ObservationLinker::new(&config)
            .link(&codes(), &directory())
            .unwrap();

        assert_eq!(linked.observations.len(), 2);

        // "tablet" matches both files; tabletA sorts first and has index 4
        let first = &linked.observations[0];
        assert_eq!(first.observation_id, 1);
        assert_eq!(first.student_id, "A101");
        assert_eq!(first.emotion, "ENGAGED");
        assert_eq!(first.behavior, "ON-TASK");
        assert_eq!(first.kind, "BROMP");
        assert_eq!(first.assigned_timestamp_ms, 1_549_966_532_250);
        assert_eq!(first.started_timestamp_ms, 1_549_966_561_500);
        assert_eq!(first.source_fields, cells(&["yes", "planning"]));

        let second = &linked.observations[1];
        assert_eq!(second.observation_id, 2);
        assert_eq!(second.emotion, "CONFUSED");
        assert_eq!(second.session_index, "3");
    }

    #[test]
    fn test_unlinked_rows_are_reported() {
        let config = LinkerConfig::default();
        let linked = ObservationLinker::new(&config)
            .link(&codes(), &directory())
            .unwrap();

        assert_eq!(linked.report.coded_rows, 3);
        assert_eq!(linked.report.linked, 2);
        assert_eq!(linked.report.unlinked.len(), 1);
        assert!(linked.report.unlinked[0].starts_with("tabletC"));
        assert!((linked.report.link_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_linked_header_and_fields_align() {
        let config = LinkerConfig::default();
        let linked = ObservationLinker::new(&config)
            .link(&codes(), &directory())
            .unwrap();

        assert_eq!(
            linked.header,
            cells(&[
                "Filename",
                "Observation Assigned",
                "Observation Started",
                "Observation Index",
                "Observation ID",
                "Student ID",
                "Emotion",
                "Behavior",
                "Type",
                "Help",
                "Strategy",
                "Observation Assigned (ms)",
                "Observation Started (ms)",
            ])
        );

        let table = linked.to_table();
        assert!(table.rows.iter().all(|row| row.len() == table.header.len()));
        assert_eq!(table.rows[0][0], "tablet");
        assert_eq!(table.rows[0][4], "1");
    }

    #[test]
    fn test_unparseable_identifier_fails() {
        let config = LinkerConfig::default();
        let codes = Table::new(cells(&["Identifier"]), vec![cells(&["garbled"])]);
        let result = ObservationLinker::new(&config).link(&codes, &directory());
        assert!(matches!(
            result,
            Err(SyncError::UnparseableIdentifier { row: 2, .. })
        ));
    }

    #[test]
    fn test_malformed_stamp_fails() {
        let config = LinkerConfig::default();
        let directory = SessionLogDirectory::from_logs(vec![SessionLog {
            name: "tabletA".to_string(),
            rows: vec![log_row("2019-bad", "1", "A101", "BORED")],
        }]);
        let codes = Table::new(
            cells(&["Identifier"]),
            vec![cells(&["tabletA2019-bad2019.02.12.10.16.01.500audioindex_1.3gp"])],
        );
        let result = ObservationLinker::new(&config).link(&codes, &directory);
        assert!(matches!(result, Err(SyncError::MalformedTimestamp { .. })));
    }

    #[test]
    fn test_short_session_log_row_fails() {
        let config = LinkerConfig::default();
        let mut row = log_row("2019.02.12.10.15.32.250", "4", "A101", "BORED");
        row.truncate(10);
        let directory = SessionLogDirectory::from_logs(vec![SessionLog {
            name: "tabletA".to_string(),
            rows: vec![row],
        }]);
        let result = ObservationLinker::new(&config).link(&codes(), &directory);
        assert!(matches!(
            result,
            Err(SyncError::MissingColumn {
                index: 13,
                width: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tabletA.csv"),
            "QRF,t,2019.02.12.10.15.32.250,,,,,Obs:1,,Student:A1,,Emotion:X,Behavior:Y,Type:Z\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let logs = SessionLogDirectory::load(dir.path()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs.logs[0].rows[0][9], "Student:A1");
    }
}
