//! Pipeline orchestration
//!
//! This module provides the public API for Confluence. It loads the three
//! streams, links coded observations, groups by student, synchronizes on the
//! worker pool and streams the merged rows to a single writer thread.

use crate::adapters::{ActionLogAdapter, ActionStream, AffectAdapter, AffectStream, StreamAdapter};
use crate::config::SyncConfig;
use crate::coverage::{CoverageReport, CoverageReporter, RunTotals};
use crate::encoder::RowEncoder;
use crate::engine::{self, StudentOutcome, StudentSync};
use crate::error::SyncError;
use crate::grouper::StreamGroups;
use crate::linker::{LinkReport, LinkedObservations, ObservationLinker, SessionLogDirectory};
use crate::table::Table;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;

/// Input locations of a synchronization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInputs {
    /// Behavioral action log (CSV with header)
    pub actions: PathBuf,
    /// Affect detector output (CSV with header)
    pub affect: PathBuf,
    /// Directory of observation-system session logs (headerless CSV)
    pub session_logs: PathBuf,
    /// Human-coded transcript rows (CSV with header)
    pub codes: PathBuf,
}

/// The three streams after adaptation and linking
#[derive(Debug, Clone)]
pub struct LoadedStreams {
    pub actions: ActionStream,
    pub affect: AffectStream,
    pub observations: LinkedObservations,
}

/// Synchronize the files of a run and write the merged stream to `output`.
///
/// # Example
/// ```ignore
/// let report = synchronize_files(&inputs, Path::new("merged.csv"), &SyncConfig::default())?;
/// println!("{}", report);
/// ```
pub fn synchronize_files(
    inputs: &SyncInputs,
    output: &Path,
    config: &SyncConfig,
) -> Result<CoverageReport, SyncError> {
    config.validate()?;
    let processor = SyncProcessor::new(config.clone());
    let streams = processor.load(inputs)?;

    let file = File::create(output).map_err(|e| SyncError::io(output, e))?;
    processor.execute(streams, BufWriter::new(file))
}

/// Link coded observations to session logs and write only the linked stream
pub fn link_files(
    session_logs: &Path,
    codes: &Path,
    output: &Path,
    config: &SyncConfig,
) -> Result<LinkReport, SyncError> {
    config.validate()?;
    let linked = SyncProcessor::new(config.clone()).link(session_logs, codes)?;
    linked.to_table().write_path(output)?;
    Ok(linked.report)
}

/// Runs the synchronization pipeline under one configuration
pub struct SyncProcessor {
    config: SyncConfig,
}

impl Default for SyncProcessor {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl SyncProcessor {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Link the coded observation table against a session log directory
    pub fn link(&self, session_logs: &Path, codes: &Path) -> Result<LinkedObservations, SyncError> {
        let logs = SessionLogDirectory::load(session_logs)?;
        let codes = Table::read_path(codes)?;
        ObservationLinker::new(&self.config.linker).link(&codes, &logs)
    }

    /// Read, adapt and link every input stream.
    ///
    /// Fails on the first malformed timestamp, missing column or unparseable
    /// identifier; nothing is written in that case.
    pub fn load(&self, inputs: &SyncInputs) -> Result<LoadedStreams, SyncError> {
        let excluded = &self.config.excluded_students;

        let actions = ActionLogAdapter::new(&self.config.action_log, excluded)
            .adapt(&Table::read_path(&inputs.actions)?)?;
        tracing::info!(
            "Loaded {} action events ({} excluded)",
            actions.events.len(),
            actions.excluded
        );

        let affect = AffectAdapter::new(&self.config.affect, excluded)
            .adapt(&Table::read_path(&inputs.affect)?)?;

        let observations = self.link(&inputs.session_logs, &inputs.codes)?;

        Ok(LoadedStreams {
            actions,
            affect,
            observations,
        })
    }

    /// Synchronize loaded streams and write the merged table to `writer`.
    ///
    /// Students are synchronized in parallel; a dedicated writer thread
    /// receives each finished student and writes in sorted student order.
    pub fn execute<W: Write + Send + 'static>(
        &self,
        streams: LoadedStreams,
        writer: W,
    ) -> Result<CoverageReport, SyncError> {
        let LoadedStreams {
            actions,
            affect,
            observations,
        } = streams;

        let encoder = RowEncoder::new(
            actions.header,
            affect.header,
            observations.header,
            self.config.action_log.student_column,
        );

        let mut totals = RunTotals {
            action_events: actions.events.len(),
            excluded_actions: actions.excluded,
            affect_records: affect.observations.iter().map(|a| a.record_index).collect(),
            affect_diagnostics: affect.diagnostics,
            link: observations.report,
            ..Default::default()
        };

        let groups = StreamGroups::partition(
            actions.events,
            affect.observations,
            observations.observations,
        );
        totals.missing_from_affect = groups.missing_from_affect();
        totals.missing_from_observations = groups.missing_from_observations();
        totals.orphan_affect = groups.orphan_affect;
        totals.orphan_observations = groups.orphan_observations;
        tracing::info!("Synchronizing {} students", groups.student_count());

        let (sender, receiver) = mpsc::channel();
        let writer_thread = thread::spawn(move || write_rows(&encoder, receiver, writer));

        let synchronized =
            engine::synchronize_into(&groups, &self.config.window, self.config.workers, sender);
        let written = writer_thread
            .join()
            .map_err(|_| SyncError::Writer("writer thread panicked".to_string()))?;
        synchronized?;
        let outcomes = written?;

        if outcomes.len() != groups.student_count() {
            return Err(SyncError::Writer(format!(
                "received {} of {} students",
                outcomes.len(),
                groups.student_count()
            )));
        }

        Ok(CoverageReporter::new().compile(&outcomes, totals))
    }
}

/// Writer loop: buffers out-of-order students and writes them by position
fn write_rows<W: Write>(
    encoder: &RowEncoder,
    receiver: Receiver<(usize, StudentSync)>,
    writer: W,
) -> Result<Vec<StudentOutcome>, SyncError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(encoder.header())?;

    let mut pending: BTreeMap<usize, StudentSync> = BTreeMap::new();
    let mut outcomes = Vec::new();
    let mut rows_written = 0;

    for (position, sync) in receiver {
        pending.insert(position, sync);

        while let Some(sync) = pending.remove(&outcomes.len()) {
            for row in &sync.rows {
                csv_writer.write_record(encoder.encode(row))?;
            }
            rows_written += sync.rows.len();
            outcomes.push(sync.outcome);
        }
    }

    csv_writer
        .flush()
        .map_err(|e| SyncError::Writer(e.to_string()))?;

    if !pending.is_empty() {
        return Err(SyncError::Writer(format!(
            "{} students arrived without their predecessors",
            pending.len()
        )));
    }

    tracing::info!(
        "Wrote {} rows for {} students",
        rows_written,
        outcomes.len()
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AffectLayout, CategoryColumn, CategoryScale};
    use std::fs;
    use tempfile::TempDir;

    // Corrected started time of the linked observation below
    const BASE: i64 = 1_549_970_160_000;

    fn config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.action_log.timestamp_column = 1;
        config.affect = AffectLayout {
            student_column: 0,
            timestamp_column: 1,
            categories: vec![
                CategoryColumn {
                    column: 2,
                    scale: CategoryScale::Logit,
                },
                CategoryColumn {
                    column: 3,
                    scale: CategoryScale::Logit,
                },
            ],
            idle_signature: vec![],
            ..Default::default()
        };
        config
    }

    fn write_inputs(dir: &TempDir) -> SyncInputs {
        let root = dir.path();
        let t = |offset: i64| (BASE + offset).to_string();

        let actions = format!(
            "Student,Timestamp,Action\n\
             S1,{},read\nS1,{},quiz\nS2,{},read\nS1,{},hint\nS1,{},done\nS2,{},read\ntest1,{},read\n",
            t(0),
            t(1000),
            t(0),
            t(60_000),
            t(90_000),
            t(100),
            t(0)
        );
        fs::write(root.join("actions.csv"), actions).unwrap();

        let affect = format!(
            "Student,Timestamp,Confused,Engaged\n\
             S1,{},2.0,0.1\nS1,{},0.0,1.0\nS2,{},0.5,0.5\ntest1,{},0.0,0.0\n",
            t(500),
            t(30_000),
            t(50),
            t(0)
        );
        fs::write(root.join("affect.csv"), affect).unwrap();

        let logs = root.join("logs");
        fs::create_dir(&logs).unwrap();
        fs::write(
            logs.join("tabletA_feb.csv"),
            "QRF,t,2019.02.12.10.15.32.250,,,,,Obs:4,,Student:S1,,Emotion:CONFUSED,Behavior:ON-TASK,Type:BROMP\n",
        )
        .unwrap();

        fs::write(
            root.join("codes.csv"),
            "Identifier,Note\n\
             tabletA2019.02.12.10.15.32.2502019.02.12.10.16.01.500audioindex_4.3gp,asked for help\n\
             tabletC2019.02.12.10.15.32.2502019.02.12.10.16.01.500audioindex_9.3gp,\n",
        )
        .unwrap();

        SyncInputs {
            actions: root.join("actions.csv"),
            affect: root.join("affect.csv"),
            session_logs: logs,
            codes: root.join("codes.csv"),
        }
    }

    #[test]
    fn test_synchronize_files() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);
        let output = dir.path().join("merged.csv");

        let report = synchronize_files(&inputs, &output, &config()).unwrap();
        let merged = Table::read_path(&output).unwrap();

        // marker + 3 action + 5 affect + 12 linked
        assert_eq!(merged.header.len(), 21);
        assert_eq!(merged.header[0], "Special Event Marker");
        assert!(merged.rows.iter().all(|r| r.len() == 21));

        let markers: Vec<&str> = merged.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(
            markers,
            vec![
                "",
                "Observation Started",
                "Unpaired Affective Prediction",
                "",
                "",
                "",
                ""
            ]
        );

        let students: Vec<&str> = merged.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(students, vec!["S1", "S1", "S1", "S1", "S1", "S2", "S2"]);

        // First event carries the prediction and its derived label
        assert_eq!(merged.rows[0][4], "S1");
        assert_eq!(merged.rows[0][8], "Confused");
        // Started row carries the linked observation
        assert_eq!(merged.rows[1][9], "tabletA");
        assert_eq!(merged.rows[1][15], "CONFUSED");
        assert_eq!(merged.rows[1][18], "asked for help");

        assert!(report.actions.is_conserved());
        assert_eq!(report.actions.input_events, 6);
        assert_eq!(report.actions.excluded, 1);
        assert_eq!(report.affect.total, 3);
        assert_eq!(report.affect.matched, 1);
        assert_eq!(report.affect.unpaired, 1);
        assert_eq!(report.affect.dropped, 1);
        assert_eq!(report.observations.total, 2);
        assert_eq!(report.observations.synchronized, 1);
        assert_eq!(report.observations.unsynchronized, 1);
        assert_eq!(report.fast_path_students, vec!["S2"]);
        assert_eq!(report.missing_from_observations, vec!["S2"]);
        assert_eq!(report.orphan_affect, 0);
        assert_eq!(report.orphan_observations, 0);
    }

    #[test]
    fn test_orphan_affect_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);
        let mut affect = fs::read_to_string(&inputs.affect).unwrap();
        affect.push_str(&format!("S9,{},0.3,0.4\n", BASE + 200));
        fs::write(&inputs.affect, affect).unwrap();
        let output = dir.path().join("merged.csv");

        let report = synchronize_files(&inputs, &output, &config()).unwrap();
        assert_eq!(report.orphan_affect, 1);
        assert_eq!(report.orphan_observations, 0);
        assert_eq!(report.affect.total, 4);
        assert_eq!(report.affect.dropped, 2);
        assert!(report.students.iter().all(|s| s.student_id != "S9"));
    }

    #[test]
    fn test_output_does_not_depend_on_workers() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);

        let mut outputs = Vec::new();
        for workers in [1, 4] {
            let config = SyncConfig {
                workers: Some(workers),
                ..config()
            };
            let output = dir.path().join(format!("merged-{workers}.csv"));
            synchronize_files(&inputs, &output, &config).unwrap();
            outputs.push(fs::read_to_string(&output).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_link_files() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);
        let output = dir.path().join("linked.csv");

        let report = link_files(&inputs.session_logs, &inputs.codes, &output, &config()).unwrap();
        assert_eq!(report.coded_rows, 2);
        assert_eq!(report.linked, 1);

        let linked = Table::read_path(&output).unwrap();
        assert_eq!(linked.rows.len(), 1);
        assert_eq!(linked.rows[0][5], "S1");
    }

    #[test]
    fn test_malformed_timestamp_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);
        fs::write(&inputs.actions, "Student,Timestamp\nS1,yesterday\n").unwrap();
        let output = dir.path().join("merged.csv");

        let result = synchronize_files(&inputs, &output, &config());
        assert!(matches!(result, Err(SyncError::MalformedTimestamp { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(&dir);
        let config = SyncConfig {
            workers: Some(0),
            ..config()
        };
        let result = synchronize_files(&inputs, &dir.path().join("out.csv"), &config);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
