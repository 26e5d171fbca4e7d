//! Coverage reporting
//!
//! Accounts for every input record after a run: which affect predictions were
//! matched, emitted unpaired or silently dropped, and which coded observations
//! made it into the synchronized stream. Unmatched counts are set differences
//! over record identities, never running tallies.
//!
//! The report is diagnostic; a run with unmatched records is still a success.

use crate::engine::StudentOutcome;
use crate::linker::LinkReport;
use crate::probability::AffectDiagnostics;
use crate::CONFLUENCE_VERSION;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Full accounting of one synchronization run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub run_id: String,
    pub generated_at: String,
    pub version: String,
    pub actions: ActionCoverage,
    pub affect: AffectCoverage,
    pub observations: ObservationCoverage,
    pub students: Vec<StudentCoverage>,
    /// Students without coded observations, emitted unchanged
    pub fast_path_students: Vec<String>,
    /// Students with action events but no affect predictions
    pub missing_from_affect: Vec<String>,
    /// Students with action events but no linked observations
    pub missing_from_observations: Vec<String>,
    /// Identifiers of coded rows with no session log entry
    pub unlinked_identifiers: Vec<String>,
    /// Affect predictions of students with no action events
    pub orphan_affect: usize,
    /// Linked observations of students with no action events
    pub orphan_observations: usize,
    pub affect_diagnostics: AffectDiagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionCoverage {
    /// Events read after exclusion
    pub input_events: usize,
    /// Rows of excluded students
    pub excluded: usize,
    pub output_rows: usize,
    pub unpaired_rows: usize,
}

impl ActionCoverage {
    /// Every input event is emitted and the only extra rows are unpaired ones
    pub fn is_conserved(&self) -> bool {
        self.output_rows == self.input_events + self.unpaired_rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffectCoverage {
    /// Predictions after idle filtering and exclusion
    pub total: usize,
    pub matched: usize,
    pub unpaired: usize,
    /// Neither attached nor emitted (orphans, fast-path students, past the sweep)
    pub dropped: usize,
    pub match_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationCoverage {
    /// Coded rows
    pub total: usize,
    pub linked: usize,
    pub unlinked: usize,
    /// Observations whose started time fell in an event window
    pub synchronized: usize,
    /// `total - synchronized`, so unlinked rows count here too
    pub unsynchronized: usize,
    pub sync_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentCoverage {
    pub student_id: String,
    pub fast_path: bool,
    pub action_events: usize,
    pub output_rows: usize,
    pub affect_records: usize,
    pub affect_matched: usize,
    pub affect_unpaired: usize,
    pub observations: usize,
    pub observations_synchronized: usize,
}

impl From<&StudentOutcome> for StudentCoverage {
    fn from(outcome: &StudentOutcome) -> Self {
        Self {
            student_id: outcome.student_id.clone(),
            fast_path: outcome.fast_path,
            action_events: outcome.action_events,
            output_rows: outcome.output_rows,
            affect_records: outcome.affect_records,
            affect_matched: outcome.matched_affect.len(),
            affect_unpaired: outcome.unpaired_affect.len(),
            observations: outcome.observations,
            observations_synchronized: outcome.started_observations.len(),
        }
    }
}

/// Everything the reporter needs from a finished run
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub action_events: usize,
    pub excluded_actions: usize,
    /// Record indices of every affect prediction in the stream
    pub affect_records: BTreeSet<usize>,
    pub affect_diagnostics: AffectDiagnostics,
    pub link: LinkReport,
    pub missing_from_affect: Vec<String>,
    pub missing_from_observations: Vec<String>,
    pub orphan_affect: usize,
    pub orphan_observations: usize,
}

/// Builds coverage reports stamped with a run identity
pub struct CoverageReporter {
    run_id: String,
}

impl Default for CoverageReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageReporter {
    /// Create a reporter with a fresh run id
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a reporter with a specific run id
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn compile(&self, outcomes: &[StudentOutcome], totals: RunTotals) -> CoverageReport {
        let matched: BTreeSet<usize> = outcomes
            .iter()
            .flat_map(|o| o.matched_affect.iter().copied())
            .collect();
        let unpaired: BTreeSet<usize> = outcomes
            .iter()
            .flat_map(|o| o.unpaired_affect.iter().copied())
            .collect();
        let accounted: BTreeSet<usize> = matched.union(&unpaired).copied().collect();
        let dropped = totals.affect_records.difference(&accounted).count();

        let synchronized: BTreeSet<u64> = outcomes
            .iter()
            .flat_map(|o| o.started_observations.iter().copied())
            .collect();

        let output_rows: usize = outcomes.iter().map(|o| o.output_rows).sum();
        let observation_total = totals.link.coded_rows;

        let report = CoverageReport {
            run_id: self.run_id.clone(),
            generated_at: Utc::now().to_rfc3339(),
            version: CONFLUENCE_VERSION.to_string(),
            actions: ActionCoverage {
                input_events: totals.action_events,
                excluded: totals.excluded_actions,
                output_rows,
                unpaired_rows: unpaired.len(),
            },
            affect: AffectCoverage {
                total: totals.affect_records.len(),
                matched: matched.len(),
                unpaired: unpaired.len(),
                dropped,
                match_ratio: ratio(matched.len(), totals.affect_records.len()),
            },
            observations: ObservationCoverage {
                total: observation_total,
                linked: totals.link.linked,
                unlinked: totals.link.unlinked.len(),
                synchronized: synchronized.len(),
                unsynchronized: observation_total.saturating_sub(synchronized.len()),
                sync_ratio: ratio(synchronized.len(), observation_total),
            },
            students: outcomes.iter().map(StudentCoverage::from).collect(),
            fast_path_students: outcomes
                .iter()
                .filter(|o| o.fast_path)
                .map(|o| o.student_id.clone())
                .collect(),
            missing_from_affect: totals.missing_from_affect,
            missing_from_observations: totals.missing_from_observations,
            unlinked_identifiers: totals.link.unlinked,
            orphan_affect: totals.orphan_affect,
            orphan_observations: totals.orphan_observations,
            affect_diagnostics: totals.affect_diagnostics,
        };

        report.log();
        report
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        1.0
    } else {
        part as f64 / whole as f64
    }
}

impl CoverageReport {
    /// Emit the run summary through `tracing`
    pub fn log(&self) {
        tracing::info!(
            "Observations not synchronized: {} of {}",
            self.observations.unsynchronized,
            self.observations.total
        );
        tracing::info!(
            "Affect predictions not synchronized: {} of {} ({} unpaired)",
            self.affect.total.saturating_sub(self.affect.matched),
            self.affect.total,
            self.affect.unpaired
        );
        if !self.missing_from_affect.is_empty() {
            tracing::warn!(
                "Students in the action log but not in affect data: {:?}",
                self.missing_from_affect
            );
        }
        if !self.missing_from_observations.is_empty() {
            tracing::warn!(
                "Students in the action log but not in coded observations: {:?}",
                self.missing_from_observations
            );
        }
        if self.orphan_affect + self.orphan_observations > 0 {
            tracing::warn!(
                "Records of students absent from the action log: {} affect, {} observations",
                self.orphan_affect,
                self.orphan_observations
            );
        }
        if !self.actions.is_conserved() {
            tracing::warn!(
                "Output rows {} != input events {} + unpaired rows {}",
                self.actions.output_rows,
                self.actions.input_events,
                self.actions.unpaired_rows
            );
        }
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Coverage Report")?;
        writeln!(f, "===============")?;
        writeln!(f, "Run:       {}", self.run_id)?;
        writeln!(f, "Generated: {}", self.generated_at)?;
        writeln!(f)?;
        writeln!(f, "Actions")?;
        writeln!(f, "  Input events:  {}", self.actions.input_events)?;
        writeln!(f, "  Excluded:      {}", self.actions.excluded)?;
        writeln!(f, "  Output rows:   {}", self.actions.output_rows)?;
        writeln!(f, "  Unpaired rows: {}", self.actions.unpaired_rows)?;
        writeln!(f)?;
        writeln!(f, "Affect predictions")?;
        writeln!(f, "  Total:    {}", self.affect.total)?;
        writeln!(
            f,
            "  Matched:  {} ({:.1}%)",
            self.affect.matched,
            self.affect.match_ratio * 100.0
        )?;
        writeln!(f, "  Unpaired: {}", self.affect.unpaired)?;
        writeln!(f, "  Dropped:  {}", self.affect.dropped)?;
        writeln!(f)?;
        writeln!(f, "Coded observations")?;
        writeln!(f, "  Total:          {}", self.observations.total)?;
        writeln!(f, "  Linked:         {}", self.observations.linked)?;
        writeln!(
            f,
            "  Synchronized:   {} ({:.1}%)",
            self.observations.synchronized,
            self.observations.sync_ratio * 100.0
        )?;
        writeln!(f, "  Unsynchronized: {}", self.observations.unsynchronized)?;
        writeln!(f)?;
        writeln!(f, "Orphans")?;
        writeln!(f, "  Affect:       {}", self.orphan_affect)?;
        writeln!(f, "  Observations: {}", self.orphan_observations)?;

        if !self.fast_path_students.is_empty() {
            writeln!(f)?;
            writeln!(f, "Without observations: {}", self.fast_path_students.join(", "))?;
        }
        if !self.missing_from_affect.is_empty() {
            writeln!(f, "Missing from affect:  {}", self.missing_from_affect.join(", "))?;
        }
        Ok(())
    }
}
