//! Synchronization engine
//!
//! A forward-only sweep over each student's action events. Two cursors walk
//! the student's affect predictions and coded observations; at every event the
//! cursors catch up, affect records that fall strictly between two events
//! without being close to either are drained as unpaired rows, and whatever
//! lies inside the event's window is attached.
//!
//! The sweep for a single event is the pure function [`sweep_event`]; cursor
//! state is threaded through explicitly as [`SweepCursors`]. Students are
//! independent and are processed in parallel by [`synchronize`].

use crate::config::WindowConfig;
use crate::error::SyncError;
use crate::grouper::{StreamGroups, StudentPartition};
use crate::types::{AnnotatedEvent, ObservationAttachment, SynchronizedRow};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::mpsc::{self, Sender};

/// Cursor state of one student's sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCursors {
    /// Current coded observation
    pub observation: usize,
    /// Current affect record; equal to the stream length once exhausted
    pub affect: usize,
    /// The current affect record is already attached to an earlier event
    pub affect_claimed: bool,
}

/// Result of sweeping one action event
#[derive(Debug, Clone, PartialEq)]
pub struct SweepStep {
    /// Cursor state after the event
    pub cursors: SweepCursors,
    /// The annotated event followed by any drained unpaired rows
    pub rows: Vec<SynchronizedRow>,
    /// Record index of the affect prediction attached to the event
    pub attached_affect: Option<usize>,
    /// Id of the observation that started during the event
    pub started_observation: Option<u64>,
    /// Record indices of affect predictions emitted as unpaired rows
    pub unpaired_affect: Vec<usize>,
}

/// Per-student accounting gathered during the sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentOutcome {
    pub student_id: String,
    /// No coded observations; events were emitted unchanged
    pub fast_path: bool,
    pub action_events: usize,
    pub affect_records: usize,
    pub observations: usize,
    pub output_rows: usize,
    /// Record indices of affect predictions attached to an event
    pub matched_affect: BTreeSet<usize>,
    /// Record indices of affect predictions emitted as unpaired rows
    pub unpaired_affect: BTreeSet<usize>,
    /// Ids of observations whose started time fell inside an event window
    pub started_observations: BTreeSet<u64>,
}

/// Output of one student's sweep
#[derive(Debug, Clone, PartialEq)]
pub struct StudentSync {
    pub rows: Vec<SynchronizedRow>,
    pub outcome: StudentOutcome,
}

/// Sweep one action event of a partition.
///
/// The last event of a partition has no upper window bound and is emitted
/// without attachment attempts.
pub fn sweep_event(
    partition: &StudentPartition,
    index: usize,
    cursors: SweepCursors,
    window: &WindowConfig,
) -> SweepStep {
    let event = &partition.actions[index];
    let mut step = SweepStep {
        cursors,
        rows: Vec::new(),
        attached_affect: None,
        started_observation: None,
        unpaired_affect: Vec::new(),
    };

    let Some(next) = partition.actions.get(index + 1) else {
        step.rows
            .push(SynchronizedRow::Event(AnnotatedEvent::new(event.clone())));
        return step;
    };

    let ts = event.timestamp_ms;
    let next_ts = next.timestamp_ms;
    let offset = window.observation_offset_ms;
    let observations = &partition.observations;
    let affect = &partition.affect;
    let mut cursors = cursors;

    // Catch up with observations that started before this event
    while cursors.observation + 1 < observations.len()
        && ts
            > observations[cursors.observation]
                .started_timestamp_ms
                .saturating_add(offset)
    {
        cursors.observation += 1;
    }

    while cursors.affect + 1 < affect.len() && ts > affect[cursors.affect].timestamp_ms {
        cursors.affect += 1;
        cursors.affect_claimed = false;
    }

    // Predictions too far ahead of this event but before the next one
    let mut drained = Vec::new();
    while let Some(record) = affect.get(cursors.affect) {
        if record.timestamp_ms.saturating_sub(ts) <= window.tolerance_ms
            || record.timestamp_ms >= next_ts
        {
            break;
        }
        if !cursors.affect_claimed {
            step.unpaired_affect.push(record.record_index);
            drained.push(SynchronizedRow::UnpairedAffect {
                student_id: partition.student_id.clone(),
                affect: record.clone(),
            });
        }
        cursors.affect += 1;
        cursors.affect_claimed = false;
    }

    let mut annotated = AnnotatedEvent::new(event.clone());
    let in_window = |t: i64| ts <= t && t < next_ts;

    if let Some(observation) = observations.get(cursors.observation) {
        let assigned = in_window(observation.assigned_timestamp_ms.saturating_add(offset));
        let started = in_window(observation.started_timestamp_ms.saturating_add(offset));
        if started {
            step.started_observation = Some(observation.observation_id);
        }
        if assigned || started {
            annotated.observation = Some(ObservationAttachment {
                observation: observation.clone(),
                assigned,
                started,
            });
        }
    }

    if let Some(record) = affect.get(cursors.affect) {
        let gap = record.timestamp_ms.saturating_sub(ts);
        if !cursors.affect_claimed && (0..=window.tolerance_ms).contains(&gap) {
            annotated.affect = Some(record.clone());
            step.attached_affect = Some(record.record_index);
            cursors.affect_claimed = true;
        }
    }

    step.rows.push(SynchronizedRow::Event(annotated));
    step.rows.extend(drained);
    step.cursors = cursors;
    step
}

/// Synchronize one student's partition
pub fn synchronize_student(partition: &StudentPartition, window: &WindowConfig) -> StudentSync {
    let mut outcome = StudentOutcome {
        student_id: partition.student_id.clone(),
        fast_path: partition.observations.is_empty(),
        action_events: partition.actions.len(),
        affect_records: partition.affect.len(),
        observations: partition.observations.len(),
        ..Default::default()
    };

    if outcome.fast_path {
        let rows: Vec<SynchronizedRow> = partition
            .actions
            .iter()
            .cloned()
            .map(|e| SynchronizedRow::Event(AnnotatedEvent::new(e)))
            .collect();
        outcome.output_rows = rows.len();
        tracing::debug!(
            "Student {} has no coded observations; emitted {} events unchanged",
            partition.student_id,
            rows.len()
        );
        return StudentSync { rows, outcome };
    }

    let mut rows = Vec::with_capacity(partition.actions.len());
    let mut cursors = SweepCursors::default();

    for index in 0..partition.actions.len() {
        let step = sweep_event(partition, index, cursors, window);
        debug_assert!(step.cursors.observation >= cursors.observation);
        debug_assert!(step.cursors.affect >= cursors.affect);

        cursors = step.cursors;
        outcome.matched_affect.extend(step.attached_affect);
        outcome.started_observations.extend(step.started_observation);
        outcome.unpaired_affect.extend(step.unpaired_affect);
        rows.extend(step.rows);
    }

    outcome.output_rows = rows.len();
    tracing::debug!(
        "Student {}: {} rows, {} affect matched, {} unpaired, {} observations started",
        partition.student_id,
        outcome.output_rows,
        outcome.matched_affect.len(),
        outcome.unpaired_affect.len(),
        outcome.started_observations.len()
    );

    StudentSync { rows, outcome }
}

/// Synchronize every partition on a bounded worker pool, sending each result
/// with its position in sorted student order.
///
/// `workers = None` uses one thread per core. Results arrive in completion
/// order; receivers restore student order from the position.
pub fn synchronize_into(
    groups: &StreamGroups,
    window: &WindowConfig,
    workers: Option<usize>,
    sender: Sender<(usize, StudentSync)>,
) -> Result<(), SyncError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .build()
        .map_err(|e| SyncError::WorkerPool(e.to_string()))?;

    let partitions: Vec<&StudentPartition> = groups.partitions.values().collect();
    tracing::debug!(
        "Synchronizing {} students on {} workers",
        partitions.len(),
        pool.current_num_threads()
    );

    pool.install(|| {
        partitions
            .par_iter()
            .enumerate()
            .for_each_with(sender, |tx, (position, partition)| {
                // A closed channel means the receiver failed; it reports the error
                let _ = tx.send((position, synchronize_student(partition, window)));
            })
    });

    Ok(())
}

/// Synchronize every partition and return the results in sorted student order
pub fn synchronize(
    groups: &StreamGroups,
    window: &WindowConfig,
    workers: Option<usize>,
) -> Result<Vec<StudentSync>, SyncError> {
    let (sender, receiver) = mpsc::channel();
    synchronize_into(groups, window, workers, sender)?;

    let mut results: Vec<(usize, StudentSync)> = receiver.into_iter().collect();
    results.sort_by_key(|(position, _)| *position);
    Ok(results.into_iter().map(|(_, sync)| sync).collect())
}
