//! Stream grouping
//!
//! Partitions the three record streams by student. Partitions exist only for
//! students present in the action log; affect and observation records of other
//! students are orphans and only counted.

use crate::types::{ActionEvent, AffectObservation, CodedObservation};
use std::collections::{BTreeMap, BTreeSet};

/// All records of one student, each stream sorted chronologically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentPartition {
    pub student_id: String,
    /// Sorted by timestamp
    pub actions: Vec<ActionEvent>,
    /// Sorted by timestamp
    pub affect: Vec<AffectObservation>,
    /// Sorted by started timestamp
    pub observations: Vec<CodedObservation>,
}

/// Per-student partitions plus what fell outside them
#[derive(Debug, Clone, Default)]
pub struct StreamGroups {
    /// Partitions in sorted student order
    pub partitions: BTreeMap<String, StudentPartition>,
    /// Affect records whose student has no action events
    pub orphan_affect: usize,
    /// Observations whose student has no action events
    pub orphan_observations: usize,
    /// Every student seen in the affect stream
    pub affect_students: BTreeSet<String>,
    /// Every student seen in the linked observation stream
    pub observation_students: BTreeSet<String>,
}

impl StreamGroups {
    /// Group the three streams by student.
    ///
    /// All sorts are stable so records with equal timestamps keep input order.
    pub fn partition(
        actions: Vec<ActionEvent>,
        affect: Vec<AffectObservation>,
        observations: Vec<CodedObservation>,
    ) -> Self {
        let mut groups = Self::default();

        for event in actions {
            groups
                .partitions
                .entry(event.student_id.clone())
                .or_insert_with(|| StudentPartition {
                    student_id: event.student_id.clone(),
                    ..Default::default()
                })
                .actions
                .push(event);
        }

        for record in affect {
            groups.affect_students.insert(record.student_id.clone());
            match groups.partitions.get_mut(&record.student_id) {
                Some(partition) => partition.affect.push(record),
                None => groups.orphan_affect += 1,
            }
        }

        for observation in observations {
            groups
                .observation_students
                .insert(observation.student_id.clone());
            match groups.partitions.get_mut(&observation.student_id) {
                Some(partition) => partition.observations.push(observation),
                None => groups.orphan_observations += 1,
            }
        }

        for partition in groups.partitions.values_mut() {
            partition.actions.sort_by_key(|e| e.timestamp_ms);
            partition.affect.sort_by_key(|a| a.timestamp_ms);
            partition.observations.sort_by_key(|o| o.started_timestamp_ms);
        }

        if groups.orphan_affect + groups.orphan_observations > 0 {
            tracing::debug!(
                "Ignored {} affect and {} observation records of students without actions",
                groups.orphan_affect,
                groups.orphan_observations
            );
        }

        groups
    }

    /// Students with action events but no affect predictions
    pub fn missing_from_affect(&self) -> Vec<String> {
        self.partitions
            .keys()
            .filter(|s| !self.affect_students.contains(*s))
            .cloned()
            .collect()
    }

    /// Students with action events but no linked observations
    pub fn missing_from_observations(&self) -> Vec<String> {
        self.partitions
            .keys()
            .filter(|s| !self.observation_students.contains(*s))
            .cloned()
            .collect()
    }

    pub fn student_count(&self) -> usize {
        self.partitions.len()
    }
}
