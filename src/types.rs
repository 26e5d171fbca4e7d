//! Core types for the Confluence pipeline
//!
//! This module defines the records that flow through each stage: the three
//! source streams (action events, affect observations, coded observations) and
//! the synchronized rows emitted by the engine.

use serde::Serialize;

/// One row of the behavioral action log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEvent {
    /// Position of the row in the input table
    pub record_index: usize,
    pub student_id: String,
    /// Normalized timestamp (ms since epoch)
    pub timestamp_ms: i64,
    /// Verbatim action log cells
    pub fields: Vec<String>,
}

/// One affect prediction after numeric normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffectObservation {
    /// Position of the row in the input table
    pub record_index: usize,
    pub student_id: String,
    /// Normalized timestamp (ms since epoch)
    pub timestamp_ms: i64,
    /// Probability per emotion category, in configured category order (0-1)
    pub probabilities: Vec<(String, f64)>,
    /// Category with the highest probability
    pub predicted_label: String,
    /// Output cells: raw row with normalized probabilities, plus the label
    pub fields: Vec<String>,
}

/// One human-coded observation linked to its session log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodedObservation {
    /// Link-time sequence number, unique across the run
    pub observation_id: u64,
    pub student_id: String,
    /// Assigned timestamp (ms since epoch, before offset correction)
    pub assigned_timestamp_ms: i64,
    /// Started timestamp (ms since epoch, before offset correction)
    pub started_timestamp_ms: i64,
    pub emotion: String,
    pub behavior: String,
    /// Observation type
    pub kind: String,
    /// Session file name fragment from the identifier
    pub filename: String,
    /// Assigned stamp as written in the identifier
    pub assigned_stamp: String,
    /// Started stamp as written in the identifier
    pub started_stamp: String,
    /// In-session observation index
    pub session_index: String,
    /// Transcript-code cells carried through unchanged
    pub source_fields: Vec<String>,
}

impl CodedObservation {
    /// Output cells in linked-stream column order
    pub fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.filename.clone(),
            self.assigned_stamp.clone(),
            self.started_stamp.clone(),
            self.session_index.clone(),
            self.observation_id.to_string(),
            self.student_id.clone(),
            self.emotion.clone(),
            self.behavior.clone(),
            self.kind.clone(),
        ];
        fields.extend(self.source_fields.iter().cloned());
        fields.push(self.assigned_timestamp_ms.to_string());
        fields.push(self.started_timestamp_ms.to_string());
        fields
    }
}

/// Special event marker written in the first output column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMarker {
    None,
    ObservationAssigned,
    ObservationStarted,
    UnpairedAffect,
}

impl EventMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventMarker::None => "",
            EventMarker::ObservationAssigned => "Observation Assigned",
            EventMarker::ObservationStarted => "Observation Started",
            EventMarker::UnpairedAffect => "Unpaired Affective Prediction",
        }
    }
}

/// A coded observation attached to an action event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationAttachment {
    pub observation: CodedObservation,
    /// Corrected assigned time fell inside the event's interval
    pub assigned: bool,
    /// Corrected started time fell inside the event's interval
    pub started: bool,
}

/// An action event with its attachment results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedEvent {
    pub event: ActionEvent,
    pub affect: Option<AffectObservation>,
    pub observation: Option<ObservationAttachment>,
}

impl AnnotatedEvent {
    pub fn new(event: ActionEvent) -> Self {
        Self {
            event,
            affect: None,
            observation: None,
        }
    }

    /// Marker derived from the observation attachment; "started" wins when both hold
    pub fn marker(&self) -> EventMarker {
        match &self.observation {
            Some(attachment) if attachment.started => EventMarker::ObservationStarted,
            Some(attachment) if attachment.assigned => EventMarker::ObservationAssigned,
            _ => EventMarker::None,
        }
    }
}

/// Output unit of the synchronization engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynchronizedRow {
    /// An action event, possibly annotated
    Event(AnnotatedEvent),
    /// An affect prediction that could not be attached to any event
    UnpairedAffect {
        student_id: String,
        affect: AffectObservation,
    },
}

impl SynchronizedRow {
    pub fn marker(&self) -> EventMarker {
        match self {
            SynchronizedRow::Event(annotated) => annotated.marker(),
            SynchronizedRow::UnpairedAffect { .. } => EventMarker::UnpairedAffect,
        }
    }

    pub fn student_id(&self) -> &str {
        match self {
            SynchronizedRow::Event(annotated) => &annotated.event.student_id,
            SynchronizedRow::UnpairedAffect { student_id, .. } => student_id,
        }
    }

    /// Timestamp of the row's anchor record
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            SynchronizedRow::Event(annotated) => annotated.event.timestamp_ms,
            SynchronizedRow::UnpairedAffect { affect, .. } => affect.timestamp_ms,
        }
    }

    pub fn as_event(&self) -> Option<&AnnotatedEvent> {
        match self {
            SynchronizedRow::Event(annotated) => Some(annotated),
            SynchronizedRow::UnpairedAffect { .. } => None,
        }
    }
}
