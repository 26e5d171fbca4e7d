//! Affect stream adapter
//!
//! Maps affect detector rows to [`AffectObservation`]s: placeholder rows are
//! filtered, category cells are scaled onto [0,1], and a predicted label is
//! derived from the highest probability.

use crate::config::AffectLayout;
use crate::error::SyncError;
use crate::normalizer::normalize_timestamp;
use crate::probability::{parse_finite, predicted_label, scale_cell, AffectDiagnostics};
use crate::table::{cell, Table};
use crate::types::AffectObservation;

use super::{is_excluded, StreamAdapter};

/// Header appended for the derived label column
pub const PREDICTED_LABEL_HEADER: &str = "Predicted Affect";

/// Tolerance when comparing raw cells against the idle signature
const SIGNATURE_EPSILON: f64 = 1e-9;

/// Affect observations plus the header and diagnostics of the read
#[derive(Debug, Clone)]
pub struct AffectStream {
    /// Input header with the predicted label column appended
    pub header: Vec<String>,
    pub observations: Vec<AffectObservation>,
    pub diagnostics: AffectDiagnostics,
}

/// Affect stream adapter
pub struct AffectAdapter<'a> {
    layout: &'a AffectLayout,
    excluded_students: &'a [String],
}

impl<'a> AffectAdapter<'a> {
    pub fn new(layout: &'a AffectLayout, excluded_students: &'a [String]) -> Self {
        Self {
            layout,
            excluded_students,
        }
    }

    /// Placeholder predictions emitted before a student starts recording
    fn is_idle_prediction(&self, row: &[String]) -> bool {
        !self.layout.idle_signature.is_empty()
            && self.layout.idle_signature.iter().all(|sig| {
                row.get(sig.column)
                    .and_then(|c| parse_finite(c))
                    .is_some_and(|v| (v - sig.value).abs() < SIGNATURE_EPSILON)
            })
    }
}

impl StreamAdapter for AffectAdapter<'_> {
    type Output = AffectStream;

    fn adapt(&self, table: &Table) -> Result<AffectStream, SyncError> {
        let layout = self.layout;
        table.require_column(layout.student_column, "affect student id")?;
        table.require_column(layout.timestamp_column, "affect timestamp")?;
        for category in &layout.categories {
            table.require_column(category.column, "affect category")?;
        }

        let category_names: Vec<String> = layout
            .categories
            .iter()
            .map(|c| table.header[c.column].clone())
            .collect();

        let mut diagnostics = AffectDiagnostics {
            records_read: table.rows.len(),
            ..Default::default()
        };
        let mut observations = Vec::with_capacity(table.rows.len());

        for (record_index, row) in table.rows.iter().enumerate() {
            let student_id = cell(row, layout.student_column, "affect student id")?;
            if is_excluded(student_id, self.excluded_students) {
                diagnostics.excluded += 1;
                continue;
            }
            if self.is_idle_prediction(row) {
                diagnostics.idle_filtered += 1;
                continue;
            }

            let timestamp_ms = normalize_timestamp(
                cell(row, layout.timestamp_column, "affect timestamp")?,
                &layout.timestamp_format,
                layout.utc_offset_minutes,
            )?;

            // Exactly one cell per header column, so the label lands under its header
            let mut fields = row.clone();
            fields.resize(table.header.len(), String::new());

            let mut probabilities = Vec::with_capacity(layout.categories.len());
            for (category, name) in layout.categories.iter().zip(&category_names) {
                let raw = cell(row, category.column, "affect category")?;
                let probability = scale_cell(raw, category.scale, &mut diagnostics);
                diagnostics.record_scaled(name, probability);
                fields[category.column] = probability.to_string();
                probabilities.push((name.clone(), probability));
            }

            let label = predicted_label(&probabilities)
                .unwrap_or_default()
                .to_string();
            *diagnostics.label_counts.entry(label.clone()).or_insert(0) += 1;
            fields.push(label.clone());

            observations.push(AffectObservation {
                record_index,
                student_id: student_id.to_string(),
                timestamp_ms,
                probabilities,
                predicted_label: label,
                fields,
            });
        }

        tracing::info!(
            read = diagnostics.records_read,
            kept = observations.len(),
            idle = diagnostics.idle_filtered,
            excluded = diagnostics.excluded,
            "Normalized affect predictions"
        );
        if diagnostics.unparseable > 0 || diagnostics.clipped_low + diagnostics.clipped_high > 0 {
            tracing::warn!(
                unparseable = diagnostics.unparseable,
                clipped_low = diagnostics.clipped_low,
                clipped_high = diagnostics.clipped_high,
                "Recovered out-of-range affect values"
            );
        }

        let mut header = table.header.clone();
        header.push(PREDICTED_LABEL_HEADER.to_string());

        Ok(AffectStream {
            header,
            observations,
            diagnostics,
        })
    }
}
