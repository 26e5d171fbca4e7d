//! Output encoding
//!
//! Flattens synchronized rows into the merged output layout:
//!
//! ```text
//! Special Event Marker | action log columns | affect columns | linked observation columns
//! ```
//!
//! Every row has the full header width; blocks without an attachment are blank.

use crate::types::{AnnotatedEvent, SynchronizedRow};

/// Header of the marker column
pub const MARKER_HEADER: &str = "Special Event Marker";

/// Encoder for the merged output stream
#[derive(Debug, Clone)]
pub struct RowEncoder {
    action_header: Vec<String>,
    affect_header: Vec<String>,
    linked_header: Vec<String>,
    /// Action column that carries the student id of unpaired rows
    student_column: usize,
}

impl RowEncoder {
    pub fn new(
        action_header: Vec<String>,
        affect_header: Vec<String>,
        linked_header: Vec<String>,
        student_column: usize,
    ) -> Self {
        Self {
            action_header,
            affect_header,
            linked_header,
            student_column,
        }
    }

    /// Full output header
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.width());
        header.push(MARKER_HEADER.to_string());
        header.extend(self.action_header.iter().cloned());
        header.extend(self.affect_header.iter().cloned());
        header.extend(self.linked_header.iter().cloned());
        header
    }

    pub fn width(&self) -> usize {
        1 + self.action_header.len() + self.affect_header.len() + self.linked_header.len()
    }

    /// Encode one synchronized row
    pub fn encode(&self, row: &SynchronizedRow) -> Vec<String> {
        let mut cells = Vec::with_capacity(self.width());
        cells.push(row.marker().as_str().to_string());

        match row {
            SynchronizedRow::Event(annotated) => self.encode_event(annotated, &mut cells),
            SynchronizedRow::UnpairedAffect { student_id, affect } => {
                let mut action = vec![String::new(); self.action_header.len()];
                if let Some(cell) = action.get_mut(self.student_column) {
                    cell.clone_from(student_id);
                }
                cells.extend(action);
                push_block(&mut cells, &affect.fields, self.affect_header.len());
                push_block(&mut cells, &[], self.linked_header.len());
            }
        }

        cells
    }

    fn encode_event(&self, annotated: &AnnotatedEvent, cells: &mut Vec<String>) {
        push_block(cells, &annotated.event.fields, self.action_header.len());

        match &annotated.affect {
            Some(affect) => push_block(cells, &affect.fields, self.affect_header.len()),
            None => push_block(cells, &[], self.affect_header.len()),
        }

        match &annotated.observation {
            Some(attachment) => push_block(
                cells,
                &attachment.observation.to_fields(),
                self.linked_header.len(),
            ),
            None => push_block(cells, &[], self.linked_header.len()),
        }
    }
}

/// Append `fields` padded or truncated to exactly `width` cells
fn push_block(cells: &mut Vec<String>, fields: &[String], width: usize) {
    cells.extend(fields.iter().take(width).cloned());
    let missing = width.saturating_sub(fields.len());
    cells.extend(std::iter::repeat(String::new()).take(missing));
}
