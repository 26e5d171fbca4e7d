//! Action log adapter
//!
//! Maps action log rows to [`ActionEvent`]s with normalized timestamps.

use crate::config::ActionLogLayout;
use crate::error::SyncError;
use crate::normalizer::normalize_timestamp;
use crate::table::{cell, Table};
use crate::types::ActionEvent;

use super::{is_excluded, StreamAdapter};

/// Action events plus the header they were read under
#[derive(Debug, Clone)]
pub struct ActionStream {
    pub header: Vec<String>,
    pub events: Vec<ActionEvent>,
    /// Rows dropped because the student id is excluded
    pub excluded: usize,
}

/// Action log adapter
pub struct ActionLogAdapter<'a> {
    layout: &'a ActionLogLayout,
    excluded_students: &'a [String],
}

impl<'a> ActionLogAdapter<'a> {
    pub fn new(layout: &'a ActionLogLayout, excluded_students: &'a [String]) -> Self {
        Self {
            layout,
            excluded_students,
        }
    }
}

impl StreamAdapter for ActionLogAdapter<'_> {
    type Output = ActionStream;

    fn adapt(&self, table: &Table) -> Result<ActionStream, SyncError> {
        table.require_column(self.layout.student_column, "action student id")?;
        table.require_column(self.layout.timestamp_column, "action timestamp")?;

        let mut events = Vec::with_capacity(table.rows.len());
        let mut excluded = 0;

        for (record_index, row) in table.rows.iter().enumerate() {
            let student_id = cell(row, self.layout.student_column, "action student id")?;
            if is_excluded(student_id, self.excluded_students) {
                excluded += 1;
                continue;
            }

            let timestamp_ms = normalize_timestamp(
                cell(row, self.layout.timestamp_column, "action timestamp")?,
                &self.layout.timestamp_format,
                self.layout.utc_offset_minutes,
            )?;

            events.push(ActionEvent {
                record_index,
                student_id: student_id.to_string(),
                timestamp_ms,
                fields: row.clone(),
            });
        }

        if excluded > 0 {
            tracing::debug!("Dropped {} action rows from excluded students", excluded);
        }

        Ok(ActionStream {
            header: table.header.clone(),
            events,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::TimestampFormat;

    fn make_table() -> Table {
        let header: Vec<String> = ["Student", "Action", "When"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows: Vec<Vec<String>> = vec![
            vec!["A101".into(), "read".into(), "1000".into()],
            vec!["test1".into(), "read".into(), "2000".into()],
            vec!["A102".into(), "quiz".into(), "3000".into()],
        ];
        Table::new(header, rows)
    }

    fn layout() -> ActionLogLayout {
        ActionLogLayout {
            student_column: 0,
            timestamp_column: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_adapt_action_log() {
        let layout = layout();
        let excluded = vec!["test1".to_string()];
        let stream = ActionLogAdapter::new(&layout, &excluded)
            .adapt(&make_table())
            .unwrap();

        assert_eq!(stream.excluded, 1);
        assert_eq!(stream.events.len(), 2);
        assert_eq!(stream.events[0].student_id, "A101");
        assert_eq!(stream.events[0].timestamp_ms, 1000);
        assert_eq!(stream.events[1].record_index, 2);
        assert_eq!(stream.events[1].fields[1], "quiz");
    }

    #[test]
    fn test_malformed_timestamp_aborts() {
        let layout = ActionLogLayout {
            timestamp_format: TimestampFormat::pattern("%Y-%m-%d %H:%M:%S"),
            ..layout()
        };
        let result = ActionLogAdapter::new(&layout, &[]).adapt(&make_table());
        assert!(matches!(result, Err(SyncError::MalformedTimestamp { .. })));
    }

    #[test]
    fn test_missing_timestamp_column() {
        let layout = ActionLogLayout::default(); // timestamp column 7
        let result = ActionLogAdapter::new(&layout, &[]).adapt(&make_table());
        assert!(matches!(result, Err(SyncError::MissingColumn { index: 7, .. })));
    }

    #[test]
    fn test_short_row_is_structural_error() {
        let mut table = make_table();
        table.rows.push(vec!["A103".into()]);
        let layout = layout();
        let result = ActionLogAdapter::new(&layout, &[]).adapt(&table);
        assert!(matches!(result, Err(SyncError::MissingColumn { .. })));
    }
}
