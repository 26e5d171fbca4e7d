//! Delimited tables
//!
//! Thin layer over the `csv` crate: every input stream is first read into a
//! [`Table`] of string cells, and adapters pick the columns they need.

use crate::error::SyncError;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::io::{Read, Write};
use std::path::Path;

/// An in-memory delimited table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Read a table whose first record is a header
    pub fn read<R: Read>(reader: R) -> Result<Self, SyncError> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = record_to_cells(csv_reader.headers()?);
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            if is_blank(&record) {
                continue;
            }
            rows.push(record_to_cells(&record));
        }

        Ok(Self { header, rows })
    }

    /// Read a table file whose first record is a header
    pub fn read_path(path: &Path) -> Result<Self, SyncError> {
        let file = std::fs::File::open(path).map_err(|e| SyncError::io(path, e))?;
        Self::read(file)
    }

    /// Read headerless rows (observation session logs)
    pub fn read_rows<R: Read>(reader: R) -> Result<Vec<Vec<String>>, SyncError> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            if !is_blank(&record) {
                rows.push(record_to_cells(&record));
            }
        }
        Ok(rows)
    }

    /// Ensure the header reaches a column the caller depends on
    pub fn require_column(&self, index: usize, role: &str) -> Result<(), SyncError> {
        if index < self.header.len() {
            Ok(())
        } else {
            Err(SyncError::missing_column(role, index, self.header.len()))
        }
    }

    /// Write header and rows
    pub fn write<W: Write>(&self, writer: W) -> Result<(), SyncError> {
        let mut csv_writer = WriterBuilder::new().flexible(true).from_writer(writer);
        csv_writer.write_record(&self.header)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer
            .flush()
            .map_err(|e| SyncError::Writer(e.to_string()))
    }

    pub fn write_path(&self, path: &Path) -> Result<(), SyncError> {
        let file = std::fs::File::create(path).map_err(|e| SyncError::io(path, e))?;
        self.write(file)
    }
}

/// Cell of a row, failing with `MissingColumn` when the row is too short
pub fn cell<'a>(row: &'a [String], index: usize, role: &str) -> Result<&'a str, SyncError> {
    row.get(index)
        .map(String::as_str)
        .ok_or_else(|| SyncError::missing_column(role, index, row.len()))
}

fn record_to_cells(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_skips_blank_rows() {
        let data = "id,name\n1,alpha\n,\n2,\"beta, gamma\"\n";
        let table = Table::read(data.as_bytes()).unwrap();

        assert_eq!(table.header, vec!["id", "name"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["1".to_string(), "alpha".to_string()],
                vec!["2".to_string(), "beta, gamma".to_string()],
            ]
        );
    }

    #[test]
    fn test_read_rows_without_header() {
        let rows = Table::read_rows("a,b,c\nd,e\n".as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["d", "e"]);
    }

    #[test]
    fn test_require_column() {
        let table = Table::new(vec!["a".into(), "b".into()], vec![]);
        assert!(table.require_column(1, "timestamp").is_ok());

        let err = table.require_column(7, "timestamp").unwrap_err();
        assert!(matches!(
            err,
            SyncError::MissingColumn { index: 7, width: 2, .. }
        ));
    }

    #[test]
    fn test_write_round_trip() {
        let table = Table::new(
            vec!["x".into(), "y".into()],
            vec![vec!["1".into(), "two, three".into()]],
        );
        let mut buffer = Vec::new();
        table.write(&mut buffer).unwrap();

        let parsed = Table::read(buffer.as_slice()).unwrap();
        assert_eq!(parsed, table);
    }
}
