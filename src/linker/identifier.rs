//! Observation identifier convention
//!
//! Coded transcript rows identify their observation with a single string that
//! concatenates the session file name, the assigned stamp, the started stamp and
//! the in-session index, e.g.
//!
//! ```text
//! BB_Feb_Tablet3_2019.02.12.10.15.32.250 2019.02.12.10.16.01.500audioindex_obs_4.3gp
//! └─ filename ─┘ └──── assigned ────┘ └──── started ────┘            └index┘
//! ```
//!
//! (without the spaces). The string is split on the literal year token. This is
//! fragile by construction and is kept exactly as the recording tools emit it.

use crate::config::LinkerConfig;
use crate::error::SyncError;

/// Version of the identifier convention implemented here
pub const IDENTIFIER_CONVENTION_VERSION: u32 = 1;

/// Parts recovered from an observation identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationIdentifier {
    /// Fragment of the session log file name
    pub filename: String,
    /// Assigned stamp, matched verbatim against the session log
    pub assigned_stamp: String,
    /// Started stamp
    pub started_stamp: String,
    /// In-session observation index
    pub session_index: String,
}

impl ObservationIdentifier {
    /// Parse an identifier; `row` is only used for error reporting
    pub fn parse(identifier: &str, row: usize, config: &LinkerConfig) -> Result<Self, SyncError> {
        let unparseable = || SyncError::UnparseableIdentifier {
            row,
            identifier: identifier.to_string(),
        };
        let marker = config.year_marker.as_str();

        let parts: Vec<&str> = identifier.split(marker).collect();
        if parts.len() < 3 {
            return Err(unparseable());
        }

        let pieces: Vec<&str> = parts[2].split('_').collect();
        let started_piece = pieces.first().copied().unwrap_or_default();
        let index_piece = pieces.last().copied().unwrap_or_default();

        let session_index = index_piece.replace(config.index_suffix.as_str(), "");
        if session_index.is_empty() {
            return Err(unparseable());
        }

        Ok(Self {
            filename: parts[0].to_string(),
            assigned_stamp: format!("{}{}", marker, parts[1]),
            started_stamp: format!(
                "{}{}",
                marker,
                started_piece.replace(config.started_prefix.as_str(), "")
            ),
            session_index,
        })
    }
}
