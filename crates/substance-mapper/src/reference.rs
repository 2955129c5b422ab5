//! Loading the standard-substance reference table.
//!
//! The regulation table is the sole source of truth for the corpus. It
//! is read once at startup and never written by this subsystem; a
//! refresh means redeploying with new reference data.

use crate::error::{MapperError, Result};
use crate::types::StandardSubstance;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Default file name inside the configured data directory.
pub const REFERENCE_FILE: &str = "standard_substances.csv";

/// Load reference rows from a CSV file with at least `sid` and `name`
/// columns (an optional `category` column is carried through). Rows with
/// an empty sid or name are rejected: a broken reference table must fail
/// startup, not silently shrink the corpus.
pub fn load_reference_csv(path: &Path) -> Result<Vec<StandardSubstance>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        MapperError::Configuration(format!("cannot open reference table {}: {e}", path.display()))
    })?;

    let headers = reader
        .headers()
        .map_err(|e| MapperError::Configuration(format!("reference table has no header: {e}")))?
        .clone();
    let sid_col = find_column(&headers, "sid").ok_or_else(|| {
        MapperError::Configuration("reference table is missing a 'sid' column".into())
    })?;
    let name_col = find_column(&headers, "name").ok_or_else(|| {
        MapperError::Configuration("reference table is missing a 'name' column".into())
    })?;
    let category_col = find_column(&headers, "category");

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            MapperError::Configuration(format!("reference table row {} unreadable: {e}", row_idx + 2))
        })?;
        let sid = record.get(sid_col).unwrap_or("").trim();
        let name = record.get(name_col).unwrap_or("").trim();
        if sid.is_empty() || name.is_empty() {
            return Err(MapperError::Configuration(format!(
                "reference table row {} has an empty sid or name",
                row_idx + 2
            )));
        }
        if !seen.insert(sid.to_string()) {
            return Err(MapperError::Configuration(format!(
                "duplicate sid '{sid}' in reference table"
            )));
        }
        let category = category_col
            .and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        entries.push(StandardSubstance {
            sid: sid.to_string(),
            name: name.to_string(),
            category,
        });
    }

    if entries.is_empty() {
        return Err(MapperError::Configuration(format!(
            "reference table {} contains no rows",
            path.display()
        )));
    }

    info!(
        "Loaded {} standard substances from {}",
        entries.len(),
        path.display()
    );
    Ok(entries)
}

fn find_column(headers: &csv::StringRecord, wanted: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(wanted))
}
