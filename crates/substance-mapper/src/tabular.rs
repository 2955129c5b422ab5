//! Extracting substance names from uploaded tabular files.
//!
//! Uploads arrive as raw bytes plus the original file name; only
//! `.csv`, `.xlsx` and `.xls` are accepted. The substance-name column is
//! found heuristically: the first header containing a substance/name
//! keyword, else the first column.

use crate::error::{MapperError, Result};
use calamine::{Data, Reader};
use std::io::Cursor;

/// Header keywords that mark the substance-name column, checked in order.
const NAME_COLUMN_KEYWORDS: &[&str] = &["substance", "chemical", "gas", "name"];

/// Supported upload formats by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Xlsx,
    Xls,
}

impl TabularFormat {
    /// Determine the format from a file name; unsupported extensions are
    /// a validation error (4xx), not a processing failure.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = filename
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Ok(TabularFormat::Csv),
            "xlsx" => Ok(TabularFormat::Xlsx),
            "xls" => Ok(TabularFormat::Xls),
            _ => Err(MapperError::Validation(format!(
                "unsupported file extension '.{ext}' (accepted: .csv, .xlsx, .xls)"
            ))),
        }
    }
}

/// Extract the substance-name column from an uploaded file. Blank cells
/// are skipped; a file with a header but no data rows yields an empty
/// list (the caller decides whether that is an error).
pub fn extract_names(bytes: &[u8], filename: &str) -> Result<Vec<String>> {
    match TabularFormat::from_filename(filename)? {
        TabularFormat::Csv => extract_names_csv(bytes),
        TabularFormat::Xlsx | TabularFormat::Xls => extract_names_excel(bytes),
    }
}

fn extract_names_csv(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| MapperError::Validation(format!("unreadable CSV header: {e}")))?;
    let col = pick_name_column(&headers.iter().map(str::to_string).collect::<Vec<_>>());

    let mut names = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| MapperError::Validation(format!("unreadable CSV row: {e}")))?;
        if let Some(cell) = record.get(col) {
            let cell = cell.trim();
            if !cell.is_empty() {
                names.push(cell.to_string());
            }
        }
    }
    Ok(names)
}

fn extract_names_excel(bytes: &[u8]) -> Result<Vec<String>> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| MapperError::Validation(format!("unreadable spreadsheet: {e}")))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| MapperError::Validation("spreadsheet has no sheets".into()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| MapperError::Validation(format!("unreadable sheet '{sheet_name}': {e}")))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };
    let col = pick_name_column(&header);

    let mut names = Vec::new();
    for cells in rows {
        if let Some(cell) = cells.get(col) {
            let value = cell_to_string(cell);
            let value = value.trim();
            if !value.is_empty() {
                names.push(value.to_string());
            }
        }
    }
    Ok(names)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// Index of the column holding substance names: first header containing
/// one of the keywords (case-insensitive), else column 0.
fn pick_name_column(headers: &[String]) -> usize {
    for keyword in NAME_COLUMN_KEYWORDS {
        if let Some(idx) = headers
            .iter()
            .position(|h| h.to_lowercase().contains(keyword))
        {
            return idx;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_extension_is_accepted_case_insensitively() {
        assert_eq!(
            TabularFormat::from_filename("upload.CSV").unwrap(),
            TabularFormat::Csv
        );
        assert_eq!(
            TabularFormat::from_filename("report.xlsx").unwrap(),
            TabularFormat::Xlsx
        );
    }

    #[test]
    fn unsupported_extension_is_a_validation_error() {
        let err = TabularFormat::from_filename("notes.pdf").unwrap_err();
        assert!(matches!(err, MapperError::Validation(_)));
    }

    #[test]
    fn picks_the_keyword_column_over_the_first() {
        let headers = vec![
            "amount".to_string(),
            "substance name".to_string(),
            "unit".to_string(),
        ];
        assert_eq!(pick_name_column(&headers), 1);
    }

    #[test]
    fn falls_back_to_first_column_without_keywords() {
        let headers = vec!["a".to_string(), "b".to_string()];
        assert_eq!(pick_name_column(&headers), 0);
    }

    #[test]
    fn extracts_names_from_csv_bytes() {
        let bytes = b"amount,Chemical,unit\n12,Methane,t\n,  ,kg\n3,Ammonia,t\n";
        let names = extract_names(bytes, "emissions.csv").unwrap();
        assert_eq!(names, vec!["Methane".to_string(), "Ammonia".to_string()]);
    }

    #[test]
    fn csv_without_keyword_header_uses_first_column() {
        let bytes = b"col1,col2\nMethane,1\nAmmonia,2\n";
        let names = extract_names(bytes, "plain.csv").unwrap();
        assert_eq!(names, vec!["Methane".to_string(), "Ammonia".to_string()]);
    }
}
