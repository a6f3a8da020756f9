use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_COLUMN: &str = "SKU";
pub const DEFAULT_NAME_COLUMN: &str = "productName";
pub const DEFAULT_DESCRIPTION_COLUMN: &str = "description";
pub const DEFAULT_IMAGE_URL_COLUMN: &str = "imageURL";

/// Column appended to the skip report. Input files may not use it.
pub const FAILURE_REASON_COLUMN: &str = "failureReason";

/// Tabular file format, chosen by extension. Anything unrecognised is CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Workbook,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("xlsx" | "xlsm" | "xls" | "ods") => Self::Workbook,
            _ => Self::Csv,
        }
    }

    /// Extension of a report written in this format.
    pub fn report_extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Workbook => "xlsx",
        }
    }
}

const PLACEHOLDER_ROW_INDEX: usize = usize::MAX;

const NULL_LIKE_CELLS: &[&str] = &["nan", "null", "none"];

/// Names of the four columns the pipeline reads. Everything else is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub key: String,
    pub name: String,
    pub description: String,
    pub image_url: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY_COLUMN.to_string(),
            name: DEFAULT_NAME_COLUMN.to_string(),
            description: DEFAULT_DESCRIPTION_COLUMN.to_string(),
            image_url: DEFAULT_IMAGE_URL_COLUMN.to_string(),
        }
    }
}

impl ColumnMap {
    pub fn required(&self) -> [&str; 4] {
        [
            self.key.as_str(),
            self.name.as_str(),
            self.description.as_str(),
            self.image_url.as_str(),
        ]
    }
}

/// One spreadsheet row with its derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub key: String,
    pub row_index: usize,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub columns: IndexMap<String, String>,
}

impl ProductRecord {
    /// Builds a record from already-normalized cells. An empty key cell falls
    /// back to the positional key for `row_index`.
    pub fn from_row(row_index: usize, columns: IndexMap<String, String>, map: &ColumnMap) -> Self {
        let cell = |name: &str| columns.get(name).cloned().unwrap_or_default();
        let key = Some(cell(&map.key))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| positional_key(row_index));
        Self {
            name: cell(&map.name),
            description: cell(&map.description),
            image_url: cell(&map.image_url),
            key,
            row_index,
            columns,
        }
    }

    /// Row for a result key that matches no loaded record: only the key column is populated.
    pub fn placeholder(key: &str, column_names: &[String], map: &ColumnMap) -> Self {
        let columns = column_names
            .iter()
            .map(|column| {
                let value = if *column == map.key {
                    key.to_string()
                } else {
                    String::new()
                };
                (column.clone(), value)
            })
            .collect();
        Self {
            key: key.to_string(),
            row_index: PLACEHOLDER_ROW_INDEX,
            name: String::new(),
            description: String::new(),
            image_url: String::new(),
            columns,
        }
    }

    /// True for rows synthesized for result keys that match no input row.
    pub fn is_placeholder(&self) -> bool {
        self.row_index == PLACEHOLDER_ROW_INDEX
    }

    pub fn cell(&self, column: &str) -> &str {
        self.columns.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn with_key(mut self, key: String) -> Self {
        self.key = key;
        self
    }
}

pub fn positional_key(row_index: usize) -> String {
    format!("row_{row_index:04}")
}

/// Trims a raw cell and collapses null-like spellings to the empty string.
pub fn normalize_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if NULL_LIKE_CELLS
        .iter()
        .any(|null| trimmed.eq_ignore_ascii_case(null))
    {
        return String::new();
    }
    trimmed.to_string()
}

/// Why a record did not produce an image. The wire form is the skip report value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NoUrl,
    DownloadFailed,
    UploadFailed,
    Timeout,
    NoResponse,
    MalformedResponse,
    NoImageInResponse,
    BatchFailed,
}

impl FailureReason {
    pub const ALL: [FailureReason; 8] = [
        FailureReason::NoUrl,
        FailureReason::DownloadFailed,
        FailureReason::UploadFailed,
        FailureReason::Timeout,
        FailureReason::NoResponse,
        FailureReason::MalformedResponse,
        FailureReason::NoImageInResponse,
        FailureReason::BatchFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoUrl => "NO_URL",
            FailureReason::DownloadFailed => "DOWNLOAD_FAILED",
            FailureReason::UploadFailed => "UPLOAD_FAILED",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::NoResponse => "NO_RESPONSE",
            FailureReason::MalformedResponse => "MALFORMED_RESPONSE",
            FailureReason::NoImageInResponse => "NO_IMAGE_IN_RESPONSE",
            FailureReason::BatchFailed => "BATCH_FAILED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured per-record failure: the reason code plus a human-readable detail for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl RecordFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn row(cells: &[(&str, &str)]) -> IndexMap<String, String> {
        cells
            .iter()
            .map(|(column, value)| (column.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn normalize_cell_trims_and_drops_null_spellings() {
        assert_eq!(normalize_cell("  mug  "), "mug");
        assert_eq!(normalize_cell("NaN"), "");
        assert_eq!(normalize_cell(" null "), "");
        assert_eq!(normalize_cell("None"), "");
        assert_eq!(normalize_cell("nanometer"), "nanometer");
    }

    #[test]
    fn record_uses_positional_key_when_key_cell_empty() {
        let map = ColumnMap::default();
        let record = ProductRecord::from_row(
            7,
            row(&[
                ("SKU", ""),
                ("productName", "Mug"),
                ("description", "Ceramic"),
                ("imageURL", "https://cdn.test/mug.png"),
            ]),
            &map,
        );
        assert_eq!(record.key, "row_0007");
        assert_eq!(record.name, "Mug");
        assert_eq!(record.image_url, "https://cdn.test/mug.png");
    }

    #[test]
    fn placeholder_only_populates_key_column() {
        let map = ColumnMap::default();
        let columns = vec![
            "SKU".to_string(),
            "productName".to_string(),
            "extra".to_string(),
        ];
        let record = ProductRecord::placeholder("ghost-1", &columns, &map);
        assert_eq!(record.cell("SKU"), "ghost-1");
        assert_eq!(record.cell("productName"), "");
        assert_eq!(record.cell("extra"), "");
        assert_eq!(record.columns.len(), 3);
        assert!(record.is_placeholder());
    }

    #[test]
    fn sheet_format_follows_extension() {
        assert_eq!(SheetFormat::from_path(Path::new("in/products.xlsx")), SheetFormat::Workbook);
        assert_eq!(SheetFormat::from_path(Path::new("products.XLSX")), SheetFormat::Workbook);
        assert_eq!(SheetFormat::from_path(Path::new("products.csv")), SheetFormat::Csv);
        assert_eq!(SheetFormat::from_path(Path::new("products")), SheetFormat::Csv);
        assert_eq!(SheetFormat::Workbook.report_extension(), "xlsx");
    }

    #[test]
    fn failure_reason_wire_strings_round_trip() -> anyhow::Result<()> {
        for reason in FailureReason::ALL {
            let json = serde_json::to_string(&reason)?;
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
        Ok(())
    }
}
