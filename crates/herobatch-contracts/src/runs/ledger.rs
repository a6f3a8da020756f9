use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use rust_xlsxwriter::Workbook;

use crate::records::{FailureReason, ProductRecord, SheetFormat, FAILURE_REASON_COLUMN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    pub record: ProductRecord,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerWrite {
    Written { path: PathBuf, rows: usize },
    Empty,
}

/// Accumulates every record that did not produce an image. A key is recorded
/// at most once; later reports for the same key are ignored.
#[derive(Debug, Clone)]
pub struct SkipLedger {
    columns: Vec<String>,
    entries: Vec<SkipRecord>,
    keys: HashSet<String>,
}

impl SkipLedger {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            entries: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Returns false when the key was already recorded.
    pub fn record(&mut self, record: &ProductRecord, reason: FailureReason) -> bool {
        if !self.keys.insert(record.key.clone()) {
            return false;
        }
        self.entries.push(SkipRecord {
            record: record.clone(),
            reason,
        });
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries for rows of the loaded input, leaving out result keys that matched no row.
    pub fn loaded_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.record.is_placeholder())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SkipRecord] {
        &self.entries
    }

    pub fn reason_for(&self, key: &str) -> Option<FailureReason> {
        self.entries
            .iter()
            .find(|entry| entry.record.key == key)
            .map(|entry| entry.reason)
    }

    /// Report header: the input columns in order, then the failure reason.
    pub fn schema(&self) -> Vec<String> {
        let mut schema = self.columns.clone();
        schema.push(FAILURE_REASON_COLUMN.to_string());
        schema
    }

    pub fn counts_by_reason(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.reason.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Writes the skip report in the format its extension names.
    pub fn write(&self, path: &Path) -> anyhow::Result<LedgerWrite> {
        match SheetFormat::from_path(path) {
            SheetFormat::Csv => self.write_csv(path),
            SheetFormat::Workbook => self.write_xlsx(path),
        }
    }

    /// Writes the skip report as CSV. Nothing is written when the ledger is empty.
    pub fn write_csv(&self, path: &Path) -> anyhow::Result<LedgerWrite> {
        if self.entries.is_empty() {
            return Ok(LedgerWrite::Empty);
        }
        create_parent(path)?;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(self.schema())?;
        for entry in &self.entries {
            writer.write_record(self.row_cells(entry))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(self.written(path))
    }

    /// Writes the skip report as a single-sheet workbook, every cell as text.
    pub fn write_xlsx(&self, path: &Path) -> anyhow::Result<LedgerWrite> {
        if self.entries.is_empty() {
            return Ok(LedgerWrite::Empty);
        }
        create_parent(path)?;
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let rows = std::iter::once(self.schema())
            .chain(self.entries.iter().map(|entry| {
                self.row_cells(entry)
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            }));
        for (row, cells) in rows.enumerate() {
            let row = u32::try_from(row).context("skip report has too many rows for xlsx")?;
            for (col, cell) in cells.into_iter().enumerate() {
                let col = u16::try_from(col).context("skip report has too many columns for xlsx")?;
                sheet.write_string(row, col, cell)?;
            }
        }
        workbook
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(self.written(path))
    }

    fn row_cells<'e>(&'e self, entry: &'e SkipRecord) -> Vec<&'e str> {
        let mut row: Vec<&str> = self
            .columns
            .iter()
            .map(|column| entry.record.cell(column))
            .collect();
        row.push(entry.reason.as_str());
        row
    }

    fn written(&self, path: &Path) -> LedgerWrite {
        LedgerWrite::Written {
            path: path.to_path_buf(),
            rows: self.entries.len(),
        }
    }
}

fn create_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
