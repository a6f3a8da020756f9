use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use herobatch_contracts::records::{
    normalize_cell, ColumnMap, ProductRecord, SheetFormat, FAILURE_REASON_COLUMN,
};
use indexmap::IndexMap;

const BOM: char = '\u{feff}';

/// Loaded spreadsheet: header order, records in row order, and a key index.
#[derive(Debug, Clone)]
pub struct ProductTable {
    columns: Vec<String>,
    records: Vec<ProductRecord>,
    index: HashMap<String, usize>,
    column_map: ColumnMap,
}

impl ProductTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ProductRecord> {
        self.index.get(key).map(|idx| &self.records[*idx])
    }

    /// The loaded record for `key`, or a row carrying only the key.
    pub fn record_or_placeholder(&self, key: &str) -> ProductRecord {
        self.get(key)
            .cloned()
            .unwrap_or_else(|| ProductRecord::placeholder(key, &self.columns, &self.column_map))
    }
}

/// Loads the product sheet, picking CSV or workbook parsing by extension.
pub fn load_products(path: &Path, column_map: &ColumnMap) -> Result<ProductTable> {
    let table = match SheetFormat::from_path(path) {
        SheetFormat::Csv => {
            let file = File::open(path)
                .with_context(|| format!("failed to open input file {}", path.display()))?;
            parse_products(file, column_map)
        }
        SheetFormat::Workbook => load_workbook(path, column_map),
    };
    table.with_context(|| format!("failed to load products from {}", path.display()))
}

pub fn parse_products<R: Read>(reader: R, column_map: &ColumnMap) -> Result<ProductTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header: Vec<String> = csv_reader
        .headers()
        .context("input has no header row")?
        .iter()
        .map(str::to_string)
        .collect();
    let rows = csv_reader.records().enumerate().map(|(row_index, row)| {
        row.map(|row| row.iter().map(str::to_string).collect::<Vec<String>>())
            .with_context(|| format!("failed to read data row {row_index}"))
    });
    build_table(header, rows, column_map)
}

/// Reads the first worksheet of an xlsx, xls or ods workbook.
fn load_workbook(path: &Path, column_map: &ColumnMap) -> Result<ProductTable> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no worksheets")?
        .context("failed to read the first worksheet")?;
    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let header = rows.next().context("input has no header row")?;
    build_table(header, rows.map(Ok), column_map)
}

/// Cell text as it would read in a CSV export. Whole numbers drop the `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        other => other.to_string(),
    }
}

fn build_table(
    header: Vec<String>,
    rows: impl Iterator<Item = Result<Vec<String>>>,
    column_map: &ColumnMap,
) -> Result<ProductTable> {
    let header: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = if idx == 0 {
                name.trim_start_matches(BOM)
            } else {
                name
            };
            name.trim().to_string()
        })
        .collect();
    validate_header(&header, column_map)?;
    let columns = name_blank_columns(header);

    let mut records = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (row_index, row) in rows.enumerate() {
        let row = row?;
        let cells: IndexMap<String, String> = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let raw = row.get(idx).map(String::as_str).unwrap_or("");
                (column.clone(), normalize_cell(raw))
            })
            .collect();
        let mut record = ProductRecord::from_row(row_index, cells, column_map);
        if index.contains_key(&record.key) {
            let renamed = first_free(&format!("{}~row_{row_index:04}", record.key), |name| {
                index.contains_key(name)
            });
            tracing::warn!(
                key = %record.key,
                renamed = %renamed,
                row = row_index,
                "duplicate product key"
            );
            record = record.with_key(renamed);
        }
        index.insert(record.key.clone(), records.len());
        records.push(record);
    }

    tracing::info!(rows = records.len(), columns = columns.len(), "input loaded");
    Ok(ProductTable {
        columns,
        records,
        index,
        column_map: column_map.clone(),
    })
}

/// Blank header cells become `column_<position>` (1-based) so their cells survive.
fn name_blank_columns(header: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = header
        .iter()
        .filter(|name| !name.is_empty())
        .cloned()
        .collect();
    header
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            if !name.is_empty() {
                return name;
            }
            let named = first_free(&format!("column_{}", idx + 1), |candidate| {
                taken.contains(candidate)
            });
            taken.insert(named.clone());
            named
        })
        .collect()
}

/// `base`, or `base~2`, `base~3`, ... whichever is first not taken.
fn first_free(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 1u32;
    while taken(&candidate) {
        suffix += 1;
        candidate = format!("{base}~{suffix}");
    }
    candidate
}

fn validate_header(columns: &[String], column_map: &ColumnMap) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        if !column.is_empty() && !seen.insert(column.as_str()) {
            bail!("input header repeats column {column:?}");
        }
    }
    if seen.contains(FAILURE_REASON_COLUMN) {
        bail!("input already has a {FAILURE_REASON_COLUMN:?} column, which the skip report adds");
    }
    let missing: Vec<&str> = column_map
        .required()
        .into_iter()
        .filter(|required| !seen.contains(required))
        .collect();
    if !missing.is_empty() {
        bail!("input is missing required columns: {}", missing.join(", "));
    }
    Ok(())
}
