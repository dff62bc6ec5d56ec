//! Tabular payload parsing seam and the default tab-separated parser.
//!
//! The host exports grids as tab-separated text, either via the
//! clipboard or as a saved file. Parsing is a collaborator concern
//! behind [`GridParser`]; [`TsvParser`] is the default implementation.

use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::Path;

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(_) => None,
        }
    }
}

/// One extracted row: an ordered column-name to value mapping.
///
/// Records are produced once and never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRecord {
    fields: Vec<(String, CellValue)>,
}

impl GridRecord {
    pub fn new(fields: Vec<(String, CellValue)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Forced typing for a column, overriding inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
}

/// External tabular-parsing capability.
pub trait GridParser {
    fn parse_text(&self, text: &str) -> Result<Vec<GridRecord>>;

    fn parse_file(&self, path: &Path) -> Result<Vec<GridRecord>> {
        // Export files come out of the host in a legacy codepage;
        // undecodable bytes are replaced rather than failing the parse.
        let bytes = std::fs::read(path)
            .context(format!("Failed to read export file: {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        self.parse_text(&text)
    }
}

/// Default parser: first non-empty line is the header, rows are
/// tab-separated. Cells that look numeric (after stripping thousands
/// separators) are typed as numbers unless the column is forced to text.
pub struct TsvParser {
    column_kinds: HashMap<String, ColumnKind>,
}

impl TsvParser {
    pub fn new() -> Self {
        Self {
            column_kinds: HashMap::new(),
        }
    }

    /// Forces specific columns to a kind instead of inferring.
    pub fn with_column_kinds(kinds: HashMap<String, ColumnKind>) -> Self {
        Self {
            column_kinds: kinds,
        }
    }

    fn parse_cell(&self, column: &str, raw: &str) -> CellValue {
        let trimmed = raw.trim();
        match self.column_kinds.get(column) {
            Some(ColumnKind::Text) => return CellValue::Text(trimmed.to_string()),
            Some(ColumnKind::Number) | None => {}
        }
        let normalized: String = trimmed.chars().filter(|c| *c != ',').collect();
        match normalized.parse::<f64>() {
            Ok(n) if !normalized.is_empty() => CellValue::Number(n),
            _ => CellValue::Text(trimmed.to_string()),
        }
    }
}

impl Default for TsvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GridParser for TsvParser {
    fn parse_text(&self, text: &str) -> Result<Vec<GridRecord>> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());

        let header_line = lines.next().ok_or_else(|| anyhow!("payload has no header"))?;
        let columns: Vec<String> = header_line
            .split('\t')
            .map(|c| c.trim().to_string())
            .collect();

        let mut records = Vec::new();
        for (row_num, line) in lines.enumerate() {
            let cells: Vec<&str> = line.split('\t').collect();
            if cells.len() != columns.len() {
                crate::log(&format!(
                    "Warning: skipping malformed row {}: expected {} columns, got {}",
                    row_num + 2,
                    columns.len(),
                    cells.len()
                ));
                continue;
            }
            let fields = columns
                .iter()
                .zip(cells)
                .map(|(column, cell)| (column.clone(), self.parse_cell(column, cell)))
                .collect();
            records.push(GridRecord::new(fields));
        }

        Ok(records)
    }
}
