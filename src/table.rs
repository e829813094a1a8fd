//! Delimited tables (CSV and TSV) with a header row.
//!
//! Cells follow RFC 4180 quoting in both flavours: a quoted cell may contain
//! the delimiter, doubled quotes and line breaks.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn from_path(path: &Path) -> Result<Self, TreeError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("tsv") | Some("tab") => Ok(Delimiter::Tab),
            Some("csv") => Ok(Delimiter::Comma),
            _ => Err(TreeError::UnknownTableFormat(path.to_path_buf())),
        }
    }

    fn byte(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based line where the record starts.
    pub line: usize,
    pub cells: Vec<String>,
}

impl Row {
    pub fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(|cell| cell.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    header: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, TreeError> {
        let delimiter = Delimiter::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|err| TreeError::TableRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Self::parse(&text, delimiter, path))
    }

    pub fn parse(text: &str, delimiter: Delimiter, path: &Path) -> Self {
        let mut records = split_records(text, delimiter.byte()).into_iter();
        let header = records
            .next()
            .map(|row| row.cells.into_iter().map(|cell| cell.trim().to_string()).collect())
            .unwrap_or_default();
        let rows = records
            .filter(|row| !(row.cells.len() == 1 && row.cells[0].trim().is_empty()))
            .collect();
        Self {
            path: path.to_path_buf(),
            header,
            rows,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Finds a column by any of its accepted names. Matching ignores case,
    /// spaces and punctuation, so `Species ID`, `species_id` and `speciesId`
    /// are the same column.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            let wanted = normalize_header(name);
            self.header
                .iter()
                .position(|column| normalize_header(column) == wanted)
        })
    }

    pub fn require_column(&self, names: &[&str]) -> Result<usize, TreeError> {
        self.column(names).ok_or_else(|| TreeError::MissingColumn {
            path: self.path.clone(),
            column: names.first().copied().unwrap_or_default().to_string(),
        })
    }
}

fn normalize_header(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

fn split_records(text: &str, delimiter: char) -> Vec<Row> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut record_line = 1usize;
    let mut touched = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    cell.push(ch);
                }
                _ => cell.push(ch),
            }
            continue;
        }
        match ch {
            '"' if cell.is_empty() => {
                in_quotes = true;
                touched = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                cells.push(std::mem::take(&mut cell));
                rows.push(Row {
                    line: record_line,
                    cells: std::mem::take(&mut cells),
                });
                line += 1;
                record_line = line;
                touched = false;
            }
            c if c == delimiter => {
                cells.push(std::mem::take(&mut cell));
                touched = true;
            }
            _ => {
                cell.push(ch);
                touched = true;
            }
        }
    }
    if touched || !cell.is_empty() || !cells.is_empty() {
        cells.push(cell);
        rows.push(Row {
            line: record_line,
            cells,
        });
    }
    rows
}

/// Renders rows as CSV, quoting only cells that need it.
pub fn write_csv(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    push_record(&mut out, header.iter().copied());
    for row in rows {
        push_record(&mut out, row.iter().map(|cell| cell.as_str()));
    }
    out
}

fn push_record<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (idx, cell) in cells.enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}
