use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SheetError};

lazy_static! {
    static ref CELL_REF_REGEX: Regex = Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").unwrap();
}

/// Largest zero-based column index an xlsx worksheet can address (XFD).
pub const MAX_COL: u16 = 16_383;
/// Largest zero-based row index an xlsx worksheet can address.
pub const MAX_ROW: u32 = 1_048_575;

/// A single grid value.
///
/// Formulas are opaque: the string is kept exactly as entered, leading `=` included,
/// and is never evaluated.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawCell", into = "RawCell")]
pub enum CellValue {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
    Text(String),
    Formula(String),
}

// JSON face of a cell: bare numbers and strings, the way the web client posts them.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawCell {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl From<RawCell> for CellValue {
    fn from(raw: RawCell) -> Self {
        match raw {
            RawCell::Integer(n) => CellValue::Integer(n),
            RawCell::Float(f) => CellValue::Float(f),
            RawCell::Bool(b) => CellValue::Text(b.to_string()),
            RawCell::Str(s) => CellValue::from_stored(s),
            RawCell::Null => CellValue::Empty,
        }
    }
}

impl From<CellValue> for RawCell {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Empty => RawCell::Str(String::new()),
            CellValue::Integer(n) => RawCell::Integer(n),
            CellValue::Float(f) => RawCell::Float(f),
            CellValue::Text(s) | CellValue::Formula(s) => RawCell::Str(s),
        }
    }
}

impl CellValue {
    /// Classify a string that was already stored: no trimming, no numeric coercion.
    pub fn from_stored(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else if s.starts_with('=') {
            CellValue::Formula(s)
        } else {
            CellValue::Text(s)
        }
    }

    /// Classify raw user input: formula, then integer, then float, then trimmed text.
    pub fn from_input(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return CellValue::Empty;
        }
        if s.starts_with('=') {
            return CellValue::Formula(s.to_string());
        }
        if let Ok(n) = s.parse::<i64>() {
            return CellValue::Integer(n);
        }
        match s.parse::<f64>() {
            Ok(f) if f.is_finite() => CellValue::Float(f),
            _ => CellValue::Text(s.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Integer(n) => Some(*n as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Float(x) => write!(f, "{}", x),
            CellValue::Text(s) | CellValue::Formula(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::from_stored(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Integer(n)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

/// Convert a zero-based column index to its letter name (0 -> A, 26 -> AA).
pub fn col_to_letter(col: u16) -> String {
    let mut n = col as u32 + 1;
    let mut result = String::new();
    while n > 0 {
        n -= 1;
        result.push(((n % 26) as u8 + b'A') as char);
        n /= 26;
    }
    result.chars().rev().collect()
}

/// Convert column letters to a zero-based index. Returns `None` past XFD.
pub fn letter_to_col(letters: &str) -> Option<u16> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let n = letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as u32 - 'A' as u32 + 1))
    })?;
    if n == 0 || n - 1 > MAX_COL as u32 {
        return None;
    }
    Some((n - 1) as u16)
}

/// A single cell address, zero-based internally, `A1` notation on the outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u16,
}

impl CellRef {
    pub fn new(row: u32, col: u16) -> Self {
        CellRef { row, col }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let caps = CELL_REF_REGEX
            .captures(s.trim())
            .ok_or_else(|| SheetError::validation(format!("bad cell reference \"{}\"", s)))?;
        let col = letter_to_col(&caps[1])
            .ok_or_else(|| SheetError::validation(format!("column out of range in \"{}\"", s)))?;
        let row: u32 = caps[2]
            .parse()
            .map_err(|_| SheetError::validation(format!("bad row in \"{}\"", s)))?;
        if row == 0 || row - 1 > MAX_ROW {
            return Err(SheetError::validation(format!("row out of range in \"{}\"", s)));
        }
        Ok(CellRef { row: row - 1, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letter(self.col), self.row + 1)
    }
}

/// An inclusive rectangular block of cells, zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

impl CellRange {
    /// Parse `A1:D4` (or a lone `A1`). Corners given in any order are normalized.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let start = CellRef::parse(parts.next().unwrap_or_default())?;
        let end = match parts.next() {
            Some(p) => CellRef::parse(p)?,
            None => start,
        };
        if parts.next().is_some() {
            return Err(SheetError::validation(format!("bad range \"{}\"", s)));
        }
        Ok(CellRange {
            first_row: start.row.min(end.row),
            first_col: start.col.min(end.col),
            last_row: start.row.max(end.row),
            last_col: start.col.max(end.col),
        })
    }

    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.first_row <= other.last_row
            && other.first_row <= self.last_row
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            CellRef::new(self.first_row, self.first_col),
            CellRef::new(self.last_row, self.last_col)
        )
    }
}
