use serde::Deserialize;

use crate::cell::CellValue;
use crate::error::{Result, SheetError};
use crate::spreadsheet::{Grid, SheetData};
use crate::style::SheetFormatting;

pub const DEFAULT_ROW_DELIMITER: &str = "\n";
pub const DEFAULT_CELL_DELIMITER: &str = "\t";

/// Turn the escaped spellings a form field may carry (`\t`, `\n`, `\r\n`) into
/// the characters themselves.
pub fn unescape_delimiter(raw: &str) -> String {
    raw.replace("\\r\\n", "\r\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

/// Parse pasted tabular text into grid rows.
///
/// Blank rows are skipped. Each cell is trimmed and classified with
/// [`CellValue::from_input`]. Rows shorter than `header_count` are padded with
/// empty cells; longer rows are kept whole.
///
/// # Examples
/// ```
/// use sheetbook::cell::CellValue;
/// use sheetbook::loader::parse_tabular_input;
///
/// let rows = parse_tabular_input("a,1;b", ";", ",", 3).unwrap();
/// assert_eq!(rows[1], vec![CellValue::Text("b".into()), CellValue::Empty, CellValue::Empty]);
/// ```
pub fn parse_tabular_input(
    raw: &str,
    row_delimiter: &str,
    cell_delimiter: &str,
    header_count: usize,
) -> Result<Grid> {
    let row_delimiter = unescape_delimiter(row_delimiter);
    let cell_delimiter = unescape_delimiter(cell_delimiter);
    if row_delimiter.is_empty() || cell_delimiter.is_empty() {
        return Err(SheetError::validation("delimiters must not be empty"));
    }

    let mut rows = Vec::new();
    for line in raw.split(row_delimiter.as_str()) {
        if line.trim().is_empty() {
            continue;
        }
        let mut cells: Vec<CellValue> = line
            .split(cell_delimiter.as_str())
            .map(CellValue::from_input)
            .collect();
        if cells.len() < header_count {
            cells.resize(header_count, CellValue::Empty);
        }
        rows.push(cells);
    }
    Ok(rows)
}

/// Split a comma-separated header list, dropping blank entries.
pub fn parse_header_list(raw: &str) -> Vec<CellValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| CellValue::Text(h.to_string()))
        .collect()
}

/// One sheet handed over by the upload ingester: its name and raw rows, header
/// row first.
#[derive(Clone, Debug, Deserialize)]
pub struct UploadedSheet {
    pub sheet_name: String,
    pub rows: Grid,
}

impl UploadedSheet {
    /// Build the sheet body, or `None` when the upload has no data rows.
    pub fn into_sheet_data(self) -> Option<SheetData> {
        let has_data = self
            .rows
            .iter()
            .skip(1)
            .any(|row| row.iter().any(|c| !c.is_empty()));
        if !has_data {
            return None;
        }
        Some(SheetData::with_formatting(self.rows, SheetFormatting::uploaded()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_separated_rows_are_padded_not_truncated() {
        let raw = "Groceries\t400.00\t=SUM(C2:F2)\nRent\t\n\n   \nA\tB\tC\tD\tE";
        let rows = parse_tabular_input(raw, "\\n", "\\t", 4).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            vec![
                CellValue::Text("Groceries".into()),
                CellValue::Float(400.0),
                CellValue::Formula("=SUM(C2:F2)".into()),
                CellValue::Empty,
            ]
        );
        assert_eq!(rows[1].len(), 4);
        assert_eq!(rows[2].len(), 5);
    }

    #[test]
    fn integers_win_over_floats() {
        let rows = parse_tabular_input("7,7.5,-3, x ", "\n", ",", 0).unwrap();
        assert_eq!(
            rows[0],
            vec![
                CellValue::Integer(7),
                CellValue::Float(7.5),
                CellValue::Integer(-3),
                CellValue::Text("x".into()),
            ]
        );
    }

    #[test]
    fn crlf_input_is_trimmed() {
        let rows = parse_tabular_input("a,b\r\nc,d\r\n", "\n", ",", 2).unwrap();
        assert_eq!(rows[0][1], CellValue::Text("b".into()));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn empty_delimiter_is_rejected() {
        assert!(parse_tabular_input("a", "", ",", 0).is_err());
    }

    #[test]
    fn header_list() {
        let headers = parse_header_list(" Name, Roll No ,, Total");
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[1], CellValue::Text("Roll No".into()));
    }

    #[test]
    fn upload_without_data_rows_is_skipped() {
        let empty = UploadedSheet {
            sheet_name: "Blank".into(),
            rows: vec![vec!["Header".into()], vec![CellValue::Empty]],
        };
        assert!(empty.into_sheet_data().is_none());

        let filled = UploadedSheet {
            sheet_name: "Data".into(),
            rows: vec![vec!["Header".into()], vec![CellValue::Integer(1)]],
        };
        let data = filled.into_sheet_data().unwrap();
        assert_eq!(data.formatting.header_bg_color.as_deref(), Some("#F0E68C"));
    }
}
