use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cell::{CellRange, CellRef, CellValue, MAX_COL, MAX_ROW};
use crate::error::{Result, SheetError};
use crate::style::{normalize_color, CellStyle, SheetFormatting};

pub type Grid = Vec<Vec<CellValue>>;

/// Column widths and row heights, in pixels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default)]
    pub column_widths: BTreeMap<u16, f64>,
    #[serde(default)]
    pub row_heights: BTreeMap<u32, f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedRange {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u16,
    pub last_col: u16,
    #[serde(default)]
    pub content: CellValue,
}

impl MergedRange {
    pub fn new(range: CellRange, content: CellValue) -> Self {
        MergedRange {
            first_row: range.first_row,
            last_row: range.last_row,
            first_col: range.first_col,
            last_col: range.last_col,
            content,
        }
    }

    pub fn range(&self) -> CellRange {
        CellRange {
            first_row: self.first_row,
            first_col: self.first_col,
            last_row: self.last_row,
            last_col: self.last_col,
        }
    }
}

/// The body of a sheet: the grid plus every side-table the exporter reads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    pub grid: Grid,
    #[serde(default)]
    pub format_metadata: BTreeMap<String, CellStyle>,
    #[serde(default)]
    pub header_colors: BTreeMap<u16, String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub merged_cells: Vec<MergedRange>,
    #[serde(default)]
    pub formatting: SheetFormatting,
}

// Body written by the earliest revision: header row kept apart from the data rows.
#[derive(Deserialize)]
struct HeaderedBody {
    headers: Vec<CellValue>,
    data: Grid,
    #[serde(default)]
    formatting: SheetFormatting,
}

fn unrecognized(e: impl std::fmt::Display) -> SheetError {
    SheetError::validation(format!("unrecognized sheet body: {}", e))
}

/// Turn any persisted body into the structured shape. Idempotent.
///
/// The shape is picked from the JSON itself:
///
/// * an array is a bare grid,
/// * an object with `grid` is the structured body,
/// * an object with `headers` and `data` is the headered body.
///
/// # Errors
///
/// `Validation` for anything else, or when the picked shape does not parse.
///
/// # Examples
///
/// ```
/// use sheetbook::spreadsheet::normalize;
///
/// let data = normalize(serde_json::json!([["Item", "Qty"], ["Pens", 3]])).unwrap();
/// assert_eq!(data.row_count(), 2);
/// ```
pub fn normalize(raw: serde_json::Value) -> Result<SheetData> {
    let structured = raw.get("grid").is_some();
    let headered = raw.get("headers").is_some() && raw.get("data").is_some();
    if raw.is_array() {
        let grid: Grid = serde_json::from_value(raw).map_err(unrecognized)?;
        return Ok(SheetData::from_grid(grid));
    }
    if structured {
        let mut data: SheetData = serde_json::from_value(raw).map_err(unrecognized)?;
        if let Some(list) = data.formatting.merge_cells.take() {
            data.apply_merge_list(&list);
        }
        return Ok(data);
    }
    if headered {
        let body: HeaderedBody = serde_json::from_value(raw).map_err(unrecognized)?;
        let mut grid = Vec::with_capacity(body.data.len() + 1);
        grid.push(body.headers);
        grid.extend(body.data);
        return Ok(SheetData::with_formatting(grid, body.formatting));
    }
    Err(unrecognized(format!("unexpected {}", json_kind(&raw))))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object without grid or headers/data",
    }
}

impl SheetData {
    pub fn from_grid(grid: Grid) -> Self {
        SheetData {
            grid,
            ..SheetData::default()
        }
    }

    /// Build a body from a grid and sheet defaults, turning the defaults'
    /// `merge_cells` list ("A1:D1,A2:D2" or ';'-separated) into merged ranges.
    /// Ranges that do not parse or collide with an earlier one are dropped.
    pub fn with_formatting(grid: Grid, mut formatting: SheetFormatting) -> Self {
        let merges = formatting.merge_cells.take().unwrap_or_default();
        let mut data = SheetData {
            grid,
            formatting,
            ..SheetData::default()
        };
        data.apply_merge_list(&merges);
        data
    }

    /// Merge every range of a "A1:D1,A2:D2" list, keeping the top-left value as
    /// content. Ranges that do not parse or are rejected by [`Self::add_merge`]
    /// are logged and dropped.
    pub fn apply_merge_list(&mut self, list: &str) {
        for part in list.split([',', ';']).map(str::trim).filter(|p| !p.is_empty()) {
            let Ok(range) = CellRange::parse(part) else {
                log::warn!("ignoring bad merge range \"{}\"", part);
                continue;
            };
            let content = self.value_at(range.first_row, range.first_col).clone();
            if let Err(e) = self.add_merge(range, content) {
                log::warn!("ignoring merge {}: {}", range, e);
            }
        }
    }

    pub fn row_count(&self) -> usize {
        self.grid.len()
    }

    /// Width of the widest row; shorter rows are treated as padded with empties.
    pub fn col_count(&self) -> usize {
        self.grid.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn value_at(&self, row: u32, col: u16) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.grid
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .unwrap_or(EMPTY)
    }

    pub fn set_value(&mut self, at: CellRef, value: CellValue) {
        let row = at.row as usize;
        let col = at.col as usize;
        if self.grid.len() <= row {
            self.grid.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.grid[row];
        if cells.len() <= col {
            cells.resize(col + 1, CellValue::Empty);
        }
        cells[col] = value;
    }

    pub fn set_cell_format(&mut self, cell_ref: &str, partial: &CellStyle) -> Result<()> {
        let at = CellRef::parse(cell_ref)?;
        let partial = partial.validated()?;
        self.format_metadata
            .entry(at.to_string())
            .or_default()
            .merge(&partial);
        Ok(())
    }

    pub fn set_header_color(&mut self, cols: &[u16], color: &str) -> Result<()> {
        let color = normalize_color(color)?;
        if let Some(bad) = cols.iter().find(|c| **c > MAX_COL) {
            return Err(SheetError::validation(format!("column {} out of range", bad)));
        }
        for col in cols {
            self.header_colors.insert(*col, color.clone());
        }
        Ok(())
    }

    /// Append a merged range. Single cells and ranges that overlap an existing
    /// merge are rejected.
    pub fn add_merge(&mut self, range: CellRange, content: CellValue) -> Result<()> {
        if range.first_row > range.last_row || range.first_col > range.last_col {
            return Err(SheetError::validation(format!("inverted merge range {}", range)));
        }
        if range.last_row > MAX_ROW || range.last_col > MAX_COL {
            return Err(SheetError::validation(format!("merge range {} out of bounds", range)));
        }
        if range.is_single_cell() {
            return Err(SheetError::validation(format!(
                "merge range {} covers a single cell",
                range
            )));
        }
        if let Some(existing) = self.merged_cells.iter().find(|m| m.range().overlaps(&range)) {
            return Err(SheetError::validation(format!(
                "merge range {} overlaps {}",
                range,
                existing.range()
            )));
        }
        self.merged_cells.push(MergedRange::new(range, content));
        Ok(())
    }

    /// Remove merges with exactly these coordinates. Returns how many went away.
    pub fn remove_merge(&mut self, range: CellRange) -> usize {
        let before = self.merged_cells.len();
        self.merged_cells.retain(|m| m.range() != range);
        before - self.merged_cells.len()
    }

    pub fn set_dimensions(
        &mut self,
        column_widths: Option<&BTreeMap<u16, f64>>,
        row_heights: Option<&BTreeMap<u32, f64>>,
    ) -> Result<()> {
        let widths = column_widths.into_iter().flatten().map(|(_, v)| *v);
        let heights = row_heights.into_iter().flatten().map(|(_, v)| *v);
        if let Some(bad) = widths.chain(heights).find(|v| !v.is_finite() || *v < 0.0) {
            return Err(SheetError::validation(format!("bad dimension {}", bad)));
        }
        if let Some(w) = column_widths {
            self.dimensions
                .column_widths
                .extend(w.iter().map(|(k, v)| (*k, *v)));
        }
        if let Some(h) = row_heights {
            self.dimensions
                .row_heights
                .extend(h.iter().map(|(k, v)| (*k, *v)));
        }
        Ok(())
    }

    pub fn update_formatting(&mut self, update: &SheetFormatting) -> Result<()> {
        let mut next = self.formatting.clone();
        next.merge(update);
        next.validate()?;
        let merges = next.merge_cells.take();
        self.formatting = next;
        if let Some(list) = merges {
            self.apply_merge_list(&list);
        }
        Ok(())
    }
}

/// A sheet as seen by the rest of the crate, always in structured form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetDocument {
    pub owner: String,
    pub name: String,
    pub data: SheetData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SheetDocument {
    pub fn new(owner: &str, name: &str, data: SheetData) -> Self {
        let now = Utc::now();
        SheetDocument {
            owner: owner.to_string(),
            name: name.to_string(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a mutation and refresh `updated_at` if it succeeded.
    pub fn mutate<T>(&mut self, f: impl FnOnce(&mut SheetData) -> Result<T>) -> Result<T> {
        let out = f(&mut self.data)?;
        self.updated_at = Utc::now();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renormalize(data: &SheetData) -> SheetData {
        normalize(serde_json::to_value(data).unwrap()).unwrap()
    }

    #[test]
    fn bare_grid_becomes_structured() {
        let data = normalize(json!([["Name", "Score"], ["Ann", 90], ["Bob"]])).unwrap();
        assert_eq!(data.row_count(), 3);
        assert_eq!(data.col_count(), 2);
        assert!(data.format_metadata.is_empty());
        assert!(data.merged_cells.is_empty());
        assert_eq!(data.value_at(2, 1), &CellValue::Empty);
        assert_eq!(renormalize(&data), data);
    }

    #[test]
    fn headered_shape_keeps_formatting_and_merges() {
        let data = normalize(json!({
            "headers": ["Title", "Subtitle", "Date", "Author"],
            "data": [["Course", "Guide", "2023-09-01", "John"]],
            "formatting": {"header_bg_color": "#4F81BD", "merge_cells": "A2:D2"}
        }))
        .unwrap();
        assert_eq!(data.grid[0][0], CellValue::Text("Title".into()));
        assert_eq!(data.formatting.header_bg_color.as_deref(), Some("#4F81BD"));
        assert_eq!(data.formatting.merge_cells, None);
        assert_eq!(data.merged_cells.len(), 1);
        assert_eq!(data.merged_cells[0].content, CellValue::Text("Course".into()));
        assert_eq!(renormalize(&data), data);
    }

    #[test]
    fn structured_shape_is_a_fixed_point() {
        let raw = json!({
            "grid": [["A", "B"], [1, "=A2+1"]],
            "format_metadata": {"B2": {"bold": true}},
            "header_colors": {"1": "#FF0000"},
            "dimensions": {"column_widths": {"0": 120.0}},
            "merged_cells": [{"first_row": 3, "last_row": 3, "first_col": 0, "last_col": 1, "content": "x"}]
        });
        let once = normalize(raw).unwrap();
        assert_eq!(once.header_colors.get(&1).map(String::as_str), Some("#FF0000"));
        assert_eq!(once.dimensions.column_widths.get(&0), Some(&120.0));
        assert!(once.dimensions.row_heights.is_empty());
        assert_eq!(renormalize(&once), once);
        assert_eq!(renormalize(&renormalize(&once)), once);
    }

    #[test]
    fn integer_keyed_side_tables_survive_a_store_round_trip() {
        let mut data = SheetData::from_grid(vec![vec!["A".into(), "B".into()]]);
        data.set_header_color(&[0, 1], "#FF0000").unwrap();
        let widths: BTreeMap<u16, f64> = [(1, 140.0)].into_iter().collect();
        let heights: BTreeMap<u32, f64> = [(0, 40.0)].into_iter().collect();
        data.set_dimensions(Some(&widths), Some(&heights)).unwrap();

        let back = renormalize(&data);
        assert_eq!(back.header_colors.len(), 2, "Header colors were lost");
        assert_eq!(back.dimensions.column_widths.get(&1), Some(&140.0));
        assert_eq!(back.dimensions.row_heights.get(&0), Some(&40.0));
        assert_eq!(back, data);
    }

    #[test]
    fn bare_grid_with_one_empty_row_keeps_it() {
        let data = normalize(json!([[]])).unwrap();
        assert_eq!(data.row_count(), 1);
        assert_eq!(data.col_count(), 0);
    }

    #[test]
    fn structured_merge_list_is_applied() {
        let data = normalize(json!({
            "grid": [["Title", "", ""], [1, 2, 3]],
            "formatting": {"merge_cells": "A1:C1"}
        }))
        .unwrap();
        assert_eq!(data.formatting.merge_cells, None);
        assert_eq!(data.merged_cells.len(), 1);
        assert_eq!(data.merged_cells[0].content, CellValue::Text("Title".into()));
        assert_eq!(renormalize(&data), data);
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(matches!(normalize(json!({"rows": 3})), Err(SheetError::Validation(_))));
        assert!(normalize(json!("text")).is_err());
    }

    #[test]
    fn cell_format_merges_and_rejects_atomically() {
        let mut data = SheetData::from_grid(vec![vec!["a".into()]]);
        data.set_cell_format("c5", &CellStyle { bold: Some(true), ..Default::default() })
            .unwrap();
        data.set_cell_format("C5", &CellStyle { italic: Some(true), ..Default::default() })
            .unwrap();
        let before = data.clone();
        let bad = CellStyle {
            bold: Some(false),
            font_color: Some("nope".into()),
            ..Default::default()
        };
        assert!(data.set_cell_format("C5", &bad).is_err());
        assert!(data.set_cell_format("5C", &CellStyle::default()).is_err());
        assert_eq!(data, before);

        let style = &data.format_metadata["C5"];
        assert_eq!((style.bold, style.italic), (Some(true), Some(true)));
    }

    #[test]
    fn merges_reject_overlap_and_unmerge_is_idempotent() {
        let mut data = SheetData::default();
        let title = CellRange::parse("A1:D1").unwrap();
        data.add_merge(title, "Title".into()).unwrap();
        assert!(data.add_merge(CellRange::parse("C1:E2").unwrap(), "x".into()).is_err());
        assert!(data.add_merge(CellRange::parse("B3").unwrap(), "x".into()).is_err());

        let snapshot = data.merged_cells.clone();
        assert_eq!(data.remove_merge(CellRange::parse("A1:C1").unwrap()), 0);
        assert_eq!(data.merged_cells, snapshot);
        assert_eq!(data.remove_merge(title), 1);
        assert!(data.merged_cells.is_empty());
    }

    #[test]
    fn dimensions_merge_shallowly() {
        let mut data = SheetData::default();
        data.set_dimensions(Some(&BTreeMap::from([(0, 100.0), (1, 80.0)])), None)
            .unwrap();
        data.set_dimensions(
            Some(&BTreeMap::from([(1, 60.0)])),
            Some(&BTreeMap::from([(0, 30.0)])),
        )
        .unwrap();
        assert_eq!(data.dimensions.column_widths, BTreeMap::from([(0, 100.0), (1, 60.0)]));
        assert_eq!(data.dimensions.row_heights, BTreeMap::from([(0, 30.0)]));
        assert!(data
            .set_dimensions(None, Some(&BTreeMap::from([(2, -1.0)])))
            .is_err());
    }

    #[test]
    fn set_value_grows_ragged_grid() {
        let mut data = SheetData::from_grid(vec![vec!["h".into()]]);
        data.set_value(CellRef::new(2, 3), CellValue::Integer(7));
        assert_eq!(data.row_count(), 3);
        assert_eq!(data.grid[1].len(), 0);
        assert_eq!(data.value_at(2, 3), &CellValue::Integer(7));
    }

    #[test]
    fn failed_mutation_keeps_timestamp() {
        let mut doc = SheetDocument::new("u1", "S", SheetData::default());
        let stamp = doc.updated_at;
        assert!(doc.mutate(|d| d.set_header_color(&[0], "bogus")).is_err());
        assert_eq!(doc.updated_at, stamp);
        doc.mutate(|d| d.set_header_color(&[0], "#ff0000")).unwrap();
        assert!(doc.updated_at >= stamp);
        assert_eq!(doc.data.header_colors[&0], "#FF0000");
    }
}
