//! Workbook export: renders sheet documents into one xlsx byte stream.
//!
//! Each sheet is built into its own `Worksheet` and only pushed into the
//! workbook once it rendered completely, so a bad sheet never leaves a half
//! written tab behind. Failures are logged and the sheet is skipped.

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{
    Color, ConditionalFormatDataBar, ConditionalFormatType, DataValidation, DataValidationRule,
    Format, FormatAlign, FormatBorder, FormatPattern, FormatUnderline, Formula, Workbook,
    Worksheet,
};
use std::collections::{HashMap, HashSet};

use crate::cell::{CellRange, CellRef, CellValue, MAX_COL, MAX_ROW};
use crate::error::{Result, SheetError};
use crate::spreadsheet::{SheetData, SheetDocument};
use crate::store::{DownloadRecord, SheetSummary};
use crate::style::{
    is_theme_default_fill, parse_color, BorderKind, CellStyle, HorizontalAlign, ValidationRule,
    FALLBACK_HEADER_COLOR,
};

pub const XLSX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Excel's limit on worksheet name length.
pub const SHEET_NAME_LIMIT: usize = 31;

/// Pixel to column-width conversion: one character of the default font is
/// taken as 7 pixels wide.
pub const PIXELS_PER_CHARACTER: f64 = 7.0;

/// Pixel to row-height conversion (96 dpi screen pixels to points).
pub const POINTS_PER_PIXEL: f64 = 0.75;

const MAX_COLUMN_WIDTH: f64 = 255.0;
const MAX_ROW_HEIGHT: f64 = 409.0;

#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Header fill when neither the column nor the sheet sets one.
    pub header_fallback_color: String,
    /// Width, in characters, of header columns with no explicit width.
    pub default_column_width: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            header_fallback_color: FALLBACK_HEADER_COLOR.to_string(),
            default_column_width: 20.0,
        }
    }
}

/// A finished export: the file, its name and the history entry describing it.
#[derive(Debug)]
pub struct ExportedWorkbook {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub record: DownloadRecord,
}

/// `workbook_20240131_174501.xlsx`
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!("workbook_{}.xlsx", at.format("%Y%m%d_%H%M%S"))
}

/// Make a name acceptable as a worksheet title: forbidden characters replaced,
/// truncated to [`SHEET_NAME_LIMIT`] characters, no leading or trailing
/// apostrophe.
///
/// # Examples
///
/// ```
/// use sheetbook::downloader::sheet_title;
///
/// assert_eq!(sheet_title("Q1/Q2"), "Q1_Q2");
/// assert_eq!(sheet_title("history"), "history_");
/// ```
pub fn sheet_title(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'');
    let mut title: String = cleaned.chars().take(SHEET_NAME_LIMIT).collect();
    // Cutting can expose an apostrophe or space at the new end
    title.truncate(title.trim_end_matches(|c: char| c == '\'' || c.is_whitespace()).len());
    if title.trim().is_empty() {
        title = "Sheet".to_string();
    }
    if title.eq_ignore_ascii_case("history") {
        title.push('_');
    }
    title
}

// Suffix `~2`, `~3`, ... until the title is unique (Excel compares case-insensitively).
fn unique_title(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(&base.to_lowercase()) {
        return base.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!("~{}", n);
            let keep = SHEET_NAME_LIMIT - suffix.chars().count();
            let head: String = base.chars().take(keep).collect();
            format!("{}{}", head, suffix)
        })
        .find(|candidate| !used.contains(&candidate.to_lowercase()))
        .unwrap_or_else(|| base.to_string())
}

/// Works out the effective style of any cell in a sheet:
/// global default, then the header or body base, then the cell's override,
/// then (row 0 only) the column's header color unless the override set a fill.
pub struct StyleResolver<'a> {
    data: &'a SheetData,
    overrides: HashMap<CellRef, &'a CellStyle>,
    header_base: CellStyle,
    body_base: CellStyle,
}

impl<'a> StyleResolver<'a> {
    pub fn new(data: &'a SheetData, header_fallback: &str) -> Self {
        let mut overrides = HashMap::new();
        for (key, style) in &data.format_metadata {
            match CellRef::parse(key) {
                Ok(at) => {
                    overrides.insert(at, style);
                }
                Err(_) => log::debug!("ignoring style override for bad reference \"{}\"", key),
            }
        }
        StyleResolver {
            data,
            overrides,
            header_base: CellStyle::global_default()
                .merged(&data.formatting.header_style(header_fallback)),
            body_base: CellStyle::global_default().merged(&data.formatting.body_style()),
        }
    }

    /// Effective style of one cell.
    ///
    /// # Arguments
    /// * `row` - Zero-based row; row 0 is the header row
    /// * `col` - Zero-based column
    ///
    /// # Returns
    /// * `CellStyle` - Fully layered style, ready for [`build_format`]
    ///
    /// # Examples
    /// ```
    /// use sheetbook::downloader::StyleResolver;
    /// use sheetbook::spreadsheet::SheetData;
    ///
    /// let mut data = SheetData::from_grid(vec![vec!["Name".into()], vec!["Ann".into()]]);
    /// data.set_header_color(&[0], "#00FF00").unwrap();
    /// let styles = StyleResolver::new(&data, "#4472C4");
    /// assert_eq!(styles.resolve(0, 0).bg_color.as_deref(), Some("#00FF00"));
    /// assert_ne!(styles.resolve(1, 0).bg_color.as_deref(), Some("#00FF00"));
    /// ```
    pub fn resolve(&self, row: u32, col: u16) -> CellStyle {
        let over = self.overrides.get(&CellRef::new(row, col)).copied();
        let mut style = if row == 0 {
            self.header_base.clone()
        } else {
            self.body_base.clone()
        };
        if let Some(o) = over {
            style.merge(o);
        }
        if row == 0 {
            if let Some(color) = self.data.header_colors.get(&col) {
                if is_theme_default_fill(over.and_then(|o| o.bg_color.as_deref())) {
                    style.bg_color = Some(color.clone());
                }
            }
        }
        style
    }
}

fn rgb(color: &str) -> Result<Color> {
    Ok(Color::RGB(parse_color(color)?))
}

/// Translate a resolved style into an xlsx format.
///
/// # Arguments
/// * `style` - Output of [`StyleResolver::resolve`]; unset fields keep the
///   workbook defaults
///
/// # Returns
/// * `Result<Format>` - The format, or `Validation` for a malformed colour,
///   alignment or border value (stored by a client that skipped validation)
pub fn build_format(style: &CellStyle) -> Result<Format> {
    let mut f = Format::new().set_align(FormatAlign::VerticalCenter);

    if let Some(name) = &style.font_name {
        f = f.set_font_name(name);
    }
    if let Some(size) = style.font_size {
        f = f.set_font_size(size);
    }
    if style.bold == Some(true) {
        f = f.set_bold();
    }
    if style.italic == Some(true) {
        f = f.set_italic();
    }
    if style.underline == Some(true) {
        f = f.set_underline(FormatUnderline::Single);
    }
    if let Some(c) = &style.font_color {
        f = f.set_font_color(rgb(c)?);
    }
    if let Some(c) = &style.bg_color {
        // Keywords such as "transparent" mean no fill; anything else must parse.
        if parse_color(c).is_ok() || !is_theme_default_fill(Some(c)) {
            f = f
                .set_background_color(rgb(c)?)
                .set_pattern(FormatPattern::Solid);
        }
    }
    if let Some(a) = &style.horizontal_align {
        f = match HorizontalAlign::parse(a)? {
            HorizontalAlign::General => f,
            HorizontalAlign::Left => f.set_align(FormatAlign::Left),
            HorizontalAlign::Center => f.set_align(FormatAlign::Center),
            HorizontalAlign::Right => f.set_align(FormatAlign::Right),
            HorizontalAlign::Justify => f.set_align(FormatAlign::Justify),
            HorizontalAlign::Fill => f.set_align(FormatAlign::Fill),
        };
    }
    if style.wrap_text == Some(true) {
        f = f.set_text_wrap();
    }
    let border = match style.border_style.as_deref() {
        Some(b) => BorderKind::parse(b)?,
        None => BorderKind::None,
    };
    let border = match border {
        BorderKind::None => None,
        BorderKind::Thin => Some(FormatBorder::Thin),
        BorderKind::Medium => Some(FormatBorder::Medium),
        BorderKind::Thick => Some(FormatBorder::Thick),
        BorderKind::Double => Some(FormatBorder::Double),
        BorderKind::Dashed => Some(FormatBorder::Dashed),
        BorderKind::Dotted => Some(FormatBorder::Dotted),
        BorderKind::Hair => Some(FormatBorder::Hair),
    };
    if let Some(border) = border {
        f = f.set_border(border);
        if let Some(c) = &style.border_color {
            f = f.set_border_color(rgb(c)?);
        }
    }
    if let Some(nf) = &style.number_format {
        if !nf.is_empty() && !nf.eq_ignore_ascii_case("general") {
            f = f.set_num_format(nf);
        }
    }
    Ok(f)
}

fn write_value(
    ws: &mut Worksheet,
    row: u32,
    col: u16,
    value: &CellValue,
    format: &Format,
) -> Result<()> {
    match value {
        CellValue::Empty => ws.write_blank(row, col, format)?,
        CellValue::Integer(n) => ws.write_number_with_format(row, col, *n as f64, format)?,
        CellValue::Float(x) => ws.write_number_with_format(row, col, *x, format)?,
        CellValue::Text(s) => ws.write_string_with_format(row, col, s.as_str(), format)?,
        CellValue::Formula(s) => {
            ws.write_formula_with_format(row, col, Formula::new(s.as_str()), format)?
        }
    };
    Ok(())
}

fn data_validation(rule: &ValidationRule) -> Result<Option<DataValidation>> {
    let dv = match rule.kind.to_ascii_lowercase().as_str() {
        "list" => {
            let options: Vec<&str> = rule
                .options
                .iter()
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .collect();
            if options.is_empty() {
                return Ok(None);
            }
            DataValidation::new().allow_list_strings(&options)?
        }
        "whole" | "number" => {
            let rule = match (rule.min, rule.max) {
                (Some(lo), Some(hi)) => DataValidationRule::Between(lo, hi),
                (Some(lo), None) => DataValidationRule::GreaterThanOrEqualTo(lo),
                (None, Some(hi)) => DataValidationRule::LessThanOrEqualTo(hi),
                (None, None) => return Ok(None),
            };
            DataValidation::new().allow_whole_number(rule)
        }
        "custom" => match &rule.formula {
            Some(formula) => DataValidation::new().allow_custom(Formula::new(formula.as_str())),
            None => return Ok(None),
        },
        other => {
            log::warn!("unsupported validation type \"{}\"", other);
            return Ok(None);
        }
    };
    Ok(Some(dv))
}

pub struct WorkbookExporter {
    options: ExportOptions,
}

impl Default for WorkbookExporter {
    fn default() -> Self {
        WorkbookExporter::new(ExportOptions::default())
    }
}

impl WorkbookExporter {
    pub fn new(options: ExportOptions) -> Self {
        WorkbookExporter { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Render documents, in order, into one workbook.
    ///
    /// Sheets that fail to render are logged and left out of both the file and
    /// the history record. If nothing rendered the call fails: with the sheet's
    /// own error when only one document was given, `NoData` otherwise.
    pub fn export(
        &self,
        owner: &str,
        docs: &[SheetDocument],
        at: DateTime<Utc>,
    ) -> Result<ExportedWorkbook> {
        if docs.is_empty() {
            return Err(SheetError::NoData);
        }

        let mut workbook = Workbook::new();
        let mut used_titles = HashSet::new();
        let mut summaries = Vec::new();
        let mut last_error = None;

        for doc in docs {
            let title = unique_title(&sheet_title(&doc.name), &used_titles);
            match self.render_sheet(doc, &title) {
                Ok((worksheet, summary)) => {
                    used_titles.insert(title.to_lowercase());
                    workbook.push_worksheet(worksheet);
                    summaries.push(summary);
                }
                Err(e) => {
                    log::warn!("skipping sheet \"{}\" of {}: {}", doc.name, owner, e);
                    last_error = Some(e);
                }
            }
        }

        if summaries.is_empty() {
            return Err(match (docs.len(), last_error) {
                (1, Some(e)) => e,
                _ => SheetError::NoData,
            });
        }

        let bytes = workbook.save_to_buffer()?;
        let filename = export_filename(at);
        log::info!(
            "exported {} of {} sheets for {} as {} ({} bytes)",
            summaries.len(),
            docs.len(),
            owner,
            filename,
            bytes.len()
        );
        Ok(ExportedWorkbook {
            bytes,
            record: DownloadRecord {
                id: uuid::Uuid::new_v4().to_string(),
                owner: owner.to_string(),
                filename: filename.clone(),
                downloaded_at: at,
                sheets: summaries,
            },
            filename,
        })
    }

    fn render_sheet(&self, doc: &SheetDocument, title: &str) -> Result<(Worksheet, SheetSummary)> {
        self.build_worksheet(&doc.data, title)
            .map(|ws| {
                let summary = SheetSummary {
                    sheet_name: doc.name.clone(),
                    row_count: doc.data.row_count(),
                    col_count: doc.data.col_count(),
                    headers: doc
                        .data
                        .grid
                        .first()
                        .map(|r| r.iter().map(CellValue::to_string).collect())
                        .unwrap_or_default(),
                };
                (ws, summary)
            })
            .map_err(|e| SheetError::Render {
                sheet: doc.name.clone(),
                reason: match e {
                    SheetError::Validation(msg) => msg,
                    other => other.to_string(),
                },
            })
    }

    fn build_worksheet(&self, data: &SheetData, title: &str) -> Result<Worksheet> {
        let height = data.row_count();
        let width = data.col_count();
        if height > MAX_ROW as usize + 1 || width > MAX_COL as usize + 1 {
            return Err(SheetError::validation(format!(
                "{} x {} cells exceed the worksheet limits",
                height, width
            )));
        }

        let mut ws = Worksheet::new();
        ws.set_name(title)?;
        let styles = StyleResolver::new(data, &self.options.header_fallback_color);

        // Cells, padded to the widest row.
        for (r, cells) in data.grid.iter().enumerate() {
            let row = r as u32;
            for c in 0..width {
                let col = c as u16;
                let format = build_format(&styles.resolve(row, col))?;
                let value = cells.get(c).unwrap_or(&CellValue::Empty);
                write_value(&mut ws, row, col, value, &format)?;
            }
        }

        // Dimensions.
        let header_len = data.grid.first().map(Vec::len).unwrap_or(0);
        for col in 0..header_len as u16 {
            if !data.dimensions.column_widths.contains_key(&col) {
                ws.set_column_width(col, self.options.default_column_width)?;
            }
        }
        for (&col, &px) in &data.dimensions.column_widths {
            if col > MAX_COL {
                continue;
            }
            let chars = (px / PIXELS_PER_CHARACTER).clamp(0.0, MAX_COLUMN_WIDTH);
            ws.set_column_width(col, chars)?;
        }
        for (&row, &px) in &data.dimensions.row_heights {
            if row > MAX_ROW {
                continue;
            }
            ws.set_row_height(row, (px * POINTS_PER_PIXEL).clamp(0.0, MAX_ROW_HEIGHT))?;
        }

        // Merged ranges; the declared content replaces what the grid had there.
        for merged in &data.merged_cells {
            let range = merged.range();
            if range.first_row > range.last_row
                || range.first_col > range.last_col
                || range.last_row > MAX_ROW
                || range.last_col > MAX_COL
            {
                return Err(SheetError::validation(format!("bad merge range {}", range)));
            }
            let format = build_format(&styles.resolve(range.first_row, range.first_col))?;
            if range.is_single_cell() {
                write_value(&mut ws, range.first_row, range.first_col, &merged.content, &format)?;
                continue;
            }
            let text = match &merged.content {
                CellValue::Text(s) => s.as_str(),
                _ => "",
            };
            ws.merge_range(
                range.first_row,
                range.first_col,
                range.last_row,
                range.last_col,
                text,
                &format,
            )?;
            if !matches!(merged.content, CellValue::Text(_) | CellValue::Empty) {
                write_value(&mut ws, range.first_row, range.first_col, &merged.content, &format)?;
            }
        }

        let fmt = &data.formatting;
        if let Some(pane) = fmt.freeze_panes.as_deref().filter(|p| !p.trim().is_empty()) {
            let at = CellRef::parse(pane)?;
            ws.set_freeze_panes(at.row, at.col)?;
        }

        // Column validations cover the data rows under the matching header.
        if height > 1 {
            let headers = data.grid.first().map(Vec::as_slice).unwrap_or_default();
            for (column, rule) in &fmt.validation {
                let Some(col) = headers.iter().position(|h| h.to_string() == *column) else {
                    log::debug!("no header \"{}\" for validation", column);
                    continue;
                };
                if let Some(dv) = data_validation(rule)? {
                    ws.add_data_validation(1, col as u16, height as u32 - 1, col as u16, &dv)?;
                }
            }
        }

        for (range, rule) in &fmt.conditional_formatting {
            if !rule.kind.eq_ignore_ascii_case("data_bar") {
                log::warn!("unsupported conditional format \"{}\" on {}", rule.kind, range);
                continue;
            }
            let range = CellRange::parse(range)?;
            let mut bar = ConditionalFormatDataBar::new();
            if let Some(c) = &rule.bar_color {
                bar = bar.set_fill_color(rgb(c)?);
            }
            if let Some(min) = rule.min_value {
                bar = bar.set_minimum(ConditionalFormatType::Number, min);
            }
            if let Some(max) = rule.max_value {
                bar = bar.set_maximum(ConditionalFormatType::Number, max);
            }
            ws.add_conditional_format(
                range.first_row,
                range.first_col,
                range.last_row,
                range.last_col,
                &bar,
            )?;
        }

        Ok(ws)
    }
}
