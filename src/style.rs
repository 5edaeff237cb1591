//! Per-cell style overrides and sheet-wide formatting defaults.
//!
//! Style values are stored the way the browser sends them (hex strings, alignment
//! names) so that a document written by an older client still loads. They are
//! validated on every write path and parsed again when a workbook is rendered.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SheetError};

/// Header background used when neither the column nor the sheet names one.
pub const FALLBACK_HEADER_COLOR: &str = "#F0E68C";
pub const DEFAULT_BORDER_COLOR: &str = "#D3D3D3";
pub const DEFAULT_FONT_NAME: &str = "Calibri";
pub const DEFAULT_FONT_SIZE: f64 = 11.0;

/// Parse `#RRGGBB`, `RRGGBB` or `#RGB` into a 24-bit RGB value.
pub fn parse_color(s: &str) -> Result<u32> {
    let hex = s.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SheetError::validation(format!("bad color \"{}\"", s)));
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(SheetError::validation(format!("bad color \"{}\"", s))),
    };
    u32::from_str_radix(&expanded, 16)
        .map_err(|_| SheetError::validation(format!("bad color \"{}\"", s)))
}

/// Canonical `#RRGGBB` spelling of a color.
pub fn normalize_color(s: &str) -> Result<String> {
    Ok(format!("#{:06X}", parse_color(s)?))
}

/// A fill that means "whatever the theme does": absent, keyword, or plain white.
pub fn is_theme_default_fill(fill: Option<&str>) -> bool {
    match fill.map(str::trim) {
        None | Some("") => true,
        Some(f) => {
            matches!(
                f.to_ascii_lowercase().as_str(),
                "transparent" | "auto" | "none" | "inherit" | "initial"
            ) || parse_color(f).map(|rgb| rgb == 0xFF_FF_FF).unwrap_or(false)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HorizontalAlign {
    General,
    Left,
    Center,
    Right,
    Justify,
    Fill,
}

impl HorizontalAlign {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "general" => Ok(HorizontalAlign::General),
            "left" | "start" => Ok(HorizontalAlign::Left),
            "center" | "centre" => Ok(HorizontalAlign::Center),
            "right" | "end" => Ok(HorizontalAlign::Right),
            "justify" => Ok(HorizontalAlign::Justify),
            "fill" => Ok(HorizontalAlign::Fill),
            _ => Err(SheetError::validation(format!("bad alignment \"{}\"", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderKind {
    None,
    Thin,
    Medium,
    Thick,
    Double,
    Dashed,
    Dotted,
    Hair,
}

impl BorderKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(BorderKind::None),
            "thin" | "solid" => Ok(BorderKind::Thin),
            "medium" => Ok(BorderKind::Medium),
            "thick" => Ok(BorderKind::Thick),
            "double" => Ok(BorderKind::Double),
            "dashed" => Ok(BorderKind::Dashed),
            "dotted" => Ok(BorderKind::Dotted),
            "hair" => Ok(BorderKind::Hair),
            _ => Err(SheetError::validation(format!("bad border style \"{}\"", s))),
        }
    }
}

/// Style override for a single cell. Unset fields fall through to the layer below.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_align: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

macro_rules! overlay {
    ($dst:ident, $src:ident, $($field:ident),+) => {
        $(
            if let Some(v) = &$src.$field {
                $dst.$field = Some(v.clone());
            }
        )+
    };
}

impl CellStyle {
    /// The workbook-wide base every cell starts from.
    pub fn global_default() -> Self {
        CellStyle {
            font_name: Some(DEFAULT_FONT_NAME.to_string()),
            font_size: Some(DEFAULT_FONT_SIZE),
            bold: Some(false),
            italic: Some(false),
            underline: Some(false),
            horizontal_align: Some("left".to_string()),
            wrap_text: Some(false),
            border_style: Some("thin".to_string()),
            border_color: Some(DEFAULT_BORDER_COLOR.to_string()),
            ..CellStyle::default()
        }
    }

    /// Copy every field set in `other` over this style. Last write wins per field.
    pub fn merge(&mut self, other: &CellStyle) {
        overlay!(
            self,
            other,
            font_name,
            font_size,
            bold,
            italic,
            underline,
            font_color,
            bg_color,
            horizontal_align,
            wrap_text,
            border_style,
            border_color,
            number_format
        );
    }

    pub fn merged(mut self, other: &CellStyle) -> Self {
        self.merge(other);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == CellStyle::default()
    }

    /// Check every set field and return a copy with colors in canonical form.
    /// Nothing is returned (and nothing should be applied) if any field is bad.
    pub fn validated(&self) -> Result<CellStyle> {
        let mut out = self.clone();
        if let Some(size) = self.font_size {
            if !size.is_finite() || size <= 0.0 || size > 409.0 {
                return Err(SheetError::validation(format!("bad font size {}", size)));
            }
        }
        if let Some(name) = &self.font_name {
            if name.trim().is_empty() {
                return Err(SheetError::validation("font name is empty"));
            }
        }
        if let Some(c) = &self.font_color {
            out.font_color = Some(normalize_color(c)?);
        }
        if let Some(c) = &self.bg_color {
            if !is_theme_default_fill(Some(c)) || parse_color(c).is_ok() {
                out.bg_color = Some(normalize_color(c)?);
            }
        }
        if let Some(c) = &self.border_color {
            out.border_color = Some(normalize_color(c)?);
        }
        if let Some(a) = &self.horizontal_align {
            HorizontalAlign::parse(a)?;
        }
        if let Some(b) = &self.border_style {
            BorderKind::parse(b)?;
        }
        Ok(out)
    }
}

/// Rule for an xlsx data validation applied to one column's data rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// Data-bar conditional format over an A1 range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

/// Sheet-wide defaults: header look, body look and the extra worksheet features.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetFormatting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_bg_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_alignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_wrap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_cells: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_panes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation: BTreeMap<String, ValidationRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditional_formatting: BTreeMap<String, ConditionalRule>,
}

impl SheetFormatting {
    /// Defaults given to sheets that arrive through an upload.
    pub fn uploaded() -> Self {
        SheetFormatting {
            header_bg_color: Some(FALLBACK_HEADER_COLOR.to_string()),
            cell_alignment: Some("left".to_string()),
            ..SheetFormatting::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SheetFormatting::default()
    }

    /// Shallow merge: scalar fields set in `other` win, rule maps are merged by key.
    pub fn merge(&mut self, other: &SheetFormatting) {
        overlay!(
            self,
            other,
            title_font_size,
            title_bold,
            header_bg_color,
            cell_font_size,
            cell_alignment,
            cell_border_color,
            text_wrap,
            number_format,
            merge_cells,
            freeze_panes
        );
        for (k, v) in &other.validation {
            self.validation.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.conditional_formatting {
            self.conditional_formatting.insert(k.clone(), v.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.header_style(FALLBACK_HEADER_COLOR).validated()?;
        self.body_style().validated()?;
        for rule in self.conditional_formatting.values() {
            if let Some(c) = &rule.bar_color {
                parse_color(c)?;
            }
        }
        Ok(())
    }

    /// Base style of every data row (row 1 and below).
    pub fn body_style(&self) -> CellStyle {
        CellStyle {
            font_size: self.cell_font_size,
            horizontal_align: self.cell_alignment.clone(),
            wrap_text: self.text_wrap,
            border_color: self.cell_border_color.clone(),
            number_format: self.number_format.clone(),
            ..CellStyle::default()
        }
    }

    /// Base style of the header row: bold, centered, bordered, filled.
    pub fn header_style(&self, fallback_bg: &str) -> CellStyle {
        CellStyle {
            font_size: self.title_font_size,
            bold: Some(self.title_bold.unwrap_or(true)),
            bg_color: Some(
                self.header_bg_color
                    .clone()
                    .unwrap_or_else(|| fallback_bg.to_string()),
            ),
            horizontal_align: Some("center".to_string()),
            wrap_text: self.text_wrap,
            border_style: Some("thin".to_string()),
            border_color: self.cell_border_color.clone(),
            ..CellStyle::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors() {
        assert_eq!(parse_color("#FF0000").unwrap(), 0xFF0000);
        assert_eq!(parse_color("0f0").unwrap(), 0x00FF00);
        assert_eq!(normalize_color("#4f81bd").unwrap(), "#4F81BD");
        assert!(parse_color("#GG0000").is_err());
        assert!(parse_color("red").is_err());
        assert!(is_theme_default_fill(Some("#ffffff")));
        assert!(is_theme_default_fill(Some("transparent")));
        assert!(!is_theme_default_fill(Some("#FF0000")));
    }

    #[test]
    fn merge_is_last_write_wins_per_field() {
        let mut style = CellStyle {
            bold: Some(true),
            font_color: Some("#000000".into()),
            ..CellStyle::default()
        };
        style.merge(&CellStyle {
            font_color: Some("#FF0000".into()),
            italic: Some(true),
            ..CellStyle::default()
        });
        assert_eq!(style.bold, Some(true));
        assert_eq!(style.italic, Some(true));
        assert_eq!(style.font_color.as_deref(), Some("#FF0000"));
    }

    #[test]
    fn validation_rejects_without_partial_result() {
        let bad = CellStyle {
            bold: Some(true),
            bg_color: Some("#12345".into()),
            ..CellStyle::default()
        };
        assert!(matches!(bad.validated(), Err(SheetError::Validation(_))));

        let ok = CellStyle {
            bg_color: Some("transparent".into()),
            border_color: Some("abc".into()),
            horizontal_align: Some("Centre".into()),
            ..CellStyle::default()
        }
        .validated()
        .unwrap();
        assert_eq!(ok.bg_color.as_deref(), Some("transparent"));
        assert_eq!(ok.border_color.as_deref(), Some("#AABBCC"));
    }

    #[test]
    fn header_style_layers_sheet_defaults() {
        let fmt = SheetFormatting {
            header_bg_color: Some("#4F81BD".into()),
            title_font_size: Some(20.0),
            ..SheetFormatting::default()
        };
        let header = fmt.header_style(FALLBACK_HEADER_COLOR);
        assert_eq!(header.bg_color.as_deref(), Some("#4F81BD"));
        assert_eq!(header.bold, Some(true));
        assert_eq!(header.font_size, Some(20.0));

        let plain = SheetFormatting::default().header_style(FALLBACK_HEADER_COLOR);
        assert_eq!(plain.bg_color.as_deref(), Some(FALLBACK_HEADER_COLOR));
    }
}
