use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::cell::{CellRef, CellValue};
use crate::error::{Result, SheetError};
use crate::loader::{parse_header_list, parse_tabular_input};
use crate::spreadsheet::{Grid, SheetData, SheetDocument};
use crate::style::{CellStyle, SheetFormatting, ValidationRule};

/// Read-only seed for a new sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_sheet_name: String,
    pub headers: Vec<String>,
    #[serde(default)]
    pub sample_data: Grid,
    #[serde(default)]
    pub formatting: SheetFormatting,
}

lazy_static! {
    static ref BUILT_IN_TEMPLATES: Vec<Template> = built_in_templates();
}

/// Templates shipped with the application, in display order.
pub fn built_ins() -> &'static [Template] {
    &BUILT_IN_TEMPLATES
}

pub fn find_built_in(id: &str) -> Option<&'static Template> {
    BUILT_IN_TEMPLATES.iter().find(|t| t.id == id)
}

fn seed(
    id: &str,
    name: &str,
    default_sheet_name: &str,
    description: &str,
    headers: &[&str],
    rows: &[&[&str]],
    formatting: SheetFormatting,
) -> Template {
    Template {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        default_sheet_name: default_sheet_name.to_string(),
        headers: headers.iter().map(|h| h.to_string()).collect(),
        sample_data: rows
            .iter()
            .map(|r| r.iter().map(|v| CellValue::from_input(v)).collect())
            .collect(),
        formatting,
    }
}

fn built_in_templates() -> Vec<Template> {
    vec![
        seed(
            "1",
            "Assignment Tracker",
            "Assignment Tracker",
            "Track student assignments with auto-calculated totals",
            &["Sr No", "Name", "Roll No", "ASS1", "ASS2", "ASS3", "Total"],
            &[
                &["1", "John Doe", "101", "85", "90", "88", "=SUM(D2:F2)"],
                &["2", "Jane Smith", "102", "78", "92", "95", "=SUM(D3:F3)"],
                &["3", "Bob Johnson", "103", "92", "85", "79", "=SUM(D4:F4)"],
                &["4", "Alice Brown", "104", "88", "91", "94", "=SUM(D5:F5)"],
                &["5", "Charlie Wilson", "105", "76", "82", "89", "=SUM(D6:F6)"],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "2",
            "Expense Tracker",
            "Expense Tracker",
            "Track your daily expenses by category",
            &["Date", "Category", "Description", "Amount", "Payment Method", "Notes"],
            &[
                &["2023-07-01", "Groceries", "Weekly shopping", "78.50", "Credit Card", ""],
                &["2023-07-03", "Utilities", "Electricity bill", "120.00", "Bank Transfer", ""],
                &["2023-07-05", "Transportation", "Gas", "45.75", "Cash", ""],
                &["2023-07-08", "Entertainment", "Movie tickets", "24.00", "Credit Card", ""],
                &["2023-07-10", "Food", "Restaurant dinner", "65.25", "Credit Card", ""],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "3",
            "Project Task List",
            "Project Tasks",
            "Manage project tasks with priorities and deadlines",
            &["Task ID", "Task Name", "Assigned To", "Start Date", "Due Date", "Status", "Priority", "Notes"],
            &[
                &["T-001", "Project Planning", "John Smith", "2023-07-01", "2023-07-05", "Completed", "High", ""],
                &["T-002", "Research", "Jane Doe", "2023-07-06", "2023-07-15", "In Progress", "Medium", ""],
                &["T-003", "Design", "Bob Johnson", "2023-07-16", "2023-07-25", "Not Started", "High", ""],
                &["T-004", "Development", "Alice Brown", "2023-07-26", "2023-08-15", "Not Started", "High", ""],
                &["T-005", "Testing", "Charlie Wilson", "2023-08-16", "2023-08-25", "Not Started", "Medium", ""],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "4",
            "Inventory Tracker",
            "Inventory",
            "Track inventory with automatic value calculation",
            &["Item ID", "Item Name", "Category", "Quantity", "Unit Price", "Total Value", "Reorder Level", "Last Updated"],
            &[
                &["I-001", "Desk Chair", "Furniture", "15", "89.99", "=D2*E2", "5", "2023-06-15"],
                &["I-002", "Desk Lamp", "Lighting", "25", "24.99", "=D3*E3", "10", "2023-06-18"],
                &["I-003", "Notebook", "Stationery", "100", "3.99", "=D4*E4", "25", "2023-06-20"],
                &["I-004", "Ballpoint Pen", "Stationery", "200", "1.49", "=D5*E5", "50", "2023-06-22"],
                &["I-005", "Wireless Mouse", "Electronics", "20", "19.99", "=D6*E6", "8", "2023-06-25"],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "5",
            "Budget Planner",
            "Budget",
            "Plan and track your monthly budget by category",
            &["Category", "Budgeted", "Week 1", "Week 2", "Week 3", "Week 4", "Total Spent", "Remaining"],
            &[
                &["Groceries", "400.00", "95.25", "105.50", "85.75", "98.30", "=SUM(C2:F2)", "=B2-G2"],
                &["Utilities", "200.00", "0.00", "180.00", "0.00", "0.00", "=SUM(C3:F3)", "=B3-G3"],
                &["Transportation", "150.00", "35.00", "42.50", "38.25", "45.75", "=SUM(C4:F4)", "=B4-G4"],
                &["Entertainment", "100.00", "0.00", "45.00", "25.00", "35.00", "=SUM(C5:F5)", "=B5-G5"],
                &["Dining Out", "120.00", "35.00", "0.00", "42.50", "38.00", "=SUM(C6:F6)", "=B6-G6"],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "6",
            "Employee Attendance",
            "Attendance",
            "Track employee attendance and calculate overtime",
            &["Emp ID", "Name", "Mon", "Tue", "Wed", "Thu", "Fri", "Total Hours", "Overtime"],
            &[
                &["E001", "John Smith", "8", "8", "8", "8", "8", "=SUM(C2:G2)", "=IF(H2>40,H2-40,0)"],
                &["E002", "Jane Doe", "8", "8", "9", "8", "7", "=SUM(C3:G3)", "=IF(H3>40,H3-40,0)"],
                &["E003", "Bob Johnson", "9", "8", "8", "9", "8", "=SUM(C4:G4)", "=IF(H4>40,H4-40,0)"],
                &["E004", "Alice Brown", "8", "8", "8", "8", "4", "=SUM(C5:G5)", "=IF(H5>40,H5-40,0)"],
                &["E005", "Charlie Wilson", "10", "8", "9", "8", "8", "=SUM(C6:G6)", "=IF(H6>40,H6-40,0)"],
            ],
            SheetFormatting::default(),
        ),
        seed(
            "front_page",
            "Front Page",
            "Front Page",
            "Title page with merged banner rows",
            &["Title", "Subtitle", "Date", "Author"],
            &[
                &["Course Workbook", "Comprehensive Guide", "2023-09-01", "John Doe"],
                &["", "Module 1", "", ""],
                &["", "Module 2", "", ""],
            ],
            SheetFormatting {
                title_font_size: Some(20.0),
                title_bold: Some(true),
                header_bg_color: Some("#4F81BD".to_string()),
                cell_font_size: Some(12.0),
                cell_alignment: Some("center".to_string()),
                cell_border_color: Some("#000000".to_string()),
                text_wrap: Some(true),
                merge_cells: Some("A1:D1,A2:D2,A3:D3".to_string()),
                ..SheetFormatting::default()
            },
        ),
        seed(
            "summary",
            "Summary Sheet",
            "Summary",
            "Workbook summary with counted and averaged fields",
            &["Item", "Value", "Formula", "Notes"],
            &[
                &["Total Students", "=COUNT(Data!B2:B100)", "", "Automatic count"],
                &["Average Score", "=AVERAGE(Data!C2:C100)", "", "Calculated field"],
            ],
            SheetFormatting {
                header_bg_color: Some("#9BBB59".to_string()),
                title_font_size: Some(14.0),
                cell_alignment: Some("left".to_string()),
                number_format: Some("#,##0.00".to_string()),
                validation: [(
                    "Notes".to_string(),
                    ValidationRule {
                        kind: "list".to_string(),
                        options: vec!["Important".into(), "Review".into(), "Done".into()],
                        min: None,
                        max: None,
                        formula: None,
                    },
                )]
                .into_iter()
                .collect(),
                ..SheetFormatting::default()
            },
        ),
    ]
}

/// Form input for a user-defined template.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TemplateDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub default_sheet_name: String,
    pub headers: String,
    #[serde(default)]
    pub sample_data: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub formatting: SheetFormatting,
}

impl Template {
    pub fn from_draft(draft: TemplateDraft) -> Result<Self> {
        let headers: Vec<String> = parse_header_list(&draft.headers)
            .iter()
            .map(CellValue::to_string)
            .collect();
        if draft.name.trim().is_empty()
            || draft.default_sheet_name.trim().is_empty()
            || headers.is_empty()
        {
            return Err(SheetError::validation(
                "template needs a name, a default sheet name and headers",
            ));
        }
        draft.formatting.validate()?;
        let sample_data = parse_tabular_input(&draft.sample_data, "\n", "\t", headers.len())?;
        Ok(Template {
            id: new_template_id(draft.id),
            name: draft.name.trim().to_string(),
            description: draft.description,
            default_sheet_name: draft.default_sheet_name.trim().to_string(),
            headers,
            sample_data,
            formatting: draft.formatting,
        })
    }

    /// Capture a stored sheet as a template: row 0 becomes the headers, the rest
    /// the sample rows, merged ranges go back into the `merge_cells` list.
    pub fn from_sheet(doc: &SheetDocument, name: &str) -> Self {
        let mut rows = doc.data.grid.iter();
        let headers: Vec<String> = rows
            .next()
            .map(|r| r.iter().map(CellValue::to_string).collect())
            .unwrap_or_default();
        let mut formatting = doc.data.formatting.clone();
        if !doc.data.merged_cells.is_empty() {
            let ranges: Vec<String> = doc
                .data
                .merged_cells
                .iter()
                .map(|m| m.range().to_string())
                .collect();
            formatting.merge_cells = Some(ranges.join(","));
        }
        Template {
            id: new_template_id(None),
            name: name.to_string(),
            description: format!("Saved from sheet \"{}\"", doc.name),
            default_sheet_name: doc.name.clone(),
            headers,
            sample_data: rows.cloned().collect(),
            formatting,
        }
    }

    /// Seed a sheet body: headers, padded sample rows, sheet defaults, merges, and
    /// header-cell overrides for the title font settings.
    pub fn instantiate(&self) -> SheetData {
        let width = self.headers.len();
        let mut grid: Grid = Vec::with_capacity(self.sample_data.len() + 1);
        grid.push(
            self.headers
                .iter()
                .map(|h| CellValue::from_stored(h.clone()))
                .collect(),
        );
        for row in &self.sample_data {
            let mut row = row.clone();
            if row.len() < width {
                row.resize(width, CellValue::Empty);
            }
            grid.push(row);
        }

        let mut data = SheetData::with_formatting(grid, self.formatting.clone());
        let title = CellStyle {
            font_size: self.formatting.title_font_size,
            bold: self.formatting.title_bold,
            ..CellStyle::default()
        };
        if !title.is_empty() {
            for col in 0..width.min(u16::MAX as usize) {
                data.format_metadata
                    .insert(CellRef::new(0, col as u16).to_string(), title.clone());
            }
        }
        data
    }
}

fn new_template_id(requested: Option<String>) -> String {
    requested
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_planner_seeds_formulas() {
        let t = find_built_in("5").unwrap();
        assert_eq!(t.name, "Budget Planner");
        let data = t.instantiate();
        assert_eq!(data.grid[0].len(), 8);
        assert_eq!(data.grid[1][1], CellValue::Float(400.0));
        assert_eq!(data.grid[1][6], CellValue::Formula("=SUM(C2:F2)".into()));
        assert!(data.format_metadata.is_empty());
    }

    #[test]
    fn front_page_merges_and_title_overrides() {
        let data = find_built_in("front_page").unwrap().instantiate();
        assert_eq!(data.merged_cells.len(), 3);
        assert_eq!(data.merged_cells[0].content, CellValue::Text("Title".into()));
        assert_eq!(data.format_metadata["D1"].font_size, Some(20.0));
        assert_eq!(data.formatting.header_bg_color.as_deref(), Some("#4F81BD"));
    }

    #[test]
    fn built_in_ids_are_unique() {
        let mut ids: Vec<&str> = built_ins().iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), built_ins().len());
    }

    #[test]
    fn draft_requires_headers() {
        let draft = TemplateDraft {
            name: "Grades".into(),
            default_sheet_name: "Grades".into(),
            headers: " , ".into(),
            ..TemplateDraft::default()
        };
        assert!(matches!(Template::from_draft(draft), Err(SheetError::Validation(_))));

        let draft = TemplateDraft {
            id: Some("grades".into()),
            name: "Grades".into(),
            default_sheet_name: "Grades".into(),
            headers: "Name, Mark".into(),
            sample_data: "Ann\t9\nBob".into(),
            ..TemplateDraft::default()
        };
        let t = Template::from_draft(draft).unwrap();
        assert_eq!(t.id, "grades");
        assert_eq!(t.sample_data[1], vec![CellValue::Text("Bob".into()), CellValue::Empty]);
    }
}
