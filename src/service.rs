//! Operations exposed to callers, keyed by an owner id the caller has already
//! authenticated.
//!
//! Every call re-reads from the store and normalizes what it read; nothing is
//! cached between calls. Writes replace the whole document (last write wins).

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::cell::{CellRange, CellValue};
use crate::downloader::{ExportOptions, ExportedWorkbook, WorkbookExporter};
use crate::error::{Result, SheetError};
use crate::loader::{
    parse_header_list, parse_tabular_input, UploadedSheet, DEFAULT_CELL_DELIMITER,
    DEFAULT_ROW_DELIMITER,
};
use crate::spreadsheet::{Grid, SheetData, SheetDocument};
use crate::store::{DocumentStore, DownloadRecord, StoredSheet};
use crate::style::{CellStyle, SheetFormatting};
use crate::template::{built_ins, find_built_in, Template, TemplateDraft};

/// Input for [`SheetService::create`]. Either `template_id` or raw
/// `headers`/`data` text.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateSheet {
    #[serde(default)]
    pub name: String,
    /// Comma-separated header names.
    #[serde(default)]
    pub headers: String,
    /// Delimited rows, see [`parse_tabular_input`].
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub row_delimiter: Option<String>,
    #[serde(default)]
    pub cell_delimiter: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub formatting: Option<SheetFormatting>,
}

/// Sheet operations for every owner, on top of a [`DocumentStore`].
///
/// Each mutation loads the stored body, normalizes it, applies the change and
/// writes the whole document back. A failed mutation writes nothing.
///
/// # Examples
/// ```
/// use sheetbook::store::MemoryStore;
/// use sheetbook::{CreateSheet, SheetService};
///
/// let svc = SheetService::new(MemoryStore::new());
/// let req = CreateSheet {
///     name: "Groceries".into(),
///     headers: "Item,Qty".into(),
///     data: "Milk\t2".into(),
///     ..CreateSheet::default()
/// };
/// svc.create("alice", req).unwrap();
/// svc.set_header_color("alice", "Groceries", &[0, 1], "#FFCC00").unwrap();
/// let workbook = svc.export("alice", &["Groceries".to_string()]).unwrap();
/// assert!(workbook.filename.ends_with(".xlsx"));
/// ```
pub struct SheetService<S: DocumentStore> {
    store: S,
    exporter: WorkbookExporter,
}

impl<S: DocumentStore> SheetService<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, ExportOptions::default())
    }

    pub fn with_options(store: S, options: ExportOptions) -> Self {
        SheetService {
            store,
            exporter: WorkbookExporter::new(options),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn load(&self, owner: &str, name: &str) -> Result<SheetDocument> {
        self.store
            .get_sheet(owner, name)?
            .ok_or_else(|| SheetError::sheet_not_found(owner, name))?
            .into_document(owner)
    }

    fn save(&self, doc: &SheetDocument) -> Result<()> {
        self.store
            .put_sheet(&doc.owner, &StoredSheet::from_document(doc)?)
    }

    // Load, mutate, store. Nothing is written when the mutation fails.
    fn edit<T>(
        &self,
        owner: &str,
        name: &str,
        f: impl FnOnce(&mut SheetData) -> Result<T>,
    ) -> Result<T> {
        let mut doc = self.load(owner, name)?;
        let out = doc.mutate(f)?;
        self.save(&doc)?;
        Ok(out)
    }

    fn find_template(&self, owner: &str, id: &str) -> Result<Template> {
        if let Some(t) = find_built_in(id) {
            return Ok(t.clone());
        }
        self.store
            .list_templates(owner)?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SheetError::NotFound(format!("template \"{}\"", id)))
    }

    /// Create a sheet from a template or from raw header and row text.
    ///
    /// # Arguments
    /// * `owner` - Owner of the new sheet
    /// * `req` - Name plus either `template_id` or `headers`/`data`
    ///
    /// # Returns
    /// * `Result<SheetDocument>` - The stored document, or `Validation` for a blank
    ///   name without a template, `DuplicateName` when the owner already has it,
    ///   `NotFound` for an unknown template
    pub fn create(&self, owner: &str, req: CreateSheet) -> Result<SheetDocument> {
        let requested = req.name.trim();
        let (name, mut data) = match req.template_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                let template = self.find_template(owner, id)?;
                let name = if requested.is_empty() {
                    template.default_sheet_name.clone()
                } else {
                    requested.to_string()
                };
                (name, template.instantiate())
            }
            None => {
                if requested.is_empty() {
                    return Err(SheetError::validation("sheet name is required"));
                }
                let headers = parse_header_list(&req.headers);
                let rows = parse_tabular_input(
                    &req.data,
                    req.row_delimiter.as_deref().unwrap_or(DEFAULT_ROW_DELIMITER),
                    req.cell_delimiter.as_deref().unwrap_or(DEFAULT_CELL_DELIMITER),
                    headers.len(),
                )?;
                let mut grid: Grid = Vec::with_capacity(rows.len() + 1);
                if !headers.is_empty() {
                    grid.push(headers);
                }
                grid.extend(rows);
                (requested.to_string(), SheetData::from_grid(grid))
            }
        };
        if let Some(formatting) = &req.formatting {
            data.update_formatting(formatting)?;
        }

        if self.store.get_sheet(owner, &name)?.is_some() {
            return Err(SheetError::DuplicateName {
                owner: owner.to_string(),
                name,
            });
        }
        let doc = SheetDocument::new(owner, &name, data);
        self.save(&doc)?;
        log::info!("created sheet \"{}\" for {}", name, owner);
        Ok(doc)
    }

    /// Read one sheet in structured form, whatever shape it was stored in.
    pub fn get(&self, owner: &str, name: &str) -> Result<SheetDocument> {
        self.load(owner, name)
    }

    pub fn list(&self, owner: &str) -> Result<Vec<SheetDocument>> {
        self.store
            .list_sheets(owner)?
            .into_iter()
            .map(|s| s.into_document(owner))
            .collect()
    }

    /// Replace the grid, leaving formatting side-tables alone.
    pub fn set_grid(&self, owner: &str, name: &str, rows: Grid) -> Result<()> {
        self.edit(owner, name, |d| {
            d.grid = rows;
            Ok(())
        })
    }

    /// Merge a partial style into the override of one cell.
    ///
    /// # Arguments
    /// * `cell_ref` - A1-style reference, case-insensitive
    /// * `style` - Only its set fields are written; the rest of the override stays
    ///
    /// # Returns
    /// * `Result<()>` - `Validation` for a bad reference or colour, in which case
    ///   the stored sheet is untouched
    pub fn mutate_format(
        &self,
        owner: &str,
        name: &str,
        cell_ref: &str,
        style: &CellStyle,
    ) -> Result<()> {
        self.edit(owner, name, |d| d.set_cell_format(cell_ref, style))
    }

    /// Colour the header cells of the given zero-based columns. Export applies
    /// it on row 0 over the header base style.
    ///
    /// # Arguments
    /// * `cols` - Zero-based column indexes
    /// * `color` - `#RRGGBB` or `RRGGBB`
    pub fn set_header_color(&self, owner: &str, name: &str, cols: &[u16], color: &str) -> Result<()> {
        self.edit(owner, name, |d| d.set_header_color(cols, color))
    }

    /// Merge `range` ("A1:D1") with `content` shown in its top-left cell.
    /// Overlapping an existing merge or covering one cell is a `Validation` error.
    pub fn merge(&self, owner: &str, name: &str, range: &str, content: CellValue) -> Result<()> {
        let range = CellRange::parse(range)?;
        self.edit(owner, name, |d| d.add_merge(range, content))
    }

    /// Removing a range that is not merged succeeds and changes nothing.
    pub fn unmerge(&self, owner: &str, name: &str, range: &str) -> Result<()> {
        let range = CellRange::parse(range)?;
        let removed = self.edit(owner, name, |d| Ok(d.remove_merge(range)))?;
        if removed == 0 {
            log::debug!("unmerge {} on \"{}\": nothing merged there", range, name);
        }
        Ok(())
    }

    /// Shallow-merge column widths and row heights, both in pixels.
    ///
    /// # Arguments
    /// * `column_widths` - Zero-based column to width; `None` leaves widths alone
    /// * `row_heights` - Zero-based row to height; `None` leaves heights alone
    ///
    /// # Returns
    /// * `Result<()>` - `Validation` for a negative or non-finite size
    pub fn set_dimensions(
        &self,
        owner: &str,
        name: &str,
        column_widths: Option<&BTreeMap<u16, f64>>,
        row_heights: Option<&BTreeMap<u32, f64>>,
    ) -> Result<()> {
        self.edit(owner, name, |d| d.set_dimensions(column_widths, row_heights))
    }

    pub fn update_formatting(&self, owner: &str, name: &str, update: &SheetFormatting) -> Result<()> {
        self.edit(owner, name, |d| d.update_formatting(update))
    }

    pub fn delete(&self, owner: &str, name: &str) -> Result<()> {
        if !self.store.delete_sheet(owner, name)? {
            return Err(SheetError::sheet_not_found(owner, name));
        }
        log::info!("deleted sheet \"{}\" of {}", name, owner);
        Ok(())
    }

    /// Drop the owner's sheets, export history and custom templates.
    pub fn delete_owner(&self, owner: &str) -> Result<()> {
        self.store.delete_owner(owner)?;
        log::info!("deleted everything owned by {}", owner);
        Ok(())
    }

    /// Store sheets handed over by the upload ingester. Sheets without data rows
    /// and names the owner already uses are skipped. Returns the created names.
    pub fn ingest_upload(&self, owner: &str, sheets: Vec<UploadedSheet>) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for upload in sheets {
            let name = upload.sheet_name.trim().to_string();
            if name.is_empty() {
                log::warn!("skipping unnamed uploaded sheet for {}", owner);
                continue;
            }
            if self.store.get_sheet(owner, &name)?.is_some() {
                log::warn!("uploaded sheet \"{}\" already exists for {}", name, owner);
                continue;
            }
            let Some(data) = upload.into_sheet_data() else {
                log::debug!("uploaded sheet \"{}\" has no data rows", name);
                continue;
            };
            self.save(&SheetDocument::new(owner, &name, data))?;
            created.push(name);
        }
        Ok(created)
    }

    /// Export the named sheets, in order, into one workbook and record it in the
    /// owner's history. Unknown or unreadable sheets are skipped.
    pub fn export(&self, owner: &str, names: &[String]) -> Result<ExportedWorkbook> {
        let mut docs = Vec::with_capacity(names.len());
        for name in names {
            let Some(stored) = self.store.get_sheet(owner, name)? else {
                log::warn!("export for {}: no sheet \"{}\"", owner, name);
                continue;
            };
            match stored.into_document(owner) {
                Ok(doc) => docs.push(doc),
                Err(e) => log::warn!("export for {}: sheet \"{}\" unreadable: {}", owner, name, e),
            }
        }
        if docs.is_empty() {
            return Err(SheetError::NoData);
        }

        let exported = match self.exporter.export(owner, &docs, Utc::now()) {
            Err(SheetError::Render { .. }) if names.len() > 1 => return Err(SheetError::NoData),
            other => other?,
        };
        self.store.append_download(&exported.record)?;
        Ok(exported)
    }

    pub fn history(&self, owner: &str) -> Result<Vec<DownloadRecord>> {
        self.store.list_downloads(owner)
    }

    /// Built-in templates followed by the owner's own.
    pub fn templates(&self, owner: &str) -> Result<Vec<Template>> {
        let mut all = built_ins().to_vec();
        all.extend(self.store.list_templates(owner)?);
        Ok(all)
    }

    pub fn add_template(&self, owner: &str, draft: TemplateDraft) -> Result<Template> {
        let template = Template::from_draft(draft)?;
        if find_built_in(&template.id).is_some() {
            return Err(SheetError::validation(format!(
                "template id \"{}\" is reserved",
                template.id
            )));
        }
        self.store.put_template(owner, &template)?;
        Ok(template)
    }

    /// Save a stored sheet as a custom template.
    pub fn promote_sheet(&self, owner: &str, sheet_name: &str, template_name: &str) -> Result<Template> {
        if template_name.trim().is_empty() {
            return Err(SheetError::validation("template name is required"));
        }
        let doc = self.load(owner, sheet_name)?;
        let template = Template::from_sheet(&doc, template_name.trim());
        self.store.put_template(owner, &template)?;
        Ok(template)
    }

    /// Turn one sheet of a past export into a custom template carrying its headers.
    /// Without `sheet_name` the first sheet of the export is used.
    pub fn promote_download(
        &self,
        owner: &str,
        download_id: &str,
        sheet_name: Option<&str>,
        template_name: &str,
    ) -> Result<Template> {
        if template_name.trim().is_empty() {
            return Err(SheetError::validation("template name is required"));
        }
        let record = self
            .store
            .list_downloads(owner)?
            .into_iter()
            .find(|r| r.id == download_id)
            .ok_or_else(|| SheetError::NotFound(format!("download \"{}\"", download_id)))?;
        let summary = match sheet_name {
            Some(name) => record.sheets.iter().find(|s| s.sheet_name == name),
            None => record.sheets.first(),
        }
        .ok_or_else(|| {
            SheetError::NotFound(format!(
                "sheet \"{}\" in download \"{}\"",
                sheet_name.unwrap_or_default(),
                download_id
            ))
        })?;
        if summary.headers.is_empty() {
            return Err(SheetError::validation(format!(
                "sheet \"{}\" was exported without headers",
                summary.sheet_name
            )));
        }
        let template = Template {
            id: uuid::Uuid::new_v4().to_string(),
            name: template_name.trim().to_string(),
            description: format!("Saved from {}", record.filename),
            default_sheet_name: summary.sheet_name.clone(),
            headers: summary.headers.clone(),
            sample_data: Vec::new(),
            formatting: SheetFormatting::default(),
        };
        self.store.put_template(owner, &template)?;
        Ok(template)
    }
}
