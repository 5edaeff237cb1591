use sheetbook::cell::CellValue;
use sheetbook::loader::UploadedSheet;
use sheetbook::saving::FileStore;
use sheetbook::store::{DocumentStore, MemoryStore};
use sheetbook::style::{CellStyle, FALLBACK_HEADER_COLOR};
use sheetbook::{CreateSheet, SheetError, SheetService};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

fn from_template(name: &str, template_id: &str) -> CreateSheet {
    CreateSheet {
        name: name.to_string(),
        template_id: Some(template_id.to_string()),
        ..CreateSheet::default()
    }
}

fn from_text(name: &str, headers: &str, data: &str) -> CreateSheet {
    CreateSheet {
        name: name.to_string(),
        headers: headers.to_string(),
        data: data.to_string(),
        ..CreateSheet::default()
    }
}

fn rows(cells: &[&[&str]]) -> Vec<Vec<CellValue>> {
    cells
        .iter()
        .map(|r| r.iter().map(|c| CellValue::from_input(c)).collect())
        .collect()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn read_part(bytes: &[u8], part: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(part).unwrap();
    let mut xml = String::new();
    file.read_to_string(&mut xml).unwrap();
    xml
}

// Style index (`s="N"`) of one cell in the sheet XML
fn style_index(sheet: &str, cell: &str) -> Option<String> {
    let start = sheet.find(&format!("<c r=\"{}\"", cell))?;
    let rest = &sheet[start..];
    let tag = &rest[..rest.find('>')?];
    tag.split(" s=\"").nth(1).map(|s| s.split('"').next().unwrap_or("").to_string())
}

// Header colour, pixel sizes and a cell override set through the service,
// read back from the store, then exported.
fn styled_sheet_survives_storage<S: DocumentStore>(svc: &SheetService<S>) {
    svc.create("alice", from_text("Scores", "Name,Score,Note", "Ann\t90\tok"))
        .unwrap();
    svc.set_header_color("alice", "Scores", &[0, 1], "#FF0000")
        .unwrap();
    let widths: BTreeMap<u16, f64> = [(0, 210.0)].into_iter().collect();
    let heights: BTreeMap<u32, f64> = [(0, 40.0)].into_iter().collect();
    svc.set_dimensions("alice", "Scores", Some(&widths), Some(&heights))
        .unwrap();
    let bold = CellStyle {
        bold: Some(true),
        ..CellStyle::default()
    };
    svc.mutate_format("alice", "Scores", "B2", &bold).unwrap();

    // Step 1: the stored body reads back with every side-table
    let doc = svc.get("alice", "Scores").expect("Styled sheet became unreadable");
    assert_eq!(doc.data.header_colors.len(), 2);
    assert_eq!(doc.data.dimensions.column_widths.get(&0), Some(&210.0));
    assert_eq!(doc.data.dimensions.row_heights.get(&0), Some(&40.0));
    assert_eq!(doc.data.format_metadata["B2"].bold, Some(true));
    assert_eq!(svc.list("alice").unwrap().len(), 1);

    // Step 2: the export carries them
    let exported = svc.export("alice", &names(&["Scores"])).unwrap();
    assert_eq!(exported.record.sheets.len(), 1, "Styled sheet was skipped");
    let css = read_part(&exported.bytes, "xl/styles.xml");
    assert!(css.contains("FFFF0000"), "Header fill missing from styles");
    let sheet = read_part(&exported.bytes, "xl/worksheets/sheet1.xml");
    assert_eq!(style_index(&sheet, "A1"), style_index(&sheet, "B1"));
    assert_ne!(style_index(&sheet, "B1"), style_index(&sheet, "C1"));
    assert_ne!(style_index(&sheet, "A2"), style_index(&sheet, "B2"), "Bold override lost");
    // 210px / 7 = 30 chars; 40px * 0.75 = 30pt
    assert!(sheet.contains("ht=\"30\""), "Row height not converted");
    assert!(sheet.contains("<col min=\"1\" max=\"1\" width=\"30"), "Column width not converted");

    // Step 3: still editable afterwards
    svc.merge("alice", "Scores", "A3:C3", CellValue::from("Total"))
        .unwrap();
    assert_eq!(svc.history("alice").unwrap().len(), 1);
}

#[test]
fn budget_from_template_reads_back() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_template("Budget", "5")).unwrap();

    let doc = svc.get("alice", "Budget").unwrap();
    let header: Vec<String> = doc.data.grid[0].iter().map(|c| c.to_string()).collect();
    assert_eq!(
        header,
        vec!["Category", "Budgeted", "Week 1", "Week 2", "Week 3", "Week 4", "Total Spent", "Remaining"],
        "Header row doesn't match the template"
    );
    assert_eq!(
        doc.data.value_at(1, 6),
        &CellValue::Formula("=SUM(C2:F2)".to_string()),
        "Formula was not kept verbatim"
    );
}

#[test]
fn duplicate_and_missing_names() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_text("Notes", "A", "x")).unwrap();

    let dup = svc.create("alice", from_text("Notes", "B", "y")).unwrap_err();
    assert!(matches!(dup, SheetError::DuplicateName { .. }));
    // Names are scoped per owner and compared case-sensitively
    svc.create("bob", from_text("Notes", "A", "")).unwrap();
    svc.create("alice", from_text("notes", "A", "")).unwrap();

    assert!(matches!(svc.get("alice", "Missing"), Err(SheetError::NotFound(_))));
    assert!(matches!(svc.delete("alice", "Missing"), Err(SheetError::NotFound(_))));
    let style = CellStyle {
        bold: Some(true),
        ..CellStyle::default()
    };
    assert!(matches!(
        svc.mutate_format("alice", "Missing", "A1", &style),
        Err(SheetError::NotFound(_))
    ));

    svc.delete("alice", "Notes").unwrap();
    assert!(matches!(svc.get("alice", "Notes"), Err(SheetError::NotFound(_))));
}

#[test]
fn unmerge_of_unknown_range_is_a_no_op() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_text("S", "A,B,C,D", "1\t2\t3\t4")).unwrap();
    svc.merge("alice", "S", "A1:D1", CellValue::from("Title")).unwrap();

    svc.unmerge("alice", "S", "A2:B2").unwrap();
    let doc = svc.get("alice", "S").unwrap();
    assert_eq!(doc.data.merged_cells.len(), 1, "Unrelated unmerge removed a range");

    // Overlaps are refused rather than stored
    let overlap = svc.merge("alice", "S", "B1:C2", CellValue::Empty).unwrap_err();
    assert!(matches!(overlap, SheetError::Validation(_)));

    svc.unmerge("alice", "S", "A1:D1").unwrap();
    svc.unmerge("alice", "S", "A1:D1").unwrap();
    assert!(svc.get("alice", "S").unwrap().data.merged_cells.is_empty());
}

#[test]
fn export_skips_missing_sheets_and_ignores_stray_overrides() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_text("First", "A,B", "1\t2")).unwrap();
    svc.create("alice", from_text("Second", "A,B", "3\t4")).unwrap();
    let style = CellStyle {
        italic: Some(true),
        ..CellStyle::default()
    };
    svc.mutate_format("alice", "Second", "Z999", &style).unwrap();

    let exported = svc
        .export("alice", &names(&["First", "Ghost", "Second"]))
        .unwrap();
    assert!(!exported.bytes.is_empty());
    assert!(exported.filename.starts_with("workbook_") && exported.filename.ends_with(".xlsx"));

    let history = svc.history("alice").unwrap();
    assert_eq!(history.len(), 1);
    let sheets: Vec<&str> = history[0].sheets.iter().map(|s| s.sheet_name.as_str()).collect();
    assert_eq!(sheets, vec!["First", "Second"]);
    assert_eq!(history[0].sheets[0].row_count, 2);
    assert_eq!(history[0].sheets[0].col_count, 2);
}

#[test]
fn export_without_sheets_is_no_data() {
    let svc = SheetService::new(MemoryStore::new());
    assert!(matches!(svc.export("alice", &[]), Err(SheetError::NoData)));
    assert!(matches!(
        svc.export("alice", &names(&["Ghost", "Phantom"])),
        Err(SheetError::NoData)
    ));
    assert!(svc.history("alice").unwrap().is_empty(), "Failed export was recorded");
}

#[test]
fn concurrent_writers_last_write_wins() {
    let store = Arc::new(MemoryStore::new());
    let first = SheetService::new(Arc::clone(&store));
    let second = SheetService::new(Arc::clone(&store));
    first.create("alice", from_text("Shared", "A,B", "1\t2")).unwrap();

    // First handle reads, second handle writes, first handle writes its stale copy
    let stale = store.get_sheet("alice", "Shared").unwrap().unwrap();
    second
        .set_header_color("alice", "Shared", &[0], "#FF0000")
        .unwrap();
    store.put_sheet("alice", &stale).unwrap();

    let doc = second.get("alice", "Shared").unwrap();
    assert!(doc.data.header_colors.is_empty(), "Stale write should have won");
}

#[test]
fn upload_ingestion_skips_empty_and_existing_sheets() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_text("Taken", "A", "1")).unwrap();

    let created = svc
        .ingest_upload(
            "alice",
            vec![
                UploadedSheet {
                    sheet_name: "Empty".into(),
                    rows: rows(&[&["Only", "Headers"]]),
                },
                UploadedSheet {
                    sheet_name: "Taken".into(),
                    rows: rows(&[&["A"], &["2"]]),
                },
                UploadedSheet {
                    sheet_name: "Fresh".into(),
                    rows: rows(&[&["Item", "Qty"], &["Pens", "3"]]),
                },
            ],
        )
        .unwrap();
    assert_eq!(created, vec!["Fresh".to_string()]);

    let fresh = svc.get("alice", "Fresh").unwrap();
    assert_eq!(
        fresh.data.formatting.header_bg_color.as_deref(),
        Some(FALLBACK_HEADER_COLOR)
    );
    assert_eq!(fresh.data.value_at(1, 1), &CellValue::Integer(3));
    assert_eq!(
        svc.get("alice", "Taken").unwrap().data.value_at(1, 0),
        &CellValue::Integer(1),
        "Existing sheet was overwritten"
    );
    assert!(matches!(svc.get("alice", "Empty"), Err(SheetError::NotFound(_))));
}

#[test]
fn templates_promoted_from_sheets_and_downloads() {
    let svc = SheetService::new(MemoryStore::new());
    svc.create("alice", from_template("Cover", "front_page")).unwrap();
    let doc = svc.get("alice", "Cover").unwrap();
    assert!(!doc.data.merged_cells.is_empty(), "Template merges were not seeded");

    let saved = svc.promote_sheet("alice", "Cover", "My cover").unwrap();
    svc.create("alice", from_template("Cover 2", &saved.id)).unwrap();
    let copy = svc.get("alice", "Cover 2").unwrap();
    assert_eq!(copy.data.grid, doc.data.grid);
    assert_eq!(copy.data.merged_cells.len(), doc.data.merged_cells.len());

    let exported = svc.export("alice", &names(&["Cover"])).unwrap();
    let from_download = svc
        .promote_download("alice", &exported.record.id, None, "From export")
        .unwrap();
    assert_eq!(from_download.default_sheet_name, "Cover");
    let header: Vec<String> = doc.data.grid[0].iter().map(|c| c.to_string()).collect();
    assert_eq!(from_download.headers, header);
    assert!(matches!(
        svc.promote_download("alice", "unknown", None, "X"),
        Err(SheetError::NotFound(_))
    ));

    let ids: Vec<String> = svc.templates("alice").unwrap().into_iter().map(|t| t.id).collect();
    assert!(ids.contains(&"5".to_string()));
    assert!(ids.contains(&saved.id));
    assert!(ids.contains(&from_download.id));
    assert!(!svc.templates("bob").unwrap().iter().any(|t| t.id == saved.id));
}

#[test]
fn file_store_reads_legacy_bodies_and_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let svc = SheetService::new(Arc::clone(&store));

    // A body written by an older revision: headers and data kept apart
    let legacy = serde_json::json!({
        "headers": ["Item", "Cost"],
        "data": [["Desk", 120], ["Lamp"]],
        "formatting": {"header_bg_color": "#123456"}
    });
    let now = chrono::Utc::now();
    store
        .put_sheet(
            "carol",
            &sheetbook::store::StoredSheet {
                name: "Old".into(),
                body: legacy,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();

    let doc = svc.get("carol", "Old").unwrap();
    assert_eq!(doc.data.value_at(0, 0), &CellValue::from("Item"));
    assert_eq!(doc.data.value_at(1, 1), &CellValue::Integer(120));
    assert_eq!(doc.data.formatting.header_bg_color.as_deref(), Some("#123456"));

    // Mutating rewrites it in the structured shape
    svc.merge("carol", "Old", "A3:B3", CellValue::from("Total")).unwrap();
    let body = store.get_sheet("carol", "Old").unwrap().unwrap().body;
    assert!(body.get("grid").is_some());

    svc.export("carol", &names(&["Old"])).unwrap();
    let draft = sheetbook::template::TemplateDraft {
        name: "Costs".into(),
        default_sheet_name: "Costs".into(),
        headers: "Item,Cost".into(),
        ..Default::default()
    };
    svc.add_template("carol", draft).unwrap();

    svc.delete_owner("carol").unwrap();
    assert!(svc.list("carol").unwrap().is_empty());
    assert!(svc.history("carol").unwrap().is_empty());
    assert!(store.list_templates("carol").unwrap().is_empty());
}

#[test]
fn styled_sheet_survives_memory_store() {
    styled_sheet_survives_storage(&SheetService::new(MemoryStore::new()));
}

#[test]
fn styled_sheet_survives_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let svc = SheetService::new(FileStore::open(dir.path()).unwrap());
    styled_sheet_survives_storage(&svc);
}
