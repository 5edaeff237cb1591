/*!
# Sheetbook

Per-owner spreadsheet documents with cell formatting, exported as multi-sheet
xlsx workbooks.

## Overview

Callers hand in an authenticated owner id and operate on named sheets. A sheet is
a grid of values (numbers, text, and `=` formulas kept verbatim, never evaluated)
plus side-tables describing how it should look: per-cell style overrides, header
colors, column widths and row heights, merged ranges and sheet-wide defaults.
Exporting renders any set of an owner's sheets into one workbook and records the
export in the owner's history.

## Architecture

### Model
- **cell**: cell values, A1 references and ranges
- **style**: cell styles, sheet formatting defaults, color parsing
- **spreadsheet**: the sheet document, its mutations, and `normalize` for the
  stored body shapes (bare grid, header/data, structured)
- **loader**: delimited text and uploaded sheets into grids
- **template**: built-in and custom sheet templates

### Persistence
- **store**: the `DocumentStore` trait and an in-memory store
- **saving**: a directory store with gzip-compressed sheet bodies

### Export and service
- **downloader**: workbook rendering with per-sheet failure isolation
- **service**: `SheetService`, the operations callers use
- **app** (feature `web`): JSON routes over the service
- **config**: settings with environment overrides

## REST API Endpoints (feature `web`)

- `GET/POST /api/{owner}/sheets` - List or create sheets
- `GET/DELETE /api/{owner}/sheets/{name}` - Read or delete a sheet
- `POST /api/{owner}/sheets/{name}/format` - Merge a style into one cell
- `POST /api/{owner}/sheets/{name}/merge`, `/unmerge` - Merged ranges
- `POST /api/{owner}/export` - Download a workbook of the named sheets
- `GET /api/{owner}/history` - Past exports
*/

pub mod cell;
pub mod config;
pub mod downloader;
pub mod error;
pub mod loader;
pub mod saving;
pub mod service;
pub mod spreadsheet;
pub mod store;
pub mod style;
pub mod template;

#[cfg(feature = "web")]
pub mod app;

pub use error::{Result, SheetError};
pub use service::{CreateSheet, SheetService};
