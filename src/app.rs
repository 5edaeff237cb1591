use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::cell::CellValue;
use crate::config::Config;
use crate::downloader::XLSX_MIME_TYPE;
use crate::error::SheetError;
use crate::loader::UploadedSheet;
use crate::saving::FileStore;
use crate::service::{CreateSheet, SheetService};
use crate::spreadsheet::Grid;
use crate::store::{DocumentStore, SheetSummary};
use crate::style::{CellStyle, SheetFormatting};
use crate::template::TemplateDraft;

type AppState<S> = Arc<SheetService<S>>;

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(StatusResponse {
            status: "ok".to_string(),
            message: None,
        })
    }
}

impl IntoResponse for SheetError {
    fn into_response(self) -> Response {
        let status = match &self {
            SheetError::Validation(_) => StatusCode::BAD_REQUEST,
            SheetError::DuplicateName { .. } => StatusCode::CONFLICT,
            SheetError::NotFound(_) => StatusCode::NOT_FOUND,
            SheetError::NoData => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if self.is_user_facing() {
            self.to_string()
        } else {
            log::error!("request failed: {}", self);
            "internal error".to_string()
        };
        let body = StatusResponse {
            status: "error".to_string(),
            message: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct FormatRequest {
    cell_ref: String,
    style: CellStyle,
}

#[derive(Deserialize)]
struct HeaderColorRequest {
    columns: Vec<u16>,
    color: String,
}

#[derive(Deserialize)]
struct MergeRequest {
    range: String,
    #[serde(default)]
    content: CellValue,
}

#[derive(Deserialize)]
struct RangeRequest {
    range: String,
}

#[derive(Deserialize)]
struct DimensionsRequest {
    column_widths: Option<BTreeMap<u16, f64>>,
    row_heights: Option<BTreeMap<u32, f64>>,
}

#[derive(Deserialize)]
struct ExportRequest {
    sheets: Vec<String>,
}

#[derive(Deserialize)]
struct PromoteRequest {
    template_name: String,
    #[serde(default)]
    sheet_name: Option<String>,
}

pub fn router<S: DocumentStore + 'static>(service: AppState<S>) -> Router {
    Router::new()
        .route("/api/:owner", delete(delete_owner::<S>))
        .route("/api/:owner/sheets", get(list_sheets::<S>).post(create_sheet::<S>))
        .route("/api/:owner/sheets/upload", post(upload_sheets::<S>))
        .route(
            "/api/:owner/sheets/:name",
            get(get_sheet::<S>).delete(delete_sheet::<S>),
        )
        .route("/api/:owner/sheets/:name/grid", post(set_grid::<S>))
        .route("/api/:owner/sheets/:name/format", post(set_format::<S>))
        .route("/api/:owner/sheets/:name/header_color", post(set_header_color::<S>))
        .route("/api/:owner/sheets/:name/merge", post(merge_cells::<S>))
        .route("/api/:owner/sheets/:name/unmerge", post(unmerge_cells::<S>))
        .route("/api/:owner/sheets/:name/dimensions", post(set_dimensions::<S>))
        .route("/api/:owner/sheets/:name/formatting", post(update_formatting::<S>))
        .route("/api/:owner/sheets/:name/template", post(promote_sheet::<S>))
        .route("/api/:owner/export", post(export_workbook::<S>))
        .route("/api/:owner/history", get(history::<S>))
        .route("/api/:owner/history/:id/template", post(promote_download::<S>))
        .route("/api/:owner/templates", get(templates::<S>).post(add_template::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(&config.database_dir)?;
    let service = Arc::new(SheetService::with_options(store, config.export.clone()));
    let app = router(service);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!(
        "listening on http://{} (database at {})",
        config.bind_addr,
        config.database_dir.display()
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_sheets<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<SheetSummary>>, SheetError> {
    let sheets = svc
        .list(&owner)?
        .into_iter()
        .map(|doc| SheetSummary {
            row_count: doc.data.row_count(),
            col_count: doc.data.col_count(),
            headers: doc
                .data
                .grid
                .first()
                .map(|r| r.iter().map(CellValue::to_string).collect())
                .unwrap_or_default(),
            sheet_name: doc.name,
        })
        .collect();
    Ok(Json(sheets))
}

async fn create_sheet<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
    Json(req): Json<CreateSheet>,
) -> Result<Response, SheetError> {
    let doc = svc.create(&owner, req)?;
    Ok((StatusCode::CREATED, Json(doc)).into_response())
}

async fn upload_sheets<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
    Json(sheets): Json<Vec<UploadedSheet>>,
) -> Result<Json<Vec<String>>, SheetError> {
    Ok(Json(svc.ingest_upload(&owner, sheets)?))
}

async fn get_sheet<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Response, SheetError> {
    Ok(Json(svc.get(&owner, &name)?).into_response())
}

async fn delete_sheet<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.delete(&owner, &name)?;
    Ok(StatusResponse::ok())
}

async fn delete_owner<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.delete_owner(&owner)?;
    Ok(StatusResponse::ok())
}

async fn set_grid<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(rows): Json<Grid>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.set_grid(&owner, &name, rows)?;
    Ok(StatusResponse::ok())
}

async fn set_format<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<FormatRequest>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.mutate_format(&owner, &name, &req.cell_ref, &req.style)?;
    Ok(StatusResponse::ok())
}

async fn set_header_color<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<HeaderColorRequest>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.set_header_color(&owner, &name, &req.columns, &req.color)?;
    Ok(StatusResponse::ok())
}

async fn merge_cells<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.merge(&owner, &name, &req.range, req.content)?;
    Ok(StatusResponse::ok())
}

async fn unmerge_cells<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<RangeRequest>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.unmerge(&owner, &name, &req.range)?;
    Ok(StatusResponse::ok())
}

async fn set_dimensions<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<DimensionsRequest>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.set_dimensions(
        &owner,
        &name,
        req.column_widths.as_ref(),
        req.row_heights.as_ref(),
    )?;
    Ok(StatusResponse::ok())
}

async fn update_formatting<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(update): Json<SheetFormatting>,
) -> Result<Json<StatusResponse>, SheetError> {
    svc.update_formatting(&owner, &name, &update)?;
    Ok(StatusResponse::ok())
}

async fn promote_sheet<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<PromoteRequest>,
) -> Result<Response, SheetError> {
    let template = svc.promote_sheet(&owner, &name, &req.template_name)?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

async fn export_workbook<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<Response, SheetError> {
    let exported = svc.export(&owner, &req.sheets)?;
    let disposition = format!("attachment; filename=\"{}\"", exported.filename);
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(exported.bytes),
    )
        .into_response())
}

async fn history<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
) -> Result<Response, SheetError> {
    Ok(Json(svc.history(&owner)?).into_response())
}

async fn promote_download<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path((owner, id)): Path<(String, String)>,
    Json(req): Json<PromoteRequest>,
) -> Result<Response, SheetError> {
    let template =
        svc.promote_download(&owner, &id, req.sheet_name.as_deref(), &req.template_name)?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}

async fn templates<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
) -> Result<Response, SheetError> {
    Ok(Json(svc.templates(&owner)?).into_response())
}

async fn add_template<S: DocumentStore + 'static>(
    State(svc): State<AppState<S>>,
    Path(owner): Path<String>,
    Json(draft): Json<TemplateDraft>,
) -> Result<Response, SheetError> {
    let template = svc.add_template(&owner, draft)?;
    Ok((StatusCode::CREATED, Json(template)).into_response())
}
