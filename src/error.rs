use thiserror::Error;

/// Errors surfaced by the sheet model, the store and the export engine.
///
/// `Validation`, `DuplicateName`, `NotFound` and `NoData` carry messages meant for
/// the end user. `Render` is normally swallowed by the exporter (the sheet is
/// skipped); `Store` and `Xlsx` are opaque failures of the collaborators.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("sheet \"{name}\" already exists for {owner}")]
    DuplicateName { owner: String, name: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("nothing to export")]
    NoData,

    #[error("store error: {0}")]
    Store(String),

    #[error("could not render sheet \"{sheet}\": {reason}")]
    Render { sheet: String, reason: String },

    #[error("workbook error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, SheetError>;

impl SheetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SheetError::Validation(msg.into())
    }

    pub fn sheet_not_found(owner: &str, name: &str) -> Self {
        SheetError::NotFound(format!("sheet \"{}\" of {}", name, owner))
    }

    /// True for errors the caller should show to the user verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            SheetError::Validation(_)
                | SheetError::DuplicateName { .. }
                | SheetError::NotFound(_)
                | SheetError::NoData
        )
    }
}

impl From<std::io::Error> for SheetError {
    fn from(e: std::io::Error) -> Self {
        SheetError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for SheetError {
    fn from(e: serde_json::Error) -> Self {
        SheetError::Store(e.to_string())
    }
}
