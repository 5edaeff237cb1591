//! The document store the service talks to, plus an in-memory implementation.
//!
//! Stores hold sheet bodies as raw JSON. Nothing here interprets the body: the
//! service runs [`normalize`] on every read so legacy shapes never leak further.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, SheetError};
use crate::spreadsheet::{normalize, SheetDocument};
use crate::template::Template;

/// A sheet as persisted: name, opaque JSON body and timestamps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredSheet {
    pub name: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSheet {
    pub fn from_document(doc: &SheetDocument) -> Result<Self> {
        Ok(StoredSheet {
            name: doc.name.clone(),
            body: serde_json::to_value(&doc.data)?,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }

    pub fn into_document(self, owner: &str) -> Result<SheetDocument> {
        Ok(SheetDocument {
            owner: owner.to_string(),
            data: normalize(self.body)?,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// What an export wrote for one sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub sheet_name: String,
    pub row_count: usize,
    pub col_count: usize,
    #[serde(default)]
    pub headers: Vec<String>,
}

/// Append-only audit entry for one export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub owner: String,
    pub filename: String,
    pub downloaded_at: DateTime<Utc>,
    pub sheets: Vec<SheetSummary>,
}

/// Key-value document store keyed by `(owner, sheet name)`.
///
/// Implementations must be safe to share between request handlers; concurrent
/// writes to the same key are last-write-wins.
pub trait DocumentStore: Send + Sync {
    fn get_sheet(&self, owner: &str, name: &str) -> Result<Option<StoredSheet>>;
    /// All sheets of an owner, in the order they were first stored.
    fn list_sheets(&self, owner: &str) -> Result<Vec<StoredSheet>>;
    /// Insert or replace by name.
    fn put_sheet(&self, owner: &str, sheet: &StoredSheet) -> Result<()>;
    /// Returns `false` when no sheet had that name.
    fn delete_sheet(&self, owner: &str, name: &str) -> Result<bool>;
    fn append_download(&self, record: &DownloadRecord) -> Result<()>;
    fn list_downloads(&self, owner: &str) -> Result<Vec<DownloadRecord>>;
    /// Insert or replace by template id.
    fn put_template(&self, owner: &str, template: &Template) -> Result<()>;
    fn list_templates(&self, owner: &str) -> Result<Vec<Template>>;
    /// Remove the owner and everything they own.
    fn delete_owner(&self, owner: &str) -> Result<()>;
}

// Lets several services share one store.
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn get_sheet(&self, owner: &str, name: &str) -> Result<Option<StoredSheet>> {
        (**self).get_sheet(owner, name)
    }
    fn list_sheets(&self, owner: &str) -> Result<Vec<StoredSheet>> {
        (**self).list_sheets(owner)
    }
    fn put_sheet(&self, owner: &str, sheet: &StoredSheet) -> Result<()> {
        (**self).put_sheet(owner, sheet)
    }
    fn delete_sheet(&self, owner: &str, name: &str) -> Result<bool> {
        (**self).delete_sheet(owner, name)
    }
    fn append_download(&self, record: &DownloadRecord) -> Result<()> {
        (**self).append_download(record)
    }
    fn list_downloads(&self, owner: &str) -> Result<Vec<DownloadRecord>> {
        (**self).list_downloads(owner)
    }
    fn put_template(&self, owner: &str, template: &Template) -> Result<()> {
        (**self).put_template(owner, template)
    }
    fn list_templates(&self, owner: &str) -> Result<Vec<Template>> {
        (**self).list_templates(owner)
    }
    fn delete_owner(&self, owner: &str) -> Result<()> {
        (**self).delete_owner(owner)
    }
}

#[derive(Default)]
struct OwnerSpace {
    sheets: Vec<StoredSheet>,
    downloads: Vec<DownloadRecord>,
    templates: Vec<Template>,
}

/// Process-local store, used by tests and by the server when no database
/// directory is configured.
#[derive(Default)]
pub struct MemoryStore {
    owners: RwLock<HashMap<String, OwnerSpace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, OwnerSpace>>> {
        self.owners
            .read()
            .map_err(|_| SheetError::Store("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, OwnerSpace>>> {
        self.owners
            .write()
            .map_err(|_| SheetError::Store("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn get_sheet(&self, owner: &str, name: &str) -> Result<Option<StoredSheet>> {
        Ok(self
            .read()?
            .get(owner)
            .and_then(|space| space.sheets.iter().find(|s| s.name == name))
            .cloned())
    }

    fn list_sheets(&self, owner: &str) -> Result<Vec<StoredSheet>> {
        Ok(self
            .read()?
            .get(owner)
            .map(|space| space.sheets.clone())
            .unwrap_or_default())
    }

    fn put_sheet(&self, owner: &str, sheet: &StoredSheet) -> Result<()> {
        let mut owners = self.write()?;
        let space = owners.entry(owner.to_string()).or_default();
        match space.sheets.iter_mut().find(|s| s.name == sheet.name) {
            Some(existing) => *existing = sheet.clone(),
            None => space.sheets.push(sheet.clone()),
        }
        Ok(())
    }

    fn delete_sheet(&self, owner: &str, name: &str) -> Result<bool> {
        let mut owners = self.write()?;
        let Some(space) = owners.get_mut(owner) else {
            return Ok(false);
        };
        let before = space.sheets.len();
        space.sheets.retain(|s| s.name != name);
        Ok(space.sheets.len() < before)
    }

    fn append_download(&self, record: &DownloadRecord) -> Result<()> {
        self.write()?
            .entry(record.owner.clone())
            .or_default()
            .downloads
            .push(record.clone());
        Ok(())
    }

    fn list_downloads(&self, owner: &str) -> Result<Vec<DownloadRecord>> {
        Ok(self
            .read()?
            .get(owner)
            .map(|space| space.downloads.clone())
            .unwrap_or_default())
    }

    fn put_template(&self, owner: &str, template: &Template) -> Result<()> {
        let mut owners = self.write()?;
        let templates = &mut owners.entry(owner.to_string()).or_default().templates;
        match templates.iter_mut().find(|t| t.id == template.id) {
            Some(existing) => *existing = template.clone(),
            None => templates.push(template.clone()),
        }
        Ok(())
    }

    fn list_templates(&self, owner: &str) -> Result<Vec<Template>> {
        Ok(self
            .read()?
            .get(owner)
            .map(|space| space.templates.clone())
            .unwrap_or_default())
    }

    fn delete_owner(&self, owner: &str) -> Result<()> {
        self.write()?.remove(owner);
        Ok(())
    }
}
