use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, create_dir_all};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::{DocumentStore, DownloadRecord, StoredSheet};
use crate::template::Template;

const LIST_FILE: &str = "list.json";
const DOWNLOADS_FILE: &str = "downloads.json";
const TEMPLATES_FILE: &str = "templates.json";

/// Index entry in an owner's `list.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SheetEntry {
    name: String,
    file: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Directory-backed store.
///
/// ```text
/// <root>/<owner>/list.json          sheet index, in creation order
/// <root>/<owner>/<uuid>.json.gz     one gzip-compressed JSON body per sheet
/// <root>/<owner>/downloads.json     export history
/// <root>/<owner>/templates.json     custom templates
/// ```
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Arguments
    /// * `root` - Base directory; each owner gets a subdirectory below it
    ///
    /// # Returns
    /// * `Result<FileStore>` - The store, or `Store` when the directory cannot be created
    ///
    /// # Examples
    /// ```
    /// use sheetbook::saving::FileStore;
    /// use sheetbook::store::DocumentStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = FileStore::open(dir.path().join("database")).unwrap();
    /// assert!(store.list_sheets("alice").unwrap().is_empty());
    /// ```
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    // Owner ids are opaque; anything outside a safe alphabet is hex-encoded.
    fn owner_dir(&self, owner: &str) -> PathBuf {
        let safe = !owner.is_empty()
            && !owner.starts_with('.')
            && owner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if safe {
            self.root.join(owner)
        } else {
            let hex: String = owner.bytes().map(|b| format!("{:02x}", b)).collect();
            self.root.join(format!("x-{}", hex))
        }
    }

    fn entries(&self, owner: &str) -> Result<Vec<SheetEntry>> {
        read_json_or_default(&self.owner_dir(owner).join(LIST_FILE))
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

// Write through a temp file so a crash never leaves a half-written index.
fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn save_body(path: &Path, body: &serde_json::Value) -> Result<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);
    serde_json::to_writer(&mut writer, body)?;
    writer.flush()?;
    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?;
    Ok(())
}

fn load_body(path: &Path) -> Result<serde_json::Value> {
    let file = File::open(path)?;
    let reader = BufReader::new(GzDecoder::new(file));
    Ok(serde_json::from_reader(reader)?)
}

impl DocumentStore for FileStore {
    fn get_sheet(&self, owner: &str, name: &str) -> Result<Option<StoredSheet>> {
        let Some(entry) = self.entries(owner)?.into_iter().find(|e| e.name == name) else {
            return Ok(None);
        };
        let body = load_body(&self.owner_dir(owner).join(&entry.file))?;
        Ok(Some(StoredSheet {
            name: entry.name,
            body,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }))
    }

    fn list_sheets(&self, owner: &str) -> Result<Vec<StoredSheet>> {
        let dir = self.owner_dir(owner);
        self.entries(owner)?
            .into_iter()
            .map(|entry| {
                Ok(StoredSheet {
                    body: load_body(&dir.join(&entry.file))?,
                    name: entry.name,
                    created_at: entry.created_at,
                    updated_at: entry.updated_at,
                })
            })
            .collect()
    }

    fn put_sheet(&self, owner: &str, sheet: &StoredSheet) -> Result<()> {
        let dir = self.owner_dir(owner);
        create_dir_all(&dir)?;
        let mut entries = self.entries(owner)?;
        let index = match entries.iter().position(|e| e.name == sheet.name) {
            Some(i) => i,
            None => {
                entries.push(SheetEntry {
                    name: sheet.name.clone(),
                    file: format!("{}.json.gz", uuid::Uuid::new_v4()),
                    created_at: sheet.created_at,
                    updated_at: sheet.updated_at,
                });
                entries.len() - 1
            }
        };
        entries[index].updated_at = sheet.updated_at;
        let file = entries[index].file.clone();
        save_body(&dir.join(&file), &sheet.body)?;
        write_json(&dir.join(LIST_FILE), &entries)?;
        log::debug!("stored sheet \"{}\" for {} in {}", sheet.name, owner, file);
        Ok(())
    }

    fn delete_sheet(&self, owner: &str, name: &str) -> Result<bool> {
        let dir = self.owner_dir(owner);
        let mut entries = self.entries(owner)?;
        let Some(index) = entries.iter().position(|e| e.name == name) else {
            return Ok(false);
        };
        let entry = entries.remove(index);
        write_json(&dir.join(LIST_FILE), &entries)?;
        match fs::remove_file(dir.join(&entry.file)) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        Ok(true)
    }

    fn append_download(&self, record: &DownloadRecord) -> Result<()> {
        let path = self.owner_dir(&record.owner).join(DOWNLOADS_FILE);
        let mut records: Vec<DownloadRecord> = read_json_or_default(&path)?;
        records.push(record.clone());
        write_json(&path, &records)
    }

    fn list_downloads(&self, owner: &str) -> Result<Vec<DownloadRecord>> {
        read_json_or_default(&self.owner_dir(owner).join(DOWNLOADS_FILE))
    }

    fn put_template(&self, owner: &str, template: &Template) -> Result<()> {
        let path = self.owner_dir(owner).join(TEMPLATES_FILE);
        let mut templates: Vec<Template> = read_json_or_default(&path)?;
        match templates.iter_mut().find(|t| t.id == template.id) {
            Some(existing) => *existing = template.clone(),
            None => templates.push(template.clone()),
        }
        write_json(&path, &templates)
    }

    fn list_templates(&self, owner: &str) -> Result<Vec<Template>> {
        read_json_or_default(&self.owner_dir(owner).join(TEMPLATES_FILE))
    }

    fn delete_owner(&self, owner: &str) -> Result<()> {
        match fs::remove_dir_all(self.owner_dir(owner)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
