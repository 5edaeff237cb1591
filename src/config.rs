use std::path::PathBuf;

use crate::downloader::ExportOptions;
use crate::error::{Result, SheetError};
use crate::style::normalize_color;

pub const DEFAULT_DATABASE_DIR: &str = "database";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Runtime settings. Every field can be overridden from the environment:
///
/// | variable                           | field                          |
/// |------------------------------------|--------------------------------|
/// | `SHEETBOOK_DATABASE_DIR`           | `database_dir`                 |
/// | `SHEETBOOK_BIND_ADDR`              | `bind_addr`                    |
/// | `SHEETBOOK_HEADER_FALLBACK_COLOR`  | `export.header_fallback_color` |
/// | `SHEETBOOK_DEFAULT_COLUMN_WIDTH`   | `export.default_column_width`  |
#[derive(Clone, Debug)]
pub struct Config {
    pub database_dir: PathBuf,
    pub bind_addr: String,
    pub export: ExportOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_dir: PathBuf::from(DEFAULT_DATABASE_DIR),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            export: ExportOptions::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(dir) = get("SHEETBOOK_DATABASE_DIR") {
            config.database_dir = PathBuf::from(dir);
        }
        if let Some(addr) = get("SHEETBOOK_BIND_ADDR") {
            config.bind_addr = addr.trim().to_string();
        }
        if let Some(color) = get("SHEETBOOK_HEADER_FALLBACK_COLOR") {
            config.export.header_fallback_color = normalize_color(&color)?;
        }
        if let Some(width) = get("SHEETBOOK_DEFAULT_COLUMN_WIDTH") {
            config.export.default_column_width = width
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|w| w.is_finite() && *w > 0.0 && *w <= 255.0)
                .ok_or_else(|| {
                    SheetError::validation(format!("bad SHEETBOOK_DEFAULT_COLUMN_WIDTH \"{}\"", width))
                })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_dir, PathBuf::from("database"));
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.export.header_fallback_color, "#F0E68C");
        assert_eq!(config.export.default_column_width, 20.0);
    }

    #[test]
    fn overrides_are_validated() {
        let config = Config::from_lookup(lookup(&[
            ("SHEETBOOK_DATABASE_DIR", "/tmp/sheets"),
            ("SHEETBOOK_HEADER_FALLBACK_COLOR", "abc"),
            ("SHEETBOOK_DEFAULT_COLUMN_WIDTH", "12.5"),
            ("SHEETBOOK_BIND_ADDR", " "),
        ]))
        .unwrap();
        assert_eq!(config.database_dir, PathBuf::from("/tmp/sheets"));
        assert_eq!(config.export.header_fallback_color, "#AABBCC");
        assert_eq!(config.export.default_column_width, 12.5);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);

        assert!(Config::from_lookup(lookup(&[("SHEETBOOK_DEFAULT_COLUMN_WIDTH", "-3")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SHEETBOOK_HEADER_FALLBACK_COLOR", "red")])).is_err());
    }
}
