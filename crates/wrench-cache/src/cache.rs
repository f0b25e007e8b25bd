use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use wrench_core::WrenchError;

/// Number of cache-key characters encoded in an entry file name.
pub const KEY_PREFIX_LEN: usize = 10;

const COMPRESSED_EXT: &str = "tgz";
const RAW_EXT: &str = "tar";

/// Cache root used when the operator does not point elsewhere.
pub fn default_cache_root() -> Result<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(xdg).join("wrench").join("apps"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve cache directory")?;
    Ok(PathBuf::from(home)
        .join(".cache")
        .join("wrench")
        .join("apps"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub app: String,
    pub key: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub compressed: bool,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheListing {
    pub entries: Vec<CacheEntry>,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheRemoval {
    pub removed: Vec<String>,
    pub freed_bytes: u64,
}

/// Fetched application archives, one file per `(app, key)` pair.
///
/// There is no index: whatever sits in the directory is the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCache {
    root: PathBuf,
}

impl AppCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, app: &str, key: &str, compressed: bool) -> PathBuf {
        let ext = if compressed { COMPRESSED_EXT } else { RAW_EXT };
        self.root
            .join(format!("{app}-{}.{ext}", key_prefix(key)))
    }

    /// Existing archive for `(app, key)`, preferring the compressed form.
    pub fn lookup(&self, app: &str, key: &str) -> Option<PathBuf> {
        [true, false]
            .into_iter()
            .map(|compressed| self.entry_path(app, key, compressed))
            .find(|path| path.is_file())
    }

    /// Copy `archive` into the cache, replacing any entry with the same name.
    pub fn store(&self, app: &str, key: &str, archive: &Path, compressed: bool) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create cache dir: {}", self.root.display()))?;

        let path = self.entry_path(app, key, compressed);
        let part_path = path.with_extension("part");
        if let Err(err) = fs::copy(archive, &part_path) {
            let _ = fs::remove_file(&part_path);
            return Err(err).with_context(|| {
                format!(
                    "failed copying {} into cache: {}",
                    archive.display(),
                    part_path.display()
                )
            });
        }

        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to replace cache file: {}", path.display()))?;
        }
        fs::rename(&part_path, &path)
            .with_context(|| format!("failed to move archive into cache: {}", path.display()))?;
        tracing::debug!(app, path = %path.display(), "stored app archive");
        Ok(path)
    }

    pub fn list(&self) -> Result<CacheListing> {
        let mut listing = CacheListing::default();
        for entry in self.read_entries()? {
            listing.total_size += entry.size;
            listing.entries.push(entry);
        }
        Ok(listing)
    }

    /// Delete archives belonging to `app` or carrying `key`; with both, either match removes.
    pub fn remove(&self, app: Option<&str>, key: Option<&str>) -> Result<CacheRemoval> {
        if app.is_none() && key.is_none() {
            return Err(
                WrenchError::validation("pass an app name or a cache key to remove").into(),
            );
        }

        let mut removal = CacheRemoval::default();
        for entry in self.read_entries()? {
            if !matches_entry(&entry.file_name, app, key) {
                continue;
            }

            fs::remove_file(&entry.path).with_context(|| {
                format!("failed removing cache entry: {}", entry.path.display())
            })?;
            removal.freed_bytes += entry.size;
            removal.removed.push(entry.file_name);
        }

        tracing::info!(
            count = removal.removed.len(),
            freed = removal.freed_bytes,
            "removed cache entries"
        );
        Ok(removal)
    }

    /// Delete the whole cache directory, returning the bytes it held.
    pub fn clear(&self) -> Result<u64> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading cache dir: {}", self.root.display()));
            }
        };

        let mut total = 0;
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }

        fs::remove_dir_all(&self.root)
            .with_context(|| format!("failed clearing cache dir: {}", self.root.display()))?;
        Ok(total)
    }

    fn read_entries(&self) -> Result<Vec<CacheEntry>> {
        let dir_entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading cache dir: {}", self.root.display()));
            }
        };

        let mut entries = Vec::new();
        for dir_entry in dir_entries {
            let dir_entry = dir_entry?;
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(file_name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some((app, key, compressed)) = parse_entry_name(&file_name) else {
                continue;
            };

            entries.push(CacheEntry {
                app,
                key,
                path: dir_entry.path(),
                file_name,
                size: metadata.len(),
                compressed,
                created: metadata.created().ok(),
                accessed: metadata.accessed().ok(),
            });
        }

        entries.sort_by(|left, right| left.file_name.cmp(&right.file_name));
        Ok(entries)
    }
}

fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(KEY_PREFIX_LEN) {
        Some((end, _)) => &key[..end],
        None => key,
    }
}

fn parse_entry_name(file_name: &str) -> Option<(String, String, bool)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let compressed = match ext {
        COMPRESSED_EXT => true,
        RAW_EXT => false,
        _ => return None,
    };
    let (app, key) = stem.rsplit_once('-')?;
    Some((app.to_string(), key.to_string(), compressed))
}

fn matches_entry(file_name: &str, app: Option<&str>, key: Option<&str>) -> bool {
    match (app, key) {
        (Some(app), Some(key)) => {
            file_name.starts_with(&format!("{app}-"))
                || file_name.contains(&format!("-{}.", key_prefix(key)))
        }
        (Some(app), None) => file_name.starts_with(&format!("{app}-")),
        (None, Some(key)) => file_name.contains(&format!("-{}.", key_prefix(key))),
        (None, None) => false,
    }
}
