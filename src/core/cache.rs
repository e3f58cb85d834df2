// src/core/cache.rs

use crate::core::command_resolution::Resolved;
use crate::models::ExternalMetadata;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

// --- Resolution cache ---

/// Resolved commands keyed by the exact dotted path.
///
/// Entries are valid for as long as the profile stack signature stays the same; a new
/// signature (project change, extension toggled, profile written) empties the cache.
#[derive(Debug, Default)]
pub struct CommandCache {
    signature: String,
    entries: HashMap<String, Resolved>,
}

impl CommandCache {
    /// Drops every entry if the stack changed since they were computed.
    pub fn validate(&mut self, signature: &str) {
        if self.signature != signature {
            if !self.entries.is_empty() {
                debug!(
                    "Profile stack changed, dropping {} cached commands",
                    self.entries.len()
                );
            }
            self.entries.clear();
            self.signature = signature.to_string();
        }
    }

    pub fn get(&self, path: &str) -> Option<Resolved> {
        self.entries.get(path).cloned()
    }

    pub fn insert(&mut self, path: &str, resolved: Resolved) {
        self.entries.insert(path.to_string(), resolved);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- External metadata cache ---

/// Represents the validation metadata for a cache entry.
/// This layered approach allows for fast checks before resorting to hashing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheValidationData {
    pub modified_secs: u64,
    pub modified_nanos: u32,
    pub file_size: u64,
    pub content_hash: String,
}

fn stat(path: &Path) -> Result<(u64, u32, u64)> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for file '{}'", path.display()))?;
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok((modified.as_secs(), modified.subsec_nanos(), metadata.len()))
}

fn content_hash(path: &Path) -> Result<String> {
    let content = fs::read(path)
        .with_context(|| format!("Failed to read content of file '{}'", path.display()))?;
    let hash = blake3::hash(&content);
    let bytes = hash.as_bytes();
    Ok(hex::encode(bytes.get(..HASH_TRUNCATE_LENGTH).unwrap_or(bytes)))
}

/// Calculates the validation metadata for a given file path:
/// modification time, size and a truncated blake3 hash of the content.
///
/// # Errors
/// Returns an I/O error if the file cannot be read or its metadata cannot be accessed.
pub fn calculate_validation_data(path: &Path) -> Result<CacheValidationData> {
    debug!("Calculating validation data for '{}'", path.display());
    let (modified_secs, modified_nanos, file_size) = stat(path)?;
    let content_hash = content_hash(path)?;
    Ok(CacheValidationData {
        modified_secs,
        modified_nanos,
        file_size,
        content_hash,
    })
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CachedMetadata {
    validation: CacheValidationData,
    metadata: ExternalMetadata,
}

/// Parsed help metadata of external executables, persisted between runs
/// as lz4-compressed bincode.
#[derive(Debug, Default)]
pub struct ExternalMetadataCache {
    location: Option<PathBuf>,
    entries: HashMap<String, CachedMetadata>,
    dirty: bool,
}

impl ExternalMetadataCache {
    /// An in-memory cache that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Reads the cache file. A missing or unreadable file yields an empty cache.
    pub fn load(location: PathBuf) -> Self {
        let entries = match fs::read(&location) {
            Ok(compressed) => match decode_entries(&compressed) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Discarding external metadata cache '{}': {}", location.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            location: Some(location),
            entries,
            dirty: false,
        }
    }

    /// Returns the cached metadata of `executable` if the file is unchanged.
    ///
    /// Timestamp and size matching is enough. When only the timestamp moved, the content
    /// hash decides, and a matching hash refreshes the stored timestamp.
    pub fn lookup(&mut self, executable: &Path) -> Option<ExternalMetadata> {
        let key = executable.display().to_string();
        let entry = self.entries.get_mut(&key)?;
        let (secs, nanos, size) = stat(executable).ok()?;
        if entry.validation.file_size != size {
            return None;
        }
        if entry.validation.modified_secs == secs && entry.validation.modified_nanos == nanos {
            return Some(entry.metadata.clone());
        }
        let hash = content_hash(executable).ok()?;
        if hash != entry.validation.content_hash {
            return None;
        }
        entry.validation.modified_secs = secs;
        entry.validation.modified_nanos = nanos;
        self.dirty = true;
        Some(entry.metadata.clone())
    }

    pub fn store(&mut self, executable: &Path, metadata: ExternalMetadata) {
        match calculate_validation_data(executable) {
            Ok(validation) => {
                self.entries.insert(
                    executable.display().to_string(),
                    CachedMetadata {
                        validation,
                        metadata,
                    },
                );
                self.dirty = true;
            }
            Err(e) => debug!("Not caching metadata of '{}': {}", executable.display(), e),
        }
    }

    /// Writes the cache back if anything changed.
    pub fn save(&mut self) -> Result<()> {
        let Some(location) = &self.location else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let encoded = bincode::serde::encode_to_vec(&self.entries, bincode::config::standard())
            .context("Failed to encode external metadata cache")?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let dir = location.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory '{}'", dir.display()))?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&compressed)?;
        file.persist(location)
            .with_context(|| format!("Failed to write cache '{}'", location.display()))?;
        self.dirty = false;
        debug!("Saved external metadata cache to '{}'", location.display());
        Ok(())
    }
}

fn decode_entries(compressed: &[u8]) -> Result<HashMap<String, CachedMetadata>> {
    let decompressed = lz4_flex::decompress_size_prepended(compressed)?;
    let (entries, _) = bincode::serde::decode_from_slice::<HashMap<String, CachedMetadata>, _>(
        &decompressed,
        bincode::config::standard(),
    )?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamSpec;
    use std::io::Write; // Keep `Write` for the `write_all` method
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_calculate_validation_data_success() {
        // --- Setup ---
        let content = b"hello world";
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file.flush().unwrap();

        // --- Execute ---
        let data = calculate_validation_data(temp_file.path()).unwrap();

        // --- Assert ---
        assert_eq!(data.file_size, 11);
        // blake3("hello world") truncated to 16 bytes.
        assert_eq!(data.content_hash, "d74981efa70a0c880b8d8c1985d075db");
    }

    #[test]
    fn test_calculate_validation_data_file_not_found() {
        let non_existent_path = Path::new("non_existent_file_for_test.tmp");
        assert!(calculate_validation_data(non_existent_path).is_err());
    }

    #[test]
    fn test_metadata_cache_persists_and_invalidates() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("deploy");
        fs::write(&exe, "#!/bin/sh\necho deploy\n").unwrap();
        let cache_file = dir.path().join("cache").join("external.cache.bin");

        let metadata = ExternalMetadata {
            help: "Deploys things".into(),
            params: vec![ParamSpec::option("target")],
            ..Default::default()
        };

        let mut cache = ExternalMetadataCache::load(cache_file.clone());
        assert!(cache.lookup(&exe).is_none());
        cache.store(&exe, metadata.clone());
        cache.save().unwrap();

        let mut reloaded = ExternalMetadataCache::load(cache_file);
        assert_eq!(reloaded.lookup(&exe), Some(metadata));

        fs::write(&exe, "#!/bin/sh\necho changed and longer\n").unwrap();
        assert!(reloaded.lookup(&exe).is_none());
    }

    #[test]
    fn test_corrupt_cache_file_is_discarded() {
        let dir = tempdir().unwrap();
        let cache_file = dir.path().join("external.cache.bin");
        fs::write(&cache_file, b"garbage").unwrap();
        let cache = ExternalMetadataCache::load(cache_file);
        assert!(cache.entries.is_empty());
    }
}
