//! Disk-backed response cache.
//!
//! One file per key under the cache directory, named by the SHA-256 of the
//! key. File layout: magic, little-endian header length, JSON header, body.
//! The in-memory index is rebuilt from file headers by `initialize`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Cache, Entry, DEFAULT_MAX_BYTES, HYSTERESIS_FACTOR};
use crate::error::CacheError;
use crate::http::Headers;

const MAGIC: &[u8; 4] = b"CRC1";
/// Refuse headers larger than this; anything bigger is corruption.
const MAX_HEADER_BYTES: u32 = 1024 * 1024;

/// Configuration for the disk cache.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub directory: PathBuf,
    pub max_bytes: usize,
}

impl DiskCacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    key: String,
    etag: Option<String>,
    server_date: Option<SystemTime>,
    last_modified: Option<SystemTime>,
    soft_ttl: SystemTime,
    ttl: SystemTime,
    response_headers: Headers,
}

impl FileHeader {
    fn from_entry(key: &str, entry: &Entry) -> Self {
        Self {
            key: key.to_string(),
            etag: entry.etag.clone(),
            server_date: entry.server_date,
            last_modified: entry.last_modified,
            soft_ttl: entry.soft_ttl(),
            ttl: entry.ttl(),
            response_headers: entry.response_headers.clone(),
        }
    }

    fn into_entry(self, data: Vec<u8>) -> Entry {
        let mut entry = Entry::new(data, self.soft_ttl, self.ttl);
        entry.etag = self.etag;
        entry.server_date = self.server_date;
        entry.last_modified = self.last_modified;
        entry.response_headers = self.response_headers;
        entry
    }
}

struct IndexEntry {
    size: usize,
    last_access: u64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, IndexEntry>,
    total_bytes: usize,
    clock: u64,
}

impl Index {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(e) = self.entries.get_mut(key) {
            e.last_access = clock;
        }
    }

    fn insert(&mut self, key: String, size: usize) {
        self.clock += 1;
        let entry = IndexEntry {
            size,
            last_access: self.clock,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes -= old.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.total_bytes -= old.size;
                true
            }
            None => false,
        }
    }
}

/// Persistent cache storing each entry in its own file.
pub struct DiskCache {
    config: DiskCacheConfig,
    index: Mutex<Index>,
    initialized: AtomicBool,
}

impl DiskCache {
    pub fn new(config: DiskCacheConfig) -> Self {
        Self {
            config,
            index: Mutex::new(Index::default()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn total_bytes(&self) -> usize {
        self.index.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn file_for_key(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.config.directory.join(hex::encode(digest))
    }

    fn ensure_initialized(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.initialize() {
            tracing::error!(
                error = %e,
                dir = %self.config.directory.display(),
                "disk cache initialization failed"
            );
        }
    }

    fn read_header(reader: &mut impl Read) -> Result<FileHeader, CacheError> {
        let corrupt = |reason: &str| CacheError::Corrupt {
            key: String::new(),
            reason: reason.to_string(),
        };
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len);
        if len > MAX_HEADER_BYTES {
            return Err(corrupt("header too large"));
        }
        let mut header = vec![0u8; len as usize];
        reader.read_exact(&mut header)?;
        Ok(serde_json::from_slice(&header)?)
    }

    fn read_entry(&self, key: &str) -> Result<Entry, CacheError> {
        let mut reader = BufReader::new(File::open(self.file_for_key(key))?);
        let header = Self::read_header(&mut reader)?;
        if header.key != key {
            return Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("file holds key {:?}", header.key),
            });
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(header.into_entry(data))
    }

    fn encode_header(key: &str, entry: &Entry) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(&FileHeader::from_entry(key, entry))?)
    }

    fn file_size(header: &[u8], entry: &Entry) -> usize {
        MAGIC.len() + 4 + header.len() + entry.data.len()
    }

    fn write_entry(&self, key: &str, header: &[u8], entry: &Entry) -> Result<(), CacheError> {
        let path = self.file_for_key(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(MAGIC)?;
            file.write_all(&(header.len() as u32).to_le_bytes())?;
            file.write_all(header)?;
            file.write_all(&entry.data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete_file(&self, key: &str) {
        let path = self.file_for_key(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(key, error = %e, "could not delete cache file");
            }
        }
    }

    fn prune_if_needed(&self, index: &mut Index, needed: usize) {
        if index.total_bytes + needed <= self.config.max_bytes {
            return;
        }
        let target = (self.config.max_bytes as f64 * HYSTERESIS_FACTOR) as usize;
        let mut by_age: Vec<(u64, String)> = index
            .entries
            .iter()
            .map(|(k, e)| (e.last_access, k.clone()))
            .collect();
        by_age.sort_unstable();
        let before = index.entries.len();
        for (_, key) in by_age {
            if index.total_bytes + needed < target {
                break;
            }
            self.delete_file(&key);
            index.remove(&key);
        }
        tracing::debug!(
            pruned = before - index.entries.len(),
            total_bytes = index.total_bytes,
            "disk cache pruned"
        );
    }
}

impl Cache for DiskCache {
    fn initialize(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        fs::create_dir_all(&self.config.directory)?;
        for dirent in fs::read_dir(&self.config.directory)? {
            let path = dirent?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().is_some_and(|ext| ext == "tmp") {
                let _ = fs::remove_file(&path);
                continue;
            }
            let loaded = File::open(&path)
                .map_err(CacheError::from)
                .and_then(|f| {
                    let size = f.metadata()?.len() as usize;
                    let header = Self::read_header(&mut BufReader::new(f))?;
                    Ok((header.key, size))
                });
            match loaded {
                Ok((key, size)) => index.insert(key, size),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "dropping unreadable cache file"
                    );
                    let _ = fs::remove_file(&path);
                }
            }
        }
        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            entries = index.entries.len(),
            total_bytes = index.total_bytes,
            dir = %self.config.directory.display(),
            "disk cache initialized"
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Arc<Entry>> {
        self.ensure_initialized();
        let mut index = self.index.lock();
        if !index.entries.contains_key(key) {
            return None;
        }
        match self.read_entry(key) {
            Ok(entry) => {
                index.touch(key);
                Some(Arc::new(entry))
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, treating as miss");
                self.delete_file(key);
                index.remove(key);
                None
            }
        }
    }

    fn put(&self, key: &str, entry: Entry) {
        self.ensure_initialized();
        let header = match Self::encode_header(key, &entry) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache header encoding failed");
                return;
            }
        };
        let size = Self::file_size(&header, &entry);
        let mut index = self.index.lock();
        index.remove(key);
        if size > self.config.max_bytes {
            tracing::debug!(key, size, "entry larger than cache budget, not stored");
            self.delete_file(key);
            return;
        }
        self.prune_if_needed(&mut index, size);
        match self.write_entry(key, &header, &entry) {
            Ok(()) => index.insert(key.to_string(), size),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache write failed");
                self.delete_file(key);
            }
        }
    }

    fn remove(&self, key: &str) {
        self.ensure_initialized();
        let mut index = self.index.lock();
        self.delete_file(key);
        index.remove(key);
    }

    fn clear(&self) {
        self.ensure_initialized();
        let mut index = self.index.lock();
        let keys: Vec<String> = index.entries.keys().cloned().collect();
        for key in &keys {
            self.delete_file(key);
        }
        *index = Index::default();
        tracing::debug!(removed = keys.len(), "disk cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache_in(dir: &Path, max_bytes: usize) -> DiskCache {
        DiskCache::new(DiskCacheConfig {
            directory: dir.to_path_buf(),
            max_bytes,
        })
    }

    fn entry(body: &[u8]) -> Entry {
        Entry::expiring_in(body.to_vec(), Duration::from_secs(30), Duration::from_secs(60))
            .with_etag("\"v1\"")
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), DEFAULT_MAX_BYTES);
        cache.initialize().unwrap();
        let original = entry(b"hello");
        cache.put("GET https://example.com/a", original.clone());
        let loaded = cache.get("GET https://example.com/a").unwrap();
        assert_eq!(*loaded, original);
    }

    #[test]
    fn index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = cache_in(dir.path(), DEFAULT_MAX_BYTES);
            cache.put("k1", entry(b"one"));
            cache.put("k2", entry(b"two"));
        }
        let reopened = cache_in(dir.path(), DEFAULT_MAX_BYTES);
        reopened.initialize().unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("k2").unwrap().data, b"two");
    }

    #[test]
    fn corrupt_files_are_dropped_on_initialize() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("garbage"), b"not a cache file").unwrap();
        let cache = cache_in(dir.path(), DEFAULT_MAX_BYTES);
        cache.initialize().unwrap();
        assert!(cache.is_empty());
        assert!(!dir.path().join("garbage").exists());
    }

    #[test]
    fn prunes_to_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), 2_000);
        for i in 0..10 {
            cache.put(&format!("k{i}"), entry(&[7u8; 300]));
        }
        assert!(cache.total_bytes() <= 2_000);
        assert!(cache.get("k9").is_some());
        assert!(cache.get("k0").is_none());
    }

    #[test]
    fn clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), DEFAULT_MAX_BYTES);
        cache.put("a", entry(b"1"));
        cache.clear();
        assert!(cache.get("a").is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
