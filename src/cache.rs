//! Size-bounded on-disk cache for photo metadata and content.
//!
//! Each entry is one file in the cache directory. The file name is derived from
//! the entry key, and the file's size and modification time are the entry's
//! accounting data, so the in-memory index can always be rebuilt by listing the
//! directory. Reads refresh the modification time, which doubles as the
//! last-access timestamp for LRU eviction.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::events::PhotoId;

const TMP_SUFFIX: &str = ".tmp";

pub fn metadata_key(id: &PhotoId) -> String {
    format!("meta-{id}")
}

pub fn content_key(id: &PhotoId) -> String {
    format!("content-{id}")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    size: u64,
    /// Access order; bumped on every read and write. The lowest is evicted first.
    seq: u64,
}

#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    budget: u64,
    entries: HashMap<String, CacheEntry>,
    total: u64,
    clock: u64,
}

impl DiskCache {
    /// Open (creating if needed) the cache at `root` and rebuild its index from
    /// the directory listing.
    pub fn open(root: impl Into<PathBuf>, budget_bytes: u64) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut found: Vec<(String, u64, SystemTime)> = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(err) => {
                    warn!(path = %entry.path().display(), "cache: skipping unreadable entry: {err}");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                debug!(file = %name, "cache: removing interrupted write");
                let _ = fs::remove_file(entry.path());
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((name, meta.len(), modified));
        }
        found.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

        let mut cache = Self {
            root,
            budget: budget_bytes,
            entries: HashMap::with_capacity(found.len()),
            total: 0,
            clock: 0,
        };
        for (name, size, _) in found {
            let seq = cache.tick();
            cache.total += size;
            cache.entries.insert(
                name,
                CacheEntry {
                    size,
                    seq,
                },
            );
        }
        info!(
            root = %cache.root.display(),
            entries = cache.entries.len(),
            bytes = cache.total,
            budget = cache.budget,
            "cache index rebuilt"
        );
        cache.evict_until_under_budget();
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&file_name_for(key))
    }

    /// Return the cached payload, refreshing its last-access time.
    pub fn get(&mut self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let name = file_name_for(key);
        if !self.entries.contains_key(&name) {
            return Ok(None);
        }
        let path = self.root.join(&name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Deleted behind our back; forget it.
                self.forget(&name);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let now = SystemTime::now();
        let seq = self.tick();
        if let Some(entry) = self.entries.get_mut(&name) {
            entry.seq = seq;
        }
        if let Err(err) = touch(&path, now) {
            debug!(key, "cache: could not refresh mtime: {err}");
        }
        Ok(Some(bytes))
    }

    /// Store `bytes` under `key`, replacing any previous payload, then evict
    /// until the cache fits its budget again.
    pub fn put(&mut self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let size = bytes.len() as u64;
        if size > self.budget {
            return Err(io::Error::other(format!(
                "payload of {size} bytes exceeds cache budget of {} bytes",
                self.budget
            )));
        }

        let name = file_name_for(key);
        let path = self.root.join(&name);
        let tmp = self.root.join(format!("{name}{TMP_SUFFIX}"));
        if let Err(err) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        self.forget(&name);
        let seq = self.tick();
        self.total += size;
        self.entries.insert(
            name,
            CacheEntry {
                size,
                seq,
            },
        );
        debug!(key, bytes = size, total = self.total, "cache: stored");
        self.evict_until_under_budget();
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> io::Result<bool> {
        let name = file_name_for(key);
        if self.forget(&name).is_none() {
            return Ok(false);
        }
        match fs::remove_file(self.root.join(&name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Drop least-recently-accessed entries until the total fits the budget.
    /// Returns the evicted file names, oldest first.
    pub fn evict_until_under_budget(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.total > self.budget {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(name, _)| name.clone())
            else {
                break;
            };
            let size = self.forget(&victim).map_or(0, |entry| entry.size);
            match fs::remove_file(self.root.join(&victim)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(file = %victim, "cache: eviction could not delete file: {err}"),
            }
            debug!(file = %victim, bytes = size, total = self.total, "cache: evicted");
            evicted.push(victim);
        }
        evicted
    }

    fn forget(&mut self, name: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(name)?;
        self.total -= entry.size;
        Some(entry)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// The cache as the fetch workers share it: one mutex serializes every
/// mutation, and all disk work runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct SharedCache(Arc<Mutex<DiskCache>>);

impl SharedCache {
    pub fn new(cache: DiskCache) -> Self {
        Self(Arc::new(Mutex::new(cache)))
    }

    pub async fn get(&self, key: String) -> io::Result<Option<Vec<u8>>> {
        self.with(move |cache| cache.get(&key)).await?
    }

    pub async fn put(&self, key: String, bytes: Vec<u8>) -> io::Result<()> {
        self.with(move |cache| cache.put(&key, &bytes)).await?
    }

    pub async fn remove(&self, key: String) -> io::Result<bool> {
        self.with(move |cache| cache.remove(&key)).await?
    }

    pub async fn contains(&self, key: String) -> io::Result<bool> {
        self.with(move |cache| cache.contains(&key)).await
    }

    async fn with<R, F>(&self, f: F) -> io::Result<R>
    where
        F: FnOnce(&mut DiskCache) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut cache)
        })
        .await
        .map_err(io::Error::other)
    }
}

fn touch(path: &Path, at: SystemTime) -> io::Result<()> {
    File::options().write(true).open(path)?.set_modified(at)
}

/// Escape every byte outside `[A-Za-z0-9_-]` as `%XX`.
fn file_name_for(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn open(dir: &Path, budget: u64) -> DiskCache {
        DiskCache::open(dir, budget).unwrap()
    }

    #[test]
    fn file_names_are_flat_and_distinct() {
        assert_eq!(file_name_for("meta-a.jpg"), "meta-a%2Ejpg");
        assert_eq!(file_name_for("content-trips/x y"), "content-trips%2Fx%20y");
        assert_ne!(file_name_for("a/b"), file_name_for("a%2Fb"));
    }

    #[test]
    fn get_returns_stored_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 1024);
        assert!(cache.get("meta-a").unwrap().is_none());
        cache.put("meta-a", b"hello").unwrap();
        assert_eq!(cache.get("meta-a").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(cache.total_bytes(), 5);
    }

    #[test]
    fn overwrite_replaces_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 1024);
        cache.put("k", &[0; 100]).unwrap();
        cache.put("k", &[0; 30]).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 30);
    }

    #[test]
    fn evicts_least_recently_accessed_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 100);
        cache.put("a", &[1; 40]).unwrap();
        cache.put("b", &[2; 40]).unwrap();
        // 120 > 100: a is the oldest
        cache.put("c", &[3; 40]).unwrap();
        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c"));

        // touching b makes c the eviction candidate
        cache.get("b").unwrap();
        cache.put("d", &[4; 40]).unwrap();
        assert!(!cache.contains("c"));
        assert!(cache.contains("b") && cache.contains("d"));
        assert_eq!(cache.total_bytes(), 80);
        assert!(!dir.path().join("c").exists());
    }

    #[test]
    fn evicts_one_at_a_time_until_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 100);
        for key in ["a", "b", "c", "d", "e"] {
            cache.put(key, &[0; 20]).unwrap();
        }
        cache.put("big", &[0; 70]).unwrap();
        // 170 bytes: dropping a, b, c (60) brings it to 110, d brings it to 90
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("e") && cache.contains("big"));
        assert_eq!(cache.total_bytes(), 90);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 10);
        cache.put("small", &[0; 5]).unwrap();
        assert!(cache.put("huge", &[0; 11]).is_err());
        assert!(cache.contains("small"));
        assert_eq!(cache.total_bytes(), 5);
    }

    #[test]
    fn budget_holds_after_every_put() {
        let dir = tempfile::tempdir().unwrap();
        let budget = 4096;
        let mut cache = open(dir.path(), budget);
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let key = format!("k{}", rng.random_range(0..40));
            let size = rng.random_range(1..=1024);
            cache.put(&key, &vec![0u8; size]).unwrap();
            assert!(cache.total_bytes() <= budget);
            if rng.random_bool(0.3) {
                let probe = format!("k{}", rng.random_range(0..40));
                cache.get(&probe).unwrap();
            }
        }
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = open(dir.path(), 1024);
            cache.put("meta-a", b"{}").unwrap();
            cache.put("content-a", &[7; 64]).unwrap();
        }
        std::fs::write(dir.path().join("content-b.tmp"), b"partial").unwrap();

        let mut cache = open(dir.path(), 1024);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_bytes(), 66);
        assert_eq!(cache.get("content-a").unwrap().unwrap().len(), 64);
        assert!(!dir.path().join("content-b.tmp").exists());
    }

    #[test]
    fn reopen_with_smaller_budget_evicts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = open(dir.path(), 1024);
            cache.put("a", &[0; 300]).unwrap();
            cache.put("b", &[0; 300]).unwrap();
        }
        let cache = open(dir.path(), 400);
        assert!(cache.total_bytes() <= 400);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_updates_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 1024);
        cache.put("a", &[0; 10]).unwrap();
        assert!(cache.remove("a").unwrap());
        assert!(!cache.remove("a").unwrap());
        assert_eq!(cache.total_bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn future_mtime_does_not_shield_an_entry_from_eviction() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = open(dir.path(), 100);
            cache.put("a", &[1; 40]).unwrap();
        }
        let tomorrow = SystemTime::now() + std::time::Duration::from_secs(24 * 60 * 60);
        touch(&dir.path().join("a"), tomorrow).unwrap();

        let mut cache = open(dir.path(), 100);
        cache.put("b", &[2; 40]).unwrap();
        cache.put("c", &[3; 40]).unwrap();
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.total_bytes(), 80);
    }

    #[test]
    fn externally_deleted_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open(dir.path(), 1024);
        cache.put("a", &[0; 10]).unwrap();
        std::fs::remove_file(dir.path().join("a")).unwrap();
        assert!(cache.get("a").unwrap().is_none());
        assert_eq!(cache.total_bytes(), 0);
    }
}
