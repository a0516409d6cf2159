//! Content-addressed build cache.
//!
//! A flat directory of artifacts named by their fingerprint (preprocessed
//! source + compiler version + options + upstream fingerprints, see
//! `hashing::build_fingerprint`). Filesystem trouble is always a cache miss,
//! never a failure. The LRU bound and selective invalidation are maintenance
//! operations invoked from the `cache` command and the build driver.

use crate::hashing;
use crate::log_debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub struct BuildCache {
    pub dir: PathBuf,
}

impl BuildCache {
    pub fn new(dir: PathBuf) -> BuildCache {
        BuildCache { dir }
    }

    pub fn fingerprint(
        &self,
        preprocessed_source: &[u8],
        options_key: &str,
        upstream: &[String],
    ) -> String {
        hashing::build_fingerprint(
            preprocessed_source,
            crate::settings::COMPILER_VERSION,
            options_key,
            upstream,
        )
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(fingerprint)
    }

    /// Returns the cached artifact path when present.
    pub fn lookup(&self, fingerprint: &str) -> Option<PathBuf> {
        let path = self.entry_path(fingerprint);
        if path.is_file() { Some(path) } else { None }
    }

    /// Stores artifact bytes under the fingerprint. Two workers writing the
    /// same fingerprint write identical bytes, so last-writer-wins is
    /// idempotent.
    pub fn store(&self, fingerprint: &str, artifact: &[u8]) -> Option<PathBuf> {
        if fs::create_dir_all(&self.dir).is_err() {
            return None;
        }
        let path = self.entry_path(fingerprint);
        match fs::write(&path, artifact) {
            Ok(()) => Some(path),
            Err(error) => {
                log_debug!("cache", "store failed for {fingerprint}: {error}");
                None
            }
        }
    }

    pub fn store_file(&self, fingerprint: &str, artifact: &Path) -> Option<PathBuf> {
        let bytes = fs::read(artifact).ok()?;
        self.store(fingerprint, &bytes)
    }

    /// Total size of all entries, in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries()
            .iter()
            .map(|entry| entry.size)
            .sum()
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> Vec<CacheEntry> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|entry| {
                // Individual failures are skipped; files may be concurrently
                // deleted or locked
                let entry = entry.ok()?;
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let accessed = metadata
                    .accessed()
                    .or_else(|_| metadata.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some(CacheEntry {
                    path: entry.path(),
                    size: metadata.len(),
                    accessed,
                })
            })
            .collect()
    }

    /// Deletes least-recently-used entries until the total size fits under
    /// `max_size_mb`. No file accessed after any deleted file survives the
    /// deletion boundary.
    pub fn enforce_cache_limit(&self, max_size_mb: u64) -> usize {
        let limit = max_size_mb * 1024 * 1024;
        let mut entries = self.entries();
        let mut total: u64 = entries.iter().map(|entry| entry.size).sum();
        if total <= limit {
            return 0;
        }

        entries.sort_by_key(|entry| entry.accessed);
        let mut removed = 0;
        for entry in entries {
            if total <= limit {
                break;
            }
            if fs::remove_file(&entry.path).is_ok() {
                total = total.saturating_sub(entry.size);
                removed += 1;
            }
        }
        removed
    }

    /// Removes every entry whose recorded key metadata references one of the
    /// given source paths. Matching is by filename stem across the cache
    /// directory, the conservative over-approximation.
    pub fn invalidate(&self, paths: &[PathBuf]) -> usize {
        let stems: Vec<String> = paths
            .iter()
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .collect();
        if stems.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for entry in self.entries() {
            let name = entry
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if stems.iter().any(|stem| name.contains(stem.as_str())) {
                if fs::remove_file(&entry.path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Deletes everything.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for entry in self.entries() {
            if fs::remove_file(&entry.path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

struct CacheEntry {
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> BuildCache {
        BuildCache::new(dir.path().join("cache"))
    }

    #[test]
    fn store_then_lookup_returns_identical_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        let fingerprint = cache.fingerprint(b"func main() {}", "-O1", &[]);
        assert!(cache.lookup(&fingerprint).is_none());

        let stored = cache.store(&fingerprint, b"ARTIFACT").expect("store");
        let found = cache.lookup(&fingerprint).expect("hit");
        assert_eq!(stored, found);
        assert_eq!(fs::read(found).unwrap(), b"ARTIFACT");
    }

    #[test]
    fn identical_inputs_give_identical_fingerprints() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        let a = cache.fingerprint(b"src", "-O2", &["dep1".to_string()]);
        let b = cache.fingerprint(b"src", "-O2", &["dep1".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, cache.fingerprint(b"src", "-O3", &["dep1".to_string()]));
    }

    #[test]
    fn lru_bound_removes_oldest_first_and_respects_the_limit() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        // Three 1 MiB entries; enforce a 2 MiB limit
        let megabyte = vec![0u8; 1024 * 1024];
        for index in 0..3 {
            cache.store(&format!("entry{index}"), &megabyte);
            // Nudge access times apart
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let removed = cache.enforce_cache_limit(2);
        assert_eq!(removed, 1);
        assert!(cache.total_size() <= 2 * 1024 * 1024);
        // entry0 was least recently touched
        assert!(cache.lookup("entry0").is_none());
        assert!(cache.lookup("entry2").is_some());
    }

    #[test]
    fn enforce_under_limit_is_a_no_op() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        cache.store("small", b"tiny");
        assert_eq!(cache.enforce_cache_limit(10), 0);
        assert!(cache.lookup("small").is_some());
    }

    #[test]
    fn invalidate_deletes_by_stem_match() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        cache.store("app_main_abc123", b"1");
        cache.store("app_util_def456", b"2");
        cache.store("other_zzz", b"3");

        let removed = cache.invalidate(&[PathBuf::from("src/app_main.tml")]);
        assert_eq!(removed, 1);
        assert!(cache.lookup("app_main_abc123").is_none());
        assert!(cache.lookup("app_util_def456").is_some());
        assert!(cache.lookup("other_zzz").is_some());
    }

    #[test]
    fn missing_cache_dir_is_a_miss_not_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let cache = cache_in(&dir);
        assert!(cache.lookup("anything").is_none());
        assert_eq!(cache.total_size(), 0);
        assert_eq!(cache.enforce_cache_limit(1), 0);
        assert_eq!(cache.invalidate(&[PathBuf::from("x.tml")]), 0);
    }
}
