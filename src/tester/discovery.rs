//! Test discovery.
//!
//! Recursively walks the working tree for `*.test.tml` files and `tests/`
//! directories of `.tml` files, excluding `pending/`, `.sandbox/` and build
//! output. Results are cached for an hour under `build/debug/.test-cache`
//! to speed repeated runs.

use crate::settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

const EXCLUDED_DIRS: &[&str] = &["pending", ".sandbox", "build", "target", ".git"];

#[derive(Debug, Serialize, Deserialize)]
struct DiscoveryCache {
    timestamp_secs: u64,
    files: Vec<PathBuf>,
}

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn is_test_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.ends_with(settings::TEST_FILE_SUFFIX) {
        return true;
    }
    // tests/*.tml are tests even without the .test suffix
    name.ends_with(&format!(".{}", settings::TML_FILE_EXTENSION))
        && path
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|parent| parent == "tests")
            .unwrap_or(false)
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| is_test_file(path))
        .filter_map(|path| {
            path.strip_prefix(root)
                .map(|relative| relative.to_path_buf())
                .ok()
        })
        .collect();
    files.sort();
    files
}

fn cache_path(root: &Path) -> PathBuf {
    root.join(settings::dirs::TEST_CACHE).join("discovery.json")
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Discovers test files under `root`, relative paths, sorted. The on-disk
/// cache is trusted while fresh unless `force` is set.
pub fn discover_tests(root: &Path, force: bool) -> Vec<PathBuf> {
    let cache_file = cache_path(root);
    if !force {
        if let Ok(content) = fs::read_to_string(&cache_file) {
            if let Ok(cache) = serde_json::from_str::<DiscoveryCache>(&content) {
                if now_secs().saturating_sub(cache.timestamp_secs)
                    < settings::DISCOVERY_CACHE_SECONDS
                {
                    return cache.files;
                }
            }
        }
    }

    let files = walk(root);
    if let Some(parent) = cache_file.parent() {
        if fs::create_dir_all(parent).is_ok() {
            let cache = DiscoveryCache {
                timestamp_secs: now_secs(),
                files: files.clone(),
            };
            if let Ok(json) = serde_json::to_string(&cache) {
                let _ = fs::write(&cache_file, json);
            }
        }
    }
    files
}

/// Negative-diagnostic test files (`*.error.tml`).
pub fn discover_error_tests(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(settings::ERROR_TEST_SUFFIX))
                .unwrap_or(false)
        })
        .filter_map(|path| {
            path.strip_prefix(root)
                .map(|relative| relative.to_path_buf())
                .ok()
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("dirs");
        fs::write(path, "@test\nfunc t() {\n}\n").expect("write");
    }

    #[test]
    fn finds_test_suffix_and_tests_dirs_only() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "compiler/lexer.test.tml");
        touch(dir.path(), "compiler/tests/parse.tml");
        touch(dir.path(), "compiler/lexer.tml"); // not a test
        touch(dir.path(), "pending/skipped.test.tml"); // excluded dir
        touch(dir.path(), ".sandbox/junk.test.tml"); // excluded dir
        touch(dir.path(), "build/out.test.tml"); // excluded dir

        let found = discover_tests(dir.path(), true);
        assert_eq!(
            found,
            vec![
                PathBuf::from("compiler/lexer.test.tml"),
                PathBuf::from("compiler/tests/parse.tml"),
            ]
        );
    }

    #[test]
    fn results_are_sorted_and_deterministic() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "b/z.test.tml");
        touch(dir.path(), "a/y.test.tml");
        let first = discover_tests(dir.path(), true);
        let second = discover_tests(dir.path(), true);
        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn fresh_cache_short_circuits_the_walk() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "a/one.test.tml");
        let first = discover_tests(dir.path(), false);
        assert_eq!(first.len(), 1);

        // A new file appears but the cached result is still served
        touch(dir.path(), "a/two.test.tml");
        let cached = discover_tests(dir.path(), false);
        assert_eq!(cached.len(), 1);

        let forced = discover_tests(dir.path(), true);
        assert_eq!(forced.len(), 2);
    }

    #[test]
    fn error_tests_are_discovered_separately() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "diag/bad_type.error.tml");
        touch(dir.path(), "diag/good.test.tml");
        let found = discover_error_tests(dir.path());
        assert_eq!(found, vec![PathBuf::from("diag/bad_type.error.tml")]);
    }
}
