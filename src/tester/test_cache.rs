//! Per-file test result cache.
//!
//! JSON document at `.test-cache.json`. An entry is valid when the file
//! still exists, its SHA-512 matches, every dependency's SHA-512 matches,
//! and the coverage/profile flags match the current run; `can_skip`
//! additionally requires the last result to be a pass. Additive fields are
//! tolerated on load; an unknown `version` ignores the document.

use crate::hashing;
use crate::log_debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const TEST_CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachedTestStatus {
    Pass,
    Fail,
    Error,
    Timeout,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTestInfo {
    pub sha512: String,
    pub suite: String,
    pub last_updated: String,
    #[serde(default)]
    pub test_functions: Vec<String>,
    pub last_result: CachedTestStatus,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub dependency_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub coverage_enabled: bool,
    #[serde(default)]
    pub profile_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCacheDocument {
    pub version: u32,
    #[serde(default)]
    pub tests: BTreeMap<String, CachedTestInfo>,
}

#[derive(Debug, Default)]
pub struct TestCacheManager {
    pub tests: BTreeMap<String, CachedTestInfo>,
}

#[derive(Debug, PartialEq)]
pub struct CacheValidation {
    pub valid: bool,
    pub reason: String,
}

impl TestCacheManager {
    pub fn new() -> TestCacheManager {
        TestCacheManager::default()
    }

    /// Loads the cache. Missing files and corrupt JSON start fresh; an
    /// unknown version is ignored entirely.
    pub fn load(&mut self, cache_file: &Path) -> bool {
        let Ok(content) = fs::read_to_string(cache_file) else {
            return false;
        };
        let document: TestCacheDocument = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(error) => {
                log_debug!("tester", "corrupt test cache ignored: {error}");
                return false;
            }
        };
        if document.version != TEST_CACHE_VERSION {
            log_debug!(
                "tester",
                "test cache version {} ignored",
                document.version
            );
            return false;
        }
        self.tests = document.tests;
        true
    }

    pub fn save(&self, cache_file: &Path) -> bool {
        let document = TestCacheDocument {
            version: TEST_CACHE_VERSION,
            tests: self.tests.clone(),
        };
        let Ok(json) = serde_json::to_string_pretty(&document) else {
            return false;
        };
        fs::write(cache_file, json).is_ok()
    }

    /// Validity predicate for an entry, relative to `root`.
    pub fn validate(
        &self,
        root: &Path,
        test_file: &str,
        coverage_enabled: bool,
        profile_enabled: bool,
    ) -> CacheValidation {
        let Some(entry) = self.tests.get(test_file) else {
            return invalid("not cached");
        };
        let absolute = root.join(test_file);
        if !absolute.is_file() {
            return invalid("file no longer exists");
        }
        match hashing::sha512_file(&absolute) {
            Ok(current) if current == entry.sha512 => {}
            Ok(_) => return invalid("file content changed"),
            Err(_) => return invalid("file unreadable"),
        }
        for (dependency, expected) in &entry.dependency_hashes {
            match hashing::sha512_file(&root.join(dependency)) {
                Ok(current) if current == *expected => {}
                Ok(_) => return invalid("dependency changed"),
                Err(_) => return invalid("dependency unreadable"),
            }
        }
        if entry.coverage_enabled != coverage_enabled {
            return invalid("coverage flag differs");
        }
        if entry.profile_enabled != profile_enabled {
            return invalid("profile flag differs");
        }
        CacheValidation {
            valid: true,
            reason: String::new(),
        }
    }

    /// Valid cache AND a passing last result.
    pub fn can_skip(
        &self,
        root: &Path,
        test_file: &str,
        coverage_enabled: bool,
        profile_enabled: bool,
    ) -> bool {
        self.validate(root, test_file, coverage_enabled, profile_enabled)
            .valid
            && self
                .tests
                .get(test_file)
                .map(|entry| entry.last_result == CachedTestStatus::Pass)
                .unwrap_or(false)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        test_file: &str,
        sha512: String,
        suite: String,
        test_functions: Vec<String>,
        result: CachedTestStatus,
        duration_ms: i64,
        dependency_hashes: BTreeMap<String, String>,
        coverage_enabled: bool,
        profile_enabled: bool,
    ) {
        self.tests.insert(
            test_file.to_string(),
            CachedTestInfo {
                sha512,
                suite,
                last_updated: chrono::Utc::now().to_rfc3339(),
                test_functions,
                last_result: result,
                duration_ms,
                dependency_hashes,
                coverage_enabled,
                profile_enabled,
            },
        );
    }

    pub fn remove(&mut self, test_file: &str) {
        self.tests.remove(test_file);
    }

    pub fn clear(&mut self) {
        self.tests.clear();
    }

    pub fn get(&self, test_file: &str) -> Option<&CachedTestInfo> {
        self.tests.get(test_file)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.tests.len(),
            passed_entries: self
                .tests
                .values()
                .filter(|entry| entry.last_result == CachedTestStatus::Pass)
                .count(),
            failed_entries: self
                .tests
                .values()
                .filter(|entry| {
                    matches!(
                        entry.last_result,
                        CachedTestStatus::Fail | CachedTestStatus::Error | CachedTestStatus::Timeout
                    )
                })
                .count(),
        }
    }
}

fn invalid(reason: &str) -> CacheValidation {
    CacheValidation {
        valid: false,
        reason: reason.to_string(),
    }
}

#[derive(Debug, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub passed_entries: usize,
    pub failed_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_for(root: &Path, relative: &str, result: CachedTestStatus) -> CachedTestInfo {
        CachedTestInfo {
            sha512: hashing::sha512_file(&root.join(relative)).expect("hash"),
            suite: "suite_a".to_string(),
            last_updated: chrono::Utc::now().to_rfc3339(),
            test_functions: vec!["checks_math".to_string()],
            last_result: result,
            duration_ms: 12,
            dependency_hashes: BTreeMap::new(),
            coverage_enabled: false,
            profile_enabled: false,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let test_file = dir.path().join("math.test.tml");
        fs::write(&test_file, "@test\nfunc checks_math() {\n}\n").expect("write");

        let mut cache = TestCacheManager::new();
        cache.tests.insert(
            "math.test.tml".to_string(),
            entry_for(dir.path(), "math.test.tml", CachedTestStatus::Pass),
        );
        let cache_path = dir.path().join(".test-cache.json");
        assert!(cache.save(&cache_path));

        let mut restored = TestCacheManager::new();
        assert!(restored.load(&cache_path));
        assert_eq!(restored.tests.len(), 1);
        assert!(restored.can_skip(dir.path(), "math.test.tml", false, false));
    }

    #[test]
    fn schema_matches_the_stable_contract() {
        let dir = TempDir::new().expect("tempdir");
        let test_file = dir.path().join("t.test.tml");
        fs::write(&test_file, "x").expect("write");

        let mut cache = TestCacheManager::new();
        let mut dependency_hashes = BTreeMap::new();
        dependency_hashes.insert("lib/core/alloc.tml".to_string(), "feed".to_string());
        cache.update(
            "t.test.tml",
            "abc".to_string(),
            "root".to_string(),
            vec!["t0".to_string()],
            CachedTestStatus::Timeout,
            1500,
            dependency_hashes,
            true,
            false,
        );
        let path = dir.path().join(".test-cache.json");
        cache.save(&path);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let entry = &raw["tests"]["t.test.tml"];
        assert_eq!(entry["sha512"], "abc");
        assert_eq!(entry["suite"], "root");
        assert_eq!(entry["last_result"], "timeout");
        assert_eq!(entry["duration_ms"], 1500);
        assert_eq!(entry["coverage_enabled"], true);
        assert_eq!(entry["profile_enabled"], false);
        assert_eq!(entry["dependency_hashes"]["lib/core/alloc.tml"], "feed");
        assert!(entry["last_updated"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn changed_content_invalidates() {
        let dir = TempDir::new().expect("tempdir");
        let test_file = dir.path().join("t.test.tml");
        fs::write(&test_file, "original").expect("write");

        let mut cache = TestCacheManager::new();
        cache.tests.insert(
            "t.test.tml".to_string(),
            entry_for(dir.path(), "t.test.tml", CachedTestStatus::Pass),
        );
        assert!(cache.validate(dir.path(), "t.test.tml", false, false).valid);

        fs::write(&test_file, "changed").expect("rewrite");
        let validation = cache.validate(dir.path(), "t.test.tml", false, false);
        assert!(!validation.valid);
        assert_eq!(validation.reason, "file content changed");
    }

    #[test]
    fn changed_dependency_invalidates() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("t.test.tml"), "test").expect("test");
        fs::write(dir.path().join("helper.tml"), "helper v1").expect("helper");

        let mut cache = TestCacheManager::new();
        let mut entry = entry_for(dir.path(), "t.test.tml", CachedTestStatus::Pass);
        entry.dependency_hashes.insert(
            "helper.tml".to_string(),
            hashing::sha512_file(&dir.path().join("helper.tml")).unwrap(),
        );
        cache.tests.insert("t.test.tml".to_string(), entry);
        assert!(cache.validate(dir.path(), "t.test.tml", false, false).valid);

        fs::write(dir.path().join("helper.tml"), "helper v2").expect("rewrite");
        assert!(!cache.validate(dir.path(), "t.test.tml", false, false).valid);
    }

    #[test]
    fn flag_mismatch_invalidates() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("t.test.tml"), "test").expect("write");
        let mut cache = TestCacheManager::new();
        cache.tests.insert(
            "t.test.tml".to_string(),
            entry_for(dir.path(), "t.test.tml", CachedTestStatus::Pass),
        );
        assert!(!cache.validate(dir.path(), "t.test.tml", true, false).valid);
    }

    #[test]
    fn failing_entries_are_valid_but_not_skippable() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("t.test.tml"), "test").expect("write");
        let mut cache = TestCacheManager::new();
        cache.tests.insert(
            "t.test.tml".to_string(),
            entry_for(dir.path(), "t.test.tml", CachedTestStatus::Fail),
        );
        assert!(cache.validate(dir.path(), "t.test.tml", false, false).valid);
        assert!(!cache.can_skip(dir.path(), "t.test.tml", false, false));
    }

    #[test]
    fn unknown_version_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(".test-cache.json");
        fs::write(&path, "{\"version\": 99, \"tests\": {}}").expect("write");
        let mut cache = TestCacheManager::new();
        assert!(!cache.load(&path));
        assert!(cache.tests.is_empty());
    }

    #[test]
    fn additive_fields_are_tolerated() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(".test-cache.json");
        fs::write(
            &path,
            "{\"version\": 1, \"future_field\": true, \"tests\": {\"t.test.tml\": {\"sha512\": \"x\", \"suite\": \"s\", \"last_updated\": \"2026-01-01T00:00:00Z\", \"last_result\": \"pass\", \"new_field\": 3}}}",
        )
        .expect("write");
        let mut cache = TestCacheManager::new();
        assert!(cache.load(&path));
        assert_eq!(cache.tests.len(), 1);
    }

    #[test]
    fn update_remove_update_equals_single_update() {
        let mut cache = TestCacheManager::new();
        let update = |cache: &mut TestCacheManager| {
            cache.update(
                "t.test.tml",
                "hash".to_string(),
                "suite".to_string(),
                vec![],
                CachedTestStatus::Pass,
                5,
                BTreeMap::new(),
                false,
                false,
            );
        };
        update(&mut cache);
        cache.remove("t.test.tml");
        update(&mut cache);

        let mut single = TestCacheManager::new();
        update(&mut single);

        let a = cache.get("t.test.tml").unwrap();
        let b = single.get("t.test.tml").unwrap();
        assert_eq!(a.sha512, b.sha512);
        assert_eq!(a.last_result, b.last_result);
        assert_eq!(a.duration_ms, b.duration_ms);
    }
}
