//! `tml.lock` - exact resolved versions with content hashes.
//!
//! A manifest is compatible with a lockfile when every direct dependency
//! appears in it with a satisfying version.

use crate::build_system::manifest::Manifest;
use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const LOCKFILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    /// `path`, `registry`, or `git`
    pub source: String,
    /// The path/url the source came from
    #[serde(default)]
    pub source_detail: String,
    /// Content hash of the package's rlib
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Lockfile {
    pub version: u32,
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

impl Lockfile {
    pub fn new() -> Lockfile {
        Lockfile {
            version: LOCKFILE_VERSION,
            packages: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Lockfile, CompileError> {
        let content = fs::read_to_string(path).map_err(|error| {
            CompileError::new(
                format!("Cannot read lockfile '{}': {error}", path.display()),
                ErrorLocation::default(),
                ErrorCode::CFG001,
            )
        })?;
        toml::from_str(&content).map_err(|error| {
            CompileError::new(
                format!("Malformed lockfile '{}': {error}", path.display()),
                ErrorLocation::default(),
                ErrorCode::CFG001,
            )
        })
    }

    pub fn load_from_dir(dir: &Path) -> Result<Lockfile, CompileError> {
        Lockfile::load(&dir.join(settings::LOCKFILE_NAME))
    }

    pub fn save(&self, path: &Path) -> Result<(), CompileError> {
        let content = toml::to_string_pretty(self).map_err(|error| {
            CompileError::new(
                format!("Cannot serialize lockfile: {error}"),
                ErrorLocation::default(),
                ErrorCode::CFG001,
            )
        })?;
        fs::write(path, content).map_err(|error| {
            CompileError::new(
                format!("Cannot write lockfile '{}': {error}", path.display()),
                ErrorLocation::default(),
                ErrorCode::F001,
            )
        })
    }

    pub fn find(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|package| package.name == name)
    }

    pub fn upsert(&mut self, package: LockedPackage) {
        match self
            .packages
            .iter_mut()
            .find(|existing| existing.name == package.name)
        {
            Some(existing) => *existing = package,
            None => self.packages.push(package),
        }
        self.packages.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Every direct manifest dependency must appear with a satisfying
    /// version.
    pub fn is_compatible_with(&self, manifest: &Manifest) -> bool {
        manifest.dependencies.iter().all(|(name, spec)| {
            match self.find(name) {
                Some(locked) => match spec.version() {
                    Some(requirement) => version_satisfies(&locked.version, requirement),
                    // Path/git deps are satisfied by presence
                    None => true,
                },
                None => false,
            }
        })
    }
}

/// Semver-subset matcher: `^MAJOR.MINOR.PATCH` (compatible within major),
/// `MAJOR.MINOR`/`MAJOR.MINOR.PATCH` exact-prefix, `*` anything.
pub fn version_satisfies(version: &str, requirement: &str) -> bool {
    if requirement == "*" || requirement.is_empty() {
        return true;
    }
    if let Some(base) = requirement.strip_prefix('^') {
        let (req_major, _, _) = split_version(base);
        let (ver_major, _, _) = split_version(version);
        if req_major != ver_major {
            return false;
        }
        return compare_versions(version, base) != std::cmp::Ordering::Less;
    }
    version == requirement || version.starts_with(&format!("{requirement}."))
}

fn split_version(text: &str) -> (u64, u64, u64) {
    let mut parts = text.split('.').map(|part| {
        part.chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect::<String>()
            .parse::<u64>()
            .unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    split_version(a).cmp(&split_version(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Lockfile {
        let mut lockfile = Lockfile::new();
        lockfile.upsert(LockedPackage {
            name: "core_utils".to_string(),
            version: "1.4.2".to_string(),
            source: "registry".to_string(),
            source_detail: String::new(),
            hash: "abc123".to_string(),
            dependencies: vec![],
        });
        lockfile.upsert(LockedPackage {
            name: "local_helper".to_string(),
            version: "0.3.0".to_string(),
            source: "path".to_string(),
            source_detail: "../helper".to_string(),
            hash: "def456".to_string(),
            dependencies: vec!["core_utils".to_string()],
        });
        lockfile
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(settings::LOCKFILE_NAME);
        let lockfile = sample();
        lockfile.save(&path).expect("save");
        let restored = Lockfile::load(&path).expect("load");
        assert_eq!(restored.version, LOCKFILE_VERSION);
        assert_eq!(restored.packages, lockfile.packages);
    }

    #[test]
    fn version_matching_covers_caret_and_exact() {
        assert!(version_satisfies("1.4.2", "^1.0"));
        assert!(version_satisfies("1.4.2", "^1.4.2"));
        assert!(!version_satisfies("2.0.0", "^1.0"));
        assert!(!version_satisfies("1.3.9", "^1.4.0"));
        assert!(version_satisfies("1.4.2", "1.4"));
        assert!(version_satisfies("1.4.2", "1.4.2"));
        assert!(!version_satisfies("1.5.0", "1.4.2"));
        assert!(version_satisfies("9.9.9", "*"));
    }

    #[test]
    fn compatibility_requires_every_direct_dep() {
        let manifest: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\ncore_utils = \"^1.0\"\nlocal_helper = { path = \"../helper\" }\n",
        )
        .expect("manifest");
        let lockfile = sample();
        assert!(lockfile.is_compatible_with(&manifest));

        let demanding: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\ncore_utils = \"^2.0\"\n",
        )
        .expect("manifest");
        assert!(!lockfile.is_compatible_with(&demanding));

        let missing: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nghost = \"^1.0\"\n",
        )
        .expect("manifest");
        assert!(!lockfile.is_compatible_with(&missing));
    }

    #[test]
    fn upsert_replaces_and_sorts() {
        let mut lockfile = sample();
        lockfile.upsert(LockedPackage {
            name: "core_utils".to_string(),
            version: "1.5.0".to_string(),
            source: "registry".to_string(),
            source_detail: String::new(),
            hash: "zzz".to_string(),
            dependencies: vec![],
        });
        assert_eq!(lockfile.packages.len(), 2);
        assert_eq!(lockfile.find("core_utils").unwrap().version, "1.5.0");
        assert!(lockfile.packages.windows(2).all(|pair| pair[0].name <= pair[1].name));
    }
}
