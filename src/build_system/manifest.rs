//! `tml.toml` manifest parsing.
//!
//! Sections: `[package]`, `[lib]`, `[[bin]]`, `[dependencies]`, `[build]`,
//! and `[profile.*]` overrides. Dependencies come in path, version
//! (registry) and git forms.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default = "default_edition")]
    pub edition: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub repository: String,
}

fn default_edition() -> String {
    String::from("2024")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibConfig {
    #[serde(default = "default_lib_path")]
    pub path: String,
    #[serde(default = "default_crate_types")]
    pub crate_types: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub emit_header: bool,
}

fn default_lib_path() -> String {
    String::from("src/lib.tml")
}

fn default_crate_types() -> Vec<String> {
    vec![String::from("rlib")]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinConfig {
    pub name: String,
    pub path: String,
}

/// `dep = "1.2"` or `dep = { path = "../lib" }` or
/// `dep = { git = "...", tag = "v1" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Version(String),
    Detailed(DetailedDependency),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedDependency {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
}

impl DependencySpec {
    pub fn is_path_dependency(&self) -> bool {
        matches!(self, DependencySpec::Detailed(detail) if detail.path.is_some())
    }

    pub fn is_git_dependency(&self) -> bool {
        matches!(self, DependencySpec::Detailed(detail) if detail.git.is_some())
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            DependencySpec::Version(version) => Some(version),
            DependencySpec::Detailed(detail) => detail.version.as_deref(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            DependencySpec::Detailed(detail) => detail.path.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default)]
    pub optimization_level: u8,
    #[serde(default)]
    pub emit_ir: bool,
    #[serde(default)]
    pub emit_header: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            optimization_level: 0,
            emit_ir: false,
            emit_header: false,
            verbose: false,
            cache: true,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub package: PackageInfo,
    #[serde(default)]
    pub lib: Option<LibConfig>,
    #[serde(default, rename = "bin")]
    pub bins: Vec<BinConfig>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub profile: BTreeMap<String, BuildSettings>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest, CompileError> {
        let content = fs::read_to_string(path).map_err(|error| {
            CompileError::new(
                format!("Cannot read manifest '{}': {error}", path.display()),
                ErrorLocation::default(),
                ErrorCode::CFG001,
            )
        })?;
        let manifest: Manifest = toml::from_str(&content).map_err(|error| {
            CompileError::new(
                format!("Malformed manifest '{}': {error}", path.display()),
                ErrorLocation::default(),
                ErrorCode::CFG001,
            )
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load_from_dir(dir: &Path) -> Result<Manifest, CompileError> {
        Manifest::load(&dir.join(settings::MANIFEST_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        if self.package.name.is_empty() {
            return Err(CompileError::new(
                "Manifest package name is empty",
                ErrorLocation::default(),
                ErrorCode::CFG001,
            ));
        }
        if self.package.version.is_empty() {
            return Err(CompileError::new(
                "Manifest package version is empty",
                ErrorLocation::default(),
                ErrorCode::CFG001,
            ));
        }
        for bin in &self.bins {
            if bin.name.is_empty() || bin.path.is_empty() {
                return Err(CompileError::new(
                    "A [[bin]] entry needs both name and path",
                    ErrorLocation::default(),
                    ErrorCode::CFG001,
                ));
            }
        }
        Ok(())
    }

    /// Effective settings for a profile: `[profile.<name>]` merged over
    /// `[build]`.
    pub fn build_settings(&self, profile_name: &str) -> BuildSettings {
        self.profile
            .get(profile_name)
            .cloned()
            .unwrap_or_else(|| self.build.clone())
    }

    pub fn lib_name(&self) -> String {
        self.lib
            .as_ref()
            .and_then(|lib| lib.name.clone())
            .unwrap_or_else(|| self.package.name.clone())
    }

    pub fn lib_source_path(&self, project_root: &Path) -> Option<PathBuf> {
        self.lib.as_ref().map(|lib| project_root.join(&lib.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[package]
name = "mylib"
version = "1.2.3"
authors = ["dev@example.com"]

[lib]
path = "src/lib.tml"
crate_types = ["rlib"]

[[bin]]
name = "tool"
path = "src/tool.tml"

[dependencies]
core_utils = "^1.0"
local_helper = { path = "../helper" }
remote = { git = "https://example.com/remote.git", tag = "v2" }

[build]
optimization_level = 2
emit_ir = false

[profile.release]
optimization_level = 3
cache = true
parallel = true
"#;

    #[test]
    fn parses_every_section() {
        let manifest: Manifest = toml::from_str(SAMPLE).expect("manifest should parse");
        assert_eq!(manifest.package.name, "mylib");
        assert_eq!(manifest.package.edition, "2024");
        assert_eq!(manifest.bins.len(), 1);
        assert_eq!(manifest.dependencies.len(), 3);
        assert!(manifest.dependencies["local_helper"].is_path_dependency());
        assert!(manifest.dependencies["remote"].is_git_dependency());
        assert_eq!(manifest.dependencies["core_utils"].version(), Some("^1.0"));
        assert_eq!(manifest.build.optimization_level, 2);
    }

    #[test]
    fn profile_overrides_replace_build_settings() {
        let manifest: Manifest = toml::from_str(SAMPLE).expect("manifest should parse");
        assert_eq!(manifest.build_settings("release").optimization_level, 3);
        assert_eq!(manifest.build_settings("debug").optimization_level, 2);
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = TempDir::new().expect("tempdir");
        let missing = Manifest::load_from_dir(dir.path()).unwrap_err();
        assert_eq!(missing.code, ErrorCode::CFG001);

        fs::write(dir.path().join(settings::MANIFEST_FILE_NAME), "not toml [")
            .expect("write");
        let malformed = Manifest::load_from_dir(dir.path()).unwrap_err();
        assert_eq!(malformed.code, ErrorCode::CFG001);
    }

    #[test]
    fn empty_package_name_fails_validation() {
        let result: Result<Manifest, _> = toml::from_str(
            "[package]\nname = \"\"\nversion = \"1.0.0\"\n",
        );
        let manifest = result.expect("parse");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn lib_name_falls_back_to_the_package() {
        let manifest: Manifest = toml::from_str(SAMPLE).expect("parse");
        assert_eq!(manifest.lib_name(), "mylib");
    }
}
