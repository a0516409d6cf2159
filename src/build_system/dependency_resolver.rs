//! Package dependency resolution.
//!
//! Depth-first traversal from the root manifest. Path dependencies resolve
//! to local directories and are built on demand when their rlib is missing
//! or stale; version dependencies are spec-ready but resolve only from an
//! already-populated local cache (no registry client in the core); git
//! dependencies likewise resolve from a prior checkout. Cycles are detected
//! with an explicit resolution stack. The result lists dependencies in
//! topological order, leaves first.

use crate::build_system::manifest::{DependencySpec, Manifest};
use crate::build_system::rlib::{read_rlib_metadata, RlibMetadata};
use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::hashing;
use crate::log_debug;
use crate::settings;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
    pub rlib_path: PathBuf,
    /// Source directory for path dependencies
    pub source_path: PathBuf,
    pub is_path_dependency: bool,
    pub metadata: RlibMetadata,
    /// Names of direct dependencies
    pub dependencies: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ResolutionResult {
    /// Topological order, leaves first
    pub resolved: Vec<ResolvedDependency>,
    pub by_name: BTreeMap<String, usize>,
}

impl ResolutionResult {
    pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
        self.by_name.get(name).map(|index| &self.resolved[*index])
    }

    fn push(&mut self, dependency: ResolvedDependency) {
        if !self.by_name.contains_key(&dependency.name) {
            self.by_name
                .insert(dependency.name.clone(), self.resolved.len());
            self.resolved.push(dependency);
        }
    }
}

/// Builds a path dependency's rlib when missing/stale. Injected so the
/// resolver does not depend on the build driver directly.
pub type BuildOnDemand<'a> =
    &'a mut dyn FnMut(&Path, &Manifest) -> Result<PathBuf, CompileError>;

pub struct DependencyResolver {
    resolution_stack: Vec<String>,
    /// Local package cache for version/git dependencies
    pub cache_dir: PathBuf,
}

impl DependencyResolver {
    pub fn new(cache_dir: PathBuf) -> DependencyResolver {
        DependencyResolver {
            resolution_stack: Vec::new(),
            cache_dir,
        }
    }

    pub fn resolve(
        &mut self,
        manifest: &Manifest,
        project_root: &Path,
        build_on_demand: BuildOnDemand,
    ) -> Result<ResolutionResult, CompileError> {
        let mut result = ResolutionResult::default();
        for (name, spec) in &manifest.dependencies {
            self.resolve_single(name, spec, project_root, &mut result, &mut *build_on_demand)?;
        }
        Ok(result)
    }

    fn resolve_single(
        &mut self,
        name: &str,
        spec: &DependencySpec,
        project_root: &Path,
        result: &mut ResolutionResult,
        build_on_demand: BuildOnDemand,
    ) -> Result<(), CompileError> {
        if result.by_name.contains_key(name) {
            return Ok(());
        }
        if self.resolution_stack.iter().any(|entry| entry == name) {
            let cycle = self.resolution_stack.join(" -> ");
            return Err(CompileError::new(
                format!("Dependency cycle detected: {cycle} -> {name}"),
                ErrorLocation::default(),
                ErrorCode::R003,
            ));
        }
        self.resolution_stack.push(name.to_string());
        let outcome = self.resolve_inner(name, spec, project_root, result, build_on_demand);
        self.resolution_stack.pop();
        outcome
    }

    fn resolve_inner(
        &mut self,
        name: &str,
        spec: &DependencySpec,
        project_root: &Path,
        result: &mut ResolutionResult,
        build_on_demand: BuildOnDemand,
    ) -> Result<(), CompileError> {
        if let Some(relative) = spec.path() {
            let source_path = project_root.join(relative);
            let dep_manifest = Manifest::load_from_dir(&source_path)?;

            // Transitive dependencies first so the final order is leaves-first
            for (transitive_name, transitive_spec) in dep_manifest.dependencies.clone() {
                self.resolve_single(
                    &transitive_name,
                    &transitive_spec,
                    &source_path,
                    result,
                    &mut *build_on_demand,
                )?;
            }

            let rlib_path = source_path
                .join(settings::dirs::DEBUG)
                .join(format!("{}.rlib", dep_manifest.lib_name()));
            let rlib_path = if is_stale(&rlib_path, &source_path) {
                log_debug!("deps", "building stale path dependency '{name}'");
                build_on_demand(&source_path, &dep_manifest)?
            } else {
                rlib_path
            };

            let metadata = read_rlib_metadata(&rlib_path)?;
            result.push(ResolvedDependency {
                name: name.to_string(),
                version: dep_manifest.package.version.clone(),
                rlib_path,
                source_path,
                is_path_dependency: true,
                metadata,
                dependencies: dep_manifest.dependencies.keys().cloned().collect(),
            });
            return Ok(());
        }

        // Version and git dependencies resolve from the local package cache
        let rlib_path = self.cache_dir.join(format!("{name}.rlib"));
        if !rlib_path.is_file() {
            let kind = if spec.is_git_dependency() { "git" } else { "registry" };
            return Err(CompileError::new(
                format!(
                    "Dependency '{name}' ({kind}) is not in the local package cache at '{}'",
                    self.cache_dir.display()
                ),
                ErrorLocation::default(),
                ErrorCode::R001,
            )
            .with_note("fetch it first or vendor it as a path dependency".to_string()));
        }
        let metadata = read_rlib_metadata(&rlib_path)?;
        let version = metadata.library.version.clone();
        if let Some(requirement) = spec.version() {
            if !crate::build_system::lockfile::version_satisfies(&version, requirement) {
                return Err(CompileError::new(
                    format!(
                        "Dependency '{name}' {version} does not satisfy requirement '{requirement}'"
                    ),
                    ErrorLocation::default(),
                    ErrorCode::R003,
                ));
            }
        }
        let dependencies = metadata
            .dependencies
            .iter()
            .map(|dependency| dependency.name.clone())
            .collect();
        result.push(ResolvedDependency {
            name: name.to_string(),
            version,
            rlib_path,
            source_path: PathBuf::new(),
            is_path_dependency: false,
            metadata,
            dependencies,
        });
        Ok(())
    }
}

/// The rlib is stale when missing or older than any source file in the
/// dependency's src/ tree.
fn is_stale(rlib_path: &Path, source_root: &Path) -> bool {
    let Ok(rlib_metadata) = std::fs::metadata(rlib_path) else {
        return true;
    };
    let Ok(rlib_mtime) = rlib_metadata.modified() else {
        return true;
    };
    let src_dir = source_root.join("src");
    for entry in walkdir::WalkDir::new(src_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(Ok(modified)) = entry.metadata().map(|metadata| metadata.modified()) {
                if modified > rlib_mtime {
                    return true;
                }
            }
        }
    }
    false
}

/// Content hash for a dependency's rlib, recorded in the lockfile.
pub fn rlib_hash(path: &Path) -> Option<String> {
    hashing::sha512_file(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_system::rlib::{create_rlib, RlibModule};
    use std::fs;
    use tempfile::TempDir;

    fn write_dep(root: &Path, name: &str, deps: &str) {
        fs::create_dir_all(root.join("src")).expect("src dir");
        fs::write(
            root.join(settings::MANIFEST_FILE_NAME),
            format!(
                "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n\n[lib]\npath = \"src/lib.tml\"\n{deps}"
            ),
        )
        .expect("manifest");
        fs::write(root.join("src/lib.tml"), "pub func noop() {\n    return\n}\n")
            .expect("lib source");
    }

    fn fake_build(source_path: &Path, manifest: &Manifest) -> Result<PathBuf, CompileError> {
        let out_dir = source_path.join(settings::dirs::DEBUG);
        fs::create_dir_all(&out_dir).expect("out dir");
        let object = out_dir.join("lib.o");
        fs::write(&object, b"OBJ").expect("object");
        let mut metadata = RlibMetadata::new(&manifest.package.name, &manifest.package.version);
        metadata.modules.push(RlibModule {
            name: manifest.package.name.clone(),
            file: "lib.o".to_string(),
            hash: "h".to_string(),
            exports: vec![],
        });
        let rlib = out_dir.join(format!("{}.rlib", manifest.lib_name()));
        create_rlib(&rlib, &metadata, &[("lib.o".to_string(), object.as_path())])?;
        Ok(rlib)
    }

    #[test]
    fn path_dependencies_build_on_demand_in_topological_order() {
        let workspace = TempDir::new().expect("tempdir");
        let root = workspace.path();

        // app -> mid -> leaf
        write_dep(
            &root.join("leaf"),
            "leaf",
            "",
        );
        write_dep(
            &root.join("mid"),
            "mid",
            "\n[dependencies]\nleaf = { path = \"../leaf\" }\n",
        );
        let app_manifest: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nmid = { path = \"mid\" }\n",
        )
        .expect("app manifest");

        let mut resolver = DependencyResolver::new(root.join("pkg-cache"));
        let mut builder = |path: &Path, manifest: &Manifest| fake_build(path, manifest);
        let result = resolver
            .resolve(&app_manifest, root, &mut builder)
            .expect("resolve");

        let order: Vec<&str> = result
            .resolved
            .iter()
            .map(|dependency| dependency.name.as_str())
            .collect();
        assert_eq!(order, vec!["leaf", "mid"]);
        assert!(result.get("mid").unwrap().is_path_dependency);
        assert!(result.get("leaf").unwrap().rlib_path.is_file());
    }

    #[test]
    fn dependency_cycles_are_detected() {
        let workspace = TempDir::new().expect("tempdir");
        let root = workspace.path();
        write_dep(
            &root.join("a"),
            "a",
            "\n[dependencies]\nb = { path = \"../b\" }\n",
        );
        write_dep(
            &root.join("b"),
            "b",
            "\n[dependencies]\na = { path = \"../a\" }\n",
        );
        let manifest: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\na = { path = \"a\" }\n",
        )
        .expect("manifest");

        let mut resolver = DependencyResolver::new(root.join("pkg-cache"));
        let mut builder = |path: &Path, manifest: &Manifest| fake_build(path, manifest);
        let error = resolver
            .resolve(&manifest, root, &mut builder)
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::R003);
        assert!(error.msg.contains("cycle"));
    }

    #[test]
    fn missing_registry_dependency_is_an_r_error() {
        let workspace = TempDir::new().expect("tempdir");
        let manifest: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nghost = \"^1.0\"\n",
        )
        .expect("manifest");
        let mut resolver = DependencyResolver::new(workspace.path().join("pkg-cache"));
        let mut builder = |path: &Path, manifest: &Manifest| fake_build(path, manifest);
        let error = resolver
            .resolve(&manifest, workspace.path(), &mut builder)
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::R001);
    }

    #[test]
    fn fresh_rlib_is_not_rebuilt() {
        let workspace = TempDir::new().expect("tempdir");
        let root = workspace.path();
        write_dep(&root.join("leaf"), "leaf", "");
        let manifest: Manifest = toml::from_str(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nleaf = { path = \"leaf\" }\n",
        )
        .expect("manifest");

        let mut resolver = DependencyResolver::new(root.join("pkg-cache"));
        let build_count = std::cell::Cell::new(0);
        let mut builder = |path: &Path, dep_manifest: &Manifest| {
            build_count.set(build_count.get() + 1);
            fake_build(path, dep_manifest)
        };
        resolver
            .resolve(&manifest, root, &mut builder)
            .expect("first resolve");
        assert_eq!(build_count.get(), 1);

        // The rlib now exists and is newer than every source: no rebuild
        let mut resolver = DependencyResolver::new(root.join("pkg-cache"));
        resolver
            .resolve(&manifest, root, &mut builder)
            .expect("second resolve");
        assert_eq!(build_count.get(), 1);
    }
}
