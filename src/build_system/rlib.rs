//! The `.rlib` library format.
//!
//! A standard `ar`-style archive containing `metadata.json` plus one object
//! file per contributing module. The metadata lists exports (mangled symbol,
//! TML name, textual type), per-module content hashes, and dependencies with
//! their hashes. An archive without `metadata.json`, or whose metadata names
//! a missing module file, is malformed.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const METADATA_MEMBER: &str = "metadata.json";
const AR_MAGIC: &[u8] = b"!<arch>\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RlibExport {
    /// TML identifier, e.g. `add`
    pub name: String,
    /// Mangled symbol, e.g. `tml_add`
    pub symbol: String,
    /// Textual type, e.g. `func(I32, I32) -> I32`
    #[serde(rename = "type")]
    pub type_text: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RlibModule {
    pub name: String,
    /// Object member name inside the archive
    pub file: String,
    /// Content hash of the module's source
    pub hash: String,
    pub exports: Vec<RlibExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RlibDependency {
    pub name: String,
    pub version: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RlibLibraryInfo {
    pub name: String,
    pub version: String,
    pub tml_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RlibMetadata {
    pub format_version: String,
    pub library: RlibLibraryInfo,
    pub modules: Vec<RlibModule>,
    pub dependencies: Vec<RlibDependency>,
}

impl RlibMetadata {
    pub fn new(name: &str, version: &str) -> RlibMetadata {
        RlibMetadata {
            format_version: String::from("1"),
            library: RlibLibraryInfo {
                name: name.to_string(),
                version: version.to_string(),
                tml_version: settings::COMPILER_VERSION.to_string(),
            },
            modules: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn find_export(&self, name: &str) -> Option<&RlibExport> {
        self.modules
            .iter()
            .flat_map(|module| &module.exports)
            .find(|export| export.name == name)
    }

    pub fn all_exports(&self) -> Vec<&RlibExport> {
        self.modules
            .iter()
            .flat_map(|module| &module.exports)
            .filter(|export| export.is_public)
            .collect()
    }
}

struct ArchiveMember {
    name: String,
    data: Vec<u8>,
}

fn write_member(out: &mut Vec<u8>, member: &ArchiveMember) {
    // Classic ar header: name(16) mtime(12) uid(6) gid(6) mode(8) size(10) fmag(2)
    let mut header = Vec::with_capacity(60);
    header.extend_from_slice(format!("{:<16}", member.name).as_bytes());
    header.extend_from_slice(format!("{:<12}", 0).as_bytes());
    header.extend_from_slice(format!("{:<6}", 0).as_bytes());
    header.extend_from_slice(format!("{:<6}", 0).as_bytes());
    header.extend_from_slice(format!("{:<8}", "100644").as_bytes());
    header.extend_from_slice(format!("{:<10}", member.data.len()).as_bytes());
    header.extend_from_slice(b"`\n");
    out.extend_from_slice(&header);
    out.extend_from_slice(&member.data);
    if member.data.len() % 2 == 1 {
        out.push(b'\n');
    }
}

fn archive_error(message: impl Into<String>) -> CompileError {
    CompileError::new(message, ErrorLocation::default(), ErrorCode::F001)
}

/// Creates an rlib archive from metadata plus (member name, object path)
/// pairs. The member names must match `metadata.modules[].file`.
pub fn create_rlib(
    output: &Path,
    metadata: &RlibMetadata,
    objects: &[(String, &Path)],
) -> Result<(), CompileError> {
    // Every module in the metadata must have its object supplied
    for module in &metadata.modules {
        if !objects.iter().any(|(name, _)| *name == module.file) {
            return Err(archive_error(format!(
                "rlib metadata references missing module file '{}'",
                module.file
            )));
        }
    }

    let metadata_json = serde_json::to_vec_pretty(metadata)
        .map_err(|error| archive_error(format!("cannot serialize rlib metadata: {error}")))?;

    let mut out = Vec::new();
    out.extend_from_slice(AR_MAGIC);
    write_member(
        &mut out,
        &ArchiveMember {
            name: METADATA_MEMBER.to_string(),
            data: metadata_json,
        },
    );
    for (name, object_path) in objects {
        let data = fs::read(object_path).map_err(|error| {
            archive_error(format!(
                "cannot read object '{}': {error}",
                object_path.display()
            ))
        })?;
        write_member(
            &mut out,
            &ArchiveMember {
                name: name.clone(),
                data,
            },
        );
    }

    fs::write(output, out).map_err(|error| {
        archive_error(format!("cannot write rlib '{}': {error}", output.display()))
    })
}

fn parse_members(bytes: &[u8], path: &Path) -> Result<Vec<ArchiveMember>, CompileError> {
    if !bytes.starts_with(AR_MAGIC) {
        return Err(archive_error(format!(
            "'{}' is not an ar archive",
            path.display()
        )));
    }
    let mut members = Vec::new();
    let mut pos = AR_MAGIC.len();
    while pos + 60 <= bytes.len() {
        let header = &bytes[pos..pos + 60];
        if &header[58..60] != b"`\n" {
            return Err(archive_error(format!(
                "corrupt member header in '{}'",
                path.display()
            )));
        }
        let name = String::from_utf8_lossy(&header[0..16]).trim_end().to_string();
        let size: usize = String::from_utf8_lossy(&header[48..58])
            .trim_end()
            .parse()
            .map_err(|_| archive_error(format!("corrupt member size in '{}'", path.display())))?;
        pos += 60;
        if pos + size > bytes.len() {
            return Err(archive_error(format!(
                "truncated member '{name}' in '{}'",
                path.display()
            )));
        }
        members.push(ArchiveMember {
            name,
            data: bytes[pos..pos + size].to_vec(),
        });
        pos += size + (size % 2);
    }
    Ok(members)
}

/// Reads and validates the metadata of an rlib.
pub fn read_rlib_metadata(path: &Path) -> Result<RlibMetadata, CompileError> {
    let bytes = fs::read(path).map_err(|error| {
        archive_error(format!("cannot read rlib '{}': {error}", path.display()))
    })?;
    let members = parse_members(&bytes, path)?;

    let metadata_member = members
        .iter()
        .find(|member| member.name == METADATA_MEMBER)
        .ok_or_else(|| {
            archive_error(format!(
                "rlib '{}' does not list {METADATA_MEMBER} among its members",
                path.display()
            ))
        })?;

    let metadata: RlibMetadata = serde_json::from_slice(&metadata_member.data)
        .map_err(|error| archive_error(format!("malformed rlib metadata: {error}")))?;

    // Every referenced module object must be present
    for module in &metadata.modules {
        if !members.iter().any(|member| member.name == module.file) {
            return Err(archive_error(format!(
                "rlib '{}' metadata references absent module file '{}'",
                path.display(),
                module.file
            )));
        }
    }

    Ok(metadata)
}

/// Extracts all object members into `dest_dir`, returning their paths in
/// archive order for the linker.
pub fn extract_rlib_objects(
    path: &Path,
    dest_dir: &Path,
) -> Result<Vec<std::path::PathBuf>, CompileError> {
    let bytes = fs::read(path).map_err(|error| {
        archive_error(format!("cannot read rlib '{}': {error}", path.display()))
    })?;
    let members = parse_members(&bytes, path)?;
    fs::create_dir_all(dest_dir)
        .map_err(|error| archive_error(format!("cannot create '{}': {error}", dest_dir.display())))?;

    let mut extracted = Vec::new();
    for member in members {
        if member.name == METADATA_MEMBER {
            continue;
        }
        let out = dest_dir.join(&member.name);
        fs::write(&out, &member.data).map_err(|error| {
            archive_error(format!("cannot write '{}': {error}", out.display()))
        })?;
        extracted.push(out);
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_metadata() -> RlibMetadata {
        let mut metadata = RlibMetadata::new("mylib", "1.0.0");
        metadata.modules.push(RlibModule {
            name: "mylib".to_string(),
            file: "mylib.o".to_string(),
            hash: "cafebabe".to_string(),
            exports: vec![RlibExport {
                name: "add".to_string(),
                symbol: "tml_add".to_string(),
                type_text: "func(I32, I32) -> I32".to_string(),
                is_public: true,
            }],
        });
        metadata.dependencies.push(RlibDependency {
            name: "core_utils".to_string(),
            version: "1.4.2".to_string(),
            hash: "deadbeef".to_string(),
        });
        metadata
    }

    #[test]
    fn create_then_read_round_trips_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let object = dir.path().join("mylib.o");
        fs::write(&object, b"OBJECTBYTES").expect("object");
        let rlib = dir.path().join("mylib.rlib");

        let metadata = sample_metadata();
        create_rlib(&rlib, &metadata, &[("mylib.o".to_string(), object.as_path())])
            .expect("create");
        let restored = read_rlib_metadata(&rlib).expect("read");
        assert_eq!(restored, metadata);
        assert_eq!(restored.find_export("add").unwrap().symbol, "tml_add");
    }

    #[test]
    fn archive_lists_metadata_json_member() {
        let dir = TempDir::new().expect("tempdir");
        let object = dir.path().join("mylib.o");
        fs::write(&object, b"x").expect("object");
        let rlib = dir.path().join("mylib.rlib");
        create_rlib(
            &rlib,
            &sample_metadata(),
            &[("mylib.o".to_string(), object.as_path())],
        )
        .expect("create");

        let bytes = fs::read(&rlib).expect("read");
        assert!(bytes.starts_with(b"!<arch>\n"));
        assert!(
            String::from_utf8_lossy(&bytes).contains("metadata.json"),
            "metadata.json must be an archive member"
        );
    }

    #[test]
    fn missing_metadata_member_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let rlib = dir.path().join("bad.rlib");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"!<arch>\n");
        write_member(
            &mut bytes,
            &ArchiveMember {
                name: "orphan.o".to_string(),
                data: b"o".to_vec(),
            },
        );
        fs::write(&rlib, bytes).expect("write");

        let error = read_rlib_metadata(&rlib).unwrap_err();
        assert!(error.msg.contains("metadata.json"));
    }

    #[test]
    fn metadata_referencing_absent_module_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let rlib = dir.path().join("bad.rlib");
        let metadata = sample_metadata();
        let metadata_json = serde_json::to_vec(&metadata).expect("json");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"!<arch>\n");
        write_member(
            &mut bytes,
            &ArchiveMember {
                name: METADATA_MEMBER.to_string(),
                data: metadata_json,
            },
        );
        fs::write(&rlib, bytes).expect("write");

        let error = read_rlib_metadata(&rlib).unwrap_err();
        assert!(error.msg.contains("absent module file"));
    }

    #[test]
    fn extract_returns_objects_in_archive_order() {
        let dir = TempDir::new().expect("tempdir");
        let first = dir.path().join("a.o");
        let second = dir.path().join("b.o");
        fs::write(&first, b"AAA").expect("a");
        fs::write(&second, b"BBBB").expect("b");

        let mut metadata = RlibMetadata::new("multi", "0.1.0");
        for (name, file) in [("a", "a.o"), ("b", "b.o")] {
            metadata.modules.push(RlibModule {
                name: name.to_string(),
                file: file.to_string(),
                hash: String::new(),
                exports: vec![],
            });
        }
        let rlib = dir.path().join("multi.rlib");
        create_rlib(
            &rlib,
            &metadata,
            &[
                ("a.o".to_string(), first.as_path()),
                ("b.o".to_string(), second.as_path()),
            ],
        )
        .expect("create");

        let out_dir = dir.path().join("extracted");
        let extracted = extract_rlib_objects(&rlib, &out_dir).expect("extract");
        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(&extracted[0]).unwrap(), b"AAA");
        assert_eq!(fs::read(&extracted[1]).unwrap(), b"BBBB");
    }

    #[test]
    fn create_refuses_metadata_without_its_object() {
        let dir = TempDir::new().expect("tempdir");
        let rlib = dir.path().join("mylib.rlib");
        let error = create_rlib(&rlib, &sample_metadata(), &[]).unwrap_err();
        assert!(error.msg.contains("missing module file"));
    }
}
