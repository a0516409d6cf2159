//! External native backend and linker drivers.
//!
//! IR text goes to object code and artifacts through opaque subprocesses
//! (`llc`, `clang`/`cc`, `ar`). The [`Backend`] trait is the seam: the build
//! driver and test orchestrator talk to it, and tests substitute a recording
//! stub to observe invocations without a toolchain installed.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use crate::log_debug;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Executable,
    StaticLib,
    DynamicLib,
    RlibLib,
}

impl ArtifactKind {
    /// Host-appropriate extension for the artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Executable => {
                if cfg!(target_os = "windows") {
                    "exe"
                } else {
                    ""
                }
            }
            ArtifactKind::StaticLib => {
                if cfg!(target_os = "windows") {
                    "lib"
                } else {
                    "a"
                }
            }
            ArtifactKind::DynamicLib => {
                if cfg!(target_os = "windows") {
                    "dll"
                } else if cfg!(target_os = "macos") {
                    "dylib"
                } else {
                    "so"
                }
            }
            ArtifactKind::RlibLib => "rlib",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
    Os,
    Oz,
}

impl OptLevel {
    pub fn parse(flag: &str) -> Option<OptLevel> {
        match flag {
            "-O0" => Some(OptLevel::O0),
            "-O1" => Some(OptLevel::O1),
            "-O2" => Some(OptLevel::O2),
            "-O3" => Some(OptLevel::O3),
            "-Os" => Some(OptLevel::Os),
            "-Oz" => Some(OptLevel::Oz),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> &'static str {
        match self {
            OptLevel::O0 => "-O0",
            OptLevel::O1 => "-O1",
            OptLevel::O2 => "-O2",
            OptLevel::O3 => "-O3",
            OptLevel::Os => "-Os",
            OptLevel::Oz => "-Oz",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub lto: bool,
    pub profile_generate: bool,
    /// Extra objects from dependency rlibs
    pub extra_objects: Vec<PathBuf>,
}

/// The seam to the external toolchain.
pub trait Backend: Send + Sync {
    /// IR text file -> native object file.
    fn compile_ir(
        &self,
        ir_path: &Path,
        object_path: &Path,
        opt: OptLevel,
        target_triple: &str,
    ) -> Result<(), CompileError>;

    /// Objects -> executable/static/dynamic artifact.
    fn link(
        &self,
        objects: &[PathBuf],
        output: &Path,
        kind: ArtifactKind,
        options: &LinkOptions,
    ) -> Result<(), CompileError>;
}

/// The real toolchain: `llc` for objects, `cc` for linking, `ar` for static
/// archives.
pub struct LlvmToolchain {
    pub llc: String,
    pub linker: String,
    pub archiver: String,
}

impl Default for LlvmToolchain {
    fn default() -> Self {
        LlvmToolchain {
            llc: String::from("llc"),
            linker: String::from("cc"),
            archiver: String::from("ar"),
        }
    }
}

fn tool_error(tool: &str, error: &std::io::Error) -> CompileError {
    CompileError::new(
        format!("External tool '{tool}' could not be started: {error}"),
        ErrorLocation::default(),
        ErrorCode::F001,
    )
    .with_note("is the toolchain installed and on PATH?".to_string())
}

fn exit_error(tool: &str, stderr: &[u8]) -> CompileError {
    CompileError::new(
        format!("'{tool}' failed: {}", String::from_utf8_lossy(stderr).trim()),
        ErrorLocation::default(),
        ErrorCode::C001,
    )
}

impl Backend for LlvmToolchain {
    fn compile_ir(
        &self,
        ir_path: &Path,
        object_path: &Path,
        opt: OptLevel,
        target_triple: &str,
    ) -> Result<(), CompileError> {
        log_debug!("build", "llc {} -> {}", ir_path.display(), object_path.display());
        let output = Command::new(&self.llc)
            .arg("-filetype=obj")
            .arg(opt.as_flag().replace("-O", "-O=").replace("-O=s", "-O=2"))
            .arg(format!("-mtriple={target_triple}"))
            .arg("-o")
            .arg(object_path)
            .arg(ir_path)
            .output()
            .map_err(|error| tool_error(&self.llc, &error))?;
        if !output.status.success() {
            return Err(exit_error(&self.llc, &output.stderr));
        }
        Ok(())
    }

    fn link(
        &self,
        objects: &[PathBuf],
        output_path: &Path,
        kind: ArtifactKind,
        options: &LinkOptions,
    ) -> Result<(), CompileError> {
        match kind {
            ArtifactKind::StaticLib => {
                let output = Command::new(&self.archiver)
                    .arg("rcs")
                    .arg(output_path)
                    .args(objects)
                    .args(&options.extra_objects)
                    .output()
                    .map_err(|error| tool_error(&self.archiver, &error))?;
                if !output.status.success() {
                    return Err(exit_error(&self.archiver, &output.stderr));
                }
                Ok(())
            }
            ArtifactKind::RlibLib => Err(CompileError::new(
                "rlib artifacts are written by the archive writer, not the linker",
                ErrorLocation::default(),
                ErrorCode::C001,
            )),
            _ => {
                let mut command = Command::new(&self.linker);
                command.args(objects).args(&options.extra_objects);
                if kind == ArtifactKind::DynamicLib {
                    command.arg("-shared");
                }
                if options.lto {
                    command.arg("-flto");
                }
                if options.profile_generate {
                    command.arg("-fprofile-instr-generate");
                    command.arg("-fcoverage-mapping");
                }
                command.arg("-o").arg(output_path);
                let output = command
                    .output()
                    .map_err(|error| tool_error(&self.linker, &error))?;
                if !output.status.success() {
                    return Err(exit_error(&self.linker, &output.stderr));
                }
                Ok(())
            }
        }
    }
}

/// Test double that records calls and writes deterministic placeholder
/// bytes, so cache behavior is observable without a toolchain.
#[cfg(test)]
pub mod stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct RecordingBackend {
        pub compile_calls: Arc<AtomicUsize>,
        pub link_calls: Arc<AtomicUsize>,
    }

    impl Backend for RecordingBackend {
        fn compile_ir(
            &self,
            ir_path: &Path,
            object_path: &Path,
            _opt: OptLevel,
            _target_triple: &str,
        ) -> Result<(), CompileError> {
            self.compile_calls.fetch_add(1, Ordering::SeqCst);
            let ir = std::fs::read(ir_path).unwrap_or_default();
            std::fs::write(object_path, ir).map_err(|error| {
                CompileError::new(
                    format!("stub write failed: {error}"),
                    ErrorLocation::default(),
                    ErrorCode::F001,
                )
            })
        }

        fn link(
            &self,
            objects: &[PathBuf],
            output: &Path,
            _kind: ArtifactKind,
            _options: &LinkOptions,
        ) -> Result<(), CompileError> {
            self.link_calls.fetch_add(1, Ordering::SeqCst);
            let mut bytes = Vec::new();
            for object in objects {
                bytes.extend(std::fs::read(object).unwrap_or_default());
            }
            std::fs::write(output, bytes).map_err(|error| {
                CompileError::new(
                    format!("stub link failed: {error}"),
                    ErrorLocation::default(),
                    ErrorCode::F001,
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_extensions_match_the_host() {
        #[cfg(target_os = "linux")]
        {
            assert_eq!(ArtifactKind::Executable.extension(), "");
            assert_eq!(ArtifactKind::StaticLib.extension(), "a");
            assert_eq!(ArtifactKind::DynamicLib.extension(), "so");
        }
        assert_eq!(ArtifactKind::RlibLib.extension(), "rlib");
    }

    #[test]
    fn opt_levels_parse_from_flags() {
        assert_eq!(OptLevel::parse("-O0"), Some(OptLevel::O0));
        assert_eq!(OptLevel::parse("-O3"), Some(OptLevel::O3));
        assert_eq!(OptLevel::parse("-Oz"), Some(OptLevel::Oz));
        assert_eq!(OptLevel::parse("-O9"), None);
    }

    #[test]
    fn missing_tool_yields_a_diagnostic_not_a_panic() {
        let toolchain = LlvmToolchain {
            llc: String::from("definitely-not-a-real-tool-7f3a"),
            linker: String::from("cc"),
            archiver: String::from("ar"),
        };
        let error = toolchain
            .compile_ir(
                Path::new("missing.ll"),
                Path::new("out.o"),
                OptLevel::O0,
                "x86_64-unknown-linux-gnu",
            )
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::F001);
        assert!(error.msg.contains("could not be started"));
    }
}
