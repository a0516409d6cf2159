//! The build driver: one invocation of
//! `source -> preprocess -> lex -> parse -> check -> IR -> object -> link`.
//!
//! The content-addressed cache short-circuits the backend whenever the
//! preprocessed source, options, compiler version and upstream fingerprints
//! all match a previous build.

use crate::build_system::build_cache::BuildCache;
use crate::build_system::object::{ArtifactKind, Backend, LinkOptions, OptLevel};
use crate::compiler::checker::check_module;
use crate::compiler::codegen::{CodegenOptions, LlvmGenerator};
use crate::compiler::diagnostics::{
    CompileError, CompilerMessages, ErrorCode, ErrorLocation,
};
use crate::compiler::modules::loader::ModuleLoader;
use crate::compiler::modules::ModuleRegistry;
use crate::compiler::parser::build_ast::parse_module;
use crate::compiler::preprocessor::{preprocess, BuildMode, PreprocessorSymbols};
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokenizer::tokenize;
use crate::settings;
use crate::{log_debug, log_info};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrateType {
    Bin,
    Lib,
    Dylib,
    Rlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningLevel {
    None,
    Default,
    Extra,
    All,
    Pedantic,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub emit_ir: bool,
    pub emit_header: bool,
    pub no_cache: bool,
    pub opt_level: OptLevel,
    /// 0-3, from `-g0`..`-g3`; `-g` means 2
    pub debug_level: u8,
    pub lto: bool,
    pub crate_type: CrateType,
    pub target_triple: String,
    pub sysroot: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub warning_level: WarningLevel,
    pub warnings_as_errors: bool,
    pub error_format_json: bool,
    pub check_leaks: bool,
    pub defines: Vec<(String, Option<String>)>,
    pub profile_generate: bool,
    pub profile_use: Option<PathBuf>,
    pub build_mode: BuildMode,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            emit_ir: false,
            emit_header: false,
            no_cache: false,
            opt_level: OptLevel::O0,
            debug_level: 0,
            lto: false,
            crate_type: CrateType::Bin,
            target_triple: crate::compiler::codegen::default_target_triple().to_string(),
            sysroot: None,
            out_dir: None,
            warning_level: WarningLevel::Default,
            warnings_as_errors: false,
            error_format_json: false,
            check_leaks: false,
            defines: Vec::new(),
            profile_generate: false,
            profile_use: None,
            build_mode: BuildMode::Debug,
        }
    }
}

impl BuildOptions {
    /// Parses the recognized build flags, leaving unknown arguments for the
    /// caller to reject.
    pub fn parse(args: &[String]) -> Result<(BuildOptions, Vec<String>), CompileError> {
        let mut options = BuildOptions::default();
        let mut rest = Vec::new();

        for arg in args {
            match arg.as_str() {
                "--emit-ir" => options.emit_ir = true,
                "--emit-header" => options.emit_header = true,
                "--no-cache" => options.no_cache = true,
                "--release" => {
                    options.opt_level = OptLevel::O3;
                    options.build_mode = BuildMode::Release;
                }
                "--lto" => options.lto = true,
                "-g" => options.debug_level = 2,
                "-g0" => options.debug_level = 0,
                "-g1" => options.debug_level = 1,
                "-g2" => options.debug_level = 2,
                "-g3" => options.debug_level = 3,
                "-Wnone" => options.warning_level = WarningLevel::None,
                "-Wextra" => options.warning_level = WarningLevel::Extra,
                "-Wall" => options.warning_level = WarningLevel::All,
                "-Wpedantic" => options.warning_level = WarningLevel::Pedantic,
                "-Werror" => options.warnings_as_errors = true,
                "--error-format=json" => options.error_format_json = true,
                "--check-leaks" => options.check_leaks = true,
                "--no-check-leaks" => options.check_leaks = false,
                "--profile-generate" => options.profile_generate = true,
                other => {
                    if let Some(level) = OptLevel::parse(other) {
                        options.opt_level = level;
                    } else if let Some(value) = other.strip_prefix("--crate-type=") {
                        options.crate_type = match value {
                            "bin" => CrateType::Bin,
                            "lib" => CrateType::Lib,
                            "dylib" => CrateType::Dylib,
                            "rlib" => CrateType::Rlib,
                            unknown => {
                                return Err(config_error(format!(
                                    "Unknown crate type '{unknown}'"
                                )));
                            }
                        };
                    } else if let Some(value) = other.strip_prefix("--target=") {
                        options.target_triple = value.to_string();
                    } else if let Some(value) = other.strip_prefix("--sysroot=") {
                        options.sysroot = Some(PathBuf::from(value));
                    } else if let Some(value) = other.strip_prefix("--out-dir=") {
                        options.out_dir = Some(PathBuf::from(value));
                    } else if let Some(value) = other.strip_prefix("--profile-use=") {
                        let path = PathBuf::from(value);
                        // A directory here is ambiguous across backends and
                        // rejected outright
                        if path.is_dir() {
                            return Err(config_error(format!(
                                "--profile-use expects a file, '{value}' is a directory"
                            )));
                        }
                        options.profile_use = Some(path);
                    } else if let Some(define) = other.strip_prefix("-D") {
                        match define.split_once('=') {
                            Some((symbol, value)) => options
                                .defines
                                .push((symbol.to_string(), Some(value.to_string()))),
                            None => options.defines.push((define.to_string(), None)),
                        }
                    } else {
                        rest.push(arg.clone());
                    }
                }
            }
        }

        Ok((options, rest))
    }

    /// Canonical option text folded into the build fingerprint.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|g{}|lto={}|type={:?}|triple={}|leaks={}|pgo={}|defines={}",
            self.opt_level.as_flag(),
            self.debug_level,
            self.lto,
            self.crate_type,
            self.target_triple,
            self.check_leaks,
            self.profile_generate,
            self.defines
                .iter()
                .map(|(symbol, value)| match value {
                    Some(value) => format!("{symbol}={value}"),
                    None => symbol.clone(),
                })
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

fn config_error(message: String) -> CompileError {
    CompileError::new(message, ErrorLocation::default(), ErrorCode::CFG001)
}

pub struct BuildOutcome {
    pub artifact: Option<PathBuf>,
    pub ir_text: Option<String>,
    /// True when the build cache satisfied the request without the backend
    pub from_cache: bool,
}

/// One compiled unit: the IR text, the bytes the cache key covers, and the
/// public exports (TML name, mangled symbol, signature) for rlib metadata
/// and C header emission.
pub struct CompiledUnit {
    pub ir: String,
    pub preprocessed: Vec<u8>,
    pub exports: Vec<(String, String, crate::compiler::types::FunctionSig)>,
}

/// Compiles one source file to IR text. Shared by the build driver and the
/// test orchestrator (which compiles many units with a suite prefix).
pub fn compile_to_ir(
    source_path: &Path,
    options: &BuildOptions,
    suite_prefix: Option<&str>,
    messages: &mut CompilerMessages,
) -> Option<CompiledUnit> {
    let source_code = match fs::read_to_string(source_path) {
        Ok(source_code) => source_code,
        Err(error) => {
            messages.errors.push(CompileError::new(
                format!("Cannot read '{}': {error}", source_path.display()),
                ErrorLocation::default(),
                ErrorCode::F001,
            ));
            return None;
        }
    };

    let mut sources = SourceMap::new();
    let file = sources.add(source_path.to_path_buf(), source_code.clone());

    let lexed = tokenize(&source_code, file, &sources);
    messages.errors.extend(lexed.errors);

    let mut symbols = PreprocessorSymbols::host(options.build_mode);
    for (symbol, value) in &options.defines {
        match value {
            Some(value) => symbols.define_value(symbol, value),
            None => symbols.define(symbol),
        }
    }
    let preprocessed = preprocess(lexed.tokens, &mut symbols, &sources);
    messages.errors.extend(preprocessed.errors);
    messages.warnings.extend(preprocessed.warnings);
    if messages.has_errors() {
        return None;
    }

    let parsed = parse_module(&preprocessed.tokens, &sources);
    messages.errors.extend(parsed.errors);
    if messages.has_errors() {
        return None;
    }

    let current_dir = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut loader = ModuleLoader::new(current_dir, options.build_mode);
    let mut registry = ModuleRegistry::new();
    let env = check_module(
        &parsed.ast,
        &mut loader,
        &mut registry,
        &mut sources,
        messages,
    );
    if messages.has_errors() {
        return None;
    }

    let module_name = source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("module"));
    let mut codegen_options = CodegenOptions::new(module_name);
    codegen_options.target_triple = options.target_triple.clone();
    codegen_options.debug_info = options.debug_level > 0;
    codegen_options.suite_prefix = suite_prefix.map(str::to_string);

    let mut generator = LlvmGenerator::new(&env, &registry, &sources, codegen_options);
    let ir = generator.emit_module(&parsed.ast);
    messages.errors.extend(generator.errors);
    if messages.has_errors() {
        return None;
    }

    let exports = parsed
        .ast
        .decls
        .iter()
        .filter_map(|decl| match decl {
            crate::compiler::parser::ast_nodes::Decl::Function(func)
                if func.visibility == crate::compiler::parser::ast_nodes::Visibility::Public =>
            {
                let sig = env.functions.get(&func.name)?.clone();
                let symbol = crate::compiler::codegen::mangle::mangle_function(
                    &func.name,
                    &[],
                    suite_prefix,
                );
                Some((func.name.clone(), symbol, sig))
            }
            _ => None,
        })
        .collect();

    // The cache key covers the preprocessed source bytes
    Some(CompiledUnit {
        ir,
        preprocessed: source_code.into_bytes(),
        exports,
    })
}

/// C header for the unit's public exports, for FFI consumers.
pub fn generate_c_header(module_name: &str, exports: &[(String, String, crate::compiler::types::FunctionSig)]) -> String {
    use crate::compiler::types::{Primitive, Type, TypeRef};

    fn c_type(value_type: &TypeRef) -> &'static str {
        match value_type.as_ref() {
            Type::Primitive(primitive) => match primitive {
                Primitive::I8 => "int8_t",
                Primitive::I16 => "int16_t",
                Primitive::I32 => "int32_t",
                Primitive::I64 | Primitive::Isize => "int64_t",
                Primitive::U8 => "uint8_t",
                Primitive::U16 => "uint16_t",
                Primitive::U32 => "uint32_t",
                Primitive::U64 | Primitive::Usize => "uint64_t",
                Primitive::F32 => "float",
                Primitive::F64 => "double",
                Primitive::Bool => "bool",
                Primitive::Char => "uint32_t",
                Primitive::Str => "const char*",
                Primitive::I128 | Primitive::U128 => "void*",
                Primitive::Unit | Primitive::Never => "void",
            },
            _ => "void*",
        }
    }

    let guard = format!("TML_{}_H", module_name.to_uppercase().replace('-', "_"));
    let mut out = String::new();
    out.push_str(&format!("#ifndef {guard}\n#define {guard}\n\n"));
    out.push_str("#include <stdbool.h>\n#include <stdint.h>\n\n");
    out.push_str("#ifdef __cplusplus\nextern \"C\" {\n#endif\n\n");
    for (name, symbol, sig) in exports {
        let params = if sig.params.is_empty() {
            String::from("void")
        } else {
            sig.params
                .iter()
                .map(|(param_name, param_type)| format!("{} {param_name}", c_type(param_type)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push_str(&format!("/* {name} */\n"));
        out.push_str(&format!(
            "{} {symbol}({params});\n\n",
            c_type(&sig.return_type)
        ));
    }
    out.push_str("#ifdef __cplusplus\n}\n#endif\n\n");
    out.push_str(&format!("#endif /* {guard} */\n"));
    out
}

pub struct BuildDriver<'a> {
    pub backend: &'a dyn Backend,
    pub project_root: PathBuf,
}

impl<'a> BuildDriver<'a> {
    pub fn new(backend: &'a dyn Backend, project_root: PathBuf) -> BuildDriver<'a> {
        BuildDriver {
            backend,
            project_root,
        }
    }

    fn out_dir(&self, options: &BuildOptions) -> PathBuf {
        options
            .out_dir
            .clone()
            .unwrap_or_else(|| match options.build_mode {
                BuildMode::Release => self.project_root.join(settings::dirs::RELEASE),
                _ => self.project_root.join(settings::dirs::DEBUG),
            })
    }

    /// Full single-file build. On success the artifact lands under the
    /// output directory named by its fingerprint.
    pub fn build_file(
        &self,
        source_path: &Path,
        options: &BuildOptions,
        messages: &mut CompilerMessages,
    ) -> Option<BuildOutcome> {
        let unit = compile_to_ir(source_path, options, None, messages)?;
        let CompiledUnit {
            ir,
            preprocessed,
            exports,
        } = unit;

        if options.warnings_as_errors && !messages.warnings.is_empty() {
            for warning in messages.warnings.drain(..) {
                messages.errors.push(CompileError::new(
                    format!("{} (warning promoted by -Werror)", warning.msg),
                    warning.location,
                    ErrorCode::CFG001,
                ));
            }
            return None;
        }

        if options.emit_ir {
            return Some(BuildOutcome {
                artifact: None,
                ir_text: Some(ir),
                from_cache: false,
            });
        }

        let out_dir = self.out_dir(options);
        if let Err(error) = fs::create_dir_all(&out_dir) {
            messages.errors.push(CompileError::new(
                format!("Cannot create '{}': {error}", out_dir.display()),
                ErrorLocation::default(),
                ErrorCode::F001,
            ));
            return None;
        }

        let cache = BuildCache::new(out_dir.join(".cache"));
        let fingerprint = cache.fingerprint(&preprocessed, &options.cache_key(), &[]);
        let stem = source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("out"));

        if options.emit_header {
            let header_path = out_dir.join(format!("{stem}.h"));
            if let Err(error) = fs::write(&header_path, generate_c_header(&stem, &exports)) {
                messages.errors.push(CompileError::new(
                    format!("Cannot write header '{}': {error}", header_path.display()),
                    ErrorLocation::default(),
                    ErrorCode::F001,
                ));
            }
        }

        if !options.no_cache {
            if let Some(cached) = cache.lookup(&fingerprint) {
                log_info!("build", "cache hit for {}", source_path.display());
                let artifact = out_dir.join(artifact_name(&stem, options));
                if fs::copy(&cached, &artifact).is_ok() {
                    return Some(BuildOutcome {
                        artifact: Some(artifact),
                        ir_text: None,
                        from_cache: true,
                    });
                }
            }
        }

        // IR text -> object -> artifact via the external backend
        let ir_path = out_dir.join(format!("{stem}.ll"));
        if let Err(error) = fs::write(&ir_path, &ir) {
            messages.errors.push(CompileError::new(
                format!("Cannot write IR '{}': {error}", ir_path.display()),
                ErrorLocation::default(),
                ErrorCode::F001,
            ));
            return None;
        }

        let object_path = out_dir.join(format!("{stem}.o"));
        if let Err(error) = self.backend.compile_ir(
            &ir_path,
            &object_path,
            options.opt_level,
            &options.target_triple,
        ) {
            messages.errors.push(error);
            return None;
        }

        let artifact = out_dir.join(artifact_name(&stem, options));
        let kind = match options.crate_type {
            CrateType::Bin => ArtifactKind::Executable,
            CrateType::Lib => ArtifactKind::StaticLib,
            CrateType::Dylib => ArtifactKind::DynamicLib,
            CrateType::Rlib => ArtifactKind::RlibLib,
        };

        if kind == ArtifactKind::RlibLib {
            // rlib artifacts go through the archive writer
            let mut metadata =
                crate::build_system::rlib::RlibMetadata::new(&stem, "0.0.0");
            metadata.modules.push(crate::build_system::rlib::RlibModule {
                name: stem.clone(),
                file: format!("{stem}.o"),
                hash: crate::hashing::sha512_hex(&preprocessed),
                exports: exports
                    .iter()
                    .map(|(name, symbol, sig)| crate::build_system::rlib::RlibExport {
                        name: name.clone(),
                        symbol: symbol.clone(),
                        type_text: sig.signature_text(),
                        is_public: true,
                    })
                    .collect(),
            });
            if let Err(error) = crate::build_system::rlib::create_rlib(
                &artifact,
                &metadata,
                &[(format!("{stem}.o"), object_path.as_path())],
            ) {
                messages.errors.push(error);
                return None;
            }
        } else {
            let link_options = LinkOptions {
                lto: options.lto,
                profile_generate: options.profile_generate,
                extra_objects: Vec::new(),
            };
            if let Err(error) = self.backend.link(
                std::slice::from_ref(&object_path),
                &artifact,
                kind,
                &link_options,
            ) {
                messages.errors.push(error);
                return None;
            }
        }

        if !options.no_cache {
            cache.store_file(&fingerprint, &artifact);
        }
        log_debug!("build", "built {}", artifact.display());

        Some(BuildOutcome {
            artifact: Some(artifact),
            ir_text: None,
            from_cache: false,
        })
    }
}

fn artifact_name(stem: &str, options: &BuildOptions) -> String {
    let extension = match options.crate_type {
        CrateType::Bin => ArtifactKind::Executable.extension(),
        CrateType::Lib => ArtifactKind::StaticLib.extension(),
        CrateType::Dylib => ArtifactKind::DynamicLib.extension(),
        CrateType::Rlib => ArtifactKind::RlibLib.extension(),
    };
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_system::object::stub::RecordingBackend;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn write_app(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("app.tml");
        fs::write(&path, "func main() -> I32 {\n    return 0\n}\n").expect("source");
        path
    }

    #[test]
    fn build_produces_an_artifact_and_caches_it() {
        let dir = TempDir::new().expect("tempdir");
        let source = write_app(&dir);
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());
        let (options, _) = BuildOptions::parse(&["-O1".to_string()]).expect("options");

        let mut messages = CompilerMessages::new();
        let outcome = driver
            .build_file(&source, &options, &mut messages)
            .expect("build");
        assert!(!messages.has_errors(), "{:?}", messages.errors);
        assert!(!outcome.from_cache);
        let artifact = outcome.artifact.expect("artifact path");
        assert!(artifact.is_file());
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);

        // Identical re-run: zero backend invocations, identical bytes
        let first_bytes = fs::read(&artifact).unwrap();
        let mut messages = CompilerMessages::new();
        let second = driver
            .build_file(&source, &options, &mut messages)
            .expect("rebuild");
        assert!(second.from_cache);
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.link_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(second.artifact.unwrap()).unwrap(), first_bytes);
    }

    #[test]
    fn changed_options_miss_the_cache() {
        let dir = TempDir::new().expect("tempdir");
        let source = write_app(&dir);
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());

        let (o1, _) = BuildOptions::parse(&["-O1".to_string()]).expect("options");
        let (o2, _) = BuildOptions::parse(&["-O2".to_string()]).expect("options");
        let mut messages = CompilerMessages::new();
        driver.build_file(&source, &o1, &mut messages).expect("o1");
        driver.build_file(&source, &o2, &mut messages).expect("o2");
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_ir_stops_before_the_backend() {
        let dir = TempDir::new().expect("tempdir");
        let source = write_app(&dir);
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());
        let (options, _) = BuildOptions::parse(&["--emit-ir".to_string()]).expect("options");

        let mut messages = CompilerMessages::new();
        let outcome = driver
            .build_file(&source, &options, &mut messages)
            .expect("emit");
        let ir = outcome.ir_text.expect("ir text");
        assert!(ir.contains("define i32 @tml_main()"));
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn compilation_errors_produce_no_artifact() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("bad.tml");
        fs::write(&source, "func main( {\n").expect("source");
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());

        let mut messages = CompilerMessages::new();
        let outcome = driver.build_file(&source, &BuildOptions::default(), &mut messages);
        assert!(outcome.is_none());
        assert!(messages.has_errors());
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn option_parsing_covers_the_surface() {
        let (options, rest) = BuildOptions::parse(&[
            "--release".to_string(),
            "-g2".to_string(),
            "--lto".to_string(),
            "--crate-type=rlib".to_string(),
            "--target=aarch64-unknown-linux-gnu".to_string(),
            "-DFEATURE_X=1".to_string(),
            "-DDEBUG_MODE".to_string(),
            "-Werror".to_string(),
            "--error-format=json".to_string(),
            "app.tml".to_string(),
        ])
        .expect("parse");
        assert_eq!(options.opt_level, OptLevel::O3);
        assert_eq!(options.debug_level, 2);
        assert!(options.lto);
        assert_eq!(options.crate_type, CrateType::Rlib);
        assert_eq!(options.target_triple, "aarch64-unknown-linux-gnu");
        assert_eq!(options.defines.len(), 2);
        assert!(options.warnings_as_errors);
        assert!(options.error_format_json);
        assert_eq!(rest, vec!["app.tml".to_string()]);
    }

    #[test]
    fn emit_header_writes_c_prototypes_for_public_functions() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("mathlib.tml");
        fs::write(
            &source,
            "pub func square(x: I32) -> I32 {\n    return x * x\n}\nfunc internal_only() {\n    return\n}\n",
        )
        .expect("source");
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());
        let (options, _) =
            BuildOptions::parse(&["--emit-header".to_string()]).expect("options");

        let mut messages = CompilerMessages::new();
        driver
            .build_file(&source, &options, &mut messages)
            .expect("build");
        let header = fs::read_to_string(
            dir.path().join(settings::dirs::DEBUG).join("mathlib.h"),
        )
        .expect("header written");
        assert!(header.contains("int32_t tml_square(int32_t x);"));
        assert!(!header.contains("internal_only"));
        assert!(header.contains("extern \"C\""));
    }

    #[test]
    fn rlib_builds_carry_their_exports() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("mathlib.tml");
        fs::write(
            &source,
            "pub func square(x: I32) -> I32 {\n    return x * x\n}\n",
        )
        .expect("source");
        let backend = RecordingBackend::default();
        let driver = BuildDriver::new(&backend, dir.path().to_path_buf());
        let (options, _) =
            BuildOptions::parse(&["--crate-type=rlib".to_string()]).expect("options");

        let mut messages = CompilerMessages::new();
        let outcome = driver
            .build_file(&source, &options, &mut messages)
            .expect("build");
        let metadata =
            crate::build_system::rlib::read_rlib_metadata(&outcome.artifact.unwrap())
                .expect("metadata");
        let export = metadata.find_export("square").expect("square exported");
        assert_eq!(export.symbol, "tml_square");
        assert_eq!(export.type_text, "func(I32) -> I32");
    }

    #[test]
    fn profile_use_rejects_directories() {
        let dir = TempDir::new().expect("tempdir");
        let flag = format!("--profile-use={}", dir.path().display());
        let error = BuildOptions::parse(&[flag]).unwrap_err();
        assert_eq!(error.code, ErrorCode::CFG001);
        assert!(error.msg.contains("directory"));
    }
}
