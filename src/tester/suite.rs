//! Suite grouping and suite-executable compilation.
//!
//! Tests group by the directory that contains them (`compiler/tests/runtime`
//! becomes suite `compiler_tests_runtime`); files inside a suite sort
//! deterministically. Each suite compiles to ONE executable: per-file
//! objects plus a generated dispatcher main that understands
//! `--test-index=N` and `--run-all`. Suite executables cache under the
//! `exe_v2` key prefix.

use crate::build_system::build::{compile_to_ir, BuildOptions};
use crate::build_system::build_cache::BuildCache;
use crate::build_system::object::{ArtifactKind, Backend, LinkOptions};
use crate::compiler::diagnostics::{CompileError, CompilerMessages, ErrorCode, ErrorLocation};
use crate::compiler::parser::ast_nodes::Decl;
use crate::compiler::parser::build_ast::parse_module;
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokenizer::tokenize;
use crate::hashing;
use crate::settings;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    /// Relative file paths, sorted
    pub files: Vec<PathBuf>,
}

/// One `@test` function extracted from a suite's files.
#[derive(Debug, Clone)]
pub struct SuiteTest {
    /// Index across the whole suite; names `tml_test_<index>`
    pub index: usize,
    pub file: PathBuf,
    pub function_name: String,
    /// Mangled symbol of the user function inside its file's IR
    pub symbol: String,
    /// True when the test returns I32 (its exit code); Unit tests exit 0
    pub returns_exit_code: bool,
}

/// Groups discovered files by their containing directory.
pub fn group_suites(files: &[PathBuf]) -> Vec<TestSuite> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let suite_name = file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| {
                parent
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("_")
            })
            .unwrap_or_else(|| String::from("root"));
        groups.entry(suite_name).or_default().push(file.clone());
    }
    groups
        .into_iter()
        .map(|(name, mut files)| {
            files.sort();
            TestSuite { name, files }
        })
        .collect()
}

/// Parses a test file and returns its `@test` function names in source
/// order, with whether each returns I32.
pub fn extract_test_functions(
    root: &Path,
    file: &Path,
    messages: &mut CompilerMessages,
) -> Vec<(String, bool)> {
    let absolute = root.join(file);
    let source_code = match fs::read_to_string(&absolute) {
        Ok(source_code) => source_code,
        Err(error) => {
            messages.errors.push(CompileError::new(
                format!("Cannot read '{}': {error}", absolute.display()),
                ErrorLocation::default(),
                ErrorCode::F001,
            ));
            return Vec::new();
        }
    };
    let mut sources = SourceMap::new();
    let file_id = sources.add(absolute, source_code.clone());
    let lexed = tokenize(&source_code, file_id, &sources);
    messages.errors.extend(lexed.errors);
    let parsed = parse_module(&lexed.tokens, &sources);
    messages.errors.extend(parsed.errors);

    parsed
        .ast
        .decls
        .iter()
        .filter_map(|decl| match decl {
            Decl::Function(func)
                if func.annotations.iter().any(|annotation| annotation.name == "test") =>
            {
                let returns_exit_code = func
                    .return_type
                    .as_ref()
                    .map(|return_type| {
                        matches!(
                            return_type,
                            crate::compiler::parser::ast_nodes::TypeExpr::Named { name, .. }
                                if name == "I32"
                        )
                    })
                    .unwrap_or(false);
                Some((func.name.clone(), returns_exit_code))
            }
            _ => None,
        })
        .collect()
}

/// The dispatcher main: parses `--run-all` / `--test-index=N` from argv and
/// calls the matching `tml_test_<i>` wrapper. Exit codes: 98 when no
/// `--test-index` argument was supplied, 99 when the index is out of range,
/// otherwise the test's exit code. With `--run-all` every test runs in
/// order, one structured `TML_RESULT` line per test on stdout.
pub fn generate_dispatcher_ir(tests: &[SuiteTest], module_name: &str) -> String {
    let total = tests.len();
    let mut ir = String::new();

    let _ = writeln!(ir, "; ModuleID = '{module_name}_dispatcher'");
    let _ = writeln!(ir, "source_filename = \"{module_name}_dispatcher.ll\"");
    let _ = writeln!(
        ir,
        "target triple = \"{}\"",
        crate::compiler::codegen::default_target_triple()
    );
    ir.push('\n');

    // String constants
    ir.push_str(
        "@.str.prefix = private unnamed_addr constant [14 x i8] c\"--test-index=\\00\"\n",
    );
    ir.push_str("@.str.runall = private unnamed_addr constant [10 x i8] c\"--run-all\\00\"\n");
    ir.push_str(
        "@.str.result = private unnamed_addr constant [26 x i8] c\"TML_RESULT %d %s %lld %d\\0A\\00\"\n",
    );
    ir.push_str("@.str.pass = private unnamed_addr constant [5 x i8] c\"pass\\00\"\n");
    ir.push_str("@.str.fail = private unnamed_addr constant [5 x i8] c\"fail\\00\"\n");
    ir.push('\n');

    // Wrappers give every test the uniform tml_test_<i> shape
    for test in tests {
        if test.returns_exit_code {
            let _ = writeln!(ir, "declare i32 @{}()", test.symbol);
        } else {
            let _ = writeln!(ir, "declare void @{}()", test.symbol);
        }
    }
    ir.push('\n');
    for test in tests {
        let _ = writeln!(ir, "define i32 @tml_test_{}() {{", test.index);
        ir.push_str("entry:\n");
        if test.returns_exit_code {
            let _ = writeln!(ir, "  %code = call i32 @{}()", test.symbol);
            ir.push_str("  ret i32 %code\n");
        } else {
            let _ = writeln!(ir, "  call void @{}()", test.symbol);
            ir.push_str("  ret i32 0\n");
        }
        ir.push_str("}\n\n");
    }

    // C library declarations
    ir.push_str("declare i32 @strcmp(ptr, ptr) nounwind\n");
    ir.push_str("declare i32 @strncmp(ptr, ptr, i64) nounwind\n");
    ir.push_str("declare i32 @atoi(ptr) nounwind\n");
    ir.push_str("declare i32 @printf(ptr, ...) nounwind\n");
    ir.push_str("declare i64 @tml_rt_time_now_ns()\n");
    ir.push('\n');

    ir.push_str("define i32 @main(i32 %argc, ptr %argv) {\n");
    ir.push_str("entry:\n");
    ir.push_str("  %has_args = icmp sgt i32 %argc, 1\n");
    ir.push_str("  br i1 %has_args, label %scan_args, label %no_index\n\n");

    ir.push_str("scan_args:\n  br label %arg_loop\n\n");

    ir.push_str("arg_loop:\n");
    ir.push_str("  %i = phi i32 [ 1, %scan_args ], [ %i.next, %arg_continue ]\n");
    ir.push_str("  %done = icmp sge i32 %i, %argc\n");
    ir.push_str("  br i1 %done, label %no_index, label %check_arg\n\n");

    ir.push_str("check_arg:\n");
    ir.push_str("  %i.i64 = sext i32 %i to i64\n");
    ir.push_str("  %arg_ptr = getelementptr ptr, ptr %argv, i64 %i.i64\n");
    ir.push_str("  %arg = load ptr, ptr %arg_ptr\n");
    ir.push_str("  %runall_cmp = call i32 @strcmp(ptr %arg, ptr @.str.runall)\n");
    ir.push_str("  %is_runall = icmp eq i32 %runall_cmp, 0\n");
    ir.push_str("  br i1 %is_runall, label %run_all, label %check_index\n\n");

    ir.push_str("check_index:\n");
    // Compare the first 13 chars ("--test-index=")
    ir.push_str("  %cmp = call i32 @strncmp(ptr %arg, ptr @.str.prefix, i64 13)\n");
    ir.push_str("  %is_match = icmp eq i32 %cmp, 0\n");
    ir.push_str("  br i1 %is_match, label %found_index, label %arg_continue\n\n");

    ir.push_str("arg_continue:\n");
    ir.push_str("  %i.next = add i32 %i, 1\n");
    ir.push_str("  br label %arg_loop\n\n");

    ir.push_str("found_index:\n");
    ir.push_str("  %num_ptr = getelementptr i8, ptr %arg, i64 13\n");
    ir.push_str("  %test_index = call i32 @atoi(ptr %num_ptr)\n");
    let _ = write!(ir, "  switch i32 %test_index, label %invalid_index [");
    for index in 0..total {
        let _ = write!(ir, " i32 {index}, label %call_test_{index}");
    }
    ir.push_str(" ]\n\n");

    for index in 0..total {
        let _ = writeln!(ir, "call_test_{index}:");
        let _ = writeln!(ir, "  %result_{index} = call i32 @tml_test_{index}()");
        let _ = writeln!(ir, "  ret i32 %result_{index}");
        ir.push('\n');
    }

    // --run-all: every test in order with a structured status line each
    ir.push_str("run_all:\n");
    ir.push_str("  br label %runall_body\n\n");
    ir.push_str("runall_body:\n");
    let mut failed_accumulators: Vec<String> = vec![String::from("0")];
    for index in 0..total {
        let _ = writeln!(ir, "  %start_{index} = call i64 @tml_rt_time_now_ns()");
        let _ = writeln!(ir, "  %all_result_{index} = call i32 @tml_test_{index}()");
        let _ = writeln!(ir, "  %end_{index} = call i64 @tml_rt_time_now_ns()");
        let _ = writeln!(ir, "  %elapsed_ns_{index} = sub i64 %end_{index}, %start_{index}");
        let _ = writeln!(ir, "  %elapsed_us_{index} = sdiv i64 %elapsed_ns_{index}, 1000");
        let _ = writeln!(ir, "  %ok_{index} = icmp eq i32 %all_result_{index}, 0");
        let _ = writeln!(
            ir,
            "  %status_{index} = select i1 %ok_{index}, ptr @.str.pass, ptr @.str.fail"
        );
        let _ = writeln!(
            ir,
            "  call i32 (ptr, ...) @printf(ptr @.str.result, i32 {index}, ptr %status_{index}, i64 %elapsed_us_{index}, i32 0)"
        );
        let _ = writeln!(ir, "  %failbit_{index} = zext i1 %ok_{index} to i32");
        let _ = writeln!(ir, "  %failinc_{index} = sub i32 1, %failbit_{index}");
        let previous = failed_accumulators.last().expect("accumulator").clone();
        let _ = writeln!(
            ir,
            "  %failed_{index} = add i32 {previous}, %failinc_{index}"
        );
        failed_accumulators.push(format!("%failed_{index}"));
    }
    let final_count = failed_accumulators.last().expect("accumulator");
    let _ = writeln!(ir, "  %any_failed = icmp ne i32 {final_count}, 0");
    ir.push_str("  %exit_code = zext i1 %any_failed to i32\n");
    ir.push_str("  ret i32 %exit_code\n\n");

    ir.push_str("invalid_index:\n");
    let _ = writeln!(ir, "  ret i32 {}", settings::DISPATCH_EXIT_BAD_INDEX);
    ir.push('\n');
    ir.push_str("no_index:\n");
    let _ = writeln!(ir, "  ret i32 {}", settings::DISPATCH_EXIT_NO_INDEX);
    ir.push_str("}\n");

    ir
}

pub struct CompiledSuite {
    pub suite: TestSuite,
    pub exe_path: PathBuf,
    pub tests: Vec<SuiteTest>,
    pub from_cache: bool,
}

/// Compiles one suite to its executable: per-file objects + the dispatcher
/// object, linked as an EXE (never a dynamic library). The result caches by
/// content with the `exe_v2` prefix so older cache schemes never collide.
pub fn compile_suite(
    root: &Path,
    suite: &TestSuite,
    options: &BuildOptions,
    backend: &dyn Backend,
    messages: &mut CompilerMessages,
) -> Option<CompiledSuite> {
    let suite_dir = root.join(settings::dirs::TEST_CACHE).join(&suite.name);
    if let Err(error) = fs::create_dir_all(&suite_dir) {
        messages.errors.push(CompileError::new(
            format!("Cannot create '{}': {error}", suite_dir.display()),
            ErrorLocation::default(),
            ErrorCode::F001,
        ));
        return None;
    }

    // Enumerate tests across the suite first so indices are stable
    let mut tests: Vec<SuiteTest> = Vec::new();
    for (file_index, file) in suite.files.iter().enumerate() {
        for (function_name, returns_exit_code) in extract_test_functions(root, file, messages) {
            let symbol = format!("tml_s{file_index}_{function_name}");
            tests.push(SuiteTest {
                index: tests.len(),
                file: file.clone(),
                function_name,
                symbol,
                returns_exit_code,
            });
        }
    }
    if messages.has_errors() {
        return None;
    }

    // exe_v2 cache key: suite name + every file's bytes + options
    let mut key_bytes = Vec::new();
    key_bytes.extend_from_slice(b"exe_v2");
    key_bytes.extend_from_slice(suite.name.as_bytes());
    for file in &suite.files {
        key_bytes.extend(fs::read(root.join(file)).unwrap_or_default());
    }
    let cache = BuildCache::new(suite_dir.join(".cache"));
    let fingerprint = format!(
        "exe_v2_{}",
        hashing::build_fingerprint(
            &key_bytes,
            settings::COMPILER_VERSION,
            &options.cache_key(),
            &[],
        )
    );
    let exe_path = suite_dir.join(exe_name(&suite.name));

    if !options.no_cache {
        if let Some(cached) = cache.lookup(&fingerprint) {
            if fs::copy(&cached, &exe_path).is_ok() {
                make_executable(&exe_path);
                return Some(CompiledSuite {
                    suite: suite.clone(),
                    exe_path,
                    tests,
                    from_cache: true,
                });
            }
        }
    }

    // Per-file IR -> object, with a per-file suite prefix to keep symbols
    // distinct across files
    let mut objects: Vec<PathBuf> = Vec::new();
    for (file_index, file) in suite.files.iter().enumerate() {
        let prefix = format!("s{file_index}_");
        let absolute = root.join(file);
        let unit = compile_to_ir(&absolute, options, Some(&prefix), messages)?;
        let ir = unit.ir;
        let stem = format!("unit{file_index}");
        let ir_path = suite_dir.join(format!("{stem}.ll"));
        if fs::write(&ir_path, &ir).is_err() {
            return None;
        }
        let object_path = suite_dir.join(format!("{stem}.o"));
        if let Err(error) = backend.compile_ir(
            &ir_path,
            &object_path,
            options.opt_level,
            &options.target_triple,
        ) {
            messages.errors.push(error);
            return None;
        }
        objects.push(object_path);
    }

    // Dispatcher main
    let dispatcher_ir = generate_dispatcher_ir(&tests, &suite.name);
    let dispatcher_ll = suite_dir.join("dispatcher.ll");
    if fs::write(&dispatcher_ll, &dispatcher_ir).is_err() {
        return None;
    }
    let dispatcher_object = suite_dir.join("dispatcher.o");
    if let Err(error) = backend.compile_ir(
        &dispatcher_ll,
        &dispatcher_object,
        options.opt_level,
        &options.target_triple,
    ) {
        messages.errors.push(error);
        return None;
    }
    objects.push(dispatcher_object);

    let link_options = LinkOptions {
        lto: options.lto,
        profile_generate: options.profile_generate,
        extra_objects: Vec::new(),
    };
    if let Err(error) = backend.link(&objects, &exe_path, ArtifactKind::Executable, &link_options)
    {
        messages.errors.push(error);
        return None;
    }
    make_executable(&exe_path);

    if !options.no_cache {
        cache.store_file(&fingerprint, &exe_path);
    }

    Some(CompiledSuite {
        suite: suite.clone(),
        exe_path,
        tests,
        from_cache: false,
    })
}

fn exe_name(suite_name: &str) -> String {
    let extension = ArtifactKind::Executable.extension();
    if extension.is_empty() {
        suite_name.to_string()
    } else {
        format!("{suite_name}.{extension}")
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        let _ = fs::set_permissions(path, permissions);
    }
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_system::object::stub::RecordingBackend;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    #[test]
    fn suites_group_by_directory() {
        let files = vec![
            PathBuf::from("compiler/tests/runtime/alloc.test.tml"),
            PathBuf::from("compiler/tests/runtime/str.test.tml"),
            PathBuf::from("compiler/tests/parse.test.tml"),
            PathBuf::from("top.test.tml"),
        ];
        let suites = group_suites(&files);
        let names: Vec<&str> = suites.iter().map(|suite| suite.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["compiler_tests", "compiler_tests_runtime", "root"]
        );
        let runtime = suites
            .iter()
            .find(|suite| suite.name == "compiler_tests_runtime")
            .unwrap();
        assert_eq!(runtime.files.len(), 2);
        assert!(runtime.files.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn dispatcher_covers_every_index_and_the_error_exits() {
        let tests: Vec<SuiteTest> = (0..3)
            .map(|index| SuiteTest {
                index,
                file: PathBuf::from("x.test.tml"),
                function_name: format!("t{index}"),
                symbol: format!("tml_s0_t{index}"),
                returns_exit_code: false,
            })
            .collect();
        let ir = generate_dispatcher_ir(&tests, "suite_x");

        for index in 0..3 {
            assert!(ir.contains(&format!("define i32 @tml_test_{index}()")));
            assert!(ir.contains(&format!("i32 {index}, label %call_test_{index}")));
        }
        assert!(ir.contains("ret i32 99"));
        assert!(ir.contains("ret i32 98"));
        assert!(ir.contains("--test-index="));
        assert!(ir.contains("--run-all"));
        assert!(ir.contains("TML_RESULT %d %s %lld %d"));
    }

    #[test]
    fn dispatcher_wrappers_adapt_unit_and_exit_code_tests() {
        let tests = vec![
            SuiteTest {
                index: 0,
                file: PathBuf::from("a.test.tml"),
                function_name: "unit_style".to_string(),
                symbol: "tml_s0_unit_style".to_string(),
                returns_exit_code: false,
            },
            SuiteTest {
                index: 1,
                file: PathBuf::from("a.test.tml"),
                function_name: "exit_style".to_string(),
                symbol: "tml_s0_exit_style".to_string(),
                returns_exit_code: true,
            },
        ];
        let ir = generate_dispatcher_ir(&tests, "suite_y");
        assert!(ir.contains("call void @tml_s0_unit_style()"));
        assert!(ir.contains("call i32 @tml_s0_exit_style()"));
    }

    fn write_suite_file(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("dirs");
        fs::write(
            path,
            "@test\nfunc first_check() {\n    assert(1 + 1 == 2)\n}\n\n@test\nfunc second_check() -> I32 {\n    return 0\n}\n",
        )
        .expect("write");
    }

    #[test]
    fn compile_suite_links_one_exe_and_caches_it() {
        let dir = TempDir::new().expect("tempdir");
        write_suite_file(dir.path(), "pack/alpha.test.tml");
        write_suite_file(dir.path(), "pack/beta.test.tml");

        let suites = group_suites(&[
            PathBuf::from("pack/alpha.test.tml"),
            PathBuf::from("pack/beta.test.tml"),
        ]);
        assert_eq!(suites.len(), 1);

        let backend = RecordingBackend::default();
        let options = BuildOptions::default();
        let mut messages = CompilerMessages::new();
        let compiled = compile_suite(dir.path(), &suites[0], &options, &backend, &mut messages)
            .expect("compile");
        assert!(!messages.has_errors(), "{:?}", messages.errors);
        assert!(!compiled.from_cache);
        assert_eq!(compiled.tests.len(), 4);
        assert!(compiled.exe_path.is_file());
        // two unit objects + dispatcher
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.link_calls.load(Ordering::SeqCst), 1);

        // Unchanged inputs hit the exe_v2 cache
        let mut messages = CompilerMessages::new();
        let cached = compile_suite(dir.path(), &suites[0], &options, &backend, &mut messages)
            .expect("cached compile");
        assert!(cached.from_cache);
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_extraction_keeps_source_order() {
        let dir = TempDir::new().expect("tempdir");
        write_suite_file(dir.path(), "pack/only.test.tml");
        let mut messages = CompilerMessages::new();
        let extracted = extract_test_functions(
            dir.path(),
            Path::new("pack/only.test.tml"),
            &mut messages,
        );
        assert!(!messages.has_errors());
        assert_eq!(
            extracted,
            vec![
                ("first_check".to_string(), false),
                ("second_check".to_string(), true),
            ]
        );
    }
}
