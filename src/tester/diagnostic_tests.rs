//! Negative (diagnostic) tests.
//!
//! Files matching `*.error.tml` carry `@expect-error CODE` directives. The
//! checker runs in a collecting mode that never fails the harness; the
//! outcome is:
//! - every expected code emitted -> PASS
//! - compilation succeeds -> FAIL
//! - a different code emitted -> FAIL
//! - an expected code missing -> FAIL

use crate::compiler::checker::check_module;
use crate::compiler::diagnostics::CompilerMessages;
use crate::compiler::modules::loader::ModuleLoader;
use crate::compiler::modules::ModuleRegistry;
use crate::compiler::parser::build_ast::parse_module;
use crate::compiler::preprocessor::{preprocess, BuildMode, PreprocessorSymbols};
use crate::compiler::source::SourceMap;
use crate::compiler::tokenizer::tokenizer::tokenize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticOutcome {
    Pass,
    Fail { reason: String },
}

/// Collects `@expect-error CODE` directives from the raw source text. Both
/// annotation placement (`@expect-error T001` above a decl) and comment
/// placement (`// @expect-error T001`) count.
pub fn expected_codes(source: &str) -> Vec<String> {
    let mut codes = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim().trim_start_matches("//").trim();
        if let Some(rest) = trimmed.strip_prefix("@expect-error") {
            let code = rest.trim();
            if !code.is_empty() {
                codes.push(code.to_string());
            }
        }
    }
    codes
}

/// Runs the full frontend over one diagnostic test file, collecting every
/// diagnostic instead of stopping.
pub fn collect_diagnostics(root: &Path, file: &Path) -> Result<Vec<String>, String> {
    let absolute = root.join(file);
    let source_code =
        fs::read_to_string(&absolute).map_err(|error| format!("cannot read file: {error}"))?;

    let mut sources = SourceMap::new();
    let file_id = sources.add(absolute.clone(), source_code.clone());
    let mut messages = CompilerMessages::new();

    let lexed = tokenize(&source_code, file_id, &sources);
    messages.errors.extend(lexed.errors);

    let mut symbols = PreprocessorSymbols::host(BuildMode::Test);
    let preprocessed = preprocess(lexed.tokens, &mut symbols, &sources);
    messages.errors.extend(preprocessed.errors);

    let parsed = parse_module(&preprocessed.tokens, &sources);
    messages.errors.extend(parsed.errors);

    let current_dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut loader = ModuleLoader::new(current_dir, BuildMode::Test);
    let mut registry = ModuleRegistry::new();
    check_module(
        &parsed.ast,
        &mut loader,
        &mut registry,
        &mut sources,
        &mut messages,
    );

    Ok(messages
        .errors
        .iter()
        .map(|error| error.code.as_str().to_string())
        .collect())
}

/// Verdict for one `*.error.tml` file.
pub fn run_diagnostic_test(root: &Path, file: &Path) -> DiagnosticOutcome {
    let absolute = root.join(file);
    let source = match fs::read_to_string(&absolute) {
        Ok(source) => source,
        Err(error) => {
            return DiagnosticOutcome::Fail {
                reason: format!("cannot read '{}': {error}", absolute.display()),
            };
        }
    };

    let expected = expected_codes(&source);
    if expected.is_empty() {
        return DiagnosticOutcome::Fail {
            reason: String::from("no @expect-error directive in error test"),
        };
    }

    let emitted = match collect_diagnostics(root, file) {
        Ok(emitted) => emitted,
        Err(reason) => return DiagnosticOutcome::Fail { reason },
    };

    if emitted.is_empty() {
        return DiagnosticOutcome::Fail {
            reason: format!(
                "expected error {} not emitted (compilation succeeded)",
                expected.join(", ")
            ),
        };
    }

    for code in &expected {
        if !emitted.iter().any(|emitted_code| emitted_code == code) {
            return DiagnosticOutcome::Fail {
                reason: format!("expected error {code} not emitted"),
            };
        }
    }

    DiagnosticOutcome::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, source: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("dirs");
        fs::write(path, source).expect("write");
    }

    #[test]
    fn expected_codes_parse_from_both_placements() {
        let source =
            "// @expect-error T001\n@expect-error R002\nfunc f() {\n    return\n}\n";
        assert_eq!(expected_codes(source), vec!["T001", "R002"]);
    }

    #[test]
    fn type_mismatch_with_matching_directive_passes() {
        let dir = TempDir::new().expect("tempdir");
        write(
            dir.path(),
            "bad_type.error.tml",
            "// @expect-error T001\nfunc f() {\n    let x: I32 = \"hello\"\n}\n",
        );
        let outcome = run_diagnostic_test(dir.path(), Path::new("bad_type.error.tml"));
        assert_eq!(outcome, DiagnosticOutcome::Pass);
    }

    #[test]
    fn clean_compilation_fails_the_harness() {
        let dir = TempDir::new().expect("tempdir");
        write(
            dir.path(),
            "fine.error.tml",
            "// @expect-error T001\nfunc f() {\n    let x: I32 = 42\n}\n",
        );
        let outcome = run_diagnostic_test(dir.path(), Path::new("fine.error.tml"));
        let DiagnosticOutcome::Fail { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("expected error T001 not emitted"));
    }

    #[test]
    fn wrong_code_fails_the_harness() {
        let dir = TempDir::new().expect("tempdir");
        // Emits T002 (unknown identifier), not the expected B001
        write(
            dir.path(),
            "wrong.error.tml",
            "// @expect-error B001\nfunc f() {\n    ghost\n}\n",
        );
        let outcome = run_diagnostic_test(dir.path(), Path::new("wrong.error.tml"));
        let DiagnosticOutcome::Fail { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("B001"));
    }

    #[test]
    fn missing_directive_is_itself_a_failure() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "none.error.tml", "func f() {\n    return\n}\n");
        let outcome = run_diagnostic_test(dir.path(), Path::new("none.error.tml"));
        assert!(matches!(outcome, DiagnosticOutcome::Fail { .. }));
    }

    #[test]
    fn multiple_expected_codes_must_all_fire() {
        let dir = TempDir::new().expect("tempdir");
        write(
            dir.path(),
            "two.error.tml",
            "// @expect-error T001\n// @expect-error T002\nfunc f() {\n    let x: I32 = \"hello\"\n    ghost\n}\n",
        );
        assert_eq!(
            run_diagnostic_test(dir.path(), Path::new("two.error.tml")),
            DiagnosticOutcome::Pass
        );
    }
}
