//! LLVM coverage collection.
//!
//! Suite executables compiled with profile instrumentation write `.profraw`
//! files named by a `LLVM_PROFILE_FILE` pattern carrying the process id and
//! a pool id, so parallel workers contribute without clobbering each other.
//! After the run: scan for `*.profraw`, merge with
//! `llvm-profdata merge -sparse` (merging is commutative, so worker
//! completion order never changes the result), then render a console
//! summary, an HTML site, or an LCOV file with `llvm-cov`.

use crate::compiler::diagnostics::{CompileError, ErrorCode, ErrorLocation};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// `LLVM_PROFILE_FILE` value for a worker pool member. `%p` expands to the
/// child's pid inside the LLVM runtime.
pub fn profile_file_pattern(coverage_dir: &Path, pool_id: usize) -> String {
    format!("{}/tml-%p-{pool_id}.profraw", coverage_dir.display())
}

/// All `.profraw` files under the coverage directory, sorted for
/// reproducible logs (the merge itself is order-independent).
pub fn scan_profraw(coverage_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(coverage_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| {
            path.extension()
                .map(|extension| extension == "profraw")
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

fn tool_failure(tool: &str, detail: String) -> CompileError {
    CompileError::new(
        format!("{tool} failed: {detail}"),
        ErrorLocation::default(),
        ErrorCode::F001,
    )
}

/// `llvm-profdata merge -sparse <raw...> -o merged.profdata`
pub fn merge_profiles(raw_files: &[PathBuf], output: &Path) -> Result<(), CompileError> {
    if raw_files.is_empty() {
        return Err(tool_failure(
            "llvm-profdata",
            String::from("no .profraw files found"),
        ));
    }
    let result = Command::new("llvm-profdata")
        .arg("merge")
        .arg("-sparse")
        .args(raw_files)
        .arg("-o")
        .arg(output)
        .output()
        .map_err(|error| tool_failure("llvm-profdata", error.to_string()))?;
    if !result.status.success() {
        return Err(tool_failure(
            "llvm-profdata",
            String::from_utf8_lossy(&result.stderr).to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageOutput {
    Summary,
    Html,
    Lcov,
}

/// `llvm-cov report|show|export` over the merged profile.
pub fn generate_report(
    exe_path: &Path,
    profdata: &Path,
    output_kind: CoverageOutput,
    output_path: Option<&Path>,
) -> Result<String, CompileError> {
    let mut command = Command::new("llvm-cov");
    match output_kind {
        CoverageOutput::Summary => {
            command.arg("report");
        }
        CoverageOutput::Html => {
            command.arg("show").arg("--format=html");
            if let Some(output_path) = output_path {
                command.arg(format!("--output-dir={}", output_path.display()));
            }
        }
        CoverageOutput::Lcov => {
            command.arg("export").arg("--format=lcov");
        }
    }
    command
        .arg(exe_path)
        .arg(format!("--instr-profile={}", profdata.display()));

    let result = command
        .output()
        .map_err(|error| tool_failure("llvm-cov", error.to_string()))?;
    if !result.status.success() {
        return Err(tool_failure(
            "llvm-cov",
            String::from_utf8_lossy(&result.stderr).to_string(),
        ));
    }
    let text = String::from_utf8_lossy(&result.stdout).to_string();
    if output_kind == CoverageOutput::Lcov {
        if let Some(output_path) = output_path {
            std::fs::write(output_path, &text)
                .map_err(|error| tool_failure("llvm-cov", error.to_string()))?;
        }
    }
    Ok(text)
}

/// One row of an `llvm-cov report` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRow {
    pub file: String,
    pub regions: u64,
    pub regions_covered: u64,
    pub functions: u64,
    pub functions_covered: u64,
    pub lines: u64,
    pub lines_covered: u64,
    pub branches: u64,
    pub branches_covered: u64,
}

impl CoverageRow {
    pub fn line_percent(&self) -> f64 {
        if self.lines == 0 {
            100.0
        } else {
            self.lines_covered as f64 * 100.0 / self.lines as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct CoverageReport {
    pub files: Vec<CoverageRow>,
    pub total: Option<CoverageRow>,
}

/// Parses the text table `llvm-cov report` prints. Layout per row:
/// `file regions missed% functions missed% lines missed% branches missed%`
/// - the counts we keep are total and covered (total - missed).
pub fn parse_coverage_report(text: &str) -> CoverageReport {
    let mut report = CoverageReport::default();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("Filename")
            || trimmed.chars().all(|ch| ch == '-')
        {
            continue;
        }
        let columns: Vec<&str> = trimmed.split_whitespace().collect();
        // file + 4 groups of (total, missed, percent)
        if columns.len() < 13 {
            continue;
        }
        let parse = |text: &str| text.parse::<u64>().ok();
        let Some(regions) = parse(columns[1]) else { continue };
        let Some(regions_missed) = parse(columns[2]) else { continue };
        let Some(functions) = parse(columns[4]) else { continue };
        let Some(functions_missed) = parse(columns[5]) else { continue };
        let Some(lines) = parse(columns[7]) else { continue };
        let Some(lines_missed) = parse(columns[8]) else { continue };
        let Some(branches) = parse(columns[10]) else { continue };
        let Some(branches_missed) = parse(columns[11]) else { continue };

        let row = CoverageRow {
            file: columns[0].to_string(),
            regions,
            regions_covered: regions.saturating_sub(regions_missed),
            functions,
            functions_covered: functions.saturating_sub(functions_missed),
            lines,
            lines_covered: lines.saturating_sub(lines_missed),
            branches,
            branches_covered: branches.saturating_sub(branches_missed),
        };
        if row.file == "TOTAL" {
            report.total = Some(row);
        } else {
            report.files.push(row);
        }
    }

    report
}

/// Function-level rollup: functions group by the module inferred from their
/// mangled name (`tml_<module>_...`), and modules under 50% line coverage
/// are flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleCoverage {
    pub module: String,
    pub functions: u64,
    pub functions_covered: u64,
    pub lines: u64,
    pub lines_covered: u64,
}

impl ModuleCoverage {
    pub fn line_percent(&self) -> f64 {
        if self.lines == 0 {
            100.0
        } else {
            self.lines_covered as f64 * 100.0 / self.lines as f64
        }
    }
}

/// `(mangled_function, lines, lines_covered)` triples in, per-module rollup
/// out, sorted by module name.
pub fn group_by_module(functions: &[(String, u64, u64)]) -> Vec<ModuleCoverage> {
    let mut modules: std::collections::BTreeMap<String, ModuleCoverage> =
        std::collections::BTreeMap::new();
    for (mangled, lines, lines_covered) in functions {
        let module = module_of_mangled(mangled);
        let entry = modules
            .entry(module.clone())
            .or_insert_with(|| ModuleCoverage {
                module,
                functions: 0,
                functions_covered: 0,
                lines: 0,
                lines_covered: 0,
            });
        entry.functions += 1;
        if *lines_covered > 0 {
            entry.functions_covered += 1;
        }
        entry.lines += lines;
        entry.lines_covered += lines_covered;
    }
    modules.into_values().collect()
}

/// `tml_strbuf_push` -> `strbuf`; symbols without the prefix group under
/// `extern`.
fn module_of_mangled(mangled: &str) -> String {
    match mangled.strip_prefix(crate::settings::MANGLE_PREFIX) {
        Some(rest) => rest
            .split('_')
            .next()
            .unwrap_or("unknown")
            .to_string(),
        None => String::from("extern"),
    }
}

pub fn low_coverage_modules(modules: &[ModuleCoverage]) -> Vec<&ModuleCoverage> {
    modules
        .iter()
        .filter(|module| module.line_percent() < 50.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_REPORT: &str = "\
Filename                      Regions    Missed Regions     Cover   Functions  Missed Functions  Executed       Lines      Missed Lines     Cover    Branches   Missed Branches     Cover
---------------------------------------------------------------------------------------------------------------------------------------------------------------------------------------
src/lexer.tml                      120            12        90.00%         14              1    92.86%         300            30    90.00%          80            10    87.50%
src/parser.tml                     200           100        50.00%         20             10    50.00%         500           300    40.00%         120            70    41.67%
---------------------------------------------------------------------------------------------------------------------------------------------------------------------------------------
TOTAL                              320           112        65.00%         34             11    67.65%         800           330    58.75%         200            80    60.00%
";

    #[test]
    fn report_rows_parse_totals_and_covered_counts() {
        let report = parse_coverage_report(SAMPLE_REPORT);
        assert_eq!(report.files.len(), 2);

        let lexer = &report.files[0];
        assert_eq!(lexer.file, "src/lexer.tml");
        assert_eq!(lexer.regions, 120);
        assert_eq!(lexer.regions_covered, 108);
        assert_eq!(lexer.functions_covered, 13);
        assert_eq!(lexer.lines_covered, 270);
        assert_eq!(lexer.branches_covered, 70);
        assert!((lexer.line_percent() - 90.0).abs() < 0.01);

        let total = report.total.as_ref().expect("TOTAL row");
        assert_eq!(total.regions, 320);
        assert_eq!(total.lines_covered, 470);
    }

    #[test]
    fn profile_pattern_includes_pid_and_pool_id() {
        let pattern = profile_file_pattern(Path::new("build/debug/coverage"), 3);
        assert!(pattern.contains("%p"));
        assert!(pattern.ends_with("-3.profraw"));
    }

    #[test]
    fn profraw_scan_finds_only_profraw_files() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("a.profraw"), b"x").unwrap();
        std::fs::write(dir.path().join("b.profraw"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let found = scan_profraw(dir.path());
        assert_eq!(found.len(), 2);
        assert!(found.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn module_grouping_rolls_up_by_mangled_prefix() {
        let functions = vec![
            ("tml_lexer_next".to_string(), 100, 90),
            ("tml_lexer_peek".to_string(), 50, 40),
            ("tml_parser_expr".to_string(), 200, 20),
            ("strcmp".to_string(), 10, 10),
        ];
        let modules = group_by_module(&functions);
        let names: Vec<&str> = modules.iter().map(|module| module.module.as_str()).collect();
        assert_eq!(names, vec!["extern", "lexer", "parser"]);

        let lexer = modules.iter().find(|module| module.module == "lexer").unwrap();
        assert_eq!(lexer.functions, 2);
        assert_eq!(lexer.lines, 150);
        assert_eq!(lexer.lines_covered, 130);

        let low = low_coverage_modules(&modules);
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].module, "parser");
    }

    #[test]
    fn merging_nothing_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let error = merge_profiles(&[], &dir.path().join("out.profdata")).unwrap_err();
        assert!(error.msg.contains("no .profraw"));
    }
}
