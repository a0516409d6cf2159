//! Suite-mode test orchestration.
//!
//! Discover, group into suites, compile each suite to one executable with a
//! dispatcher main, run (one subprocess per suite with `--run-all`, or one
//! per test without), collect structured results, and report. Suites
//! dispatch to a worker pool; fail-fast is on by default and stops
//! scheduling new suites while in-flight ones finish. Reporting always
//! follows discovery order.

pub mod coverage;
pub mod diagnostic_tests;
pub mod discovery;
pub mod execution;
pub mod report;
pub mod suite;
pub mod test_cache;

use crate::build_system::build::BuildOptions;
use crate::build_system::object::Backend;
use crate::compiler::diagnostics::{print_errors, CompileError, CompilerMessages, ErrorCode, ErrorLocation};
use crate::compiler::preprocessor::BuildMode;
use crate::hashing;
use crate::settings;
use crate::tester::execution::{TestResult, TestStatus};
use crate::tester::report::Reporter;
use crate::tester::suite::{compile_suite, group_suites, TestSuite};
use crate::tester::test_cache::{CachedTestStatus, TestCacheManager};
use crate::{log_debug, log_info};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TestOptions {
    pub build: BuildOptions,
    /// One subprocess per suite (--run-all) instead of one per test
    pub run_all: bool,
    pub test_threads: usize,
    pub timeout: Duration,
    pub fail_fast: bool,
    pub coverage: bool,
    pub coverage_output: Option<PathBuf>,
    pub coverage_source: bool,
    pub profile: bool,
    pub nocapture: bool,
    pub no_color: bool,
    pub quiet: bool,
    pub no_suite: bool,
    pub suite_group: Option<String>,
    pub list_suites: bool,
    pub force_discovery: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        TestOptions {
            build: BuildOptions {
                build_mode: BuildMode::Test,
                ..BuildOptions::default()
            },
            run_all: true,
            test_threads: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
            timeout: Duration::from_secs(settings::DEFAULT_TEST_TIMEOUT_SECONDS),
            fail_fast: true,
            coverage: false,
            coverage_output: None,
            coverage_source: false,
            profile: false,
            nocapture: false,
            no_color: false,
            quiet: false,
            no_suite: false,
            suite_group: None,
            list_suites: false,
            force_discovery: false,
        }
    }
}

impl TestOptions {
    pub fn parse(args: &[String]) -> Result<TestOptions, CompileError> {
        let (build, rest) = BuildOptions::parse(args)?;
        let mut options = TestOptions {
            build: BuildOptions {
                build_mode: BuildMode::Test,
                ..build
            },
            ..TestOptions::default()
        };

        for arg in &rest {
            match arg.as_str() {
                "--coverage" => options.coverage = true,
                "--coverage-source" => options.coverage_source = true,
                "--nocapture" => options.nocapture = true,
                "--no-color" => options.no_color = true,
                "--quiet" => options.quiet = true,
                "--no-suite" => {
                    options.no_suite = true;
                    options.run_all = false;
                }
                "--list-suites" => options.list_suites = true,
                "--profile" => options.profile = true,
                "--no-fail-fast" => options.fail_fast = false,
                other => {
                    if let Some(value) = other.strip_prefix("--test-threads=") {
                        options.test_threads = value.parse().map_err(|_| bad_flag(other))?;
                    } else if let Some(value) = other.strip_prefix("--timeout=") {
                        let seconds: u64 = value.parse().map_err(|_| bad_flag(other))?;
                        options.timeout = Duration::from_secs(seconds);
                    } else if let Some(value) = other.strip_prefix("--coverage-output=") {
                        options.coverage_output = Some(PathBuf::from(value));
                    } else if let Some(value) = other.strip_prefix("--suite-group=") {
                        options.suite_group = Some(value.to_string());
                    } else if let Some(value) = other.strip_prefix("--log=") {
                        crate::logging::set_filter(value);
                    }
                    // Remaining unknown args are positional filters the CLI
                    // layer interprets
                }
            }
        }

        Ok(options)
    }
}

fn bad_flag(flag: &str) -> CompileError {
    CompileError::new(
        format!("Malformed flag '{flag}'"),
        ErrorLocation::default(),
        ErrorCode::CFG001,
    )
}

struct SuiteRun {
    suite: TestSuite,
    results: Vec<TestResult>,
    compile_errors: Option<CompilerMessages>,
}

/// The whole suite-mode pipeline. Exit code 0 when everything passed, 1 when
/// any test failed, 2 when a suite failed to compile.
pub fn run_tests(root: &Path, options: &TestOptions, backend: &dyn Backend) -> i32 {
    let started = Instant::now();

    let files = discovery::discover_tests(root, options.force_discovery);
    let mut suites = group_suites(&files);
    if let Some(filter) = &options.suite_group {
        suites.retain(|suite| suite.name == *filter);
    }

    if options.list_suites {
        for suite in &suites {
            println!("{} ({} files)", suite.name, suite.files.len());
        }
        return 0;
    }
    if suites.is_empty() {
        if !options.quiet {
            println!("no tests found");
        }
        return 0;
    }

    // Profile instrumentation flags flow into suite compilation
    let mut build_options = options.build.clone();
    if options.coverage {
        build_options.profile_generate = true;
    }
    let coverage_dir = root.join(settings::dirs::COVERAGE);
    if options.coverage {
        let _ = std::fs::create_dir_all(&coverage_dir);
    }

    // Skippable tests short-circuit before compilation
    let cache_path = root.join(settings::TEST_CACHE_FILE_NAME);
    let mut test_cache = TestCacheManager::new();
    test_cache.load(&cache_path);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.test_threads.max(1))
        .build();
    let Ok(pool) = pool else {
        eprintln!("could not start the worker pool");
        return 2;
    };

    let stop = AtomicBool::new(false);
    let mut runs: Vec<SuiteRun> = pool.install(|| {
        suites
            .par_iter()
            .enumerate()
            .map(|(pool_id, suite)| {
                // Fail-fast drains: in-flight suites complete, queued ones
                // return empty
                if options.fail_fast && stop.load(Ordering::SeqCst) {
                    return SuiteRun {
                        suite: suite.clone(),
                        results: Vec::new(),
                        compile_errors: None,
                    };
                }

                // A suite whose files all validate against the cache and
                // passed last time is replayed from the cache, skipping both
                // compilation and execution
                let skippable = suite.files.iter().all(|file| {
                    test_cache.can_skip(
                        root,
                        &file.to_string_lossy(),
                        options.coverage,
                        options.profile,
                    )
                });
                if skippable {
                    log_debug!("tester", "suite '{}' unchanged, skipping", suite.name);
                    let results = suite
                        .files
                        .iter()
                        .flat_map(|file| {
                            let entry = test_cache.get(&file.to_string_lossy());
                            let functions = entry
                                .map(|entry| entry.test_functions.clone())
                                .unwrap_or_default();
                            let duration = entry.map(|entry| entry.duration_ms).unwrap_or(0);
                            functions.into_iter().map(move |function_name| TestResult {
                                index: 0,
                                function_name,
                                file: file.clone(),
                                status: TestStatus::Pass,
                                duration_ms: duration,
                                message: String::new(),
                                stderr: String::new(),
                            })
                        })
                        .collect();
                    return SuiteRun {
                        suite: suite.clone(),
                        results,
                        compile_errors: None,
                    };
                }

                let mut messages = CompilerMessages::new();
                let Some(compiled) =
                    compile_suite(root, suite, &build_options, backend, &mut messages)
                else {
                    // One suite failing to compile is a suite-level failure;
                    // other suites continue unless fail_fast
                    if options.fail_fast {
                        stop.store(true, Ordering::SeqCst);
                    }
                    return SuiteRun {
                        suite: suite.clone(),
                        results: Vec::new(),
                        compile_errors: Some(messages),
                    };
                };

                // Each pool member writes its own profraw files
                let profile_file = options
                    .coverage
                    .then(|| coverage::profile_file_pattern(&coverage_dir, pool_id));

                let results = if options.run_all && !options.no_suite {
                    execution::run_suite_all(
                        &compiled.exe_path,
                        &compiled.tests,
                        options.timeout,
                        profile_file.as_deref(),
                    )
                } else {
                    compiled
                        .tests
                        .iter()
                        .map(|test| {
                            execution::run_single_test(
                                &compiled.exe_path,
                                test,
                                options.timeout,
                                profile_file.as_deref(),
                            )
                        })
                        .collect()
                };

                if options.fail_fast
                    && results.iter().any(|result| result.status != TestStatus::Pass)
                {
                    stop.store(true, Ordering::SeqCst);
                }

                SuiteRun {
                    suite: suite.clone(),
                    results,
                    compile_errors: None,
                }
            })
            .collect()
    });

    // Stable report order: discovery order, never completion order
    runs.sort_by(|a, b| a.suite.name.cmp(&b.suite.name));

    let reporter = Reporter::new(options.no_color, options.quiet, options.nocapture);
    let mut all_results: Vec<(String, Vec<TestResult>)> = Vec::new();
    let mut compile_failed = false;

    for run in &runs {
        if let Some(messages) = &run.compile_errors {
            compile_failed = true;
            if !options.quiet {
                eprintln!("suite '{}' failed to compile:", run.suite.name);
                print_errors(messages);
            }
            continue;
        }
        reporter.print_suite(&run.suite.name, &run.results);
        all_results.push((run.suite.name.clone(), run.results.clone()));
    }

    // Cache update: one entry per file, aggregated across its tests
    for run in &runs {
        if run.compile_errors.is_some() {
            continue;
        }
        let mut per_file: BTreeMap<&PathBuf, (CachedTestStatus, i64, Vec<String>)> =
            BTreeMap::new();
        for result in &run.results {
            let entry = per_file
                .entry(&result.file)
                .or_insert((CachedTestStatus::Pass, 0, Vec::new()));
            entry.1 += result.duration_ms;
            entry.2.push(result.function_name.clone());
            let status = match result.status {
                TestStatus::Pass => CachedTestStatus::Pass,
                TestStatus::Fail => CachedTestStatus::Fail,
                TestStatus::Error => CachedTestStatus::Error,
                TestStatus::Timeout => CachedTestStatus::Timeout,
            };
            if status != CachedTestStatus::Pass {
                entry.0 = status;
            }
        }
        for (file, (status, duration_ms, functions)) in per_file {
            let Ok(sha512) = hashing::sha512_file(&root.join(file)) else {
                continue;
            };
            test_cache.update(
                &file.to_string_lossy(),
                sha512,
                run.suite.name.clone(),
                functions,
                status,
                duration_ms,
                BTreeMap::new(),
                options.coverage,
                options.profile,
            );
        }
    }
    test_cache.save(&cache_path);

    // Coverage: scan, merge, report
    if options.coverage {
        match coverage::scan_profraw(&coverage_dir) {
            raw_files if raw_files.is_empty() => {
                log_debug!("tester", "no profraw files to merge");
            }
            raw_files => {
                let profdata = coverage_dir.join("merged.profdata");
                match coverage::merge_profiles(&raw_files, &profdata) {
                    Ok(()) => log_info!(
                        "tester",
                        "merged {} profile file(s) into {}",
                        raw_files.len(),
                        profdata.display()
                    ),
                    Err(error) => {
                        if !options.quiet {
                            eprintln!("coverage merge failed: {}", error.msg);
                        }
                    }
                }
            }
        }
    }

    let file_count = files.len();
    reporter.print_summary(&all_results, file_count, started.elapsed());

    if compile_failed {
        return 2;
    }
    let any_failed = all_results
        .iter()
        .flat_map(|(_, results)| results)
        .any(|result| result.status != TestStatus::Pass);
    if any_failed { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_parsing_covers_the_test_surface() {
        let options = TestOptions::parse(&[
            "--coverage".to_string(),
            "--test-threads=3".to_string(),
            "--timeout=7".to_string(),
            "--nocapture".to_string(),
            "--no-color".to_string(),
            "--suite-group=compiler_tests".to_string(),
            "--no-suite".to_string(),
        ])
        .expect("parse");
        assert!(options.coverage);
        assert_eq!(options.test_threads, 3);
        assert_eq!(options.timeout, Duration::from_secs(7));
        assert!(options.nocapture);
        assert!(options.no_color);
        assert_eq!(options.suite_group.as_deref(), Some("compiler_tests"));
        assert!(options.no_suite);
        assert!(!options.run_all);
        assert_eq!(options.build.build_mode, BuildMode::Test);
    }

    #[test]
    fn malformed_numeric_flags_are_rejected() {
        let error = TestOptions::parse(&["--timeout=banana".to_string()]).unwrap_err();
        assert_eq!(error.code, ErrorCode::CFG001);
    }

    #[test]
    fn defaults_run_all_with_fail_fast() {
        let options = TestOptions::default();
        assert!(options.run_all);
        assert!(options.fail_fast);
        assert_eq!(
            options.timeout,
            Duration::from_secs(settings::DEFAULT_TEST_TIMEOUT_SECONDS)
        );
    }
}
