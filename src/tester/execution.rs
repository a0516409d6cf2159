//! Suite subprocess execution.
//!
//! With `--run-all` the suite executable spawns ONCE; its stdout is read
//! line-by-line and every `TML_RESULT <index> <status> <duration_us>
//! <message_bytes>` line updates the matching test. Without it, each test
//! spawns individually with `--test-index=N`. A wall-clock timeout kills the
//! child and records `Timeout`; a child killed by a signal records a crash
//! note so the orchestrator never loses a status line.

use crate::settings;
use crate::tester::suite::SuiteTest;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
    Timeout,
}

impl TestStatus {
    pub fn parse(text: &str) -> Option<TestStatus> {
        match text {
            "pass" => Some(TestStatus::Pass),
            "fail" => Some(TestStatus::Fail),
            "error" => Some(TestStatus::Error),
            "timeout" => Some(TestStatus::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub index: usize,
    pub function_name: String,
    pub file: std::path::PathBuf,
    pub status: TestStatus,
    pub duration_ms: i64,
    pub message: String,
    pub stderr: String,
}

/// One parsed `TML_RESULT` line.
#[derive(Debug, PartialEq)]
pub struct ResultLine {
    pub index: usize,
    pub status: TestStatus,
    pub duration_us: i64,
    pub message_bytes: usize,
}

pub fn parse_result_line(line: &str) -> Option<ResultLine> {
    let rest = line.strip_prefix("TML_RESULT ")?;
    let mut parts = rest.split_whitespace();
    let index = parts.next()?.parse().ok()?;
    let status = TestStatus::parse(parts.next()?)?;
    let duration_us = parts.next()?.parse().ok()?;
    let message_bytes = parts.next()?.parse().ok()?;
    Some(ResultLine {
        index,
        status,
        duration_us,
        message_bytes,
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    // SIGKILL / TerminateProcess; the child gets no chance to
                    // mask the timeout
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

#[cfg(unix)]
fn crash_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn crash_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Runs the whole suite in one subprocess (`--run-all`).
/// `profile_file` becomes the child's `LLVM_PROFILE_FILE` when coverage is
/// collecting.
pub fn run_suite_all(
    exe_path: &Path,
    tests: &[SuiteTest],
    timeout: Duration,
    profile_file: Option<&str>,
) -> Vec<TestResult> {
    let mut results: Vec<TestResult> = tests
        .iter()
        .map(|test| TestResult {
            index: test.index,
            function_name: test.function_name.clone(),
            file: test.file.clone(),
            status: TestStatus::Error,
            duration_ms: 0,
            message: String::new(),
            stderr: String::new(),
        })
        .collect();

    let mut command = Command::new(exe_path);
    command
        .arg("--run-all")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(profile_file) = profile_file {
        command.env("LLVM_PROFILE_FILE", profile_file);
    }
    let spawned = command.spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(error) => {
            for result in &mut results {
                result.message = format!("failed to spawn suite: {error}");
            }
            return results;
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    // Read both pipes off-thread so a chatty child cannot deadlock on a
    // full pipe while we wait
    let stdout_handle = std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });

    // The whole-suite budget is per-test timeout x test count
    let suite_timeout = timeout * (tests.len().max(1) as u32);
    let exit = wait_with_timeout(&mut child, suite_timeout);
    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    let mut lines = stdout.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(parsed) = parse_result_line(line) {
            let message = if parsed.message_bytes > 0 {
                lines.next().unwrap_or("").to_string()
            } else {
                String::new()
            };
            if let Some(result) = results.get_mut(parsed.index) {
                result.status = parsed.status;
                result.duration_ms = parsed.duration_us / 1000;
                result.message = message;
            }
        }
    }

    match exit {
        Some(status) => {
            if let Some(signal) = crash_signal(&status) {
                // Crash filter: record a status line instead of silent loss
                for result in &mut results {
                    if result.status == TestStatus::Error && result.message.is_empty() {
                        result.message = format!("[FATAL CRASH] signal {signal}");
                        result.stderr = stderr.clone();
                    }
                }
            }
        }
        None => {
            // Timed out: everything not yet reported becomes Timeout
            for result in &mut results {
                if result.status == TestStatus::Error && result.message.is_empty() {
                    result.status = TestStatus::Timeout;
                    result.duration_ms = timeout.as_millis() as i64;
                }
            }
        }
    }

    // stderr is suite-wide in run-all mode; attach it to failures
    for result in &mut results {
        if result.status != TestStatus::Pass && result.stderr.is_empty() {
            result.stderr = stderr.clone();
        }
    }

    results
}

/// Runs one test in its own subprocess (`--test-index=N`).
pub fn run_single_test(
    exe_path: &Path,
    test: &SuiteTest,
    timeout: Duration,
    profile_file: Option<&str>,
) -> TestResult {
    let started = Instant::now();
    let mut command = Command::new(exe_path);
    command
        .arg(format!("--test-index={}", test.index))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(profile_file) = profile_file {
        command.env("LLVM_PROFILE_FILE", profile_file);
    }
    let spawned = command.spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(error) => {
            return TestResult {
                index: test.index,
                function_name: test.function_name.clone(),
                file: test.file.clone(),
                status: TestStatus::Error,
                duration_ms: 0,
                message: format!("failed to spawn: {error}"),
                stderr: String::new(),
            };
        }
    };

    let mut stderr_pipe = child.stderr.take();
    let stderr_handle = std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });

    let exit = wait_with_timeout(&mut child, timeout);
    let stderr = stderr_handle.join().unwrap_or_default();
    let duration_ms = started.elapsed().as_millis() as i64;

    let (status, message) = match exit {
        None => (TestStatus::Timeout, String::from("wall-clock timeout exceeded")),
        Some(exit_status) => {
            if let Some(signal) = crash_signal(&exit_status) {
                (
                    TestStatus::Error,
                    format!("[FATAL CRASH] signal {signal}"),
                )
            } else {
                match exit_status.code() {
                    Some(0) => (TestStatus::Pass, String::new()),
                    Some(code) if code == settings::DISPATCH_EXIT_BAD_INDEX => (
                        TestStatus::Error,
                        String::from("dispatcher rejected the test index"),
                    ),
                    Some(code) => (TestStatus::Fail, format!("exit code {code}")),
                    None => (TestStatus::Error, String::from("no exit code")),
                }
            }
        }
    };

    TestResult {
        index: test.index,
        function_name: test.function_name.clone(),
        file: test.file.clone(),
        status,
        duration_ms,
        message,
        stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn result_lines_parse_per_the_contract() {
        let parsed = parse_result_line("TML_RESULT 7 pass 1500 0").expect("parse");
        assert_eq!(
            parsed,
            ResultLine {
                index: 7,
                status: TestStatus::Pass,
                duration_us: 1500,
                message_bytes: 0,
            }
        );
        assert_eq!(
            parse_result_line("TML_RESULT 0 timeout 5000000 12").unwrap().status,
            TestStatus::Timeout
        );
        assert!(parse_result_line("random output").is_none());
        assert!(parse_result_line("TML_RESULT x pass 0 0").is_none());
        assert!(parse_result_line("TML_RESULT 1 maybe 0 0").is_none());
    }

    #[cfg(unix)]
    fn script_exe(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake_suite.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("script");
        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).unwrap();
        path
    }

    #[cfg(unix)]
    fn fake_tests(count: usize) -> Vec<SuiteTest> {
        (0..count)
            .map(|index| SuiteTest {
                index,
                file: PathBuf::from("fake.test.tml"),
                function_name: format!("t{index}"),
                symbol: format!("tml_s0_t{index}"),
                returns_exit_code: false,
            })
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn run_all_parses_structured_lines_from_one_spawn() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let exe = script_exe(
            dir.path(),
            "echo 'TML_RESULT 0 pass 1200 0'\necho 'TML_RESULT 1 fail 3400 0'\nexit 1\n",
        );
        let results = run_suite_all(&exe, &fake_tests(2), Duration::from_secs(5), None);
        assert_eq!(results[0].status, TestStatus::Pass);
        assert_eq!(results[0].duration_ms, 1);
        assert_eq!(results[1].status, TestStatus::Fail);
        assert_eq!(results[1].duration_ms, 3);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_child_and_records_timeout() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let exe = script_exe(dir.path(), "sleep 30\n");
        let test = &fake_tests(1)[0];
        let started = Instant::now();
        let result = run_single_test(&exe, test, Duration::from_millis(300), None);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.status, TestStatus::Timeout);
        assert!(result.duration_ms >= 300);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_fail_with_captured_stderr() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let exe = script_exe(dir.path(), "echo 'boom' 1>&2\nexit 3\n");
        let test = &fake_tests(1)[0];
        let result = run_single_test(&exe, test, Duration::from_secs(5), None);
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.message.contains("exit code 3"));
        assert!(result.stderr.contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn dispatcher_bad_index_code_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let exe = script_exe(dir.path(), "exit 99\n");
        let test = &fake_tests(1)[0];
        let result = run_single_test(&exe, test, Duration::from_secs(5), None);
        assert_eq!(result.status, TestStatus::Error);
    }

    #[cfg(unix)]
    #[test]
    fn missing_results_after_timeout_become_timeout() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        // Reports test 0 then hangs; test 1 never reports
        let exe = script_exe(
            dir.path(),
            "echo 'TML_RESULT 0 pass 100 0'\nsleep 30\n",
        );
        let results = run_suite_all(&exe, &fake_tests(2), Duration::from_millis(200), None);
        assert_eq!(results[0].status, TestStatus::Pass);
        assert_eq!(results[1].status, TestStatus::Timeout);
    }
}
