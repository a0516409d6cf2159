//! Aggregate test reporting.
//!
//! Vitest-style output: one line per test as its file finishes, a failures
//! section with captured stderr excerpts, then totals
//! (`N passed; M failed; K files; finished in Ts`). Suite results print in
//! stable discovery order, never completion order. The per-suite leak report
//! aggregates `(leak_count, leak_bytes)` per file with color thresholds.

use crate::tester::execution::{TestResult, TestStatus};
use colour::{e_red_ln, green_ln, grey_ln, red_ln, yellow_ln};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub struct Reporter {
    pub no_color: bool,
    pub quiet: bool,
    pub nocapture: bool,
}

impl Reporter {
    pub fn new(no_color: bool, quiet: bool, nocapture: bool) -> Reporter {
        Reporter {
            no_color,
            quiet,
            nocapture,
        }
    }

    fn status_word(status: TestStatus) -> &'static str {
        match status {
            TestStatus::Pass => "ok",
            TestStatus::Fail => "FAILED",
            TestStatus::Error => "ERROR",
            TestStatus::Timeout => "TIMEOUT",
        }
    }

    /// One line per test, grouped under the suite that owns it.
    pub fn print_suite(&self, suite_name: &str, results: &[TestResult]) {
        if self.quiet {
            return;
        }
        for result in results {
            let line = format!(
                "test {suite_name}::{} ... {} ({}ms)",
                result.function_name,
                Self::status_word(result.status),
                result.duration_ms
            );
            if self.no_color {
                println!("{line}");
            } else {
                match result.status {
                    TestStatus::Pass => green_ln!("{}", line),
                    TestStatus::Timeout => yellow_ln!("{}", line),
                    _ => red_ln!("{}", line),
                }
            }
            if self.nocapture && !result.message.is_empty() {
                println!("  {}", result.message);
            }
        }
    }

    /// The failures section plus the summary totals line.
    pub fn print_summary(
        &self,
        all_results: &[(String, Vec<TestResult>)],
        file_count: usize,
        elapsed: Duration,
    ) {
        let failures: Vec<(&str, &TestResult)> = all_results
            .iter()
            .flat_map(|(suite_name, results)| {
                results
                    .iter()
                    .filter(|result| result.status != TestStatus::Pass)
                    .map(move |result| (suite_name.as_str(), result))
            })
            .collect();

        if self.quiet {
            return;
        }

        if !failures.is_empty() {
            println!();
            println!("failures:");
            for (suite_name, result) in &failures {
                println!();
                println!("---- {suite_name}::{} ----", result.function_name);
                if !result.message.is_empty() {
                    println!("{}", result.message);
                }
                if !result.stderr.is_empty() {
                    // Excerpt, not the whole stream
                    for line in result.stderr.lines().take(20) {
                        println!("  {line}");
                    }
                }
            }
        }

        let passed = all_results
            .iter()
            .flat_map(|(_, results)| results)
            .filter(|result| result.status == TestStatus::Pass)
            .count();
        let failed = failures.len();

        println!();
        let totals = format!(
            "{passed} passed; {failed} failed; {file_count} files; finished in {:.2}s",
            elapsed.as_secs_f64()
        );
        if self.no_color {
            println!("{totals}");
        } else if failed == 0 {
            green_ln!("{}", totals);
        } else {
            e_red_ln!("{}", totals);
        }
    }
}

/// Per-file leak accounting reported by the leak runtime hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakEntry {
    pub leak_count: u64,
    pub leak_bytes: u64,
}

#[derive(Debug, Default)]
pub struct LeakReport {
    pub per_file: BTreeMap<PathBuf, LeakEntry>,
}

impl LeakReport {
    pub fn record(&mut self, file: PathBuf, leak_count: u64, leak_bytes: u64) {
        let entry = self.per_file.entry(file).or_default();
        entry.leak_count += leak_count;
        entry.leak_bytes += leak_bytes;
    }

    pub fn total(&self) -> LeakEntry {
        let mut total = LeakEntry::default();
        for entry in self.per_file.values() {
            total.leak_count += entry.leak_count;
            total.leak_bytes += entry.leak_bytes;
        }
        total
    }

    /// Summary table with color thresholds: green when clean, yellow under
    /// 1 KiB leaked, red above.
    pub fn print(&self, no_color: bool) {
        if self.per_file.is_empty() {
            return;
        }
        println!();
        println!("leak report:");
        println!("{:<48} {:>8} {:>12}", "file", "leaks", "bytes");
        for (file, entry) in &self.per_file {
            let line = format!(
                "{:<48} {:>8} {:>12}",
                file.display(),
                entry.leak_count,
                entry.leak_bytes
            );
            if no_color {
                println!("{line}");
            } else if entry.leak_count == 0 {
                green_ln!("{}", line);
            } else if entry.leak_bytes < 1024 {
                yellow_ln!("{}", line);
            } else {
                red_ln!("{}", line);
            }
        }
        let total = self.total();
        if no_color {
            println!("total: {} leaks, {} bytes", total.leak_count, total.leak_bytes);
        } else {
            grey_ln!("total: {} leaks, {} bytes", total.leak_count, total.leak_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: TestStatus) -> TestResult {
        TestResult {
            index: 0,
            function_name: name.to_string(),
            file: PathBuf::from("x.test.tml"),
            status,
            duration_ms: 4,
            message: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn leak_report_aggregates_per_file() {
        let mut report = LeakReport::default();
        report.record(PathBuf::from("a.test.tml"), 2, 128);
        report.record(PathBuf::from("a.test.tml"), 1, 64);
        report.record(PathBuf::from("b.test.tml"), 0, 0);

        assert_eq!(
            report.per_file[&PathBuf::from("a.test.tml")],
            LeakEntry {
                leak_count: 3,
                leak_bytes: 192
            }
        );
        assert_eq!(report.total().leak_count, 3);
        assert_eq!(report.total().leak_bytes, 192);
    }

    #[test]
    fn status_words_match_the_format() {
        assert_eq!(Reporter::status_word(TestStatus::Pass), "ok");
        assert_eq!(Reporter::status_word(TestStatus::Fail), "FAILED");
        assert_eq!(Reporter::status_word(TestStatus::Timeout), "TIMEOUT");
    }

    #[test]
    fn quiet_reporter_prints_nothing_and_does_not_panic() {
        let reporter = Reporter::new(true, true, false);
        reporter.print_suite("suite", &[result("a", TestStatus::Fail)]);
        reporter.print_summary(
            &[("suite".to_string(), vec![result("a", TestStatus::Fail)])],
            1,
            Duration::from_millis(10),
        );
    }
}
