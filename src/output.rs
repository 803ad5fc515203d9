//! CLI output formatting for build passes.
//!
//! # Output Format
//!
//! One line per reported output, the URL in serve mode and otherwise the path
//! relative to the rconf directory. Failures follow, then a tally:
//!
//! ```text
//! slides/intro.html
//! slides/outro.html
//! error: slides/broken.md: template error in base.html: ...
//! Built 2 pages, 1 failed
//! ```
//!
//! With `report_all` the tally also counts outputs that were already fresh:
//!
//! ```text
//! http://127.0.0.1:9090/slides/intro.html
//! http://127.0.0.1:9090/slides/outro.html
//! Built 0 pages, 2 up to date
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions do no I/O.

use crate::builder::{BuildFailure, BuildSummary};
use crate::types::BuildReport;
use serde_json::{Value, json};
use std::path::Path;

/// Path shown for `path`: relative to `root` when it lives below it.
fn display_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path.display().to_string(),
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// The line printed for one report.
pub fn report_line(report: &BuildReport, root: &Path) -> String {
    match &report.url {
        Some(url) => url.clone(),
        None => display_path(&report.output, root),
    }
}

pub fn failure_line(failure: &BuildFailure) -> String {
    match &failure.input {
        Some(input) => format!("error: {}: {}", input.display(), failure.error),
        None => format!("error: {}", failure.error),
    }
}

/// Closing tally. Empty counts are left out, except the page count.
pub fn format_tally(summary: &BuildSummary) -> String {
    let mut line = format!("Built {}", plural(summary.rebuilt(), "page"));
    if summary.fresh() > 0 {
        line.push_str(&format!(", {} up to date", summary.fresh()));
    }
    if !summary.failures.is_empty() {
        line.push_str(&format!(", {} failed", summary.failures.len()));
    }
    line
}

/// Full text of a build pass.
pub fn format_build_summary(summary: &BuildSummary, root: &Path) -> Vec<String> {
    let mut lines: Vec<String> = summary
        .reports
        .iter()
        .map(|r| report_line(r, root))
        .collect();
    lines.extend(summary.failures.iter().map(failure_line));
    lines.push(format_tally(summary));
    lines
}

pub fn print_build_summary(summary: &BuildSummary, root: &Path) {
    for line in format_build_summary(summary, root) {
        println!("{}", line);
    }
}

/// Only the report lines, as printed after each rebuild in serve mode.
pub fn print_reports(summary: &BuildSummary, root: &Path) {
    for report in &summary.reports {
        println!("{}", report_line(report, root));
    }
    for failure in &summary.failures {
        eprintln!("{}", failure_line(failure));
    }
}

/// Machine-readable view of a build pass, for `build --json`.
pub fn build_summary_json(summary: &BuildSummary) -> Value {
    let failures: Vec<Value> = summary
        .failures
        .iter()
        .map(|f| {
            json!({
                "rule": f.rule,
                "input": f.input,
                "error": f.error.to_string(),
            })
        })
        .collect();
    json!({
        "reports": summary.reports,
        "failures": failures,
        "rebuilt": summary.rebuilt(),
    })
}
