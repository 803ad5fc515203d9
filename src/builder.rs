//! Build orchestration.
//!
//! A build pass loads the rconf file, then walks its rules in declaration
//! order and the files each rule matches in lexical order:
//!
//! ```text
//! for rule in rules:
//!     params   = global params, overridden by rule params
//!     template = rule template, else global template        (rule fails if none)
//!     for input in glob(rule.input):
//!         output = output path for input
//!         if stale(output; input, template, rconf) or force:
//!             render input through template, write output
//!         report output if it was written, or if every output is wanted
//! ```
//!
//! ## Failure Scopes
//!
//! | Error                              | Effect                         |
//! |------------------------------------|--------------------------------|
//! | rconf unreadable, invalid          | whole pass fails, nothing runs |
//! | no template for a rule, bad glob   | that rule is skipped           |
//! | render or I/O error for a file     | that file is skipped           |
//!
//! Skipped rules and files are logged and collected in
//! [`BuildSummary::failures`]; the rest of the pass carries on, so one broken
//! deck does not hold back the others. Reports only list outputs that were
//! actually written (or, with `report_all`, that are up to date).
//!
//! Every pass builds its own [`RenderContext`] and reads everything from
//! disk, so a pass is a function of the files as they are when it starts.

use crate::config::{self, ConfigError, RConf, RuleRef, TEMPLATE_PARAM};
use crate::generate::{RenderContext, RenderError};
use crate::params::{ParamError, Params, get_named_param, resolve_params};
use crate::scan::{ScanError, compute_output_path, expand_glob};
use crate::settings::RenderSettings;
use crate::staleness::needs_rebuild;
use crate::types::{BuildReport, ResolvedFile};
use chrono::{DateTime, FixedOffset, Local};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("rule at line {line}: {source}")]
    Param {
        line: usize,
        #[source]
        source: ParamError,
    },
    #[error("rule at line {line}: {source}")]
    Scan {
        line: usize,
        #[source]
        source: ScanError,
    },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}: output would overwrite its own input")]
    OutputIsInput(PathBuf),
}

impl BuildError {
    /// Whether the error ends the whole pass rather than one rule or file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::Config(_))
    }
}

/// A rule or file that could not be built.
#[derive(Debug)]
pub struct BuildFailure {
    /// Index of the rule in the rconf file.
    pub rule: usize,
    /// The input being built, `None` when the whole rule failed.
    pub input: Option<PathBuf>,
    pub error: BuildError,
}

/// Everything a pass did, in the order it did it.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub reports: Vec<BuildReport>,
    pub failures: Vec<BuildFailure>,
}

impl BuildSummary {
    /// Number of outputs written.
    pub fn rebuilt(&self) -> usize {
        self.reports.iter().filter(|r| r.rebuilt).count()
    }

    /// Number of outputs reported as up to date.
    pub fn fresh(&self) -> usize {
        self.reports.len() - self.rebuilt()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild every output regardless of timestamps.
    pub force: bool,
    /// Report up-to-date outputs too (dev server startup).
    pub report_all: bool,
    /// Base URL outputs are served under, e.g. `http://127.0.0.1:9090`.
    pub base_url: Option<String>,
    pub render: RenderSettings,
}

/// Load the rconf file at `config_path` and run one build pass.
///
/// Only configuration errors fail the call; everything else is collected in
/// the summary.
pub fn build(config_path: &Path, options: &BuildOptions) -> Result<BuildSummary, ConfigError> {
    let model = config::load(config_path)?;
    Ok(build_model(&model, options, Local::now().fixed_offset()))
}

/// Run one build pass over an already loaded model.
pub fn build_model(
    model: &RConf,
    options: &BuildOptions,
    now: DateTime<FixedOffset>,
) -> BuildSummary {
    let mut ctx = RenderContext::new(model.dir(), now, &options.render);
    let mut summary = BuildSummary::default();

    for rule in model.rules() {
        if let Err(error) = build_rule(model, &rule, options, &mut ctx, &mut summary) {
            error!(rule = rule.line, "{error}");
            summary.failures.push(BuildFailure {
                rule: rule.index,
                input: None,
                error,
            });
        }
    }

    debug!(
        written = summary.rebuilt(),
        failed = summary.failures.len(),
        "build pass finished"
    );
    summary
}

fn build_rule(
    model: &RConf,
    rule: &RuleRef<'_>,
    options: &BuildOptions,
    ctx: &mut RenderContext,
    summary: &mut BuildSummary,
) -> Result<(), BuildError> {
    let params = resolve_params(model, rule);
    let template = get_named_param(rule, TEMPLATE_PARAM).map_err(|source| BuildError::Param {
        line: rule.line,
        source,
    })?;
    let template = model.dir().join(template);

    let inputs = expand_glob(&rule.input, model.dir()).map_err(|source| BuildError::Scan {
        line: rule.line,
        source,
    })?;
    if inputs.is_empty() {
        warn!(rule = rule.line, "input \"{}\" matches no files", rule.input);
        return Ok(());
    }

    for input in inputs {
        let output = compute_output_path(&input, rule.output.as_deref(), model.dir());
        let file = ResolvedFile { input, output };
        match build_file(model, &file, &template, &params, options, ctx) {
            Ok(Some(report)) => summary.reports.push(report),
            Ok(None) => {}
            Err(error) => {
                error!(input = %file.input.display(), "{error}");
                summary.failures.push(BuildFailure {
                    rule: rule.index,
                    input: Some(file.input),
                    error,
                });
            }
        }
    }
    Ok(())
}

fn build_file(
    model: &RConf,
    file: &ResolvedFile,
    template: &Path,
    params: &Params,
    options: &BuildOptions,
    ctx: &mut RenderContext,
) -> Result<Option<BuildReport>, BuildError> {
    if file.output == file.input {
        return Err(BuildError::OutputIsInput(file.input.clone()));
    }

    let decision = needs_rebuild(
        &file.output,
        &file.input,
        template,
        &model.path,
        options.force,
    )
    .map_err(|e| BuildError::Io {
        path: e.path,
        source: e.source,
    })?;
    debug!(
        output = %file.output.display(),
        rebuild = decision.rebuild,
        "checked output"
    );

    if decision.rebuild {
        let html = ctx.render_page(&file.input, template, params)?;
        let io_err = |source| BuildError::Io {
            path: file.output.clone(),
            source,
        };
        if let Some(parent) = file.output.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&file.output, html).map_err(io_err)?;
        info!(output = %file.output.display(), "generated");
    }

    if !decision.rebuild && !options.report_all {
        return Ok(None);
    }
    Ok(Some(BuildReport {
        output: file.output.clone(),
        url: options
            .base_url
            .as_deref()
            .and_then(|base| output_url(base, model.dir(), &file.output)),
        rebuilt: decision.rebuild,
    }))
}

/// URL of `output` under `base`, when the output lives below the served root.
pub fn output_url(base: &str, root: &Path, output: &Path) -> Option<String> {
    let rel = output.strip_prefix(root).ok()?;
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Some(format!("{}/{}", base.trim_end_matches('/'), rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Workspace, rel_paths};
    use chrono::TimeZone;

    const FUTURE: u64 = 4_000_000_000;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 9, 30, 0)
            .unwrap()
    }

    fn run(ws: &Workspace, options: &BuildOptions) -> BuildSummary {
        let model = config::load(&ws.path("talk.rconf")).unwrap();
        build_model(&model, options, now())
    }

    fn outputs(ws: &Workspace, summary: &BuildSummary) -> Vec<String> {
        rel_paths(ws.root(), summary.reports.iter().map(|r| r.output.clone()))
    }

    /// Three slides matched by one glob, plus a template.
    fn deck() -> Workspace {
        let ws = Workspace::new();
        ws.write(
            "talk.rconf",
            "param title Deck\ntemplate base.html\nrule { input: \"slides/*.md\"; param title Slides; }",
        );
        ws.write("base.html", "<h1>{{ title }}</h1>{{ content }}");
        ws.write("slides/b.md", "B");
        ws.write("slides/a.md", "A");
        ws.write("slides/c.md", "C");
        ws
    }

    fn age_sources(ws: &Workspace) {
        for f in ["talk.rconf", "base.html", "slides/a.md", "slides/b.md", "slides/c.md"] {
            ws.set_mtime(f, 50);
        }
    }

    #[test]
    fn builds_every_match_in_lexical_order() {
        let ws = deck();
        let summary = run(&ws, &BuildOptions::default());
        assert!(summary.is_success());
        assert_eq!(
            outputs(&ws, &summary),
            vec!["slides/a.html", "slides/b.html", "slides/c.html"]
        );
        assert!(summary.reports.iter().all(|r| r.rebuilt));
        assert_eq!(ws.read("slides/a.html"), "<h1>Slides</h1>A");
    }

    #[test]
    fn fresh_outputs_are_skipped() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        age_sources(&ws);
        ws.set_mtime("slides/b.html", 100);
        let before = ws.mtime("slides/b.html");

        let summary = run(&ws, &BuildOptions::default());
        assert!(summary.reports.is_empty());
        assert_eq!(ws.mtime("slides/b.html"), before);
    }

    #[test]
    fn report_all_lists_fresh_outputs() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        age_sources(&ws);

        let options = BuildOptions {
            report_all: true,
            ..Default::default()
        };
        let summary = run(&ws, &options);
        assert_eq!(summary.reports.len(), 3);
        assert_eq!(summary.rebuilt(), 0);
        assert_eq!(summary.fresh(), 3);
    }

    #[test]
    fn touching_config_rebuilds_everything() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        age_sources(&ws);
        ws.set_mtime("talk.rconf", FUTURE);

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(summary.rebuilt(), 3);
    }

    #[test]
    fn touching_one_input_rebuilds_only_it() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        age_sources(&ws);
        ws.write("slides/b.md", "B2");
        ws.set_mtime("slides/b.md", FUTURE);

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(outputs(&ws, &summary), vec!["slides/b.html"]);
        assert_eq!(ws.read("slides/b.html"), "<h1>Slides</h1>B2");
    }

    #[test]
    fn force_rebuilds_fresh_outputs() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        age_sources(&ws);

        let options = BuildOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(run(&ws, &options).rebuilt(), 3);
    }

    #[test]
    fn output_directory_collects_pages() {
        let ws = Workspace::new();
        ws.mkdir("site");
        ws.write(
            "talk.rconf",
            "template base.html\nrule { input: \"src/**/*.md\"; output: site; }",
        );
        ws.write("base.html", "{{ content }}");
        ws.write("src/one.md", "1");
        ws.write("src/deep/two.md", "2");

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(outputs(&ws, &summary), vec!["site/two.html", "site/one.html"]);
        assert_eq!(ws.read("site/one.html"), "1");
    }

    #[test]
    fn explicit_output_file_is_written() {
        let ws = Workspace::new();
        ws.write(
            "talk.rconf",
            "rule { input: intro.md; output: public/index.html; template: base.html }",
        );
        ws.write("base.html", "[{{ content }}]");
        ws.write("intro.md", "hi");

        let summary = run(&ws, &BuildOptions::default());
        assert!(summary.is_success());
        assert_eq!(ws.read("public/index.html"), "[hi]");
    }

    #[test]
    fn missing_template_fails_only_that_rule() {
        let ws = Workspace::new();
        ws.write(
            "talk.rconf",
            "rule { input: a.md }\nrule { input: b.md; template: base.html }",
        );
        ws.write("base.html", "{{ content }}");
        ws.write("a.md", "a");
        ws.write("b.md", "b");

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(outputs(&ws, &summary), vec!["b.html"]);
        assert_eq!(summary.failures.len(), 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.rule, 0);
        assert!(failure.input.is_none());
        assert!(matches!(
            failure.error,
            BuildError::Param {
                source: ParamError::Missing(ref name),
                ..
            } if name == "template"
        ));
        assert!(!ws.exists("a.html"));
    }

    #[test]
    fn broken_template_fails_only_its_files() {
        let ws = Workspace::new();
        ws.write(
            "talk.rconf",
            "rule { input: a.md; template: broken.html }\nrule { input: b.md; template: good.html }",
        );
        ws.write("broken.html", "{% for %}");
        ws.write("good.html", "<p>{{ content }}</p>");
        ws.write("a.md", "a");
        ws.write("b.md", "b");

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(outputs(&ws, &summary), vec!["b.html"]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].input, Some(ws.path("a.md")));
        assert!(matches!(summary.failures[0].error, BuildError::Render(_)));
        assert!(!summary.failures[0].error.is_fatal());
        assert_eq!(ws.read("b.html"), "<p>b</p>");
    }

    #[test]
    fn render_error_skips_file_not_rule() {
        let ws = deck();
        ws.write("slides/b.md", "{{ undefined_thing }}");

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(outputs(&ws, &summary), vec!["slides/a.html", "slides/c.html"]);
        assert_eq!(summary.failures[0].input, Some(ws.path("slides/b.md")));
    }

    #[test]
    fn vanished_template_is_named_in_failure() {
        let ws = deck();
        run(&ws, &BuildOptions::default());
        fs::remove_file(ws.path("base.html")).unwrap();

        let summary = run(&ws, &BuildOptions::default());
        assert_eq!(summary.failures.len(), 3);
        for failure in &summary.failures {
            match &failure.error {
                BuildError::Io { path, source } => {
                    assert_eq!(path, &ws.path("base.html"));
                    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(summary.failures[0].error.to_string().contains("base.html"));
    }

    #[test]
    fn empty_glob_contributes_nothing() {
        let ws = Workspace::new();
        ws.write("talk.rconf", "template base.html\nrule { input: \"*.md\" }");
        ws.write("base.html", "{{ content }}");
        let summary = run(&ws, &BuildOptions::default());
        assert!(summary.reports.is_empty());
        assert!(summary.is_success());
    }

    #[test]
    fn output_over_input_is_refused() {
        let ws = Workspace::new();
        ws.write("talk.rconf", "template base.html\nrule { input: page.html }");
        ws.write("base.html", "{{ content }}");
        ws.write("page.html", "source");

        let summary = run(&ws, &BuildOptions::default());
        assert!(matches!(summary.failures[0].error, BuildError::OutputIsInput(_)));
        assert_eq!(ws.read("page.html"), "source");
    }

    #[test]
    fn reports_carry_urls_in_serve_mode() {
        let ws = deck();
        let options = BuildOptions {
            base_url: Some("http://127.0.0.1:9090/".to_string()),
            ..Default::default()
        };
        let summary = run(&ws, &options);
        assert_eq!(
            summary.reports[0].url.as_deref(),
            Some("http://127.0.0.1:9090/slides/a.html")
        );
        assert_eq!(summary.reports[0].identity(), "http://127.0.0.1:9090/slides/a.html");
    }

    #[test]
    fn url_is_none_outside_root() {
        assert_eq!(
            output_url("http://x", Path::new("/talks"), Path::new("/elsewhere/a.html")),
            None
        );
    }

    #[test]
    fn build_fails_on_invalid_config() {
        let ws = Workspace::new();
        ws.write("talk.rconf", "rule {");
        let err = build(&ws.path("talk.rconf"), &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(BuildError::from(err).is_fatal());
    }
}
