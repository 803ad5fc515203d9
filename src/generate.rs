//! Two-stage page rendering.
//!
//! Every input file is itself a template. A page is produced in two passes
//! over the same parameter set:
//!
//! ```text
//! 1. input.md   + params { content = "{{content}}" }  →  body
//! 2. page.html  + params { content = body }            →  output
//! ```
//!
//! In the first pass `content` is bound to the literal text `{{content}}`.
//! remark.js uses that marker in slide sources to mean "insert the previous
//! slide's content here", so it must come out of the first pass unchanged.
//! The page template of the second pass then places the body wherever it
//! writes `{{ content }}`. The body is inserted as a value and never
//! re-rendered, so markers in it survive into the final HTML.
//!
//! Both passes also see `now`, the build time as an RFC 3339 string.
//!
//! ## Template Engine
//!
//! Templates are rendered with [Tera](https://keats.github.io/tera/), whose
//! syntax follows Jinja2. Auto-escaping is off: slide sources and parameters
//! are trusted, and the body must reach the page verbatim. Undefined
//! variables are errors.
//!
//! Template names are paths relative to the rconf directory, so
//! `{% extends "layouts/base.html" %}` and `{% include "partials/footer.md" %}`
//! resolve the same way rule paths do. Referenced templates are loaded on
//! demand the first time a file that mentions them is rendered.
//!
//! ## Filters
//!
//! - `dtformat(format="%d.%m.%Y")`: format a timestamp such as `now`
//!   (default pattern from `render.date_format` in `remarkc.toml`)
//! - `markdown`: convert a markdown string to HTML

use crate::params::Params;
use crate::settings::RenderSettings;
use chrono::{DateTime, FixedOffset};
use pulldown_cmark::{Options, Parser, html as md_html};
use regex::Regex;
use std::collections::HashMap;
use std::error::Error as _;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tera::{Tera, Value};
use thiserror::Error;

/// Parameter that carries the rendered body into the page template.
pub const CONTENT_PARAM: &str = "content";
/// Value of `content` during the first pass.
pub const CONTENT_PLACEHOLDER: &str = "{{content}}";
/// Parameter that carries the build time.
pub const NOW_PARAM: &str = "now";

static TEMPLATE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*(?:extends|include|import)\s+["']([^"']+)["']"#)
        .expect("template reference pattern is valid")
});

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {message}")]
    Template { path: PathBuf, message: String },
}

impl RenderError {
    /// The file the error is about.
    pub fn path(&self) -> &Path {
        match self {
            RenderError::Io { path, .. } | RenderError::Template { path, .. } => path,
        }
    }
}

/// Flatten a Tera error and its causes into one line.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    message
}

/// Names of templates referenced by `extends`, `include` or `import`.
fn template_references(source: &str) -> Vec<String> {
    TEMPLATE_REFERENCE
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// A Tera instance with this crate's settings and filters.
fn engine(date_format: &str) -> Tera {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);

    let default_format = date_format.to_string();
    tera.register_filter(
        "dtformat",
        move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
            let format = args
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or(default_format.as_str());
            dtformat(value, format)
        },
    );
    tera.register_filter(
        "markdown",
        |value: &Value, _: &HashMap<String, Value>| -> tera::Result<Value> {
            let text = value
                .as_str()
                .ok_or_else(|| tera::Error::msg("markdown filter expects a string"))?;
            Ok(Value::String(markdown_to_html(text)))
        },
    );
    tera
}

/// Template engine state for one build pass.
///
/// Created fresh for every pass so that template edits between passes are
/// always picked up and nothing leaks from one build into the next.
pub struct RenderContext {
    tera: Tera,
    root: PathBuf,
    now: DateTime<FixedOffset>,
    date_format: String,
    /// Sources of every template loaded so far, by name.
    loaded: HashMap<String, String>,
}

impl RenderContext {
    /// `root` is the directory template names are relative to.
    pub fn new(root: &Path, now: DateTime<FixedOffset>, settings: &RenderSettings) -> Self {
        Self {
            tera: engine(&settings.date_format),
            root: root.to_path_buf(),
            now,
            date_format: settings.date_format.clone(),
            loaded: HashMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    fn template_name(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    /// Load `path` and everything it references that is not loaded yet.
    ///
    /// References to files that do not exist are left for Tera to report.
    fn load(&mut self, path: &Path) -> Result<String, RenderError> {
        let name = self.template_name(path);
        if self.loaded.contains_key(&name) {
            return Ok(name);
        }

        let mut batch: Vec<(String, String)> = Vec::new();
        let mut pending = vec![(name.clone(), path.to_path_buf(), true)];
        while let Some((pending_name, pending_path, required)) = pending.pop() {
            if self.loaded.contains_key(&pending_name)
                || batch.iter().any(|(n, _)| *n == pending_name)
            {
                continue;
            }
            let source = match fs::read_to_string(&pending_path) {
                Ok(source) => source,
                Err(_) if !required => continue,
                Err(source) => {
                    return Err(RenderError::Io {
                        path: pending_path,
                        source,
                    });
                }
            };
            for reference in template_references(&source) {
                let reference_path = self.root.join(&reference);
                pending.push((reference, reference_path, false));
            }
            batch.push((pending_name, source));
        }

        if let Err(e) = self
            .tera
            .add_raw_templates(batch.iter().map(|(n, s)| (n.as_str(), s.as_str())))
        {
            // Tera keeps whatever it parsed before failing, and a template
            // with a missing parent breaks every later load. Start over from
            // the templates that are known to be good.
            self.reset();
            return Err(RenderError::Template {
                path: path.to_path_buf(),
                message: describe(&e),
            });
        }
        self.loaded.extend(batch);
        Ok(name)
    }

    fn reset(&mut self) {
        self.tera = engine(&self.date_format);
        if let Err(e) = self
            .tera
            .add_raw_templates(self.loaded.iter().map(|(n, s)| (n.as_str(), s.as_str())))
        {
            tracing::warn!("reloading templates failed: {}", describe(&e));
            self.tera = engine(&self.date_format);
            self.loaded.clear();
        }
    }

    /// Render one file against `context`.
    pub fn render_file(
        &mut self,
        path: &Path,
        context: &tera::Context,
    ) -> Result<String, RenderError> {
        let name = self.load(path)?;
        self.tera
            .render(&name, context)
            .map_err(|e| RenderError::Template {
                path: path.to_path_buf(),
                message: describe(&e),
            })
    }

    /// Render `input` through the page `template`.
    pub fn render_page(
        &mut self,
        input: &Path,
        template: &Path,
        params: &Params,
    ) -> Result<String, RenderError> {
        let mut context = tera::Context::new();
        for (name, value) in params {
            context.insert(name.as_str(), value);
        }
        context.insert(NOW_PARAM, &self.now.to_rfc3339());

        context.insert(CONTENT_PARAM, CONTENT_PLACEHOLDER);
        let body = self.render_file(input, &context)?;

        context.insert(CONTENT_PARAM, &body);
        self.render_file(template, &context)
    }
}

fn dtformat(value: &Value, format: &str) -> tera::Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("dtformat filter expects a timestamp string"))?;
    let timestamp = DateTime::parse_from_rfc3339(text)
        .map_err(|e| tera::Error::msg(format!("dtformat: cannot parse \"{text}\": {e}")))?;
    let mut out = String::new();
    write!(out, "{}", timestamp.format(format))
        .map_err(|_| tera::Error::msg(format!("dtformat: invalid format \"{format}\"")))?;
    Ok(Value::String(out))
}

/// Markdown to HTML with the common extensions enabled.
pub fn markdown_to_html(text: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_TASKLISTS;
    let mut html = String::new();
    md_html::push_html(&mut html, Parser::new_ext(text, options));
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Workspace;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 9, 30, 0)
            .unwrap()
    }

    fn context(ws: &Workspace) -> RenderContext {
        RenderContext::new(ws.root(), fixed_now(), &RenderSettings::default())
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_input_then_template() {
        let ws = Workspace::new();
        ws.write("intro.md", "# {{ title }}");
        ws.write("base.html", "<title>{{ title }}</title><textarea>{{ content }}</textarea>");
        let html = context(&ws)
            .render_page(
                &ws.path("intro.md"),
                &ws.path("base.html"),
                &params(&[("title", "Intro")]),
            )
            .unwrap();
        assert_eq!(html, "<title>Intro</title><textarea># Intro</textarea>");
    }

    #[test]
    fn content_marker_in_input_survives() {
        let ws = Workspace::new();
        ws.write("s.md", "first\n---\n{{content}}\nsecond");
        ws.write("base.html", "<body>{{ content }}</body>");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        assert_eq!(html, "<body>first\n---\n{{content}}\nsecond</body>");
    }

    #[test]
    fn content_param_from_config_is_overridden() {
        let ws = Workspace::new();
        ws.write("s.md", "[{{ content }}]");
        ws.write("base.html", "{{ content }}");
        let html = context(&ws)
            .render_page(
                &ws.path("s.md"),
                &ws.path("base.html"),
                &params(&[("content", "from config")]),
            )
            .unwrap();
        assert_eq!(html, "[{{content}}]");
    }

    #[test]
    fn output_is_not_escaped() {
        let ws = Workspace::new();
        ws.write("s.md", "<em>{{ who }}</em>");
        ws.write("base.html", "{{ content }}|{{ who }}");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &params(&[("who", "<b>me</b>")]))
            .unwrap();
        assert_eq!(html, "<em><b>me</b></em>|<b>me</b>");
    }

    #[test]
    fn now_is_available_in_both_passes() {
        let ws = Workspace::new();
        ws.write("s.md", "{{ now | dtformat(format=\"%Y\") }}");
        ws.write("base.html", "{{ content }} {{ now | dtformat }}");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        assert_eq!(html, "2024 2024-03-01 09:30");
    }

    #[test]
    fn dtformat_default_comes_from_settings() {
        let ws = Workspace::new();
        ws.write("s.md", "{{ now | dtformat }}");
        ws.write("base.html", "{{ content }}");
        let settings = RenderSettings {
            date_format: "%d.%m.%Y".to_string(),
        };
        let mut ctx = RenderContext::new(ws.root(), fixed_now(), &settings);
        let html = ctx
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        assert_eq!(html, "01.03.2024");
    }

    #[test]
    fn markdown_filter_renders_html() {
        let ws = Workspace::new();
        ws.write("s.md", "{{ note | markdown }}");
        ws.write("base.html", "{{ content }}");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &params(&[("note", "**hi**")]))
            .unwrap();
        assert_eq!(html.trim(), "<p><strong>hi</strong></p>");
    }

    #[test]
    fn template_can_extend_a_layout() {
        let ws = Workspace::new();
        ws.write("layouts/base.html", "<html>{% block body %}{% endblock body %}</html>");
        ws.write(
            "deck.html",
            "{% extends \"layouts/base.html\" %}{% block body %}{{ content }}{% endblock body %}",
        );
        ws.write("s.md", "slides");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("deck.html"), &Params::new())
            .unwrap();
        assert_eq!(html, "<html>slides</html>");
    }

    #[test]
    fn input_can_include_partials() {
        let ws = Workspace::new();
        ws.write("partials/footer.md", "-- {{ author }}");
        ws.write("s.md", "body\n{% include \"partials/footer.md\" %}");
        ws.write("base.html", "{{ content }}");
        let html = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &params(&[("author", "Igor")]))
            .unwrap();
        assert_eq!(html, "body\n-- Igor");
    }

    #[test]
    fn undefined_variable_is_error_for_that_file() {
        let ws = Workspace::new();
        ws.write("s.md", "{{ missing }}");
        ws.write("base.html", "{{ content }}");
        let err = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
        assert_eq!(err.path(), ws.path("s.md"));
    }

    #[test]
    fn template_syntax_error_names_template() {
        let ws = Workspace::new();
        ws.write("s.md", "ok");
        ws.write("base.html", "{% if %}");
        let err = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
        assert_eq!(err.path(), ws.path("base.html"));
    }

    #[test]
    fn missing_template_is_io_error() {
        let ws = Workspace::new();
        ws.write("s.md", "ok");
        let err = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("nope.html"), &Params::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::Io { .. }));
        assert_eq!(err.path(), ws.path("nope.html"));
    }

    #[test]
    fn missing_layout_is_template_error() {
        let ws = Workspace::new();
        ws.write("s.md", "ok");
        ws.write("deck.html", "{% extends \"gone.html\" %}");
        let err = context(&ws)
            .render_page(&ws.path("s.md"), &ws.path("deck.html"), &Params::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
    }

    #[test]
    fn broken_template_does_not_affect_later_renders() {
        let ws = Workspace::new();
        ws.write("s.md", "ok");
        ws.write("deck.html", "{% extends \"gone.html\" %}");
        ws.write("base.html", "[{{ content }}]");
        let mut ctx = context(&ws);
        assert!(
            ctx.render_page(&ws.path("s.md"), &ws.path("deck.html"), &Params::new())
                .is_err()
        );
        let html = ctx
            .render_page(&ws.path("s.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        assert_eq!(html, "[ok]");
    }

    #[test]
    fn templates_are_loaded_once_per_pass() {
        let ws = Workspace::new();
        ws.write("a.md", "a");
        ws.write("b.md", "b");
        ws.write("base.html", "[{{ content }}]");
        let mut ctx = context(&ws);
        let a = ctx
            .render_page(&ws.path("a.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        ws.write("base.html", "changed");
        let b = ctx
            .render_page(&ws.path("b.md"), &ws.path("base.html"), &Params::new())
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("[a]", "[b]"));
    }

    #[test]
    fn finds_template_references() {
        let refs = template_references(
            "{% extends \"base.html\" %}{%- include 'p/x.md' %}{% import \"macros.html\" as m %}",
        );
        assert_eq!(refs, vec!["base.html", "p/x.md", "macros.html"]);
    }
}
