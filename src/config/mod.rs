//! The rconf rule file.
//!
//! An rconf file declares global parameters, an optional global page template
//! and one or more rules. Each rule maps an input glob to output files:
//!
//! ```text
//! param title "Rust for beginners"
//! template base.html
//!
//! rule {
//!     input: "slides/*.md";
//!     output: build;             # must be an existing directory for globs
//!     param theme dark;
//! }
//!
//! rule {
//!     input: intro.md;
//!     template: intro.html;      # overrides the global template
//! }
//! ```
//!
//! All paths are relative to the directory containing the rconf file.
//! `template` is sugar for a parameter named `template`, so a rule-level
//! template and a rule-level `param template ...` are the same thing.
//!
//! Loading is parse → validate. A model that loaded successfully satisfies
//! the glob/output invariant: a rule whose input has wildcards either has no
//! output or an output that is an existing directory.

pub mod parser;

use crate::params::ParamScope;
use crate::scan::{self, RuleMatcher};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use parser::ParseError;

/// Name of the parameter holding the page template path.
pub const TEMPLATE_PARAM: &str = "template";

/// Extension of rule files. Appended to CLI arguments that lack it.
pub const RCONF_EXTENSION: &str = "rconf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}:{column}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// A `name value` pair, either global or local to a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One `rule { ... }` block.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Input file or glob pattern, relative to the rconf directory.
    pub input: String,
    /// Output file, or output directory for glob inputs.
    pub output: Option<String>,
    /// Rule-local parameters in declaration order.
    pub params: Vec<Param>,
    /// Line of the `rule` keyword, for diagnostics.
    pub line: usize,
}

impl Rule {
    pub fn is_glob(&self) -> bool {
        scan::is_glob_pattern(&self.input)
    }

    /// The declared output resolved against the rconf directory.
    pub fn output_path(&self, config_dir: &Path) -> Option<PathBuf> {
        self.output.as_ref().map(|o| config_dir.join(o))
    }
}

/// A loaded rconf file.
#[derive(Debug, Clone)]
pub struct RConf {
    /// Absolute path of the rconf file.
    pub path: PathBuf,
    /// Global parameters in declaration order.
    pub params: Vec<Param>,
    /// Rules in declaration order.
    pub rules: Vec<Rule>,
}

impl RConf {
    /// Parse rconf source. `path` is used for diagnostics and as the base for
    /// relative paths; it is not read.
    pub fn parse(path: &Path, source: &str) -> Result<Self, ConfigError> {
        let doc = parser::parse(source).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            line: e.line,
            column: e.column,
            message: e.message,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            params: doc.params,
            rules: doc.rules,
        })
    }

    /// Directory the rconf file lives in. Everything is resolved against it.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Rules paired with their parent model, in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = RuleRef<'_>> {
        self.rules
            .iter()
            .enumerate()
            .map(move |(index, rule)| RuleRef {
                model: self,
                rule,
                index,
            })
    }

    /// Check semantic rules that the grammar cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dir = self.dir();
        for rule in &self.rules {
            RuleMatcher::new(&rule.input, dir).map_err(|e| {
                ConfigError::Validation(format!(
                    "rule at line {}: invalid input pattern \"{}\": {e}",
                    rule.line, rule.input
                ))
            })?;

            if rule.is_glob()
                && let Some(output) = rule.output_path(dir)
                && !output.is_dir()
            {
                return Err(ConfigError::Validation(format!(
                    "rule at line {}: output \"{}\" must be an existing directory for glob input \"{}\"",
                    rule.line,
                    rule.output.as_deref().unwrap_or_default(),
                    rule.input
                )));
            }
        }
        Ok(())
    }
}

/// A rule together with the model it belongs to.
///
/// The model link is only used for parameter fallback.
#[derive(Debug, Clone, Copy)]
pub struct RuleRef<'a> {
    pub model: &'a RConf,
    pub rule: &'a Rule,
    /// Position of the rule in the file, zero based.
    pub index: usize,
}

impl Deref for RuleRef<'_> {
    type Target = Rule;

    fn deref(&self) -> &Rule {
        self.rule
    }
}

impl ParamScope for RConf {
    fn params(&self) -> &[Param] {
        &self.params
    }

    fn parent(&self) -> Option<&dyn ParamScope> {
        None
    }
}

impl ParamScope for RuleRef<'_> {
    fn params(&self) -> &[Param] {
        &self.rule.params
    }

    fn parent(&self) -> Option<&dyn ParamScope> {
        Some(self.model)
    }
}

/// Append `.rconf` unless the argument already ends with it.
pub fn normalize_config_path(arg: &Path) -> PathBuf {
    let has_extension = arg
        .extension()
        .is_some_and(|ext| ext == RCONF_EXTENSION);
    if has_extension {
        arg.to_path_buf()
    } else {
        let mut s = arg.as_os_str().to_owned();
        s.push(".");
        s.push(RCONF_EXTENSION);
        PathBuf::from(s)
    }
}

/// Read, parse and validate an rconf file.
pub fn load(path: &Path) -> Result<RConf, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let path = std::path::absolute(path).map_err(io_err)?;
    let source = fs::read_to_string(&path).map_err(io_err)?;
    let model = RConf::parse(&path, &source)?;
    model.validate()?;
    Ok(model)
}
