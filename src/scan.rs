//! Input discovery and output naming.
//!
//! A rule's `input` is a path or a glob relative to the rconf directory.
//! Expansion walks the directory tree below the pattern's literal prefix and
//! matches what remains of the pattern against each file:
//!
//! ```text
//! pattern   slides/**/*.md
//! base      <rconf dir>/slides        walked with walkdir
//! remainder **/*.md                   matched with globset
//! ```
//!
//! `*` stays inside one path component, `**` spans any number of them.
//! Results are sorted by path component, comparing each component as a
//! string (`Path` ordering), so that two builds over the same tree report and
//! write files in the same order. A directory's files therefore come before
//! those of a sibling whose name extends it: `a/x.md` sorts before
//! `a-b/x.md`, although `-` sorts before `/` in a plain string comparison.
//!
//! ## Output Naming
//!
//! | rule output          | output path                          |
//! |----------------------|--------------------------------------|
//! | none                 | next to the input, `<stem>.html`     |
//! | existing directory   | `<output>/<stem>.html`               |
//! | anything else        | the output path itself               |

use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extension of generated files.
pub const OUTPUT_EXTENSION: &str = "html";

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error("cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Whether a pattern contains wildcard characters.
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(GLOB_CHARS)
}

/// Drop `.` components so joined paths stay tidy (`dir/./a.md` → `dir/a.md`).
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// A compiled rule input: the literal directory to walk plus the glob that
/// files below it must match.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    base: PathBuf,
    matcher: Option<GlobMatcher>,
}

impl RuleMatcher {
    /// Compile `pattern`, resolving it against `config_dir`.
    pub fn new(pattern: &str, config_dir: &Path) -> Result<Self, ScanError> {
        let full = normalize(&config_dir.join(pattern));
        if !is_glob_pattern(pattern) {
            return Ok(Self {
                base: full,
                matcher: None,
            });
        }

        let mut base = PathBuf::new();
        let mut rest: Vec<String> = Vec::new();
        for component in full.components() {
            let part = component.as_os_str().to_string_lossy();
            if rest.is_empty() && !is_glob_pattern(&part) {
                base.push(component);
            } else {
                rest.push(part.into_owned());
            }
        }

        let matcher = GlobBuilder::new(&rest.join("/"))
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self {
            base,
            matcher: Some(matcher),
        })
    }

    /// Directory below which matching files live. For a plain path, the
    /// path itself.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_glob(&self) -> bool {
        self.matcher.is_some()
    }

    /// Whether `path` (absolute) would be selected by this rule.
    pub fn is_match(&self, path: &Path) -> bool {
        let path = normalize(path);
        match &self.matcher {
            None => path == self.base,
            Some(m) => path
                .strip_prefix(&self.base)
                .is_ok_and(|rel| m.is_match(rel)),
        }
    }

    /// All existing files selected by this rule, in component-wise path order.
    pub fn files(&self) -> Result<Vec<PathBuf>, ScanError> {
        let Some(matcher) = &self.matcher else {
            return Ok(if self.base.is_file() {
                vec![self.base.clone()]
            } else {
                Vec::new()
            });
        };
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base).follow_links(true) {
            let entry = entry.map_err(|source| ScanError::Walk {
                path: self.base.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matched = entry
                .path()
                .strip_prefix(&self.base)
                .is_ok_and(|rel| matcher.is_match(rel));
            if matched {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Expand `pattern` relative to `config_dir` into matching files, sorted.
///
/// No match is not an error.
pub fn expand_glob(pattern: &str, config_dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    RuleMatcher::new(pattern, config_dir)?.files()
}

/// Where the generated page for `input` goes.
pub fn compute_output_path(input: &Path, output: Option<&str>, config_dir: &Path) -> PathBuf {
    let file_name = match input.file_stem() {
        Some(stem) => {
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(OUTPUT_EXTENSION);
            name
        }
        None => OUTPUT_EXTENSION.into(),
    };

    match output {
        None => input.with_file_name(file_name),
        Some(output) => {
            let output = normalize(&config_dir.join(output));
            if output.is_dir() {
                output.join(file_name)
            } else {
                output
            }
        }
    }
}
