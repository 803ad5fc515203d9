//! Deciding whether an output must be regenerated.
//!
//! An output depends on three files: its input, its page template and the
//! rconf file. It is fresh only if it is strictly newer than all three, so an
//! edit to any of them (a typo fixed in the template, a parameter changed in
//! the rconf) invalidates it. A missing output is always stale, and `--force`
//! makes everything stale.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// A file whose modification time could not be read.
#[derive(Error, Debug)]
#[error("cannot stat {path}: {source}")]
pub struct StalenessError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Modification times compared for one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    /// `None` when the output does not exist yet.
    pub output: Option<SystemTime>,
    pub input: SystemTime,
    pub template: SystemTime,
    pub config: SystemTime,
}

/// The outcome of a staleness check together with the times it was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildDecision {
    pub rebuild: bool,
    pub timestamps: Option<Timestamps>,
}

impl BuildDecision {
    fn unconditional() -> Self {
        Self {
            rebuild: true,
            timestamps: None,
        }
    }

    /// Pure decision over already collected timestamps.
    pub fn evaluate(timestamps: Timestamps, force: bool) -> Self {
        let rebuild = force
            || match timestamps.output {
                None => true,
                Some(out) => {
                    !(out > timestamps.config && out > timestamps.input && out > timestamps.template)
                }
            };
        Self {
            rebuild,
            timestamps: Some(timestamps),
        }
    }
}

fn mtime(path: &Path) -> Result<SystemTime, StalenessError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| StalenessError {
            path: path.to_path_buf(),
            source,
        })
}

/// Stat the output and its dependencies and decide.
///
/// Fails with the offending path when a file cannot be stat'ed. With
/// `force`, or when the output does not exist, nothing else is looked at.
pub fn needs_rebuild(
    output: &Path,
    input: &Path,
    template: &Path,
    config: &Path,
    force: bool,
) -> Result<BuildDecision, StalenessError> {
    if force {
        return Ok(BuildDecision::unconditional());
    }
    let output = match mtime(output) {
        Ok(time) => Some(time),
        Err(e) if e.source.kind() == io::ErrorKind::NotFound => {
            return Ok(BuildDecision::unconditional());
        }
        Err(e) => return Err(e),
    };
    let timestamps = Timestamps {
        output,
        input: mtime(input)?,
        template: mtime(template)?,
        config: mtime(config)?,
    };
    Ok(BuildDecision::evaluate(timestamps, false))
}
