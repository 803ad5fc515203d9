//! Types shared between the build, the CLI output and the dev server.

use serde::Serialize;
use std::path::PathBuf;

/// An input file and the output generated from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// One line of build progress: an output that was written, or one that is
/// merely reported because the caller asked for every output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    /// Where the dev server serves the output, in serve mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub rebuilt: bool,
}

impl BuildReport {
    /// The URL if there is one, otherwise the output path.
    pub fn identity(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => self.output.display().to_string(),
        }
    }
}
