//! Change detection for serve mode.
//!
//! A [`WatchPlan`] lists everything a build pass reads: the rconf file, the
//! templates in use and every matched input. On top of that it keeps each
//! rule's [`RuleMatcher`] so a file created after the plan was made still
//! triggers a rebuild when it matches a rule.
//!
//! The plan is turned into directory watches:
//!
//! | Source             | Watched directory  | Mode         |
//! |--------------------|--------------------|--------------|
//! | watched file       | its parent         | non-recursive|
//! | glob input         | the literal base   | recursive    |
//!
//! Watching directories rather than files keeps editors that save through a
//! rename (write temp file, move over original) working.
//!
//! [`watch_loop`] owns the notify channel. Events arriving within the
//! debounce window of each other collapse into one rebuild, and the plan is
//! recomputed after every pass so added templates and inputs are picked up.

use crate::builder::{BuildOptions, BuildSummary, build};
use crate::config::{self, ConfigError, RConf, TEMPLATE_PARAM};
use crate::params::get_named_param;
use crate::scan::RuleMatcher;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),
}

/// What to watch for one model.
#[derive(Debug, Clone, Default)]
pub struct WatchPlan {
    pub files: BTreeSet<PathBuf>,
    pub matchers: Vec<RuleMatcher>,
}

impl WatchPlan {
    pub fn for_model(model: &RConf) -> Self {
        let dir = model.dir();
        let mut plan = WatchPlan::default();
        plan.files.insert(model.path.clone());

        if let Ok(template) = get_named_param(model, TEMPLATE_PARAM) {
            plan.files.insert(dir.join(template));
        }

        for rule in model.rules() {
            if let Ok(template) = get_named_param(&rule, TEMPLATE_PARAM) {
                plan.files.insert(dir.join(template));
            }
            let matcher = match RuleMatcher::new(&rule.input, dir) {
                Ok(m) => m,
                Err(e) => {
                    warn!(rule = rule.line, "cannot watch input: {e}");
                    continue;
                }
            };
            match matcher.files() {
                Ok(files) => plan.files.extend(files),
                Err(e) => warn!(rule = rule.line, "cannot list inputs: {e}"),
            }
            plan.matchers.push(matcher);
        }
        plan
    }

    /// Whether a change to `path` can affect the next build.
    pub fn is_relevant(&self, path: &Path) -> bool {
        self.files.contains(path) || self.matchers.iter().any(|m| m.is_match(path))
    }

    /// Directories to watch, `true` meaning recursive.
    pub fn directories(&self) -> BTreeMap<PathBuf, bool> {
        let mut dirs = BTreeMap::new();
        for file in &self.files {
            if let Some(parent) = file.parent() {
                dirs.entry(parent.to_path_buf()).or_insert(false);
            }
        }
        for matcher in self.matchers.iter().filter(|m| m.is_glob()) {
            dirs.insert(matcher.base().to_path_buf(), true);
        }
        dirs.retain(|dir, _| dir.is_dir());
        dirs
    }
}

/// Every file a build of `config_path` currently depends on.
pub fn watched_paths(config_path: &Path) -> Result<BTreeSet<PathBuf>, ConfigError> {
    let model = config::load(config_path)?;
    Ok(WatchPlan::for_model(&model).files)
}

/// Bring the watcher's directories in line with `wanted`.
fn sync_watches(
    watcher: &mut impl Watcher,
    current: &mut BTreeMap<PathBuf, bool>,
    wanted: BTreeMap<PathBuf, bool>,
) {
    for (dir, recursive) in current.iter() {
        if wanted.get(dir) != Some(recursive) {
            let _ = watcher.unwatch(dir);
        }
    }
    for (dir, recursive) in &wanted {
        if current.get(dir) == Some(recursive) {
            continue;
        }
        let mode = if *recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        match watcher.watch(dir, mode) {
            Ok(()) => debug!(dir = %dir.display(), recursive, "watching"),
            Err(e) => warn!(dir = %dir.display(), "cannot watch: {e}"),
        }
    }
    *current = wanted;
}

fn touches_plan(event: &Event, plan: &WatchPlan) -> bool {
    !matches!(event.kind, EventKind::Access(_)) && event.paths.iter().any(|p| plan.is_relevant(p))
}

/// Watch everything `config_path` depends on and rebuild on change.
///
/// `on_build` receives each finished pass. A pass that cannot load the rconf
/// file is skipped with a warning and the previous watch set stays in place.
/// Runs until the watcher channel closes.
pub fn watch_loop(
    config_path: &Path,
    options: &BuildOptions,
    debounce: Duration,
    mut on_build: impl FnMut(&BuildSummary),
) -> Result<(), WatchError> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(tx)?;

    let mut plan = WatchPlan::for_model(&config::load(config_path)?);
    let mut watching = BTreeMap::new();
    sync_watches(&mut watcher, &mut watching, plan.directories());
    info!(files = plan.files.len(), "watching for changes");

    loop {
        let event = match rx.recv() {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                warn!("watch error: {e}");
                continue;
            }
            Err(_) => return Ok(()),
        };
        if !touches_plan(&event, &plan) {
            continue;
        }
        debug!(paths = ?event.paths, "change detected");

        loop {
            match rx.recv_timeout(debounce) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        match build(config_path, options) {
            Ok(summary) => on_build(&summary),
            Err(e) => {
                warn!("rebuild skipped: {e}");
                continue;
            }
        }

        match config::load(config_path) {
            Ok(model) => {
                plan = WatchPlan::for_model(&model);
                sync_watches(&mut watcher, &mut watching, plan.directories());
            }
            Err(e) => warn!("keeping previous watch set: {e}"),
        }
    }
}
