//! # remark-compose
//!
//! Builds HTML slide decks from Markdown-ish sources. A single rule file
//! (`.rconf`) names the inputs, the template that wraps them and the
//! parameters the template sees; the tool renders every input and writes an
//! HTML page for it, skipping pages whose sources have not changed.
//!
//! ```text
//! # talk.rconf
//! param title "Rust in Practice"
//! template base.html
//!
//! rule {
//!     input: "slides/*.md"
//!     output: public
//!     param theme dark
//! }
//! ```
//!
//! # Architecture: One Pass, Two Stages
//!
//! ```text
//! load     talk.rconf        →  RConf            (parse + validate)
//! resolve  RConf + rule      →  params, inputs   (scope fallback, glob)
//! check    input/template    →  BuildDecision    (mtime comparison)
//! render   input, template   →  HTML             (input as template, then layout)
//! ```
//!
//! Each input is first rendered as a template itself, with `content` bound to
//! the literal text `{{content}}`, so a slide can use parameters and filters.
//! The result becomes `content` for the layout template. A pass walks rules in
//! file order and inputs in lexical order, so output and reports are stable.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | rconf parsing, the rule/param model and its validation |
//! | [`params`] | parameter merging and scoped lookup |
//! | [`scan`] | glob expansion and output naming |
//! | [`staleness`] | rebuild decision from file timestamps |
//! | [`generate`] | Tera environment and the two-stage render |
//! | [`builder`] | one build pass with per-rule and per-file failure isolation |
//! | [`watch`] | dependency tracking and the rebuild-on-change loop |
//! | [`serve`] | development server with live reload |
//! | [`settings`] | `remarkc.toml` tool settings |
//! | [`output`] | CLI output formatting |
//! | [`types`] | small types shared between the above |
//!
//! # Design Decisions
//!
//! ## Timestamps, Not Hashes
//!
//! An output is stale when the input, the template or the rconf file is newer
//! than it. Touching the rconf file therefore rebuilds everything, which is
//! what a parameter change needs. There is no cache directory to go stale.
//!
//! ## Failures Stay Local
//!
//! Only a broken rconf file stops a build. A rule with no template, or a
//! slide that fails to render, is reported and skipped while everything else
//! is still written. This matters most in serve mode, where a half-typed
//! template should not take down the other decks.

pub mod builder;
pub mod config;
pub mod generate;
pub mod output;
pub mod params;
pub mod scan;
pub mod serve;
pub mod settings;
pub mod staleness;
pub mod types;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
