//! Parameter resolution.
//!
//! Parameters live in two scopes: global (the rconf file) and local (a rule).
//! Within a scope, later declarations override earlier ones with the same
//! name. Across scopes, the rule wins.

use crate::config::{Param, RConf, RuleRef};
use std::collections::BTreeMap;
use thiserror::Error;

/// Flat name → value mapping handed to the template engine.
pub type Params = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("\"{0}\" parameter is not defined")]
    Missing(String),
}

/// Something that declares parameters and may fall back to a parent scope.
pub trait ParamScope {
    fn params(&self) -> &[Param];
    fn parent(&self) -> Option<&dyn ParamScope>;
}

fn overlay(target: &mut Params, params: &[Param]) {
    for p in params {
        target.insert(p.name.clone(), p.value.clone());
    }
}

/// Merge global and rule parameters, rule parameters taking precedence.
pub fn resolve_params(model: &RConf, rule: &RuleRef<'_>) -> Params {
    let mut params = Params::new();
    overlay(&mut params, &model.params);
    overlay(&mut params, &rule.rule.params);
    params
}

/// Look up a required parameter, searching the scope first and then its parent.
///
/// The last declaration wins inside a scope, matching [`resolve_params`].
pub fn get_named_param<'a>(scope: &'a dyn ParamScope, name: &str) -> Result<&'a str, ParamError> {
    let mut current = Some(scope);
    while let Some(s) = current {
        if let Some(p) = s.params().iter().rev().find(|p| p.name == name) {
            return Ok(&p.value);
        }
        current = s.parent();
    }
    Err(ParamError::Missing(name.to_string()))
}
