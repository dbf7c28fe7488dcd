use crate::errors::PdgResult;
use crate::scope::DefCertainty;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub static DEFAULT_RULES_TOML: &str = include_str!("../../default-rules.toml");

static EMBEDDED: Lazy<Settings> =
    Lazy::new(|| toml::from_str(DEFAULT_RULES_TOML).expect("embedded default rules parse"));

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Alias unbound simple names to `this.` fields.
    pub treat_non_local_as_field: bool,

    /// Leave uppercase-leading names alone when aliasing fields.
    pub treat_field_exclude_uppercase: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            treat_non_local_as_field: true,
            treat_field_exclude_uppercase: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DependenceConfig {
    /// Emit control-dependence edges.
    pub control: bool,

    /// Emit data-dependence edges.
    pub data: bool,

    /// Emit execution (CFG successor) edges.
    pub execution: bool,

    /// Additionally wire the method-enter node to every node.
    pub from_entry_to_all: bool,

    /// Additionally wire the method-enter node to every parameter node.
    pub from_entry_to_parameters: bool,

    /// Let MAY_DEF writes kill reaching definitions.
    pub treat_may_def_as_def: bool,

    /// Let MAY_USE reads receive data edges.
    pub treat_may_use_as_use: bool,
}

impl Default for DependenceConfig {
    fn default() -> Self {
        Self {
            control: true,
            data: true,
            execution: true,
            from_entry_to_all: false,
            from_entry_to_parameters: false,
            treat_may_def_as_def: false,
            treat_may_use_as_use: true,
        }
    }
}

impl DependenceConfig {
    /// Data dependence only: the configuration behind the DDG surface.
    pub fn ddg() -> Self {
        Self {
            control: false,
            execution: false,
            ..Self::default()
        }
    }
}

/// Receiver-mutation grading for method invocations. Exact names win over
/// prefixes; unmatched names grade MAY_DEF.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MethodRules {
    pub no_def_names: Vec<String>,
    pub def_names: Vec<String>,
    pub no_def_prefixes: Vec<String>,
    pub def_prefixes: Vec<String>,
}

impl Default for MethodRules {
    fn default() -> Self {
        Self {
            no_def_names: ["equals", "hashCode", "toString", "isEmpty", "size", "length", "stream"]
                .map(str::to_owned)
                .to_vec(),
            def_names: ["push", "pop", "offer", "poll"].map(str::to_owned).to_vec(),
            no_def_prefixes: ["get", "print", "debug", "trace", "info", "warn", "error"]
                .map(str::to_owned)
                .to_vec(),
            def_prefixes: ["set", "add", "remove", "put", "insert", "contains"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

impl MethodRules {
    pub fn classify(&self, method_name: &str) -> DefCertainty {
        if self.no_def_names.iter().any(|n| n == method_name) {
            return DefCertainty::NoDef;
        }
        if self.def_names.iter().any(|n| n == method_name) {
            return DefCertainty::Def;
        }
        if self
            .no_def_prefixes
            .iter()
            .any(|p| method_name.starts_with(p.as_str()))
        {
            return DefCertainty::NoDef;
        }
        if self
            .def_prefixes
            .iter()
            .any(|p| method_name.starts_with(p.as_str()))
        {
            return DefCertainty::Def;
        }
        DefCertainty::MayDef
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub analysis: AnalysisConfig,
    pub dependence: DependenceConfig,
    pub method_rules: MethodRules,
}

impl Settings {
    /// Built-in defaults, optionally overridden by a user TOML file.
    pub fn load(path: Option<&Path>) -> PdgResult<Self> {
        match path {
            None => Ok(EMBEDDED.clone()),
            Some(p) => {
                let content = fs::read_to_string(p)?;
                let settings: Settings = toml::from_str(&content)?;
                tracing::debug!("loaded settings overrides from {}", p.display());
                Ok(settings)
            }
        }
    }
}
