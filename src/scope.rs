use std::collections::{BTreeSet, HashMap};

use crate::element::{PeId, PeKind, PeStore};

/// Certainty grades attached to variable writes. The order is load-bearing:
/// reaching-definition kills and the JSON line filters compare grades
/// numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefCertainty {
    Unknown,
    NoDef,
    MayDef,
    Def,
    Declare,
    DeclareAndDef,
}

/// Certainty grades attached to variable reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UseCertainty {
    Unknown,
    NoUse,
    MayUse,
    Use,
}

/// A named variable together with every textual alias it may be referenced
/// under (e.g. `{source, this.source}` for a field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub main_name: String,
    pub aliases: BTreeSet<String>,
    pub scope: Option<PeId>,
}

impl Var {
    pub fn simple(name: &str) -> Self {
        Var {
            main_name: name.to_owned(),
            aliases: BTreeSet::from([name.to_owned()]),
            scope: None,
        }
    }

    pub fn with_aliases(main: &str, aliases: BTreeSet<String>) -> Self {
        Var {
            main_name: main.to_owned(),
            aliases,
            scope: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDef {
    pub var: Var,
    pub certainty: DefCertainty,
    pub relevant_stmt: Option<PeId>,
}

impl VarDef {
    pub fn new(var: Var, certainty: DefCertainty) -> Self {
        VarDef {
            var,
            certainty,
            relevant_stmt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarUse {
    pub var: Var,
    pub certainty: UseCertainty,
    pub relevant_stmt: Option<PeId>,
}

impl VarUse {
    pub fn new(var: Var, certainty: UseCertainty) -> Self {
        VarUse {
            var,
            certainty,
            relevant_stmt: None,
        }
    }
}

/// One lexical scope, keyed by the block element that opens it.
#[derive(Debug, Default)]
pub struct Scope {
    pub parent: Option<PeId>,
    pub def_vars: Vec<Var>,
    pub use_vars: Vec<Var>,
}

/// Lazily built scope tree for one compilation unit. Scopes are created on
/// first demand and the parent chain is derived from `ownerBlock`
/// back-references, so queries never depend on construction order.
#[derive(Debug, Default)]
pub struct ScopeManager {
    scopes: HashMap<PeId, Scope>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent scope lookup; establishes the whole parent chain on first
    /// access. Returns the scope key (the block element's id).
    pub fn get_scope(&mut self, store: &PeStore, block: PeId) -> PeId {
        if self.scopes.contains_key(&block) {
            return block;
        }
        let parent = match &store.get(block).kind {
            PeKind::Statement(s) => s.owner_block.filter(|owner| *owner != block),
            _ => None,
        };
        let parent = parent.map(|owner| self.get_scope(store, owner));
        self.scopes.insert(
            block,
            Scope {
                parent,
                ..Scope::default()
            },
        );
        block
    }

    pub fn scope(&self, block: PeId) -> Option<&Scope> {
        self.scopes.get(&block)
    }

    /// Nearest enclosing scope (starting at `from`, inclusive) that declares
    /// a def-side variable answering to `name`.
    pub fn search_variable_def(&self, from: PeId, name: &str) -> Option<PeId> {
        let mut cursor = Some(from);
        while let Some(key) = cursor {
            let scope = self.scopes.get(&key)?;
            if scope
                .def_vars
                .iter()
                .any(|v| v.aliases.contains(name))
            {
                return Some(key);
            }
            cursor = scope.parent;
        }
        None
    }

    pub fn add_def_var(&mut self, scope: PeId, var: Var) {
        let entry = self
            .scopes
            .get_mut(&scope)
            .unwrap_or_else(|| panic!("variable registered against unknown scope {scope:?}"));
        if !entry.def_vars.iter().any(|v| v.main_name == var.main_name) {
            entry.def_vars.push(var);
        }
    }

    pub fn add_use_var(&mut self, scope: PeId, var: Var) {
        let entry = self
            .scopes
            .get_mut(&scope)
            .unwrap_or_else(|| panic!("variable registered against unknown scope {scope:?}"));
        if !entry.use_vars.iter().any(|v| v.main_name == var.main_name) {
            entry.use_vars.push(var);
        }
    }
}
