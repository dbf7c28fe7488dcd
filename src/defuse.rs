use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::element::{ExprCategory, PeId, PeKind, PeStore, StmtCategory};
use crate::scope::{DefCertainty, ScopeManager, UseCertainty, Var, VarDef, VarUse};
use crate::utils::config::{AnalysisConfig, MethodRules, Settings};

/// -------------------------------------------------------------------------
///  Def/use analyzer
///
///  Computes, per program element, the set of variables it may write and
///  read, graded on the certainty lattices. Results are memoized; the
///  statement-level pass additionally binds variables to lexical scopes and
///  rewrites unbound names into `this.` field aliases. A method must be
///  analyzed top-down once before its elements are queried, so that
///  declarations registered by earlier statements are visible to later
///  lookups.
/// -------------------------------------------------------------------------

#[derive(Debug)]
pub struct DefUse {
    analysis: AnalysisConfig,
    rules: MethodRules,
    defs: HashMap<PeId, Vec<VarDef>>,
    uses: HashMap<PeId, Vec<VarUse>>,
    analyzed_methods: HashSet<PeId>,
}

impl DefUse {
    pub fn new(settings: &Settings) -> Self {
        DefUse {
            analysis: settings.analysis,
            rules: settings.method_rules.clone(),
            defs: HashMap::new(),
            uses: HashMap::new(),
            analyzed_methods: HashSet::new(),
        }
    }

    /// Memoized defs of `pe`. Empty for elements the analysis never reached.
    pub fn defs(&self, pe: PeId) -> &[VarDef] {
        self.defs.get(&pe).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Memoized uses of `pe`.
    pub fn uses(&self, pe: PeId) -> &[VarUse] {
        self.uses.get(&pe).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full def/use analysis of one method: parameters first (one DECLARE
    /// def each, registered in the method scope), then the body in document
    /// order, then a single-expression lambda body if there is one.
    pub fn analyze_method(&mut self, store: &PeStore, scopes: &mut ScopeManager, method: PeId) {
        if !self.analyzed_methods.insert(method) {
            return;
        }
        let method_scope = scopes.get_scope(store, method);
        let mpe = store.method(method).clone();
        debug!(target: "defuse", "analyzing method {:?} ({:?})", mpe.name, method);

        let mut m_defs: Vec<VarDef> = Vec::new();
        let mut m_uses: Vec<VarUse> = Vec::new();

        for param in &mpe.parameters {
            let v = store.variable(*param);
            let mut var = Var::simple(&v.name);
            var.scope = Some(method_scope);
            scopes.add_def_var(method_scope, var.clone());
            let def = VarDef::new(var, DefCertainty::Declare);
            self.defs.insert(*param, vec![def.clone()]);
            push_def(&mut m_defs, def);
        }

        for stmt in &mpe.statements {
            self.process_statement(store, scopes, *stmt, &mut m_defs, &mut m_uses);
        }

        if let Some(body) = mpe.lambda_body {
            let (mut ds, mut us) = self.expr_raw(store, scopes, body);
            for d in &mut ds {
                self.normalize_def(scopes, d, None, Some(method_scope));
            }
            for u in &mut us {
                self.normalize_use(scopes, u, None, Some(method_scope));
            }
            self.defs.insert(body, ds.clone());
            self.uses.insert(body, us.clone());
            ds.into_iter().for_each(|d| push_def(&mut m_defs, d));
            us.into_iter().for_each(|u| push_use(&mut m_uses, u));
        }

        self.defs.insert(method, m_defs);
        self.uses.insert(method, m_uses);
    }

    fn process_statement(
        &mut self,
        store: &PeStore,
        scopes: &mut ScopeManager,
        stmt: PeId,
        acc_defs: &mut Vec<VarDef>,
        acc_uses: &mut Vec<VarUse>,
    ) {
        let s = store.stmt(stmt).clone();
        let owner_scope = s.owner_block.map(|b| scopes.get_scope(store, b));

        // Break/continue label operands name jump targets, not variables.
        let own_exprs: Vec<PeId> = match s.category {
            StmtCategory::Break | StmtCategory::Continue => Vec::new(),
            _ => s
                .condition
                .iter()
                .chain(s.initializers.iter())
                .chain(s.updaters.iter())
                .chain(s.expressions.iter())
                .copied()
                .collect(),
        };

        let mut s_defs: Vec<VarDef> = Vec::new();
        let mut s_uses: Vec<VarUse> = Vec::new();
        for expr in own_exprs {
            let (mut ds, mut us) = self.expr_raw(store, scopes, expr);
            for d in &mut ds {
                self.normalize_def(scopes, d, Some(stmt), owner_scope);
            }
            for u in &mut us {
                self.normalize_use(scopes, u, Some(stmt), owner_scope);
            }
            self.defs.insert(expr, ds.clone());
            self.uses.insert(expr, us.clone());
            ds.into_iter().for_each(|d| push_def(&mut s_defs, d));
            us.into_iter().for_each(|u| push_use(&mut s_uses, u));
        }

        s_defs.iter().for_each(|d| push_def(acc_defs, d.clone()));
        s_uses.iter().for_each(|u| push_use(acc_uses, u.clone()));
        self.defs.insert(stmt, s_defs);
        self.uses.insert(stmt, s_uses);

        for child in &s.statements {
            self.process_statement(store, scopes, *child, acc_defs, acc_uses);
        }
        for child in &s.else_statements {
            self.process_statement(store, scopes, *child, acc_defs, acc_uses);
        }
        for child in &s.catch_statements {
            self.process_statement(store, scopes, *child, acc_defs, acc_uses);
        }
        if let Some(fin) = s.finally_statement {
            self.process_statement(store, scopes, fin, acc_defs, acc_uses);
        }
    }

    /// Statement-level normalization of one def: scope binding, field
    /// aliasing, relevant-statement stamping, scope registration.
    fn normalize_def(
        &self,
        scopes: &mut ScopeManager,
        def: &mut VarDef,
        stmt: Option<PeId>,
        owner_scope: Option<PeId>,
    ) {
        if def.var.scope.is_none() {
            if def.certainty >= DefCertainty::Declare {
                def.var.scope = owner_scope;
            } else if let Some(os) = owner_scope {
                def.var.scope = scopes.search_variable_def(os, &def.var.main_name);
            }
        }
        if def.var.scope.is_none() {
            self.alias_as_field(&mut def.var);
        }
        if def.relevant_stmt.is_none() {
            def.relevant_stmt = stmt;
        }
        if let Some(target) = def.var.scope.or(owner_scope) {
            scopes.add_def_var(target, def.var.clone());
        }
    }

    fn normalize_use(
        &self,
        scopes: &mut ScopeManager,
        usage: &mut VarUse,
        stmt: Option<PeId>,
        owner_scope: Option<PeId>,
    ) {
        if usage.var.scope.is_none() {
            if let Some(os) = owner_scope {
                usage.var.scope = scopes.search_variable_def(os, &usage.var.main_name);
            }
        }
        if usage.var.scope.is_none() {
            self.alias_as_field(&mut usage.var);
        }
        if usage.relevant_stmt.is_none() {
            usage.relevant_stmt = stmt;
        }
        if let Some(target) = usage.var.scope.or(owner_scope) {
            scopes.add_use_var(target, usage.var.clone());
        }
    }

    fn alias_as_field(&self, var: &mut Var) {
        if !self.analysis.treat_non_local_as_field
            || var.main_name.is_empty()
            || var.main_name.starts_with("this.")
        {
            return;
        }
        if self.analysis.treat_field_exclude_uppercase
            && !var
                .main_name
                .chars()
                .next()
                .is_some_and(|c| c.is_lowercase())
        {
            return;
        }
        let original = var.main_name.clone();
        var.main_name = format!("this.{original}");
        var.aliases = BTreeSet::from([original.clone(), format!("this.{original}")]);
    }

    /// Raw per-category def/use rules, no scope binding. Recurses through
    /// the expression tree, into anonymous-class methods, and into lambda
    /// methods sitting in expression slots.
    fn expr_raw(
        &mut self,
        store: &PeStore,
        scopes: &mut ScopeManager,
        pe: PeId,
    ) -> (Vec<VarDef>, Vec<VarUse>) {
        let elem = store.get(pe);
        let expr = match &elem.kind {
            PeKind::Expression(e) => e.clone(),
            PeKind::Method(_) => {
                self.analyze_method(store, scopes, pe);
                return (self.defs(pe).to_vec(), self.uses(pe).to_vec());
            }
            _ => return (Vec::new(), Vec::new()),
        };

        let mut defs: Vec<VarDef> = Vec::new();
        let mut uses: Vec<VarUse> = Vec::new();

        match expr.category {
            ExprCategory::Assignment => {
                let lhs = expr.expressions.first().copied();
                let rhs = if expr.expressions.len() >= 2 {
                    expr.expressions.last().copied()
                } else {
                    None
                };
                if let Some(lhs) = lhs {
                    let recognized = self.recognize(store, lhs);
                    if recognized.is_empty() {
                        let (ds, _) = self.expr_raw(store, scopes, lhs);
                        ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    } else {
                        for var in recognized {
                            push_def(&mut defs, VarDef::new(var, DefCertainty::Def));
                        }
                    }
                }
                if let Some(rhs) = rhs {
                    let (ds, us) = self.expr_raw(store, scopes, rhs);
                    ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    us.into_iter().for_each(|mut u| {
                        u.certainty = UseCertainty::Use;
                        push_use(&mut uses, u);
                    });
                }
            }

            ExprCategory::VariableDeclarationFragment => {
                let name = expr.expressions.first().copied();
                let init = expr.expressions.get(1).copied();
                if let Some(name) = name {
                    let recognized = self.recognize(store, name);
                    if recognized.is_empty() {
                        let (ds, _) = self.expr_raw(store, scopes, name);
                        ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    } else {
                        for var in recognized {
                            push_def(&mut defs, VarDef::new(var, DefCertainty::DeclareAndDef));
                        }
                    }
                }
                if let Some(init) = init {
                    let (ds, us) = self.expr_raw(store, scopes, init);
                    ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    us.into_iter().for_each(|mut u| {
                        u.certainty = UseCertainty::Use;
                        push_use(&mut uses, u);
                    });
                }
            }

            ExprCategory::Postfix | ExprCategory::Prefix => {
                let (operand, operator) = if expr.category == ExprCategory::Postfix {
                    (expr.expressions.first().copied(), expr.expressions.get(1).copied())
                } else {
                    (expr.expressions.get(1).copied(), expr.expressions.first().copied())
                };
                let mutating = operator.is_some_and(|op| {
                    matches!(&store.get(op).kind,
                        PeKind::Operator(o) if o.token == "++" || o.token == "--")
                });
                if let Some(operand) = operand {
                    let (ds, us) = self.expr_raw(store, scopes, operand);
                    if mutating {
                        for var in self.recognize(store, operand) {
                            push_def(&mut defs, VarDef::new(var, DefCertainty::Def));
                        }
                    } else {
                        ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    }
                    us.into_iter().for_each(|mut u| {
                        u.certainty = UseCertainty::Use;
                        push_use(&mut uses, u);
                    });
                }
            }

            ExprCategory::SimpleName => {
                push_use(
                    &mut uses,
                    VarUse::new(Var::simple(&elem.text), UseCertainty::MayUse),
                );
            }

            ExprCategory::MethodInvocation | ExprCategory::SuperMethodInvocation => {
                let call_def = self
                    .rules
                    .classify(expr.name.as_deref().unwrap_or_default());
                if let Some(q) = expr.qualifier {
                    let recognized = self.recognize(store, q);
                    if recognized.is_empty() {
                        // Chained call: anything the receiver expression may
                        // define can only be claimed conservatively.
                        let (ds, _) = self.expr_raw(store, scopes, q);
                        for mut d in ds {
                            if call_def >= DefCertainty::MayDef {
                                d.certainty = d.certainty.max(DefCertainty::MayDef);
                            }
                            push_def(&mut defs, d);
                        }
                    } else {
                        // Emitted even for NO_DEF so downstream passes can
                        // observe the absence of mutation.
                        for var in recognized {
                            push_def(&mut defs, VarDef::new(var, call_def));
                        }
                    }
                    let (_, us) = self.expr_raw(store, scopes, q);
                    us.into_iter().for_each(|u| push_use(&mut uses, u));
                }
                for arg in &expr.expressions {
                    let (_, us) = self.expr_raw(store, scopes, *arg);
                    us.into_iter().for_each(|u| push_use(&mut uses, u));
                }
            }

            _ => {
                let recognized = self.recognize(store, pe);
                for child in expr.qualifier.iter().chain(expr.expressions.iter()) {
                    let (ds, us) = self.expr_raw(store, scopes, *child);
                    ds.into_iter().for_each(|d| push_def(&mut defs, d));
                    if recognized.is_empty() {
                        us.into_iter().for_each(|u| push_use(&mut uses, u));
                    }
                }
                if recognized.is_empty() {
                    if let Some(class) = expr.anonymous_class {
                        let methods = store.class(class).methods.clone();
                        for m in methods {
                            self.analyze_method(store, scopes, m);
                            self.defs(m).to_vec().into_iter().for_each(|d| push_def(&mut defs, d));
                            self.uses(m).to_vec().into_iter().for_each(|u| push_use(&mut uses, u));
                        }
                    }
                } else {
                    for var in recognized {
                        push_use(&mut uses, VarUse::new(var, UseCertainty::MayUse));
                    }
                }
            }
        }

        (defs, uses)
    }

    /// Does `pe` denote a named variable, and under which aliases?
    fn recognize(&self, store: &PeStore, pe: PeId) -> Vec<Var> {
        let elem = store.get(pe);
        let Some(expr) = elem.as_expression() else {
            return Vec::new();
        };
        match expr.category {
            ExprCategory::SimpleName => vec![Var::simple(&elem.text)],

            ExprCategory::ArrayAccess => {
                // The index is deliberately ignored.
                match expr.expressions.first() {
                    Some(array) if store.is_expr_of(*array, ExprCategory::SimpleName) => {
                        vec![Var::simple(store.text(*array))]
                    }
                    _ => Vec::new(),
                }
            }

            ExprCategory::FieldAccess | ExprCategory::QualifiedName => {
                let Some(q) = expr.qualifier else {
                    return Vec::new();
                };
                let Some(field) = expr.expressions.first() else {
                    return Vec::new();
                };
                let field = store.text(*field).to_owned();
                if store.is_expr_of(q, ExprCategory::SimpleName) {
                    let base = store.text(q).to_owned();
                    let dotted = format!("{base}.{field}");
                    vec![Var::simple(&dotted), Var::simple(&base)]
                } else if store.is_expr_of(q, ExprCategory::This) {
                    let dotted = format!("this.{field}");
                    if self.analysis.treat_non_local_as_field {
                        vec![Var::simple(&dotted)]
                    } else {
                        vec![Var::with_aliases(
                            &dotted,
                            BTreeSet::from([dotted.clone(), field]),
                        )]
                    }
                } else {
                    Vec::new()
                }
            }

            _ => Vec::new(),
        }
    }
}

fn push_def(acc: &mut Vec<VarDef>, def: VarDef) {
    if !acc.contains(&def) {
        acc.push(def);
    }
}

fn push_use(acc: &mut Vec<VarUse>, usage: VarUse) {
    if !acc.contains(&usage) {
        acc.push(usage);
    }
}
