use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use tracing::debug;

use crate::cfg::{Cfg, CfgNodeKind};
use crate::defuse::DefUse;
use crate::element::{ExprCategory, PeId, PeKind, PeStore, ProgramElement, StmtCategory};
use crate::scope::{DefCertainty, ScopeManager, UseCertainty};
use crate::utils::config::DependenceConfig;

/// -------------------------------------------------------------------------
///  Program dependence graph
///
///  Overlays data, control, and execution edges on nodes derived from the
///  method's CFG, plus a synthetic method-enter node and one node per
///  declared parameter. Data edges come from a reaching-definitions walk
///  over the CFG; control edges from the conditional-block structure of the
///  element tree; execution edges are the CFG successor relation lifted
///  node for node.
/// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PdgNodeKind {
    MethodEnter,
    Parameter,
    Control,
    Expression,
    Statement,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PdgEdgeKind {
    Control { true_dependence: bool },
    Data { variable: String },
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PdgEdge {
    pub from: PeId,
    pub to: PeId,
    pub kind: PdgEdgeKind,
}

/// Interning factory for PDG nodes, keyed by element id.
#[derive(Debug, Default)]
pub struct PdgNodeFactory {
    nodes: DashMap<PeId, PdgNodeKind>,
}

impl PdgNodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_control_node(&self, store: &PeStore, pe: PeId) -> PeId {
        let kind = match &store.get(pe).kind {
            PeKind::Expression(e) if e.category == ExprCategory::MethodEnter => {
                PdgNodeKind::MethodEnter
            }
            _ => PdgNodeKind::Control,
        };
        self.nodes.entry(pe).or_insert(kind);
        pe
    }

    pub fn make_normal_node(&self, store: &PeStore, pe: PeId) -> PeId {
        let kind = match &store.get(pe).kind {
            PeKind::Statement(_) => PdgNodeKind::Statement,
            PeKind::Expression(e) if e.category == ExprCategory::MethodEnter => {
                PdgNodeKind::MethodEnter
            }
            PeKind::Expression(_) => PdgNodeKind::Expression,
            PeKind::Variable(_) => PdgNodeKind::Parameter,
            PeKind::Method(_) => PdgNodeKind::MethodEnter,
            _ => panic!("{pe:?} cannot back a PDG node"),
        };
        self.nodes.entry(pe).or_insert(kind);
        pe
    }

    pub fn kind(&self, pe: PeId) -> Option<PdgNodeKind> {
        self.nodes.get(&pe).map(|k| *k)
    }
}

#[derive(Debug)]
pub struct Pdg {
    pub method: PeId,
    pub options: DependenceConfig,
    pub enter: Option<PeId>,
    pub parameter_nodes: Vec<PeId>,
    pub exit_nodes: BTreeSet<PeId>,
    pub nodes: BTreeSet<PeId>,
    pub cfg: Option<Cfg>,
    forward: BTreeMap<PeId, BTreeSet<PdgEdge>>,
    backward: BTreeMap<PeId, BTreeSet<PdgEdge>>,
    factory: PdgNodeFactory,
    built: bool,
}

impl Pdg {
    pub fn new(method: PeId, options: DependenceConfig) -> Self {
        Pdg {
            method,
            options,
            enter: None,
            parameter_nodes: Vec::new(),
            exit_nodes: BTreeSet::new(),
            nodes: BTreeSet::new(),
            cfg: None,
            forward: BTreeMap::new(),
            backward: BTreeMap::new(),
            factory: PdgNodeFactory::new(),
            built: false,
        }
    }

    pub fn build(&mut self, store: &mut PeStore, scopes: &mut ScopeManager, defuse: &mut DefUse) {
        assert!(!self.built, "PDG for {:?} already built", self.method);
        self.built = true;

        let mut cfg = Cfg::new(self.method);
        cfg.build(store);

        // Synthetic enter node spanning the whole method; the method itself
        // acts as its conditional block, so top-level statements hang off it.
        let (method_start, method_end) = store.line_span(self.method);
        let mut enter_pe =
            ProgramElement::expression(ExprCategory::MethodEnter, method_start, method_end);
        enter_pe.text = store.get(self.method).text.clone();
        let enter_pe = store.insert(enter_pe);
        if let PeKind::Expression(e) = &mut store.get_mut(enter_pe).kind {
            e.owner_conditional_block = Some(self.method);
        }
        let enter = self.factory.make_control_node(store, enter_pe);
        self.nodes.insert(enter);
        self.enter = Some(enter);

        let parameters = store.method(self.method).parameters.clone();
        for param in &parameters {
            let node = self.factory.make_normal_node(store, *param);
            self.nodes.insert(node);
            self.parameter_nodes.push(node);
        }

        if self.options.execution {
            if let Some(cfg_enter) = cfg.enter {
                let to = self.wrap(store, &cfg, cfg_enter);
                self.add_edge(PdgEdge {
                    from: enter,
                    to,
                    kind: PdgEdgeKind::Execution,
                });
            }
        }

        if self.options.data {
            defuse.analyze_method(store, scopes, self.method);
            for (index, param) in parameters.iter().enumerate() {
                let name = store.variable(*param).name.clone();
                let node = self.parameter_nodes[index];
                if let Some(cfg_enter) = cfg.enter {
                    let mut visited = BTreeSet::new();
                    self.propagate(store, defuse, &cfg, cfg_enter, node, &name, &mut visited);
                }
                self.add_edge(PdgEdge {
                    from: enter,
                    to: node,
                    kind: PdgEdgeKind::Data { variable: name },
                });
            }
        }

        // Every CFG node once: reachable first, then dead code.
        let reachable = cfg.reachable_from_enter();
        let ordered: Vec<PeId> = cfg
            .nodes
            .iter()
            .copied()
            .filter(|n| reachable.contains(n))
            .chain(cfg.nodes.iter().copied().filter(|n| !reachable.contains(n)))
            .collect();
        for node in ordered {
            let wrapped = self.wrap(store, &cfg, node);
            if self.options.data {
                for def in defuse.defs(node).to_vec() {
                    if def.certainty < DefCertainty::MayDef {
                        continue;
                    }
                    let mut visited = BTreeSet::new();
                    for next in cfg.forward_neighbors(node) {
                        self.propagate(
                            store,
                            defuse,
                            &cfg,
                            next,
                            wrapped,
                            &def.var.main_name,
                            &mut visited,
                        );
                    }
                }
            }
            if self.options.execution {
                let successors: Vec<PeId> = cfg.forward_neighbors(node);
                for succ in successors {
                    let to = self.wrap(store, &cfg, succ);
                    self.add_edge(PdgEdge {
                        from: wrapped,
                        to,
                        kind: PdgEdgeKind::Execution,
                    });
                }
            }
        }

        if self.options.control {
            self.emit_control_dependence(store, &cfg);
            if self.options.from_entry_to_parameters {
                for param in self.parameter_nodes.clone() {
                    self.add_edge(PdgEdge {
                        from: enter,
                        to: param,
                        kind: PdgEdgeKind::Control {
                            true_dependence: true,
                        },
                    });
                }
            }
            if self.options.from_entry_to_all {
                for node in self.nodes.clone() {
                    if node != enter {
                        self.add_edge(PdgEdge {
                            from: enter,
                            to: node,
                            kind: PdgEdgeKind::Control {
                                true_dependence: true,
                            },
                        });
                    }
                }
            }
        }

        let exits: Vec<PeId> = cfg.exits.iter().copied().collect();
        for exit in exits {
            let wrapped = self.wrap(store, &cfg, exit);
            self.exit_nodes.insert(wrapped);
        }

        debug!(
            target: "pdg",
            "PDG done for {:?}: {} nodes, {} edges",
            self.method,
            self.nodes.len(),
            self.forward.values().map(BTreeSet::len).sum::<usize>()
        );
        self.cfg = Some(cfg);
    }

    // -- queries -----------------------------------------------------------

    pub fn node_kind(&self, node: PeId) -> PdgNodeKind {
        self.factory
            .kind(node)
            .unwrap_or_else(|| panic!("{node:?} is not a PDG node"))
    }

    pub fn forward_edges(&self, node: PeId) -> impl Iterator<Item = &PdgEdge> + '_ {
        self.forward.get(&node).into_iter().flatten()
    }

    pub fn backward_edges(&self, node: PeId) -> impl Iterator<Item = &PdgEdge> + '_ {
        self.backward.get(&node).into_iter().flatten()
    }

    pub fn edges(&self) -> impl Iterator<Item = &PdgEdge> + '_ {
        self.forward.values().flatten()
    }

    // -- construction helpers ---------------------------------------------

    fn wrap(&mut self, store: &PeStore, cfg: &Cfg, node: PeId) -> PeId {
        let wrapped = match cfg.node_kind(node) {
            CfgNodeKind::Control => self.factory.make_control_node(store, node),
            _ => self.factory.make_normal_node(store, node),
        };
        self.nodes.insert(wrapped);
        wrapped
    }

    fn add_edge(&mut self, edge: PdgEdge) {
        self.forward
            .entry(edge.from)
            .or_default()
            .insert(edge.clone());
        self.backward.entry(edge.to).or_default().insert(edge);
    }

    /// Reaching-definition walk: depth-first over the CFG, emitting a data
    /// edge at every read of `variable` that meets the use threshold, and
    /// stopping where a strong enough write kills the definition.
    fn propagate(
        &mut self,
        store: &PeStore,
        defuse: &DefUse,
        cfg: &Cfg,
        node: PeId,
        origin: PeId,
        variable: &str,
        visited: &mut BTreeSet<PeId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        let use_threshold = if self.options.treat_may_use_as_use {
            UseCertainty::MayUse
        } else {
            UseCertainty::Use
        };
        let mut used = false;
        for usage in defuse.uses(node) {
            if usage.certainty >= use_threshold && usage.var.aliases.contains(variable) {
                used = true;
            }
        }
        if used {
            let to = self.wrap(store, cfg, node);
            self.add_edge(PdgEdge {
                from: origin,
                to,
                kind: PdgEdgeKind::Data {
                    variable: variable.to_owned(),
                },
            });
        }
        for def in defuse.defs(node) {
            if def.certainty >= DefCertainty::MayDef && def.var.aliases.contains(variable) {
                let kills = def.certainty >= DefCertainty::Def || self.options.treat_may_def_as_def;
                if kills {
                    return;
                }
            }
        }
        for next in cfg.forward_neighbors(node) {
            self.propagate(store, defuse, cfg, next, origin, variable, visited);
        }
    }

    fn emit_control_dependence(&mut self, store: &PeStore, cfg: &Cfg) {
        let snapshot: Vec<PeId> = self.nodes.iter().copied().collect();
        for node in snapshot {
            if !matches!(
                self.factory.kind(node),
                Some(PdgNodeKind::Control) | Some(PdgNodeKind::MethodEnter)
            ) {
                continue;
            }
            let Some(owner) = store
                .get(node)
                .as_expression()
                .and_then(|e| e.owner_conditional_block)
            else {
                continue;
            };
            match &store.get(owner).kind {
                PeKind::Method(m) => {
                    for stmt in m.statements.clone() {
                        self.emit_control_edge(store, cfg, node, stmt, true);
                    }
                }
                PeKind::Statement(_) => {
                    let block = store.stmt(owner).clone();
                    for stmt in block.statements {
                        self.emit_control_edge(store, cfg, node, stmt, true);
                    }
                    for stmt in block.else_statements {
                        self.emit_control_edge(store, cfg, node, stmt, false);
                    }
                    for updater in block.updaters {
                        if cfg.contains_node(updater) {
                            let to = self.wrap(store, cfg, updater);
                            self.add_edge(PdgEdge {
                                from: node,
                                to,
                                kind: PdgEdgeKind::Control {
                                    true_dependence: true,
                                },
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// One control edge per governed statement: composite statements are
    /// represented by their condition's control node (recursing through
    /// condition-less blocks), simple statements by their own node when the
    /// CFG actually carries one.
    fn emit_control_edge(
        &mut self,
        store: &PeStore,
        cfg: &Cfg,
        from: PeId,
        stmt: PeId,
        label: bool,
    ) {
        let s = store.stmt(stmt).clone();
        match s.category {
            StmtCategory::Catch
            | StmtCategory::Do
            | StmtCategory::For
            | StmtCategory::Foreach
            | StmtCategory::If
            | StmtCategory::SimpleBlock
            | StmtCategory::Synchronized
            | StmtCategory::Switch
            | StmtCategory::Try
            | StmtCategory::While => {
                match s.condition {
                    Some(cond) => {
                        let to = self.factory.make_control_node(store, cond);
                        self.nodes.insert(to);
                        self.add_edge(PdgEdge {
                            from,
                            to,
                            kind: PdgEdgeKind::Control {
                                true_dependence: label,
                            },
                        });
                    }
                    None => {
                        for child in &s.statements {
                            self.emit_control_edge(store, cfg, from, *child, label);
                        }
                    }
                }
                for init in &s.initializers {
                    if cfg.contains_node(*init) {
                        let to = self.wrap(store, cfg, *init);
                        self.add_edge(PdgEdge {
                            from,
                            to,
                            kind: PdgEdgeKind::Control {
                                true_dependence: true,
                            },
                        });
                    }
                }
            }
            _ => {
                if cfg.contains_node(stmt) {
                    let to = self.wrap(store, cfg, stmt);
                    self.add_edge(PdgEdge {
                        from,
                        to,
                        kind: PdgEdgeKind::Control {
                            true_dependence: label,
                        },
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lower::tests::lower;
    use crate::utils::Settings;

    pub(crate) struct Built {
        pub store: PeStore,
        pub pdg: Pdg,
    }

    pub(crate) fn pdg_for(source: &str, options: DependenceConfig) -> Built {
        let (mut store, unit) = lower(source);
        let method = unit.methods[0];
        let mut scopes = ScopeManager::new();
        let mut defuse = DefUse::new(&Settings::default());
        let mut pdg = Pdg::new(method, options);
        pdg.build(&mut store, &mut scopes, &mut defuse);
        Built { store, pdg }
    }

    pub(crate) fn data_edges(built: &Built) -> BTreeSet<(u32, u32, String)> {
        built
            .pdg
            .edges()
            .filter_map(|e| match &e.kind {
                PdgEdgeKind::Data { variable } => Some((
                    built.store.get(e.from).start_line,
                    built.store.get(e.to).start_line,
                    variable.clone(),
                )),
                _ => None,
            })
            .collect()
    }

    fn control_edges(built: &Built) -> BTreeSet<(u32, u32, bool)> {
        built
            .pdg
            .edges()
            .filter_map(|e| match &e.kind {
                PdgEdgeKind::Control { true_dependence } => Some((
                    built.store.get(e.from).start_line,
                    built.store.get(e.to).start_line,
                    *true_dependence,
                )),
                _ => None,
            })
            .collect()
    }

    fn has(set: &BTreeSet<(u32, u32, String)>, from: u32, to: u32, var: &str) -> bool {
        set.contains(&(from, to, var.to_owned()))
    }

    #[test]
    fn straight_line_assignments() {
        let built = pdg_for(
            "class C {\n    int foo() {\n        int x = 1;\n        int y = x + 1;\n        return y;\n    }\n}\n",
            DependenceConfig::ddg(),
        );
        let data = data_edges(&built);
        assert!(has(&data, 3, 4, "x"));
        assert!(has(&data, 4, 5, "y"));
        assert!(!has(&data, 3, 5, "x"));
        // DDG configuration carries no control or execution edges.
        assert!(built
            .pdg
            .edges()
            .all(|e| matches!(e.kind, PdgEdgeKind::Data { .. })));
    }

    #[test]
    fn if_else_kills_both_branches() {
        let built = pdg_for(
            "class C {\n    void foo(int a) {\n        int x = a;\n        if (a > 0) {\n            x = 1;\n        } else {\n            x = 2;\n        }\n        print(x);\n    }\n}\n",
            DependenceConfig::ddg(),
        );
        let data = data_edges(&built);
        // The parameter declaration feeds both reads of `a`.
        assert!(has(&data, 2, 3, "a"));
        assert!(has(&data, 2, 4, "a"));
        // Both branch writes reach the print; the initial write is killed on
        // every path.
        assert!(has(&data, 5, 9, "x"));
        assert!(has(&data, 7, 9, "x"));
        assert!(!has(&data, 3, 9, "x"));
    }

    #[test]
    fn while_loop_back_edges() {
        let built = pdg_for(
            "class C {\n    int sum(int n) {\n        int s = 0;\n        int i = 0;\n        while (i < n) {\n            s = s + i;\n            i = i + 1;\n        }\n        return s;\n    }\n}\n",
            DependenceConfig::ddg(),
        );
        let data = data_edges(&built);
        assert!(has(&data, 6, 6, "s"), "s reaches itself around the loop");
        assert!(has(&data, 7, 7, "i"), "i reaches itself around the loop");
        assert!(has(&data, 7, 5, "i"), "i reaches the loop condition");
        assert!(has(&data, 6, 9, "s"), "s reaches the return");
        assert!(has(&data, 3, 6, "s"));
        assert!(has(&data, 4, 5, "i"));
        assert!(has(&data, 2, 5, "n"));
    }

    #[test]
    fn switch_fall_through_definitions() {
        let built = pdg_for(
            "class C {\n    void f(int k) {\n        int a = 0;\n        switch (k) {\n            case 1:\n                a = 1;\n                break;\n            case 2:\n                a = 2;\n            default:\n                a = 3;\n        }\n        use(a);\n    }\n}\n",
            DependenceConfig::ddg(),
        );
        let data = data_edges(&built);
        assert!(has(&data, 2, 4, "k"));
        assert!(has(&data, 6, 13, "a"), "break path");
        assert!(has(&data, 11, 13, "a"), "default path");
        // `case 2` falls through into `default`, whose write kills it before
        // the read.
        assert!(!has(&data, 9, 13, "a"));
        // The initial write is killed in every arm.
        assert!(!has(&data, 3, 13, "a"));
    }

    #[test]
    fn field_write_records_aliases() {
        let built = pdg_for(
            "class C {\n    int source;\n    void f() {\n        int x = source;\n        source = x + 1;\n    }\n}\n",
            DependenceConfig::ddg(),
        );
        let data = data_edges(&built);
        assert!(has(&data, 4, 5, "x"));
        // Straight-line code: the later field write cannot reach the earlier
        // read.
        assert!(data
            .iter()
            .all(|(from, to, var)| !(var.contains("source") && *from == 5 && *to == 4)));
    }

    #[test]
    fn control_dependence_follows_block_structure() {
        let built = pdg_for(
            "class C {\n    void foo(int a) {\n        int x = a;\n        if (a > 0) {\n            x = 1;\n        } else {\n            x = 2;\n        }\n        print(x);\n    }\n}\n",
            DependenceConfig::default(),
        );
        let control = control_edges(&built);
        // Method enter governs the top-level statements (the enter node
        // spans the method, so its from-line is the method line).
        assert!(control.contains(&(2, 3, true)));
        assert!(control.contains(&(2, 4, true)));
        assert!(control.contains(&(2, 9, true)));
        // The if condition governs then with true and else with false.
        assert!(control.contains(&(4, 5, true)));
        assert!(control.contains(&(4, 7, false)));

        // Exactly one control edge per governed statement from its governor.
        let from_cond: Vec<_> = built
            .pdg
            .edges()
            .filter(|e| {
                built.store.get(e.from).start_line == 4
                    && matches!(e.kind, PdgEdgeKind::Control { .. })
            })
            .collect();
        assert_eq!(from_cond.len(), 2);
    }

    #[test]
    fn loop_updaters_are_control_dependent() {
        let built = pdg_for(
            "class C {\n    void f() {\n        for (int i = 0; i < 10; i++) {\n            use(i);\n        }\n    }\n}\n",
            DependenceConfig::default(),
        );
        let control = control_edges(&built);
        // Condition, updater, and initializer all live on line 3; the body
        // statement is governed with a true label.
        assert!(control.contains(&(3, 4, true)));
        assert!(control.contains(&(3, 3, true)), "updater/initializer edges");
    }

    #[test]
    fn execution_edges_lift_cfg_successors() {
        let built = pdg_for(
            "class C {\n    int foo() {\n        int x = 1;\n        return x;\n    }\n}\n",
            DependenceConfig::default(),
        );
        let execution: BTreeSet<(u32, u32)> = built
            .pdg
            .edges()
            .filter(|e| e.kind == PdgEdgeKind::Execution)
            .map(|e| {
                (
                    built.store.get(e.from).start_line,
                    built.store.get(e.to).start_line,
                )
            })
            .collect();
        // Enter spans the method starting on line 2 and feeds the first
        // statement; the statement chain is lifted edge for edge.
        assert!(execution.contains(&(2, 3)));
        assert!(execution.contains(&(3, 4)));
    }

    #[test]
    fn exit_nodes_mirror_cfg_exits() {
        let built = pdg_for(
            "class C {\n    int foo() {\n        int x = 1;\n        return x;\n    }\n}\n",
            DependenceConfig::default(),
        );
        assert_eq!(built.pdg.exit_nodes.len(), 1);
        let exit = *built.pdg.exit_nodes.iter().next().unwrap();
        assert_eq!(built.store.get(exit).start_line, 4);
        assert_eq!(built.pdg.node_kind(exit), PdgNodeKind::Statement);
    }

    #[test]
    fn data_edges_respect_certainty_thresholds() {
        // `print(x)` reads x only as MAY_USE (argument position); with
        // treat_may_use_as_use off the edge disappears.
        let source = "class C {\n    void f() {\n        int x = 1;\n        print(x);\n    }\n}\n";
        let strict = {
            let mut options = DependenceConfig::ddg();
            options.treat_may_use_as_use = false;
            pdg_for(source, options)
        };
        assert!(!has(&data_edges(&strict), 3, 4, "x"));

        let lenient = pdg_for(source, DependenceConfig::ddg());
        assert!(has(&data_edges(&lenient), 3, 4, "x"));
    }

    #[test]
    fn may_def_does_not_kill_by_default() {
        // `frobnicate` is not in any rule table, so the receiver write is
        // MAY_DEF and the original definition survives past it.
        let source = "class C {\n    void f() {\n        int x = 1;\n        x.frobnicate();\n        use(x);\n    }\n}\n";
        let lenient = pdg_for(source, DependenceConfig::ddg());
        let data = data_edges(&lenient);
        assert!(has(&data, 3, 5, "x"));
        // The MAY_DEF write itself reaches the use as well.
        assert!(has(&data, 4, 5, "x"));

        let mut options = DependenceConfig::ddg();
        options.treat_may_def_as_def = true;
        let strict = pdg_for(source, options);
        assert!(!has(&data_edges(&strict), 3, 5, "x"));
    }

    #[test]
    fn node_factory_interns_and_partitions() {
        let built = pdg_for(
            "class C {\n    void f(int a) {\n        if (a > 0) {\n            use(a);\n        }\n    }\n}\n",
            DependenceConfig::default(),
        );
        let enter = built.pdg.enter.unwrap();
        assert_eq!(built.pdg.node_kind(enter), PdgNodeKind::MethodEnter);
        assert_eq!(built.pdg.parameter_nodes.len(), 1);
        assert_eq!(
            built.pdg.node_kind(built.pdg.parameter_nodes[0]),
            PdgNodeKind::Parameter
        );
        let kinds: BTreeSet<PdgNodeKind> = built
            .pdg
            .nodes
            .iter()
            .map(|n| built.pdg.node_kind(*n))
            .collect();
        assert!(kinds.contains(&PdgNodeKind::Control));
        assert!(kinds.contains(&PdgNodeKind::Statement));
    }

    #[test]
    fn execution_edges_exactly_mirror_cfg_edges() {
        let built = pdg_for(
            "class C {\n    void f(int n) {\n        while (n > 0) {\n            n = n - 1;\n        }\n        use(n);\n    }\n}\n",
            DependenceConfig::default(),
        );
        let cfg = built.pdg.cfg.as_ref().unwrap();
        for edge in cfg.edges() {
            assert!(
                built
                    .pdg
                    .forward_edges(edge.from)
                    .any(|e| e.to == edge.to && e.kind == PdgEdgeKind::Execution),
                "CFG edge {edge:?} was not lifted"
            );
        }
    }

    #[test]
    fn edges_are_mirrored_in_backward_sets() {
        let built = pdg_for(
            "class C {\n    void f(int a) {\n        if (a > 0) {\n            use(a);\n        }\n    }\n}\n",
            DependenceConfig::default(),
        );
        for node in &built.pdg.nodes {
            for edge in built.pdg.forward_edges(*node) {
                assert!(
                    built.pdg.backward_edges(edge.to).any(|e| e == edge),
                    "{edge:?} missing from backward set"
                );
            }
        }
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn build_twice_fails_fast() {
        let (mut store, unit) = lower("class C {\n    void f() {\n        go();\n    }\n}\n");
        let mut scopes = ScopeManager::new();
        let mut defuse = DefUse::new(&Settings::default());
        let mut pdg = Pdg::new(unit.methods[0], DependenceConfig::default());
        pdg.build(&mut store, &mut scopes, &mut defuse);
        pdg.build(&mut store, &mut scopes, &mut defuse);
    }
}
