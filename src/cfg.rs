use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use tracing::debug;

use crate::element::{PeId, PeKind, PeStore, ProgramElement, StmtCategory};

/// -------------------------------------------------------------------------
///  Control flow graph
///
///  One CFG per method. Nodes are interned per program element; edges are
///  typed records ordered by `(from, to, kind)` and mirrored between the
///  from-node's forward set and the to-node's backward set. Construction
///  composes sub-graphs statement by statement, records unresolved break and
///  continue jumps on the sub-graph, and resolves them when the owning loop
///  or switch closes. Placeholder (pseudo) nodes are spliced out before the
///  graph is handed to callers.
/// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CfgNodeKind {
    Normal,
    Control,
    Break,
    Continue,
    SwitchCase,
    Pseudo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CfgEdgeKind {
    Normal,
    Control(bool),
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CfgEdge {
    pub from: PeId,
    pub to: PeId,
    pub kind: CfgEdgeKind,
}

/// Interning node factory. `make_*` is keyed by element id, so repeated
/// calls for one element observe a single node; the map is concurrency-safe
/// so factories may be shared across builder helpers.
#[derive(Debug, Default)]
pub struct CfgNodeFactory {
    nodes: DashMap<PeId, CfgNodeKind>,
}

impl CfgNodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_normal_node(&self, store: &PeStore, pe: PeId) -> PeId {
        let kind = match &store.get(pe).kind {
            PeKind::Statement(s) => match s.category {
                StmtCategory::Break => CfgNodeKind::Break,
                StmtCategory::Continue => CfgNodeKind::Continue,
                StmtCategory::Case => CfgNodeKind::SwitchCase,
                _ => CfgNodeKind::Normal,
            },
            _ => CfgNodeKind::Normal,
        };
        self.nodes.entry(pe).or_insert(kind);
        pe
    }

    pub fn make_control_node(&self, pe: PeId) -> PeId {
        self.nodes.entry(pe).or_insert(CfgNodeKind::Control);
        pe
    }

    /// A placeholder node carries a fresh empty element so it still has an
    /// id; it never survives pseudo elimination.
    pub fn make_pseudo_node(&self, store: &mut PeStore) -> PeId {
        let pe = store.insert(ProgramElement::statement(StmtCategory::Empty, 0, 0));
        self.nodes.insert(pe, CfgNodeKind::Pseudo);
        pe
    }

    pub fn kind(&self, pe: PeId) -> Option<CfgNodeKind> {
        self.nodes.get(&pe).map(|k| *k)
    }
}

/// Sub-graph descriptor returned by every statement build: where execution
/// enters, where it falls out, and which jumps are still unresolved.
#[derive(Debug, Default)]
struct SubCfg {
    enter: Option<PeId>,
    exits: BTreeSet<PeId>,
    breaks: Vec<PeId>,
    continues: Vec<PeId>,
}

#[derive(Debug)]
pub struct Cfg {
    pub core: PeId,
    pub enter: Option<PeId>,
    pub exits: BTreeSet<PeId>,
    pub nodes: BTreeSet<PeId>,
    forward: BTreeMap<PeId, BTreeSet<CfgEdge>>,
    backward: BTreeMap<PeId, BTreeSet<CfgEdge>>,
    factory: CfgNodeFactory,
    built: bool,
}

impl Cfg {
    pub fn new(method: PeId) -> Self {
        Cfg {
            core: method,
            enter: None,
            exits: BTreeSet::new(),
            nodes: BTreeSet::new(),
            forward: BTreeMap::new(),
            backward: BTreeMap::new(),
            factory: CfgNodeFactory::new(),
            built: false,
        }
    }

    pub fn build(&mut self, store: &mut PeStore) {
        assert!(!self.built, "CFG for {:?} already built", self.core);
        self.built = true;

        let statements = store.method(self.core).statements.clone();
        let top = self.build_sequence(store, &statements);
        self.enter = top.enter;
        self.exits = top.exits;
        if !top.breaks.is_empty() || !top.continues.is_empty() {
            debug!(
                target: "cfg",
                "method {:?}: {} breaks / {} continues without a target",
                self.core,
                top.breaks.len(),
                top.continues.len()
            );
        }
        self.eliminate_pseudo_nodes();
        debug!(
            target: "cfg",
            "CFG done for {:?}: {} nodes, {} edges",
            self.core,
            self.nodes.len(),
            self.forward.values().map(BTreeSet::len).sum::<usize>()
        );
    }

    // -- queries ----------------------------------------------------------

    pub fn factory(&self) -> &CfgNodeFactory {
        &self.factory
    }

    pub fn node_kind(&self, node: PeId) -> CfgNodeKind {
        self.factory
            .kind(node)
            .unwrap_or_else(|| panic!("{node:?} is not a CFG node"))
    }

    pub fn contains_node(&self, node: PeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn forward_edges(&self, node: PeId) -> impl Iterator<Item = CfgEdge> + '_ {
        self.forward.get(&node).into_iter().flatten().copied()
    }

    pub fn backward_edges(&self, node: PeId) -> impl Iterator<Item = CfgEdge> + '_ {
        self.backward.get(&node).into_iter().flatten().copied()
    }

    pub fn forward_neighbors(&self, node: PeId) -> Vec<PeId> {
        self.forward_edges(node).map(|e| e.to).collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = CfgEdge> + '_ {
        self.forward.values().flatten().copied()
    }

    pub fn reachable_from_enter(&self) -> BTreeSet<PeId> {
        let mut seen = BTreeSet::new();
        let mut work: Vec<PeId> = self.enter.into_iter().collect();
        while let Some(n) = work.pop() {
            if !seen.insert(n) {
                continue;
            }
            work.extend(self.forward_neighbors(n));
        }
        seen
    }

    // -- edge plumbing ----------------------------------------------------

    /// Edge kind follows the from-node: control nodes emit false-labeled
    /// control edges unless a label is supplied, jump nodes emit jump edges.
    fn make_edge(&self, from: PeId, to: PeId) -> CfgEdge {
        let kind = match self.factory.kind(from) {
            Some(CfgNodeKind::Control) => CfgEdgeKind::Control(false),
            Some(CfgNodeKind::Break) | Some(CfgNodeKind::Continue) => CfgEdgeKind::Jump,
            _ => CfgEdgeKind::Normal,
        };
        CfgEdge { from, to, kind }
    }

    fn make_control_edge(&self, from: PeId, to: PeId, label: bool) -> CfgEdge {
        CfgEdge {
            from,
            to,
            kind: CfgEdgeKind::Control(label),
        }
    }

    fn add_edge(&mut self, edge: CfgEdge) {
        debug!(target: "cfg", "edge {:?} -> {:?} ({:?})", edge.from, edge.to, edge.kind);
        self.forward.entry(edge.from).or_default().insert(edge);
        self.backward.entry(edge.to).or_default().insert(edge);
    }

    fn register(&mut self, node: PeId) -> PeId {
        self.nodes.insert(node);
        node
    }

    // -- structural builders ----------------------------------------------

    fn build_sequence(&mut self, store: &mut PeStore, statements: &[PeId]) -> SubCfg {
        let mut seq = SubCfg::default();
        for stmt in statements {
            let sub = self.build_statement(store, *stmt);
            self.join(&mut seq, sub);
        }
        seq
    }

    fn join(&mut self, seq: &mut SubCfg, sub: SubCfg) {
        if let Some(enter) = sub.enter {
            for exit in seq.exits.clone() {
                let e = self.make_edge(exit, enter);
                self.add_edge(e);
            }
            if seq.enter.is_none() {
                seq.enter = Some(enter);
            }
            seq.exits = sub.exits;
        }
        seq.breaks.extend(sub.breaks);
        seq.continues.extend(sub.continues);
    }

    fn build_statement(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let category = store.stmt(stmt).category;
        match category {
            StmtCategory::Break | StmtCategory::Continue => {
                let node = self.factory.make_normal_node(store, stmt);
                self.register(node);
                let mut sub = SubCfg {
                    enter: Some(node),
                    ..SubCfg::default()
                };
                if category == StmtCategory::Break {
                    sub.breaks.push(node);
                } else {
                    sub.continues.push(node);
                }
                sub
            }
            StmtCategory::If => self.build_if(store, stmt),
            StmtCategory::While | StmtCategory::Foreach => self.build_while_like(store, stmt),
            StmtCategory::Do => self.build_do(store, stmt),
            StmtCategory::For => self.build_for(store, stmt),
            StmtCategory::Switch => self.build_switch(store, stmt),
            StmtCategory::Try => self.build_try(store, stmt),
            StmtCategory::Catch | StmtCategory::Synchronized => {
                self.build_conditional_block(store, stmt)
            }
            StmtCategory::SimpleBlock => {
                let statements = store.stmt(stmt).statements.clone();
                self.build_sequence(store, &statements)
            }
            _ => {
                let node = self.factory.make_normal_node(store, stmt);
                self.register(node);
                SubCfg {
                    enter: Some(node),
                    exits: BTreeSet::from([node]),
                    ..SubCfg::default()
                }
            }
        }
    }

    fn build_if(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };
        let c = self.factory.make_control_node(cond);
        self.register(c);
        let mut sub = SubCfg {
            enter: Some(c),
            ..SubCfg::default()
        };

        let then = self.build_sequence(store, &s.statements);
        match then.enter {
            Some(enter) => {
                let e = self.make_control_edge(c, enter, true);
                self.add_edge(e);
                sub.exits.extend(then.exits);
            }
            None => {
                sub.exits.insert(c);
            }
        }
        sub.breaks.extend(then.breaks);
        sub.continues.extend(then.continues);

        if s.else_statements.is_empty() {
            sub.exits.insert(c);
        } else {
            let alt = self.build_sequence(store, &s.else_statements);
            match alt.enter {
                Some(enter) => {
                    let e = self.make_control_edge(c, enter, false);
                    self.add_edge(e);
                    sub.exits.extend(alt.exits);
                }
                None => {
                    sub.exits.insert(c);
                }
            }
            sub.breaks.extend(alt.breaks);
            sub.continues.extend(alt.continues);
        }
        sub
    }

    fn build_while_like(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };
        let c = self.factory.make_control_node(cond);
        self.register(c);

        let body = self.build_sequence(store, &s.statements);
        if let Some(enter) = body.enter {
            let e = self.make_control_edge(c, enter, true);
            self.add_edge(e);
        }
        for exit in &body.exits {
            let e = self.make_edge(*exit, c);
            self.add_edge(e);
        }

        let mut sub = SubCfg {
            enter: Some(c),
            exits: BTreeSet::from([c]),
            breaks: body.breaks,
            continues: body.continues,
        };
        self.connect_continues(store, &mut sub, s.label.as_deref(), c);
        self.connect_breaks(store, &mut sub, s.label.as_deref());
        sub
    }

    fn build_do(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };
        let body = self.build_sequence(store, &s.statements);
        let c = self.factory.make_control_node(cond);
        self.register(c);

        for exit in &body.exits {
            let e = self.make_edge(*exit, c);
            self.add_edge(e);
        }
        if let Some(enter) = body.enter {
            let e = self.make_control_edge(c, enter, true);
            self.add_edge(e);
        }

        let mut sub = SubCfg {
            enter: body.enter.or(Some(c)),
            exits: BTreeSet::from([c]),
            breaks: body.breaks,
            continues: body.continues,
        };
        // Continues re-enter the loop body, not the condition.
        let continue_target = body.enter.unwrap_or(c);
        self.connect_continues(store, &mut sub, s.label.as_deref(), continue_target);
        self.connect_breaks(store, &mut sub, s.label.as_deref());
        sub
    }

    fn build_for(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };

        let mut sub = SubCfg::default();
        for init in &s.initializers {
            let node = self.factory.make_normal_node(store, *init);
            self.register(node);
            let single = SubCfg {
                enter: Some(node),
                exits: BTreeSet::from([node]),
                ..SubCfg::default()
            };
            self.join(&mut sub, single);
        }

        let c = self.factory.make_control_node(cond);
        self.register(c);
        let cond_sub = SubCfg {
            enter: Some(c),
            exits: BTreeSet::from([c]),
            ..SubCfg::default()
        };
        self.join(&mut sub, cond_sub);

        let body = self.build_sequence(store, &s.statements);
        if let Some(enter) = body.enter {
            let e = self.make_control_edge(c, enter, true);
            self.add_edge(e);
        }

        let mut update = SubCfg::default();
        for updater in &s.updaters {
            let node = self.factory.make_normal_node(store, *updater);
            self.register(node);
            let single = SubCfg {
                enter: Some(node),
                exits: BTreeSet::from([node]),
                ..SubCfg::default()
            };
            self.join(&mut update, single);
        }

        match update.enter {
            Some(update_enter) => {
                for exit in &body.exits {
                    let e = self.make_edge(*exit, update_enter);
                    self.add_edge(e);
                }
                if body.enter.is_none() {
                    // Empty body: the loop round-trips through the updaters.
                    let e = self.make_control_edge(c, update_enter, true);
                    self.add_edge(e);
                }
                for exit in &update.exits {
                    let e = self.make_edge(*exit, c);
                    self.add_edge(e);
                }
            }
            None => {
                for exit in &body.exits {
                    let e = self.make_edge(*exit, c);
                    self.add_edge(e);
                }
            }
        }

        sub.exits = BTreeSet::from([c]);
        sub.breaks.extend(body.breaks);
        sub.continues.extend(body.continues);
        let continue_target = update.enter.unwrap_or(c);
        self.connect_continues(store, &mut sub, s.label.as_deref(), continue_target);
        self.connect_breaks(store, &mut sub, s.label.as_deref());
        sub
    }

    fn build_switch(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };
        let c = self.factory.make_control_node(cond);
        self.register(c);
        let mut sub = SubCfg {
            enter: Some(c),
            ..SubCfg::default()
        };

        let mut previous: Option<(StmtCategory, BTreeSet<PeId>)> = None;
        for child in &s.statements {
            let child_category = store.stmt(*child).category;
            let csub = self.build_statement(store, *child);
            let Some(child_enter) = csub.enter else {
                continue;
            };
            if child_category == StmtCategory::Case {
                let e = self.make_control_edge(c, child_enter, true);
                self.add_edge(e);
            }
            if let Some((prev_category, prev_exits)) = previous.take() {
                // Intentionally no edge after break/continue: fall-through
                // past a completed jump is excluded.
                if !matches!(prev_category, StmtCategory::Break | StmtCategory::Continue) {
                    for exit in prev_exits {
                        let e = self.make_edge(exit, child_enter);
                        self.add_edge(e);
                    }
                }
            }
            sub.breaks.extend(csub.breaks);
            sub.continues.extend(csub.continues);
            previous = Some((child_category, csub.exits));
        }

        match previous {
            Some((_, last_exits)) => sub.exits.extend(last_exits),
            None => {
                sub.exits.insert(c);
            }
        }
        self.connect_breaks(store, &mut sub, s.label.as_deref());
        sub
    }

    fn build_try(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let body = self.build_sequence(store, &s.statements);

        // A missing finally is an empty pseudo graph, spliced out later.
        let fin = match s.finally_statement {
            Some(f) => self.build_statement(store, f),
            None => {
                let p = self.factory.make_pseudo_node(store);
                self.register(p);
                SubCfg {
                    enter: Some(p),
                    exits: BTreeSet::from([p]),
                    ..SubCfg::default()
                }
            }
        };

        let mut sub = SubCfg {
            enter: body.enter.or(fin.enter),
            exits: fin.exits.clone(),
            breaks: body.breaks,
            continues: body.continues,
        };

        if let Some(fin_enter) = fin.enter {
            for exit in &body.exits {
                let e = self.make_edge(*exit, fin_enter);
                self.add_edge(e);
            }
        }
        for catch in &s.catch_statements {
            let catch_sub = self.build_statement(store, *catch);
            // No edge from the guarded body into the handler; exception flow
            // stays under-approximated.
            if let Some(fin_enter) = fin.enter {
                for exit in &catch_sub.exits {
                    let e = self.make_edge(*exit, fin_enter);
                    self.add_edge(e);
                }
            }
            sub.breaks.extend(catch_sub.breaks);
            sub.continues.extend(catch_sub.continues);
        }
        sub.breaks.extend(fin.breaks);
        sub.continues.extend(fin.continues);
        sub
    }

    fn build_conditional_block(&mut self, store: &mut PeStore, stmt: PeId) -> SubCfg {
        let s = store.stmt(stmt).clone();
        let Some(cond) = s.condition else {
            return self.build_sequence(store, &s.statements);
        };
        let c = self.factory.make_control_node(cond);
        self.register(c);
        let body = self.build_sequence(store, &s.statements);
        let mut sub = SubCfg {
            enter: Some(c),
            breaks: body.breaks,
            continues: body.continues,
            ..SubCfg::default()
        };
        match body.enter {
            Some(enter) => {
                let e = self.make_control_edge(c, enter, true);
                self.add_edge(e);
                sub.exits.extend(body.exits);
            }
            None => {
                sub.exits.insert(c);
            }
        }
        sub
    }

    // -- jump resolution ---------------------------------------------------

    fn jump_target_label(store: &PeStore, jump: PeId) -> Option<String> {
        store
            .stmt(jump)
            .expressions
            .first()
            .map(|label| store.text(*label).to_owned())
    }

    /// Absorb pending breaks that target this block (unlabeled, or matching
    /// its label) as exits; leave the rest for an outer block.
    fn connect_breaks(&mut self, store: &PeStore, sub: &mut SubCfg, label: Option<&str>) {
        let pending = std::mem::take(&mut sub.breaks);
        for node in pending {
            let target = Self::jump_target_label(store, node);
            if target.is_none() || target.as_deref() == label {
                sub.exits.insert(node);
            } else {
                sub.breaks.push(node);
            }
        }
    }

    fn connect_continues(
        &mut self,
        store: &PeStore,
        sub: &mut SubCfg,
        label: Option<&str>,
        destination: PeId,
    ) {
        let pending = std::mem::take(&mut sub.continues);
        for node in pending {
            let target = Self::jump_target_label(store, node);
            if target.is_none() || target.as_deref() == label {
                let e = self.make_edge(node, destination);
                self.add_edge(e);
            } else {
                sub.continues.push(node);
            }
        }
    }

    // -- pseudo elimination ------------------------------------------------

    fn eliminate_pseudo_nodes(&mut self) {
        let pseudos: Vec<PeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|n| self.factory.kind(*n) == Some(CfgNodeKind::Pseudo))
            .collect();
        for p in pseudos {
            let preds: Vec<CfgEdge> = self.backward_edges(p).collect();
            let succs: Vec<CfgEdge> = self.forward_edges(p).collect();

            for pred in &preds {
                for succ in &succs {
                    let e = self.make_edge(pred.from, succ.to);
                    self.add_edge(e);
                }
            }
            if self.enter == Some(p) {
                self.enter = succs.first().map(|e| e.to);
            }
            if self.exits.remove(&p) {
                self.exits.extend(preds.iter().map(|e| e.from));
            }

            for pred in &preds {
                if let Some(set) = self.forward.get_mut(&pred.from) {
                    set.remove(pred);
                }
            }
            for succ in &succs {
                if let Some(set) = self.backward.get_mut(&succ.to) {
                    set.remove(succ);
                }
            }
            self.forward.remove(&p);
            self.backward.remove(&p);
            self.nodes.remove(&p);
            debug!(target: "cfg", "spliced pseudo node {:?}", p);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lower::tests::lower;

    pub(crate) fn cfg_for(source: &str) -> (PeStore, PeId, Cfg) {
        let (mut store, unit) = lower(source);
        let method = unit.methods[0];
        let mut cfg = Cfg::new(method);
        cfg.build(&mut store);
        (store, method, cfg)
    }

    pub(crate) fn node_at(store: &PeStore, cfg: &Cfg, line: u32) -> PeId {
        cfg.nodes
            .iter()
            .copied()
            .find(|n| store.get(*n).start_line == line)
            .unwrap_or_else(|| panic!("no CFG node on line {line}"))
    }

    fn has_edge(cfg: &Cfg, from: PeId, to: PeId) -> bool {
        cfg.forward_edges(from).any(|e| e.to == to)
    }

    fn edge_kind(cfg: &Cfg, from: PeId, to: PeId) -> CfgEdgeKind {
        cfg.forward_edges(from)
            .find(|e| e.to == to)
            .map(|e| e.kind)
            .expect("edge exists")
    }

    fn assert_mirrored(cfg: &Cfg) {
        for edge in cfg.edges() {
            assert!(
                cfg.backward_edges(edge.to).any(|e| e == edge),
                "{edge:?} missing from backward set"
            );
        }
        for node in &cfg.nodes {
            for edge in cfg.backward_edges(*node) {
                assert!(
                    cfg.forward_edges(edge.from).any(|e| e == edge),
                    "{edge:?} missing from forward set"
                );
            }
        }
    }

    #[test]
    fn straight_line_sequence() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    int foo() {\n        int x = 1;\n        int y = x + 1;\n        return y;\n    }\n}\n",
        );
        assert_eq!(cfg.nodes.len(), 3);
        let n3 = node_at(&store, &cfg, 3);
        let n4 = node_at(&store, &cfg, 4);
        let n5 = node_at(&store, &cfg, 5);
        assert_eq!(cfg.enter, Some(n3));
        assert!(has_edge(&cfg, n3, n4));
        assert!(has_edge(&cfg, n4, n5));
        assert_eq!(edge_kind(&cfg, n3, n4), CfgEdgeKind::Normal);
        assert_eq!(cfg.exits, BTreeSet::from([n5]));
        assert_mirrored(&cfg);
    }

    #[test]
    fn if_else_branches_and_labels() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(int a) {\n        if (a > 0) {\n            a = 1;\n        } else {\n            a = 2;\n        }\n        use(a);\n    }\n}\n",
        );
        let cond = node_at(&store, &cfg, 3);
        let then = node_at(&store, &cfg, 4);
        let alt = node_at(&store, &cfg, 6);
        let after = node_at(&store, &cfg, 8);
        assert_eq!(cfg.node_kind(cond), CfgNodeKind::Control);
        assert_eq!(edge_kind(&cfg, cond, then), CfgEdgeKind::Control(true));
        assert_eq!(edge_kind(&cfg, cond, alt), CfgEdgeKind::Control(false));
        assert!(has_edge(&cfg, then, after));
        assert!(has_edge(&cfg, alt, after));
        assert!(!has_edge(&cfg, cond, after));
        assert_mirrored(&cfg);
    }

    #[test]
    fn if_without_else_exits_through_condition() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(int a) {\n        if (a > 0) {\n            a = 1;\n        }\n        use(a);\n    }\n}\n",
        );
        let cond = node_at(&store, &cfg, 3);
        let after = node_at(&store, &cfg, 6);
        assert_eq!(edge_kind(&cfg, cond, after), CfgEdgeKind::Control(false));
    }

    #[test]
    fn while_loop_back_edge_and_false_exit() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    int sum(int n) {\n        int s = 0;\n        int i = 0;\n        while (i < n) {\n            s = s + i;\n            i = i + 1;\n        }\n        return s;\n    }\n}\n",
        );
        let cond = node_at(&store, &cfg, 5);
        let body1 = node_at(&store, &cfg, 6);
        let body2 = node_at(&store, &cfg, 7);
        let ret = node_at(&store, &cfg, 9);
        assert_eq!(edge_kind(&cfg, cond, body1), CfgEdgeKind::Control(true));
        assert!(has_edge(&cfg, body2, cond), "loop back edge");
        assert_eq!(edge_kind(&cfg, cond, ret), CfgEdgeKind::Control(false));
        assert_eq!(cfg.exits, BTreeSet::from([ret]));
        assert_mirrored(&cfg);
    }

    #[test]
    fn do_loop_enters_at_body() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(int n) {\n        do {\n            n = n - 1;\n        } while (n > 0);\n        use(n);\n    }\n}\n",
        );
        let body = node_at(&store, &cfg, 4);
        let cond = node_at(&store, &cfg, 5);
        assert_eq!(cfg.enter, Some(body));
        assert!(has_edge(&cfg, body, cond));
        assert_eq!(edge_kind(&cfg, cond, body), CfgEdgeKind::Control(true));
    }

    #[test]
    fn for_loop_wires_init_cond_body_update() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f() {\n        for (int i = 0; i < 10; i++) {\n            use(i);\n        }\n        done();\n    }\n}\n",
        );
        // init, condition, and updater all live on line 3; tell them apart
        // by node kind and wiring.
        let body = node_at(&store, &cfg, 4);
        let after = node_at(&store, &cfg, 6);
        let cond = cfg
            .nodes
            .iter()
            .copied()
            .find(|n| cfg.node_kind(*n) == CfgNodeKind::Control)
            .unwrap();
        let init = cfg
            .backward_edges(cond)
            .map(|e| e.from)
            .find(|n| cfg.node_kind(*n) == CfgNodeKind::Normal && *n != body)
            .expect("initializer feeds the condition");
        let update = cfg
            .forward_edges(body)
            .map(|e| e.to)
            .find(|n| *n != cond)
            .expect("body flows into the updater");
        assert!(has_edge(&cfg, init, cond));
        assert_eq!(edge_kind(&cfg, cond, body), CfgEdgeKind::Control(true));
        assert!(has_edge(&cfg, body, update));
        assert!(has_edge(&cfg, update, cond));
        assert_eq!(edge_kind(&cfg, cond, after), CfgEdgeKind::Control(false));
        assert_eq!(cfg.enter, Some(init));
    }

    #[test]
    fn switch_cases_fall_through_and_break() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(int k) {\n        switch (k) {\n            case 1:\n                k = 10;\n                break;\n            case 2:\n                k = 20;\n            default:\n                k = 30;\n        }\n        use(k);\n    }\n}\n",
        );
        let cond = node_at(&store, &cfg, 3);
        let case1 = node_at(&store, &cfg, 4);
        let stmt1 = node_at(&store, &cfg, 5);
        let brk = node_at(&store, &cfg, 6);
        let case2 = node_at(&store, &cfg, 7);
        let stmt2 = node_at(&store, &cfg, 8);
        let default_case = node_at(&store, &cfg, 9);
        let stmt3 = node_at(&store, &cfg, 10);
        let after = node_at(&store, &cfg, 12);

        // Every case label gets a true-edge from the switch condition.
        for case in [case1, case2, default_case] {
            assert_eq!(edge_kind(&cfg, cond, case), CfgEdgeKind::Control(true));
        }
        assert!(has_edge(&cfg, case1, stmt1));
        assert!(has_edge(&cfg, stmt1, brk));
        // No fall-through out of a break.
        assert!(!has_edge(&cfg, brk, case2));
        assert_eq!(edge_kind(&cfg, brk, after), CfgEdgeKind::Jump);
        // `case 2` falls through into `default`.
        assert!(has_edge(&cfg, stmt2, default_case));
        assert!(has_edge(&cfg, default_case, stmt3));
        assert!(has_edge(&cfg, stmt3, after));
        assert_mirrored(&cfg);
    }

    #[test]
    fn labeled_break_exits_outer_loop() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(boolean cond) {\n        outer: for (int i = 0; i < 10; i++) {\n            for (int j = 0; j < 10; j++) {\n                if (cond) {\n                    break outer;\n                }\n            }\n        }\n        done();\n    }\n}\n",
        );
        let brk = node_at(&store, &cfg, 6);
        let after = node_at(&store, &cfg, 10);
        assert_eq!(cfg.node_kind(brk), CfgNodeKind::Break);
        // The break bypasses the inner loop entirely and lands past the
        // labeled outer loop.
        assert_eq!(cfg.forward_neighbors(brk), vec![after]);
        assert_eq!(edge_kind(&cfg, brk, after), CfgEdgeKind::Jump);
        assert_mirrored(&cfg);
    }

    #[test]
    fn continue_targets_loop_condition() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f(int n) {\n        while (n > 0) {\n            if (n == 3) {\n                continue;\n            }\n            n = n - 1;\n        }\n    }\n}\n",
        );
        let cond = node_at(&store, &cfg, 3);
        let cont = node_at(&store, &cfg, 5);
        assert_eq!(cfg.node_kind(cont), CfgNodeKind::Continue);
        assert_eq!(cfg.forward_neighbors(cont), vec![cond]);
        assert_eq!(edge_kind(&cfg, cont, cond), CfgEdgeKind::Jump);
    }

    #[test]
    fn try_without_finally_leaves_no_pseudo() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f() {\n        try {\n            risky();\n        } catch (Exception e) {\n            handle(e);\n        }\n        done();\n    }\n}\n",
        );
        assert!(
            cfg.nodes
                .iter()
                .all(|n| cfg.node_kind(*n) != CfgNodeKind::Pseudo),
            "pseudo nodes must be spliced out"
        );
        let body = node_at(&store, &cfg, 4);
        let after = node_at(&store, &cfg, 8);
        assert!(has_edge(&cfg, body, after));
        // The catch body also reaches past the try, but nothing flows from
        // the guarded body into the handler.
        let handler = node_at(&store, &cfg, 6);
        assert!(has_edge(&cfg, handler, after));
        assert!(!has_edge(&cfg, body, handler));
        assert_mirrored(&cfg);
    }

    #[test]
    fn try_with_finally_funnels_all_exits() {
        let (store, _, cfg) = cfg_for(
            "class C {\n    void f() {\n        try {\n            risky();\n        } catch (Exception e) {\n            handle(e);\n        } finally {\n            cleanup();\n        }\n        done();\n    }\n}\n",
        );
        let body = node_at(&store, &cfg, 4);
        let handler = node_at(&store, &cfg, 6);
        let fin = node_at(&store, &cfg, 8);
        let after = node_at(&store, &cfg, 10);
        assert!(has_edge(&cfg, body, fin));
        assert!(has_edge(&cfg, handler, fin));
        assert!(has_edge(&cfg, fin, after));
        // The catch control node is unreachable from the method enter.
        let reachable = cfg.reachable_from_enter();
        let catch_cond = node_at(&store, &cfg, 5);
        assert!(!reachable.contains(&catch_cond));
        assert!(cfg.nodes.contains(&catch_cond));
    }

    #[test]
    fn reachable_nodes_are_registered() {
        let (_, _, cfg) = cfg_for(
            "class C {\n    void f(int n) {\n        while (n > 0) {\n            n = n - 1;\n        }\n    }\n}\n",
        );
        for n in cfg.reachable_from_enter() {
            assert!(cfg.nodes.contains(&n));
        }
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn build_twice_fails_fast() {
        let (mut store, unit) = lower("class C {\n    void f() {\n        go();\n    }\n}\n");
        let mut cfg = Cfg::new(unit.methods[0]);
        cfg.build(&mut store);
        cfg.build(&mut store);
    }

    #[test]
    fn factory_interns_nodes() {
        let (mut store, unit) = lower("class C {\n    void f() {\n        go();\n    }\n}\n");
        let factory = CfgNodeFactory::new();
        let stmt = store.method(unit.methods[0]).statements[0];
        let a = factory.make_normal_node(&store, stmt);
        let b = factory.make_normal_node(&store, stmt);
        assert_eq!(a, b);
        assert_eq!(factory.kind(a), Some(CfgNodeKind::Normal));
        // A pseudo node mints a fresh element every time.
        let p1 = factory.make_pseudo_node(&mut store);
        let p2 = factory.make_pseudo_node(&mut store);
        assert_ne!(p1, p2);
        assert_eq!(factory.kind(p1), Some(CfgNodeKind::Pseudo));
    }
}
