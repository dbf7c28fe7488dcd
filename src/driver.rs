use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::debug;
use tree_sitter::{Language, Tree};

use crate::cfg::Cfg;
use crate::defuse::DefUse;
use crate::element::{PeId, PeStore};
use crate::errors::{PdgError, PdgResult};
use crate::lower::{LoweredUnit, NoTypes, lower_unit};
use crate::pdg::Pdg;
use crate::scope::ScopeManager;
use crate::utils::Settings;
use crate::utils::config::DependenceConfig;

/// -------------------------------------------------------------------------
///  Driver
///
///  Orchestrates lowering -> CFG -> PDG for every method of a compilation
///  unit. Distinct units are independent, so the batch API fans them out on
///  the rayon pool; within a unit everything is sequential. Parsed trees
///  are cached in a small digest-keyed FIFO so repeated analysis of the
///  same source skips the parser.
/// -------------------------------------------------------------------------

thread_local! {
    static PARSER: RefCell<tree_sitter::Parser> = RefCell::new(tree_sitter::Parser::new());
}

const PARSE_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct ParseCache {
    entries: VecDeque<(blake3::Hash, Tree)>,
}

impl ParseCache {
    fn get(&self, key: &blake3::Hash) -> Option<Tree> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, tree)| tree.clone())
    }

    fn insert(&mut self, key: blake3::Hash, tree: Tree) {
        if self.entries.iter().any(|(k, _)| *k == key) {
            return;
        }
        if self.entries.len() >= PARSE_CACHE_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((key, tree));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Cfg,
    Ddg,
    Pdg,
}

/// Everything produced for one compilation unit. Graphs reference elements
/// in `store`, so results travel as one bundle.
pub struct Unit {
    pub store: PeStore,
    pub scopes: ScopeManager,
    pub defuse: DefUse,
    pub classes: Vec<PeId>,
    pub methods: Vec<PeId>,
    pub cfgs: BTreeMap<PeId, Cfg>,
    pub pdgs: BTreeMap<PeId, Pdg>,
}

pub struct Driver {
    settings: Settings,
    cache: Mutex<ParseCache>,
}

impl Driver {
    pub fn new(settings: Settings) -> Self {
        Driver {
            settings,
            cache: Mutex::new(ParseCache::default()),
        }
    }

    /// Per-method CFGs for one source string, in method id order.
    pub fn get_cfg(&self, source: &str) -> PdgResult<Unit> {
        let mut unit = self.lower(source)?;
        for method in unit.methods.clone() {
            let mut cfg = Cfg::new(method);
            cfg.build(&mut unit.store);
            unit.cfgs.insert(method, cfg);
        }
        Ok(unit)
    }

    /// Data dependence only.
    pub fn get_ddg(&self, source: &str) -> PdgResult<Unit> {
        let mut options = self.settings.dependence;
        options.control = false;
        options.execution = false;
        options.data = true;
        self.build_pdgs(source, options)
    }

    /// All three dependence kinds, as configured.
    pub fn get_pdg(&self, source: &str) -> PdgResult<Unit> {
        self.build_pdgs(source, self.settings.dependence)
    }

    pub fn analyze(&self, source: &str, kind: GraphKind) -> PdgResult<Unit> {
        match kind {
            GraphKind::Cfg => self.get_cfg(source),
            GraphKind::Ddg => self.get_ddg(source),
            GraphKind::Pdg => self.get_pdg(source),
        }
    }

    /// Analyze many independent sources on the global rayon pool.
    pub fn analyze_many(&self, sources: &[String], kind: GraphKind) -> Vec<PdgResult<Unit>> {
        sources
            .par_iter()
            .map(|source| self.analyze(source, kind))
            .collect()
    }

    fn build_pdgs(&self, source: &str, options: DependenceConfig) -> PdgResult<Unit> {
        let mut unit = self.lower(source)?;
        for method in unit.methods.clone() {
            let mut pdg = Pdg::new(method, options);
            pdg.build(&mut unit.store, &mut unit.scopes, &mut unit.defuse);
            unit.pdgs.insert(method, pdg);
        }
        Ok(unit)
    }

    fn lower(&self, source: &str) -> PdgResult<Unit> {
        let source = source.trim_start_matches('\u{feff}');
        let tree = self.parse(source)?;
        let mut store = PeStore::new();
        let LoweredUnit {
            classes,
            mut methods,
        } = lower_unit(&tree, source.as_bytes(), &mut store, &NoTypes);
        methods.sort();
        Ok(Unit {
            store,
            scopes: ScopeManager::new(),
            defuse: DefUse::new(&self.settings),
            classes,
            methods,
            cfgs: BTreeMap::new(),
            pdgs: BTreeMap::new(),
        })
    }

    fn parse(&self, source: &str) -> PdgResult<Tree> {
        let key = blake3::hash(source.as_bytes());
        if let Some(tree) = self.cache.lock()?.get(&key) {
            debug!(target: "driver", "parse cache hit for {key}");
            return Ok(tree);
        }
        let tree = PARSER.with(|cell| {
            let mut parser = cell.borrow_mut();
            parser.set_language(&Language::from(tree_sitter_java::LANGUAGE))?;
            parser
                .parse(source.as_bytes(), None)
                .ok_or_else(|| PdgError::Msg("tree-sitter produced no tree".to_owned()))
        })?;
        self.cache.lock()?.insert(key, tree.clone());
        Ok(tree)
    }

    #[cfg(test)]
    fn cached_trees(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdg::PdgEdgeKind;
    use std::collections::BTreeSet;

    const TWO_METHODS: &str = "class C {\n    int first() {\n        return 1;\n    }\n\n    int second() {\n        return 2;\n    }\n}\n";

    fn driver() -> Driver {
        Driver::new(Settings::default())
    }

    fn line_edges(unit: &Unit) -> BTreeSet<(u32, u32, String)> {
        unit.pdgs
            .values()
            .flat_map(|pdg| {
                pdg.edges().map(|e| {
                    let label = match &e.kind {
                        PdgEdgeKind::Data { variable } => format!("data:{variable}"),
                        PdgEdgeKind::Control { true_dependence } => {
                            format!("control:{true_dependence}")
                        }
                        PdgEdgeKind::Execution => "execution".to_owned(),
                    };
                    (
                        unit.store.get(e.from).start_line,
                        unit.store.get(e.to).start_line,
                        label,
                    )
                })
            })
            .collect()
    }

    #[test]
    fn methods_come_back_in_id_order() {
        let driver = driver();
        let unit = driver.get_cfg(TWO_METHODS).unwrap();
        assert_eq!(unit.classes.len(), 1);
        assert_eq!(unit.methods.len(), 2);
        assert!(unit.methods[0] < unit.methods[1]);
        assert_eq!(
            unit.store.method(unit.methods[0]).name.as_deref(),
            Some("first")
        );
        let keys: Vec<PeId> = unit.cfgs.keys().copied().collect();
        assert_eq!(keys, unit.methods);
    }

    #[test]
    fn ddg_disables_control_and_execution() {
        let driver = driver();
        let unit = driver
            .get_ddg("class C {\n    void f() {\n        int x = 1;\n        use(x);\n    }\n}\n")
            .unwrap();
        let pdg = unit.pdgs.values().next().unwrap();
        assert!(pdg
            .edges()
            .all(|e| matches!(e.kind, PdgEdgeKind::Data { .. })));
    }

    #[test]
    fn repeated_analysis_is_equivalent_up_to_ids() {
        let driver = driver();
        let a = driver.get_pdg(TWO_METHODS).unwrap();
        let b = driver.get_pdg(TWO_METHODS).unwrap();
        // Fresh ids every run, but the line-level edge relation is stable.
        assert_eq!(line_edges(&a), line_edges(&b));
    }

    #[test]
    fn parse_cache_deduplicates_sources() {
        let driver = driver();
        driver.get_ddg(TWO_METHODS).unwrap();
        driver.get_ddg(TWO_METHODS).unwrap();
        assert_eq!(driver.cached_trees(), 1);
        driver
            .get_ddg("class D {\n    void g() {\n        go();\n    }\n}\n")
            .unwrap();
        assert_eq!(driver.cached_trees(), 2);
    }

    #[test]
    fn parse_cache_evicts_fifo_at_capacity() {
        let driver = driver();
        for i in 0..(PARSE_CACHE_CAPACITY + 5) {
            let source = format!("class C{i} {{\n    void f() {{\n        go();\n    }}\n}}\n");
            driver.get_cfg(&source).unwrap();
        }
        assert_eq!(driver.cached_trees(), PARSE_CACHE_CAPACITY);
    }

    #[test]
    fn bom_is_tolerated() {
        let driver = driver();
        let source = format!("\u{feff}{TWO_METHODS}");
        let unit = driver.get_ddg(&source).unwrap();
        assert_eq!(unit.methods.len(), 2);
    }

    #[test]
    fn analyze_many_runs_units_independently() {
        let driver = driver();
        let sources = vec![
            TWO_METHODS.to_owned(),
            "class D {\n    void g(int n) {\n        int m = n;\n        use(m);\n    }\n}\n"
                .to_owned(),
        ];
        let results = driver.analyze_many(&sources, GraphKind::Pdg);
        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.is_ok());
        }
        // Same source analyzed in parallel and serially agrees on edges.
        let parallel = results.into_iter().next().unwrap().unwrap();
        let serial = driver.get_pdg(TWO_METHODS).unwrap();
        assert_eq!(line_edges(&parallel), line_edges(&serial));
    }

    #[test]
    fn empty_source_yields_empty_maps() {
        let driver = driver();
        let unit = driver.get_pdg("// nothing here\n").unwrap();
        assert!(unit.methods.is_empty());
        assert!(unit.pdgs.is_empty());
    }
}
