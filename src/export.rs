use std::collections::BTreeMap;

use petgraph::Graph;
use petgraph::dot::Dot;

use crate::cfg::{Cfg, CfgEdgeKind};
use crate::element::PeStore;
use crate::pdg::{Pdg, PdgEdgeKind};

/// GraphViz rendering of finished graphs. The core graphs are id-keyed
/// arenas, so rendering materializes a petgraph mirror first.

fn node_label(store: &PeStore, id: crate::element::PeId) -> String {
    let pe = store.get(id);
    format!("L{}: {}", pe.start_line, pe.text)
}

pub fn cfg_dot(store: &PeStore, cfg: &Cfg) -> String {
    let mut graph: Graph<String, String> = Graph::new();
    let mut indices = BTreeMap::new();
    for node in &cfg.nodes {
        indices.insert(*node, graph.add_node(node_label(store, *node)));
    }
    for edge in cfg.edges() {
        let label = match edge.kind {
            CfgEdgeKind::Normal => "",
            CfgEdgeKind::Control(true) => "T",
            CfgEdgeKind::Control(false) => "F",
            CfgEdgeKind::Jump => "jump",
        };
        graph.add_edge(indices[&edge.from], indices[&edge.to], label.to_owned());
    }
    format!("{}", Dot::new(&graph))
}

pub fn pdg_dot(store: &PeStore, pdg: &Pdg) -> String {
    let mut graph: Graph<String, String> = Graph::new();
    let mut indices = BTreeMap::new();
    for node in &pdg.nodes {
        indices.insert(*node, graph.add_node(node_label(store, *node)));
    }
    for edge in pdg.edges() {
        let label = match &edge.kind {
            PdgEdgeKind::Control {
                true_dependence: true,
            } => "CD-T".to_owned(),
            PdgEdgeKind::Control {
                true_dependence: false,
            } => "CD-F".to_owned(),
            PdgEdgeKind::Data { variable } => format!("DD {variable}"),
            PdgEdgeKind::Execution => "exec".to_owned(),
        };
        graph.add_edge(indices[&edge.from], indices[&edge.to], label);
    }
    format!("{}", Dot::new(&graph))
}
