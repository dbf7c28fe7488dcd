use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::driver::Unit;
use crate::element::PeId;
use crate::pdg::Pdg;
use crate::scope::{DefCertainty, UseCertainty};

/// -------------------------------------------------------------------------
///  DDG JSON document
///
///  One entry per method, keyed `"<name>#<startLine>"`. Variables are merged
///  by (scope, name); ids follow first appearance while traversing the
///  graph's nodes (minus the enter and parameter nodes) in node order, defs
///  before uses at each node.
/// -------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct ScopeJson {
    #[serde(rename = "type")]
    pub scope_type: String,
    #[serde(rename = "lineNumber")]
    pub line_number: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct VariableJson {
    pub id: u64,
    #[serde(rename = "scopeJson")]
    pub scope_json: Option<ScopeJson>,
    pub name: String,
    #[serde(rename = "defStmtLineNumbers")]
    pub def_stmt_line_numbers: BTreeSet<u32>,
    #[serde(rename = "useStmtLineNumbers")]
    pub use_stmt_line_numbers: BTreeSet<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MethodJson {
    #[serde(rename = "variableJsons")]
    pub variable_jsons: Vec<VariableJson>,
}

pub fn ddg_document(unit: &Unit) -> BTreeMap<String, MethodJson> {
    let mut document = BTreeMap::new();
    for (method, pdg) in &unit.pdgs {
        let name = unit
            .store
            .method(*method)
            .name
            .clone()
            .unwrap_or_else(|| "<lambda>".to_owned());
        let key = format!("{name}#{}", unit.store.get(*method).start_line);
        document.insert(key, method_json(unit, pdg));
    }
    document
}

fn method_json(unit: &Unit, pdg: &Pdg) -> MethodJson {
    let skipped: BTreeSet<PeId> = pdg
        .enter
        .into_iter()
        .chain(pdg.parameter_nodes.iter().copied())
        .collect();

    let mut variables: Vec<VariableJson> = Vec::new();
    let mut by_key: HashMap<(Option<PeId>, String), usize> = HashMap::new();

    let mut slot = |variables: &mut Vec<VariableJson>,
                    scope: Option<PeId>,
                    name: &str|
     -> usize {
        let key = (scope, name.to_owned());
        if let Some(&i) = by_key.get(&key) {
            return i;
        }
        let scope_json = scope.map(|s| ScopeJson {
            scope_type: unit.store.get(s).category_name(),
            line_number: unit.store.get(s).start_line,
        });
        variables.push(VariableJson {
            id: variables.len() as u64,
            scope_json,
            name: name.to_owned(),
            def_stmt_line_numbers: BTreeSet::new(),
            use_stmt_line_numbers: BTreeSet::new(),
        });
        let i = variables.len() - 1;
        by_key.insert(key, i);
        i
    };

    for node in &pdg.nodes {
        if skipped.contains(node) {
            continue;
        }
        for def in unit.defuse.defs(*node) {
            if def.certainty < DefCertainty::MayDef {
                continue;
            }
            let line = def
                .relevant_stmt
                .map(|s| unit.store.get(s).start_line)
                .unwrap_or_else(|| unit.store.get(*node).start_line);
            let i = slot(&mut variables, def.var.scope, &def.var.main_name);
            variables[i].def_stmt_line_numbers.insert(line);
        }
        for usage in unit.defuse.uses(*node) {
            if usage.certainty < UseCertainty::MayUse {
                continue;
            }
            let line = usage
                .relevant_stmt
                .map(|s| unit.store.get(s).start_line)
                .unwrap_or_else(|| unit.store.get(*node).start_line);
            let i = slot(&mut variables, usage.var.scope, &usage.var.main_name);
            variables[i].use_stmt_line_numbers.insert(line);
        }
    }

    MethodJson {
        variable_jsons: variables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::utils::Settings;

    #[test]
    fn document_shape_and_merging() {
        let driver = Driver::new(Settings::default());
        let unit = driver
            .get_ddg(
                "class C {\n    int foo(int a) {\n        int x = a;\n        x = x + 1;\n        return x;\n    }\n}\n",
            )
            .unwrap();
        let doc = ddg_document(&unit);
        assert_eq!(doc.len(), 1);
        let method = doc.get("foo#2").expect("method keyed by name#line");

        let x = method
            .variable_jsons
            .iter()
            .find(|v| v.name == "x")
            .expect("x is recorded");
        // Declaration and reassignment merge into one entry.
        assert_eq!(x.def_stmt_line_numbers, BTreeSet::from([3, 4]));
        assert_eq!(x.use_stmt_line_numbers, BTreeSet::from([4, 5]));
        let scope = x.scope_json.as_ref().expect("x is scope-bound");
        assert_eq!(scope.scope_type, "Method");
        assert_eq!(scope.line_number, 2);

        let a = method
            .variable_jsons
            .iter()
            .find(|v| v.name == "a")
            .expect("parameter use is recorded");
        assert_eq!(a.use_stmt_line_numbers, BTreeSet::from([3]));
    }

    #[test]
    fn ids_follow_first_appearance() {
        let driver = Driver::new(Settings::default());
        let unit = driver
            .get_ddg(
                "class C {\n    void f() {\n        int x = 1;\n        int y = x;\n    }\n}\n",
            )
            .unwrap();
        let doc = ddg_document(&unit);
        let method = doc.get("f#2").unwrap();
        let ids: Vec<u64> = method.variable_jsons.iter().map(|v| v.id).collect();
        assert_eq!(ids, (0..ids.len() as u64).collect::<Vec<_>>());
        // x is defined on the earlier node, so it takes the first id.
        assert_eq!(method.variable_jsons[0].name, "x");
    }

    #[test]
    fn unbound_field_serializes_null_scope() {
        let driver = Driver::new(Settings::default());
        let unit = driver
            .get_ddg(
                "class C {\n    int source;\n    void f() {\n        int x = source;\n    }\n}\n",
            )
            .unwrap();
        let doc = ddg_document(&unit);
        let method = doc.get("f#3").unwrap();
        let field = method
            .variable_jsons
            .iter()
            .find(|v| v.name == "this.source")
            .expect("field alias entry");
        assert!(field.scope_json.is_none());

        let value = serde_json::to_value(&doc).unwrap();
        let entry = &value["f#3"]["variableJsons"];
        assert!(entry.is_array());
        assert!(
            entry
                .as_array()
                .unwrap()
                .iter()
                .any(|v| v["scopeJson"].is_null() && v["name"] == "this.source")
        );
    }
}
