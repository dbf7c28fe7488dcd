use tracing::debug;
use tree_sitter::{Node, Tree};

use crate::element::{
    ExprCategory, PeId, PeKind, PeStore, ProgramElement, StmtCategory, VarCategory,
};

/// -------------------------------------------------------------------------
///  AST -> PE lowering
///
///  One walk over the tree-sitter AST produces the program-element forest.
///  The walker also descends into node kinds the model does not cover, so
///  every handler goes through a work stack with a safe-pop contract:
///  `push` returns the resulting stack size, and `pop(max_size_after, kind)`
///  yields a value only when exactly one element came off and it matches the
///  expected kind. A child subtree that produces zero or many spurious
///  pushes therefore cannot poison its parent.
/// -------------------------------------------------------------------------

/// Optional receiver-type lookup for method invocations. tree-sitter carries
/// no bindings, so the default resolves nothing and `apiName` falls back to
/// the receiver's source text.
pub trait TypeResolver {
    fn resolve_receiver(&self, node: &Node) -> Option<String>;
}

pub struct NoTypes;

impl TypeResolver for NoTypes {
    fn resolve_receiver(&self, _node: &Node) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
pub struct LoweredUnit {
    pub classes: Vec<PeId>,
    pub methods: Vec<PeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Statement,
    Expression,
    Method,
    Class,
}

impl Expected {
    fn matches(self, store: &PeStore, id: PeId) -> bool {
        match (self, &store.get(id).kind) {
            (Expected::Statement, PeKind::Statement(_)) => true,
            (Expected::Expression, PeKind::Expression(_)) => true,
            // A lambda is a method that may stand where expressions do.
            (Expected::Expression, PeKind::Method(m)) => m.is_lambda,
            (Expected::Method, PeKind::Method(_)) => true,
            (Expected::Class, PeKind::Class(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct WorkStack {
    items: Vec<PeId>,
}

impl WorkStack {
    fn push(&mut self, pe: PeId) -> usize {
        self.items.push(pe);
        self.items.len()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// Pop entries until the stack holds at most `max_size_after` elements.
    /// Returns the popped element only when exactly one came off and it is
    /// of the expected kind.
    fn pop(&mut self, max_size_after: usize, expected: Expected, store: &PeStore) -> Option<PeId> {
        let mut last = None;
        let mut count = 0usize;
        while self.items.len() > max_size_after {
            last = self.items.pop();
            count += 1;
        }
        match (count, last) {
            (1, Some(id)) if expected.matches(store, id) => Some(id),
            _ => None,
        }
    }

    fn discard_to(&mut self, size: usize) {
        self.items.truncate(size);
    }

    fn top(&self) -> Option<PeId> {
        self.items.last().copied()
    }
}

pub fn lower_unit(
    tree: &Tree,
    source: &[u8],
    store: &mut PeStore,
    resolver: &dyn TypeResolver,
) -> LoweredUnit {
    let mut lowering = Lowering {
        source,
        resolver,
        stack: WorkStack::default(),
        unit: LoweredUnit::default(),
    };
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let before = lowering.stack.len();
        lowering.visit(store, child);
        lowering.stack.discard_to(before);
    }
    debug!(
        target: "lower",
        "lowered unit: {} classes, {} methods",
        lowering.unit.classes.len(),
        lowering.unit.methods.len()
    );
    lowering.unit
}

struct Lowering<'a> {
    source: &'a [u8],
    resolver: &'a dyn TypeResolver,
    stack: WorkStack,
    unit: LoweredUnit,
}

fn start_line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

fn end_line(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

impl<'a> Lowering<'a> {
    fn text_of(&self, node: Node) -> String {
        std::str::from_utf8(&self.source[node.start_byte()..node.end_byte()])
            .map(str::to_owned)
            .unwrap_or_default()
    }

    fn modifiers_of(&self, node: Node) -> Vec<String> {
        let mut cursor = node.walk();
        node.children(&mut cursor)
            .find(|c| c.kind() == "modifiers")
            .map(|mods| {
                let mut inner = mods.walk();
                mods.children(&mut inner).map(|m| self.text_of(m)).collect()
            })
            .unwrap_or_default()
    }

    fn visit(&mut self, store: &mut PeStore, node: Node) {
        match node.kind() {
            "class_declaration" => {
                self.visit_class(store, node);
            }
            "method_declaration" | "constructor_declaration" => self.visit_method(store, node),
            "lambda_expression" => self.visit_lambda(store, node),

            "block" => self.visit_block(store, node),
            "expression_statement" => self.visit_expression_statement(store, node),
            "local_variable_declaration" => self.visit_local_variable_declaration(store, node),
            "variable_declarator" => self.visit_variable_declarator(store, node),
            "if_statement" => self.visit_if(store, node),
            "while_statement" => self.visit_while(store, node),
            "do_statement" => self.visit_do(store, node),
            "for_statement" => self.visit_for(store, node),
            "enhanced_for_statement" => self.visit_foreach(store, node),
            "switch_expression" => self.visit_switch(store, node),
            "labeled_statement" => self.visit_labeled(store, node),
            "break_statement" => self.visit_jump(store, node, StmtCategory::Break, "break"),
            "continue_statement" => self.visit_jump(store, node, StmtCategory::Continue, "continue"),
            "return_statement" => self.visit_simple_stmt(store, node, StmtCategory::Return, "return"),
            "throw_statement" => self.visit_simple_stmt(store, node, StmtCategory::Throw, "throw"),
            "assert_statement" => self.visit_assert(store, node),
            "try_statement" | "try_with_resources_statement" => self.visit_try(store, node),
            "synchronized_statement" => self.visit_synchronized(store, node),

            "assignment_expression" => self.visit_binary_like(store, node, ExprCategory::Assignment),
            "binary_expression" => self.visit_binary_like(store, node, ExprCategory::Infix),
            "instanceof_expression" => self.visit_instanceof(store, node),
            "update_expression" => self.visit_update(store, node),
            "unary_expression" => self.visit_unary(store, node),
            "cast_expression" => self.visit_cast(store, node),
            "ternary_expression" => self.visit_ternary(store, node),
            "parenthesized_expression" => self.visit_parenthesized(store, node),
            "method_invocation" => self.visit_method_invocation(store, node),
            "field_access" => self.visit_field_access(store, node),
            "array_access" => self.visit_array_access(store, node),
            "object_creation_expression" => self.visit_object_creation(store, node),
            "array_creation_expression" => self.visit_array_creation(store, node),
            "array_initializer" => self.visit_array_initializer(store, node),
            "scoped_identifier" => self.visit_scoped_identifier(store, node),
            "explicit_constructor_invocation" => self.visit_explicit_constructor(store, node),

            "identifier" => self.push_leaf(store, node, ExprCategory::SimpleName),
            "this" => self.push_leaf(store, node, ExprCategory::This),
            "class_literal" => self.push_leaf(store, node, ExprCategory::TypeLiteral),
            "string_literal" => self.push_leaf(store, node, ExprCategory::String),
            "character_literal" => self.push_leaf(store, node, ExprCategory::Character),
            "true" | "false" => self.push_leaf(store, node, ExprCategory::Boolean),
            "null_literal" => self.push_leaf(store, node, ExprCategory::Null),
            "decimal_integer_literal"
            | "hex_integer_literal"
            | "octal_integer_literal"
            | "binary_integer_literal"
            | "decimal_floating_point_literal"
            | "hex_floating_point_literal" => self.push_leaf(store, node, ExprCategory::Number),

            _ => self.visit_generic(store, node),
        }
    }

    /// Unsupported node: descend so nested supported elements are still
    /// observed, then drop whatever the subtree pushed. Statements and
    /// expressions synthesized inside unsupported contexts never emit.
    fn visit_generic(&mut self, store: &mut PeStore, node: Node) {
        let before = self.stack.len();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(store, child);
        }
        self.stack.discard_to(before);
    }

    fn push_leaf(&mut self, store: &mut PeStore, node: Node, category: ExprCategory) {
        let mut pe = ProgramElement::expression(category, start_line(node), end_line(node));
        pe.text = self.text_of(node);
        let id = store.insert(pe);
        self.stack.push(id);
    }

    fn new_operator(&mut self, store: &mut PeStore, token: &str, line: u32) -> PeId {
        store.insert(ProgramElement::operator(token, line))
    }

    // ---------------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------------

    fn visit_class(&mut self, store: &mut PeStore, node: Node) {
        let name = node.child_by_field_name("name").map(|n| self.text_of(n));
        let mut pe = ProgramElement::class(start_line(node), end_line(node));
        pe.modifiers = self.modifiers_of(node);
        pe.text = match &name {
            Some(n) => format!("class {n}"),
            None => "class".to_owned(),
        };
        if let PeKind::Class(c) = &mut pe.kind {
            c.name = name;
        }
        let class = store.insert(pe);
        self.unit.classes.push(class);
        let size = self.stack.push(class);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_class_body(store, class, body, size, true);
        }
        // The class stays on the stack for the enclosing context to claim.
    }

    fn visit_class_body(
        &mut self,
        store: &mut PeStore,
        class: PeId,
        body: Node,
        size: usize,
        register_methods: bool,
    ) {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            match child.kind() {
                "method_declaration" | "constructor_declaration" => {
                    self.visit_method(store, child);
                    if let Some(m) = self.stack.pop(size, Expected::Method, store) {
                        if let PeKind::Class(c) = &mut store.get_mut(class).kind {
                            c.methods.push(m);
                        }
                        if register_methods {
                            self.unit.methods.push(m);
                        }
                    }
                }
                "class_declaration" => {
                    self.visit_class(store, child);
                    self.stack.pop(size, Expected::Class, store);
                }
                _ => {
                    self.visit(store, child);
                    self.stack.discard_to(size);
                }
            }
        }
    }

    fn visit_method(&mut self, store: &mut PeStore, node: Node) {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text_of(n))
            .unwrap_or_default();
        let mut parameters = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for p in params.named_children(&mut cursor) {
                if p.kind() != "formal_parameter" {
                    continue;
                }
                let ty = p
                    .child_by_field_name("type")
                    .map(|t| self.text_of(t))
                    .unwrap_or_default();
                let Some(pname) = p.child_by_field_name("name").map(|n| self.text_of(n)) else {
                    continue;
                };
                parameters.push(store.insert(ProgramElement::variable(
                    VarCategory::Parameter,
                    &ty,
                    &pname,
                    start_line(p),
                )));
            }
        }

        let mut pe = ProgramElement::method(start_line(node), end_line(node));
        pe.modifiers = self.modifiers_of(node);
        let param_names: Vec<&str> = parameters
            .iter()
            .map(|p| store.variable(*p).name.as_str())
            .collect();
        pe.text = format!("{name}({})", param_names.join(", "));
        if let PeKind::Method(m) = &mut pe.kind {
            m.name = Some(name);
            m.parameters = parameters;
        }
        let method = store.insert(pe);

        let size = self.stack.push(method);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(block) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(method, block);
            }
        }
    }

    fn visit_lambda(&mut self, store: &mut PeStore, node: Node) {
        let mut parameters = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            match params.kind() {
                "identifier" => parameters.push(store.insert(ProgramElement::variable(
                    VarCategory::Parameter,
                    "",
                    &self.text_of(params),
                    start_line(params),
                ))),
                _ => {
                    let mut cursor = params.walk();
                    for p in params.named_children(&mut cursor) {
                        match p.kind() {
                            "identifier" => parameters.push(store.insert(ProgramElement::variable(
                                VarCategory::Parameter,
                                "",
                                &self.text_of(p),
                                start_line(p),
                            ))),
                            "formal_parameter" => {
                                let ty = p
                                    .child_by_field_name("type")
                                    .map(|t| self.text_of(t))
                                    .unwrap_or_default();
                                if let Some(pname) =
                                    p.child_by_field_name("name").map(|n| self.text_of(n))
                                {
                                    parameters.push(store.insert(ProgramElement::variable(
                                        VarCategory::Parameter,
                                        &ty,
                                        &pname,
                                        start_line(p),
                                    )));
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        let mut pe = ProgramElement::method(start_line(node), end_line(node));
        pe.text = self.text_of(node);
        if let PeKind::Method(m) = &mut pe.kind {
            m.is_lambda = true;
            m.parameters = parameters;
        }
        let method = store.insert(pe);

        let size = self.stack.push(method);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if body.kind() == "block" {
                if let Some(block) = self.stack.pop(size, Expected::Statement, store) {
                    store.attach_statement(method, block);
                }
            } else if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                if let PeKind::Method(m) = &mut store.get_mut(method).kind {
                    m.lambda_body = Some(expr);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn visit_block(&mut self, store: &mut PeStore, node: Node) {
        let block = store.insert(ProgramElement::statement(
            StmtCategory::SimpleBlock,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(block);
        let mut cursor = node.walk();
        let mut texts = Vec::new();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "line_comment" | "block_comment" => {}
                "class_declaration" => {
                    self.visit_class(store, child);
                    if let Some(class) = self.stack.pop(size, Expected::Class, store) {
                        let mut td = ProgramElement::statement(
                            StmtCategory::TypeDeclaration,
                            start_line(child),
                            end_line(child),
                        );
                        td.text = store.get(class).text.clone();
                        let td = store.insert(td);
                        store.attach_statement(block, td);
                        texts.push(store.get(td).text.clone());
                    }
                }
                _ => {
                    self.visit(store, child);
                    if let Some(stmt) = self.stack.pop(size, Expected::Statement, store) {
                        texts.push(store.get(stmt).text.clone());
                        store.attach_statement(block, stmt);
                    }
                }
            }
        }
        store.get_mut(block).text = format!("{{ {} }}", texts.join(" "));
    }

    fn visit_expression_statement(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Expression,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        let mut cursor = node.walk();
        if let Some(inner) = node.named_children(&mut cursor).next() {
            self.visit(store, inner);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                let text = format!("{};", store.get(expr).text);
                store.get_mut(stmt).text = text;
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.expressions.push(expr);
                }
            }
        }
    }

    fn visit_local_variable_declaration(&mut self, store: &mut PeStore, node: Node) {
        let in_for_init = node.parent().is_some_and(|p| p.kind() == "for_statement");
        let ty = node
            .child_by_field_name("type")
            .map(|t| self.text_of(t))
            .unwrap_or_default();
        let container = if in_for_init {
            store.insert(ProgramElement::expression(
                ExprCategory::VariableDeclarationExpression,
                start_line(node),
                end_line(node),
            ))
        } else {
            store.insert(ProgramElement::statement(
                StmtCategory::VariableDeclaration,
                start_line(node),
                end_line(node),
            ))
        };
        store.get_mut(container).modifiers = self.modifiers_of(node);

        let size = self.stack.push(container);
        let mut fragments = Vec::new();
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
        for decl in declarators {
            self.visit(store, decl);
            if let Some(fragment) = self.stack.pop(size, Expected::Expression, store) {
                fragments.push(fragment);
            }
        }
        let rendered: Vec<String> = fragments
            .iter()
            .map(|f| store.get(*f).text.clone())
            .collect();
        let joined = rendered.join(", ");
        match &mut store.get_mut(container).kind {
            PeKind::Expression(e) => e.expressions = fragments,
            PeKind::Statement(s) => s.expressions = fragments,
            _ => unreachable!(),
        }
        store.get_mut(container).text = if in_for_init {
            format!("{ty} {joined}")
        } else {
            format!("{ty} {joined};")
        };
    }

    fn visit_variable_declarator(&mut self, store: &mut PeStore, node: Node) {
        let fragment = store.insert(ProgramElement::expression(
            ExprCategory::VariableDeclarationFragment,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(fragment);
        let mut children = Vec::new();
        if let Some(name) = node.child_by_field_name("name") {
            self.visit(store, name);
            if let Some(id) = self.stack.pop(size, Expected::Expression, store) {
                children.push(id);
            }
        }
        if let Some(value) = node.child_by_field_name("value") {
            self.visit(store, value);
            if let Some(id) = self.stack.pop(size, Expected::Expression, store) {
                children.push(id);
            }
        }
        let text = match children.as_slice() {
            [name, init] => format!("{} = {}", store.get(*name).text, store.get(*init).text),
            [name] => store.get(*name).text.clone(),
            _ => String::new(),
        };
        store.get_mut(fragment).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(fragment).kind {
            e.expressions = children;
        }
    }

    fn visit_if(&mut self, store: &mut PeStore, node: Node) {
        let alternative = node.child_by_field_name("alternative");
        // The recorded span of an if-statement stops on the line before the
        // else branch.
        let end = match alternative {
            Some(alt) => (alt.start_position().row as u32).max(start_line(node)),
            None => end_line(node),
        };
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::If,
            start_line(node),
            end,
        ));
        let size = self.stack.push(stmt);

        if let Some(cond) = node.child_by_field_name("condition") {
            self.visit_condition(store, cond);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                store.set_condition(stmt, expr);
                let text = format!("if ({})", store.get(expr).text);
                store.get_mut(stmt).text = text;
            }
        }
        if let Some(consequence) = node.child_by_field_name("consequence") {
            self.visit(store, consequence);
            if let Some(then) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, then);
            }
        }
        if let Some(alt) = alternative {
            self.visit(store, alt);
            if let Some(else_branch) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_else_statement(stmt, else_branch);
            }
        }
    }

    /// Conditions arrive wrapped in a `parenthesized_expression`; the model
    /// stores the inner expression, like the original AST accessors do.
    fn visit_condition(&mut self, store: &mut PeStore, node: Node) {
        if node.kind() == "parenthesized_expression" {
            let mut cursor = node.walk();
            if let Some(inner) = node.named_children(&mut cursor).next() {
                self.visit(store, inner);
                return;
            }
        }
        self.visit(store, node);
    }

    fn visit_while(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::While,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        if let Some(cond) = node.child_by_field_name("condition") {
            self.visit_condition(store, cond);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                store.set_condition(stmt, expr);
                let text = format!("while ({})", store.get(expr).text);
                store.get_mut(stmt).text = text;
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }
    }

    fn visit_do(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Do,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }
        if let Some(cond) = node.child_by_field_name("condition") {
            self.visit_condition(store, cond);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                store.set_condition(stmt, expr);
                let text = format!("do ... while ({})", store.get(expr).text);
                store.get_mut(stmt).text = text;
            }
        }
    }

    fn visit_for(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::For,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);

        let mut cursor = node.walk();
        let inits: Vec<Node> = node.children_by_field_name("init", &mut cursor).collect();
        for init in inits {
            self.visit(store, init);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.initializers.push(expr);
                }
            }
        }

        if let Some(cond) = node.child_by_field_name("condition") {
            self.visit_condition(store, cond);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                store.set_condition(stmt, expr);
            }
        }
        if store.stmt(stmt).condition.is_none() {
            // `for (;;)` still gets a condition node so loop invariants hold.
            let mut always = ProgramElement::expression(
                ExprCategory::Boolean,
                start_line(node),
                start_line(node),
            );
            always.text = "true".to_owned();
            let always = store.insert(always);
            store.set_condition(stmt, always);
        }
        let cond_text = store
            .stmt(stmt)
            .condition
            .map(|c| store.get(c).text.clone())
            .unwrap_or_default();
        store.get_mut(stmt).text = format!("for (; {cond_text};)");

        let mut cursor = node.walk();
        let updates: Vec<Node> = node.children_by_field_name("update", &mut cursor).collect();
        for update in updates {
            self.visit(store, update);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.updaters.push(expr);
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }
    }

    fn visit_foreach(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Foreach,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);

        let name = node.child_by_field_name("name");
        let value = node.child_by_field_name("value");
        let ty = node
            .child_by_field_name("type")
            .map(|t| self.text_of(t))
            .unwrap_or_default();
        if let (Some(name), Some(value)) = (name, value) {
            self.visit(store, name);
            let name_pe = self.stack.pop(size, Expected::Expression, store);
            self.visit(store, value);
            let value_pe = self.stack.pop(size, Expected::Expression, store);
            if let Some(name_pe) = name_pe {
                // The loop binding is modeled as a declaration fragment whose
                // initializer is the iterable, so the ordinary def/use rules
                // yield the loop-variable write and the iterable reads.
                let mut fragment = ProgramElement::expression(
                    ExprCategory::VariableDeclarationFragment,
                    start_line(node),
                    start_line(node),
                );
                fragment.text = match value_pe {
                    Some(v) => format!("{} : {}", store.get(name_pe).text, store.get(v).text),
                    None => store.get(name_pe).text.clone(),
                };
                let fragment = store.insert(fragment);
                let mut fragment_children = vec![name_pe];
                fragment_children.extend(value_pe);
                if let PeKind::Expression(e) = &mut store.get_mut(fragment).kind {
                    e.expressions = fragment_children;
                }

                let mut binding = ProgramElement::expression(
                    ExprCategory::VariableDeclarationExpression,
                    start_line(node),
                    start_line(node),
                );
                binding.text = format!("{ty} {}", store.get(fragment).text);
                let binding = store.insert(binding);
                if let PeKind::Expression(e) = &mut store.get_mut(binding).kind {
                    e.expressions = vec![fragment];
                }
                store.set_condition(stmt, binding);
                let text = format!("for ({})", store.get(binding).text);
                store.get_mut(stmt).text = text;
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }
    }

    fn visit_switch(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Switch,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        if let Some(cond) = node.child_by_field_name("condition") {
            self.visit_condition(store, cond);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                store.set_condition(stmt, expr);
                let text = format!("switch ({})", store.get(expr).text);
                store.get_mut(stmt).text = text;
            }
        }

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for group in body.named_children(&mut cursor) {
            match group.kind() {
                "switch_block_statement_group" => {
                    let mut inner = group.walk();
                    for child in group.named_children(&mut inner) {
                        if child.kind() == "switch_label" {
                            self.visit_switch_label(store, child);
                        } else {
                            self.visit(store, child);
                        }
                        if let Some(s) = self.stack.pop(size, Expected::Statement, store) {
                            store.attach_statement(stmt, s);
                        }
                    }
                }
                "switch_rule" => {
                    let mut inner = group.walk();
                    let children: Vec<Node> = group.named_children(&mut inner).collect();
                    for child in children {
                        match child.kind() {
                            "switch_label" => {
                                self.visit_switch_label(store, child);
                                if let Some(s) = self.stack.pop(size, Expected::Statement, store) {
                                    store.attach_statement(stmt, s);
                                }
                            }
                            "block" | "throw_statement" => {
                                self.visit(store, child);
                                if let Some(s) = self.stack.pop(size, Expected::Statement, store) {
                                    store.attach_statement(stmt, s);
                                }
                            }
                            _ => {
                                // Arrow rule with a bare expression body.
                                self.visit(store, child);
                                if let Some(e) = self.stack.pop(size, Expected::Expression, store) {
                                    let mut wrapper = ProgramElement::statement(
                                        StmtCategory::Expression,
                                        start_line(child),
                                        end_line(child),
                                    );
                                    wrapper.text = format!("{};", store.get(e).text);
                                    let wrapper = store.insert(wrapper);
                                    if let PeKind::Statement(s) = &mut store.get_mut(wrapper).kind {
                                        s.expressions.push(e);
                                    }
                                    store.attach_statement(stmt, wrapper);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_switch_label(&mut self, store: &mut PeStore, node: Node) {
        let case = store.insert(ProgramElement::statement(
            StmtCategory::Case,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(case);
        let mut cursor = node.walk();
        let labels: Vec<Node> = node.named_children(&mut cursor).collect();
        for label in labels {
            self.visit(store, label);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                if let PeKind::Statement(s) = &mut store.get_mut(case).kind {
                    s.expressions.push(expr);
                }
            }
        }
        let text = match store.stmt(case).expressions.first() {
            Some(e) => format!("case {}:", store.get(*e).text),
            None => "default:".to_owned(),
        };
        store.get_mut(case).text = text;
    }

    fn visit_labeled(&mut self, store: &mut PeStore, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        let Some(label) = children.first().filter(|c| c.kind() == "identifier") else {
            self.visit_generic(store, node);
            return;
        };
        let label = self.text_of(*label);
        let before = self.stack.len();
        for child in children.iter().skip(1) {
            self.visit(store, *child);
        }
        if self.stack.len() == before + 1 {
            if let Some(top) = self.stack.top() {
                if store.get(top).as_statement().is_some() {
                    store.set_label(top, &label);
                }
            }
        }
    }

    fn visit_jump(
        &mut self,
        store: &mut PeStore,
        node: Node,
        category: StmtCategory,
        keyword: &str,
    ) {
        let stmt = store.insert(ProgramElement::statement(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        let mut text = format!("{keyword};");
        let mut cursor = node.walk();
        if let Some(target) = node.named_children(&mut cursor).next() {
            self.visit(store, target);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                text = format!("{keyword} {};", store.get(expr).text);
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.expressions.push(expr);
                }
            }
        }
        store.get_mut(stmt).text = text;
    }

    fn visit_simple_stmt(
        &mut self,
        store: &mut PeStore,
        node: Node,
        category: StmtCategory,
        keyword: &str,
    ) {
        let stmt = store.insert(ProgramElement::statement(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        let mut text = format!("{keyword};");
        let mut cursor = node.walk();
        if let Some(value) = node.named_children(&mut cursor).next() {
            self.visit(store, value);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                text = format!("{keyword} {};", store.get(expr).text);
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.expressions.push(expr);
                }
            }
        }
        store.get_mut(stmt).text = text;
    }

    fn visit_assert(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Assert,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(store, child);
            if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                if let PeKind::Statement(s) = &mut store.get_mut(stmt).kind {
                    s.expressions.push(expr);
                }
            }
        }
        let rendered: Vec<String> = store
            .stmt(stmt)
            .expressions
            .iter()
            .map(|e| store.get(*e).text.clone())
            .collect();
        store.get_mut(stmt).text = format!("assert {};", rendered.join(" : "));
    }

    fn visit_try(&mut self, store: &mut PeStore, node: Node) {
        let mut cursor = node.walk();
        // The recorded span stops before the first catch or finally clause.
        let end = node
            .children(&mut cursor)
            .find(|c| c.kind() == "catch_clause" || c.kind() == "finally_clause")
            .map(|c| (c.start_position().row as u32).max(start_line(node)))
            .unwrap_or_else(|| end_line(node));
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Try,
            start_line(node),
            end,
        ));
        store.get_mut(stmt).text = "try".to_owned();
        let size = self.stack.push(stmt);

        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }

        let mut cursor = node.walk();
        let clauses: Vec<Node> = node.children(&mut cursor).collect();
        for clause in clauses {
            match clause.kind() {
                "catch_clause" => {
                    self.visit_catch(store, clause);
                    if let Some(c) = self.stack.pop(size, Expected::Statement, store) {
                        store.attach_catch(stmt, c);
                    }
                }
                "finally_clause" => {
                    let mut inner = clause.walk();
                    if let Some(block) =
                        clause.children(&mut inner).find(|c| c.kind() == "block")
                    {
                        self.visit(store, block);
                        if let Some(f) = self.stack.pop(size, Expected::Statement, store) {
                            store.set_finally(stmt, f);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_catch(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Catch,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);

        let mut cursor = node.walk();
        if let Some(param) = node
            .children(&mut cursor)
            .find(|c| c.kind() == "catch_formal_parameter")
        {
            let mut inner = param.walk();
            let name = param
                .named_children(&mut inner)
                .find(|c| c.kind() == "identifier")
                .map(|c| self.text_of(c));
            if let Some(name) = name {
                let mut simple = ProgramElement::expression(
                    ExprCategory::SimpleName,
                    start_line(param),
                    end_line(param),
                );
                simple.text = name.clone();
                let simple = store.insert(simple);

                let mut fragment = ProgramElement::expression(
                    ExprCategory::VariableDeclarationFragment,
                    start_line(param),
                    end_line(param),
                );
                fragment.text = name.clone();
                let fragment = store.insert(fragment);
                if let PeKind::Expression(e) = &mut store.get_mut(fragment).kind {
                    e.expressions = vec![simple];
                }

                let mut binding = ProgramElement::expression(
                    ExprCategory::VariableDeclarationExpression,
                    start_line(param),
                    end_line(param),
                );
                binding.text = self.text_of(param);
                let binding = store.insert(binding);
                if let PeKind::Expression(e) = &mut store.get_mut(binding).kind {
                    e.expressions = vec![fragment];
                }
                store.set_condition(stmt, binding);
                store.get_mut(stmt).text = format!("catch ({})", self.text_of(param));
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.visit(store, body);
            if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                store.attach_statement(stmt, b);
            }
        }
    }

    fn visit_synchronized(&mut self, store: &mut PeStore, node: Node) {
        let stmt = store.insert(ProgramElement::statement(
            StmtCategory::Synchronized,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(stmt);
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "parenthesized_expression" => {
                    self.visit_condition(store, child);
                    if let Some(expr) = self.stack.pop(size, Expected::Expression, store) {
                        store.set_condition(stmt, expr);
                        let text = format!("synchronized ({})", store.get(expr).text);
                        store.get_mut(stmt).text = text;
                    }
                }
                "block" => {
                    self.visit(store, child);
                    if let Some(b) = self.stack.pop(size, Expected::Statement, store) {
                        store.attach_statement(stmt, b);
                    }
                }
                _ => {}
            }
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn visit_binary_like(&mut self, store: &mut PeStore, node: Node, category: ExprCategory) {
        let expr = store.insert(ProgramElement::expression(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut lhs = None;
        let mut rhs = None;
        if let Some(left) = node.child_by_field_name("left") {
            self.visit(store, left);
            lhs = self.stack.pop(size, Expected::Expression, store);
        }
        let op_token = node
            .child_by_field_name("operator")
            .map(|o| self.text_of(o))
            .unwrap_or_default();
        if let Some(right) = node.child_by_field_name("right") {
            self.visit(store, right);
            rhs = self.stack.pop(size, Expected::Expression, store);
        }
        let op = self.new_operator(store, &op_token, start_line(node));
        let children: Vec<PeId> = match (lhs, rhs) {
            (Some(l), Some(r)) => vec![l, op, r],
            (Some(l), None) => vec![l, op],
            (None, Some(r)) => vec![op, r],
            (None, None) => vec![op],
        };
        let text = match (lhs, rhs) {
            (Some(l), Some(r)) => format!(
                "{} {} {}",
                store.get(l).text,
                op_token,
                store.get(r).text
            ),
            _ => op_token,
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_instanceof(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::Instanceof,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let ty = node
            .child_by_field_name("right")
            .map(|t| self.text_of(t))
            .unwrap_or_default();
        let ty_pe = store.insert(ProgramElement::type_ref(&ty, start_line(node)));
        if let Some(left) = node.child_by_field_name("left") {
            self.visit(store, left);
            if let Some(l) = self.stack.pop(size, Expected::Expression, store) {
                let text = format!("{} instanceof {ty}", store.get(l).text);
                store.get_mut(expr).text = text;
                if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
                    e.expressions.push(l);
                    e.expressions.push(ty_pe);
                }
            }
        }
    }

    fn visit_update(&mut self, store: &mut PeStore, node: Node) {
        let prefix = node
            .child(0)
            .is_some_and(|c| c.kind() == "++" || c.kind() == "--");
        let category = if prefix {
            ExprCategory::Prefix
        } else {
            ExprCategory::Postfix
        };
        let expr = store.insert(ProgramElement::expression(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut cursor = node.walk();
        let token = node
            .children(&mut cursor)
            .find(|c| c.kind() == "++" || c.kind() == "--")
            .map(|c| self.text_of(c))
            .unwrap_or_default();
        let mut cursor = node.walk();
        let operand_node = node.named_children(&mut cursor).next();
        let mut operand = None;
        if let Some(o) = operand_node {
            self.visit(store, o);
            operand = self.stack.pop(size, Expected::Expression, store);
        }
        let op = self.new_operator(store, &token, start_line(node));
        let (children, text) = match operand {
            Some(o) if prefix => (vec![op, o], format!("{token}{}", store.get(o).text)),
            Some(o) => (vec![o, op], format!("{}{token}", store.get(o).text)),
            None => (vec![op], token),
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_unary(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::Prefix,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let token = node
            .child_by_field_name("operator")
            .map(|o| self.text_of(o))
            .unwrap_or_default();
        let op = self.new_operator(store, &token, start_line(node));
        let mut children = vec![op];
        let mut text = token.clone();
        if let Some(operand) = node.child_by_field_name("operand") {
            self.visit(store, operand);
            if let Some(o) = self.stack.pop(size, Expected::Expression, store) {
                text = format!("{token}{}", store.get(o).text);
                children.push(o);
            }
        }
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_cast(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::Cast,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let ty = node
            .child_by_field_name("type")
            .map(|t| self.text_of(t))
            .unwrap_or_default();
        let ty_pe = store.insert(ProgramElement::type_ref(&ty, start_line(node)));
        if let Some(value) = node.child_by_field_name("value") {
            self.visit(store, value);
            if let Some(v) = self.stack.pop(size, Expected::Expression, store) {
                let text = format!("({ty}) {}", store.get(v).text);
                store.get_mut(expr).text = text;
                if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
                    e.expressions.push(ty_pe);
                    e.expressions.push(v);
                }
            }
        }
    }

    fn visit_ternary(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::Trinomial,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut children = Vec::new();
        for field in ["condition", "consequence", "alternative"] {
            if let Some(part) = node.child_by_field_name(field) {
                self.visit(store, part);
                if let Some(p) = self.stack.pop(size, Expected::Expression, store) {
                    children.push(p);
                }
            }
        }
        let text = match children.as_slice() {
            [c, t, f] => format!(
                "{} ? {} : {}",
                store.get(*c).text,
                store.get(*t).text,
                store.get(*f).text
            ),
            _ => self.text_of(node),
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_parenthesized(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::Parenthesized,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut cursor = node.walk();
        if let Some(inner) = node.named_children(&mut cursor).next() {
            self.visit(store, inner);
            if let Some(i) = self.stack.pop(size, Expected::Expression, store) {
                let text = format!("({})", store.get(i).text);
                store.get_mut(expr).text = text;
                if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
                    e.expressions.push(i);
                }
            }
        }
    }

    fn visit_method_invocation(&mut self, store: &mut PeStore, node: Node) {
        let object = node.child_by_field_name("object");
        let super_call = object.is_some_and(|o| o.kind() == "super");
        let category = if super_call {
            ExprCategory::SuperMethodInvocation
        } else {
            ExprCategory::MethodInvocation
        };
        let expr = store.insert(ProgramElement::expression(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);

        let name = node
            .child_by_field_name("name")
            .map(|n| self.text_of(n))
            .unwrap_or_default();

        let mut qualifier = None;
        if let Some(object) = object.filter(|_| !super_call) {
            self.visit(store, object);
            qualifier = self.stack.pop(size, Expected::Expression, store);
        }

        let mut args = Vec::new();
        if let Some(arguments) = node.child_by_field_name("arguments") {
            let mut cursor = arguments.walk();
            let arg_nodes: Vec<Node> = arguments.named_children(&mut cursor).collect();
            for arg in arg_nodes {
                self.visit(store, arg);
                if let Some(a) = self.stack.pop(size, Expected::Expression, store) {
                    args.push(a);
                }
            }
        }

        // A resolvable receiver type yields a fully qualified api name,
        // otherwise the textual receiver stands in.
        let api_name = match object.and_then(|o| self.resolver.resolve_receiver(&o)) {
            Some(fq) => format!("{fq}.{name}()"),
            None => match qualifier {
                Some(q) => format!("{}.{name}()", store.get(q).text),
                None if super_call => format!("super.{name}()"),
                None => format!("{name}()"),
            },
        };

        let rendered_args: Vec<String> =
            args.iter().map(|a| store.get(*a).text.clone()).collect();
        let text = match qualifier {
            Some(q) => format!(
                "{}.{name}({})",
                store.get(q).text,
                rendered_args.join(", ")
            ),
            None if super_call => format!("super.{name}({})", rendered_args.join(", ")),
            None => format!("{name}({})", rendered_args.join(", ")),
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.qualifier = qualifier;
            e.expressions = args;
            e.name = Some(name);
            e.api_name = Some(api_name);
        }
    }

    fn visit_field_access(&mut self, store: &mut PeStore, node: Node) {
        let object = node.child_by_field_name("object");
        let super_access = object.is_some_and(|o| o.kind() == "super");
        let category = if super_access {
            ExprCategory::SuperFieldAccess
        } else {
            ExprCategory::FieldAccess
        };
        let expr = store.insert(ProgramElement::expression(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);

        let mut qualifier = None;
        if let Some(object) = object.filter(|_| !super_access) {
            self.visit(store, object);
            qualifier = self.stack.pop(size, Expected::Expression, store);
        }
        let mut field = None;
        if let Some(f) = node.child_by_field_name("field") {
            self.visit(store, f);
            field = self.stack.pop(size, Expected::Expression, store);
        }

        let text = match (qualifier, field) {
            (Some(q), Some(f)) => format!("{}.{}", store.get(q).text, store.get(f).text),
            (None, Some(f)) if super_access => format!("super.{}", store.get(f).text),
            (None, Some(f)) => store.get(f).text.clone(),
            _ => self.text_of(node),
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.qualifier = qualifier;
            e.expressions = field.into_iter().collect();
        }
    }

    fn visit_array_access(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::ArrayAccess,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut children = Vec::new();
        for field in ["array", "index"] {
            if let Some(part) = node.child_by_field_name(field) {
                self.visit(store, part);
                if let Some(p) = self.stack.pop(size, Expected::Expression, store) {
                    children.push(p);
                }
            }
        }
        let text = match children.as_slice() {
            [a, i] => format!("{}[{}]", store.get(*a).text, store.get(*i).text),
            _ => self.text_of(node),
        };
        store.get_mut(expr).text = text;
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_object_creation(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::ClassInstanceCreation,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let ty = node
            .child_by_field_name("type")
            .map(|t| self.text_of(t))
            .unwrap_or_default();

        let mut args = Vec::new();
        if let Some(arguments) = node.child_by_field_name("arguments") {
            let mut cursor = arguments.walk();
            let arg_nodes: Vec<Node> = arguments.named_children(&mut cursor).collect();
            for arg in arg_nodes {
                self.visit(store, arg);
                if let Some(a) = self.stack.pop(size, Expected::Expression, store) {
                    args.push(a);
                }
            }
        }

        let mut anonymous = None;
        let mut cursor = node.walk();
        if let Some(body) = node
            .children(&mut cursor)
            .find(|c| c.kind() == "class_body")
        {
            let class = store.insert(ProgramElement::class(
                start_line(body),
                end_line(body),
            ));
            store.get_mut(class).text = format!("new {ty}");
            self.visit_class_body(store, class, body, self.stack.len(), false);
            anonymous = Some(class);
        }

        let rendered_args: Vec<String> =
            args.iter().map(|a| store.get(*a).text.clone()).collect();
        store.get_mut(expr).text = format!("new {ty}({})", rendered_args.join(", "));
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = args;
            e.anonymous_class = anonymous;
            e.name = Some(ty);
        }
    }

    fn visit_array_creation(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::ArrayCreation,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let ty = node
            .child_by_field_name("type")
            .map(|t| self.text_of(t))
            .unwrap_or_default();
        let mut children = Vec::new();
        let mut cursor = node.walk();
        let dims: Vec<Node> = node
            .children(&mut cursor)
            .filter(|c| c.kind() == "dimensions_expr")
            .collect();
        for dim in dims {
            let mut inner = dim.walk();
            let parts: Vec<Node> = dim.named_children(&mut inner).collect();
            for part in parts {
                self.visit(store, part);
                if let Some(p) = self.stack.pop(size, Expected::Expression, store) {
                    children.push(p);
                }
            }
        }
        if let Some(value) = node.child_by_field_name("value") {
            self.visit(store, value);
            if let Some(v) = self.stack.pop(size, Expected::Expression, store) {
                children.push(v);
            }
        }
        store.get_mut(expr).text = format!("new {ty}[]");
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_array_initializer(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::ArrayInitializer,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut children = Vec::new();
        let mut cursor = node.walk();
        let parts: Vec<Node> = node.named_children(&mut cursor).collect();
        for part in parts {
            self.visit(store, part);
            if let Some(p) = self.stack.pop(size, Expected::Expression, store) {
                children.push(p);
            }
        }
        let rendered: Vec<String> = children.iter().map(|c| store.get(*c).text.clone()).collect();
        store.get_mut(expr).text = format!("{{{}}}", rendered.join(", "));
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = children;
        }
    }

    fn visit_scoped_identifier(&mut self, store: &mut PeStore, node: Node) {
        let expr = store.insert(ProgramElement::expression(
            ExprCategory::QualifiedName,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut qualifier = None;
        if let Some(scope) = node.child_by_field_name("scope") {
            self.visit(store, scope);
            qualifier = self.stack.pop(size, Expected::Expression, store);
        }
        let mut name = None;
        if let Some(n) = node.child_by_field_name("name") {
            self.visit(store, n);
            name = self.stack.pop(size, Expected::Expression, store);
        }
        store.get_mut(expr).text = self.text_of(node);
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.qualifier = qualifier;
            e.expressions = name.into_iter().collect();
        }
    }

    fn visit_explicit_constructor(&mut self, store: &mut PeStore, node: Node) {
        let mut cursor = node.walk();
        let is_super = node.children(&mut cursor).any(|c| c.kind() == "super");
        let category = if is_super {
            ExprCategory::SuperConstructorInvocation
        } else {
            ExprCategory::ConstructorInvocation
        };
        let expr = store.insert(ProgramElement::expression(
            category,
            start_line(node),
            end_line(node),
        ));
        let size = self.stack.push(expr);
        let mut args = Vec::new();
        if let Some(arguments) = node.child_by_field_name("arguments") {
            let mut cursor = arguments.walk();
            let arg_nodes: Vec<Node> = arguments.named_children(&mut cursor).collect();
            for arg in arg_nodes {
                self.visit(store, arg);
                if let Some(a) = self.stack.pop(size, Expected::Expression, store) {
                    args.push(a);
                }
            }
        }
        let rendered: Vec<String> = args.iter().map(|a| store.get(*a).text.clone()).collect();
        let keyword = if is_super { "super" } else { "this" };
        store.get_mut(expr).text = format!("{keyword}({})", rendered.join(", "));
        if let PeKind::Expression(e) = &mut store.get_mut(expr).kind {
            e.expressions = args;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn parse(source: &str) -> Tree {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter::Language::from(tree_sitter_java::LANGUAGE))
            .unwrap();
        parser.parse(source.as_bytes(), None).unwrap()
    }

    pub(crate) fn lower(source: &str) -> (PeStore, LoweredUnit) {
        let tree = parse(source);
        let mut store = PeStore::new();
        let unit = lower_unit(&tree, source.as_bytes(), &mut store, &NoTypes);
        (store, unit)
    }

    #[test]
    fn lowers_flat_method_body() {
        let (store, unit) = lower(
            "class C {\n    int foo() {\n        int x = 1;\n        return x;\n    }\n}\n",
        );
        assert_eq!(unit.classes.len(), 1);
        assert_eq!(unit.methods.len(), 1);

        let method = store.method(unit.methods[0]);
        assert_eq!(method.name.as_deref(), Some("foo"));
        // The body block was spliced into the method.
        assert_eq!(method.statements.len(), 2);

        let decl = store.stmt(method.statements[0]);
        assert_eq!(decl.category, StmtCategory::VariableDeclaration);
        let fragment = store.expr(decl.expressions[0]);
        assert_eq!(fragment.category, ExprCategory::VariableDeclarationFragment);
        assert_eq!(store.text(decl.expressions[0]), "x = 1");

        let ret = store.stmt(method.statements[1]);
        assert_eq!(ret.category, StmtCategory::Return);
        assert_eq!(store.get(method.statements[1]).text, "return x;");
    }

    #[test]
    fn if_span_ends_before_else() {
        let (store, unit) = lower(
            "class C {\n    void f(int a) {\n        if (a > 0) {\n            a = 1;\n        } else {\n            a = 2;\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let if_stmt = method.statements[0];
        let (start, end) = store.line_span(if_stmt);
        assert_eq!(start, 3);
        // `} else {` sits on line 5, so the recorded span stops at 4.
        assert_eq!(end, 4);

        let s = store.stmt(if_stmt);
        assert_eq!(s.statements.len(), 1);
        assert_eq!(s.else_statements.len(), 1);
        let cond = s.condition.expect("if has a condition");
        assert_eq!(store.text(cond), "a > 0");
        assert_eq!(store.expr(cond).owner_conditional_block, Some(if_stmt));
    }

    #[test]
    fn for_init_lowers_to_declaration_expression() {
        let (store, unit) = lower(
            "class C {\n    void f() {\n        for (int i = 0; i < 10; i++) {\n            use(i);\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let for_stmt = store.stmt(method.statements[0]);
        assert_eq!(for_stmt.category, StmtCategory::For);
        assert_eq!(for_stmt.initializers.len(), 1);
        assert_eq!(
            store.expr(for_stmt.initializers[0]).category,
            ExprCategory::VariableDeclarationExpression
        );
        assert_eq!(for_stmt.updaters.len(), 1);
        assert_eq!(
            store.expr(for_stmt.updaters[0]).category,
            ExprCategory::Postfix
        );
        assert_eq!(store.text(for_stmt.condition.unwrap()), "i < 10");
        assert_eq!(for_stmt.statements.len(), 1);
    }

    #[test]
    fn bare_for_synthesizes_true_condition() {
        let (store, unit) = lower(
            "class C {\n    void f() {\n        for (;;) {\n            step();\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let for_stmt = store.stmt(method.statements[0]);
        let cond = for_stmt.condition.expect("synthesized condition");
        assert_eq!(store.text(cond), "true");
        assert_eq!(store.expr(cond).category, ExprCategory::Boolean);
    }

    #[test]
    fn foreach_condition_binds_loop_variable() {
        let (store, unit) = lower(
            "class C {\n    void f(int[] xs) {\n        for (int x : xs) {\n            use(x);\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let foreach = store.stmt(method.statements[0]);
        assert_eq!(foreach.category, StmtCategory::Foreach);
        let binding = store.expr(foreach.condition.unwrap());
        assert_eq!(binding.category, ExprCategory::VariableDeclarationExpression);
        let fragment = store.expr(binding.expressions[0]);
        assert_eq!(fragment.category, ExprCategory::VariableDeclarationFragment);
        assert_eq!(store.text(fragment.expressions[0]), "x");
        assert_eq!(store.text(fragment.expressions[1]), "xs");
    }

    #[test]
    fn switch_statements_flatten_groups() {
        let (store, unit) = lower(
            "class C {\n    void f(int k) {\n        switch (k) {\n            case 1:\n                a = 1;\n                break;\n            default:\n                a = 2;\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let switch = store.stmt(method.statements[0]);
        assert_eq!(switch.category, StmtCategory::Switch);
        let categories: Vec<StmtCategory> = switch
            .statements
            .iter()
            .map(|s| store.stmt(*s).category)
            .collect();
        assert_eq!(
            categories,
            vec![
                StmtCategory::Case,
                StmtCategory::Expression,
                StmtCategory::Break,
                StmtCategory::Case,
                StmtCategory::Expression,
            ]
        );
        assert_eq!(store.get(switch.statements[0]).text, "case 1:");
        assert_eq!(store.get(switch.statements[3]).text, "default:");
    }

    #[test]
    fn try_catch_finally_shape() {
        let (store, unit) = lower(
            "class C {\n    void f() {\n        try {\n            risky();\n        } catch (Exception e) {\n            handle(e);\n        } finally {\n            cleanup();\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let try_stmt = store.stmt(method.statements[0]);
        assert_eq!(try_stmt.category, StmtCategory::Try);
        // Body was spliced; catch and finally hang off their own slots.
        assert_eq!(try_stmt.statements.len(), 1);
        assert_eq!(try_stmt.catch_statements.len(), 1);
        assert!(try_stmt.finally_statement.is_some());
        // The catch clause starts on line 5, so the try span stops at 4.
        assert_eq!(store.line_span(method.statements[0]).1, 4);

        let catch = store.stmt(try_stmt.catch_statements[0]);
        assert_eq!(catch.category, StmtCategory::Catch);
        let binding = store.expr(catch.condition.unwrap());
        assert_eq!(binding.category, ExprCategory::VariableDeclarationExpression);

        let fin = store.stmt(try_stmt.finally_statement.unwrap());
        assert_eq!(fin.category, StmtCategory::SimpleBlock);
    }

    #[test]
    fn labeled_break_carries_label_and_target() {
        let (store, unit) = lower(
            "class C {\n    void f() {\n        outer: while (true) {\n            break outer;\n        }\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let wh = store.stmt(method.statements[0]);
        assert_eq!(wh.category, StmtCategory::While);
        assert_eq!(wh.label.as_deref(), Some("outer"));
        let brk = store.stmt(wh.statements[0]);
        assert_eq!(brk.category, StmtCategory::Break);
        assert_eq!(store.text(brk.expressions[0]), "outer");
    }

    #[test]
    fn method_invocation_api_name_degrades_to_text() {
        let (store, unit) = lower(
            "class C {\n    void f(java.util.List xs) {\n        xs.add(1);\n        go();\n    }\n}\n",
        );
        let method = store.method(unit.methods[0]);
        let call = store.stmt(method.statements[0]).expressions[0];
        let call = store.expr(call);
        assert_eq!(call.name.as_deref(), Some("add"));
        assert_eq!(call.api_name.as_deref(), Some("xs.add()"));
        assert!(call.qualifier.is_some());

        let bare = store.stmt(method.statements[1]).expressions[0];
        assert_eq!(store.expr(bare).api_name.as_deref(), Some("go()"));
    }

    #[test]
    fn unsupported_contexts_are_suppressed() {
        // Annotation arguments walk through expression handlers, but nothing
        // they push may leak out of the unsupported context.
        let (store, unit) = lower(
            "@SuppressWarnings(\"all\")\nclass C {\n    @Deprecated\n    void f() {\n        go();\n    }\n}\n",
        );
        assert_eq!(unit.methods.len(), 1);
        let method = store.method(unit.methods[0]);
        assert_eq!(method.statements.len(), 1);
    }

    #[test]
    fn anonymous_class_hangs_off_creation() {
        let (store, unit) = lower(
            "class C {\n    void f() {\n        Runnable r = new Runnable() {\n            public void run() {\n                work();\n            }\n        };\n    }\n}\n",
        );
        assert_eq!(unit.methods.len(), 1, "anonymous methods are not top-level");
        let method = store.method(unit.methods[0]);
        let decl = store.stmt(method.statements[0]);
        let fragment = store.expr(decl.expressions[0]);
        let creation = store.expr(fragment.expressions[1]);
        assert_eq!(creation.category, ExprCategory::ClassInstanceCreation);
        let class = store.class(creation.anonymous_class.unwrap());
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn work_stack_pop_rejects_multi_pop() {
        let mut store = PeStore::new();
        let mut stack = WorkStack::default();
        let a = store.insert(ProgramElement::statement(StmtCategory::Expression, 1, 1));
        let b = store.insert(ProgramElement::statement(StmtCategory::Expression, 2, 2));
        let base = stack.len();
        stack.push(a);
        stack.push(b);
        // Two elements over the watermark: the pop drains them but yields
        // nothing, so a confused subtree cannot masquerade as a child.
        assert_eq!(stack.pop(base, Expected::Statement, &store), None);
        assert_eq!(stack.len(), base);
    }

    #[test]
    fn work_stack_pop_checks_kind() {
        let mut store = PeStore::new();
        let mut stack = WorkStack::default();
        let e = store.insert(ProgramElement::expression(ExprCategory::SimpleName, 1, 1));
        let base = stack.len();
        stack.push(e);
        assert_eq!(stack.pop(base, Expected::Statement, &store), None);

        let s = store.insert(ProgramElement::statement(StmtCategory::Return, 1, 1));
        stack.push(s);
        assert_eq!(stack.pop(base, Expected::Statement, &store), Some(s));
    }
}
