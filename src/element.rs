use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// -------------------------------------------------------------------------
///  Program-element model
///
///  Every syntactic element the analysis cares about is lowered into a
///  `ProgramElement` stored in a per-unit `PeStore` arena. Elements refer to
///  each other through `PeId` handles only; the handles are allocated from a
///  single process-wide counter, so ids define a total order across every
///  unit analyzed by this process.
/// -------------------------------------------------------------------------

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeId(pub u64);

impl PeId {
    pub fn next() -> Self {
        PeId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StmtCategory {
    Assert,
    Break,
    Case,
    Catch,
    Continue,
    Do,
    Empty,
    Expression,
    If,
    For,
    Foreach,
    Return,
    SimpleBlock,
    Synchronized,
    Switch,
    Throw,
    Try,
    TypeDeclaration,
    VariableDeclaration,
    While,
}

impl StmtCategory {
    /// Categories that may own nested statements.
    pub fn is_block_leading(self) -> bool {
        matches!(
            self,
            StmtCategory::SimpleBlock
                | StmtCategory::If
                | StmtCategory::For
                | StmtCategory::Foreach
                | StmtCategory::While
                | StmtCategory::Do
                | StmtCategory::Try
                | StmtCategory::Catch
                | StmtCategory::Switch
                | StmtCategory::Synchronized
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExprCategory {
    ArrayAccess,
    ArrayCreation,
    ArrayInitializer,
    Assignment,
    Boolean,
    Cast,
    Character,
    ClassInstanceCreation,
    ConstructorInvocation,
    FieldAccess,
    Infix,
    Instanceof,
    MethodInvocation,
    Null,
    Number,
    Parenthesized,
    Postfix,
    Prefix,
    QualifiedName,
    SimpleName,
    String,
    SuperConstructorInvocation,
    SuperFieldAccess,
    SuperMethodInvocation,
    This,
    Trinomial,
    TypeLiteral,
    VariableDeclarationExpression,
    VariableDeclarationFragment,
    MethodEnter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarCategory {
    Field,
    Local,
    Parameter,
}

/// Statement payload. Child-slot conventions:
/// * `expressions` holds the statement's own expressions (the fragment list
///   of a variable declaration, the expression of an expression statement,
///   the label name of a labeled break/continue, ...).
/// * `initializers`/`updaters` are only populated for `For`.
/// * `else_statements` is only populated for `If`.
/// * `catch_statements`/`finally_statement` are only populated for `Try`.
#[derive(Debug, Clone, Default)]
pub struct StatementPe {
    pub category: StmtCategory,
    pub owner_block: Option<PeId>,
    pub condition: Option<PeId>,
    pub expressions: Vec<PeId>,
    pub initializers: Vec<PeId>,
    pub updaters: Vec<PeId>,
    pub statements: Vec<PeId>,
    pub else_statements: Vec<PeId>,
    pub catch_statements: Vec<PeId>,
    pub finally_statement: Option<PeId>,
    pub label: Option<String>,
}

impl Default for StmtCategory {
    fn default() -> Self {
        StmtCategory::Empty
    }
}

/// Expression payload. Child-slot conventions:
/// * `Assignment`/`Infix`: `expressions = [lhs, operator, rhs]`.
/// * `Prefix`: `[operator, operand]`; `Postfix`: `[operand, operator]`.
/// * `VariableDeclarationFragment`: `[name]` or `[name, initializer]`.
/// * `MethodInvocation`: `qualifier` = receiver, `expressions` = arguments,
///   `name` = bare method name.
/// * `FieldAccess`/`QualifiedName`: `qualifier` = object, `expressions[0]`
///   = field simple name.
#[derive(Debug, Clone, Default)]
pub struct ExpressionPe {
    pub category: ExprCategory,
    pub qualifier: Option<PeId>,
    pub expressions: Vec<PeId>,
    pub anonymous_class: Option<PeId>,
    pub api_name: Option<String>,
    pub name: Option<String>,
    pub owner_conditional_block: Option<PeId>,
}

impl Default for ExprCategory {
    fn default() -> Self {
        ExprCategory::SimpleName
    }
}

#[derive(Debug, Clone, Default)]
pub struct MethodPe {
    pub name: Option<String>,
    pub is_lambda: bool,
    pub parameters: Vec<PeId>,
    pub statements: Vec<PeId>,
    pub lambda_body: Option<PeId>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassPe {
    pub name: Option<String>,
    pub methods: Vec<PeId>,
}

#[derive(Debug, Clone)]
pub struct VariablePe {
    pub category: VarCategory,
    pub type_name: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TypePe {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct OperatorPe {
    pub token: String,
}

#[derive(Debug, Clone)]
pub enum PeKind {
    Statement(StatementPe),
    Expression(ExpressionPe),
    Method(MethodPe),
    Class(ClassPe),
    Variable(VariablePe),
    Type(TypePe),
    Operator(OperatorPe),
}

#[derive(Debug, Clone)]
pub struct ProgramElement {
    pub id: PeId,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub modifiers: Vec<String>,
    pub kind: PeKind,
}

impl PartialEq for ProgramElement {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ProgramElement {}
impl PartialOrd for ProgramElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ProgramElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
impl std::hash::Hash for ProgramElement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl ProgramElement {
    fn with_kind(start_line: u32, end_line: u32, kind: PeKind) -> Self {
        ProgramElement {
            id: PeId::next(),
            start_line,
            end_line,
            text: String::new(),
            modifiers: Vec::new(),
            kind,
        }
    }

    pub fn statement(category: StmtCategory, start_line: u32, end_line: u32) -> Self {
        Self::with_kind(
            start_line,
            end_line,
            PeKind::Statement(StatementPe {
                category,
                ..StatementPe::default()
            }),
        )
    }

    pub fn expression(category: ExprCategory, start_line: u32, end_line: u32) -> Self {
        Self::with_kind(
            start_line,
            end_line,
            PeKind::Expression(ExpressionPe {
                category,
                ..ExpressionPe::default()
            }),
        )
    }

    pub fn method(start_line: u32, end_line: u32) -> Self {
        Self::with_kind(start_line, end_line, PeKind::Method(MethodPe::default()))
    }

    pub fn class(start_line: u32, end_line: u32) -> Self {
        Self::with_kind(start_line, end_line, PeKind::Class(ClassPe::default()))
    }

    pub fn variable(category: VarCategory, type_name: &str, name: &str, line: u32) -> Self {
        let mut pe = Self::with_kind(
            line,
            line,
            PeKind::Variable(VariablePe {
                category,
                type_name: type_name.to_owned(),
                name: name.to_owned(),
            }),
        );
        pe.text = format!("{type_name} {name}");
        pe
    }

    pub fn operator(token: &str, line: u32) -> Self {
        let mut pe = Self::with_kind(
            line,
            line,
            PeKind::Operator(OperatorPe {
                token: token.to_owned(),
            }),
        );
        pe.text = token.to_owned();
        pe
    }

    pub fn type_ref(name: &str, line: u32) -> Self {
        let mut pe = Self::with_kind(
            line,
            line,
            PeKind::Type(TypePe {
                name: name.to_owned(),
            }),
        );
        pe.text = name.to_owned();
        pe
    }

    pub fn as_statement(&self) -> Option<&StatementPe> {
        match &self.kind {
            PeKind::Statement(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&ExpressionPe> {
        match &self.kind {
            PeKind::Expression(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_block_leading(&self) -> bool {
        match &self.kind {
            PeKind::Statement(s) => s.category.is_block_leading(),
            PeKind::Method(_) => true,
            _ => false,
        }
    }

    /// Category name used by graph renderings and the JSON scope payload.
    pub fn category_name(&self) -> String {
        match &self.kind {
            PeKind::Statement(s) => format!("{:?}", s.category),
            PeKind::Expression(e) => format!("{:?}", e.category),
            PeKind::Method(_) => "Method".to_owned(),
            PeKind::Class(_) => "Class".to_owned(),
            PeKind::Variable(v) => format!("{:?}", v.category),
            PeKind::Type(_) => "Type".to_owned(),
            PeKind::Operator(_) => "Operator".to_owned(),
        }
    }
}

/// -------------------------------------------------------------------------
///  Arena
/// -------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PeStore {
    elems: HashMap<PeId, ProgramElement>,
}

impl PeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pe: ProgramElement) -> PeId {
        let id = pe.id;
        self.elems.insert(id, pe);
        id
    }

    pub fn get(&self, id: PeId) -> &ProgramElement {
        self.elems
            .get(&id)
            .unwrap_or_else(|| panic!("dangling program-element handle {id:?}"))
    }

    pub fn get_mut(&mut self, id: PeId) -> &mut ProgramElement {
        self.elems
            .get_mut(&id)
            .unwrap_or_else(|| panic!("dangling program-element handle {id:?}"))
    }

    pub fn stmt(&self, id: PeId) -> &StatementPe {
        self.get(id)
            .as_statement()
            .unwrap_or_else(|| panic!("{id:?} is not a statement"))
    }

    pub fn expr(&self, id: PeId) -> &ExpressionPe {
        self.get(id)
            .as_expression()
            .unwrap_or_else(|| panic!("{id:?} is not an expression"))
    }

    pub fn method(&self, id: PeId) -> &MethodPe {
        match &self.get(id).kind {
            PeKind::Method(m) => m,
            _ => panic!("{id:?} is not a method"),
        }
    }

    pub fn class(&self, id: PeId) -> &ClassPe {
        match &self.get(id).kind {
            PeKind::Class(c) => c,
            _ => panic!("{id:?} is not a class"),
        }
    }

    pub fn variable(&self, id: PeId) -> &VariablePe {
        match &self.get(id).kind {
            PeKind::Variable(v) => v,
            _ => panic!("{id:?} is not a variable declaration"),
        }
    }

    fn stmt_mut(&mut self, id: PeId) -> &mut StatementPe {
        match &mut self.get_mut(id).kind {
            PeKind::Statement(s) => s,
            _ => panic!("{id:?} is not a statement"),
        }
    }

    fn expr_mut(&mut self, id: PeId) -> &mut ExpressionPe {
        match &mut self.get_mut(id).kind {
            PeKind::Expression(e) => e,
            _ => panic!("{id:?} is not an expression"),
        }
    }

    pub fn is_stmt_of(&self, id: PeId, category: StmtCategory) -> bool {
        self.get(id)
            .as_statement()
            .is_some_and(|s| s.category == category)
    }

    pub fn is_expr_of(&self, id: PeId, category: ExprCategory) -> bool {
        self.get(id)
            .as_expression()
            .is_some_and(|e| e.category == category)
    }

    /// Owning block of a statement, if it was attached to one.
    pub fn owner_block(&self, id: PeId) -> Option<PeId> {
        self.get(id).as_statement().and_then(|s| s.owner_block)
    }

    fn set_owner(&mut self, stmt: PeId, owner: PeId) {
        self.stmt_mut(stmt).owner_block = Some(owner);
    }

    /// Attach `stmt` into the main statement list of `parent` (a block-leading
    /// statement or a method). Attaching a `SimpleBlock` to a composite
    /// parent splices the block's children into the parent, so composite
    /// constructs carry flat statement sequences instead of a block wrapper.
    pub fn attach_statement(&mut self, parent: PeId, stmt: PeId) {
        assert!(
            self.get(parent).is_block_leading(),
            "statements may only be attached to block-leading elements"
        );
        let splice = self.should_splice(parent, stmt);
        if splice {
            let children = std::mem::take(&mut self.stmt_mut(stmt).statements);
            for child in children {
                self.set_owner(child, parent);
                self.push_into_main(parent, child);
            }
        } else {
            self.set_owner(stmt, parent);
            self.push_into_main(parent, stmt);
        }
    }

    pub fn attach_else_statement(&mut self, parent: PeId, stmt: PeId) {
        if self.should_splice(parent, stmt) {
            let children = std::mem::take(&mut self.stmt_mut(stmt).statements);
            for child in children {
                self.set_owner(child, parent);
                self.stmt_mut(parent).else_statements.push(child);
            }
        } else {
            self.set_owner(stmt, parent);
            self.stmt_mut(parent).else_statements.push(stmt);
        }
    }

    pub fn attach_catch(&mut self, try_stmt: PeId, catch: PeId) {
        self.set_owner(catch, try_stmt);
        self.stmt_mut(try_stmt).catch_statements.push(catch);
    }

    pub fn set_finally(&mut self, try_stmt: PeId, fin: PeId) {
        self.set_owner(fin, try_stmt);
        self.stmt_mut(try_stmt).finally_statement = Some(fin);
    }

    /// Record `cond` as the governing condition of `stmt` and back-link the
    /// condition to the block it controls.
    pub fn set_condition(&mut self, stmt: PeId, cond: PeId) {
        self.stmt_mut(stmt).condition = Some(cond);
        self.expr_mut(cond).owner_conditional_block = Some(stmt);
    }

    pub fn set_label(&mut self, stmt: PeId, label: &str) {
        self.stmt_mut(stmt).label = Some(label.to_owned());
    }

    fn should_splice(&self, parent: PeId, stmt: PeId) -> bool {
        let parent_is_composite = match &self.get(parent).kind {
            PeKind::Method(_) => true,
            PeKind::Statement(s) => s.category != StmtCategory::SimpleBlock,
            _ => false,
        };
        parent_is_composite && self.is_stmt_of(stmt, StmtCategory::SimpleBlock)
    }

    fn push_into_main(&mut self, parent: PeId, stmt: PeId) {
        match &mut self.get_mut(parent).kind {
            PeKind::Method(m) => m.statements.push(stmt),
            PeKind::Statement(s) => s.statements.push(stmt),
            _ => unreachable!("checked block-leading above"),
        }
    }

    pub fn line_span(&self, id: PeId) -> (u32, u32) {
        let pe = self.get(id);
        (pe.start_line, pe.end_line)
    }

    pub fn text(&self, id: PeId) -> &str {
        &self.get(id).text
    }
}

#[test]
fn ids_are_monotonic() {
    let a = ProgramElement::statement(StmtCategory::Empty, 1, 1);
    let b = ProgramElement::statement(StmtCategory::Empty, 1, 1);
    assert!(a.id < b.id);
}

#[test]
fn attach_splices_block_into_composite() {
    let mut store = PeStore::new();
    let method = store.insert(ProgramElement::method(1, 5));
    let wh = store.insert(ProgramElement::statement(StmtCategory::While, 2, 4));
    store.attach_statement(method, wh);

    let block = store.insert(ProgramElement::statement(StmtCategory::SimpleBlock, 2, 4));
    let s1 = store.insert(ProgramElement::statement(StmtCategory::Expression, 3, 3));
    let s2 = store.insert(ProgramElement::statement(StmtCategory::Return, 4, 4));
    store.attach_statement(block, s1);
    store.attach_statement(block, s2);

    store.attach_statement(wh, block);

    let while_stmt = store.stmt(wh);
    assert_eq!(while_stmt.statements, vec![s1, s2]);
    assert_eq!(store.owner_block(s1), Some(wh));
    assert_eq!(store.owner_block(s2), Some(wh));
}

#[test]
fn attach_keeps_nested_bare_blocks() {
    let mut store = PeStore::new();
    let outer = store.insert(ProgramElement::statement(StmtCategory::SimpleBlock, 1, 4));
    let inner = store.insert(ProgramElement::statement(StmtCategory::SimpleBlock, 2, 3));
    let s = store.insert(ProgramElement::statement(StmtCategory::Expression, 2, 2));
    store.attach_statement(inner, s);
    store.attach_statement(outer, inner);

    assert_eq!(store.stmt(outer).statements, vec![inner]);
    assert_eq!(store.owner_block(s), Some(inner));
}

#[test]
#[should_panic(expected = "block-leading")]
fn attach_to_non_block_fails_fast() {
    let mut store = PeStore::new();
    let ret = store.insert(ProgramElement::statement(StmtCategory::Return, 1, 1));
    let s = store.insert(ProgramElement::statement(StmtCategory::Expression, 2, 2));
    store.attach_statement(ret, s);
}
