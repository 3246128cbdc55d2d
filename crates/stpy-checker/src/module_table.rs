//! Per-module symbol table

use rustc_hash::{FxHashMap, FxHashSet};
use stpy_parser::ast::{Constant, Expr, NodeId};
use stpy_parser::Span;
use stpy_types::{ClassId, FuncId, Value};

/// A module-level `name: T [= value]` awaiting finish-bind.
#[derive(Debug, Clone)]
pub struct AnnotatedName {
    /// Bound name
    pub name: String,
    /// Annotation expression
    pub annotation: Expr,
    /// Literal value, when the assigned value is a constant
    pub constant: Option<Constant>,
    /// Whether a value is assigned
    pub has_value: bool,
    /// Location of the statement
    pub span: Span,
}

/// A `from m import x` that could not be resolved while `m` was still being
/// declared.
#[derive(Debug, Clone)]
pub struct PendingImport {
    /// Name bound in this module
    pub local: String,
    /// Module imported from
    pub module: String,
    /// Name looked up in that module
    pub name: String,
}

/// Declaration phase of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModulePhase {
    /// Collect is running; the table is incomplete
    Declaring,
    /// Every top-level name is known; annotations are still unresolved
    Declared,
    /// Annotations, bases and finals are resolved
    Finished,
}

/// Module-level names of one module and the declarations that still need
/// finish-bind.
#[derive(Debug, Clone)]
pub struct ModuleTable {
    /// Dotted module name
    pub name: String,
    /// Source file name
    pub filename: String,
    children: FxHashMap<String, Value>,
    declared_types: FxHashMap<String, ClassId>,
    finals: FxHashSet<String>,
    named_finals: FxHashMap<String, Constant>,
    pub(crate) classes: Vec<ClassId>,
    pub(crate) functions: Vec<FuncId>,
    pub(crate) annotated: Vec<AnnotatedName>,
    pub(crate) pending_imports: Vec<PendingImport>,
    pub(crate) phase: ModulePhase,
    function_nodes: FxHashMap<NodeId, FuncId>,
    class_nodes: FxHashMap<NodeId, ClassId>,
    pub(crate) spans: FxHashMap<NodeId, Span>,
}

impl ModuleTable {
    /// An empty table in the declaring phase.
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        ModuleTable {
            name: name.into(),
            filename: filename.into(),
            children: FxHashMap::default(),
            declared_types: FxHashMap::default(),
            finals: FxHashSet::default(),
            named_finals: FxHashMap::default(),
            classes: Vec::new(),
            functions: Vec::new(),
            annotated: Vec::new(),
            pending_imports: Vec::new(),
            phase: ModulePhase::Declaring,
            function_nodes: FxHashMap::default(),
            class_nodes: FxHashMap::default(),
            spans: FxHashMap::default(),
        }
    }

    /// A finished table holding only the given names.
    pub fn builtin(name: &str, children: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut table = ModuleTable::new(name, format!("<{}>", name));
        table.children.extend(children);
        table.phase = ModulePhase::Finished;
        table
    }

    #[allow(missing_docs)]
    pub fn phase(&self) -> ModulePhase {
        self.phase
    }

    /// The value bound to a module-level name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.children.get(name)
    }

    /// Bind or rebind a module-level name.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        self.children.insert(name.into(), value);
    }

    #[allow(missing_docs)]
    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    /// Names bound in the module, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.children.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Record the declared type of an annotated module-level name.
    pub fn set_declared_type(&mut self, name: impl Into<String>, ty: ClassId) {
        self.declared_types.insert(name.into(), ty);
    }

    /// Declared type of an annotated module-level name.
    pub fn declared_type(&self, name: &str) -> Option<ClassId> {
        self.declared_types.get(name).copied()
    }

    /// Mark a module-level name `Final`.
    pub fn add_final(&mut self, name: impl Into<String>) {
        self.finals.insert(name.into());
    }

    #[allow(missing_docs)]
    pub fn is_final(&self, name: &str) -> bool {
        self.finals.contains(name)
    }

    /// Record the literal value of a `Final` name.
    pub fn add_named_final(&mut self, name: impl Into<String>, value: Constant) {
        self.named_finals.insert(name.into(), value);
    }

    /// Literal value of a `Final` name, for constant propagation.
    pub fn named_final(&self, name: &str) -> Option<&Constant> {
        self.named_finals.get(name)
    }

    /// Names of all literal `Final`s, sorted.
    pub fn named_finals(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named_finals.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Classes declared by the module, in source order.
    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    /// Functions declared by the module, in source order.
    pub fn functions(&self) -> &[FuncId] {
        &self.functions
    }

    /// Function declared by a `def` statement (methods included).
    pub fn function_for(&self, node: NodeId) -> Option<FuncId> {
        self.function_nodes.get(&node).copied()
    }

    /// Class declared by a `class` statement.
    pub fn class_for(&self, node: NodeId) -> Option<ClassId> {
        self.class_nodes.get(&node).copied()
    }

    /// Location of a declaring statement.
    pub fn span_of(&self, node: Option<NodeId>) -> Span {
        node.and_then(|n| self.spans.get(&n).copied()).unwrap_or_default()
    }

    pub(crate) fn record_function(&mut self, node: NodeId, span: Span, func: FuncId) {
        self.function_nodes.insert(node, func);
        self.spans.insert(node, span);
    }

    pub(crate) fn record_class(&mut self, node: NodeId, span: Span, class: ClassId) {
        self.class_nodes.insert(node, class);
        self.spans.insert(node, span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_and_finals() {
        let mut table = ModuleTable::new("m", "m.py");
        assert_eq!(table.phase(), ModulePhase::Declaring);
        table.declare("b", Value::Dynamic);
        table.declare("a", Value::Class(ClassId(1)));
        assert_eq!(table.names(), vec!["a", "b"]);
        assert_eq!(table.get("a"), Some(&Value::Class(ClassId(1))));

        table.add_final("x");
        table.add_named_final("x", Constant::Int(5));
        assert!(table.is_final("x"));
        assert_eq!(table.named_final("x"), Some(&Constant::Int(5)));
        assert_eq!(table.named_final("b"), None);
    }

    #[test]
    fn test_builtin_table_is_finished() {
        let table = ModuleTable::builtin("typing", [("Any".to_string(), Value::Dynamic)]);
        assert_eq!(table.phase(), ModulePhase::Finished);
        assert_eq!(table.filename, "<typing>");
        assert!(table.contains("Any"));
    }
}
