//! Binding scopes and flow state

use rustc_hash::FxHashMap;
use stpy_parser::ast::NodeId;
use stpy_types::{ClassId, FuncId, TypeUniverse, Value};

use crate::narrowing::LocalTypes;
use crate::symbols::ScopeId;

/// How control leaves a statement list.
///
/// Ordered from least to most severe: when both arms of an `if` terminate,
/// the `if` terminates with the less severe kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TerminalKind {
    /// Control falls through
    #[default]
    NonTerminal,
    /// Ends with `break` or `continue`
    BreakOrContinue,
    /// Ends with `return` or `raise`
    Return,
}

/// What a binding scope belongs to.
#[derive(Debug, Clone)]
pub(crate) enum ScopeRole {
    Module,
    Function {
        /// Declared function, when the `def` was collected
        func: Option<FuncId>,
        /// Expected type of returned values
        returns: ClassId,
        name: String,
    },
    Lambda,
    Class {
        class: Option<ClassId>,
        name: String,
    },
    Comprehension,
}

/// Fixed declaration of a local name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LocalDecl {
    pub ty: ClassId,
    pub is_final: bool,
}

/// Declared and current types of the names bound in one scope.
#[derive(Debug, Clone)]
pub(crate) struct BindingScope {
    pub role: ScopeRole,
    /// Node that introduced the scope
    pub node: NodeId,
    /// Matching scope in the scope tree
    pub scope: ScopeId,
    pub decls: FxHashMap<String, LocalDecl>,
    pub locals: LocalTypes,
}

impl BindingScope {
    pub fn new(role: ScopeRole, node: NodeId, scope: ScopeId) -> Self {
        BindingScope {
            role,
            node,
            scope,
            decls: FxHashMap::default(),
            locals: LocalTypes::default(),
        }
    }

    /// Whether the scope runs in its own frame.
    pub fn is_function_like(&self) -> bool {
        matches!(
            self.role,
            ScopeRole::Function { .. } | ScopeRole::Lambda | ScopeRole::Comprehension
        )
    }

    pub fn declare(&mut self, name: &str, decl: LocalDecl, current: Value) {
        self.decls.insert(name.to_string(), decl);
        self.locals.insert(name.to_string(), current);
    }

    pub fn snapshot(&self) -> LocalTypes {
        self.locals.clone()
    }

    pub fn restore(&mut self, state: LocalTypes) {
        self.locals = state;
    }

    /// Join the current state with another path's state.
    ///
    /// Names bound on only one path fall back to their declared type.
    pub fn merge(&mut self, universe: &mut TypeUniverse, other: &LocalTypes) {
        let names: Vec<String> = self
            .locals
            .keys()
            .chain(other.keys())
            .cloned()
            .collect();
        for name in names {
            let merged = match (self.locals.get(&name), other.get(&name)) {
                (Some(a), Some(b)) if a == b => continue,
                (Some(Value::Instance(a)), Some(Value::Instance(b))) => {
                    let joined = universe.join(*a, *b);
                    self.clamp(universe, &name, universe.instance(joined))
                }
                (Some(_), Some(_)) => self.declared_value(universe, &name),
                _ => self.declared_value(universe, &name),
            };
            match merged {
                Some(value) => {
                    self.locals.insert(name, value);
                }
                None => {
                    self.locals.remove(&name);
                }
            }
        }
    }

    fn declared_value(&self, universe: &TypeUniverse, name: &str) -> Option<Value> {
        self.decls.get(name).map(|decl| universe.instance(decl.ty))
    }

    /// A joined type may not widen past the declaration.
    fn clamp(&self, universe: &TypeUniverse, name: &str, joined: Value) -> Option<Value> {
        match (self.decls.get(name), &joined) {
            (Some(decl), Value::Instance(class)) if !universe.can_assign_from(decl.ty, *class) => {
                Some(universe.instance(decl.ty))
            }
            (None, _) => None,
            _ => Some(joined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with(universe: &TypeUniverse, name: &str, declared: ClassId) -> BindingScope {
        let mut scope = BindingScope::new(
            ScopeRole::Lambda,
            NodeId(0),
            ScopeId(0),
        );
        scope.declare(
            name,
            LocalDecl {
                ty: declared,
                is_final: false,
            },
            universe.instance(declared),
        );
        scope
    }

    #[test]
    fn test_terminal_ordering() {
        assert!(TerminalKind::NonTerminal < TerminalKind::BreakOrContinue);
        assert!(TerminalKind::BreakOrContinue < TerminalKind::Return);
        assert_eq!(
            TerminalKind::Return.min(TerminalKind::BreakOrContinue),
            TerminalKind::BreakOrContinue
        );
    }

    #[test]
    fn test_merge_joins_and_resets() {
        let mut u = TypeUniverse::new();
        let b = u.builtins.clone();
        let object = b.object;
        let mut scope = scope_with(&u, "x", object);
        scope.locals.insert("x".to_string(), Value::Instance(b.exact_int));
        let mut other = scope.snapshot();
        other.insert("x".to_string(), Value::Instance(b.exact_str));
        other.insert("y".to_string(), Value::Dynamic);

        scope.merge(&mut u, &other);
        let joined = scope.locals["x"].instance_class().unwrap();
        assert_eq!(u.union_members(joined), Some(&[b.int, b.str_][..]));
        // `y` has no declaration and is bound on one path only.
        assert!(!scope.locals.contains_key("y"));
    }

    #[test]
    fn test_merge_never_widens_past_declaration() {
        let mut u = TypeUniverse::new();
        let b = u.builtins.clone();
        let opt = u.optional(b.int).unwrap();
        let mut scope = scope_with(&u, "x", b.int);
        scope.locals.insert("x".to_string(), Value::Instance(b.exact_int));
        let mut other = scope.snapshot();
        other.insert("x".to_string(), Value::Instance(opt));
        scope.merge(&mut u, &other);
        assert_eq!(scope.locals["x"], Value::Instance(b.int));
    }
}
