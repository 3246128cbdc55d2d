//! Type binder
//!
//! Walks a finished module and records the static [`Value`] of every
//! expression. Statements thread flow-sensitive local types through branches
//! so that `isinstance` checks, `is None` tests and truthiness narrow locals.
//! Calls with a known target get an argument mapping for direct invocation.
//!
//! The code generator reads everything back from [`Bindings`]; nodes the
//! binder never saw are dynamic.

mod call;
mod expr;
mod scope;
mod stmt;

use rustc_hash::FxHashMap;
use stpy_parser::ast::{Constant, Module, NodeId};
use stpy_parser::Span;
use stpy_types::{ClassId, TypeDescr, Value};

use crate::error::{CheckError, CheckResult};
use crate::module_table::ModulePhase;
use crate::narrowing::{LocalTypes, NarrowingEffect};
use crate::symbol_table::SymbolTable;
use crate::symbols::{NameScope, ScopeTree};

pub use call::{ArgEmitter, ArgSource, CallBinding, CallTarget, LenKind, Spill};
pub use scope::TerminalKind;

use scope::{BindingScope, LocalDecl, ScopeRole};

static DYNAMIC: Value = Value::Dynamic;

/// Prefix of temporaries holding spilled call arguments.
pub const TEMP_PREFIX: &str = "_pystatic_.0._tmp__";

/// A typed attribute read or written with a field instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    /// `(module, class, field)` descriptor
    pub descr: TypeDescr,
    /// Declared type of the field
    pub ty: ClassId,
}

/// Everything the binder learned about one module.
#[derive(Debug, Default)]
pub struct Bindings {
    types: FxHashMap<NodeId, Value>,
    compare_types: FxHashMap<(NodeId, usize), ClassId>,
    terminals: FxHashMap<NodeId, TerminalKind>,
    calls: FxHashMap<NodeId, CallBinding>,
    fields: FxHashMap<NodeId, FieldBinding>,
    casts: FxHashMap<NodeId, TypeDescr>,
    assert_effects: FxHashMap<NodeId, NarrowingEffect>,
    returns: FxHashMap<NodeId, ClassId>,
    final_constants: FxHashMap<NodeId, Constant>,
    declared_locals: FxHashMap<NodeId, FxHashMap<String, ClassId>>,
    temporaries: usize,
}

impl Bindings {
    /// Static value of an expression (or of a store target).
    pub fn type_of(&self, node: NodeId) -> &Value {
        self.types.get(&node).unwrap_or(&DYNAMIC)
    }

    /// Whether the binder recorded a type for the node.
    pub fn is_bound(&self, node: NodeId) -> bool {
        self.types.contains_key(&node)
    }

    /// Primitive type the `index`th operator of a chained comparison works
    /// in, when every operand is primitive.
    pub fn compare_type(&self, node: NodeId, index: usize) -> Option<ClassId> {
        self.compare_types.get(&(node, index)).copied()
    }

    /// How a statement leaves control flow.
    pub fn terminal(&self, node: NodeId) -> TerminalKind {
        self.terminals.get(&node).copied().unwrap_or_default()
    }

    /// Specialised call of a `Call` node; `None` means a generic call.
    pub fn call(&self, node: NodeId) -> Option<&CallBinding> {
        self.calls.get(&node)
    }

    /// Field access of an `Attribute` node.
    pub fn field(&self, node: NodeId) -> Option<&FieldBinding> {
        self.fields.get(&node)
    }

    /// Checked downcast to emit after evaluating an expression.
    pub fn cast(&self, node: NodeId) -> Option<&TypeDescr> {
        self.casts.get(&node)
    }

    /// Narrowing established by an `assert` statement.
    pub fn assert_effect(&self, node: NodeId) -> Option<&NarrowingEffect> {
        self.assert_effects.get(&node)
    }

    /// Type returned by the function declared at `def` node `node`.
    pub fn return_type(&self, node: NodeId) -> Option<ClassId> {
        self.returns.get(&node).copied()
    }

    /// Literal value of a `Final` name load.
    pub fn final_constant(&self, node: NodeId) -> Option<&Constant> {
        self.final_constants.get(&node)
    }

    /// Declared type of a local in the scope introduced by `scope`.
    pub fn declared_local(&self, scope: NodeId, name: &str) -> Option<ClassId> {
        self.declared_locals
            .get(&scope)
            .and_then(|locals| locals.get(name))
            .copied()
    }

    /// Number of spill temporaries handed out.
    pub fn temporaries(&self) -> usize {
        self.temporaries
    }

    /// Number of expressions with a recorded type.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Bind the types of a declared and finished module.
///
/// `optimize` enables inlining of `@inline` functions at level 2.
#[tracing::instrument(level = "debug", skip(symbols, scopes))]
pub fn bind_module(
    symbols: &mut SymbolTable,
    scopes: &ScopeTree,
    module: &str,
    optimize: u8,
) -> CheckResult<Bindings> {
    match symbols.module(module).map(|table| table.phase()) {
        Some(ModulePhase::Finished) => {}
        _ => {
            return Err(CheckError::internal(format!(
                "module {} bound before finish-bind",
                module
            )))
        }
    }
    let tree = symbols
        .source(module)
        .map(|source| source.tree.clone())
        .ok_or_else(|| CheckError::internal(format!("module {} has no source", module)))?;

    let mut binder = TypeBinder::new(symbols, scopes, module, optimize);
    binder.bind(&tree)?;
    tracing::debug!(module, expressions = binder.bindings.len(), "bound module");
    Ok(binder.bindings)
}

pub(crate) struct TypeBinder<'a> {
    symbols: &'a mut SymbolTable,
    tree: &'a ScopeTree,
    module: String,
    optimize: u8,
    scopes: Vec<BindingScope>,
    bindings: Bindings,
}

impl<'a> TypeBinder<'a> {
    fn new(symbols: &'a mut SymbolTable, tree: &'a ScopeTree, module: &str, optimize: u8) -> Self {
        TypeBinder {
            symbols,
            tree,
            module: module.to_string(),
            optimize,
            scopes: Vec::new(),
            bindings: Bindings::default(),
        }
    }

    fn bind(&mut self, module: &Module) -> CheckResult<()> {
        let root = BindingScope::new(ScopeRole::Module, module.id, self.tree.module_id());
        self.scopes.push(root);
        self.visit_body(&module.body)?;
        self.scopes.pop();
        Ok(())
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    fn scope(&self) -> CheckResult<&BindingScope> {
        self.scopes
            .last()
            .ok_or_else(|| CheckError::internal("binder has no open scope"))
    }

    fn scope_mut(&mut self) -> CheckResult<&mut BindingScope> {
        self.scopes
            .last_mut()
            .ok_or_else(|| CheckError::internal("binder has no open scope"))
    }

    fn push_scope(&mut self, role: ScopeRole, node: NodeId, span: Span) -> CheckResult<()> {
        let scope = self.tree.scope_id_of(node).ok_or_else(|| {
            CheckError::internal(format!("no scope recorded for the node at line {}", span.line))
        })?;
        self.scopes.push(BindingScope::new(role, node, scope));
        Ok(())
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn in_module_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Classification of `name` in the innermost scope.
    fn name_scope(&self, name: &str) -> CheckResult<NameScope> {
        let scope = self.scope()?;
        Ok(self.tree.get(scope.scope).check_name(name))
    }

    fn locals_mut(&mut self) -> CheckResult<&mut LocalTypes> {
        Ok(&mut self.scope_mut()?.locals)
    }

    fn snapshot(&self) -> CheckResult<LocalTypes> {
        Ok(self.scope()?.snapshot())
    }

    fn restore(&mut self, state: LocalTypes) -> CheckResult<()> {
        self.scope_mut()?.restore(state);
        Ok(())
    }

    fn merge(&mut self, other: &LocalTypes) -> CheckResult<()> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CheckError::internal("binder has no open scope"))?;
        scope.merge(&mut self.symbols.universe, other);
        Ok(())
    }

    /// The innermost enclosing `def`, skipping lambdas and comprehensions.
    fn enclosing_function(&self) -> Option<&BindingScope> {
        self.scopes
            .iter()
            .rev()
            .find(|scope| matches!(scope.role, ScopeRole::Function { .. }))
    }

    /// Declaration of a name assigned in the innermost scope, falling back to
    /// the module for globals.
    fn target_decl(&self, name: &str) -> CheckResult<Option<LocalDecl>> {
        let scope = self.scope()?;
        if let Some(decl) = scope.decls.get(name) {
            return Ok(Some(*decl));
        }
        match self.name_scope(name)? {
            NameScope::GlobalExplicit | NameScope::GlobalImplicit => {
                Ok(self.scopes.first().and_then(|m| m.decls.get(name)).copied())
            }
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declare an annotated local in the innermost scope.
    fn declare_local(&mut self, name: &str, ty: ClassId, is_final: bool, span: Span) -> CheckResult<()> {
        if self.scope()?.decls.contains_key(name) {
            return Err(CheckError::type_error(
                format!("Cannot redefine local variable {}", name),
                span,
            ));
        }
        if self.symbols.universe.is_prim(ty) {
            self.check_primitive_scope(name, span)?;
        }
        self.record_decl(name, LocalDecl { ty, is_final })
    }

    /// Declare an unannotated local from its first assigned value.
    ///
    /// Module-level names take the inexact type of the value and become
    /// visible through the module table. Function locals are declared
    /// dynamic, so later assignments may change their type, except for
    /// primitives, which keep their primitive declaration.
    fn declare_inferred(&mut self, name: &str, value: &Value, span: Span) -> CheckResult<()> {
        let universe = &self.symbols.universe;
        let class = universe.class_of(value);
        if self.in_module_scope() {
            let ty = universe.inexact(class);
            let value = universe.instance(ty);
            if let Some(table) = self.symbols.module_mut(&self.module) {
                match table.get(name) {
                    None | Some(Value::Instance(_)) | Some(Value::Dynamic) => table.declare(name, value),
                    Some(_) => {}
                }
            }
            return self.record_decl(name, LocalDecl { ty, is_final: false });
        }
        if universe.is_prim(class) {
            self.check_primitive_scope(name, span)?;
            return self.record_decl(
                name,
                LocalDecl {
                    ty: class,
                    is_final: false,
                },
            );
        }
        let dynamic = universe.builtins.dynamic;
        self.record_decl(
            name,
            LocalDecl {
                ty: dynamic,
                is_final: false,
            },
        )
    }

    fn record_decl(&mut self, name: &str, decl: LocalDecl) -> CheckResult<()> {
        let initial = self.symbols.universe.instance(decl.ty);
        let scope = self.scope_mut()?;
        let node = scope.node;
        scope.declare(name, decl, initial);
        self.bindings
            .declared_locals
            .entry(node)
            .or_default()
            .insert(name.to_string(), decl.ty);
        Ok(())
    }

    fn check_primitive_scope(&self, name: &str, span: Span) -> CheckResult<()> {
        let local = self.name_scope(name)? == NameScope::Local;
        if !local || !self.scope()?.is_function_like() {
            return Err(CheckError::type_error(
                "cannot use primitives in global or closure scope",
                span,
            ));
        }
        Ok(())
    }

    /// Set the current type of a declared name after an assignment.
    ///
    /// Dynamic values and primitive declarations keep the declared type.
    fn set_local_type(&mut self, name: &str, value: Value) -> CheckResult<Value> {
        let decl = self.target_decl(name)?;
        let universe = &self.symbols.universe;
        let current = match decl {
            Some(decl) if value.is_dynamic() || universe.is_prim(decl.ty) => universe.instance(decl.ty),
            _ => value,
        };
        self.locals_mut()?.insert(name.to_string(), current.clone());
        Ok(current)
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Fail unless a `src` value may be stored where `dest` is declared.
    ///
    /// A dynamic source is accepted everywhere except in primitive
    /// destinations.
    fn check_can_assign_from(&self, dest: ClassId, src: &Value, span: Span) -> CheckResult<()> {
        self.check_assign_with(dest, src, span, |src, dest| {
            format!("type mismatch: {} cannot be assigned to {}", src, dest)
        })
    }

    fn check_assign_with(
        &self,
        dest: ClassId,
        src: &Value,
        span: Span,
        message: impl Fn(&str, &str) -> String,
    ) -> CheckResult<()> {
        let universe = &self.symbols.universe;
        let src_class = universe.class_of(src);
        let dest_is_prim = universe.is_prim(dest);
        let accepted = if universe.is_dynamic(src_class) {
            !dest_is_prim
        } else {
            universe.can_assign_from(dest, src_class)
        };
        if accepted {
            return Ok(());
        }
        let src_name = universe.value_name(src);
        let dest_name = if universe.is_dynamic(dest) {
            "dynamic".to_string()
        } else {
            universe.display(dest).to_string()
        };
        Err(CheckError::type_error(message(&src_name, &dest_name), span))
    }

    /// Primitives may not flow into generic (object) contexts.
    fn check_boxed(&self, value: &Value, span: Span) -> CheckResult<()> {
        let universe = &self.symbols.universe;
        if let Value::Instance(class) = value {
            if universe.is_prim(*class) {
                return Err(CheckError::type_error(
                    format!(
                        "type mismatch: {} cannot be assigned to object",
                        universe.display(*class)
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// Record a downcast when a dynamic value lands in a typed location.
    fn cast_if_needed(&mut self, node: NodeId, dest: ClassId, src: &Value) {
        let universe = &self.symbols.universe;
        let needs_cast = src.is_dynamic()
            && !universe.is_dynamic(dest)
            && !universe.is_prim(dest)
            && dest != universe.builtins.object;
        if needs_cast {
            let descr = universe.descr(dest);
            self.bindings.casts.insert(node, descr);
        }
    }

    fn next_temp(&mut self) -> String {
        let name = format!("{}{}", TEMP_PREFIX, self.bindings.temporaries);
        self.bindings.temporaries += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::build_scopes;
    use stpy_parser::parse_module;

    fn bind(source: &str) -> CheckResult<(SymbolTable, Bindings)> {
        let module = parse_module(source).unwrap();
        let tree = build_scopes(&module, false, false)?;
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", module);
        symbols.declare_module("m")?;
        symbols.finish_bind()?;
        let bindings = bind_module(&mut symbols, &tree, "m", 0)?;
        Ok((symbols, bindings))
    }

    #[test]
    fn test_binding_before_finish_is_internal() {
        let module = parse_module("x = 1\n").unwrap();
        let tree = build_scopes(&module, false, false).unwrap();
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", module);
        symbols.declare_module("m").unwrap();
        let err = bind_module(&mut symbols, &tree, "m", 0).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_module_inferred_declaration_updates_table() {
        let (symbols, _) = bind("x = 1\n").unwrap();
        let b = &symbols.universe.builtins;
        assert_eq!(
            symbols.module("m").and_then(|t| t.get("x")),
            Some(&Value::Instance(b.int))
        );
    }

    #[test]
    fn test_module_reassignment_is_checked() {
        let err = bind("x = 1\nx = 'a'\n").unwrap_err();
        assert_eq!(err.message(), "type mismatch: Exact[str] cannot be assigned to int");
    }

    #[test]
    fn test_function_locals_are_declared_dynamic() {
        bind("def f():\n    x = None\n    x = 'a'\n    return x\n").unwrap();
    }

    #[test]
    fn test_redefining_annotated_local() {
        let err = bind("def f():\n    x: int = 1\n    x: str = 'a'\n").unwrap_err();
        assert_eq!(err.message(), "Cannot redefine local variable x");
    }

    #[test]
    fn test_primitives_outside_local_scope() {
        let source = "from __static__ import int64\nx: int64 = 1\n";
        let err = bind(source).unwrap_err();
        assert_eq!(err.message(), "cannot use primitives in global or closure scope");

        let closure = "from __static__ import int64\n\
def f():\n    x: int64 = 1\n    def g():\n        return x\n    return g\n";
        let err = bind(closure).unwrap_err();
        assert_eq!(err.message(), "cannot use primitives in global or closure scope");
    }

    #[test]
    fn test_temporaries_are_numbered() {
        let (_, bindings) = bind("").unwrap();
        assert_eq!(bindings.temporaries(), 0);
        assert_eq!(format!("{}{}", TEMP_PREFIX, 3), "_pystatic_.0._tmp__3");
    }
}
