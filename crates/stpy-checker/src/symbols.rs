//! Scope analysis
//!
//! A single pass over the tree builds one [`Scope`] per module, function,
//! lambda, class and comprehension, records the names each defines and uses,
//! and resolves free variables bottom-up as soon as a scope's body has been
//! visited. After the pass every name in every scope classifies as exactly
//! one [`NameScope`].
//!
//! Comprehensions nested directly in function-like scopes are inlined into
//! their parent when that introduces no name clashes; the inlined scope is
//! kept (marked [`Scope::inlined`]) so code generation can still find its
//! parameters.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use stpy_parser::ast::*;
use stpy_parser::Span;

use crate::error::{CheckError, CheckResult};

const DEF_NORMAL: u8 = 1;
const DEF_COMP_ITER: u8 = 2;

/// Longest name the runtime will mangle.
const MANGLE_LEN: usize = 256;

/// Index of a scope in a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// What introduced a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Module body
    Module,
    /// `def` / `async def`
    Function,
    /// `lambda`
    Lambda,
    /// `class` body
    Class,
    /// List/set/dict comprehension or generator expression
    Comprehension,
}

impl ScopeKind {
    /// Functions, lambdas and comprehensions run in their own frame.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension
        )
    }
}

/// Classification of a name within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Bound in this frame
    Local,
    /// Not bound anywhere enclosing; looked up in globals then builtins
    GlobalImplicit,
    /// Declared `global`
    GlobalExplicit,
    /// Bound in an enclosing function and captured
    Free,
    /// Bound here and captured by a nested scope
    Cell,
    /// Not yet known while enclosing scopes are still being visited
    Unknown,
}

/// Mangle a private name (`__x`) for use inside class `klass`.
///
/// `klass` must already have its leading underscores stripped.
pub fn mangle(name: &str, klass: Option<&str>) -> String {
    let Some(klass) = klass else {
        return name.to_string();
    };
    if !name.starts_with("__")
        || name.ends_with("__")
        || name.contains('.')
        || name.len() + 2 >= MANGLE_LEN
    {
        return name.to_string();
    }
    let mut klass = klass;
    let total = klass.len() + name.len();
    if total > MANGLE_LEN {
        let keep = klass.len().saturating_sub(total - MANGLE_LEN);
        klass = klass.get(..keep).unwrap_or(klass);
    }
    format!("_{}{}", klass, name)
}

fn strip_class_name(name: &str) -> Option<String> {
    let stripped = name.trim_start_matches('_');
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// One lexical scope.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Own id
    pub id: ScopeId,
    /// `def`/`class` name, `<lambda>`, `<listcomp>` ..., or `<module>`
    pub name: String,
    /// Kind of scope
    pub kind: ScopeKind,
    /// Node that introduced the scope
    pub node: NodeId,
    /// First line of the node
    pub lineno: u32,
    /// Enclosing scope (after inlining, the scope this one was spliced into)
    pub parent: Option<ScopeId>,
    /// Child scopes in completion order
    pub children: Vec<ScopeId>,
    /// Could contain free variables
    pub nested: bool,
    /// Contains `yield` (always set for generator expressions)
    pub generator: bool,
    /// `async def`, or contains `await` / `async for`
    pub coroutine: bool,
    /// Declared `global` in the enclosing scope
    pub global_scope: bool,
    /// Comprehension whose body was merged into its parent
    pub inlined: bool,

    defs: FxHashMap<String, u8>,
    uses: FxHashSet<String>,
    globals: FxHashSet<String>,
    explicit_globals: FxHashSet<String>,
    nonlocals: FxHashMap<String, Span>,
    params: Vec<String>,
    frees: BTreeSet<String>,
    cells: BTreeSet<String>,
    klass: Option<String>,
    comp_iter_target: u32,
    comp_iter_expr: u32,
    inlinable: Vec<ScopeId>,
}

impl Scope {
    fn new(id: ScopeId, name: impl Into<String>, kind: ScopeKind, node: NodeId, lineno: u32) -> Self {
        Scope {
            id,
            name: name.into(),
            kind,
            node,
            lineno,
            parent: None,
            children: Vec::new(),
            nested: false,
            generator: false,
            coroutine: false,
            global_scope: false,
            inlined: false,
            defs: FxHashMap::default(),
            uses: FxHashSet::default(),
            globals: FxHashSet::default(),
            explicit_globals: FxHashSet::default(),
            nonlocals: FxHashMap::default(),
            params: Vec::new(),
            frees: BTreeSet::new(),
            cells: BTreeSet::new(),
            klass: None,
            comp_iter_target: 0,
            comp_iter_expr: 0,
            inlinable: Vec::new(),
        }
    }

    /// Apply private name mangling for the class this scope sits in.
    pub fn mangle(&self, name: &str) -> String {
        mangle(name, self.klass.as_deref())
    }

    /// Classify an already mangled name.
    pub fn check_name(&self, name: &str) -> NameScope {
        if self.explicit_globals.contains(name) {
            NameScope::GlobalExplicit
        } else if self.globals.contains(name) {
            NameScope::GlobalImplicit
        } else if self.cells.contains(name) {
            NameScope::Cell
        } else if self.frees.contains(name) {
            NameScope::Free
        } else if self.defs.contains_key(name) {
            NameScope::Local
        } else if self.nested && self.uses.contains(name) {
            NameScope::Free
        } else if self.nested {
            NameScope::Unknown
        } else {
            NameScope::GlobalImplicit
        }
    }

    /// Mangle then classify a source-level name.
    pub fn resolve(&self, name: &str) -> NameScope {
        self.check_name(&self.mangle(name))
    }

    /// Whether the scope binds `name` (mangled).
    pub fn defines(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Whether the scope reads `name` (mangled).
    pub fn uses(&self, name: &str) -> bool {
        self.uses.contains(name)
    }

    /// Whether `name` was declared `nonlocal` (or bound by `:=` through
    /// this comprehension).
    pub fn is_nonlocal(&self, name: &str) -> bool {
        self.nonlocals.contains_key(name)
    }

    /// Parameters in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether `name` is a parameter.
    pub fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    /// Names this scope's code object provides as cells, sorted.
    pub fn cell_vars(&self) -> Vec<String> {
        self.cells.iter().cloned().collect()
    }

    /// Names this scope's code object receives as free variables, sorted.
    /// Includes names used here and bound only in an enclosing function.
    pub fn free_vars(&self) -> Vec<String> {
        self.closure_names()
    }

    /// Names bound in this frame, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defs
            .keys()
            .filter(|name| self.check_name(name) == NameScope::Local)
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Names a parent must supply: own frees plus uses bound nowhere here.
    fn closure_names(&self) -> Vec<String> {
        if !self.nested {
            if self.frees.contains("__class__") {
                return vec!["__class__".to_string()];
            }
            return Vec::new();
        }
        let mut free: BTreeSet<String> = self.frees.clone();
        for name in &self.uses {
            if !self.defs.contains_key(name)
                && !self.globals.contains(name)
                && !self.explicit_globals.contains(name)
            {
                free.insert(name.clone());
            }
        }
        free.into_iter().collect()
    }

    fn add_def(&mut self, name: &str, flags: u8) {
        let mangled = self.mangle(name);
        *self.defs.entry(mangled).or_insert(DEF_NORMAL) |= flags;
    }

    fn add_use(&mut self, name: &str) {
        let mangled = self.mangle(name);
        self.uses.insert(mangled);
    }

    fn add_param(&mut self, name: &str) {
        let mangled = self.mangle(name);
        self.defs.insert(mangled.clone(), DEF_NORMAL);
        self.params.push(mangled);
    }
}

/// Every scope of a module, addressable by id or by introducing node.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    by_node: FxHashMap<NodeId, ScopeId>,
    module: ScopeId,
}

impl ScopeTree {
    /// Scope by id.
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    /// The module scope.
    pub fn module_scope(&self) -> &Scope {
        self.get(self.module)
    }

    /// Id of the module scope.
    pub fn module_id(&self) -> ScopeId {
        self.module
    }

    /// Scope introduced by a module, def, class, lambda or comprehension node.
    pub fn scope_of(&self, node: NodeId) -> Option<&Scope> {
        self.by_node.get(&node).map(|id| self.get(*id))
    }

    /// Id of the scope introduced by `node`.
    pub fn scope_id_of(&self, node: NodeId) -> Option<ScopeId> {
        self.by_node.get(&node).copied()
    }

    /// All scopes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter()
    }

    /// Number of scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether the tree is empty (never true for a built tree).
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Nearest enclosing class scope.
    pub fn enclosing_class(&self, id: ScopeId) -> Option<ScopeId> {
        let mut current = self.get(id).parent;
        while let Some(scope) = current {
            if self.get(scope).kind == ScopeKind::Class {
                return Some(scope);
            }
            current = self.get(scope).parent;
        }
        None
    }

    /// Qualified name of the code defined by a scope.
    pub fn qualname(&self, id: ScopeId) -> String {
        let scope = self.get(id);
        let Some(parent_id) = scope.parent else {
            return scope.name.clone();
        };
        let parent = self.get(parent_id);
        if scope.global_scope || parent.kind == ScopeKind::Module {
            return scope.name.clone();
        }
        let prefix = self.qualname(parent_id);
        if parent.kind == ScopeKind::Class {
            format!("{}.{}", prefix, scope.name)
        } else {
            format!("{}.<locals>.{}", prefix, scope.name)
        }
    }

    // ========================================================================
    // Free variable resolution
    // ========================================================================

    fn closure_names(&self, id: ScopeId) -> Vec<String> {
        self.get(id).closure_names()
    }

    fn has_enclosing_class(&self, id: ScopeId) -> bool {
        self.enclosing_class(id).is_some()
    }

    fn handle_children(&mut self, id: ScopeId) -> CheckResult<()> {
        let children = self.get(id).children.clone();
        for child in children {
            let child_name = self.get(child).name.clone();
            if self.get(id).explicit_globals.contains(&child_name) {
                self.scopes[child.index()].global_scope = true;
            }
            if self.get(child).nested {
                let frees = self.closure_names(child);
                let globals = self.add_frees(id, &frees);
                for name in globals {
                    self.force_global(child, &name)?;
                }
            } else if self.get(child).frees.contains("__class__") {
                self.add_frees(id, &["__class__".to_string()]);
            } else if self.get(child).uses.contains("__class__")
                && !self.get(child).defs.contains_key("__class__")
            {
                let scope = &mut self.scopes[child.index()];
                scope.frees.clear();
                scope.frees.insert("__class__".to_string());
                self.add_frees(id, &["__class__".to_string()]);
            }
        }
        Ok(())
    }

    /// Absorb the free names of a child. Returns the names the child must
    /// treat as globals.
    fn add_frees(&mut self, id: ScopeId, names: &[String]) -> Vec<String> {
        let mut child_globals = Vec::new();
        let has_class = self.has_enclosing_class(id);
        for name in names {
            let scope = &mut self.scopes[id.index()];
            let sc = scope.check_name(name);
            if name == "__class__" {
                if scope.kind == ScopeKind::Class || sc == NameScope::Local {
                    scope.cells.insert(name.clone());
                    continue;
                } else if has_class {
                    scope.frees.insert(name.clone());
                    continue;
                }
            }
            if scope.nested {
                if matches!(sc, NameScope::Unknown | NameScope::Free) || scope.kind == ScopeKind::Class {
                    scope.frees.insert(name.clone());
                } else if sc == NameScope::GlobalImplicit {
                    child_globals.push(name.clone());
                } else if scope.kind.is_function_like() && sc == NameScope::Local {
                    scope.cells.insert(name.clone());
                } else if sc != NameScope::Cell {
                    child_globals.push(name.clone());
                }
            } else if sc == NameScope::Local {
                scope.cells.insert(name.clone());
            } else if sc != NameScope::Cell {
                child_globals.push(name.clone());
            }
        }
        child_globals
    }

    /// Walk back down from a scope that found no binding for `name`.
    fn force_global(&mut self, id: ScopeId, name: &str) -> CheckResult<()> {
        if let Some(span) = self.get(id).nonlocals.get(name) {
            return Err(CheckError::scope(
                format!("no binding for nonlocal '{}' found", name),
                *span,
            ));
        }
        let scope = &mut self.scopes[id.index()];
        scope.globals.insert(name.to_string());
        scope.frees.remove(name);
        let is_class = scope.kind == ScopeKind::Class;
        let children = scope.children.clone();
        for child in children {
            if self.get(child).check_name(name) == NameScope::Free && !(is_class && name == "__class__") {
                self.force_global(child, name)?;
            }
        }
        Ok(())
    }

    fn inline_nested_comprehensions(&mut self, id: ScopeId) {
        let inlinable = std::mem::take(&mut self.scopes[id.index()].inlinable);
        if inlinable.is_empty() {
            return;
        }

        let mut local_names: FxHashSet<String> = {
            let scope = self.get(id);
            scope.defs.keys().chain(scope.uses.iter()).cloned().collect()
        };
        for child in self.get(id).children.clone() {
            for free in self.closure_names(child) {
                let sc = self.get(id).check_name(&free);
                if matches!(sc, NameScope::Free | NameScope::GlobalImplicit) {
                    local_names.insert(free);
                }
            }
        }
        local_names.remove(".0");

        for comp in inlinable {
            let defs: Vec<String> = {
                let scope = self.get(comp);
                scope
                    .defs
                    .keys()
                    .filter(|d| !scope.nonlocals.contains_key(*d))
                    .cloned()
                    .collect()
            };
            if defs.iter().any(|d| local_names.contains(d)) {
                continue;
            }

            let comp_scope = self.get(comp).clone();
            let parent = &mut self.scopes[id.index()];
            for name in defs.iter().filter(|d| d.as_str() != ".0") {
                parent.defs.entry(name.clone()).or_insert(DEF_NORMAL);
            }
            for name in &comp_scope.uses {
                if comp_scope.check_name(name) == NameScope::Free && !parent.defs.contains_key(name) {
                    parent.frees.insert(name.clone());
                }
            }
            for name in &comp_scope.uses {
                parent.uses.insert(name.clone());
            }
            for cell in comp_scope.cells.iter().filter(|c| c.as_str() != ".0") {
                parent.cells.insert(cell.clone());
            }
            let position = parent.children.iter().position(|c| *c == comp);
            if let Some(index) = position {
                let _replaced: Vec<ScopeId> = parent
                    .children
                    .splice(index..index + 1, comp_scope.children.iter().copied())
                    .collect();
            }

            let parent_defs: FxHashSet<String> = self.get(id).defs.keys().cloned().collect();
            let comp_mut = &mut self.scopes[comp.index()];
            comp_mut.frees.retain(|f| !parent_defs.contains(f));
            comp_mut.inlined = true;
            for child in &comp_scope.children {
                self.scopes[child.index()].parent = Some(id);
            }
        }
    }
}

// ============================================================================
// Visitor
// ============================================================================

/// Builds a [`ScopeTree`] for one module.
pub struct SymbolVisitor {
    scopes: Vec<Scope>,
    by_node: FxHashMap<NodeId, ScopeId>,
    klass: Option<String>,
    future_annotations: bool,
    inline_comprehensions: bool,
}

impl SymbolVisitor {
    /// Create a visitor. With `future_annotations` annotations are never
    /// evaluated and so bind and use nothing.
    pub fn new(future_annotations: bool) -> Self {
        SymbolVisitor {
            scopes: Vec::new(),
            by_node: FxHashMap::default(),
            klass: None,
            future_annotations,
            inline_comprehensions: true,
        }
    }

    /// Enable or disable comprehension inlining.
    pub fn with_inline_comprehensions(mut self, enabled: bool) -> Self {
        self.inline_comprehensions = enabled;
        self
    }

    /// Visit a whole module.
    pub fn visit_module(mut self, module: &Module) -> CheckResult<ScopeTree> {
        let id = self.new_scope("<module>", ScopeKind::Module, module.id, 0, None);
        for stmt in &module.body {
            self.visit_stmt(stmt, id)?;
        }
        Ok(ScopeTree {
            scopes: self.scopes,
            by_node: self.by_node,
            module: id,
        })
    }

    fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    fn new_scope(
        &mut self,
        name: &str,
        kind: ScopeKind,
        node: NodeId,
        lineno: u32,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let mut scope = Scope::new(id, name, kind, node, lineno);
        scope.parent = parent;
        scope.klass = match kind {
            ScopeKind::Class => strip_class_name(name),
            ScopeKind::Module => None,
            _ => self.klass.as_deref().and_then(strip_class_name),
        };
        if let Some(parent) = parent {
            let parent = self.scope(parent);
            scope.nested = parent.nested || parent.kind.is_function_like();
            if kind != ScopeKind::Class && kind != ScopeKind::Function {
                scope.comp_iter_expr = parent.comp_iter_expr;
            }
        }
        self.scopes.push(scope);
        self.by_node.insert(node, id);
        id
    }

    /// Finish a scope once its body has been visited: inline eligible
    /// comprehensions, attach it to its parent and resolve its free names.
    fn finish_scope(&mut self, id: ScopeId) -> CheckResult<()> {
        let mut tree = self.take_tree();
        if tree.get(id).kind.is_function_like() {
            tree.inline_nested_comprehensions(id);
        }
        if let Some(parent) = tree.get(id).parent {
            tree.scopes[parent.index()].children.push(id);
        }
        let result = tree.handle_children(id).and_then(|()| {
            let scope = tree.get(id);
            if !scope.nested {
                if let Some((name, span)) = scope.nonlocals.iter().min_by_key(|(_, span)| span.start) {
                    return Err(CheckError::scope(
                        format!("no binding for nonlocal '{}' found", name),
                        *span,
                    ));
                }
            }
            Ok(())
        });
        self.scopes = tree.scopes;
        self.by_node = tree.by_node;
        result
    }

    fn take_tree(&mut self) -> ScopeTree {
        ScopeTree {
            scopes: std::mem::take(&mut self.scopes),
            by_node: std::mem::take(&mut self.by_node),
            module: ScopeId(0),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn visit_body(&mut self, body: &[Stmt], scope: ScopeId) -> CheckResult<()> {
        for stmt in body {
            self.visit_stmt(stmt, scope)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt, scope: ScopeId) -> CheckResult<()> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => self.visit_function_def(stmt, def, scope),
            StmtKind::ClassDef(def) => self.visit_class_def(stmt, def, scope),
            StmtKind::Return { value } => {
                if !self.scope(scope).kind.is_function_like() {
                    return Err(CheckError::scope("'return' outside function", stmt.span));
                }
                if let Some(value) = value {
                    self.visit_expr(value, scope)?;
                }
                Ok(())
            }
            StmtKind::Delete { targets } => self.visit_exprs(targets, scope),
            StmtKind::Assign { targets, value } => {
                self.visit_exprs(targets, scope)?;
                self.visit_expr(value, scope)
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_expr(target, scope)?;
                if let Some(name) = target.as_name() {
                    self.scope_mut(scope).add_use(name);
                }
                self.visit_expr(value, scope)
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => {
                if let Some(name) = target.as_name() {
                    let current = self.scope(scope);
                    let mangled = current.mangle(name);
                    if current.kind != ScopeKind::Module {
                        if current.nonlocals.contains_key(&mangled) {
                            return Err(CheckError::scope(
                                format!("annotated name '{}' can't be nonlocal", name),
                                target.span,
                            ));
                        }
                        if current.explicit_globals.contains(&mangled) {
                            return Err(CheckError::scope(
                                format!("annotated name '{}' can't be global", name),
                                target.span,
                            ));
                        }
                    }
                    if *simple || value.is_some() {
                        self.scope_mut(scope).add_def(name, 0);
                    }
                } else {
                    self.visit_expr(target, scope)?;
                }
                if !self.future_annotations {
                    self.visit_expr(annotation, scope)?;
                }
                if let Some(value) = value {
                    self.visit_expr(value, scope)?;
                }
                Ok(())
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    self.scope_mut(scope).coroutine = true;
                }
                self.visit_expr(target, scope)?;
                self.visit_expr(iter, scope)?;
                self.visit_body(body, scope)?;
                self.visit_body(orelse, scope)
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.visit_expr(test, scope)?;
                self.visit_body(body, scope)?;
                self.visit_body(orelse, scope)
            }
            StmtKind::With { items, body, is_async } => {
                if *is_async {
                    self.scope_mut(scope).coroutine = true;
                }
                for item in items {
                    self.visit_expr(&item.context_expr, scope)?;
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars, scope)?;
                    }
                }
                self.visit_body(body, scope)
            }
            StmtKind::Raise { exc, cause } => {
                for part in [exc, cause].into_iter().flatten() {
                    self.visit_expr(part, scope)?;
                }
                Ok(())
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.visit_body(body, scope)?;
                for handler in handlers {
                    if let Some(type_) = &handler.type_ {
                        self.visit_expr(type_, scope)?;
                    }
                    if let Some(name) = &handler.name {
                        self.scope_mut(scope).add_def(name, 0);
                    }
                    self.visit_body(&handler.body, scope)?;
                }
                self.visit_body(orelse, scope)?;
                self.visit_body(finalbody, scope)
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test, scope)?;
                if let Some(msg) = msg {
                    self.visit_expr(msg, scope)?;
                }
                Ok(())
            }
            StmtKind::Import { names } => {
                for alias in names {
                    self.scope_mut(scope).add_def(alias.bound_name(), 0);
                }
                Ok(())
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names.iter().filter(|a| a.name != "*") {
                    let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                    self.scope_mut(scope).add_def(bound, 0);
                }
                Ok(())
            }
            StmtKind::Global { names } => {
                for name in names {
                    self.add_global(scope, name, stmt.span)?;
                }
                Ok(())
            }
            StmtKind::Nonlocal { names } => {
                if self.scope(scope).kind == ScopeKind::Module {
                    return Err(CheckError::scope(
                        "nonlocal declaration not allowed at module level",
                        stmt.span,
                    ));
                }
                for name in names {
                    let current = self.scope_mut(scope);
                    let mangled = current.mangle(name);
                    if current.is_param(&mangled) {
                        return Err(CheckError::scope(
                            format!("name '{}' is parameter and nonlocal", name),
                            stmt.span,
                        ));
                    }
                    current.frees.insert(mangled.clone());
                    current.nonlocals.insert(mangled, stmt.span);
                }
                Ok(())
            }
            StmtKind::Expr { value } => self.visit_expr(value, scope),
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => Ok(()),
        }
    }

    fn add_global(&mut self, scope: ScopeId, name: &str, span: Span) -> CheckResult<()> {
        let current = self.scope_mut(scope);
        let mangled = current.mangle(name);
        if current.is_param(&mangled) {
            return Err(CheckError::scope(
                format!("name '{}' is parameter and global", name),
                span,
            ));
        }
        current.explicit_globals.insert(mangled.clone());
        let module = ScopeId(0);
        let module_scope = self.scope_mut(module);
        module_scope.defs.entry(mangled.clone()).or_insert(DEF_NORMAL);
        module_scope.explicit_globals.insert(mangled);
        Ok(())
    }

    fn visit_function_def(&mut self, stmt: &Stmt, def: &FunctionDef, parent: ScopeId) -> CheckResult<()> {
        self.visit_exprs(&def.decorator_list, parent)?;
        self.scope_mut(parent).add_def(&def.name, 0);
        let id = self.new_scope(&def.name, ScopeKind::Function, stmt.id, stmt.span.line, Some(parent));
        self.scope_mut(id).coroutine = def.is_async;
        self.visit_arguments(&def.args, id, parent)?;
        if let Some(returns) = &def.returns {
            if !self.future_annotations {
                self.visit_expr(returns, parent)?;
            }
        }
        self.visit_body(&def.body, id)?;
        self.finish_scope(id)
    }

    fn visit_class_def(&mut self, stmt: &Stmt, def: &ClassDef, parent: ScopeId) -> CheckResult<()> {
        self.visit_exprs(&def.decorator_list, parent)?;
        for keyword in &def.keywords {
            self.visit_expr(&keyword.value, parent)?;
        }
        self.scope_mut(parent).add_def(&def.name, 0);
        self.visit_exprs(&def.bases, parent)?;

        let id = self.new_scope(&def.name, ScopeKind::Class, stmt.id, stmt.span.line, Some(parent));
        {
            let scope = self.scope_mut(id);
            if docstring_of(&def.body).is_some() {
                scope.add_def("__doc__", 0);
            }
            scope.add_def("__module__", 0);
            scope.add_def("__qualname__", 0);
        }
        let previous = self.klass.replace(def.name.clone());
        let result = self.visit_body(&def.body, id);
        self.klass = previous;
        result?;
        self.finish_scope(id)
    }

    fn visit_arguments(&mut self, args: &Arguments, scope: ScopeId, parent: ScopeId) -> CheckResult<()> {
        self.visit_exprs(&args.defaults, parent)?;
        for default in args.kw_defaults.iter().flatten() {
            self.visit_expr(default, parent)?;
        }
        let ordered = args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
            .chain(args.vararg.iter())
            .chain(args.kwarg.iter());
        for arg in ordered {
            self.scope_mut(scope).add_param(&arg.name);
            if let Some(annotation) = &arg.annotation {
                if !self.future_annotations {
                    self.visit_expr(annotation, parent)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn visit_exprs(&mut self, exprs: &[Expr], scope: ScopeId) -> CheckResult<()> {
        for expr in exprs {
            self.visit_expr(expr, scope)?;
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr, scope: ScopeId) -> CheckResult<()> {
        match &expr.kind {
            ExprKind::Name { id, ctx } => self.visit_name(id, *ctx, expr.span, scope),
            ExprKind::NamedExpr { target, value } => self.visit_named_expr(target, value, expr.span, scope),
            ExprKind::Lambda { args, body } => {
                let id = self.new_scope("<lambda>", ScopeKind::Lambda, expr.id, expr.span.line, Some(scope));
                self.visit_arguments(args, id, scope)?;
                self.visit_expr(body, id)?;
                self.finish_scope(id)
            }
            ExprKind::ListComp { elt, generators } => {
                self.visit_comprehension("<listcomp>", expr, generators, &[&**elt], false, scope)
            }
            ExprKind::SetComp { elt, generators } => {
                self.visit_comprehension("<setcomp>", expr, generators, &[&**elt], false, scope)
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.visit_comprehension("<genexpr>", expr, generators, &[&**elt], true, scope)
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.visit_comprehension("<dictcomp>", expr, generators, &[&**value, &**key], false, scope),
            ExprKind::Yield { value } => {
                self.check_in_function(scope, "'yield' outside function", expr.span)?;
                self.scope_mut(scope).generator = true;
                if let Some(value) = value {
                    self.visit_expr(value, scope)?;
                }
                Ok(())
            }
            ExprKind::YieldFrom { value } => {
                self.check_in_function(scope, "'yield' outside function", expr.span)?;
                self.scope_mut(scope).generator = true;
                self.visit_expr(value, scope)
            }
            ExprKind::Await { value } => {
                self.scope_mut(scope).coroutine = true;
                self.visit_expr(value, scope)
            }
            ExprKind::BoolOp { values, .. } => self.visit_exprs(values, scope),
            ExprKind::BinOp { left, right, .. } => {
                self.visit_expr(left, scope)?;
                self.visit_expr(right, scope)
            }
            ExprKind::UnaryOp { operand, .. } => self.visit_expr(operand, scope),
            ExprKind::IfExp { test, body, orelse } => {
                self.visit_expr(test, scope)?;
                self.visit_expr(body, scope)?;
                self.visit_expr(orelse, scope)
            }
            ExprKind::Dict { keys, values } => {
                for (key, value) in keys.iter().zip(values) {
                    if let Some(key) = key {
                        self.visit_expr(key, scope)?;
                    }
                    self.visit_expr(value, scope)?;
                }
                Ok(())
            }
            ExprKind::Set { elts } | ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => {
                self.visit_exprs(elts, scope)
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.visit_expr(left, scope)?;
                self.visit_exprs(comparators, scope)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.visit_expr(func, scope)?;
                self.visit_exprs(args, scope)?;
                for keyword in keywords {
                    self.visit_expr(&keyword.value, scope)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value, .. } | ExprKind::Starred { value, .. } => {
                self.visit_expr(value, scope)
            }
            ExprKind::Subscript { value, slice, .. } => {
                self.visit_expr(value, scope)?;
                self.visit_expr(slice, scope)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part, scope)?;
                }
                Ok(())
            }
            ExprKind::Constant(_) => Ok(()),
        }
    }

    fn check_in_function(&self, scope: ScopeId, message: &str, span: Span) -> CheckResult<()> {
        if self.scope(scope).kind.is_function_like() {
            Ok(())
        } else {
            Err(CheckError::scope(message, span))
        }
    }

    fn visit_name(&mut self, id: &str, ctx: ExprContext, span: Span, scope: ScopeId) -> CheckResult<()> {
        let current = self.scope_mut(scope);
        match ctx {
            ExprContext::Store => {
                if current.comp_iter_target > 0 {
                    let mangled = current.mangle(id);
                    if current.nonlocals.contains_key(&mangled) || current.globals.contains(&mangled) {
                        return Err(CheckError::scope(
                            format!(
                                "comprehension inner loop cannot rebind assignment expression target '{}'",
                                id
                            ),
                            span,
                        ));
                    }
                    current.add_def(id, DEF_COMP_ITER);
                }
                current.add_def(id, 0);
            }
            ExprContext::Del => current.add_def(id, 0),
            ExprContext::Load => {
                current.add_use(id);
                if id == "super" && current.kind.is_function_like() {
                    current.add_use("__class__");
                }
            }
        }
        Ok(())
    }

    fn visit_named_expr(&mut self, target: &Expr, value: &Expr, span: Span, scope: ScopeId) -> CheckResult<()> {
        if self.scope(scope).comp_iter_expr > 0 {
            return Err(CheckError::scope(
                "assignment expression cannot be used in a comprehension iterable expression",
                span,
            ));
        }
        if let Some(name) = target.as_name() {
            if self.scope(scope).kind == ScopeKind::Comprehension {
                self.bind_named_expr_target(name, span, scope)?;
            }
        }
        self.visit_expr(value, scope)?;
        self.visit_expr(target, scope)
    }

    /// A `:=` target inside a comprehension binds in the nearest enclosing
    /// function or module.
    fn bind_named_expr_target(&mut self, name: &str, span: Span, scope: ScopeId) -> CheckResult<()> {
        let mangled = self.scope(scope).mangle(name);
        let mut current = Some(scope);
        while let Some(cur) = current {
            let kind = self.scope(cur).kind;
            match kind {
                ScopeKind::Comprehension => {
                    let flags = self.scope(cur).defs.get(&mangled).copied().unwrap_or(0);
                    if flags & DEF_COMP_ITER != 0 {
                        return Err(CheckError::scope(
                            format!(
                                "assignment expression cannot rebind comprehension iteration variable '{}'",
                                name
                            ),
                            span,
                        ));
                    }
                }
                ScopeKind::Function | ScopeKind::Lambda => {
                    let explicit_global = self.scope(cur).explicit_globals.contains(&mangled);
                    let comp = self.scope_mut(scope);
                    comp.frees.insert(mangled.clone());
                    if explicit_global {
                        comp.uses.insert(mangled.clone());
                    } else {
                        comp.nonlocals.insert(mangled.clone(), span);
                    }
                    self.scope_mut(cur).add_def(name, 0);
                    return Ok(());
                }
                ScopeKind::Module => {
                    let comp = self.scope_mut(scope);
                    comp.globals.insert(mangled.clone());
                    comp.uses.insert(mangled.clone());
                    self.scope_mut(cur).add_def(name, 0);
                    return Ok(());
                }
                ScopeKind::Class => {
                    return Err(CheckError::scope(
                        "assignment expression within a comprehension cannot be used in a class body",
                        span,
                    ));
                }
            }
            current = self.scope(cur).parent;
        }
        Ok(())
    }

    fn visit_comprehension(
        &mut self,
        name: &str,
        expr: &Expr,
        generators: &[Comprehension],
        elements: &[&Expr],
        is_generator: bool,
        parent: ScopeId,
    ) -> CheckResult<()> {
        let id = self.new_scope(name, ScopeKind::Comprehension, expr.id, expr.span.line, Some(parent));
        self.scope_mut(id).add_param(".0");
        if is_generator {
            self.scope_mut(id).generator = true;
        } else if self.inline_comprehensions && self.scope(parent).kind.is_function_like() {
            self.scope_mut(parent).inlinable.push(id);
        }

        let Some((outermost, rest)) = generators.split_first() else {
            return Err(CheckError::scope("comprehension without a 'for' clause", expr.span));
        };
        self.scope_mut(parent).comp_iter_expr += 1;
        let outer = self.visit_expr(&outermost.iter, parent);
        self.scope_mut(parent).comp_iter_expr -= 1;
        outer?;

        self.visit_generator(outermost, id, true)?;
        for generator in rest {
            self.visit_generator(generator, id, false)?;
        }
        for element in elements {
            self.visit_expr(element, id)?;
        }
        self.finish_scope(id)
    }

    fn visit_generator(&mut self, generator: &Comprehension, scope: ScopeId, outermost: bool) -> CheckResult<()> {
        if generator.is_async {
            self.scope_mut(scope).coroutine = true;
        }
        self.scope_mut(scope).comp_iter_target = 1;
        let target = self.visit_expr(&generator.target, scope);
        self.scope_mut(scope).comp_iter_target = 0;
        target?;
        if outermost {
            self.scope_mut(scope).add_use(".0");
        } else {
            self.scope_mut(scope).comp_iter_expr += 1;
            let iter = self.visit_expr(&generator.iter, scope);
            self.scope_mut(scope).comp_iter_expr -= 1;
            iter?;
        }
        self.visit_exprs(&generator.ifs, scope)
    }
}

/// Build the scope tree of a module.
pub fn build_scopes(module: &Module, future_annotations: bool, inline_comprehensions: bool) -> CheckResult<ScopeTree> {
    let tree = SymbolVisitor::new(future_annotations)
        .with_inline_comprehensions(inline_comprehensions)
        .visit_module(module)?;
    tracing::debug!(scopes = tree.len(), "built scope tree");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle() {
        assert_eq!(mangle("__x", Some("C")), "_C__x");
        assert_eq!(mangle("__x__", Some("C")), "__x__");
        assert_eq!(mangle("_x", Some("C")), "_x");
        assert_eq!(mangle("__x", None), "__x");
        assert_eq!(mangle("__a.b", Some("C")), "__a.b");
        assert_eq!(strip_class_name("__C"), Some("C".to_string()));
        assert_eq!(strip_class_name("___"), None);
    }

    #[test]
    fn test_check_name_order() {
        let mut scope = Scope::new(ScopeId(0), "f", ScopeKind::Function, NodeId(0), 1);
        scope.nested = true;
        scope.add_def("x", 0);
        scope.add_use("y");
        assert_eq!(scope.check_name("x"), NameScope::Local);
        assert_eq!(scope.check_name("y"), NameScope::Free);
        assert_eq!(scope.check_name("z"), NameScope::Unknown);
        scope.cells.insert("x".to_string());
        assert_eq!(scope.check_name("x"), NameScope::Cell);
        scope.explicit_globals.insert("x".to_string());
        assert_eq!(scope.check_name("x"), NameScope::GlobalExplicit);
        scope.nested = false;
        assert_eq!(scope.check_name("z"), NameScope::GlobalImplicit);
    }
}
