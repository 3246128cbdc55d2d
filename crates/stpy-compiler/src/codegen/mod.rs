//! Type-Directed Code Generation
//!
//! Walks the optimized tree scope by scope and emits instructions into a
//! [`BlockGraph`] per code unit. Every scope becomes one [`CodeUnit`]; nested
//! units are stored as constants of their parent.
//!
//! # Static mode
//!
//! When the module was declared and bound, the generator consults the
//! [`Bindings`] for every node:
//!
//! - calls with a known target become `INVOKE_FUNCTION` / `INVOKE_METHOD`
//! - typed attributes become `LOAD_FIELD` / `STORE_FIELD`
//! - primitive values stay unboxed (`PRIMITIVE_*`, `LOAD_LOCAL`)
//! - dynamic values flowing into typed locations get a `CAST`
//!
//! Without bindings everything goes through the generic instructions.

mod calls;
mod expr;
mod primitive;
mod sequence;
mod setup;
mod stmt;

use std::cell::Cell;

use rustc_hash::FxHashMap;
use stpy_checker::{Bindings, FutureFlags, NameScope, Scope, ScopeKind, ScopeTree, SymbolTable, TEMP_PREFIX};
use stpy_parser::ast::{docstring_of, unparse::unparse_expr, Arguments, ClassDef, Constant, Expr, FunctionDef, Module, NodeId, Stmt, StmtKind};
use stpy_parser::Span;
use stpy_types::{ClassId, PrimKind, TypeDescr, TypeUniverse, Value};

use crate::code_unit::{CodeHeader, CodeKind, CodeUnit, ConstValue};
use crate::config::CompileOptions;
use crate::error::{CompileError, CompileResult, TypedSyntaxError};
use crate::flow_graph::{BlockGraph, BlockId, FlowGraph};
use crate::opcodes::{gen_start, make_function, CodeFlags, Opcode, Oparg};

use setup::SetupEntry;

static DYNAMIC: Value = Value::Dynamic;

/// Declarations and bindings of the module being compiled.
#[derive(Debug, Clone, Copy)]
pub struct Typing<'a> {
    /// Symbol table the module was declared in
    pub symbols: &'a SymbolTable,
    /// Binder output for the module
    pub bindings: &'a Bindings,
}

/// Everything shared by the generators of one module.
#[derive(Debug)]
pub struct Context<'a> {
    /// Dotted module name
    pub module: &'a str,
    /// File name recorded on every code unit
    pub filename: &'a str,
    /// Source text, used to quote the offending line in errors
    pub source: Option<&'a str>,
    /// Scope tree of the optimized module
    pub scopes: &'a ScopeTree,
    /// Present when the module is statically compiled
    pub typing: Option<Typing<'a>>,
    #[allow(missing_docs)]
    pub options: &'a CompileOptions,
    /// `from __future__` features of the module
    pub future: FutureFlags,
    temps: Cell<usize>,
}

impl<'a> Context<'a> {
    /// Context for generic (non-static) compilation.
    pub fn new(
        module: &'a str,
        filename: &'a str,
        scopes: &'a ScopeTree,
        options: &'a CompileOptions,
        future: FutureFlags,
    ) -> Self {
        Context {
            module,
            filename,
            source: None,
            scopes,
            typing: None,
            options,
            future,
            temps: Cell::new(0),
        }
    }

    /// Attach the source text for error messages.
    pub fn with_source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }

    /// Compile statically with the given declarations and bindings.
    pub fn with_typing(mut self, typing: Typing<'a>) -> Self {
        self.temps.set(typing.bindings.temporaries());
        self.typing = Some(typing);
        self
    }

    /// Whether specialised code is emitted.
    pub fn is_static(&self) -> bool {
        self.typing.is_some()
    }

    /// Fresh temporary name, numbered after the binder's spill temporaries.
    fn next_temp(&self) -> String {
        let index = self.temps.get();
        self.temps.set(index + 1);
        format!("{}{}", TEMP_PREFIX, index)
    }

    /// Flags every unit of this module carries.
    fn code_flags(&self) -> CodeFlags {
        let mut flags = self.options.flags | CodeFlags(self.future.bits());
        if self.is_static() {
            flags |= CodeFlags::STATICALLY_COMPILED;
        }
        flags
    }
}

/// Generate the code unit of a module and, through its constants, every
/// nested unit.
#[tracing::instrument(level = "debug", skip_all, fields(module = ctx.module))]
pub fn generate_module<'a>(module: &'a Module, ctx: &'a Context<'a>) -> CompileResult<CodeUnit> {
    let scope = ctx.scopes.module_scope();
    let generator = CodeGenerator::new(ctx, scope, CodeKind::Module, "<module>".to_string(), "<module>".to_string());
    let code = generator.generate_module(module)?;
    tracing::debug!(units = code.children().count() + 1, "generated module");
    Ok(code)
}

/// How a name is loaded and stored in the current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameOp {
    Fast,
    Deref,
    Global,
    Name,
}

/// Generator for a single code unit.
pub(crate) struct CodeGenerator<'a> {
    ctx: &'a Context<'a>,
    scope: &'a Scope,
    graph: BlockGraph,
    setup: Vec<SetupEntry<'a>>,
    kind: CodeKind,
    name: String,
    qualname: String,
    /// Declared return type of the function being generated
    returns: Option<ClassId>,
    /// Parameter to temporary renames of inline expansions in progress
    inline_names: Vec<FxHashMap<String, String>>,
    /// Primitive type of temporaries holding primitive values
    prim_temps: FxHashMap<String, PrimKind>,
}

impl<'a> CodeGenerator<'a> {
    fn new(ctx: &'a Context<'a>, scope: &'a Scope, kind: CodeKind, name: String, qualname: String) -> Self {
        CodeGenerator {
            ctx,
            scope,
            graph: BlockGraph::new(),
            setup: Vec::new(),
            kind,
            name,
            qualname,
            returns: None,
            inline_names: Vec::new(),
            prim_temps: FxHashMap::default(),
        }
    }

    /// Generator for the scope introduced by `node`.
    fn child(&self, node: NodeId, kind: CodeKind, name: &str, span: Span) -> CompileResult<CodeGenerator<'a>> {
        let scope = self.ctx.scopes.scope_of(node).ok_or_else(|| {
            CompileError::internal(format!("no scope recorded for {} at line {}", name, span.line))
        })?;
        let qualname = self.ctx.scopes.qualname(scope.id);
        Ok(CodeGenerator::new(self.ctx, scope, kind, name.to_string(), qualname))
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn emit(&mut self, op: Opcode, arg: impl Into<Oparg>) {
        self.graph.emit(op, arg.into());
    }

    fn emit_op(&mut self, op: Opcode) {
        self.graph.emit(op, Oparg::None);
    }

    fn load_const(&mut self, value: Constant) {
        self.graph.emit(Opcode::LoadConst, Oparg::from(value));
    }

    fn load_none(&mut self) {
        self.load_const(Constant::None);
    }

    fn new_block(&mut self, label: &str) -> BlockId {
        self.graph.new_block(label)
    }

    fn next_block(&mut self, block: BlockId) {
        self.graph.next_block(Some(block));
    }

    /// Start a fresh block after an unconditional jump or return.
    fn fresh_block(&mut self) {
        self.graph.next_block(None);
    }

    fn set_lineno(&mut self, span: Span) {
        self.graph.set_lineno(span.line);
    }

    fn error(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError::Syntax(TypedSyntaxError::codegen(
            message,
            span,
            self.ctx.filename,
            self.ctx.source,
        ))
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn typing(&self) -> Option<&'a Typing<'a>> {
        self.ctx.typing.as_ref()
    }

    fn universe(&self) -> Option<&'a TypeUniverse> {
        self.typing().map(|typing| &typing.symbols.universe)
    }

    fn bindings(&self) -> Option<&'a Bindings> {
        self.typing().map(|typing| typing.bindings)
    }

    /// Static value of a node; dynamic outside static mode.
    fn value_of(&self, node: NodeId) -> &'a Value {
        match self.bindings() {
            Some(bindings) => bindings.type_of(node),
            None => &DYNAMIC,
        }
    }

    /// Class of a node's value unless it is dynamic.
    fn class_of(&self, node: NodeId) -> Option<ClassId> {
        let universe = self.universe()?;
        let class = self.value_of(node).instance_class()?;
        (!universe.is_dynamic(class)).then_some(class)
    }

    /// Primitive kind of a node's value.
    fn prim_of(&self, node: NodeId) -> Option<PrimKind> {
        let universe = self.universe()?;
        self.value_of(node)
            .instance_class()
            .and_then(|class| universe.prim_kind(class))
    }

    fn descr_of(&self, class: ClassId) -> TypeDescr {
        match self.universe() {
            Some(universe) => universe.descr(class),
            None => TypeDescr::object(),
        }
    }

    fn prim_descr(&self, kind: PrimKind) -> TypeDescr {
        match self.universe() {
            Some(universe) => universe.descr(universe.prim(kind)),
            None => TypeDescr::new(["__static__", kind.name()]).with_marker('#'),
        }
    }

    /// Declared type of a local of this scope, when it is not dynamic or
    /// `object`.
    fn checked_local(&self, name: &str) -> Option<ClassId> {
        let universe = self.universe()?;
        let class = self.bindings()?.declared_local(self.scope.node, name)?;
        (!universe.is_dynamic(class) && class != universe.builtins.object).then_some(class)
    }

    // ========================================================================
    // Names
    // ========================================================================

    fn name_op(&self, name: &str) -> (String, NameOp) {
        let mangled = self.scope.mangle(name);
        let function_like = self.scope.kind.is_function_like();
        let op = match self.scope.check_name(&mangled) {
            NameScope::Free | NameScope::Cell => NameOp::Deref,
            NameScope::Local if function_like => NameOp::Fast,
            NameScope::GlobalImplicit if function_like => NameOp::Global,
            NameScope::GlobalExplicit => NameOp::Global,
            _ => NameOp::Name,
        };
        (mangled, op)
    }

    /// Temporary standing in for a parameter of an inline expansion.
    fn inline_temp(&self, name: &str) -> Option<String> {
        self.inline_names.last().and_then(|names| names.get(name)).cloned()
    }

    /// Load a name read by the node `node`.
    fn load_name(&mut self, node: NodeId, name: &str) {
        if let Some(temp) = self.inline_temp(name) {
            self.load_temp(&temp);
            return;
        }
        if let Some(constant) = self.bindings().and_then(|b| b.final_constant(node)) {
            self.load_const(constant.clone());
            return;
        }
        let (mangled, op) = self.name_op(name);
        match op {
            NameOp::Fast => match self.prim_of(node) {
                Some(kind) => {
                    let descr = self.prim_descr(kind);
                    self.emit(Opcode::LoadLocal, Oparg::Local(mangled, descr));
                }
                None => self.emit(Opcode::LoadFast, mangled),
            },
            NameOp::Deref if self.scope.kind == ScopeKind::Class => self.emit(Opcode::LoadClassderef, mangled),
            NameOp::Deref => self.emit(Opcode::LoadDeref, mangled),
            NameOp::Global => self.emit(Opcode::LoadGlobal, mangled),
            NameOp::Name => self.emit(Opcode::LoadName, mangled),
        }
    }

    /// Store into a name; `node` is the store target when it may hold a
    /// primitive.
    fn store_name(&mut self, node: Option<NodeId>, name: &str) {
        let (mangled, op) = self.name_op(name);
        match op {
            NameOp::Fast => match node.and_then(|node| self.prim_of(node)) {
                Some(kind) => {
                    let descr = self.prim_descr(kind);
                    self.emit(Opcode::StoreLocal, Oparg::Local(mangled, descr));
                }
                None => self.emit(Opcode::StoreFast, mangled),
            },
            NameOp::Deref => self.emit(Opcode::StoreDeref, mangled),
            NameOp::Global => self.emit(Opcode::StoreGlobal, mangled),
            NameOp::Name => self.emit(Opcode::StoreName, mangled),
        }
    }

    fn delete_name(&mut self, name: &str) {
        let (mangled, op) = self.name_op(name);
        let opcode = match op {
            NameOp::Fast => Opcode::DeleteFast,
            NameOp::Deref => Opcode::DeleteDeref,
            NameOp::Global => Opcode::DeleteGlobal,
            NameOp::Name => Opcode::DeleteName,
        };
        self.emit(opcode, mangled);
    }

    /// Store into a compiler temporary.
    fn store_temp(&mut self, temp: &str, prim: Option<PrimKind>) {
        match prim {
            Some(kind) => {
                self.prim_temps.insert(temp.to_string(), kind);
                let descr = self.prim_descr(kind);
                self.emit(Opcode::StoreLocal, Oparg::Local(temp.to_string(), descr));
            }
            None if self.scope.kind.is_function_like() => self.emit(Opcode::StoreFast, temp),
            None => self.emit(Opcode::StoreName, temp),
        }
    }

    fn load_temp(&mut self, temp: &str) {
        match self.prim_temps.get(temp).copied() {
            Some(kind) => {
                let descr = self.prim_descr(kind);
                self.emit(Opcode::LoadLocal, Oparg::Local(temp.to_string(), descr));
            }
            None if self.scope.kind.is_function_like() => self.emit(Opcode::LoadFast, temp),
            None => self.emit(Opcode::LoadName, temp),
        }
    }

    // ========================================================================
    // Code Units
    // ========================================================================

    fn generate_module(mut self, module: &'a Module) -> CompileResult<CodeUnit> {
        if has_annotations(&module.body) {
            self.emit_op(Opcode::SetupAnnotations);
        }
        if let Some(doc) = docstring_of(&module.body) {
            if let Some(first) = module.body.first() {
                self.set_lineno(first.span);
            }
            self.load_const(Constant::Str(doc.to_string()));
            self.emit(Opcode::StoreName, "__doc__");
        }
        self.visit_body(&module.body)?;
        self.load_none();
        self.emit_op(Opcode::ReturnValue);
        Ok(self.finish(Vec::new(), (0, 0, 0), CodeFlags::empty()))
    }

    /// Close the graph into a code unit.
    fn finish(self, params: Vec<String>, counts: (usize, usize, usize), flags: CodeFlags) -> CodeUnit {
        let (argcount, posonlyargcount, kwonlyargcount) = counts;
        let firstlineno = match self.kind {
            CodeKind::Module => self.graph.first_lineno().unwrap_or(1),
            _ => self.scope.lineno,
        };
        let header = CodeHeader {
            name: self.name,
            qualname: self.qualname,
            kind: self.kind,
            filename: self.ctx.filename.to_string(),
            firstlineno,
            params,
            argcount,
            posonlyargcount,
            kwonlyargcount,
            cellvars: self.scope.cell_vars(),
            freevars: self.scope.free_vars(),
        };
        let flags = flags | scope_flags(self.scope) | self.ctx.code_flags();
        let mut code = CodeUnit::from_graph(header, self.graph, flags);
        if let Some(returns) = self.returns {
            if let Some(universe) = self.ctx.typing.as_ref().map(|t| &t.symbols.universe) {
                code.return_type = Some(universe.descr(returns));
            }
        }
        tracing::trace!(qualname = %code.qualname, blocks = code.blocks.len(), "generated code unit");
        code
    }

    /// Parameter names in frame order plus the positional, positional-only
    /// and keyword-only counts.
    fn parameters(&self, args: &Arguments) -> (Vec<String>, (usize, usize, usize)) {
        let mut names: Vec<String> = args.positional().map(|arg| self.scope.mangle(&arg.name)).collect();
        let argcount = names.len();
        names.extend(args.kwonlyargs.iter().map(|arg| self.scope.mangle(&arg.name)));
        names.extend(args.vararg.iter().map(|arg| self.scope.mangle(&arg.name)));
        names.extend(args.kwarg.iter().map(|arg| self.scope.mangle(&arg.name)));
        (names, (argcount, args.posonlyargs.len(), args.kwonlyargs.len()))
    }

    fn argument_flags(args: &Arguments) -> CodeFlags {
        let mut flags = CodeFlags::empty();
        if args.vararg.is_some() {
            flags |= CodeFlags::VARARGS;
        }
        if args.kwarg.is_some() {
            flags |= CodeFlags::VARKEYWORDS;
        }
        flags
    }

    fn emit_gen_start(&mut self) {
        let kind = match (self.scope.generator, self.scope.coroutine) {
            (true, true) => gen_start::ASYNC_GENERATOR,
            (true, false) => gen_start::GENERATOR,
            (false, true) => gen_start::COROUTINE,
            (false, false) => return,
        };
        self.emit(Opcode::GenStart, kind);
    }

    /// `CHECK_ARGS` with the index and descriptor of every typed parameter.
    fn emit_check_args(&mut self, args: &Arguments) {
        if !self.ctx.is_static() {
            return;
        }
        let cells = self.scope.cell_vars();
        let mut checks = Vec::new();
        let checked = args.positional().chain(args.kwonlyargs.iter());
        for (index, arg) in checked.enumerate() {
            let name = self.scope.mangle(&arg.name);
            let Some(class) = self.checked_local(&name) else {
                continue;
            };
            let position = match cells.iter().position(|cell| *cell == name) {
                Some(cell) => -(cell as i64 + 1),
                None => index as i64,
            };
            checks.push((position, self.descr_of(class)));
        }
        self.emit(Opcode::CheckArgs, Oparg::CheckArgs(checks));
    }

    fn generate_function(mut self, stmt: &'a Stmt, def: &'a FunctionDef) -> CompileResult<CodeUnit> {
        self.set_lineno(stmt.span);
        self.returns = self.bindings().and_then(|b| b.return_type(stmt.id));
        self.emit_gen_start();
        self.emit_check_args(&def.args);
        self.visit_body(&def.body)?;
        if !self.graph.current_returns() && !self.graph.current_unreachable() {
            self.load_none();
            self.emit_op(Opcode::ReturnValue);
        }
        let (params, counts) = self.parameters(&def.args);
        let flags = Self::argument_flags(&def.args);
        let mut code = self.finish(params, counts, flags);
        if let Some(doc) = docstring_of(&def.body) {
            let doc = ConstValue::Constant(Constant::Str(doc.to_string()));
            if code.consts.first() != Some(&doc) {
                code.consts.retain(|c| *c != doc);
                code.consts.insert(0, doc);
            }
        }
        Ok(code)
    }

    fn generate_lambda(mut self, expr: &'a Expr, args: &'a Arguments, body: &'a Expr) -> CompileResult<CodeUnit> {
        self.set_lineno(expr.span);
        self.emit_gen_start();
        self.emit_check_args(args);
        self.visit_expr(body)?;
        if self.scope.generator {
            self.emit_op(Opcode::PopTop);
            self.load_none();
        }
        self.emit_op(Opcode::ReturnValue);
        let (params, counts) = self.parameters(args);
        let flags = Self::argument_flags(args);
        Ok(self.finish(params, counts, flags))
    }

    fn generate_class(mut self, stmt: &'a Stmt, def: &'a ClassDef) -> CompileResult<CodeUnit> {
        self.set_lineno(stmt.span);
        self.emit(Opcode::LoadName, "__name__");
        self.emit(Opcode::StoreName, "__module__");
        self.load_const(Constant::Str(self.qualname.clone()));
        self.emit(Opcode::StoreName, "__qualname__");
        if has_annotations(&def.body) {
            self.emit_op(Opcode::SetupAnnotations);
        }
        if let Some(doc) = docstring_of(&def.body) {
            self.load_const(Constant::Str(doc.to_string()));
            self.emit(Opcode::StoreName, "__doc__");
        }
        self.visit_body(&def.body)?;

        let layout = self.class_layout(stmt.id);
        if let Some((slots, slot_types)) = &layout {
            let names = slots.iter().map(|name| Constant::Str(name.clone())).collect();
            self.load_const(Constant::Tuple(names));
            self.emit(Opcode::StoreName, "__slots__");
            if !slot_types.is_empty() {
                for (name, descr) in slot_types {
                    self.load_const(Constant::Str(name.clone()));
                    self.emit(Opcode::LoadConst, Oparg::Const(ConstValue::Descr(descr.clone())));
                }
                self.emit(Opcode::BuildMap, slot_types.len());
                self.emit(Opcode::StoreName, "__slot_types__");
            }
        }

        if self.scope.cell_vars().iter().any(|cell| cell == "__class__") {
            self.emit(Opcode::LoadClosure, "__class__");
            self.emit_op(Opcode::DupTop);
            self.emit(Opcode::StoreName, "__classcell__");
        } else {
            self.load_none();
        }
        self.emit_op(Opcode::ReturnValue);

        let mut code = self.finish(Vec::new(), (0, 0, 0), CodeFlags::empty());
        if let Some((slots, slot_types)) = layout {
            code.slots = Some(slots);
            code.slot_types = Some(slot_types);
        }
        Ok(code)
    }

    /// `__slots__` and typed slot descriptors of a statically declared
    /// class.
    #[allow(clippy::type_complexity)]
    fn class_layout(&self, node: NodeId) -> Option<(Vec<String>, Vec<(String, TypeDescr)>)> {
        let typing = self.typing()?;
        let class_id = typing.symbols.module(self.ctx.module)?.class_for(node)?;
        let universe = &typing.symbols.universe;
        let class = universe.class(class_id);
        let mut slots = Vec::new();
        let mut slot_types = Vec::new();
        for slot in class.instance_slots() {
            slots.push(slot.name.clone());
            if let Ok(ty) = slot.ty.resolved() {
                if !universe.is_dynamic(ty) {
                    slot_types.push((slot.name.clone(), universe.descr(ty)));
                }
            }
        }
        if class.allow_weakrefs {
            slots.push("__weakref__".to_string());
        }
        Some((slots, slot_types))
    }

    // ========================================================================
    // Functions and Classes
    // ========================================================================

    fn visit_function_def(&mut self, stmt: &'a Stmt, def: &'a FunctionDef) -> CompileResult<()> {
        if def.is_async && !self.ctx.options.dialect.async_support {
            return Err(self.error("async functions are not supported", stmt.span));
        }
        for decorator in &def.decorator_list {
            self.visit_expr(decorator)?;
        }
        let mut flags = self.emit_defaults(&def.args)?;
        if self.emit_annotations(&def.args, def.returns.as_ref())? {
            flags |= make_function::ANNOTATIONS;
        }
        let code = self
            .child(stmt.id, CodeKind::Function, &def.name, stmt.span)?
            .generate_function(stmt, def)?;
        self.make_closure(code, flags);
        for _ in &def.decorator_list {
            self.emit(Opcode::CallFunction, 1usize);
        }
        self.store_name(None, &def.name);
        Ok(())
    }

    fn visit_lambda(&mut self, expr: &'a Expr, args: &'a Arguments, body: &'a Expr) -> CompileResult<()> {
        let flags = self.emit_defaults(args)?;
        let code = self
            .child(expr.id, CodeKind::Lambda, "<lambda>", expr.span)?
            .generate_lambda(expr, args, body)?;
        self.make_closure(code, flags);
        Ok(())
    }

    fn visit_class_def(&mut self, stmt: &'a Stmt, def: &'a ClassDef) -> CompileResult<()> {
        for decorator in &def.decorator_list {
            self.visit_expr(decorator)?;
        }
        self.emit_op(Opcode::LoadBuildClass);
        let code = self
            .child(stmt.id, CodeKind::Class, &def.name, stmt.span)?
            .generate_class(stmt, def)?;
        self.make_closure(code, 0);
        self.load_const(Constant::Str(def.name.clone()));
        self.emit_call_args(&def.bases, &def.keywords, 2)?;
        for _ in &def.decorator_list {
            self.emit(Opcode::CallFunction, 1usize);
        }
        if let Some(typing) = self.typing() {
            let declared = typing
                .symbols
                .module(self.ctx.module)
                .and_then(|table| table.class_for(stmt.id));
            if let Some(class) = declared {
                let method = if typing.symbols.universe.class(class).is_final {
                    "set_type_static_final"
                } else {
                    "set_type_static"
                };
                self.emit(Opcode::InvokeFunction, Oparg::Invoke(TypeDescr::new(["_static", method]), 1));
            }
        }
        self.store_name(None, &def.name);
        Ok(())
    }

    /// Push positional and keyword-only defaults; returns the
    /// `MAKE_FUNCTION` flags they need.
    fn emit_defaults(&mut self, args: &'a Arguments) -> CompileResult<i64> {
        let mut flags = 0;
        if !args.defaults.is_empty() {
            for default in &args.defaults {
                self.visit_expr(default)?;
            }
            self.emit(Opcode::BuildTuple, args.defaults.len());
            flags |= make_function::DEFAULTS;
        }
        let mut count = 0usize;
        for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
            if let Some(default) = default {
                self.load_const(Constant::Str(self.scope.mangle(&arg.name)));
                self.visit_expr(default)?;
                count += 1;
            }
        }
        if count > 0 {
            self.emit(Opcode::BuildMap, count);
            flags |= make_function::KW_DEFAULTS;
        }
        Ok(flags)
    }

    /// Push the `(name, annotation, ...)` tuple of a function; false when
    /// nothing is annotated.
    fn emit_annotations(&mut self, args: &'a Arguments, returns: Option<&'a Expr>) -> CompileResult<bool> {
        let mut annotated: Vec<(String, &'a Expr)> = Vec::new();
        for arg in args.all() {
            if let Some(annotation) = &arg.annotation {
                annotated.push((self.scope.mangle(&arg.name), annotation));
            }
        }
        if let Some(returns) = returns {
            annotated.push(("return".to_string(), returns));
        }
        if annotated.is_empty() {
            return Ok(false);
        }
        let count = annotated.len() * 2;
        for (name, annotation) in annotated {
            self.load_const(Constant::Str(name));
            self.emit_annotation(annotation)?;
        }
        self.emit(Opcode::BuildTuple, count);
        Ok(true)
    }

    /// Annotation value; a string under `from __future__ import annotations`.
    fn emit_annotation(&mut self, annotation: &'a Expr) -> CompileResult<()> {
        if self.ctx.future.annotations() {
            self.load_const(Constant::Str(unparse_expr(annotation)));
            Ok(())
        } else {
            self.visit_expr(annotation)
        }
    }

    /// `MAKE_FUNCTION` for a nested unit, passing its closure cells.
    fn make_closure(&mut self, code: CodeUnit, mut flags: i64) {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                self.emit(Opcode::LoadClosure, name.as_str());
            }
            self.emit(Opcode::BuildTuple, code.freevars.len());
            flags |= make_function::CLOSURE;
        }
        let qualname = code.qualname.clone();
        self.emit(Opcode::LoadConst, Oparg::Const(ConstValue::Code(Box::new(code))));
        self.load_const(Constant::Str(qualname));
        self.emit(Opcode::MakeFunction, flags);
    }
}

/// Code flags implied by a scope's kind and contents.
fn scope_flags(scope: &Scope) -> CodeFlags {
    let mut flags = CodeFlags::empty();
    if scope.kind.is_function_like() {
        flags |= CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
    }
    if scope.nested {
        flags |= CodeFlags::NESTED;
    }
    match (scope.generator, scope.coroutine) {
        (true, true) => flags |= CodeFlags::ASYNC_GENERATOR,
        (true, false) => flags |= CodeFlags::GENERATOR,
        (false, true) => flags |= CodeFlags::COROUTINE,
        (false, false) => {}
    }
    flags
}

/// Whether a module or class body stores simple annotated names, possibly
/// inside nested compound statements.
fn has_annotations(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::AnnAssign { simple, .. } => *simple,
        StmtKind::For { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::If { body, orelse, .. } => has_annotations(body) || has_annotations(orelse),
        StmtKind::With { body, .. } => has_annotations(body),
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            has_annotations(body)
                || handlers.iter().any(|h| has_annotations(&h.body))
                || has_annotations(orelse)
                || has_annotations(finalbody)
        }
        _ => false,
    })
}
