//! Module declarations: collect and finish-bind
//!
//! Collect walks the top level of a module and registers classes, functions,
//! imports and annotated names without resolving a single annotation. Imports
//! declare the imported module on demand, so a whole import graph is collected
//! from one entry point. Finish-bind then resolves bases, method resolution
//! orders and every deferred type reference, and checks the class hierarchy.

use stpy_parser::ast::*;
use stpy_parser::Span;
use stpy_types::{
    ClassId, ClassKind, Decorator, FuncId, Function, Member, ParamDefault, ParamKind, Parameter,
    Slot, TypeName, TypeRef, Value,
};

use crate::error::{CheckError, CheckResult};
use crate::module_table::{AnnotatedName, ModulePhase, ModuleTable, PendingImport};
use crate::symbol_table::SymbolTable;

/// Methods whose signature may change freely in subclasses.
const NON_VIRTUAL_METHODS: &[&str] = &["__init__", "__new__", "__init_subclass__"];

/// Decorator effects gathered before a declaration is built.
#[derive(Debug, Default)]
struct Decorations {
    is_final: bool,
    is_static: bool,
    inline: bool,
    dynamic_return: bool,
    allow_weakrefs: bool,
    donotcompile: bool,
    /// An unknown decorator was applied; the declared name is dynamic
    unknown: bool,
}

/// Collects the declarations of one module into its [`ModuleTable`].
pub(crate) struct DeclarationVisitor<'a> {
    symbols: &'a mut SymbolTable,
    module: String,
}

impl<'a> DeclarationVisitor<'a> {
    pub(crate) fn new(symbols: &'a mut SymbolTable, module: &str) -> Self {
        DeclarationVisitor {
            symbols,
            module: module.to_string(),
        }
    }

    /// Collect every module-level declaration.
    pub(crate) fn collect(mut self, tree: &Module) -> CheckResult<()> {
        self.visit_body(&tree.body)
    }

    fn table(&mut self) -> CheckResult<&mut ModuleTable> {
        let module = &self.module;
        self.symbols
            .modules
            .get_mut(module)
            .ok_or_else(|| CheckError::internal(format!("module {} is not being declared", module)))
    }

    fn declare(&mut self, name: &str, value: Value) -> CheckResult<()> {
        self.table()?.declare(name, value);
        Ok(())
    }

    fn error(&self, message: impl Into<String>, span: Span) -> CheckError {
        CheckError::declaration(message, span, self.module.clone())
    }

    fn visit_body(&mut self, body: &[Stmt]) -> CheckResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> CheckResult<()> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let decorations = self.decorations(&def.decorator_list, stmt.span);
                let func = self.build_function(def, stmt, None, def.name.clone(), &decorations)?;
                let value = if decorations.unknown {
                    Value::Dynamic
                } else if decorations.is_static {
                    Value::StaticMethod(func)
                } else {
                    Value::Function(func)
                };
                self.table()?.functions.push(func);
                self.declare(&def.name, value)
            }
            StmtKind::ClassDef(def) => self.declare_class(def, stmt),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                if let Some(name) = target.as_name() {
                    let annotated = AnnotatedName {
                        name: name.to_string(),
                        annotation: annotation.clone(),
                        constant: value.as_ref().and_then(|v| v.as_constant().cloned()),
                        has_value: value.is_some(),
                        span: stmt.span,
                    };
                    let table = self.table()?;
                    table.annotated.push(annotated);
                    if !table.contains(name) {
                        table.declare(name, Value::Dynamic);
                    }
                }
                Ok(())
            }
            StmtKind::Import { names } => {
                for alias in names {
                    self.visit_import(alias)?;
                }
                Ok(())
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => self.visit_import_from(module.as_deref(), names, *level),
            StmtKind::If { test, body, .. } if is_type_checking(test) => self.visit_body(body),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Imports
    // ========================================================================

    fn visit_import(&mut self, alias: &Alias) -> CheckResult<()> {
        let parts: Vec<&str> = alias.name.split('.').collect();
        for end in 1..=parts.len() {
            self.symbols.import_module(&parts[..end].join("."))?;
        }
        match &alias.asname {
            Some(asname) => self.declare(asname, Value::Module(alias.name.clone())),
            None => self.declare(parts[0], Value::Module(parts[0].to_string())),
        }
    }

    fn visit_import_from(&mut self, module: Option<&str>, names: &[Alias], level: u32) -> CheckResult<()> {
        let full = self.absolute_module(module, level);
        if full == "__future__" {
            return Ok(());
        }
        self.symbols.import_module(&full)?;

        for alias in names {
            if alias.name == "*" {
                let exported: Vec<(String, Value)> = match self.symbols.module(&full) {
                    Some(table) => table
                        .names()
                        .into_iter()
                        .filter(|name| !name.starts_with('_'))
                        .filter_map(|name| table.get(name).map(|v| (name.to_string(), v.clone())))
                        .collect(),
                    None => Vec::new(),
                };
                for (name, value) in exported {
                    self.declare(&name, value)?;
                }
                continue;
            }

            let local = alias.bound_name().to_string();
            let (value, pending) = match self.symbols.module(&full) {
                Some(table) => match table.get(&alias.name) {
                    Some(value) => (value.clone(), false),
                    None => (Value::Dynamic, table.phase() == ModulePhase::Declaring),
                },
                None => (Value::Dynamic, false),
            };
            if pending {
                tracing::trace!(module = %full, name = %alias.name, "deferring cyclic import");
                self.table()?.pending_imports.push(PendingImport {
                    local: local.clone(),
                    module: full.clone(),
                    name: alias.name.clone(),
                });
                self.declare(&local, value)?;
                continue;
            }
            let value = match value {
                Value::Dynamic => {
                    let submodule = format!("{}.{}", full, alias.name);
                    if self.symbols.import_module(&submodule)? {
                        Value::Module(submodule)
                    } else {
                        Value::Dynamic
                    }
                }
                other => other,
            };
            self.declare(&local, value)?;
        }
        Ok(())
    }

    /// Absolute name of a possibly relative `from` import.
    fn absolute_module(&self, module: Option<&str>, level: u32) -> String {
        if level == 0 {
            return module.unwrap_or_default().to_string();
        }
        let parts: Vec<&str> = self.module.split('.').collect();
        let keep = parts.len().saturating_sub(level as usize);
        let mut base = parts[..keep].join(".");
        if let Some(module) = module {
            if !base.is_empty() {
                base.push('.');
            }
            base.push_str(module);
        }
        base
    }

    // ========================================================================
    // Decorators and Functions
    // ========================================================================

    fn decorations(&self, decorators: &[Expr], span: Span) -> Decorations {
        let mut result = Decorations::default();
        for decorator in decorators.iter().rev() {
            match self.symbols.lookup_expr(&self.module, decorator) {
                Some(Value::Decorator(Decorator::Final)) => result.is_final = true,
                Some(Value::Decorator(Decorator::StaticMethod)) => result.is_static = true,
                Some(Value::Decorator(Decorator::Inline)) => result.inline = true,
                Some(Value::Decorator(Decorator::DynamicReturn)) => result.dynamic_return = true,
                Some(Value::Decorator(Decorator::AllowWeakrefs)) => result.allow_weakrefs = true,
                Some(Value::Decorator(Decorator::DoNotCompile)) => result.donotcompile = true,
                _ => {
                    tracing::trace!(?span, "unknown decorator makes declaration dynamic");
                    result.unknown = true;
                }
            }
        }
        result
    }

    fn type_ref(&self, annotation: Option<&Expr>, default: ClassId) -> TypeRef {
        match annotation {
            Some(annotation) => TypeRef::unresolved(self.module.clone(), annotation.clone()),
            None => TypeRef::Resolved(default),
        }
    }

    fn build_function(
        &mut self,
        def: &FunctionDef,
        stmt: &Stmt,
        container: Option<ClassId>,
        qualname: String,
        decorations: &Decorations,
    ) -> CheckResult<FuncId> {
        let dynamic = self.symbols.universe.builtins.dynamic;
        let returns = self.type_ref(def.returns.as_ref(), dynamic);
        let mut func = Function::new(
            Default::default(),
            def.name.clone(),
            qualname,
            self.module.clone(),
            returns,
            stmt.id,
        );
        func.container = container;
        func.is_async = def.is_async;
        func.is_final = decorations.is_final;
        func.is_static = decorations.is_static;
        func.dynamic_return = decorations.dynamic_return;
        func.donotcompile = decorations.donotcompile;

        let args = &def.args;
        let self_type = container.filter(|_| !decorations.is_static);
        for (index, arg) in args.positional().enumerate() {
            let default_ty = match (index, self_type) {
                (0, Some(class)) => class,
                _ => dynamic,
            };
            func.params.push(Parameter {
                name: arg.name.clone(),
                index,
                ty: self.type_ref(arg.annotation.as_deref(), default_ty),
                default: param_default(args.default_for(index)),
                kind: if index < args.posonlyargs.len() {
                    ParamKind::PositionalOnly
                } else {
                    ParamKind::Positional
                },
            });
        }
        let offset = func.params.len();
        for (index, arg) in args.kwonlyargs.iter().enumerate() {
            func.params.push(Parameter {
                name: arg.name.clone(),
                index: offset + index,
                ty: self.type_ref(arg.annotation.as_deref(), dynamic),
                default: param_default(args.kw_defaults.get(index).and_then(Option::as_ref)),
                kind: ParamKind::KeywordOnly,
            });
        }
        func.vararg = args.vararg.as_ref().map(|a| a.name.clone());
        func.kwarg = args.kwarg.as_ref().map(|a| a.name.clone());

        if decorations.inline {
            let body = match def.body.as_slice() {
                [Stmt {
                    kind: StmtKind::Return { value: Some(value) },
                    ..
                }] => value.clone(),
                _ => {
                    return Err(self.error(
                        "@inline only supported on functions with simple return",
                        stmt.span,
                    ))
                }
            };
            func.inline_body = Some(body);
        }

        let id = self.symbols.universe.add_function(func);
        self.table()?.record_function(stmt.id, stmt.span, id);
        Ok(id)
    }

    // ========================================================================
    // Classes
    // ========================================================================

    fn declare_class(&mut self, def: &ClassDef, stmt: &Stmt) -> CheckResult<()> {
        let bases = def
            .bases
            .iter()
            .map(|base| TypeRef::unresolved(self.module.clone(), base.clone()))
            .collect();
        let class = self.symbols.universe.add_class(
            TypeName::new(self.module.clone(), def.name.clone()),
            ClassKind::Plain,
            bases,
        );
        let decorations = self.decorations(&def.decorator_list, stmt.span);
        {
            let info = self.symbols.universe.class_mut(class);
            info.node = Some(stmt.id);
            info.is_final = decorations.is_final;
            info.allow_weakrefs = decorations.allow_weakrefs;
            info.donotcompile = decorations.donotcompile;
        }

        for member in &def.body {
            match &member.kind {
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                    ..
                } => {
                    if let Some(name) = target.as_name() {
                        self.define_slot(class, name, Some(annotation), value.as_ref(), false, member)?;
                    }
                }
                StmtKind::Assign { targets, value } => {
                    for target in targets {
                        if let Some(name) = target.as_name() {
                            self.define_slot(class, name, None, Some(value), true, member)?;
                        }
                    }
                }
                StmtKind::FunctionDef(method) => self.declare_method(class, &def.name, method, member)?,
                StmtKind::ClassDef(nested) => {
                    self.symbols
                        .universe
                        .class_mut(class)
                        .define(nested.name.clone(), Member::Dynamic);
                }
                _ => {}
            }
        }

        let value = if decorations.unknown {
            Value::Dynamic
        } else {
            Value::Class(class)
        };
        let table = self.table()?;
        table.classes.push(class);
        table.record_class(stmt.id, stmt.span, class);
        table.declare(def.name.clone(), value);
        Ok(())
    }

    fn class_name(&self, class: ClassId) -> String {
        self.symbols.universe.display(class).to_string()
    }

    /// Declare an attribute; `class_level` marks unannotated class-body
    /// assignments, which are class variables.
    fn define_slot(
        &mut self,
        class: ClassId,
        name: &str,
        annotation: Option<&Expr>,
        value: Option<&Expr>,
        class_level: bool,
        stmt: &Stmt,
    ) -> CheckResult<()> {
        let dynamic = self.symbols.universe.builtins.dynamic;
        let ty = annotation.map(|a| TypeRef::unresolved(self.module.clone(), a.clone()));
        let constant = value.and_then(|v| v.as_constant().cloned());
        let conflict = CheckError::declaration(
            format!("slot conflicts with other member {} in {}", name, self.class_name(class)),
            stmt.span,
            self.module.clone(),
        );

        let info = self.symbols.universe.class_mut(class);
        match info.members.get_mut(name) {
            Some(Member::Slot(slot)) => {
                if let Some(ty) = ty {
                    if slot.ty == TypeRef::Resolved(dynamic) {
                        slot.ty = ty;
                        slot.is_classvar = false;
                    } else {
                        slot.redeclared.push(ty);
                    }
                }
                if value.is_some() {
                    slot.assigned = true;
                    if constant.is_some() {
                        slot.final_value = constant;
                    }
                }
                Ok(())
            }
            Some(Member::Method(_) | Member::StaticMethod(_) | Member::BuiltinMethod(_)) => Err(conflict),
            Some(Member::Dynamic) => Ok(()),
            None => {
                let is_annotated = ty.is_some();
                let mut slot = Slot::new(name, class, ty.unwrap_or(TypeRef::Resolved(dynamic)));
                slot.is_classvar = class_level && !is_annotated;
                slot.assigned = value.is_some();
                slot.final_value = constant;
                slot.node = Some(stmt.id);
                info.define(name, Member::Slot(slot));
                Ok(())
            }
        }
    }

    fn declare_method(&mut self, class: ClassId, class_name: &str, def: &FunctionDef, stmt: &Stmt) -> CheckResult<()> {
        let decorations = self.decorations(&def.decorator_list, stmt.span);
        let qualname = format!("{}.{}", class_name, def.name);
        let func = self.build_function(def, stmt, Some(class), qualname, &decorations)?;

        if let Some(Member::Slot(_)) = self.symbols.universe.class(class).members.get(&def.name) {
            return Err(self.error(
                format!(
                    "function conflicts with other member {} in {}",
                    def.name,
                    self.class_name(class)
                ),
                stmt.span,
            ));
        }
        let member = if decorations.unknown {
            Member::Dynamic
        } else if decorations.is_static {
            Member::StaticMethod(func)
        } else {
            Member::Method(func)
        };
        self.symbols.universe.class_mut(class).define(def.name.clone(), member);

        if !decorations.is_static {
            if let Some(receiver) = def.args.positional().next() {
                let in_init = def.name == "__init__";
                self.collect_self_attributes(class, &receiver.name, &def.body, in_init)?;
            }
        }
        Ok(())
    }

    /// Attributes declared through `self.x: T` in any method, or assigned
    /// through `self.x = v` in `__init__`.
    fn collect_self_attributes(&mut self, class: ClassId, receiver: &str, body: &[Stmt], in_init: bool) -> CheckResult<()> {
        for stmt in body {
            match &stmt.kind {
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                    ..
                } => {
                    if let Some(attr) = self_attribute(target, receiver) {
                        self.define_slot(class, attr, Some(annotation), value.as_ref(), false, stmt)?;
                    }
                }
                StmtKind::Assign { targets, value } if in_init => {
                    for target in targets {
                        if let Some(attr) = self_attribute(target, receiver) {
                            self.define_slot(class, attr, None, Some(value), false, stmt)?;
                        }
                    }
                }
                StmtKind::If { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::For { body, orelse, .. } => {
                    self.collect_self_attributes(class, receiver, body, in_init)?;
                    self.collect_self_attributes(class, receiver, orelse, in_init)?;
                }
                StmtKind::With { body, .. } => {
                    self.collect_self_attributes(class, receiver, body, in_init)?;
                }
                StmtKind::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                } => {
                    self.collect_self_attributes(class, receiver, body, in_init)?;
                    for handler in handlers {
                        self.collect_self_attributes(class, receiver, &handler.body, in_init)?;
                    }
                    self.collect_self_attributes(class, receiver, orelse, in_init)?;
                    self.collect_self_attributes(class, receiver, finalbody, in_init)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn param_default(default: Option<&Expr>) -> ParamDefault {
    match default {
        None => ParamDefault::Required,
        Some(expr) => match expr.as_constant() {
            Some(constant) => ParamDefault::Constant(constant.clone()),
            None => ParamDefault::Computed,
        },
    }
}

fn self_attribute<'e>(target: &'e Expr, receiver: &str) -> Option<&'e str> {
    match &target.kind {
        ExprKind::Attribute { value, attr, .. } if value.as_name() == Some(receiver) => Some(attr),
        _ => None,
    }
}

/// `if TYPE_CHECKING:` or `if typing.TYPE_CHECKING:`.
fn is_type_checking(test: &Expr) -> bool {
    match &test.kind {
        ExprKind::Name { id, .. } => id == "TYPE_CHECKING",
        ExprKind::Attribute { attr, .. } => attr == "TYPE_CHECKING",
        _ => false,
    }
}

fn is_scalar(constant: &Constant) -> bool {
    matches!(
        constant,
        Constant::None
            | Constant::Bool(_)
            | Constant::Int(_)
            | Constant::Float(_)
            | Constant::Str(_)
            | Constant::Bytes(_)
    )
}

// ============================================================================
// Finish-bind
// ============================================================================

impl SymbolTable {
    /// Resolve everything collect deferred, for every declared module.
    ///
    /// Runs once per batch of declared modules; modules already finished are
    /// skipped, so declaring more modules later and finishing again is fine.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn finish_bind(&mut self) -> CheckResult<()> {
        let modules: Vec<String> = self
            .declared
            .iter()
            .filter(|name| self.module(name).map(|m| m.phase()) == Some(ModulePhase::Declared))
            .cloned()
            .collect();

        for module in &modules {
            self.resolve_pending_imports(module);
        }
        for module in &modules {
            for class in self.module_classes(module) {
                self.resolve_bases(module, class)?;
            }
        }
        for module in &modules {
            for class in self.module_classes(module) {
                if let Err(err) = self.universe.mro(class) {
                    let span = self.class_span(module, class);
                    return Err(CheckError::declaration(err.to_string(), span, module.clone()));
                }
            }
        }
        for module in &modules {
            let functions = self.module(module).map(|m| m.functions().to_vec()).unwrap_or_default();
            for func in functions {
                self.resolve_function(func)?;
            }
            for class in self.module_classes(module) {
                for func in self.class_functions(class) {
                    self.resolve_function(func)?;
                }
                self.resolve_slots(module, class)?;
            }
        }
        for module in &modules {
            for class in self.module_classes(module) {
                self.check_class(module, class)?;
            }
            self.finish_annotated(module)?;
            if let Some(table) = self.module_mut(module) {
                table.phase = ModulePhase::Finished;
            }
            tracing::debug!(module = %module, "finished module");
        }
        Ok(())
    }

    fn module_classes(&self, module: &str) -> Vec<ClassId> {
        self.module(module).map(|m| m.classes().to_vec()).unwrap_or_default()
    }

    fn class_functions(&self, class: ClassId) -> Vec<FuncId> {
        let info = self.universe.class(class);
        info.member_order
            .iter()
            .filter_map(|name| info.members.get(name))
            .filter_map(Member::func)
            .collect()
    }

    fn class_span(&self, module: &str, class: ClassId) -> Span {
        let node = self.universe.class(class).node;
        self.module(module).map(|m| m.span_of(node)).unwrap_or_default()
    }

    fn resolve_pending_imports(&mut self, module: &str) {
        let pending = match self.module_mut(module) {
            Some(table) => std::mem::take(&mut table.pending_imports),
            None => return,
        };
        for import in pending {
            let value = self
                .module(&import.module)
                .and_then(|table| table.get(&import.name))
                .cloned()
                .unwrap_or(Value::Dynamic);
            if let Some(table) = self.module_mut(module) {
                table.declare(import.local, value);
            }
        }
    }

    fn resolve_bases(&mut self, module: &str, class: ClassId) -> CheckResult<()> {
        let span = self.class_span(module, class);
        let bases = self.universe.class(class).bases.clone();
        let mut resolved = Vec::with_capacity(bases.len());
        for base in bases {
            let base = match base {
                TypeRef::Resolved(id) => id,
                TypeRef::Unresolved { module: base_module, annotation } => {
                    match self.lookup_expr(&base_module, &annotation) {
                        Some(Value::Class(id)) if !self.universe.is_prim(id) => self.universe.inexact(id),
                        Some(Value::Dynamic) | None => self.universe.builtins.dynamic,
                        Some(_) => {
                            return Err(CheckError::declaration(
                                format!("Class {} has an invalid base", self.universe.display(class)),
                                span,
                                module,
                            ))
                        }
                    }
                }
            };
            if self.universe.class(base).is_final {
                return Err(CheckError::declaration(
                    format!(
                        "Class `{}` cannot subclass a Final class: `{}`",
                        self.universe.display(class),
                        self.universe.display(base)
                    ),
                    span,
                    module,
                ));
            }
            resolved.push(TypeRef::Resolved(base));
        }
        self.universe.class_mut(class).bases = resolved;
        Ok(())
    }

    fn resolve_type_ref(&mut self, ty: &TypeRef) -> CheckResult<TypeRef> {
        match ty {
            TypeRef::Resolved(_) => Ok(ty.clone()),
            TypeRef::Unresolved { module, annotation } => {
                let module = module.clone();
                Ok(TypeRef::Resolved(self.resolve_annotation(&module, annotation)?))
            }
        }
    }

    fn resolve_function(&mut self, func: FuncId) -> CheckResult<()> {
        let function = self.universe.function(func).clone();
        let returns = self.resolve_type_ref(&function.returns)?;
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let mut param = param.clone();
            param.ty = self.resolve_type_ref(&param.ty)?;
            params.push(param);
        }
        let target = self.universe.function_mut(func);
        target.returns = returns;
        target.params = params;
        Ok(())
    }

    fn resolve_slots(&mut self, module: &str, class: ClassId) -> CheckResult<()> {
        let span = self.class_span(module, class);
        let names = self.universe.class(class).member_order.clone();
        for name in names {
            let slot = match self.universe.class(class).members.get(&name) {
                Some(Member::Slot(slot)) => slot.clone(),
                _ => continue,
            };
            let mut updated = slot.clone();
            if let TypeRef::Unresolved { module: slot_module, annotation } = &slot.ty {
                let declared = self.resolve_declaration(slot_module, annotation)?;
                updated.ty = TypeRef::Resolved(declared.ty);
                updated.is_final = declared.is_final;
                updated.is_classvar = declared.is_classvar;
            }
            let ty = updated.ty.resolved().map_err(|e| CheckError::from_type_error(e, span))?;
            for redeclared in &slot.redeclared {
                let other = match redeclared {
                    TypeRef::Unresolved { module: slot_module, annotation } => {
                        self.resolve_declaration(slot_module, annotation)?.ty
                    }
                    TypeRef::Resolved(id) => *id,
                };
                if other != ty {
                    return Err(CheckError::declaration(
                        format!(
                            "conflicting type definitions for slot {} in {}",
                            name,
                            self.universe.display(class)
                        ),
                        span,
                        module,
                    ));
                }
            }
            updated.redeclared = Vec::new();
            if !updated.is_final {
                updated.final_value = None;
            } else if !updated.final_value.as_ref().is_some_and(is_scalar) {
                updated.final_value = None;
            }
            self.universe.class_mut(class).define(name, Member::Slot(updated));
        }
        Ok(())
    }

    fn check_class(&mut self, module: &str, class: ClassId) -> CheckResult<()> {
        let span = self.class_span(module, class);
        let class_name = self.universe.display(class).to_string();
        let error = |message: String| CheckError::declaration(message, span, module);
        let names = self.universe.class(class).member_order.clone();

        for name in names {
            let Some(own) = self.universe.class(class).members.get(&name).cloned() else {
                continue;
            };
            let inherited = self
                .universe
                .lookup_inherited(class, &name)
                .map(|(owner, member)| (owner, member.clone()));

            if let Some((owner, inherited)) = inherited {
                match (&own, &inherited) {
                    (_, Member::Dynamic) | (Member::Dynamic, _) => {}
                    (Member::Slot(slot), Member::Slot(base)) => {
                        if base.is_final {
                            return Err(error(format!(
                                "Cannot assign to a Final attribute of {}:{}",
                                class_name, name
                            )));
                        }
                        let own_ty = slot.ty.resolved().ok();
                        let base_ty = base.ty.resolved().ok();
                        if own_ty != base_ty && own_ty != Some(self.universe.builtins.dynamic) {
                            return Err(error(format!(
                                "conflicting type definitions for slot {} in {}",
                                name, class_name
                            )));
                        }
                        self.universe.class_mut(class).undefine(&name);
                        continue;
                    }
                    (Member::Slot(_), _) | (_, Member::Slot(_)) => {
                        return Err(error(format!("class cannot hide inherited member: {}", name)));
                    }
                    (own_member, base_member) => {
                        if let (Some(own_func), Some(base_func)) = (own_member.func(), base_member.func()) {
                            if self.universe.function(base_func).is_final {
                                return Err(error(format!(
                                    "Cannot assign to a Final attribute of {}:{}",
                                    class_name, name
                                )));
                            }
                            let static_mismatch = self.universe.function(own_func).is_static
                                != self.universe.function(base_func).is_static;
                            if !static_mismatch && !NON_VIRTUAL_METHODS.contains(&name.as_str()) {
                                if let Some(reason) = self.override_mismatch(own_func, base_func) {
                                    let own_qual = &self.universe.function(own_func).qualname;
                                    let base_qual = &self.universe.function(base_func).qualname;
                                    return Err(error(format!(
                                        "<{}.{}> overrides <{}.{}> inconsistently. {}",
                                        module, own_qual, self.universe.class(owner).name.module, base_qual, reason
                                    )));
                                }
                            }
                        }
                    }
                }
            }

            if let Member::Slot(slot) = &own {
                if slot.is_final && !slot.assigned {
                    return Err(error(format!("Final attribute not initialized: {}:{}", class_name, name)));
                }
            }
        }
        Ok(())
    }

    /// Why `own` cannot override `base`, if it cannot.
    fn override_mismatch(&self, own: FuncId, base: FuncId) -> Option<String> {
        let u = &self.universe;
        let (own, base) = (u.function(own), u.function(base));
        let dynamic = u.builtins.dynamic;

        let own_ret = own.returns.resolved().unwrap_or(dynamic);
        let base_ret = base.returns.resolved().unwrap_or(dynamic);
        if !u.is_dynamic(own_ret) && !u.can_assign_from(base_ret, own_ret) {
            return Some(format!(
                "Returned type `{}` is not a subtype of the overridden return `{}`",
                u.display(own_ret),
                u.display(base_ret)
            ));
        }

        let own_pos: Vec<&Parameter> = own.positional_params().collect();
        let base_pos: Vec<&Parameter> = base.positional_params().collect();
        if own_pos.len() != base_pos.len() {
            return Some("Number of arguments differ".to_string());
        }
        for (index, (own_param, base_param)) in own_pos.iter().zip(&base_pos).enumerate().skip(usize::from(own.is_method())) {
            if own_param.name != base_param.name && base_param.kind != ParamKind::PositionalOnly {
                return Some(format!(
                    "Positional argument {} named `{}` is overridden as `{}`",
                    index + 1,
                    base_param.name,
                    own_param.name
                ));
            }
            let own_ty = own_param.ty.resolved().unwrap_or(dynamic);
            let base_ty = base_param.ty.resolved().unwrap_or(dynamic);
            if !u.can_assign_from(own_ty, base_ty) && !u.is_dynamic(base_ty) {
                return Some(format!(
                    "Parameter {} of type `{}` is not a supertype of the overridden parameter `{}`",
                    own_param.name,
                    u.display(own_ty),
                    u.display(base_ty)
                ));
            }
        }

        for base_param in base.params.iter().filter(|p| p.is_keyword_only()) {
            match own.param(&base_param.name) {
                Some(own_param) if own_param.is_keyword_only() => {}
                _ => {
                    return Some(format!(
                        "Keyword only argument `{}` is not overridden as keyword only",
                        base_param.name
                    ))
                }
            }
        }
        if own.vararg.is_some() != base.vararg.is_some() {
            return Some("Functions differ by including *args".to_string());
        }
        if own.kwarg.is_some() != base.kwarg.is_some() {
            return Some("Functions differ by including **kwargs".to_string());
        }
        None
    }

    fn finish_annotated(&mut self, module: &str) -> CheckResult<()> {
        let annotated = match self.module_mut(module) {
            Some(table) => std::mem::take(&mut table.annotated),
            None => return Ok(()),
        };
        for decl in annotated {
            let declared = self.resolve_declaration(module, &decl.annotation)?;
            let mut ty = declared.ty;
            if declared.is_final {
                if !decl.has_value {
                    return Err(CheckError::declaration(
                        "Must assign a value when declaring a Final",
                        decl.span,
                        module,
                    ));
                }
                if self.universe.is_dynamic(ty) {
                    if let Some(inferred) = decl.constant.as_ref().and_then(|c| self.constant_class(c)) {
                        ty = inferred;
                    }
                }
            }
            let value = self.universe.instance(ty);
            let Some(table) = self.module_mut(module) else {
                continue;
            };
            table.set_declared_type(decl.name.clone(), ty);
            table.declare(decl.name.clone(), value);
            if declared.is_final {
                table.add_final(decl.name.clone());
                if let Some(constant) = decl.constant.filter(is_scalar) {
                    table.add_named_final(decl.name, constant);
                }
            }
        }
        Ok(())
    }

    /// Inexact class of a scalar literal.
    pub fn constant_class(&self, constant: &Constant) -> Option<ClassId> {
        let b = &self.universe.builtins;
        match constant {
            Constant::None => Some(b.none),
            Constant::Bool(_) => Some(b.bool_),
            Constant::Int(_) => Some(b.int),
            Constant::Float(_) => Some(b.float),
            Constant::Str(_) => Some(b.str_),
            Constant::Bytes(_) => Some(b.bytes),
            Constant::Tuple(_) => Some(b.tuple),
            Constant::FrozenSet(_) => Some(b.frozenset),
            Constant::Ellipsis => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_parser::parse_module;

    fn declare(source: &str) -> CheckResult<SymbolTable> {
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", parse_module(source).unwrap());
        symbols.declare_module("m")?;
        symbols.finish_bind()?;
        Ok(symbols)
    }

    fn class(symbols: &SymbolTable, name: &str) -> ClassId {
        match symbols.resolve_name("m", name) {
            Some(Value::Class(id)) => *id,
            other => panic!("{} is not a class: {:?}", name, other),
        }
    }

    #[test]
    fn test_nested_statements_declare_nothing() {
        let symbols = declare(
            "from typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    def f(): pass\nif x:\n    def g(): pass\n",
        )
        .unwrap();
        let table = symbols.module("m").unwrap();
        assert!(table.contains("f"));
        assert!(!table.contains("g"));
    }

    #[test]
    fn test_slots_and_methods() {
        let symbols = declare(
            "class C:\n    x: int\n    y = 1\n    def __init__(self):\n        self.z: str = ''\n        self.w = 2\n    def m(self) -> int:\n        return 1\n",
        )
        .unwrap();
        let c = class(&symbols, "C");
        let info = symbols.universe.class(c);
        let slots: Vec<&str> = info.instance_slots().map(|s| s.name.as_str()).collect();
        assert_eq!(slots, vec!["x", "z", "w"]);
        assert!(info.members["y"].as_slot().unwrap().is_classvar);
        let m = info.members["m"].func().unwrap();
        let func = symbols.universe.function(m);
        assert_eq!(func.qualname, "C.m");
        assert_eq!(func.params[0].ty, TypeRef::Resolved(c));
        assert_eq!(func.returns, TypeRef::Resolved(symbols.universe.builtins.int));
    }

    #[test]
    fn test_member_conflicts() {
        let err = declare("class C:\n    x: int\n    def x(self): pass\n").unwrap_err();
        assert_eq!(err.message(), "function conflicts with other member x in m.C");
        let err = declare("class C:\n    def x(self): pass\n    x: int\n").unwrap_err();
        assert_eq!(err.message(), "slot conflicts with other member x in m.C");
        let err = declare("class C:\n    x: int\n    x: str\n").unwrap_err();
        assert_eq!(err.message(), "conflicting type definitions for slot x in m.C");
    }

    #[test]
    fn test_final_base_and_invalid_base() {
        let err = declare("from typing import final\n@final\nclass B: pass\nclass C(B): pass\n").unwrap_err();
        assert_eq!(err.message(), "Class `m.C` cannot subclass a Final class: `m.B`");
        let err = declare("def f(): pass\nclass C(f): pass\n").unwrap_err();
        assert_eq!(err.message(), "Class m.C has an invalid base");
        assert_eq!(err.module(), Some("m"));
    }

    #[test]
    fn test_inconsistent_mro_is_declaration_error() {
        let err = declare("class A: pass\nclass B(A): pass\nclass C(A, B): pass\n").unwrap_err();
        assert_eq!(err.category(), "declaration");
        assert!(err.message().starts_with("Cannot create a consistent method resolution order"));
    }

    #[test]
    fn test_inheritance_checks() {
        let err = declare("class A:\n    x: int\nclass B(A):\n    def x(self): pass\n").unwrap_err();
        assert_eq!(err.message(), "class cannot hide inherited member: x");

        let err = declare(
            "from typing import final\nclass A:\n    @final\n    def f(self): pass\nclass B(A):\n    def f(self): pass\n",
        )
        .unwrap_err();
        assert_eq!(err.message(), "Cannot assign to a Final attribute of m.B:f");

        let err = declare(
            "class A:\n    def f(self) -> int: return 1\nclass B(A):\n    def f(self) -> str: return ''\n",
        )
        .unwrap_err();
        assert!(err.message().contains("overrides <m.A.f> inconsistently"));

        let err = declare("class A:\n    def f(self, x): pass\nclass B(A):\n    def f(self): pass\n").unwrap_err();
        assert!(err.message().ends_with("Number of arguments differ"));

        declare("class A:\n    def __init__(self, x): pass\nclass B(A):\n    def __init__(self): pass\n").unwrap();
    }

    #[test]
    fn test_inherited_slots_move_to_base() {
        let symbols = declare("class A:\n    x: int\nclass B(A):\n    x: int\n").unwrap();
        let b = class(&symbols, "B");
        assert!(!symbols.universe.class(b).members.contains_key("x"));
        let (owner, _) = symbols.universe.lookup_member(b, "x").unwrap();
        assert_eq!(owner, class(&symbols, "A"));
    }

    #[test]
    fn test_finals() {
        let err = declare("from typing import Final\nx: Final[int]\n").unwrap_err();
        assert_eq!(err.message(), "Must assign a value when declaring a Final");

        let err = declare("from typing import Final\nclass C:\n    x: Final[int]\n").unwrap_err();
        assert_eq!(err.message(), "Final attribute not initialized: m.C:x");

        declare("from typing import Final\nclass C:\n    x: Final[int]\n    def __init__(self):\n        self.x = 1\n").unwrap();

        let symbols = declare("from typing import Final\nx: Final[int] = 5\ny: Final = 'a'\n").unwrap();
        let table = symbols.module("m").unwrap();
        assert!(table.is_final("x"));
        assert_eq!(table.named_final("x"), Some(&Constant::Int(5)));
        assert_eq!(table.declared_type("y"), Some(symbols.universe.builtins.str_));
    }

    #[test]
    fn test_inline_requires_simple_return() {
        let err = declare("from __static__ import inline\n@inline\ndef f(x):\n    y = x\n    return y\n").unwrap_err();
        assert_eq!(err.message(), "@inline only supported on functions with simple return");
        let symbols = declare("from __static__ import inline\n@inline\ndef f(x):\n    return x + 1\n").unwrap();
        let Some(Value::Function(f)) = symbols.resolve_name("m", "f") else {
            panic!("f is not a function");
        };
        assert!(symbols.universe.function(*f).is_inline());
    }

    #[test]
    fn test_unknown_decorator_is_dynamic() {
        let symbols = declare("import functools\n@functools.wraps\ndef f(): pass\n").unwrap();
        assert_eq!(symbols.resolve_name("m", "f"), Some(&Value::Dynamic));
    }

    #[test]
    fn test_cross_module_and_cyclic_imports() {
        let mut symbols = SymbolTable::new();
        symbols.add_module("a", "a.py", parse_module("from b import B\nclass A: pass\n").unwrap());
        symbols.add_module("b", "b.py", parse_module("from a import A\nclass B(A): pass\n").unwrap());
        symbols.declare_module("a").unwrap();
        symbols.finish_bind().unwrap();

        let a = match symbols.resolve_name("a", "A") {
            Some(Value::Class(id)) => *id,
            other => panic!("unexpected {:?}", other),
        };
        let b = match symbols.resolve_name("a", "B") {
            Some(Value::Class(id)) => *id,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(symbols.resolve_name("b", "A"), Some(&Value::Class(a)));
        assert!(symbols.universe.is_subclass(b, a));
    }

    #[test]
    fn test_relative_module_names() {
        let mut symbols = SymbolTable::new();
        symbols.add_module("pkg.mod", "pkg/mod.py", parse_module("from .util import helper\n").unwrap());
        symbols.add_module("pkg.util", "pkg/util.py", parse_module("def helper(): pass\n").unwrap());
        symbols.declare_module("pkg.mod").unwrap();
        assert!(matches!(
            symbols.resolve_name("pkg.mod", "helper"),
            Some(Value::Function(_))
        ));
    }
}
