//! Statement binding: declarations, assignments and control flow

use stpy_parser::ast::{
    Alias, ClassDef, Constant, ExceptHandler, Expr, ExprKind, FunctionDef, Operator, Stmt, StmtKind, WithItem,
};
use stpy_parser::Span;
use stpy_types::{ClassId, FuncId, Member, Value};

use super::scope::{LocalDecl, ScopeRole, TerminalKind};
use super::TypeBinder;
use crate::error::{CheckError, CheckResult};

impl TypeBinder<'_> {
    /// Bind statements until one of them leaves the block.
    pub(super) fn visit_body(&mut self, body: &[Stmt]) -> CheckResult<TerminalKind> {
        for stmt in body {
            self.visit_stmt(stmt)?;
            let kind = self.bindings.terminal(stmt.id);
            if kind != TerminalKind::NonTerminal {
                return Ok(kind);
            }
        }
        Ok(TerminalKind::NonTerminal)
    }

    fn set_terminal(&mut self, stmt: &Stmt, kind: TerminalKind) {
        self.bindings.terminals.insert(stmt.id, kind);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> CheckResult<()> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => self.visit_function_def(stmt, def),
            StmtKind::ClassDef(def) => self.visit_class_def(stmt, def),
            StmtKind::Return { value } => self.visit_return(stmt, value.as_ref()),
            StmtKind::Delete { targets } => {
                for target in targets {
                    self.visit_delete(target)?;
                }
                Ok(())
            }
            StmtKind::Assign { targets, value } => self.visit_assign(targets, value),
            StmtKind::AugAssign { target, op, value } => self.visit_aug_assign(stmt, target, *op, value),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => self.visit_ann_assign(target, annotation, value.as_ref()),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => self.visit_for(target, iter, body, orelse),
            StmtKind::While { test, body, orelse } => self.visit_while(test, body, orelse),
            StmtKind::If { test, body, orelse } => self.visit_if(stmt, test, body, orelse),
            StmtKind::With { items, body, .. } => self.visit_with(items, body),
            StmtKind::Raise { exc, cause } => {
                for expr in exc.iter().chain(cause.iter()) {
                    let value = self.visit_expr(expr, None)?;
                    self.check_boxed(&value, expr.span)?;
                }
                self.set_terminal(stmt, TerminalKind::Return);
                Ok(())
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.visit_try(body, handlers, orelse, finalbody),
            StmtKind::Assert { test, msg } => {
                let effect = self.visit_cond(test)?;
                effect.apply(self.locals_mut()?);
                self.bindings.assert_effects.insert(stmt.id, effect);
                if let Some(msg) = msg {
                    let value = self.visit_expr(msg, None)?;
                    if self.is_prim_value(&value) {
                        return Err(CheckError::type_error("assert message cannot be a primitive", msg.span));
                    }
                }
                Ok(())
            }
            StmtKind::Import { names } => self.visit_import(names),
            StmtKind::ImportFrom { module, names, level } => {
                self.visit_import_from(module.as_deref(), names, *level)
            }
            StmtKind::Expr { value } => self.visit_expr(value, None).map(|_| ()),
            StmtKind::Break | StmtKind::Continue => {
                self.set_terminal(stmt, TerminalKind::BreakOrContinue);
                Ok(())
            }
            StmtKind::Global { .. } | StmtKind::Nonlocal { .. } | StmtKind::Pass => Ok(()),
        }
    }

    // ========================================================================
    // Functions and Classes
    // ========================================================================

    fn visit_function_def(&mut self, stmt: &Stmt, def: &FunctionDef) -> CheckResult<()> {
        for decorator in &def.decorator_list {
            self.visit_expr(decorator, None)?;
        }
        let func = self
            .symbols
            .module(&self.module)
            .and_then(|table| table.function_for(stmt.id));
        let params = self.param_types(def, func, stmt.span)?;

        let positional: Vec<_> = def.args.positional().collect();
        for (index, arg) in positional.iter().enumerate() {
            if let Some(default) = def.args.default_for(index) {
                self.visit_default(default, param_type(&params, &arg.name))?;
            }
        }
        for (arg, default) in def.args.kwonlyargs.iter().zip(&def.args.kw_defaults) {
            if let Some(default) = default {
                self.visit_default(default, param_type(&params, &arg.name))?;
            }
        }

        if self.scope()?.is_function_like() {
            self.bind_local_value(&def.name, Value::Dynamic)?;
        }
        if let Some(func) = func {
            if self.symbols.universe.function(func).donotcompile {
                tracing::trace!(function = %def.name, "skipping body of @_donotcompile function");
                return Ok(());
            }
        }
        self.bind_function_body(stmt, def, func, params)
    }

    fn visit_default(&mut self, default: &Expr, ty: Option<ClassId>) -> CheckResult<()> {
        let value = self.visit_expr(default, ty)?;
        match ty {
            Some(ty) => self.check_can_assign_from(ty, &value, default.span),
            None => self.check_boxed(&value, default.span),
        }
    }

    /// Declared type of every named parameter, in declaration order.
    fn param_types(
        &mut self,
        def: &FunctionDef,
        func: Option<FuncId>,
        span: Span,
    ) -> CheckResult<Vec<(String, ClassId)>> {
        let b = self.symbols.universe.builtins.clone();
        let exact_tuple = b.exact_tuple;
        let exact_dict = self.symbols.universe.exact(b.dict);
        let mut types = Vec::new();
        match func {
            Some(func) => {
                let function = self.symbols.universe.function(func);
                for param in &function.params {
                    let ty = param
                        .ty
                        .resolved()
                        .map_err(|err| CheckError::from_type_error(err, span))?;
                    types.push((param.name.clone(), ty));
                }
                if let Some(vararg) = &function.vararg {
                    types.push((vararg.clone(), exact_tuple));
                }
                if let Some(kwarg) = &function.kwarg {
                    types.push((kwarg.clone(), exact_dict));
                }
            }
            None => {
                for arg in def.args.all() {
                    let ty = if def.args.vararg.as_ref().map(|v| v.id) == Some(arg.id) {
                        exact_tuple
                    } else if def.args.kwarg.as_ref().map(|k| k.id) == Some(arg.id) {
                        exact_dict
                    } else {
                        match &arg.annotation {
                            Some(annotation) => self.symbols.resolve_annotation(&self.module, annotation)?,
                            None => b.dynamic,
                        }
                    };
                    types.push((arg.name.clone(), ty));
                }
            }
        }
        Ok(types)
    }

    fn bind_function_body(
        &mut self,
        stmt: &Stmt,
        def: &FunctionDef,
        func: Option<FuncId>,
        params: Vec<(String, ClassId)>,
    ) -> CheckResult<()> {
        let dynamic = self.symbols.universe.builtins.dynamic;
        let declared = match (func, &def.returns) {
            (Some(func), _) => self
                .symbols
                .universe
                .function(func)
                .returns
                .resolved()
                .map_err(|err| CheckError::from_type_error(err, stmt.span))?,
            (None, Some(returns)) => self.symbols.resolve_annotation(&self.module, returns)?,
            (None, None) => dynamic,
        };
        let generator = self
            .tree
            .scope_of(stmt.id)
            .map(|scope| scope.generator)
            .unwrap_or(false);
        let returns = if generator { dynamic } else { declared };
        self.bindings.returns.insert(stmt.id, returns);

        self.push_scope(
            ScopeRole::Function {
                func,
                returns,
                name: def.name.clone(),
            },
            stmt.id,
            stmt.span,
        )?;
        for (name, ty) in params {
            let span = def
                .args
                .all()
                .find(|arg| arg.name == name)
                .map_or(stmt.span, |arg| arg.span);
            self.declare_local(&name, ty, false, span)?;
        }
        self.visit_body(&def.body)?;
        self.pop_scope();
        Ok(())
    }

    fn visit_class_def(&mut self, stmt: &Stmt, def: &ClassDef) -> CheckResult<()> {
        if let Some(ScopeRole::Function { name, .. }) = self.enclosing_function().map(|s| &s.role) {
            return Err(CheckError::type_error(
                format!("Cannot declare class `{}` inside a function, `{}`", def.name, name),
                stmt.span,
            ));
        }
        for expr in def.decorator_list.iter().chain(&def.bases) {
            self.visit_expr(expr, None)?;
        }
        for keyword in &def.keywords {
            self.visit_expr(&keyword.value, None)?;
        }
        let class = self
            .symbols
            .module(&self.module)
            .and_then(|table| table.class_for(stmt.id));
        if let Some(class) = class {
            if self.symbols.universe.class(class).donotcompile {
                return Ok(());
            }
        }
        self.push_scope(
            ScopeRole::Class {
                class,
                name: def.name.clone(),
            },
            stmt.id,
            stmt.span,
        )?;
        self.visit_body(&def.body)?;
        self.pop_scope();
        Ok(())
    }

    fn visit_return(&mut self, stmt: &Stmt, value: Option<&Expr>) -> CheckResult<()> {
        self.set_terminal(stmt, TerminalKind::Return);
        let expected = match &self.scope()?.role {
            ScopeRole::Function { returns, .. } => *returns,
            _ => self.symbols.universe.builtins.dynamic,
        };
        let Some(value) = value else {
            let none = Value::Instance(self.symbols.universe.builtins.none);
            return self.check_return(expected, &none, stmt.span);
        };
        let returned = self.visit_expr(value, Some(expected))?;
        self.check_return(expected, &returned, stmt.span)?;
        self.cast_if_needed(value.id, expected, &returned);
        Ok(())
    }

    fn check_return(&self, expected: ClassId, returned: &Value, span: Span) -> CheckResult<()> {
        let universe = &self.symbols.universe;
        if universe.is_dynamic(expected) {
            if let Value::Instance(class) = returned {
                if universe.is_prim(*class) {
                    return Err(CheckError::type_error(
                        format!("return type must be dynamic, not {}", universe.display(*class)),
                        span,
                    ));
                }
            }
            return Ok(());
        }
        self.check_assign_with(expected, returned, span, |got, expected| {
            format!("return type must be {}, not {}", expected, got)
        })
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn visit_assign(&mut self, targets: &[Expr], value: &Expr) -> CheckResult<()> {
        let expected = match targets {
            [single] => self.expected_for_target(single)?,
            _ => None,
        };
        let assigned = self.visit_expr(value, expected)?;
        let source = (targets.len() == 1).then_some(value);
        for target in targets {
            self.assign_value(target, &assigned, source)?;
        }
        Ok(())
    }

    /// Declared type of a store target, used as context for the value.
    fn expected_for_target(&mut self, target: &Expr) -> CheckResult<Option<ClassId>> {
        match &target.kind {
            ExprKind::Name { id, .. } => Ok(self.target_decl(id)?.map(|decl| decl.ty)),
            ExprKind::Attribute { value, attr, .. } => {
                let ExprKind::Name { id, .. } = &value.kind else {
                    return Ok(None);
                };
                let receiver = self.peek_name(id)?;
                Ok(self.slot_of(&receiver, attr).map(|slot| slot.ty))
            }
            ExprKind::Subscript { value, slice, .. } if !matches!(slice.kind, ExprKind::Slice { .. }) => {
                let ExprKind::Name { id, .. } = &value.kind else {
                    return Ok(None);
                };
                Ok(match self.peek_name(id)? {
                    Value::Instance(class) => self.array_element(class),
                    _ => None,
                })
            }
            _ => Ok(None),
        }
    }

    /// Store `value` into `target`. `source` is the assigned expression when
    /// it can be cast or unpacked element-wise.
    pub(super) fn assign_value(&mut self, target: &Expr, value: &Value, source: Option<&Expr>) -> CheckResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => self.assign_name(target, id, value, source),
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                self.bindings.types.insert(target.id, value.clone());
                match source.map(|s| &s.kind) {
                    Some(ExprKind::Tuple { elts: values, .. }) | Some(ExprKind::List { elts: values, .. })
                        if values.len() == elts.len() && !values.iter().any(Expr::is_starred) =>
                    {
                        for (inner, inner_value) in elts.iter().zip(values) {
                            let ty = self.bindings.type_of(inner_value.id).clone();
                            self.assign_value(inner, &ty, Some(inner_value))?;
                        }
                    }
                    Some(ExprKind::Constant(Constant::Tuple(items))) if items.len() == elts.len() => {
                        for (inner, item) in elts.iter().zip(items) {
                            let ty = self.constant_value(item);
                            self.assign_value(inner, &ty, None)?;
                        }
                    }
                    _ => {
                        for inner in elts {
                            self.assign_value(inner, &Value::Dynamic, None)?;
                        }
                    }
                }
                Ok(())
            }
            ExprKind::Starred { value: inner, .. } => {
                let list = Value::Instance(self.symbols.universe.builtins.exact_list);
                self.assign_value(inner, &list, None)
            }
            ExprKind::Attribute { value: receiver, attr, .. } => {
                self.assign_attribute(target, receiver, attr, value, source)
            }
            ExprKind::Subscript {
                value: container,
                slice,
                ..
            } => self.assign_subscript(target, container, slice, value, source),
            _ => Ok(()),
        }
    }

    fn assign_name(&mut self, target: &Expr, name: &str, value: &Value, source: Option<&Expr>) -> CheckResult<()> {
        self.check_final_class_member(name, target.span)?;
        match self.target_decl(name)? {
            None => self.declare_inferred(name, value, target.span)?,
            Some(decl) => {
                if decl.is_final {
                    return Err(CheckError::type_error(
                        format!("Cannot assign to a Final variable: {}", name),
                        target.span,
                    ));
                }
                self.check_can_assign_from(decl.ty, value, target.span)?;
                if let Some(source) = source {
                    self.cast_if_needed(source.id, decl.ty, value);
                }
            }
        }
        let current = self.set_local_type(name, value.clone())?;
        self.bindings.types.insert(target.id, current);
        Ok(())
    }

    /// Class bodies may not rebind a `Final` class attribute.
    fn check_final_class_member(&self, name: &str, span: Span) -> CheckResult<()> {
        let ScopeRole::Class { class: Some(class), .. } = &self.scope()?.role else {
            return Ok(());
        };
        let universe = &self.symbols.universe;
        if let Some(Member::Slot(slot)) = universe.class(*class).members.get(name) {
            if slot.is_final {
                return Err(CheckError::type_error(
                    format!(
                        "Cannot assign to a Final attribute of {}:{}",
                        universe.display(*class),
                        name
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// Bind a name without an annotation check, for `def` and imports inside
    /// functions.
    fn bind_local_value(&mut self, name: &str, value: Value) -> CheckResult<()> {
        if self.scope()?.decls.get(name).is_none() {
            let dynamic = self.symbols.universe.builtins.dynamic;
            self.record_decl(
                name,
                LocalDecl {
                    ty: dynamic,
                    is_final: false,
                },
            )?;
        }
        self.set_local_type(name, value)?;
        Ok(())
    }

    fn assign_attribute(
        &mut self,
        target: &Expr,
        receiver: &Expr,
        attr: &str,
        value: &Value,
        source: Option<&Expr>,
    ) -> CheckResult<()> {
        let receiver_value = self.visit_expr(receiver, None)?;
        let Some(slot) = self.slot_of(&receiver_value, attr) else {
            self.bindings.types.insert(target.id, Value::Dynamic);
            return self.check_boxed(value, target.span);
        };
        let universe = &self.symbols.universe;
        if slot.is_final && !self.in_init_of(slot.owner) {
            let receiver_class = match &receiver_value {
                Value::Class(class) | Value::Instance(class) => universe.inexact(*class),
                _ => slot.owner,
            };
            return Err(CheckError::type_error(
                format!(
                    "Cannot assign to a Final attribute of {}:{}",
                    universe.display(receiver_class),
                    attr
                ),
                target.span,
            ));
        }
        self.check_can_assign_from(slot.ty, value, target.span)?;
        if let Some(source) = source {
            self.cast_if_needed(source.id, slot.ty, value);
        }
        if matches!(receiver_value, Value::Instance(_)) {
            self.record_field(target, &slot);
        }
        let stored = self.symbols.universe.instance(slot.ty);
        self.bindings.types.insert(target.id, stored);
        Ok(())
    }

    /// Whether the innermost function is `__init__` of `owner`.
    fn in_init_of(&self, owner: ClassId) -> bool {
        match self.enclosing_function().map(|scope| &scope.role) {
            Some(ScopeRole::Function { func: Some(func), .. }) => {
                let function = self.symbols.universe.function(*func);
                function.name == "__init__" && function.container == Some(owner)
            }
            _ => false,
        }
    }

    fn assign_subscript(
        &mut self,
        target: &Expr,
        container: &Expr,
        slice: &Expr,
        value: &Value,
        source: Option<&Expr>,
    ) -> CheckResult<()> {
        let container_value = self.visit_expr(container, None)?;
        let element = self.subscript_type(&container_value, slice, target.span)?;
        let universe = &self.symbols.universe;
        let element_class = universe.class_of(&element);
        if universe.is_dynamic(element_class) {
            self.check_boxed(value, target.span)?;
        } else {
            self.check_can_assign_from(element_class, value, target.span)?;
            if let Some(source) = source {
                self.cast_if_needed(source.id, element_class, value);
            }
        }
        self.bindings.types.insert(target.id, element);
        Ok(())
    }

    fn visit_aug_assign(&mut self, stmt: &Stmt, target: &Expr, op: Operator, value: &Expr) -> CheckResult<()> {
        let current = self.visit_expr(target, None)?;
        let context = match &current {
            Value::Instance(class) if self.symbols.universe.is_prim(*class) => Some(*class),
            _ => None,
        };
        let operand = self.visit_expr(value, context)?;
        let result = self.binary_result(op, &current, &operand, stmt.span)?;
        self.bindings.types.insert(stmt.id, result.clone());
        match &target.kind {
            ExprKind::Name { id, .. } => {
                match self.target_decl(id)? {
                    Some(decl) if decl.is_final => {
                        return Err(CheckError::type_error(
                            format!("Cannot assign to a Final variable: {}", id),
                            target.span,
                        ))
                    }
                    Some(decl) => self.check_can_assign_from(decl.ty, &result, target.span)?,
                    None => {}
                }
                self.set_local_type(id, result)?;
                Ok(())
            }
            _ => {
                let dest = self.symbols.universe.class_of(&current);
                if self.symbols.universe.is_dynamic(dest) {
                    self.check_boxed(&result, target.span)
                } else {
                    self.check_can_assign_from(dest, &result, target.span)
                }
            }
        }
    }

    fn visit_ann_assign(&mut self, target: &Expr, annotation: &Expr, value: Option<&Expr>) -> CheckResult<()> {
        let ExprKind::Name { id, .. } = &target.kind else {
            let expected = self.expected_for_target(target)?;
            if let Some(value) = value {
                let assigned = self.visit_expr(value, expected)?;
                self.assign_value(target, &assigned, Some(value))?;
            }
            return Ok(());
        };

        let declared = self.symbols.resolve_declaration(&self.module, annotation)?;
        let role = self.scope()?.role.clone();
        if declared.is_classvar && !matches!(role, ScopeRole::Class { .. }) {
            return Err(CheckError::type_error(
                "ClassVar is allowed only in class attribute annotations.",
                annotation.span,
            ));
        }
        let mut ty = declared.ty;
        match role {
            ScopeRole::Module => {
                if self.symbols.universe.is_prim(ty) {
                    return Err(CheckError::type_error(
                        "cannot use primitives in global or closure scope",
                        target.span,
                    ));
                }
                if let Some(inferred) = self
                    .symbols
                    .module(&self.module)
                    .and_then(|table| table.declared_type(id))
                {
                    ty = inferred;
                }
                self.record_decl(
                    id,
                    LocalDecl {
                        ty,
                        is_final: declared.is_final,
                    },
                )?;
            }
            ScopeRole::Class { .. } => {}
            _ => {
                if declared.is_final && value.is_none() {
                    return Err(CheckError::type_error(
                        "Must assign a value when declaring a Final",
                        target.span,
                    ));
                }
                self.declare_local(id, ty, declared.is_final, target.span)?;
            }
        }

        let Some(value) = value else {
            let declared_value = self.symbols.universe.instance(ty);
            self.bindings.types.insert(target.id, declared_value);
            return Ok(());
        };
        let assigned = self.visit_expr(value, Some(ty))?;
        self.check_can_assign_from(ty, &assigned, value.span)?;
        self.cast_if_needed(value.id, ty, &assigned);
        let current = if matches!(role, ScopeRole::Class { .. }) {
            self.symbols.universe.instance(ty)
        } else {
            self.set_local_type(id, assigned)?
        };
        self.bindings.types.insert(target.id, current);
        Ok(())
    }

    fn visit_delete(&mut self, target: &Expr) -> CheckResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => {
                let declared = self.scope()?.decls.get(id).copied();
                let universe = &self.symbols.universe;
                let reset = declared.map(|decl| universe.instance(decl.ty));
                let locals = self.locals_mut()?;
                match reset {
                    Some(value) => {
                        locals.insert(id.clone(), value);
                    }
                    None => {
                        locals.remove(id);
                    }
                }
                Ok(())
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                for elt in elts {
                    self.visit_delete(elt)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value, .. } => self.visit_expr(value, None).map(|_| ()),
            ExprKind::Subscript { value, slice, .. } => {
                self.visit_expr(value, None)?;
                self.visit_expr(slice, None).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Control Flow
    // ========================================================================

    fn visit_if(&mut self, stmt: &Stmt, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> CheckResult<()> {
        let effect = self.visit_cond(test)?;
        let entry = self.snapshot()?;

        effect.apply(self.locals_mut()?);
        let body_kind = self.visit_body(body)?;
        let post_if = self.snapshot()?;

        self.restore(effect.reversed(&entry))?;
        let else_kind = if orelse.is_empty() {
            TerminalKind::NonTerminal
        } else {
            self.visit_body(orelse)?
        };

        match (body_kind, else_kind) {
            (TerminalKind::NonTerminal, TerminalKind::NonTerminal) => self.merge(&post_if)?,
            (TerminalKind::NonTerminal, _) => self.restore(post_if)?,
            (_, TerminalKind::NonTerminal) => {}
            (body_kind, else_kind) => self.set_terminal(stmt, body_kind.min(else_kind)),
        }
        Ok(())
    }

    fn visit_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> CheckResult<()> {
        let effect = self.visit_cond(test)?;
        let entry = self.snapshot()?;

        effect.apply(self.locals_mut()?);
        let body_kind = self.visit_body(body)?;
        let exit = effect.reversed(&entry);
        if body_kind == TerminalKind::Return {
            self.restore(exit)?;
        } else {
            self.merge(&exit)?;
        }

        let before_else = self.snapshot()?;
        self.visit_body(orelse)?;
        self.merge(&before_else)
    }

    fn visit_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt]) -> CheckResult<()> {
        let iterable = self.visit_expr(iter, None)?;
        let element = self.iteration_type(&iterable, iter.span)?;
        let entry = self.snapshot()?;
        self.assign_value(target, &element, None)?;
        self.visit_body(body)?;
        self.merge(&entry)?;

        let before_else = self.snapshot()?;
        self.visit_body(orelse)?;
        self.merge(&before_else)
    }

    /// Type of the values produced by iterating over `iterable`.
    pub(super) fn iteration_type(&mut self, iterable: &Value, span: Span) -> CheckResult<Value> {
        let Value::Instance(class) = iterable else {
            return Ok(Value::Dynamic);
        };
        let universe = &self.symbols.universe;
        let b = &universe.builtins;
        if universe.is_prim(*class) {
            return Err(CheckError::type_error(
                format!("cannot iterate over {}", universe.display(*class)),
                span,
            ));
        }
        let def = universe.generic_def(*class);
        if def == Some(b.checked_list) || def == Some(b.checked_dict) {
            if let Some(first) = universe.generic_args(*class).first() {
                return Ok(universe.instance(*first));
            }
        }
        if *class == b.exact_str {
            return Ok(Value::Instance(b.exact_str));
        }
        Ok(Value::Dynamic)
    }

    fn visit_with(&mut self, items: &[WithItem], body: &[Stmt]) -> CheckResult<()> {
        for item in items {
            let manager = self.visit_expr(&item.context_expr, None)?;
            self.check_boxed(&manager, item.context_expr.span)?;
            if let Some(target) = &item.optional_vars {
                self.assign_value(target, &Value::Dynamic, None)?;
            }
        }
        self.visit_body(body).map(|_| ())
    }

    fn visit_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> CheckResult<()> {
        let entry = self.snapshot()?;
        self.visit_body(body)?;
        self.merge(&entry)?;
        let post_try = self.snapshot()?;

        self.visit_body(orelse)?;
        let mut branches = vec![self.snapshot()?];

        for handler in handlers {
            self.restore(post_try.clone())?;
            self.visit_handler(handler)?;
            branches.push(self.snapshot()?);
        }

        let mut branches = branches.into_iter();
        if let Some(first) = branches.next() {
            self.restore(first)?;
        }
        for branch in branches {
            self.merge(&branch)?;
        }
        self.visit_body(finalbody).map(|_| ())
    }

    fn visit_handler(&mut self, handler: &ExceptHandler) -> CheckResult<()> {
        let caught = match &handler.type_ {
            Some(expr) => match self.visit_expr(expr, None)? {
                Value::Class(class) => {
                    let inexact = self.symbols.universe.inexact(class);
                    self.symbols.universe.instance(inexact)
                }
                _ => Value::Dynamic,
            },
            None => Value::Dynamic,
        };

        let bound = match &handler.name {
            Some(name) if self.scope()?.is_function_like() && !self.scope()?.decls.contains_key(name) => {
                let ty = self.symbols.universe.class_of(&caught);
                self.record_decl(name, LocalDecl { ty, is_final: false })?;
                Some(name)
            }
            Some(name) => {
                self.locals_mut()?.insert(name.clone(), caught);
                None
            }
            None => None,
        };

        self.visit_body(&handler.body)?;

        // The handler name is unbound when the handler exits.
        if let Some(name) = bound {
            let scope = self.scope_mut()?;
            scope.decls.remove(name);
            scope.locals.remove(name);
        }
        Ok(())
    }

    // ========================================================================
    // Imports
    // ========================================================================

    fn visit_import(&mut self, names: &[Alias]) -> CheckResult<()> {
        if !self.scope()?.is_function_like() {
            return Ok(());
        }
        for alias in names {
            let module = match &alias.asname {
                Some(_) => alias.name.clone(),
                None => alias.bound_name().to_string(),
            };
            let value = if self.symbols.has_module(&module) {
                Value::Module(module)
            } else {
                Value::Dynamic
            };
            self.bind_local_value(alias.bound_name(), value)?;
        }
        Ok(())
    }

    fn visit_import_from(&mut self, module: Option<&str>, names: &[Alias], level: u32) -> CheckResult<()> {
        let module = module.unwrap_or_default();
        if level == 0 && module == "__static__" {
            for alias in names {
                if alias.name == "*" {
                    return Err(CheckError::type_error(
                        "from __static__ import * is disallowed",
                        alias.span,
                    ));
                }
                let known = self
                    .symbols
                    .module("__static__")
                    .map_or(false, |table| table.contains(&alias.name));
                if !known {
                    return Err(CheckError::type_error(
                        format!("unsupported static import {}", alias.name),
                        alias.span,
                    ));
                }
            }
        }
        if !self.scope()?.is_function_like() || level != 0 {
            return Ok(());
        }
        for alias in names {
            if alias.name == "*" {
                continue;
            }
            let value = self
                .symbols
                .module(module)
                .and_then(|table| table.get(&alias.name))
                .cloned()
                .unwrap_or_default();
            self.bind_local_value(alias.bound_name(), value)?;
        }
        Ok(())
    }
}

fn param_type(params: &[(String, ClassId)], name: &str) -> Option<ClassId> {
    params.iter().find(|(n, _)| n == name).map(|(_, ty)| *ty)
}
