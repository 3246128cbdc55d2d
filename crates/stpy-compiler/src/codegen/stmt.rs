//! Statement generation

use stpy_parser::ast::{Alias, Constant, ExceptHandler, Expr, ExprKind, Operator, Stmt, StmtKind, WithItem};
use stpy_parser::Span;
use stpy_types::{ClassKind, PrimKind};

use super::{CodeGenerator, SetupEntry};
use crate::error::CompileResult;
use crate::opcodes::{prim_binary, prim_compare, sequence, Opcode, Oparg};

impl<'a> CodeGenerator<'a> {
    pub(super) fn visit_body(&mut self, body: &'a [Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &'a Stmt) -> CompileResult<()> {
        self.set_lineno(stmt.span);
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
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit_op(Opcode::DupTop);
                    }
                    self.visit_store(target)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => self.visit_aug_assign(stmt, target, *op, value),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => self.visit_ann_assign(target, annotation, value.as_ref(), *simple),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    self.visit_async_for(stmt, target, iter, body, orelse)
                } else if let Some(kind) = self.indexed_sequence(iter) {
                    self.visit_indexed_for(target, iter, body, orelse, kind)
                } else {
                    self.visit_for(target, iter, body, orelse)
                }
            }
            StmtKind::While { test, body, orelse } => self.visit_while(test, body, orelse),
            StmtKind::If { test, body, orelse } => self.visit_if(test, body, orelse),
            StmtKind::With { items, body, is_async } => {
                if *is_async {
                    self.check_async(stmt.span, "'async with' outside async function")?;
                    self.visit_async_with(items, body, 0)
                } else {
                    self.visit_with(items, body, 0)
                }
            }
            StmtKind::Raise { exc, cause } => {
                let mut count = 0usize;
                if let Some(exc) = exc {
                    self.visit_expr(exc)?;
                    count += 1;
                    if let Some(cause) = cause {
                        self.visit_expr(cause)?;
                        count += 1;
                    }
                }
                self.emit(Opcode::RaiseVarargs, count);
                self.fresh_block();
                Ok(())
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if finalbody.is_empty() {
                    self.visit_try_except(body, handlers, orelse)
                } else {
                    self.visit_try_finally(body, handlers, orelse, finalbody)
                }
            }
            StmtKind::Assert { test, msg } => self.visit_assert(test, msg.as_ref()),
            StmtKind::Import { names } => {
                for alias in names {
                    self.visit_import(alias);
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, names, level } => {
                self.visit_import_from(stmt.span, module.as_deref(), names, *level)
            }
            StmtKind::Global { .. } | StmtKind::Nonlocal { .. } | StmtKind::Pass => Ok(()),
            StmtKind::Expr { value } => {
                if value.is_constant() {
                    return Ok(());
                }
                self.visit_expr(value)?;
                self.emit_op(Opcode::PopTop);
                Ok(())
            }
            StmtKind::Break => self.visit_break(stmt.span),
            StmtKind::Continue => self.visit_continue(stmt.span),
        }
    }

    // ========================================================================
    // Control Flow
    // ========================================================================

    fn visit_return(&mut self, stmt: &'a Stmt, value: Option<&'a Expr>) -> CompileResult<()> {
        if !self.scope.kind.is_function_like() {
            return Err(self.error("'return' outside function", stmt.span));
        }
        if value.is_some() && self.scope.generator && self.scope.coroutine {
            return Err(self.error("'return' with value in async generator", stmt.span));
        }
        let preserve_tos = value.is_some_and(|value| !value.is_constant());
        if let Some(value) = value.filter(|_| preserve_tos) {
            self.visit_expr(value)?;
        }
        self.unwind_setup_stack(preserve_tos, false)?;
        match value {
            None => self.load_none(),
            Some(value) if !preserve_tos => self.visit_expr(value)?,
            Some(_) => {}
        }
        self.emit_return();
        self.fresh_block();
        Ok(())
    }

    /// Return the value on top of the stack, unboxed for primitive returns.
    fn emit_return(&mut self) {
        let prim = self
            .returns
            .and_then(|returns| self.universe().and_then(|u| u.prim_kind(returns)));
        match prim {
            Some(kind) => self.emit(Opcode::ReturnPrimitive, kind.type_code()),
            None => self.emit_op(Opcode::ReturnValue),
        }
    }

    fn visit_break(&mut self, span: Span) -> CompileResult<()> {
        let Some(entry) = self.unwind_setup_stack(false, true)? else {
            return Err(self.error("'break' outside loop", span));
        };
        self.unwind_entry(&entry, false)?;
        if let Some((_, exit)) = entry.loop_targets() {
            self.emit(Opcode::JumpAbsolute, exit);
        }
        self.fresh_block();
        Ok(())
    }

    fn visit_continue(&mut self, span: Span) -> CompileResult<()> {
        let Some(entry) = self.unwind_setup_stack(false, true)? else {
            return Err(self.error("'continue' not properly in loop", span));
        };
        if let Some((start, _)) = entry.loop_targets() {
            self.emit(Opcode::JumpAbsolute, start);
        }
        self.fresh_block();
        Ok(())
    }

    fn visit_if(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        if let Some(constant) = test.as_constant() {
            return if constant.is_truthy() {
                self.visit_body(body)
            } else {
                self.visit_body(orelse)
            };
        }
        let end = self.new_block("if_end");
        let next = if orelse.is_empty() { end } else { self.new_block("if_else") };
        self.jump_if(test, next, false)?;
        self.visit_body(body)?;
        if !orelse.is_empty() {
            self.emit(Opcode::JumpForward, end);
            self.next_block(next);
            self.visit_body(orelse)?;
        }
        self.next_block(end);
        Ok(())
    }

    fn visit_while(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        let constant = test.as_constant().map(Constant::is_truthy);
        if constant == Some(false) {
            return self.visit_body(orelse);
        }
        let start = self.new_block("while_start");
        let exit = self.new_block("while_exit");
        let anchor = if orelse.is_empty() { exit } else { self.new_block("while_else") };

        self.next_block(start);
        self.push_setup(SetupEntry::WhileLoop { start, exit });
        if constant.is_none() {
            self.jump_if(test, anchor, false)?;
        }
        self.visit_body(body)?;
        self.emit(Opcode::JumpAbsolute, start);
        self.pop_setup();

        if !orelse.is_empty() {
            self.next_block(anchor);
            self.visit_body(orelse)?;
        }
        self.next_block(exit);
        Ok(())
    }

    fn visit_for(&mut self, target: &'a Expr, iter: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        let start = self.new_block("for_start");
        let cleanup = self.new_block("for_cleanup");
        let exit = self.new_block("for_exit");

        self.visit_expr(iter)?;
        self.emit_op(Opcode::GetIter);
        self.next_block(start);
        self.push_setup(SetupEntry::ForLoop { start, exit });
        self.emit(Opcode::ForIter, cleanup);
        self.visit_store(target)?;
        self.visit_body(body)?;
        self.emit(Opcode::JumpAbsolute, start);
        self.pop_setup();

        self.next_block(cleanup);
        self.visit_body(orelse)?;
        self.next_block(exit);
        Ok(())
    }

    /// Exact `list` or `tuple` iterated into a plain name inside a function,
    /// which is walked by index instead of through an iterator.
    fn indexed_sequence(&self, iter: &Expr) -> Option<ClassKind> {
        if !self.scope.kind.is_function_like() {
            return None;
        }
        let universe = self.universe()?;
        let class = self.class_of(iter.id)?;
        if !universe.is_exact(class) {
            return None;
        }
        match universe.kind(class) {
            ClassKind::List => Some(ClassKind::List),
            ClassKind::Tuple => Some(ClassKind::Tuple),
            _ => None,
        }
    }

    fn visit_indexed_for(
        &mut self,
        target: &'a Expr,
        iter: &'a Expr,
        body: &'a [Stmt],
        orelse: &'a [Stmt],
        kind: ClassKind,
    ) -> CompileResult<()> {
        if target.as_name().is_none() {
            return self.visit_for(target, iter, body, orelse);
        }
        let start = self.new_block("for_start");
        let anchor = self.new_block("for_anchor");
        let exit = self.new_block("for_exit");
        let index = self.ctx.next_temp();
        let int64 = PrimKind::Int64.type_code();

        self.visit_expr(iter)?;
        self.emit(Opcode::PrimitiveLoadConst, Oparg::Prim(Constant::Int(0), int64));
        self.store_temp(&index, Some(PrimKind::Int64));

        self.next_block(start);
        self.push_setup(SetupEntry::ForLoop { start, exit });
        self.emit_op(Opcode::DupTop);
        self.emit_op(Opcode::DupTop);
        let len_kind = if kind == ClassKind::List { 0i64 } else { 3 };
        self.emit(Opcode::FastLen, len_kind);
        self.load_temp(&index);
        self.emit(Opcode::PrimitiveCompareOp, prim_compare::GT);
        self.emit(Opcode::PopJumpIfZero, anchor);

        self.load_temp(&index);
        if kind == ClassKind::List {
            self.emit(Opcode::SequenceGet, sequence::LIST | sequence::UNCHECKED);
        } else {
            self.emit(Opcode::PrimitiveBox, int64);
            self.emit_op(Opcode::BinarySubscr);
        }
        self.load_temp(&index);
        self.emit(Opcode::PrimitiveLoadConst, Oparg::Prim(Constant::Int(1), int64));
        self.emit(Opcode::PrimitiveBinaryOp, prim_binary::ADD);
        self.store_temp(&index, Some(PrimKind::Int64));

        self.visit_store(target)?;
        self.visit_body(body)?;
        self.emit(Opcode::JumpAbsolute, start);
        self.pop_setup();

        self.next_block(anchor);
        self.emit_op(Opcode::PopTop);
        self.emit_op(Opcode::PopTop);
        self.visit_body(orelse)?;
        self.next_block(exit);
        Ok(())
    }

    fn visit_async_for(
        &mut self,
        stmt: &'a Stmt,
        target: &'a Expr,
        iter: &'a Expr,
        body: &'a [Stmt],
        orelse: &'a [Stmt],
    ) -> CompileResult<()> {
        self.check_async(stmt.span, "'async for' outside async function")?;
        let start = self.new_block("async_for_start");
        let except = self.new_block("async_for_except");
        let exit = self.new_block("async_for_exit");

        self.visit_expr(iter)?;
        self.emit_op(Opcode::GetAiter);
        self.next_block(start);
        self.push_setup(SetupEntry::ForLoop { start, exit });
        self.emit(Opcode::SetupFinally, except);
        self.emit_op(Opcode::GetAnext);
        self.load_none();
        self.emit_op(Opcode::YieldFrom);
        self.emit_op(Opcode::PopBlock);
        self.visit_store(target)?;
        self.visit_body(body)?;
        self.emit(Opcode::JumpAbsolute, start);
        self.pop_setup();

        self.next_block(except);
        self.emit_op(Opcode::EndAsyncFor);
        self.visit_body(orelse)?;
        self.next_block(exit);
        Ok(())
    }

    /// Reject an async construct outside a coroutine or when the dialect
    /// has no async support.
    pub(super) fn check_async(&self, span: Span, message: &str) -> CompileResult<()> {
        if !self.ctx.options.dialect.async_support {
            return Err(self.error("async constructs are not supported", span));
        }
        if !self.scope.coroutine {
            return Err(self.error(message, span));
        }
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn visit_try_finally(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
        finalbody: &'a [Stmt],
    ) -> CompileResult<()> {
        let try_body = self.new_block("try_body");
        let end = self.new_block("finally_end");
        let exit = self.new_block("finally_exit");

        self.emit(Opcode::SetupFinally, end);
        self.next_block(try_body);
        self.push_setup(SetupEntry::FinallyTry { body: finalbody });
        if handlers.is_empty() {
            self.visit_body(body)?;
        } else {
            self.visit_try_except(body, handlers, orelse)?;
        }
        self.emit_op(Opcode::PopBlock);
        self.pop_setup();
        self.visit_body(finalbody)?;
        self.emit(Opcode::JumpForward, exit);

        self.next_block(end);
        self.push_setup(SetupEntry::FinallyEnd);
        self.visit_body(finalbody)?;
        self.pop_setup();
        self.emit(Opcode::Reraise, 0i64);
        self.next_block(exit);
        Ok(())
    }

    fn visit_try_except(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
    ) -> CompileResult<()> {
        let try_body = self.new_block("try_body");
        let mut except = self.new_block("try_except");
        let orelse_block = self.new_block("try_else");
        let end = self.new_block("try_end");

        self.emit(Opcode::SetupFinally, except);
        self.next_block(try_body);
        self.push_setup(SetupEntry::TryExcept);
        self.visit_body(body)?;
        self.pop_setup();
        self.emit_op(Opcode::PopBlock);
        self.emit(Opcode::JumpForward, orelse_block);

        self.next_block(except);
        self.push_setup(SetupEntry::ExceptionHandler);
        for (i, handler) in handlers.iter().enumerate() {
            if handler.type_.is_none() && i + 1 < handlers.len() {
                return Err(self.error("default 'except:' must be last", handler.span));
            }
            self.set_lineno(handler.span);
            except = self.new_block("except_next");
            if let Some(type_) = &handler.type_ {
                self.emit_op(Opcode::DupTop);
                self.visit_expr(type_)?;
                self.emit(Opcode::JumpIfNotExcMatch, except);
            }
            self.emit_op(Opcode::PopTop);
            match &handler.name {
                Some(name) => self.visit_named_handler(handler, name, end)?,
                None => {
                    self.emit_op(Opcode::PopTop);
                    self.emit_op(Opcode::PopTop);
                    let cleanup_body = self.new_block("except_body");
                    self.next_block(cleanup_body);
                    self.push_setup(SetupEntry::HandlerCleanup { name: None });
                    self.visit_body(&handler.body)?;
                    self.pop_setup();
                    self.emit_op(Opcode::PopExcept);
                    self.emit(Opcode::JumpForward, end);
                }
            }
            self.next_block(except);
        }
        self.pop_setup();
        self.emit(Opcode::Reraise, 0i64);

        self.next_block(orelse_block);
        self.visit_body(orelse)?;
        self.next_block(end);
        Ok(())
    }

    /// `except E as name:` clears `name` whether or not the body raises.
    fn visit_named_handler(
        &mut self,
        handler: &'a ExceptHandler,
        name: &str,
        end: crate::flow_graph::BlockId,
    ) -> CompileResult<()> {
        let cleanup_end = self.new_block("except_cleanup");
        let cleanup_body = self.new_block("except_body");

        self.store_name(None, name);
        self.emit_op(Opcode::PopTop);
        self.emit(Opcode::SetupFinally, cleanup_end);
        self.next_block(cleanup_body);
        self.push_setup(SetupEntry::HandlerCleanup {
            name: Some(name.to_string()),
        });
        self.visit_body(&handler.body)?;
        self.pop_setup();
        self.emit_op(Opcode::PopBlock);
        self.emit_op(Opcode::PopExcept);
        self.clear_name(name);
        self.emit(Opcode::JumpForward, end);

        self.next_block(cleanup_end);
        self.clear_name(name);
        self.emit(Opcode::Reraise, 1i64);
        Ok(())
    }

    fn clear_name(&mut self, name: &str) {
        self.load_none();
        self.store_name(None, name);
        self.delete_name(name);
    }

    fn visit_assert(&mut self, test: &'a Expr, msg: Option<&'a Expr>) -> CompileResult<()> {
        if let Some(Constant::Tuple(items)) = test.as_constant() {
            if !items.is_empty() {
                tracing::warn!(line = test.span.line, "assertion is always true, perhaps remove parentheses?");
            }
        }
        let end = self.new_block("assert_end");
        self.jump_if(test, end, true)?;
        self.emit_op(Opcode::LoadAssertionError);
        if let Some(msg) = msg {
            self.visit_expr(msg)?;
            self.emit(Opcode::CallFunction, 1usize);
        }
        self.emit(Opcode::RaiseVarargs, 1usize);
        self.next_block(end);
        Ok(())
    }

    // ========================================================================
    // With
    // ========================================================================

    fn visit_with(&mut self, items: &'a [WithItem], body: &'a [Stmt], pos: usize) -> CompileResult<()> {
        let Some(item) = items.get(pos) else {
            return self.visit_body(body);
        };
        let block = self.new_block("with_body");
        let finally = self.new_block("with_finally");
        let exit = self.new_block("with_exit");

        self.visit_expr(&item.context_expr)?;
        self.emit(Opcode::SetupWith, finally);
        self.next_block(block);
        self.push_setup(SetupEntry::With);
        match &item.optional_vars {
            Some(vars) => self.visit_store(vars)?,
            None => self.emit_op(Opcode::PopTop),
        }
        self.visit_with(items, body, pos + 1)?;
        self.emit_op(Opcode::PopBlock);
        self.pop_setup();
        self.call_exit_with_nones();
        self.emit_op(Opcode::PopTop);
        self.emit(Opcode::JumpForward, exit);

        self.next_block(finally);
        self.emit_op(Opcode::WithExceptStart);
        self.with_except_finish();
        self.next_block(exit);
        Ok(())
    }

    fn visit_async_with(&mut self, items: &'a [WithItem], body: &'a [Stmt], pos: usize) -> CompileResult<()> {
        let Some(item) = items.get(pos) else {
            return self.visit_body(body);
        };
        let block = self.new_block("async_with_body");
        let finally = self.new_block("async_with_finally");
        let exit = self.new_block("async_with_exit");

        self.visit_expr(&item.context_expr)?;
        self.emit_op(Opcode::BeforeAsyncWith);
        self.emit_await();
        self.emit(Opcode::SetupAsyncWith, finally);
        self.next_block(block);
        self.push_setup(SetupEntry::AsyncWith);
        match &item.optional_vars {
            Some(vars) => self.visit_store(vars)?,
            None => self.emit_op(Opcode::PopTop),
        }
        self.visit_async_with(items, body, pos + 1)?;
        self.emit_op(Opcode::PopBlock);
        self.pop_setup();
        self.call_exit_with_nones();
        self.emit_await();
        self.emit_op(Opcode::PopTop);
        self.emit(Opcode::JumpForward, exit);

        self.next_block(finally);
        self.emit_op(Opcode::WithExceptStart);
        self.emit_await();
        self.with_except_finish();
        self.next_block(exit);
        Ok(())
    }

    /// Re-raise unless `__exit__` returned true, then drop the exception.
    fn with_except_finish(&mut self) {
        let exit = self.new_block("with_suppress");
        self.emit(Opcode::PopJumpIfTrue, exit);
        self.emit(Opcode::Reraise, 1i64);
        self.next_block(exit);
        self.emit_op(Opcode::PopTop);
        self.emit_op(Opcode::PopTop);
        self.emit_op(Opcode::PopTop);
        self.emit_op(Opcode::PopExcept);
        self.emit_op(Opcode::PopTop);
    }

    // ========================================================================
    // Imports
    // ========================================================================

    fn visit_import(&mut self, alias: &'a Alias) {
        self.load_const(Constant::Int(0));
        self.load_none();
        self.emit(Opcode::ImportName, alias.name.as_str());
        match &alias.asname {
            Some(asname) => {
                let mut parts = alias.name.split('.').skip(1).peekable();
                while let Some(attr) = parts.next() {
                    self.emit(Opcode::ImportFrom, attr);
                    if parts.peek().is_some() {
                        self.emit_op(Opcode::RotTwo);
                        self.emit_op(Opcode::PopTop);
                    }
                }
                let dotted = alias.name.contains('.');
                self.store_name(None, asname);
                if dotted {
                    self.emit_op(Opcode::PopTop);
                }
            }
            None => self.store_name(None, alias.bound_name()),
        }
    }

    fn visit_import_from(
        &mut self,
        span: Span,
        module: Option<&str>,
        names: &'a [Alias],
        level: u32,
    ) -> CompileResult<()> {
        let star = names.len() == 1 && names[0].name == "*";
        if star && self.scope.kind.is_function_like() {
            return Err(self.error("import * only allowed at module level", span));
        }
        let imported = names.iter().map(|alias| Constant::Str(alias.name.clone())).collect();
        self.load_const(Constant::Int(level as i128));
        self.load_const(Constant::Tuple(imported));
        self.emit(Opcode::ImportName, module.unwrap_or(""));
        if star {
            self.emit_op(Opcode::ImportStar);
            return Ok(());
        }
        for alias in names {
            self.emit(Opcode::ImportFrom, alias.name.as_str());
            let bound = alias.asname.as_deref().unwrap_or(&alias.name);
            self.store_name(None, bound);
        }
        self.emit_op(Opcode::PopTop);
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Store the value on top of the stack into `target`.
    pub(super) fn visit_store(&mut self, target: &'a Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => {
                self.store_name(Some(target.id), id);
                Ok(())
            }
            ExprKind::Attribute { value, attr, .. } => {
                self.visit_expr(value)?;
                match self.bindings().and_then(|b| b.field(target.id)) {
                    Some(field) => self.emit(Opcode::StoreField, field.descr.clone()),
                    None => {
                        let attr = self.scope.mangle(attr);
                        self.emit(Opcode::StoreAttr, attr);
                    }
                }
                Ok(())
            }
            ExprKind::Subscript { value, slice, .. } => {
                if let Some(kind) = self.array_of(value).filter(|_| !slice.is_slice()) {
                    self.visit_array_index(value, slice)?;
                    self.emit(Opcode::SequenceSet, sequence::array(kind));
                    return Ok(());
                }
                self.visit_expr(value)?;
                self.visit_expr(slice)?;
                self.emit_op(Opcode::StoreSubscr);
                Ok(())
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => self.visit_unpack(target, elts),
            ExprKind::Starred { .. } => Err(self.error(
                "starred assignment target must be in a list or tuple",
                target.span,
            )),
            _ => Err(self.error("cannot assign to expression", target.span)),
        }
    }

    fn visit_unpack(&mut self, target: &'a Expr, elts: &'a [Expr]) -> CompileResult<()> {
        let mut starred = None;
        for (i, elt) in elts.iter().enumerate() {
            if elt.is_starred() {
                if starred.is_some() {
                    return Err(self.error("multiple starred expressions in assignment", target.span));
                }
                starred = Some(i);
            }
        }
        match starred {
            Some(i) => {
                let after = elts.len() - i - 1;
                if i >= 1 << 8 || after >= 1 << 24 {
                    return Err(self.error("too many expressions in star-unpacking assignment", target.span));
                }
                self.emit(Opcode::UnpackEx, (i | (after << 8)) as i64);
            }
            None => self.emit(Opcode::UnpackSequence, elts.len()),
        }
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred { value, .. } => self.visit_store(value)?,
                _ => self.visit_store(elt)?,
            }
        }
        Ok(())
    }

    fn visit_delete(&mut self, target: &'a Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => {
                self.delete_name(id);
                Ok(())
            }
            ExprKind::Attribute { value, attr, .. } => {
                self.visit_expr(value)?;
                let attr = self.scope.mangle(attr);
                self.emit(Opcode::DeleteAttr, attr);
                Ok(())
            }
            ExprKind::Subscript { value, slice, .. } => {
                self.visit_expr(value)?;
                self.visit_expr(slice)?;
                self.emit_op(Opcode::DeleteSubscr);
                Ok(())
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                for elt in elts {
                    self.visit_delete(elt)?;
                }
                Ok(())
            }
            _ => Err(self.error("cannot delete expression", target.span)),
        }
    }

    fn visit_aug_assign(&mut self, stmt: &'a Stmt, target: &'a Expr, op: Operator, value: &'a Expr) -> CompileResult<()> {
        if let ExprKind::Subscript { value: object, slice, .. } = &target.kind {
            if let Some(kind) = self.array_of(object).filter(|_| !slice.is_slice()) {
                self.visit_array_index(object, slice)?;
                self.emit_op(Opcode::DupTopTwo);
                self.emit(Opcode::SequenceGet, sequence::array(kind));
                self.visit_prim_operand(value, kind)?;
                self.emit_prim_binary(op, kind, stmt.span)?;
                self.emit_op(Opcode::RotThree);
                self.emit(Opcode::SequenceSet, sequence::array(kind));
                return Ok(());
            }
        }
        match &target.kind {
            ExprKind::Name { id, .. } => {
                if let Some(kind) = self.prim_of(stmt.id) {
                    if self.prim_local_slot(id) {
                        return self.visit_prim_aug_assign(target, id, op, value, kind);
                    }
                }
                self.load_name(target.id, id);
                self.visit_expr(value)?;
                self.emit_op(inplace_opcode(op));
                self.store_name(Some(target.id), id);
            }
            ExprKind::Attribute { value: object, attr, .. } => {
                let field = self.bindings().and_then(|b| b.field(target.id)).map(|f| f.descr.clone());
                let attr = self.scope.mangle(attr);
                self.visit_expr(object)?;
                self.emit_op(Opcode::DupTop);
                match &field {
                    Some(descr) => self.emit(Opcode::LoadField, descr.clone()),
                    None => self.emit(Opcode::LoadAttr, attr.as_str()),
                }
                self.visit_expr(value)?;
                self.emit_op(inplace_opcode(op));
                self.emit_op(Opcode::RotTwo);
                match field {
                    Some(descr) => self.emit(Opcode::StoreField, descr),
                    None => self.emit(Opcode::StoreAttr, attr),
                }
            }
            ExprKind::Subscript { value: object, slice, .. } => {
                self.visit_expr(object)?;
                self.visit_expr(slice)?;
                self.emit_op(Opcode::DupTopTwo);
                self.emit_op(Opcode::BinarySubscr);
                self.visit_expr(value)?;
                self.emit_op(inplace_opcode(op));
                self.emit_op(Opcode::RotThree);
                self.emit_op(Opcode::StoreSubscr);
            }
            _ => return Err(self.error("illegal expression for augmented assignment", target.span)),
        }
        Ok(())
    }

    /// Whether a name lives in a fast local slot of this frame.
    fn prim_local_slot(&self, name: &str) -> bool {
        self.inline_temp(name).is_none() && self.name_op(name).1 == super::NameOp::Fast
    }

    fn visit_prim_aug_assign(
        &mut self,
        target: &'a Expr,
        name: &str,
        op: Operator,
        value: &'a Expr,
        kind: PrimKind,
    ) -> CompileResult<()> {
        let (mangled, _) = self.name_op(name);
        let descr = self.prim_descr(kind);
        self.emit(Opcode::LoadLocal, Oparg::Local(mangled.clone(), descr.clone()));
        let from = self.prim_of(target.id).unwrap_or(kind);
        self.emit_prim_convert(from, kind);
        self.visit_prim_operand(value, kind)?;
        self.emit_prim_binary(op, kind, target.span)?;
        self.emit(Opcode::StoreLocal, Oparg::Local(mangled, descr));
        Ok(())
    }

    fn visit_ann_assign(
        &mut self,
        target: &'a Expr,
        annotation: &'a Expr,
        value: Option<&'a Expr>,
        simple: bool,
    ) -> CompileResult<()> {
        if let Some(value) = value {
            self.visit_expr(value)?;
            self.visit_store(target)?;
        }
        let function_like = self.scope.kind.is_function_like();
        match &target.kind {
            ExprKind::Name { id, .. } => {
                if simple && !function_like {
                    self.emit_annotation(annotation)?;
                    self.emit(Opcode::LoadName, "__annotations__");
                    self.load_const(Constant::Str(self.scope.mangle(id)));
                    self.emit_op(Opcode::StoreSubscr);
                }
            }
            ExprKind::Attribute { value: object, .. } => {
                if value.is_none() {
                    self.visit_expr(object)?;
                    self.emit_op(Opcode::PopTop);
                }
            }
            ExprKind::Subscript { value: object, slice, .. } => {
                if value.is_none() {
                    self.visit_expr(object)?;
                    self.emit_op(Opcode::PopTop);
                    self.visit_expr(slice)?;
                    self.emit_op(Opcode::PopTop);
                }
            }
            _ => return Err(self.error("invalid annotated assignment target", target.span)),
        }
        if !simple && !function_like && !self.ctx.future.annotations() {
            self.visit_expr(annotation)?;
            self.emit_op(Opcode::PopTop);
        }
        Ok(())
    }
}

fn inplace_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::InplaceAdd,
        Operator::Sub => Opcode::InplaceSubtract,
        Operator::Mult => Opcode::InplaceMultiply,
        Operator::MatMult => Opcode::InplaceMatrixMultiply,
        Operator::Div => Opcode::InplaceTrueDivide,
        Operator::Mod => Opcode::InplaceModulo,
        Operator::Pow => Opcode::InplacePower,
        Operator::LShift => Opcode::InplaceLshift,
        Operator::RShift => Opcode::InplaceRshift,
        Operator::BitOr => Opcode::InplaceOr,
        Operator::BitXor => Opcode::InplaceXor,
        Operator::BitAnd => Opcode::InplaceAnd,
        Operator::FloorDiv => Opcode::InplaceFloorDivide,
    }
}
