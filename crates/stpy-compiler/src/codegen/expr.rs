//! Expression generation

use stpy_checker::ScopeKind;
use stpy_parser::ast::{BoolOperator, CmpOperator, Expr, ExprKind, Operator, UnaryOperator};
use stpy_types::{ClassKind, PrimKind};

use super::CodeGenerator;
use crate::error::CompileResult;
use crate::flow_graph::BlockId;
use crate::opcodes::{compare, prim_unary, sequence, Opcode};

impl<'a> CodeGenerator<'a> {
    /// Push the value of `expr`, downcast when the binder asked for it.
    pub(super) fn visit_expr(&mut self, expr: &'a Expr) -> CompileResult<()> {
        self.visit_expr_uncast(expr)?;
        if let Some(descr) = self.bindings().and_then(|b| b.cast(expr.id)) {
            self.emit(Opcode::Cast, descr.clone());
        }
        Ok(())
    }

    pub(super) fn visit_expr_uncast(&mut self, expr: &'a Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => self.visit_bool_op(expr, *op, values),
            ExprKind::NamedExpr { target, value } => {
                self.visit_expr(value)?;
                self.emit_op(Opcode::DupTop);
                self.visit_store(target)
            }
            ExprKind::BinOp { left, op, right } => self.visit_bin_op(expr, left, *op, right),
            ExprKind::UnaryOp { op, operand } => self.visit_unary_op(expr, *op, operand),
            ExprKind::Lambda { args, body } => self.visit_lambda(expr, args, body),
            ExprKind::IfExp { test, body, orelse } => {
                let end = self.new_block("ifexp_end");
                let next = self.new_block("ifexp_else");
                self.jump_if(test, next, false)?;
                self.visit_expr(body)?;
                self.emit(Opcode::JumpForward, end);
                self.next_block(next);
                self.visit_expr(orelse)?;
                self.next_block(end);
                Ok(())
            }
            ExprKind::Dict { keys, values } => self.visit_dict(keys, values),
            ExprKind::Set { elts } => self.visit_set(elts),
            ExprKind::List { elts, .. } => self.visit_list(elts),
            ExprKind::Tuple { elts, .. } => self.visit_tuple(elts),
            ExprKind::ListComp { .. }
            | ExprKind::SetComp { .. }
            | ExprKind::DictComp { .. }
            | ExprKind::GeneratorExp { .. } => self.visit_comprehension(expr),
            ExprKind::Await { value } => {
                if !self.scope.kind.is_function_like() {
                    return Err(self.error("'await' outside function", expr.span));
                }
                self.check_async(expr.span, "'await' outside async function")?;
                self.visit_expr(value)?;
                self.emit_await();
                Ok(())
            }
            ExprKind::Yield { value } => {
                self.check_yield(expr, "yield")?;
                match value {
                    Some(value) => self.visit_expr(value)?,
                    None => self.load_none(),
                }
                self.emit_op(Opcode::YieldValue);
                Ok(())
            }
            ExprKind::YieldFrom { value } => {
                self.check_yield(expr, "yield from")?;
                if self.scope.coroutine {
                    return Err(self.error("'yield from' inside async function", expr.span));
                }
                self.visit_expr(value)?;
                self.emit_op(Opcode::GetYieldFromIter);
                self.load_none();
                self.emit_op(Opcode::YieldFrom);
                Ok(())
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.visit_compare(expr, left, ops, comparators),
            ExprKind::Call { func, args, keywords } => self.visit_call(expr, func, args, keywords),
            ExprKind::Constant(value) => {
                match self.prim_of(expr.id) {
                    Some(kind) => self.emit_prim_const(value, kind),
                    None => self.load_const(value.clone()),
                }
                Ok(())
            }
            ExprKind::Attribute { value, attr, .. } => {
                self.visit_expr(value)?;
                match self.bindings().and_then(|b| b.field(expr.id)) {
                    Some(field) => self.emit(Opcode::LoadField, field.descr.clone()),
                    None => {
                        let attr = self.scope.mangle(attr);
                        self.emit(Opcode::LoadAttr, attr);
                    }
                }
                Ok(())
            }
            ExprKind::Subscript { value, slice, .. } => {
                if let Some(kind) = self.array_of(value).filter(|_| !slice.is_slice()) {
                    self.visit_array_index(value, slice)?;
                    self.emit(Opcode::SequenceGet, sequence::array(kind));
                    return Ok(());
                }
                self.visit_expr(value)?;
                self.visit_expr(slice)?;
                self.emit_op(Opcode::BinarySubscr);
                Ok(())
            }
            ExprKind::Starred { .. } => Err(self.error("can't use starred expression here", expr.span)),
            ExprKind::Name { id, .. } => {
                self.load_name(expr.id, id);
                Ok(())
            }
            ExprKind::Slice { lower, upper, step } => {
                for bound in [lower, upper] {
                    match bound {
                        Some(bound) => self.visit_expr(bound)?,
                        None => self.load_none(),
                    }
                }
                match step {
                    Some(step) => {
                        self.visit_expr(step)?;
                        self.emit(Opcode::BuildSlice, 3usize);
                    }
                    None => self.emit(Opcode::BuildSlice, 2usize),
                }
                Ok(())
            }
        }
    }

    fn check_yield(&self, expr: &Expr, keyword: &str) -> CompileResult<()> {
        match self.scope.kind {
            ScopeKind::Module | ScopeKind::Class => {
                Err(self.error(format!("'{}' outside function", keyword), expr.span))
            }
            ScopeKind::Comprehension => Err(self.error(
                format!("'{}' inside {}", keyword, comprehension_label(&self.name)),
                expr.span,
            )),
            _ => Ok(()),
        }
    }

    fn visit_bool_op(&mut self, expr: &'a Expr, op: BoolOperator, values: &'a [Expr]) -> CompileResult<()> {
        let prim = self.prim_of(expr.id).is_some();
        let jump = match (op, prim) {
            (BoolOperator::And, true) => Opcode::JumpIfZeroOrPop,
            (BoolOperator::Or, true) => Opcode::JumpIfNonzeroOrPop,
            (BoolOperator::And, false) => Opcode::JumpIfFalseOrPop,
            (BoolOperator::Or, false) => Opcode::JumpIfTrueOrPop,
        };
        let end = self.new_block("boolop_end");
        let Some((last, rest)) = values.split_last() else {
            return Err(self.error("empty boolean operation", expr.span));
        };
        for value in rest {
            self.visit_expr(value)?;
            self.emit(jump, end);
        }
        self.visit_expr(last)?;
        self.next_block(end);
        Ok(())
    }

    fn visit_bin_op(&mut self, expr: &'a Expr, left: &'a Expr, op: Operator, right: &'a Expr) -> CompileResult<()> {
        if let Some(kind) = self.prim_of(expr.id) {
            self.visit_prim_operand(left, kind)?;
            self.visit_prim_operand(right, kind)?;
            return self.emit_prim_binary(op, kind, expr.span);
        }
        self.visit_expr(left)?;
        self.visit_expr(right)?;
        self.emit_op(binary_opcode(op));
        Ok(())
    }

    fn visit_unary_op(&mut self, expr: &'a Expr, op: UnaryOperator, operand: &'a Expr) -> CompileResult<()> {
        if op == UnaryOperator::Not {
            self.visit_expr(operand)?;
            if self.prim_of(operand.id).is_some() {
                self.emit(Opcode::PrimitiveUnaryOp, prim_unary::NOT);
            } else {
                self.emit_op(Opcode::UnaryNot);
            }
            return Ok(());
        }
        if let Some(kind) = self.prim_of(expr.id) {
            if let Some(constant) = self.prim_constant(expr) {
                self.emit_prim_const(&constant, kind);
                return Ok(());
            }
            self.visit_prim_operand(operand, kind)?;
            return self.emit_prim_unary(op, kind, expr.span);
        }
        self.visit_expr(operand)?;
        let opcode = match op {
            UnaryOperator::Invert => Opcode::UnaryInvert,
            UnaryOperator::UAdd => Opcode::UnaryPositive,
            UnaryOperator::USub => Opcode::UnaryNegative,
            UnaryOperator::Not => Opcode::UnaryNot,
        };
        self.emit_op(opcode);
        Ok(())
    }

    // ========================================================================
    // Comparisons
    // ========================================================================

    fn visit_compare(
        &mut self,
        expr: &'a Expr,
        left: &'a Expr,
        ops: &[CmpOperator],
        comparators: &'a [Expr],
    ) -> CompileResult<()> {
        let Some((last, rest)) = comparators.split_last() else {
            return Err(self.error("comparison without operands", expr.span));
        };
        self.visit_compare_operand(expr, left, 0)?;
        if rest.is_empty() {
            self.visit_compare_operand(expr, last, 0)?;
            return self.emit_compare(expr, 0, ops[0]);
        }

        let cleanup = self.new_block("compare_cleanup");
        for (i, comparator) in rest.iter().enumerate() {
            self.visit_compare_operand(expr, comparator, i)?;
            self.emit_op(Opcode::DupTop);
            self.emit_op(Opcode::RotThree);
            self.emit_compare(expr, i, ops[i])?;
            let jump = if self.compare_prim(expr, i).is_some() {
                Opcode::JumpIfZeroOrPop
            } else {
                Opcode::JumpIfFalseOrPop
            };
            self.emit(jump, cleanup);
        }
        let index = rest.len();
        self.visit_compare_operand(expr, last, index)?;
        self.emit_compare(expr, index, ops[index])?;
        let end = self.new_block("compare_end");
        self.emit(Opcode::JumpForward, end);
        self.next_block(cleanup);
        self.emit_op(Opcode::RotTwo);
        self.emit_op(Opcode::PopTop);
        self.next_block(end);
        Ok(())
    }

    /// Primitive type the comparison at `index` is performed in.
    fn compare_prim(&self, expr: &Expr, index: usize) -> Option<PrimKind> {
        let universe = self.universe()?;
        let class = self.bindings()?.compare_type(expr.id, index)?;
        universe.prim_kind(class)
    }

    fn visit_compare_operand(&mut self, expr: &'a Expr, operand: &'a Expr, index: usize) -> CompileResult<()> {
        match self.compare_prim(expr, index) {
            Some(kind) => self.visit_prim_operand(operand, kind),
            None => self.visit_expr(operand),
        }
    }

    fn emit_compare(&mut self, expr: &Expr, index: usize, op: CmpOperator) -> CompileResult<()> {
        if let Some(kind) = self.compare_prim(expr, index) {
            return self.emit_prim_compare(op, kind, expr.span);
        }
        match op {
            CmpOperator::Eq => self.emit(Opcode::CompareOp, compare::EQ),
            CmpOperator::NotEq => self.emit(Opcode::CompareOp, compare::NE),
            CmpOperator::Lt => self.emit(Opcode::CompareOp, compare::LT),
            CmpOperator::LtE => self.emit(Opcode::CompareOp, compare::LE),
            CmpOperator::Gt => self.emit(Opcode::CompareOp, compare::GT),
            CmpOperator::GtE => self.emit(Opcode::CompareOp, compare::GE),
            CmpOperator::Is => self.emit(Opcode::IsOp, 0i64),
            CmpOperator::IsNot => self.emit(Opcode::IsOp, 1i64),
            CmpOperator::In => self.emit(Opcode::ContainsOp, 0i64),
            CmpOperator::NotIn => self.emit(Opcode::ContainsOp, 1i64),
        }
        Ok(())
    }

    // ========================================================================
    // Conditional Jumps
    // ========================================================================

    /// Jump to `target` when the truth of `expr` equals `cond`; fall through
    /// otherwise.
    pub(super) fn jump_if(&mut self, expr: &'a Expr, target: BlockId, cond: bool) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::UnaryOp {
                op: UnaryOperator::Not,
                operand,
            } => self.jump_if(operand, target, !cond),
            ExprKind::BoolOp { op, values } => {
                let Some((last, rest)) = values.split_last() else {
                    return Err(self.error("empty boolean operation", expr.span));
                };
                let short_circuit = *op == BoolOperator::Or;
                let skip = if short_circuit == cond {
                    None
                } else {
                    Some(self.new_block("boolop_skip"))
                };
                for value in rest {
                    self.jump_if(value, skip.unwrap_or(target), short_circuit)?;
                }
                self.jump_if(last, target, cond)?;
                if let Some(skip) = skip {
                    self.next_block(skip);
                }
                Ok(())
            }
            ExprKind::IfExp { test, body, orelse } => {
                let end = self.new_block("ifexp_end");
                let next = self.new_block("ifexp_else");
                self.jump_if(test, next, false)?;
                self.jump_if(body, target, cond)?;
                self.emit(Opcode::JumpForward, end);
                self.next_block(next);
                self.jump_if(orelse, target, cond)?;
                self.next_block(end);
                Ok(())
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } if ops.len() > 1 && (0..ops.len()).all(|i| self.compare_prim(expr, i).is_none()) => {
                self.jump_if_chained_compare(left, ops, comparators, expr, target, cond)
            }
            ExprKind::Constant(value) => {
                if value.is_truthy() == cond {
                    self.emit(Opcode::JumpAbsolute, target);
                    self.fresh_block();
                }
                Ok(())
            }
            _ => {
                self.visit_expr(expr)?;
                self.emit_jump_on(expr, target, cond);
                Ok(())
            }
        }
    }

    fn jump_if_chained_compare(
        &mut self,
        left: &'a Expr,
        ops: &[CmpOperator],
        comparators: &'a [Expr],
        expr: &'a Expr,
        target: BlockId,
        cond: bool,
    ) -> CompileResult<()> {
        let cleanup = self.new_block("compare_cleanup");
        self.visit_expr(left)?;
        let last = comparators.len() - 1;
        for (i, comparator) in comparators[..last].iter().enumerate() {
            self.visit_expr(comparator)?;
            self.emit_op(Opcode::DupTop);
            self.emit_op(Opcode::RotThree);
            self.emit_compare(expr, i, ops[i])?;
            self.emit(Opcode::PopJumpIfFalse, cleanup);
        }
        self.visit_expr(&comparators[last])?;
        self.emit_compare(expr, last, ops[last])?;
        self.emit(if cond { Opcode::PopJumpIfTrue } else { Opcode::PopJumpIfFalse }, target);
        let end = self.new_block("compare_end");
        self.emit(Opcode::JumpForward, end);
        self.next_block(cleanup);
        self.emit_op(Opcode::PopTop);
        if !cond {
            self.emit(Opcode::JumpForward, target);
        }
        self.next_block(end);
        Ok(())
    }

    /// Conditional jump on the value just pushed for `expr`.
    fn emit_jump_on(&mut self, expr: &Expr, target: BlockId, cond: bool) {
        let (zero, nonzero) = (Opcode::PopJumpIfZero, Opcode::PopJumpIfNonzero);
        if self.prim_of(expr.id).is_some() {
            self.emit(if cond { nonzero } else { zero }, target);
            return;
        }
        if let Some(code) = self.exact_len_code(expr) {
            self.emit(Opcode::FastLen, code);
            self.emit(if cond { nonzero } else { zero }, target);
            return;
        }
        self.emit(if cond { Opcode::PopJumpIfTrue } else { Opcode::PopJumpIfFalse }, target);
    }

    /// `FAST_LEN` operand for an exact builtin container.
    fn exact_len_code(&self, expr: &Expr) -> Option<i64> {
        let universe = self.universe()?;
        let class = self.class_of(expr.id)?;
        if !universe.is_exact(class) {
            return None;
        }
        let code = match universe.kind(class) {
            ClassKind::List => 0,
            ClassKind::Dict => 1,
            ClassKind::Set => 2,
            ClassKind::Tuple => 3,
            ClassKind::Str => 5,
            _ => return None,
        };
        Some(code)
    }
}

fn binary_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::BinaryAdd,
        Operator::Sub => Opcode::BinarySubtract,
        Operator::Mult => Opcode::BinaryMultiply,
        Operator::MatMult => Opcode::BinaryMatrixMultiply,
        Operator::Div => Opcode::BinaryTrueDivide,
        Operator::Mod => Opcode::BinaryModulo,
        Operator::Pow => Opcode::BinaryPower,
        Operator::LShift => Opcode::BinaryLshift,
        Operator::RShift => Opcode::BinaryRshift,
        Operator::BitOr => Opcode::BinaryOr,
        Operator::BitXor => Opcode::BinaryXor,
        Operator::BitAnd => Opcode::BinaryAnd,
        Operator::FloorDiv => Opcode::BinaryFloorDivide,
    }
}

/// `list comprehension`, `generator expression` ... for error messages.
fn comprehension_label(name: &str) -> &'static str {
    match name {
        "<listcomp>" => "list comprehension",
        "<setcomp>" => "set comprehension",
        "<dictcomp>" => "dict comprehension",
        _ => "generator expression",
    }
}
