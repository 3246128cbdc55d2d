//! AST optimizer
//!
//! Constant folding and small rewrites applied before type binding. The
//! optimizer returns a new tree; every rewritten node keeps the id and span
//! of the node it replaces so later side tables still line up.
//!
//! Folding never produces unbounded results: integers stay within 128 bits,
//! repeated sequences within [`MAX_COLLECTION_SIZE`] items and
//! [`MAX_STR_SIZE`] characters, and division by zero or negative shifts are
//! left for the runtime to raise.

use stpy_parser::ast::{
    docstring_of, Arguments, CmpOperator, Comprehension, Constant, ExceptHandler, Expr, ExprContext, ExprKind,
    Module, Operator, Stmt, StmtKind, UnaryOperator,
};

/// Longest tuple a repeat may fold to
pub const MAX_COLLECTION_SIZE: usize = 256;
/// Longest string or bytes a repeat may fold to
pub const MAX_STR_SIZE: usize = 4096;
/// Widest integer shift folded
const MAX_SHIFT: i128 = 126;

/// Optimize a module at the given level (0, 1 or 2).
#[tracing::instrument(level = "debug", skip(module))]
pub fn optimize_module(module: &Module, optimize: u8) -> Module {
    let mut folded = module.clone();
    let optimizer = Optimizer { optimize };
    optimizer.strip_docstring(&mut folded.body);
    optimizer.visit_body(&mut folded.body);
    folded
}

struct Optimizer {
    optimize: u8,
}

impl Optimizer {
    // ========================================================================
    // Statements
    // ========================================================================

    fn strip_docstring(&self, body: &mut [Stmt]) {
        if self.optimize < 2 || docstring_of(body).is_none() {
            return;
        }
        if let Some(first) = body.first_mut() {
            first.kind = StmtKind::Pass;
        }
    }

    fn visit_body(&self, body: &mut [Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::FunctionDef(def) => {
                for decorator in &mut def.decorator_list {
                    self.visit_expr(decorator);
                }
                self.visit_arguments(&mut def.args);
                if let Some(returns) = &mut def.returns {
                    self.visit_expr(returns);
                }
                self.strip_docstring(&mut def.body);
                self.visit_body(&mut def.body);
            }
            StmtKind::ClassDef(def) => {
                for expr in def.decorator_list.iter_mut().chain(def.bases.iter_mut()) {
                    self.visit_expr(expr);
                }
                for keyword in &mut def.keywords {
                    self.visit_expr(&mut keyword.value);
                }
                self.strip_docstring(&mut def.body);
                self.visit_body(&mut def.body);
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Delete { targets } => {
                for target in targets {
                    self.visit_expr(target);
                }
            }
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.visit_expr(target);
                }
                self.visit_expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                self.visit_expr(target);
                self.visit_expr(annotation);
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                self.visit_expr(target);
                self.visit_expr(iter);
                list_to_tuple(iter);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            StmtKind::With { items, body, .. } => {
                for item in items {
                    self.visit_expr(&mut item.context_expr);
                    if let Some(vars) = &mut item.optional_vars {
                        self.visit_expr(vars);
                    }
                }
                self.visit_body(body);
            }
            StmtKind::Raise { exc, cause } => {
                for expr in exc.iter_mut().chain(cause.iter_mut()) {
                    self.visit_expr(expr);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.visit_body(body);
                for ExceptHandler { type_, body, .. } in handlers {
                    if let Some(type_) = type_ {
                        self.visit_expr(type_);
                    }
                    self.visit_body(body);
                }
                self.visit_body(orelse);
                self.visit_body(finalbody);
            }
            StmtKind::Assert { test, msg } => {
                if self.optimize >= 1 {
                    stmt.kind = StmtKind::Pass;
                    return;
                }
                self.visit_expr(test);
                if let Some(msg) = msg {
                    self.visit_expr(msg);
                }
            }
            StmtKind::Expr { value } => self.visit_expr(value),
            StmtKind::Import { .. }
            | StmtKind::ImportFrom { .. }
            | StmtKind::Global { .. }
            | StmtKind::Nonlocal { .. }
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => {}
        }
    }

    fn visit_arguments(&self, args: &mut Arguments) {
        for default in &mut args.defaults {
            self.visit_expr(default);
        }
        for default in args.kw_defaults.iter_mut().flatten() {
            self.visit_expr(default);
        }
        let Arguments {
            posonlyargs,
            args: positional,
            vararg,
            kwonlyargs,
            kwarg,
            ..
        } = args;
        let params = posonlyargs
            .iter_mut()
            .chain(positional.iter_mut())
            .chain(vararg.iter_mut())
            .chain(kwonlyargs.iter_mut())
            .chain(kwarg.iter_mut());
        for param in params {
            if let Some(annotation) = &mut param.annotation {
                self.visit_expr(annotation);
            }
        }
    }

    fn visit_comprehensions(&self, generators: &mut [Comprehension]) {
        for generator in generators {
            self.visit_expr(&mut generator.target);
            self.visit_expr(&mut generator.iter);
            list_to_tuple(&mut generator.iter);
            for cond in &mut generator.ifs {
                self.visit_expr(cond);
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn visit_expr(&self, expr: &mut Expr) {
        self.visit_children(expr);
        if let Some(kind) = self.fold(expr) {
            expr.kind = kind;
        }
    }

    fn visit_children(&self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    self.visit_expr(value);
                }
            }
            ExprKind::NamedExpr { target, value } => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            ExprKind::BinOp { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            ExprKind::UnaryOp { operand, .. } => self.visit_expr(operand),
            ExprKind::Lambda { args, body } => {
                self.visit_arguments(args);
                self.visit_expr(body);
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_expr(body);
                self.visit_expr(orelse);
            }
            ExprKind::Dict { keys, values } => {
                for key in keys.iter_mut().flatten() {
                    self.visit_expr(key);
                }
                for value in values {
                    self.visit_expr(value);
                }
            }
            ExprKind::Set { elts } | ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => {
                for elt in elts {
                    self.visit_expr(elt);
                }
            }
            ExprKind::ListComp { elt, generators }
            | ExprKind::SetComp { elt, generators }
            | ExprKind::GeneratorExp { elt, generators } => {
                self.visit_comprehensions(generators);
                self.visit_expr(elt);
            }
            ExprKind::DictComp { key, value, generators } => {
                self.visit_comprehensions(generators);
                self.visit_expr(key);
                self.visit_expr(value);
            }
            ExprKind::Await { value } | ExprKind::YieldFrom { value } => self.visit_expr(value),
            ExprKind::Yield { value } => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                self.visit_expr(left);
                for (op, comparator) in ops.iter().zip(comparators.iter_mut()) {
                    self.visit_expr(comparator);
                    if matches!(op, CmpOperator::In | CmpOperator::NotIn) {
                        list_to_tuple(comparator);
                    }
                }
            }
            ExprKind::Call { func, args, keywords } => {
                self.visit_expr(func);
                for arg in args {
                    self.visit_expr(arg);
                }
                for keyword in keywords {
                    self.visit_expr(&mut keyword.value);
                }
            }
            ExprKind::Attribute { value, .. } | ExprKind::Starred { value, .. } => self.visit_expr(value),
            ExprKind::Subscript { value, slice, .. } => {
                self.visit_expr(value);
                self.visit_expr(slice);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part);
                }
            }
            ExprKind::Constant(_) | ExprKind::Name { .. } => {}
        }
    }

    /// Replacement for an expression whose children are already folded.
    fn fold(&self, expr: &Expr) -> Option<ExprKind> {
        match &expr.kind {
            ExprKind::Name { id, ctx } if id == "__debug__" && *ctx == ExprContext::Load => {
                Some(ExprKind::Constant(Constant::Bool(self.optimize == 0)))
            }
            ExprKind::UnaryOp { op, operand } => fold_unary(*op, operand),
            ExprKind::BinOp { left, op, right } => {
                let (Some(lhs), Some(rhs)) = (left.as_constant(), right.as_constant()) else {
                    return None;
                };
                fold_binop(*op, lhs, rhs).map(ExprKind::Constant)
            }
            ExprKind::Tuple {
                elts,
                ctx: ExprContext::Load,
            } => constant_tuple(elts).map(ExprKind::Constant),
            ExprKind::Subscript {
                value,
                slice,
                ctx: ExprContext::Load,
            } => {
                let (Some(container), Some(Constant::Int(index))) = (value.as_constant(), slice.as_constant())
                else {
                    return None;
                };
                fold_index(container, *index).map(ExprKind::Constant)
            }
            _ => None,
        }
    }
}

/// `[a, b]` used only for iteration or membership becomes `(a, b)`.
fn list_to_tuple(expr: &mut Expr) {
    let ExprKind::List { elts, ctx } = &mut expr.kind else {
        return;
    };
    if *ctx != ExprContext::Load {
        return;
    }
    if elts.iter().any(Expr::is_starred) {
        return;
    }
    let elts = std::mem::take(elts);
    expr.kind = match constant_tuple(&elts) {
        Some(constant) => ExprKind::Constant(constant),
        None => ExprKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        },
    };
}

fn constant_tuple(elts: &[Expr]) -> Option<Constant> {
    elts.iter()
        .map(|elt| elt.as_constant().cloned())
        .collect::<Option<Vec<_>>>()
        .map(Constant::Tuple)
}

fn fold_unary(op: UnaryOperator, operand: &Expr) -> Option<ExprKind> {
    if op == UnaryOperator::Not {
        // `not (a is b)` -> `a is not b`; likewise for `in`.
        if let ExprKind::Compare {
            left,
            ops,
            comparators,
        } = &operand.kind
        {
            if let [single] = ops.as_slice() {
                let negated = single.negated()?;
                return Some(ExprKind::Compare {
                    left: left.clone(),
                    ops: vec![negated],
                    comparators: comparators.clone(),
                });
            }
        }
    }
    let value = operand.as_constant()?;
    let folded = match (op, value) {
        (UnaryOperator::Not, value) => Constant::Bool(!value.is_truthy()),
        (UnaryOperator::USub, Constant::Int(n)) => Constant::Int(n.checked_neg()?),
        (UnaryOperator::USub, Constant::Bool(b)) => Constant::Int(-i128::from(*b)),
        (UnaryOperator::USub, Constant::Float(x)) => Constant::Float(-x),
        (UnaryOperator::UAdd, Constant::Int(n)) => Constant::Int(*n),
        (UnaryOperator::UAdd, Constant::Bool(b)) => Constant::Int(i128::from(*b)),
        (UnaryOperator::UAdd, Constant::Float(x)) => Constant::Float(*x),
        (UnaryOperator::Invert, Constant::Int(n)) => Constant::Int(!n),
        (UnaryOperator::Invert, Constant::Bool(b)) => Constant::Int(!i128::from(*b)),
        _ => return None,
    };
    Some(ExprKind::Constant(folded))
}

#[derive(Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

fn number(value: &Constant) -> Option<Number> {
    match value {
        Constant::Int(n) => Some(Number::Int(*n)),
        Constant::Bool(b) => Some(Number::Int(i128::from(*b))),
        Constant::Float(x) => Some(Number::Float(*x)),
        _ => None,
    }
}

/// Fold a binary operator on two constants, or `None` when the result
/// is unsafe or left to the runtime.
pub fn fold_binop(op: Operator, lhs: &Constant, rhs: &Constant) -> Option<Constant> {
    if let (Some(a), Some(b)) = (number(lhs), number(rhs)) {
        return match (a, b) {
            (Number::Int(a), Number::Int(b)) => fold_int(op, a, b),
            (Number::Int(a), Number::Float(b)) => fold_float(op, a as f64, b),
            (Number::Float(a), Number::Int(b)) => fold_float(op, a, b as f64),
            (Number::Float(a), Number::Float(b)) => fold_float(op, a, b),
        };
    }
    match (op, lhs, rhs) {
        (Operator::Add, Constant::Str(a), Constant::Str(b)) if a.len() + b.len() <= MAX_STR_SIZE => {
            Some(Constant::Str(format!("{}{}", a, b)))
        }
        (Operator::Add, Constant::Bytes(a), Constant::Bytes(b)) if a.len() + b.len() <= MAX_STR_SIZE => {
            Some(Constant::Bytes([a.as_slice(), b.as_slice()].concat()))
        }
        (Operator::Add, Constant::Tuple(a), Constant::Tuple(b)) if a.len() + b.len() <= MAX_COLLECTION_SIZE => {
            Some(Constant::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (Operator::Mult, seq, Constant::Int(n)) | (Operator::Mult, Constant::Int(n), seq) => repeat(seq, *n),
        _ => None,
    }
}

fn repeat(seq: &Constant, count: i128) -> Option<Constant> {
    let count = usize::try_from(count.max(0)).ok()?;
    match seq {
        Constant::Str(s) if s.chars().count().checked_mul(count)? <= MAX_STR_SIZE => {
            Some(Constant::Str(s.repeat(count)))
        }
        Constant::Bytes(b) if b.len().checked_mul(count)? <= MAX_STR_SIZE => Some(Constant::Bytes(b.repeat(count))),
        Constant::Tuple(items) if items.len().checked_mul(count)? <= MAX_COLLECTION_SIZE => {
            let mut repeated = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                repeated.extend(items.iter().cloned());
            }
            Some(Constant::Tuple(repeated))
        }
        _ => None,
    }
}

fn fold_int(op: Operator, a: i128, b: i128) -> Option<Constant> {
    let value = match op {
        Operator::Add => a.checked_add(b)?,
        Operator::Sub => a.checked_sub(b)?,
        Operator::Mult => a.checked_mul(b)?,
        Operator::FloorDiv => floor_div(a, b)?,
        Operator::Mod => floor_mod(a, b)?,
        Operator::Div => {
            if b == 0 {
                return None;
            }
            return Some(Constant::Float(a as f64 / b as f64));
        }
        Operator::Pow => {
            if b < 0 {
                return None;
            }
            a.checked_pow(u32::try_from(b).ok()?)?
        }
        Operator::LShift => {
            if !(0..=MAX_SHIFT).contains(&b) {
                return None;
            }
            let shifted = a.checked_shl(b as u32)?;
            if shifted >> b != a {
                return None;
            }
            shifted
        }
        Operator::RShift => {
            if b < 0 {
                return None;
            }
            a >> b.min(127)
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::MatMult => return None,
    };
    Some(Constant::Int(value))
}

fn floor_div(a: i128, b: i128) -> Option<i128> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i128, b: i128) -> Option<i128> {
    if b == 0 {
        return None;
    }
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn fold_float(op: Operator, a: f64, b: f64) -> Option<Constant> {
    let value = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div if b != 0.0 => a / b,
        _ => return None,
    };
    value.is_finite().then_some(Constant::Float(value))
}

fn fold_index(container: &Constant, index: i128) -> Option<Constant> {
    let resolve = |len: usize| -> Option<usize> {
        let len = i128::try_from(len).ok()?;
        let position = if index < 0 { index + len } else { index };
        (0..len).contains(&position).then_some(position as usize)
    };
    match container {
        Constant::Tuple(items) => items.get(resolve(items.len())?).cloned(),
        Constant::Str(s) => {
            let count = s.chars().count();
            s.chars().nth(resolve(count)?).map(|c| Constant::Str(c.to_string()))
        }
        Constant::Bytes(b) => b.get(resolve(b.len())?).map(|byte| Constant::Int(i128::from(*byte))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_parser::parse_module;

    fn optimized(source: &str, level: u8) -> Module {
        optimize_module(&parse_module(source).unwrap(), level)
    }

    fn assigned(module: &Module, index: usize) -> &ExprKind {
        match &module.body[index].kind {
            StmtKind::Assign { value, .. } => &value.kind,
            other => panic!("expected an assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_fold_arithmetic() {
        let module = optimized("a = 1 + 2 * 3\nb = -7 // 2\nc = -7 % 3\nd = 2 ** 10\ne = 1 / 2\n", 0);
        assert_eq!(assigned(&module, 0), &ExprKind::Constant(Constant::Int(7)));
        assert_eq!(assigned(&module, 1), &ExprKind::Constant(Constant::Int(-4)));
        assert_eq!(assigned(&module, 2), &ExprKind::Constant(Constant::Int(2)));
        assert_eq!(assigned(&module, 3), &ExprKind::Constant(Constant::Int(1024)));
        assert_eq!(assigned(&module, 4), &ExprKind::Constant(Constant::Float(0.5)));
    }

    #[test]
    fn test_unsafe_folds_are_skipped() {
        let module = optimized("a = 1 // 0\nb = 1 << -1\nc = 'x' * 5000\nd = '%s' % 1\n", 0);
        for index in 0..4 {
            assert!(matches!(assigned(&module, index), ExprKind::BinOp { .. }));
        }
    }

    #[test]
    fn test_folded_nodes_keep_ids() {
        let original = parse_module("x = 1 + 2\n").unwrap();
        let module = optimize_module(&original, 0);
        let (StmtKind::Assign { value: before, .. }, StmtKind::Assign { value: after, .. }) =
            (&original.body[0].kind, &module.body[0].kind)
        else {
            panic!("expected assignments")
        };
        assert_eq!(before.id, after.id);
        assert_eq!(before.span, after.span);
    }

    #[test]
    fn test_not_is_becomes_is_not() {
        let module = optimized("x = not (a is b)\ny = not (a in b)\n", 0);
        let ExprKind::Compare { ops, .. } = assigned(&module, 0) else {
            panic!("expected a comparison")
        };
        assert_eq!(ops, &vec![CmpOperator::IsNot]);
        let ExprKind::Compare { ops, .. } = assigned(&module, 1) else {
            panic!("expected a comparison")
        };
        assert_eq!(ops, &vec![CmpOperator::NotIn]);
    }

    #[test]
    fn test_tuples_and_subscripts() {
        let module = optimized("a = (1, 2, 3)\nb = (1, 2, 3)[-1]\nc = 'abc'[1]\n", 0);
        assert_eq!(
            assigned(&module, 0),
            &ExprKind::Constant(Constant::Tuple(vec![
                Constant::Int(1),
                Constant::Int(2),
                Constant::Int(3)
            ]))
        );
        assert_eq!(assigned(&module, 1), &ExprKind::Constant(Constant::Int(3)));
        assert_eq!(assigned(&module, 2), &ExprKind::Constant(Constant::Str("b".to_string())));
    }

    #[test]
    fn test_iterated_lists_become_tuples() {
        let module = optimized("for x in [1, 2]:\n    pass\nif y in [a, b]:\n    pass\n", 0);
        let StmtKind::For { iter, .. } = &module.body[0].kind else {
            panic!("expected a for loop")
        };
        assert!(matches!(iter.kind, ExprKind::Constant(Constant::Tuple(_))));
        let StmtKind::If { test, .. } = &module.body[1].kind else {
            panic!("expected an if")
        };
        let ExprKind::Compare { comparators, .. } = &test.kind else {
            panic!("expected a comparison")
        };
        assert!(matches!(comparators[0].kind, ExprKind::Tuple { .. }));
    }

    #[test]
    fn test_debug_and_asserts() {
        let module = optimized("x = __debug__\nassert x\n", 0);
        assert_eq!(assigned(&module, 0), &ExprKind::Constant(Constant::Bool(true)));
        assert!(matches!(module.body[1].kind, StmtKind::Assert { .. }));

        let module = optimized("x = __debug__\nassert x\n", 1);
        assert_eq!(assigned(&module, 0), &ExprKind::Constant(Constant::Bool(false)));
        assert!(matches!(module.body[1].kind, StmtKind::Pass));
    }

    #[test]
    fn test_docstrings_stripped_at_level_two() {
        let source = "'module doc'\ndef f():\n    'function doc'\n    return 1\n";
        assert_eq!(optimized(source, 1).docstring(), Some("module doc"));
        let module = optimized(source, 2);
        assert_eq!(module.docstring(), None);
        let StmtKind::FunctionDef(def) = &module.body[1].kind else {
            panic!("expected a function")
        };
        assert!(matches!(def.body[0].kind, StmtKind::Pass));
    }
}
