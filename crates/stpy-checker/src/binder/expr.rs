//! Expression binding

use stpy_parser::ast::{
    Arguments, BoolOperator, CmpOperator, Comprehension, Constant, Expr, ExprKind, Operator, UnaryOperator,
};
use stpy_parser::Span;
use stpy_types::{ClassId, ClassKind, Member, PrimKind, TypeError, Value};

use super::scope::{LocalDecl, ScopeRole};
use super::{FieldBinding, TypeBinder};
use crate::error::{CheckError, CheckResult};
use crate::narrowing::NarrowingEffect;
use crate::symbols::NameScope;

/// A slot found through member lookup.
#[derive(Debug, Clone)]
pub(super) struct SlotInfo {
    pub name: String,
    pub owner: ClassId,
    pub ty: ClassId,
    pub is_final: bool,
    pub is_classvar: bool,
}

fn verb(op: Operator) -> &'static str {
    match op {
        Operator::Add => "add",
        Operator::Sub => "subtract",
        Operator::Mult => "multiply",
        Operator::MatMult => "matrix multiply",
        Operator::Div => "divide",
        Operator::Mod => "modulo",
        Operator::Pow => "pow",
        Operator::LShift => "left shift",
        Operator::RShift => "right shift",
        Operator::BitOr => "or",
        Operator::BitXor => "xor",
        Operator::BitAnd => "and",
        Operator::FloorDiv => "floor divide",
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Rich comparison method for `op` and the one Python tries on the right
/// operand.
fn compare_dunders(op: CmpOperator) -> (&'static str, &'static str) {
    match op {
        CmpOperator::Lt => ("__lt__", "__gt__"),
        CmpOperator::LtE => ("__le__", "__ge__"),
        CmpOperator::Gt => ("__gt__", "__lt__"),
        CmpOperator::GtE => ("__ge__", "__le__"),
        CmpOperator::NotEq => ("__ne__", "__ne__"),
        _ => ("__eq__", "__eq__"),
    }
}

fn is_int_constant(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Constant(Constant::Int(_)))
}

impl TypeBinder<'_> {
    /// Bind an expression in an optional type context and return its value.
    ///
    /// A primitive context turns integer, float and bool literals into
    /// primitive constants.
    pub(super) fn visit_expr(&mut self, expr: &Expr, expected: Option<ClassId>) -> CheckResult<Value> {
        Ok(self.bind_expr(expr, expected)?.0)
    }

    /// Bind a condition and return the narrowing it implies.
    pub(super) fn visit_cond(&mut self, expr: &Expr) -> CheckResult<NarrowingEffect> {
        Ok(self.bind_expr(expr, None)?.1)
    }

    fn bind_expr(&mut self, expr: &Expr, expected: Option<ClassId>) -> CheckResult<(Value, NarrowingEffect)> {
        let context = expected.filter(|ty| self.symbols.universe.is_prim(*ty));
        let no_effect = |value: Value| Ok((value, NarrowingEffect::NoOp));
        let (value, effect) = match &expr.kind {
            ExprKind::Constant(constant) => no_effect(self.bind_constant(constant, context, expr.span)?),
            ExprKind::Name { id, .. } => self.load_name(expr, id),
            ExprKind::BinOp { left, op, right } => no_effect(self.bind_binop(left, *op, right, context, expr.span)?),
            ExprKind::UnaryOp { op, operand } => self.bind_unary(expr, *op, operand, context),
            ExprKind::BoolOp { op, values } => self.bind_boolop(*op, values, expected, expr.span),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.bind_compare(expr, left, ops, comparators),
            ExprKind::IfExp { test, body, orelse } => no_effect(self.bind_ifexp(test, body, orelse, expected, expr.span)?),
            ExprKind::NamedExpr { target, value } => {
                let assigned = self.visit_expr(value, None)?;
                if matches!(self.scope()?.role, ScopeRole::Comprehension) {
                    self.bindings.types.insert(target.id, assigned.clone());
                } else {
                    self.assign_value(target, &assigned, Some(value))?;
                }
                no_effect(assigned)
            }
            ExprKind::Attribute { value, attr, .. } => no_effect(self.load_attribute(expr, value, attr)?),
            ExprKind::Subscript { value, slice, .. } => no_effect(self.load_subscript(expr, value, slice)?),
            ExprKind::Call { func, args, keywords } => self.visit_call(expr, func, args, keywords, context),
            ExprKind::Lambda { args, body } => no_effect(self.bind_lambda(expr, args, body)?),
            ExprKind::List { elts, .. } => {
                self.bind_elements(elts)?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_list))
            }
            ExprKind::Tuple { elts, .. } => {
                self.bind_elements(elts)?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_tuple))
            }
            ExprKind::Set { elts } => {
                self.bind_elements(elts)?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_set))
            }
            ExprKind::Dict { keys, values } => {
                for key in keys.iter().flatten() {
                    let value = self.visit_expr(key, None)?;
                    self.check_boxed(&value, key.span)?;
                }
                self.bind_elements(values)?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_dict))
            }
            ExprKind::ListComp { elt, generators } => {
                self.bind_comprehension(expr, generators, &[elt])?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_list))
            }
            ExprKind::SetComp { elt, generators } => {
                self.bind_comprehension(expr, generators, &[elt])?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_set))
            }
            ExprKind::DictComp { key, value, generators } => {
                self.bind_comprehension(expr, generators, &[key, value])?;
                no_effect(Value::Instance(self.symbols.universe.builtins.exact_dict))
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.bind_comprehension(expr, generators, &[elt])?;
                no_effect(Value::Dynamic)
            }
            ExprKind::Await { value } | ExprKind::YieldFrom { value } => {
                let inner = self.visit_expr(value, None)?;
                self.check_boxed(&inner, value.span)?;
                no_effect(Value::Dynamic)
            }
            ExprKind::Yield { value } => {
                if let Some(value) = value {
                    let inner = self.visit_expr(value, None)?;
                    self.check_boxed(&inner, value.span)?;
                }
                no_effect(Value::Dynamic)
            }
            ExprKind::Starred { value, .. } => {
                let inner = self.visit_expr(value, None)?;
                self.check_boxed(&inner, value.span)?;
                no_effect(Value::Dynamic)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part, None)?;
                }
                no_effect(Value::Dynamic)
            }
        }?;
        self.bindings.types.insert(expr.id, value.clone());
        Ok((value, effect))
    }

    pub(super) fn is_prim_value(&self, value: &Value) -> bool {
        matches!(value, Value::Instance(class) if self.symbols.universe.is_prim(*class))
    }

    fn prim_of(&self, value: &Value) -> Option<PrimKind> {
        match value {
            Value::Instance(class) => self.symbols.universe.prim_kind(*class),
            _ => None,
        }
    }

    fn bind_elements(&mut self, elts: &[Expr]) -> CheckResult<()> {
        for elt in elts {
            let value = self.visit_expr(elt, None)?;
            self.check_boxed(&value, elt.span)?;
        }
        Ok(())
    }

    // ========================================================================
    // Constants and Names
    // ========================================================================

    fn bind_constant(&mut self, constant: &Constant, context: Option<ClassId>, span: Span) -> CheckResult<Value> {
        if let Some(kind) = context.and_then(|ty| self.symbols.universe.prim_kind(ty)) {
            let prim = Value::Instance(self.symbols.universe.prim(kind));
            match constant {
                Constant::Int(n) if kind.is_int() => {
                    kind.check_constant(*n)
                        .map_err(|err| CheckError::from_type_error(err, span))?;
                    return Ok(prim);
                }
                Constant::Float(_) if kind == PrimKind::Double => return Ok(prim),
                Constant::Bool(_) if kind == PrimKind::CBool => return Ok(prim),
                _ => {}
            }
        }
        Ok(self.constant_value(constant))
    }

    /// Exact type of a literal outside of primitive contexts.
    pub(super) fn constant_value(&mut self, constant: &Constant) -> Value {
        match self.symbols.constant_class(constant) {
            Some(class) => {
                let exact = self.symbols.universe.exact(class);
                Value::Instance(exact)
            }
            None => Value::Dynamic,
        }
    }

    fn load_name(&mut self, expr: &Expr, name: &str) -> CheckResult<(Value, NarrowingEffect)> {
        let value = self.peek_name(name)?;
        let classification = self.name_scope(name)?;
        let global = match classification {
            NameScope::GlobalImplicit | NameScope::GlobalExplicit => true,
            NameScope::Local => self.in_module_scope(),
            _ => false,
        };
        if global {
            let constant = self
                .symbols
                .module(&self.module)
                .filter(|table| table.is_final(name))
                .and_then(|table| table.named_final(name))
                .cloned();
            if let Some(constant) = constant {
                self.bindings.final_constants.insert(expr.id, constant);
            }
        }

        let narrowable = classification == NameScope::Local && self.scope()?.is_function_like();
        let effect = match &value {
            Value::Instance(class) if narrowable && self.symbols.universe.union_members(*class).is_some() => {
                let none = Value::Instance(self.symbols.universe.builtins.none);
                NarrowingEffect::narrow(&mut self.symbols.universe, name, value.clone(), none).not()
            }
            _ => NarrowingEffect::NoOp,
        };
        Ok((value, effect))
    }

    /// Current value of a name without recording anything.
    pub(super) fn peek_name(&self, name: &str) -> CheckResult<Value> {
        let scope = self.scope()?;
        let classification = self.name_scope(name)?;
        let module_value = || {
            self.symbols
                .resolve_name(&self.module, name)
                .cloned()
                .unwrap_or_default()
        };
        Ok(match classification {
            NameScope::Local | NameScope::Cell if scope.is_function_like() => {
                scope.locals.get(name).cloned().unwrap_or_default()
            }
            NameScope::Local | NameScope::Cell if matches!(scope.role, ScopeRole::Class { .. }) => {
                match scope.locals.get(name) {
                    Some(value) => value.clone(),
                    None => module_value(),
                }
            }
            NameScope::Free => self
                .scopes
                .iter()
                .rev()
                .skip(1)
                .filter(|outer| outer.is_function_like())
                .find_map(|outer| outer.decls.get(name))
                .map(|decl| self.symbols.universe.instance(decl.ty))
                .unwrap_or_default(),
            _ => module_value(),
        })
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn bind_binop(
        &mut self,
        left: &Expr,
        op: Operator,
        right: &Expr,
        context: Option<ClassId>,
        span: Span,
    ) -> CheckResult<Value> {
        let mut lhs = self.visit_expr(left, context)?;
        let mut rhs = self.visit_expr(right, context)?;
        // A literal next to a primitive takes the primitive's type.
        if let Value::Instance(class) = lhs {
            if self.symbols.universe.is_prim(class) && is_int_constant(right) && !self.is_prim_value(&rhs) {
                rhs = self.visit_expr(right, Some(class))?;
            }
        }
        if let Value::Instance(class) = rhs {
            if self.symbols.universe.is_prim(class) && is_int_constant(left) && !self.is_prim_value(&lhs) {
                lhs = self.visit_expr(left, Some(class))?;
            }
        }
        self.binary_result(op, &lhs, &rhs, span)
    }

    /// Result of applying a binary operator to two values.
    pub(super) fn binary_result(&mut self, op: Operator, lhs: &Value, rhs: &Value, span: Span) -> CheckResult<Value> {
        match (self.prim_of(lhs), self.prim_of(rhs)) {
            (Some(a), Some(b)) => self.primitive_binop(op, a, b, span),
            (Some(_), None) | (None, Some(_)) => {
                let universe = &self.symbols.universe;
                Err(CheckError::type_error(
                    format!(
                        "cannot {} {} and {}",
                        verb(op),
                        universe.value_name(lhs),
                        universe.value_name(rhs)
                    ),
                    span,
                ))
            }
            (None, None) => Ok(self.object_binop(op, lhs, rhs)),
        }
    }

    fn primitive_binop(&mut self, op: Operator, a: PrimKind, b: PrimKind, span: Span) -> CheckResult<Value> {
        if a == PrimKind::CBool || b == PrimKind::CBool {
            return Err(CheckError::type_error(
                format!("cbool is not a valid operand type for {}", verb(op)),
                span,
            ));
        }
        let no_common = || {
            CheckError::from_type_error(
                TypeError::NoCommonPrimitive {
                    op: verb(op).to_string(),
                    left: a.name().to_string(),
                    right: b.name().to_string(),
                },
                span,
            )
        };
        let kind = a.promote(b).ok_or_else(no_common)?;
        let supported = match op {
            Operator::Add | Operator::Sub | Operator::Mult | Operator::Div => true,
            Operator::Mod
            | Operator::FloorDiv
            | Operator::LShift
            | Operator::RShift
            | Operator::BitOr
            | Operator::BitXor
            | Operator::BitAnd => kind.is_int(),
            Operator::Pow | Operator::MatMult => false,
        };
        if !supported {
            return Err(no_common());
        }
        Ok(Value::Instance(self.symbols.universe.prim(kind)))
    }

    /// Result of a binary operator on objects: builtin numbers, strings and
    /// sequences by rule, user classes through their dunder methods.
    fn object_binop(&mut self, op: Operator, lhs: &Value, rhs: &Value) -> Value {
        let (Value::Instance(left), Value::Instance(right)) = (lhs, rhs) else {
            return Value::Dynamic;
        };
        let (left, right) = (*left, *right);
        let universe = &self.symbols.universe;
        let b = universe.builtins.clone();
        let both_exact = universe.is_exact(left) && universe.is_exact(right);
        let left_kind = universe.kind(universe.inexact(left)).clone();
        let right_kind = universe.kind(universe.inexact(right)).clone();

        let rank = |kind: &ClassKind| match kind {
            ClassKind::Bool => Some(0),
            ClassKind::Int => Some(1),
            ClassKind::Float => Some(2),
            ClassKind::Complex => Some(3),
            _ => None,
        };
        let builtin = match (rank(&left_kind), rank(&right_kind)) {
            (Some(0), Some(0)) if matches!(op, Operator::BitAnd | Operator::BitOr | Operator::BitXor) => {
                Some(b.bool_)
            }
            (Some(l), Some(r)) => {
                let mut rank = l.max(r).max(1);
                if op == Operator::Div {
                    rank = rank.max(2);
                }
                match rank {
                    1 => Some(b.int),
                    2 => Some(b.float),
                    _ => Some(b.complex),
                }
            }
            _ => match (&left_kind, op, &right_kind) {
                (ClassKind::Str, Operator::Add, ClassKind::Str) | (ClassKind::Str, Operator::Mod, _) => Some(b.str_),
                (ClassKind::Str, Operator::Mult, ClassKind::Int | ClassKind::Bool)
                | (ClassKind::Int | ClassKind::Bool, Operator::Mult, ClassKind::Str) => Some(b.str_),
                (ClassKind::Bytes, Operator::Add, ClassKind::Bytes) => Some(b.bytes),
                (ClassKind::List, Operator::Add, ClassKind::List)
                | (ClassKind::List, Operator::Mult, ClassKind::Int | ClassKind::Bool) => Some(b.list),
                (ClassKind::Tuple, Operator::Add, ClassKind::Tuple)
                | (ClassKind::Tuple, Operator::Mult, ClassKind::Int | ClassKind::Bool) => Some(b.tuple),
                (
                    ClassKind::Set,
                    Operator::BitOr | Operator::BitAnd | Operator::BitXor | Operator::Sub,
                    ClassKind::Set,
                ) => Some(b.set),
                _ => None,
            },
        };
        if let Some(class) = builtin {
            let class = if both_exact { self.symbols.universe.exact(class) } else { class };
            return Value::Instance(class);
        }

        let universe = &self.symbols.universe;
        let forward = op.dunder();
        let reverse = format!("__r{}", &forward[2..]);
        let right_is_subclass = left != right
            && universe
                .mro(universe.inexact(right))
                .map(|mro| mro.iter().skip(1).any(|c| *c == universe.inexact(left)))
                .unwrap_or(false);
        if right_is_subclass {
            if let Some(value) = self.dunder_result(right, &reverse) {
                return value;
            }
        }
        if let Some(value) = self.dunder_result(left, forward) {
            return value;
        }
        if !right_is_subclass {
            if let Some(value) = self.dunder_result(right, &reverse) {
                return value;
            }
        }
        Value::Dynamic
    }

    /// Declared result of calling a user-defined dunder method.
    fn dunder_result(&self, class: ClassId, name: &str) -> Option<Value> {
        let universe = &self.symbols.universe;
        let (_, member) = universe.lookup_member(class, name)?;
        let function = universe.function(member.func()?);
        if function.dynamic_return {
            return Some(Value::Dynamic);
        }
        let returns = function.returns.resolved().ok()?;
        Some(universe.instance(returns))
    }

    fn bind_unary(
        &mut self,
        expr: &Expr,
        op: UnaryOperator,
        operand: &Expr,
        context: Option<ClassId>,
    ) -> CheckResult<(Value, NarrowingEffect)> {
        if op == UnaryOperator::Not {
            let (value, effect) = self.bind_expr(operand, None)?;
            let universe = &self.symbols.universe;
            let result = if self.is_prim_value(&value) {
                Value::Instance(universe.prim(PrimKind::CBool))
            } else {
                Value::Instance(universe.builtins.exact_bool)
            };
            return Ok((result, effect.not()));
        }

        // `-128` in an int8 context is one literal, not a negated 128.
        if let (UnaryOperator::USub, ExprKind::Constant(Constant::Int(n)), Some(ctx)) = (op, &operand.kind, context) {
            if let Some(kind) = self.symbols.universe.prim_kind(ctx).filter(|k| k.is_int()) {
                kind.check_constant(-n)
                    .map_err(|err| CheckError::from_type_error(err, expr.span))?;
                let prim = Value::Instance(ctx);
                self.bindings.types.insert(operand.id, prim.clone());
                return Ok((prim, NarrowingEffect::NoOp));
            }
        }

        let value = self.visit_expr(operand, context)?;
        let universe = &self.symbols.universe;
        let result = match (&value, self.prim_of(&value)) {
            (_, Some(PrimKind::CBool)) | (_, Some(PrimKind::Double)) if op == UnaryOperator::Invert => {
                return Err(CheckError::type_error(
                    format!("cannot invert {}", universe.value_name(&value)),
                    expr.span,
                ))
            }
            (_, Some(_)) => value.clone(),
            (Value::Instance(class), None) => match universe.kind(universe.inexact(*class)) {
                ClassKind::Bool => {
                    let int = universe.builtins.int;
                    if universe.is_exact(*class) {
                        Value::Instance(universe.builtins.exact_int)
                    } else {
                        Value::Instance(int)
                    }
                }
                ClassKind::Int => value.clone(),
                ClassKind::Float | ClassKind::Complex if op != UnaryOperator::Invert => value.clone(),
                _ => Value::Dynamic,
            },
            _ => Value::Dynamic,
        };
        Ok((result, NarrowingEffect::NoOp))
    }

    fn bind_boolop(
        &mut self,
        op: BoolOperator,
        values: &[Expr],
        expected: Option<ClassId>,
        span: Span,
    ) -> CheckResult<(Value, NarrowingEffect)> {
        let mut effect = NarrowingEffect::NoOp;
        let mut result: Option<Value> = None;
        for value in values {
            let (ty, inner) = self.bind_expr(value, expected)?;
            match op {
                BoolOperator::And => inner.apply(self.locals_mut()?),
                BoolOperator::Or => inner.reverse(self.locals_mut()?),
            }
            effect = match op {
                BoolOperator::And => effect.and(inner),
                BoolOperator::Or => effect.or(inner),
            };
            result = Some(match result {
                None => ty,
                Some(prev) => self.widen(prev, ty, op, span)?,
            });
        }
        effect.undo(self.locals_mut()?);
        Ok((result.unwrap_or_default(), effect))
    }

    /// The type holding either of two values.
    fn widen(&mut self, existing: Value, new: Value, op: BoolOperator, span: Span) -> CheckResult<Value> {
        if existing == new {
            return Ok(new);
        }
        let universe = &self.symbols.universe;
        let (a, b) = (universe.class_of(&existing), universe.class_of(&new));
        if universe.is_prim(a) || universe.is_prim(b) {
            let name = match op {
                BoolOperator::And => "and",
                BoolOperator::Or => "or",
            };
            return Err(CheckError::type_error(
                format!(
                    "{} expression has incompatible types: {} and {}",
                    name,
                    universe.value_name(&existing),
                    universe.value_name(&new)
                ),
                span,
            ));
        }
        if universe.is_dynamic(a) || universe.is_dynamic(b) {
            return Ok(Value::Dynamic);
        }
        if universe.can_assign_from(b, a) {
            return Ok(new);
        }
        if universe.can_assign_from(a, b) {
            return Ok(existing);
        }
        let (wa, wb) = (universe.widen(a), universe.widen(b));
        let union = self
            .symbols
            .universe
            .make_union(&[wa, wb])
            .map_err(|err| CheckError::from_type_error(err, span))?;
        Ok(self.symbols.universe.instance(union))
    }

    fn bind_compare(
        &mut self,
        expr: &Expr,
        left: &Expr,
        ops: &[CmpOperator],
        comparators: &[Expr],
    ) -> CheckResult<(Value, NarrowingEffect)> {
        let mut prev = self.visit_expr(left, None)?;
        let mut prev_expr = left;
        let mut results: Vec<Value> = Vec::with_capacity(ops.len());
        for (index, (op, right)) in ops.iter().zip(comparators).enumerate() {
            let mut value = self.visit_expr(right, None)?;
            if let Value::Instance(class) = prev {
                if self.symbols.universe.is_prim(class) && is_int_constant(right) && !self.is_prim_value(&value) {
                    value = self.visit_expr(right, Some(class))?;
                }
            }
            if let Value::Instance(class) = value {
                if self.symbols.universe.is_prim(class) && is_int_constant(prev_expr) && !self.is_prim_value(&prev) {
                    prev = self.visit_expr(prev_expr, Some(class))?;
                }
            }
            let result = match (self.prim_of(&prev), self.prim_of(&value)) {
                (Some(a), Some(b)) => {
                    let kind = a.promote(b).ok_or_else(|| {
                        CheckError::from_type_error(
                            TypeError::NoCommonPrimitive {
                                op: "compare".to_string(),
                                left: a.name().to_string(),
                                right: b.name().to_string(),
                            },
                            expr.span,
                        )
                    })?;
                    let class = self.symbols.universe.prim(kind);
                    self.bindings.compare_types.insert((expr.id, index), class);
                    Value::Instance(self.symbols.universe.prim(PrimKind::CBool))
                }
                (None, None) => self.object_compare(*op, &prev, &value, expr.span)?,
                _ => {
                    let universe = &self.symbols.universe;
                    return Err(CheckError::type_error(
                        format!(
                            "cannot compare {} and {}",
                            universe.value_name(&prev),
                            universe.value_name(&value)
                        ),
                        expr.span,
                    ));
                }
            };
            results.push(result);
            prev = value;
            prev_expr = right;
        }

        let effect = match (ops, comparators) {
            ([op @ (CmpOperator::Is | CmpOperator::IsNot)], [right]) => {
                let effect = self.none_test(left, right)?;
                if *op == CmpOperator::IsNot {
                    effect.not()
                } else {
                    effect
                }
            }
            _ => NarrowingEffect::NoOp,
        };
        let result = self.chain_result(&results, expr.span)?;
        Ok((result, effect))
    }

    /// Result of one comparison between objects: `is` and `in` always give
    /// bool, exact builtins compare to bool, user classes answer through
    /// their rich comparison methods, anything else is dynamic.
    fn object_compare(&self, op: CmpOperator, lhs: &Value, rhs: &Value, span: Span) -> CheckResult<Value> {
        let universe = &self.symbols.universe;
        let exact_bool = Value::Instance(universe.builtins.exact_bool);
        if matches!(
            op,
            CmpOperator::Is | CmpOperator::IsNot | CmpOperator::In | CmpOperator::NotIn
        ) {
            return Ok(exact_bool);
        }
        let (Value::Instance(left), Value::Instance(right)) = (lhs, rhs) else {
            return Ok(Value::Dynamic);
        };
        let (left, right) = (*left, *right);

        let none = universe.builtins.none;
        let ordering = matches!(op, CmpOperator::Lt | CmpOperator::LtE | CmpOperator::Gt | CmpOperator::GtE);
        if ordering && (universe.inexact(left) == none || universe.inexact(right) == none) {
            return Err(CheckError::type_error(
                format!(
                    "'{}' not supported between '{}' and '{}'",
                    op.symbol(),
                    universe.value_name(lhs),
                    universe.value_name(rhs)
                ),
                span,
            ));
        }

        let builtin = |class: ClassId| universe.is_exact(class) && universe.class(universe.inexact(class)).node.is_none();
        if builtin(left) && builtin(right) {
            return Ok(exact_bool);
        }

        let (forward, reflected) = compare_dunders(op);
        let right_is_subclass = universe.inexact(left) != universe.inexact(right)
            && universe
                .mro(universe.inexact(right))
                .map(|mro| mro.iter().skip(1).any(|c| *c == universe.inexact(left)))
                .unwrap_or(false);
        if right_is_subclass {
            if let Some(value) = self.dunder_result(right, reflected) {
                return Ok(value);
            }
        }
        if let Some(value) = self.dunder_result(left, forward) {
            return Ok(value);
        }
        if !right_is_subclass {
            if let Some(value) = self.dunder_result(right, reflected) {
                return Ok(value);
            }
        }
        Ok(Value::Dynamic)
    }

    /// Type of a comparison chain from the types of its links.
    fn chain_result(&self, results: &[Value], span: Span) -> CheckResult<Value> {
        let Some((first, rest)) = results.split_first() else {
            return Ok(Value::Dynamic);
        };
        if rest.iter().all(|value| value == first) {
            return Ok(first.clone());
        }
        if let Some(prim) = results.iter().find(|value| self.is_prim_value(value)) {
            let other = results.iter().find(|value| !self.is_prim_value(value)).unwrap_or(prim);
            let universe = &self.symbols.universe;
            return Err(CheckError::type_error(
                format!(
                    "comparison chain mixes {} and {}",
                    universe.value_name(prim),
                    universe.value_name(other)
                ),
                span,
            ));
        }
        Ok(Value::Dynamic)
    }

    /// `x is None` (either way round) on a local whose type includes None.
    fn none_test(&mut self, left: &Expr, right: &Expr) -> CheckResult<NarrowingEffect> {
        let name = match (&left.kind, &right.kind) {
            (ExprKind::Name { id, .. }, _) if right.is_none_constant() => id,
            (_, ExprKind::Name { id, .. }) if left.is_none_constant() => id,
            _ => return Ok(NarrowingEffect::NoOp),
        };
        if !self.can_narrow(name)? {
            return Ok(NarrowingEffect::NoOp);
        }
        let current = self.peek_name(name)?;
        let none = self.symbols.universe.builtins.none;
        match &current {
            Value::Instance(class)
                if self
                    .symbols
                    .universe
                    .union_members(*class)
                    .map_or(false, |members| members.contains(&none)) =>
            {
                Ok(NarrowingEffect::narrow(
                    &mut self.symbols.universe,
                    name.as_str(),
                    current.clone(),
                    Value::Instance(none),
                ))
            }
            _ => Ok(NarrowingEffect::NoOp),
        }
    }

    /// Only function locals carry flow-sensitive types.
    pub(super) fn can_narrow(&self, name: &str) -> CheckResult<bool> {
        Ok(self.scope()?.is_function_like() && self.name_scope(name)? == NameScope::Local)
    }

    fn bind_ifexp(
        &mut self,
        test: &Expr,
        body: &Expr,
        orelse: &Expr,
        expected: Option<ClassId>,
        span: Span,
    ) -> CheckResult<Value> {
        let effect = self.visit_cond(test)?;
        effect.apply(self.locals_mut()?);
        let body_value = self.visit_expr(body, expected)?;
        effect.reverse(self.locals_mut()?);
        let else_value = self.visit_expr(orelse, expected)?;
        effect.undo(self.locals_mut()?);

        let universe = &self.symbols.universe;
        let (a, b) = (universe.class_of(&body_value), universe.class_of(&else_value));
        if body_value == else_value || (!universe.is_dynamic(b) && universe.can_assign_from(a, b)) {
            return Ok(body_value);
        }
        if !universe.is_dynamic(a) && universe.can_assign_from(b, a) {
            return Ok(else_value);
        }
        if !universe.is_prim(a) && !universe.is_prim(b) {
            return Ok(Value::Dynamic);
        }
        Err(CheckError::type_error(
            format!(
                "if expression has incompatible types: {} and {}",
                universe.value_name(&body_value),
                universe.value_name(&else_value)
            ),
            span,
        ))
    }

    // ========================================================================
    // Attributes and Subscripts
    // ========================================================================

    fn load_attribute(&mut self, expr: &Expr, value: &Expr, attr: &str) -> CheckResult<Value> {
        let receiver = self.visit_expr(value, None)?;
        match &receiver {
            Value::Module(name) => {
                let child = self.symbols.module(name).and_then(|table| table.get(attr)).cloned();
                Ok(match child {
                    Some(child) => child,
                    None => {
                        let submodule = format!("{}.{}", name, attr);
                        if self.symbols.has_module(&submodule) {
                            Value::Module(submodule)
                        } else {
                            Value::Dynamic
                        }
                    }
                })
            }
            Value::Instance(class) => self.instance_attribute(expr, *class, attr),
            Value::Class(class) => Ok(self.class_attribute(*class, attr)),
            _ => Ok(Value::Dynamic),
        }
    }

    fn instance_attribute(&mut self, expr: &Expr, class: ClassId, attr: &str) -> CheckResult<Value> {
        let universe = &self.symbols.universe;
        if universe.is_prim(class) {
            return Err(CheckError::type_error(
                format!("{} has no attribute {}", universe.display(class), attr),
                expr.span,
            ));
        }
        if universe.union_members(class).is_some() {
            let none = universe.builtins.none;
            let maybe_none = universe
                .union_members(class)
                .map_or(false, |members| members.contains(&none));
            if maybe_none && universe.lookup_member(none, attr).is_none() && !is_dunder(attr) {
                return Err(CheckError::type_error(
                    format!("'NoneType' object has no attribute '{}'", attr),
                    expr.span,
                ));
            }
            return Ok(Value::Dynamic);
        }

        match universe.lookup_member(class, attr) {
            Some((_, Member::Slot(_))) => {
                let receiver = Value::Instance(class);
                let Some(slot) = self.slot_of(&receiver, attr) else {
                    return Ok(Value::Dynamic);
                };
                self.record_field(expr, &slot);
                Ok(self.symbols.universe.instance(slot.ty))
            }
            Some((_, Member::Method(func))) => Ok(Value::BoundMethod {
                func: *func,
                receiver: class,
            }),
            Some((_, Member::StaticMethod(func))) => Ok(Value::StaticMethod(*func)),
            Some((_, Member::BuiltinMethod(method))) => Ok(Value::BuiltinMethod {
                receiver: class,
                name: method.name.clone(),
            }),
            Some((_, Member::Dynamic)) => Ok(Value::Dynamic),
            None if !is_dunder(attr) && self.is_closed_class(class) => Err(CheckError::type_error(
                format!("{} has no attribute {}", universe.display(universe.inexact(class)), attr),
                expr.span,
            )),
            None => Ok(Value::Dynamic),
        }
    }

    /// A source class whose every member is known: no dynamic base and no
    /// attribute hooks.
    fn is_closed_class(&self, class: ClassId) -> bool {
        let universe = &self.symbols.universe;
        let inexact = universe.inexact(class);
        let source = universe.class(inexact);
        if source.node.is_none() || source.kind != ClassKind::Plain {
            return false;
        }
        let Ok(mro) = universe.mro(inexact) else {
            return false;
        };
        let open_hook = ["__getattr__", "__getattribute__"]
            .iter()
            .any(|hook| {
                universe
                    .lookup_member(inexact, hook)
                    .map_or(false, |(owner, _)| owner != universe.builtins.object)
            });
        !open_hook && mro.iter().all(|c| !universe.is_dynamic(*c))
    }

    fn class_attribute(&self, class: ClassId, attr: &str) -> Value {
        let universe = &self.symbols.universe;
        match universe.lookup_member(class, attr) {
            Some((_, Member::Method(func))) => Value::Function(*func),
            Some((_, Member::StaticMethod(func))) => Value::StaticMethod(*func),
            Some((_, Member::Slot(slot))) if slot.is_classvar => match slot.ty.resolved() {
                Ok(ty) => universe.instance(ty),
                Err(_) => Value::Dynamic,
            },
            _ => Value::Dynamic,
        }
    }

    /// The slot `attr` of an instance or class receiver.
    pub(super) fn slot_of(&self, receiver: &Value, attr: &str) -> Option<SlotInfo> {
        let universe = &self.symbols.universe;
        let class = match receiver {
            Value::Instance(class) | Value::Class(class) => *class,
            _ => return None,
        };
        if universe.is_prim(class) || universe.union_members(class).is_some() {
            return None;
        }
        match universe.lookup_member(class, attr)? {
            (owner, Member::Slot(slot)) => Some(SlotInfo {
                name: attr.to_string(),
                owner,
                ty: slot.ty.resolved().unwrap_or(universe.builtins.dynamic),
                is_final: slot.is_final,
                is_classvar: slot.is_classvar,
            }),
            _ => None,
        }
    }

    /// Record a field access when the slot lives in instance storage of a
    /// source class.
    pub(super) fn record_field(&mut self, expr: &Expr, slot: &SlotInfo) {
        let universe = &self.symbols.universe;
        let owner = universe.class(slot.owner);
        if slot.is_classvar || owner.node.is_none() {
            return;
        }
        let descr = universe.descr(slot.owner).child(slot.name.clone());
        self.bindings.fields.insert(expr.id, FieldBinding { descr, ty: slot.ty });
    }

    fn load_subscript(&mut self, expr: &Expr, value: &Expr, slice: &Expr) -> CheckResult<Value> {
        let container = self.visit_expr(value, None)?;
        if let Value::Class(_) = container {
            let class = self.symbols.resolve_annotation(&self.module, expr)?;
            return Ok(if self.symbols.universe.is_dynamic(class) {
                Value::Dynamic
            } else {
                Value::Class(class)
            });
        }
        self.subscript_type(&container, slice, expr.span)
    }

    /// Type of `container[slice]`; binds the slice.
    pub(super) fn subscript_type(&mut self, container: &Value, slice: &Expr, span: Span) -> CheckResult<Value> {
        let Value::Instance(class) = container else {
            let index = self.visit_expr(slice, None)?;
            self.check_boxed(&index, slice.span)?;
            return Ok(Value::Dynamic);
        };
        let class = *class;
        if let Some(element) = self.array_element(class) {
            return self.array_subscript(class, element, slice);
        }
        let universe = &self.symbols.universe;
        let b = universe.builtins.clone();
        let def = universe.generic_def(class);
        let args = universe.generic_args(class).to_vec();
        let is_slice = matches!(slice.kind, ExprKind::Slice { .. });
        let sequence = def == Some(b.checked_list)
            || class == b.exact_list
            || class == b.exact_tuple
            || (universe.is_exact(class) && matches!(universe.kind(class), ClassKind::List | ClassKind::Tuple));

        if def == Some(b.checked_dict) && args.len() == 2 {
            let key = self.visit_expr(slice, Some(args[0]))?;
            self.check_can_assign_from(args[0], &key, span)?;
            return Ok(self.symbols.universe.instance(args[1]));
        }

        let index = self.visit_expr(slice, None)?;
        if self.is_prim_value(&index) {
            let int_index = self.prim_of(&index).map_or(false, PrimKind::is_int);
            if !(sequence && int_index) {
                let universe = &self.symbols.universe;
                return Err(CheckError::type_error(
                    format!(
                        "{} cannot be used to index {}",
                        universe.value_name(&index),
                        universe.display(class)
                    ),
                    slice.span,
                ));
            }
        }
        if is_slice {
            return Ok(if def == Some(b.checked_list) {
                Value::Instance(class)
            } else {
                Value::Dynamic
            });
        }
        if def == Some(b.checked_list) {
            if let Some(element) = args.first() {
                return Ok(self.symbols.universe.instance(*element));
            }
        }
        if class == b.exact_str {
            return Ok(Value::Instance(b.exact_str));
        }
        Ok(Value::Dynamic)
    }

    /// Element class of an `Array` or `Vector` instance.
    pub(super) fn array_element(&self, class: ClassId) -> Option<ClassId> {
        let universe = &self.symbols.universe;
        match universe.kind(class) {
            ClassKind::Array | ClassKind::Vector => universe.generic_args(class).first().copied(),
            _ => None,
        }
    }

    /// Arrays are indexed by integers, boxed or primitive, and slice to
    /// arrays of the same type.
    fn array_subscript(&mut self, class: ClassId, element: ClassId, slice: &Expr) -> CheckResult<Value> {
        let index = self.visit_expr(slice, None)?;
        if matches!(slice.kind, ExprKind::Slice { .. }) {
            return Ok(Value::Instance(class));
        }
        let universe = &self.symbols.universe;
        let int_index = match &index {
            Value::Instance(index) => match universe.prim_kind(*index) {
                Some(kind) => kind.is_int(),
                None => universe.can_assign_from(universe.builtins.int, *index),
            },
            _ => false,
        };
        if !int_index {
            return Err(CheckError::type_error(
                format!(
                    "{} cannot be used to index {}",
                    universe.value_name(&index),
                    universe.display(class)
                ),
                slice.span,
            ));
        }
        Ok(Value::Instance(element))
    }

    // ========================================================================
    // Scoped Expressions
    // ========================================================================

    fn bind_lambda(&mut self, expr: &Expr, args: &Arguments, body: &Expr) -> CheckResult<Value> {
        for default in args.defaults.iter().chain(args.kw_defaults.iter().flatten()) {
            let value = self.visit_expr(default, None)?;
            self.check_boxed(&value, default.span)?;
        }
        self.push_scope(ScopeRole::Lambda, expr.id, expr.span)?;
        let dynamic = self.symbols.universe.builtins.dynamic;
        for arg in args.all() {
            self.record_decl(
                &arg.name,
                LocalDecl {
                    ty: dynamic,
                    is_final: false,
                },
            )?;
        }
        let result = self.visit_expr(body, None)?;
        self.check_boxed(&result, body.span)?;
        self.pop_scope();
        Ok(Value::Dynamic)
    }

    fn bind_comprehension(&mut self, expr: &Expr, generators: &[Comprehension], elts: &[&Expr]) -> CheckResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return Err(CheckError::internal("comprehension without generators"));
        };
        let iterable = self.visit_expr(&first.iter, None)?;
        self.push_scope(ScopeRole::Comprehension, expr.id, expr.span)?;

        let element = self.iteration_type(&iterable, first.iter.span)?;
        self.assign_value(&first.target, &element, None)?;
        self.bind_conditions(&first.ifs)?;
        for generator in rest {
            let iterable = self.visit_expr(&generator.iter, None)?;
            let element = self.iteration_type(&iterable, generator.iter.span)?;
            self.assign_value(&generator.target, &element, None)?;
            self.bind_conditions(&generator.ifs)?;
        }
        for elt in elts {
            let value = self.visit_expr(elt, None)?;
            self.check_boxed(&value, elt.span)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn bind_conditions(&mut self, conditions: &[Expr]) -> CheckResult<()> {
        for condition in conditions {
            let effect = self.visit_cond(condition)?;
            effect.apply(self.locals_mut()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{bind_module, Bindings};
    use crate::symbol_table::SymbolTable;
    use crate::symbols::build_scopes;
    use crate::CheckResult;
    use stpy_parser::ast::{Expr, ExprKind, Module, StmtKind};
    use stpy_parser::parse_module;
    use stpy_types::{PrimKind, Value};

    fn bind(source: &str) -> CheckResult<(SymbolTable, Bindings, Module)> {
        let module = parse_module(source).unwrap();
        let tree = build_scopes(&module, false, false)?;
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", module.clone());
        symbols.declare_module("m")?;
        symbols.finish_bind()?;
        let bindings = bind_module(&mut symbols, &tree, "m", 0)?;
        Ok((symbols, bindings, module))
    }

    /// Value of the returned expression of the last `return` in function `f`.
    fn returned(source: &str) -> (SymbolTable, Value) {
        let (symbols, bindings, module) = bind(source).unwrap();
        let ty = bindings.type_of(last_return(&module).id).clone();
        (symbols, ty)
    }

    fn last_return(module: &Module) -> &Expr {
        let def = module
            .body
            .iter()
            .find_map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) if def.name == "f" => Some(def),
                _ => None,
            })
            .unwrap();
        let value = def
            .body
            .iter()
            .rev()
            .find_map(|stmt| match &stmt.kind {
                StmtKind::Return { value: Some(value) } => Some(value),
                _ => None,
            })
            .unwrap();
        value
    }

    #[test]
    fn test_literals_are_exact() {
        let (symbols, ty) = returned("def f():\n    return 'a' + 'b'\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.exact_str));
        let (symbols, ty) = returned("def f(x: int):\n    return x + 1\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.int));
        let (symbols, ty) = returned("def f():\n    return 1 / 2\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.exact_float));
    }

    #[test]
    fn test_primitive_arithmetic() {
        let source = "from __static__ import int8, int64\n\
def f(x: int8, y: int64) -> int64:\n    return x + y\n";
        let (symbols, ty) = returned(source);
        assert_eq!(ty, Value::Instance(symbols.universe.prim(PrimKind::Int64)));

        let literal = "from __static__ import int8\ndef f(x: int8) -> int8:\n    return x + 1\n";
        let (symbols, ty) = returned(literal);
        assert_eq!(ty, Value::Instance(symbols.universe.prim(PrimKind::Int8)));
    }

    #[test]
    fn test_primitive_errors() {
        let out_of_range = "from __static__ import int8\ndef f():\n    x: int8 = 300\n";
        let err = bind(out_of_range).unwrap_err();
        assert_eq!(err.message(), "constant 300 is outside of the range -128 to 127 for int8");

        let mixed = "from __static__ import int64\ndef f(x: int64, y: str):\n    return x + y\n";
        let err = bind(mixed).unwrap_err();
        assert_eq!(err.message(), "cannot add int64 and str");

        let no_common = "from __static__ import int64, uint64\ndef f(x: int64, y: uint64):\n    return x + y\n";
        let err = bind(no_common).unwrap_err();
        assert_eq!(err.message(), "Cannot add int64 and uint64");

        let cbool = "from __static__ import cbool\ndef f(x: cbool, y: cbool):\n    return x + y\n";
        let err = bind(cbool).unwrap_err();
        assert_eq!(err.message(), "cbool is not a valid operand type for add");

        let unannotated = "from __static__ import int64\ndef f(x: int64):\n    return x\n";
        let err = bind(unannotated).unwrap_err();
        assert_eq!(err.message(), "return type must be dynamic, not int64");
    }

    #[test]
    fn test_primitive_comparison_is_cbool() {
        let source = "from __static__ import cbool, int64\ndef f(x: int64) -> cbool:\n    return x < 10\n";
        let (symbols, ty) = returned(source);
        assert_eq!(ty, Value::Instance(symbols.universe.prim(PrimKind::CBool)));
    }

    #[test]
    fn test_comparisons_of_builtins() {
        let (symbols, ty) = returned("def f():\n    return 1 < 2\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.exact_bool));
        let (symbols, ty) = returned("def f(x, y):\n    return x in y\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.exact_bool));
        let (symbols, ty) = returned("def f(x, y):\n    return x is not y\n");
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.exact_bool));
        let (_, ty) = returned("def f(x: int):\n    return x < 1\n");
        assert_eq!(ty, Value::Dynamic);
        let (_, ty) = returned("def f(x: object, y: object):\n    return x == y\n");
        assert_eq!(ty, Value::Dynamic);
    }

    #[test]
    fn test_dynamic_comparison_is_cast_to_bool() {
        let (_, bindings, module) = bind("def f(a, b) -> bool:\n    return a < b\n").unwrap();
        let value = last_return(&module);
        assert_eq!(bindings.type_of(value.id), &Value::Dynamic);
        assert!(bindings.cast(value.id).is_some());
    }

    #[test]
    fn test_comparison_uses_user_dunders() {
        let source = "\
class A:
    def __lt__(self, other) -> str:
        return 'lt'
def f(a: A, b: A):
    return a < b
";
        let (symbols, ty) = returned(source);
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.str_));

        let mismatch = "\
class A:
    def __lt__(self, other) -> str:
        return 'lt'
def f(a: A, b: A) -> int:
    return a < b
";
        let err = bind(mismatch).unwrap_err();
        assert_eq!(err.message(), "return type must be int, not str");

        let reflected = "\
class A:
    def __gt__(self, other) -> str:
        return 'gt'
def f(x, a: A):
    return 1 < a
";
        let (symbols, ty) = returned(reflected);
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.str_));
    }

    #[test]
    fn test_ordering_against_none_is_an_error() {
        let err = bind("def f(a: int):\n    return None < a\n").unwrap_err();
        assert_eq!(err.message(), "'<' not supported between 'None' and 'int'");
        let err = bind("def f(a: int):\n    return a >= None\n").unwrap_err();
        assert_eq!(err.message(), "'>=' not supported between 'int' and 'None'");
        let (symbols, ty) = returned("def f(a: int):\n    return a == None\n");
        assert_ne!(ty, Value::Instance(symbols.universe.builtins.none));
    }

    #[test]
    fn test_optional_narrowing() {
        let source = "from typing import Optional\n\
def f(x: Optional[int]):\n    if x is not None:\n        return x\n    return 0\n";
        let (symbols, bindings, module) = bind(source).unwrap();
        let StmtKind::FunctionDef(def) = &module.body[1].kind else { panic!() };
        let StmtKind::If { body, .. } = &def.body[0].kind else { panic!() };
        let StmtKind::Return { value: Some(value) } = &body[0].kind else { panic!() };
        assert_eq!(bindings.type_of(value.id), &Value::Instance(symbols.universe.builtins.int));
    }

    #[test]
    fn test_truthiness_narrows_optional() {
        let source = "def f(x: int | None):\n    if not x:\n        return 0\n    return x\n";
        let (symbols, ty) = returned(source);
        assert_eq!(ty, Value::Instance(symbols.universe.builtins.int));
    }

    #[test]
    fn test_and_narrows_later_operands() {
        let source = "def f(x: int | None):\n    return x is not None and x + 1\n";
        let (_, bindings, module) = bind(source).unwrap();
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        let StmtKind::Return { value: Some(value) } = &def.body[0].kind else { panic!() };
        let ExprKind::BoolOp { values, .. } = &value.kind else { panic!() };
        assert!(matches!(bindings.type_of(values[1].id), Value::Instance(_)));
    }

    #[test]
    fn test_attribute_errors() {
        let missing = "class C:\n    x: int\n\ndef f(c: C):\n    return c.y\n";
        let err = bind(missing).unwrap_err();
        assert_eq!(err.message(), "m.C has no attribute y");

        let optional = "from typing import Optional\nclass C:\n    x: int\n\n\
def f(c: Optional[C]):\n    return c.x\n";
        let err = bind(optional).unwrap_err();
        assert_eq!(err.message(), "'NoneType' object has no attribute 'x'");
    }

    #[test]
    fn test_slot_reads_record_fields() {
        let source = "class C:\n    def __init__(self):\n        self.x: int = 1\n\n\
def f(c: C):\n    return c.x\n";
        let (symbols, bindings, module) = bind(source).unwrap();
        let StmtKind::FunctionDef(def) = &module.body[1].kind else { panic!() };
        let StmtKind::Return { value: Some(value) } = &def.body[0].kind else { panic!() };
        let field = bindings.field(value.id).unwrap();
        assert_eq!(field.descr.path, vec!["m", "C", "x"]);
        assert_eq!(field.ty, symbols.universe.builtins.int);
    }

    #[test]
    fn test_if_expression_types() {
        let (_, ty) = returned("def f(c):\n    return 1 if c else 'a'\n");
        assert_eq!(ty, Value::Dynamic);
        let source = "from __static__ import int64\ndef f(c, x: int64):\n    return x if c else 'a'\n";
        let err = bind(source).unwrap_err();
        assert_eq!(err.message(), "if expression has incompatible types: int64 and Exact[str]");
    }

    #[test]
    fn test_iteration_over_checked_list() {
        let source = "from __static__ import CheckedList\n\
def f(xs: CheckedList[int]):\n    for x in xs:\n        return x\n    return 0\n";
        let (_, bindings, module) = bind(source).unwrap();
        let StmtKind::FunctionDef(def) = &module.body[1].kind else { panic!() };
        let StmtKind::For { body, .. } = &def.body[0].kind else { panic!() };
        let StmtKind::Return { value: Some(value) } = &body[0].kind else { panic!() };
        assert!(matches!(bindings.type_of(value.id), Value::Instance(_)));

        let prim = "from __static__ import int64\ndef f(x: int64):\n    for i in x:\n        pass\n";
        assert_eq!(bind(prim).unwrap_err().message(), "cannot iterate over int64");
    }

    #[test]
    fn test_array_elements_are_primitive() {
        let source = "from __static__ import Array, int64\n\
def f(a: Array[int64], i: int) -> int64:\n    return a[i]\n";
        let (symbols, ty) = returned(source);
        assert_eq!(ty, Value::Instance(symbols.universe.prim(PrimKind::Int64)));

        let sliced = "from __static__ import Vector, int8\ndef f(a: Vector[int8]):\n    return a[1:2]\n";
        let (symbols, ty) = returned(sliced);
        let class = symbols.universe.class_of(&ty);
        assert_eq!(symbols.universe.display(class), "Vector[int8]");

        let store = "from __static__ import Array, int16\ndef f(a: Array[int16]):\n    a[0] = 5\n    a[1] += 2\n";
        assert!(bind(store).is_ok());
    }

    #[test]
    fn test_array_errors() {
        let bad_index = "from __static__ import Array, int64\ndef f(a: Array[int64]):\n    a['x'] = 1\n";
        assert_eq!(
            bind(bad_index).unwrap_err().message(),
            "Exact[str] cannot be used to index Array[int64]"
        );

        let bad_value = "from __static__ import Array, int64\ndef f(a: Array[int64]):\n    a[0] = 'x'\n";
        assert_eq!(bind(bad_value).unwrap_err().category(), "type");

        let bad_element = "from __static__ import Array\ndef f(a: Array[str]):\n    pass\n";
        assert_eq!(bind(bad_element).unwrap_err().message(), "Invalid Array element type: str");
    }

    #[test]
    fn test_primitives_rejected_in_containers() {
        let source = "from __static__ import int64\ndef f(x: int64):\n    return [x]\n";
        let err = bind(source).unwrap_err();
        assert_eq!(err.message(), "type mismatch: int64 cannot be assigned to object");
    }
}
