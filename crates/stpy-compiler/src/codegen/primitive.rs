//! Unboxed primitive arithmetic
//!
//! Primitive values live unboxed on the stack and in local slots. Every
//! operation is performed in a single primitive type; operands of another
//! primitive type are converted first and boxed `int` / `float` operands are
//! unboxed.

use stpy_parser::ast::{CmpOperator, Constant, Expr, ExprKind, Operator, UnaryOperator};
use stpy_parser::Span;
use stpy_types::{ClassKind, PrimKind};

use super::CodeGenerator;
use crate::error::CompileResult;
use crate::opcodes::{prim_binary, prim_compare, prim_unary, Opcode, Oparg};

impl<'a> CodeGenerator<'a> {
    /// `PRIMITIVE_LOAD_CONST` of a literal in the representation of `kind`.
    pub(super) fn emit_prim_const(&mut self, value: &Constant, kind: PrimKind) {
        let value = match (value, kind) {
            (Constant::Int(i), PrimKind::Double) => Constant::Float(*i as f64),
            (Constant::Bool(b), PrimKind::Double) => Constant::Float(if *b { 1.0 } else { 0.0 }),
            (Constant::Bool(b), _) => Constant::Int(i128::from(*b)),
            (other, _) => other.clone(),
        };
        self.emit(Opcode::PrimitiveLoadConst, Oparg::Prim(value, kind.type_code()));
    }

    /// Numeric literal, possibly negated, that can be loaded as a primitive
    /// directly.
    pub(super) fn prim_constant(&self, expr: &Expr) -> Option<Constant> {
        match &expr.kind {
            ExprKind::Constant(value @ (Constant::Int(_) | Constant::Float(_) | Constant::Bool(_))) => {
                Some(value.clone())
            }
            ExprKind::UnaryOp {
                op: UnaryOperator::USub,
                operand,
            } => match operand.as_constant()? {
                Constant::Int(i) => Some(Constant::Int(-*i)),
                Constant::Float(f) => Some(Constant::Float(-*f)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Push `expr` as a primitive of type `kind`.
    pub(super) fn visit_prim_operand(&mut self, expr: &'a Expr, kind: PrimKind) -> CompileResult<()> {
        if let Some(constant) = self.prim_constant(expr) {
            self.emit_prim_const(&constant, kind);
            return Ok(());
        }
        self.visit_expr(expr)?;
        match self.prim_of(expr.id) {
            Some(from) => self.emit_prim_convert(from, kind),
            None => self.emit_unbox(kind),
        }
        Ok(())
    }

    /// `CONVERT_PRIMITIVE` unless both types share a representation.
    pub(super) fn emit_prim_convert(&mut self, from: PrimKind, to: PrimKind) {
        let (from, to) = (from.type_code(), to.type_code());
        if from != to {
            self.emit(Opcode::ConvertPrimitive, i64::from((from << 4) | to));
        }
    }

    /// Element kind when `container` is a typed array.
    pub(super) fn array_of(&self, container: &Expr) -> Option<PrimKind> {
        let universe = self.universe()?;
        let class = self.class_of(container.id)?;
        match universe.kind(class) {
            ClassKind::Array | ClassKind::Vector => {
                universe.generic_args(class).first().and_then(|arg| universe.prim_kind(*arg))
            }
            _ => None,
        }
    }

    /// Push an array and its index, unboxed to int64.
    pub(super) fn visit_array_index(&mut self, container: &'a Expr, slice: &'a Expr) -> CompileResult<()> {
        self.visit_expr(container)?;
        self.visit_prim_operand(slice, PrimKind::Int64)
    }

    pub(super) fn emit_box(&mut self, kind: PrimKind) {
        self.emit(Opcode::PrimitiveBox, kind.type_code());
    }

    pub(super) fn emit_unbox(&mut self, kind: PrimKind) {
        self.emit(Opcode::PrimitiveUnbox, kind.type_code());
    }

    pub(super) fn emit_prim_binary(&mut self, op: Operator, kind: PrimKind, span: Span) -> CompileResult<()> {
        let code = if kind == PrimKind::Double {
            match op {
                Operator::Add => prim_binary::ADD_DBL,
                Operator::Sub => prim_binary::SUBTRACT_DBL,
                Operator::Mult => prim_binary::MULTIPLY_DBL,
                Operator::Div => prim_binary::DIVIDE_DBL,
                Operator::Mod => prim_binary::MODULO_DBL,
                Operator::Pow => prim_binary::POWER_DBL,
                _ => return Err(self.unsupported(op.symbol(), kind, span)),
            }
        } else {
            let signed = kind.is_signed();
            match op {
                Operator::Add => prim_binary::ADD,
                Operator::Sub => prim_binary::SUBTRACT,
                Operator::Mult => prim_binary::MULTIPLY,
                Operator::Div | Operator::FloorDiv if signed => prim_binary::DIVIDE,
                Operator::Div | Operator::FloorDiv => prim_binary::DIVIDE_UN,
                Operator::Mod if signed => prim_binary::MODULO,
                Operator::Mod => prim_binary::MODULO_UN,
                Operator::Pow if signed => prim_binary::POWER,
                Operator::Pow => prim_binary::POWER_UN,
                Operator::LShift => prim_binary::LSHIFT,
                Operator::RShift if signed => prim_binary::RSHIFT,
                Operator::RShift => prim_binary::RSHIFT_UN,
                Operator::BitXor => prim_binary::XOR,
                Operator::BitOr => prim_binary::OR,
                Operator::BitAnd => prim_binary::AND,
                Operator::MatMult => return Err(self.unsupported(op.symbol(), kind, span)),
            }
        };
        self.emit(Opcode::PrimitiveBinaryOp, code);
        Ok(())
    }

    pub(super) fn emit_prim_unary(&mut self, op: UnaryOperator, kind: PrimKind, span: Span) -> CompileResult<()> {
        let code = match (op, kind) {
            (UnaryOperator::UAdd, _) => return Ok(()),
            (UnaryOperator::USub, PrimKind::Double) => prim_unary::NEG_DBL,
            (UnaryOperator::USub, _) => prim_unary::NEG,
            (UnaryOperator::Invert, PrimKind::Double) => return Err(self.unsupported("~", kind, span)),
            (UnaryOperator::Invert, _) => prim_unary::INV,
            (UnaryOperator::Not, _) => prim_unary::NOT,
        };
        self.emit(Opcode::PrimitiveUnaryOp, code);
        Ok(())
    }

    pub(super) fn emit_prim_compare(&mut self, op: CmpOperator, kind: PrimKind, span: Span) -> CompileResult<()> {
        let (signed, unsigned, double) = match op {
            CmpOperator::Eq => (prim_compare::EQ, prim_compare::EQ, prim_compare::EQ_DBL),
            CmpOperator::NotEq => (prim_compare::NE, prim_compare::NE, prim_compare::NE_DBL),
            CmpOperator::Lt => (prim_compare::LT, prim_compare::LT_UN, prim_compare::LT_DBL),
            CmpOperator::LtE => (prim_compare::LE, prim_compare::LE_UN, prim_compare::LE_DBL),
            CmpOperator::Gt => (prim_compare::GT, prim_compare::GT_UN, prim_compare::GT_DBL),
            CmpOperator::GtE => (prim_compare::GE, prim_compare::GE_UN, prim_compare::GE_DBL),
            CmpOperator::Is | CmpOperator::IsNot | CmpOperator::In | CmpOperator::NotIn => {
                return Err(self.unsupported(op.symbol(), kind, span));
            }
        };
        let code = if kind == PrimKind::Double {
            double
        } else if kind.is_signed() {
            signed
        } else {
            unsigned
        };
        self.emit(Opcode::PrimitiveCompareOp, code);
        Ok(())
    }

    fn unsupported(&self, op: &str, kind: PrimKind, span: Span) -> crate::error::CompileError {
        self.error(format!("operator {} is not supported for {}", op, kind.name()), span)
    }
}
