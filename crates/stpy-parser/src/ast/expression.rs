//! Expression AST nodes

use super::*;
use crate::token::Span;

/// Expression (produces a value)
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

/// The shape of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `a and b`, `a or b or c`
    BoolOp { op: BoolOperator, values: Vec<Expr> },

    /// `(x := value)`
    NamedExpr { target: Box<Expr>, value: Box<Expr> },

    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },

    UnaryOp { op: UnaryOperator, operand: Box<Expr> },

    Lambda { args: Box<Arguments>, body: Box<Expr> },

    /// `body if test else orelse`
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },

    /// Dict display; a `None` key is a `**mapping` unpack.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },

    Set { elts: Vec<Expr> },

    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },

    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },

    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },

    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },

    Await { value: Box<Expr> },

    Yield { value: Option<Box<Expr>> },

    YieldFrom { value: Box<Expr> },

    /// `left op0 c0 op1 c1 ...`
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOperator>,
        comparators: Vec<Expr>,
    },

    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },

    Constant(Constant),

    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: ExprContext,
    },

    Subscript {
        value: Box<Expr>,
        slice: Box<Expr>,
        ctx: ExprContext,
    },

    Starred { value: Box<Expr>, ctx: ExprContext },

    Name { id: String, ctx: ExprContext },

    List { elts: Vec<Expr>, ctx: ExprContext },

    Tuple { elts: Vec<Expr>, ctx: ExprContext },

    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind, span: Span) -> Self {
        Self { id, kind, span }
    }

    /// The identifier if this is a plain name reference.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The literal value if this is a constant.
    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ExprKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    pub fn is_none_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(Constant::None))
    }

    /// Whether this is a starred element (`*x`).
    pub fn is_starred(&self) -> bool {
        matches!(self.kind, ExprKind::Starred { .. })
    }

    /// Whether this is a slice (`a:b:c`) in subscript position.
    pub fn is_slice(&self) -> bool {
        matches!(self.kind, ExprKind::Slice { .. })
    }

    /// Dotted path for `a.b.c` style expressions made of names and attributes.
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name { id, .. } => Some(id.clone()),
            ExprKind::Attribute { value, attr, .. } => {
                value.dotted_name().map(|base| format!("{}.{}", base, attr))
            }
            _ => None,
        }
    }

    /// The load/store/del context of assignable expressions.
    pub fn ctx(&self) -> Option<ExprContext> {
        match &self.kind {
            ExprKind::Attribute { ctx, .. }
            | ExprKind::Subscript { ctx, .. }
            | ExprKind::Starred { ctx, .. }
            | ExprKind::Name { ctx, .. }
            | ExprKind::List { ctx, .. }
            | ExprKind::Tuple { ctx, .. } => Some(*ctx),
            _ => None,
        }
    }

    /// Rewrite the context of an assignment target and its nested elements.
    pub fn set_ctx(&mut self, new_ctx: ExprContext) {
        match &mut self.kind {
            ExprKind::Attribute { ctx, .. } | ExprKind::Subscript { ctx, .. } => *ctx = new_ctx,
            ExprKind::Name { ctx, .. } => *ctx = new_ctx,
            ExprKind::Starred { value, ctx } => {
                *ctx = new_ctx;
                value.set_ctx(new_ctx);
            }
            ExprKind::List { elts, ctx } | ExprKind::Tuple { elts, ctx } => {
                *ctx = new_ctx;
                for elt in elts {
                    elt.set_ctx(new_ctx);
                }
            }
            _ => {}
        }
    }
}

/// Keyword argument in a call or class definition; `arg` is `None` for
/// `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
    pub span: Span,
}

/// One `for ... in ... if ...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

/// A single parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub id: NodeId,
    pub name: String,
    pub annotation: Option<Box<Expr>>,
    pub span: Span,
}

/// Parameter list of a function or lambda.
///
/// `defaults` align with the tail of `posonlyargs ++ args`; `kw_defaults`
/// aligns one-to-one with `kwonlyargs`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub posonlyargs: Vec<Arg>,
    pub args: Vec<Arg>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<Arg>,
    pub defaults: Vec<Expr>,
}

impl Arguments {
    /// Positional parameters in order (positional-only first).
    pub fn positional(&self) -> impl Iterator<Item = &Arg> {
        self.posonlyargs.iter().chain(self.args.iter())
    }

    /// Every parameter in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &Arg> {
        self.positional()
            .chain(self.vararg.iter())
            .chain(self.kwonlyargs.iter())
            .chain(self.kwarg.iter())
    }

    /// Default for the positional parameter at `index`, if any.
    pub fn default_for(&self, index: usize) -> Option<&Expr> {
        let count = self.posonlyargs.len() + self.args.len();
        let first_default = count.checked_sub(self.defaults.len())?;
        if index >= first_default {
            self.defaults.get(index - first_default)
        } else {
            None
        }
    }
}
