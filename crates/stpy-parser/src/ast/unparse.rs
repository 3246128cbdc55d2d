//! Render expressions back to source text.
//!
//! Used for string annotations under `from __future__ import annotations`
//! and for naming expressions in diagnostics.

use super::*;

// Binding strength, loosest first.
const PREC_TUPLE: u8 = 0;
const PREC_TEST: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_NOT: u8 = 4;
const PREC_CMP: u8 = 5;
const PREC_BOR: u8 = 6;
const PREC_BXOR: u8 = 7;
const PREC_BAND: u8 = 8;
const PREC_SHIFT: u8 = 9;
const PREC_ARITH: u8 = 10;
const PREC_TERM: u8 = 11;
const PREC_FACTOR: u8 = 12;
const PREC_POWER: u8 = 13;
const PREC_AWAIT: u8 = 14;
const PREC_ATOM: u8 = 15;

fn binop_precedence(op: Operator) -> u8 {
    match op {
        Operator::BitOr => PREC_BOR,
        Operator::BitXor => PREC_BXOR,
        Operator::BitAnd => PREC_BAND,
        Operator::LShift | Operator::RShift => PREC_SHIFT,
        Operator::Add | Operator::Sub => PREC_ARITH,
        Operator::Mult
        | Operator::MatMult
        | Operator::Div
        | Operator::Mod
        | Operator::FloorDiv => PREC_TERM,
        Operator::Pow => PREC_POWER,
    }
}

/// Render an expression as source text.
pub fn unparse_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr, PREC_TEST);
    out
}

fn write_expr(out: &mut String, expr: &Expr, level: u8) {
    match &expr.kind {
        ExprKind::BoolOp { op, values } => {
            let (prec, word) = match op {
                BoolOperator::And => (PREC_AND, " and "),
                BoolOperator::Or => (PREC_OR, " or "),
            };
            paren(out, level > prec, |out| {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(word);
                    }
                    write_expr(out, value, prec + 1);
                }
            });
        }
        ExprKind::NamedExpr { target, value } => {
            paren(out, true, |out| {
                write_expr(out, target, PREC_ATOM);
                out.push_str(" := ");
                write_expr(out, value, PREC_TEST);
            });
        }
        ExprKind::BinOp { left, op, right } => {
            let prec = binop_precedence(*op);
            // `**` is right associative and its right operand is a unary factor.
            let (lprec, rprec) = if *op == Operator::Pow {
                (prec + 1, PREC_FACTOR)
            } else {
                (prec, prec + 1)
            };
            paren(out, level > prec, |out| {
                write_expr(out, left, lprec);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                write_expr(out, right, rprec);
            });
        }
        ExprKind::UnaryOp { op, operand } => {
            let prec = if *op == UnaryOperator::Not {
                PREC_NOT
            } else {
                PREC_FACTOR
            };
            paren(out, level > prec, |out| {
                out.push_str(op.symbol());
                write_expr(out, operand, prec);
            });
        }
        ExprKind::Lambda { args, body } => {
            paren(out, level > PREC_TEST, |out| {
                out.push_str("lambda");
                let params = unparse_arguments(args);
                if !params.is_empty() {
                    out.push(' ');
                    out.push_str(&params);
                }
                out.push_str(": ");
                write_expr(out, body, PREC_TEST);
            });
        }
        ExprKind::IfExp { test, body, orelse } => {
            paren(out, level > PREC_TEST, |out| {
                write_expr(out, body, PREC_TEST + 1);
                out.push_str(" if ");
                write_expr(out, test, PREC_TEST + 1);
                out.push_str(" else ");
                write_expr(out, orelse, PREC_TEST);
            });
        }
        ExprKind::Dict { keys, values } => {
            out.push('{');
            for (i, (key, value)) in keys.iter().zip(values).enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match key {
                    Some(key) => {
                        write_expr(out, key, PREC_TEST);
                        out.push_str(": ");
                        write_expr(out, value, PREC_TEST);
                    }
                    None => {
                        out.push_str("**");
                        write_expr(out, value, PREC_BOR);
                    }
                }
            }
            out.push('}');
        }
        ExprKind::Set { elts } => {
            out.push('{');
            write_list(out, elts);
            out.push('}');
        }
        ExprKind::ListComp { elt, generators } => {
            out.push('[');
            write_expr(out, elt, PREC_TEST);
            write_generators(out, generators);
            out.push(']');
        }
        ExprKind::SetComp { elt, generators } => {
            out.push('{');
            write_expr(out, elt, PREC_TEST);
            write_generators(out, generators);
            out.push('}');
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            out.push('{');
            write_expr(out, key, PREC_TEST);
            out.push_str(": ");
            write_expr(out, value, PREC_TEST);
            write_generators(out, generators);
            out.push('}');
        }
        ExprKind::GeneratorExp { elt, generators } => {
            out.push('(');
            write_expr(out, elt, PREC_TEST);
            write_generators(out, generators);
            out.push(')');
        }
        ExprKind::Await { value } => {
            paren(out, level > PREC_AWAIT, |out| {
                out.push_str("await ");
                write_expr(out, value, PREC_ATOM);
            });
        }
        ExprKind::Yield { value } => {
            paren(out, true, |out| {
                out.push_str("yield");
                if let Some(value) = value {
                    out.push(' ');
                    write_expr(out, value, PREC_TUPLE);
                }
            });
        }
        ExprKind::YieldFrom { value } => {
            paren(out, true, |out| {
                out.push_str("yield from ");
                write_expr(out, value, PREC_TEST);
            });
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            paren(out, level > PREC_CMP, |out| {
                write_expr(out, left, PREC_CMP + 1);
                for (op, comparator) in ops.iter().zip(comparators) {
                    out.push(' ');
                    out.push_str(op.symbol());
                    out.push(' ');
                    write_expr(out, comparator, PREC_CMP + 1);
                }
            });
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            write_expr(out, func, PREC_ATOM);
            out.push('(');
            let mut first = true;
            for arg in args {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                write_expr(out, arg, PREC_TEST);
            }
            for kw in keywords {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                match &kw.arg {
                    Some(name) => {
                        out.push_str(name);
                        out.push('=');
                    }
                    None => out.push_str("**"),
                }
                write_expr(out, &kw.value, PREC_TEST);
            }
            out.push(')');
        }
        ExprKind::Constant(Constant::Ellipsis) => out.push_str("..."),
        ExprKind::Constant(value) => {
            let text = value.to_string();
            let negative = matches!(value, Constant::Int(n) if *n < 0)
                || matches!(value, Constant::Float(f) if *f < 0.0);
            paren(out, negative && level > PREC_FACTOR, |out| out.push_str(&text));
        }
        ExprKind::Attribute { value, attr, .. } => {
            // `1 .real` needs a space so the dot is not read as a decimal point.
            let int_receiver = matches!(value.kind, ExprKind::Constant(Constant::Int(_)));
            write_expr(out, value, PREC_ATOM);
            if int_receiver {
                out.push(' ');
            }
            out.push('.');
            out.push_str(attr);
        }
        ExprKind::Subscript { value, slice, .. } => {
            write_expr(out, value, PREC_ATOM);
            out.push('[');
            match &slice.kind {
                ExprKind::Tuple { elts, .. } if !elts.is_empty() => {
                    write_list(out, elts);
                    if elts.len() == 1 {
                        out.push(',');
                    }
                }
                _ => write_expr(out, slice, PREC_TUPLE),
            }
            out.push(']');
        }
        ExprKind::Starred { value, .. } => {
            out.push('*');
            write_expr(out, value, PREC_BOR);
        }
        ExprKind::Name { id, .. } => out.push_str(id),
        ExprKind::List { elts, .. } => {
            out.push('[');
            write_list(out, elts);
            out.push(']');
        }
        ExprKind::Tuple { elts, .. } => {
            let needs_parens = elts.is_empty() || level > PREC_TUPLE;
            paren(out, needs_parens, |out| {
                write_list(out, elts);
                if elts.len() == 1 {
                    out.push(',');
                }
            });
        }
        ExprKind::Slice { lower, upper, step } => {
            if let Some(lower) = lower {
                write_expr(out, lower, PREC_TEST);
            }
            out.push(':');
            if let Some(upper) = upper {
                write_expr(out, upper, PREC_TEST);
            }
            if let Some(step) = step {
                out.push(':');
                write_expr(out, step, PREC_TEST);
            }
        }
    }
}

fn paren(out: &mut String, needed: bool, body: impl FnOnce(&mut String)) {
    if needed {
        out.push('(');
    }
    body(out);
    if needed {
        out.push(')');
    }
}

fn write_list(out: &mut String, elts: &[Expr]) {
    for (i, elt) in elts.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, elt, PREC_TEST);
    }
}

fn write_generators(out: &mut String, generators: &[Comprehension]) {
    for comp in generators {
        out.push_str(if comp.is_async { " async for " } else { " for " });
        write_expr(out, &comp.target, PREC_TUPLE);
        out.push_str(" in ");
        write_expr(out, &comp.iter, PREC_TEST + 1);
        for cond in &comp.ifs {
            out.push_str(" if ");
            write_expr(out, cond, PREC_TEST + 1);
        }
    }
}

/// Render a parameter list without the surrounding parentheses.
pub fn unparse_arguments(args: &Arguments) -> String {
    let mut parts: Vec<String> = Vec::new();
    let positional: Vec<&Arg> = args.positional().collect();
    for (index, arg) in positional.iter().enumerate() {
        let mut part = render_arg(arg);
        if let Some(default) = args.default_for(index) {
            part.push('=');
            part.push_str(&unparse_expr(default));
        }
        parts.push(part);
        if !args.posonlyargs.is_empty() && index + 1 == args.posonlyargs.len() {
            parts.push("/".to_string());
        }
    }
    if let Some(vararg) = &args.vararg {
        parts.push(format!("*{}", render_arg(vararg)));
    } else if !args.kwonlyargs.is_empty() {
        parts.push("*".to_string());
    }
    for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
        let mut part = render_arg(arg);
        if let Some(default) = default {
            part.push('=');
            part.push_str(&unparse_expr(default));
        }
        parts.push(part);
    }
    if let Some(kwarg) = &args.kwarg {
        parts.push(format!("**{}", render_arg(kwarg)));
    }
    parts.join(", ")
}

fn render_arg(arg: &Arg) -> String {
    match &arg.annotation {
        Some(annotation) => format!("{}: {}", arg.name, unparse_expr(annotation)),
        None => arg.name.clone(),
    }
}
