//! Expression parsing

use super::{ParseError, Parser};
use crate::ast::*;
use crate::token::{Span, Token};

/// Parse a `test`: conditional expression, lambda, or anything tighter.
pub fn parse_expression(parser: &mut Parser) -> Result<Expr, ParseError> {
    parser.nested(parse_test)
}

fn parse_test(parser: &mut Parser) -> Result<Expr, ParseError> {
    if parser.check(&Token::Lambda) {
        return parse_lambda(parser);
    }
    let start = parser.current_span();
    let body = parse_or_test(parser)?;
    if parser.check(&Token::If) {
        parser.advance();
        let test = parse_or_test(parser)?;
        parser.expect(Token::Else)?;
        let orelse = parse_expression(parser)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        ));
    }
    Ok(body)
}

/// Parse a `test` that may be a named expression (`x := value`).
pub fn parse_named_expression(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    if matches!(parser.current(), Token::Identifier(_)) && parser.peek() == Some(&Token::ColonEqual)
    {
        let name = parser.expect_identifier()?;
        let target_span = parser.previous_span();
        parser.advance();
        let value = parse_expression(parser)?;
        let target = parser.mk_expr(
            ExprKind::Name {
                id: name,
                ctx: ExprContext::Store,
            },
            target_span,
        );
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::NamedExpr {
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ));
    }
    parse_expression(parser)
}

/// Parse `test_or_star (',' test_or_star)* [',']`, producing a tuple when a
/// comma is present. Used for expression statements, assignment values and
/// `return` values.
pub fn parse_testlist_star_expr(parser: &mut Parser) -> Result<Expr, ParseError> {
    if parser.check(&Token::Yield) {
        return parse_yield_expression(parser);
    }
    parse_sequence(parser, parse_test_or_star)
}

/// Parse an expression list used as a `for` target or `del` target.
pub fn parse_exprlist(parser: &mut Parser) -> Result<Expr, ParseError> {
    parse_sequence(parser, |p| {
        if p.check(&Token::Star) {
            parse_star_expr(p)
        } else {
            parse_bitor(p)
        }
    })
}

fn parse_sequence(
    parser: &mut Parser,
    mut element: impl FnMut(&mut Parser) -> Result<Expr, ParseError>,
) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let first = element(parser)?;
    if !parser.check(&Token::Comma) {
        return Ok(first);
    }
    let mut elts = vec![first];
    while parser.eat(&Token::Comma) {
        if !starts_expression(parser.current()) {
            break;
        }
        elts.push(element(parser)?);
    }
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        },
        span,
    ))
}

fn parse_test_or_star(parser: &mut Parser) -> Result<Expr, ParseError> {
    if parser.check(&Token::Star) {
        parse_star_expr(parser)
    } else {
        parse_expression(parser)
    }
}

fn parse_star_expr(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::Star)?;
    let value = parse_bitor(parser)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Starred {
            value: Box::new(value),
            ctx: ExprContext::Load,
        },
        span,
    ))
}

/// Whether `token` can begin an expression.
pub fn starts_expression(token: &Token) -> bool {
    matches!(
        token,
        Token::Identifier(_)
            | Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Bytes(_)
            | Token::None
            | Token::True
            | Token::False
            | Token::Ellipsis
            | Token::LeftParen
            | Token::LeftBracket
            | Token::LeftBrace
            | Token::Minus
            | Token::Plus
            | Token::Tilde
            | Token::Not
            | Token::Lambda
            | Token::Await
            | Token::Star
            | Token::Yield
    )
}

/// Parse `yield`, `yield value` or `yield from value`.
pub fn parse_yield_expression(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::Yield)?;
    if parser.eat(&Token::From) {
        let value = parse_expression(parser)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::YieldFrom {
                value: Box::new(value),
            },
            span,
        ));
    }
    let value = if starts_expression(parser.current()) {
        Some(Box::new(parse_sequence(parser, parse_test_or_star)?))
    } else {
        None
    };
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::Yield { value }, span))
}

fn parse_lambda(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::Lambda)?;
    let args = super::stmt::parse_parameters(parser, &Token::Colon, false)?;
    parser.expect(Token::Colon)?;
    let body = parse_expression(parser)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Lambda {
            args: Box::new(args),
            body: Box::new(body),
        },
        span,
    ))
}

// ============================================================================
// Boolean and Comparison Operators
// ============================================================================

fn parse_bool_chain(
    parser: &mut Parser,
    token: Token,
    op: BoolOperator,
    operand: fn(&mut Parser) -> Result<Expr, ParseError>,
) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let first = operand(parser)?;
    if !parser.check(&token) {
        return Ok(first);
    }
    let mut values = vec![first];
    while parser.eat(&token) {
        values.push(operand(parser)?);
    }
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::BoolOp { op, values }, span))
}

fn parse_or_test(parser: &mut Parser) -> Result<Expr, ParseError> {
    parse_bool_chain(parser, Token::Or, BoolOperator::Or, parse_and_test)
}

fn parse_and_test(parser: &mut Parser) -> Result<Expr, ParseError> {
    parse_bool_chain(parser, Token::And, BoolOperator::And, parse_not_test)
}

fn parse_not_test(parser: &mut Parser) -> Result<Expr, ParseError> {
    if parser.check(&Token::Not) {
        let start = parser.current_span();
        parser.advance();
        let operand = parser.nested(parse_not_test)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            },
            span,
        ));
    }
    parse_comparison(parser)
}

fn comparison_operator(parser: &mut Parser) -> Option<CmpOperator> {
    let op = match parser.current() {
        Token::Less => CmpOperator::Lt,
        Token::Greater => CmpOperator::Gt,
        Token::EqualEqual => CmpOperator::Eq,
        Token::NotEqual => CmpOperator::NotEq,
        Token::LessEqual => CmpOperator::LtE,
        Token::GreaterEqual => CmpOperator::GtE,
        Token::In => CmpOperator::In,
        Token::Not if parser.peek() == Some(&Token::In) => {
            parser.advance();
            CmpOperator::NotIn
        }
        Token::Is if parser.peek() == Some(&Token::Not) => {
            parser.advance();
            CmpOperator::IsNot
        }
        Token::Is => CmpOperator::Is,
        _ => return None,
    };
    parser.advance();
    Some(op)
}

fn parse_comparison(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let left = parse_bitor(parser)?;
    let mut ops = Vec::new();
    let mut comparators = Vec::new();
    while let Some(op) = comparison_operator(parser) {
        ops.push(op);
        comparators.push(parse_bitor(parser)?);
    }
    if ops.is_empty() {
        return Ok(left);
    }
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Compare {
            left: Box::new(left),
            ops,
            comparators,
        },
        span,
    ))
}

// ============================================================================
// Binary Operators
// ============================================================================

/// Binding power of a binary operator token (higher binds tighter).
fn binary_operator(token: &Token) -> Option<(Operator, u8)> {
    Some(match token {
        Token::Pipe => (Operator::BitOr, 1),
        Token::Caret => (Operator::BitXor, 2),
        Token::Amp => (Operator::BitAnd, 3),
        Token::LeftShift => (Operator::LShift, 4),
        Token::RightShift => (Operator::RShift, 4),
        Token::Plus => (Operator::Add, 5),
        Token::Minus => (Operator::Sub, 5),
        Token::Star => (Operator::Mult, 6),
        Token::Slash => (Operator::Div, 6),
        Token::DoubleSlash => (Operator::FloorDiv, 6),
        Token::Percent => (Operator::Mod, 6),
        Token::At => (Operator::MatMult, 6),
        _ => return None,
    })
}

/// Parse a bitwise-or level expression (`expr` in the grammar).
pub fn parse_bitor(parser: &mut Parser) -> Result<Expr, ParseError> {
    parse_binary(parser, 1)
}

fn parse_binary(parser: &mut Parser, min_prec: u8) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let mut left = parse_factor(parser)?;
    while let Some((op, prec)) = binary_operator(parser.current()) {
        if prec < min_prec {
            break;
        }
        parser.advance();
        let right = parser.nested(|p| parse_binary(p, prec + 1))?;
        let span = parser.span_from(start);
        left = parser.mk_expr(
            ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        );
    }
    Ok(left)
}

fn parse_factor(parser: &mut Parser) -> Result<Expr, ParseError> {
    let op = match parser.current() {
        Token::Minus => UnaryOperator::USub,
        Token::Plus => UnaryOperator::UAdd,
        Token::Tilde => UnaryOperator::Invert,
        _ => return parse_power(parser),
    };
    let start = parser.current_span();
    parser.advance();
    let operand = parser.nested(parse_factor)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::UnaryOp {
            op,
            operand: Box::new(operand),
        },
        span,
    ))
}

fn parse_power(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let base = if parser.check(&Token::Await) {
        parser.advance();
        let value = parse_primary(parser)?;
        let span = parser.span_from(start);
        parser.mk_expr(
            ExprKind::Await {
                value: Box::new(value),
            },
            span,
        )
    } else {
        parse_primary(parser)?
    };
    if parser.eat(&Token::DoubleStar) {
        let exponent = parser.nested(parse_factor)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::BinOp {
                left: Box::new(base),
                op: Operator::Pow,
                right: Box::new(exponent),
            },
            span,
        ));
    }
    Ok(base)
}

// ============================================================================
// Primaries and Trailers
// ============================================================================

fn parse_primary(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let mut expr = parser.nested(parse_atom)?;
    loop {
        match parser.current() {
            Token::LeftParen => {
                parser.advance();
                let (args, keywords) = parse_call_arguments(parser)?;
                parser.expect(Token::RightParen)?;
                let span = parser.span_from(start);
                expr = parser.mk_expr(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                    span,
                );
            }
            Token::LeftBracket => {
                parser.advance();
                let slice = parse_subscript_list(parser)?;
                parser.expect(Token::RightBracket)?;
                let span = parser.span_from(start);
                expr = parser.mk_expr(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        slice: Box::new(slice),
                        ctx: ExprContext::Load,
                    },
                    span,
                );
            }
            Token::Dot => {
                parser.advance();
                let attr = parser.expect_identifier()?;
                let span = parser.span_from(start);
                expr = parser.mk_expr(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                        ctx: ExprContext::Load,
                    },
                    span,
                );
            }
            _ => return Ok(expr),
        }
    }
}

/// Parse call arguments up to (not including) the closing parenthesis.
pub fn parse_call_arguments(
    parser: &mut Parser,
) -> Result<(Vec<Expr>, Vec<Keyword>), ParseError> {
    let mut args = Vec::new();
    let mut keywords: Vec<Keyword> = Vec::new();

    while !parser.check(&Token::RightParen) {
        let start = parser.current_span();
        match parser.current() {
            Token::DoubleStar => {
                parser.advance();
                let value = parse_expression(parser)?;
                let span = parser.span_from(start);
                keywords.push(Keyword {
                    arg: None,
                    value,
                    span,
                });
            }
            Token::Star => {
                let value = parse_star_expr(parser)?;
                if keywords.iter().any(|kw| kw.arg.is_none()) {
                    return Err(ParseError::invalid_syntax(
                        "iterable argument unpacking follows keyword argument unpacking",
                        value.span,
                    ));
                }
                args.push(value);
            }
            Token::Identifier(_) if parser.peek() == Some(&Token::Equal) => {
                let name = parser.expect_identifier()?;
                parser.advance();
                let value = parse_expression(parser)?;
                let span = parser.span_from(start);
                if keywords.iter().any(|kw| kw.arg.as_deref() == Some(&name)) {
                    return Err(ParseError::invalid_syntax(
                        format!("keyword argument repeated: {}", name),
                        span,
                    ));
                }
                keywords.push(Keyword {
                    arg: Some(name),
                    value,
                    span,
                });
            }
            _ => {
                let value = parse_named_expression(parser)?;
                if parser.check(&Token::For) || parser.check(&Token::Async) {
                    let generators = parse_comprehension_clauses(parser)?;
                    let span = parser.span_from(start);
                    let genexp = parser.mk_expr(
                        ExprKind::GeneratorExp {
                            elt: Box::new(value),
                            generators,
                        },
                        span,
                    );
                    args.push(genexp);
                } else {
                    if !keywords.is_empty() {
                        let reason = if keywords.iter().any(|kw| kw.arg.is_none()) {
                            "positional argument follows keyword argument unpacking"
                        } else {
                            "positional argument follows keyword argument"
                        };
                        return Err(ParseError::invalid_syntax(reason, value.span));
                    }
                    args.push(value);
                }
            }
        }
        if !parser.eat(&Token::Comma) {
            break;
        }
    }

    Ok((args, keywords))
}

fn parse_subscript_list(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let first = parse_subscript(parser)?;
    if !parser.check(&Token::Comma) {
        return Ok(first);
    }
    let mut elts = vec![first];
    while parser.eat(&Token::Comma) {
        if parser.check(&Token::RightBracket) {
            break;
        }
        elts.push(parse_subscript(parser)?);
    }
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        },
        span,
    ))
}

fn parse_subscript(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let lower = if parser.check(&Token::Colon) {
        None
    } else {
        let expr = parse_test_or_star(parser)?;
        if !parser.check(&Token::Colon) {
            return Ok(expr);
        }
        Some(Box::new(expr))
    };
    parser.expect(Token::Colon)?;
    let upper = if slice_part_follows(parser) {
        Some(Box::new(parse_expression(parser)?))
    } else {
        None
    };
    let step = if parser.eat(&Token::Colon) && slice_part_follows(parser) {
        Some(Box::new(parse_expression(parser)?))
    } else {
        None
    };
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::Slice { lower, upper, step }, span))
}

fn slice_part_follows(parser: &Parser) -> bool {
    !parser.check_any(&[Token::Colon, Token::Comma, Token::RightBracket])
}

/// Parse one or more `[async] for target in iter [if cond]*` clauses.
pub fn parse_comprehension_clauses(
    parser: &mut Parser,
) -> Result<Vec<Comprehension>, ParseError> {
    let mut generators = Vec::new();
    loop {
        let is_async = parser.eat(&Token::Async);
        if !parser.eat(&Token::For) {
            if is_async {
                return Err(parser.unexpected_token(&[Token::For]));
            }
            break;
        }
        let mut target = parse_exprlist(parser)?;
        super::stmt::validate_target(&target, "assign to")?;
        target.set_ctx(ExprContext::Store);
        parser.expect(Token::In)?;
        let iter = parse_or_test(parser)?;
        let mut ifs = Vec::new();
        while parser.eat(&Token::If) {
            ifs.push(parse_or_test(parser)?);
        }
        generators.push(Comprehension {
            target,
            iter,
            ifs,
            is_async,
        });
    }
    Ok(generators)
}

// ============================================================================
// Atoms
// ============================================================================

fn parse_atom(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let constant = match parser.current().clone() {
        Token::Identifier(id) => {
            parser.advance();
            return Ok(parser.mk_expr(
                ExprKind::Name {
                    id,
                    ctx: ExprContext::Load,
                },
                start,
            ));
        }
        Token::Int(n) => Constant::Int(n),
        Token::Float(f) => Constant::Float(f),
        Token::None => Constant::None,
        Token::True => Constant::Bool(true),
        Token::False => Constant::Bool(false),
        Token::Ellipsis => Constant::Ellipsis,
        Token::Str(_) | Token::Bytes(_) => return parse_strings(parser),
        Token::LeftParen => return parse_paren(parser),
        Token::LeftBracket => return parse_list_display(parser),
        Token::LeftBrace => return parse_brace_display(parser),
        _ => return Err(parser.unexpected_token(&[])),
    };
    parser.advance();
    Ok(parser.mk_expr(ExprKind::Constant(constant), start))
}

/// Adjacent string literals concatenate; mixing bytes and str is an error.
fn parse_strings(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    let mut text: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    loop {
        match parser.current().clone() {
            Token::Str(s) => {
                if bytes.is_some() {
                    return Err(ParseError::invalid_syntax(
                        "cannot mix bytes and nonbytes literals",
                        parser.current_span(),
                    ));
                }
                text.get_or_insert_with(String::new).push_str(&s);
            }
            Token::Bytes(b) => {
                if text.is_some() {
                    return Err(ParseError::invalid_syntax(
                        "cannot mix bytes and nonbytes literals",
                        parser.current_span(),
                    ));
                }
                bytes.get_or_insert_with(Vec::new).extend(b);
            }
            _ => break,
        }
        parser.advance();
    }
    let constant = match bytes {
        Some(b) => Constant::Bytes(b),
        None => Constant::Str(text.unwrap_or_default()),
    };
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::Constant(constant), span))
}

fn parse_paren(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::LeftParen)?;
    if parser.eat(&Token::RightParen) {
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::Tuple {
                elts: Vec::new(),
                ctx: ExprContext::Load,
            },
            span,
        ));
    }
    if parser.check(&Token::Yield) {
        let expr = parse_yield_expression(parser)?;
        parser.expect(Token::RightParen)?;
        return Ok(expr);
    }

    let first = if parser.check(&Token::Star) {
        parse_star_expr(parser)?
    } else {
        parse_named_expression(parser)?
    };

    if parser.check(&Token::For) || parser.check(&Token::Async) {
        let generators = parse_comprehension_clauses(parser)?;
        parser.expect(Token::RightParen)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::GeneratorExp {
                elt: Box::new(first),
                generators,
            },
            span,
        ));
    }

    if !parser.check(&Token::Comma) {
        parser.expect(Token::RightParen)?;
        if first.is_starred() {
            return Err(ParseError::invalid_syntax(
                "cannot use starred expression here",
                first.span,
            ));
        }
        return Ok(first);
    }

    let mut elts = vec![first];
    while parser.eat(&Token::Comma) {
        if parser.check(&Token::RightParen) {
            break;
        }
        elts.push(parse_test_or_star(parser)?);
    }
    parser.expect(Token::RightParen)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        },
        span,
    ))
}

fn parse_list_display(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::LeftBracket)?;
    if parser.eat(&Token::RightBracket) {
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::List {
                elts: Vec::new(),
                ctx: ExprContext::Load,
            },
            span,
        ));
    }
    let first = if parser.check(&Token::Star) {
        parse_star_expr(parser)?
    } else {
        parse_named_expression(parser)?
    };
    if parser.check(&Token::For) || parser.check(&Token::Async) {
        let generators = parse_comprehension_clauses(parser)?;
        parser.expect(Token::RightBracket)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::ListComp {
                elt: Box::new(first),
                generators,
            },
            span,
        ));
    }
    let elts = parse_display_tail(parser, first, &Token::RightBracket)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(
        ExprKind::List {
            elts,
            ctx: ExprContext::Load,
        },
        span,
    ))
}

fn parse_display_tail(
    parser: &mut Parser,
    first: Expr,
    close: &Token,
) -> Result<Vec<Expr>, ParseError> {
    let mut elts = vec![first];
    while parser.eat(&Token::Comma) {
        if parser.check(close) {
            break;
        }
        elts.push(parse_test_or_star(parser)?);
    }
    parser.expect(close.clone())?;
    Ok(elts)
}

fn parse_brace_display(parser: &mut Parser) -> Result<Expr, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::LeftBrace)?;
    if parser.eat(&Token::RightBrace) {
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            },
            span,
        ));
    }

    // Dict display or comprehension
    if parser.check(&Token::DoubleStar) {
        return parse_dict_tail(parser, start, None);
    }
    let first = parse_test_or_star(parser)?;
    if parser.eat(&Token::Colon) {
        let value = parse_expression(parser)?;
        if parser.check(&Token::For) || parser.check(&Token::Async) {
            let generators = parse_comprehension_clauses(parser)?;
            parser.expect(Token::RightBrace)?;
            let span = parser.span_from(start);
            return Ok(parser.mk_expr(
                ExprKind::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                },
                span,
            ));
        }
        return parse_dict_tail(parser, start, Some((first, value)));
    }

    // Set display or comprehension
    if parser.check(&Token::For) || parser.check(&Token::Async) {
        let generators = parse_comprehension_clauses(parser)?;
        parser.expect(Token::RightBrace)?;
        let span = parser.span_from(start);
        return Ok(parser.mk_expr(
            ExprKind::SetComp {
                elt: Box::new(first),
                generators,
            },
            span,
        ));
    }
    let elts = parse_display_tail(parser, first, &Token::RightBrace)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::Set { elts }, span))
}

fn parse_dict_tail(
    parser: &mut Parser,
    start: Span,
    first: Option<(Expr, Expr)>,
) -> Result<Expr, ParseError> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut need_entry = first.is_none();
    if let Some((key, value)) = first {
        keys.push(Some(key));
        values.push(value);
    }
    loop {
        if !need_entry {
            if !parser.eat(&Token::Comma) || parser.check(&Token::RightBrace) {
                break;
            }
        }
        need_entry = false;
        if parser.eat(&Token::DoubleStar) {
            keys.push(None);
            values.push(parse_bitor(parser)?);
        } else {
            let key = parse_expression(parser)?;
            parser.expect(Token::Colon)?;
            keys.push(Some(key));
            values.push(parse_expression(parser)?);
        }
    }
    parser.expect(Token::RightBrace)?;
    let span = parser.span_from(start);
    Ok(parser.mk_expr(ExprKind::Dict { keys, values }, span))
}
