//! Statement parsing

use super::expr::{
    parse_call_arguments, parse_exprlist, parse_expression, parse_named_expression,
    parse_testlist_star_expr, parse_yield_expression, starts_expression,
};
use super::{ParseError, Parser};
use crate::ast::unparse::unparse_expr;
use crate::ast::*;
use crate::token::{Span, Token};

/// Parse one logical line or compound statement.
///
/// A simple line may hold several `;`-separated statements, so this returns
/// a list.
pub fn parse_statement(parser: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    parser.nested(parse_statement_inner)
}

fn parse_statement_inner(parser: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    let start = parser.current_span();
    let stmt = match parser.current() {
        Token::If => parse_if_statement(parser)?,
        Token::While => parse_while_statement(parser)?,
        Token::For => parse_for_statement(parser, start, false)?,
        Token::Try => parse_try_statement(parser)?,
        Token::With => parse_with_statement(parser, start, false)?,
        Token::Def => parse_function_def(parser, Vec::new(), start, false)?,
        Token::Class => parse_class_def(parser, Vec::new(), start)?,
        Token::At => parse_decorated(parser)?,
        Token::Async => parse_async_statement(parser)?,
        Token::Indent => return Err(ParseError::invalid_syntax("unexpected indent", start)),
        _ => return parse_simple_line(parser),
    };
    Ok(vec![stmt])
}

/// Parse an indented block (or a simple statement list on the same line)
/// after a `:`.
pub fn parse_block(parser: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    parser.expect(Token::Colon)?;
    if !parser.check(&Token::Newline) {
        return parse_simple_line(parser);
    }
    parser.advance();
    if !parser.check(&Token::Indent) {
        return Err(ParseError::invalid_syntax(
            "expected an indented block",
            parser.current_span(),
        ));
    }
    parser.advance();
    let mut body = Vec::new();
    while !parser.check(&Token::Dedent) && !parser.at_eof() {
        if parser.eat(&Token::Newline) {
            continue;
        }
        body.extend(parse_statement(parser)?);
    }
    parser.eat(&Token::Dedent);
    Ok(body)
}

fn parse_simple_line(parser: &mut Parser) -> Result<Vec<Stmt>, ParseError> {
    let mut stmts = vec![parse_small_statement(parser)?];
    while parser.eat(&Token::Semicolon) {
        if parser.check(&Token::Newline) || parser.at_eof() {
            break;
        }
        stmts.push(parse_small_statement(parser)?);
    }
    if !parser.at_eof() {
        parser.expect(Token::Newline)?;
    }
    Ok(stmts)
}

// ============================================================================
// Simple Statements
// ============================================================================

fn parse_small_statement(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    let kind = match parser.current() {
        Token::Pass => {
            parser.advance();
            StmtKind::Pass
        }
        Token::Break => {
            parser.advance();
            StmtKind::Break
        }
        Token::Continue => {
            parser.advance();
            StmtKind::Continue
        }
        Token::Return => {
            parser.advance();
            let value = if starts_expression(parser.current()) {
                Some(parse_testlist_star_expr(parser)?)
            } else {
                None
            };
            StmtKind::Return { value }
        }
        Token::Raise => {
            parser.advance();
            let mut exc = None;
            let mut cause = None;
            if starts_expression(parser.current()) {
                exc = Some(parse_expression(parser)?);
                if parser.eat(&Token::From) {
                    cause = Some(parse_expression(parser)?);
                }
            }
            StmtKind::Raise { exc, cause }
        }
        Token::Global | Token::Nonlocal => {
            let is_global = parser.check(&Token::Global);
            parser.advance();
            let mut names = vec![parser.expect_identifier()?];
            while parser.eat(&Token::Comma) {
                names.push(parser.expect_identifier()?);
            }
            if is_global {
                StmtKind::Global { names }
            } else {
                StmtKind::Nonlocal { names }
            }
        }
        Token::Del => {
            parser.advance();
            let parenthesized = parser.check(&Token::LeftParen);
            let target = parse_exprlist(parser)?;
            let targets = match target.kind {
                ExprKind::Tuple { elts, .. } if !parenthesized => elts,
                kind => vec![Expr::new(target.id, kind, target.span)],
            };
            let mut checked = Vec::with_capacity(targets.len());
            for mut target in targets {
                validate_target(&target, "delete")?;
                target.set_ctx(ExprContext::Del);
                checked.push(target);
            }
            StmtKind::Delete { targets: checked }
        }
        Token::Assert => {
            parser.advance();
            let test = parse_expression(parser)?;
            let msg = if parser.eat(&Token::Comma) {
                Some(parse_expression(parser)?)
            } else {
                None
            };
            StmtKind::Assert { test, msg }
        }
        Token::Import => parse_import(parser)?,
        Token::From => parse_import_from(parser)?,
        _ => parse_expression_statement(parser)?,
    };
    Ok(parser.mk_stmt(kind, start))
}

fn parse_expression_statement(parser: &mut Parser) -> Result<StmtKind, ParseError> {
    let parenthesized = parser.check(&Token::LeftParen);
    let first = parse_testlist_star_expr(parser)?;

    // Annotated assignment
    if parser.eat(&Token::Colon) {
        let mut target = first;
        match &target.kind {
            ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {}
            ExprKind::Tuple { .. } => {
                return Err(ParseError::invalid_syntax(
                    "only single target (not tuple) can be annotated",
                    target.span,
                ))
            }
            ExprKind::List { .. } => {
                return Err(ParseError::invalid_syntax(
                    "only single target (not list) can be annotated",
                    target.span,
                ))
            }
            _ => {
                return Err(ParseError::invalid_syntax(
                    "illegal target for annotation",
                    target.span,
                ))
            }
        }
        target.set_ctx(ExprContext::Store);
        let annotation = parse_expression(parser)?;
        let value = if parser.eat(&Token::Equal) {
            Some(parse_testlist_star_expr(parser)?)
        } else {
            None
        };
        let simple = !parenthesized && target.as_name().is_some();
        return Ok(StmtKind::AnnAssign {
            target,
            annotation,
            value,
            simple,
        });
    }

    // Augmented assignment
    if let Some(op) = augmented_operator(parser.current()) {
        parser.advance();
        let mut target = first;
        match &target.kind {
            ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {}
            _ => {
                return Err(ParseError::invalid_syntax(
                    format!(
                        "'{}' is an illegal expression for augmented assignment",
                        describe_expr(&target)
                    ),
                    target.span,
                ))
            }
        }
        target.set_ctx(ExprContext::Store);
        let value = if parser.check(&Token::Yield) {
            parse_yield_expression(parser)?
        } else {
            parse_testlist_star_expr(parser)?
        };
        return Ok(StmtKind::AugAssign { target, op, value });
    }

    // Plain assignment chain
    if parser.check(&Token::Equal) {
        let mut exprs = vec![first];
        while parser.eat(&Token::Equal) {
            exprs.push(parse_testlist_star_expr(parser)?);
        }
        let value = exprs.pop().ok_or_else(|| {
            ParseError::invalid_syntax("assignment without value", parser.current_span())
        })?;
        let mut targets = Vec::with_capacity(exprs.len());
        for mut target in exprs {
            validate_target(&target, "assign to")?;
            target.set_ctx(ExprContext::Store);
            targets.push(target);
        }
        return Ok(StmtKind::Assign { targets, value });
    }

    Ok(StmtKind::Expr { value: first })
}

fn augmented_operator(token: &Token) -> Option<Operator> {
    Some(match token {
        Token::PlusEqual => Operator::Add,
        Token::MinusEqual => Operator::Sub,
        Token::StarEqual => Operator::Mult,
        Token::AtEqual => Operator::MatMult,
        Token::SlashEqual => Operator::Div,
        Token::PercentEqual => Operator::Mod,
        Token::DoubleStarEqual => Operator::Pow,
        Token::LeftShiftEqual => Operator::LShift,
        Token::RightShiftEqual => Operator::RShift,
        Token::PipeEqual => Operator::BitOr,
        Token::CaretEqual => Operator::BitXor,
        Token::AmpEqual => Operator::BitAnd,
        Token::DoubleSlashEqual => Operator::FloorDiv,
        _ => return None,
    })
}

fn describe_expr(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Call { .. } => "function call".to_string(),
        ExprKind::Constant(_) => "literal".to_string(),
        ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } | ExprKind::BoolOp { .. } => {
            "expression".to_string()
        }
        ExprKind::Compare { .. } => "comparison".to_string(),
        ExprKind::Lambda { .. } => "lambda".to_string(),
        ExprKind::IfExp { .. } => "conditional expression".to_string(),
        ExprKind::NamedExpr { .. } => "named expression".to_string(),
        ExprKind::Await { .. } => "await expression".to_string(),
        ExprKind::Yield { .. } | ExprKind::YieldFrom { .. } => "yield expression".to_string(),
        ExprKind::ListComp { .. } => "list comprehension".to_string(),
        ExprKind::SetComp { .. } => "set comprehension".to_string(),
        ExprKind::DictComp { .. } => "dict comprehension".to_string(),
        ExprKind::GeneratorExp { .. } => "generator expression".to_string(),
        ExprKind::Dict { .. } => "dict display".to_string(),
        ExprKind::Set { .. } => "set display".to_string(),
        _ => unparse_expr(expr),
    }
}

/// Check that `target` can be bound (assignment, `for`, `with ... as`,
/// comprehension) or deleted.
pub fn validate_target(target: &Expr, verb: &str) -> Result<(), ParseError> {
    match &target.kind {
        ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Starred { value, .. } if verb != "delete" => validate_target(value, verb),
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
            let starred = elts.iter().filter(|e| e.is_starred()).count();
            if starred > 1 {
                return Err(ParseError::invalid_syntax(
                    "multiple starred expressions in assignment",
                    target.span,
                ));
            }
            for elt in elts {
                validate_target(elt, verb)?;
            }
            Ok(())
        }
        _ => Err(ParseError::invalid_target(
            describe_expr(target),
            verb,
            target.span,
        )),
    }
}

fn parse_dotted_name(parser: &mut Parser) -> Result<String, ParseError> {
    let mut name = parser.expect_identifier()?;
    while parser.eat(&Token::Dot) {
        name.push('.');
        name.push_str(&parser.expect_identifier()?);
    }
    Ok(name)
}

fn parse_import(parser: &mut Parser) -> Result<StmtKind, ParseError> {
    parser.expect(Token::Import)?;
    let mut names = Vec::new();
    loop {
        let start = parser.current_span();
        let name = parse_dotted_name(parser)?;
        let asname = if parser.eat(&Token::As) {
            Some(parser.expect_identifier()?)
        } else {
            None
        };
        let span = parser.span_from(start);
        names.push(Alias { name, asname, span });
        if !parser.eat(&Token::Comma) {
            break;
        }
    }
    Ok(StmtKind::Import { names })
}

fn parse_import_from(parser: &mut Parser) -> Result<StmtKind, ParseError> {
    parser.expect(Token::From)?;
    let mut level = 0u32;
    loop {
        if parser.eat(&Token::Dot) {
            level += 1;
        } else if parser.eat(&Token::Ellipsis) {
            level += 3;
        } else {
            break;
        }
    }
    let module = if matches!(parser.current(), Token::Identifier(_)) {
        Some(parse_dotted_name(parser)?)
    } else {
        None
    };
    if module.is_none() && level == 0 {
        return Err(parser.unexpected_token(&[Token::Identifier(String::new())]));
    }
    parser.expect(Token::Import)?;

    let star_span = parser.current_span();
    if parser.eat(&Token::Star) {
        return Ok(StmtKind::ImportFrom {
            module,
            names: vec![Alias {
                name: "*".to_string(),
                asname: None,
                span: star_span,
            }],
            level,
        });
    }

    let parenthesized = parser.eat(&Token::LeftParen);
    let mut names = Vec::new();
    loop {
        let start = parser.current_span();
        let name = parser.expect_identifier()?;
        let asname = if parser.eat(&Token::As) {
            Some(parser.expect_identifier()?)
        } else {
            None
        };
        let span = parser.span_from(start);
        names.push(Alias { name, asname, span });
        if !parser.eat(&Token::Comma) {
            break;
        }
        if parenthesized && parser.check(&Token::RightParen) {
            break;
        }
    }
    if parenthesized {
        parser.expect(Token::RightParen)?;
    }
    Ok(StmtKind::ImportFrom {
        module,
        names,
        level,
    })
}

// ============================================================================
// Compound Statements
// ============================================================================

fn parse_if_statement(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    parser.advance(); // `if` or `elif`
    let test = parse_named_expression(parser)?;
    let body = parse_block(parser)?;
    let orelse = if parser.check(&Token::Elif) {
        vec![parse_if_statement(parser)?]
    } else if parser.eat(&Token::Else) {
        parse_block(parser)?
    } else {
        Vec::new()
    };
    Ok(parser.mk_stmt(StmtKind::If { test, body, orelse }, start))
}

fn parse_while_statement(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::While)?;
    let test = parse_named_expression(parser)?;
    let body = parse_block(parser)?;
    let orelse = if parser.eat(&Token::Else) {
        parse_block(parser)?
    } else {
        Vec::new()
    };
    Ok(parser.mk_stmt(StmtKind::While { test, body, orelse }, start))
}

fn parse_for_statement(parser: &mut Parser, start: Span, is_async: bool) -> Result<Stmt, ParseError> {
    parser.expect(Token::For)?;
    let mut target = parse_exprlist(parser)?;
    validate_target(&target, "assign to")?;
    target.set_ctx(ExprContext::Store);
    parser.expect(Token::In)?;
    let iter = parse_testlist_star_expr(parser)?;
    let body = parse_block(parser)?;
    let orelse = if parser.eat(&Token::Else) {
        parse_block(parser)?
    } else {
        Vec::new()
    };
    Ok(parser.mk_stmt(
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        },
        start,
    ))
}

fn parse_try_statement(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::Try)?;
    let body = parse_block(parser)?;
    let mut handlers = Vec::new();
    while parser.check(&Token::Except) {
        let handler_start = parser.current_span();
        parser.advance();
        let mut type_ = None;
        let mut name = None;
        if !parser.check(&Token::Colon) {
            type_ = Some(parse_expression(parser)?);
            if parser.eat(&Token::As) {
                name = Some(parser.expect_identifier()?);
            }
        }
        let handler_body = parse_block(parser)?;
        let id = parser.next_id();
        handlers.push(ExceptHandler {
            id,
            type_,
            name,
            body: handler_body,
            span: parser.span_from(handler_start),
        });
    }
    let orelse = if parser.eat(&Token::Else) {
        if handlers.is_empty() {
            return Err(ParseError::invalid_syntax(
                "'else' clause requires an 'except' clause",
                parser.previous_span(),
            ));
        }
        parse_block(parser)?
    } else {
        Vec::new()
    };
    let finalbody = if parser.eat(&Token::Finally) {
        parse_block(parser)?
    } else {
        Vec::new()
    };
    if handlers.is_empty() && finalbody.is_empty() {
        return Err(parser.unexpected_token(&[Token::Except, Token::Finally]));
    }
    Ok(parser.mk_stmt(
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        },
        start,
    ))
}

fn parse_with_statement(parser: &mut Parser, start: Span, is_async: bool) -> Result<Stmt, ParseError> {
    parser.expect(Token::With)?;
    let mut items = Vec::new();
    loop {
        let context_expr = parse_expression(parser)?;
        let optional_vars = if parser.eat(&Token::As) {
            let mut target = super::expr::parse_bitor(parser)?;
            validate_target(&target, "assign to")?;
            target.set_ctx(ExprContext::Store);
            Some(target)
        } else {
            None
        };
        items.push(WithItem {
            context_expr,
            optional_vars,
        });
        if !parser.eat(&Token::Comma) {
            break;
        }
    }
    let body = parse_block(parser)?;
    Ok(parser.mk_stmt(
        StmtKind::With {
            items,
            body,
            is_async,
        },
        start,
    ))
}

fn parse_async_statement(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    parser.expect(Token::Async)?;
    match parser.current() {
        Token::Def => parse_function_def(parser, Vec::new(), start, true),
        Token::For => parse_for_statement(parser, start, true),
        Token::With => parse_with_statement(parser, start, true),
        _ => Err(parser.unexpected_token(&[Token::Def, Token::For, Token::With])),
    }
}

fn parse_decorated(parser: &mut Parser) -> Result<Stmt, ParseError> {
    let start = parser.current_span();
    let mut decorators = Vec::new();
    while parser.eat(&Token::At) {
        decorators.push(parse_named_expression(parser)?);
        parser.expect(Token::Newline)?;
    }
    match parser.current() {
        Token::Def => parse_function_def(parser, decorators, start, false),
        Token::Class => parse_class_def(parser, decorators, start),
        Token::Async => {
            parser.advance();
            parse_function_def(parser, decorators, start, true)
        }
        _ => Err(parser.unexpected_token(&[Token::Def, Token::Class, Token::Async])),
    }
}

fn parse_function_def(
    parser: &mut Parser,
    decorator_list: Vec<Expr>,
    start: Span,
    is_async: bool,
) -> Result<Stmt, ParseError> {
    parser.expect(Token::Def)?;
    let name = parser.expect_identifier()?;
    parser.expect(Token::LeftParen)?;
    let args = parse_parameters(parser, &Token::RightParen, true)?;
    parser.expect(Token::RightParen)?;
    let returns = if parser.eat(&Token::Arrow) {
        Some(parse_expression(parser)?)
    } else {
        None
    };
    let body = parse_block(parser)?;
    Ok(parser.mk_stmt(
        StmtKind::FunctionDef(FunctionDef {
            name,
            args,
            body,
            decorator_list,
            returns,
            is_async,
        }),
        start,
    ))
}

fn parse_class_def(
    parser: &mut Parser,
    decorator_list: Vec<Expr>,
    start: Span,
) -> Result<Stmt, ParseError> {
    parser.expect(Token::Class)?;
    let name = parser.expect_identifier()?;
    let (bases, keywords) = if parser.eat(&Token::LeftParen) {
        let parsed = parse_call_arguments(parser)?;
        parser.expect(Token::RightParen)?;
        parsed
    } else {
        (Vec::new(), Vec::new())
    };
    let body = parse_block(parser)?;
    Ok(parser.mk_stmt(
        StmtKind::ClassDef(ClassDef {
            name,
            bases,
            keywords,
            body,
            decorator_list,
        }),
        start,
    ))
}

/// Parse a parameter list up to `close`. Annotations are only accepted for
/// `def` parameters, not lambda parameters.
pub fn parse_parameters(
    parser: &mut Parser,
    close: &Token,
    allow_annotations: bool,
) -> Result<Arguments, ParseError> {
    let mut args = Arguments::default();
    let mut seen_star = false;
    let mut seen_slash = false;

    while !parser.check(close) {
        let start = parser.current_span();
        if parser.eat(&Token::Slash) {
            if seen_slash || seen_star || args.args.is_empty() {
                return Err(ParseError::invalid_syntax("invalid syntax", start));
            }
            seen_slash = true;
            args.posonlyargs = std::mem::take(&mut args.args);
        } else if parser.eat(&Token::DoubleStar) {
            args.kwarg = Some(parse_param(parser, allow_annotations)?);
            parser.eat(&Token::Comma);
            if !parser.check(close) {
                return Err(ParseError::invalid_syntax(
                    "arguments cannot follow var-keyword argument",
                    parser.current_span(),
                ));
            }
            break;
        } else if parser.eat(&Token::Star) {
            if seen_star {
                return Err(ParseError::invalid_syntax(
                    "* argument may appear only once",
                    start,
                ));
            }
            seen_star = true;
            if !parser.check(&Token::Comma) && !parser.check(close) {
                args.vararg = Some(parse_param(parser, allow_annotations)?);
            } else if parser.check(close) {
                return Err(ParseError::invalid_syntax(
                    "named arguments must follow bare *",
                    start,
                ));
            }
        } else {
            let param = parse_param(parser, allow_annotations)?;
            if args.all().any(|existing| existing.name == param.name) {
                return Err(ParseError::invalid_syntax(
                    format!("duplicate argument '{}' in function definition", param.name),
                    param.span,
                ));
            }
            let default = if parser.eat(&Token::Equal) {
                Some(parse_expression(parser)?)
            } else {
                None
            };
            if seen_star {
                args.kwonlyargs.push(param);
                args.kw_defaults.push(default);
            } else {
                match default {
                    Some(default) => args.defaults.push(default),
                    None if !args.defaults.is_empty() => {
                        return Err(ParseError::invalid_syntax(
                            "non-default argument follows default argument",
                            param.span,
                        ))
                    }
                    None => {}
                }
                args.args.push(param);
            }
        }
        if !parser.eat(&Token::Comma) {
            break;
        }
    }

    Ok(args)
}

fn parse_param(parser: &mut Parser, allow_annotations: bool) -> Result<Arg, ParseError> {
    let start = parser.current_span();
    let name = parser.expect_identifier()?;
    let annotation = if allow_annotations && parser.eat(&Token::Colon) {
        Some(Box::new(parse_expression(parser)?))
    } else {
        None
    };
    let id = parser.next_id();
    Ok(Arg {
        id,
        name,
        annotation,
        span: parser.span_from(start),
    })
}
