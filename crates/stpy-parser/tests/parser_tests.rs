//! Parser integration tests

use stpy_parser::ast::unparse::unparse_expr;
use stpy_parser::ast::*;
use stpy_parser::{parse_module, SyntaxError};

fn parse(source: &str) -> Module {
    parse_module(source).expect("parse failed")
}

fn first_expr(source: &str) -> Expr {
    let module = parse(source);
    match module.body.into_iter().next().map(|s| s.kind) {
        Some(StmtKind::Expr { value }) => value,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

#[test]
fn test_function_with_annotations_and_defaults() {
    let module = parse("def f(a: int, /, b=1, *args, c: str = 'x', **kw) -> double:\n    return a\n");
    let StmtKind::FunctionDef(def) = &module.body[0].kind else {
        panic!("expected def");
    };
    assert_eq!(def.name, "f");
    assert_eq!(def.args.posonlyargs.len(), 1);
    assert_eq!(def.args.args.len(), 1);
    assert_eq!(def.args.defaults.len(), 1);
    assert_eq!(def.args.vararg.as_ref().map(|a| a.name.as_str()), Some("args"));
    assert_eq!(def.args.kwonlyargs[0].name, "c");
    assert!(def.args.kw_defaults[0].is_some());
    assert_eq!(def.args.kwarg.as_ref().map(|a| a.name.as_str()), Some("kw"));
    assert_eq!(def.returns.as_ref().and_then(|r| r.as_name()), Some("double"));
    assert!(matches!(def.body[0].kind, StmtKind::Return { .. }));
}

#[test]
fn test_class_with_decorators_and_bases() {
    let module = parse("@final\nclass C(B, metaclass=M):\n    x: int = 1\n    def m(self): pass\n");
    let StmtKind::ClassDef(def) = &module.body[0].kind else {
        panic!("expected class");
    };
    assert_eq!(def.decorator_list.len(), 1);
    assert_eq!(def.bases.len(), 1);
    assert_eq!(def.keywords[0].arg.as_deref(), Some("metaclass"));
    assert!(matches!(
        def.body[0].kind,
        StmtKind::AnnAssign { simple: true, .. }
    ));
}

#[test]
fn test_chained_comparison_and_operators() {
    let expr = first_expr("a < b <= c is not None\n");
    let ExprKind::Compare { ops, .. } = &expr.kind else {
        panic!("expected compare");
    };
    assert_eq!(ops, &[CmpOperator::Lt, CmpOperator::LtE, CmpOperator::IsNot]);

    let expr = first_expr("1 + 2 * 3 ** -4\n");
    assert_eq!(unparse_expr(&expr), "1 + 2 * 3 ** -4");
}

#[test]
fn test_bool_ops_and_not() {
    let expr = first_expr("not a and b or c\n");
    let ExprKind::BoolOp { op, values } = &expr.kind else {
        panic!("expected or");
    };
    assert_eq!(*op, BoolOperator::Or);
    assert!(matches!(
        values[0].kind,
        ExprKind::BoolOp {
            op: BoolOperator::And,
            ..
        }
    ));
}

#[test]
fn test_comprehensions_and_displays() {
    assert!(matches!(
        first_expr("[x for x in y if x]\n").kind,
        ExprKind::ListComp { .. }
    ));
    assert!(matches!(
        first_expr("{k: v for k, v in d}\n").kind,
        ExprKind::DictComp { .. }
    ));
    assert!(matches!(first_expr("{1, 2}\n").kind, ExprKind::Set { .. }));
    assert!(matches!(first_expr("{**a, 'b': 1}\n").kind, ExprKind::Dict { .. }));
    assert!(matches!(
        first_expr("f(x for x in y)\n").kind,
        ExprKind::Call { .. }
    ));
    assert!(matches!(first_expr("(1,)\n").kind, ExprKind::Tuple { .. }));
}

#[test]
fn test_subscripts_and_slices() {
    let expr = first_expr("a[1:2, ::3]\n");
    let ExprKind::Subscript { slice, .. } = &expr.kind else {
        panic!("expected subscript");
    };
    let ExprKind::Tuple { elts, .. } = &slice.kind else {
        panic!("expected tuple slice");
    };
    assert_eq!(elts.len(), 2);
    assert!(matches!(elts[1].kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) }));
}

#[test]
fn test_assignment_targets_get_store_context() {
    let module = parse("a, *b = c = d\n");
    let StmtKind::Assign { targets, .. } = &module.body[0].kind else {
        panic!("expected assign");
    };
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].ctx(), Some(ExprContext::Store));
    let ExprKind::Tuple { elts, .. } = &targets[0].kind else {
        panic!("expected tuple target");
    };
    assert_eq!(elts[1].ctx(), Some(ExprContext::Store));
}

#[test]
fn test_try_with_and_imports() {
    let source = "\
from . import a
from ..pkg.mod import (b as c, d,)
import x.y as z
try:
    pass
except ValueError as e:
    pass
else:
    pass
finally:
    pass
with open(p) as f, g:
    pass
";
    let module = parse(source);
    assert!(matches!(
        &module.body[0].kind,
        StmtKind::ImportFrom { module: None, level: 1, .. }
    ));
    let StmtKind::ImportFrom { names, level, .. } = &module.body[1].kind else {
        panic!("expected from import");
    };
    assert_eq!(*level, 2);
    assert_eq!(names[0].bound_name(), "c");
    let StmtKind::Import { names } = &module.body[2].kind else {
        panic!("expected import");
    };
    assert_eq!(names[0].bound_name(), "z");
    let StmtKind::Try { handlers, orelse, finalbody, .. } = &module.body[3].kind else {
        panic!("expected try");
    };
    assert_eq!(handlers[0].name.as_deref(), Some("e"));
    assert_eq!(orelse.len(), 1);
    assert_eq!(finalbody.len(), 1);
    let StmtKind::With { items, .. } = &module.body[4].kind else {
        panic!("expected with");
    };
    assert_eq!(items.len(), 2);
}

#[test]
fn test_elif_chain_nests() {
    let module = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n");
    let StmtKind::If { orelse, .. } = &module.body[0].kind else {
        panic!("expected if");
    };
    assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
}

#[test]
fn test_node_ids_are_unique() {
    struct Collect(Vec<NodeId>);
    impl Visitor for Collect {
        fn visit_expr(&mut self, expr: &Expr) {
            self.0.push(expr.id);
            walk_expr(self, expr);
        }
        fn visit_stmt(&mut self, stmt: &Stmt) {
            self.0.push(stmt.id);
            walk_stmt(self, stmt);
        }
    }
    let module = parse("def f(x):\n    return [x + 1 for x in range(3)]\ny = f(2)\n");
    let mut collect = Collect(Vec::new());
    collect.visit_module(&module);
    let mut ids = collect.0.clone();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), collect.0.len());
}

#[test]
fn test_lines_and_columns() {
    let module = parse("x = 1\nif x:\n    y = 2\n");
    let StmtKind::If { body, .. } = &module.body[1].kind else {
        panic!("expected if");
    };
    assert_eq!(module.body[1].span.line, 2);
    assert_eq!(body[0].span.line, 3);
    assert_eq!(body[0].span.column, 5);
}

#[test]
fn test_errors() {
    let err = parse_module("f() = 1\n").unwrap_err();
    assert!(err.message().contains("cannot assign to function call"));

    let err = parse_module("def f(a=1, b):\n    pass\n").unwrap_err();
    assert!(err.message().contains("non-default argument follows default argument"));

    let err = parse_module("if x:\npass\n").unwrap_err();
    assert!(matches!(err, SyntaxError::Parse(_)));

    let err = parse_module("x = (1,\n").unwrap_err();
    assert!(matches!(err, SyntaxError::Parse(_)));
}

#[test]
fn test_unparse_annotations() {
    let module = parse("def f(x: Optional[List[int]], y: 'C' | None) -> Dict[str, int]: ...\n");
    let StmtKind::FunctionDef(def) = &module.body[0].kind else {
        panic!("expected def");
    };
    let ann = def.args.args[0].annotation.as_ref().unwrap();
    assert_eq!(unparse_expr(ann), "Optional[List[int]]");
    let ann = def.args.args[1].annotation.as_ref().unwrap();
    assert_eq!(unparse_expr(ann), "'C' | None");
    assert_eq!(unparse_expr(def.returns.as_ref().unwrap()), "Dict[str, int]");
}
