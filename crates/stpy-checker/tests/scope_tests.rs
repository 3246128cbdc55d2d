//! Integration tests for scope analysis
//!
//! Every name in every scope must classify as exactly one of local, implicit
//! global, explicit global, free or cell once the tree is built.

use stpy_checker::{build_scopes, NameScope, Scope, ScopeKind, ScopeTree};
use stpy_parser::ast::{Module, StmtKind};
use stpy_parser::parse_module;

fn scopes(source: &str) -> (Module, ScopeTree) {
    let module = parse_module(source).expect("source should parse");
    let tree = build_scopes(&module, false, false).expect("scopes should build");
    (module, tree)
}

fn scope_named<'a>(tree: &'a ScopeTree, name: &str) -> &'a Scope {
    tree.iter()
        .find(|scope| scope.name == name)
        .unwrap_or_else(|| panic!("no scope named {}", name))
}

fn scope_error(source: &str) -> String {
    let module = parse_module(source).expect("source should parse");
    build_scopes(&module, false, false)
        .expect_err("scope analysis should fail")
        .message()
        .to_string()
}

#[test]
fn test_module_names_are_local() {
    let (_, tree) = scopes("x = 1\ndef f():\n    pass\n");
    let module = tree.module_scope();
    assert_eq!(module.kind, ScopeKind::Module);
    assert_eq!(module.check_name("x"), NameScope::Local);
    assert_eq!(module.check_name("f"), NameScope::Local);
}

#[test]
fn test_function_classification() {
    let source = "\
x = 1
def outer(p):
    y = 2
    def inner():
        return y + x + p
    return inner
";
    let (_, tree) = scopes(source);
    let outer = scope_named(&tree, "outer");
    let inner = scope_named(&tree, "inner");

    assert_eq!(outer.check_name("y"), NameScope::Cell);
    assert_eq!(outer.check_name("p"), NameScope::Cell);
    assert_eq!(outer.check_name("inner"), NameScope::Local);
    assert_eq!(inner.check_name("y"), NameScope::Free);
    assert_eq!(inner.check_name("p"), NameScope::Free);
    assert_eq!(inner.check_name("x"), NameScope::GlobalImplicit);

    assert_eq!(outer.cell_vars(), vec!["p", "y"]);
    assert_eq!(outer.free_vars(), Vec::<String>::new());
    assert_eq!(inner.free_vars(), vec!["p", "y"]);
}

#[test]
fn test_implicit_captures_are_free_vars() {
    let source = "\
def f(y, xs):
    g = lambda: y
    return [a + y for a in xs]
";
    let (_, tree) = scopes(source);
    let f = scope_named(&tree, "f");
    assert_eq!(f.cell_vars(), vec!["y"]);
    assert_eq!(scope_named(&tree, "<lambda>").free_vars(), vec!["y"]);
    assert_eq!(scope_named(&tree, "<listcomp>").free_vars(), vec!["y"]);

    let (_, tree) = scopes("def f():\n    def g():\n        return print(len)\n    return g\n");
    let g = scope_named(&tree, "g");
    assert!(g.free_vars().is_empty());
    assert_eq!(g.check_name("print"), NameScope::GlobalImplicit);
}

#[test]
fn test_global_and_nonlocal_statements() {
    let source = "\
counter = 0
def bump():
    global counter
    counter += 1

def make():
    total = 0
    def add(n):
        nonlocal total
        total += n
    return add
";
    let (_, tree) = scopes(source);
    assert_eq!(scope_named(&tree, "bump").check_name("counter"), NameScope::GlobalExplicit);
    assert_eq!(scope_named(&tree, "make").check_name("total"), NameScope::Cell);
    assert_eq!(scope_named(&tree, "add").check_name("total"), NameScope::Free);
    assert_eq!(scope_named(&tree, "add").check_name("n"), NameScope::Local);
}

#[test]
fn test_class_bodies_do_not_close_over_their_names() {
    let source = "\
class C:
    attr = 1
    def method(self):
        return attr
";
    let (_, tree) = scopes(source);
    let class = scope_named(&tree, "C");
    assert_eq!(class.kind, ScopeKind::Class);
    assert_eq!(class.check_name("attr"), NameScope::Local);
    assert_eq!(scope_named(&tree, "method").check_name("attr"), NameScope::GlobalImplicit);
}

#[test]
fn test_comprehensions_get_their_own_scope() {
    let source = "def f(xs):\n    return [x * 2 for x in xs]\n";
    let (module, tree) = scopes(source);
    let comp = tree
        .iter()
        .find(|scope| scope.kind == ScopeKind::Comprehension)
        .expect("comprehension scope");
    assert_eq!(comp.check_name("x"), NameScope::Local);

    let StmtKind::FunctionDef(_) = &module.body[0].kind else {
        panic!("expected a function")
    };
    let f = tree.scope_of(module.body[0].id).expect("function scope");
    assert_eq!(f.check_name("xs"), NameScope::Local);
}

#[test]
fn test_qualified_names() {
    let source = "\
class C:
    def m(self):
        def helper():
            pass
";
    let (_, tree) = scopes(source);
    let helper = tree.iter().find(|s| s.name == "helper").expect("helper scope");
    assert_eq!(tree.qualname(helper.id), "C.m.<locals>.helper");
}

#[test]
fn test_scope_errors() {
    assert_eq!(scope_error("return 1\n"), "'return' outside function");
    assert_eq!(
        scope_error("def f():\n    nonlocal x\n"),
        "no binding for nonlocal 'x' found"
    );
    assert_eq!(
        scope_error("def f(a):\n    global a\n"),
        "name 'a' is parameter and global"
    );
    assert_eq!(
        scope_error("nonlocal x\n"),
        "nonlocal declaration not allowed at module level"
    );
}
