//! Integration tests for declaration and type binding
//!
//! Runs the full checker pipeline (scopes, declare, finish-bind, bind) over
//! small modules and inspects the recorded bindings.

use stpy_checker::{bind_module, build_scopes, Bindings, CheckResult, SymbolTable, TerminalKind};
use stpy_parser::ast::{Expr, Module, Stmt, StmtKind};
use stpy_parser::parse_module;
use stpy_types::{Member, Value};

struct Checked {
    symbols: SymbolTable,
    bindings: Bindings,
    module: Module,
}

fn check(source: &str) -> CheckResult<Checked> {
    let module = parse_module(source).expect("source should parse");
    let scopes = build_scopes(&module, false, false)?;
    let mut symbols = SymbolTable::new();
    symbols.add_module("m", "m.py", module.clone());
    symbols.declare_module("m")?;
    symbols.finish_bind()?;
    let bindings = bind_module(&mut symbols, &scopes, "m", 0)?;
    Ok(Checked {
        symbols,
        bindings,
        module,
    })
}

fn error(source: &str) -> String {
    match check(source) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(err) => err.message().to_string(),
    }
}

fn function_body<'a>(module: &'a Module, name: &str) -> &'a [Stmt] {
    module
        .body
        .iter()
        .find_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(def) if def.name == name => Some(def.body.as_slice()),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no function {}", name))
}

fn returned(stmt: &Stmt) -> &Expr {
    match &stmt.kind {
        StmtKind::Return { value: Some(value) } => value,
        other => panic!("expected a return, got {:?}", other),
    }
}

#[test]
fn test_isinstance_narrowing_avoids_cast() {
    let source = "\
def f(x: int | None) -> int:
    if isinstance(x, int):
        return x
    return 0
";
    let checked = check(source).unwrap();
    let body = function_body(&checked.module, "f");
    let StmtKind::If { body: then, .. } = &body[0].kind else {
        panic!("expected an if")
    };
    let value = returned(&then[0]);
    assert_eq!(
        checked.bindings.type_of(value.id),
        &Value::Instance(checked.symbols.universe.builtins.int)
    );
    assert!(checked.bindings.cast(value.id).is_none());
    assert_eq!(checked.bindings.terminal(body[0].id), TerminalKind::NonTerminal);
}

#[test]
fn test_narrowing_is_undone_after_branch() {
    let source = "\
def f(x: int | None):
    if x is None:
        x = 1
    return x
";
    let checked = check(source).unwrap();
    let value = returned(&function_body(&checked.module, "f")[1]);
    assert_eq!(
        checked.bindings.type_of(value.id),
        &Value::Instance(checked.symbols.universe.builtins.int)
    );
}

#[test]
fn test_double_negation_keeps_narrowing() {
    let source = "\
def f(x: int | None):
    if not not x:
        return x
    return 0
";
    let checked = check(source).unwrap();
    let body = function_body(&checked.module, "f");
    let StmtKind::If { body: then, .. } = &body[0].kind else {
        panic!("expected an if")
    };
    assert_eq!(
        checked.bindings.type_of(returned(&then[0]).id),
        &Value::Instance(checked.symbols.universe.builtins.int)
    );
}

#[test]
fn test_dynamic_return_is_cast() {
    let source = "def f(x) -> str:\n    return x\n";
    let checked = check(source).unwrap();
    let value = returned(&function_body(&checked.module, "f")[0]);
    let cast = checked.bindings.cast(value.id).expect("cast recorded");
    assert_eq!(cast.path, vec!["builtins", "str"]);

    let object = "def f(x) -> object:\n    return x\n";
    let checked = check(object).unwrap();
    let value = returned(&function_body(&checked.module, "f")[0]);
    assert!(checked.bindings.cast(value.id).is_none());
}

#[test]
fn test_return_type_mismatch() {
    assert_eq!(
        error("def f() -> int:\n    return 'a'\n"),
        "return type must be int, not Exact[str]"
    );
}

#[test]
fn test_final_reassignment() {
    let module_level = "from typing import Final\nLIMIT: Final = 10\nLIMIT = 11\n";
    let message = error(module_level);
    assert!(message.contains("Final"));
    assert!(message.contains("LIMIT"));

    let in_function = "\
from typing import Final
def f():
    x: Final = 1
    x = 2
";
    assert_eq!(error(in_function), "Cannot assign to a Final variable: x");

    let through_global = "\
from typing import Final
LIMIT: Final = 10
def f():
    global LIMIT
    LIMIT = 3
";
    assert_eq!(error(through_global), "Cannot assign to a Final variable: LIMIT");
}

#[test]
fn test_final_attribute_outside_init() {
    let source = "\
from typing import Final
class C:
    x: Final[int]
    def __init__(self):
        self.x = 1
    def reset(self):
        self.x = 2
";
    assert_eq!(error(source), "Cannot assign to a Final attribute of m.C:x");
}

#[test]
fn test_final_names_load_as_constants() {
    let source = "\
from typing import Final
LIMIT: Final = 10
def f():
    return LIMIT
";
    let checked = check(source).unwrap();
    let value = returned(&function_body(&checked.module, "f")[0]);
    assert_eq!(
        checked.bindings.final_constant(value.id),
        Some(&stpy_parser::ast::Constant::Int(10))
    );
}

#[test]
fn test_class_inside_function() {
    assert_eq!(
        error("def f():\n    class C:\n        pass\n"),
        "Cannot declare class `C` inside a function, `f`"
    );
}

#[test]
fn test_classvar_outside_class() {
    assert_eq!(
        error("from typing import ClassVar\ndef f():\n    x: ClassVar[int] = 1\n"),
        "ClassVar is allowed only in class attribute annotations."
    );
}

#[test]
fn test_override_must_be_compatible() {
    let source = "\
class A:
    def f(self, x: int) -> int:
        return x
class B(A):
    def f(self, x: int, y: int) -> int:
        return x
";
    let message = error(source);
    assert!(message.contains("overrides"));
}

#[test]
fn test_inconsistent_mro_fails() {
    let source = "\
class A: pass
class B(A): pass
class C(A, B): pass
";
    assert!(error(source).starts_with("Cannot create a consistent method resolution order"));
}

#[test]
fn test_slots_are_collected_from_init() {
    let source = "\
class Point:
    def __init__(self, x: int, y: int):
        self.x: int = x
        self.y: int = y
    def total(self) -> int:
        return self.x + self.y
";
    let checked = check(source).unwrap();
    let Some(Value::Class(point)) = checked.symbols.resolve_name("m", "Point") else {
        panic!("Point is not a class")
    };
    let class = checked.symbols.universe.class(*point);
    assert!(matches!(class.members.get("x"), Some(Member::Slot(_))));
    assert!(matches!(class.members.get("total"), Some(Member::Method(_))));
}

#[test]
fn test_declare_module_is_idempotent() {
    let mut symbols = SymbolTable::new();
    symbols.add_module("m", "m.py", parse_module("class C: pass\nx = 1\n").unwrap());
    let first = symbols.declare_module("m").unwrap().classes().to_vec();
    let classes_before = symbols.universe.class_count();
    let second = symbols.declare_module("m").unwrap().classes().to_vec();
    assert_eq!(first, second);
    assert_eq!(symbols.universe.class_count(), classes_before);
}

#[test]
fn test_loop_bodies_merge_types() {
    let source = "\
def f(items):
    total = 0
    for item in items:
        total = total + 1
    return total
";
    let checked = check(source).unwrap();
    let value = returned(&function_body(&checked.module, "f")[2]);
    assert!(matches!(checked.bindings.type_of(value.id), Value::Instance(_)));
}

#[test]
fn test_raise_terminates_branch() {
    let source = "\
def f(x: int | None) -> int:
    if x is None:
        raise ValueError()
    return x
";
    let checked = check(source).unwrap();
    let body = function_body(&checked.module, "f");
    let value = returned(&body[1]);
    assert_eq!(
        checked.bindings.type_of(value.id),
        &Value::Instance(checked.symbols.universe.builtins.int)
    );
}
