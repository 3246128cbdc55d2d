//! Integration tests for type-directed code generation
//!
//! Compiles small modules statically and inspects the emitted instructions
//! of the resulting code units.

use stpy_compiler::{compile, CodeUnit, CompileError, CompileOptions, ConstValue, Instr, Opcode, Oparg};
use stpy_parser::ast::Constant;

fn compile_static(source: &str) -> CodeUnit {
    compile(source, "m.py", "m", &CompileOptions::static_python())
        .unwrap_or_else(|err| panic!("compile failed: {}\n{}", err, source))
}

fn compile_generic(source: &str) -> CodeUnit {
    compile(source, "m.py", "m", &CompileOptions::default())
        .unwrap_or_else(|err| panic!("compile failed: {}\n{}", err, source))
}

fn static_error(source: &str) -> CompileError {
    match compile(source, "m.py", "m", &CompileOptions::static_python()) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(err) => err,
    }
}

fn unit<'a>(code: &'a CodeUnit, name: &str) -> &'a CodeUnit {
    code.find(name).unwrap_or_else(|| panic!("no code unit named {}", name))
}

fn instrs(code: &CodeUnit, op: Opcode) -> Vec<&Instr> {
    code.instructions().filter(|instr| instr.op == op).collect()
}

fn has_op(code: &CodeUnit, op: Opcode) -> bool {
    code.instructions().any(|instr| instr.op == op)
}

// ============================================================================
// Primitives
// ============================================================================

#[test]
fn test_double_return_stays_unboxed() {
    let source = "\
from __static__ import double
def f() -> double:
    return double(3.14159)
";
    let code = compile_static(source);
    let f = unit(&code, "f");

    let loads = instrs(f, Opcode::PrimitiveLoadConst);
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].arg, Oparg::Prim(Constant::Float(3.14159), 9));
    assert!(!has_op(f, Opcode::PrimitiveBox));

    let last = f.instructions().last().expect("f has instructions");
    assert_eq!(last.op, Opcode::ReturnPrimitive);
    assert_eq!(last.arg, Oparg::Int(9));
}

#[test]
fn test_primitive_arithmetic_stays_unboxed() {
    let source = "\
from __static__ import int64
def f(x: int64) -> int64:
    y: int64 = x + 1
    return y
";
    let code = compile_static(source);
    let f = unit(&code, "f");
    assert!(has_op(f, Opcode::PrimitiveBinaryOp));
    assert!(has_op(f, Opcode::StoreLocal));
    assert!(has_op(f, Opcode::LoadLocal));
    assert!(!has_op(f, Opcode::BinaryAdd));
    assert_eq!(f.instructions().last().map(|i| i.op), Some(Opcode::ReturnPrimitive));
}

#[test]
fn test_primitive_operator_errors() {
    let source = "\
from __static__ import double
def f(x: double) -> double:
    return x << 1
";
    let err = static_error(source);
    assert!(err.message().contains("double"), "{}", err.message());
}

#[test]
fn test_array_access_is_typed() {
    let source = "\
from __static__ import Array, int8, int64
def f(a: Array[int8], i: int64) -> int8:
    a[i] = 3
    a[0] += 1
    return a[i]
";
    let code = compile_static(source);
    let f = unit(&code, "f");
    let int8_array = Oparg::Int(0x80 | (1 << 4));
    let gets = instrs(f, Opcode::SequenceGet);
    let sets = instrs(f, Opcode::SequenceSet);
    assert_eq!(gets.len(), 2);
    assert_eq!(sets.len(), 2);
    assert!(gets.iter().chain(&sets).all(|instr| instr.arg == int8_array));
    assert!(!has_op(f, Opcode::BinarySubscr));
    assert!(!has_op(f, Opcode::StoreSubscr));
    assert!(has_op(f, Opcode::PrimitiveBinaryOp));
    assert_eq!(f.instructions().last().map(|i| i.op), Some(Opcode::ReturnPrimitive));
}

#[test]
fn test_array_boxed_index_and_length() {
    let source = "\
from __static__ import Array, int64
def f(a: Array[int64], i: int) -> int64:
    return a[i]
def g(a: Array[int64]) -> int:
    return len(a)
";
    let code = compile_static(source);
    let ops: Vec<_> = unit(&code, "f").instructions().map(|instr| instr.op).collect();
    let get = ops
        .iter()
        .position(|op| *op == Opcode::SequenceGet)
        .expect("typed load");
    assert_eq!(ops[get - 1], Opcode::PrimitiveUnbox);

    let lens = instrs(unit(&code, "g"), Opcode::FastLen);
    assert_eq!(lens.len(), 1);
    assert_eq!(lens[0].arg, Oparg::Int(4));
    assert!(has_op(unit(&code, "g"), Opcode::PrimitiveBox));
}

// ============================================================================
// Casts and Narrowing
// ============================================================================

#[test]
fn test_narrowed_return_needs_no_cast() {
    let source = "\
def f(x: int | None) -> int:
    if isinstance(x, int):
        return x
    return 0
";
    let code = compile_static(source);
    let f = unit(&code, "f");
    assert!(instrs(f, Opcode::Cast).is_empty());
}

#[test]
fn test_dynamic_return_is_cast() {
    let code = compile_static("def f(x) -> str:\n    return x\n");
    let casts = instrs(unit(&code, "f"), Opcode::Cast);
    assert_eq!(casts.len(), 1);
    match &casts[0].arg {
        Oparg::Descr(descr) => assert_eq!(descr.path, vec!["builtins", "str"]),
        other => panic!("unexpected operand {:?}", other),
    }

    let object = compile_static("def f(x) -> object:\n    return x\n");
    assert!(instrs(unit(&object, "f"), Opcode::Cast).is_empty());
}

#[test]
fn test_dynamic_comparison_is_cast() {
    let code = compile_static("def f(a, b) -> bool:\n    return a < b\n");
    let f = unit(&code, "f");
    assert!(has_op(f, Opcode::CompareOp));
    let casts = instrs(f, Opcode::Cast);
    assert_eq!(casts.len(), 1);
    match &casts[0].arg {
        Oparg::Descr(descr) => assert_eq!(descr.path, vec!["builtins", "bool"]),
        other => panic!("unexpected operand {:?}", other),
    }

    let err = static_error("def f(a: int) -> bool:\n    return None < a\n");
    assert!(err.message().contains("not supported between 'None' and 'int'"), "{}", err.message());
}

#[test]
fn test_final_reassignment_is_rejected() {
    let source = "from typing import Final\nLIMIT: Final = 10\nLIMIT = 11\n";
    let err = static_error(source);
    let message = err.message();
    assert!(message.contains("Final"), "{}", message);
    assert!(message.contains("LIMIT"), "{}", message);
    assert!(err.syntax_error().is_some());
}

#[test]
fn test_final_names_load_as_constants() {
    let source = "\
from typing import Final
LIMIT: Final = 10
def f():
    return LIMIT
";
    let code = compile_static(source);
    let f = unit(&code, "f");
    assert!(!has_op(f, Opcode::LoadGlobal));
    assert!(f
        .instructions()
        .any(|i| i.op == Opcode::LoadConst && i.arg == Oparg::from(Constant::Int(10))));
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_module_function_call_is_invoked_directly() {
    let source = "\
def f(x: int, y: str) -> int:
    return x

def g():
    return f(1, 'a')
";
    let code = compile_static(source);
    let g = unit(&code, "g");
    let invokes = instrs(g, Opcode::InvokeFunction);
    assert_eq!(invokes.len(), 1);
    match &invokes[0].arg {
        Oparg::Invoke(descr, nargs) => {
            assert_eq!(descr.path, vec!["m", "f"]);
            assert_eq!(*nargs, 2);
        }
        other => panic!("unexpected operand {:?}", other),
    }
    assert!(!has_op(g, Opcode::CallFunction));
}

#[test]
fn test_breaking_the_signature_fails_the_call() {
    let source = "\
def f(x: int, y: str) -> int:
    return x

def g():
    return f(1)
";
    assert_eq!(
        static_error(source).message(),
        "Function f expects a value for argument y"
    );
}

#[test]
fn test_virtual_method_call() {
    let source = "\
class C:
    def m(self) -> int:
        return 1

def g(c: C):
    return c.m()
";
    let code = compile_static(source);
    let g = unit(&code, "g");
    let ops = g.opnames();
    let invoke = ops
        .iter()
        .position(|op| *op == "INVOKE_METHOD")
        .expect("virtual call");
    assert_eq!(ops[invoke - 1], "EXTENDED_ARG");
    assert!(!ops.contains(&"LOAD_METHOD"));
}

#[test]
fn test_unsupported_call_shapes_fall_back_to_generic_calls() {
    let source = "\
def f(a: int, b: int):
    pass

def g(x, y):
    return f(*x, *y)
";
    let code = compile_static(source);
    let g = unit(&code, "g");
    assert!(has_op(g, Opcode::CallFunctionEx));
    assert!(!has_op(g, Opcode::InvokeFunction));
}

#[test]
fn test_len_of_exact_list_is_fast() {
    let code = compile_static("def g():\n    return len([1, 2])\n");
    let g = unit(&code, "g");
    let lens = instrs(g, Opcode::FastLen);
    assert_eq!(lens.len(), 1);
    assert_eq!(lens[0].arg, Oparg::Int(0));
    assert!(has_op(g, Opcode::PrimitiveBox));
}

#[test]
fn test_inline_functions_expand_at_optimize_two() {
    let source = "\
from __static__ import inline

@inline
def f(x: int) -> int:
    return x + 1

def g():
    return f(1)
";
    let options = CompileOptions::static_python().with_optimize(2);
    let code = compile(source, "m.py", "m", &options).unwrap();
    let g = unit(&code, "g");
    assert!(!has_op(g, Opcode::InvokeFunction));
    assert!(!has_op(g, Opcode::CallFunction));
    assert!(has_op(g, Opcode::BinaryAdd));

    let code = compile_static(source);
    assert!(has_op(unit(&code, "g"), Opcode::InvokeFunction));
}

// ============================================================================
// Classes and Fields
// ============================================================================

const POINT: &str = "\
class Point:
    def __init__(self, x: int, y: int):
        self.x: int = x
        self.y: int = y
    def total(self) -> int:
        return self.x + self.y
";

#[test]
fn test_slot_access_uses_fields() {
    let code = compile_static(POINT);
    let total = unit(&code, "total");
    let fields: Vec<Vec<String>> = instrs(total, Opcode::LoadField)
        .into_iter()
        .filter_map(|instr| match &instr.arg {
            Oparg::Descr(descr) => Some(descr.path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(fields, vec![vec!["m", "Point", "x"], vec!["m", "Point", "y"]]);
    assert!(!has_op(total, Opcode::LoadAttr));

    assert_eq!(instrs(unit(&code, "__init__"), Opcode::StoreField).len(), 2);
}

#[test]
fn test_class_body_records_slots() {
    let code = compile_static(POINT);
    let point = unit(&code, "Point");
    let slots = point.slots.as_ref().expect("slots recorded");
    assert!(slots.contains(&"x".to_string()));
    assert!(slots.contains(&"y".to_string()));

    let slot_types = point.slot_types.as_ref().expect("slot types recorded");
    let x = slot_types
        .iter()
        .find(|(name, _)| name == "x")
        .expect("x has a type");
    assert_eq!(x.1.path, vec!["builtins", "int"]);

    let ops = point.opnames();
    assert!(ops.contains(&"BUILD_MAP"));
    assert!(point.names.contains(&"__slots__".to_string()));
    assert!(point.names.contains(&"__slot_types__".to_string()));
    assert!(point.consts.iter().any(|c| matches!(c, ConstValue::Descr(_))));
}

#[test]
fn test_declared_classes_are_marked_static() {
    let code = compile_static(POINT);
    let invokes: Vec<&Oparg> = instrs(&code, Opcode::InvokeFunction)
        .into_iter()
        .map(|instr| &instr.arg)
        .collect();
    assert_eq!(invokes.len(), 1);
    match invokes[0] {
        Oparg::Invoke(descr, nargs) => {
            assert_eq!(descr.path, vec!["_static", "set_type_static"]);
            assert_eq!(*nargs, 1);
        }
        other => panic!("unexpected operand {:?}", other),
    }
    assert!(has_op(&code, Opcode::LoadBuildClass));
}

// ============================================================================
// Arguments and Loops
// ============================================================================

#[test]
fn test_typed_parameters_are_checked() {
    let code = compile_static("def f(x: int, y) -> None:\n    pass\n");
    let f = unit(&code, "f");
    let checks = instrs(f, Opcode::CheckArgs);
    assert_eq!(checks.len(), 1);
    match &checks[0].arg {
        Oparg::CheckArgs(pairs) => {
            assert_eq!(pairs.len(), 1);
            assert_eq!(pairs[0].0, 0);
            assert_eq!(pairs[0].1.path, vec!["builtins", "int"]);
        }
        other => panic!("unexpected operand {:?}", other),
    }
    assert_eq!(f.opnames()[0], "CHECK_ARGS");
}

#[test]
fn test_for_over_exact_tuple_is_indexed() {
    let source = "\
def f(a: int, b: int):
    for x in [a, b]:
        print(x)
";
    let code = compile_static(source);
    let f = unit(&code, "f");
    assert!(!has_op(f, Opcode::GetIter));
    assert!(!has_op(f, Opcode::ForIter));

    let lens = instrs(f, Opcode::FastLen);
    assert_eq!(lens.len(), 1);
    assert_eq!(lens[0].arg, Oparg::Int(3));
    assert!(has_op(f, Opcode::BinarySubscr));
    assert!(instrs(f, Opcode::PrimitiveBox)
        .iter()
        .all(|instr| instr.arg == Oparg::Int(7)));
    assert!(instrs(f, Opcode::StoreLocal).iter().all(|instr| match &instr.arg {
        Oparg::Local(name, descr) => name.starts_with("_pystatic_") && descr.path == vec!["__static__", "int64"],
        _ => false,
    }));
}

#[test]
fn test_module_level_loops_stay_generic() {
    let code = compile_static("for x in [1, 2]:\n    print(x)\n");
    assert!(has_op(&code, Opcode::ForIter));
    assert!(!has_op(&code, Opcode::FastLen));
}

#[test]
fn test_static_units_are_flagged() {
    let code = compile_static("def f():\n    pass\n");
    assert!(code.is_static());
    assert!(unit(&code, "f").is_static());

    let generic = compile_generic("def f():\n    pass\n");
    assert!(!generic.is_static());
}

// ============================================================================
// Block Cleanup
// ============================================================================

fn ops(code: &CodeUnit) -> Vec<Opcode> {
    code.instructions().map(|instr| instr.op).collect()
}

#[test]
fn test_return_inside_with_calls_exit() {
    let code = compile_static("def f(m):\n    with m:\n        return 1\n");
    let f = unit(&code, "f");
    let ops = ops(f);
    let ret = ops
        .iter()
        .position(|op| *op == Opcode::ReturnValue)
        .expect("f returns");
    assert_eq!(
        ops[ret - 7..=ret].to_vec(),
        vec![
            Opcode::PopBlock,
            Opcode::LoadConst,
            Opcode::DupTop,
            Opcode::DupTop,
            Opcode::CallFunction,
            Opcode::PopTop,
            Opcode::LoadConst,
            Opcode::ReturnValue,
        ]
    );
    let call = f
        .instructions()
        .find(|instr| instr.op == Opcode::CallFunction)
        .expect("exit call");
    assert_eq!(call.arg, Oparg::Int(3));
}

#[test]
fn test_break_runs_finally_before_leaving_the_loop() {
    let source = "\
def f(xs, log):
    for x in xs:
        try:
            break
        finally:
            log(x)
    return 0
";
    let code = compile_static(source);
    let ops = ops(unit(&code, "f"));
    let setup = ops
        .iter()
        .position(|op| *op == Opcode::SetupFinally)
        .expect("try/finally block");
    assert_eq!(
        ops[setup + 1..setup + 8].to_vec(),
        vec![
            Opcode::PopBlock,
            Opcode::LoadFast,
            Opcode::LoadFast,
            Opcode::CallFunction,
            Opcode::PopTop,
            Opcode::PopTop,
            Opcode::JumpAbsolute,
        ]
    );
}

#[test]
fn test_nothing_follows_a_terminator_in_a_block() {
    let sources = [
        "def f(m):\n    with m:\n        return 1\n",
        "def f(m):\n    with m as x:\n        return x\n    return 2\n",
        "def f(c):\n    if c:\n        raise ValueError()\n    return 0\n",
        "def f(xs):\n    for x in xs:\n        try:\n            return x\n        finally:\n            pass\n",
    ];
    for source in sources {
        let code = compile_static(source);
        for block in &unit(&code, "f").blocks {
            if let Some(end) = block.instrs.iter().position(|instr| instr.op.is_terminator()) {
                assert_eq!(end + 1, block.instrs.len(), "{} in:\n{}", block.label, source);
            }
        }
    }
}

#[test]
fn test_no_implicit_return_after_final_return() {
    let code = compile_static("def f(x):\n    return x\n");
    let ops = ops(unit(&code, "f"));
    assert_eq!(ops.iter().filter(|op| op.is_return()).count(), 1);
}
