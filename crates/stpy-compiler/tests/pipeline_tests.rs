//! Integration tests for the compile pipeline
//!
//! Drives source text through parsing, scope analysis, optional static
//! checking and code generation, covering generic emission, errors,
//! options and multi-module compilation.

use stpy_compiler::{
    compile, disassemble, CodeFlags, CodeKind, CodeUnit, CompileError, CompileOptions, Compiler, Opcode, Oparg,
};

fn compile_generic(source: &str) -> CodeUnit {
    compile(source, "m.py", "m", &CompileOptions::default())
        .unwrap_or_else(|err| panic!("compile failed: {}\n{}", err, source))
}

fn generic_error(source: &str) -> CompileError {
    match compile(source, "m.py", "m", &CompileOptions::default()) {
        Ok(_) => panic!("expected an error for:\n{}", source),
        Err(err) => err,
    }
}

fn unit<'a>(code: &'a CodeUnit, name: &str) -> &'a CodeUnit {
    code.find(name).unwrap_or_else(|| panic!("no code unit named {}", name))
}

fn has_op(code: &CodeUnit, op: Opcode) -> bool {
    code.instructions().any(|instr| instr.op == op)
}

// ============================================================================
// Generic Emission
// ============================================================================

#[test]
fn test_module_shape() {
    let code = compile_generic("\"\"\"Docs.\"\"\"\nx = 1\n");
    assert_eq!(code.kind, CodeKind::Module);
    assert_eq!(code.name, "<module>");
    assert_eq!(
        code.opnames(),
        vec!["LOAD_CONST", "STORE_NAME", "LOAD_CONST", "STORE_NAME", "LOAD_CONST", "RETURN_VALUE"]
    );
    assert!(code.names.contains(&"__doc__".to_string()));
    assert!(!code.is_static());
}

#[test]
fn test_dynamic_mode_uses_generic_calls() {
    let source = "\
def f(x: int, y: str) -> int:
    return x

def g():
    return f(1, 'a')
";
    let code = compile_generic(source);
    let g = unit(&code, "g");
    assert!(has_op(g, Opcode::LoadGlobal));
    assert!(has_op(g, Opcode::CallFunction));
    assert!(!has_op(g, Opcode::InvokeFunction));
    assert!(!has_op(unit(&code, "f"), Opcode::CheckArgs));
}

#[test]
fn test_method_calls_use_load_method() {
    let code = compile_generic("def f(o):\n    return o.run(1, 2)\n");
    let ops = unit(&code, "f").opnames();
    assert_eq!(
        ops,
        vec!["LOAD_FAST", "LOAD_METHOD", "LOAD_CONST", "LOAD_CONST", "CALL_METHOD", "RETURN_VALUE"]
    );
}

#[test]
fn test_keyword_and_star_calls() {
    let code = compile_generic("f(1, key=2)\ng(*args, **kwargs)\n");
    assert!(code
        .instructions()
        .any(|i| i.op == Opcode::CallFunctionKw && i.arg == Oparg::Int(2)));
    assert!(code
        .instructions()
        .any(|i| i.op == Opcode::CallFunctionEx && i.arg == Oparg::Int(1)));
    assert!(has_op(&code, Opcode::DictMerge));
}

#[test]
fn test_closures_pass_cells() {
    let source = "\
def outer():
    x = 1
    def inner():
        return x
    return inner
";
    let code = compile_generic(source);
    let outer = unit(&code, "outer");
    let inner = unit(&code, "inner");

    assert_eq!(outer.cellvars, vec!["x"]);
    assert_eq!(inner.freevars, vec!["x"]);
    assert_eq!(inner.qualname, "outer.<locals>.inner");
    assert!(has_op(outer, Opcode::StoreDeref));
    assert!(has_op(outer, Opcode::LoadClosure));
    assert!(outer
        .instructions()
        .any(|i| i.op == Opcode::MakeFunction && i.arg == Oparg::Int(8)));
    assert!(has_op(inner, Opcode::LoadDeref));
    assert!(inner.flags.contains(CodeFlags::NESTED));
    assert!(!inner.flags.contains(CodeFlags::NOFREE));
}

#[test]
fn test_lambdas_and_comprehensions_capture_parameters() {
    let code = compile_generic("def f(y, xs):\n    g = lambda: y\n    return [a + y for a in xs]\n");
    let f = unit(&code, "f");
    assert_eq!(f.cellvars, vec!["y"]);
    assert_eq!(unit(&code, "<lambda>").freevars, vec!["y"]);
    assert_eq!(unit(&code, "<listcomp>").freevars, vec!["y"]);

    let ops = f.opnames();
    let closures = ops.iter().filter(|op| **op == "LOAD_CLOSURE").count();
    assert_eq!(closures, 2);
    let make_functions: Vec<&Oparg> = f
        .instructions()
        .filter(|i| i.op == Opcode::MakeFunction)
        .map(|i| &i.arg)
        .collect();
    assert_eq!(make_functions, vec![&Oparg::Int(8), &Oparg::Int(8)]);
}

#[test]
fn test_generators_are_flagged() {
    let code = compile_generic("def gen():\n    yield 1\n");
    let gen = unit(&code, "gen");
    assert!(gen.flags.contains(CodeFlags::GENERATOR));
    assert_eq!(gen.opnames()[0], "GEN_START");
}

#[test]
fn test_list_comprehension_is_a_nested_unit() {
    let code = compile_generic("ys = [y * 2 for y in data if y]\n");
    let listcomp = unit(&code, "<listcomp>");
    assert_eq!(listcomp.kind, CodeKind::Comprehension);
    assert_eq!(listcomp.argcount, 1);
    assert_eq!(listcomp.varnames[0], ".0");

    let ops = listcomp.opnames();
    assert_eq!(ops[0], "BUILD_LIST");
    assert!(ops.contains(&"FOR_ITER"));
    assert!(ops.contains(&"POP_JUMP_IF_FALSE"));
    assert!(listcomp
        .instructions()
        .any(|i| i.op == Opcode::ListAppend && i.arg == Oparg::Int(2)));

    let module_ops = code.opnames();
    let call = module_ops
        .iter()
        .position(|op| *op == "CALL_FUNCTION")
        .expect("comprehension is called");
    assert_eq!(module_ops[call - 1], "GET_ITER");
}

#[test]
fn test_generator_expression_yields() {
    let code = compile_generic("total = sum(x for x in data)\n");
    let genexpr = unit(&code, "<genexpr>");
    assert!(genexpr.flags.contains(CodeFlags::GENERATOR));
    assert!(has_op(genexpr, Opcode::YieldValue));
    assert!(!has_op(genexpr, Opcode::BuildList));
}

#[test]
fn test_constant_displays_are_folded() {
    let code = compile_generic("a = [1, 2, 3]\nb = {'x': 1, 'y': 2}\nc = (*a, 4)\n");
    let ops = code.opnames();
    assert!(ops.contains(&"LIST_EXTEND"));
    assert!(ops.contains(&"BUILD_CONST_KEY_MAP"));
    assert!(ops.contains(&"LIST_TO_TUPLE"));
}

#[test]
fn test_try_except_shape() {
    let source = "\
try:
    f()
except ValueError as e:
    g(e)
";
    let code = compile_generic(source);
    let ops = code.opnames();
    for expected in ["SETUP_FINALLY", "POP_BLOCK", "JUMP_IF_NOT_EXC_MATCH", "POP_EXCEPT", "RERAISE"] {
        assert!(ops.contains(&expected), "missing {} in {:?}", expected, ops);
    }
    assert!(has_op(&code, Opcode::DeleteName));
}

#[test]
fn test_with_shape() {
    let code = compile_generic("with open(p) as fh:\n    fh.read()\n");
    let ops = code.opnames();
    assert!(ops.contains(&"SETUP_WITH"));
    assert!(ops.contains(&"WITH_EXCEPT_START"));
}

#[test]
fn test_return_inside_finally_replays_the_handler() {
    let source = "\
def f():
    try:
        return g()
    finally:
        h()
";
    let code = compile_generic(source);
    let f = unit(&code, "f");
    let calls = f.instructions().filter(|i| i.op == Opcode::CallFunction).count();
    // g(), then h() on the return, fallthrough and exceptional paths
    assert_eq!(calls, 4);
}

#[test]
fn test_future_annotations_are_strings() {
    let source = "from __future__ import annotations\ndef f(x: List[int]) -> None:\n    pass\n";
    let code = compile_generic(source);
    assert!(code.flags.contains(CodeFlags::FUTURE_ANNOTATIONS));
    assert!(code
        .consts
        .iter()
        .any(|c| c.to_string().contains("List[int]")));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_break_outside_loop() {
    let err = generic_error("x = 1\nbreak\n");
    let syntax = err.syntax_error().expect("structured error");
    assert_eq!(syntax.message, "'break' outside loop");
    assert_eq!(syntax.code, "E4001");
    assert_eq!(syntax.line, 2);
    assert_eq!(syntax.source_line.as_deref(), Some("break"));
}

#[test]
fn test_return_outside_function() {
    assert_eq!(generic_error("return 1\n").message(), "'return' outside function");
}

#[test]
fn test_default_except_must_be_last() {
    let source = "try:\n    f()\nexcept:\n    pass\nexcept ValueError:\n    pass\n";
    assert_eq!(generic_error(source).message(), "default 'except:' must be last");
}

#[test]
fn test_parse_errors() {
    let err = generic_error("def f(:\n");
    assert!(matches!(err, CompileError::Parse(_)));
}

#[test]
fn test_async_requires_dialect_support() {
    let mut options = CompileOptions::default();
    options.dialect.async_support = false;
    let err = compile("async def f():\n    pass\n", "m.py", "m", &options).unwrap_err();
    assert_eq!(err.message(), "async functions are not supported");

    let code = compile_generic("async def f():\n    await g()\n");
    assert!(unit(&code, "f").flags.contains(CodeFlags::COROUTINE));
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn test_options_from_json() {
    let options = CompileOptions::from_json(r#"{"optimize": 1, "static_types": true}"#).unwrap();
    assert_eq!(options.optimize, 1);
    assert!(options.static_types);
    assert!(options.dialect.async_support);

    let err = CompileOptions::from_json(r#"{"optimize": 7}"#).unwrap_err();
    assert!(matches!(err, CompileError::Config { .. }));
    assert!(Compiler::new(CompileOptions::default().with_optimize(3)).is_err());
}

#[test]
fn test_optimize_drops_asserts() {
    let source = "assert x\n";
    let kept = compile_generic(source);
    assert!(has_op(&kept, Opcode::LoadAssertionError));

    let options = CompileOptions::default().with_optimize(1);
    let dropped = compile(source, "m.py", "m", &options).unwrap();
    assert!(!has_op(&dropped, Opcode::LoadAssertionError));
}

#[test]
fn test_extra_flags_reach_every_unit() {
    let options = CompileOptions {
        flags: CodeFlags::FUTURE_EAGER_IMPORTS,
        ..CompileOptions::default()
    };
    let code = compile("def f():\n    pass\n", "m.py", "m", &options).unwrap();
    assert!(code.flags.contains(CodeFlags::FUTURE_EAGER_IMPORTS));
    assert!(unit(&code, "f").flags.contains(CodeFlags::FUTURE_EAGER_IMPORTS));
}

// ============================================================================
// Multiple Modules
// ============================================================================

#[test]
fn test_imported_functions_are_invoked_directly() {
    let mut compiler = Compiler::new(CompileOptions::static_python()).unwrap();
    compiler
        .add_source("lib", "lib.py", "def make(x: int) -> int:\n    return x\n")
        .unwrap();
    let code = compiler
        .compile("from lib import make\ndef g():\n    return make(1)\n", "app.py", "app")
        .unwrap();
    let invoke = unit(&code, "g")
        .instructions()
        .find(|i| i.op == Opcode::InvokeFunction)
        .expect("direct call");
    match &invoke.arg {
        Oparg::Invoke(descr, nargs) => {
            assert_eq!(descr.path, vec!["lib", "make"]);
            assert_eq!(*nargs, 1);
        }
        other => panic!("unexpected operand {:?}", other),
    }
}

#[test]
fn test_shared_dependency_is_declared_once() {
    let mut compiler = Compiler::new(CompileOptions::static_python()).unwrap();
    compiler.add_source("lib", "lib.py", "class Box:\n    pass\n").unwrap();
    compiler
        .compile("from lib import Box\ndef f(b: Box) -> Box:\n    return b\n", "a.py", "a")
        .unwrap();
    let classes = compiler.symbols().universe.class_count();
    compiler
        .compile("from lib import Box\ndef g(b: Box) -> Box:\n    return b\n", "b.py", "b")
        .unwrap();
    assert_eq!(compiler.symbols().universe.class_count(), classes);
}

// ============================================================================
// Disassembly
// ============================================================================

#[test]
fn test_disassembly_lists_nested_units() {
    let options = CompileOptions::static_python();
    let source = "from __static__ import double\ndef f() -> double:\n    return double(3.14159)\n";
    let code = compile(source, "m.py", "m", &options).unwrap();
    let text = disassemble(&code);
    assert!(text.starts_with("Disassembly of <code <module>>:\n"));
    assert!(text.contains("Disassembly of <code f>:"));
    assert!(text.contains("PRIMITIVE_LOAD_CONST (3.14159, 9)"));
    assert!(text.contains("RETURN_PRIMITIVE 9"));
}
