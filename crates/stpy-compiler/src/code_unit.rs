//! Code units
//!
//! The output of the code generator: one [`CodeUnit`] per module, class body,
//! function, lambda and comprehension. Nested units are constants of their
//! parent.

use std::fmt;

use stpy_parser::ast::Constant;
use stpy_types::TypeDescr;

use crate::flow_graph::{Block, BlockGraph, Instr};
use crate::opcodes::{CodeFlags, Opcode, Oparg};

/// What a code unit was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// Module body
    Module,
    /// Class body
    Class,
    /// `def` or `async def`
    Function,
    /// `lambda`
    Lambda,
    /// List, set or dict comprehension or generator expression
    Comprehension,
}

/// A constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// Literal
    Constant(Constant),
    /// Type or function descriptor
    Descr(TypeDescr),
    /// Nested code unit
    Code(Box<CodeUnit>),
}

impl ConstValue {
    /// Nested code unit, if this is one
    pub fn as_code(&self) -> Option<&CodeUnit> {
        match self {
            ConstValue::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Same pool entry; floats compare by bits so `0.0` and `-0.0` stay apart.
    fn same_entry(&self, other: &ConstValue) -> bool {
        match (self, other) {
            (ConstValue::Constant(a), ConstValue::Constant(b)) => same_constant(a, b),
            (ConstValue::Descr(a), ConstValue::Descr(b)) => a == b,
            (ConstValue::Code(a), ConstValue::Code(b)) => std::ptr::eq(a.as_ref(), b.as_ref()) || a == b,
            _ => false,
        }
    }
}

fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
        (Constant::Tuple(xs), Constant::Tuple(ys)) | (Constant::FrozenSet(xs), Constant::FrozenSet(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_constant(x, y))
        }
        _ => a == b,
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Constant(value) => write!(f, "{}", value),
            ConstValue::Descr(descr) => write!(f, "{}", descr),
            ConstValue::Code(code) => write!(f, "<code {}>", code.qualname),
        }
    }
}

/// Generated code for one scope
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Short name (`f`, `<module>`, `<listcomp>`)
    pub name: String,
    /// Qualified name
    pub qualname: String,
    #[allow(missing_docs)]
    pub kind: CodeKind,
    /// Source file name
    pub filename: String,
    /// Line of the defining statement
    pub firstlineno: u32,
    #[allow(missing_docs)]
    pub flags: CodeFlags,
    /// Positional parameters, positional-only included
    pub argcount: usize,
    /// Positional-only parameters
    pub posonlyargcount: usize,
    /// Keyword-only parameters
    pub kwonlyargcount: usize,
    /// Parameters then fast locals, in first-use order
    pub varnames: Vec<String>,
    /// Locals captured by nested scopes
    pub cellvars: Vec<String>,
    /// Names captured from enclosing scopes
    pub freevars: Vec<String>,
    /// Global, attribute and import names, in first-use order
    pub names: Vec<String>,
    /// Constant pool, in first-use order
    pub consts: Vec<ConstValue>,
    /// Basic blocks in emission order
    pub blocks: Vec<Block>,
    /// Declared return type of statically compiled functions
    pub return_type: Option<TypeDescr>,
    /// `__slots__` computed for a static class body
    pub slots: Option<Vec<String>>,
    /// Field descriptors of a static class body
    pub slot_types: Option<Vec<(String, TypeDescr)>>,
}

/// Shape of a scope needed to finish its code unit
#[derive(Debug, Clone)]
pub struct CodeHeader {
    /// Short name
    pub name: String,
    /// Qualified name
    pub qualname: String,
    #[allow(missing_docs)]
    pub kind: CodeKind,
    /// Source file name
    pub filename: String,
    /// Line of the defining statement
    pub firstlineno: u32,
    /// Parameter names in order
    pub params: Vec<String>,
    /// Positional parameters
    pub argcount: usize,
    /// Positional-only parameters
    pub posonlyargcount: usize,
    /// Keyword-only parameters
    pub kwonlyargcount: usize,
    /// Cell variables, sorted
    pub cellvars: Vec<String>,
    /// Free variables, sorted
    pub freevars: Vec<String>,
}

impl CodeUnit {
    /// Collect the name tables and constant pool of a finished graph.
    pub fn from_graph(header: CodeHeader, graph: BlockGraph, extra_flags: CodeFlags) -> Self {
        let mut flags = graph.flags() | extra_flags;
        if header.cellvars.is_empty() && header.freevars.is_empty() {
            flags |= CodeFlags::NOFREE;
        }
        let mut varnames = header.params.clone();
        let mut names: Vec<String> = Vec::new();
        let mut consts: Vec<ConstValue> = Vec::new();
        let blocks = graph.into_blocks();

        for instr in blocks.iter().flat_map(|block| block.instrs.iter()) {
            match (instr.op, &instr.arg) {
                (Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast, Oparg::Name(name))
                | (Opcode::LoadLocal | Opcode::StoreLocal, Oparg::Local(name, _)) => {
                    push_unique(&mut varnames, name);
                }
                (
                    Opcode::LoadClosure
                    | Opcode::LoadDeref
                    | Opcode::StoreDeref
                    | Opcode::DeleteDeref
                    | Opcode::LoadClassderef,
                    _,
                ) => {}
                (_, Oparg::Name(name)) => push_unique(&mut names, name),
                (_, Oparg::Const(value)) => {
                    if !consts.iter().any(|c| c.same_entry(value)) {
                        consts.push(value.clone());
                    }
                }
                _ => {}
            }
        }

        CodeUnit {
            name: header.name,
            qualname: header.qualname,
            kind: header.kind,
            filename: header.filename,
            firstlineno: header.firstlineno,
            flags,
            argcount: header.argcount,
            posonlyargcount: header.posonlyargcount,
            kwonlyargcount: header.kwonlyargcount,
            varnames,
            cellvars: header.cellvars,
            freevars: header.freevars,
            names,
            consts,
            blocks,
            return_type: None,
            slots: None,
            slot_types: None,
        }
    }

    /// Every instruction in emission order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.blocks.iter().flat_map(|block| block.instrs.iter())
    }

    /// Mnemonics of every instruction in emission order.
    pub fn opnames(&self) -> Vec<&'static str> {
        self.instructions().map(|instr| instr.op.name()).collect()
    }

    /// Nested code units, in constant pool order.
    pub fn children(&self) -> impl Iterator<Item = &CodeUnit> {
        self.consts.iter().filter_map(ConstValue::as_code)
    }

    /// Depth-first search for a nested code unit by name.
    pub fn find(&self, name: &str) -> Option<&CodeUnit> {
        self.children()
            .find(|child| child.name == name)
            .or_else(|| self.children().find_map(|child| child.find(name)))
    }

    /// Whether the unit was produced by the static compiler.
    pub fn is_static(&self) -> bool {
        self.flags.contains(CodeFlags::STATICALLY_COMPILED)
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_graph::FlowGraph;

    fn header(params: &[&str]) -> CodeHeader {
        CodeHeader {
            name: "f".to_string(),
            qualname: "f".to_string(),
            kind: CodeKind::Function,
            filename: "m.py".to_string(),
            firstlineno: 1,
            params: params.iter().map(|p| p.to_string()).collect(),
            argcount: params.len(),
            posonlyargcount: 0,
            kwonlyargcount: 0,
            cellvars: Vec::new(),
            freevars: Vec::new(),
        }
    }

    #[test]
    fn test_tables_are_collected_in_first_use_order() {
        let mut graph = BlockGraph::new();
        graph.emit(Opcode::LoadGlobal, Oparg::from("print"));
        graph.emit(Opcode::LoadFast, Oparg::from("x"));
        graph.emit(Opcode::StoreFast, Oparg::from("y"));
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::Int(1)));
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::Int(1)));
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::Float(0.0)));
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::Float(-0.0)));
        graph.emit(Opcode::LoadAttr, Oparg::from("append"));
        graph.emit(Opcode::LoadDeref, Oparg::from("cell"));

        let code = CodeUnit::from_graph(header(&["x"]), graph, CodeFlags::empty());
        assert_eq!(code.varnames, vec!["x", "y"]);
        assert_eq!(code.names, vec!["print", "append"]);
        assert_eq!(code.consts.len(), 3);
        assert!(code.flags.contains(CodeFlags::NOFREE));
    }

    #[test]
    fn test_nested_units_are_found() {
        let inner = CodeUnit::from_graph(header(&[]), BlockGraph::new(), CodeFlags::empty());
        let mut graph = BlockGraph::new();
        graph.emit(Opcode::LoadConst, Oparg::Const(ConstValue::Code(Box::new(inner))));
        let mut outer_header = header(&[]);
        outer_header.name = "<module>".to_string();
        let outer = CodeUnit::from_graph(outer_header, graph, CodeFlags::empty());
        assert_eq!(outer.children().count(), 1);
        assert!(outer.find("f").is_some());
        assert!(outer.find("g").is_none());
    }
}
