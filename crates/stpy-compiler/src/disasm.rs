//! Textual disassembly of code units
//!
//! ```text
//! Disassembly of <code f>:
//! entry_0:
//!     1 PRIMITIVE_LOAD_CONST (3.14159, 9)
//!     1 RETURN_PRIMITIVE 9
//! ```

use std::fmt;

use crate::code_unit::CodeUnit;
use crate::flow_graph::{Block, BlockId};
use crate::opcodes::Oparg;

/// Disassemble `code` and every nested code unit.
pub fn disassemble(code: &CodeUnit) -> String {
    Disassembly(code).to_string()
}

/// [`fmt::Display`] adapter printing a code unit block by block.
pub struct Disassembly<'a>(pub &'a CodeUnit);

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        writeln!(f, "Disassembly of <code {}>:", code.qualname)?;
        for block in &code.blocks {
            writeln!(f, "{}:", block_label(block))?;
            for instr in &block.instrs {
                write!(f, "  {:>4} {}", instr.lineno, instr.op)?;
                match &instr.arg {
                    Oparg::None => {}
                    Oparg::Block(target) => write!(f, " {}", target_label(code, *target))?,
                    arg => write!(f, " {}", arg)?,
                }
                writeln!(f)?;
            }
        }
        for child in code.children() {
            writeln!(f)?;
            write!(f, "{}", Disassembly(child))?;
        }
        Ok(())
    }
}

fn block_label(block: &Block) -> String {
    format!("{}_{}", block.label, block.id.0)
}

fn target_label(code: &CodeUnit, target: BlockId) -> String {
    code.blocks
        .iter()
        .find(|block| block.id == target)
        .map(block_label)
        .unwrap_or_else(|| target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_unit::{CodeHeader, CodeKind};
    use crate::flow_graph::{BlockGraph, FlowGraph};
    use crate::opcodes::{CodeFlags, Opcode};
    use stpy_parser::ast::Constant;

    fn header() -> CodeHeader {
        CodeHeader {
            name: "f".to_string(),
            qualname: "f".to_string(),
            kind: CodeKind::Function,
            filename: "m.py".to_string(),
            firstlineno: 1,
            params: Vec::new(),
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            cellvars: Vec::new(),
            freevars: Vec::new(),
        }
    }

    #[test]
    fn test_blocks_and_jump_targets_are_labelled() {
        let mut graph = BlockGraph::new();
        let exit = graph.new_block("exit");
        graph.set_lineno(2);
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::Bool(true)));
        graph.emit(Opcode::PopJumpIfFalse, Oparg::Block(exit));
        graph.next_block(Some(exit));
        graph.emit(Opcode::LoadConst, Oparg::from(Constant::None));
        graph.emit(Opcode::ReturnValue, Oparg::None);
        let code = CodeUnit::from_graph(header(), graph, CodeFlags::empty());

        let text = disassemble(&code);
        assert!(text.starts_with("Disassembly of <code f>:\nentry_0:\n"));
        assert!(text.contains("POP_JUMP_IF_FALSE exit_1"));
        assert!(text.contains("exit_1:\n"));
        assert!(text.contains("     2 RETURN_VALUE\n"));
    }
}
