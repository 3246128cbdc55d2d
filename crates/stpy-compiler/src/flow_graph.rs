//! Flow graph
//!
//! The code generator writes instructions into a [`FlowGraph`]: an ordered
//! list of basic blocks linked by fallthrough edges. Assembling the graph into
//! binary bytecode happens elsewhere; [`BlockGraph`] is the in-memory
//! implementation used by the compiler and its tests.

use std::fmt;

use crate::opcodes::{CodeFlags, Opcode, Oparg};

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Position in the block arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Write-only sink for generated code.
pub trait FlowGraph {
    /// Create a block that is not yet placed in the emission order.
    fn new_block(&mut self, label: &str) -> BlockId;

    /// Make `block` (or a fresh one) current; the previous current block
    /// falls through to it.
    fn next_block(&mut self, block: Option<BlockId>) -> BlockId;

    /// Append an instruction to the current block.
    fn emit(&mut self, op: Opcode, arg: Oparg);

    /// Add code object flags.
    fn set_flag(&mut self, flags: CodeFlags);

    /// Line number for the following instructions.
    fn set_lineno(&mut self, lineno: u32);

    /// Line number of the next instruction.
    fn lineno(&self) -> u32;

    /// Whether any line number has been recorded.
    fn lineno_set(&self) -> bool;

    /// Block instructions are currently appended to.
    fn current_block(&self) -> BlockId;

    /// Whether the current block already ends in a return.
    fn current_returns(&self) -> bool;

    /// Whether the current block can only be entered by falling through
    /// from code that never falls through.
    fn current_unreachable(&self) -> bool;
}

/// One instruction with the line it was generated for
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// Opcode
    pub op: Opcode,
    /// Operand
    pub arg: Oparg,
    /// Source line
    pub lineno: u32,
}

/// A basic block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Own id
    pub id: BlockId,
    /// Human readable label (`if_end`, `for_cleanup`, ...)
    pub label: String,
    /// Instructions in order
    pub instrs: Vec<Instr>,
    /// Fallthrough successor
    pub next: Option<BlockId>,
    /// Contains a return instruction
    pub returns: bool,
}

/// Blocks in emission order plus the flags collected while generating.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    order: Vec<BlockId>,
    current: BlockId,
    unreachable: bool,
    flags: CodeFlags,
    lineno: u32,
    lineno_set: bool,
    first_lineno: Option<u32>,
}

impl BlockGraph {
    /// A graph with a single `entry` block.
    pub fn new() -> Self {
        let entry = Block {
            id: BlockId(0),
            label: "entry".to_string(),
            instrs: Vec::new(),
            next: None,
            returns: false,
        };
        BlockGraph {
            blocks: vec![entry],
            order: vec![BlockId(0)],
            current: BlockId(0),
            unreachable: false,
            flags: CodeFlags::empty(),
            lineno: 0,
            lineno_set: false,
            first_lineno: None,
        }
    }

    /// Block by id.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Placed blocks in emission order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.order.iter().map(|id| &self.blocks[id.index()])
    }

    /// Placed blocks, consuming the graph.
    pub fn into_blocks(self) -> Vec<Block> {
        let mut arena: Vec<Option<Block>> = self.blocks.into_iter().map(Some).collect();
        self.order
            .iter()
            .filter_map(|id| arena.get_mut(id.index()).and_then(Option::take))
            .collect()
    }

    /// Every instruction in emission order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.blocks().flat_map(|block| block.instrs.iter())
    }

    /// Flags set through [`FlowGraph::set_flag`].
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// First line any instruction was generated for.
    pub fn first_lineno(&self) -> Option<u32> {
        self.first_lineno
    }

    /// Number of blocks created, placed or not.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph for BlockGraph {
    fn new_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            label: label.to_string(),
            instrs: Vec::new(),
            next: None,
            returns: false,
        });
        id
    }

    fn next_block(&mut self, block: Option<BlockId>) -> BlockId {
        let block = match block {
            Some(block) => {
                self.unreachable = false;
                block
            }
            None => {
                let previous = &self.blocks[self.current.index()];
                let terminated = previous.instrs.last().is_some_and(|instr| instr.op.is_terminator());
                self.unreachable = self.unreachable || terminated;
                self.new_block("")
            }
        };
        self.blocks[self.current.index()].next = Some(block);
        self.current = block;
        self.order.push(block);
        block
    }

    fn emit(&mut self, op: Opcode, arg: Oparg) {
        let lineno = self.lineno;
        let current = &mut self.blocks[self.current.index()];
        if op.is_return() {
            current.returns = true;
        }
        current.instrs.push(Instr { op, arg, lineno });
    }

    fn set_flag(&mut self, flags: CodeFlags) {
        self.flags |= flags;
    }

    fn set_lineno(&mut self, lineno: u32) {
        if self.first_lineno.is_none() {
            self.first_lineno = Some(lineno);
        }
        self.lineno = lineno;
        self.lineno_set = true;
    }

    fn lineno(&self) -> u32 {
        self.lineno
    }

    fn lineno_set(&self) -> bool {
        self.lineno_set
    }

    fn current_block(&self) -> BlockId {
        self.current
    }

    fn current_returns(&self) -> bool {
        self.blocks[self.current.index()].returns
    }

    fn current_unreachable(&self) -> bool {
        self.unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_block_links_fallthrough() {
        let mut graph = BlockGraph::new();
        graph.emit(Opcode::Nop, Oparg::None);
        let end = graph.new_block("end");
        let second = graph.next_block(None);
        graph.next_block(Some(end));

        let labels: Vec<_> = graph.blocks().map(|b| b.id).collect();
        assert_eq!(labels, vec![BlockId(0), second, end]);
        assert_eq!(graph.block(BlockId(0)).next, Some(second));
        assert_eq!(graph.block(second).next, Some(end));
        assert_eq!(graph.current_block(), end);
    }

    #[test]
    fn test_return_marks_block() {
        let mut graph = BlockGraph::new();
        assert!(!graph.current_returns());
        graph.emit(Opcode::LoadConst, Oparg::Int(1));
        graph.emit(Opcode::ReturnValue, Oparg::None);
        assert!(graph.current_returns());
        graph.next_block(None);
        assert!(!graph.current_returns());
    }

    #[test]
    fn test_blocks_after_terminators_are_unreachable() {
        let mut graph = BlockGraph::new();
        graph.emit(Opcode::ReturnValue, Oparg::None);
        graph.next_block(None);
        assert!(graph.current_unreachable());
        graph.emit(Opcode::PopBlock, Oparg::None);
        graph.next_block(None);
        assert!(graph.current_unreachable());

        let target = graph.new_block("target");
        graph.next_block(Some(target));
        assert!(!graph.current_unreachable());
        graph.emit(Opcode::Nop, Oparg::None);
        graph.next_block(None);
        assert!(!graph.current_unreachable());
    }

    #[test]
    fn test_line_numbers() {
        let mut graph = BlockGraph::new();
        assert!(!graph.lineno_set());
        graph.set_lineno(3);
        graph.emit(Opcode::Nop, Oparg::None);
        graph.set_lineno(5);
        graph.emit(Opcode::PopTop, Oparg::None);
        assert!(graph.lineno_set());
        assert_eq!(graph.first_lineno(), Some(3));
        let lines: Vec<_> = graph.instructions().map(|i| i.lineno).collect();
        assert_eq!(lines, vec![3, 5]);
    }

    #[test]
    fn test_unplaced_blocks_are_dropped() {
        let mut graph = BlockGraph::new();
        graph.new_block("never_used");
        assert_eq!(graph.block_count(), 2);
        assert_eq!(graph.into_blocks().len(), 1);
    }
}
