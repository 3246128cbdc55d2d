//! Block setup stack
//!
//! `return`, `break` and `continue` leave every enclosing loop, `try` and
//! `with` block; each entry knows the cleanup that exiting it early needs.

use stpy_parser::ast::{Constant, Stmt};

use super::CodeGenerator;
use crate::error::CompileResult;
use crate::flow_graph::BlockId;
use crate::opcodes::Opcode;

/// An active block of the frame's block stack.
#[derive(Debug, Clone)]
pub(super) enum SetupEntry<'a> {
    WhileLoop { start: BlockId, exit: BlockId },
    /// The iterator, or the indexed sequence, is on the stack
    ForLoop { start: BlockId, exit: BlockId },
    TryExcept,
    /// Leaving the `try` body runs the `finally` statements inline
    FinallyTry { body: &'a [Stmt] },
    FinallyEnd,
    With,
    AsyncWith,
    /// An `except` body; a named handler also clears the bound name
    HandlerCleanup { name: Option<String> },
    PopValue,
    ExceptionHandler,
}

impl SetupEntry<'_> {
    fn is_loop(&self) -> bool {
        matches!(self, SetupEntry::WhileLoop { .. } | SetupEntry::ForLoop { .. })
    }

    /// Jump targets of a loop entry.
    pub(super) fn loop_targets(&self) -> Option<(BlockId, BlockId)> {
        match self {
            SetupEntry::WhileLoop { start, exit } | SetupEntry::ForLoop { start, exit } => Some((*start, *exit)),
            _ => None,
        }
    }
}

impl<'a> CodeGenerator<'a> {
    pub(super) fn push_setup(&mut self, entry: SetupEntry<'a>) {
        self.setup.push(entry);
    }

    pub(super) fn pop_setup(&mut self) {
        self.setup.pop();
    }

    /// Emit the cleanup for leaving `entry` early. With `preserve_tos` the
    /// value on top of the stack survives the cleanup.
    pub(super) fn unwind_entry(&mut self, entry: &SetupEntry<'a>, preserve_tos: bool) -> CompileResult<()> {
        match entry {
            SetupEntry::WhileLoop { .. } | SetupEntry::ExceptionHandler => {}
            SetupEntry::ForLoop { .. } => {
                if preserve_tos {
                    self.emit_op(Opcode::RotTwo);
                }
                self.emit_op(Opcode::PopTop);
            }
            SetupEntry::TryExcept => self.emit_op(Opcode::PopBlock),
            SetupEntry::FinallyTry { body } => {
                self.emit_op(Opcode::PopBlock);
                if preserve_tos {
                    self.push_setup(SetupEntry::PopValue);
                }
                self.visit_body(body)?;
                if preserve_tos {
                    self.pop_setup();
                }
            }
            SetupEntry::FinallyEnd => {
                if preserve_tos {
                    self.emit_op(Opcode::RotFour);
                }
                self.emit_op(Opcode::PopTop);
                self.emit_op(Opcode::PopTop);
                self.emit_op(Opcode::PopTop);
                if preserve_tos {
                    self.emit_op(Opcode::RotFour);
                }
                self.emit_op(Opcode::PopExcept);
            }
            SetupEntry::With | SetupEntry::AsyncWith => {
                self.emit_op(Opcode::PopBlock);
                if preserve_tos {
                    self.emit_op(Opcode::RotTwo);
                }
                self.call_exit_with_nones();
                if matches!(entry, SetupEntry::AsyncWith) {
                    self.emit_await();
                }
                self.emit_op(Opcode::PopTop);
            }
            SetupEntry::HandlerCleanup { name } => {
                if name.is_some() {
                    self.emit_op(Opcode::PopBlock);
                }
                if preserve_tos {
                    self.emit_op(Opcode::RotFour);
                }
                self.emit_op(Opcode::PopExcept);
                if let Some(name) = name {
                    self.load_const(Constant::None);
                    self.store_name(None, name);
                    self.delete_name(name);
                }
            }
            SetupEntry::PopValue => {
                if preserve_tos {
                    self.emit_op(Opcode::RotTwo);
                }
                self.emit_op(Opcode::PopTop);
            }
        }
        Ok(())
    }

    /// Unwind entries from the top of the stack; with `stop_at_loop` the
    /// innermost loop is returned without being unwound. The stack itself is
    /// left as it was.
    pub(super) fn unwind_setup_stack(
        &mut self,
        preserve_tos: bool,
        stop_at_loop: bool,
    ) -> CompileResult<Option<SetupEntry<'a>>> {
        let Some(top) = self.setup.last().cloned() else {
            return Ok(None);
        };
        if stop_at_loop && top.is_loop() {
            return Ok(Some(top));
        }
        self.setup.pop();
        let unwound = self
            .unwind_entry(&top, preserve_tos)
            .and_then(|()| self.unwind_setup_stack(preserve_tos, stop_at_loop));
        self.setup.push(top);
        unwound
    }

    /// `__exit__(None, None, None)` with the exit method on the stack.
    pub(super) fn call_exit_with_nones(&mut self) {
        self.load_const(Constant::None);
        self.emit_op(Opcode::DupTop);
        self.emit_op(Opcode::DupTop);
        self.emit(Opcode::CallFunction, 3usize);
    }

    /// Await the value on top of the stack.
    pub(super) fn emit_await(&mut self) {
        self.emit_op(Opcode::GetAwaitable);
        self.load_const(Constant::None);
        self.emit_op(Opcode::YieldFrom);
    }
}
