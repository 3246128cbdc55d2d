//! Instruction Set
//!
//! The opcode vocabulary emitted by the code generator, the operand forms
//! they carry and the code object flags.
//!
//! Opcodes are grouped as follows:
//! - Stack manipulation
//! - Unary, binary and in-place operators
//! - Names, attributes and subscripts
//! - Containers and unpacking
//! - Control flow and exception handling
//! - Functions, classes, calls and imports
//! - Static Python extensions (typed fields, invokes, primitives)

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use stpy_parser::ast::Constant;
use stpy_types::TypeDescr;

use crate::code_unit::ConstValue;
use crate::flow_graph::BlockId;

/// Instructions of the target virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation =====
    /// No operation; keeps a line number alive
    Nop,
    /// Discard TOS
    PopTop,
    /// Swap the two topmost items
    RotTwo,
    /// Move TOS down two places
    RotThree,
    /// Move TOS down three places
    RotFour,
    /// Duplicate TOS
    DupTop,
    /// Duplicate the two topmost items
    DupTopTwo,

    // ===== Unary Operators =====
    /// `+x`
    UnaryPositive,
    /// `-x`
    UnaryNegative,
    /// `not x`
    UnaryNot,
    /// `~x`
    UnaryInvert,

    // ===== Binary Operators =====
    /// `a ** b`
    BinaryPower,
    /// `a * b`
    BinaryMultiply,
    /// `a @ b`
    BinaryMatrixMultiply,
    /// `a // b`
    BinaryFloorDivide,
    /// `a / b`
    BinaryTrueDivide,
    /// `a % b`
    BinaryModulo,
    /// `a + b`
    BinaryAdd,
    /// `a - b`
    BinarySubtract,
    /// `a[b]`
    BinarySubscr,
    /// `a << b`
    BinaryLshift,
    /// `a >> b`
    BinaryRshift,
    /// `a & b`
    BinaryAnd,
    /// `a ^ b`
    BinaryXor,
    /// `a | b`
    BinaryOr,

    // ===== In-place Operators =====
    /// `a **= b`
    InplacePower,
    /// `a *= b`
    InplaceMultiply,
    /// `a @= b`
    InplaceMatrixMultiply,
    /// `a //= b`
    InplaceFloorDivide,
    /// `a /= b`
    InplaceTrueDivide,
    /// `a %= b`
    InplaceModulo,
    /// `a += b`
    InplaceAdd,
    /// `a -= b`
    InplaceSubtract,
    /// `a <<= b`
    InplaceLshift,
    /// `a >>= b`
    InplaceRshift,
    /// `a &= b`
    InplaceAnd,
    /// `a ^= b`
    InplaceXor,
    /// `a |= b`
    InplaceOr,

    // ===== Names, Attributes and Subscripts =====
    /// Push a constant (operand: constant)
    LoadConst,
    /// Load a name from locals, globals then builtins (operand: name)
    LoadName,
    /// Store TOS into the locals mapping (operand: name)
    StoreName,
    /// Delete from the locals mapping (operand: name)
    DeleteName,
    /// Load a global or builtin (operand: name)
    LoadGlobal,
    /// Store a global (operand: name)
    StoreGlobal,
    /// Delete a global (operand: name)
    DeleteGlobal,
    /// Load a fast local (operand: name)
    LoadFast,
    /// Store a fast local (operand: name)
    StoreFast,
    /// Delete a fast local (operand: name)
    DeleteFast,
    /// Push the cell itself, for building closures (operand: name)
    LoadClosure,
    /// Load through a cell (operand: name)
    LoadDeref,
    /// Store through a cell (operand: name)
    StoreDeref,
    /// Empty a cell (operand: name)
    DeleteDeref,
    /// Load a free name in a class body, locals first (operand: name)
    LoadClassderef,
    /// `TOS.name` (operand: name)
    LoadAttr,
    /// `TOS.name = TOS1` (operand: name)
    StoreAttr,
    /// `del TOS.name` (operand: name)
    DeleteAttr,
    /// `TOS1[TOS] = TOS2`
    StoreSubscr,
    /// `del TOS1[TOS]`
    DeleteSubscr,
    /// Push `AssertionError`
    LoadAssertionError,
    /// Create `__annotations__` in the locals mapping
    SetupAnnotations,

    // ===== Containers and Unpacking =====
    /// Build a tuple from the top n items (operand: count)
    BuildTuple,
    /// Build a list from the top n items (operand: count)
    BuildList,
    /// Build a set from the top n items (operand: count)
    BuildSet,
    /// Build a dict from n key/value pairs (operand: count)
    BuildMap,
    /// Build a dict from n values and a tuple of keys (operand: count)
    BuildConstKeyMap,
    /// Build a slice from two or three items (operand: count)
    BuildSlice,
    /// Append TOS to the list n items down (operand: depth)
    ListAppend,
    /// Add TOS to the set n items down (operand: depth)
    SetAdd,
    /// Insert TOS1: TOS into the dict n items down (operand: depth)
    MapAdd,
    /// Extend the list n items down with TOS (operand: depth)
    ListExtend,
    /// Update the set n items down with TOS (operand: depth)
    SetUpdate,
    /// Update the dict n items down with TOS (operand: depth)
    DictUpdate,
    /// Merge TOS into the dict n items down, rejecting duplicates (operand: depth)
    DictMerge,
    /// Replace the list TOS with an equal tuple
    ListToTuple,
    /// Unpack TOS into exactly n items (operand: count)
    UnpackSequence,
    /// Unpack TOS around a starred target (operand: before | after << 8)
    UnpackEx,

    // ===== Comparisons =====
    /// Rich comparison (operand: comparison index)
    CompareOp,
    /// `is` / `is not` (operand: invert)
    IsOp,
    /// `in` / `not in` (operand: invert)
    ContainsOp,

    // ===== Control Flow =====
    /// Relative jump forward (operand: block)
    JumpForward,
    /// Absolute jump (operand: block)
    JumpAbsolute,
    /// Jump if TOS is false, otherwise pop (operand: block)
    JumpIfFalseOrPop,
    /// Jump if TOS is true, otherwise pop (operand: block)
    JumpIfTrueOrPop,
    /// Pop TOS and jump if it is false (operand: block)
    PopJumpIfFalse,
    /// Pop TOS and jump if it is true (operand: block)
    PopJumpIfTrue,
    /// Jump unless TOS1 matches the exception class TOS (operand: block)
    JumpIfNotExcMatch,
    /// Advance the iterator at TOS or jump when exhausted (operand: block)
    ForIter,
    /// Replace TOS with `iter(TOS)`
    GetIter,
    /// `iter(TOS)` for `yield from`
    GetYieldFromIter,
    /// Return TOS to the caller
    ReturnValue,
    /// Yield TOS
    YieldValue,
    /// Delegate to the iterator at TOS1
    YieldFrom,
    /// First instruction of a generator body (operand: kind)
    GenStart,

    // ===== Exception Handling =====
    /// Push a handler block (operand: handler block)
    SetupFinally,
    /// Pop the innermost handler block
    PopBlock,
    /// Pop the exception state of a handled exception
    PopExcept,
    /// Re-raise the exception on the stack (operand: restore lasti)
    Reraise,
    /// Raise with 0 to 2 arguments (operand: count)
    RaiseVarargs,
    /// Enter a context manager (operand: cleanup block)
    SetupWith,
    /// Call `__exit__` with the active exception
    WithExceptStart,

    // ===== Async =====
    /// Replace TOS with an awaitable
    GetAwaitable,
    /// `aiter(TOS)`
    GetAiter,
    /// Push `anext(TOS)`
    GetAnext,
    /// End an `async for` on `StopAsyncIteration`
    EndAsyncFor,
    /// Resolve `__aenter__` and `__aexit__`
    BeforeAsyncWith,
    /// Enter an async context manager (operand: cleanup block)
    SetupAsyncWith,

    // ===== Functions, Classes and Calls =====
    /// Build a function from a code object and qualname (operand: flags)
    MakeFunction,
    /// Push `__build_class__`
    LoadBuildClass,
    /// Call with n positional arguments (operand: count)
    CallFunction,
    /// Call with n arguments, the last ones named by TOS (operand: count)
    CallFunctionKw,
    /// Call with an argument tuple and optional mapping (operand: has mapping)
    CallFunctionEx,
    /// Push an unbound method and receiver, or NULL and the attribute (operand: name)
    LoadMethod,
    /// Call a method loaded with `LOAD_METHOD` (operand: count)
    CallMethod,
    /// Prefix carrying high operand bits (operand: value)
    ExtendedArg,

    // ===== Imports =====
    /// `__import__` with level and fromlist (operand: module name)
    ImportName,
    /// Load an attribute from the module at TOS (operand: name)
    ImportFrom,
    /// Bind every public name of the module at TOS
    ImportStar,

    // ===== Static Python =====
    /// Call a function directly (operand: descriptor, argument count)
    InvokeFunction,
    /// Call a method through the vtable (operand: descriptor, argument count)
    InvokeMethod,
    /// Read a typed slot (operand: field descriptor)
    LoadField,
    /// Write a typed slot (operand: field descriptor)
    StoreField,
    /// Checked downcast of TOS (operand: type descriptor)
    Cast,
    /// Verify argument types on entry (operand: index/descriptor pairs)
    CheckArgs,
    /// Load a primitive local (operand: name, descriptor)
    LoadLocal,
    /// Store a primitive local (operand: name, descriptor)
    StoreLocal,
    /// Push a primitive constant (operand: value, type tag)
    PrimitiveLoadConst,
    /// Box a primitive (operand: type tag)
    PrimitiveBox,
    /// Unbox to a primitive (operand: type tag)
    PrimitiveUnbox,
    /// Primitive arithmetic (operand: operation code)
    PrimitiveBinaryOp,
    /// Primitive unary operator (operand: operation code)
    PrimitiveUnaryOp,
    /// Primitive comparison producing a cbool (operand: operation code)
    PrimitiveCompareOp,
    /// Convert between primitives (operand: from << 4 | to)
    ConvertPrimitive,
    /// Return a primitive (operand: type tag)
    ReturnPrimitive,
    /// Pop a primitive and jump if it is zero (operand: block)
    PopJumpIfZero,
    /// Pop a primitive and jump if it is non-zero (operand: block)
    PopJumpIfNonzero,
    /// Jump if the primitive TOS is zero, otherwise pop (operand: block)
    JumpIfZeroOrPop,
    /// Jump if the primitive TOS is non-zero, otherwise pop (operand: block)
    JumpIfNonzeroOrPop,
    /// Length of a builtin container as int64 (operand: kind | inexact bit)
    FastLen,
    /// Unchecked indexed read of a sequence (operand: sequence kind)
    SequenceGet,
    /// Unchecked indexed write of a sequence (operand: sequence kind)
    SequenceSet,
    /// Pull the nth item out of the starred tuple at TOS (operand: index)
    LoadIterableArg,
    /// Look a parameter up in a `**` mapping (operand: 2, or 3 with default)
    LoadMappingArg,
}

impl Opcode {
    /// Mnemonic used by the disassembler
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::PopTop => "POP_TOP",
            Self::RotTwo => "ROT_TWO",
            Self::RotThree => "ROT_THREE",
            Self::RotFour => "ROT_FOUR",
            Self::DupTop => "DUP_TOP",
            Self::DupTopTwo => "DUP_TOP_TWO",
            Self::UnaryPositive => "UNARY_POSITIVE",
            Self::UnaryNegative => "UNARY_NEGATIVE",
            Self::UnaryNot => "UNARY_NOT",
            Self::UnaryInvert => "UNARY_INVERT",
            Self::BinaryPower => "BINARY_POWER",
            Self::BinaryMultiply => "BINARY_MULTIPLY",
            Self::BinaryMatrixMultiply => "BINARY_MATRIX_MULTIPLY",
            Self::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Self::BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Self::BinaryModulo => "BINARY_MODULO",
            Self::BinaryAdd => "BINARY_ADD",
            Self::BinarySubtract => "BINARY_SUBTRACT",
            Self::BinarySubscr => "BINARY_SUBSCR",
            Self::BinaryLshift => "BINARY_LSHIFT",
            Self::BinaryRshift => "BINARY_RSHIFT",
            Self::BinaryAnd => "BINARY_AND",
            Self::BinaryXor => "BINARY_XOR",
            Self::BinaryOr => "BINARY_OR",
            Self::InplacePower => "INPLACE_POWER",
            Self::InplaceMultiply => "INPLACE_MULTIPLY",
            Self::InplaceMatrixMultiply => "INPLACE_MATRIX_MULTIPLY",
            Self::InplaceFloorDivide => "INPLACE_FLOOR_DIVIDE",
            Self::InplaceTrueDivide => "INPLACE_TRUE_DIVIDE",
            Self::InplaceModulo => "INPLACE_MODULO",
            Self::InplaceAdd => "INPLACE_ADD",
            Self::InplaceSubtract => "INPLACE_SUBTRACT",
            Self::InplaceLshift => "INPLACE_LSHIFT",
            Self::InplaceRshift => "INPLACE_RSHIFT",
            Self::InplaceAnd => "INPLACE_AND",
            Self::InplaceXor => "INPLACE_XOR",
            Self::InplaceOr => "INPLACE_OR",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadName => "LOAD_NAME",
            Self::StoreName => "STORE_NAME",
            Self::DeleteName => "DELETE_NAME",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::DeleteGlobal => "DELETE_GLOBAL",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::DeleteFast => "DELETE_FAST",
            Self::LoadClosure => "LOAD_CLOSURE",
            Self::LoadDeref => "LOAD_DEREF",
            Self::StoreDeref => "STORE_DEREF",
            Self::DeleteDeref => "DELETE_DEREF",
            Self::LoadClassderef => "LOAD_CLASSDEREF",
            Self::LoadAttr => "LOAD_ATTR",
            Self::StoreAttr => "STORE_ATTR",
            Self::DeleteAttr => "DELETE_ATTR",
            Self::StoreSubscr => "STORE_SUBSCR",
            Self::DeleteSubscr => "DELETE_SUBSCR",
            Self::LoadAssertionError => "LOAD_ASSERTION_ERROR",
            Self::SetupAnnotations => "SETUP_ANNOTATIONS",
            Self::BuildTuple => "BUILD_TUPLE",
            Self::BuildList => "BUILD_LIST",
            Self::BuildSet => "BUILD_SET",
            Self::BuildMap => "BUILD_MAP",
            Self::BuildConstKeyMap => "BUILD_CONST_KEY_MAP",
            Self::BuildSlice => "BUILD_SLICE",
            Self::ListAppend => "LIST_APPEND",
            Self::SetAdd => "SET_ADD",
            Self::MapAdd => "MAP_ADD",
            Self::ListExtend => "LIST_EXTEND",
            Self::SetUpdate => "SET_UPDATE",
            Self::DictUpdate => "DICT_UPDATE",
            Self::DictMerge => "DICT_MERGE",
            Self::ListToTuple => "LIST_TO_TUPLE",
            Self::UnpackSequence => "UNPACK_SEQUENCE",
            Self::UnpackEx => "UNPACK_EX",
            Self::CompareOp => "COMPARE_OP",
            Self::IsOp => "IS_OP",
            Self::ContainsOp => "CONTAINS_OP",
            Self::JumpForward => "JUMP_FORWARD",
            Self::JumpAbsolute => "JUMP_ABSOLUTE",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Self::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Self::JumpIfNotExcMatch => "JUMP_IF_NOT_EXC_MATCH",
            Self::ForIter => "FOR_ITER",
            Self::GetIter => "GET_ITER",
            Self::GetYieldFromIter => "GET_YIELD_FROM_ITER",
            Self::ReturnValue => "RETURN_VALUE",
            Self::YieldValue => "YIELD_VALUE",
            Self::YieldFrom => "YIELD_FROM",
            Self::GenStart => "GEN_START",
            Self::SetupFinally => "SETUP_FINALLY",
            Self::PopBlock => "POP_BLOCK",
            Self::PopExcept => "POP_EXCEPT",
            Self::Reraise => "RERAISE",
            Self::RaiseVarargs => "RAISE_VARARGS",
            Self::SetupWith => "SETUP_WITH",
            Self::WithExceptStart => "WITH_EXCEPT_START",
            Self::GetAwaitable => "GET_AWAITABLE",
            Self::GetAiter => "GET_AITER",
            Self::GetAnext => "GET_ANEXT",
            Self::EndAsyncFor => "END_ASYNC_FOR",
            Self::BeforeAsyncWith => "BEFORE_ASYNC_WITH",
            Self::SetupAsyncWith => "SETUP_ASYNC_WITH",
            Self::MakeFunction => "MAKE_FUNCTION",
            Self::LoadBuildClass => "LOAD_BUILD_CLASS",
            Self::CallFunction => "CALL_FUNCTION",
            Self::CallFunctionKw => "CALL_FUNCTION_KW",
            Self::CallFunctionEx => "CALL_FUNCTION_EX",
            Self::LoadMethod => "LOAD_METHOD",
            Self::CallMethod => "CALL_METHOD",
            Self::ExtendedArg => "EXTENDED_ARG",
            Self::ImportName => "IMPORT_NAME",
            Self::ImportFrom => "IMPORT_FROM",
            Self::ImportStar => "IMPORT_STAR",
            Self::InvokeFunction => "INVOKE_FUNCTION",
            Self::InvokeMethod => "INVOKE_METHOD",
            Self::LoadField => "LOAD_FIELD",
            Self::StoreField => "STORE_FIELD",
            Self::Cast => "CAST",
            Self::CheckArgs => "CHECK_ARGS",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::PrimitiveLoadConst => "PRIMITIVE_LOAD_CONST",
            Self::PrimitiveBox => "PRIMITIVE_BOX",
            Self::PrimitiveUnbox => "PRIMITIVE_UNBOX",
            Self::PrimitiveBinaryOp => "PRIMITIVE_BINARY_OP",
            Self::PrimitiveUnaryOp => "PRIMITIVE_UNARY_OP",
            Self::PrimitiveCompareOp => "PRIMITIVE_COMPARE_OP",
            Self::ConvertPrimitive => "CONVERT_PRIMITIVE",
            Self::ReturnPrimitive => "RETURN_PRIMITIVE",
            Self::PopJumpIfZero => "POP_JUMP_IF_ZERO",
            Self::PopJumpIfNonzero => "POP_JUMP_IF_NONZERO",
            Self::JumpIfZeroOrPop => "JUMP_IF_ZERO_OR_POP",
            Self::JumpIfNonzeroOrPop => "JUMP_IF_NONZERO_OR_POP",
            Self::FastLen => "FAST_LEN",
            Self::SequenceGet => "SEQUENCE_GET",
            Self::SequenceSet => "SEQUENCE_SET",
            Self::LoadIterableArg => "LOAD_ITERABLE_ARG",
            Self::LoadMappingArg => "LOAD_MAPPING_ARG",
        }
    }

    /// Check if this opcode transfers control to a block operand
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpAbsolute
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfNotExcMatch
                | Self::ForIter
                | Self::PopJumpIfZero
                | Self::PopJumpIfNonzero
                | Self::JumpIfZeroOrPop
                | Self::JumpIfNonzeroOrPop
                | Self::SetupFinally
                | Self::SetupWith
                | Self::SetupAsyncWith
        )
    }

    /// Check if this opcode returns from the frame
    pub fn is_return(self) -> bool {
        matches!(self, Self::ReturnValue | Self::ReturnPrimitive)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return() || matches!(self, Self::JumpForward | Self::JumpAbsolute | Self::RaiseVarargs | Self::Reraise)
    }

    /// Check if this opcode only exists in statically compiled code
    pub fn is_static(self) -> bool {
        matches!(
            self,
            Self::InvokeFunction
                | Self::InvokeMethod
                | Self::LoadField
                | Self::StoreField
                | Self::Cast
                | Self::CheckArgs
                | Self::LoadLocal
                | Self::StoreLocal
                | Self::PrimitiveLoadConst
                | Self::PrimitiveBox
                | Self::PrimitiveUnbox
                | Self::PrimitiveBinaryOp
                | Self::PrimitiveUnaryOp
                | Self::PrimitiveCompareOp
                | Self::ConvertPrimitive
                | Self::ReturnPrimitive
                | Self::PopJumpIfZero
                | Self::PopJumpIfNonzero
                | Self::JumpIfZeroOrPop
                | Self::JumpIfNonzeroOrPop
                | Self::FastLen
                | Self::SequenceGet
                | Self::SequenceSet
                | Self::LoadIterableArg
                | Self::LoadMappingArg
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Operands
// ============================================================================

/// Operand of an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Oparg {
    /// No operand
    None,
    /// Plain integer (counts, flags, operation codes)
    Int(i64),
    /// Name of a local, global, attribute or module
    Name(String),
    /// Constant pool entry
    Const(ConstValue),
    /// Jump target
    Block(BlockId),
    /// Type or field descriptor
    Descr(TypeDescr),
    /// Invoke target and argument count
    Invoke(TypeDescr, usize),
    /// Primitive constant and its type tag
    Prim(Constant, u32),
    /// Primitive local and its type
    Local(String, TypeDescr),
    /// Argument index and expected type for every checked parameter;
    /// parameters living in cells use `-(cell index + 1)`
    CheckArgs(Vec<(i64, TypeDescr)>),
}

impl Oparg {
    /// Jump target, if this is a block operand
    pub fn block(&self) -> Option<BlockId> {
        match self {
            Oparg::Block(block) => Some(*block),
            _ => None,
        }
    }

    /// Integer value, if this is an integer operand
    pub fn int(&self) -> Option<i64> {
        match self {
            Oparg::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for Oparg {
    fn from(value: i64) -> Self {
        Oparg::Int(value)
    }
}

impl From<u32> for Oparg {
    fn from(value: u32) -> Self {
        Oparg::Int(i64::from(value))
    }
}

impl From<usize> for Oparg {
    fn from(value: usize) -> Self {
        Oparg::Int(value as i64)
    }
}

impl From<&str> for Oparg {
    fn from(value: &str) -> Self {
        Oparg::Name(value.to_string())
    }
}

impl From<String> for Oparg {
    fn from(value: String) -> Self {
        Oparg::Name(value)
    }
}

impl From<BlockId> for Oparg {
    fn from(block: BlockId) -> Self {
        Oparg::Block(block)
    }
}

impl From<Constant> for Oparg {
    fn from(value: Constant) -> Self {
        Oparg::Const(ConstValue::Constant(value))
    }
}

impl From<TypeDescr> for Oparg {
    fn from(descr: TypeDescr) -> Self {
        Oparg::Descr(descr)
    }
}

impl fmt::Display for Oparg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oparg::None => Ok(()),
            Oparg::Int(value) => write!(f, "{}", value),
            Oparg::Name(name) => f.write_str(name),
            Oparg::Const(value) => write!(f, "{}", value),
            Oparg::Block(block) => write!(f, "{}", block),
            Oparg::Descr(descr) => write!(f, "{}", descr),
            Oparg::Invoke(descr, nargs) => write!(f, "({}, {})", descr, nargs),
            Oparg::Prim(value, tag) => write!(f, "({}, {})", value, tag),
            Oparg::Local(name, descr) => write!(f, "({}, {})", name, descr),
            Oparg::CheckArgs(pairs) => {
                write!(f, "(")?;
                for (i, (index, descr)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}, {}", index, descr)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ============================================================================
// Operation Codes
// ============================================================================

/// `COMPARE_OP` operands, indexed like the comparison table of the VM
pub mod compare {
    #![allow(missing_docs)]
    pub const LT: i64 = 0;
    pub const LE: i64 = 1;
    pub const EQ: i64 = 2;
    pub const NE: i64 = 3;
    pub const GT: i64 = 4;
    pub const GE: i64 = 5;
}

/// `PRIMITIVE_BINARY_OP` operands
pub mod prim_binary {
    #![allow(missing_docs)]
    pub const ADD: i64 = 0;
    pub const SUBTRACT: i64 = 1;
    pub const MULTIPLY: i64 = 2;
    pub const DIVIDE: i64 = 3;
    pub const DIVIDE_UN: i64 = 4;
    pub const MODULO: i64 = 5;
    pub const MODULO_UN: i64 = 6;
    pub const POWER: i64 = 7;
    pub const LSHIFT: i64 = 8;
    pub const RSHIFT: i64 = 9;
    pub const RSHIFT_UN: i64 = 10;
    pub const XOR: i64 = 11;
    pub const OR: i64 = 12;
    pub const AND: i64 = 13;
    pub const ADD_DBL: i64 = 14;
    pub const SUBTRACT_DBL: i64 = 15;
    pub const MULTIPLY_DBL: i64 = 16;
    pub const DIVIDE_DBL: i64 = 17;
    pub const MODULO_DBL: i64 = 18;
    pub const POWER_DBL: i64 = 19;
    pub const POWER_UN: i64 = 20;
}

/// `PRIMITIVE_COMPARE_OP` operands
pub mod prim_compare {
    #![allow(missing_docs)]
    pub const EQ: i64 = 0;
    pub const NE: i64 = 1;
    pub const LT: i64 = 2;
    pub const LE: i64 = 3;
    pub const GT: i64 = 4;
    pub const GE: i64 = 5;
    pub const LT_UN: i64 = 6;
    pub const LE_UN: i64 = 7;
    pub const GT_UN: i64 = 8;
    pub const GE_UN: i64 = 9;
    pub const EQ_DBL: i64 = 10;
    pub const NE_DBL: i64 = 11;
    pub const LT_DBL: i64 = 12;
    pub const LE_DBL: i64 = 13;
    pub const GT_DBL: i64 = 14;
    pub const GE_DBL: i64 = 15;
}

/// `PRIMITIVE_UNARY_OP` operands
pub mod prim_unary {
    #![allow(missing_docs)]
    pub const NEG: i64 = 0;
    pub const INV: i64 = 1;
    pub const NEG_DBL: i64 = 2;
    pub const NOT: i64 = 3;
}

/// `SEQUENCE_GET` / `SEQUENCE_SET` operands
pub mod sequence {
    #![allow(missing_docs)]
    use stpy_types::PrimKind;

    pub const LIST: i64 = 0;
    pub const TUPLE: i64 = 1;
    pub const UNCHECKED: i64 = 1 << 3;
    /// Typed arrays keep their element tag in the high nibble
    pub const ARRAY: i64 = 0x80;

    /// Operand for an array of `kind` elements.
    pub fn array(kind: PrimKind) -> i64 {
        ARRAY | (i64::from(kind.type_code()) << 4)
    }
}

/// `FAST_LEN` flag for receivers that may be subclasses
pub const FAST_LEN_INEXACT: i64 = 1 << 4;

/// `MAKE_FUNCTION` operand bits
pub mod make_function {
    #![allow(missing_docs)]
    pub const DEFAULTS: i64 = 0x01;
    pub const KW_DEFAULTS: i64 = 0x02;
    pub const ANNOTATIONS: i64 = 0x04;
    pub const CLOSURE: i64 = 0x08;
}

/// `GEN_START` operands
pub mod gen_start {
    #![allow(missing_docs)]
    pub const GENERATOR: i64 = 0;
    pub const COROUTINE: i64 = 1;
    pub const ASYNC_GENERATOR: i64 = 2;
}

// ============================================================================
// Code Flags
// ============================================================================

/// Flags of a code object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(pub u32);

impl CodeFlags {
    /// Locals live in fast slots
    pub const OPTIMIZED: CodeFlags = CodeFlags(0x0001);
    /// A new locals dict is created per call
    pub const NEWLOCALS: CodeFlags = CodeFlags(0x0002);
    /// Accepts `*args`
    pub const VARARGS: CodeFlags = CodeFlags(0x0004);
    /// Accepts `**kwargs`
    pub const VARKEYWORDS: CodeFlags = CodeFlags(0x0008);
    /// Defined inside another function
    pub const NESTED: CodeFlags = CodeFlags(0x0010);
    /// Generator function
    pub const GENERATOR: CodeFlags = CodeFlags(0x0020);
    /// No free or cell variables
    pub const NOFREE: CodeFlags = CodeFlags(0x0040);
    /// `async def`
    pub const COROUTINE: CodeFlags = CodeFlags(0x0080);
    /// Async generator function
    pub const ASYNC_GENERATOR: CodeFlags = CodeFlags(0x0200);
    /// `from __future__ import barry_as_FLUFL`
    pub const FUTURE_BARRY_AS_BDFL: CodeFlags = CodeFlags(0x40_0000);
    /// Compiled by the static compiler
    pub const STATICALLY_COMPILED: CodeFlags = CodeFlags(0x400_0000);
    /// `from __future__ import annotations`
    pub const FUTURE_ANNOTATIONS: CodeFlags = CodeFlags(0x100_0000);
    /// `from __future__ import eager_imports`
    pub const FUTURE_EAGER_IMPORTS: CodeFlags = CodeFlags(0x800_0000);

    /// No flags
    pub const fn empty() -> Self {
        CodeFlags(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: CodeFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: CodeFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for CodeFlags {
    type Output = CodeFlags;

    fn bitor(self, rhs: CodeFlags) -> CodeFlags {
        CodeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: CodeFlags) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::LoadConst.name(), "LOAD_CONST");
        assert_eq!(Opcode::PrimitiveLoadConst.name(), "PRIMITIVE_LOAD_CONST");
        assert_eq!(Opcode::LoadClassderef.name(), "LOAD_CLASSDEREF");
        assert_eq!(Opcode::InvokeMethod.to_string(), "INVOKE_METHOD");
    }

    #[test]
    fn test_opcode_classification() {
        assert!(Opcode::PopJumpIfZero.is_jump());
        assert!(Opcode::PopJumpIfZero.is_static());
        assert!(!Opcode::PopJumpIfZero.is_terminator());
        assert!(Opcode::ReturnPrimitive.is_terminator());
        assert!(Opcode::JumpAbsolute.is_terminator());
        assert!(!Opcode::CallFunction.is_jump());
    }

    #[test]
    fn test_code_flags() {
        let mut flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        assert_eq!(flags.bits(), 0x3);
        flags |= CodeFlags::GENERATOR;
        assert!(flags.contains(CodeFlags::GENERATOR));
        flags.remove(CodeFlags::GENERATOR);
        assert!(!flags.contains(CodeFlags::GENERATOR));
    }

    #[test]
    fn test_oparg_display() {
        let descr = TypeDescr::new(["m", "f"]);
        assert_eq!(Oparg::Invoke(descr, 2).to_string(), "(('m', 'f'), 2)");
        assert_eq!(Oparg::Prim(Constant::Int(0), 7).to_string(), "(0, 7)");
        assert_eq!(Oparg::Int(3).to_string(), "3");
    }
}
