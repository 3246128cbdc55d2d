//! Static Python Checker
//!
//! Scope analysis, module declarations and flow-sensitive type binding.
//!
//! This crate provides:
//! - Scope trees classifying every name (local, global, cell, free)
//! - A symbol table declaring modules on demand and resolving annotations
//! - Class hierarchy checks (MRO, overrides, finals, slots)
//! - Narrowing effects for `isinstance`, `is None` and truthiness tests
//! - A type binder recording the static value of every expression
//!
//! # Usage
//!
//! ```ignore
//! use stpy_checker::{bind_module, build_scopes, SymbolTable};
//!
//! let tree = stpy_parser::parse_module(source)?;
//! let scopes = build_scopes(&tree, false, false)?;
//!
//! let mut symbols = SymbolTable::new();
//! symbols.add_module("app", "app.py", tree);
//! symbols.declare_module("app")?;
//! symbols.finish_bind()?;
//!
//! let bindings = bind_module(&mut symbols, &scopes, "app", 0)?;
//! ```

#![warn(missing_docs)]

pub mod annotation;
pub mod binder;
pub mod declaration;
pub mod diagnostic;
pub mod error;
pub mod future;
pub mod module_table;
pub mod narrowing;
pub mod symbol_table;
pub mod symbols;

// Re-export main types
pub use annotation::Declared;
pub use binder::{
    bind_module, ArgEmitter, ArgSource, Bindings, CallBinding, CallTarget, FieldBinding, LenKind, Spill,
    TerminalKind, TEMP_PREFIX,
};
pub use diagnostic::{Diagnostic, ErrorCode};
pub use error::{CheckError, CheckResult};
pub use future::{scan_future_flags, FutureFlags};
pub use module_table::{ModulePhase, ModuleTable};
pub use narrowing::{LocalTypes, NarrowingEffect};
pub use symbol_table::{ModuleSource, SymbolTable};
pub use symbols::{build_scopes, NameScope, Scope, ScopeId, ScopeKind, ScopeTree};
