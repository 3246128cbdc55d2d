//! Static Python Compiler
//!
//! AST optimizer and type-directed code generator. Drives the whole
//! pipeline from source text to code units:
//!
//! 1. parse ([`stpy_parser`])
//! 2. scan `from __future__` imports and fold constants
//! 3. build the scope tree
//! 4. declare, finish and bind the module ([`stpy_checker`]) when compiling
//!    statically
//! 5. generate one [`CodeUnit`] per scope
//!
//! # Usage
//!
//! ```ignore
//! use stpy_compiler::{compile, disassemble, CompileOptions};
//!
//! let options = CompileOptions::static_python();
//! let code = compile("def f() -> int: return 1\n", "app.py", "app", &options)?;
//! println!("{}", disassemble(&code));
//! ```
//!
//! Modules importing each other are compiled through one [`Compiler`] so
//! they share a symbol table.

#![warn(missing_docs)]

pub mod code_unit;
pub mod codegen;
pub mod config;
pub mod disasm;
pub mod error;
pub mod flow_graph;
pub mod opcodes;
pub mod optimizer;

pub use code_unit::{CodeHeader, CodeKind, CodeUnit, ConstValue};
pub use codegen::{generate_module, Context, Typing};
pub use config::{CompileOptions, Dialect};
pub use disasm::{disassemble, Disassembly};
pub use error::{CompileError, CompileResult, TypedSyntaxError};
pub use flow_graph::{Block, BlockGraph, BlockId, FlowGraph, Instr};
pub use opcodes::{CodeFlags, Opcode, Oparg};
pub use optimizer::optimize_module;

use std::rc::Rc;

use stpy_checker::{bind_module, build_scopes, scan_future_flags, CheckError, SymbolTable};
use stpy_parser::ast::Module;

/// Compiler for a set of modules sharing one symbol table.
pub struct Compiler {
    options: CompileOptions,
    symbols: SymbolTable,
}

impl Compiler {
    /// Compiler with validated options.
    pub fn new(options: CompileOptions) -> CompileResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            symbols: SymbolTable::new(),
        })
    }

    #[allow(missing_docs)]
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Symbol table of every module declared so far.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Make a module importable by the modules compiled afterwards. It is
    /// declared on first import.
    pub fn add_source(&mut self, module_name: &str, filename: &str, source: &str) -> CompileResult<()> {
        let tree = self.front_end(source, filename)?;
        self.symbols.add_module(module_name, filename, tree);
        Ok(())
    }

    /// Compile one module to its code unit.
    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn compile(&mut self, source: &str, filename: &str, module_name: &str) -> CompileResult<CodeUnit> {
        let tree = self.front_end(source, filename)?;
        let future = scan_future_flags(&tree).map_err(|err| self.check_error(err, filename, source))?;
        let scopes = build_scopes(
            &tree,
            future.annotations(),
            self.options.dialect.inline_comprehensions,
        )
        .map_err(|err| self.check_error(err, filename, source))?;

        if !self.options.static_types {
            let ctx = Context::new(module_name, filename, &scopes, &self.options, future).with_source(source);
            return generate_module(&tree, &ctx);
        }

        self.symbols.add_module(module_name, filename, tree);
        let bindings = self
            .declare_and_bind(module_name, &scopes)
            .map_err(|err| self.check_error(err, filename, source))?;
        let tree: Rc<Module> = self
            .symbols
            .source(module_name)
            .map(|registered| registered.tree.clone())
            .ok_or_else(|| CompileError::internal(format!("module {} lost its source", module_name)))?;

        let typing = Typing {
            symbols: &self.symbols,
            bindings: &bindings,
        };
        let ctx = Context::new(module_name, filename, &scopes, &self.options, future)
            .with_source(source)
            .with_typing(typing);
        generate_module(&tree, &ctx)
    }

    /// Parse and optimize.
    fn front_end(&self, source: &str, filename: &str) -> CompileResult<Module> {
        let tree = stpy_parser::parse_module(source)
            .map_err(|err| CompileError::Parse(TypedSyntaxError::from_syntax_error(&err, filename, source)))?;
        Ok(optimize_module(&tree, self.options.optimize))
    }

    fn declare_and_bind(
        &mut self,
        module_name: &str,
        scopes: &stpy_checker::ScopeTree,
    ) -> Result<stpy_checker::Bindings, CheckError> {
        self.symbols.declare_module(module_name)?;
        self.symbols.finish_bind()?;
        bind_module(&mut self.symbols, scopes, module_name, self.options.optimize)
    }

    /// Attribute a checker error to the module it was raised in.
    fn check_error(&self, err: CheckError, filename: &str, source: &str) -> CompileError {
        let origin = err
            .module()
            .and_then(|module| self.symbols.source(module))
            .map(|registered| registered.filename.clone());
        match origin {
            Some(other) if other != filename => CompileError::from_check_error(err, &other, None),
            _ => CompileError::from_check_error(err, filename, Some(source)),
        }
    }
}

/// Compile a single module with a fresh symbol table.
pub fn compile(source: &str, filename: &str, module_name: &str, options: &CompileOptions) -> CompileResult<CodeUnit> {
    Compiler::new(options.clone())?.compile(source, filename, module_name)
}
