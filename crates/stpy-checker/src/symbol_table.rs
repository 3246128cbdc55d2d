//! Symbol table for one compilation
//!
//! Owns the [`TypeUniverse`] and one [`ModuleTable`] per module. Source
//! modules are registered up front and declared on demand, the first time
//! they are compiled or imported. Once every reachable module is declared,
//! [`SymbolTable::finish_bind`] resolves annotations, bases and finals.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use stpy_parser::ast::Module;
use stpy_types::{BuiltinFunction, Decorator, PrimKind, SpecialForm, TypeUniverse, Value};

use crate::declaration::DeclarationVisitor;
use crate::error::{CheckError, CheckResult};
use crate::module_table::{ModulePhase, ModuleTable};

/// Source of a module registered with the symbol table.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    /// File name used in errors
    pub filename: String,
    /// Parsed tree
    pub tree: Rc<Module>,
}

/// Every module and type known to one compilation.
#[derive(Debug)]
pub struct SymbolTable {
    /// Classes and functions of the compilation
    pub universe: TypeUniverse,
    pub(crate) modules: FxHashMap<String, ModuleTable>,
    sources: FxHashMap<String, ModuleSource>,
    /// Source modules in the order their declaration finished
    pub(crate) declared: Vec<String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A symbol table with the `builtins`, `typing` and `__static__` modules.
    pub fn new() -> Self {
        let universe = TypeUniverse::new();
        let mut modules = FxHashMap::default();
        for table in builtin_modules(&universe) {
            modules.insert(table.name.clone(), table);
        }
        SymbolTable {
            universe,
            modules,
            sources: FxHashMap::default(),
            declared: Vec::new(),
        }
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Register the source of a module. Nothing is declared yet.
    pub fn add_module(&mut self, name: impl Into<String>, filename: impl Into<String>, tree: Module) {
        let name = name.into();
        tracing::trace!(module = %name, "registered module source");
        self.sources.insert(
            name,
            ModuleSource {
                filename: filename.into(),
                tree: Rc::new(tree),
            },
        );
    }

    /// Source of a registered module.
    pub fn source(&self, name: &str) -> Option<&ModuleSource> {
        self.sources.get(name)
    }

    /// Whether a module is known, either registered or builtin.
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name) || self.sources.contains_key(name)
    }

    /// Table of a declared module.
    pub fn module(&self, name: &str) -> Option<&ModuleTable> {
        self.modules.get(name)
    }

    #[allow(missing_docs)]
    pub fn module_mut(&mut self, name: &str) -> Option<&mut ModuleTable> {
        self.modules.get_mut(name)
    }

    /// The `builtins` table.
    pub fn builtins(&self) -> Option<&ModuleTable> {
        self.modules.get("builtins")
    }

    /// Declare a registered module and return its table.
    ///
    /// Declaring a module that is already declared (or still being declared
    /// further up an import cycle) returns the existing table untouched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn declare_module(&mut self, name: &str) -> CheckResult<&ModuleTable> {
        if !self.modules.contains_key(name) {
            let source = self
                .sources
                .get(name)
                .cloned()
                .ok_or_else(|| CheckError::internal(format!("module {} was never added", name)))?;
            self.modules
                .insert(name.to_string(), ModuleTable::new(name, source.filename.clone()));
            DeclarationVisitor::new(self, name).collect(&source.tree)?;
            if let Some(table) = self.modules.get_mut(name) {
                table.phase = ModulePhase::Declared;
            }
            self.declared.push(name.to_string());
            tracing::debug!(module = name, "declared module");
        }
        self.modules
            .get(name)
            .ok_or_else(|| CheckError::internal(format!("module {} vanished while declaring", name)))
    }

    /// Declare a module on behalf of an importer. Unknown modules are not an
    /// error; the importer treats them as dynamic.
    pub fn import_module(&mut self, name: &str) -> CheckResult<bool> {
        if self.modules.contains_key(name) {
            return Ok(true);
        }
        if !self.sources.contains_key(name) {
            tracing::trace!(module = name, "import of unknown module");
            return Ok(false);
        }
        self.declare_module(name)?;
        Ok(true)
    }

    // ========================================================================
    // Name Lookup
    // ========================================================================

    /// Value of a module-level name, falling back to builtins.
    pub fn resolve_name(&self, module: &str, name: &str) -> Option<&Value> {
        self.modules
            .get(module)
            .and_then(|table| table.get(name))
            .or_else(|| self.builtins().and_then(|table| table.get(name)))
    }

    /// Value of a dotted name (`a`, `m.C`, `typing.Final`) in a module.
    pub fn lookup_expr(&self, module: &str, expr: &stpy_parser::ast::Expr) -> Option<Value> {
        use stpy_parser::ast::ExprKind;
        match &expr.kind {
            ExprKind::Name { id, .. } => self.resolve_name(module, id).cloned(),
            ExprKind::Attribute { value, attr, .. } => match self.lookup_expr(module, value)? {
                Value::Module(name) => {
                    let child = self.modules.get(&name).and_then(|table| table.get(attr));
                    match child {
                        Some(value) => Some(value.clone()),
                        None => {
                            let submodule = format!("{}.{}", name, attr);
                            self.has_module(&submodule).then_some(Value::Module(submodule))
                        }
                    }
                }
                Value::Dynamic => Some(Value::Dynamic),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Tables of the modules the compiler knows without source.
fn builtin_modules(universe: &TypeUniverse) -> Vec<ModuleTable> {
    let b = &universe.builtins;
    let entry = |name: &str, value: Value| (name.to_string(), value);

    let mut builtins = vec![
        entry("object", Value::Class(b.object)),
        entry("type", Value::Class(b.type_)),
        entry("int", Value::Class(b.exact_int)),
        entry("bool", Value::Class(b.bool_)),
        entry("float", Value::Class(b.exact_float)),
        entry("complex", Value::Class(b.exact_complex)),
        entry("str", Value::Class(b.exact_str)),
        entry("bytes", Value::Class(b.bytes)),
        entry("list", Value::Class(b.exact_list)),
        entry("tuple", Value::Class(b.exact_tuple)),
        entry("dict", Value::Class(b.dict)),
        entry("set", Value::Class(b.exact_set)),
        entry("frozenset", Value::Class(b.frozenset)),
        entry("len", Value::Builtin(BuiltinFunction::Len)),
        entry("isinstance", Value::Builtin(BuiltinFunction::IsInstance)),
        entry("issubclass", Value::Builtin(BuiltinFunction::IsSubclass)),
        entry("sorted", Value::Builtin(BuiltinFunction::Sorted)),
        entry("super", Value::Builtin(BuiltinFunction::Super)),
        entry("reveal_type", Value::Builtin(BuiltinFunction::RevealType)),
        entry("staticmethod", Value::Decorator(Decorator::StaticMethod)),
    ];
    builtins.extend(
        b.exceptions
            .iter()
            .map(|(name, id)| entry(name, Value::Class(*id))),
    );

    let typing = vec![
        entry("Final", Value::SpecialForm(SpecialForm::Final)),
        entry("ClassVar", Value::SpecialForm(SpecialForm::ClassVar)),
        entry("Optional", Value::SpecialForm(SpecialForm::Optional)),
        entry("Union", Value::SpecialForm(SpecialForm::Union)),
        entry("final", Value::Decorator(Decorator::Final)),
        entry("TYPE_CHECKING", Value::Instance(b.exact_bool)),
        entry("List", Value::Class(b.list)),
        entry("Dict", Value::Class(b.dict)),
        entry("Tuple", Value::Class(b.tuple)),
        entry("Set", Value::Class(b.set)),
        entry("Any", Value::Dynamic),
    ];

    let mut statics = vec![
        entry("CheckedList", Value::Class(b.checked_list)),
        entry("CheckedDict", Value::Class(b.checked_dict)),
        entry("Array", Value::Class(b.array)),
        entry("Vector", Value::Class(b.vector)),
        entry("Exact", Value::SpecialForm(SpecialForm::Exact)),
        entry("box", Value::Builtin(BuiltinFunction::Box)),
        entry("unbox", Value::Builtin(BuiltinFunction::Unbox)),
        entry("cast", Value::Builtin(BuiltinFunction::Cast)),
        entry("clen", Value::Builtin(BuiltinFunction::Len)),
        entry("inline", Value::Decorator(Decorator::Inline)),
        entry("dynamic_return", Value::Decorator(Decorator::DynamicReturn)),
        entry("allow_weakrefs", Value::Decorator(Decorator::AllowWeakrefs)),
        entry("_donotcompile", Value::Decorator(Decorator::DoNotCompile)),
        entry("size_t", Value::Class(universe.prim(PrimKind::UInt64))),
        entry("ssize_t", Value::Class(universe.prim(PrimKind::Int64))),
    ];
    statics.extend(
        PrimKind::ALL
            .iter()
            .map(|kind| entry(kind.name(), Value::Class(universe.prim(*kind)))),
    );

    vec![
        ModuleTable::builtin("builtins", builtins),
        ModuleTable::builtin("typing", typing),
        ModuleTable::builtin("__static__", statics),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_parser::parse_module;

    #[test]
    fn test_builtin_modules() {
        let symbols = SymbolTable::new();
        let b = &symbols.universe.builtins;
        assert_eq!(symbols.resolve_name("builtins", "int"), Some(&Value::Class(b.exact_int)));
        assert_eq!(
            symbols.module("__static__").and_then(|m| m.get("int64")),
            Some(&Value::Class(symbols.universe.prim(PrimKind::Int64)))
        );
        assert_eq!(
            symbols.module("typing").and_then(|m| m.get("Final")),
            Some(&Value::SpecialForm(SpecialForm::Final))
        );
    }

    #[test]
    fn test_unknown_module_imports_as_dynamic() {
        let mut symbols = SymbolTable::new();
        assert!(!symbols.import_module("os").unwrap());
        assert!(symbols.declare_module("os").unwrap_err().is_internal());
    }

    #[test]
    fn test_lookup_dotted_name() {
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", parse_module("import typing\n").unwrap());
        symbols.declare_module("m").unwrap();
        let expr = match &parse_module("typing.Final\n").unwrap().body[0].kind {
            stpy_parser::ast::StmtKind::Expr { value } => value.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            symbols.lookup_expr("m", &expr),
            Some(Value::SpecialForm(SpecialForm::Final))
        );
    }
}
