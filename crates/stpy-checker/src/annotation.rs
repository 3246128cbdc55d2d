//! Annotation resolution
//!
//! Turns annotation expressions into classes once every module is declared.
//! Unknown names and unsupported forms resolve to the dynamic class rather
//! than failing: annotations only ever opt code into stricter checking.

use stpy_parser::ast::{Constant, Expr, ExprKind, Operator, StmtKind};
use stpy_parser::parse_module;
use stpy_types::{ClassId, ClassKind, SpecialForm, Value};

use crate::error::{CheckError, CheckResult};
use crate::module_table::ModulePhase;
use crate::symbol_table::SymbolTable;

const FINAL_NESTED: &str =
    "Final annotation is only valid in initial declaration of attribute or module-level constant";
const CLASSVAR_NESTED: &str = "ClassVar is allowed only in class attribute annotations.";

/// A resolved declaration annotation: the type plus top-level qualifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declared {
    /// Declared type; dynamic for a bare `Final`
    pub ty: ClassId,
    /// Wrapped in `Final`
    pub is_final: bool,
    /// Wrapped in `ClassVar`
    pub is_classvar: bool,
}

impl SymbolTable {
    /// Resolve the annotation of a declaration (`x: T`), accepting `Final`
    /// and `ClassVar` at the top level.
    pub fn resolve_declaration(&mut self, module: &str, annotation: &Expr) -> CheckResult<Declared> {
        let dynamic = self.universe.builtins.dynamic;
        let form = |value: Option<Value>| match value {
            Some(Value::SpecialForm(form @ (SpecialForm::Final | SpecialForm::ClassVar))) => Some(form),
            _ => None,
        };
        match &annotation.kind {
            ExprKind::Subscript { value, slice, .. } => {
                if let Some(form) = form(self.lookup_expr(module, value)) {
                    let ty = self.resolve_annotation(module, slice)?;
                    return Ok(Declared {
                        ty,
                        is_final: form == SpecialForm::Final,
                        is_classvar: form == SpecialForm::ClassVar,
                    });
                }
            }
            ExprKind::Name { .. } | ExprKind::Attribute { .. } => {
                if let Some(form) = form(self.lookup_expr(module, annotation)) {
                    self.check_resolvable(module)?;
                    return Ok(Declared {
                        ty: dynamic,
                        is_final: form == SpecialForm::Final,
                        is_classvar: form == SpecialForm::ClassVar,
                    });
                }
            }
            ExprKind::Constant(Constant::Str(source)) => {
                if let Some(parsed) = parse_annotation(source) {
                    return self.resolve_declaration(module, &parsed);
                }
            }
            _ => {}
        }
        Ok(Declared {
            ty: self.resolve_annotation(module, annotation)?,
            is_final: false,
            is_classvar: false,
        })
    }

    /// Resolve a type annotation in `module` to a class.
    ///
    /// Classes named in annotations are inexact unless wrapped in `Exact`.
    /// Resolving before the module finished collecting is an internal error.
    pub fn resolve_annotation(&mut self, module: &str, annotation: &Expr) -> CheckResult<ClassId> {
        self.check_resolvable(module)?;
        let dynamic = self.universe.builtins.dynamic;
        let span = annotation.span;
        let to_check = |err| CheckError::from_type_error(err, span);

        match &annotation.kind {
            ExprKind::Constant(Constant::None) => Ok(self.universe.builtins.none),
            ExprKind::Constant(Constant::Str(source)) => match parse_annotation(source) {
                Some(parsed) => self.resolve_annotation(module, &parsed),
                None => Ok(dynamic),
            },
            ExprKind::BinOp {
                left,
                op: Operator::BitOr,
                right,
            } => {
                let left = self.resolve_annotation(module, left)?;
                let right = self.resolve_annotation(module, right)?;
                self.universe.make_union(&[left, right]).map_err(to_check)
            }
            ExprKind::Name { .. } | ExprKind::Attribute { .. } => {
                match self.lookup_expr(module, annotation) {
                    Some(Value::Class(class)) => Ok(self.universe.inexact(class)),
                    Some(Value::SpecialForm(SpecialForm::Final)) => {
                        Err(CheckError::type_error(FINAL_NESTED, span))
                    }
                    Some(Value::SpecialForm(SpecialForm::ClassVar)) => {
                        Err(CheckError::type_error(CLASSVAR_NESTED, span))
                    }
                    _ => Ok(dynamic),
                }
            }
            ExprKind::Subscript { value, slice, .. } => {
                let base = self.lookup_expr(module, value);
                self.resolve_subscript(module, base, slice)
            }
            _ => Ok(dynamic),
        }
    }

    fn resolve_subscript(&mut self, module: &str, base: Option<Value>, slice: &Expr) -> CheckResult<ClassId> {
        let dynamic = self.universe.builtins.dynamic;
        let span = slice.span;
        let to_check = |err| CheckError::from_type_error(err, span);
        let elements: Vec<&Expr> = match &slice.kind {
            ExprKind::Tuple { elts, .. } => elts.iter().collect(),
            _ => vec![slice],
        };

        match base {
            Some(Value::SpecialForm(SpecialForm::Optional)) => {
                let inner = self.resolve_annotation(module, slice)?;
                self.universe.optional(inner).map_err(to_check)
            }
            Some(Value::SpecialForm(SpecialForm::Union)) => {
                let mut members = Vec::with_capacity(elements.len());
                for element in elements {
                    members.push(self.resolve_annotation(module, element)?);
                }
                self.universe.make_union(&members).map_err(to_check)
            }
            Some(Value::SpecialForm(SpecialForm::Exact)) => {
                let inner = self.resolve_annotation(module, slice)?;
                Ok(self.universe.exact(inner))
            }
            Some(Value::SpecialForm(SpecialForm::Final)) => Err(CheckError::type_error(FINAL_NESTED, span)),
            Some(Value::SpecialForm(SpecialForm::ClassVar)) => {
                Err(CheckError::type_error(CLASSVAR_NESTED, span))
            }
            Some(Value::Class(class)) => {
                let class = self.universe.inexact(class);
                if self.universe.is_generic_def(class) {
                    let mut args = Vec::with_capacity(elements.len());
                    for element in elements {
                        args.push(self.resolve_annotation(module, element)?);
                    }
                    return self.universe.make_generic(class, &args).map_err(to_check);
                }
                match self.universe.kind(class) {
                    ClassKind::List
                    | ClassKind::Tuple
                    | ClassKind::Dict
                    | ClassKind::Set
                    | ClassKind::FrozenSet
                    | ClassKind::Type => Ok(class),
                    _ => Err(CheckError::type_error(
                        format!("{} is not a generic type", self.universe.display(class)),
                        span,
                    )),
                }
            }
            _ => {
                // Qualifiers stay invalid under an unknown generic.
                for element in elements {
                    self.resolve_annotation(module, element)?;
                }
                Ok(dynamic)
            }
        }
    }

    fn check_resolvable(&self, module: &str) -> CheckResult<()> {
        match self.module(module).map(|table| table.phase()) {
            Some(ModulePhase::Declaring) | None => Err(CheckError::internal(format!(
                "annotation in module {} resolved before its declarations were collected",
                module
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Parse a string annotation as an expression.
fn parse_annotation(source: &str) -> Option<Expr> {
    let module = parse_module(source.trim()).ok()?;
    match module.body.into_iter().next()?.kind {
        StmtKind::Expr { value } => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_types::PrimKind;

    fn expr(source: &str) -> Expr {
        parse_annotation(source).unwrap()
    }

    fn symbols_with(source: &str) -> SymbolTable {
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", parse_module(source).unwrap());
        symbols.declare_module("m").unwrap();
        symbols
    }

    #[test]
    fn test_builtin_annotations_are_inexact() {
        let mut symbols = symbols_with("");
        let int = symbols.resolve_annotation("m", &expr("int")).unwrap();
        assert_eq!(int, symbols.universe.builtins.int);
        let exact = symbols
            .resolve_annotation("m", &expr("Exact[int]"))
            .unwrap_or(symbols.universe.builtins.dynamic);
        // `Exact` is only bound after importing it.
        assert_eq!(exact, symbols.universe.builtins.dynamic);
    }

    #[test]
    fn test_optional_and_unions() {
        let mut symbols = symbols_with("from typing import Optional, Union\n");
        let b = symbols.universe.builtins.clone();
        let opt = symbols.resolve_annotation("m", &expr("Optional[int]")).unwrap();
        assert_eq!(symbols.universe.optional_inner(opt), Some(b.int));
        let pipe = symbols.resolve_annotation("m", &expr("int | None")).unwrap();
        assert_eq!(pipe, opt);
        let string = symbols.resolve_annotation("m", &expr("'Optional[int]'")).unwrap();
        assert_eq!(string, opt);
        let union = symbols.resolve_annotation("m", &expr("Union[int, str]")).unwrap();
        assert_eq!(symbols.universe.union_members(union).map(<[_]>::len), Some(2));
        let unknown = symbols.resolve_annotation("m", &expr("Union[int, Unknown]")).unwrap();
        assert_eq!(unknown, b.dynamic);
    }

    #[test]
    fn test_generics_and_primitives() {
        let mut symbols = symbols_with("from __static__ import CheckedList, int64, Exact\n");
        let first = symbols.resolve_annotation("m", &expr("CheckedList[int]")).unwrap();
        let second = symbols.resolve_annotation("m", &expr("CheckedList[int]")).unwrap();
        assert_eq!(first, second);
        let int64 = symbols.resolve_annotation("m", &expr("int64")).unwrap();
        assert_eq!(symbols.universe.prim_kind(int64), Some(PrimKind::Int64));
        let err = symbols
            .resolve_annotation("m", &expr("CheckedList[int64]"))
            .unwrap_err();
        assert_eq!(err.category(), "type");
        let exact = symbols.resolve_annotation("m", &expr("Exact[int]")).unwrap();
        assert_eq!(exact, symbols.universe.builtins.exact_int);
    }

    #[test]
    fn test_declaration_qualifiers() {
        let mut symbols = symbols_with("from typing import Final, ClassVar, Optional\n");
        let int = symbols.universe.builtins.int;
        let decl = symbols.resolve_declaration("m", &expr("Final[int]")).unwrap();
        assert_eq!((decl.ty, decl.is_final, decl.is_classvar), (int, true, false));
        let decl = symbols.resolve_declaration("m", &expr("ClassVar[int]")).unwrap();
        assert!(decl.is_classvar);
        let bare = symbols.resolve_declaration("m", &expr("Final")).unwrap();
        assert!(bare.is_final);
        let err = symbols
            .resolve_annotation("m", &expr("Optional[Final[int]]"))
            .unwrap_err();
        assert!(err.message().starts_with("Final annotation"));
        let err = symbols
            .resolve_annotation("m", &expr("Unknown[ClassVar[int]]"))
            .unwrap_err();
        assert!(err.message().starts_with("ClassVar is allowed"));
    }

    #[test]
    fn test_resolving_while_declaring_is_internal() {
        let mut symbols = SymbolTable::new();
        let err = symbols.resolve_annotation("nowhere", &expr("int")).unwrap_err();
        assert!(err.is_internal());
    }
}
