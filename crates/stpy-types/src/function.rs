//! Functions, parameters and deferred type references

use crate::class::ClassId;
use crate::error::{TypeError, TypeResult};
use std::fmt;
use stpy_parser::ast::unparse::unparse_expr;
use stpy_parser::ast::{Constant, Expr, NodeId};

/// A type annotation that is either still syntax or already a class.
///
/// Declarations record annotations as `Unresolved` while modules are being
/// collected; finish-bind turns every reachable one into `Resolved`. Reading
/// the class of an unresolved reference is an internal error.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    /// Annotation expression and the module it is evaluated in
    Unresolved {
        /// Module whose names the annotation refers to
        module: String,
        /// The annotation expression
        annotation: Box<Expr>,
    },
    /// Resolved class
    Resolved(ClassId),
}

impl TypeRef {
    /// Reference to an annotation in `module`.
    pub fn unresolved(module: impl Into<String>, annotation: Expr) -> Self {
        TypeRef::Unresolved {
            module: module.into(),
            annotation: Box::new(annotation),
        }
    }

    /// The resolved class.
    pub fn resolved(&self) -> TypeResult<ClassId> {
        match self {
            TypeRef::Resolved(id) => Ok(*id),
            TypeRef::Unresolved { annotation, .. } => Err(TypeError::UnresolvedTypeRef {
                what: unparse_expr(annotation),
            }),
        }
    }

    #[allow(missing_docs)]
    pub fn is_resolved(&self) -> bool {
        matches!(self, TypeRef::Resolved(_))
    }
}

/// Index of a function in the [`TypeUniverse`](crate::TypeUniverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FuncId(pub u32);

impl FuncId {
    /// Position in the function arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func#{}", self.0)
    }
}

/// How an argument may be passed to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ParamKind {
    PositionalOnly,
    Positional,
    KeywordOnly,
}

/// Default value of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDefault {
    /// Required parameter
    Required,
    /// Literal default that a direct call can load itself
    Constant(Constant),
    /// Default computed at definition time
    Computed,
}

/// A declared function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Position among all named parameters
    pub index: usize,
    /// Declared type
    pub ty: TypeRef,
    /// Default value, if any
    pub default: ParamDefault,
    /// Passing convention
    pub kind: ParamKind,
}

impl Parameter {
    #[allow(missing_docs)]
    pub fn has_default(&self) -> bool {
        !matches!(self.default, ParamDefault::Required)
    }

    #[allow(missing_docs)]
    pub fn is_keyword_only(&self) -> bool {
        self.kind == ParamKind::KeywordOnly
    }
}

/// A declared module-level function or method.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Identity
    pub id: FuncId,
    /// Simple name
    pub name: String,
    /// Dotted name within the module (`C.m` for methods)
    pub qualname: String,
    /// Defining module
    pub module: String,
    /// Class for methods
    pub container: Option<ClassId>,
    /// Named parameters in order, including `self` for methods
    pub params: Vec<Parameter>,
    /// Name of the `*args` parameter
    pub vararg: Option<String>,
    /// Name of the `**kwargs` parameter
    pub kwarg: Option<String>,
    /// Declared return type
    pub returns: TypeRef,
    #[allow(missing_docs)]
    pub is_async: bool,
    /// Decorated `@final`
    pub is_final: bool,
    /// Decorated `@staticmethod`
    pub is_static: bool,
    /// Decorated `@dynamic_return`: the call result is dynamic
    pub dynamic_return: bool,
    /// Decorated `@donotcompile`
    pub donotcompile: bool,
    /// Returned expression of an `@inline` function
    pub inline_body: Option<Expr>,
    /// Declaring `def` statement
    pub node: NodeId,
}

impl Function {
    /// A function with no parameters and a dynamic return.
    pub fn new(
        id: FuncId,
        name: impl Into<String>,
        qualname: impl Into<String>,
        module: impl Into<String>,
        returns: TypeRef,
        node: NodeId,
    ) -> Self {
        Function {
            id,
            name: name.into(),
            qualname: qualname.into(),
            module: module.into(),
            container: None,
            params: Vec::new(),
            vararg: None,
            kwarg: None,
            returns,
            is_async: false,
            is_final: false,
            is_static: false,
            dynamic_return: false,
            donotcompile: false,
            inline_body: None,
            node,
        }
    }

    /// Whether the function is called through the class with the receiver as
    /// first argument.
    pub fn is_method(&self) -> bool {
        self.container.is_some() && !self.is_static
    }

    /// Whether any `*args` or `**kwargs` parameter exists.
    pub fn is_variadic(&self) -> bool {
        self.vararg.is_some() || self.kwarg.is_some()
    }

    /// Names making up the call descriptor: module, then qualname parts.
    pub fn descr_path(&self) -> Vec<String> {
        std::iter::once(self.module.clone())
            .chain(self.qualname.split('.').map(str::to_string))
            .collect()
    }

    /// Parameter by name.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameters that can be passed positionally.
    pub fn positional_params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| !p.is_keyword_only())
    }

    #[allow(missing_docs)]
    pub fn is_inline(&self) -> bool {
        self.inline_body.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_parser::ast::ExprKind;
    use stpy_parser::Span;

    #[test]
    fn test_unresolved_ref_errors() {
        let expr = Expr::new(
            NodeId(1),
            ExprKind::Name {
                id: "C".to_string(),
                ctx: Default::default(),
            },
            Span::default(),
        );
        let unresolved = TypeRef::unresolved("m", expr);
        assert!(!unresolved.is_resolved());
        let err = unresolved.resolved().unwrap_err();
        assert!(err.to_string().contains("`C`"));
        assert_eq!(TypeRef::Resolved(ClassId(4)).resolved(), Ok(ClassId(4)));
    }

    #[test]
    fn test_descr_path() {
        let mut func = Function::new(
            FuncId(0),
            "m",
            "C.m",
            "pkg.mod",
            TypeRef::Resolved(ClassId(0)),
            NodeId(0),
        );
        assert_eq!(func.descr_path(), vec!["pkg.mod", "C", "m"]);
        assert!(!func.is_method());
        func.container = Some(ClassId(9));
        assert!(func.is_method());
    }
}
