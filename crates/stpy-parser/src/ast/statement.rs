//! Statement AST nodes

use super::*;
use crate::token::Span;

/// Statement (performs an action)
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
    pub span: Span,
}

/// The shape of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),

    ClassDef(ClassDef),

    Return { value: Option<Expr> },

    Delete { targets: Vec<Expr> },

    /// `a = b = value`
    Assign { targets: Vec<Expr>, value: Expr },

    AugAssign {
        target: Expr,
        op: Operator,
        value: Expr,
    },

    /// `target: annotation [= value]`; `simple` is set for a bare name that
    /// was not parenthesized.
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
        simple: bool,
    },

    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },

    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },

    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },

    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },

    Assert { test: Expr, msg: Option<Expr> },

    Import { names: Vec<Alias> },

    /// `from [.]*module import names`
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: u32,
    },

    Global { names: Vec<String> },

    Nonlocal { names: Vec<String> },

    Expr { value: Expr },

    Pass,

    Break,

    Continue,
}

/// `def` / `async def`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub args: Arguments,
    pub body: Vec<Stmt>,
    pub decorator_list: Vec<Expr>,
    pub returns: Option<Expr>,
    pub is_async: bool,
}

/// `class`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Vec<Stmt>,
    pub decorator_list: Vec<Expr>,
}

/// `except [type [as name]]: body`
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub id: NodeId,
    pub type_: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// One `expr [as target]` item of a `with` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context_expr: Expr,
    pub optional_vars: Option<Expr>,
}

/// `name [as asname]` in an import.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
    pub span: Span,
}

impl Alias {
    /// The name bound in the importing scope: the alias, or for
    /// `import a.b` the first dotted component.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

impl Stmt {
    pub fn new(id: NodeId, kind: StmtKind, span: Span) -> Self {
        Self { id, kind, span }
    }

    /// Whether control can never fall through this statement.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Return { .. }
                | StmtKind::Raise { .. }
                | StmtKind::Break
                | StmtKind::Continue
        )
    }
}
