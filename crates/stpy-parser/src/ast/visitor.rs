//! AST visitor pattern for traversing the syntax tree
//!
//! Each `visit_*` method has a default implementation that calls the
//! corresponding `walk_*` function, so an implementation only overrides the
//! nodes it cares about.
//!
//! # Example
//!
//! ```rust
//! use stpy_parser::ast::*;
//!
//! struct CountNames {
//!     count: usize,
//! }
//!
//! impl Visitor for CountNames {
//!     fn visit_expr(&mut self, expr: &Expr) {
//!         if expr.as_name().is_some() {
//!             self.count += 1;
//!         }
//!         walk_expr(self, expr);
//!     }
//! }
//! ```

use super::*;

/// AST visitor trait
pub trait Visitor: Sized {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_arguments(&mut self, args: &Arguments) {
        walk_arguments(self, args);
    }

    fn visit_comprehension(&mut self, comp: &Comprehension) {
        walk_comprehension(self, comp);
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        walk_except_handler(self, handler);
    }
}

pub fn walk_module<V: Visitor>(visitor: &mut V, module: &Module) {
    for stmt in &module.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_body<V: Visitor>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            for deco in &def.decorator_list {
                visitor.visit_expr(deco);
            }
            visitor.visit_arguments(&def.args);
            if let Some(returns) = &def.returns {
                visitor.visit_expr(returns);
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::ClassDef(def) => {
            for deco in &def.decorator_list {
                visitor.visit_expr(deco);
            }
            for base in &def.bases {
                visitor.visit_expr(base);
            }
            for kw in &def.keywords {
                visitor.visit_expr(&kw.value);
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::Return { value } => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Delete { targets } => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr(target);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
            ..
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(annotation);
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                visitor.visit_expr(&item.context_expr);
                if let Some(vars) = &item.optional_vars {
                    visitor.visit_expr(vars);
                }
            }
            walk_body(visitor, body);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr(cause);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body(visitor, body);
            for handler in handlers {
                visitor.visit_except_handler(handler);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        StmtKind::Expr { value } => visitor.visit_expr(value),
        StmtKind::Import { .. }
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global { .. }
        | StmtKind::Nonlocal { .. }
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

pub fn walk_expr<V: Visitor>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::NamedExpr { target, value } => {
            visitor.visit_expr(value);
            visitor.visit_expr(target);
        }
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Lambda { args, body } => {
            visitor.visit_arguments(args);
            visitor.visit_expr(body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Dict { keys, values } => {
            for key in keys.iter().flatten() {
                visitor.visit_expr(key);
            }
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Set { elts } | ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => {
            for elt in elts {
                visitor.visit_expr(elt);
            }
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            for comp in generators {
                visitor.visit_comprehension(comp);
            }
            visitor.visit_expr(elt);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            for comp in generators {
                visitor.visit_comprehension(comp);
            }
            visitor.visit_expr(key);
            visitor.visit_expr(value);
        }
        ExprKind::Await { value } | ExprKind::YieldFrom { value } => visitor.visit_expr(value),
        ExprKind::Yield { value } => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            visitor.visit_expr(left);
            for comparator in comparators {
                visitor.visit_expr(comparator);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
            for kw in keywords {
                visitor.visit_expr(&kw.value);
            }
        }
        ExprKind::Attribute { value, .. } | ExprKind::Starred { value, .. } => {
            visitor.visit_expr(value)
        }
        ExprKind::Subscript { value, slice, .. } => {
            visitor.visit_expr(value);
            visitor.visit_expr(slice);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name { .. } => {}
    }
}

pub fn walk_arguments<V: Visitor>(visitor: &mut V, args: &Arguments) {
    for default in &args.defaults {
        visitor.visit_expr(default);
    }
    for default in args.kw_defaults.iter().flatten() {
        visitor.visit_expr(default);
    }
    for arg in args.all() {
        if let Some(annotation) = &arg.annotation {
            visitor.visit_expr(annotation);
        }
    }
}

pub fn walk_comprehension<V: Visitor>(visitor: &mut V, comp: &Comprehension) {
    visitor.visit_expr(&comp.iter);
    visitor.visit_expr(&comp.target);
    for cond in &comp.ifs {
        visitor.visit_expr(cond);
    }
}

pub fn walk_except_handler<V: Visitor>(visitor: &mut V, handler: &ExceptHandler) {
    if let Some(type_) = &handler.type_ {
        visitor.visit_expr(type_);
    }
    walk_body(visitor, &handler.body);
}
