//! Calls
//!
//! Calls with a [`CallBinding`] are emitted in the form the binder chose:
//! direct or virtual invocation, a primitive conversion, or an inline
//! expansion. Everything else uses the generic calling convention.

use rustc_hash::FxHashMap;
use stpy_checker::{ArgEmitter, ArgSource, CallBinding, CallTarget, Spill};
use stpy_parser::ast::{Constant, Expr, ExprKind, Keyword};
use stpy_types::PrimKind;

use super::sequence::SequenceBuild;
use super::CodeGenerator;
use crate::error::{CompileError, CompileResult};
use crate::opcodes::{Opcode, Oparg, FAST_LEN_INEXACT};

/// Longest argument list passed without building a tuple.
const MAX_METHOD_ARGS: usize = 255;

impl<'a> CodeGenerator<'a> {
    pub(super) fn visit_call(
        &mut self,
        expr: &'a Expr,
        func: &'a Expr,
        args: &'a [Expr],
        keywords: &'a [Keyword],
    ) -> CompileResult<()> {
        if let Some(binding) = self.bindings().and_then(|b| b.call(expr.id)) {
            return self.visit_bound_call(expr, func, args, keywords, binding);
        }
        if let ExprKind::Attribute { value, attr, .. } = &func.kind {
            let plain = keywords.is_empty() && args.len() < MAX_METHOD_ARGS && !args.iter().any(Expr::is_starred);
            if plain {
                self.visit_expr(value)?;
                let attr = self.scope.mangle(attr);
                self.emit(Opcode::LoadMethod, attr);
                for arg in args {
                    self.visit_expr(arg)?;
                }
                self.emit(Opcode::CallMethod, args.len());
                return Ok(());
            }
        }
        self.visit_expr(func)?;
        self.emit_call_args(args, keywords, 0)
    }

    fn visit_bound_call(
        &mut self,
        expr: &'a Expr,
        func: &'a Expr,
        args: &'a [Expr],
        keywords: &'a [Keyword],
        binding: &'a CallBinding,
    ) -> CompileResult<()> {
        match &binding.target {
            CallTarget::PrimitiveConvert { to } => {
                let arg = self.bound_arg(expr, args, 0)?;
                if let Some(constant) = self.prim_constant(arg) {
                    self.emit_prim_const(&constant, *to);
                    return Ok(());
                }
                self.visit_expr(arg)?;
                match self.prim_of(arg.id) {
                    Some(from) => self.emit_prim_convert(from, *to),
                    None => self.emit_unbox(*to),
                }
                Ok(())
            }
            CallTarget::Box { kind } => {
                let arg = self.bound_arg(expr, args, 0)?;
                self.visit_prim_operand(arg, *kind)?;
                self.emit_box(*kind);
                Ok(())
            }
            CallTarget::Unbox { kind } => {
                let arg = self.bound_arg(expr, args, 0)?;
                self.visit_expr(arg)?;
                self.emit_unbox(*kind);
                Ok(())
            }
            CallTarget::Cast { descr } => {
                let arg = self.bound_arg(expr, args, 1)?;
                self.visit_expr(arg)?;
                self.emit(Opcode::Cast, descr.clone());
                Ok(())
            }
            CallTarget::FastLen { kind, inexact, boxed } => {
                let arg = self.bound_arg(expr, args, 0)?;
                self.visit_expr(arg)?;
                let mut operand = i64::from(kind.code());
                if *inexact {
                    operand |= FAST_LEN_INEXACT;
                }
                self.emit(Opcode::FastLen, operand);
                if *boxed {
                    self.emit_box(PrimKind::Int64);
                }
                Ok(())
            }
            CallTarget::Inline { body, params, .. } => {
                self.emit_arguments(args, keywords, &binding.emitters)?;
                let names: FxHashMap<String, String> = params.iter().cloned().collect();
                self.inline_names.push(names);
                let expanded = self.visit_expr(body);
                self.inline_names.pop();
                expanded
            }
            CallTarget::Direct { descr, nargs, .. } => {
                if binding.receiver {
                    self.visit_receiver(expr, func)?;
                }
                self.emit_arguments(args, keywords, &binding.emitters)?;
                self.emit(Opcode::InvokeFunction, Oparg::Invoke(descr.clone(), *nargs));
                Ok(())
            }
            CallTarget::Virtual { descr, nargs, .. } => {
                self.visit_receiver(expr, func)?;
                self.emit_arguments(args, keywords, &binding.emitters)?;
                self.emit(Opcode::ExtendedArg, 0i64);
                self.emit(Opcode::InvokeMethod, Oparg::Invoke(descr.clone(), *nargs));
                Ok(())
            }
        }
    }

    fn bound_arg(&self, expr: &Expr, args: &'a [Expr], index: usize) -> CompileResult<&'a Expr> {
        args.get(index).ok_or_else(|| {
            CompileError::internal(format!(
                "bound call at line {} has no argument {}",
                expr.span.line, index
            ))
        })
    }

    fn visit_receiver(&mut self, expr: &Expr, func: &'a Expr) -> CompileResult<()> {
        match &func.kind {
            ExprKind::Attribute { value, .. } => self.visit_expr(value),
            _ => Err(CompileError::internal(format!(
                "method call at line {} has no receiver",
                expr.span.line
            ))),
        }
    }

    // ========================================================================
    // Bound Arguments
    // ========================================================================

    fn emit_arguments(
        &mut self,
        args: &'a [Expr],
        keywords: &'a [Keyword],
        emitters: &'a [ArgEmitter],
    ) -> CompileResult<()> {
        for emitter in emitters {
            match emitter {
                ArgEmitter::Positional(i) => {
                    let arg = self.positional(args, *i)?;
                    self.visit_expr(arg)?;
                }
                ArgEmitter::Keyword(i) => {
                    let value = self.keyword(keywords, *i)?;
                    self.visit_expr(value)?;
                }
                ArgEmitter::Spill(spill) => self.emit_spill(args, keywords, spill, emitters)?,
                ArgEmitter::Spilled { temp, cast } => {
                    self.load_temp(temp);
                    if let Some(descr) = cast {
                        self.emit(Opcode::Cast, descr.clone());
                    }
                }
                ArgEmitter::Starred { arg, casts } => {
                    let starred = self.positional(args, *arg)?;
                    let iterable = match &starred.kind {
                        ExprKind::Starred { value, .. } => value.as_ref(),
                        _ => starred,
                    };
                    self.visit_expr(iterable)?;
                    for (i, cast) in casts.iter().enumerate() {
                        self.emit(Opcode::LoadIterableArg, i);
                        if let Some(descr) = cast {
                            self.emit(Opcode::Cast, descr.clone());
                        }
                        self.emit_op(Opcode::RotTwo);
                    }
                    self.emit_op(Opcode::PopTop);
                }
                ArgEmitter::Mapping {
                    temp,
                    name,
                    default,
                    cast,
                } => {
                    self.load_temp(temp);
                    self.load_const(Constant::Str(name.clone()));
                    match default {
                        Some(value) => {
                            self.load_const(value.clone());
                            self.emit(Opcode::LoadMappingArg, 3i64);
                        }
                        None => self.emit(Opcode::LoadMappingArg, 2i64),
                    }
                    if let Some(descr) = cast {
                        self.emit(Opcode::Cast, descr.clone());
                    }
                }
                ArgEmitter::Default { value, prim } => match prim {
                    Some(kind) => self.emit_prim_const(value, *kind),
                    None => self.load_const(value.clone()),
                },
            }
        }
        Ok(())
    }

    /// Evaluate an argument into its temporary. A value loaded again through
    /// a [`ArgEmitter::Spilled`] with its own cast is stored uncast.
    fn emit_spill(
        &mut self,
        args: &'a [Expr],
        keywords: &'a [Keyword],
        spill: &Spill,
        emitters: &[ArgEmitter],
    ) -> CompileResult<()> {
        let value = match spill.source {
            ArgSource::Positional(i) => {
                let arg = self.positional(args, i)?;
                match &arg.kind {
                    ExprKind::Starred { value, .. } => value.as_ref(),
                    _ => arg,
                }
            }
            ArgSource::Keyword(i) => self.keyword(keywords, i)?,
        };
        let cast_on_load = emitters.iter().any(|emitter| {
            matches!(emitter, ArgEmitter::Spilled { temp, cast: Some(_) } if *temp == spill.temp)
        });
        if cast_on_load {
            self.visit_expr_uncast(value)?;
        } else {
            self.visit_expr(value)?;
        }
        let prim = self.prim_of(value.id);
        self.store_temp(&spill.temp, prim);
        Ok(())
    }

    fn positional(&self, args: &'a [Expr], index: usize) -> CompileResult<&'a Expr> {
        args.get(index)
            .ok_or_else(|| CompileError::internal(format!("bound call has no positional argument {}", index)))
    }

    fn keyword(&self, keywords: &'a [Keyword], index: usize) -> CompileResult<&'a Expr> {
        keywords
            .get(index)
            .map(|keyword| &keyword.value)
            .ok_or_else(|| CompileError::internal(format!("bound call has no keyword argument {}", index)))
    }

    // ========================================================================
    // Generic Calling Convention
    // ========================================================================

    /// Push the arguments of a call whose callable and `pushed` leading
    /// arguments are already on the stack, then call.
    pub(super) fn emit_call_args(&mut self, args: &'a [Expr], keywords: &'a [Keyword], pushed: usize) -> CompileResult<()> {
        let needs_ex = args.iter().any(Expr::is_starred) || keywords.iter().any(|kw| kw.arg.is_none());
        if !needs_ex {
            for arg in args {
                self.visit_expr(arg)?;
            }
            if keywords.is_empty() {
                self.emit(Opcode::CallFunction, pushed + args.len());
                return Ok(());
            }
            let mut names = Vec::with_capacity(keywords.len());
            for keyword in keywords {
                self.visit_expr(&keyword.value)?;
                names.push(Constant::Str(keyword.arg.clone().unwrap_or_default()));
            }
            self.load_const(Constant::Tuple(names));
            self.emit(Opcode::CallFunctionKw, pushed + args.len() + keywords.len());
            return Ok(());
        }

        match (pushed, args) {
            (0, [single]) if single.is_starred() => {
                if let ExprKind::Starred { value, .. } = &single.kind {
                    self.visit_expr(value)?;
                }
            }
            _ => self.starunpack(args, pushed, SequenceBuild::Tuple)?,
        }

        let mut have_dict = false;
        let mut pending = 0usize;
        for (i, keyword) in keywords.iter().enumerate() {
            if keyword.arg.is_some() {
                pending += 1;
                continue;
            }
            if pending > 0 {
                self.emit_keyword_map(&keywords[i - pending..i])?;
                if have_dict {
                    self.emit(Opcode::DictMerge, 1usize);
                }
                have_dict = true;
                pending = 0;
            }
            if !have_dict {
                self.emit(Opcode::BuildMap, 0usize);
                have_dict = true;
            }
            self.visit_expr(&keyword.value)?;
            self.emit(Opcode::DictMerge, 1usize);
        }
        if pending > 0 {
            self.emit_keyword_map(&keywords[keywords.len() - pending..])?;
            if have_dict {
                self.emit(Opcode::DictMerge, 1usize);
            }
            have_dict = true;
        }
        self.emit(Opcode::CallFunctionEx, i64::from(have_dict));
        Ok(())
    }

    /// Dict of consecutive named keyword arguments.
    fn emit_keyword_map(&mut self, keywords: &'a [Keyword]) -> CompileResult<()> {
        if keywords.len() > 1 {
            let mut names = Vec::with_capacity(keywords.len());
            for keyword in keywords {
                self.visit_expr(&keyword.value)?;
                names.push(Constant::Str(keyword.arg.clone().unwrap_or_default()));
            }
            self.load_const(Constant::Tuple(names));
            self.emit(Opcode::BuildConstKeyMap, keywords.len());
        } else {
            for keyword in keywords {
                self.load_const(Constant::Str(keyword.arg.clone().unwrap_or_default()));
                self.visit_expr(&keyword.value)?;
            }
            self.emit(Opcode::BuildMap, keywords.len());
        }
        Ok(())
    }
}
