//! Displays and comprehensions

use stpy_parser::ast::{Comprehension, Constant, Expr, ExprKind};

use super::CodeGenerator;
use crate::code_unit::{CodeKind, CodeUnit};
use crate::error::CompileResult;
use crate::opcodes::{CodeFlags, Opcode, Oparg};

/// Container a starred display or argument list is collected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SequenceBuild {
    List,
    Tuple,
    Set,
}

/// Largest number of keys a single `BUILD_MAP` collects.
const MAX_MAP_CHUNK: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl ComprehensionKind {
    fn name(self) -> &'static str {
        match self {
            ComprehensionKind::List => "<listcomp>",
            ComprehensionKind::Set => "<setcomp>",
            ComprehensionKind::Dict => "<dictcomp>",
            ComprehensionKind::Generator => "<genexpr>",
        }
    }
}

/// The parts of a comprehension expression.
struct ComprehensionParts<'a> {
    kind: ComprehensionKind,
    elt: &'a Expr,
    value: Option<&'a Expr>,
    generators: &'a [Comprehension],
}

impl<'a> ComprehensionParts<'a> {
    fn of(expr: &'a Expr) -> Option<Self> {
        let (kind, elt, value, generators) = match &expr.kind {
            ExprKind::ListComp { elt, generators } => (ComprehensionKind::List, elt, None, generators),
            ExprKind::SetComp { elt, generators } => (ComprehensionKind::Set, elt, None, generators),
            ExprKind::DictComp { key, value, generators } => {
                (ComprehensionKind::Dict, key, Some(value.as_ref()), generators)
            }
            ExprKind::GeneratorExp { elt, generators } => (ComprehensionKind::Generator, elt, None, generators),
            _ => return None,
        };
        Some(ComprehensionParts {
            kind,
            elt,
            value,
            generators,
        })
    }
}

impl<'a> CodeGenerator<'a> {
    // ========================================================================
    // Displays
    // ========================================================================

    pub(super) fn visit_list(&mut self, elts: &'a [Expr]) -> CompileResult<()> {
        self.starunpack(elts, 0, SequenceBuild::List)
    }

    pub(super) fn visit_tuple(&mut self, elts: &'a [Expr]) -> CompileResult<()> {
        self.starunpack(elts, 0, SequenceBuild::Tuple)
    }

    pub(super) fn visit_set(&mut self, elts: &'a [Expr]) -> CompileResult<()> {
        self.starunpack(elts, 0, SequenceBuild::Set)
    }

    /// Build a list, tuple or set from `elts`, including `pushed` values
    /// already on the stack.
    pub(super) fn starunpack(&mut self, elts: &'a [Expr], pushed: usize, build: SequenceBuild) -> CompileResult<()> {
        let (build_op, add_op, extend_op) = match build {
            SequenceBuild::List | SequenceBuild::Tuple => (Opcode::BuildList, Opcode::ListAppend, Opcode::ListExtend),
            SequenceBuild::Set => (Opcode::BuildSet, Opcode::SetAdd, Opcode::SetUpdate),
        };
        let starred = elts.iter().any(Expr::is_starred);

        if elts.len() > 2 && pushed == 0 && !starred {
            let constants: Option<Vec<Constant>> = elts.iter().map(|elt| elt.as_constant().cloned()).collect();
            if let Some(constants) = constants {
                let folded = match build {
                    SequenceBuild::Set => Constant::FrozenSet(constants),
                    _ => Constant::Tuple(constants),
                };
                if build == SequenceBuild::Tuple {
                    self.load_const(folded);
                } else {
                    self.emit(build_op, 0usize);
                    self.load_const(folded);
                    self.emit(extend_op, 1usize);
                }
                return Ok(());
            }
        }

        if !starred {
            for elt in elts {
                self.visit_expr(elt)?;
            }
            let op = if build == SequenceBuild::Tuple { Opcode::BuildTuple } else { build_op };
            self.emit(op, elts.len() + pushed);
            return Ok(());
        }

        let mut built = false;
        for (i, elt) in elts.iter().enumerate() {
            match &elt.kind {
                ExprKind::Starred { value, .. } => {
                    if !built {
                        self.emit(build_op, i + pushed);
                        built = true;
                    }
                    self.visit_expr(value)?;
                    self.emit(extend_op, 1usize);
                }
                _ => {
                    self.visit_expr(elt)?;
                    if built {
                        self.emit(add_op, 1usize);
                    }
                }
            }
        }
        if build == SequenceBuild::Tuple {
            self.emit_op(Opcode::ListToTuple);
        }
        Ok(())
    }

    pub(super) fn visit_dict(&mut self, keys: &'a [Option<Expr>], values: &'a [Expr]) -> CompileResult<()> {
        let mut have_dict = false;
        let mut elements = 0usize;
        for (i, (key, value)) in keys.iter().zip(values).enumerate() {
            if key.is_none() {
                if elements > 0 {
                    self.emit_subdict(&keys[i - elements..i], &values[i - elements..i])?;
                    if have_dict {
                        self.emit(Opcode::DictUpdate, 1usize);
                    }
                    have_dict = true;
                    elements = 0;
                }
                if !have_dict {
                    self.emit(Opcode::BuildMap, 0usize);
                    have_dict = true;
                }
                self.visit_expr(value)?;
                self.emit(Opcode::DictUpdate, 1usize);
            } else {
                if elements == MAX_MAP_CHUNK {
                    self.emit_subdict(&keys[i - elements..i], &values[i - elements..i])?;
                    if have_dict {
                        self.emit(Opcode::DictUpdate, 1usize);
                    }
                    have_dict = true;
                    elements = 0;
                }
                elements += 1;
            }
        }
        if elements > 0 {
            let n = values.len();
            self.emit_subdict(&keys[n - elements..], &values[n - elements..])?;
            if have_dict {
                self.emit(Opcode::DictUpdate, 1usize);
            }
            have_dict = true;
        }
        if !have_dict {
            self.emit(Opcode::BuildMap, 0usize);
        }
        Ok(())
    }

    /// Dict from a run of `key: value` pairs without `**` entries.
    fn emit_subdict(&mut self, keys: &'a [Option<Expr>], values: &'a [Expr]) -> CompileResult<()> {
        let constant_keys: Option<Vec<Constant>> = keys
            .iter()
            .map(|key| key.as_ref().and_then(|key| key.as_constant().cloned()))
            .collect();
        match constant_keys {
            Some(constant_keys) if values.len() > 1 => {
                for value in values {
                    self.visit_expr(value)?;
                }
                self.load_const(Constant::Tuple(constant_keys));
                self.emit(Opcode::BuildConstKeyMap, values.len());
            }
            _ => {
                for (key, value) in keys.iter().zip(values) {
                    if let Some(key) = key {
                        self.visit_expr(key)?;
                    }
                    self.visit_expr(value)?;
                }
                self.emit(Opcode::BuildMap, values.len());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Comprehensions
    // ========================================================================

    pub(super) fn visit_comprehension(&mut self, expr: &'a Expr) -> CompileResult<()> {
        let Some(parts) = ComprehensionParts::of(expr) else {
            return Err(self.error("not a comprehension", expr.span));
        };
        let Some(first) = parts.generators.first() else {
            return Err(self.error("comprehension without generators", expr.span));
        };

        let inlined = self.ctx.options.dialect.inline_comprehensions
            && parts.kind != ComprehensionKind::Generator
            && self.ctx.scopes.scope_of(expr.id).is_some_and(|scope| scope.inlined);
        if inlined {
            return self.visit_inlined_comprehension(&parts);
        }

        let code = self
            .child(expr.id, CodeKind::Comprehension, parts.kind.name(), expr.span)?
            .generate_comprehension(expr, &parts)?;
        let is_async = code.flags.contains(CodeFlags::COROUTINE) || code.flags.contains(CodeFlags::ASYNC_GENERATOR);
        if is_async && parts.kind != ComprehensionKind::Generator && !self.scope.coroutine {
            return Err(self.error(
                "asynchronous comprehension outside of an asynchronous function",
                expr.span,
            ));
        }

        self.make_closure(code, 0);
        self.visit_expr(&first.iter)?;
        self.emit_op(if first.is_async { Opcode::GetAiter } else { Opcode::GetIter });
        self.emit(Opcode::CallFunction, 1usize);
        if is_async && parts.kind != ComprehensionKind::Generator {
            self.emit_await();
        }
        Ok(())
    }

    fn generate_comprehension(mut self, expr: &'a Expr, parts: &ComprehensionParts<'a>) -> CompileResult<CodeUnit> {
        self.set_lineno(expr.span);
        self.emit_gen_start();
        if self.ctx.is_static() {
            self.emit(Opcode::CheckArgs, Oparg::CheckArgs(Vec::new()));
        }
        self.build_container(parts.kind);
        self.comprehension_generator(parts, 0, 0, true)?;
        if parts.kind == ComprehensionKind::Generator {
            self.load_none();
        }
        self.emit_op(Opcode::ReturnValue);
        Ok(self.finish(vec![".0".to_string()], (1, 0, 0), CodeFlags::empty()))
    }

    /// Comprehension emitted into the enclosing frame.
    fn visit_inlined_comprehension(&mut self, parts: &ComprehensionParts<'a>) -> CompileResult<()> {
        self.build_container(parts.kind);
        self.comprehension_generator(parts, 0, 0, false)
    }

    fn build_container(&mut self, kind: ComprehensionKind) {
        match kind {
            ComprehensionKind::List => self.emit(Opcode::BuildList, 0usize),
            ComprehensionKind::Set => self.emit(Opcode::BuildSet, 0usize),
            ComprehensionKind::Dict => self.emit(Opcode::BuildMap, 0usize),
            ComprehensionKind::Generator => {}
        }
    }

    /// One `for` clause; `depth` counts the iterators below the result
    /// container. The outermost iterator arrives as the `.0` parameter unless
    /// the comprehension is inlined.
    fn comprehension_generator(
        &mut self,
        parts: &ComprehensionParts<'a>,
        index: usize,
        depth: usize,
        outer_is_param: bool,
    ) -> CompileResult<()> {
        let generator = &parts.generators[index];
        let start = self.new_block("comp_start");
        let if_cleanup = self.new_block("comp_if_cleanup");
        let anchor = self.new_block("comp_anchor");

        if index == 0 && outer_is_param {
            self.emit(Opcode::LoadFast, ".0");
        } else {
            self.visit_expr(&generator.iter)?;
            self.emit_op(if generator.is_async { Opcode::GetAiter } else { Opcode::GetIter });
        }
        self.next_block(start);
        if generator.is_async {
            self.emit(Opcode::SetupFinally, anchor);
            self.emit_op(Opcode::GetAnext);
            self.load_none();
            self.emit_op(Opcode::YieldFrom);
            self.emit_op(Opcode::PopBlock);
        } else {
            self.emit(Opcode::ForIter, anchor);
        }
        self.visit_store(&generator.target)?;
        let depth = depth + 1;

        for test in &generator.ifs {
            self.jump_if(test, if_cleanup, false)?;
        }
        if index + 1 < parts.generators.len() {
            self.comprehension_generator(parts, index + 1, depth, outer_is_param)?;
        } else {
            self.comprehension_element(parts, depth)?;
        }
        self.next_block(if_cleanup);
        self.emit(Opcode::JumpAbsolute, start);
        self.next_block(anchor);
        if generator.is_async {
            self.emit_op(Opcode::EndAsyncFor);
        }
        Ok(())
    }

    fn comprehension_element(&mut self, parts: &ComprehensionParts<'a>, depth: usize) -> CompileResult<()> {
        match parts.kind {
            ComprehensionKind::Generator => {
                self.visit_expr(parts.elt)?;
                self.emit_op(Opcode::YieldValue);
                self.emit_op(Opcode::PopTop);
            }
            ComprehensionKind::List => {
                self.visit_expr(parts.elt)?;
                self.emit(Opcode::ListAppend, depth + 1);
            }
            ComprehensionKind::Set => {
                self.visit_expr(parts.elt)?;
                self.emit(Opcode::SetAdd, depth + 1);
            }
            ComprehensionKind::Dict => {
                self.visit_expr(parts.elt)?;
                if let Some(value) = parts.value {
                    self.visit_expr(value)?;
                }
                self.emit(Opcode::MapAdd, depth + 1);
            }
        }
        Ok(())
    }
}
