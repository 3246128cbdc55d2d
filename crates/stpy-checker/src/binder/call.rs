//! Call binding
//!
//! A call whose target is known statically gets a [`CallBinding`]: the
//! invocation strategy plus the order in which arguments are evaluated and
//! pushed. Calls the binder cannot map fall back to the generic calling
//! convention and get no binding at all.

use stpy_parser::ast::{unparse::unparse_expr, Constant, Expr, ExprKind, Keyword};
use stpy_parser::Span;
use stpy_types::{
    BuiltinFunction, ClassId, ClassKind, FuncId, Function, Member, ParamDefault, Parameter, PrimKind, TypeDescr,
    Value,
};

use super::scope::ScopeRole;
use super::TypeBinder;
use crate::error::{CheckError, CheckResult};
use crate::narrowing::NarrowingEffect;

/// Container kinds with a fast length opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LenKind {
    List,
    Dict,
    Set,
    Tuple,
    Str,
    Array,
}

impl LenKind {
    /// Operand of the fast length opcode, without the inexact bit.
    pub fn code(self) -> u32 {
        match self {
            LenKind::List => 0,
            LenKind::Dict => 1,
            LenKind::Set => 2,
            LenKind::Tuple => 3,
            LenKind::Str => 5,
            LenKind::Array => 4,
        }
    }

    fn of(kind: &ClassKind) -> Option<LenKind> {
        match kind {
            ClassKind::List => Some(LenKind::List),
            ClassKind::Dict => Some(LenKind::Dict),
            ClassKind::Set => Some(LenKind::Set),
            ClassKind::Tuple => Some(LenKind::Tuple),
            ClassKind::Str => Some(LenKind::Str),
            ClassKind::Array | ClassKind::Vector => Some(LenKind::Array),
            _ => None,
        }
    }
}

/// How a bound call is invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Call a function, static method or non-overridable method directly
    Direct {
        /// Callee when it was declared from source
        func: Option<FuncId>,
        /// Callee descriptor
        descr: TypeDescr,
        /// Number of pushed arguments, receiver included
        nargs: usize,
    },
    /// Dispatch through the receiver's vtable
    Virtual {
        #[allow(missing_docs)]
        func: FuncId,
        #[allow(missing_docs)]
        descr: TypeDescr,
        /// Number of arguments after the receiver
        nargs: usize,
    },
    /// Expand the body of an `@inline` function in place
    Inline {
        #[allow(missing_docs)]
        func: FuncId,
        /// The returned expression
        body: Box<Expr>,
        /// Parameter name and the temporary holding its argument
        params: Vec<(String, String)>,
    },
    /// Primitive constructor such as `int64(x)`
    PrimitiveConvert {
        /// Target primitive
        to: PrimKind,
    },
    /// `box(x)`
    Box {
        /// Primitive being boxed
        kind: PrimKind,
    },
    /// `unbox(x)`
    Unbox {
        /// Primitive produced
        kind: PrimKind,
    },
    /// `cast(T, x)`
    Cast {
        /// Descriptor of `T`
        descr: TypeDescr,
    },
    /// `len(x)` on a builtin container
    FastLen {
        #[allow(missing_docs)]
        kind: LenKind,
        /// The receiver may be a subclass
        inexact: bool,
        /// The result is needed as an `int` object
        boxed: bool,
    },
}

/// Argument whose value is stored in a temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    /// Index into the positional arguments
    Positional(usize),
    /// Index into the keyword arguments
    Keyword(usize),
}

/// Evaluate an argument into a temporary local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spill {
    #[allow(missing_docs)]
    pub source: ArgSource,
    /// Name of the temporary
    pub temp: String,
}

/// One step of pushing the arguments of a bound call.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgEmitter {
    /// Evaluate positional argument `i` in place
    Positional(usize),
    /// Evaluate keyword argument `i` in place
    Keyword(usize),
    /// Evaluate an argument into a temporary without pushing it
    Spill(Spill),
    /// Push a spilled temporary
    Spilled {
        #[allow(missing_docs)]
        temp: String,
        /// Downcast applied after loading
        cast: Option<TypeDescr>,
    },
    /// Unpack a starred argument over the remaining parameters
    Starred {
        /// Index of the starred positional argument
        arg: usize,
        /// Downcast per unpacked parameter
        casts: Vec<Option<TypeDescr>>,
    },
    /// Look a parameter up in the spilled `**` mapping
    Mapping {
        /// Temporary holding the mapping
        temp: String,
        /// Parameter name
        name: String,
        /// Used when the mapping lacks the key
        default: Option<Constant>,
        /// Downcast applied after the lookup
        cast: Option<TypeDescr>,
    },
    /// Push a literal default
    Default {
        #[allow(missing_docs)]
        value: Constant,
        /// Set when the parameter is primitive
        prim: Option<PrimKind>,
    },
}

/// Static dispatch information for one call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallBinding {
    #[allow(missing_docs)]
    pub target: CallTarget,
    /// The callee is an attribute whose receiver is pushed first
    pub receiver: bool,
    /// Argument pushes in order; empty for builtin conversions
    pub emitters: Vec<ArgEmitter>,
}

/// Result of mapping call arguments onto parameters.
struct ArgMapping {
    emitters: Vec<ArgEmitter>,
    /// The mapping can be used for a direct call
    direct: bool,
}

impl TypeBinder<'_> {
    pub(super) fn visit_call(
        &mut self,
        call: &Expr,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        context: Option<ClassId>,
    ) -> CheckResult<(Value, NarrowingEffect)> {
        let callee = self.visit_expr(func, None)?;
        let value = match callee {
            Value::Function(f) | Value::StaticMethod(f) => self.call_function(call, f, None, args, keywords)?,
            Value::BoundMethod { func: f, receiver } => self.call_function(call, f, Some(receiver), args, keywords)?,
            Value::BuiltinMethod { receiver, name } => {
                self.call_builtin_method(call, receiver, &name, args, keywords)?
            }
            Value::Class(class) => self.call_class(call, class, args, keywords)?,
            Value::Builtin(builtin) => return self.call_builtin(call, func, builtin, args, keywords, context),
            Value::Instance(class) if self.symbols.universe.is_prim(class) => {
                return Err(CheckError::type_error(
                    format!("'{}' object is not callable", self.symbols.universe.display(class)),
                    call.span,
                ))
            }
            _ => {
                self.bind_dynamic_args(args, keywords)?;
                Value::Dynamic
            }
        };
        Ok((value, NarrowingEffect::NoOp))
    }

    fn record_call(&mut self, call: &Expr, target: CallTarget, receiver: bool, emitters: Vec<ArgEmitter>) {
        tracing::trace!(line = call.span.line, ?target, "bound call");
        self.bindings.calls.insert(
            call.id,
            CallBinding {
                target,
                receiver,
                emitters,
            },
        );
    }

    /// Visit arguments passed through the generic calling convention.
    fn bind_dynamic_args(&mut self, args: &[Expr], keywords: &[Keyword]) -> CheckResult<()> {
        for arg in args {
            let value = self.visit_expr(arg, None)?;
            self.check_boxed(&value, arg.span)?;
        }
        for keyword in keywords {
            let value = self.visit_expr(&keyword.value, None)?;
            self.check_boxed(&value, keyword.value.span)?;
        }
        Ok(())
    }

    fn cast_descr(&self, ty: ClassId) -> Option<TypeDescr> {
        let universe = &self.symbols.universe;
        if universe.is_dynamic(ty) || universe.is_prim(ty) || ty == universe.builtins.object {
            None
        } else {
            Some(universe.descr(ty))
        }
    }

    fn param_type(&self, param: &Parameter, span: Span) -> CheckResult<ClassId> {
        param
            .ty
            .resolved()
            .map_err(|err| CheckError::from_type_error(err, span))
    }

    fn return_value(&self, function: &Function, span: Span) -> CheckResult<Value> {
        if function.dynamic_return || function.is_async {
            return Ok(Value::Dynamic);
        }
        let returns = function
            .returns
            .resolved()
            .map_err(|err| CheckError::from_type_error(err, span))?;
        Ok(self.symbols.universe.instance(returns))
    }

    // ========================================================================
    // Declared Functions
    // ========================================================================

    fn call_function(
        &mut self,
        call: &Expr,
        func: FuncId,
        receiver: Option<ClassId>,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> CheckResult<Value> {
        let function = self.symbols.universe.function(func).clone();
        let result = self.return_value(&function, call.span)?;
        if function.is_variadic() {
            self.bind_dynamic_args(args, keywords)?;
            return Ok(result);
        }

        let skip_self = receiver.is_some();
        let mapping = self.bind_arguments(call, &function, skip_self, args, keywords)?;
        if !mapping.direct || !supported_shape(&function, args, keywords) {
            return Ok(result);
        }

        if receiver.is_none() && self.can_inline(&function, args, keywords)? {
            if let Some(body) = function.inline_body.clone() {
                let mut params = Vec::with_capacity(args.len());
                let mut emitters = Vec::with_capacity(args.len());
                for (index, param) in function.params.iter().enumerate() {
                    let temp = self.next_temp();
                    params.push((param.name.clone(), temp.clone()));
                    emitters.push(ArgEmitter::Spill(Spill {
                        source: ArgSource::Positional(index),
                        temp,
                    }));
                }
                let target = CallTarget::Inline {
                    func,
                    body: Box::new(body),
                    params,
                };
                self.record_call(call, target, false, emitters);
                return Ok(result);
            }
        }

        let universe = &self.symbols.universe;
        let descr = universe.function_descr(func);
        let nargs = function.params.len();
        let target = match receiver {
            Some(class) if !(universe.is_exact_or_final(class) || function.is_final) => CallTarget::Virtual {
                func,
                descr,
                nargs: nargs.saturating_sub(1),
            },
            _ => CallTarget::Direct {
                func: Some(func),
                descr,
                nargs,
            },
        };
        self.record_call(call, target, skip_self, mapping.emitters);
        Ok(result)
    }

    /// `@inline` functions called with plain positional arguments from a
    /// function body of the same module.
    fn can_inline(&self, function: &Function, args: &[Expr], keywords: &[Keyword]) -> CheckResult<bool> {
        let in_function = self
            .scopes
            .iter()
            .any(|scope| matches!(scope.role, ScopeRole::Function { .. }))
            && self.scope()?.is_function_like();
        Ok(self.optimize >= 2
            && function.is_inline()
            && function.module == self.module
            && in_function
            && keywords.is_empty()
            && args.len() == function.params.len()
            && !args.iter().any(Expr::is_starred))
    }

    /// Map call arguments onto the parameters of `function`, checking each
    /// argument against its parameter type.
    fn bind_arguments(
        &mut self,
        call: &Expr,
        function: &Function,
        skip_self: bool,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> CheckResult<ArgMapping> {
        let start = usize::from(skip_self && !function.params.is_empty());
        let params = &function.params[start..];
        if args.len() > params.len() {
            return Err(CheckError::type_error(
                format!(
                    "Mismatched number of args for {}. Expected {}, got {}",
                    function.name,
                    params.len() + start,
                    args.len() + start
                ),
                call.span,
            ));
        }

        let mut emitters = Vec::new();
        let mut direct = true;
        let mut filled = 0;
        for (index, (param, arg)) in params.iter().zip(args).enumerate() {
            if param.is_keyword_only() {
                return Err(CheckError::type_error(
                    format!(
                        "{} takes {} positional args but {} {} given",
                        function.qualname,
                        index,
                        args.len(),
                        if args.len() == 1 { "was" } else { "were" }
                    ),
                    call.span,
                ));
            }
            if arg.is_starred() {
                let mut casts = Vec::new();
                for rest in &params[index..] {
                    let ty = self.param_type(rest, call.span)?;
                    casts.push(self.cast_descr(ty));
                }
                emitters.push(ArgEmitter::Starred { arg: index, casts });
                for rest in &args[index..] {
                    let value = self.visit_expr(rest, None)?;
                    self.check_boxed(&value, rest.span)?;
                }
                filled = params.len();
                break;
            }
            let ty = self.param_type(param, call.span)?;
            self.bind_argument(ty, arg)?;
            emitters.push(ArgEmitter::Positional(index));
            filled += 1;
        }

        let mut bound = vec![false; keywords.len()];
        let mut spills: Vec<(usize, Spill)> = Vec::new();
        let mut spill_start = emitters.len();
        let mut in_order = true;
        let mut cursor = 0;
        let mut mapping_temp: Option<String> = None;
        let double_star = keywords.iter().position(|k| k.arg.is_none());

        for param in &params[filled..] {
            let ty = self.param_type(param, call.span)?;
            let in_place = in_order
                && keywords
                    .get(cursor)
                    .map_or(false, |k| k.arg.as_deref() == Some(param.name.as_str()));
            if in_place {
                self.bind_argument(ty, &keywords[cursor].value)?;
                emitters.push(ArgEmitter::Keyword(cursor));
                bound[cursor] = true;
                cursor += 1;
                continue;
            }

            let named = keywords
                .iter()
                .position(|k| k.arg.as_deref() == Some(param.name.as_str()));
            if let Some(index) = named {
                if in_order {
                    in_order = false;
                    spill_start = emitters.len();
                }
                self.bind_argument(ty, &keywords[index].value)?;
                let temp = self.next_temp();
                spills.push((
                    index,
                    Spill {
                        source: ArgSource::Keyword(index),
                        temp: temp.clone(),
                    },
                ));
                bound[index] = true;
                emitters.push(ArgEmitter::Spilled {
                    temp,
                    cast: self.cast_descr(ty),
                });
            } else if let Some(index) = double_star {
                let temp = match &mapping_temp {
                    Some(temp) => temp.clone(),
                    None => {
                        if in_order {
                            in_order = false;
                            spill_start = emitters.len();
                        }
                        let value = self.visit_expr(&keywords[index].value, None)?;
                        self.check_boxed(&value, keywords[index].value.span)?;
                        let temp = self.next_temp();
                        spills.push((
                            index,
                            Spill {
                                source: ArgSource::Keyword(index),
                                temp: temp.clone(),
                            },
                        ));
                        bound[index] = true;
                        mapping_temp = Some(temp.clone());
                        temp
                    }
                };
                let default = match &param.default {
                    ParamDefault::Constant(value) => Some(value.clone()),
                    ParamDefault::Computed => {
                        direct = false;
                        None
                    }
                    ParamDefault::Required => None,
                };
                emitters.push(ArgEmitter::Mapping {
                    temp,
                    name: param.name.clone(),
                    default,
                    cast: self.cast_descr(ty),
                });
            } else {
                match &param.default {
                    ParamDefault::Constant(value) => emitters.push(ArgEmitter::Default {
                        value: value.clone(),
                        prim: self.symbols.universe.prim_kind(ty),
                    }),
                    ParamDefault::Computed => direct = false,
                    ParamDefault::Required => {
                        return Err(CheckError::type_error(
                            format!(
                                "Function {} expects a value for argument {}",
                                function.qualname, param.name
                            ),
                            call.span,
                        ))
                    }
                }
            }
        }

        for (index, keyword) in keywords.iter().enumerate() {
            if bound[index] {
                continue;
            }
            if let Some(name) = &keyword.arg {
                if function.param(name).is_none() {
                    return Err(CheckError::type_error(
                        format!(
                            "Given argument {} does not exist in the definition of {}",
                            name, function.qualname
                        ),
                        call.span,
                    ));
                }
                // Also passed positionally; the runtime reports the clash.
                direct = false;
            }
            let value = self.visit_expr(&keyword.value, None)?;
            self.check_boxed(&value, keyword.value.span)?;
        }

        spills.sort_by_key(|(index, _)| *index);
        emitters.splice(
            spill_start..spill_start,
            spills.into_iter().map(|(_, spill)| ArgEmitter::Spill(spill)),
        );
        Ok(ArgMapping { emitters, direct })
    }

    fn bind_argument(&mut self, ty: ClassId, arg: &Expr) -> CheckResult<Value> {
        let value = self.visit_expr(arg, Some(ty))?;
        self.check_can_assign_from(ty, &value, arg.span)?;
        self.cast_if_needed(arg.id, ty, &value);
        Ok(value)
    }

    // ========================================================================
    // Builtin Methods and Classes
    // ========================================================================

    fn call_builtin_method(
        &mut self,
        call: &Expr,
        receiver: ClassId,
        name: &str,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> CheckResult<Value> {
        let universe = &self.symbols.universe;
        let signature = match universe.lookup_member(receiver, name) {
            Some((_, Member::BuiltinMethod(method))) => method.signature.clone(),
            _ => None,
        };
        let direct = universe.is_exact_or_final(receiver);
        let Some(signature) = signature.filter(|s| {
            direct && keywords.is_empty() && s.params.len() == args.len() && !args.iter().any(Expr::is_starred)
        }) else {
            self.bind_dynamic_args(args, keywords)?;
            return Ok(Value::Dynamic);
        };

        let mut emitters = Vec::with_capacity(args.len());
        for (index, ((_, ty), arg)) in signature.params.iter().zip(args).enumerate() {
            self.bind_argument(*ty, arg)?;
            emitters.push(ArgEmitter::Positional(index));
        }
        let universe = &self.symbols.universe;
        let descr = universe.descr(universe.inexact(receiver)).child(name);
        let result = universe.instance(signature.returns);
        self.record_call(
            call,
            CallTarget::Direct {
                func: None,
                descr,
                nargs: args.len() + 1,
            },
            true,
            emitters,
        );
        Ok(result)
    }

    fn call_class(&mut self, call: &Expr, class: ClassId, args: &[Expr], keywords: &[Keyword]) -> CheckResult<Value> {
        if let Some(kind) = self.symbols.universe.prim_kind(class) {
            return self.convert_primitive(call, class, kind, args, keywords);
        }

        let universe = &self.symbols.universe;
        let source = universe.class(universe.inexact(class));
        match universe.kind(class).clone() {
            ClassKind::Dynamic | ClassKind::Type | ClassKind::Union(_) | ClassKind::TypeParam(_) => {
                self.bind_dynamic_args(args, keywords)?;
                return Ok(Value::Dynamic);
            }
            _ if universe.is_generic_def(class) => {
                self.bind_dynamic_args(args, keywords)?;
                return Ok(Value::Dynamic);
            }
            ClassKind::Plain if source.node.is_some() => {
                let init = match universe.lookup_member(class, "__init__") {
                    Some((owner, Member::Method(func))) if universe.class(owner).node.is_some() => Some(*func),
                    _ => None,
                };
                match init {
                    Some(init) => {
                        let function = self.symbols.universe.function(init).clone();
                        if function.is_variadic() {
                            self.bind_dynamic_args(args, keywords)?;
                        } else {
                            self.bind_arguments(call, &function, true, args, keywords)?;
                        }
                    }
                    None => self.bind_dynamic_args(args, keywords)?,
                }
                return Ok(Value::Instance(class));
            }
            _ => {}
        }

        self.bind_dynamic_args(args, keywords)?;
        let universe = &self.symbols.universe;
        let builtin_value = matches!(
            universe.kind(class),
            ClassKind::Int
                | ClassKind::Bool
                | ClassKind::Float
                | ClassKind::Complex
                | ClassKind::Str
                | ClassKind::Bytes
                | ClassKind::List
                | ClassKind::Tuple
                | ClassKind::Dict
                | ClassKind::Set
                | ClassKind::FrozenSet
        );
        if builtin_value {
            let exact = self.symbols.universe.exact(class);
            return Ok(Value::Instance(exact));
        }
        Ok(self.symbols.universe.instance(class))
    }

    /// `int64(x)`, `double(x)` and the other primitive constructors.
    fn convert_primitive(
        &mut self,
        call: &Expr,
        class: ClassId,
        kind: PrimKind,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> CheckResult<Value> {
        let [arg] = args else {
            return Err(CheckError::type_error(
                format!(
                    "{} requires a single argument ({} given)",
                    kind.name(),
                    args.len() + keywords.len()
                ),
                call.span,
            ));
        };
        if !keywords.is_empty() {
            return Err(CheckError::type_error(
                format!(
                    "{} requires a single argument ({} given)",
                    kind.name(),
                    args.len() + keywords.len()
                ),
                call.span,
            ));
        }
        let value = self.visit_expr(arg, Some(class))?;
        let universe = &self.symbols.universe;
        let accepted = match &value {
            Value::Dynamic => true,
            Value::Instance(src) if universe.is_prim(*src) => true,
            Value::Instance(src) => {
                let inexact = universe.inexact(*src);
                inexact == universe.builtins.object
                    || match universe.kind(inexact) {
                        ClassKind::Int | ClassKind::Bool => true,
                        ClassKind::Float => kind == PrimKind::Double,
                        _ => false,
                    }
            }
            _ => false,
        };
        if !accepted {
            return Err(CheckError::type_error(
                format!(
                    "type mismatch: {} cannot be assigned to {}",
                    universe.value_name(&value),
                    kind.name()
                ),
                arg.span,
            ));
        }
        self.record_call(call, CallTarget::PrimitiveConvert { to: kind }, false, Vec::new());
        Ok(Value::Instance(class))
    }

    // ========================================================================
    // Builtin Functions
    // ========================================================================

    fn call_builtin(
        &mut self,
        call: &Expr,
        func: &Expr,
        builtin: BuiltinFunction,
        args: &[Expr],
        keywords: &[Keyword],
        context: Option<ClassId>,
    ) -> CheckResult<(Value, NarrowingEffect)> {
        let no_effect = |value: Value| Ok((value, NarrowingEffect::NoOp));
        let simple = keywords.is_empty() && !args.iter().any(Expr::is_starred);
        let b = self.symbols.universe.builtins.clone();
        match (builtin, args) {
            (BuiltinFunction::Len, [arg]) if simple => {
                let primitive = func.as_name() == Some("clen") || context.is_some();
                no_effect(self.call_len(call, arg, primitive)?)
            }
            (BuiltinFunction::IsInstance, [subject, types]) if simple => {
                self.visit_expr(subject, None)?;
                let classes = self.visit_expr(types, None)?;
                let effect = self.isinstance_effect(subject, types, &classes)?;
                Ok((Value::Instance(b.exact_bool), effect))
            }
            (BuiltinFunction::IsInstance | BuiltinFunction::IsSubclass, _) => {
                self.bind_dynamic_args(args, keywords)?;
                no_effect(Value::Instance(b.exact_bool))
            }
            (BuiltinFunction::Box, [arg]) if simple => {
                let value = self.visit_expr(arg, None)?;
                let Some(kind) = self.prim_of_value(&value) else {
                    return Err(CheckError::type_error(
                        format!(
                            "can't box non-primitive: {}",
                            self.symbols.universe.value_name(&value)
                        ),
                        call.span,
                    ));
                };
                self.record_call(call, CallTarget::Box { kind }, false, Vec::new());
                let boxed = match kind {
                    PrimKind::Double => b.exact_float,
                    PrimKind::CBool => b.exact_bool,
                    _ => b.exact_int,
                };
                no_effect(Value::Instance(boxed))
            }
            (BuiltinFunction::Unbox, [arg]) if simple => {
                let value = self.visit_expr(arg, None)?;
                if self.is_prim_value(&value) {
                    return Err(CheckError::type_error(
                        format!(
                            "can't unbox primitive: {}",
                            self.symbols.universe.value_name(&value)
                        ),
                        call.span,
                    ));
                }
                let kind = context
                    .and_then(|ty| self.symbols.universe.prim_kind(ty))
                    .unwrap_or(PrimKind::Int64);
                self.record_call(call, CallTarget::Unbox { kind }, false, Vec::new());
                no_effect(Value::Instance(self.symbols.universe.prim(kind)))
            }
            (BuiltinFunction::Cast, [target, arg]) if simple => {
                self.visit_expr(target, None)?;
                let ty = self.symbols.resolve_annotation(&self.module, target)?;
                let value = self.visit_expr(arg, None)?;
                self.check_boxed(&value, arg.span)?;
                if let Some(descr) = self.cast_descr(ty) {
                    self.record_call(call, CallTarget::Cast { descr }, false, Vec::new());
                }
                no_effect(self.symbols.universe.instance(ty))
            }
            (BuiltinFunction::RevealType, [arg]) => {
                let value = self.visit_expr(arg, None)?;
                Err(CheckError::type_error(
                    format!(
                        "reveal_type({}): '{}'",
                        unparse_expr(arg),
                        self.symbols.universe.value_name(&value)
                    ),
                    call.span,
                ))
            }
            (BuiltinFunction::Sorted, _) => {
                self.bind_dynamic_args(args, keywords)?;
                no_effect(Value::Instance(b.exact_list))
            }
            (BuiltinFunction::Len, _) => {
                self.bind_dynamic_args(args, keywords)?;
                no_effect(Value::Instance(b.exact_int))
            }
            _ => {
                self.bind_dynamic_args(args, keywords)?;
                no_effect(Value::Dynamic)
            }
        }
    }

    fn prim_of_value(&self, value: &Value) -> Option<PrimKind> {
        value
            .instance_class()
            .and_then(|class| self.symbols.universe.prim_kind(class))
    }

    fn call_len(&mut self, call: &Expr, arg: &Expr, primitive: bool) -> CheckResult<Value> {
        let value = self.visit_expr(arg, None)?;
        self.check_boxed(&value, arg.span)?;
        let universe = &self.symbols.universe;
        let int64 = universe.prim(PrimKind::Int64);
        let kind = value.instance_class().and_then(|class| {
            let inexact = universe.inexact(class);
            let kind = LenKind::of(universe.kind(inexact))?;
            let builtin = [
                universe.builtins.list,
                universe.builtins.dict,
                universe.builtins.set,
                universe.builtins.tuple,
                universe.builtins.str_,
            ];
            if kind == LenKind::Array {
                return Some((kind, !universe.is_exact_or_final(class)));
            }
            let is_builtin = builtin.contains(&inexact);
            Some((kind, !universe.is_exact(class) || !is_builtin))
        });
        match kind {
            Some((kind, inexact)) => {
                self.record_call(
                    call,
                    CallTarget::FastLen {
                        kind,
                        inexact,
                        boxed: !primitive,
                    },
                    false,
                    Vec::new(),
                );
                Ok(if primitive {
                    Value::Instance(int64)
                } else {
                    Value::Instance(self.symbols.universe.builtins.exact_int)
                })
            }
            None if primitive => Err(CheckError::type_error(
                format!(
                    "len of {} is not a primitive",
                    self.symbols.universe.value_name(&value)
                ),
                call.span,
            )),
            None => Ok(Value::Instance(self.symbols.universe.builtins.exact_int)),
        }
    }

    /// `isinstance(name, C)` narrows a local to `C` where it holds and drops
    /// the matching union members where it does not.
    fn isinstance_effect(&mut self, subject: &Expr, types: &Expr, classes: &Value) -> CheckResult<NarrowingEffect> {
        let Some(name) = subject.as_name() else {
            return Ok(NarrowingEffect::NoOp);
        };
        if !self.can_narrow(name)? {
            return Ok(NarrowingEffect::NoOp);
        }
        let targets: Vec<Value> = match (&types.kind, classes) {
            (_, Value::Class(_)) => vec![classes.clone()],
            (ExprKind::Tuple { elts, .. }, _) => elts.iter().map(|e| self.bindings.type_of(e.id).clone()).collect(),
            _ => return Ok(NarrowingEffect::NoOp),
        };
        let mut members = Vec::with_capacity(targets.len());
        for target in &targets {
            match target {
                Value::Class(class) if !self.symbols.universe.is_dynamic(*class) => {
                    members.push(self.symbols.universe.inexact(*class))
                }
                _ => return Ok(NarrowingEffect::NoOp),
            }
        }
        let inst = match members.as_slice() {
            [single] => *single,
            _ => self
                .symbols
                .universe
                .make_union(&members)
                .map_err(|err| CheckError::from_type_error(err, types.span))?,
        };
        let prev = self.peek_name(name)?;
        let inst = self.symbols.universe.instance(inst);
        Ok(NarrowingEffect::narrow(&mut self.symbols.universe, name, prev, inst))
    }
}

/// Shapes the direct calling convention cannot express.
fn supported_shape(function: &Function, args: &[Expr], keywords: &[Keyword]) -> bool {
    let mut seen_star = false;
    for arg in args {
        if arg.is_starred() {
            if seen_star {
                return false;
            }
            seen_star = true;
        } else if seen_star {
            return false;
        }
    }
    let double_stars = keywords.iter().filter(|k| k.arg.is_none()).count();
    let has_defaults = function.params.iter().any(Parameter::has_default);
    double_stars <= 1 && !(seen_star && has_defaults)
}

#[cfg(test)]
mod tests {
    use super::super::{bind_module, Bindings};
    use super::*;
    use crate::symbol_table::SymbolTable;
    use crate::symbols::build_scopes;
    use stpy_parser::ast::{Module, StmtKind};
    use stpy_parser::parse_module;

    fn bind_with(source: &str, optimize: u8) -> CheckResult<(SymbolTable, Bindings, Module)> {
        let module = parse_module(source).unwrap();
        let tree = build_scopes(&module, false, false)?;
        let mut symbols = SymbolTable::new();
        symbols.add_module("m", "m.py", module.clone());
        symbols.declare_module("m")?;
        symbols.finish_bind()?;
        let bindings = bind_module(&mut symbols, &tree, "m", optimize)?;
        Ok((symbols, bindings, module))
    }

    fn bind(source: &str) -> CheckResult<(SymbolTable, Bindings, Module)> {
        bind_with(source, 0)
    }

    /// The call in the first `return` of function `g`.
    fn call_in_g<'a>(module: &'a Module) -> &'a Expr {
        module
            .body
            .iter()
            .find_map(|stmt| match &stmt.kind {
                StmtKind::FunctionDef(def) if def.name == "g" => def.body.iter().find_map(|s| match &s.kind {
                    StmtKind::Return { value: Some(value) } => Some(value),
                    _ => None,
                }),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_module_function_is_direct() {
        let source = "def f(x: int, y: str) -> int:\n    return x\n\ndef g():\n    return f(1, 'a')\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        match &call.target {
            CallTarget::Direct { descr, nargs, .. } => {
                assert_eq!(descr.path, vec!["m", "f"]);
                assert_eq!(*nargs, 2);
            }
            other => panic!("unexpected target {:?}", other),
        }
        assert_eq!(call.emitters, vec![ArgEmitter::Positional(0), ArgEmitter::Positional(1)]);
    }

    #[test]
    fn test_argument_errors() {
        let extra = "def f(x: int, y: int):\n    pass\n\ndef g():\n    return f(1, 2, 3)\n";
        assert_eq!(
            bind(extra).unwrap_err().message(),
            "Mismatched number of args for f. Expected 2, got 3"
        );

        let unknown = "def f(x: int):\n    pass\n\ndef g():\n    return f(1, z=2)\n";
        assert_eq!(
            bind(unknown).unwrap_err().message(),
            "Given argument z does not exist in the definition of f"
        );

        let missing = "def f(x: int, y: int):\n    pass\n\ndef g():\n    return f(1)\n";
        assert_eq!(
            bind(missing).unwrap_err().message(),
            "Function f expects a value for argument y"
        );

        let mismatch = "def f(x: int):\n    pass\n\ndef g():\n    return f('a')\n";
        assert_eq!(
            bind(mismatch).unwrap_err().message(),
            "type mismatch: Exact[str] cannot be assigned to int"
        );
    }

    #[test]
    fn test_out_of_order_keywords_spill() {
        let source = "def f(a: int, b: int, c: int):\n    pass\n\ndef g():\n    return f(1, c=3, b=2)\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        let spills: Vec<_> = call
            .emitters
            .iter()
            .filter_map(|e| match e {
                ArgEmitter::Spill(spill) => Some(spill.source),
                _ => None,
            })
            .collect();
        assert_eq!(spills, vec![ArgSource::Keyword(0), ArgSource::Keyword(1)]);
        assert!(matches!(call.emitters[0], ArgEmitter::Positional(0)));
        assert!(call.emitters.iter().filter(|e| matches!(e, ArgEmitter::Spilled { .. })).count() == 2);
    }

    #[test]
    fn test_constant_defaults_are_pushed() {
        let source = "def f(a: int, b: int = 2):\n    pass\n\ndef g():\n    return f(1)\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert_eq!(
            call.emitters[1],
            ArgEmitter::Default {
                value: Constant::Int(2),
                prim: None
            }
        );
    }

    #[test]
    fn test_unsupported_shapes_fall_back() {
        let double_star = "def f(a: int, b: int):\n    pass\n\ndef g(x, y):\n    return f(*x, *y)\n";
        let (_, bindings, module) = bind(double_star).unwrap();
        assert!(bindings.call(call_in_g(&module).id).is_none());

        let variadic = "def f(*args):\n    pass\n\ndef g():\n    return f(1, 2)\n";
        let (_, bindings, module) = bind(variadic).unwrap();
        assert!(bindings.call(call_in_g(&module).id).is_none());
    }

    #[test]
    fn test_method_dispatch() {
        let source = "class C:\n    def m(self) -> int:\n        return 1\n\n\
def g(c: C):\n    return c.m()\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert!(matches!(call.target, CallTarget::Virtual { nargs: 0, .. }));
        assert!(call.receiver);

        let final_method = "from typing import final\nclass C:\n    @final\n    def m(self) -> int:\n        return 1\n\n\
def g(c: C):\n    return c.m()\n";
        let (_, bindings, module) = bind(final_method).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert!(matches!(call.target, CallTarget::Direct { nargs: 1, .. }));
    }

    #[test]
    fn test_primitive_constructor() {
        let source = "from __static__ import double\ndef g() -> double:\n    return double(3.14159)\n";
        let (symbols, bindings, module) = bind(source).unwrap();
        let call = call_in_g(&module);
        assert_eq!(
            bindings.call(call.id).map(|c| &c.target),
            Some(&CallTarget::PrimitiveConvert { to: PrimKind::Double })
        );
        assert_eq!(
            bindings.type_of(call.id),
            &Value::Instance(symbols.universe.prim(PrimKind::Double))
        );

        let bad = "from __static__ import int8\ndef g():\n    return int8(1, 2)\n";
        assert_eq!(
            bind(bad).unwrap_err().message(),
            "int8 requires a single argument (2 given)"
        );
    }

    #[test]
    fn test_fast_len() {
        let source = "def g():\n    return len([1, 2])\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert_eq!(
            call.target,
            CallTarget::FastLen {
                kind: LenKind::List,
                inexact: false,
                boxed: true
            }
        );
    }

    #[test]
    fn test_fast_len_of_array() {
        let source = "from __static__ import Array, int64\ndef g(a: Array[int64]):\n    return len(a)\n";
        let (_, bindings, module) = bind(source).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert_eq!(
            call.target,
            CallTarget::FastLen {
                kind: LenKind::Array,
                inexact: false,
                boxed: true
            }
        );
        assert_eq!(LenKind::Array.code(), 4);
    }

    #[test]
    fn test_reveal_type() {
        let source = "def g():\n    x = 'a'\n    return reveal_type(x)\n";
        assert_eq!(bind(source).unwrap_err().message(), "reveal_type(x): 'Exact[str]'");
    }

    #[test]
    fn test_isinstance_narrows() {
        let source = "def g(x: int | None) -> int:\n    if isinstance(x, int):\n        return x\n    return 0\n";
        let (symbols, bindings, module) = bind(source).unwrap();
        let StmtKind::FunctionDef(def) = &module.body[0].kind else { panic!() };
        let StmtKind::If { body, .. } = &def.body[0].kind else { panic!() };
        let StmtKind::Return { value: Some(value) } = &body[0].kind else { panic!() };
        assert_eq!(bindings.type_of(value.id), &Value::Instance(symbols.universe.builtins.int));
        assert!(bindings.cast(value.id).is_none());
    }

    #[test]
    fn test_inline_at_optimize_two() {
        let source = "from __static__ import inline\n\n@inline\ndef f(x: int) -> int:\n    return x + 1\n\n\
def g():\n    return f(1)\n";
        let (_, bindings, module) = bind_with(source, 2).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        match &call.target {
            CallTarget::Inline { params, .. } => assert_eq!(params[0].0, "x"),
            other => panic!("unexpected target {:?}", other),
        }

        let (_, bindings, module) = bind_with(source, 0).unwrap();
        let call = bindings.call(call_in_g(&module).id).unwrap();
        assert!(matches!(call.target, CallTarget::Direct { .. }));
    }
}
