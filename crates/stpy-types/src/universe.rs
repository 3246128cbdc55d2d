//! The type universe: arenas of classes and functions for one compilation
//!
//! All classes live in a single arena indexed by [`ClassId`]. Exact variants,
//! unions and generic instantiations are created on demand and memoized, so
//! identity comparison of ids is type equality.

use crate::builtins::{self, Builtins};
use crate::class::{Class, ClassId, ClassKind, GenericInfo, Member, TypeName};
use crate::descr::TypeDescr;
use crate::error::{TypeError, TypeResult};
use crate::function::{FuncId, Function, TypeRef};
use crate::primitive::PrimKind;
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Owner of every class and function known to one compilation.
#[derive(Debug)]
pub struct TypeUniverse {
    classes: Vec<Class>,
    functions: Vec<Function>,
    generics: FxHashMap<(ClassId, Vec<ClassId>), ClassId>,
    unions: FxHashMap<Vec<ClassId>, ClassId>,
    /// Well-known builtin classes
    pub builtins: Builtins,
}

impl Default for TypeUniverse {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeUniverse {
    /// A universe populated with the builtin classes.
    pub fn new() -> Self {
        let mut universe = TypeUniverse {
            classes: Vec::new(),
            functions: Vec::new(),
            generics: FxHashMap::default(),
            unions: FxHashMap::default(),
            builtins: Builtins::default(),
        };
        universe.builtins = builtins::install(&mut universe);
        universe
    }

    // ========================================================================
    // Arena Access
    // ========================================================================

    /// The class with the given id. Ids are only handed out by this universe.
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    #[allow(missing_docs)]
    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.index()]
    }

    /// The function with the given id.
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    #[allow(missing_docs)]
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    /// Number of classes, including builtins and derived classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Register a new inexact class.
    pub fn add_class(&mut self, name: TypeName, kind: ClassKind, bases: Vec<TypeRef>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Class::new(id, name, kind, bases));
        id
    }

    /// Register a function; its `id` field is overwritten.
    pub fn add_function(&mut self, mut function: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        function.id = id;
        self.functions.push(function);
        id
    }

    // ========================================================================
    // Class Queries
    // ========================================================================

    /// Name used in messages.
    pub fn display(&self, id: ClassId) -> &str {
        &self.class(id).display
    }

    #[allow(missing_docs)]
    pub fn kind(&self, id: ClassId) -> &ClassKind {
        &self.class(id).kind
    }

    #[allow(missing_docs)]
    pub fn is_dynamic(&self, id: ClassId) -> bool {
        id == self.builtins.dynamic
    }

    /// Primitive kind of a primitive class.
    pub fn prim_kind(&self, id: ClassId) -> Option<PrimKind> {
        self.class(id).prim_kind()
    }

    #[allow(missing_docs)]
    pub fn is_prim(&self, id: ClassId) -> bool {
        self.prim_kind(id).is_some()
    }

    /// The class of a primitive kind.
    pub fn prim(&self, kind: PrimKind) -> ClassId {
        self.builtins.prims[kind as usize]
    }

    /// Members of a union, or `None` for other classes.
    pub fn union_members(&self, id: ClassId) -> Option<&[ClassId]> {
        self.class(id).union_members()
    }

    /// `T` for `Optional[T]` (a two-member union with `None`).
    pub fn optional_inner(&self, id: ClassId) -> Option<ClassId> {
        let members = self.union_members(id)?;
        if members.len() != 2 || !members.contains(&self.builtins.none) {
            return None;
        }
        members.iter().copied().find(|m| *m != self.builtins.none)
    }

    // ========================================================================
    // Exactness
    // ========================================================================

    /// Whether values of the class are known to be exactly that class.
    pub fn is_exact(&self, id: ClassId) -> bool {
        self.class(id).is_exact
    }

    /// Whether the runtime type of an instance is known precisely, either
    /// because the class is exact or because it cannot be subclassed.
    pub fn is_exact_or_final(&self, id: ClassId) -> bool {
        let class = self.class(id);
        class.is_exact || class.is_final
    }

    /// The exact variant of a class, created on first use.
    pub fn exact(&mut self, id: ClassId) -> ClassId {
        let class = self.class(id);
        if class.is_exact {
            return id;
        }
        if let Some(partner) = class.partner {
            return partner;
        }
        if matches!(
            class.kind,
            ClassKind::Dynamic
                | ClassKind::Union(_)
                | ClassKind::Prim(_)
                | ClassKind::TypeParam(_)
                | ClassKind::NoneType
        ) {
            return id;
        }
        let name = class.name.clone();
        let kind = class.kind.clone();
        let display = format!("Exact[{}]", class.display);
        let is_final = class.is_final;

        let exact = self.add_class(name, kind, vec![TypeRef::Resolved(id)]);
        let new_class = self.class_mut(exact);
        new_class.display = display;
        new_class.is_exact = true;
        new_class.is_final = is_final;
        new_class.partner = Some(id);
        self.class_mut(id).partner = Some(exact);
        exact
    }

    /// The inexact original of an exact class; other classes map to
    /// themselves.
    pub fn inexact(&self, id: ClassId) -> ClassId {
        let class = self.class(id);
        match class.partner {
            Some(partner) if class.is_exact => partner,
            _ => id,
        }
    }

    /// Widen a value type for joining: exact classes become inexact.
    pub fn widen(&self, id: ClassId) -> ClassId {
        self.inexact(id)
    }

    // ========================================================================
    // Generics
    // ========================================================================

    /// The memoized instantiation of a generic definition.
    ///
    /// Instantiating the same definition with the same arguments always
    /// returns the same id.
    pub fn make_generic(&mut self, def: ClassId, args: &[ClassId]) -> TypeResult<ClassId> {
        let params = match &self.class(def).generic {
            GenericInfo::Definition { params } => params.clone(),
            _ => {
                return Err(TypeError::NotGeneric {
                    name: self.display(def).to_string(),
                })
            }
        };
        if params.len() != args.len() {
            return Err(TypeError::InvalidTypeArgCount {
                name: self.display(def).to_string(),
                expected: params.len(),
                actual: args.len(),
            });
        }
        if matches!(self.kind(def), ClassKind::Array | ClassKind::Vector) {
            let element = |a: &ClassId| self.prim_kind(*a).is_some_and(PrimKind::is_int);
            if let Some(bad) = args.iter().find(|a| !element(a)) {
                return Err(TypeError::InvalidArrayElement {
                    container: self.display(def).to_string(),
                    ty: self.display(*bad).to_string(),
                });
            }
        } else if let Some(prim) = args.iter().find(|a| self.is_prim(**a)) {
            return Err(TypeError::PrimitiveTypeArgument {
                ty: self.display(*prim).to_string(),
            });
        }

        let key = (def, args.to_vec());
        if let Some(&id) = self.generics.get(&key) {
            return Ok(id);
        }

        let id = ClassId(self.classes.len() as u32);
        let def_class = self.class(def);
        let display = format!(
            "{}[{}]",
            def_class.display,
            args.iter()
                .map(|a| self.display(*a).to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let substitute = |c: ClassId| {
            params
                .iter()
                .position(|p| *p == c)
                .map(|i| args[i])
                .unwrap_or(c)
        };
        let members: Vec<(String, Member)> = def_class
            .member_order
            .iter()
            .filter_map(|name| def_class.members.get(name).map(|m| (name.clone(), m)))
            .map(|(name, member)| (name, specialize(member, id, &substitute)))
            .collect();
        let name = def_class.name.clone();
        let kind = def_class.kind.clone();
        let bases = def_class.bases.clone();
        let is_final = def_class.is_final;

        self.add_class(name, kind, bases);
        let class = self.class_mut(id);
        class.display = display;
        class.is_final = is_final;
        class.generic = GenericInfo::Instance {
            def,
            args: args.to_vec(),
        };
        for (name, member) in members {
            class.define(name, member);
        }
        self.generics.insert(key, id);
        Ok(id)
    }

    /// Definition of a generic instantiation (looking through exactness).
    pub fn generic_def(&self, id: ClassId) -> Option<ClassId> {
        match &self.class(self.inexact(id)).generic {
            GenericInfo::Instance { def, .. } => Some(*def),
            _ => None,
        }
    }

    /// Type arguments of a generic instantiation (looking through exactness).
    pub fn generic_args(&self, id: ClassId) -> &[ClassId] {
        match &self.class(self.inexact(id)).generic {
            GenericInfo::Instance { args, .. } => args,
            _ => &[],
        }
    }

    /// Whether the class is a generic definition awaiting arguments.
    pub fn is_generic_def(&self, id: ClassId) -> bool {
        matches!(self.class(id).generic, GenericInfo::Definition { .. })
    }

    // ========================================================================
    // Unions
    // ========================================================================

    /// The simplified, memoized union of the given classes.
    ///
    /// Nested unions are flattened, members assignable to another member are
    /// dropped, and a single survivor is returned as is. A dynamic member
    /// makes the whole union dynamic.
    pub fn make_union(&mut self, members: &[ClassId]) -> TypeResult<ClassId> {
        let mut flat: Vec<ClassId> = Vec::new();
        for &member in members {
            match &self.class(member).kind {
                ClassKind::Union(inner) => {
                    for m in inner {
                        if !flat.contains(m) {
                            flat.push(*m);
                        }
                    }
                }
                ClassKind::Prim(_) => {
                    return Err(TypeError::InvalidUnion {
                        ty: self.display(member).to_string(),
                    })
                }
                ClassKind::Dynamic => return Ok(self.builtins.dynamic),
                _ => {
                    if !flat.contains(&member) {
                        flat.push(member);
                    }
                }
            }
        }

        let simplified: Vec<ClassId> = flat
            .iter()
            .copied()
            .filter(|&a| !flat.iter().any(|&b| b != a && self.can_assign_from(b, a)))
            .collect();
        match simplified.as_slice() {
            [] => return Ok(self.builtins.dynamic),
            [single] => return Ok(*single),
            _ => {}
        }

        let mut key = simplified.clone();
        key.sort();
        if let Some(&id) = self.unions.get(&key) {
            return Ok(id);
        }

        let none = self.builtins.none;
        let rest: Vec<String> = simplified
            .iter()
            .filter(|m| **m != none)
            .map(|m| self.display(*m).to_string())
            .collect();
        let inner = if rest.len() == 1 {
            rest[0].clone()
        } else {
            format!("Union[{}]", rest.join(", "))
        };
        let display = if simplified.contains(&none) {
            format!("Optional[{}]", inner)
        } else {
            inner
        };

        let id = self.add_class(
            TypeName::new("typing", "Union"),
            ClassKind::Union(simplified),
            Vec::new(),
        );
        self.class_mut(id).display = display;
        self.unions.insert(key, id);
        Ok(id)
    }

    /// `Optional[T]`.
    pub fn optional(&mut self, id: ClassId) -> TypeResult<ClassId> {
        let none = self.builtins.none;
        self.make_union(&[id, none])
    }

    /// The class with `None` removed from a union.
    pub fn without_none(&mut self, id: ClassId) -> ClassId {
        let none = self.builtins.none;
        let rest: Option<Vec<ClassId>> = self
            .union_members(id)
            .map(|members| members.iter().copied().filter(|m| *m != none).collect());
        match rest {
            Some(rest) => self.make_union(&rest).unwrap_or(id),
            None => id,
        }
    }

    // ========================================================================
    // Method Resolution Order
    // ========================================================================

    /// Resolved bases; a class without explicit bases derives from `object`.
    pub fn resolved_bases(&self, id: ClassId) -> TypeResult<Vec<ClassId>> {
        let class = self.class(id);
        if class.bases.is_empty() {
            return Ok(match class.kind {
                ClassKind::Object | ClassKind::Dynamic | ClassKind::Prim(_) => Vec::new(),
                _ => vec![self.builtins.object],
            });
        }
        class.bases.iter().map(TypeRef::resolved).collect()
    }

    /// C3 linearization of the class, computed once and cached.
    pub fn mro(&self, id: ClassId) -> TypeResult<Vec<ClassId>> {
        self.mro_inner(id, &mut Vec::new())
    }

    fn mro_inner(&self, id: ClassId, visiting: &mut Vec<ClassId>) -> TypeResult<Vec<ClassId>> {
        let class = self.class(id);
        if let Some(mro) = class.mro.get() {
            return Ok(mro.clone());
        }
        if visiting.contains(&id) {
            return Err(self.mro_error(id));
        }

        let mro = match (&class.kind, &class.generic) {
            (ClassKind::Object | ClassKind::Dynamic | ClassKind::Prim(_), _) => vec![id],
            (ClassKind::Union(_) | ClassKind::TypeParam(_), _) => vec![id, self.builtins.object],
            (_, GenericInfo::Instance { def, .. }) => {
                visiting.push(id);
                let def_mro = self.mro_inner(*def, visiting)?;
                visiting.pop();
                std::iter::once(id).chain(def_mro.into_iter().skip(1)).collect()
            }
            _ => {
                let bases = self.resolved_bases(id)?;
                visiting.push(id);
                let mut sequences = Vec::with_capacity(bases.len() + 1);
                for base in &bases {
                    sequences.push(self.mro_inner(*base, visiting)?);
                }
                visiting.pop();
                sequences.push(bases);
                let merged = c3_merge(sequences).ok_or_else(|| self.mro_error(id))?;
                std::iter::once(id).chain(merged).collect()
            }
        };
        let _ = class.mro.set(mro.clone());
        Ok(mro)
    }

    fn mro_error(&self, id: ClassId) -> TypeError {
        let bases = self
            .class(id)
            .bases
            .iter()
            .map(|b| match b {
                TypeRef::Resolved(base) => self.display(*base).to_string(),
                TypeRef::Unresolved { annotation, .. } => {
                    stpy_parser::ast::unparse::unparse_expr(annotation)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        TypeError::InconsistentMro { bases }
    }

    // ========================================================================
    // Members
    // ========================================================================

    /// Find a member along the MRO, returning the defining class.
    pub fn lookup_member(&self, id: ClassId, name: &str) -> Option<(ClassId, &Member)> {
        let mro = self.mro(id).unwrap_or_else(|_| vec![id]);
        mro.into_iter()
            .find_map(|c| self.class(c).members.get(name).map(|m| (c, m)))
    }

    /// Find a member in a strict ancestor (excluding the class itself).
    pub fn lookup_inherited(&self, id: ClassId, name: &str) -> Option<(ClassId, &Member)> {
        let mro = self.mro(id).ok()?;
        mro.into_iter()
            .skip(1)
            .find_map(|c| self.class(c).members.get(name).map(|m| (c, m)))
    }

    // ========================================================================
    // Names and Descriptors
    // ========================================================================

    /// Runtime descriptor of a class.
    pub fn descr(&self, id: ClassId) -> TypeDescr {
        let class = self.class(id);
        match &class.kind {
            ClassKind::Dynamic => return TypeDescr::object(),
            ClassKind::Prim(kind) => {
                return TypeDescr::new(["__static__", kind.name()]).with_marker('#')
            }
            ClassKind::Union(_) => {
                return match self.optional_inner(id) {
                    Some(inner) => self.descr(inner).with_marker('?'),
                    None => TypeDescr::object(),
                }
            }
            _ => {}
        }
        if class.is_exact {
            if let Some(inexact) = class.partner {
                return self.descr(inexact).with_marker('!');
            }
        }
        if let GenericInfo::Instance { def, args } = &class.generic {
            return self
                .descr(*def)
                .with_args(args.iter().map(|a| self.descr(*a)).collect());
        }
        TypeDescr::new(
            std::iter::once(class.name.module.clone())
                .chain(class.name.name.split('.').map(str::to_string)),
        )
    }

    /// Runtime descriptor of a function or method.
    pub fn function_descr(&self, id: FuncId) -> TypeDescr {
        TypeDescr::new(self.function(id).descr_path())
    }

    /// Name of a value's type for messages.
    pub fn value_name(&self, value: &Value) -> String {
        match value {
            Value::Dynamic => "dynamic".to_string(),
            Value::Instance(id) => self.display(*id).to_string(),
            Value::Class(id) => format!("Type[{}]", self.display(*id)),
            Value::Function(f) => format!("function {}", self.function(*f).qualname),
            Value::StaticMethod(f) => format!("staticmethod {}", self.function(*f).qualname),
            Value::BoundMethod { func, .. } => format!("method {}", self.function(*func).qualname),
            Value::BuiltinMethod { receiver, name } => {
                format!("method {}.{}", self.display(self.inexact(*receiver)), name)
            }
            Value::Module(name) => format!("module {}", name),
            Value::Builtin(b) => format!("builtin function {}", b.name()),
            Value::Decorator(_) => "decorator".to_string(),
            Value::SpecialForm(_) => "special form".to_string(),
        }
    }

    /// Instance value of a class, normalising the dynamic class.
    pub fn instance(&self, id: ClassId) -> Value {
        if self.is_dynamic(id) {
            Value::Dynamic
        } else {
            Value::Instance(id)
        }
    }

    /// Class of an instance value; everything else is dynamic.
    pub fn class_of(&self, value: &Value) -> ClassId {
        match value {
            Value::Instance(id) => *id,
            _ => self.builtins.dynamic,
        }
    }
}

fn specialize(member: &Member, owner: ClassId, substitute: &impl Fn(ClassId) -> ClassId) -> Member {
    match member {
        Member::BuiltinMethod(method) => {
            let mut method = method.clone();
            method.owner = owner;
            if let Some(sig) = &mut method.signature {
                for (_, ty) in &mut sig.params {
                    *ty = substitute(*ty);
                }
                sig.returns = substitute(sig.returns);
            }
            Member::BuiltinMethod(method)
        }
        Member::Slot(slot) => {
            let mut slot = slot.clone();
            slot.owner = owner;
            if let TypeRef::Resolved(ty) = slot.ty {
                slot.ty = TypeRef::Resolved(substitute(ty));
            }
            Member::Slot(slot)
        }
        other => other.clone(),
    }
}

/// Merge step of C3 linearization. `None` when no consistent order exists.
fn c3_merge(mut sequences: Vec<Vec<ClassId>>) -> Option<Vec<ClassId>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let candidate = sequences
            .iter()
            .map(|s| s[0])
            .find(|c| !sequences.iter().any(|s| s[1..].contains(c)))?;
        result.push(candidate);
        for sequence in &mut sequences {
            if sequence[0] == candidate {
                sequence.remove(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(universe: &mut TypeUniverse, name: &str, bases: &[ClassId]) -> ClassId {
        universe.add_class(
            TypeName::new("m", name),
            ClassKind::Plain,
            bases.iter().map(|b| TypeRef::Resolved(*b)).collect(),
        )
    }

    #[test]
    fn test_c3_diamond() {
        let mut u = TypeUniverse::new();
        let a = plain(&mut u, "A", &[]);
        let b = plain(&mut u, "B", &[a]);
        let c = plain(&mut u, "C", &[a]);
        let d = plain(&mut u, "D", &[b, c]);
        let object = u.builtins.object;
        assert_eq!(u.mro(d).unwrap(), vec![d, b, c, a, object]);
        assert!(u.class(d).has_mro());
    }

    #[test]
    fn test_inconsistent_mro() {
        let mut u = TypeUniverse::new();
        let a = plain(&mut u, "A", &[]);
        let b = plain(&mut u, "B", &[a]);
        let c = plain(&mut u, "C", &[a, b]);
        let err = u.mro(c).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot create a consistent method resolution order (MRO) for bases: m.A, m.B"
        );
    }

    #[test]
    fn test_cyclic_bases_fail() {
        let mut u = TypeUniverse::new();
        let a = plain(&mut u, "A", &[]);
        u.class_mut(a).bases = vec![TypeRef::Resolved(a)];
        assert!(matches!(u.mro(a), Err(TypeError::InconsistentMro { .. })));
    }

    #[test]
    fn test_exact_partner_is_cached() {
        let mut u = TypeUniverse::new();
        let a = plain(&mut u, "A", &[]);
        let exact = u.exact(a);
        assert_ne!(exact, a);
        assert_eq!(u.exact(a), exact);
        assert_eq!(u.exact(exact), exact);
        assert_eq!(u.inexact(exact), a);
        assert_eq!(u.display(exact), "Exact[m.A]");
        assert_eq!(u.mro(exact).unwrap()[1], a);
    }

    #[test]
    fn test_union_simplification() {
        let mut u = TypeUniverse::new();
        let int = u.builtins.int;
        let exact_int = u.builtins.exact_int;
        let none = u.builtins.none;
        let str_ = u.builtins.str_;

        assert_eq!(u.make_union(&[int, exact_int]).unwrap(), int);
        let opt = u.make_union(&[int, none]).unwrap();
        assert_eq!(u.display(opt), "Optional[int]");
        assert_eq!(u.make_union(&[none, int]).unwrap(), opt);
        assert_eq!(u.optional_inner(opt), Some(int));
        let nested = u.make_union(&[opt, str_]).unwrap();
        assert_eq!(u.union_members(nested).unwrap().len(), 3);
        assert_eq!(u.without_none(opt), int);

        let object = u.builtins.object;
        assert_eq!(u.make_union(&[int, object]).unwrap(), object);

        let int64 = u.prim(PrimKind::Int64);
        assert!(matches!(
            u.make_union(&[int, int64]),
            Err(TypeError::InvalidUnion { .. })
        ));
    }

    #[test]
    fn test_descriptors() {
        let mut u = TypeUniverse::new();
        let int = u.builtins.int;
        assert_eq!(u.descr(int).to_string(), "('builtins', 'int')");
        assert_eq!(u.descr(u.builtins.exact_int).to_string(), "('builtins', 'int', '!')");
        let opt = u.optional(int).unwrap();
        assert_eq!(u.descr(opt).to_string(), "('builtins', 'int', '?')");
        assert_eq!(
            u.descr(u.prim(PrimKind::Double)).to_string(),
            "('__static__', 'double', '#')"
        );
        let a = plain(&mut u, "A", &[]);
        assert_eq!(u.descr(a).path, vec!["m", "A"]);
    }
}
