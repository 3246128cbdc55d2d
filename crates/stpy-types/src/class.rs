//! Classes and their members

use crate::function::{FuncId, TypeRef};
use crate::primitive::PrimKind;
use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;
use std::fmt;
use stpy_parser::ast::{Constant, NodeId};

/// Index of a class in the [`TypeUniverse`](crate::TypeUniverse).
///
/// Two `ClassId`s are equal exactly when they denote the same class, which
/// also holds for memoized generic instantiations and unions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Position in the class arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Qualified name of a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    /// Defining module
    pub module: String,
    /// Class name (may be dotted for nested classes)
    pub name: String,
}

impl TypeName {
    /// Create a type name
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        TypeName {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Name as shown in messages: bare for builtins, `module.name` otherwise.
    pub fn friendly(&self) -> String {
        if self.module == "builtins" || self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }
}

/// What a class is, as far as specialised behaviour is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ClassKind {
    Object,
    Type,
    /// The unknown type; accepts and provides anything.
    Dynamic,
    NoneType,
    Int,
    Bool,
    Float,
    Complex,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    CheckedList,
    CheckedDict,
    /// Fixed-size buffer of primitive integers.
    Array,
    /// Resizable [`ClassKind::Array`].
    Vector,
    /// Source-defined classes and builtin classes without special behaviour.
    Plain,
    Prim(PrimKind),
    /// Simplified union; members are never unions themselves.
    Union(Vec<ClassId>),
    /// Type parameter of a generic definition, by position.
    TypeParam(usize),
}

/// Generic shape of a class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenericInfo {
    /// Not generic
    #[default]
    None,
    /// A generic definition with its type parameter classes
    Definition {
        /// One `TypeParam` class per parameter
        params: Vec<ClassId>,
    },
    /// A memoized instantiation
    Instance {
        /// The definition
        def: ClassId,
        /// Type arguments
        args: Vec<ClassId>,
    },
}

/// A typed attribute declared on a class.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Attribute name
    pub name: String,
    /// Declaring class
    pub owner: ClassId,
    /// Declared type; resolves to dynamic for unannotated attributes
    pub ty: TypeRef,
    /// Further annotations of the same name, checked for conflicts
    pub redeclared: Vec<TypeRef>,
    /// Declared `Final`
    pub is_final: bool,
    /// Declared `ClassVar`
    pub is_classvar: bool,
    /// Given a value in the class body (or for finals, in `__init__`)
    pub assigned: bool,
    /// Literal value of a `Final` class attribute
    pub final_value: Option<Constant>,
    /// Declaring statement
    pub node: Option<NodeId>,
}

impl Slot {
    /// Create an attribute with the given type
    pub fn new(name: impl Into<String>, owner: ClassId, ty: TypeRef) -> Self {
        Slot {
            name: name.into(),
            owner,
            ty,
            redeclared: Vec::new(),
            is_final: false,
            is_classvar: false,
            assigned: false,
            final_value: None,
            node: None,
        }
    }

    /// Instance-level storage (not a class variable).
    pub fn is_instance_slot(&self) -> bool {
        !self.is_classvar
    }
}

/// A method of a builtin class. Methods without a signature are called
/// through the dynamic protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinMethod {
    /// Method name
    pub name: String,
    /// Class that defines the method
    pub owner: ClassId,
    /// Positional-only parameters after `self`, and the result type
    pub signature: Option<BuiltinSignature>,
}

/// Parameter and result types of a builtin method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinSignature {
    /// `(name, type)` for each parameter after `self`
    pub params: Vec<(String, ClassId)>,
    /// Result type
    pub returns: ClassId,
}

/// A named member of a class.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Typed attribute
    Slot(Slot),
    /// Instance method
    Method(FuncId),
    /// `@staticmethod`
    StaticMethod(FuncId),
    /// Method of a builtin class
    BuiltinMethod(BuiltinMethod),
    /// Attribute of unknown shape (e.g. a method with an unknown decorator)
    Dynamic,
}

impl Member {
    /// Short kind description used in conflict messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Member::Slot(_) => "slot",
            Member::Method(_) | Member::StaticMethod(_) | Member::BuiltinMethod(_) => "function",
            Member::Dynamic => "member",
        }
    }

    /// The attribute if this member is a slot.
    pub fn as_slot(&self) -> Option<&Slot> {
        match self {
            Member::Slot(slot) => Some(slot),
            _ => None,
        }
    }

    /// The function of a method or static method.
    pub fn func(&self) -> Option<FuncId> {
        match self {
            Member::Method(f) | Member::StaticMethod(f) => Some(*f),
            _ => None,
        }
    }
}

/// A class in the type universe.
#[derive(Debug, Clone)]
pub struct Class {
    /// Identity
    pub id: ClassId,
    /// Qualified name
    pub name: TypeName,
    /// Name used in messages
    pub display: String,
    /// Specialised behaviour
    pub kind: ClassKind,
    /// Declared bases; resolved during finish-bind
    pub bases: Vec<TypeRef>,
    /// Values are known to be exactly this class (no subclass instances)
    pub is_exact: bool,
    /// Decorated `@final`; cannot be subclassed
    pub is_final: bool,
    #[allow(missing_docs)]
    pub allow_weakrefs: bool,
    /// Decorated `@donotcompile`
    pub donotcompile: bool,
    /// Exact variant for an inexact class, inexact original for an exact one
    pub partner: Option<ClassId>,
    /// Generic definition or instantiation data
    pub generic: GenericInfo,
    /// Members by name
    pub members: FxHashMap<String, Member>,
    /// Member names in declaration order
    pub member_order: Vec<String>,
    /// Declaring `class` statement for source classes
    pub node: Option<NodeId>,
    pub(crate) mro: OnceCell<Vec<ClassId>>,
}

impl Class {
    /// Create an inexact class with no members.
    pub fn new(id: ClassId, name: TypeName, kind: ClassKind, bases: Vec<TypeRef>) -> Self {
        let display = name.friendly();
        Class {
            id,
            name,
            display,
            kind,
            bases,
            is_exact: false,
            is_final: false,
            allow_weakrefs: false,
            donotcompile: false,
            partner: None,
            generic: GenericInfo::None,
            members: FxHashMap::default(),
            member_order: Vec::new(),
            node: None,
            mro: OnceCell::new(),
        }
    }

    /// Add or replace a member, keeping first-declaration order.
    pub fn define(&mut self, name: impl Into<String>, member: Member) {
        let name = name.into();
        if !self.members.contains_key(&name) {
            self.member_order.push(name.clone());
        }
        self.members.insert(name, member);
    }

    /// Remove a member.
    pub fn undefine(&mut self, name: &str) -> Option<Member> {
        self.member_order.retain(|n| n != name);
        self.members.remove(name)
    }

    /// Own (non-inherited) instance slots in declaration order.
    pub fn instance_slots(&self) -> impl Iterator<Item = &Slot> {
        self.member_order
            .iter()
            .filter_map(|name| self.members.get(name))
            .filter_map(Member::as_slot)
            .filter(|slot| slot.is_instance_slot())
    }

    /// Primitive kind if this is a primitive class.
    pub fn prim_kind(&self) -> Option<PrimKind> {
        match self.kind {
            ClassKind::Prim(kind) => Some(kind),
            _ => None,
        }
    }

    /// Members of a union class.
    pub fn union_members(&self) -> Option<&[ClassId]> {
        match &self.kind {
            ClassKind::Union(members) => Some(members),
            _ => None,
        }
    }

    /// Whether an MRO has already been computed.
    pub fn has_mro(&self) -> bool {
        self.mro.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_friendly_names() {
        assert_eq!(TypeName::new("builtins", "int").friendly(), "int");
        assert_eq!(TypeName::new("mod", "C").friendly(), "mod.C");
    }

    #[test]
    fn test_define_keeps_order() {
        let mut class = Class::new(
            ClassId(0),
            TypeName::new("m", "C"),
            ClassKind::Plain,
            Vec::new(),
        );
        class.define("b", Member::Dynamic);
        class.define("a", Member::Dynamic);
        class.define("b", Member::Method(FuncId(3)));
        assert_eq!(class.member_order, vec!["b", "a"]);
        assert_eq!(class.members["b"].func(), Some(FuncId(3)));
        class.undefine("b");
        assert_eq!(class.member_order, vec!["a"]);
    }
}
