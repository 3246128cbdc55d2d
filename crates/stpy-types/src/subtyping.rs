//! Subclass and assignability relations
//!
//! `is_subclass` is the nominal relation over MROs. `can_assign_from` is the
//! static assignability check used for declarations, arguments and returns:
//! exact destinations accept only themselves, primitives never mix with
//! objects, and dynamic is handled by the caller.

use crate::class::{ClassId, ClassKind};
use crate::universe::TypeUniverse;

impl TypeUniverse {
    /// Nominal subclass relation (`sub` has `sup` in its MRO).
    pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        if sub == sup {
            return true;
        }
        if let Some(members) = self.union_members(sub) {
            return members.iter().all(|m| self.is_subclass(*m, sup));
        }
        if let Some(members) = self.union_members(sup) {
            return members.iter().any(|m| self.is_subclass(sub, *m));
        }
        if self.is_prim(sub) || self.is_prim(sup) || self.is_dynamic(sub) {
            return false;
        }
        if sup == self.builtins.object {
            return true;
        }
        if self.generic_def(sub) == Some(sup) {
            return true;
        }
        match self.mro(sub) {
            Ok(mro) => mro.iter().any(|c| {
                *c == sup || self.generic_def(*c) == Some(sup)
            }),
            Err(_) => false,
        }
    }

    /// Whether a value of static type `src` may be stored where `dest` is
    /// declared, without any runtime check.
    ///
    /// An exact destination accepts only itself: an inexact or subclass
    /// source could hold a subclass instance.
    pub fn can_assign_from(&self, dest: ClassId, src: ClassId) -> bool {
        if dest == src {
            return true;
        }
        match (self.prim_kind(dest), self.prim_kind(src)) {
            (Some(d), Some(s)) => return d.can_assign_from(s),
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => {}
        }
        if self.is_dynamic(dest) {
            return true;
        }
        if self.is_dynamic(src) {
            return false;
        }
        if let Some(members) = self.union_members(src) {
            return members.iter().all(|m| self.can_assign_from(dest, *m));
        }
        if let Some(members) = self.union_members(dest) {
            return members.iter().any(|m| self.can_assign_from(*m, src));
        }
        if self.is_exact(dest) {
            return false;
        }
        if self.is_subclass(src, dest) {
            return true;
        }
        // int promotes to float and complex, float to complex.
        let src_kind = self.kind(self.inexact(src));
        match self.kind(dest) {
            ClassKind::Float => matches!(src_kind, ClassKind::Int | ClassKind::Bool),
            ClassKind::Complex => {
                matches!(src_kind, ClassKind::Int | ClassKind::Bool | ClassKind::Float)
            }
            _ => false,
        }
    }

    /// Join of two branch types: identical types survive, primitives must
    /// agree, everything else widens to the union of the inexact types.
    pub fn join(&mut self, a: ClassId, b: ClassId) -> ClassId {
        if a == b {
            return a;
        }
        if self.is_prim(a) || self.is_prim(b) || self.is_dynamic(a) || self.is_dynamic(b) {
            return self.builtins.dynamic;
        }
        let (wa, wb) = (self.widen(a), self.widen(b));
        self.make_union(&[wa, wb]).unwrap_or(self.builtins.dynamic)
    }
}

#[cfg(test)]
mod tests {
    use crate::class::TypeName;
    use crate::function::TypeRef;
    use crate::primitive::PrimKind;
    use crate::*;

    #[test]
    fn test_subclass_and_assignability() {
        let mut u = TypeUniverse::new();
        let a = u.add_class(TypeName::new("m", "A"), ClassKind::Plain, vec![]);
        let b = u.add_class(
            TypeName::new("m", "B"),
            ClassKind::Plain,
            vec![TypeRef::Resolved(a)],
        );
        assert!(u.is_subclass(b, a));
        assert!(!u.is_subclass(a, b));
        assert!(u.can_assign_from(a, b));
        assert!(!u.can_assign_from(b, a));
        assert!(u.can_assign_from(u.builtins.object, b));
        assert!(u.can_assign_from(u.builtins.dynamic, b));
        assert!(!u.can_assign_from(b, u.builtins.dynamic));
    }

    #[test]
    fn test_exact_destinations_accept_only_themselves() {
        let mut u = TypeUniverse::new();
        let a = u.add_class(TypeName::new("m", "A"), ClassKind::Plain, vec![]);
        let b = u.add_class(
            TypeName::new("m", "B"),
            ClassKind::Plain,
            vec![TypeRef::Resolved(a)],
        );
        let exact_a = u.exact(a);
        let exact_b = u.exact(b);
        assert!(u.can_assign_from(a, exact_a));
        assert!(u.can_assign_from(a, exact_b));
        assert!(!u.can_assign_from(exact_a, a));
        assert!(!u.can_assign_from(exact_a, exact_b));
        assert!(!u.can_assign_from(exact_a, b));
        assert!(u.can_assign_from(exact_a, exact_a));
    }

    #[test]
    fn test_unions_and_numbers() {
        let mut u = TypeUniverse::new();
        let (int, str_, none, float) = (
            u.builtins.int,
            u.builtins.str_,
            u.builtins.none,
            u.builtins.float,
        );
        let opt = u.optional(int).unwrap();
        assert!(u.can_assign_from(opt, none));
        assert!(u.can_assign_from(opt, u.builtins.exact_int));
        assert!(!u.can_assign_from(int, opt));
        assert!(!u.can_assign_from(opt, str_));
        assert!(u.can_assign_from(float, u.builtins.exact_int));
        assert!(!u.can_assign_from(int, float));
        assert!(!u.can_assign_from(int, u.prim(PrimKind::Int64)));
        assert!(!u.can_assign_from(u.builtins.dynamic, u.prim(PrimKind::Int64)));
    }

    #[test]
    fn test_join() {
        let mut u = TypeUniverse::new();
        let (exact_int, exact_str) = (u.builtins.exact_int, u.builtins.exact_str);
        let joined = u.join(exact_int, exact_str);
        assert_eq!(u.display(joined), "Union[int, str]");
        assert_eq!(u.join(exact_int, exact_int), exact_int);
        let int64 = u.prim(PrimKind::Int64);
        assert_eq!(u.join(int64, exact_int), u.builtins.dynamic);
    }

    #[test]
    fn test_generic_instances_subclass_definition() {
        let mut u = TypeUniverse::new();
        let def = u.builtins.checked_list;
        let int = u.builtins.int;
        let inst = u.make_generic(def, &[int]).unwrap();
        assert!(u.is_subclass(inst, def));
        assert!(u.can_assign_from(u.builtins.object, inst));
    }
}
