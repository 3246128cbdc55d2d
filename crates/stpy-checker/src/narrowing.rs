//! Flow-sensitive narrowing effects
//!
//! Conditions such as `isinstance(x, int)`, `x is None` or the truthiness of an
//! optional local produce an effect. The binder applies an effect to the local
//! types of a branch where the condition holds, reverses it where the
//! condition fails and undoes it once the condition goes out of scope.

use rustc_hash::FxHashMap;
use stpy_types::{TypeUniverse, Value};

/// Current (possibly narrowed) type of each local in a binding scope.
pub type LocalTypes = FxHashMap<String, Value>;

/// What a condition tells us about local names.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NarrowingEffect {
    /// Nothing is known
    #[default]
    NoOp,
    /// Every inner effect holds
    And(Vec<NarrowingEffect>),
    /// At least one inner effect holds
    Or(Vec<NarrowingEffect>),
    /// The inner effect does not hold
    Not(Box<NarrowingEffect>),
    /// A single local is narrowed
    Narrow {
        /// Local name
        name: String,
        /// Type before the condition
        prev: Value,
        /// Type where the condition holds
        inst: Value,
        /// Type where the condition fails
        rev: Value,
    },
}

impl NarrowingEffect {
    /// Narrow `name` from `prev` to `inst`.
    ///
    /// The failing side keeps the members of a union `prev` that are not
    /// assignable to `inst`; any other `prev` stays as it is.
    pub fn narrow(universe: &mut TypeUniverse, name: impl Into<String>, prev: Value, inst: Value) -> Self {
        let rev = match (&prev, &inst) {
            (Value::Instance(prev_class), Value::Instance(inst_class)) => {
                match universe.union_members(*prev_class).map(<[_]>::to_vec) {
                    Some(members) => {
                        let rest: Vec<_> = members
                            .into_iter()
                            .filter(|m| !universe.can_assign_from(*inst_class, *m))
                            .collect();
                        match universe.make_union(&rest) {
                            Ok(union) => universe.instance(union),
                            Err(_) => prev.clone(),
                        }
                    }
                    None => prev.clone(),
                }
            }
            _ => prev.clone(),
        };
        NarrowingEffect::Narrow {
            name: name.into(),
            prev,
            inst,
            rev,
        }
    }

    #[allow(missing_docs)]
    pub fn is_noop(&self) -> bool {
        matches!(self, NarrowingEffect::NoOp)
    }

    /// Set locals to their types where the condition holds.
    pub fn apply(&self, locals: &mut LocalTypes) {
        match self {
            NarrowingEffect::NoOp | NarrowingEffect::Or(_) => {}
            NarrowingEffect::And(effects) => {
                for effect in effects {
                    effect.apply(locals);
                }
            }
            NarrowingEffect::Not(inner) => inner.reverse(locals),
            NarrowingEffect::Narrow { name, inst, .. } => {
                locals.insert(name.clone(), inst.clone());
            }
        }
    }

    /// Restore locals to their types before the condition.
    pub fn undo(&self, locals: &mut LocalTypes) {
        match self {
            NarrowingEffect::NoOp => {}
            NarrowingEffect::And(effects) | NarrowingEffect::Or(effects) => {
                for effect in effects.iter().rev() {
                    effect.undo(locals);
                }
            }
            NarrowingEffect::Not(inner) => inner.undo(locals),
            NarrowingEffect::Narrow { name, prev, .. } => {
                locals.insert(name.clone(), prev.clone());
            }
        }
    }

    /// Set locals to their types where the condition fails.
    pub fn reverse(&self, locals: &mut LocalTypes) {
        match self {
            NarrowingEffect::NoOp => {}
            // Failing `a and b` says nothing about which operand failed.
            NarrowingEffect::And(_) => self.undo(locals),
            NarrowingEffect::Or(effects) => {
                for effect in effects {
                    effect.reverse(locals);
                }
            }
            NarrowingEffect::Not(inner) => inner.apply(locals),
            NarrowingEffect::Narrow { name, rev, .. } => {
                locals.insert(name.clone(), rev.clone());
            }
        }
    }

    /// A copy of `locals` with the effect reversed.
    pub fn reversed(&self, locals: &LocalTypes) -> LocalTypes {
        let mut copy = locals.clone();
        self.reverse(&mut copy);
        copy
    }

    /// Both effects hold.
    pub fn and(self, other: NarrowingEffect) -> NarrowingEffect {
        match (self, other) {
            (NarrowingEffect::NoOp, other) | (other, NarrowingEffect::NoOp) => other,
            (NarrowingEffect::And(mut left), NarrowingEffect::And(right)) => {
                left.extend(right);
                NarrowingEffect::And(left)
            }
            (NarrowingEffect::And(mut left), other) => {
                left.push(other);
                NarrowingEffect::And(left)
            }
            (this, other) => NarrowingEffect::And(vec![this, other]),
        }
    }

    /// Either effect holds.
    pub fn or(self, other: NarrowingEffect) -> NarrowingEffect {
        match (self, other) {
            (NarrowingEffect::NoOp, other) | (other, NarrowingEffect::NoOp) => other,
            (NarrowingEffect::Or(mut left), NarrowingEffect::Or(right)) => {
                left.extend(right);
                NarrowingEffect::Or(left)
            }
            (NarrowingEffect::Or(mut left), other) => {
                left.push(other);
                NarrowingEffect::Or(left)
            }
            (this, other) => NarrowingEffect::Or(vec![this, other]),
        }
    }

    /// The effect of the negated condition. Double negation cancels out.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> NarrowingEffect {
        match self {
            NarrowingEffect::NoOp => NarrowingEffect::NoOp,
            NarrowingEffect::Not(inner) => *inner,
            other => NarrowingEffect::Not(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optional_int(u: &mut TypeUniverse) -> (Value, Value, Value) {
        let int = u.builtins.int;
        let opt = u.optional(int).unwrap();
        (Value::Instance(opt), Value::Instance(int), Value::Instance(u.builtins.none))
    }

    #[test]
    fn test_narrow_apply_reverse_undo() {
        let mut u = TypeUniverse::new();
        let (opt, int, none) = optional_int(&mut u);
        let effect = NarrowingEffect::narrow(&mut u, "x", opt.clone(), int.clone());
        let mut locals = LocalTypes::default();
        locals.insert("x".to_string(), opt.clone());

        effect.apply(&mut locals);
        assert_eq!(locals["x"], int);
        effect.reverse(&mut locals);
        assert_eq!(locals["x"], none);
        effect.undo(&mut locals);
        assert_eq!(locals["x"], opt);
    }

    #[test]
    fn test_double_negation_round_trip() {
        let mut u = TypeUniverse::new();
        let (opt, _, none) = optional_int(&mut u);
        let effect = NarrowingEffect::narrow(&mut u, "x", opt.clone(), none);
        let twice = effect.clone().not().not();
        assert_eq!(twice, effect);

        let mut direct = LocalTypes::default();
        direct.insert("x".to_string(), opt.clone());
        let mut via_not = direct.clone();
        effect.apply(&mut direct);
        twice.apply(&mut via_not);
        assert_eq!(direct, via_not);
    }

    #[test]
    fn test_not_swaps_apply_and_reverse() {
        let mut u = TypeUniverse::new();
        let (opt, int, _) = optional_int(&mut u);
        let effect = NarrowingEffect::narrow(&mut u, "x", opt.clone(), int.clone());
        let mut locals = LocalTypes::default();
        locals.insert("x".to_string(), opt.clone());
        let expected = effect.reversed(&locals);
        effect.clone().not().apply(&mut locals);
        assert_eq!(locals, expected);
    }

    #[test]
    fn test_combinators() {
        let mut u = TypeUniverse::new();
        let (opt, int, _) = optional_int(&mut u);
        let a = NarrowingEffect::narrow(&mut u, "a", opt.clone(), int.clone());
        let b = NarrowingEffect::narrow(&mut u, "b", opt.clone(), int.clone());
        assert_eq!(NarrowingEffect::NoOp.and(a.clone()), a);
        let both = a.clone().and(b.clone());
        assert!(matches!(&both, NarrowingEffect::And(v) if v.len() == 2));

        let mut locals = LocalTypes::default();
        locals.insert("a".to_string(), opt.clone());
        locals.insert("b".to_string(), opt.clone());
        both.apply(&mut locals);
        assert_eq!(locals["a"], int);
        assert_eq!(locals["b"], int);
        both.reverse(&mut locals);
        assert_eq!(locals["a"], opt);

        let either = a.or(b);
        let before = locals.clone();
        either.apply(&mut locals);
        assert_eq!(locals, before);
    }
}
