//! Type universe integration tests

use stpy_types::*;

fn class(u: &mut TypeUniverse, name: &str, bases: &[ClassId]) -> ClassId {
    u.add_class(
        TypeName::new("shapes", name),
        ClassKind::Plain,
        bases.iter().map(|b| TypeRef::Resolved(*b)).collect(),
    )
}

#[test]
fn test_mro_is_deterministic() {
    let build = || {
        let mut u = TypeUniverse::new();
        let base = class(&mut u, "Base", &[]);
        let left = class(&mut u, "Left", &[base]);
        let right = class(&mut u, "Right", &[base]);
        let mixin = class(&mut u, "Mixin", &[]);
        let leaf = class(&mut u, "Leaf", &[left, right, mixin]);
        let mro = u.mro(leaf).unwrap();
        mro.iter().map(|c| u.display(*c).to_string()).collect::<Vec<_>>()
    };
    let first = build();
    assert_eq!(
        first,
        vec![
            "shapes.Leaf",
            "shapes.Left",
            "shapes.Right",
            "shapes.Base",
            "shapes.Mixin",
            "object"
        ]
    );
    for _ in 0..5 {
        assert_eq!(build(), first);
    }
}

#[test]
fn test_mro_failure_names_bases() {
    let mut u = TypeUniverse::new();
    let a = class(&mut u, "A", &[]);
    let b = class(&mut u, "B", &[a]);
    let bad = class(&mut u, "Bad", &[a, b]);
    match u.mro(bad) {
        Err(TypeError::InconsistentMro { bases }) => assert_eq!(bases, "shapes.A, shapes.B"),
        other => panic!("expected MRO failure, got {:?}", other),
    }
    // The failure is not cached as a success.
    assert!(u.mro(bad).is_err());
    assert!(!u.class(bad).has_mro());
}

#[test]
fn test_unresolved_bases_block_mro() {
    let mut u = TypeUniverse::new();
    let module = stpy_parser::parse_module("Base\n").unwrap();
    let stpy_parser::ast::StmtKind::Expr { value } = module.body[0].kind.clone() else {
        panic!("expected expression");
    };
    let c = u.add_class(
        TypeName::new("m", "C"),
        ClassKind::Plain,
        vec![TypeRef::unresolved("m", value)],
    );
    assert!(matches!(u.mro(c), Err(TypeError::UnresolvedTypeRef { .. })));
}

#[test]
fn test_exactness_is_monotone() {
    let mut u = TypeUniverse::new();
    let base = class(&mut u, "Base", &[]);
    let sub = class(&mut u, "Sub", &[base]);
    let candidates = [
        base,
        sub,
        u.builtins.int,
        u.builtins.bool_,
        u.builtins.object,
        u.builtins.none,
    ];
    let mut all: Vec<ClassId> = candidates.to_vec();
    for c in candidates {
        all.push(u.exact(c));
    }
    for &dest in &all {
        if !u.is_exact(dest) {
            continue;
        }
        for &src in &all {
            if u.can_assign_from(dest, src) {
                assert_eq!(
                    dest,
                    src,
                    "{} accepted {}",
                    u.display(dest),
                    u.display(src)
                );
            }
        }
    }
    let exact_bool = u.exact(u.builtins.bool_);
    assert!(u.can_assign_from(u.builtins.int, exact_bool));
    assert!(!u.can_assign_from(u.builtins.exact_int, exact_bool));
}

#[test]
fn test_generic_instantiation_is_memoized() {
    let mut u = TypeUniverse::new();
    let (list, dict) = (u.builtins.checked_list, u.builtins.checked_dict);
    let (int, str_) = (u.builtins.int, u.builtins.str_);

    let a = u.make_generic(list, &[int]).unwrap();
    let b = u.make_generic(list, &[int]).unwrap();
    let c = u.make_generic(list, &[str_]).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(u.display(a), "CheckedList[int]");
    assert_eq!(u.generic_args(a), &[int]);
    assert_eq!(u.generic_def(a), Some(list));

    let d1 = u.make_generic(dict, &[str_, int]).unwrap();
    let d2 = u.make_generic(dict, &[str_, int]).unwrap();
    assert_eq!(d1, d2);
    let count = u.class_count();
    u.make_generic(dict, &[str_, int]).unwrap();
    assert_eq!(u.class_count(), count);

    // The instantiation specialises method signatures.
    let Some((_, Member::BuiltinMethod(append))) = u.lookup_member(a, "append") else {
        panic!("expected append");
    };
    assert_eq!(append.signature.as_ref().unwrap().params[0].1, int);
}

#[test]
fn test_generic_errors() {
    let mut u = TypeUniverse::new();
    let int = u.builtins.int;
    let list = u.builtins.checked_list;
    assert!(matches!(
        u.make_generic(int, &[int]),
        Err(TypeError::NotGeneric { .. })
    ));
    assert!(matches!(
        u.make_generic(list, &[int, int]),
        Err(TypeError::InvalidTypeArgCount { expected: 1, actual: 2, .. })
    ));
    let int64 = u.prim(PrimKind::Int64);
    assert!(matches!(
        u.make_generic(list, &[int64]),
        Err(TypeError::PrimitiveTypeArgument { .. })
    ));
}
