//! Builtin classes and builtin method signatures

use crate::class::{BuiltinMethod, BuiltinSignature, ClassId, ClassKind, GenericInfo, Member, TypeName};
use crate::function::TypeRef;
use crate::primitive::PrimKind;
use crate::universe::TypeUniverse;

/// Ids of the builtin classes every compilation starts with.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct Builtins {
    pub object: ClassId,
    pub type_: ClassId,
    pub dynamic: ClassId,
    pub none: ClassId,
    pub int: ClassId,
    pub exact_int: ClassId,
    pub bool_: ClassId,
    pub exact_bool: ClassId,
    pub float: ClassId,
    pub exact_float: ClassId,
    pub complex: ClassId,
    pub exact_complex: ClassId,
    pub str_: ClassId,
    pub exact_str: ClassId,
    pub bytes: ClassId,
    pub exact_bytes: ClassId,
    pub list: ClassId,
    pub exact_list: ClassId,
    pub tuple: ClassId,
    pub exact_tuple: ClassId,
    pub dict: ClassId,
    pub exact_dict: ClassId,
    pub set: ClassId,
    pub exact_set: ClassId,
    pub frozenset: ClassId,
    pub exact_frozenset: ClassId,
    pub base_exception: ClassId,
    pub exception: ClassId,
    /// `CheckedList[T]` definition
    pub checked_list: ClassId,
    /// `CheckedDict[K, V]` definition
    pub checked_dict: ClassId,
    /// `Array[T]` definition
    pub array: ClassId,
    /// `Vector[T]` definition
    pub vector: ClassId,
    /// Primitive classes indexed by `PrimKind as usize`
    pub prims: [ClassId; 11],
    /// Exception classes by name
    pub exceptions: Vec<(String, ClassId)>,
}

/// Builtin exception hierarchy as `(name, base)`; bases precede subclasses.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("AssertionError", "Exception"),
    ("AttributeError", "Exception"),
    ("ImportError", "Exception"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("NameError", "Exception"),
    ("OSError", "Exception"),
    ("RuntimeError", "Exception"),
    ("NotImplementedError", "RuntimeError"),
    ("RecursionError", "RuntimeError"),
    ("StopIteration", "Exception"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
    ("KeyboardInterrupt", "BaseException"),
    ("SystemExit", "BaseException"),
    ("GeneratorExit", "BaseException"),
];

fn class(
    universe: &mut TypeUniverse,
    module: &str,
    name: &str,
    kind: ClassKind,
    bases: &[ClassId],
) -> ClassId {
    universe.add_class(
        TypeName::new(module, name),
        kind,
        bases.iter().map(|b| TypeRef::Resolved(*b)).collect(),
    )
}

/// Attach builtin methods; `None` signatures are dynamic.
fn methods(universe: &mut TypeUniverse, owner: ClassId, table: &[(&str, Option<BuiltinSignature>)]) {
    for (name, signature) in table {
        universe.class_mut(owner).define(
            *name,
            Member::BuiltinMethod(BuiltinMethod {
                name: name.to_string(),
                owner,
                signature: signature.clone(),
            }),
        );
    }
}

fn sig(params: &[(&str, ClassId)], returns: ClassId) -> Option<BuiltinSignature> {
    Some(BuiltinSignature {
        params: params.iter().map(|(n, ty)| (n.to_string(), *ty)).collect(),
        returns,
    })
}

/// Populate a fresh universe with the builtin classes.
pub(crate) fn install(u: &mut TypeUniverse) -> Builtins {
    let mut b = Builtins::default();

    b.object = class(u, "builtins", "object", ClassKind::Object, &[]);
    b.type_ = class(u, "builtins", "type", ClassKind::Type, &[b.object]);
    b.dynamic = class(u, "builtins", "dynamic", ClassKind::Dynamic, &[]);
    b.none = class(u, "builtins", "NoneType", ClassKind::NoneType, &[b.object]);
    {
        let none = u.class_mut(b.none);
        none.display = "None".to_string();
        none.is_exact = true;
        none.is_final = true;
    }

    b.int = class(u, "builtins", "int", ClassKind::Int, &[b.object]);
    b.bool_ = class(u, "builtins", "bool", ClassKind::Bool, &[b.int]);
    u.class_mut(b.bool_).is_final = true;
    b.float = class(u, "builtins", "float", ClassKind::Float, &[b.object]);
    b.complex = class(u, "builtins", "complex", ClassKind::Complex, &[b.object]);
    b.str_ = class(u, "builtins", "str", ClassKind::Str, &[b.object]);
    b.bytes = class(u, "builtins", "bytes", ClassKind::Bytes, &[b.object]);
    b.list = class(u, "builtins", "list", ClassKind::List, &[b.object]);
    b.tuple = class(u, "builtins", "tuple", ClassKind::Tuple, &[b.object]);
    b.dict = class(u, "builtins", "dict", ClassKind::Dict, &[b.object]);
    b.set = class(u, "builtins", "set", ClassKind::Set, &[b.object]);
    b.frozenset = class(u, "builtins", "frozenset", ClassKind::FrozenSet, &[b.object]);

    b.exact_int = u.exact(b.int);
    b.exact_bool = u.exact(b.bool_);
    b.exact_float = u.exact(b.float);
    b.exact_complex = u.exact(b.complex);
    b.exact_str = u.exact(b.str_);
    b.exact_bytes = u.exact(b.bytes);
    b.exact_list = u.exact(b.list);
    b.exact_tuple = u.exact(b.tuple);
    b.exact_dict = u.exact(b.dict);
    b.exact_set = u.exact(b.set);
    b.exact_frozenset = u.exact(b.frozenset);

    b.base_exception = class(u, "builtins", "BaseException", ClassKind::Plain, &[b.object]);
    b.exceptions.push(("BaseException".to_string(), b.base_exception));
    for (name, base) in EXCEPTIONS {
        let base = b
            .exceptions
            .iter()
            .find(|(n, _)| n == base)
            .map(|(_, id)| *id)
            .unwrap_or(b.base_exception);
        let id = class(u, "builtins", name, ClassKind::Plain, &[base]);
        b.exceptions.push((name.to_string(), id));
    }
    b.exception = b
        .exceptions
        .iter()
        .find(|(n, _)| n == "Exception")
        .map(|(_, id)| *id)
        .unwrap_or(b.base_exception);

    for kind in PrimKind::ALL {
        let id = class(u, "__static__", kind.name(), ClassKind::Prim(kind), &[]);
        u.class_mut(id).display = kind.name().to_string();
        b.prims[kind as usize] = id;
    }

    let t = class(u, "__static__", "T", ClassKind::TypeParam(0), &[]);
    let k = class(u, "__static__", "K", ClassKind::TypeParam(0), &[]);
    let v = class(u, "__static__", "V", ClassKind::TypeParam(1), &[]);
    b.checked_list = class(u, "__static__", "chklist", ClassKind::CheckedList, &[b.object]);
    b.checked_dict = class(u, "__static__", "chkdict", ClassKind::CheckedDict, &[b.object]);
    {
        let list = u.class_mut(b.checked_list);
        list.display = "CheckedList".to_string();
        list.is_final = true;
        list.generic = GenericInfo::Definition { params: vec![t] };
        let dict = u.class_mut(b.checked_dict);
        dict.display = "CheckedDict".to_string();
        dict.is_final = true;
        dict.generic = GenericInfo::Definition { params: vec![k, v] };
    }
    b.array = class(u, "__static__", "Array", ClassKind::Array, &[b.object]);
    b.vector = class(u, "__static__", "Vector", ClassKind::Vector, &[b.object]);
    for id in [b.array, b.vector] {
        let array = u.class_mut(id);
        array.is_final = true;
        array.generic = GenericInfo::Definition { params: vec![t] };
    }

    install_methods(u, &b, t, k);
    b
}

fn install_methods(u: &mut TypeUniverse, b: &Builtins, t: ClassId, k: ClassId) {
    let (object, none) = (b.object, b.none);
    let (int, exact_int, exact_bool, exact_str) = (b.int, b.exact_int, b.exact_bool, b.exact_str);

    methods(
        u,
        b.str_,
        &[
            ("upper", sig(&[], exact_str)),
            ("lower", sig(&[], exact_str)),
            ("capitalize", sig(&[], exact_str)),
            ("title", sig(&[], exact_str)),
            ("swapcase", sig(&[], exact_str)),
            ("casefold", sig(&[], exact_str)),
            ("isdigit", sig(&[], exact_bool)),
            ("isalpha", sig(&[], exact_bool)),
            ("isalnum", sig(&[], exact_bool)),
            ("isspace", sig(&[], exact_bool)),
            ("isupper", sig(&[], exact_bool)),
            ("islower", sig(&[], exact_bool)),
            ("join", sig(&[("iterable", object)], exact_str)),
            ("strip", None),
            ("split", None),
            ("replace", None),
            ("startswith", None),
            ("endswith", None),
            ("format", None),
            ("encode", None),
            ("find", None),
        ],
    );
    methods(
        u,
        b.list,
        &[
            ("append", sig(&[("object", object)], none)),
            ("extend", sig(&[("iterable", object)], none)),
            ("insert", sig(&[("index", int), ("object", object)], none)),
            ("remove", sig(&[("value", object)], none)),
            ("clear", sig(&[], none)),
            ("reverse", sig(&[], none)),
            ("copy", sig(&[], b.exact_list)),
            ("pop", None),
            ("index", None),
            ("count", None),
            ("sort", None),
        ],
    );
    methods(
        u,
        b.dict,
        &[
            ("clear", sig(&[], none)),
            ("copy", sig(&[], b.exact_dict)),
            ("keys", None),
            ("values", None),
            ("items", None),
            ("get", None),
            ("pop", None),
            ("setdefault", None),
            ("update", None),
        ],
    );
    methods(
        u,
        b.set,
        &[
            ("add", sig(&[("element", object)], none)),
            ("discard", sig(&[("element", object)], none)),
            ("remove", sig(&[("element", object)], none)),
            ("clear", sig(&[], none)),
            ("copy", sig(&[], b.exact_set)),
            ("union", None),
            ("update", None),
        ],
    );
    methods(
        u,
        b.int,
        &[
            ("bit_length", sig(&[], exact_int)),
            ("conjugate", sig(&[], exact_int)),
            ("to_bytes", None),
        ],
    );
    methods(
        u,
        b.checked_list,
        &[
            ("append", sig(&[("object", t)], none)),
            ("extend", sig(&[("iterable", object)], none)),
            ("clear", sig(&[], none)),
            ("reverse", sig(&[], none)),
            ("pop", None),
            ("index", None),
        ],
    );
    methods(
        u,
        b.checked_dict,
        &[
            ("clear", sig(&[], none)),
            ("__contains__", sig(&[("key", k)], exact_bool)),
            ("get", None),
            ("keys", None),
            ("values", None),
            ("items", None),
        ],
    );
    methods(u, b.vector, &[("append", None)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        let u = TypeUniverse::new();
        let b = &u.builtins;
        let mro = u.mro(b.bool_).unwrap();
        assert_eq!(mro, vec![b.bool_, b.int, b.object]);
        assert!(u.is_exact(b.exact_int));
        assert!(u.is_exact(b.none));
        assert_eq!(u.display(b.none), "None");
        assert_eq!(u.display(u.prim(PrimKind::Int64)), "int64");
        assert_eq!(u.value_name(&crate::value::Value::Instance(u.prim(PrimKind::Double))), "double");
        let key_error = b.exceptions.iter().find(|(n, _)| n == "KeyError").unwrap().1;
        assert_eq!(u.mro(key_error).unwrap().len(), 5);
    }

    #[test]
    fn test_array_element_types() {
        let mut u = TypeUniverse::new();
        let b = u.builtins.clone();
        let int8 = u.prim(PrimKind::Int8);
        let array = u.make_generic(b.array, &[int8]).unwrap();
        assert_eq!(u.display(array), "Array[int8]");
        assert_eq!(u.kind(array), &ClassKind::Array);
        assert!(u.is_exact_or_final(array));
        assert_eq!(u.make_generic(b.array, &[int8]).unwrap(), array);

        let err = u.make_generic(b.vector, &[b.int]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Vector element type: int");
        let cbool = u.prim(PrimKind::CBool);
        let err = u.make_generic(b.array, &[cbool]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Array element type: cbool");
        let err = u.make_generic(b.checked_list, &[int8]).unwrap_err();
        assert_eq!(err.to_string(), "cannot use primitive int8 as a type argument");
    }

    #[test]
    fn test_builtin_methods() {
        let u = TypeUniverse::new();
        let (owner, member) = u.lookup_member(u.builtins.exact_str, "upper").unwrap();
        assert_eq!(owner, u.builtins.str_);
        let Member::BuiltinMethod(method) = member else {
            panic!("expected builtin method");
        };
        assert_eq!(method.signature.as_ref().unwrap().returns, u.builtins.exact_str);
        let Member::BuiltinMethod(split) = u.lookup_member(u.builtins.str_, "split").unwrap().1
        else {
            panic!("expected builtin method");
        };
        assert!(split.signature.is_none());
    }
}
