//! Static Python Type Universe
//!
//! Classes, primitives, functions and the relations between them for one
//! compilation: C3 method resolution, exactness, memoized generics and
//! unions, assignability and runtime type descriptors.

#![warn(missing_docs)]

pub mod builtins;
pub mod class;
pub mod descr;
pub mod error;
pub mod function;
pub mod primitive;
pub mod subtyping;
pub mod universe;
pub mod value;

pub use builtins::Builtins;
pub use class::{
    BuiltinMethod, BuiltinSignature, Class, ClassId, ClassKind, GenericInfo, Member, Slot, TypeName,
};
pub use descr::TypeDescr;
pub use error::{TypeError, TypeResult};
pub use function::{FuncId, Function, ParamDefault, ParamKind, Parameter, TypeRef};
pub use primitive::PrimKind;
pub use universe::TypeUniverse;
pub use value::{BuiltinFunction, Decorator, SpecialForm, Value};
