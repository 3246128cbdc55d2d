//! Static values: what the checker knows about a name or expression

use crate::class::ClassId;
use crate::function::FuncId;

/// Builtin callables with dedicated binding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BuiltinFunction {
    Len,
    IsInstance,
    IsSubclass,
    /// `box(prim)`: primitive to its boxed counterpart
    Box,
    /// `unbox(x)`: boxed int to a primitive
    Unbox,
    /// `cast(T, x)`: checked downcast
    Cast,
    RevealType,
    Sorted,
    Super,
}

impl BuiltinFunction {
    #[allow(missing_docs)]
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFunction::Len => "len",
            BuiltinFunction::IsInstance => "isinstance",
            BuiltinFunction::IsSubclass => "issubclass",
            BuiltinFunction::Box => "box",
            BuiltinFunction::Unbox => "unbox",
            BuiltinFunction::Cast => "cast",
            BuiltinFunction::RevealType => "reveal_type",
            BuiltinFunction::Sorted => "sorted",
            BuiltinFunction::Super => "super",
        }
    }
}

/// Decorators understood by the declaration visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Decorator {
    Final,
    StaticMethod,
    Inline,
    DynamicReturn,
    AllowWeakrefs,
    DoNotCompile,
}

/// Annotation-only forms from `typing` / `__static__`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SpecialForm {
    Final,
    ClassVar,
    Optional,
    Union,
    Exact,
}

/// The static value of a name or expression.
///
/// Every expression is bound to exactly one `Value`. `Dynamic` is the
/// canonical unknown; an instance of the dynamic class is never built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Unknown at compile time
    #[default]
    Dynamic,
    /// An instance of the class (nominal, exact, primitive, union or generic)
    Instance(ClassId),
    /// The class object itself
    Class(ClassId),
    /// A declared function
    Function(FuncId),
    /// A static method accessed through its class
    StaticMethod(FuncId),
    /// A method bound to a receiver of the given class
    BoundMethod {
        /// The method
        func: FuncId,
        /// Static type of the receiver
        receiver: ClassId,
    },
    /// A builtin method bound to a receiver
    BuiltinMethod {
        /// Receiver class providing the method
        receiver: ClassId,
        /// Method name
        name: String,
    },
    /// An imported module
    Module(String),
    /// A builtin function with special binding
    Builtin(BuiltinFunction),
    /// A known decorator
    Decorator(Decorator),
    /// An annotation-only form
    SpecialForm(SpecialForm),
}

impl Value {
    #[allow(missing_docs)]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Value::Dynamic)
    }

    /// Class of the instance, if this is an instance.
    pub fn instance_class(&self) -> Option<ClassId> {
        match self {
            Value::Instance(id) => Some(*id),
            _ => None,
        }
    }

    /// Class if this value is a class object.
    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Value::Class(id) => Some(*id),
            _ => None,
        }
    }

    /// Function if this value is a plain function or static method.
    pub fn as_function(&self) -> Option<FuncId> {
        match self {
            Value::Function(f) | Value::StaticMethod(f) => Some(*f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert!(Value::default().is_dynamic());
        assert_eq!(Value::Instance(ClassId(3)).instance_class(), Some(ClassId(3)));
        assert_eq!(Value::Class(ClassId(3)).instance_class(), None);
        assert_eq!(Value::StaticMethod(FuncId(1)).as_function(), Some(FuncId(1)));
        assert_eq!(BuiltinFunction::IsInstance.name(), "isinstance");
    }
}
