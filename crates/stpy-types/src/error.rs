//! Type system errors

use thiserror::Error;

/// Errors raised by operations on the type universe.
///
/// These carry no source location; the checker attaches one when it turns
/// them into user-facing errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TypeError {
    /// C3 linearization failed
    #[error("Cannot create a consistent method resolution order (MRO) for bases: {bases}")]
    InconsistentMro {
        /// Comma separated base names
        bases: String,
    },

    /// A union mentioned a primitive member
    #[error("invalid union type {ty}; unions cannot include primitive types")]
    InvalidUnion {
        /// Offending member
        ty: String,
    },

    /// Subscripted a class that takes no type parameters
    #[error("{name} is not a generic type")]
    NotGeneric {
        /// Class name
        name: String,
    },

    /// Wrong number of type arguments for a generic definition
    #[error("{name} expects {expected} type arguments, got {actual}")]
    InvalidTypeArgCount {
        /// Generic definition
        name: String,
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },

    /// A primitive type was used as a generic argument
    #[error("cannot use primitive {ty} as a type argument")]
    PrimitiveTypeArgument {
        /// Offending argument
        ty: String,
    },

    /// `Array` / `Vector` over something other than a primitive integer
    #[error("Invalid {container} element type: {ty}")]
    InvalidArrayElement {
        /// `Array` or `Vector`
        container: String,
        /// Offending argument
        ty: String,
    },

    /// A `TypeRef` was read before declarations were finished
    #[error("type reference to `{what}` read before it was resolved")]
    UnresolvedTypeRef {
        /// Description of the reference
        what: String,
    },

    /// A literal does not fit the primitive it is bound to
    #[error("constant {value} is outside of the range {min} to {max} for {ty}")]
    ConstantOutOfRange {
        /// The literal
        value: i128,
        /// Smallest representable value
        min: i128,
        /// Largest representable value
        max: i128,
        /// Primitive name
        ty: String,
    },

    /// Mixed primitive arithmetic has no representable result type
    #[error("Cannot {op} {left} and {right}")]
    NoCommonPrimitive {
        /// Verb describing the operation
        op: String,
        /// Left operand type
        left: String,
        /// Right operand type
        right: String,
    },
}

/// Result type for type universe operations
pub type TypeResult<T> = Result<T, TypeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TypeError::InconsistentMro {
            bases: "A, B".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot create a consistent method resolution order (MRO) for bases: A, B"
        );

        let err = TypeError::ConstantOutOfRange {
            value: 300,
            min: -128,
            max: 127,
            ty: "int8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "constant 300 is outside of the range -128 to 127 for int8"
        );
    }
}
