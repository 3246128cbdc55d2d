//! Type descriptors
//!
//! A descriptor names a class, function or field for the runtime in the
//! instruction stream: a path of names plus optional generic arguments and a
//! marker (`!` exact, `?` optional, `#` primitive).

use std::fmt;

/// Runtime-visible name of a type, function or field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescr {
    /// Module followed by qualified name parts
    pub path: Vec<String>,
    /// Descriptors of generic arguments
    pub args: Vec<TypeDescr>,
    /// Trailing marker
    pub marker: Option<char>,
}

impl TypeDescr {
    /// Descriptor from path components.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeDescr {
            path: path.into_iter().map(Into::into).collect(),
            args: Vec::new(),
            marker: None,
        }
    }

    /// Same descriptor with a marker.
    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Same descriptor with generic arguments.
    pub fn with_args(mut self, args: Vec<TypeDescr>) -> Self {
        self.args = args;
        self
    }

    /// Descriptor for a member of this one (method or field).
    pub fn child(&self, name: impl Into<String>) -> TypeDescr {
        let mut path = self.path.clone();
        path.push(name.into());
        TypeDescr {
            path,
            args: self.args.clone(),
            marker: None,
        }
    }

    /// The `builtins.object` descriptor.
    pub fn object() -> Self {
        TypeDescr::new(["builtins", "object"])
    }
}

impl fmt::Display for TypeDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for part in &self.path {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "'{}'", part)?;
        }
        if !self.args.is_empty() {
            write!(f, ", (")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            if self.args.len() == 1 {
                write!(f, ",")?;
            }
            write!(f, ")")?;
        }
        if let Some(marker) = self.marker {
            write!(f, ", '{}'", marker)?;
        }
        if self.path.len() + usize::from(!self.args.is_empty()) + usize::from(self.marker.is_some()) == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TypeDescr::new(["builtins", "int"]).to_string(), "('builtins', 'int')");
        assert_eq!(
            TypeDescr::new(["__static__", "int64"]).with_marker('#').to_string(),
            "('__static__', 'int64', '#')"
        );
        let generic = TypeDescr::new(["__static__", "chklist"])
            .with_args(vec![TypeDescr::new(["builtins", "int"])]);
        assert_eq!(
            generic.to_string(),
            "('__static__', 'chklist', (('builtins', 'int'),))"
        );
        assert_eq!(TypeDescr::new(["m"]).to_string(), "('m',)");
    }

    #[test]
    fn test_child() {
        let class = TypeDescr::new(["m", "C"]);
        assert_eq!(class.child("x").path, vec!["m", "C", "x"]);
    }
}
