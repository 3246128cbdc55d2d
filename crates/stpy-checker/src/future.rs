//! `from __future__` scanning

use stpy_parser::ast::*;
use stpy_parser::Span;

use crate::error::{CheckError, CheckResult};

/// Feature names accepted after `from __future__ import`.
pub const FEATURES: &[&str] = &[
    "nested_scopes",
    "generators",
    "division",
    "absolute_import",
    "with_statement",
    "print_function",
    "unicode_literals",
    "barry_as_FLUFL",
    "generator_stop",
    "annotations",
    "eager_imports",
];

/// Code flag set for `barry_as_FLUFL`.
pub const CO_FUTURE_BARRY_AS_BDFL: u32 = 0x40_0000;
/// Code flag set for `annotations`.
pub const CO_FUTURE_ANNOTATIONS: u32 = 0x100_0000;
/// Code flag set for `eager_imports`.
pub const CO_FUTURE_EAGER_IMPORTS: u32 = 0x800_0000;

/// Code flags enabled by a module's future imports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FutureFlags(pub u32);

impl FutureFlags {
    /// Flags of one feature; features that are always on contribute none.
    pub fn for_feature(feature: &str) -> FutureFlags {
        match feature {
            "barry_as_FLUFL" => FutureFlags(CO_FUTURE_BARRY_AS_BDFL),
            "annotations" => FutureFlags(CO_FUTURE_ANNOTATIONS),
            "eager_imports" => FutureFlags(CO_FUTURE_EAGER_IMPORTS),
            _ => FutureFlags(0),
        }
    }

    /// Whether annotations are kept as strings.
    pub fn annotations(self) -> bool {
        self.0 & CO_FUTURE_ANNOTATIONS != 0
    }

    /// Whether imports are eager.
    pub fn eager_imports(self) -> bool {
        self.0 & CO_FUTURE_EAGER_IMPORTS != 0
    }

    /// Raw code flag bits.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for FutureFlags {
    type Output = FutureFlags;

    fn bitor(self, rhs: FutureFlags) -> FutureFlags {
        FutureFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FutureFlags {
    fn bitor_assign(&mut self, rhs: FutureFlags) {
        self.0 |= rhs.0;
    }
}

fn future_names(stmt: &Stmt) -> Option<&[Alias]> {
    match &stmt.kind {
        StmtKind::ImportFrom {
            module: Some(module),
            names,
            level: 0,
        } if module == "__future__" => Some(names),
        _ => None,
    }
}

fn check_feature(alias: &Alias) -> CheckResult<()> {
    if alias.name == "braces" {
        return Err(CheckError::future("not a chance", alias.span));
    }
    if !FEATURES.contains(&alias.name.as_str()) {
        return Err(CheckError::future(
            format!("future feature {} is not defined", alias.name),
            alias.span,
        ));
    }
    Ok(())
}

fn misplaced(span: Span) -> CheckError {
    CheckError::future(
        "from __future__ imports must occur at the beginning of the file",
        span,
    )
}

/// Feature names imported by the leading future statements of a module.
///
/// Fails on an unknown feature or on a future import after any other
/// statement (a leading docstring excepted).
pub fn find_futures(module: &Module) -> CheckResult<Vec<String>> {
    let mut features = Vec::new();
    let mut leading = true;
    for (index, stmt) in module.body.iter().enumerate() {
        if index == 0 && module.docstring().is_some() {
            continue;
        }
        match future_names(stmt) {
            Some(names) if leading => {
                for alias in names {
                    check_feature(alias)?;
                    if !features.contains(&alias.name) {
                        features.push(alias.name.clone());
                    }
                }
            }
            Some(_) => return Err(misplaced(stmt.span)),
            None => leading = false,
        }
    }
    Ok(features)
}

/// Scan a module and fold its future imports into code flags.
pub fn scan_future_flags(module: &Module) -> CheckResult<FutureFlags> {
    let mut flags = FutureFlags::default();
    for feature in find_futures(module)? {
        flags |= FutureFlags::for_feature(&feature);
    }
    tracing::trace!(flags = flags.bits(), "scanned future imports");
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stpy_parser::parse_module;

    fn scan(source: &str) -> CheckResult<FutureFlags> {
        scan_future_flags(&parse_module(source).unwrap())
    }

    #[test]
    fn test_annotations_after_docstring() {
        let flags = scan("'''doc'''\nfrom __future__ import annotations\nx = 1\n").unwrap();
        assert!(flags.annotations());
        assert!(!flags.eager_imports());
    }

    #[test]
    fn test_known_features_without_flags() {
        let flags = scan("from __future__ import division, generator_stop\n").unwrap();
        assert_eq!(flags, FutureFlags(0));
    }

    #[test]
    fn test_errors() {
        let err = scan("from __future__ import braces\n").unwrap_err();
        assert_eq!(err.message(), "not a chance");
        let err = scan("from __future__ import spam\n").unwrap_err();
        assert_eq!(err.message(), "future feature spam is not defined");
        let err = scan("import os\nfrom __future__ import annotations\n").unwrap_err();
        assert_eq!(
            err.message(),
            "from __future__ imports must occur at the beginning of the file"
        );
        assert_eq!(err.span().map(|s| s.line), Some(2));
    }
}
