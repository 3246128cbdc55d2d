//! Primitive (unboxed) value types
//!
//! Primitive locals live in machine words. Their type tags are shared with the
//! code generator, which encodes them into `PRIMITIVE_*` instruction operands.

use crate::error::{TypeError, TypeResult};
use std::fmt;

/// Low bit of an integer type tag: set for signed types.
pub const TYPED_INT_SIGNED: u32 = 1;
/// Width field values (bits 1..=2 of an integer type tag).
pub const TYPED_INT_8BIT: u32 = 0 << 1;
#[allow(missing_docs)]
pub const TYPED_INT_16BIT: u32 = 1 << 1;
#[allow(missing_docs)]
pub const TYPED_INT_32BIT: u32 = 2 << 1;
#[allow(missing_docs)]
pub const TYPED_INT_64BIT: u32 = 3 << 1;

#[allow(missing_docs)]
pub const TYPED_UINT8: u32 = TYPED_INT_8BIT;
#[allow(missing_docs)]
pub const TYPED_INT8: u32 = TYPED_INT_8BIT | TYPED_INT_SIGNED;
#[allow(missing_docs)]
pub const TYPED_UINT16: u32 = TYPED_INT_16BIT;
#[allow(missing_docs)]
pub const TYPED_INT16: u32 = TYPED_INT_16BIT | TYPED_INT_SIGNED;
#[allow(missing_docs)]
pub const TYPED_UINT32: u32 = TYPED_INT_32BIT;
#[allow(missing_docs)]
pub const TYPED_INT32: u32 = TYPED_INT_32BIT | TYPED_INT_SIGNED;
#[allow(missing_docs)]
pub const TYPED_UINT64: u32 = TYPED_INT_64BIT;
#[allow(missing_docs)]
pub const TYPED_INT64: u32 = TYPED_INT_64BIT | TYPED_INT_SIGNED;
/// Boxed object slot.
pub const TYPED_OBJECT: u32 = 0x08;
#[allow(missing_docs)]
pub const TYPED_DOUBLE: u32 = 0x09;
#[allow(missing_docs)]
pub const TYPED_SINGLE: u32 = 0x0A;
#[allow(missing_docs)]
pub const TYPED_CHAR: u32 = 0x0B;
#[allow(missing_docs)]
pub const TYPED_BOOL: u32 = 0x0C;

/// An unboxed machine type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Signed 8-bit integer with its own name.
    Char,
    /// Machine boolean, produced by primitive comparisons.
    CBool,
    /// IEEE 754 double.
    Double,
}

impl PrimKind {
    /// Every primitive, in declaration order of the `__static__` module.
    pub const ALL: [PrimKind; 11] = [
        PrimKind::Int8,
        PrimKind::Int16,
        PrimKind::Int32,
        PrimKind::Int64,
        PrimKind::UInt8,
        PrimKind::UInt16,
        PrimKind::UInt32,
        PrimKind::UInt64,
        PrimKind::Char,
        PrimKind::CBool,
        PrimKind::Double,
    ];

    /// Source-level name.
    pub fn name(self) -> &'static str {
        match self {
            PrimKind::Int8 => "int8",
            PrimKind::Int16 => "int16",
            PrimKind::Int32 => "int32",
            PrimKind::Int64 => "int64",
            PrimKind::UInt8 => "uint8",
            PrimKind::UInt16 => "uint16",
            PrimKind::UInt32 => "uint32",
            PrimKind::UInt64 => "uint64",
            PrimKind::Char => "char",
            PrimKind::CBool => "cbool",
            PrimKind::Double => "double",
        }
    }

    /// Look up a primitive by its source-level name.
    pub fn from_name(name: &str) -> Option<PrimKind> {
        PrimKind::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Type tag used in instruction operands. `char` shares the int8 tag.
    pub fn type_code(self) -> u32 {
        match self {
            PrimKind::Int8 | PrimKind::Char => TYPED_INT8,
            PrimKind::Int16 => TYPED_INT16,
            PrimKind::Int32 => TYPED_INT32,
            PrimKind::Int64 => TYPED_INT64,
            PrimKind::UInt8 => TYPED_UINT8,
            PrimKind::UInt16 => TYPED_UINT16,
            PrimKind::UInt32 => TYPED_UINT32,
            PrimKind::UInt64 => TYPED_UINT64,
            PrimKind::CBool => TYPED_BOOL,
            PrimKind::Double => TYPED_DOUBLE,
        }
    }

    /// Integer kind for an integer type tag.
    pub fn from_type_code(code: u32) -> Option<PrimKind> {
        match code {
            TYPED_INT8 => Some(PrimKind::Int8),
            TYPED_INT16 => Some(PrimKind::Int16),
            TYPED_INT32 => Some(PrimKind::Int32),
            TYPED_INT64 => Some(PrimKind::Int64),
            TYPED_UINT8 => Some(PrimKind::UInt8),
            TYPED_UINT16 => Some(PrimKind::UInt16),
            TYPED_UINT32 => Some(PrimKind::UInt32),
            TYPED_UINT64 => Some(PrimKind::UInt64),
            TYPED_BOOL => Some(PrimKind::CBool),
            TYPED_DOUBLE => Some(PrimKind::Double),
            _ => None,
        }
    }

    /// Whether this is one of the integer kinds (including `char`).
    pub fn is_int(self) -> bool {
        !matches!(self, PrimKind::CBool | PrimKind::Double)
    }

    #[allow(missing_docs)]
    pub fn is_signed(self) -> bool {
        self.type_code() & TYPED_INT_SIGNED != 0 && self.is_int()
    }

    /// Width in bits of an integer kind.
    pub fn bits(self) -> u32 {
        match self {
            PrimKind::Double => 64,
            PrimKind::CBool => 8,
            _ => 8 << ((self.type_code() >> 1) & 3),
        }
    }

    /// Integer kind of the given width and signedness.
    pub fn int_with(bits: u32, signed: bool) -> Option<PrimKind> {
        let width = match bits {
            8 => TYPED_INT_8BIT,
            16 => TYPED_INT_16BIT,
            32 => TYPED_INT_32BIT,
            64 => TYPED_INT_64BIT,
            _ => return None,
        };
        let sign = if signed { TYPED_INT_SIGNED } else { 0 };
        PrimKind::from_type_code(width | sign)
    }

    /// Inclusive value range of an integer kind.
    pub fn range(self) -> Option<(i128, i128)> {
        if !self.is_int() {
            return None;
        }
        let bits = self.bits();
        if self.is_signed() {
            Some((-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1))
        } else {
            Some((0, (1i128 << bits) - 1))
        }
    }

    /// Check that an integer literal is representable.
    pub fn check_constant(self, value: i128) -> TypeResult<()> {
        match self.range() {
            Some((min, max)) if value < min || value > max => Err(TypeError::ConstantOutOfRange {
                value,
                min,
                max,
                ty: self.name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Result type of arithmetic mixing two integer kinds.
    ///
    /// Same signedness widens to the larger operand. Mixed signedness needs a
    /// signed type wide enough for the unsigned operand; there is none past
    /// 64 bits.
    pub fn promote(self, other: PrimKind) -> Option<PrimKind> {
        if self == other {
            return Some(self);
        }
        if !self.is_int() || !other.is_int() {
            return None;
        }
        if self.is_signed() == other.is_signed() {
            let bits = self.bits().max(other.bits());
            return PrimKind::int_with(bits, self.is_signed());
        }
        let (signed, unsigned) = if self.is_signed() {
            (self, other)
        } else {
            (other, self)
        };
        let bits = (unsigned.bits() * 2).max(signed.bits());
        PrimKind::int_with(bits, true)
    }

    /// Whether a value of `src` may be stored into a `self` location without
    /// an explicit conversion.
    pub fn can_assign_from(self, src: PrimKind) -> bool {
        if self == src {
            return true;
        }
        if !self.is_int() || !src.is_int() {
            return false;
        }
        match (self.is_signed(), src.is_signed()) {
            (a, b) if a == b => src.bits() <= self.bits(),
            (true, false) => src.bits() < self.bits(),
            _ => false,
        }
    }
}

impl fmt::Display for PrimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        assert_eq!(PrimKind::Int8.type_code(), 1);
        assert_eq!(PrimKind::Int64.type_code(), 7);
        assert_eq!(PrimKind::UInt32.type_code(), 4);
        assert_eq!(PrimKind::Double.type_code(), TYPED_DOUBLE);
        assert_eq!(PrimKind::Char.type_code(), TYPED_INT8);
        assert_eq!(PrimKind::from_type_code(7), Some(PrimKind::Int64));
    }

    #[test]
    fn test_bits_and_ranges() {
        assert_eq!(PrimKind::Int16.bits(), 16);
        assert_eq!(PrimKind::UInt64.bits(), 64);
        assert_eq!(PrimKind::Int8.range(), Some((-128, 127)));
        assert_eq!(PrimKind::UInt8.range(), Some((0, 255)));
        assert_eq!(PrimKind::Double.range(), None);
        assert!(PrimKind::Int8.check_constant(300).is_err());
        assert!(PrimKind::UInt64.check_constant(u64::MAX as i128).is_ok());
    }

    #[test]
    fn test_promotion() {
        use PrimKind::*;
        assert_eq!(Int8.promote(Int32), Some(Int32));
        assert_eq!(UInt8.promote(UInt16), Some(UInt16));
        assert_eq!(UInt8.promote(Int8), Some(Int16));
        assert_eq!(UInt32.promote(Int16), Some(Int64));
        assert_eq!(UInt64.promote(Int64), None);
        assert_eq!(Double.promote(Int64), None);
        assert_eq!(CBool.promote(Int8), None);
    }

    #[test]
    fn test_assignability() {
        use PrimKind::*;
        assert!(Int64.can_assign_from(Int8));
        assert!(Int16.can_assign_from(UInt8));
        assert!(!Int8.can_assign_from(UInt8));
        assert!(!UInt64.can_assign_from(Int8));
        assert!(!Int8.can_assign_from(Int64));
        assert!(Char.can_assign_from(Int8));
        assert!(!Double.can_assign_from(Int64));
        assert!(!CBool.can_assign_from(Int8));
    }
}
