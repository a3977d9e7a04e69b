use std::fmt;
use std::str::FromStr;

/// Element type of a tensor value.
///
/// `Dynamic` is used before inference has determined the type, or where it
/// depends on runtime information.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    #[default]
    Dynamic,
    Boolean,
    F16,
    F32,
    F64,
    I8,
    I32,
    I64,
    U8,
    U64,
}

impl ElementType {
    pub fn is_dynamic(self) -> bool {
        self == ElementType::Dynamic
    }

    pub fn is_static(self) -> bool {
        !self.is_dynamic()
    }

    /// Return true for floating point types.
    pub fn is_real(self) -> bool {
        matches!(self, ElementType::F16 | ElementType::F32 | ElementType::F64)
    }

    /// Return true for signed and unsigned integer types.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ElementType::I8
                | ElementType::I32
                | ElementType::I64
                | ElementType::U8
                | ElementType::U64
        )
    }

    /// Size of an element in bytes, or `None` if the type is dynamic.
    pub fn size(self) -> Option<usize> {
        let size = match self {
            ElementType::Dynamic => return None,
            ElementType::Boolean | ElementType::I8 | ElementType::U8 => 1,
            ElementType::F16 => 2,
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 => 8,
        };
        Some(size)
    }

    /// Merge two element types.
    ///
    /// `Dynamic` merges with anything and yields the other type. Two
    /// different static types cannot be merged.
    pub fn merge(self, other: ElementType) -> Option<ElementType> {
        match (self, other) {
            (ElementType::Dynamic, t) | (t, ElementType::Dynamic) => Some(t),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }

    /// Short lowercase name, eg. "f32".
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Dynamic => "dynamic",
            ElementType::Boolean => "boolean",
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I8 => "i8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U64 => "u64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown element type name.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("unknown element type \"{0}\"")]
pub struct ParseElementTypeError(String);

impl FromStr for ElementType {
    type Err = ParseElementTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "dynamic" | "undefined" => ElementType::Dynamic,
            "boolean" | "bool" => ElementType::Boolean,
            "f16" => ElementType::F16,
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            "i8" => ElementType::I8,
            "i32" => ElementType::I32,
            "i64" => ElementType::I64,
            "u8" => ElementType::U8,
            "u64" => ElementType::U64,
            _ => return Err(ParseElementTypeError(s.to_string())),
        };
        Ok(ty)
    }
}
