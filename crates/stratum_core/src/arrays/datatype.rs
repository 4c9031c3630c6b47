use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type of a column or scalar.
///
/// Nullability is not part of the type; it lives on catalog columns and is
/// enforced by compiled NOT NULL assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
}

impl DataType {
    /// Byte width used when picking the cheapest column to count over.
    /// Variable-length types sort last.
    pub const fn value_width(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::Float64 => 8,
            DataType::Utf8 => usize::MAX,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "boolean"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Utf8 => write!(f, "utf8"),
        }
    }
}
