use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::datatype::DataType;

/// An owned single value, possibly null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Type of the value. Null is typeless.
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Boolean(_) => Some(DataType::Boolean),
            ScalarValue::Int32(_) => Some(DataType::Int32),
            ScalarValue::Int64(_) => Some(DataType::Int64),
            ScalarValue::Float64(_) => Some(DataType::Float64),
            ScalarValue::Utf8(_) => Some(DataType::Utf8),
        }
    }

    pub fn try_as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int32(v) => Some(*v as i64),
            ScalarValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ScalarValue::Null => 0u8.hash(state),
            ScalarValue::Boolean(v) => (1u8, v).hash(state),
            ScalarValue::Int32(v) => (2u8, *v as i64).hash(state),
            ScalarValue::Int64(v) => (2u8, *v).hash(state),
            ScalarValue::Float64(v) => (3u8, v.to_bits()).hash(state),
            ScalarValue::Utf8(v) => (4u8, v).hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
        }
    }
}

/// Deterministic value hash used by the hash statement and the combined-key
/// equi-join. Integers hash to their own bits so the verification pass can be
/// exercised with constructed collisions; strings go through ahash with fixed
/// seeds.
pub fn hash_value(value: &ScalarValue) -> u64 {
    match value {
        ScalarValue::Null => 0,
        ScalarValue::Boolean(v) => *v as u64,
        ScalarValue::Int32(v) => *v as i64 as u64,
        ScalarValue::Int64(v) => *v as u64,
        ScalarValue::Float64(v) => v.to_bits(),
        ScalarValue::Utf8(v) => {
            use std::hash::BuildHasher;
            ahash::RandomState::with_seeds(11, 23, 37, 41).hash_one(v.as_bytes())
        }
    }
}

/// Hash width per key column when folding a multi-column key into a single
/// 64-bit value. One bit is reserved so distinct column counts cannot alias.
pub fn combined_hash_bits(ncols: usize) -> u32 {
    (1 + (u64::BITS as usize - 1) / (ncols + 1)) as u32
}

/// One folding step of the combined key hash: rotate the accumulator and mix
/// in the next column's value hash.
pub fn rotate_xor_hash(acc: u64, bits: u32, value: &ScalarValue) -> u64 {
    acc.rotate_left(bits) ^ hash_value(value)
}
