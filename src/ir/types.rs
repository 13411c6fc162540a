// IR Type System
//
// Scalar element types, pointer types for buffer declarations, and the
// constant values carried by CONST nodes and produced by the ALU semantics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

lazy_static::lazy_static! {
    /// Lookup table for canonical and short dtype names
    static ref SCALAR_NAMES: HashMap<&'static str, ScalarType> = {
        let mut names = HashMap::new();
        for st in ScalarType::ALL {
            names.insert(st.name(), st);
        }
        names.insert("int", ScalarType::Int32);
        names.insert("uint", ScalarType::Uint32);
        names.insert("float", ScalarType::Float32);
        names.insert("double", ScalarType::Float64);
        names
    };
}

/// Scalar element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

impl ScalarType {
    pub const ALL: [ScalarType; 11] = [
        ScalarType::Bool,
        ScalarType::Int8,
        ScalarType::Int16,
        ScalarType::Int32,
        ScalarType::Int64,
        ScalarType::Uint8,
        ScalarType::Uint16,
        ScalarType::Uint32,
        ScalarType::Uint64,
        ScalarType::Float32,
        ScalarType::Float64,
    ];

    /// Look up a type by name ("float32", "int", "uint8", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        SCALAR_NAMES.get(name).copied()
    }

    /// Get size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Int8 | ScalarType::Uint8 => 1,
            ScalarType::Int16 | ScalarType::Uint16 => 2,
            ScalarType::Int32 | ScalarType::Uint32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Uint64 | ScalarType::Float64 => 8,
        }
    }

    /// Bit width of the storage
    pub fn bits(&self) -> u32 {
        self.size_bytes() as u32 * 8
    }

    /// Check if this is a floating-point type
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        !self.is_float() && !self.is_bool()
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, ScalarType::Bool)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            ScalarType::Uint8 | ScalarType::Uint16 | ScalarType::Uint32 | ScalarType::Uint64
        )
    }

    /// Smallest representable value of an integer type
    pub fn int_min(&self) -> i128 {
        if self.is_unsigned() || self.is_bool() {
            0
        } else {
            -(1i128 << (self.bits() - 1))
        }
    }

    /// Largest representable value of an integer type
    pub fn int_max(&self) -> i128 {
        if self.is_bool() {
            1
        } else if self.is_unsigned() {
            (1i128 << self.bits()) - 1
        } else {
            (1i128 << (self.bits() - 1)) - 1
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int8 => "int8",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint8 => "uint8",
            ScalarType::Uint16 => "uint16",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Memory space a buffer declaration lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddrSpace {
    /// Device memory visible to every lane
    Global,
    /// Work-group shared memory
    Local,
}

/// Type of a node's runtime value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    /// A single scalar
    Scalar(ScalarType),
    /// Pointer to elements of `base` in `space`
    Ptr { base: ScalarType, space: AddrSpace },
}

impl DType {
    pub fn ptr(base: ScalarType, space: AddrSpace) -> Self {
        DType::Ptr { base, space }
    }

    /// Element type (pointee for pointers)
    pub fn base(&self) -> ScalarType {
        match self {
            DType::Scalar(st) => *st,
            DType::Ptr { base, .. } => *base,
        }
    }

    /// Scalar type, or `None` for pointers
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            DType::Scalar(st) => Some(*st),
            DType::Ptr { .. } => None,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, DType::Ptr { .. })
    }

    pub fn space(&self) -> Option<AddrSpace> {
        match self {
            DType::Ptr { space, .. } => Some(*space),
            DType::Scalar(_) => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, DType::Scalar(st) if st.is_integer())
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, DType::Scalar(ScalarType::Bool))
    }
}

impl From<ScalarType> for DType {
    fn from(st: ScalarType) -> Self {
        DType::Scalar(st)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DType::Scalar(st) => write!(f, "{}", st),
            DType::Ptr { base, space } => match space {
                AddrSpace::Global => write!(f, "ptr.global<{}>", base),
                AddrSpace::Local => write!(f, "ptr.local<{}>", base),
            },
        }
    }
}

/// Constant value
///
/// Integers of every width are carried as `i128` so that unsigned 64-bit
/// values and out-of-range operands (wrapped later by truncation) fit.
/// Equality and hashing of floats are by bit pattern, so `-0.0` and `0.0`
/// are distinct constants and NaN constants intern.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl ConstValue {
    /// Truthiness (non-zero)
    pub fn as_bool(&self) -> bool {
        match self {
            ConstValue::Bool(b) => *b,
            ConstValue::Int(i) => *i != 0,
            ConstValue::Float(f) => *f != 0.0,
        }
    }

    /// Integer view; floats truncate toward zero
    pub fn as_i128(&self) -> i128 {
        match self {
            ConstValue::Bool(b) => *b as i128,
            ConstValue::Int(i) => *i,
            ConstValue::Float(f) => *f as i128,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ConstValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ConstValue::Int(i) => *i as f64,
            ConstValue::Float(f) => *f,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ConstValue::Float(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, ConstValue::Bool(_))
    }

    /// Zero of the given type, used as the fill value of masked loads
    pub fn zero(st: ScalarType) -> Self {
        if st.is_bool() {
            ConstValue::Bool(false)
        } else if st.is_float() {
            ConstValue::Float(0.0)
        } else {
            ConstValue::Int(0)
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstValue::Bool(a), ConstValue::Bool(b)) => a == b,
            (ConstValue::Int(a), ConstValue::Int(b)) => a == b,
            (ConstValue::Float(a), ConstValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ConstValue::Bool(b) => b.hash(state),
            ConstValue::Int(i) => i.hash(state),
            ConstValue::Float(f) => f.to_bits().hash(state),
        }
    }
}

impl From<bool> for ConstValue {
    fn from(b: bool) -> Self {
        ConstValue::Bool(b)
    }
}

impl From<i64> for ConstValue {
    fn from(i: i64) -> Self {
        ConstValue::Int(i as i128)
    }
}

impl From<i32> for ConstValue {
    fn from(i: i32) -> Self {
        ConstValue::Int(i as i128)
    }
}

impl From<f64> for ConstValue {
    fn from(f: f64) -> Self {
        ConstValue::Float(f)
    }
}

impl From<f32> for ConstValue {
    fn from(f: f32) -> Self {
        ConstValue::Float(f as f64)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Float(x) => write!(f, "{:?}", x),
        }
    }
}
