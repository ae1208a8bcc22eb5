//! The low-level IR type system.
//!
//! Provides the set of types used by lowered Tasks: scalars (bool, signed
//! and unsigned integers, half/single/double floats), tensors with an
//! explicit memory scope and layout, pointers, tensor-pointers, and
//! references. All types are structural (no nominal `TypeId` registry is
//! needed at this layer -- there are no user-defined struct/enum types).

use serde::{Deserialize, Serialize};

use crate::compute::DimExpr;

/// A low-level IR type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// A scalar value held in a register.
    Scalar(ScalarType),

    /// A tensor residing in a particular memory scope with an explicit layout.
    Tensor {
        scalar: ScalarType,
        shape: Vec<DimExpr>,
        scope: MemoryScope,
        layout: Layout,
    },

    /// A raw pointer to a value of another type.
    Pointer(Box<Type>),

    /// A pointer that additionally carries tensor shape/layout metadata.
    TensorPointer {
        scalar: ScalarType,
        shape: Vec<DimExpr>,
        scope: MemoryScope,
        layout: Layout,
    },

    /// A reference (non-null, non-owning) to a value of another type.
    Reference(Box<Type>),

    /// The empty return type, used by `Function`s with no result.
    Void,
}

/// Scalar (primitive) types with a direct GPU-source mapping.
///
/// Ranked for implicit-promotion purposes by [`ScalarType::rank`];
/// see the cast-insertion lowering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl ScalarType {
    /// Rank used for implicit binary-operand promotion. Unsigned integers
    /// rank alongside their same-width signed counterpart; on a tie the
    /// unsigned side is preferred (see DESIGN.md Open Question 1).
    pub fn rank(self) -> u8 {
        match self {
            ScalarType::Bool => 0,
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 => 3,
            ScalarType::Int64 | ScalarType::UInt64 => 4,
            ScalarType::Float16 | ScalarType::BFloat16 => 5,
            ScalarType::Float32 => 6,
            ScalarType::Float64 => 7,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::UInt8 | ScalarType::UInt16 | ScalarType::UInt32 | ScalarType::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ScalarType::Float16 | ScalarType::BFloat16 | ScalarType::Float32 | ScalarType::Float64
        )
    }

    /// True for the pair {Float16, BFloat16} in either order -- the one
    /// pair that must bridge through Float32 rather than promote directly.
    pub fn needs_bridge(a: ScalarType, b: ScalarType) -> bool {
        let half = |t: ScalarType| matches!(t, ScalarType::Float16 | ScalarType::BFloat16);
        half(a) && half(b) && a != b
    }
}

/// Where a tensor's backing storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryScope {
    Global,
    Shared,
    Register,
}

/// Stride-based layout of a tensor's backing storage. An empty stride
/// vector means "row-major, derive strides from shape" (the common case).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Layout {
    pub strides: Vec<i64>,
}

impl Layout {
    pub fn row_major() -> Self {
        Layout { strides: Vec::new() }
    }
}

/// An attribute value attached to an `Operator`, matching the
/// graph-exchange-format attribute schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Float(f64),
    Int(i64),
    Str(String),
    FloatList(Vec<f64>),
    IntList(Vec<i64>),
    StrList(Vec<String>),
}
