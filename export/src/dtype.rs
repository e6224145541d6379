//! Scalar data kinds of the export type system
//!
//! Every exportable primitive is one of these kinds. The numeric values are
//! part of the runtime ABI: the reflection layer on the other side of the
//! boundary indexes its own tables with them, so they must stay in sync with
//! the runtime headers.
//!
//! Matrix and object kinds are *recognized runtime record names*: the host
//! front-end sees them as ordinary structs (`sk_matrix4x4`, `sk_allocation`,
//! ...), and [`DataType::from_record_name`] is what turns those structs into
//! matrix export types and opaque object handles instead of user records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::BuiltinKind;

/// Scalar data kinds, including packed-pixel carriers, matrix kinds, and
/// runtime-managed object kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32 = 0,
    Float64 = 1,
    Signed8 = 2,
    Signed16 = 3,
    Signed32 = 4,
    Signed64 = 5,
    Unsigned8 = 6,
    Unsigned16 = 7,
    Unsigned32 = 8,
    Unsigned64 = 9,
    Boolean = 10,
    /// Packed-pixel 5-6-5 format, carried in 16 bits.
    Unsigned565 = 11,
    /// Packed-pixel 5-5-5-1 format, carried in 16 bits.
    Unsigned5551 = 12,
    /// Packed-pixel 4-4-4-4 format, carried in 16 bits.
    Unsigned4444 = 13,
    Matrix2x2 = 14,
    Matrix3x3 = 15,
    Matrix4x4 = 16,
    Element = 17,
    Allocation = 18,
    Sampler = 19,
    Script = 20,
    Stream = 21,
}

impl DataType {
    /// Data kind of a supported builtin scalar; `None` for builtins outside
    /// the supported set (`void`, wide character kinds).
    pub fn from_builtin(kind: BuiltinKind) -> Option<DataType> {
        match kind {
            BuiltinKind::Bool => Some(DataType::Boolean),
            BuiltinKind::Char => Some(DataType::Signed8),
            BuiltinKind::Short => Some(DataType::Signed16),
            BuiltinKind::Int => Some(DataType::Signed32),
            BuiltinKind::Long => Some(DataType::Signed64),
            BuiltinKind::UChar => Some(DataType::Unsigned8),
            BuiltinKind::UShort => Some(DataType::Unsigned16),
            BuiltinKind::UInt => Some(DataType::Unsigned32),
            BuiltinKind::ULong => Some(DataType::Unsigned64),
            BuiltinKind::Float => Some(DataType::Float32),
            BuiltinKind::Double => Some(DataType::Float64),
            // The size of the wide character kinds depends on the platform,
            // so we abandon support for them. Void carries no value.
            BuiltinKind::Void | BuiltinKind::WChar16 | BuiltinKind::WChar32 => None,
        }
    }

    /// Data kind of a recognized runtime record name (`sk_matrix2x2`,
    /// `sk_allocation`, ...); `None` for ordinary user structs.
    pub fn from_record_name(name: &str) -> Option<DataType> {
        match name {
            "sk_matrix2x2" => Some(DataType::Matrix2x2),
            "sk_matrix3x3" => Some(DataType::Matrix3x3),
            "sk_matrix4x4" => Some(DataType::Matrix4x4),
            "sk_element" => Some(DataType::Element),
            "sk_allocation" => Some(DataType::Allocation),
            "sk_sampler" => Some(DataType::Sampler),
            "sk_script" => Some(DataType::Script),
            "sk_stream" => Some(DataType::Stream),
            _ => None,
        }
    }

    /// Canonical export name of the kind.
    pub fn export_name(self) -> &'static str {
        match self {
            DataType::Float32 => "float",
            DataType::Float64 => "double",
            DataType::Signed8 => "char",
            DataType::Signed16 => "short",
            DataType::Signed32 => "int",
            DataType::Signed64 => "long",
            DataType::Unsigned8 => "uchar",
            DataType::Unsigned16 => "ushort",
            DataType::Unsigned32 => "uint",
            DataType::Unsigned64 => "ulong",
            DataType::Boolean => "bool",
            DataType::Unsigned565 => "u565",
            DataType::Unsigned5551 => "u5551",
            DataType::Unsigned4444 => "u4444",
            DataType::Matrix2x2 => "sk_matrix2x2",
            DataType::Matrix3x3 => "sk_matrix3x3",
            DataType::Matrix4x4 => "sk_matrix4x4",
            DataType::Element => "sk_element",
            DataType::Allocation => "sk_allocation",
            DataType::Sampler => "sk_sampler",
            DataType::Script => "sk_script",
            DataType::Stream => "sk_stream",
        }
    }

    /// Logical width of a value of this kind, in bits.
    pub fn size_in_bits(self) -> u32 {
        match self {
            DataType::Boolean => 1,
            DataType::Signed8 | DataType::Unsigned8 => 8,
            DataType::Signed16
            | DataType::Unsigned16
            | DataType::Unsigned565
            | DataType::Unsigned5551
            | DataType::Unsigned4444 => 16,
            DataType::Float32 | DataType::Signed32 | DataType::Unsigned32 => 32,
            DataType::Float64 | DataType::Signed64 | DataType::Unsigned64 => 64,
            DataType::Matrix2x2 => 4 * 32,
            DataType::Matrix3x3 => 9 * 32,
            DataType::Matrix4x4 => 16 * 32,
            // Object handles occupy one 32-bit slot in the runtime's tables.
            DataType::Element
            | DataType::Allocation
            | DataType::Sampler
            | DataType::Script
            | DataType::Stream => 32,
        }
    }

    /// Matrix kinds are backed by a single `float[dim * dim]` field.
    pub fn is_matrix(self) -> bool {
        matches!(
            self,
            DataType::Matrix2x2 | DataType::Matrix3x3 | DataType::Matrix4x4
        )
    }

    pub fn matrix_dim(self) -> Option<u32> {
        match self {
            DataType::Matrix2x2 => Some(2),
            DataType::Matrix3x3 => Some(3),
            DataType::Matrix4x4 => Some(4),
            _ => None,
        }
    }

    /// Runtime-managed object kinds: opaque handles with hidden lifecycle
    /// invariants. Values of these kinds must be zero-initialized before
    /// first use.
    pub fn is_object(self) -> bool {
        matches!(
            self,
            DataType::Element
                | DataType::Allocation
                | DataType::Sampler
                | DataType::Script
                | DataType::Stream
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.export_name())
    }
}

/// Data role of a primitive or vector value, carried through to the runtime
/// spec records. Everything the checker admits from user code is `User`; the
/// pixel roles exist for synthesized element types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    #[default]
    User = 0,
    PixelL = 1,
    PixelA = 2,
    PixelLA = 3,
    PixelRGB = 4,
    PixelRGBA = 5,
}
