//! Target-machine type rendering
//!
//! [`MachineType`] is the codegen-facing structural representation of an
//! export type: machine scalars, pointers, short vectors, arrays, and
//! aggregates with resolved byte offsets. Export types render lazily, once,
//! into a per-node cache that a `keep` pass invalidates.
//!
//! Record rendering is placeholder-first: the record is registered as
//! in-progress before its fields render, and a pointer whose pointee is
//! in-progress renders as a pointer to a named [`MachineType::Opaque`]
//! reference. Without this, a self-referential record would recurse forever.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::{ExportContext, TargetConfig};
use crate::dtype::DataType;
use crate::types::{ExportKind, ExportTypeId};

/// A target-machine type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MachineType {
    /// Boolean (i1); occupies one byte of storage.
    Bool,

    /// Signed integer types
    I8,
    I16,
    I32,
    I64,

    /// Unsigned integer types
    U8,
    U16,
    U32,
    U64,

    /// Floating point types
    F32,
    F64,

    /// Pointer type
    Ptr(Box<MachineType>),

    /// Short SIMD vector (2-4 homogeneous scalar lanes)
    Vector {
        element: Box<MachineType>,
        count: u32,
    },

    /// Fixed-length array
    Array(Box<MachineType>, u64),

    /// Aggregate with resolved layout. `size` is the total allocation size
    /// from the layout oracle, including tail padding.
    Struct {
        name: String,
        fields: Vec<MachineField>,
        packed: bool,
        size: u64,
    },

    /// Named reference to an aggregate whose layout is still being resolved.
    /// Only ever appears behind a pointer.
    Opaque { name: String },
}

/// Field of a machine aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineField {
    pub name: String,
    pub ty: MachineType,
    pub offset: u64,
}

impl MachineType {
    /// Size of a stored value in bytes, without trailing padding (aggregates
    /// report their oracle-provided allocation size).
    pub fn store_size(&self, target: &TargetConfig) -> u64 {
        match self {
            MachineType::Bool | MachineType::I8 | MachineType::U8 => 1,
            MachineType::I16 | MachineType::U16 => 2,
            MachineType::I32 | MachineType::U32 | MachineType::F32 => 4,
            MachineType::I64 | MachineType::U64 | MachineType::F64 => 8,
            MachineType::Ptr(_) => u64::from(target.pointer_width),
            MachineType::Vector { element, count } => {
                element.store_size(target) * u64::from(*count)
            }
            MachineType::Array(element, len) => element.store_size(target) * len,
            MachineType::Struct { size, .. } => *size,
            MachineType::Opaque { name } => {
                panic!("opaque type '{name}' has no resolved layout")
            }
        }
    }

    /// Alignment requirement in bytes.
    pub fn align(&self, target: &TargetConfig) -> u64 {
        match self {
            MachineType::Bool | MachineType::I8 | MachineType::U8 => 1,
            MachineType::I16 | MachineType::U16 => 2,
            MachineType::I32 | MachineType::U32 | MachineType::F32 => 4,
            MachineType::I64 | MachineType::U64 | MachineType::F64 => 8,
            MachineType::Ptr(_) => u64::from(target.pointer_width),
            // Vectors align to their full size for aligned loads.
            MachineType::Vector { element, count } => (element.store_size(target)
                * u64::from(*count))
            .max(element.align(target)),
            MachineType::Array(element, _) => element.align(target),
            MachineType::Struct { fields, packed, .. } => {
                if *packed {
                    1
                } else {
                    fields
                        .iter()
                        .map(|f| f.ty.align(target))
                        .max()
                        .unwrap_or(1)
                }
            }
            MachineType::Opaque { name } => {
                panic!("opaque type '{name}' has no resolved layout")
            }
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            MachineType::I8
                | MachineType::I16
                | MachineType::I32
                | MachineType::I64
                | MachineType::U8
                | MachineType::U16
                | MachineType::U32
                | MachineType::U64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, MachineType::F32 | MachineType::F64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, MachineType::Ptr(_))
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::Bool => write!(f, "bool"),
            MachineType::I8 => write!(f, "i8"),
            MachineType::I16 => write!(f, "i16"),
            MachineType::I32 => write!(f, "i32"),
            MachineType::I64 => write!(f, "i64"),
            MachineType::U8 => write!(f, "u8"),
            MachineType::U16 => write!(f, "u16"),
            MachineType::U32 => write!(f, "u32"),
            MachineType::U64 => write!(f, "u64"),
            MachineType::F32 => write!(f, "f32"),
            MachineType::F64 => write!(f, "f64"),
            MachineType::Ptr(ty) => write!(f, "*{ty}"),
            MachineType::Vector { element, count } => write!(f, "vec<{element}; {count}>"),
            MachineType::Array(ty, len) => write!(f, "[{ty}; {len}]"),
            MachineType::Struct { name, .. } => write!(f, "struct {name}"),
            MachineType::Opaque { name } => write!(f, "opaque {name}"),
        }
    }
}

/// Integer type with the target's pointer width.
pub(crate) fn pointer_int(target: &TargetConfig) -> MachineType {
    match target.pointer_width {
        4 => MachineType::I32,
        8 => MachineType::I64,
        width => panic!("unsupported pointer width: {width}"),
    }
}

/// Machine scalar carrying a value of the given data kind. Packed-pixel
/// formats map to their 16-bit integer carrier.
pub(crate) fn scalar_machine_type(dtype: DataType) -> MachineType {
    match dtype {
        DataType::Float32 => MachineType::F32,
        DataType::Float64 => MachineType::F64,
        DataType::Boolean => MachineType::Bool,
        DataType::Signed8 => MachineType::I8,
        DataType::Signed16 => MachineType::I16,
        DataType::Signed32 => MachineType::I32,
        DataType::Signed64 => MachineType::I64,
        DataType::Unsigned8 => MachineType::U8,
        DataType::Unsigned16 => MachineType::U16,
        DataType::Unsigned32 => MachineType::U32,
        DataType::Unsigned64 => MachineType::U64,
        DataType::Unsigned565 | DataType::Unsigned5551 | DataType::Unsigned4444 => {
            MachineType::U16
        }
        _ => panic!("unknown data type: {dtype:?} is not a machine scalar"),
    }
}

impl ExportContext {
    /// Target-machine type of an export type, rendered lazily and cached
    /// until invalidated by a `keep` pass. `None` means an unrenderable
    /// constituent; the caller treats that as fatal for the compilation.
    pub fn machine_type(&self, id: ExportTypeId) -> Option<MachineType> {
        if let Some(cached) = self.export_type(id).machine.borrow().as_ref() {
            return Some(cached.clone());
        }

        let rendered = self.render_machine(id)?;
        *self.export_type(id).machine.borrow_mut() = Some(rendered.clone());
        Some(rendered)
    }

    fn render_machine(&self, id: ExportTypeId) -> Option<MachineType> {
        let ty = self.export_type(id);
        match &ty.kind {
            ExportKind::Primitive { dtype, .. } => {
                if dtype.is_object() {
                    Some(self.object_handle_type())
                } else {
                    Some(scalar_machine_type(*dtype))
                }
            }
            ExportKind::Pointer { pointee } => {
                let pointee_ty = if self.machine_in_progress.borrow().contains(pointee) {
                    MachineType::Opaque {
                        name: self.export_type(*pointee).name().to_string(),
                    }
                } else {
                    self.machine_type(*pointee)?
                };
                Some(MachineType::Ptr(Box::new(pointee_ty)))
            }
            ExportKind::Vector { dtype, lanes, .. } => Some(MachineType::Vector {
                element: Box::new(scalar_machine_type(*dtype)),
                count: *lanes,
            }),
            ExportKind::Matrix { dim } => {
                // struct { float m[dim * dim]; }
                let len = u64::from(dim * dim);
                Some(MachineType::Struct {
                    name: ty.name.clone(),
                    fields: vec![MachineField {
                        name: "m".to_string(),
                        ty: MachineType::Array(Box::new(MachineType::F32), len),
                        offset: 0,
                    }],
                    packed: false,
                    size: len * 4,
                })
            }
            ExportKind::ConstantArray { element, size } => Some(MachineType::Array(
                Box::new(self.machine_type(*element)?),
                u64::from(*size),
            )),
            ExportKind::Record {
                fields,
                packed,
                alloc_size,
                ..
            } => {
                // Mark in-progress first: a field may point back at this
                // record.
                self.machine_in_progress.borrow_mut().insert(id);

                let mut machine_fields = Vec::with_capacity(fields.len());
                for field in fields.iter() {
                    match self.machine_type(field.ty) {
                        Some(field_ty) => machine_fields.push(MachineField {
                            name: field.name.clone(),
                            ty: field_ty,
                            offset: field.offset,
                        }),
                        None => {
                            self.machine_in_progress.borrow_mut().remove(&id);
                            return None;
                        }
                    }
                }
                self.machine_in_progress.borrow_mut().remove(&id);

                Some(MachineType::Struct {
                    name: ty.name.clone(),
                    fields: machine_fields,
                    packed: *packed,
                    size: *alloc_size,
                })
            }
        }
    }

    /// The opaque object-handle type shared by all runtime-object kinds:
    ///
    /// ```text
    /// struct { iptr p[1]; } __attribute__((packed, aligned(pointer_size)))
    /// ```
    ///
    /// Computed once per context, independent of which object kind asked.
    pub fn object_handle_type(&self) -> MachineType {
        if let Some(cached) = self.object_machine.borrow().as_ref() {
            return cached.clone();
        }

        let handle = MachineType::Struct {
            name: "sk_object".to_string(),
            fields: vec![MachineField {
                name: "p".to_string(),
                ty: MachineType::Array(Box::new(pointer_int(&self.target)), 1),
                offset: 0,
            }],
            packed: true,
            size: u64::from(self.target.pointer_width),
        };
        *self.object_machine.borrow_mut() = Some(handle.clone());
        handle
    }
}
