//! Runtime spec descriptors
//!
//! The reflection layer on the other side of the boundary reconstructs
//! exported types from compact, self-describing records. [`SpecType`] is the
//! in-memory form: one allocation per node, children shared by reference
//! (`Rc`), encoded to bytes with postcard for the runtime to consume.
//!
//! A record being rendered may be reached again through one of its own
//! pointer fields; that back-edge is emitted as a [`SpecType::RecordRef`]
//! naming the record instead of recursing into it.
//!
//! The companion query [`record_needs_zero_init`] answers whether a struct
//! transitively holds any runtime-object or matrix value. Both carry hidden
//! runtime invariants that must start zeroed, so one such field anywhere in
//! the closure taints the whole struct.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::context::ExportContext;
use crate::dtype::{DataKind, DataType};
use crate::source::{SourceTypeKind, TypeRef, TypeTable};
use crate::types::{ExportKind, ExportTypeId};

/// Tagged type descriptor consumed by the runtime reflection layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpecType {
    Primitive {
        data_type: DataType,
    },
    Pointer {
        pointee: Rc<SpecType>,
    },
    Vector {
        data_type: DataType,
        lanes: u32,
    },
    Matrix {
        data_type: DataType,
    },
    ConstantArray {
        element: Rc<SpecType>,
        count: u32,
    },
    Record {
        name: String,
        fields: Vec<SpecField>,
    },
    /// Back-reference to a record descriptor emitted elsewhere in the same
    /// stream; resolved by name on the runtime side.
    RecordRef { name: String },
}

/// Field entry of a record descriptor, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecField {
    pub name: String,
    pub ty: Rc<SpecType>,
    /// Data role of the field: inherited from the field's own type when it
    /// is a primitive or vector, `User` for everything else.
    pub data_kind: DataKind,
}

/// Encode a spec descriptor into the compact binary record the runtime
/// loads.
pub fn encode_spec(spec: &SpecType) -> postcard::Result<Vec<u8>> {
    postcard::to_allocvec(spec)
}

/// Decode a binary spec record; the runtime-side counterpart of
/// [`encode_spec`], used here for tests and tooling.
pub fn decode_spec(bytes: &[u8]) -> postcard::Result<SpecType> {
    postcard::from_bytes(bytes)
}

impl ExportContext {
    /// Spec descriptor of an export type, rendered lazily and cached; the
    /// handle is shared, not copied, by every parent that references it.
    /// `None` means a constituent failed to render, which propagates.
    pub fn spec_type(&self, id: ExportTypeId) -> Option<Rc<SpecType>> {
        if let Some(cached) = self.export_type(id).spec.borrow().as_ref() {
            return Some(Rc::clone(cached));
        }

        let rendered = self.render_spec(id)?;
        *self.export_type(id).spec.borrow_mut() = Some(Rc::clone(&rendered));
        Some(rendered)
    }

    fn render_spec(&self, id: ExportTypeId) -> Option<Rc<SpecType>> {
        let ty = self.export_type(id);
        match &ty.kind {
            ExportKind::Primitive { dtype, .. } => Some(Rc::new(SpecType::Primitive {
                data_type: *dtype,
            })),
            ExportKind::Pointer { pointee } => {
                let pointee_spec = if self.spec_in_progress.borrow().contains(pointee) {
                    Rc::new(SpecType::RecordRef {
                        name: self.export_type(*pointee).name().to_string(),
                    })
                } else {
                    self.spec_type(*pointee)?
                };
                Some(Rc::new(SpecType::Pointer {
                    pointee: pointee_spec,
                }))
            }
            ExportKind::Vector { dtype, lanes, .. } => Some(Rc::new(SpecType::Vector {
                data_type: *dtype,
                lanes: *lanes,
            })),
            ExportKind::Matrix { dim } => {
                let data_type = match dim {
                    2 => DataType::Matrix2x2,
                    3 => DataType::Matrix3x3,
                    4 => DataType::Matrix4x4,
                    _ => panic!("matrix type with unsupported dimension: {dim}"),
                };
                Some(Rc::new(SpecType::Matrix { data_type }))
            }
            ExportKind::ConstantArray { element, size } => {
                let element_spec = self.spec_type(*element)?;
                Some(Rc::new(SpecType::ConstantArray {
                    element: element_spec,
                    count: *size,
                }))
            }
            ExportKind::Record { fields, .. } => {
                self.spec_in_progress.borrow_mut().insert(id);

                let mut spec_fields = Vec::with_capacity(fields.len());
                for field in fields.iter() {
                    let Some(field_spec) = self.spec_type(field.ty) else {
                        self.spec_in_progress.borrow_mut().remove(&id);
                        return None;
                    };

                    let data_kind = match &self.export_type(field.ty).kind {
                        ExportKind::Primitive { data_kind, .. }
                        | ExportKind::Vector { data_kind, .. } => *data_kind,
                        _ => DataKind::User,
                    };

                    spec_fields.push(SpecField {
                        name: field.name.clone(),
                        ty: field_spec,
                        data_kind,
                    });
                }
                self.spec_in_progress.borrow_mut().remove(&id);

                Some(Rc::new(SpecType::Record {
                    name: ty.name.clone(),
                    fields: spec_fields,
                }))
            }
        }
    }
}

/// Whether a struct (possibly behind nested constant arrays) transitively
/// contains a runtime-object or matrix value and therefore must be
/// zero-initialized before first use.
///
/// Operates on the source view so it also covers structs that are not
/// themselves exportable but occur internally in user code.
pub fn record_needs_zero_init(table: &TypeTable, ty: TypeRef) -> bool {
    let mut ty = table.canonical(ty);
    while let SourceTypeKind::ConstantArray { element, .. } = table.kind(ty) {
        ty = table.canonical(*element);
    }

    let Some(def) = table.record_def(ty) else {
        return false;
    };
    if def.is_union() || !def.is_definition {
        return false;
    }

    let mut seen = false;
    for field in &def.fields {
        let mut field_ty = table.canonical(field.ty);
        while let SourceTypeKind::ConstantArray { element, .. } = table.kind(field_ty) {
            field_ty = table.canonical(*element);
        }

        let Some(field_def) = table.record_def(field_ty) else {
            continue;
        };

        match field_def.resolved_name().and_then(DataType::from_record_name) {
            // Object handles definitely need zero-initialization; matrix
            // values do as well.
            Some(dt) if dt.is_object() || dt.is_matrix() => seen = true,
            Some(_) => {}
            // Plain structs of structs are scanned recursively, even though
            // such nestings may not be exportable themselves.
            None => seen |= record_needs_zero_init(table, field_ty),
        }
    }

    seen
}
