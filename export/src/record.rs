//! Record and matrix construction
//!
//! Records are built from a validated struct descriptor plus the host's
//! layout oracle. The node is registered *before* its fields are built, so a
//! self-referential struct's pointer field can find its own in-progress
//! instance through the registry; a failed build unregisters the node again
//! so no partial record is ever surfaced.
//!
//! A struct whose resolved name is a recognized matrix kind never becomes a
//! user record: it goes through the matrix validator instead, which enforces
//! the expected single-`float[dim*dim]`-field shape at construction time.

use diagnostics::DiagnosticBuilder;
use log::debug;
use smallvec::SmallVec;

use crate::context::ExportContext;
use crate::source::{BuiltinKind, SourceTypeKind, TypeRef, TypeTable};
use crate::types::{ExportField, ExportKind, ExportType, ExportTypeId};

impl ExportContext {
    /// Build a user record export type.
    ///
    /// The caller guarantees the descriptor passed the exportability check;
    /// a record without a layout oracle here is a contract violation in the
    /// host front-end.
    pub(crate) fn create_record(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
        artificial: bool,
    ) -> Option<ExportTypeId> {
        let def = table
            .record_def(ty)
            .expect("record builder requires a record type");
        assert!(!def.is_union(), "record builder requires a struct");
        assert!(
            def.is_definition,
            "struct '{type_name}' is not defined in this module"
        );
        let layout = def
            .layout
            .as_ref()
            .unwrap_or_else(|| panic!("failed to retrieve the struct layout for '{type_name}'"));
        assert_eq!(
            layout.field_offsets.len(),
            def.fields.len(),
            "layout oracle for '{type_name}' does not match its field list"
        );

        // Register the node before building fields: a field may reference
        // this record through a pointer.
        let id = self.insert(ExportType::new(
            type_name,
            ExportKind::Record {
                fields: SmallVec::new(),
                packed: def.packed,
                artificial,
                alloc_size: layout.size,
            },
        ));

        let mut fields: SmallVec<[ExportField; 8]> = SmallVec::new();
        for (index, field) in def.fields.iter().enumerate() {
            // Bit fields are rejected by the checker; a direct caller gets
            // the same failure without a duplicate diagnostic.
            if field.bit_field {
                self.unregister(type_name);
                return None;
            }

            match self.create_constituent(table, field.ty) {
                Some(field_ty) => fields.push(ExportField {
                    name: field.name.clone(),
                    ty: field_ty,
                    owner: id,
                    offset: layout.field_offsets[index],
                }),
                None => {
                    let message = format!(
                        "field type cannot be exported: '{type_name}.{}'",
                        field.name
                    );
                    self.diagnostics.push(
                        DiagnosticBuilder::error(message)
                            .code("E0816")
                            .subject(type_name)
                            .maybe_span(def.span.clone())
                            .build(),
                    );
                    self.unregister(type_name);
                    return None;
                }
            }
        }

        debug!(
            "built record '{type_name}' with {} fields, {} bytes",
            fields.len(),
            layout.size
        );

        let ExportKind::Record {
            fields: slot, ..
        } = &mut self.types[id.0 as usize].kind
        else {
            unreachable!("record node changed class during construction");
        };
        *slot = fields;

        Some(id)
    }

    /// Build a matrix export type from a struct claiming to be one.
    ///
    /// Validates the expected form (exactly one field: a constant array of
    /// `float` with exactly `dim * dim` elements), but assumes correctness
    /// when no definition is visible to examine.
    pub(crate) fn create_matrix(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
        dim: u32,
    ) -> Option<ExportTypeId> {
        let def = table
            .record_def(ty)
            .expect("matrix builder requires a record type");
        assert!(dim > 1, "invalid dimension of matrix");

        if def.is_definition {
            let invalid = |ctx: &mut Self, detail: &str| {
                let message = format!("invalid matrix struct: {detail}: '{type_name}'");
                ctx.diagnostics.push(
                    DiagnosticBuilder::error(message)
                        .code("E0817")
                        .subject(type_name)
                        .maybe_span(def.span.clone())
                        .build(),
                );
            };

            let Some(first) = def.fields.first() else {
                invalid(self, "must have 1 field for saving values");
                return None;
            };

            let field_ty = table.canonical(first.ty);
            let SourceTypeKind::ConstantArray { element, size } = table.kind(field_ty) else {
                invalid(self, "first field should be an array with constant size");
                return None;
            };

            let element = table.canonical(*element);
            if !matches!(table.kind(element), SourceTypeKind::Builtin(BuiltinKind::Float)) {
                invalid(self, "first field should be a float array");
                return None;
            }

            if *size != dim * dim {
                invalid(
                    self,
                    &format!("first field should be an array with size {}", dim * dim),
                );
                return None;
            }

            if def.fields.len() > 1 {
                invalid(self, "must have exactly 1 field");
                return None;
            }
        }

        Some(self.insert(ExportType::new(type_name, ExportKind::Matrix { dim })))
    }

    fn unregister(&mut self, type_name: &str) {
        self.by_name.shift_remove(type_name);
    }
}
