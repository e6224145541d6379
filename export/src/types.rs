//! Canonical export type model
//!
//! The closed set of shapes a type can take once it has crossed the
//! exportability check: primitive scalars (including opaque runtime-object
//! handles), pointers, short vectors, square float matrices, constant arrays,
//! and records. Nodes live in the [`ExportContext`](crate::ExportContext)
//! arena and reference each other by [`ExportTypeId`], which is also what
//! gives registry identity: one instance per canonical name per context.
//!
//! The derived representations (machine type, spec descriptor) are cached on
//! the node in invalidatable cells; [`ExportContext::keep`] is the only thing
//! that invalidates.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fxhash::FxHashSet;
use smallvec::SmallVec;

use crate::context::ExportContext;
use crate::dtype::{DataKind, DataType};
use crate::machine::MachineType;
use crate::spec::SpecType;

/// Identity of an export type within one [`ExportContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportTypeId(pub(crate) u32);

/// The six export type classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Primitive,
    Pointer,
    Vector,
    Matrix,
    ConstantArray,
    Record,
}

/// One field of an exported record, in declaration order.
#[derive(Debug, Clone)]
pub struct ExportField {
    pub name: String,
    pub ty: ExportTypeId,
    /// Back-reference to the enclosing record (non-owning: ids don't own).
    pub owner: ExportTypeId,
    /// Byte offset within the record, from the host's layout oracle.
    pub offset: u64,
}

/// Variant payload of an export type.
#[derive(Debug)]
pub enum ExportKind {
    Primitive {
        dtype: DataType,
        data_kind: DataKind,
        normalized: bool,
    },
    Pointer {
        pointee: ExportTypeId,
    },
    Vector {
        dtype: DataType,
        data_kind: DataKind,
        normalized: bool,
        lanes: u32,
    },
    Matrix {
        dim: u32,
    },
    ConstantArray {
        element: ExportTypeId,
        size: u32,
    },
    Record {
        fields: SmallVec<[ExportField; 8]>,
        packed: bool,
        /// Synthesized by the compiler rather than declared by the user.
        artificial: bool,
        /// Total allocation size in bytes, from the layout oracle.
        alloc_size: u64,
    },
}

/// A canonical export type.
pub struct ExportType {
    pub(crate) name: String,
    pub(crate) kind: ExportKind,
    pub(crate) kept: Cell<bool>,
    pub(crate) machine: RefCell<Option<MachineType>>,
    pub(crate) spec: RefCell<Option<Rc<SpecType>>>,
}

impl ExportType {
    pub(crate) fn new(name: impl Into<String>, kind: ExportKind) -> Self {
        Self {
            name: name.into(),
            kind,
            kept: Cell::new(false),
            machine: RefCell::new(None),
            spec: RefCell::new(None),
        }
    }

    /// Canonical name; unique per registry except for array placeholders.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExportKind {
        &self.kind
    }

    pub fn class(&self) -> TypeClass {
        match self.kind {
            ExportKind::Primitive { .. } => TypeClass::Primitive,
            ExportKind::Pointer { .. } => TypeClass::Pointer,
            ExportKind::Vector { .. } => TypeClass::Vector,
            ExportKind::Matrix { .. } => TypeClass::Matrix,
            ExportKind::ConstantArray { .. } => TypeClass::ConstantArray,
            ExportKind::Record { .. } => TypeClass::Record,
        }
    }

    /// Whether this type has been marked live by a `keep` pass.
    pub fn is_kept(&self) -> bool {
        self.kept.get()
    }

    /// Primitive of a runtime-managed object kind.
    pub fn is_object(&self) -> bool {
        matches!(self.kind, ExportKind::Primitive { dtype, .. } if dtype.is_object())
    }

    pub fn fields(&self) -> &[ExportField] {
        match &self.kind {
            ExportKind::Record { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl std::fmt::Debug for ExportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportType")
            .field("name", &self.name)
            .field("class", &self.class())
            .field("kept", &self.kept.get())
            .finish()
    }
}

impl ExportContext {
    /// Mark a type and everything it owns as live.
    ///
    /// Idempotent: a type already marked live returns `true` immediately,
    /// without re-invalidating its cached machine type or re-walking its
    /// children (which is also what terminates the walk on cyclic graphs).
    pub fn keep(&self, id: ExportTypeId) -> bool {
        let ty = self.export_type(id);
        if ty.kept.get() {
            return true;
        }
        ty.kept.set(true);

        // The machine type may need recomputation once the rest of the
        // retained closure is known; drop the cache and let the next access
        // rebuild it. The spec handle stays valid.
        *ty.machine.borrow_mut() = None;

        match &ty.kind {
            ExportKind::Pointer { pointee } => {
                self.keep(*pointee);
            }
            ExportKind::ConstantArray { element, .. } => {
                self.keep(*element);
            }
            ExportKind::Record { fields, .. } => {
                for field in fields.iter() {
                    self.keep(field.ty);
                }
            }
            ExportKind::Primitive { .. } | ExportKind::Vector { .. } | ExportKind::Matrix { .. } => {}
        }

        true
    }

    /// Structural equality of two export types.
    ///
    /// Distinct from name identity: compares the variant payload and recurses
    /// into child types. Field names and offsets do not participate; two
    /// records are equal when their field types line up.
    pub fn equals(&self, a: ExportTypeId, b: ExportTypeId) -> bool {
        let mut in_progress = FxHashSet::default();
        self.equals_inner(a, b, &mut in_progress)
    }

    fn equals_inner(
        &self,
        a: ExportTypeId,
        b: ExportTypeId,
        in_progress: &mut FxHashSet<(ExportTypeId, ExportTypeId)>,
    ) -> bool {
        if a == b {
            return true;
        }
        // A pair already being compared is a back-edge of two cyclic graphs
        // whose spines matched so far; treat it as equal to terminate.
        if !in_progress.insert((a, b)) {
            return true;
        }

        let (ta, tb) = (self.export_type(a), self.export_type(b));
        match (&ta.kind, &tb.kind) {
            (
                ExportKind::Primitive { dtype: da, .. },
                ExportKind::Primitive { dtype: db, .. },
            ) => da == db,
            (ExportKind::Pointer { pointee: pa }, ExportKind::Pointer { pointee: pb }) => {
                self.equals_inner(*pa, *pb, in_progress)
            }
            (
                ExportKind::Vector {
                    dtype: da,
                    lanes: la,
                    ..
                },
                ExportKind::Vector {
                    dtype: db,
                    lanes: lb,
                    ..
                },
            ) => da == db && la == lb,
            (ExportKind::Matrix { dim: da }, ExportKind::Matrix { dim: db }) => da == db,
            (
                ExportKind::ConstantArray {
                    element: ea,
                    size: sa,
                },
                ExportKind::ConstantArray {
                    element: eb,
                    size: sb,
                },
            ) => sa == sb && self.equals_inner(*ea, *eb, in_progress),
            (
                ExportKind::Record { fields: fa, .. },
                ExportKind::Record { fields: fb, .. },
            ) => {
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb.iter())
                        .all(|(x, y)| self.equals_inner(x.ty, y.ty, in_progress))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExportContext;
    use crate::source::{BuiltinKind, FieldDef, RecordDef, RecordLayout, TypeTable};

    fn layout(size: u64, offsets: &[u64]) -> RecordLayout {
        RecordLayout {
            size,
            field_offsets: offsets.to_vec(),
        }
    }

    #[test]
    fn test_class_and_accessors() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let id = ctx.create_type(&table, int).unwrap();

        let ty = ctx.export_type(id);
        assert_eq!(ty.class(), TypeClass::Primitive);
        assert_eq!(ty.name(), "int");
        assert!(!ty.is_object());
        assert!(!ty.is_kept());
        assert!(ty.fields().is_empty());
    }

    #[test]
    fn test_keep_marks_transitively() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let float = table.builtin(BuiltinKind::Float);
        let arr = table.array_of(float, 3);
        let s = table.record(
            RecordDef::new_struct(
                "Point",
                vec![FieldDef::new("a", int), FieldDef::new("b", arr)],
            )
            .with_layout(layout(16, &[0, 4])),
        );

        let id = ctx.create_type(&table, s).unwrap();
        assert!(!ctx.export_type(id).is_kept());

        assert!(ctx.keep(id));
        assert!(ctx.export_type(id).is_kept());
        for field in ctx.export_type(id).fields() {
            assert!(ctx.export_type(field.ty).is_kept());
        }
        // Array element is marked through the array.
        let int_id = ctx.find_export_type("int").unwrap();
        assert!(ctx.export_type(int_id).is_kept());
    }

    #[test]
    fn test_keep_is_idempotent_and_does_not_reinvalidate() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let id = ctx.create_type(&table, int).unwrap();

        assert!(ctx.keep(id));
        // Recompute the machine type, then keep again: the cache must
        // survive the second, no-op call.
        let machine = ctx.machine_type(id).unwrap();
        assert!(ctx.keep(id));
        assert_eq!(ctx.export_type(id).machine.borrow().as_ref(), Some(&machine));
    }

    #[test]
    fn test_keep_terminates_on_cycles() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let node = table.record(RecordDef::new_struct("Node", vec![]));
        let node_ptr = table.pointer_to(node);
        {
            let def = table.record_mut(node).unwrap();
            def.fields = vec![FieldDef::new("next", node_ptr)];
            def.layout = Some(layout(8, &[0]));
        }

        let id = ctx.create_type(&table, node).unwrap();
        assert!(ctx.keep(id));
        assert!(ctx.export_type(id).is_kept());
    }

    #[test]
    fn test_structural_equality() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let float = table.builtin(BuiltinKind::Float);

        let a = table.record(
            RecordDef::new_struct(
                "A",
                vec![FieldDef::new("x", int), FieldDef::new("y", float)],
            )
            .with_layout(layout(8, &[0, 4])),
        );
        // Same field types under different field names.
        let b = table.record(
            RecordDef::new_struct(
                "B",
                vec![FieldDef::new("u", int), FieldDef::new("v", float)],
            )
            .with_layout(layout(8, &[0, 4])),
        );
        let c = table.record(
            RecordDef::new_struct("C", vec![FieldDef::new("x", float)])
                .with_layout(layout(4, &[0])),
        );

        let a_id = ctx.create_type(&table, a).unwrap();
        let b_id = ctx.create_type(&table, b).unwrap();
        let c_id = ctx.create_type(&table, c).unwrap();

        assert!(ctx.equals(a_id, a_id));
        assert!(ctx.equals(a_id, b_id));
        assert!(!ctx.equals(a_id, c_id));

        let int_id = ctx.find_export_type("int").unwrap();
        let float_id = ctx.find_export_type("float").unwrap();
        assert!(!ctx.equals(int_id, float_id));
        assert!(!ctx.equals(int_id, a_id));
    }

    #[test]
    fn test_cyclic_equality_terminates() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let mk_list = |table: &mut TypeTable, name: &str| {
            let node = table.record(RecordDef::new_struct(name, vec![]));
            let ptr = table.pointer_to(node);
            let def = table.record_mut(node).unwrap();
            def.fields = vec![FieldDef::new("next", ptr)];
            def.layout = Some(layout(8, &[0]));
            node
        };
        let a = mk_list(&mut table, "ListA");
        let b = mk_list(&mut table, "ListB");

        let a_id = ctx.create_type(&table, a).unwrap();
        let b_id = ctx.create_type(&table, b).unwrap();

        // Isomorphic cyclic records compare equal, and the comparison
        // terminates.
        assert!(ctx.equals(a_id, b_id));
    }
}
