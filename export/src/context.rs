//! Export context: the type registry
//!
//! One [`ExportContext`] per compilation unit. It owns every
//! [`ExportType`] instance it creates (an arena indexed by
//! [`ExportTypeId`]) and the name-keyed registry that guarantees at most one
//! instance per canonical name, with the single exception of constant-array
//! placeholders, which are never cached and always freshly constructed.
//!
//! The context is not a synchronization point: it is single-threaded by
//! design, and concurrent compilation units each own an independent context.

use std::cell::RefCell;

use diagnostics::{DiagnosticBuilder, Diagnostics};
use fxhash::FxHashSet;
use indexmap::IndexMap;
use log::{debug, trace};

use crate::check;
use crate::dtype::{DataKind, DataType};
use crate::machine::MachineType;
use crate::name;
use crate::source::{DeclRef, SourceTypeKind, TypeRef, TypeTable};
use crate::types::{ExportKind, ExportType, ExportTypeId};

/// Target machine assumptions the renderers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Pointer width in bytes (4 or 8).
    pub pointer_width: u32,
}

impl TargetConfig {
    pub fn new(pointer_width: u32) -> Self {
        assert!(
            pointer_width == 4 || pointer_width == 8,
            "unsupported pointer width: {pointer_width}"
        );
        Self { pointer_width }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self { pointer_width: 8 }
    }
}

/// Registry and owner of all export types of one compilation unit.
pub struct ExportContext {
    pub(crate) types: Vec<ExportType>,
    pub(crate) by_name: IndexMap<String, ExportTypeId>,
    pub(crate) target: TargetConfig,
    pub(crate) diagnostics: Diagnostics,
    /// The opaque object-handle machine type, shared by all object kinds.
    pub(crate) object_machine: RefCell<Option<MachineType>>,
    /// Records currently being rendered, for cycle-safe machine rendering.
    pub(crate) machine_in_progress: RefCell<FxHashSet<ExportTypeId>>,
    /// Records currently being rendered, for cycle-safe spec rendering.
    pub(crate) spec_in_progress: RefCell<FxHashSet<ExportTypeId>>,
}

impl ExportContext {
    pub fn new() -> Self {
        Self::with_target(TargetConfig::default())
    }

    pub fn with_target(target: TargetConfig) -> Self {
        Self {
            types: Vec::new(),
            by_name: IndexMap::new(),
            target,
            diagnostics: Diagnostics::new(),
            object_machine: RefCell::new(None),
            machine_in_progress: RefCell::new(FxHashSet::default()),
            spec_in_progress: RefCell::new(FxHashSet::default()),
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Diagnostics accumulated by creation and rendering so far.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// The export type behind an id. Ids are only ever minted by this
    /// context, so the lookup is infallible.
    pub fn export_type(&self, id: ExportTypeId) -> &ExportType {
        &self.types[id.0 as usize]
    }

    /// Look up an already-created export type by canonical name.
    pub fn find_export_type(&self, name: &str) -> Option<ExportTypeId> {
        self.by_name.get(name).copied()
    }

    /// All registered export types, in creation order.
    pub fn export_types(&self) -> impl Iterator<Item = (&str, ExportTypeId)> {
        self.by_name.iter().map(|(name, &id)| (name.as_str(), id))
    }

    /// Registered export types marked live by a `keep` pass.
    pub fn kept_types(&self) -> impl Iterator<Item = (&str, ExportTypeId)> {
        self.export_types()
            .filter(|&(_, id)| self.export_type(id).is_kept())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Export the type of a variable declaration. The entry point of the
    /// pipeline: checks exportability (reporting into the context's
    /// diagnostics), resolves the canonical name, then looks up or creates
    /// the export type.
    pub fn create_from_decl(&mut self, table: &TypeTable, decl: &DeclRef) -> Option<ExportTypeId> {
        let (ty, type_name) =
            check::normalize_type(table, decl.ty, Some(&mut self.diagnostics), Some(decl))?;
        self.create_with_name(table, ty, &type_name)
    }

    /// Export a type with no associated declaration. Used for constituent
    /// types; callers are expected to have pre-validated the declaration the
    /// type came from.
    pub fn create_type(&mut self, table: &TypeTable, ty: TypeRef) -> Option<ExportTypeId> {
        let (ty, type_name) = check::normalize_type(table, ty, Some(&mut self.diagnostics), None)?;
        self.create_with_name(table, ty, &type_name)
    }

    /// Construct a constituent (a record field or array element) of a type
    /// the checker already validated as a whole.
    ///
    /// Resolves the name without re-running the exportability check: a
    /// constituent is only valid in the context of its enclosing walk (a
    /// nested record's back-edge pointer does not pass in isolation), so the
    /// top-level decision is trusted here.
    pub(crate) fn create_constituent(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
    ) -> Option<ExportTypeId> {
        let ty = table.canonical(ty);
        let type_name = name::type_name(table, ty)?;
        self.create_with_name(table, ty, &type_name)
    }

    /// Look up the registry by name, or construct the appropriate export
    /// type variant for an already-normalized type.
    pub fn create_with_name(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
    ) -> Option<ExportTypeId> {
        if let Some(&id) = self.by_name.get(type_name) {
            trace!("registry hit for '{type_name}'");
            return Some(id);
        }

        let ty = table.canonical(ty);
        match table.kind(ty) {
            SourceTypeKind::Record(_) => match DataType::from_record_name(type_name) {
                // User-defined struct.
                None => self.create_record(table, ty, type_name, false),
                Some(dt) if dt.is_matrix() => {
                    self.create_matrix(table, ty, type_name, dt.matrix_dim().unwrap())
                }
                // Runtime object kinds export as opaque-handle primitives.
                Some(dt) => Some(self.insert(ExportType::new(
                    type_name,
                    ExportKind::Primitive {
                        dtype: dt,
                        data_kind: DataKind::User,
                        normalized: false,
                    },
                ))),
            },
            SourceTypeKind::Builtin(_) => self.create_primitive(table, ty, type_name),
            SourceTypeKind::Pointer { .. } => self.create_pointer(table, ty, type_name),
            SourceTypeKind::Vector { .. } => self.create_vector(table, ty, type_name),
            SourceTypeKind::ConstantArray { .. } => self.create_constant_array(table, ty),
            SourceTypeKind::Alias { .. } => unreachable!("aliases are resolved by canonical()"),
            SourceTypeKind::Other(kind_name) => {
                let message = format!("unknown type cannot be exported: '{kind_name}'");
                self.diagnostics
                    .push(DiagnosticBuilder::error(message).code("E0814").build());
                None
            }
        }
    }

    /// Scalar data kind of a type expected to be primitive (a supported
    /// builtin or a recognized runtime record).
    pub(crate) fn data_type_of(&mut self, table: &TypeTable, ty: TypeRef) -> Option<DataType> {
        let ty = table.canonical(ty);
        match table.kind(ty) {
            SourceTypeKind::Builtin(kind) => match DataType::from_builtin(*kind) {
                Some(dt) => Some(dt),
                None => {
                    let message =
                        format!("built-in type cannot be exported: '{}'", kind.spelling());
                    self.diagnostics
                        .push(DiagnosticBuilder::error(message).code("E0801").build());
                    None
                }
            },
            SourceTypeKind::Record(def) => {
                def.resolved_name().and_then(DataType::from_record_name)
            }
            other => {
                let message = format!(
                    "primitive type cannot be exported: '{}'",
                    other.class_name()
                );
                self.diagnostics
                    .push(DiagnosticBuilder::error(message).code("E0818").build());
                None
            }
        }
    }

    fn create_primitive(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
    ) -> Option<ExportTypeId> {
        let dtype = self.data_type_of(table, ty)?;
        Some(self.insert(ExportType::new(
            type_name,
            ExportKind::Primitive {
                dtype,
                data_kind: DataKind::User,
                normalized: false,
            },
        )))
    }

    /// The plain platform integer, used as the degraded pointee of
    /// double-or-higher indirection.
    pub(crate) fn platform_int(&mut self) -> ExportTypeId {
        let int_name = DataType::Signed32.export_name();
        if let Some(&id) = self.by_name.get(int_name) {
            return id;
        }
        self.insert(ExportType::new(
            int_name,
            ExportKind::Primitive {
                dtype: DataType::Signed32,
                data_kind: DataKind::User,
                normalized: false,
            },
        ))
    }

    fn create_pointer(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
    ) -> Option<ExportTypeId> {
        let SourceTypeKind::Pointer { pointee } = table.kind(ty) else {
            unreachable!("create_pointer on non-pointer type");
        };
        let pointee = table.canonical(*pointee);

        let pointee_id = if table.is_pointer(pointee) {
            // Double or higher dimension of pointer, export as plain int.
            self.platform_int()
        } else {
            // A failure here has already been diagnosed for the pointee.
            self.create_type(table, pointee)?
        };

        Some(self.insert(ExportType::new(
            type_name,
            ExportKind::Pointer {
                pointee: pointee_id,
            },
        )))
    }

    fn create_vector(
        &mut self,
        table: &TypeTable,
        ty: TypeRef,
        type_name: &str,
    ) -> Option<ExportTypeId> {
        let SourceTypeKind::Vector { element, lanes } = table.kind(ty) else {
            unreachable!("create_vector on non-vector type");
        };
        let (element, lanes) = (*element, *lanes);

        let dtype = self.data_type_of(table, element)?;
        Some(self.insert(ExportType::new(
            type_name,
            ExportKind::Vector {
                dtype,
                data_kind: DataKind::User,
                normalized: false,
                lanes,
            },
        )))
    }

    fn create_constant_array(&mut self, table: &TypeTable, ty: TypeRef) -> Option<ExportTypeId> {
        let SourceTypeKind::ConstantArray { element, size } = table.kind(ty) else {
            unreachable!("create_constant_array on non-array type");
        };
        let (element, size) = (*element, *size);
        assert!(size > 0, "constant array should have a size greater than 0");

        let element_id = self.create_constituent(table, element)?;
        Some(self.insert(ExportType::new(
            name::CONSTANT_ARRAY_PLACEHOLDER,
            ExportKind::ConstantArray {
                element: element_id,
                size,
            },
        )))
    }

    /// Add a node to the arena, registering it by name unless the name is a
    /// reserved placeholder (instances so named are never safe to share).
    pub(crate) fn insert(&mut self, ty: ExportType) -> ExportTypeId {
        let id = ExportTypeId(self.types.len() as u32);
        if !name::is_placeholder_name(&ty.name) {
            debug!("registering export type '{}'", ty.name);
            self.by_name.insert(ty.name.clone(), id);
        }
        self.types.push(ty);
        id
    }

    /// Total allocation size of a type in bytes. Records answer from the
    /// host's layout oracle; everything else from the rendered machine type,
    /// rounded up to its alignment.
    pub fn alloc_size(&self, id: ExportTypeId) -> Option<u64> {
        if let ExportKind::Record { alloc_size, .. } = &self.export_type(id).kind {
            return Some(*alloc_size);
        }
        let machine = self.machine_type(id)?;
        let size = machine.store_size(&self.target);
        let align = machine.align(&self.target);
        Some(size.div_ceil(align) * align)
    }

    /// Store size of a type in bytes (no trailing padding).
    pub fn store_size(&self, id: ExportTypeId) -> Option<u64> {
        Some(self.machine_type(id)?.store_size(&self.target))
    }
}

impl Default for ExportContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BuiltinKind, FieldDef, RecordDef, RecordLayout};

    #[test]
    fn test_lookup_or_create_dedups_by_name() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let a = ctx.create_type(&table, int).unwrap();
        let b = ctx.create_type(&table, int).unwrap();
        assert_eq!(a, b);

        // A different source descriptor with the same canonical name
        // resolves to the same instance.
        let aliased = table.alias(int);
        let c = ctx.create_type(&table, aliased).unwrap();
        assert_eq!(a, c);

        assert_eq!(ctx.find_export_type("int"), Some(a));
        assert_eq!(ctx.find_export_type("uint"), None);
    }

    #[test]
    fn test_constant_arrays_are_never_cached() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let int = table.builtin(BuiltinKind::Int);
        let arr = table.array_of(int, 4);

        let a = ctx.create_type(&table, arr).unwrap();
        let b = ctx.create_type(&table, arr).unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.find_export_type(crate::name::CONSTANT_ARRAY_PLACEHOLDER), None);

        // The shared element type is still deduplicated.
        let ExportKind::ConstantArray { element: ea, .. } = ctx.export_type(a).kind() else {
            panic!("expected array");
        };
        let ExportKind::ConstantArray { element: eb, .. } = ctx.export_type(b).kind() else {
            panic!("expected array");
        };
        assert_eq!(ea, eb);
    }

    #[test]
    fn test_pointer_to_pointer_degrades_to_int() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let float = table.builtin(BuiltinKind::Float);
        let p = table.pointer_to(float);
        let pp = table.pointer_to(p);

        let id = ctx.create_type(&table, pp).unwrap();
        let ty = ctx.export_type(id);
        assert_eq!(ty.name(), "**float");

        let ExportKind::Pointer { pointee } = ty.kind() else {
            panic!("expected pointer");
        };
        // The pointee degraded to the plain platform integer.
        let int_id = ctx.find_export_type("int").unwrap();
        assert_eq!(*pointee, int_id);
    }

    #[test]
    fn test_object_record_exports_as_primitive() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let alloc = table.record(RecordDef::new_struct("sk_allocation", vec![]));
        let id = ctx.create_type(&table, alloc).unwrap();

        let ty = ctx.export_type(id);
        assert!(ty.is_object());
        assert_eq!(ty.name(), "sk_allocation");
    }

    #[test]
    fn test_unknown_kind_is_diagnosed() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let f = table.other("FunctionProto");
        let decl = DeclRef::new("callback", f);
        assert!(ctx.create_from_decl(&table, &decl).is_none());
        assert!(ctx.diagnostics().has_errors());
    }

    #[test]
    fn test_creation_order_is_preserved() {
        let mut table = TypeTable::new();
        let mut ctx = ExportContext::new();

        let float = table.builtin(BuiltinKind::Float);
        let int = table.builtin(BuiltinKind::Int);
        let s = table.record(
            RecordDef::new_struct("Pair", vec![FieldDef::new("a", int), FieldDef::new("b", float)])
                .with_layout(RecordLayout {
                    size: 8,
                    field_offsets: vec![0, 4],
                }),
        );
        ctx.create_type(&table, s).unwrap();

        let names: Vec<_> = ctx.export_types().map(|(name, _)| name).collect();
        // A record registers before its constituents: the node must be
        // visible in the registry while its fields are being built.
        assert_eq!(names, vec!["Pair", "int", "float"]);
    }
}
