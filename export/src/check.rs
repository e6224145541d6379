//! Exportability analysis
//!
//! Decides whether a source type may cross the compiler/runtime boundary.
//! The decision itself is pure ([`exportable`] returns a reason code on
//! rejection); the wrappers [`type_exportable`] and [`normalize_type`] turn
//! reason codes into diagnostics attributed to the outermost named struct
//! when the offending type is nested, falling back to the originating
//! variable declaration.
//!
//! The walk is guarded by a visited set of in-progress records, which is what
//! keeps it terminating on self-referential type graphs: a record is inserted
//! before its fields are checked, and a pointer whose pointee is already in
//! the set is accepted as a back-edge instead of being re-walked.

use std::fmt;

use diagnostics::{DiagnosticBuilder, Diagnostics};
use fxhash::FxHashSet;

use crate::dtype::DataType;
use crate::name;
use crate::source::{DeclRef, SourceTypeKind, TypeRef, TypeTable};

/// Reason a type was rejected for export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedBuiltin,
    Union,
    UndefinedStruct,
    AnonymousStruct,
    FlexibleArrayMember,
    ObjectMember,
    BitField { record: String, field: String },
    PointerInStruct,
    PointerToArray,
    VectorLanes,
    VectorBase,
    MultiDimensionalArray,
    Vector3Array,
    UnknownKind(String),
    AnonymousType,
}

impl Rejection {
    /// Error code in the export range of the compiler's code registry.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnsupportedBuiltin => "E0801",
            Rejection::Union => "E0802",
            Rejection::UndefinedStruct => "E0803",
            Rejection::AnonymousStruct => "E0804",
            Rejection::FlexibleArrayMember => "E0805",
            Rejection::ObjectMember => "E0806",
            Rejection::BitField { .. } => "E0807",
            Rejection::PointerInStruct => "E0808",
            Rejection::PointerToArray => "E0809",
            Rejection::VectorLanes => "E0810",
            Rejection::VectorBase => "E0811",
            Rejection::MultiDimensionalArray => "E0812",
            Rejection::Vector3Array => "E0813",
            Rejection::UnknownKind(_) => "E0814",
            Rejection::AnonymousType => "E0815",
        }
    }

    /// Full diagnostic message, naming the attributed subject where the
    /// message template has a slot for it.
    pub fn format_message(&self, subject: &str) -> String {
        match self {
            Rejection::BitField { record, field } => {
                format!("bit fields are not able to be exported: '{record}.{field}'")
            }
            // The offender here is the type class itself, not a declaration.
            Rejection::UnknownKind(kind_name) => format!("{self}: '{kind_name}'"),
            Rejection::AnonymousStruct | Rejection::AnonymousType => self.to_string(),
            _ => format!("{self}: '{subject}'"),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnsupportedBuiltin => write!(f, "built-in type cannot be exported"),
            Rejection::Union => write!(f, "unions cannot be exported"),
            Rejection::UndefinedStruct => write!(f, "struct is not defined in this module"),
            Rejection::AnonymousStruct => write!(f, "anonymous structures cannot be exported"),
            Rejection::FlexibleArrayMember => {
                write!(f, "structures with flexible array members cannot be exported")
            }
            Rejection::ObjectMember => {
                write!(f, "structures containing object types cannot be exported")
            }
            Rejection::BitField { .. } => write!(f, "bit fields are not able to be exported"),
            Rejection::PointerInStruct => {
                write!(f, "structures containing pointers cannot be exported")
            }
            Rejection::PointerToArray => write!(f, "pointers to arrays cannot be exported"),
            Rejection::VectorLanes => write!(f, "vectors must have between 2 and 4 components"),
            Rejection::VectorBase => {
                write!(f, "vectors of non-primitive types cannot be exported")
            }
            Rejection::MultiDimensionalArray => {
                write!(f, "multidimensional arrays cannot be exported")
            }
            Rejection::Vector3Array => {
                write!(f, "arrays of width 3 vector types cannot be exported")
            }
            Rejection::UnknownKind(_) => write!(f, "unknown type cannot be exported"),
            Rejection::AnonymousType => write!(f, "anonymous types cannot be exported"),
        }
    }
}

/// A rejection plus the record it should be attributed to (the specific
/// offending record for record-shaped reasons, otherwise the outermost
/// record being checked, if any).
#[derive(Debug, Clone)]
pub struct TypeError {
    pub reason: Rejection,
    pub record: Option<TypeRef>,
}

impl TypeError {
    fn new(reason: Rejection, record: Option<TypeRef>) -> Self {
        Self { reason, record }
    }
}

/// Pure exportability decision.
///
/// `visited` is shared across one top-level check and holds the records
/// currently being walked; `top` is the outermost record, used both for the
/// pointers-in-structs rule and for error attribution. Returns the canonical
/// type on success.
pub(crate) fn exportable(
    table: &TypeTable,
    ty: TypeRef,
    visited: &mut FxHashSet<TypeRef>,
    top: Option<TypeRef>,
) -> Result<TypeRef, TypeError> {
    let ty = table.canonical(ty);

    if visited.contains(&ty) {
        return Ok(ty);
    }

    match table.kind(ty) {
        SourceTypeKind::Builtin(kind) => match DataType::from_builtin(*kind) {
            Some(_) => Ok(ty),
            None => Err(TypeError::new(Rejection::UnsupportedBuiltin, top)),
        },
        SourceTypeKind::Record(def) => {
            // Recognized runtime record kinds (matrices, object handles) are
            // exportable as-is; no field inspection.
            if let Some(name) = def.resolved_name() {
                if DataType::from_record_name(name).is_some() {
                    return Ok(ty);
                }
            }

            if def.is_union() {
                return Err(TypeError::new(Rejection::Union, Some(ty)));
            }
            if !def.is_definition {
                return Err(TypeError::new(Rejection::UndefinedStruct, Some(ty)));
            }

            let top = top.or(Some(ty));

            let record_name = match def.resolved_name() {
                Some(name) => name.to_string(),
                None => return Err(TypeError::new(Rejection::AnonymousStruct, Some(ty))),
            };

            // Fast checks before walking any field.
            if def.has_flexible_array {
                return Err(TypeError::new(Rejection::FlexibleArrayMember, top));
            }
            if record_has_object_field(table, ty) {
                return Err(TypeError::new(Rejection::ObjectMember, top));
            }

            // Register before recursing so self-referential structs
            // terminate.
            visited.insert(ty);

            for field in &def.fields {
                let field_ty = table.canonical(field.ty);
                exportable(table, field_ty, visited, top)?;

                // Bit fields of any width are unsupported.
                if field.bit_field {
                    return Err(TypeError::new(
                        Rejection::BitField {
                            record: record_name.clone(),
                            field: field.name.clone(),
                        },
                        top,
                    ));
                }
            }

            Ok(ty)
        }
        SourceTypeKind::Pointer { pointee } => {
            let pointee = table.canonical(*pointee);

            // A pointee that is already being checked is a back-edge of a
            // self-referential struct; the enclosing walk validates it.
            if visited.contains(&pointee) {
                return Ok(ty);
            }
            if top.is_some() {
                return Err(TypeError::new(Rejection::PointerInStruct, top));
            }
            // Double or higher indirection is accepted here and degraded to a
            // plain integer pointee at construction time.
            if table.is_pointer(pointee) {
                return Ok(ty);
            }
            if table.is_array(pointee) {
                return Err(TypeError::new(Rejection::PointerToArray, top));
            }

            exportable(table, pointee, visited, top)?;
            Ok(ty)
        }
        SourceTypeKind::Vector { element, lanes } => {
            if !(2..=4).contains(lanes) {
                return Err(TypeError::new(Rejection::VectorLanes, top));
            }
            let element = table.canonical(*element);
            if !table.is_builtin(element) {
                return Err(TypeError::new(Rejection::VectorBase, top));
            }
            exportable(table, element, visited, top)?;
            Ok(ty)
        }
        SourceTypeKind::ConstantArray { element, size } => {
            let element = table.canonical(*element);
            if table.is_array(element) {
                return Err(TypeError::new(Rejection::MultiDimensionalArray, top));
            }
            if let SourceTypeKind::Vector {
                element: base,
                lanes,
            } = table.kind(element)
            {
                if !table.is_builtin(table.canonical(*base)) {
                    return Err(TypeError::new(Rejection::VectorBase, top));
                }
                // Width-3 vectors are padded to 4 lanes in storage; an array
                // of them only lays out correctly with a single element.
                if *lanes == 3 && *size != 1 {
                    return Err(TypeError::new(Rejection::Vector3Array, top));
                }
            }
            exportable(table, element, visited, top)?;
            Ok(ty)
        }
        SourceTypeKind::Alias { .. } => unreachable!("aliases are resolved by canonical()"),
        SourceTypeKind::Other(kind_name) => Err(TypeError::new(
            Rejection::UnknownKind(kind_name.clone()),
            top,
        )),
    }
}

/// Whether a struct (possibly reached through nested structs or arrays)
/// contains a field of runtime-object kind anywhere.
///
/// Used as a fast pre-check: such structs are rejected outright. This scan is
/// separate from the zero-init query, which also reacts to matrix fields.
pub(crate) fn record_has_object_field(table: &TypeTable, ty: TypeRef) -> bool {
    let Some(def) = table.record_def(ty) else {
        return false;
    };
    if def.is_union() || !def.is_definition {
        return false;
    }

    for field in &def.fields {
        let mut field_ty = table.canonical(field.ty);
        while let SourceTypeKind::ConstantArray { element, .. } = table.kind(field_ty) {
            field_ty = table.canonical(*element);
        }

        if let Some(field_def) = table.record_def(field_ty) {
            let data_type = field_def
                .resolved_name()
                .and_then(DataType::from_record_name);
            match data_type {
                Some(dt) if dt.is_object() => return true,
                Some(_) => {}
                None => {
                    if record_has_object_field(table, field_ty) {
                        return true;
                    }
                }
            }
        }
    }

    false
}

/// Check a type for exportability, reporting a diagnostic through the sink on
/// rejection. Returns the canonical type on success.
pub fn type_exportable(
    table: &TypeTable,
    ty: TypeRef,
    diags: Option<&mut Diagnostics>,
    decl: Option<&DeclRef>,
) -> Option<TypeRef> {
    let mut visited = FxHashSet::default();
    match exportable(table, ty, &mut visited, None) {
        Ok(ty) => Some(ty),
        Err(err) => {
            if let Some(diags) = diags {
                report_type_error(diags, table, &err, decl);
            }
            None
        }
    }
}

/// Check a type for exportability and resolve its canonical export name.
pub fn normalize_type(
    table: &TypeTable,
    ty: TypeRef,
    mut diags: Option<&mut Diagnostics>,
    decl: Option<&DeclRef>,
) -> Option<(TypeRef, String)> {
    let ty = type_exportable(table, ty, diags.as_deref_mut(), decl)?;

    match name::type_name(table, ty) {
        Some(name) if !name.is_empty() => Some((ty, name)),
        _ => {
            if let Some(diags) = diags {
                let reason = Rejection::AnonymousType;
                let mut builder = DiagnosticBuilder::error(reason.to_string()).code(reason.code());
                if let Some(decl) = decl {
                    builder = builder.subject(decl.name.clone()).maybe_span(decl.span.clone());
                }
                diags.push(builder.build());
            }
            None
        }
    }
}

/// Emit the diagnostic for a rejection.
///
/// Attribution prefers the record recorded on the error, then the variable
/// declaration. A rejection with neither is a caller bug: declarations must
/// be validated before they reach the export layer.
pub fn report_type_error(
    diags: &mut Diagnostics,
    table: &TypeTable,
    err: &TypeError,
    decl: Option<&DeclRef>,
) {
    let (subject, span) = if let Some(record) = err.record {
        let def = table
            .record_def(record)
            .expect("attributed type must be a record");
        (
            def.resolved_name().unwrap_or_default().to_string(),
            def.span.clone(),
        )
    } else if let Some(decl) = decl {
        (decl.name.clone(), decl.span.clone())
    } else {
        panic!("variables should be validated before exporting");
    };

    diags.push(
        DiagnosticBuilder::error(err.reason.format_message(&subject))
            .code(err.reason.code())
            .subject(subject)
            .maybe_span(span)
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{BuiltinKind, FieldDef, RecordDef};

    fn check(table: &TypeTable, ty: TypeRef) -> Result<TypeRef, TypeError> {
        let mut visited = FxHashSet::default();
        exportable(table, ty, &mut visited, None)
    }

    #[test]
    fn test_supported_builtins() {
        let mut table = TypeTable::new();
        for kind in [
            BuiltinKind::Bool,
            BuiltinKind::Char,
            BuiltinKind::Int,
            BuiltinKind::ULong,
            BuiltinKind::Float,
            BuiltinKind::Double,
        ] {
            let ty = table.builtin(kind);
            assert!(check(&table, ty).is_ok(), "{kind:?} should be exportable");
        }
    }

    #[test]
    fn test_unsupported_builtins() {
        let mut table = TypeTable::new();
        for kind in [BuiltinKind::Void, BuiltinKind::WChar16, BuiltinKind::WChar32] {
            let ty = table.builtin(kind);
            let err = check(&table, ty).unwrap_err();
            assert_eq!(err.reason, Rejection::UnsupportedBuiltin);
        }
    }

    #[test]
    fn test_union_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let u = table.record(RecordDef::new_union("U", vec![FieldDef::new("a", int)]));

        let err = check(&table, u).unwrap_err();
        assert_eq!(err.reason, Rejection::Union);
        assert_eq!(err.record, Some(u));
    }

    #[test]
    fn test_anonymous_struct_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let s = table.record(RecordDef::new_struct("", vec![FieldDef::new("a", int)]));

        let err = check(&table, s).unwrap_err();
        assert_eq!(err.reason, Rejection::AnonymousStruct);
    }

    #[test]
    fn test_typedef_named_struct_accepted() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let mut def = RecordDef::new_struct("", vec![FieldDef::new("a", int)]);
        def.typedef_name = Some("Aliased".to_string());
        let s = table.record(def);

        assert!(check(&table, s).is_ok());
    }

    #[test]
    fn test_undefined_struct_rejected() {
        let mut table = TypeTable::new();
        let mut def = RecordDef::new_struct("Fwd", vec![]);
        def.is_definition = false;
        let s = table.record(def);

        let err = check(&table, s).unwrap_err();
        assert_eq!(err.reason, Rejection::UndefinedStruct);
    }

    #[test]
    fn test_bit_field_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let s = table.record(RecordDef::new_struct(
            "Flags",
            vec![FieldDef::new("a", int), FieldDef::bit_field("b", int)],
        ));

        let err = check(&table, s).unwrap_err();
        assert_eq!(
            err.reason,
            Rejection::BitField {
                record: "Flags".to_string(),
                field: "b".to_string(),
            }
        );
    }

    #[test]
    fn test_flexible_array_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let mut def = RecordDef::new_struct("Flex", vec![FieldDef::new("n", int)]);
        def.has_flexible_array = true;
        let s = table.record(def);

        let err = check(&table, s).unwrap_err();
        assert_eq!(err.reason, Rejection::FlexibleArrayMember);
    }

    #[test]
    fn test_object_member_rejected() {
        let mut table = TypeTable::new();
        let alloc = table.record(RecordDef::new_struct("sk_allocation", vec![]));
        let inner = table.record(RecordDef::new_struct(
            "Inner",
            vec![FieldDef::new("a", alloc)],
        ));
        let inner_arr = table.array_of(inner, 4);
        let outer = table.record(RecordDef::new_struct(
            "Outer",
            vec![FieldDef::new("nested", inner_arr)],
        ));

        // The object handle type itself is exportable...
        assert!(check(&table, alloc).is_ok());
        // ...but a struct holding one anywhere nested is not.
        let err = check(&table, outer).unwrap_err();
        assert_eq!(err.reason, Rejection::ObjectMember);
        assert_eq!(err.record, Some(outer));
    }

    #[test]
    fn test_pointer_in_struct_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let int_ptr = table.pointer_to(int);
        let s = table.record(RecordDef::new_struct("Holder", vec![FieldDef::new("p", int_ptr)]));

        let err = check(&table, s).unwrap_err();
        assert_eq!(err.reason, Rejection::PointerInStruct);
        assert_eq!(err.record, Some(s));
    }

    #[test]
    fn test_self_referential_struct_accepted() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let node = table.record(RecordDef::new_struct("Node", vec![]));
        let node_ptr = table.pointer_to(node);
        table.record_mut(node).unwrap().fields = vec![
            FieldDef::new("value", int),
            FieldDef::new("next", node_ptr),
        ];

        assert!(check(&table, node).is_ok());
    }

    #[test]
    fn test_self_reference_through_struct_chain() {
        // struct Outer { struct Inner inner; }; struct Inner { Outer *up; }
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let outer = table.record(RecordDef::new_struct("Outer", vec![]));
        let outer_ptr = table.pointer_to(outer);
        let inner = table.record(RecordDef::new_struct(
            "Inner",
            vec![FieldDef::new("value", int), FieldDef::new("up", outer_ptr)],
        ));
        table.record_mut(outer).unwrap().fields = vec![FieldDef::new("inner", inner)];

        assert!(check(&table, outer).is_ok());
    }

    #[test]
    fn test_pointer_to_unrelated_struct_in_struct_rejected() {
        // Only back-edges to records already being checked are allowed; a
        // pointer to an unrelated struct is still a pointer in a struct.
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let other = table.record(RecordDef::new_struct("Other", vec![FieldDef::new("v", int)]));
        let other_ptr = table.pointer_to(other);
        let holder = table.record(RecordDef::new_struct(
            "Holder",
            vec![FieldDef::new("o", other_ptr)],
        ));

        let err = check(&table, holder).unwrap_err();
        assert_eq!(err.reason, Rejection::PointerInStruct);
    }

    #[test]
    fn test_pointer_to_pointer_accepted() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let p = table.pointer_to(int);
        let pp = table.pointer_to(p);

        assert!(check(&table, pp).is_ok());
    }

    #[test]
    fn test_pointer_to_array_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let arr = table.array_of(int, 4);
        let p = table.pointer_to(arr);

        let err = check(&table, p).unwrap_err();
        assert_eq!(err.reason, Rejection::PointerToArray);
    }

    #[test]
    fn test_vector_lane_bounds() {
        let mut table = TypeTable::new();
        let float = table.builtin(BuiltinKind::Float);

        for lanes in 2..=4 {
            let v = table.vector_of(float, lanes);
            assert!(check(&table, v).is_ok());
        }
        for lanes in [1, 5, 8] {
            let v = table.vector_of(float, lanes);
            let err = check(&table, v).unwrap_err();
            assert_eq!(err.reason, Rejection::VectorLanes);
        }
    }

    #[test]
    fn test_multidimensional_array_rejected() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let inner = table.array_of(int, 3);
        let outer = table.array_of(inner, 2);

        let err = check(&table, outer).unwrap_err();
        assert_eq!(err.reason, Rejection::MultiDimensionalArray);
    }

    #[test]
    fn test_vec3_array_length_rule() {
        let mut table = TypeTable::new();
        let float = table.builtin(BuiltinKind::Float);
        let float3 = table.vector_of(float, 3);
        let float4 = table.vector_of(float, 4);

        let ok = table.array_of(float3, 1);
        assert!(check(&table, ok).is_ok());

        let bad = table.array_of(float3, 2);
        let err = check(&table, bad).unwrap_err();
        assert_eq!(err.reason, Rejection::Vector3Array);

        // Width-4 vectors have no such restriction.
        let ok4 = table.array_of(float4, 8);
        assert!(check(&table, ok4).is_ok());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut table = TypeTable::new();
        let f = table.other("FunctionProto");

        let err = check(&table, f).unwrap_err();
        assert_eq!(err.reason, Rejection::UnknownKind("FunctionProto".to_string()));
    }

    #[test]
    fn test_matrix_record_short_circuits() {
        let mut table = TypeTable::new();
        // Recognized by name alone; field inspection is skipped here (the
        // matrix builder validates shape at construction time).
        let m = table.record(RecordDef::new_struct("sk_matrix4x4", vec![]));
        assert!(check(&table, m).is_ok());
    }

    #[test]
    fn test_diagnostic_attribution() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let int_ptr = table.pointer_to(int);
        let inner = table.record(RecordDef::new_struct(
            "Inner",
            vec![FieldDef::new("p", int_ptr)],
        ));
        let outer = table.record(RecordDef::new_struct(
            "Outer",
            vec![FieldDef::new("inner", inner)],
        ));

        let mut diags = Diagnostics::new();
        let decl = DeclRef::new("v", outer);
        assert!(type_exportable(&table, outer, Some(&mut diags), Some(&decl)).is_none());

        assert!(diags.has_errors());
        let diagnostic = diags.errors().next().unwrap();
        // Attributed to the outermost struct, not the nested one.
        assert_eq!(diagnostic.subject.as_deref(), Some("Outer"));
        assert!(diagnostic
            .message
            .contains("structures containing pointers cannot be exported"));
        assert_eq!(diagnostic.code.as_deref(), Some("E0808"));
    }

    #[test]
    fn test_decl_attribution_without_record() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let inner = table.array_of(int, 3);
        let outer = table.array_of(inner, 2);

        let mut diags = Diagnostics::new();
        let decl = DeclRef::new("grid", outer);
        assert!(type_exportable(&table, outer, Some(&mut diags), Some(&decl)).is_none());

        let diagnostic = diags.errors().next().unwrap();
        assert_eq!(diagnostic.subject.as_deref(), Some("grid"));
    }

    #[test]
    #[should_panic(expected = "validated before exporting")]
    fn test_missing_attribution_is_invariant_violation() {
        let mut table = TypeTable::new();
        let int = table.builtin(BuiltinKind::Int);
        let inner = table.array_of(int, 3);
        let outer = table.array_of(inner, 2);

        let mut diags = Diagnostics::new();
        type_exportable(&table, outer, Some(&mut diags), None);
    }

    #[test]
    fn test_no_sink_still_fails() {
        let mut table = TypeTable::new();
        let u = table.record(RecordDef::new_union("U", vec![]));
        assert!(type_exportable(&table, u, None, None).is_none());
    }
}
