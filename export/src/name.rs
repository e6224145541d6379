//! Canonical export names
//!
//! Every export type is identified within a registry by a canonical string
//! name derived from its source descriptor. Pointer names are built from
//! their pointee's name; vector names from their base scalar's name plus the
//! lane count.
//!
//! Constant arrays are the exception: constructing a real name for them is
//! not worth it, so they all share a reserved placeholder. Names starting
//! with the placeholder prefix are never inserted into the registry: two
//! unrelated arrays must never be deduplicated into one instance.

use crate::check;
use crate::dtype::DataType;
use crate::source::{SourceTypeKind, TypeRef, TypeTable};

/// Reserved name shared by every constant-array export type.
pub const CONSTANT_ARRAY_PLACEHOLDER: &str = "<ConstantArray>";

const PLACEHOLDER_PREFIX: char = '<';

/// Whether a canonical name is a reserved placeholder and therefore must not
/// be cached in the registry.
pub fn is_placeholder_name(name: &str) -> bool {
    name.starts_with(PLACEHOLDER_PREFIX)
}

/// Canonical export name of a type.
///
/// Expects a type that passed the exportability check; returns `None` when no
/// name can be derived (anonymous records, unsupported builtins, a pointee
/// that fails to normalize).
pub fn type_name(table: &TypeTable, ty: TypeRef) -> Option<String> {
    let ty = table.canonical(ty);

    match table.kind(ty) {
        SourceTypeKind::Builtin(kind) => {
            DataType::from_builtin(*kind).map(|dt| dt.export_name().to_string())
        }
        SourceTypeKind::Record(def) => def.resolved_name().map(str::to_string),
        SourceTypeKind::Pointer { pointee } => {
            // "*" plus the pointee's name; normalizing the pointee may itself
            // fail, which propagates.
            let (_, pointee_name) = check::normalize_type(table, *pointee, None, None)?;
            Some(format!("*{pointee_name}"))
        }
        SourceTypeKind::Vector { element, lanes } => vector_type_name(table, *element, *lanes),
        SourceTypeKind::ConstantArray { .. } => Some(CONSTANT_ARRAY_PLACEHOLDER.to_string()),
        SourceTypeKind::Alias { .. } => unreachable!("aliases are resolved by canonical()"),
        SourceTypeKind::Other(_) => None,
    }
}

/// Name of a vector type: base scalar name suffixed with the lane count
/// ("float4", "int2", ...).
pub fn vector_type_name(table: &TypeTable, element: TypeRef, lanes: u32) -> Option<String> {
    if !(2..=4).contains(&lanes) {
        return None;
    }

    let element = table.canonical(element);
    let SourceTypeKind::Builtin(kind) = table.kind(element) else {
        return None;
    };
    let dt = DataType::from_builtin(*kind)?;

    Some(format!("{}{}", dt.export_name(), lanes))
}
