//! Silica type-export layer
//!
//! Given the type information produced by the host front-end's semantic
//! analysis, this crate decides which source types are legal to expose
//! across the compiler/runtime boundary, builds a canonical deduplicated
//! model of those types, and renders that model in two downstream forms: a
//! target-machine type for code generation, and a compact binary type record
//! for the runtime reflection layer.
//!
//! # Pipeline
//!
//! ```text
//! front-end decl -> exportability check -> name resolution
//!                -> registry lookup-or-create -> export type node
//!                -> (on demand) machine type / spec record
//! ```
//!
//! The front-end drives the pipeline through
//! [`ExportContext::create_from_decl`], one call per exported declaration;
//! everything downstream (codegen, the spec emitter) works with
//! [`ExportTypeId`]s resolved against the same context. A `keep` pass over
//! the retained declarations then prunes emission to the types actually
//! referenced.
//!
//! One [`ExportContext`] per compilation unit; contexts are single-threaded
//! and share nothing.

pub mod check;
pub mod context;
pub mod dtype;
pub mod logging;
pub mod machine;
pub mod name;
pub mod record;
pub mod source;
pub mod spec;
pub mod types;

pub use check::{normalize_type, report_type_error, type_exportable, Rejection, TypeError};
pub use context::{ExportContext, TargetConfig};
pub use dtype::{DataKind, DataType};
pub use machine::{MachineField, MachineType};
pub use name::{is_placeholder_name, type_name, CONSTANT_ARRAY_PLACEHOLDER};
pub use source::{
    BuiltinKind, DeclRef, FieldDef, RecordDef, RecordLayout, RecordTag, SourceTypeKind, TypeRef,
    TypeTable,
};
pub use spec::{decode_spec, encode_spec, record_needs_zero_init, SpecField, SpecType};
pub use types::{ExportField, ExportKind, ExportType, ExportTypeId, TypeClass};
