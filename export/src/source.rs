//! Read-only view of the host front-end's type graph
//!
//! The semantic analyzer of the host front-end owns the real type graph; the
//! export layer only ever reads it. This module is the shape of that view:
//! types live in a [`TypeTable`] and reference each other through [`TypeRef`]
//! indices, which keeps self-referential records representable without any
//! ownership cycles.
//!
//! The table also carries the struct-layout oracle ([`RecordLayout`]): byte
//! size and per-field byte offsets as computed by the host type system. The
//! export layer never computes layout itself.

use fxhash::FxHashMap;
use source_map::SourceSpan;

/// Index of a type in a [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Builtin scalar kinds of the host language.
///
/// The export layer supports a subset of these; `Void` and the
/// locale-dependent wide character kinds are never exportable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    UChar,
    UShort,
    UInt,
    ULong,
    Float,
    Double,
    WChar16,
    WChar32,
}

impl BuiltinKind {
    /// Host-language spelling, used in diagnostics.
    pub fn spelling(self) -> &'static str {
        match self {
            BuiltinKind::Void => "void",
            BuiltinKind::Bool => "bool",
            BuiltinKind::Char => "char",
            BuiltinKind::Short => "short",
            BuiltinKind::Int => "int",
            BuiltinKind::Long => "long",
            BuiltinKind::UChar => "uchar",
            BuiltinKind::UShort => "ushort",
            BuiltinKind::UInt => "uint",
            BuiltinKind::ULong => "ulong",
            BuiltinKind::Float => "float",
            BuiltinKind::Double => "double",
            BuiltinKind::WChar16 => "wchar16",
            BuiltinKind::WChar32 => "wchar32",
        }
    }
}

/// Whether a record was declared `struct` or `union`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Struct,
    Union,
}

/// One field of a record, in declaration order.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub bit_field: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            bit_field: false,
        }
    }

    pub fn bit_field(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            bit_field: true,
        }
    }
}

/// Struct layout as computed by the host type system.
///
/// `field_offsets` is parallel to the record's field list; all values are in
/// bytes.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub size: u64,
    pub field_offsets: Vec<u64>,
}

/// A record (struct or union) declaration as seen by the host front-end.
#[derive(Debug, Clone)]
pub struct RecordDef {
    /// Declared tag name; empty for anonymous records.
    pub name: String,
    /// Name introduced by `typedef struct { ... } Name;`, if any.
    pub typedef_name: Option<String>,
    /// Names available through redeclarations of the same tag.
    pub redecl_names: Vec<String>,
    pub tag: RecordTag,
    /// False when only a forward declaration is visible in this unit.
    pub is_definition: bool,
    pub has_flexible_array: bool,
    pub packed: bool,
    pub fields: Vec<FieldDef>,
    /// Layout oracle; present for every defined record the host analyzed.
    pub layout: Option<RecordLayout>,
    pub span: Option<SourceSpan>,
}

impl RecordDef {
    /// A defined, named struct with no layout; callers attach one via
    /// [`RecordDef::with_layout`] when the host has computed it.
    pub fn new_struct(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            typedef_name: None,
            redecl_names: vec![],
            tag: RecordTag::Struct,
            is_definition: true,
            has_flexible_array: false,
            packed: false,
            fields,
            layout: None,
            span: None,
        }
    }

    pub fn new_union(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            tag: RecordTag::Union,
            ..Self::new_struct(name, fields)
        }
    }

    pub fn with_layout(mut self, layout: RecordLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn is_union(&self) -> bool {
        self.tag == RecordTag::Union
    }

    /// Export-facing name of the record.
    ///
    /// Falls back from the declared tag name to a typedef-introduced alias,
    /// then to any redeclaration's name. `None` means the record is anonymous
    /// for export purposes.
    pub fn resolved_name(&self) -> Option<&str> {
        if !self.name.is_empty() {
            return Some(&self.name);
        }
        if let Some(alias) = self.typedef_name.as_deref() {
            if !alias.is_empty() {
                return Some(alias);
            }
        }
        self.redecl_names
            .iter()
            .map(String::as_str)
            .find(|n| !n.is_empty())
    }
}

/// The kind of a source type.
#[derive(Debug, Clone)]
pub enum SourceTypeKind {
    Builtin(BuiltinKind),
    Record(RecordDef),
    Pointer { pointee: TypeRef },
    Vector { element: TypeRef, lanes: u32 },
    ConstantArray { element: TypeRef, size: u32 },
    /// Typedef sugar; resolved away by [`TypeTable::canonical`].
    Alias { target: TypeRef },
    /// Anything the export layer has no model for (functions, atomics, ...).
    /// Carries the host's name for the type class, used in diagnostics.
    Other(String),
}

impl SourceTypeKind {
    /// Name of the type class, for diagnostics.
    pub fn class_name(&self) -> &str {
        match self {
            SourceTypeKind::Builtin(kind) => kind.spelling(),
            SourceTypeKind::Record(def) => {
                if def.is_union() {
                    "union"
                } else {
                    "struct"
                }
            }
            SourceTypeKind::Pointer { .. } => "pointer",
            SourceTypeKind::Vector { .. } => "vector",
            SourceTypeKind::ConstantArray { .. } => "constant array",
            SourceTypeKind::Alias { .. } => "alias",
            SourceTypeKind::Other(name) => name,
        }
    }
}

/// A variable declaration, used to attribute diagnostics when the offending
/// type has no named record of its own.
#[derive(Debug, Clone)]
pub struct DeclRef {
    pub name: String,
    pub ty: TypeRef,
    pub span: Option<SourceSpan>,
}

impl DeclRef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            span: None,
        }
    }
}

/// The host front-end's type graph, as handed to the export layer.
#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<SourceTypeKind>,
    builtins: FxHashMap<BuiltinKind, TypeRef>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: SourceTypeKind) -> TypeRef {
        let r = TypeRef(self.types.len() as u32);
        self.types.push(kind);
        r
    }

    pub fn kind(&self, ty: TypeRef) -> &SourceTypeKind {
        &self.types[ty.0 as usize]
    }

    /// Resolve typedef sugar down to the underlying type.
    pub fn canonical(&self, mut ty: TypeRef) -> TypeRef {
        while let SourceTypeKind::Alias { target } = self.kind(ty) {
            ty = *target;
        }
        ty
    }

    /// Interned builtin type.
    pub fn builtin(&mut self, kind: BuiltinKind) -> TypeRef {
        if let Some(&r) = self.builtins.get(&kind) {
            return r;
        }
        let r = self.push(SourceTypeKind::Builtin(kind));
        self.builtins.insert(kind, r);
        r
    }

    pub fn pointer_to(&mut self, pointee: TypeRef) -> TypeRef {
        self.push(SourceTypeKind::Pointer { pointee })
    }

    pub fn vector_of(&mut self, element: TypeRef, lanes: u32) -> TypeRef {
        self.push(SourceTypeKind::Vector { element, lanes })
    }

    pub fn array_of(&mut self, element: TypeRef, size: u32) -> TypeRef {
        self.push(SourceTypeKind::ConstantArray { element, size })
    }

    pub fn alias(&mut self, target: TypeRef) -> TypeRef {
        self.push(SourceTypeKind::Alias { target })
    }

    pub fn record(&mut self, def: RecordDef) -> TypeRef {
        self.push(SourceTypeKind::Record(def))
    }

    pub fn other(&mut self, kind_name: impl Into<String>) -> TypeRef {
        self.push(SourceTypeKind::Other(kind_name.into()))
    }

    /// Mutable access to a record, for the front-end building the table.
    /// Needed to close the loop on self-referential records (allocate the
    /// record first, then patch fields that point back at it).
    pub fn record_mut(&mut self, ty: TypeRef) -> Option<&mut RecordDef> {
        let ty = self.canonical(ty);
        match &mut self.types[ty.0 as usize] {
            SourceTypeKind::Record(def) => Some(def),
            _ => None,
        }
    }

    pub fn record_def(&self, ty: TypeRef) -> Option<&RecordDef> {
        match self.kind(self.canonical(ty)) {
            SourceTypeKind::Record(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_record(&self, ty: TypeRef) -> bool {
        matches!(self.kind(self.canonical(ty)), SourceTypeKind::Record(_))
    }

    pub fn is_pointer(&self, ty: TypeRef) -> bool {
        matches!(self.kind(self.canonical(ty)), SourceTypeKind::Pointer { .. })
    }

    pub fn is_array(&self, ty: TypeRef) -> bool {
        matches!(
            self.kind(self.canonical(ty)),
            SourceTypeKind::ConstantArray { .. }
        )
    }

    pub fn is_builtin(&self, ty: TypeRef) -> bool {
        matches!(self.kind(self.canonical(ty)), SourceTypeKind::Builtin(_))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
