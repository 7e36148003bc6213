//! Resolved types attached to the AST by type inference.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use tml_intern::Symbol;

/// Builtin scalar and string types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimTy {
    /// `I8`
    I8,
    /// `I16`
    I16,
    /// `I32`
    I32,
    /// `I64`
    I64,
    /// `I128`
    I128,
    /// `U8`
    U8,
    /// `U16`
    U16,
    /// `U32`
    U32,
    /// `U64`
    U64,
    /// `U128`
    U128,
    /// `F32`
    F32,
    /// `F64`
    F64,
    /// `Bool`
    Bool,
    /// `Char`
    Char,
    /// `Unit`
    Unit,
    /// `Str`, the owned string type
    Str,
    /// `Never`
    Never,
}

fn primitive_table() -> &'static FxHashMap<&'static str, PrimTy> {
    static TABLE: OnceLock<FxHashMap<&'static str, PrimTy>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            ("I8", PrimTy::I8),
            ("I16", PrimTy::I16),
            ("I32", PrimTy::I32),
            ("I64", PrimTy::I64),
            ("I128", PrimTy::I128),
            ("U8", PrimTy::U8),
            ("U16", PrimTy::U16),
            ("U32", PrimTy::U32),
            ("U64", PrimTy::U64),
            ("U128", PrimTy::U128),
            ("F32", PrimTy::F32),
            ("F64", PrimTy::F64),
            ("Bool", PrimTy::Bool),
            ("Char", PrimTy::Char),
            ("Unit", PrimTy::Unit),
            ("Str", PrimTy::Str),
            ("Never", PrimTy::Never),
        ]
        .into_iter()
        .collect()
    })
}

impl PrimTy {
    /// Looks up a primitive by its source name (`"I32"`, `"Str"`, ...).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        primitive_table().get(name).copied()
    }

    /// Source name of the primitive.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::I128 => "I128",
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::U128 => "U128",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Bool => "Bool",
            Self::Char => "Char",
            Self::Unit => "Unit",
            Self::Str => "Str",
            Self::Never => "Never",
        }
    }

    /// Primitives other than `Str` are plain bit copies.
    #[must_use]
    pub fn is_copy(self) -> bool {
        !matches!(self, Self::Str)
    }
}

/// A fully resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// Builtin primitive
    Primitive(PrimTy),
    /// Struct, enum, alias or builtin collection, with generic arguments
    Named {
        /// Type name
        name: Symbol,
        /// Generic arguments
        args: Vec<Ty>,
    },
    /// Tuple type
    Tuple(Vec<Ty>),
    /// Fixed or dynamically sized array
    Array {
        /// Element type
        elem: Box<Ty>,
        /// Length, when known
        len: Option<u64>,
    },
    /// `ref T` or `mut ref T`
    Ref {
        /// `mut ref`
        mutable: bool,
        /// Referent type
        inner: Box<Ty>,
    },
    /// Function pointer
    Func {
        /// Parameter types
        params: Vec<Ty>,
        /// Return type
        ret: Box<Ty>,
    },
    /// Type inference left this unresolved
    Unknown,
}

impl Ty {
    /// Shorthand for a named type without generic arguments.
    #[must_use]
    pub fn named(name: Symbol) -> Self {
        Self::Named {
            name,
            args: Vec::new(),
        }
    }

    /// Shorthand for `ref inner` / `mut ref inner`.
    #[must_use]
    pub fn reference(mutable: bool, inner: Self) -> Self {
        Self::Ref {
            mutable,
            inner: Box::new(inner),
        }
    }

    /// The unit type.
    #[must_use]
    pub fn unit() -> Self {
        Self::Primitive(PrimTy::Unit)
    }

    /// Returns `true` for `ref T` and `mut ref T`.
    #[must_use]
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref { .. })
    }

    /// Returns `true` if the type is, or contains, a reference.
    #[must_use]
    pub fn contains_ref(&self) -> bool {
        match self {
            Self::Ref { .. } => true,
            Self::Named { args, .. } | Self::Tuple(args) => args.iter().any(Self::contains_ref),
            Self::Array { elem, .. } => elem.contains_ref(),
            Self::Primitive(_) | Self::Func { .. } | Self::Unknown => false,
        }
    }

    /// Referent of a reference type.
    #[must_use]
    pub fn deref_target(&self) -> Option<&Self> {
        match self {
            Self::Ref { inner, .. } => Some(inner),
            _ => None,
        }
    }

    /// Element type of an array, or the single generic argument of a collection.
    #[must_use]
    pub fn index_target(&self) -> Option<&Self> {
        match self {
            Self::Array { elem, .. } => Some(elem),
            Self::Named { args, .. } => args.first(),
            _ => None,
        }
    }
}
