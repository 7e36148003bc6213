//! Read-only type environment queried by the borrow checkers.
//!
//! Type inference populates a [`TypeTableBuilder`]; [`TypeTableBuilder::build`]
//! freezes it into a [`TypeTable`] that is never mutated again. Checkers only
//! see the table through the [`TypeEnv`] trait, which is `Send + Sync` so a
//! single frozen table can serve every worker thread of a parallel check.
//!
//! # Classification
//!
//! - Copy: primitives other than `Str`, references, function pointers,
//!   tuples and arrays of Copy elements, and named types implementing `Copy`.
//!   Unresolved types count as Copy so they never produce move errors.
//! - Needs drop: the owning builtins (`Str`, `List`, `Vec`, ...), types
//!   implementing `Drop`, and aggregates with a field that needs drop.

mod builtins;
mod table;

pub use builtins::is_owning_builtin;
pub use table::{FieldLayout, TypeDef, TypeTable, TypeTableBuilder};

use tml_ast::Ty;
use tml_intern::Symbol;

/// Behavior whose implementers are plain bit copies.
pub const COPY_BEHAVIOR: &str = "Copy";
/// Behavior whose implementers run a destructor.
pub const DROP_BEHAVIOR: &str = "Drop";

/// Queries the checkers make against resolved types.
pub trait TypeEnv: Send + Sync {
    /// Values of this type are duplicated on use instead of moved.
    fn is_copy_type(&self, ty: &Ty) -> bool;

    /// Dropping a value of this type runs a destructor.
    fn type_needs_drop(&self, ty: &Ty) -> bool;

    /// Declared type of `field` on a struct type.
    fn field_type(&self, ty: &Ty, field: Symbol) -> Option<Ty>;

    /// Field layout of a struct type in declaration order.
    fn struct_fields(&self, ty: &Ty) -> Option<&[FieldLayout]>;

    /// The named type implements `behavior`.
    fn implements_behavior(&self, ty: &Ty, behavior: &str) -> bool;
}
