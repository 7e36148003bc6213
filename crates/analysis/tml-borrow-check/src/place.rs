//! Place model: storage locations as a root binding plus a projection chain.
//!
//! A [`Place`] is purely structural. The root is a [`PlaceId`] handed out by
//! the [`crate::BorrowEnv`] when a binding is introduced, so two shadowing
//! `let x` bindings produce different roots even though they share a name.
//! Sub-places are identified by their projection chain relative to the root.

use std::fmt;

use serde::Serialize;
use tml_ast::{Body, Expr, ExprId, Ty};
use tml_intern::{Interner, Symbol};
use tml_types::TypeEnv;

use crate::env::BorrowEnv;

/// Stable identity of a root binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlaceId(pub u32);

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

/// One step in a projection chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Projection {
    /// `.field`
    Field(Symbol),
    /// `[i]`; indices are never distinguished
    Index,
    /// `*`
    Deref,
}

/// A root binding plus projections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Place {
    /// Root binding
    pub root: PlaceId,
    /// Projections applied to the root, outermost last
    pub projections: Vec<Projection>,
}

impl Place {
    /// The whole binding `root`.
    #[must_use]
    pub fn from_root(root: PlaceId) -> Self {
        Self {
            root,
            projections: Vec::new(),
        }
    }

    /// This place with one more projection.
    #[must_use]
    pub fn project(&self, projection: Projection) -> Self {
        let mut projections = self.projections.clone();
        projections.push(projection);
        Self {
            root: self.root,
            projections,
        }
    }

    /// Returns `true` for a bare binding with no projections.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.projections.is_empty()
    }

    /// Returns `true` if any projection dereferences a reference.
    #[must_use]
    pub fn has_deref(&self) -> bool {
        self.projections.contains(&Projection::Deref)
    }

    /// Returns `true` if the place goes through a deref or an index.
    ///
    /// Such places do not own what they name, so consuming them copies out
    /// of the referent instead of moving.
    #[must_use]
    pub fn is_indirect(&self) -> bool {
        self.projections
            .iter()
            .any(|proj| matches!(proj, Projection::Deref | Projection::Index))
    }

    /// Returns `true` if `self` names `other` or an ancestor of it.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.root == other.root && other.projections.starts_with(&self.projections)
    }

    /// Returns `true` if the two places may name overlapping memory.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        places_overlap(self, other)
    }

    /// Renders the place the way it would be written in source.
    #[must_use]
    pub fn describe(&self, env: &BorrowEnv, interner: &Interner) -> String {
        let mut text = env.name_of(self.root, interner);
        for (idx, projection) in self.projections.iter().enumerate() {
            match projection {
                Projection::Field(field) => {
                    text.push('.');
                    text.push_str(&interner.resolve(field));
                }
                Projection::Index => text.push_str("[..]"),
                Projection::Deref if idx + 1 < self.projections.len() => {
                    text = format!("(*{text})");
                }
                Projection::Deref => text = format!("*{text}"),
            }
        }
        text
    }
}

/// Checks if two places overlap in memory.
///
/// Places overlap if they share a root and one projection chain is a prefix
/// of the other, where distinct fields never alias and any two indices might.
///
/// ```rust
/// use tml_borrow_check::{Place, PlaceId, Projection, places_overlap};
/// use tml_intern::Interner;
///
/// let interner = Interner::new();
/// let s = Place::from_root(PlaceId(0));
/// let s_a = s.project(Projection::Field(interner.intern("a")));
/// let s_b = s.project(Projection::Field(interner.intern("b")));
///
/// assert!(places_overlap(&s, &s_a));
/// assert!(!places_overlap(&s_a, &s_b));
/// ```
#[must_use]
pub fn places_overlap(place1: &Place, place2: &Place) -> bool {
    if place1.root != place2.root {
        return false;
    }

    place1
        .projections
        .iter()
        .zip(&place2.projections)
        .all(|pair| match pair {
            (Projection::Field(f1), Projection::Field(f2)) => f1 == f2,
            (Projection::Index, Projection::Index) | (Projection::Deref, Projection::Deref) => true,
            _ => false,
        })
}

/// Returns `true` if `a` is `b` or an ancestor of `b`.
#[must_use]
pub fn is_prefix_of(a: &Place, b: &Place) -> bool {
    a.is_prefix_of(b)
}

/// Returns `true` if `a` and `b` can never name the same memory.
#[must_use]
pub fn disjoint(a: &Place, b: &Place) -> bool {
    !places_overlap(a, b)
}

/// A place expression resolved against the current scopes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    /// The place
    pub place: Place,
    /// Type of the place
    pub ty: Ty,
    /// Mutability of the innermost reference dereferenced on the way, if any
    pub through_ref: Option<bool>,
    /// Index operands the caller still has to evaluate, in source order
    pub index_operands: Vec<ExprId>,
}

impl ResolvedPlace {
    /// The whole binding `root`, with its declared type.
    #[must_use]
    pub fn of_root(env: &BorrowEnv, root: PlaceId) -> Self {
        Self {
            place: Place::from_root(root),
            ty: env.ty_of(root),
            through_ref: None,
            index_operands: Vec::new(),
        }
    }

    /// Whether a write or `mut ref` through this place is permitted.
    #[must_use]
    pub fn is_mutable(&self, env: &BorrowEnv) -> bool {
        match self.through_ref {
            Some(mutable) => mutable,
            None => env.is_mutable(self.place.root),
        }
    }

    fn project(mut self, projection: Projection, ty: Ty) -> Self {
        self.place.projections.push(projection);
        self.ty = ty;
        self
    }

    /// This place dereferenced once. Dereferencing a non-reference type
    /// yields [`Ty::Unknown`].
    #[must_use]
    pub fn deref(self) -> Self {
        let (mutable, target) = match &self.ty {
            Ty::Ref { mutable, inner } => (*mutable, (**inner).clone()),
            _ => (true, Ty::Unknown),
        };
        let mut resolved = self.project(Projection::Deref, target);
        resolved.through_ref = Some(mutable);
        resolved
    }
}

/// Resolves an identifier, field, index or deref expression to a place.
///
/// Field access through a reference inserts the implicit deref. Returns
/// `None` when the expression is not a place, or when its root identifier
/// does not name a binding in scope (a function or global).
#[must_use]
pub fn resolve_place(
    body: &Body,
    expr: ExprId,
    env: &BorrowEnv,
    types: &dyn TypeEnv,
) -> Option<ResolvedPlace> {
    match &body.exprs[expr] {
        Expr::Ident { name, .. } => {
            let root = env.lookup(*name)?;
            Some(ResolvedPlace {
                place: Place::from_root(root),
                ty: env.ty_of(root),
                through_ref: None,
                index_operands: Vec::new(),
            })
        }
        Expr::Field { base, field, .. } => {
            let mut base = resolve_place(body, *base, env, types)?;
            if base.ty.is_ref() {
                base = base.deref();
            }
            let field_ty = types.field_type(&base.ty, *field).unwrap_or(Ty::Unknown);
            Some(base.project(Projection::Field(*field), field_ty))
        }
        Expr::Index { base, index, .. } => {
            let mut base = resolve_place(body, *base, env, types)?;
            if base.ty.is_ref() {
                base = base.deref();
            }
            let elem_ty = base.ty.index_target().cloned().unwrap_or(Ty::Unknown);
            base.index_operands.push(*index);
            Some(base.project(Projection::Index, elem_ty))
        }
        Expr::Deref { operand, .. } => Some(resolve_place(body, *operand, env, types)?.deref()),
        _ => None,
    }
}

/// Returns `true` if values of `ty` may carry loans.
#[must_use]
pub fn may_hold_ref(ty: &Ty) -> bool {
    matches!(ty, Ty::Unknown) || ty.contains_ref()
}
