//! Scoped symbol table and per-place state ledger.

use indexmap::{IndexMap, IndexSet};
use log::trace;
use rustc_hash::FxHashMap;
use tml_ast::{PatternId, Ty};
use tml_intern::{Interner, Symbol};
use tml_span::FileSpan;

use crate::{
    error::InternalError,
    place::{Place, PlaceId, Projection},
};

/// Ownership state of a root binding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaceState {
    /// Declared with `let x` and never assigned
    Uninitialized,
    /// Untouched
    #[default]
    Owned,
    /// Fully moved out
    Moved,
    /// Some fields moved out. Permanent for the binding.
    PartiallyMoved {
        /// Projection paths moved out, relative to the root
        moved_fields: IndexSet<Vec<Projection>>,
    },
}

/// State of an arbitrary place, derived from its root's [`PlaceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Usable
    Available,
    /// Never initialised
    Uninitialized,
    /// The place, or an ancestor, was moved
    Moved,
    /// A strict sub-place was moved
    PartiallyMoved,
}

/// Everything recorded about one binding.
#[derive(Debug, Clone)]
pub struct PlaceRecord {
    /// Source name; `None` for synthetic temporaries
    pub name: Option<Symbol>,
    /// Declared `mut`
    pub mutable: bool,
    /// Resolved type
    pub ty: Ty,
    /// Where the binding was introduced
    pub span: FileSpan,
    /// Binding pattern, for bindings that come from source
    pub pattern: Option<PatternId>,
    /// Ownership state
    pub state: PlaceState,
    /// Where each moved path was moved; the empty path is a whole move
    pub move_sites: IndexMap<Vec<Projection>, FileSpan>,
}

/// Snapshot of every binding's ownership state, used to merge branches.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    states: Vec<(PlaceState, IndexMap<Vec<Projection>, FileSpan>)>,
}

impl StateSnapshot {
    /// State of `id` when the snapshot was taken.
    #[must_use]
    pub fn state(&self, id: PlaceId) -> Option<&PlaceState> {
        self.states.get(id.0 as usize).map(|(state, _)| state)
    }

    /// Where `id` was moved as a whole, if it was.
    #[must_use]
    pub fn move_span(&self, id: PlaceId) -> Option<FileSpan> {
        let (_, sites) = self.states.get(id.0 as usize)?;
        sites.get(&Vec::new()).copied()
    }

    /// Number of bindings captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if no binding existed when the snapshot was taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Scoped name resolution plus the state ledger for every place.
///
/// Scopes are a stack of frames. Popping a frame removes its name bindings
/// and restores whatever they shadowed, but the records stay behind so
/// diagnostics can still describe places from closed scopes.
#[derive(Debug, Clone, Default)]
pub struct BorrowEnv {
    name_to_place: FxHashMap<Symbol, Vec<PlaceId>>,
    places: Vec<PlaceRecord>,
    scopes: Vec<Vec<PlaceId>>,
}

impl BorrowEnv {
    /// Creates an environment with no open scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Closes the innermost scope and returns the places it defined, most
    /// recent first.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnbalancedScopes`] if no scope is open.
    pub fn pop_scope(&mut self) -> Result<Vec<PlaceId>, InternalError> {
        let mut frame = self.scopes.pop().ok_or(InternalError::UnbalancedScopes)?;
        for id in &frame {
            let Some(name) = self.places.get(id.0 as usize).and_then(|record| record.name) else {
                continue;
            };
            if let Some(stack) = self.name_to_place.get_mut(&name) {
                if let Some(pos) = stack.iter().rposition(|bound| bound == id) {
                    stack.remove(pos);
                }
                if stack.is_empty() {
                    self.name_to_place.remove(&name);
                }
            }
        }
        frame.reverse();
        Ok(frame)
    }

    /// Number of open scopes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Introduces a binding in the innermost scope.
    pub fn define(
        &mut self,
        name: Symbol,
        mutable: bool,
        ty: Ty,
        span: FileSpan,
        pattern: Option<PatternId>,
    ) -> PlaceId {
        let id = self.alloc(PlaceRecord {
            name: Some(name),
            mutable,
            ty,
            span,
            pattern,
            state: PlaceState::Owned,
            move_sites: IndexMap::new(),
        });
        self.name_to_place.entry(name).or_default().push(id);
        id
    }

    fn alloc(&mut self, record: PlaceRecord) -> PlaceId {
        let id = PlaceId(self.places.len() as u32);
        self.places.push(record);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(id);
        }
        id
    }

    /// Resolves a name through the open scopes; the innermost binding wins.
    #[must_use]
    pub fn lookup(&self, name: Symbol) -> Option<PlaceId> {
        self.name_to_place.get(&name)?.last().copied()
    }

    /// The record of a place.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownPlace`] for an id never handed out.
    pub fn record(&self, id: PlaceId) -> Result<&PlaceRecord, InternalError> {
        self.places
            .get(id.0 as usize)
            .ok_or(InternalError::UnknownPlace { id: id.0 })
    }

    /// The record of a place, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownPlace`] for an id never handed out.
    pub fn record_mut(&mut self, id: PlaceId) -> Result<&mut PlaceRecord, InternalError> {
        self.places
            .get_mut(id.0 as usize)
            .ok_or(InternalError::UnknownPlace { id: id.0 })
    }

    /// Declared type of a binding, or [`Ty::Unknown`].
    #[must_use]
    pub fn ty_of(&self, id: PlaceId) -> Ty {
        self.places
            .get(id.0 as usize)
            .map_or(Ty::Unknown, |record| record.ty.clone())
    }

    /// Whether a binding was declared `mut`.
    #[must_use]
    pub fn is_mutable(&self, id: PlaceId) -> bool {
        self.places
            .get(id.0 as usize)
            .is_some_and(|record| record.mutable)
    }

    /// Source name of a binding.
    #[must_use]
    pub fn name_of(&self, id: PlaceId, interner: &Interner) -> String {
        match self.places.get(id.0 as usize).and_then(|record| record.name) {
            Some(name) => interner.resolve(&name),
            None => format!("{id}"),
        }
    }

    /// Derives the state of `place` from its root.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownPlace`] for an unknown root.
    pub fn availability(&self, place: &Place) -> Result<Availability, InternalError> {
        let record = self.record(place.root)?;
        Ok(match &record.state {
            PlaceState::Owned => Availability::Available,
            PlaceState::Uninitialized => Availability::Uninitialized,
            PlaceState::Moved => Availability::Moved,
            PlaceState::PartiallyMoved { moved_fields } => {
                if moved_fields
                    .iter()
                    .any(|moved| place.projections.starts_with(moved))
                {
                    Availability::Moved
                } else if moved_fields
                    .iter()
                    .any(|moved| moved.starts_with(&place.projections))
                {
                    Availability::PartiallyMoved
                } else {
                    Availability::Available
                }
            }
        })
    }

    /// Where the move that made `place` unavailable happened.
    #[must_use]
    pub fn move_site(&self, place: &Place) -> Option<(Vec<Projection>, FileSpan)> {
        let record = self.places.get(place.root.0 as usize)?;
        record
            .move_sites
            .iter()
            .find(|(path, _)| place.projections.starts_with(path))
            .or_else(|| {
                record
                    .move_sites
                    .iter()
                    .find(|(path, _)| path.starts_with(&place.projections))
            })
            .map(|(path, span)| (path.clone(), *span))
    }

    /// Records that `place` was moved out at `span`.
    ///
    /// Moving a root marks it `Moved`. Moving a sub-place adds its path to
    /// the root's partially moved set without touching sibling paths.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownPlace`] for an unknown root.
    pub fn mark_moved(&mut self, place: &Place, span: FileSpan) -> Result<(), InternalError> {
        let record = self.record_mut(place.root)?;
        trace!("move {:?} at {span}", place);
        record.move_sites.insert(place.projections.clone(), span);
        if place.is_root() {
            record.state = PlaceState::Moved;
            return Ok(());
        }
        match &mut record.state {
            PlaceState::PartiallyMoved { moved_fields } => {
                moved_fields.insert(place.projections.clone());
            }
            state @ PlaceState::Owned => {
                *state = PlaceState::PartiallyMoved {
                    moved_fields: IndexSet::from([place.projections.clone()]),
                };
            }
            PlaceState::Moved | PlaceState::Uninitialized => {}
        }
        Ok(())
    }

    /// Sets a binding's state directly.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownPlace`] for an unknown id.
    pub fn set_state(&mut self, id: PlaceId, state: PlaceState) -> Result<(), InternalError> {
        let record = self.record_mut(id)?;
        if state == PlaceState::Owned {
            record.move_sites.clear();
        }
        record.state = state;
        Ok(())
    }

    /// Captures the state of every binding.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            states: self
                .places
                .iter()
                .map(|record| (record.state.clone(), record.move_sites.clone()))
                .collect(),
        }
    }

    /// Restores the states captured in `snapshot`.
    ///
    /// Bindings created after the snapshot keep their current state.
    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        for (record, (state, sites)) in self.places.iter_mut().zip(&snapshot.states) {
            record.state = state.clone();
            record.move_sites = sites.clone();
        }
    }

    /// Combines the states of several control-flow paths that rejoin.
    ///
    /// A binding is as unavailable as it is on its worst path: moved beats
    /// uninitialised, which beats partially moved, which beats owned.
    #[must_use]
    pub fn merge(paths: &[StateSnapshot]) -> Option<StateSnapshot> {
        let (first, rest) = paths.split_first()?;
        let mut merged = first.clone();
        for path in rest {
            for (slot, (state, sites)) in merged.states.iter_mut().zip(&path.states) {
                slot.0 = merge_state(&slot.0, state);
                for (moved, span) in sites {
                    slot.1.entry(moved.clone()).or_insert(*span);
                }
            }
        }
        Some(merged)
    }
}

fn merge_state(a: &PlaceState, b: &PlaceState) -> PlaceState {
    match (a, b) {
        (PlaceState::Moved, _) | (_, PlaceState::Moved) => PlaceState::Moved,
        (PlaceState::Uninitialized, _) | (_, PlaceState::Uninitialized) => {
            PlaceState::Uninitialized
        }
        (
            PlaceState::PartiallyMoved { moved_fields: left },
            PlaceState::PartiallyMoved { moved_fields: right },
        ) => PlaceState::PartiallyMoved {
            moved_fields: left.union(right).cloned().collect(),
        },
        (partial @ PlaceState::PartiallyMoved { .. }, PlaceState::Owned)
        | (PlaceState::Owned, partial @ PlaceState::PartiallyMoved { .. }) => partial.clone(),
        (PlaceState::Owned, PlaceState::Owned) => PlaceState::Owned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Interner, BorrowEnv) {
        let mut env = BorrowEnv::new();
        env.push_scope();
        (Interner::new(), env)
    }

    #[test]
    fn test_shadowing_and_scope_pop() {
        let (interner, mut env) = setup();
        let x = interner.intern("x");
        let outer = env.define(x, false, Ty::Unknown, FileSpan::default(), None);

        env.push_scope();
        let inner = env.define(x, true, Ty::Unknown, FileSpan::default(), None);
        assert_ne!(outer, inner);
        assert_eq!(env.lookup(x), Some(inner));

        assert_eq!(env.pop_scope().ok(), Some(vec![inner]));
        assert_eq!(env.lookup(x), Some(outer));
        assert!(env.record(inner).is_ok());

        assert!(env.pop_scope().is_ok());
        assert_eq!(env.lookup(x), None);
        assert_eq!(env.pop_scope(), Err(InternalError::UnbalancedScopes));
    }

    #[test]
    fn test_partial_move_availability() {
        let (interner, mut env) = setup();
        let p = env.define(interner.intern("p"), false, Ty::Unknown, FileSpan::default(), None);
        let whole = Place::from_root(p);
        let first = whole.project(Projection::Field(interner.intern("first")));
        let second = whole.project(Projection::Field(interner.intern("second")));

        assert!(env.mark_moved(&first, FileSpan::default()).is_ok());
        assert_eq!(env.availability(&second).ok(), Some(Availability::Available));
        assert_eq!(env.availability(&first).ok(), Some(Availability::Moved));
        assert_eq!(env.availability(&whole).ok(), Some(Availability::PartiallyMoved));
        assert_eq!(
            env.availability(&first.project(Projection::Index)).ok(),
            Some(Availability::Moved)
        );
        assert_eq!(env.move_site(&whole).map(|(path, _)| path), Some(first.projections));
    }

    #[test]
    fn test_merge_prefers_worst_state() {
        let (interner, mut env) = setup();
        let s = env.define(interner.intern("s"), false, Ty::Unknown, FileSpan::default(), None);
        let before = env.snapshot();
        assert!(env.mark_moved(&Place::from_root(s), FileSpan::default()).is_ok());
        let moved = env.snapshot();

        let merged = BorrowEnv::merge(&[before.clone(), moved]);
        if let Some(merged) = merged {
            env.restore(&merged);
        }
        assert_eq!(env.record(s).map(|r| r.state.clone()).ok(), Some(PlaceState::Moved));

        env.restore(&before);
        assert_eq!(env.record(s).map(|r| r.state.clone()).ok(), Some(PlaceState::Owned));
        assert!(BorrowEnv::merge(&[]).is_none());
    }
}
