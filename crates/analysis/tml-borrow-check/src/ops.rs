//! Place operations shared by the checker: uses, moves, borrows and writes.

use tml_span::FileSpan;

use crate::{
    checker::FunctionChecker,
    env::{Availability, PlaceState},
    error::{BorrowError, InternalError},
    liveness::ProgramPoint,
    loans::{Access, LoanId, LoanKind},
    place::{Place, ResolvedPlace},
};

impl FunctionChecker<'_> {
    /// Reports a use of a place that is moved, uninitialised or partially
    /// moved. Returns `false` if an error was reported.
    pub(crate) fn check_use(&mut self, place: &Place, span: FileSpan, borrow: bool) -> Result<bool, InternalError> {
        let error = match self.env.availability(place)? {
            Availability::Available => return Ok(true),
            Availability::Uninitialized => {
                let declared_at = self.env.record(place.root)?.span;
                BorrowError::uninitialized(&self.describe(place), span, declared_at)
            }
            Availability::Moved => {
                let moved_at = self.env.move_site(place).map_or(span, |(_, at)| at);
                BorrowError::use_after_move(&self.describe(place), span, moved_at, borrow)
            }
            Availability::PartiallyMoved => {
                let (path, moved_at) = self.env.move_site(place).unwrap_or((Vec::new(), span));
                let moved = Place {
                    root: place.root,
                    projections: path,
                };
                BorrowError::partially_moved(&self.describe(place), &self.describe(&moved), span, moved_at)
            }
        };
        self.report(error);
        Ok(false)
    }

    /// Reports a loan that forbids `access` to `place`. Returns `false` if
    /// an error was reported.
    pub(crate) fn check_access(
        &mut self,
        place: &Place,
        access: Access,
        span: FileSpan,
        at: ProgramPoint,
        exclude: Option<LoanId>,
    ) -> Result<bool, InternalError> {
        if !self.track_loans {
            return Ok(true);
        }
        let conflict = self
            .loans
            .find_conflict(place, access, &self.liveness, at, exclude)
            .map(|(loan, kind)| (loan.kind, loan.span, loan.later_use(&self.liveness, at), kind));
        let Some((loan_kind, loan_span, later_use, kind)) = conflict else {
            return Ok(true);
        };
        let desc = self.describe(place);
        self.report(
            BorrowError::access_conflict(kind, access, loan_kind, &desc, span, loan_span)
                .with_later_use(later_use),
        );
        Ok(false)
    }

    /// Inspects a place without moving it.
    pub(crate) fn read_place(&mut self, resolved: &ResolvedPlace, span: FileSpan, at: ProgramPoint) -> Result<(), InternalError> {
        if self.check_use(&resolved.place, span, false)? {
            self.check_access(&resolved.place, Access::Read, span, at, None)?;
        }
        Ok(())
    }

    /// Moves a place out, leaving it unavailable.
    pub(crate) fn move_value(&mut self, resolved: &ResolvedPlace, span: FileSpan, at: ProgramPoint) -> Result<(), InternalError> {
        if !self.check_use(&resolved.place, span, false)? {
            return Ok(());
        }
        self.check_access(&resolved.place, Access::Move, span, at, None)?;
        self.env.mark_moved(&resolved.place, span)
    }

    /// Uses a place by value: Copy types and places reached through a
    /// reference or index are read, everything else is moved.
    pub(crate) fn consume_place(&mut self, resolved: &ResolvedPlace, span: FileSpan, at: ProgramPoint) -> Result<(), InternalError> {
        if resolved.place.is_indirect() || self.cx.types.is_copy_type(&resolved.ty) {
            self.read_place(resolved, span, at)
        } else {
            self.move_value(resolved, span, at)
        }
    }

    /// Borrows a place and returns the new loan.
    ///
    /// Returns `None` when the borrow was rejected, or when loans are not
    /// being tracked.
    pub(crate) fn create_borrow(
        &mut self,
        resolved: &ResolvedPlace,
        kind: LoanKind,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Option<LoanId>, InternalError> {
        let place = &resolved.place;
        if kind != LoanKind::Shared && !resolved.is_mutable(&self.env) {
            let desc = self.describe(place);
            self.report(BorrowError::mut_borrow_of_immutable(&desc, span, resolved.through_ref.is_some()));
            return Ok(None);
        }
        if !self.check_use(place, span, true)? || !self.track_loans {
            return Ok(None);
        }
        if !self.check_access(place, Access::Borrow(kind), span, at, None)? {
            return Ok(None);
        }
        let loan = self.loans.issue(place.clone(), kind, at, span);
        self.pin(loan)?;
        self.note_created(loan);
        Ok(Some(loan))
    }

    pub(crate) fn release_borrow(&mut self, loan: LoanId) -> Result<(), InternalError> {
        self.loans.release(loan)
    }

    /// Checks a write to `resolved` and returns `true` if its new state
    /// should be recorded.
    pub(crate) fn assign_place(&mut self, resolved: &ResolvedPlace, span: FileSpan, at: ProgramPoint) -> Result<bool, InternalError> {
        let place = &resolved.place;
        if place.has_deref() {
            if !resolved.is_mutable(&self.env) {
                let desc = self.describe(place);
                self.report(BorrowError::mut_borrow_of_immutable(&desc, span, true));
                return Ok(false);
            }
            let root = Place::from_root(place.root);
            if !self.check_use(&root, span, false)? {
                return Ok(false);
            }
            self.check_access(place, Access::Write, span, at, None)?;
            return Ok(true);
        }

        let record = self.env.record(place.root)?;
        let (declared_at, mutable, state) = (record.span, record.mutable, record.state.clone());
        if place.is_root() {
            if state != PlaceState::Uninitialized && !mutable {
                let desc = self.describe(place);
                self.report(BorrowError::assign_to_immutable(&desc, span, declared_at));
                return Ok(false);
            }
        } else {
            let root = Place::from_root(place.root);
            match state {
                PlaceState::Uninitialized | PlaceState::Moved => {
                    self.check_use(&root, span, false)?;
                    return Ok(false);
                }
                _ if !mutable => {
                    let desc = self.describe(place);
                    self.report(BorrowError::assign_to_immutable(&desc, span, declared_at));
                    return Ok(false);
                }
                _ => {}
            }
        }
        self.check_access(place, Access::Write, span, at, None)?;
        Ok(true)
    }
}
