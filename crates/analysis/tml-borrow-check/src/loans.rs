//! Loan tracking for borrow checking.

use log::trace;
use serde::Serialize;
use tml_ast::PatternId;
use tml_span::FileSpan;

use crate::{
    error::{ErrorKind, InternalError},
    liveness::{LivenessIndex, ProgramPoint},
    place::{Place, PlaceId, places_overlap},
};

/// Identity of a loan within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoanId(pub u32);

/// Kind of borrow.
///
/// This determines what access is allowed to the borrowed place while the
/// loan is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoanKind {
    /// `ref place`. Any number may coexist.
    Shared,

    /// `mut ref place`. Excludes every other access.
    Unique,

    /// A method receiver borrowed mutably whose arguments are still being
    /// evaluated. Shared borrows and reads may still happen.
    TwoPhaseReserved,

    /// A reserved receiver borrow after its arguments were evaluated.
    /// Behaves exactly like [`LoanKind::Unique`].
    TwoPhaseActive,
}

impl LoanKind {
    /// Returns `true` for loans that exclude every other access.
    #[must_use]
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Unique | Self::TwoPhaseActive)
    }

    /// Returns `true` for exclusive loans and reservations.
    #[must_use]
    pub fn is_exclusive_or_reserved(self) -> bool {
        !matches!(self, Self::Shared)
    }
}

/// An access to a place, checked against the live loans overlapping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Access {
    /// Copying or inspecting the value
    Read,
    /// Overwriting the value
    Write,
    /// Moving the value out
    Move,
    /// Taking a new loan, or activating a reserved one
    Borrow(LoanKind),
    /// The place goes out of scope
    StorageDead,
}

impl Access {
    /// Error produced when this access meets a live loan of `loan` kind, or
    /// `None` if the two are compatible.
    ///
    /// # Conflict Rules
    ///
    /// - Read conflicts with exclusive loans only
    /// - Write, Move and StorageDead conflict with everything
    /// - Shared borrows conflict with exclusive loans only
    /// - Reservations conflict with exclusive loans and other reservations
    /// - Unique borrows and activations conflict with everything
    #[must_use]
    pub fn conflict(self, loan: LoanKind) -> Option<ErrorKind> {
        match self {
            Self::Read | Self::Borrow(LoanKind::Shared) => loan
                .is_exclusive()
                .then_some(ErrorKind::ConflictingSharedMutableBorrow),
            Self::Write => Some(ErrorKind::AssignWhileBorrowed),
            Self::Move => Some(ErrorKind::MoveWhileBorrowed),
            Self::StorageDead => Some(ErrorKind::BorrowOutlivesOwner),
            Self::Borrow(LoanKind::TwoPhaseReserved) => loan
                .is_exclusive_or_reserved()
                .then_some(ErrorKind::ConflictingMutableBorrow),
            Self::Borrow(LoanKind::Unique | LoanKind::TwoPhaseActive) => Some(match loan {
                LoanKind::Shared => ErrorKind::ConflictingSharedMutableBorrow,
                _ => ErrorKind::ConflictingMutableBorrow,
            }),
        }
    }
}

/// A loan represents a borrow.
///
/// Under NLL a loan is live while it is pinned by an unfinished call or
/// statement, or while one of its holder bindings is used again later.
#[derive(Debug, Clone)]
pub struct Loan {
    /// Identity
    pub id: LoanId,
    /// The place being borrowed
    pub place: Place,
    /// The kind of borrow
    pub kind: LoanKind,
    /// Point the borrow expression completes at
    pub created_at: ProgramPoint,
    /// Source location where the borrow occurred
    pub span: FileSpan,
    /// Bindings whose value carries this loan
    pub holders: Vec<PatternId>,
    /// Number of open temporary frames keeping the loan alive
    pub pins: u32,
    /// Call site that consumes the loan as an argument, if any
    pub consumed_at: Option<FileSpan>,
    /// Set once the loan can no longer become live
    pub released: bool,
}

impl Loan {
    /// Whether the loan is still reachable at `at`.
    #[must_use]
    pub fn is_live_at(&self, liveness: &LivenessIndex, at: ProgramPoint) -> bool {
        !self.released
            && (self.pins > 0
                || self
                    .holders
                    .iter()
                    .any(|holder| liveness.is_live_at(*holder, at)))
    }

    /// The next use keeping the loan alive at `at`, for diagnostics.
    #[must_use]
    pub fn later_use(&self, liveness: &LivenessIndex, at: ProgramPoint) -> Option<FileSpan> {
        self.holders
            .iter()
            .filter_map(|holder| liveness.next_use(*holder, at))
            .min_by_key(|(point, _)| *point)
            .map(|(_, span)| span)
            .or(self.consumed_at)
    }
}

/// Every loan issued in a function, live or not.
#[derive(Debug, Clone, Default)]
pub struct LoanSet {
    loans: Vec<Loan>,
}

impl LoanSet {
    /// Creates an empty loan set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tml_borrow_check::LoanSet;
    ///
    /// let loans = LoanSet::new();
    /// assert!(loans.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self { loans: Vec::new() }
    }

    /// Records a new loan and returns its id.
    pub fn issue(&mut self, place: Place, kind: LoanKind, created_at: ProgramPoint, span: FileSpan) -> LoanId {
        let id = LoanId(self.loans.len() as u32);
        trace!("issue {kind:?} loan {} on {:?} at {}", id.0, place, created_at.0);
        self.loans.push(Loan {
            id,
            place,
            kind,
            created_at,
            span,
            holders: Vec::new(),
            pins: 0,
            consumed_at: None,
            released: false,
        });
        id
    }

    /// Looks up a loan.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownLoan`] for an id this set never issued.
    pub fn get(&self, id: LoanId) -> Result<&Loan, InternalError> {
        self.loans
            .get(id.0 as usize)
            .ok_or(InternalError::UnknownLoan { id: id.0 })
    }

    /// Looks up a loan mutably.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownLoan`] for an id this set never issued.
    pub fn get_mut(&mut self, id: LoanId) -> Result<&mut Loan, InternalError> {
        self.loans
            .get_mut(id.0 as usize)
            .ok_or(InternalError::UnknownLoan { id: id.0 })
    }

    /// Marks a loan as released.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::UnknownLoan`] for an id this set never issued.
    pub fn release(&mut self, id: LoanId) -> Result<(), InternalError> {
        let loan = self.get_mut(id)?;
        if !loan.released {
            trace!("release loan {}", id.0);
            loan.released = true;
        }
        Ok(())
    }

    /// Loans currently carried by `holder`.
    pub fn held_by(&self, holder: PatternId) -> impl Iterator<Item = LoanId> + '_ {
        self.loans
            .iter()
            .filter(move |loan| !loan.released && loan.holders.contains(&holder))
            .map(|loan| loan.id)
    }

    /// Loans ever taken on places rooted at `root`, in issue order.
    pub fn on_root(&self, root: PlaceId) -> impl Iterator<Item = LoanId> + '_ {
        self.loans
            .iter()
            .filter(move |loan| loan.place.root == root)
            .map(|loan| loan.id)
    }

    /// The first loan that is live at `at`, overlaps `place` and conflicts
    /// with `access`, together with the resulting error kind.
    #[must_use]
    pub fn find_conflict(
        &self,
        place: &Place,
        access: Access,
        liveness: &LivenessIndex,
        at: ProgramPoint,
        exclude: Option<LoanId>,
    ) -> Option<(&Loan, ErrorKind)> {
        self.loans
            .iter()
            .filter(|loan| Some(loan.id) != exclude)
            .filter(|loan| places_overlap(&loan.place, place))
            .filter(|loan| loan.is_live_at(liveness, at))
            .find_map(|loan| access.conflict(loan.kind).map(|kind| (loan, kind)))
    }

    /// All loans, in issue order.
    pub fn iter(&self) -> impl Iterator<Item = &Loan> {
        self.loans.iter()
    }

    /// Returns the number of loans issued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loans.len()
    }

    /// Returns `true` if no loan was issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_table() {
        use ErrorKind::*;
        use LoanKind::*;

        assert_eq!(Access::Read.conflict(Shared), None);
        assert_eq!(Access::Read.conflict(TwoPhaseReserved), None);
        assert_eq!(Access::Read.conflict(Unique), Some(ConflictingSharedMutableBorrow));
        assert_eq!(Access::Borrow(Shared).conflict(Shared), None);
        assert_eq!(Access::Borrow(Shared).conflict(TwoPhaseReserved), None);
        assert_eq!(
            Access::Borrow(Shared).conflict(TwoPhaseActive),
            Some(ConflictingSharedMutableBorrow)
        );
        assert_eq!(
            Access::Borrow(Unique).conflict(Shared),
            Some(ConflictingSharedMutableBorrow)
        );
        assert_eq!(Access::Borrow(Unique).conflict(Unique), Some(ConflictingMutableBorrow));
        assert_eq!(Access::Borrow(TwoPhaseReserved).conflict(Shared), None);
        assert_eq!(
            Access::Borrow(TwoPhaseReserved).conflict(TwoPhaseReserved),
            Some(ConflictingMutableBorrow)
        );
        assert_eq!(Access::Write.conflict(Shared), Some(AssignWhileBorrowed));
        assert_eq!(Access::Move.conflict(Shared), Some(MoveWhileBorrowed));
        assert_eq!(Access::StorageDead.conflict(Unique), Some(BorrowOutlivesOwner));
    }

    #[test]
    fn test_pinned_loan_conflicts_until_released() {
        let liveness = LivenessIndex::default();
        let span = FileSpan::default();
        let place = Place::from_root(PlaceId(0));
        let mut loans = LoanSet::new();
        let first = loans.issue(place.clone(), LoanKind::Shared, ProgramPoint(0), span);
        loans.get_mut(first).map(|loan| loan.pins = 1).ok();

        let conflict = loans.find_conflict(
            &place,
            Access::Borrow(LoanKind::Unique),
            &liveness,
            ProgramPoint(1),
            None,
        );
        assert_eq!(conflict.map(|(loan, _)| loan.id), Some(first));

        loans.release(first).ok();
        assert!(
            loans
                .find_conflict(&place, Access::Write, &liveness, ProgramPoint(1), None)
                .is_none()
        );
        assert_eq!(loans.len(), 1);
        assert_eq!(loans.on_root(PlaceId(0)).collect::<Vec<_>>(), [first]);
        assert_eq!(loans.on_root(PlaceId(1)).count(), 0);
        assert!(matches!(loans.get(LoanId(5)), Err(InternalError::UnknownLoan { id: 5 })));
    }
}
