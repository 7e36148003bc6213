//! Two-phase borrows of `mut ref` method receivers.
//!
//! In `list.push(list.len())` the receiver is borrowed mutably before the
//! argument is evaluated, and the argument reads the receiver. The receiver
//! loan therefore starts out *reserved*: shared borrows and reads may still
//! happen, but no other mutable borrow. Once the arguments are evaluated the
//! loan is *activated* and becomes an ordinary exclusive loan that lives as
//! long as its holders under NLL.

use log::trace;
use tml_span::FileSpan;

use crate::{
    checker::FunctionChecker,
    error::{BorrowError, InternalError},
    loans::{Access, LoanId, LoanKind},
    liveness::ProgramPoint,
    place::ResolvedPlace,
};

/// Lifecycle of one receiver borrow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPhaseState {
    /// No loan yet
    NotBorrowed,
    /// Reserved; shared access still permitted
    Reserved,
    /// Exclusive
    Active,
    /// Ended
    Released,
}

impl TwoPhaseState {
    fn name(self) -> &'static str {
        match self {
            Self::NotBorrowed => "not-borrowed",
            Self::Reserved => "reserved",
            Self::Active => "active",
            Self::Released => "released",
        }
    }
}

/// State machine for one two-phase receiver loan.
#[derive(Debug, Clone)]
pub struct TwoPhaseBorrow {
    loan: LoanId,
    state: TwoPhaseState,
}

impl TwoPhaseBorrow {
    /// A borrow of `loan` that has not been reserved yet.
    #[must_use]
    pub fn new(loan: LoanId) -> Self {
        Self {
            loan,
            state: TwoPhaseState::NotBorrowed,
        }
    }

    /// The tracked loan.
    #[must_use]
    pub fn loan(&self) -> LoanId {
        self.loan
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TwoPhaseState {
        self.state
    }

    /// `NotBorrowed -> Reserved`
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::InvalidTwoPhaseTransition`] from any other state.
    pub fn reserve(&mut self) -> Result<(), InternalError> {
        self.transition(TwoPhaseState::NotBorrowed, TwoPhaseState::Reserved)
    }

    /// `Reserved -> Active`
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::InvalidTwoPhaseTransition`] from any other state.
    pub fn activate(&mut self) -> Result<(), InternalError> {
        self.transition(TwoPhaseState::Reserved, TwoPhaseState::Active)
    }

    /// `Active -> Released`
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::InvalidTwoPhaseTransition`] from any other state.
    pub fn release(&mut self) -> Result<(), InternalError> {
        self.transition(TwoPhaseState::Active, TwoPhaseState::Released)
    }

    fn transition(&mut self, from: TwoPhaseState, to: TwoPhaseState) -> Result<(), InternalError> {
        if self.state != from {
            return Err(InternalError::InvalidTwoPhaseTransition {
                loan: self.loan.0,
                from: self.state.name(),
                to: to.name(),
            });
        }
        trace!("two-phase loan {}: {} -> {}", self.loan.0, from.name(), to.name());
        self.state = to;
        Ok(())
    }
}

impl FunctionChecker<'_> {
    /// Reserves a receiver for a `mut ref` method call.
    ///
    /// Reports a conflict with live exclusive loans or other reservations,
    /// then issues a [`LoanKind::TwoPhaseReserved`] loan pinned by the
    /// innermost open frame.
    pub(crate) fn begin_two_phase_borrow(
        &mut self,
        receiver: &ResolvedPlace,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Option<TwoPhaseBorrow>, InternalError> {
        let Some(loan) = self.create_borrow(receiver, LoanKind::TwoPhaseReserved, span, at)? else {
            return Ok(None);
        };
        let mut borrow = TwoPhaseBorrow::new(loan);
        borrow.reserve()?;
        Ok(Some(borrow))
    }

    /// Activates a reserved receiver loan once the arguments are evaluated.
    ///
    /// Any live loan that overlaps the receiver now conflicts, including
    /// shared loans taken while the reservation was open and still held.
    pub(crate) fn end_two_phase_borrow(
        &mut self,
        borrow: &mut TwoPhaseBorrow,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<(), InternalError> {
        borrow.activate()?;
        let place = self.loans.get(borrow.loan())?.place.clone();
        let access = Access::Borrow(LoanKind::TwoPhaseActive);
        let conflict = self
            .loans
            .find_conflict(&place, access, &self.liveness, at, Some(borrow.loan()))
            .map(|(loan, kind)| (loan.kind, loan.span, loan.later_use(&self.liveness, at), kind));
        if let Some((loan_kind, loan_span, later_use, kind)) = conflict {
            let desc = self.describe(&place);
            self.report(
                BorrowError::access_conflict(kind, access, loan_kind, &desc, span, loan_span)
                    .with_later_use(later_use),
            );
        }
        self.loans.get_mut(borrow.loan())?.kind = LoanKind::TwoPhaseActive;
        Ok(())
    }

    /// Ends an activated receiver loan that nothing adopted.
    pub(crate) fn release_two_phase_borrow(
        &mut self,
        mut borrow: TwoPhaseBorrow,
    ) -> Result<(), InternalError> {
        if !self.loans.get(borrow.loan())?.holders.is_empty() {
            return Ok(());
        }
        borrow.release()?;
        self.release_borrow(borrow.loan())
    }
}
