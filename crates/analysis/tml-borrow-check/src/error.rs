//! Borrow checking diagnostics.
//!
//! Both backends report user errors as [`BorrowError`] records and compiler
//! faults as [`InternalError`]. The constructors on [`BorrowError`] are shared
//! so a program flagged by both backends produces the same wording.

use std::fmt;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tml_span::FileSpan;

use crate::{
    capture::CaptureKind,
    loans::{Access, LoanKind},
};

/// Result of checking one function: the user errors found, or a fault.
pub type CheckResult = Result<Vec<BorrowError>, InternalError>;

/// Category of a borrow error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A moved (or never initialized) value was used
    UseAfterMove,
    /// A value was moved while borrowed
    MoveWhileBorrowed,
    /// An immutable binding was assigned twice
    AssignToImmutable,
    /// A borrowed place was assigned
    AssignWhileBorrowed,
    /// `mut ref` of an immutable place
    MutBorrowOfImmutable,
    /// A shared and an exclusive access overlap
    ConflictingSharedMutableBorrow,
    /// Two exclusive loans overlap
    ConflictingMutableBorrow,
    /// A loan is still reachable after its place went out of scope
    BorrowOutlivesOwner,
    /// A partially moved aggregate that needs drop went out of scope
    InvalidPartialDrop,
    /// A closure captures a value that was already moved
    ClosureCapturesMoved,
    /// A closure captures a place in a way a live loan forbids
    ClosureCaptureConflict,
    /// A partially moved aggregate was used as a whole
    UseOfPartiallyMoved,
    /// Checker state machine violation
    InternalInconsistency,
}

impl ErrorKind {
    /// Stable error code, as accepted by [`crate::explain`].
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UseAfterMove => "B001",
            Self::MoveWhileBorrowed => "B002",
            Self::AssignToImmutable => "B003",
            Self::AssignWhileBorrowed => "B004",
            Self::MutBorrowOfImmutable => "B006",
            Self::ConflictingSharedMutableBorrow => "B007",
            Self::ConflictingMutableBorrow => "B008",
            Self::BorrowOutlivesOwner => "B010",
            Self::InvalidPartialDrop => "B011",
            Self::ClosureCapturesMoved => "B014",
            Self::ClosureCaptureConflict => "B015",
            Self::UseOfPartiallyMoved => "B016",
            Self::InternalInconsistency => "B099",
        }
    }
}

/// A secondary location attached to an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedSpan {
    /// Location
    pub span: FileSpan,
    /// Label shown next to the location
    pub label: String,
}

/// A user-facing borrow error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowError {
    /// Error category
    pub kind: ErrorKind,
    /// Where the offending operation happens
    pub primary_span: FileSpan,
    /// Headline message
    pub primary_message: String,
    /// Secondary locations, e.g. "value moved here"
    pub related: Vec<RelatedSpan>,
    /// Extra explanation
    pub notes: Vec<String>,
    /// Possible fixes
    pub suggestions: Vec<String>,
}

impl BorrowError {
    /// Creates an error with no related spans, notes or suggestions.
    #[must_use]
    pub fn new(kind: ErrorKind, primary_span: FileSpan, primary_message: impl Into<String>) -> Self {
        Self {
            kind,
            primary_span,
            primary_message: primary_message.into(),
            related: Vec::new(),
            notes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Adds a labelled secondary location.
    #[must_use]
    pub fn with_related(mut self, span: FileSpan, label: impl Into<String>) -> Self {
        self.related.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Adds a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Error code of [`Self::kind`].
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Use, borrow or assignment of a moved value.
    #[must_use]
    pub fn use_after_move(place: &str, span: FileSpan, moved_at: FileSpan, borrow: bool) -> Self {
        let what = if borrow { "borrow" } else { "use" };
        Self::new(ErrorKind::UseAfterMove, span, format!("{what} of moved value: `{place}`"))
            .with_related(moved_at, "value moved here")
            .with_note(format!(
                "move occurs because `{place}` has a type that does not implement `Copy`"
            ))
            .with_suggestion("consider using `.duplicate()` to keep a copy before moving")
    }

    /// Read of a binding declared without an initializer.
    #[must_use]
    pub fn uninitialized(place: &str, span: FileSpan, declared_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::UseAfterMove,
            span,
            format!("used binding `{place}` isn't initialized"),
        )
        .with_related(declared_at, "binding declared here but left uninitialized")
        .with_suggestion(format!("consider assigning a value to `{place}` before use"))
    }

    /// A value moved inside a loop body that the next iteration moves again.
    #[must_use]
    pub fn moved_in_previous_iteration(place: &str, moved_at: FileSpan) -> Self {
        Self::new(ErrorKind::UseAfterMove, moved_at, format!("use of moved value: `{place}`"))
            .with_related(moved_at, "value moved here, in previous iteration of loop")
            .with_suggestion("consider using `.duplicate()` inside the loop, or moving the value out after it")
    }

    /// Whole-value use of a partially moved aggregate.
    #[must_use]
    pub fn partially_moved(place: &str, moved_field: &str, span: FileSpan, moved_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::UseOfPartiallyMoved,
            span,
            format!("use of partially moved value: `{place}`"),
        )
        .with_related(moved_at, "value partially moved here")
        .with_note(format!("partial move occurs because `{moved_field}` was moved out"))
        .with_suggestion("consider using `.duplicate()` on the moved field instead")
    }

    /// A conflicting access to a place with a live loan.
    #[must_use]
    pub fn access_conflict(
        kind: ErrorKind,
        access: Access,
        loan_kind: LoanKind,
        place: &str,
        span: FileSpan,
        loan_span: FileSpan,
    ) -> Self {
        let loan_label = match (access, loan_kind.is_exclusive_or_reserved()) {
            (Access::Borrow(_), _) => String::from("first borrow occurs here"),
            (_, true) => format!("`{place}` is mutably borrowed here"),
            (_, false) => format!("`{place}` is borrowed here"),
        };
        let message = match access {
            Access::Read => format!("cannot use `{place}` because it was mutably borrowed"),
            Access::Write => format!("cannot assign to `{place}` because it is borrowed"),
            Access::Move => format!("cannot move out of `{place}` because it is borrowed"),
            Access::StorageDead => format!("`{place}` does not live long enough"),
            Access::Borrow(LoanKind::Shared) => format!(
                "cannot borrow `{place}` as immutable because it is also borrowed as mutable"
            ),
            Access::Borrow(_) if kind == ErrorKind::ConflictingMutableBorrow => {
                format!("cannot borrow `{place}` as mutable more than once at a time")
            }
            Access::Borrow(_) => format!(
                "cannot borrow `{place}` as mutable because it is also borrowed as immutable"
            ),
        };
        if access == Access::StorageDead {
            return Self::new(kind, loan_span, message)
                .with_related(span, format!("`{place}` dropped here while still borrowed"))
                .with_note("the borrow is used after the borrowed value goes out of scope");
        }
        let error = Self::new(kind, span, message).with_related(loan_span, loan_label);
        match access {
            Access::Borrow(LoanKind::TwoPhaseActive) => {
                error.with_note("the mutable borrow of the method receiver starts once the arguments are evaluated")
            }
            _ => error,
        }
    }

    /// Attaches the later use that keeps the conflicting loan alive.
    #[must_use]
    pub fn with_later_use(self, later_use: Option<FileSpan>) -> Self {
        let Some(span) = later_use else {
            return self;
        };
        let label = if self.related.iter().any(|r| r.label == "first borrow occurs here") {
            "first borrow later used here"
        } else {
            "borrow later used here"
        };
        self.with_related(span, label)
    }

    /// A partially moved aggregate that needs drop leaves scope.
    #[must_use]
    pub fn invalid_partial_drop(place: &str, scope_end: FileSpan, moved_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::InvalidPartialDrop,
            scope_end,
            format!("cannot drop partially moved value `{place}`"),
        )
        .with_related(moved_at, "value partially moved here")
        .with_note(format!(
            "`{place}` runs a destructor, so it cannot be dropped while some fields are moved out"
        ))
        .with_suggestion("move the remaining fields out as well, or duplicate the moved field")
    }

    /// Second assignment to an immutable binding.
    #[must_use]
    pub fn assign_to_immutable(place: &str, span: FileSpan, declared_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::AssignToImmutable,
            span,
            format!("cannot assign twice to immutable variable `{place}`"),
        )
        .with_related(declared_at, "first assignment")
        .with_suggestion(format!("consider making this binding mutable: `mut {place}`"))
    }

    /// `mut ref` of a place that cannot be mutated.
    #[must_use]
    pub fn mut_borrow_of_immutable(place: &str, span: FileSpan, behind_ref: bool) -> Self {
        let message = if behind_ref {
            format!("cannot borrow `{place}` as mutable, as it is behind a `ref` reference")
        } else {
            format!("cannot borrow `{place}` as mutable, as it is not declared as mutable")
        };
        let suggestion = if behind_ref {
            String::from("consider changing the reference to `mut ref`")
        } else {
            format!("consider declaring the binding as `mut {place}`")
        };
        Self::new(ErrorKind::MutBorrowOfImmutable, span, message).with_suggestion(suggestion)
    }

    /// A reference to a local escapes through the return value.
    #[must_use]
    pub fn returns_local_ref(place: &str, span: FileSpan, borrowed_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::BorrowOutlivesOwner,
            span,
            format!("cannot return reference to local `{place}`"),
        )
        .with_related(borrowed_at, format!("`{place}` is borrowed here"))
        .with_note("returns a reference to data owned by the current function")
        .with_suggestion("return the value itself instead of a reference to it")
    }

    /// A block-local place dies while a loan on it can still be observed.
    #[must_use]
    pub fn outlives_owner(place: &str, borrowed_at: FileSpan, dropped_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::BorrowOutlivesOwner,
            borrowed_at,
            format!("`{place}` does not live long enough"),
        )
        .with_related(dropped_at, format!("`{place}` dropped here while still borrowed"))
        .with_note("the borrow is used after the borrowed value goes out of scope")
    }

    /// A closure captures a binding that was moved before the closure.
    #[must_use]
    pub fn closure_captures_moved(place: &str, captured_at: FileSpan, moved_at: FileSpan) -> Self {
        Self::new(
            ErrorKind::ClosureCapturesMoved,
            captured_at,
            format!("closure captures moved value: `{place}`"),
        )
        .with_related(moved_at, "value moved here")
        .with_note("the closure would refer to a value that no longer exists")
        .with_suggestion(format!("create the closure before `{place}` is moved"))
    }

    /// A closure capture conflicts with a live loan.
    #[must_use]
    pub fn closure_capture_conflict(
        place: &str,
        capture: CaptureKind,
        captured_at: FileSpan,
        loan_span: FileSpan,
    ) -> Self {
        let message = match capture {
            CaptureKind::ByCopy => format!("cannot copy `{place}` into closure because it is mutably borrowed"),
            CaptureKind::ByRef => {
                format!("cannot borrow `{place}` in closure because it is also borrowed as mutable")
            }
            CaptureKind::ByMutRef => {
                format!("cannot borrow `{place}` mutably in closure because it is already borrowed")
            }
            CaptureKind::ByMove => format!("cannot move `{place}` into closure because it is borrowed"),
        };
        Self::new(ErrorKind::ClosureCaptureConflict, captured_at, message)
            .with_related(loan_span, format!("`{place}` is borrowed here"))
            .with_note(format!("the closure captures `{place}` {}", capture.describe()))
    }

    /// Converts the error to a codespan diagnostic for terminal output.
    #[must_use]
    pub fn to_codespan_diagnostic(&self) -> codespan_reporting::diagnostic::Diagnostic<usize> {
        use codespan_reporting::diagnostic::{Diagnostic, Label};

        let file_id = self.primary_span.file.0 as usize;
        let mut labels = vec![
            Label::primary(file_id, self.primary_span.range()).with_message(&self.primary_message),
        ];
        labels.extend(self.related.iter().map(|related| {
            Label::secondary(related.span.file.0 as usize, related.span.range())
                .with_message(&related.label)
        }));
        let notes = self
            .notes
            .iter()
            .cloned()
            .chain(self.suggestions.iter().map(|hint| format!("help: {hint}")))
            .collect();

        Diagnostic::error()
            .with_message(&self.primary_message)
            .with_code(self.code())
            .with_labels(labels)
            .with_notes(notes)
    }
}

impl fmt::Display for BorrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.code(), self.primary_message)
    }
}

/// A checker state machine violation. Always a compiler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum InternalError {
    /// A place id with no recorded state
    #[error("no state recorded for place #{id}")]
    #[diagnostic(code(borrowck::unknown_place))]
    UnknownPlace {
        /// Raw place id
        id: u32,
    },

    /// A loan id that was never issued
    #[error("loan #{id} was never issued")]
    #[diagnostic(code(borrowck::unknown_loan))]
    UnknownLoan {
        /// Raw loan id
        id: u32,
    },

    /// A two-phase borrow changed state out of order
    #[error("two-phase borrow of loan #{loan} cannot go from {from} to {to}")]
    #[diagnostic(code(borrowck::two_phase_transition))]
    InvalidTwoPhaseTransition {
        /// Raw loan id
        loan: u32,
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// More scopes were popped than pushed
    #[error("scope stack underflow")]
    #[diagnostic(code(borrowck::unbalanced_scopes))]
    UnbalancedScopes,

    /// The constraint solver hit its configured round limit
    #[error("constraint solver did not converge within {limit} rounds")]
    #[diagnostic(code(borrowck::solver_diverged))]
    SolverDiverged {
        /// Configured limit
        limit: usize,
    },
}

impl InternalError {
    /// Wraps the fault as an `InternalInconsistency` record for reporting.
    #[must_use]
    pub fn to_borrow_error(&self, span: FileSpan) -> BorrowError {
        BorrowError::new(
            ErrorKind::InternalInconsistency,
            span,
            format!("internal borrow checker error: {self}"),
        )
        .with_note("this is a compiler bug, not an error in the program")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tml_span::{FileId, Span};

    fn span(start: u32) -> FileSpan {
        FileSpan::new(FileId(0), Span::new(start, start + 1))
    }

    #[test]
    fn test_use_after_move_shape() {
        let error = BorrowError::use_after_move("s", span(10), span(4), false);
        assert_eq!(error.kind, ErrorKind::UseAfterMove);
        assert_eq!(error.to_string(), "error[B001]: use of moved value: `s`");
        assert_eq!(error.related[0].label, "value moved here");
        assert_eq!(error.related[0].span, span(4));
        assert!(error.suggestions[0].contains(".duplicate()"));
    }

    #[test]
    fn test_conflict_messages() {
        let shared_then_mut = BorrowError::access_conflict(
            ErrorKind::ConflictingSharedMutableBorrow,
            Access::Borrow(LoanKind::Unique),
            LoanKind::Shared,
            "x",
            span(8),
            span(2),
        );
        assert_eq!(
            shared_then_mut.primary_message,
            "cannot borrow `x` as mutable because it is also borrowed as immutable"
        );
        assert_eq!(shared_then_mut.related[0].label, "first borrow occurs here");

        let dropped = BorrowError::access_conflict(
            ErrorKind::BorrowOutlivesOwner,
            Access::StorageDead,
            LoanKind::Shared,
            "y",
            span(20),
            span(12),
        );
        assert_eq!(dropped.primary_span, span(12));
        assert_eq!(dropped.related[0].label, "`y` dropped here while still borrowed");
    }

    #[test]
    fn test_closure_errors() {
        let moved = BorrowError::closure_captures_moved("data", span(9), span(3));
        assert_eq!(moved.to_string(), "error[B014]: closure captures moved value: `data`");
        assert_eq!(moved.related[0].span, span(3));

        let conflict = BorrowError::closure_capture_conflict("x", CaptureKind::ByMutRef, span(9), span(3));
        assert_eq!(conflict.code(), "B015");
        assert_eq!(conflict.primary_span, span(9));
        assert_eq!(conflict.notes, ["the closure captures `x` by mutable reference"]);
    }

    #[test]
    fn test_codespan_rendering_carries_labels() {
        let error = BorrowError::use_after_move("s", span(10), span(4), false);
        let diagnostic = error.to_codespan_diagnostic();
        assert_eq!(diagnostic.code.as_deref(), Some("B001"));
        assert_eq!(diagnostic.labels.len(), 2);
        assert!(diagnostic.notes.iter().any(|note| note.starts_with("help: ")));
    }

    #[test]
    fn test_internal_error_wraps_as_inconsistency() {
        let fault = InternalError::UnknownPlace { id: 7 };
        let error = fault.to_borrow_error(span(0));
        assert_eq!(error.kind, ErrorKind::InternalInconsistency);
        assert_eq!(
            error.primary_message,
            "internal borrow checker error: no state recorded for place #7"
        );
    }
}
