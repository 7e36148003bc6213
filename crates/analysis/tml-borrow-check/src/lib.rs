//! Borrow checker for TML.
//!
//! This crate proves, per function, that no value is used after it moved,
//! that no two incompatible borrows of overlapping places are live at once,
//! and that partially moved aggregates are never dropped as a whole.
//!
//! # Architecture
//!
//! - [`Place`]: a root binding plus a projection chain
//! - [`BorrowEnv`]: scopes, bindings and per-binding ownership state
//! - [`LoanSet`]: every borrow issued in a function
//! - [`LivenessIndex`]: program points and binding uses, for non-lexical lifetimes
//! - [`analyze_captures`]: what a closure borrows or moves from its surroundings
//! - [`NllChecker`]: the single forward pass, with two-phase method receivers
//! - [`BorrowError`]: user diagnostics; [`InternalError`]: checker faults
//!
//! The Polonius backend lives in its own crate and reuses the place model and
//! the move-path half of [`NllChecker`].
//!
//! # Examples
//!
//! ```rust
//! use tml_ast::{BodyBuilder, Ty};
//! use tml_borrow_check::{BorrowCheckBackend, BorrowCheckConfig, CheckContext, ErrorKind, NllChecker};
//! use tml_intern::Interner;
//! use tml_span::FileId;
//! use tml_types::TypeTableBuilder;
//!
//! let interner = Interner::new();
//! let types = TypeTableBuilder::new(&interner).build();
//! let config = BorrowCheckConfig::default();
//! let cx = CheckContext::new(&types, &interner, &config);
//!
//! let mut b = BodyBuilder::new(&interner, FileId(0));
//! let list_ty = Ty::named(interner.intern("List"));
//! let init = b.call("new_list", vec![]);
//! b.let_var("a", false, Some(list_ty.clone()), Some(init));
//! let moved = b.ident("a");
//! b.let_var("b", false, Some(list_ty), Some(moved));
//! let again = b.ident("a");
//! let call = b.call("print", vec![again]);
//! b.expr_stmt(call);
//! let func = b.finish("main", None, None);
//!
//! let errors = NllChecker::new().check_function(&func, &cx).unwrap_or_default();
//! assert_eq!(errors.len(), 1);
//! assert_eq!(errors[0].kind, ErrorKind::UseAfterMove);
//! ```

mod backend;
mod capture;
mod checker;
mod config;
mod env;
mod error;
mod explain;
mod liveness;
mod loans;
mod ops;
mod place;
mod two_phase;

pub use backend::{BorrowCheckBackend, CheckContext};
pub use capture::{Capture, CaptureKind, analyze_captures};
pub use checker::NllChecker;
pub use config::{Algorithm, BorrowCheckConfig, ConfigError};
pub use env::{Availability, BorrowEnv, PlaceRecord, PlaceState, StateSnapshot};
pub use error::{BorrowError, CheckResult, ErrorKind, InternalError, RelatedSpan};
pub use explain::explain;
pub use liveness::{LivenessIndex, ProgramPoint};
pub use loans::{Access, Loan, LoanId, LoanKind, LoanSet};
pub use place::{
    Place, PlaceId, Projection, ResolvedPlace, disjoint, is_prefix_of, may_hold_ref,
    places_overlap, resolve_place,
};
pub use two_phase::{TwoPhaseBorrow, TwoPhaseState};
