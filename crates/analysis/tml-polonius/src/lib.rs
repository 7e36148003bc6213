//! Polonius-style borrow checking for TML.
//!
//! Instead of tracking loans during a single forward pass, this backend
//! lowers a function to Datalog facts and solves them with `datafrog`.
//!
//! # Architecture
//!
//! - [`FactGenerator`]: walks the body, numbering points and recording
//!   control flow edges, variable uses and definitions, loans, subsets and
//!   place accesses
//! - [`FactTable`]: the input relations, serializable to JSON for debugging
//! - [`solve`]: liveness, subset propagation and loan liveness to a fixed point
//! - [`PoloniusChecker`]: the [`BorrowCheckBackend`] that reports the
//!   invalidations of live loans alongside move errors
//!
//! Each origin is owned by exactly one variable, which is either a binding,
//! a temporary holding a borrow expression, or the return slot.
//!
//! # Examples
//!
//! ```rust
//! use tml_ast::{BodyBuilder, PrimTy, Ty};
//! use tml_borrow_check::{BorrowCheckBackend, BorrowCheckConfig, CheckContext};
//! use tml_intern::Interner;
//! use tml_polonius::PoloniusChecker;
//! use tml_span::FileId;
//! use tml_types::TypeTableBuilder;
//!
//! let interner = Interner::new();
//! let types = TypeTableBuilder::new(&interner).build();
//! let config = BorrowCheckConfig::default();
//! let cx = CheckContext::new(&types, &interner, &config);
//!
//! let int = Ty::Primitive(PrimTy::I32);
//! let mut b = BodyBuilder::new(&interner, FileId(0));
//! let one = b.int(1);
//! b.let_var("x", true, Some(int.clone()), Some(one));
//! let x = b.ident("x");
//! let borrow = b.ref_(x);
//! b.let_var("r", false, Some(Ty::reference(false, int)), Some(borrow));
//! let r = b.ident("r");
//! let print = b.call("print", vec![r]);
//! b.expr_stmt(print);
//! let target = b.ident("x");
//! let two = b.int(2);
//! let assign = b.assign(target, two);
//! b.expr_stmt(assign);
//! let func = b.finish("main", None, None);
//!
//! let errors = PoloniusChecker.check_function(&func, &cx).unwrap_or_default();
//! assert!(errors.is_empty());
//! ```

mod checker;
mod facts;
mod generator;
mod solver;

pub use checker::PoloniusChecker;
pub use facts::{AccessFact, FactTable, Invalidation, Loan, LoanData, Origin, OriginKind, Point, Var};
pub use generator::FactGenerator;
pub use solver::{SolverOutput, solve};
pub use tml_borrow_check::BorrowCheckBackend;
