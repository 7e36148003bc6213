//! The Polonius backend.

use log::debug;
use rustc_hash::FxHashSet;
use tml_ast::FuncDecl;
use tml_borrow_check::{
    Access, BorrowCheckBackend, BorrowError, CheckContext, CheckResult, InternalError, NllChecker,
};

use crate::facts::{FactTable, Loan, Point};
use crate::generator::FactGenerator;
use crate::solver::{SolverOutput, solve};

/// Location-sensitive borrow checking.
///
/// Move paths are checked exactly as the NLL checker does. Loans are checked
/// by generating facts for the whole body and solving them, so a loan is
/// only live where some origin containing it is live. This accepts programs
/// where a borrow is held on one branch and the borrowed place is written on
/// another.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoloniusChecker;

impl PoloniusChecker {
    /// Creates the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates and solves the facts of `func` without reporting.
    ///
    /// # Errors
    ///
    /// Fails if generation or the solver hits an internal fault.
    pub fn solve_function(
        &self,
        func: &FuncDecl,
        cx: &CheckContext<'_>,
    ) -> Result<(FactTable, SolverOutput), InternalError> {
        let facts = FactGenerator::generate(func, cx)?;
        let output = solve(&facts, cx.config.max_solver_iterations)?;
        Ok((facts, output))
    }
}

impl BorrowCheckBackend for PoloniusChecker {
    fn name(&self) -> &'static str {
        "polonius"
    }

    fn check_function(&self, func: &FuncDecl, cx: &CheckContext<'_>) -> CheckResult {
        let mut errors = NllChecker::moves_only().check_function(func, cx)?;
        let (facts, output) = self.solve_function(func, cx)?;
        errors.extend(loan_errors(&facts, &output)?);
        errors.sort_by_key(|error| error.primary_span.span.start);
        debug!(
            "polonius checked `{}`: {} points, {} loans, {} errors",
            cx.interner.resolve(&func.name),
            facts.point_count(),
            facts.loans.len(),
            errors.len()
        );
        Ok(errors)
    }
}

/// One error per conflicting access. A scope end that outlives a loan is
/// reported once per loan.
fn loan_errors(facts: &FactTable, output: &SolverOutput) -> Result<Vec<BorrowError>, InternalError> {
    let live: FxHashSet<(Loan, Point)> = output.errors.iter().copied().collect();
    let mut outlived: FxHashSet<Loan> = FxHashSet::default();
    let mut reported: FxHashSet<(Point, u32)> = FxHashSet::default();
    let mut errors = Vec::new();

    for inv in &facts.invalidations {
        if !live.contains(&(inv.loan, inv.point)) {
            continue;
        }
        let loan = facts
            .loans
            .get(&inv.loan)
            .ok_or(InternalError::UnknownLoan { id: inv.loan.0 })?;
        let fresh = if inv.access == Access::StorageDead {
            outlived.insert(inv.loan)
        } else {
            reported.insert((inv.point, inv.span.span.start))
        };
        if !fresh {
            continue;
        }
        errors.push(match inv.capture {
            Some(capture) => BorrowError::closure_capture_conflict(&inv.desc, capture, inv.span, loan.span),
            None => BorrowError::access_conflict(inv.kind, inv.access, loan.kind, &inv.desc, inv.span, loan.span),
        });
    }
    Ok(errors)
}
