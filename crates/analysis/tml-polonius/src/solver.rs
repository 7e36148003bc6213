//! Datalog fixed point over a [`FactTable`].
//!
//! ```text
//! origin_live_on_entry(O, P) :- var_used_at(V, P), use_of_var_derefs_origin(V, O).
//! origin_live_on_entry(O, P) :- cfg_edge(P, Q), origin_live_on_entry(O, Q),
//!                               !var_defined_at(V, P), use_of_var_derefs_origin(V, O).
//!
//! subset(O1, O2, P) :- subset_base(O1, O2, P).
//! subset(O1, O3, P) :- subset(O1, O2, P), subset(O2, O3, P).
//! subset(O1, O2, Q) :- subset(O1, O2, P), cfg_edge(P, Q),
//!                      origin_live_on_entry(O1, Q), origin_live_on_entry(O2, Q).
//!
//! origin_contains_loan_on_entry(O, L, P) :- loan_issued_at(O, L, P).
//! origin_contains_loan_on_entry(O2, L, P) :- origin_contains_loan_on_entry(O1, L, P), subset(O1, O2, P).
//! origin_contains_loan_on_entry(O, L, Q) :- origin_contains_loan_on_entry(O, L, P), cfg_edge(P, Q),
//!                                           origin_live_on_entry(O, Q).
//!
//! loan_live_at(L, P) :- origin_contains_loan_on_entry(O, L, P), origin_live_on_entry(O, P).
//! errors(L, P) :- loan_invalidated_at(L, P), loan_live_at(L, P).
//! ```

use datafrog::{Iteration, Relation};
use log::{debug, trace};
use rustc_hash::FxHashSet;
use tml_borrow_check::InternalError;

use crate::facts::{FactTable, Loan, Origin, Point};

/// Everything the solver derived, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverOutput {
    /// `origin_live_on_entry(O, P)`
    pub origin_live_on_entry: Vec<(Origin, Point)>,
    /// `subset(O1, O2, P)`
    pub subset: Vec<(Origin, Origin, Point)>,
    /// `origin_contains_loan_on_entry(O, L, P)`
    pub origin_contains_loan_on_entry: Vec<(Origin, Loan, Point)>,
    /// `loan_live_at(L, P)`
    pub loan_live_at: Vec<(Loan, Point)>,
    /// Invalidations of live loans
    pub errors: Vec<(Loan, Point)>,
    /// Rounds run before reaching the fixed point
    pub iterations: usize,
}

/// Runs the rules to a fixed point.
///
/// Output is all or nothing: either every relation reached its fixed point,
/// or an error is returned and nothing derived so far is exposed.
///
/// # Errors
///
/// Returns [`InternalError::SolverDiverged`] if more than `max_iterations`
/// rounds are needed.
pub fn solve(facts: &FactTable, max_iterations: Option<usize>) -> Result<SolverOutput, InternalError> {
    let mut iteration = Iteration::new();

    let cfg_edge: Relation<(Point, Point)> = facts.cfg_edge.iter().copied().collect();
    let cfg_edge_rev: Relation<(Point, Point)> = facts.cfg_edge.iter().map(|&(p, q)| (q, p)).collect();
    let origin_defined_at: Relation<(Origin, Point)> = facts
        .var_defined_at
        .iter()
        .map(|&(var, point)| (facts.origin_of(var), point))
        .collect();

    // Liveness, keyed by point for the CFG joins and by (origin, point) for
    // membership tests
    let live_on_entry = iteration.variable::<(Point, Origin)>("origin_live_on_entry");
    let live = iteration.variable::<((Origin, Point), ())>("origin_live");
    let live_on_exit = iteration.variable::<((Origin, Point), ())>("origin_live_on_exit");

    // `subset` under three keys: source origin, target origin, point
    let subset = iteration.variable::<((Origin, Point), Origin)>("subset");
    let subset_by_target = iteration.variable::<((Origin, Point), Origin)>("subset_by_target");
    let subset_by_point = iteration.variable::<(Point, (Origin, Origin))>("subset_by_point");
    let subset_step = iteration.variable::<((Origin, Point), Origin)>("subset_step");
    let subset_step_live = iteration.variable::<((Origin, Point), Origin)>("subset_step_live");

    let contains = iteration.variable::<((Origin, Point), Loan)>("origin_contains_loan_on_entry");
    let contains_by_point = iteration.variable::<(Point, (Origin, Loan))>("contains_by_point");
    let contains_step = iteration.variable::<((Origin, Point), Loan)>("contains_step");

    let loan_live_at = iteration.variable::<((Loan, Point), ())>("loan_live_at");

    live_on_entry.extend(
        facts
            .var_used_at
            .iter()
            .map(|&(var, point)| (point, facts.origin_of(var))),
    );
    subset.extend(facts.subset_base.iter().map(|&(sub, sup, point)| ((sub, point), sup)));
    contains.extend(
        facts
            .loan_issued_at
            .iter()
            .map(|&(origin, loan, point)| ((origin, point), loan)),
    );

    let mut rounds = 0;
    while iteration.changed() {
        rounds += 1;
        if let Some(limit) = max_iterations.filter(|limit| rounds > *limit) {
            debug!("solver gave up after {limit} rounds");
            return Err(InternalError::SolverDiverged { limit });
        }

        live.from_map(&live_on_entry, |&(point, origin)| ((origin, point), ()));
        live_on_exit.from_join(&live_on_entry, &cfg_edge_rev, |&_succ, &origin, &point| ((origin, point), ()));
        live_on_entry.from_antijoin(&live_on_exit, &origin_defined_at, |&(origin, point), &()| (point, origin));

        subset_by_target.from_map(&subset, |&((sub, point), sup)| ((sup, point), sub));
        subset_by_point.from_map(&subset, |&((sub, point), sup)| (point, (sub, sup)));
        subset.from_join(&subset_by_target, &subset, |&(_mid, point), &sub, &sup| ((sub, point), sup));
        subset_step.from_join(&subset_by_point, &cfg_edge, |&_point, &(sub, sup), &succ| ((sub, succ), sup));
        subset_step_live.from_join(&subset_step, &live, |&(sub, succ), &sup, &()| ((sup, succ), sub));
        subset.from_join(&subset_step_live, &live, |&(sup, succ), &sub, &()| ((sub, succ), sup));

        contains_by_point.from_map(&contains, |&((origin, point), loan)| (point, (origin, loan)));
        contains.from_join(&contains, &subset, |&(_sub, point), &loan, &sup| ((sup, point), loan));
        contains_step.from_join(&contains_by_point, &cfg_edge, |&_point, &(origin, loan), &succ| {
            ((origin, succ), loan)
        });
        contains.from_join(&contains_step, &live, |&(origin, succ), &loan, &()| ((origin, succ), loan));

        loan_live_at.from_join(&contains, &live, |&(_origin, point), &loan, &()| ((loan, point), ()));
        trace!("solver round {rounds}");
    }

    let live_on_entry = live_on_entry.complete();
    let subset = subset.complete();
    let contains = contains.complete();
    let loan_live_at = loan_live_at.complete();

    let live_loans: FxHashSet<(Loan, Point)> = loan_live_at.iter().map(|&(fact, ())| fact).collect();
    let mut errors: Vec<(Loan, Point)> = facts
        .loan_invalidated_at
        .iter()
        .copied()
        .filter(|fact| live_loans.contains(fact))
        .collect();
    errors.sort_unstable();
    errors.dedup();

    let mut output = SolverOutput {
        origin_live_on_entry: live_on_entry.iter().map(|&(point, origin)| (origin, point)).collect(),
        subset: subset.iter().map(|&((sub, point), sup)| (sub, sup, point)).collect(),
        origin_contains_loan_on_entry: contains
            .iter()
            .map(|&((origin, point), loan)| (origin, loan, point))
            .collect(),
        loan_live_at: loan_live_at.iter().map(|&(fact, ())| fact).collect(),
        errors,
        iterations: rounds,
    };
    output.origin_live_on_entry.sort_unstable();
    output.subset.sort_unstable();
    output.origin_contains_loan_on_entry.sort_unstable();
    debug!(
        "solved {} points in {} rounds: {} live loan facts, {} errors",
        facts.point_count(),
        output.iterations,
        output.loan_live_at.len(),
        output.errors.len()
    );
    Ok(output)
}
