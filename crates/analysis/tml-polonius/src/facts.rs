//! Input relations for the solver.
//!
//! Every atom is a dense `u32` handed out in walk order, so generating facts
//! twice for the same body yields identical tables.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tml_borrow_check::{Access, CaptureKind, ErrorKind, LoanKind, Place, PlaceId, places_overlap};
use tml_span::FileSpan;

macro_rules! atom {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

atom!(
    /// A node of the control-flow graph
    Point,
    "p"
);
atom!(
    /// An abstract lifetime: the set of loans a reference may carry
    Origin,
    "'o"
);
atom!(
    /// A borrow expression
    Loan,
    "L"
);
atom!(
    /// A binding or temporary whose uses keep its origin live
    Var,
    "v"
);

/// What an origin belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OriginKind {
    /// A `let`, parameter or pattern binding
    Binding(PlaceId),
    /// A borrow or call result not yet stored anywhere
    Temporary,
    /// The function's return value
    Return,
}

/// Everything recorded about a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanData {
    /// Borrowed place
    pub place: Place,
    /// Borrow kind
    pub kind: LoanKind,
    /// Borrow expression
    pub span: FileSpan,
    /// Origin the loan is issued into
    pub origin: Origin,
    /// Point of issue
    pub issued_at: Point,
    /// Borrowed place as written in source
    pub desc: String,
}

/// An access to a place at a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessFact {
    /// Accessed place
    pub place: Place,
    /// What the access does
    pub access: Access,
    /// Where it happens
    pub point: Point,
    /// Source of the access
    pub span: FileSpan,
    /// Accessed place as written in source
    pub desc: String,
    /// The loan this access creates, which it never invalidates
    pub issued: Option<Loan>,
    /// Set when a closure captures the place
    pub capture: Option<CaptureKind>,
    /// Loans issued before this one are never paired with the access. Set
    /// inside closure bodies, whose captures already answer for them.
    pub checked_from: Option<Loan>,
}

/// An access that would be an error if `loan` is live at `point`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    /// Invalidated loan
    pub loan: Loan,
    /// Point of the access
    pub point: Point,
    /// The access
    pub access: Access,
    /// Error reported when the loan is live
    pub kind: ErrorKind,
    /// Source of the access
    pub span: FileSpan,
    /// Accessed place as written in source
    pub desc: String,
    /// Set when the access is a closure capture
    pub capture: Option<CaptureKind>,
}

/// All facts about one function.
///
/// Every origin belongs to exactly one variable with the same index, so
/// `use_of_var_derefs_origin` is the identity pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactTable {
    /// `cfg_edge(P, Q)`: control may flow from `P` to `Q`
    pub cfg_edge: Vec<(Point, Point)>,
    /// `loan_issued_at(O, L, P)`
    pub loan_issued_at: Vec<(Origin, Loan, Point)>,
    /// `subset(O1, O2, P)`: `O1` flows into `O2` at `P`
    pub subset_base: Vec<(Origin, Origin, Point)>,
    /// `var_used_at(V, P)`
    pub var_used_at: Vec<(Var, Point)>,
    /// `var_defined_at(V, P)`: `V` is overwritten, ending its old value
    pub var_defined_at: Vec<(Var, Point)>,
    /// `use_of_var_derefs_origin(V, O)`
    pub use_of_var_derefs_origin: Vec<(Var, Origin)>,
    /// `loan_invalidated_at(L, P)`, derived from the accesses
    pub loan_invalidated_at: Vec<(Loan, Point)>,
    /// Owner of each origin
    pub origins: IndexMap<Origin, OriginKind>,
    /// Issued loans
    pub loans: IndexMap<Loan, LoanData>,
    /// Accesses in walk order
    pub accesses: Vec<AccessFact>,
    /// Conflicting access and loan pairs
    pub invalidations: Vec<Invalidation>,
    points: u32,
}

impl FactTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a point with no edges.
    pub fn fresh_point(&mut self) -> Point {
        let point = Point(self.points);
        self.points += 1;
        point
    }

    /// Number of points allocated.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.points as usize
    }

    /// Allocates a variable together with its origin.
    pub fn fresh_var(&mut self, kind: OriginKind) -> (Var, Origin) {
        let index = self.origins.len() as u32;
        let (var, origin) = (Var(index), Origin(index));
        self.origins.insert(origin, kind);
        self.use_of_var_derefs_origin.push((var, origin));
        (var, origin)
    }

    /// The origin held by `var`.
    #[must_use]
    pub fn origin_of(&self, var: Var) -> Origin {
        Origin(var.0)
    }

    /// The variable owning `origin`.
    #[must_use]
    pub fn var_of(&self, origin: Origin) -> Var {
        Var(origin.0)
    }

    /// Adds `cfg_edge(from, to)`.
    pub fn add_edge(&mut self, from: Point, to: Point) {
        self.cfg_edge.push((from, to));
    }

    /// Adds `subset(sub, sup, point)`. Self-subsets are dropped.
    pub fn add_subset(&mut self, sub: Origin, sup: Origin, point: Point) {
        if sub != sup {
            self.subset_base.push((sub, sup, point));
        }
    }

    /// Adds `var_used_at(var, point)`.
    pub fn use_var(&mut self, var: Var, point: Point) {
        self.var_used_at.push((var, point));
    }

    /// Adds `var_defined_at(var, point)`.
    pub fn define_var(&mut self, var: Var, point: Point) {
        self.var_defined_at.push((var, point));
    }

    /// Records a loan and its `loan_issued_at` fact.
    pub fn issue_loan(&mut self, data: LoanData) -> Loan {
        let loan = Loan(self.loans.len() as u32);
        self.loan_issued_at.push((data.origin, loan, data.issued_at));
        self.loans.insert(loan, data);
        loan
    }

    /// Records an access to a place.
    pub fn record_access(&mut self, access: AccessFact) {
        self.accesses.push(access);
    }

    /// Pairs every access with the loans it conflicts with.
    ///
    /// Runs after the walk so a loan issued later in the body, and reaching
    /// an earlier access through a loop back edge, is still paired. Accesses
    /// to a reference binding itself never invalidate loans taken through it.
    pub fn compute_invalidations(&mut self) {
        self.invalidations.clear();
        for access in &self.accesses {
            for (id, loan) in &self.loans {
                if access.issued == Some(*id) || !places_overlap(&loan.place, &access.place) {
                    continue;
                }
                if access.checked_from.is_some_and(|floor| *id < floor) {
                    continue;
                }
                if loan.place.has_deref() && !access.place.has_deref() {
                    continue;
                }
                let Some(mut kind) = access.access.conflict(loan.kind) else {
                    continue;
                };
                if access.capture.is_some() {
                    kind = ErrorKind::ClosureCaptureConflict;
                }
                self.invalidations.push(Invalidation {
                    loan: *id,
                    point: access.point,
                    access: access.access,
                    kind,
                    span: access.span,
                    desc: access.desc.clone(),
                    capture: access.capture,
                });
            }
        }
        self.loan_invalidated_at = self
            .invalidations
            .iter()
            .map(|invalidation| (invalidation.loan, invalidation.point))
            .collect();
        self.loan_invalidated_at.sort_unstable();
        self.loan_invalidated_at.dedup();
    }

    /// Renders the table as pretty-printed JSON, for debugging.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; the table itself always serializes.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tml_borrow_check::Projection;
    use tml_span::{FileId, Span};

    fn span(start: u32) -> FileSpan {
        FileSpan::new(FileId(0), Span::new(start, start + 1))
    }

    fn loan(facts: &mut FactTable, place: Place, kind: LoanKind, at: Point) -> Loan {
        let (_, origin) = facts.fresh_var(OriginKind::Temporary);
        facts.issue_loan(LoanData {
            place,
            kind,
            span: span(0),
            origin,
            issued_at: at,
            desc: String::from("x"),
        })
    }

    fn access(facts: &mut FactTable, place: Place, access: Access, at: Point, issued: Option<Loan>) {
        facts.record_access(AccessFact {
            place,
            access,
            point: at,
            span: span(at.0),
            desc: String::from("x"),
            issued,
            capture: None,
            checked_from: None,
        });
    }

    #[test]
    fn test_vars_and_origins_pair_up() {
        let mut facts = FactTable::new();
        let (v0, o0) = facts.fresh_var(OriginKind::Return);
        let (v1, o1) = facts.fresh_var(OriginKind::Temporary);

        assert_eq!(facts.origin_of(v1), o1);
        assert_eq!(facts.var_of(o0), v0);
        assert_eq!(facts.use_of_var_derefs_origin, [(v0, o0), (v1, o1)]);
        assert_eq!(facts.origins[&o0], OriginKind::Return);

        facts.add_subset(o0, o0, Point(0));
        assert!(facts.subset_base.is_empty());
    }

    #[test]
    fn test_invalidations_skip_own_loan() {
        let mut facts = FactTable::new();
        let (p0, p1) = (facts.fresh_point(), facts.fresh_point());
        let x = Place::from_root(PlaceId(0));
        let unique = loan(&mut facts, x.clone(), LoanKind::Unique, p0);
        access(&mut facts, x.clone(), Access::Borrow(LoanKind::Unique), p0, Some(unique));
        access(&mut facts, x, Access::Read, p1, None);
        facts.compute_invalidations();

        assert_eq!(facts.loan_invalidated_at, [(unique, p1)]);
        assert_eq!(facts.invalidations[0].kind, ErrorKind::ConflictingSharedMutableBorrow);
    }

    #[test]
    fn test_reference_binding_accesses_keep_reborrows() {
        let mut facts = FactTable::new();
        let p0 = facts.fresh_point();
        let r = Place::from_root(PlaceId(3));
        loan(&mut facts, r.project(Projection::Deref), LoanKind::Shared, p0);
        access(&mut facts, r.clone(), Access::Write, p0, None);
        access(&mut facts, r, Access::StorageDead, p0, None);
        facts.compute_invalidations();

        assert!(facts.invalidations.is_empty());
    }

    #[test]
    fn test_closure_accesses() {
        let mut facts = FactTable::new();
        let (p0, p1) = (facts.fresh_point(), facts.fresh_point());
        let x = Place::from_root(PlaceId(0));
        let outer = loan(&mut facts, x.clone(), LoanKind::Unique, p0);
        let inner = loan(&mut facts, x.clone(), LoanKind::Shared, p1);
        // A write in a closure body only answers for loans taken in the body
        facts.record_access(AccessFact {
            place: x.clone(),
            access: Access::Write,
            point: p1,
            span: span(1),
            desc: String::from("x"),
            issued: None,
            capture: None,
            checked_from: Some(inner),
        });
        facts.record_access(AccessFact {
            place: x,
            access: Access::Move,
            point: p1,
            span: span(2),
            desc: String::from("x"),
            issued: None,
            capture: Some(CaptureKind::ByMove),
            checked_from: None,
        });
        facts.compute_invalidations();

        let pairs: Vec<_> = facts
            .invalidations
            .iter()
            .map(|inv| (inv.loan, inv.span, inv.kind))
            .collect();
        assert_eq!(
            pairs,
            [
                (inner, span(1), ErrorKind::AssignWhileBorrowed),
                (outer, span(2), ErrorKind::ClosureCaptureConflict),
                (inner, span(2), ErrorKind::ClosureCaptureConflict),
            ]
        );
    }

    #[test]
    fn test_json_dump_names_relations() {
        let mut facts = FactTable::new();
        let (from, to) = (facts.fresh_point(), facts.fresh_point());
        facts.add_edge(from, to);

        let json = facts.to_json().unwrap();
        assert!(json.contains("\"cfg_edge\""));
        assert!(json.contains("\"loan_invalidated_at\""));
    }
}
