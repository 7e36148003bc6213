//! Use-collection pre-scan backing non-lexical lifetimes.
//!
//! Before the forward pass runs, [`LivenessIndex::compute`] numbers every
//! expression of a body in evaluation order and records, per binding, the
//! points where the binding is read. The forward pass then asks whether a
//! binding still has a use at or after the current point, which is exactly
//! the question "is a loan held by this binding still reachable".
//!
//! Calling a binding by name, as with a closure, counts as a use of it.
//!
//! A use inside a loop that does not contain the binding's definition can be
//! reached again on the next iteration, so such a binding is treated as live
//! over the whole extent of the outermost such loop.

use rustc_hash::FxHashMap;
use tml_ast::{
    Body, Expr, ExprId, FuncDecl, PatternId, StmtId,
    visitor::{ExprVisitor, walk_expr, walk_stmt},
};
use tml_intern::Symbol;
use tml_span::FileSpan;

/// Position of an expression in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProgramPoint(pub u32);

#[derive(Debug, Clone, Default)]
struct BindingUses {
    defined_at: ProgramPoint,
    uses: Vec<(ProgramPoint, FileSpan)>,
    /// Loop extents `(start, end)` over which the binding stays live
    loop_extents: Vec<(ProgramPoint, ProgramPoint, FileSpan)>,
}

/// Program points and per-binding uses of one function.
#[derive(Debug, Clone, Default)]
pub struct LivenessIndex {
    points: FxHashMap<ExprId, ProgramPoint>,
    stmt_points: FxHashMap<StmtId, ProgramPoint>,
    bindings: FxHashMap<PatternId, BindingUses>,
}

impl LivenessIndex {
    /// Scans `func` and builds the index.
    #[must_use]
    pub fn compute(func: &FuncDecl) -> Self {
        let mut scan = UseScan {
            index: Self::default(),
            scopes: vec![FxHashMap::default()],
            loops: Vec::new(),
            next: 0,
            target_depth: 0,
        };
        for param in &func.params {
            scan.bind(&func.body, param.pattern);
        }
        scan.visit_expr(&func.body, func.body.root);
        scan.index
    }

    /// Point of an expression. Expressions outside the body map to the entry.
    #[must_use]
    pub fn point_of(&self, expr: ExprId) -> ProgramPoint {
        self.points.get(&expr).copied().unwrap_or_default()
    }

    /// Point at which a `let` statement binds its pattern.
    #[must_use]
    pub fn stmt_point(&self, stmt: StmtId) -> ProgramPoint {
        self.stmt_points.get(&stmt).copied().unwrap_or_default()
    }

    /// Returns `true` if `binding` may still be read at or after `at`.
    #[must_use]
    pub fn is_live_at(&self, binding: PatternId, at: ProgramPoint) -> bool {
        self.bindings.get(&binding).is_some_and(|uses| {
            uses.uses.last().is_some_and(|(last, _)| *last >= at)
                || uses
                    .loop_extents
                    .iter()
                    .any(|(start, end, _)| *start <= at && at <= *end)
        })
    }

    /// The first use of `binding` reachable from `at`.
    #[must_use]
    pub fn next_use(&self, binding: PatternId, at: ProgramPoint) -> Option<(ProgramPoint, FileSpan)> {
        let uses = self.bindings.get(&binding)?;
        uses.uses
            .iter()
            .find(|(point, _)| *point >= at)
            .copied()
            .or_else(|| {
                uses.loop_extents
                    .iter()
                    .find(|(start, end, _)| *start <= at && at <= *end)
                    .map(|(start, _, span)| (*start, *span))
            })
    }

    /// Last straight-line use of `binding`.
    #[must_use]
    pub fn last_use(&self, binding: PatternId) -> Option<ProgramPoint> {
        let uses = self.bindings.get(&binding)?;
        let straight = uses.uses.last().map(|(point, _)| *point);
        let looped = uses.loop_extents.iter().map(|(_, end, _)| *end).max();
        straight.max(looped)
    }

    /// Where `binding` was defined.
    #[must_use]
    pub fn defined_at(&self, binding: PatternId) -> Option<ProgramPoint> {
        self.bindings.get(&binding).map(|uses| uses.defined_at)
    }
}

struct LoopFrame {
    start: ProgramPoint,
    carried: Vec<(PatternId, FileSpan)>,
}

struct UseScan {
    index: LivenessIndex,
    scopes: Vec<FxHashMap<Symbol, PatternId>>,
    loops: Vec<LoopFrame>,
    next: u32,
    /// Nonzero while walking the place chain of an assignment target
    target_depth: u32,
}

impl UseScan {
    fn bind(&mut self, body: &Body, pattern: PatternId) {
        let defined_at = ProgramPoint(self.next);
        for binding in body.bindings(pattern) {
            if let tml_ast::Pattern::Binding { name, .. } = &body.patterns[binding] {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(*name, binding);
                }
                self.index.bindings.insert(
                    binding,
                    BindingUses {
                        defined_at,
                        ..BindingUses::default()
                    },
                );
            }
        }
    }

    fn resolve(&self, name: Symbol) -> Option<PatternId> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name).copied())
    }

    fn record_use(&mut self, binding: PatternId, at: ProgramPoint, span: FileSpan) {
        let Some(uses) = self.index.bindings.get_mut(&binding) else {
            return;
        };
        uses.uses.push((at, span));
        let defined_at = uses.defined_at;
        if let Some(frame) = self.loops.iter_mut().find(|frame| frame.start > defined_at) {
            frame.carried.push((binding, span));
        }
    }

    fn scoped(&mut self, run: impl FnOnce(&mut Self)) {
        self.scopes.push(FxHashMap::default());
        run(self);
        self.scopes.pop();
    }

    fn in_loop(&mut self, run: impl FnOnce(&mut Self)) {
        self.loops.push(LoopFrame {
            start: ProgramPoint(self.next),
            carried: Vec::new(),
        });
        run(self);
    }

    fn close_loop(&mut self, end: ProgramPoint) {
        let Some(frame) = self.loops.pop() else {
            return;
        };
        for (binding, span) in frame.carried {
            if let Some(uses) = self.index.bindings.get_mut(&binding) {
                uses.loop_extents.push((frame.start, end, span));
            }
        }
    }

    /// Walks the place chain on the left of `=`. Naming a binding there
    /// overwrites it, so only index operands and deref operands count as uses.
    fn visit_target(&mut self, body: &Body, expr: ExprId) {
        match &body.exprs[expr] {
            Expr::Ident { .. } => {}
            Expr::Field { base, .. } => self.visit_target(body, *base),
            Expr::Index { base, index, .. } => {
                self.visit_target(body, *base);
                self.visit_expr(body, *index);
            }
            _ => {
                self.visit_expr(body, expr);
                return;
            }
        }
        self.target_depth += 1;
        self.leave_expr(body, expr);
        self.target_depth -= 1;
    }
}

impl ExprVisitor for UseScan {
    fn visit_expr(&mut self, body: &Body, expr: ExprId) {
        match &body.exprs[expr] {
            Expr::Block { .. } => self.scoped(|scan| walk_expr(scan, body, expr)),
            Expr::Assign { target, value, .. } => {
                self.visit_expr(body, *value);
                self.visit_target(body, *target);
                self.leave_expr(body, expr);
            }
            Expr::Loop { body: inner, .. } => {
                self.in_loop(|scan| scan.visit_expr(body, *inner));
                self.leave_expr(body, expr);
            }
            Expr::While { condition, body: inner, .. } => {
                self.in_loop(|scan| {
                    scan.visit_expr(body, *condition);
                    scan.visit_expr(body, *inner);
                });
                self.leave_expr(body, expr);
            }
            Expr::For {
                pattern,
                iterable,
                body: inner,
                ..
            } => {
                self.visit_expr(body, *iterable);
                self.in_loop(|scan| {
                    scan.scoped(|scan| {
                        scan.bind(body, *pattern);
                        scan.visit_expr(body, *inner);
                    });
                });
                self.leave_expr(body, expr);
            }
            Expr::When { scrutinee, arms, .. } => {
                self.visit_expr(body, *scrutinee);
                for arm in arms {
                    self.scoped(|scan| {
                        scan.bind(body, arm.pattern);
                        if let Some(guard) = arm.guard {
                            scan.visit_expr(body, guard);
                        }
                        scan.visit_expr(body, arm.body);
                    });
                }
                self.leave_expr(body, expr);
            }
            Expr::Closure {
                params, body: inner, ..
            } => {
                self.scoped(|scan| {
                    for param in params {
                        scan.bind(body, param.pattern);
                    }
                    scan.visit_expr(body, *inner);
                });
                self.leave_expr(body, expr);
            }
            _ => walk_expr(self, body, expr),
        }
    }

    fn visit_stmt(&mut self, body: &Body, stmt: StmtId) {
        walk_stmt(self, body, stmt);
        if matches!(body.stmts[stmt], tml_ast::Stmt::Let { .. }) {
            self.index.stmt_points.insert(stmt, ProgramPoint(self.next));
            self.next += 1;
        }
    }

    fn visit_pattern(&mut self, body: &Body, pattern: PatternId) {
        self.bind(body, pattern);
    }

    fn leave_expr(&mut self, body: &Body, expr: ExprId) {
        let point = ProgramPoint(self.next);
        self.next += 1;
        self.index.points.insert(expr, point);
        if matches!(body.exprs[expr], Expr::Loop { .. } | Expr::While { .. } | Expr::For { .. }) {
            self.close_loop(point);
        }
        if self.target_depth > 0 {
            return;
        }
        // Calling a closure binding reads it
        if let Expr::Ident { name: callee, span } | Expr::Call { callee, span, .. } = &body.exprs[expr] {
            if let Some(binding) = self.resolve(*callee) {
                self.record_use(binding, point, *span);
            }
        }
    }
}
