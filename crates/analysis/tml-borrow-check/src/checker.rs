//! Forward borrow checking with non-lexical lifetimes.
//!
//! The checker walks a function body once, in evaluation order, keeping the
//! ownership state of every binding in a [`BorrowEnv`] and every loan in a
//! [`LoanSet`]. Whether a loan still matters at a given point is answered by
//! the [`LivenessIndex`] computed up front: a loan is live while an open
//! statement or call pins it, or while a binding holding it is used again.
//!
//! Branches are checked one after another from the same entry state and
//! their exit states are merged. Loan liveness stays linear in source order,
//! so a loan used in one branch is considered live in the branches checked
//! before it.
//!
//! A closure body is checked where the closure is created, against the state
//! its captures see. The captures themselves become loans or moves held by
//! the closure value, so they stay in force for as long as the closure is
//! used.

use std::mem;

use log::{debug, trace};
use tml_ast::{
    Body, Expr, ExprId, FuncDecl, Param, Pattern, PatternId, ReceiverMode, Stmt, StmtId, Ty, WhenArm,
};
use tml_intern::Symbol;
use tml_span::{FileSpan, Span};

use crate::{
    BorrowCheckBackend, CheckContext,
    capture::{Capture, CaptureKind, analyze_captures},
    env::{Availability, BorrowEnv, PlaceState, StateSnapshot},
    error::{BorrowError, CheckResult, InternalError},
    liveness::{LivenessIndex, ProgramPoint},
    loans::{LoanId, LoanKind, LoanSet},
    place::{Place, PlaceId, ResolvedPlace, may_hold_ref, resolve_place},
    two_phase::TwoPhaseBorrow,
};

/// The NLL backend.
///
/// ```rust
/// use tml_ast::BodyBuilder;
/// use tml_borrow_check::{BorrowCheckBackend, BorrowCheckConfig, CheckContext, NllChecker};
/// use tml_intern::Interner;
/// use tml_span::FileId;
/// use tml_types::TypeTableBuilder;
///
/// let interner = Interner::new();
/// let types = TypeTableBuilder::new(&interner).build();
/// let config = BorrowCheckConfig::default();
/// let cx = CheckContext::new(&types, &interner, &config);
///
/// let mut b = BodyBuilder::new(&interner, FileId(0));
/// let one = b.int(1);
/// b.let_var("x", false, None, Some(one));
/// let func = b.finish("main", None, None);
///
/// let errors = NllChecker::new().check_function(&func, &cx).unwrap_or_default();
/// assert!(errors.is_empty());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NllChecker {
    track_loans: bool,
}

impl NllChecker {
    /// Full checking: moves, initialisation, mutability and loans.
    #[must_use]
    pub fn new() -> Self {
        Self { track_loans: true }
    }

    /// Move-path checking only. No loans are issued, so no borrow conflict
    /// or outlives error is ever reported.
    #[must_use]
    pub fn moves_only() -> Self {
        Self { track_loans: false }
    }
}

impl Default for NllChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl BorrowCheckBackend for NllChecker {
    fn name(&self) -> &'static str {
        if self.track_loans { "nll" } else { "moves" }
    }

    fn check_function(&self, func: &FuncDecl, cx: &CheckContext<'_>) -> CheckResult {
        let errors = FunctionChecker::new(func, cx, self.track_loans).run()?;
        debug!(
            "{} checked `{}`: {} error(s)",
            self.name(),
            cx.interner.resolve(&func.name),
            errors.len()
        );
        Ok(errors)
    }
}

/// Loans carried by the value of an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Flow {
    /// Loans the value certainly carries
    pub(crate) direct: Vec<LoanId>,
    /// Loans passed into a call whose result may carry them
    pub(crate) via_call: Vec<LoanId>,
    /// Call-carried loans whose owner already went out of scope
    pub(crate) dangling: Vec<Dangling>,
}

/// A loan on a dead block local that may still come back through a call
/// result. It is an error only if the result lands somewhere that can hold
/// a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dangling {
    desc: String,
    borrowed_at: FileSpan,
    dropped_at: FileSpan,
}

impl Flow {
    fn merge(mut self, other: Self) -> Self {
        self.direct.extend(other.direct);
        self.via_call.extend(other.via_call);
        self.dangling.extend(other.dangling);
        self
    }

    fn into_call_result(self) -> Self {
        let mut via_call = self.direct;
        via_call.extend(self.via_call);
        Self {
            direct: Vec::new(),
            via_call,
            dangling: self.dangling,
        }
    }

    /// Loans a binding of type `ty` adopts from this value.
    fn adopted_by(&self, ty: &Ty) -> Vec<LoanId> {
        let mut loans = self.direct.clone();
        if ty.contains_ref() {
            loans.extend(&self.via_call);
        }
        loans.sort_unstable();
        loans.dedup();
        loans
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Statement,
    Call,
    Loop,
}

/// Keeps temporary loans alive until a statement or call completes.
#[derive(Debug)]
struct TempFrame {
    kind: FrameKind,
    site: FileSpan,
    pinned: Vec<LoanId>,
    created: Vec<LoanId>,
    two_phase: Vec<TwoPhaseBorrow>,
}

#[derive(Debug, Default)]
struct LoopExits {
    breaks: Vec<StateSnapshot>,
    continues: Vec<StateSnapshot>,
}

/// Per-function checking state.
pub(crate) struct FunctionChecker<'a> {
    pub(crate) func: &'a FuncDecl,
    pub(crate) body: &'a Body,
    pub(crate) cx: &'a CheckContext<'a>,
    pub(crate) track_loans: bool,
    pub(crate) liveness: LivenessIndex,
    pub(crate) env: BorrowEnv,
    pub(crate) loans: LoanSet,
    frames: Vec<TempFrame>,
    loops: Vec<LoopExits>,
    reachable: bool,
    /// Nesting depth of closure bodies being checked
    closure_depth: u32,
    errors: Vec<BorrowError>,
}

impl<'a> FunctionChecker<'a> {
    pub(crate) fn new(func: &'a FuncDecl, cx: &'a CheckContext<'a>, track_loans: bool) -> Self {
        Self {
            func,
            body: &func.body,
            cx,
            track_loans,
            liveness: LivenessIndex::compute(func),
            env: BorrowEnv::new(),
            loans: LoanSet::new(),
            frames: Vec::new(),
            loops: Vec::new(),
            reachable: true,
            closure_depth: 0,
            errors: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> CheckResult {
        self.env.push_scope();
        self.open_frame(FrameKind::Statement, self.func.span);
        let func = self.func;
        for param in &func.params {
            self.bind_pattern(param.pattern, &param.ty, None, true)?;
        }

        let root = self.body.root;
        let body = self.body;
        match &body.exprs[root] {
            Expr::Block { stmts, tail, .. } => {
                self.eval_block(root, stmts, *tail, true)?;
            }
            _ => {
                let flow = self.eval(root)?;
                self.check_escape(&flow, self.body.expr_span(root))?;
            }
        }

        self.close_frame()?;
        self.pop_scope_checked(root, self.func.span, None)?;
        if self.env.depth() != 0 || !self.frames.is_empty() {
            return Err(InternalError::UnbalancedScopes);
        }
        Ok(self.errors)
    }

    pub(crate) fn report(&mut self, error: BorrowError) {
        trace!("{error}");
        self.errors.push(error);
    }

    pub(crate) fn describe(&self, place: &Place) -> String {
        place.describe(&self.env, self.cx.interner)
    }

    fn point(&self, expr: ExprId) -> ProgramPoint {
        self.liveness.point_of(expr)
    }

    // Temporary frames

    fn open_frame(&mut self, kind: FrameKind, site: FileSpan) {
        self.frames.push(TempFrame {
            kind,
            site,
            pinned: Vec::new(),
            created: Vec::new(),
            two_phase: Vec::new(),
        });
    }

    fn close_frame(&mut self) -> Result<(), InternalError> {
        let frame = self.frames.pop().ok_or(InternalError::UnbalancedScopes)?;
        for id in frame.pinned {
            let loan = self.loans.get_mut(id)?;
            loan.pins = loan.pins.saturating_sub(1);
        }
        if frame.kind != FrameKind::Statement {
            return Ok(());
        }
        for borrow in frame.two_phase {
            self.release_two_phase_borrow(borrow)?;
        }
        for id in frame.created {
            let loan = self.loans.get(id)?;
            if loan.holders.is_empty() && loan.pins == 0 {
                self.release_borrow(id)?;
            }
        }
        Ok(())
    }

    /// Keeps `loan` live until the innermost frame closes.
    pub(crate) fn pin(&mut self, id: LoanId) -> Result<(), InternalError> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        frame.pinned.push(id);
        let consumer = (frame.kind != FrameKind::Statement).then_some(frame.site);
        let loan = self.loans.get_mut(id)?;
        loan.pins += 1;
        if loan.consumed_at.is_none() {
            loan.consumed_at = consumer;
        }
        Ok(())
    }

    /// Records a freshly issued loan with the enclosing statement.
    pub(crate) fn note_created(&mut self, id: LoanId) {
        if let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.kind == FrameKind::Statement)
        {
            frame.created.push(id);
        }
    }

    fn defer_two_phase_release(&mut self, borrow: TwoPhaseBorrow) {
        if let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.kind == FrameKind::Statement)
        {
            frame.two_phase.push(borrow);
        }
    }

    // Holders

    fn adopt(&mut self, holder: PatternId, ty: &Ty, flow: &Flow) -> Result<(), InternalError> {
        for id in flow.adopted_by(ty) {
            let loan = self.loans.get_mut(id)?;
            if !loan.released && !loan.holders.contains(&holder) {
                loan.holders.push(holder);
            }
        }
        Ok(())
    }

    /// Drops `holder`'s claim on every loan it carries, as when the binding
    /// is overwritten.
    fn kill_holder(&mut self, holder: PatternId) -> Result<(), InternalError> {
        let held: Vec<LoanId> = self.loans.held_by(holder).collect();
        for id in held {
            let loan = self.loans.get_mut(id)?;
            loan.holders.retain(|h| *h != holder);
            if loan.holders.is_empty() && loan.pins == 0 {
                self.release_borrow(id)?;
            }
        }
        Ok(())
    }

    /// Loans carried by the value stored in `resolved`.
    fn place_flow(&self, resolved: &ResolvedPlace) -> Flow {
        if !may_hold_ref(&resolved.ty) {
            return Flow::default();
        }
        let direct = self
            .env
            .record(resolved.place.root)
            .ok()
            .and_then(|record| record.pattern)
            .map(|pattern| self.loans.held_by(pattern).collect())
            .unwrap_or_default();
        Flow {
            direct,
            ..Flow::default()
        }
    }

    /// Reports the dangling loans of `flow` if a value of type `ty` keeps
    /// them.
    fn settle_dangling(&mut self, flow: &Flow, ty: &Ty) {
        if !ty.contains_ref() {
            return;
        }
        for dangling in &flow.dangling {
            self.report(BorrowError::outlives_owner(
                &dangling.desc,
                dangling.borrowed_at,
                dangling.dropped_at,
            ));
        }
    }

    // Patterns

    fn bind_pattern(
        &mut self,
        pattern: PatternId,
        ty: &Ty,
        flow: Option<&Flow>,
        initialized: bool,
    ) -> Result<(), InternalError> {
        let body = self.body;
        match &body.patterns[pattern] {
            Pattern::Binding { name, mutable, span } => {
                let id = self
                    .env
                    .define(*name, *mutable, ty.clone(), *span, Some(pattern));
                if !initialized {
                    self.env.set_state(id, PlaceState::Uninitialized)?;
                }
                if let Some(flow) = flow {
                    self.adopt(pattern, ty, flow)?;
                }
            }
            Pattern::Tuple { patterns, .. } => {
                for (idx, sub) in patterns.iter().enumerate() {
                    let elem = match ty {
                        Ty::Tuple(elems) => elems.get(idx).cloned().unwrap_or(Ty::Unknown),
                        _ => Ty::Unknown,
                    };
                    self.bind_pattern(*sub, &elem, flow, initialized)?;
                }
            }
            Pattern::Struct { fields, .. } => {
                for (field, sub) in fields {
                    let field_ty = self.cx.types.field_type(ty, *field).unwrap_or(Ty::Unknown);
                    self.bind_pattern(*sub, &field_ty, flow, initialized)?;
                }
            }
            Pattern::Variant { sub_patterns, .. } => {
                for sub in sub_patterns {
                    self.bind_pattern(*sub, &Ty::Unknown, flow, initialized)?;
                }
            }
            Pattern::Wildcard { .. } | Pattern::Literal { .. } => {}
        }
        Ok(())
    }

    // Statements and blocks

    fn check_stmt(&mut self, stmt: StmtId) -> Result<(), InternalError> {
        let span = self.body.stmts[stmt].span();
        self.open_frame(FrameKind::Statement, span);
        let body = self.body;
        match &body.stmts[stmt] {
            Stmt::Let {
                pattern,
                ty,
                initializer,
                ..
            } => {
                let ty = ty.clone().unwrap_or(Ty::Unknown);
                match initializer {
                    Some(init) => {
                        let flow = self.eval(*init)?;
                        self.settle_dangling(&flow, &ty);
                        self.bind_pattern(*pattern, &ty, Some(&flow), true)?;
                    }
                    None => self.bind_pattern(*pattern, &ty, None, false)?,
                }
            }
            Stmt::Expr { expr, .. } => {
                self.eval(*expr)?;
            }
        }
        self.close_frame()
    }

    fn eval_block(
        &mut self,
        block: ExprId,
        stmts: &[StmtId],
        tail: Option<ExprId>,
        is_root: bool,
    ) -> Result<Flow, InternalError> {
        self.env.push_scope();
        for stmt in stmts {
            self.check_stmt(*stmt)?;
        }
        let mut flow = match tail {
            Some(tail) => self.eval(tail)?,
            None => Flow::default(),
        };
        if is_root {
            if let Some(tail) = tail {
                if self.reachable {
                    self.check_escape(&flow, self.body.expr_span(tail))?;
                }
            }
            self.pop_scope_checked(block, self.body.expr_span(block), None)?;
        } else {
            self.pop_scope_checked(block, self.body.expr_span(block), Some(&mut flow))?;
        }
        Ok(flow)
    }

    /// Closes a scope, reporting partially moved values that need drop and
    /// loans on dying places that are still reachable.
    ///
    /// A loan the block's value holds directly escapes the block. A loan it
    /// only passed into a call is recorded as dangling on `tail` and left to
    /// whoever receives the value.
    fn pop_scope_checked(
        &mut self,
        block: ExprId,
        end: FileSpan,
        mut tail: Option<&mut Flow>,
    ) -> Result<(), InternalError> {
        let at = self.point(block);
        let end = FileSpan::new(end.file, Span::new(end.span.end, end.span.end));
        for id in self.env.pop_scope()? {
            let record = self.env.record(id)?;
            if matches!(record.state, PlaceState::PartiallyMoved { .. })
                && self.cx.types.type_needs_drop(&record.ty)
            {
                let moved_at = record.move_sites.values().next().copied().unwrap_or(record.span);
                let name = self.env.name_of(id, self.cx.interner);
                self.report(BorrowError::invalid_partial_drop(&name, end, moved_at));
            }

            for loan_id in self.loans.on_root(id).collect::<Vec<_>>() {
                let loan = self.loans.get(loan_id)?;
                if loan.released || loan.place.has_deref() {
                    continue;
                }
                let in_tail = tail.as_ref().is_some_and(|flow| flow.direct.contains(&loan_id));
                let via_tail_call = tail.as_ref().is_some_and(|flow| flow.via_call.contains(&loan_id));
                let later_use = loan
                    .holders
                    .iter()
                    .filter(|holder| self.liveness.is_live_at(**holder, at))
                    .find_map(|holder| self.liveness.next_use(*holder, at));
                let (loan_span, place) = (loan.span, loan.place.clone());
                if in_tail || later_use.is_some() {
                    let desc = self.describe(&place);
                    let mut error = BorrowError::outlives_owner(&desc, loan_span, end);
                    if let Some((_, span)) = later_use {
                        error = error.with_related(span, "borrow later used here");
                    }
                    self.report(error);
                } else if via_tail_call && let Some(flow) = tail.as_mut() {
                    flow.dangling.push(Dangling {
                        desc: self.describe(&place),
                        borrowed_at: loan_span,
                        dropped_at: end,
                    });
                }
                self.release_borrow(loan_id)?;
            }
        }
        Ok(())
    }

    /// Reports loans on locals that escape through the return value.
    fn check_escape(&mut self, flow: &Flow, span: FileSpan) -> Result<(), InternalError> {
        if !self.track_loans || self.closure_depth > 0 {
            return Ok(());
        }
        let ret_ty = self.func.ret_ty.clone().unwrap_or(Ty::Unknown);
        self.settle_dangling(flow, &ret_ty);
        for id in flow.adopted_by(&ret_ty) {
            let loan = self.loans.get(id)?;
            if loan.place.has_deref() {
                continue;
            }
            let (loan_span, root) = (loan.span, Place::from_root(loan.place.root));
            let desc = self.describe(&root);
            self.report(BorrowError::returns_local_ref(&desc, span, loan_span));
        }
        Ok(())
    }

    // Expressions

    /// Evaluates `expr` for its value. Place expressions are consumed.
    fn eval(&mut self, expr: ExprId) -> Result<Flow, InternalError> {
        let span = self.body.expr_span(expr);
        let at = self.point(expr);
        let body = self.body;
        match &body.exprs[expr] {
            Expr::Literal { .. } => Ok(Flow::default()),
            Expr::Break { .. } | Expr::Continue { .. } => {
                self.eval_jump(expr);
                Ok(Flow::default())
            }
            Expr::Ident { .. } | Expr::Field { .. } | Expr::Index { .. } | Expr::Deref { .. } => {
                match self.resolve(expr)? {
                    Some(resolved) => {
                        self.consume_place(&resolved, span, at)?;
                        Ok(self.place_flow(&resolved))
                    }
                    None => self.eval_children(expr),
                }
            }
            Expr::Ref { mutable, operand, .. } => self.eval_ref(*operand, *mutable, span, at),
            Expr::Call { callee, args, .. } => self.eval_call(*callee, args, span, at),
            Expr::MethodCall {
                receiver,
                args,
                receiver_mode,
                ..
            } => self.eval_method_call(*receiver, args, *receiver_mode, span, at),
            Expr::Binary { lhs, rhs, .. } => {
                self.eval_read(*lhs)?;
                self.eval_read(*rhs)?;
                Ok(Flow::default())
            }
            Expr::Unary { operand, .. } => {
                self.eval_read(*operand)?;
                Ok(Flow::default())
            }
            Expr::Assign { target, value, .. } => {
                self.eval_assign(*target, *value, span, at)?;
                Ok(Flow::default())
            }
            Expr::Block { stmts, tail, .. } => self.eval_block(expr, stmts, *tail, false),
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => self.eval_if(*condition, *then_branch, *else_branch),
            Expr::When { scrutinee, arms, .. } => self.eval_when(*scrutinee, arms, span),
            Expr::Loop { .. } | Expr::While { .. } | Expr::For { .. } => {
                self.eval_loop(expr)?;
                Ok(Flow::default())
            }
            Expr::Return { value, .. } => {
                if let Some(value) = value {
                    let flow = self.eval(*value)?;
                    self.check_escape(&flow, self.body.expr_span(*value))?;
                }
                self.reachable = false;
                Ok(Flow::default())
            }
            Expr::Tuple { elements, .. } | Expr::Array { elements, .. } => {
                let mut flow = Flow::default();
                for element in elements {
                    flow = flow.merge(self.eval(*element)?);
                }
                Ok(flow)
            }
            Expr::StructLit { fields, .. } => {
                let mut flow = Flow::default();
                for (_, value) in fields {
                    flow = flow.merge(self.eval(*value)?);
                }
                Ok(flow)
            }
            Expr::Closure { params, body: inner, .. } => self.eval_closure(expr, params, *inner, span, at),
        }
    }

    /// Evaluates `expr` for inspection only. Place expressions are read,
    /// never moved.
    fn eval_read(&mut self, expr: ExprId) -> Result<Flow, InternalError> {
        match self.resolve(expr)? {
            Some(resolved) => {
                self.read_place(&resolved, self.body.expr_span(expr), self.point(expr))?;
                Ok(self.place_flow(&resolved))
            }
            None => self.eval(expr),
        }
    }

    /// Resolves a place expression and evaluates its index operands.
    fn resolve(&mut self, expr: ExprId) -> Result<Option<ResolvedPlace>, InternalError> {
        let Some(resolved) = resolve_place(self.body, expr, &self.env, self.cx.types) else {
            return Ok(None);
        };
        for index in &resolved.index_operands {
            self.eval(*index)?;
        }
        Ok(Some(resolved))
    }

    /// Evaluates the sub-expressions of a place form whose root is not a
    /// binding, such as a field of a call result.
    fn eval_children(&mut self, expr: ExprId) -> Result<Flow, InternalError> {
        let body = self.body;
        match &body.exprs[expr] {
            Expr::Field { base, .. } | Expr::Deref { operand: base, .. } => self.eval(*base),
            Expr::Index { base, index, .. } => {
                let flow = self.eval(*base)?;
                self.eval(*index)?;
                Ok(flow)
            }
            _ => Ok(Flow::default()),
        }
    }

    fn eval_ref(
        &mut self,
        operand: ExprId,
        mutable: bool,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Flow, InternalError> {
        let Some(resolved) = self.resolve(operand)? else {
            return self.eval(operand);
        };
        let kind = if mutable { LoanKind::Unique } else { LoanKind::Shared };
        let mut flow = Flow::default();
        if let Some(loan) = self.create_borrow(&resolved, kind, span, at)? {
            flow.direct.push(loan);
        }
        if resolved.place.has_deref() {
            flow = flow.merge(self.place_flow(&resolved_root(&resolved)));
        }
        Ok(flow)
    }

    fn eval_call(
        &mut self,
        callee: Symbol,
        args: &[ExprId],
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Flow, InternalError> {
        self.open_frame(FrameKind::Call, span);
        let mut flow = Flow::default();
        // Calling a closure binding reads it
        if let Some(root) = self.env.lookup(callee) {
            let resolved = ResolvedPlace::of_root(&self.env, root);
            self.read_place(&resolved, span, at)?;
            let callee_flow = self.place_flow(&resolved);
            for loan in &callee_flow.direct {
                self.pin(*loan)?;
            }
            flow = flow.merge(callee_flow);
        }
        for arg in args {
            let arg_flow = self.eval(*arg)?;
            for loan in &arg_flow.direct {
                self.pin(*loan)?;
            }
            flow = flow.merge(arg_flow);
        }
        self.close_frame()?;
        Ok(flow.into_call_result())
    }

    fn receiver_place(&mut self, receiver: ExprId) -> Result<Option<ResolvedPlace>, InternalError> {
        Ok(self.resolve(receiver)?.map(|resolved| {
            if resolved.ty.is_ref() {
                resolved.deref()
            } else {
                resolved
            }
        }))
    }

    fn eval_method_call(
        &mut self,
        receiver: ExprId,
        args: &[ExprId],
        mode: ReceiverMode,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Flow, InternalError> {
        self.open_frame(FrameKind::Call, span);
        let mut flow = Flow::default();
        let mut two_phase = None;
        let recv_span = self.body.expr_span(receiver);
        let recv_at = self.point(receiver);

        match mode {
            ReceiverMode::Value => {
                let recv_flow = self.eval(receiver)?;
                for loan in &recv_flow.direct {
                    self.pin(*loan)?;
                }
                flow = flow.merge(recv_flow);
            }
            ReceiverMode::Ref | ReceiverMode::MutRef => match self.receiver_place(receiver)? {
                Some(resolved) => {
                    let loan = if mode == ReceiverMode::Ref {
                        self.create_borrow(&resolved, LoanKind::Shared, recv_span, recv_at)?
                    } else if self.cx.config.two_phase_borrows && self.track_loans {
                        two_phase = self.begin_two_phase_borrow(&resolved, recv_span, recv_at)?;
                        two_phase.as_ref().map(TwoPhaseBorrow::loan)
                    } else {
                        self.create_borrow(&resolved, LoanKind::Unique, recv_span, recv_at)?
                    };
                    flow.direct.extend(loan);
                    if resolved.place.has_deref() {
                        flow = flow.merge(self.place_flow(&resolved_root(&resolved)));
                    }
                }
                None => flow = flow.merge(self.eval(receiver)?),
            },
        }

        for arg in args {
            let arg_flow = self.eval(*arg)?;
            for loan in &arg_flow.direct {
                self.pin(*loan)?;
            }
            flow = flow.merge(arg_flow);
        }

        if let Some(mut borrow) = two_phase {
            self.end_two_phase_borrow(&mut borrow, span, at)?;
            self.defer_two_phase_release(borrow);
        }
        self.close_frame()?;
        Ok(flow.into_call_result())
    }

    fn eval_assign(
        &mut self,
        target: ExprId,
        value: ExprId,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<(), InternalError> {
        let flow = self.eval(value)?;
        let Some(resolved) = self.resolve(target)? else {
            self.eval(target)?;
            return Ok(());
        };
        if !self.assign_place(&resolved, span, at)? {
            return Ok(());
        }
        if resolved.place.has_deref() {
            return Ok(());
        }
        let record = self.env.record(resolved.place.root)?;
        let (pattern, ty) = (record.pattern, record.ty.clone());
        self.settle_dangling(&flow, &ty);
        if let Some(pattern) = pattern {
            if resolved.place.is_root() {
                self.kill_holder(pattern)?;
            }
            self.adopt(pattern, &ty, &flow)?;
        }
        if resolved.place.is_root() {
            let record = self.env.record(resolved.place.root)?;
            if matches!(record.state, PlaceState::Moved | PlaceState::Uninitialized) {
                trace!("reinitialize {}", resolved.place.root);
                self.env.set_state(resolved.place.root, PlaceState::Owned)?;
            }
        }
        Ok(())
    }

    // Closures

    fn eval_closure(
        &mut self,
        closure: ExprId,
        params: &[Param],
        inner: ExprId,
        span: FileSpan,
        at: ProgramPoint,
    ) -> Result<Flow, InternalError> {
        let captures = analyze_captures(self.body, closure, &self.env, self.cx.types);
        let mut admitted = Vec::new();
        for capture in &captures {
            if self.validate_capture(capture, at)? {
                admitted.push(capture);
            }
        }
        self.check_closure_body(params, inner, span, &captures)?;

        let mut flow = Flow::default();
        for capture in admitted {
            flow = flow.merge(self.apply_capture(capture, at)?);
        }
        Ok(flow)
    }

    /// Reports a capture of a moved binding, or one that a live loan
    /// forbids. Returns `false` if an error was reported.
    fn validate_capture(&mut self, capture: &Capture, at: ProgramPoint) -> Result<bool, InternalError> {
        let place = Place::from_root(capture.root);
        match self.env.availability(&place)? {
            Availability::Available => {}
            Availability::Uninitialized => {
                self.check_use(&place, capture.span, false)?;
                return Ok(false);
            }
            Availability::Moved | Availability::PartiallyMoved => {
                let moved_at = self.env.move_site(&place).map_or(capture.span, |(_, span)| span);
                let desc = self.describe(&place);
                self.report(BorrowError::closure_captures_moved(&desc, capture.span, moved_at));
                return Ok(false);
            }
        }
        if !self.track_loans {
            return Ok(true);
        }
        let conflict = self
            .loans
            .find_conflict(&place, capture.kind.access(), &self.liveness, at, None)
            .map(|(loan, _)| (loan.span, loan.later_use(&self.liveness, at)));
        let Some((loan_span, later_use)) = conflict else {
            return Ok(true);
        };
        let desc = self.describe(&place);
        self.report(
            BorrowError::closure_capture_conflict(&desc, capture.kind, capture.span, loan_span)
                .with_later_use(later_use),
        );
        Ok(false)
    }

    /// Checks a closure body as if it ran where the closure is created.
    ///
    /// Captured bindings were judged by the capture itself, so inside the
    /// body they count as owned and the loans already held on them are set
    /// aside. Moves and control flow inside the body do not leak into the
    /// enclosing function.
    fn check_closure_body(
        &mut self,
        params: &[Param],
        inner: ExprId,
        span: FileSpan,
        captures: &[Capture],
    ) -> Result<(), InternalError> {
        let suspended: Vec<LoanId> = self
            .loans
            .iter()
            .filter(|loan| !loan.released && captures.iter().any(|capture| capture.root == loan.place.root))
            .map(|loan| loan.id)
            .collect();
        for id in &suspended {
            self.loans.get_mut(*id)?.released = true;
        }
        let entry = self.env.snapshot();
        for capture in captures {
            self.env.set_state(capture.root, PlaceState::Owned)?;
        }
        let loops = mem::take(&mut self.loops);
        let reachable = self.reachable;
        self.closure_depth += 1;

        self.env.push_scope();
        self.open_frame(FrameKind::Statement, span);
        for param in params {
            self.bind_pattern(param.pattern, &param.ty, None, true)?;
        }
        self.eval(inner)?;
        self.close_frame()?;
        self.pop_scope_checked(inner, span, None)?;

        self.closure_depth -= 1;
        self.reachable = reachable;
        self.loops = loops;
        self.env.restore(&entry);
        for id in suspended {
            self.loans.get_mut(id)?.released = false;
        }
        Ok(())
    }

    /// Takes the loan or move a capture needs. The closure value carries
    /// the new loan along with whatever the captured binding carries.
    fn apply_capture(&mut self, capture: &Capture, at: ProgramPoint) -> Result<Flow, InternalError> {
        let resolved = ResolvedPlace::of_root(&self.env, capture.root);
        let mut flow = self.place_flow(&resolved);
        match capture.kind {
            CaptureKind::ByCopy => {}
            CaptureKind::ByMove => self.env.mark_moved(&resolved.place, capture.span)?,
            CaptureKind::ByRef | CaptureKind::ByMutRef => {
                let kind = capture.kind.loan_kind().unwrap_or(LoanKind::Shared);
                // A write to an immutable binding was already reported in the body
                if kind == LoanKind::Unique && !self.env.is_mutable(capture.root) {
                    return Ok(flow);
                }
                if self.track_loans {
                    let loan = self.loans.issue(resolved.place, kind, at, capture.span);
                    self.pin(loan)?;
                    self.note_created(loan);
                    flow.direct.push(loan);
                }
            }
        }
        Ok(flow)
    }

    fn eval_if(
        &mut self,
        condition: ExprId,
        then_branch: ExprId,
        else_branch: Option<ExprId>,
    ) -> Result<Flow, InternalError> {
        self.eval_read(condition)?;
        let entry = self.env.snapshot();
        let reachable_in = self.reachable;
        let mut exits = Vec::new();

        let mut flow = self.eval(then_branch)?;
        if self.reachable {
            exits.push(self.env.snapshot());
        }
        self.env.restore(&entry);
        self.reachable = reachable_in;
        match else_branch {
            Some(else_branch) => {
                flow = flow.merge(self.eval(else_branch)?);
                if self.reachable {
                    exits.push(self.env.snapshot());
                }
            }
            None => exits.push(entry),
        }
        self.join(&exits, reachable_in);
        Ok(flow)
    }

    fn eval_when(&mut self, scrutinee: ExprId, arms: &[WhenArm], span: FileSpan) -> Result<Flow, InternalError> {
        let binds = arms
            .iter()
            .any(|arm| !self.body.bindings(arm.pattern).is_empty());
        let (scrutinee_flow, scrutinee_ty) = match self.resolve(scrutinee)? {
            Some(resolved) => {
                let at = self.point(scrutinee);
                let scrutinee_span = self.body.expr_span(scrutinee);
                if binds {
                    self.consume_place(&resolved, scrutinee_span, at)?;
                } else {
                    self.read_place(&resolved, scrutinee_span, at)?;
                }
                (self.place_flow(&resolved), resolved.ty)
            }
            None => (self.eval(scrutinee)?, Ty::Unknown),
        };

        let entry = self.env.snapshot();
        let reachable_in = self.reachable;
        let mut exits = Vec::new();
        let mut flow = Flow::default();
        for arm in arms {
            self.env.restore(&entry);
            self.reachable = reachable_in;
            self.env.push_scope();
            self.bind_pattern(arm.pattern, &scrutinee_ty, Some(&scrutinee_flow), true)?;
            if let Some(guard) = arm.guard {
                self.eval_read(guard)?;
            }
            let arm_flow = self.eval(arm.body)?;
            self.pop_scope_checked(arm.body, span, None)?;
            flow = flow.merge(arm_flow);
            if self.reachable {
                exits.push(self.env.snapshot());
            }
        }
        if arms.is_empty() {
            exits.push(entry);
        }
        self.join(&exits, reachable_in);
        Ok(flow)
    }

    fn eval_loop(&mut self, expr: ExprId) -> Result<(), InternalError> {
        let span = self.body.expr_span(expr);
        let reachable_in = self.reachable;
        let mut exits = Vec::new();

        self.open_frame(FrameKind::Loop, span);
        let ast = self.body;
        let (body, binding) = match &ast.exprs[expr] {
            Expr::Loop { body, .. } => (*body, None),
            Expr::While { condition, body, .. } => {
                self.eval_read(*condition)?;
                exits.push(self.env.snapshot());
                (*body, None)
            }
            Expr::For {
                pattern,
                iterable,
                body,
                ..
            } => {
                let flow = self.eval(*iterable)?;
                for loan in &flow.direct {
                    self.pin(*loan)?;
                }
                exits.push(self.env.snapshot());
                (*body, Some((*pattern, flow)))
            }
            _ => return self.close_frame(),
        };
        let entry = self.env.snapshot();

        self.loops.push(LoopExits::default());
        if let Some((pattern, flow)) = &binding {
            self.env.push_scope();
            self.bind_pattern(*pattern, &Ty::Unknown, Some(flow), true)?;
        }
        self.eval(body)?;
        if binding.is_some() {
            self.pop_scope_checked(body, span, None)?;
        }
        let loop_exits = self.loops.pop().unwrap_or_default();

        let mut back_edges = loop_exits.continues;
        if self.reachable {
            back_edges.push(self.env.snapshot());
        }
        self.check_moved_in_previous_iteration(&entry, &back_edges)?;

        exits.extend(loop_exits.breaks);
        if !matches!(self.body.exprs[expr], Expr::Loop { .. }) {
            exits.extend(back_edges);
        }
        self.close_frame()?;
        self.join(&exits, reachable_in);
        Ok(())
    }

    fn check_moved_in_previous_iteration(
        &mut self,
        entry: &StateSnapshot,
        back_edges: &[StateSnapshot],
    ) -> Result<(), InternalError> {
        for idx in 0..entry.len() {
            let id = PlaceId(idx as u32);
            if matches!(entry.state(id), Some(PlaceState::Moved | PlaceState::Uninitialized)) {
                continue;
            }
            let moved_at = back_edges.iter().find_map(|path| {
                matches!(path.state(id), Some(PlaceState::Moved))
                    .then(|| path.move_span(id))
                    .flatten()
            });
            if let Some(moved_at) = moved_at {
                let name = self.env.name_of(id, self.cx.interner);
                self.report(BorrowError::moved_in_previous_iteration(&name, moved_at));
            }
        }
        Ok(())
    }

    fn eval_jump(&mut self, expr: ExprId) {
        if !self.reachable {
            return;
        }
        let snapshot = self.env.snapshot();
        if let Some(exits) = self.loops.last_mut() {
            match self.body.exprs[expr] {
                Expr::Break { .. } => exits.breaks.push(snapshot),
                _ => exits.continues.push(snapshot),
            }
        }
        self.reachable = false;
    }

    /// Continues from the merge of the given path states.
    fn join(&mut self, exits: &[StateSnapshot], reachable_in: bool) {
        match BorrowEnv::merge(exits) {
            Some(merged) => {
                self.env.restore(&merged);
                self.reachable = reachable_in;
            }
            None => self.reachable = false,
        }
    }
}

/// The reference a dereferencing place reads through, as a root place.
fn resolved_root(resolved: &ResolvedPlace) -> ResolvedPlace {
    ResolvedPlace {
        place: Place::from_root(resolved.place.root),
        ty: Ty::Unknown,
        through_ref: None,
        index_operands: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BorrowCheckConfig, ErrorKind};
    use tml_ast::{BodyBuilder, PrimTy};
    use tml_intern::Interner;
    use tml_span::FileId;
    use tml_types::{TypeTable, TypeTableBuilder};

    struct Fixture {
        interner: Interner,
        types: TypeTable,
        config: BorrowCheckConfig,
    }

    impl Fixture {
        fn new() -> Self {
            env_logger::builder().is_test(true).try_init().ok();
            let interner = Interner::new();
            let list = Ty::named(interner.intern("List"));
            let token = Ty::named(interner.intern("Token"));
            let mut types = TypeTableBuilder::new(&interner);
            types
                .add_struct("Pair", vec![("first", list.clone()), ("second", list)])
                .add_struct("Token", vec![("id", int())])
                .add_struct("Tokens", vec![("first", token.clone()), ("second", token)])
                .add_enum("Option", vec![("Some", vec![int()]), ("None", vec![])]);
            Self {
                types: types.build(),
                interner,
                config: BorrowCheckConfig::default(),
            }
        }

        fn ty(&self, name: &str) -> Ty {
            Ty::named(self.interner.intern(name))
        }

        fn builder(&self) -> BodyBuilder {
            BodyBuilder::new(&self.interner, FileId(0))
        }

        fn run(&self, checker: NllChecker, func: &FuncDecl) -> Vec<BorrowError> {
            let cx = CheckContext::new(&self.types, &self.interner, &self.config);
            checker
                .check_function(func, &cx)
                .unwrap_or_else(|err| vec![err.to_borrow_error(func.span)])
        }

        fn check(&self, func: &FuncDecl) -> Vec<BorrowError> {
            self.run(NllChecker::new(), func)
        }

        /// `let mut? name: ty = make();`
        fn let_made(&self, b: &mut BodyBuilder, name: &str, mutable: bool, ty: &str) -> PatternId {
            let init = b.call("make", vec![]);
            b.let_var(name, mutable, Some(self.ty(ty)), Some(init))
        }
    }

    fn int() -> Ty {
        Ty::Primitive(PrimTy::I32)
    }

    fn kinds(errors: &[BorrowError]) -> Vec<ErrorKind> {
        errors.iter().map(|error| error.kind).collect()
    }

    fn call_stmt(b: &mut BodyBuilder, callee: &str, name: &str) -> ExprId {
        let arg = b.ident(name);
        let call = b.call(callee, vec![arg]);
        b.expr_stmt(call);
        arg
    }

    #[test]
    fn test_move_then_use_is_rejected() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let moved = call_stmt(&mut b, "consume", "v");
        let again = call_stmt(&mut b, "print", "v");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::UseAfterMove]);
        assert_eq!(errors[0].primary_message, "use of moved value: `v`");
        assert_eq!(errors[0].primary_span, func.body.expr_span(again));
        assert_eq!(errors[0].related[0].span, func.body.expr_span(moved));
        assert_eq!(errors[0].related[0].label, "value moved here");
    }

    #[test]
    fn test_copy_values_are_never_moved() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", false, Some(int()), Some(one));
        let x = b.ident("x");
        b.let_var("y", false, Some(int()), Some(x));
        call_stmt(&mut b, "print", "x");
        let func = b.finish("main", None, None);

        assert!(fx.check(&func).is_empty());
    }

    #[test]
    fn test_partial_move_leaves_sibling_usable() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "p", false, "Tokens");
        let p = b.ident("p");
        let first = b.field(p, "first");
        b.let_var("a", false, Some(fx.ty("Token")), Some(first));
        let p = b.ident("p");
        let second = b.field(p, "second");
        b.let_var("c", false, Some(fx.ty("Token")), Some(second));
        let whole = call_stmt(&mut b, "consume", "p");
        let p = b.ident("p");
        let first_again = b.field(p, "first");
        b.let_var("d", false, Some(fx.ty("Token")), Some(first_again));
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(
            kinds(&errors),
            [ErrorKind::UseOfPartiallyMoved, ErrorKind::UseAfterMove]
        );
        assert_eq!(errors[0].primary_span, func.body.expr_span(whole));
        assert_eq!(errors[0].primary_message, "use of partially moved value: `p`");
        assert_eq!(errors[1].primary_message, "use of moved value: `p.first`");
    }

    #[test]
    fn test_partially_moved_value_with_destructor_cannot_drop() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "p", false, "Pair");
        let p = b.ident("p");
        let first = b.field(p, "first");
        b.let_var("a", false, Some(fx.ty("List")), Some(first));
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::InvalidPartialDrop]);
        assert_eq!(errors[0].primary_message, "cannot drop partially moved value `p`");
        assert_eq!(errors[0].related[0].span, func.body.expr_span(first));
    }

    /// `let mut x = 1; let r = ref x;` followed by `print(r)` and `x = 10`
    /// in the given order.
    fn reborrow_program(fx: &Fixture, use_first: bool) -> FuncDecl {
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", true, Some(int()), Some(one));
        let x = b.ident("x");
        let borrow = b.ref_(x);
        b.let_var("r", false, Some(Ty::reference(false, int())), Some(borrow));
        if use_first {
            call_stmt(&mut b, "print", "r");
        }
        let target = b.ident("x");
        let ten = b.int(10);
        let assign = b.assign(target, ten);
        b.expr_stmt(assign);
        if !use_first {
            call_stmt(&mut b, "print", "r");
        }
        b.finish("main", None, None)
    }

    #[test]
    fn test_borrow_ends_at_last_use() {
        let fx = Fixture::new();
        assert!(fx.check(&reborrow_program(&fx, true)).is_empty());

        let errors = fx.check(&reborrow_program(&fx, false));
        assert_eq!(kinds(&errors), [ErrorKind::AssignWhileBorrowed]);
        assert_eq!(
            errors[0].primary_message,
            "cannot assign to `x` because it is borrowed"
        );
        let labels: Vec<_> = errors[0].related.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["`x` is borrowed here", "borrow later used here"]);
    }

    fn push_len_program(fx: &Fixture) -> FuncDecl {
        let mut b = fx.builder();
        fx.let_made(&mut b, "list", true, "List");
        let recv = b.ident("list");
        let len_recv = b.ident("list");
        let len = b.method_call(len_recv, "len", vec![], ReceiverMode::Ref);
        let push = b.method_call(recv, "push", vec![len], ReceiverMode::MutRef);
        b.expr_stmt(push);
        let after = b.ident("list");
        let len = b.method_call(after, "len", vec![], ReceiverMode::Ref);
        b.expr_stmt(len);
        b.finish("main", None, None)
    }

    #[test]
    fn test_two_phase_receiver_may_be_read_by_arguments() {
        let mut fx = Fixture::new();
        let func = push_len_program(&fx);
        assert!(fx.check(&func).is_empty());

        fx.config.two_phase_borrows = false;
        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::ConflictingSharedMutableBorrow]);
        assert_eq!(
            errors[0].primary_message,
            "cannot borrow `list` as immutable because it is also borrowed as mutable"
        );
    }

    #[test]
    fn test_activation_conflicts_with_held_shared_borrow() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "list", true, "List");
        let list = b.ident("list");
        let borrow = b.ref_(list);
        b.let_var("r", false, Some(Ty::reference(false, fx.ty("List"))), Some(borrow));
        let recv = b.ident("list");
        let one = b.int(1);
        let push = b.method_call(recv, "push", vec![one], ReceiverMode::MutRef);
        b.expr_stmt(push);
        call_stmt(&mut b, "print", "r");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::ConflictingSharedMutableBorrow]);
        assert_eq!(errors[0].primary_span, func.body.expr_span(push));
        assert_eq!(
            errors[0].primary_message,
            "cannot borrow `list` as mutable because it is also borrowed as immutable"
        );
        assert_eq!(errors[0].notes.len(), 1);
    }

    fn field_borrows(fx: &Fixture, second: Option<&str>) -> FuncDecl {
        let mut b = fx.builder();
        fx.let_made(&mut b, "s", true, "Tokens");
        let s = b.ident("s");
        let first = b.field(s, "first");
        let a = b.mut_ref(first);
        b.let_var("a", false, None, Some(a));
        let s = b.ident("s");
        let other = match second {
            Some(field) => b.field(s, field),
            None => s,
        };
        let c = b.mut_ref(other);
        b.let_var("c", false, None, Some(c));
        call_stmt(&mut b, "touch", "a");
        call_stmt(&mut b, "touch", "c");
        b.finish("main", None, None)
    }

    #[test]
    fn test_disjoint_fields_borrow_independently() {
        let fx = Fixture::new();
        assert!(fx.check(&field_borrows(&fx, Some("second"))).is_empty());

        let errors = fx.check(&field_borrows(&fx, None));
        assert_eq!(kinds(&errors), [ErrorKind::ConflictingMutableBorrow]);
        assert_eq!(
            errors[0].primary_message,
            "cannot borrow `s` as mutable more than once at a time"
        );
        let labels: Vec<_> = errors[0].related.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["first borrow occurs here", "first borrow later used here"]);
    }

    #[test]
    fn test_shared_borrows_compose() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        for name in ["a", "c"] {
            let v = b.ident("v");
            let borrow = b.ref_(v);
            b.let_var(name, false, None, Some(borrow));
        }
        call_stmt(&mut b, "print", "a");
        call_stmt(&mut b, "print", "c");
        let func = b.finish("main", None, None);

        assert!(fx.check(&func).is_empty());
    }

    fn move_while_borrowed(fx: &Fixture) -> FuncDecl {
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let v = b.ident("v");
        let borrow = b.ref_(v);
        b.let_var("r", false, None, Some(borrow));
        call_stmt(&mut b, "consume", "v");
        call_stmt(&mut b, "print", "r");
        b.finish("main", None, None)
    }

    #[test]
    fn test_move_while_borrowed() {
        let fx = Fixture::new();
        let func = move_while_borrowed(&fx);
        assert_eq!(kinds(&fx.check(&func)), [ErrorKind::MoveWhileBorrowed]);
        assert!(fx.run(NllChecker::moves_only(), &func).is_empty());
    }

    #[test]
    fn test_block_local_outlived_by_outer_reference() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        b.let_var("r", false, Some(Ty::reference(false, int())), None);
        b.begin_block();
        let one = b.int(1);
        b.let_var("x", false, Some(int()), Some(one));
        let target = b.ident("r");
        let x = b.ident("x");
        let borrow = b.ref_(x);
        let assign = b.assign(target, borrow);
        b.expr_stmt(assign);
        let block = b.end_block(None);
        b.expr_stmt(block);
        let later = call_stmt(&mut b, "print", "r");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::BorrowOutlivesOwner]);
        assert_eq!(errors[0].primary_message, "`x` does not live long enough");
        assert_eq!(errors[0].primary_span, func.body.expr_span(borrow));
        assert_eq!(errors[0].related[1].span, func.body.expr_span(later));
    }

    #[test]
    fn test_returning_reference_to_local() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", false, Some(int()), Some(one));
        let x = b.ident("x");
        let borrow = b.ref_(x);
        let func = b.finish("leak", Some(borrow), Some(Ty::reference(false, int())));

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::BorrowOutlivesOwner]);
        assert_eq!(errors[0].primary_message, "cannot return reference to local `x`");
    }

    #[test]
    fn test_immutable_binding_is_assigned_once() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", false, Some(int()), Some(one));
        b.let_var("y", false, Some(int()), None);
        for name in ["y", "x"] {
            let target = b.ident(name);
            let two = b.int(2);
            let assign = b.assign(target, two);
            b.expr_stmt(assign);
        }
        call_stmt(&mut b, "print", "y");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::AssignToImmutable]);
        assert_eq!(
            errors[0].primary_message,
            "cannot assign twice to immutable variable `x`"
        );
    }

    #[test]
    fn test_uninitialized_read() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        b.let_var("y", false, Some(int()), None);
        call_stmt(&mut b, "print", "y");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::UseAfterMove]);
        assert_eq!(errors[0].primary_message, "used binding `y` isn't initialized");
    }

    #[test]
    fn test_mut_borrow_of_immutable_binding() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let recv = b.ident("v");
        let one = b.int(1);
        let push = b.method_call(recv, "push", vec![one], ReceiverMode::MutRef);
        b.expr_stmt(push);
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::MutBorrowOfImmutable]);
        assert_eq!(
            errors[0].primary_message,
            "cannot borrow `v` as mutable, as it is not declared as mutable"
        );
    }

    #[test]
    fn test_move_inside_loop_body() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let cond = b.bool(true);
        b.begin_block();
        let moved = call_stmt(&mut b, "consume", "v");
        let body = b.end_block(None);
        let looped = b.while_(cond, body);
        b.expr_stmt(looped);
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::UseAfterMove]);
        assert_eq!(errors[0].primary_span, func.body.expr_span(moved));
        assert_eq!(
            errors[0].related[0].label,
            "value moved here, in previous iteration of loop"
        );
    }

    fn branch_move(fx: &Fixture, returns: bool) -> FuncDecl {
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let cond = b.bool(true);
        b.begin_block();
        call_stmt(&mut b, "consume", "v");
        if returns {
            let ret = b.ret(None);
            b.expr_stmt(ret);
        }
        let then = b.end_block(None);
        let branch = b.if_(cond, then, None);
        b.expr_stmt(branch);
        call_stmt(&mut b, "print", "v");
        b.finish("main", None, None)
    }

    #[test]
    fn test_branch_states_merge() {
        let fx = Fixture::new();
        assert_eq!(kinds(&fx.check(&branch_move(&fx, false))), [ErrorKind::UseAfterMove]);
        assert!(fx.check(&branch_move(&fx, true)).is_empty());
    }

    #[test]
    fn test_binding_arm_moves_scrutinee() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "opt", false, "Option");
        let scrutinee = b.ident("opt");
        let inner = b.bind("n", false);
        let some = b.variant_pat("Some", vec![inner]);
        let some_body = b.int(0);
        let rest = b.wildcard();
        let rest_body = b.int(1);
        let when = b.when(
            scrutinee,
            vec![
                WhenArm {
                    pattern: some,
                    guard: None,
                    body: some_body,
                },
                WhenArm {
                    pattern: rest,
                    guard: None,
                    body: rest_body,
                },
            ],
        );
        b.expr_stmt(when);
        call_stmt(&mut b, "print", "opt");
        let func = b.finish("main", None, None);

        assert_eq!(kinds(&fx.check(&func)), [ErrorKind::UseAfterMove]);
    }

    /// `let n: <ty> = { let v = make(); v.<method>() }; print(n)`
    fn block_method_tail(fx: &Fixture, method: &str, ty: Ty) -> (FuncDecl, ExprId) {
        let mut b = fx.builder();
        b.begin_block();
        fx.let_made(&mut b, "v", false, "List");
        let v = b.ident("v");
        let call = b.method_call(v, method, vec![], ReceiverMode::Ref);
        let block = b.end_block(Some(call));
        b.let_var("n", false, Some(ty), Some(block));
        call_stmt(&mut b, "print", "n");
        (b.finish("main", None, None), v)
    }

    #[test]
    fn test_block_tail_call_only_dangles_when_result_holds_a_ref() {
        let fx = Fixture::new();
        let (plain, _) = block_method_tail(&fx, "len", int());
        assert!(fx.check(&plain).is_empty());

        let (func, receiver) = block_method_tail(&fx, "first", Ty::reference(false, int()));
        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::BorrowOutlivesOwner]);
        assert_eq!(errors[0].primary_message, "`v` does not live long enough");
        assert_eq!(errors[0].primary_span, func.body.expr_span(receiver));
    }

    /// `let mut x = 1; let f = do() { print(x) }; x = 2;` with `f()`
    /// called before or after the write.
    fn capture_then_write(fx: &Fixture, call_after: bool) -> (FuncDecl, ExprId) {
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", true, Some(int()), Some(one));
        let x = b.ident("x");
        let body = b.call("print", vec![x]);
        let closure = b.closure(vec![], body, false);
        b.let_var("f", false, None, Some(closure));
        if !call_after {
            let call = b.call("f", vec![]);
            b.expr_stmt(call);
        }
        let target = b.ident("x");
        let two = b.int(2);
        let assign = b.assign(target, two);
        b.expr_stmt(assign);
        if call_after {
            let call = b.call("f", vec![]);
            b.expr_stmt(call);
        }
        (b.finish("main", None, None), x)
    }

    #[test]
    fn test_closure_capture_borrows_while_closure_is_used() {
        let fx = Fixture::new();
        let (func, captured) = capture_then_write(&fx, true);
        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::AssignWhileBorrowed]);
        assert_eq!(errors[0].related[0].span, func.body.expr_span(captured));

        let (func, _) = capture_then_write(&fx, false);
        assert!(fx.check(&func).is_empty());
    }

    #[test]
    fn test_closure_capturing_moved_value() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let moved = call_stmt(&mut b, "consume", "v");
        let v = b.ident("v");
        let len = b.method_call(v, "len", vec![], ReceiverMode::Ref);
        let closure = b.closure(vec![], len, false);
        b.let_var("f", false, None, Some(closure));
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::ClosureCapturesMoved]);
        assert_eq!(errors[0].primary_message, "closure captures moved value: `v`");
        assert_eq!(errors[0].related[0].span, func.body.expr_span(moved));
    }

    #[test]
    fn test_mutable_capture_conflicts_with_live_borrow() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", true, Some(int()), Some(one));
        let x = b.ident("x");
        let borrow = b.ref_(x);
        b.let_var("r", false, Some(Ty::reference(false, int())), Some(borrow));
        let target = b.ident("x");
        let two = b.int(2);
        let body = b.assign(target, two);
        let closure = b.closure(vec![], body, false);
        b.let_var("f", false, None, Some(closure));
        let call = b.call("f", vec![]);
        b.expr_stmt(call);
        call_stmt(&mut b, "print", "r");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::ClosureCaptureConflict]);
        assert_eq!(errors[0].related[0].span, func.body.expr_span(borrow));
    }

    #[test]
    fn test_move_closure_moves_captured_binding() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        let v = b.ident("v");
        let len = b.method_call(v, "len", vec![], ReceiverMode::Ref);
        let closure = b.closure(vec![], len, true);
        b.let_var("f", false, None, Some(closure));
        call_stmt(&mut b, "print", "v");
        let func = b.finish("main", None, None);

        let errors = fx.check(&func);
        assert_eq!(kinds(&errors), [ErrorKind::UseAfterMove]);
        assert_eq!(errors[0].related[0].span, func.body.expr_span(v));
    }

    #[test]
    fn test_closure_body_write_to_immutable_capture() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        let one = b.int(1);
        b.let_var("x", false, Some(int()), Some(one));
        let target = b.ident("x");
        let two = b.int(2);
        let body = b.assign(target, two);
        let closure = b.closure(vec![], body, false);
        b.let_var("f", false, None, Some(closure));
        let call = b.call("f", vec![]);
        b.expr_stmt(call);
        let func = b.finish("main", None, None);

        assert_eq!(kinds(&fx.check(&func)), [ErrorKind::AssignToImmutable]);
    }

    #[test]
    fn test_closure_params_shadow_captures() {
        let fx = Fixture::new();
        let mut b = fx.builder();
        fx.let_made(&mut b, "v", false, "List");
        call_stmt(&mut b, "consume", "v");
        let param = b.closure_param("v", false, fx.ty("List"));
        let v = b.ident("v");
        let body = b.call("consume", vec![v]);
        let closure = b.closure(vec![param], body, false);
        b.let_var("f", false, None, Some(closure));
        let func = b.finish("main", None, None);

        assert!(fx.check(&func).is_empty());
    }
}
