//! Fact generation: walks a function body and records what happens where.
//!
//! The walk mirrors the evaluation order of the NLL checker but never checks
//! anything. Each evaluated expression gets a point, control forms add the
//! edges between them, and every access to a place is recorded so that
//! invalidations can be paired with loans once the whole body is known.
//!
//! A closure body becomes a side region entered where the closure is
//! created and never rejoined. Its accesses are only paired with loans taken
//! inside it; the captures recorded at the creation point answer for the
//! rest.

use std::mem;

use log::trace;
use rustc_hash::FxHashMap;
use tml_ast::{
    Body, Expr, ExprId, FuncDecl, Param, Pattern, PatternId, ReceiverMode, Stmt, StmtId, Ty, WhenArm,
};
use tml_borrow_check::{
    Access, BorrowEnv, CaptureKind, CheckContext, InternalError, LoanKind, Place, PlaceId, ResolvedPlace,
    analyze_captures, may_hold_ref, resolve_place,
};
use tml_intern::Symbol;
use tml_span::{FileSpan, Span};

use crate::facts::{AccessFact, FactTable, Loan, LoanData, Origin, OriginKind, Point, Var};

/// Origins carried by an evaluated value.
#[derive(Debug, Clone, Default)]
struct Carried {
    /// Held by the value itself
    direct: Vec<Origin>,
    /// Passed into a call whose result this value is
    via_call: Vec<Origin>,
}

impl Carried {
    fn direct(origin: Origin) -> Self {
        Self {
            direct: vec![origin],
            via_call: Vec::new(),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.direct.extend(other.direct);
        self.via_call.extend(other.via_call);
        self
    }

    fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.via_call.is_empty()
    }

    /// Origins a binding of type `ty` takes from this value.
    fn adopted_by(&self, ty: &Ty) -> Vec<Origin> {
        let mut origins = self.direct.clone();
        if ty.contains_ref() {
            origins.extend(&self.via_call);
        }
        origins.sort_unstable();
        origins.dedup();
        origins
    }
}

struct LoopTargets {
    header: Point,
    exits: Vec<Point>,
}

/// Builds the [`FactTable`] of one function.
pub struct FactGenerator<'a> {
    func: &'a FuncDecl,
    body: &'a Body,
    cx: CheckContext<'a>,
    env: BorrowEnv,
    facts: FactTable,
    vars: FxHashMap<PlaceId, Var>,
    locals: Vec<PlaceId>,
    ret_var: Var,
    current: Option<Point>,
    loops: Vec<LoopTargets>,
    returns: Vec<Point>,
    /// First loan of the innermost closure body being walked
    checked_from: Option<Loan>,
}

impl<'a> FactGenerator<'a> {
    fn new(func: &'a FuncDecl, cx: CheckContext<'a>) -> Self {
        let mut facts = FactTable::new();
        let (ret_var, _) = facts.fresh_var(OriginKind::Return);
        Self {
            func,
            body: &func.body,
            cx,
            env: BorrowEnv::new(),
            facts,
            vars: FxHashMap::default(),
            locals: Vec::new(),
            ret_var,
            current: None,
            loops: Vec::new(),
            returns: Vec::new(),
            checked_from: None,
        }
    }

    /// Generates the facts of `func`.
    ///
    /// The result depends only on the function and the type environment, so
    /// two runs over the same input produce equal tables.
    ///
    /// # Errors
    ///
    /// Returns an [`InternalError`] if scopes become unbalanced.
    pub fn generate(func: &'a FuncDecl, cx: &CheckContext<'a>) -> Result<FactTable, InternalError> {
        let mut generator = Self::new(func, *cx);
        generator.run()?;
        Ok(generator.facts)
    }

    fn run(&mut self) -> Result<(), InternalError> {
        let func = self.func;
        let entry = self.facts.fresh_point();
        self.current = Some(entry);
        self.env.push_scope();
        for param in &func.params {
            self.bind_pattern(param.pattern, &param.ty, Some(&Carried::default()), entry);
        }

        let body = self.body;
        let tail = match &body.exprs[body.root] {
            Expr::Block { stmts, tail, .. } => {
                self.env.push_scope();
                for stmt in stmts {
                    self.eval_stmt(*stmt)?;
                }
                let carried = match tail {
                    Some(tail) => self.eval(*tail)?,
                    None => Carried::default(),
                };
                self.env.pop_scope()?;
                carried
            }
            _ => self.eval(body.root)?,
        };
        if self.current.is_some() {
            let point = self.advance_point();
            self.flow_into_return(&tail, point);
            self.returns.push(point);
        }

        self.current = None;
        let returns = mem::take(&mut self.returns);
        self.join(&returns);
        let dead = self.advance_point();
        let locals = mem::take(&mut self.locals);
        self.storage_dead(&locals, dead, end_of(func.span));
        let exit = self.advance_point();
        self.facts.use_var(self.ret_var, exit);
        self.env.pop_scope()?;

        self.facts.compute_invalidations();
        trace!(
            "facts for {}: {} points, {} loans, {} invalidations",
            self.cx.interner.resolve(&func.name),
            self.facts.point_count(),
            self.facts.loans.len(),
            self.facts.invalidations.len()
        );
        Ok(())
    }

    /// Allocates the next point. While control is reachable it follows the
    /// current point; after a diverging form it stays disconnected.
    fn advance_point(&mut self) -> Point {
        let point = self.facts.fresh_point();
        if let Some(prev) = self.current {
            self.facts.add_edge(prev, point);
            self.current = Some(point);
        }
        point
    }

    /// Merges control from `preds` into a fresh point.
    fn join(&mut self, preds: &[Point]) {
        if preds.is_empty() {
            self.current = None;
            return;
        }
        let point = self.facts.fresh_point();
        for pred in preds {
            self.facts.add_edge(*pred, point);
        }
        self.current = Some(point);
    }

    fn use_origins(&mut self, origins: &[Origin], point: Point) {
        for origin in origins {
            let var = self.facts.var_of(*origin);
            self.facts.use_var(var, point);
        }
    }

    /// Marks the binding `root` used and returns its origin.
    fn use_root(&mut self, root: PlaceId, point: Point) -> Option<Origin> {
        let var = self.vars.get(&root).copied()?;
        self.facts.use_var(var, point);
        Some(self.facts.origin_of(var))
    }

    fn record(&mut self, place: &Place, access: Access, point: Point, span: FileSpan) {
        let desc = place.describe(&self.env, self.cx.interner);
        self.facts.record_access(AccessFact {
            place: place.clone(),
            access,
            point,
            span,
            desc,
            issued: None,
            capture: None,
            checked_from: self.checked_from,
        });
    }

    fn storage_dead(&mut self, ids: &[PlaceId], point: Point, span: FileSpan) {
        for id in ids {
            if !self.env.ty_of(*id).is_ref() {
                self.record(&Place::from_root(*id), Access::StorageDead, point, span);
            }
        }
    }

    fn flow_into_return(&mut self, carried: &Carried, point: Point) {
        self.use_origins(&carried.direct, point);
        let ret_ty = self.func.ret_ty.clone().unwrap_or(Ty::Unknown);
        let sources = carried.adopted_by(&ret_ty);
        self.use_origins(&sources, point);
        let ret = self.facts.origin_of(self.ret_var);
        for source in sources {
            self.facts.add_subset(source, ret, point);
        }
    }

    fn bind_pattern(&mut self, pattern: PatternId, ty: &Ty, carried: Option<&Carried>, point: Point) {
        let body = self.body;
        match &body.patterns[pattern] {
            Pattern::Binding { name, mutable, span } => {
                let id = self.env.define(*name, *mutable, ty.clone(), *span, Some(pattern));
                let (var, origin) = self.facts.fresh_var(OriginKind::Binding(id));
                self.vars.insert(id, var);
                self.locals.push(id);
                let Some(carried) = carried else {
                    return;
                };
                self.facts.define_var(var, point);
                let sources = carried.adopted_by(ty);
                self.use_origins(&sources, point);
                for source in sources {
                    self.facts.add_subset(source, origin, point);
                }
            }
            Pattern::Tuple { patterns, .. } => {
                for (idx, sub) in patterns.iter().enumerate() {
                    let elem = match ty {
                        Ty::Tuple(elems) => elems.get(idx).cloned().unwrap_or(Ty::Unknown),
                        _ => Ty::Unknown,
                    };
                    self.bind_pattern(*sub, &elem, carried, point);
                }
            }
            Pattern::Struct { fields, .. } => {
                for (field, sub) in fields {
                    let field_ty = self.cx.types.field_type(ty, *field).unwrap_or(Ty::Unknown);
                    self.bind_pattern(*sub, &field_ty, carried, point);
                }
            }
            Pattern::Variant { sub_patterns, .. } => {
                for sub in sub_patterns {
                    self.bind_pattern(*sub, &Ty::Unknown, carried, point);
                }
            }
            Pattern::Wildcard { .. } | Pattern::Literal { .. } => {}
        }
    }

    fn eval_stmt(&mut self, stmt: StmtId) -> Result<(), InternalError> {
        let body = self.body;
        match &body.stmts[stmt] {
            Stmt::Let {
                pattern,
                ty,
                initializer,
                ..
            } => {
                let carried = match initializer {
                    Some(init) => Some(self.eval(*init)?),
                    None => None,
                };
                let ty = ty.clone().unwrap_or(Ty::Unknown);
                let point = self.advance_point();
                if let Some(carried) = &carried {
                    self.use_origins(&carried.direct, point);
                }
                self.bind_pattern(*pattern, &ty, carried.as_ref(), point);
            }
            Stmt::Expr { expr, .. } => {
                self.eval(*expr)?;
            }
        }
        Ok(())
    }

    /// Resolves a place expression and walks its index operands.
    fn resolve(&mut self, expr: ExprId) -> Result<Option<ResolvedPlace>, InternalError> {
        let Some(resolved) = resolve_place(self.body, expr, &self.env, self.cx.types) else {
            return Ok(None);
        };
        for index in &resolved.index_operands {
            self.eval(*index)?;
        }
        Ok(Some(resolved))
    }

    /// Reads or moves a resolved place and returns the origin it carries.
    fn use_place(&mut self, resolved: &ResolvedPlace, consume: bool, span: FileSpan) -> Carried {
        let point = self.advance_point();
        let moves = consume && !resolved.place.is_indirect() && !self.cx.types.is_copy_type(&resolved.ty);
        let access = if moves { Access::Move } else { Access::Read };
        self.record(&resolved.place, access, point, span);
        self.use_root(resolved.place.root, point)
            .map(Carried::direct)
            .unwrap_or_default()
    }

    /// Issues a loan of `resolved` into a fresh temporary origin.
    fn borrow(
        &mut self,
        resolved: &ResolvedPlace,
        kind: LoanKind,
        loan_span: FileSpan,
        access_span: FileSpan,
    ) -> Carried {
        let point = self.advance_point();
        let origin = self.issue(&resolved.place, kind, point, (loan_span, access_span), None);
        // Reborrowing through a reference keeps what it points at borrowed
        if let Some(root) = self.use_root(resolved.place.root, point)
            && resolved.place.has_deref()
        {
            self.facts.add_subset(root, origin, point);
        }
        Carried::direct(origin)
    }

    /// Issues a loan of `place` into a fresh temporary origin defined at
    /// `point`, and records the borrowing access.
    fn issue(
        &mut self,
        place: &Place,
        kind: LoanKind,
        point: Point,
        (loan_span, access_span): (FileSpan, FileSpan),
        capture: Option<CaptureKind>,
    ) -> Origin {
        let (var, origin) = self.facts.fresh_var(OriginKind::Temporary);
        self.facts.define_var(var, point);
        let desc = place.describe(&self.env, self.cx.interner);
        let loan = self.facts.issue_loan(LoanData {
            place: place.clone(),
            kind,
            span: loan_span,
            origin,
            issued_at: point,
            desc: desc.clone(),
        });
        self.facts.record_access(AccessFact {
            place: place.clone(),
            access: Access::Borrow(kind),
            point,
            span: access_span,
            desc,
            issued: Some(loan),
            capture,
            checked_from: self.checked_from,
        });
        origin
    }

    /// A call through a closure binding reads the binding.
    fn use_callee(&mut self, callee: Symbol, span: FileSpan) -> Carried {
        let Some(root) = self.env.lookup(callee) else {
            return Carried::default();
        };
        let resolved = ResolvedPlace::of_root(&self.env, root);
        self.use_place(&resolved, false, span)
    }

    /// A call completes: its direct arguments are used, and every origin
    /// passed in may come back in the result.
    fn call_result(&mut self, args: &Carried) -> Carried {
        let point = self.advance_point();
        self.use_origins(&args.direct, point);
        if args.is_empty() {
            return Carried::default();
        }
        let (var, result) = self.facts.fresh_var(OriginKind::Temporary);
        self.facts.define_var(var, point);
        for origin in args.direct.iter().chain(&args.via_call) {
            self.facts.add_subset(*origin, result, point);
        }
        Carried {
            direct: Vec::new(),
            via_call: vec![result],
        }
    }

    fn eval(&mut self, expr: ExprId) -> Result<Carried, InternalError> {
        let body = self.body;
        let span = body.expr_span(expr);
        match &body.exprs[expr] {
            Expr::Literal { .. } => {
                self.advance_point();
                Ok(Carried::default())
            }
            Expr::Ident { .. } | Expr::Field { .. } | Expr::Index { .. } | Expr::Deref { .. } => {
                match self.resolve(expr)? {
                    Some(resolved) => Ok(self.use_place(&resolved, true, span)),
                    None => {
                        self.eval_children(expr)?;
                        self.advance_point();
                        Ok(Carried::default())
                    }
                }
            }
            Expr::Ref { mutable, operand, .. } => match self.resolve(*operand)? {
                Some(resolved) => {
                    let kind = if *mutable { LoanKind::Unique } else { LoanKind::Shared };
                    Ok(self.borrow(&resolved, kind, span, span))
                }
                None => {
                    let carried = self.eval(*operand)?;
                    self.advance_point();
                    Ok(carried)
                }
            },
            Expr::Call { callee, args, .. } => {
                let mut carried = self.use_callee(*callee, span);
                for arg in args {
                    carried = carried.merge(self.eval(*arg)?);
                }
                Ok(self.call_result(&carried))
            }
            Expr::MethodCall {
                receiver,
                args,
                receiver_mode,
                ..
            } => self.eval_method_call(*receiver, args, *receiver_mode, span),
            Expr::Binary { lhs, rhs, .. } => {
                self.eval(*lhs)?;
                self.eval(*rhs)?;
                self.advance_point();
                Ok(Carried::default())
            }
            Expr::Unary { operand, .. } => {
                self.eval(*operand)?;
                self.advance_point();
                Ok(Carried::default())
            }
            Expr::Assign { target, value, .. } => {
                self.eval_assign(*target, *value, span)?;
                Ok(Carried::default())
            }
            Expr::Block { stmts, tail, .. } => self.eval_block(stmts, *tail, span),
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => self.eval_if(*condition, *then_branch, *else_branch),
            Expr::When { scrutinee, arms, .. } => self.eval_when(*scrutinee, arms, span),
            Expr::Loop { body: inner, .. } => {
                self.eval_loop(None, None, *inner)?;
                Ok(Carried::default())
            }
            Expr::While {
                condition,
                body: inner,
                ..
            } => {
                self.eval_loop(Some(*condition), None, *inner)?;
                Ok(Carried::default())
            }
            Expr::For {
                pattern,
                iterable,
                body: inner,
                ..
            } => {
                self.eval_loop(None, Some((*pattern, *iterable)), *inner)?;
                Ok(Carried::default())
            }
            Expr::Return { value, .. } => {
                let carried = match value {
                    Some(value) => self.eval(*value)?,
                    None => Carried::default(),
                };
                if self.current.is_some() {
                    let point = self.advance_point();
                    if self.checked_from.is_some() {
                        self.use_origins(&carried.direct, point);
                    } else {
                        self.flow_into_return(&carried, point);
                    }
                    self.returns.push(point);
                }
                self.current = None;
                Ok(Carried::default())
            }
            Expr::Break { .. } => {
                if let Some(targets) = self.loops.last_mut() {
                    targets.exits.extend(self.current);
                }
                self.current = None;
                Ok(Carried::default())
            }
            Expr::Continue { .. } => {
                if let (Some(point), Some(targets)) = (self.current, self.loops.last()) {
                    self.facts.add_edge(point, targets.header);
                }
                self.current = None;
                Ok(Carried::default())
            }
            Expr::Tuple { elements, .. } | Expr::Array { elements, .. } => {
                let mut carried = Carried::default();
                for element in elements {
                    carried = carried.merge(self.eval(*element)?);
                }
                self.advance_point();
                Ok(carried)
            }
            Expr::StructLit { fields, .. } => {
                let mut carried = Carried::default();
                for (_, value) in fields {
                    carried = carried.merge(self.eval(*value)?);
                }
                self.advance_point();
                Ok(carried)
            }
            Expr::Closure { params, body: inner, .. } => self.eval_closure(expr, params, *inner, span),
        }
    }

    fn eval_closure(
        &mut self,
        closure: ExprId,
        params: &[Param],
        inner: ExprId,
        span: FileSpan,
    ) -> Result<Carried, InternalError> {
        let captures = analyze_captures(self.body, closure, &self.env, self.cx.types);

        let resume = self.current;
        let loops = mem::take(&mut self.loops);
        let returns = mem::take(&mut self.returns);
        let checked_from = self.checked_from.replace(Loan(self.facts.loans.len() as u32));
        self.env.push_scope();
        let entry = self.advance_point();
        for param in params {
            self.bind_pattern(param.pattern, &param.ty, Some(&Carried::default()), entry);
        }
        let tail = self.eval(inner)?;
        if self.current.is_some() {
            let point = self.advance_point();
            self.use_origins(&tail.direct, point);
        }
        let ids = self.env.pop_scope()?;
        let point = self.advance_point();
        self.storage_dead(&ids, point, end_of(span));
        self.checked_from = checked_from;
        self.returns = returns;
        self.loops = loops;
        self.current = resume;

        let point = self.advance_point();
        let mut carried = Carried::default();
        for capture in captures {
            let resolved = ResolvedPlace::of_root(&self.env, capture.root);
            if may_hold_ref(&resolved.ty)
                && let Some(origin) = self.use_root(capture.root, point)
            {
                carried.direct.push(origin);
            }
            match capture.kind.loan_kind() {
                // A write to an immutable binding is reported in the body
                Some(LoanKind::Unique) if !self.env.is_mutable(capture.root) => {}
                Some(kind) => {
                    let spans = (capture.span, capture.span);
                    let origin = self.issue(&resolved.place, kind, point, spans, Some(capture.kind));
                    carried.direct.push(origin);
                }
                None => {
                    let desc = resolved.place.describe(&self.env, self.cx.interner);
                    self.facts.record_access(AccessFact {
                        place: resolved.place,
                        access: capture.kind.access(),
                        point,
                        span: capture.span,
                        desc,
                        issued: None,
                        capture: Some(capture.kind),
                        checked_from: self.checked_from,
                    });
                }
            }
        }
        Ok(carried)
    }

    /// Walks the operands of a place-shaped expression that is not a place,
    /// such as a field of a call result.
    fn eval_children(&mut self, expr: ExprId) -> Result<(), InternalError> {
        let body = self.body;
        match &body.exprs[expr] {
            Expr::Field { base, .. } => {
                self.eval(*base)?;
            }
            Expr::Index { base, index, .. } => {
                self.eval(*base)?;
                self.eval(*index)?;
            }
            Expr::Deref { operand, .. } => {
                self.eval(*operand)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn eval_method_call(
        &mut self,
        receiver: ExprId,
        args: &[ExprId],
        mode: ReceiverMode,
        span: FileSpan,
    ) -> Result<Carried, InternalError> {
        let recv_span = self.body.expr_span(receiver);
        let mut carried = Carried::default();
        let mut reserved = None;

        match mode {
            ReceiverMode::Value => carried = self.eval(receiver)?,
            ReceiverMode::Ref | ReceiverMode::MutRef => match self.resolve(receiver)? {
                Some(resolved) => {
                    let resolved = if resolved.ty.is_ref() { resolved.deref() } else { resolved };
                    if mode == ReceiverMode::Ref {
                        carried = self.borrow(&resolved, LoanKind::Shared, recv_span, recv_span);
                    } else if self.cx.config.two_phase_borrows {
                        let point = self.advance_point();
                        self.use_root(resolved.place.root, point);
                        reserved = Some(resolved);
                    } else {
                        carried = self.borrow(&resolved, LoanKind::Unique, recv_span, recv_span);
                    }
                }
                None => carried = self.eval(receiver)?,
            },
        }

        for arg in args {
            carried = carried.merge(self.eval(*arg)?);
        }

        // The exclusive receiver loan only starts once the arguments are done
        if let Some(resolved) = reserved {
            let activated = self.borrow(&resolved, LoanKind::TwoPhaseActive, recv_span, span);
            carried = carried.merge(activated);
        }
        Ok(self.call_result(&carried))
    }

    fn eval_assign(&mut self, target: ExprId, value: ExprId, span: FileSpan) -> Result<(), InternalError> {
        let carried = self.eval(value)?;
        let Some(resolved) = self.resolve(target)? else {
            self.eval(target)?;
            self.advance_point();
            return Ok(());
        };
        let point = self.advance_point();
        self.record(&resolved.place, Access::Write, point, span);
        self.use_origins(&carried.direct, point);

        let root = resolved.place.root;
        if resolved.place.has_deref() {
            self.use_root(root, point);
            return Ok(());
        }
        let Some(var) = self.vars.get(&root).copied() else {
            return Ok(());
        };
        if resolved.place.is_root() {
            self.facts.define_var(var, point);
        }
        let origin = self.facts.origin_of(var);
        let sources = carried.adopted_by(&self.env.ty_of(root));
        self.use_origins(&sources, point);
        for source in sources {
            self.facts.add_subset(source, origin, point);
        }
        Ok(())
    }

    fn eval_block(&mut self, stmts: &[StmtId], tail: Option<ExprId>, span: FileSpan) -> Result<Carried, InternalError> {
        self.env.push_scope();
        for stmt in stmts {
            self.eval_stmt(*stmt)?;
        }
        let carried = match tail {
            Some(tail) => self.eval(tail)?,
            None => Carried::default(),
        };
        let ids = self.env.pop_scope()?;
        let point = self.advance_point();
        self.storage_dead(&ids, point, end_of(span));
        Ok(carried)
    }

    fn eval_if(
        &mut self,
        condition: ExprId,
        then_branch: ExprId,
        else_branch: Option<ExprId>,
    ) -> Result<Carried, InternalError> {
        self.eval(condition)?;
        let branch = self.current;

        let mut carried = self.eval(then_branch)?;
        let mut ends: Vec<Point> = self.current.into_iter().collect();
        self.current = branch;
        if let Some(else_branch) = else_branch {
            carried = carried.merge(self.eval(else_branch)?);
        }
        ends.extend(self.current);
        self.join(&ends);
        Ok(carried)
    }

    fn eval_when(&mut self, scrutinee: ExprId, arms: &[WhenArm], span: FileSpan) -> Result<Carried, InternalError> {
        let body = self.body;
        let binds = arms.iter().any(|arm| !body.bindings(arm.pattern).is_empty());
        let (scrutinee_carried, scrutinee_ty) = match self.resolve(scrutinee)? {
            Some(resolved) => {
                let carried = self.use_place(&resolved, binds, body.expr_span(scrutinee));
                (carried, resolved.ty)
            }
            None => (self.eval(scrutinee)?, Ty::Unknown),
        };

        let branch = self.current;
        let mut ends = Vec::new();
        let mut carried = Carried::default();
        for arm in arms {
            self.current = branch;
            self.env.push_scope();
            let point = self.advance_point();
            self.use_origins(&scrutinee_carried.direct, point);
            self.bind_pattern(arm.pattern, &scrutinee_ty, Some(&scrutinee_carried), point);
            if let Some(guard) = arm.guard {
                self.eval(guard)?;
            }
            carried = carried.merge(self.eval(arm.body)?);
            let ids = self.env.pop_scope()?;
            let point = self.advance_point();
            self.storage_dead(&ids, point, end_of(span));
            ends.extend(self.current);
        }
        if arms.is_empty() {
            ends.extend(branch);
        }
        self.join(&ends);
        Ok(carried)
    }

    /// `loop`, `while` (with a condition) and `for` (with a pattern and an
    /// iterable, desugared to a loop that binds each element at its head).
    fn eval_loop(
        &mut self,
        condition: Option<ExprId>,
        element: Option<(PatternId, ExprId)>,
        inner: ExprId,
    ) -> Result<(), InternalError> {
        let iterable = match element {
            Some((_, iterable)) => Some(self.eval(iterable)?),
            None => None,
        };
        let header = self.advance_point();
        self.loops.push(LoopTargets {
            header,
            exits: Vec::new(),
        });

        if let Some(condition) = condition {
            self.eval(condition)?;
            self.push_exit();
        }
        if let Some((pattern, _)) = element {
            self.push_exit();
            self.env.push_scope();
            let point = self.advance_point();
            if let Some(iterable) = &iterable {
                self.use_origins(&iterable.direct, point);
            }
            self.bind_pattern(pattern, &Ty::Unknown, iterable.as_ref(), point);
        }

        self.eval(inner)?;
        if element.is_some() {
            let ids = self.env.pop_scope()?;
            let point = self.advance_point();
            let span = self.body.expr_span(inner);
            self.storage_dead(&ids, point, end_of(span));
        }
        if let Some(end) = self.current {
            self.facts.add_edge(end, header);
        }

        let exits = self.loops.pop().map(|targets| targets.exits).unwrap_or_default();
        self.join(&exits);
        Ok(())
    }

    fn push_exit(&mut self) {
        if let Some(targets) = self.loops.last_mut() {
            targets.exits.extend(self.current);
        }
    }
}

/// Zero-width span at the end of `span`.
fn end_of(span: FileSpan) -> FileSpan {
    FileSpan::new(span.file, Span::new(span.span.end, span.span.end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tml_ast::{BodyBuilder, PrimTy};
    use tml_borrow_check::BorrowCheckConfig;
    use tml_intern::Interner;
    use tml_span::FileId;
    use tml_types::TypeTableBuilder;

    fn int() -> Ty {
        Ty::Primitive(PrimTy::I32)
    }

    fn generate(interner: &Interner, func: &FuncDecl) -> FactTable {
        let types = TypeTableBuilder::new(interner).build();
        let config = BorrowCheckConfig::default();
        let cx = CheckContext::new(&types, interner, &config);
        FactGenerator::generate(func, &cx).unwrap()
    }

    /// `let mut x = 1; let r = ref x; if c { x = 2 } else { print(r) }`
    fn branchy(interner: &Interner) -> FuncDecl {
        let mut b = BodyBuilder::new(interner, FileId(0));
        let one = b.int(1);
        b.let_var("x", true, Some(int()), Some(one));
        let x = b.ident("x");
        let borrow = b.ref_(x);
        b.let_var("r", false, Some(Ty::reference(false, int())), Some(borrow));
        let cond = b.bool(true);
        b.begin_block();
        let target = b.ident("x");
        let two = b.int(2);
        let assign = b.assign(target, two);
        b.expr_stmt(assign);
        let then = b.end_block(None);
        b.begin_block();
        let r = b.ident("r");
        let print = b.call("print", vec![r]);
        b.expr_stmt(print);
        let otherwise = b.end_block(None);
        let branch = b.if_(cond, then, Some(otherwise));
        b.expr_stmt(branch);
        b.finish("main", None, None)
    }

    #[test]
    fn test_generation_is_deterministic() {
        let interner = Interner::new();
        let func = branchy(&interner);
        assert_eq!(generate(&interner, &func), generate(&interner, &func));
    }

    #[test]
    fn test_branches_rejoin() {
        let interner = Interner::new();
        let facts = generate(&interner, &branchy(&interner));

        let mut preds: FxHashMap<Point, usize> = FxHashMap::default();
        for (_, to) in &facts.cfg_edge {
            *preds.entry(*to).or_default() += 1;
        }
        assert_eq!(preds.values().filter(|count| **count == 2).count(), 1);

        let mut succs: FxHashMap<Point, usize> = FxHashMap::default();
        for (from, _) in &facts.cfg_edge {
            *succs.entry(*from).or_default() += 1;
        }
        assert_eq!(succs.values().filter(|count| **count == 2).count(), 1);
    }

    #[test]
    fn test_borrow_flows_into_binding() {
        let interner = Interner::new();
        let facts = generate(&interner, &branchy(&interner));

        assert_eq!(facts.loans.len(), 1);
        let (temp, _, issued) = facts.loan_issued_at[0];
        let r_origin = facts
            .origins
            .iter()
            .find(|(_, kind)| matches!(kind, OriginKind::Binding(id) if id.0 == 1))
            .map(|(origin, _)| *origin)
            .unwrap();
        assert!(facts.subset_base.iter().any(|&(sub, sup, at)| sub == temp && sup == r_origin && at > issued));
        assert!(
            facts
                .invalidations
                .iter()
                .any(|inv| inv.access == Access::Write && inv.desc == "x")
        );
    }

    #[test]
    fn test_loop_has_back_edge_and_exit() {
        let interner = Interner::new();
        let mut b = BodyBuilder::new(&interner, FileId(0));
        let cond = b.bool(true);
        b.begin_block();
        let one = b.int(1);
        b.expr_stmt(one);
        let inner = b.end_block(None);
        let looped = b.while_(cond, inner);
        b.expr_stmt(looped);
        let func = b.finish("main", None, None);
        let facts = generate(&interner, &func);

        assert!(facts.cfg_edge.iter().any(|(from, to)| from > to));
        let exit = Point(facts.point_count() as u32 - 1);
        assert!(facts.var_used_at.contains(&(Var(0), exit)));
    }
}
