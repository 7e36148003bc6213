//! Closure capture analysis.
//!
//! A closure captures every binding of the enclosing function that its body
//! names. How it captures a binding depends on the most demanding use in the
//! body: reading needs a `ref`, writing or taking a `mut ref` needs a
//! `mut ref`, and consuming a value that is not `Copy` moves it into the
//! closure. A `move` closure takes everything by value.

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tml_ast::{Body, Expr, ExprId, PatternId, ReceiverMode, Stmt};
use tml_intern::Symbol;
use tml_span::FileSpan;
use tml_types::TypeEnv;

use crate::{
    env::BorrowEnv,
    loans::{Access, LoanKind},
    place::{PlaceId, ResolvedPlace, resolve_place},
};

/// How a closure holds on to a captured binding, least demanding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CaptureKind {
    /// A copy of a `Copy` value
    ByCopy,
    /// A shared borrow
    ByRef,
    /// A mutable borrow
    ByMutRef,
    /// The value itself
    ByMove,
}

impl CaptureKind {
    /// The access the capture performs on the binding when the closure is
    /// created.
    #[must_use]
    pub fn access(self) -> Access {
        match self {
            Self::ByCopy => Access::Read,
            Self::ByRef => Access::Borrow(LoanKind::Shared),
            Self::ByMutRef => Access::Borrow(LoanKind::Unique),
            Self::ByMove => Access::Move,
        }
    }

    /// The loan the capture takes, if it borrows.
    #[must_use]
    pub fn loan_kind(self) -> Option<LoanKind> {
        match self {
            Self::ByRef => Some(LoanKind::Shared),
            Self::ByMutRef => Some(LoanKind::Unique),
            Self::ByCopy | Self::ByMove => None,
        }
    }

    /// "by reference", "by value" and so on, for diagnostics.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::ByCopy => "by copy",
            Self::ByRef => "by reference",
            Self::ByMutRef => "by mutable reference",
            Self::ByMove => "by value",
        }
    }
}

/// One binding captured by a closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Captured binding
    pub root: PlaceId,
    /// Its name
    pub name: Symbol,
    /// Most demanding capture needed by the body
    pub kind: CaptureKind,
    /// First mention of the binding in the body
    pub span: FileSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Read,
    Value,
    Mutate,
}

/// Finds the bindings of `env` that the closure at `closure` captures, in
/// order of first mention.
///
/// Returns nothing if `closure` is not a closure expression. Names bound
/// inside the closure, including its parameters, shadow outer bindings.
/// Nested closures contribute their own captures of outer bindings.
#[must_use]
pub fn analyze_captures(body: &Body, closure: ExprId, env: &BorrowEnv, types: &dyn TypeEnv) -> Vec<Capture> {
    if !matches!(body.exprs[closure], Expr::Closure { .. }) {
        return Vec::new();
    }
    let mut scan = CaptureScan {
        body,
        env,
        types,
        locals: Vec::new(),
        forced: 0,
        captures: IndexMap::new(),
    };
    scan.scan(closure, Usage::Value);
    scan.captures.into_values().collect()
}

struct CaptureScan<'a> {
    body: &'a Body,
    env: &'a BorrowEnv,
    types: &'a dyn TypeEnv,
    locals: Vec<FxHashSet<Symbol>>,
    /// Depth of enclosing `move` closures
    forced: u32,
    captures: IndexMap<PlaceId, Capture>,
}

impl CaptureScan<'_> {
    fn scoped(&mut self, run: impl FnOnce(&mut Self)) {
        self.locals.push(FxHashSet::default());
        run(self);
        self.locals.pop();
    }

    fn bind(&mut self, pattern: PatternId) {
        let body = self.body;
        let names = body.bindings(pattern).into_iter().filter_map(|binding| match &body.patterns[binding] {
            tml_ast::Pattern::Binding { name, .. } => Some(*name),
            _ => None,
        });
        if let Some(scope) = self.locals.last_mut() {
            scope.extend(names);
        }
    }

    fn is_local(&self, name: Symbol) -> bool {
        self.locals.iter().any(|scope| scope.contains(&name))
    }

    fn capture(&mut self, resolved: &ResolvedPlace, name: Symbol, usage: Usage, span: FileSpan) {
        let root = resolved.place.root;
        let kind = if self.forced > 0 {
            if self.types.is_copy_type(&self.env.ty_of(root)) {
                CaptureKind::ByCopy
            } else {
                CaptureKind::ByMove
            }
        } else {
            match usage {
                Usage::Read => CaptureKind::ByRef,
                Usage::Value if resolved.place.is_indirect() || self.types.is_copy_type(&resolved.ty) => {
                    CaptureKind::ByRef
                }
                Usage::Value => CaptureKind::ByMove,
                Usage::Mutate if resolved.place.has_deref() => CaptureKind::ByRef,
                Usage::Mutate => CaptureKind::ByMutRef,
            }
        };
        self.captures
            .entry(root)
            .and_modify(|capture| capture.kind = capture.kind.max(kind))
            .or_insert(Capture { root, name, kind, span });
    }

    /// A place expression used as `usage`.
    fn place(&mut self, expr: ExprId, usage: Usage) {
        let body = self.body;
        let mut root = expr;
        loop {
            match &body.exprs[root] {
                Expr::Field { base, .. } => root = *base,
                Expr::Index { base, index, .. } => {
                    self.scan(*index, Usage::Value);
                    root = *base;
                }
                Expr::Deref { operand, .. } => root = *operand,
                _ => break,
            }
        }
        let Expr::Ident { name, span } = &body.exprs[root] else {
            self.scan(root, Usage::Value);
            return;
        };
        if self.is_local(*name) {
            return;
        }
        if let Some(resolved) = resolve_place(body, expr, self.env, self.types) {
            self.capture(&resolved, *name, usage, *span);
        }
    }

    fn scan(&mut self, expr: ExprId, usage: Usage) {
        let body = self.body;
        match &body.exprs[expr] {
            Expr::Literal { .. } | Expr::Break { .. } | Expr::Continue { .. } => {}
            Expr::Ident { .. } | Expr::Field { .. } | Expr::Index { .. } | Expr::Deref { .. } => {
                self.place(expr, usage);
            }
            Expr::Ref { mutable, operand, .. } => {
                if body.exprs[*operand].is_place_expr() {
                    self.place(*operand, if *mutable { Usage::Mutate } else { Usage::Read });
                } else {
                    self.scan(*operand, Usage::Value);
                }
            }
            Expr::Call { callee, args, span } => {
                if !self.is_local(*callee)
                    && let Some(root) = self.env.lookup(*callee)
                {
                    let resolved = ResolvedPlace::of_root(self.env, root);
                    self.capture(&resolved, *callee, Usage::Read, *span);
                }
                for arg in args {
                    self.scan(*arg, Usage::Value);
                }
            }
            Expr::MethodCall {
                receiver,
                args,
                receiver_mode,
                ..
            } => {
                let usage = match receiver_mode {
                    ReceiverMode::Value => Usage::Value,
                    ReceiverMode::Ref => Usage::Read,
                    ReceiverMode::MutRef => Usage::Mutate,
                };
                self.scan(*receiver, usage);
                for arg in args {
                    self.scan(*arg, Usage::Value);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.scan(*lhs, Usage::Read);
                self.scan(*rhs, Usage::Read);
            }
            Expr::Unary { operand, .. } => self.scan(*operand, Usage::Read),
            Expr::Assign { target, value, .. } => {
                self.scan(*value, Usage::Value);
                if body.exprs[*target].is_place_expr() {
                    self.place(*target, Usage::Mutate);
                } else {
                    self.scan(*target, Usage::Value);
                }
            }
            Expr::Block { stmts, tail, .. } => self.scoped(|scan| {
                for stmt in stmts {
                    match &body.stmts[*stmt] {
                        Stmt::Let {
                            pattern,
                            initializer,
                            ..
                        } => {
                            if let Some(init) = initializer {
                                scan.scan(*init, Usage::Value);
                            }
                            scan.bind(*pattern);
                        }
                        Stmt::Expr { expr, .. } => scan.scan(*expr, Usage::Value),
                    }
                }
                if let Some(tail) = tail {
                    scan.scan(*tail, Usage::Value);
                }
            }),
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.scan(*condition, Usage::Read);
                self.scan(*then_branch, Usage::Value);
                if let Some(else_branch) = else_branch {
                    self.scan(*else_branch, Usage::Value);
                }
            }
            Expr::When { scrutinee, arms, .. } => {
                let binds = arms.iter().any(|arm| !body.bindings(arm.pattern).is_empty());
                self.scan(*scrutinee, if binds { Usage::Value } else { Usage::Read });
                for arm in arms {
                    self.scoped(|scan| {
                        scan.bind(arm.pattern);
                        if let Some(guard) = arm.guard {
                            scan.scan(guard, Usage::Read);
                        }
                        scan.scan(arm.body, Usage::Value);
                    });
                }
            }
            Expr::Loop { body: inner, .. } => self.scan(*inner, Usage::Value),
            Expr::While {
                condition, body: inner, ..
            } => {
                self.scan(*condition, Usage::Read);
                self.scan(*inner, Usage::Value);
            }
            Expr::For {
                pattern,
                iterable,
                body: inner,
                ..
            } => {
                self.scan(*iterable, Usage::Value);
                self.scoped(|scan| {
                    scan.bind(*pattern);
                    scan.scan(*inner, Usage::Value);
                });
            }
            Expr::Return { value, .. } => {
                if let Some(value) = value {
                    self.scan(*value, Usage::Value);
                }
            }
            Expr::Tuple { elements, .. } | Expr::Array { elements, .. } => {
                for element in elements {
                    self.scan(*element, Usage::Value);
                }
            }
            Expr::StructLit { fields, .. } => {
                for (_, value) in fields {
                    self.scan(*value, Usage::Value);
                }
            }
            Expr::Closure {
                params,
                body: inner,
                is_move,
                ..
            } => {
                let forced = u32::from(*is_move);
                self.forced += forced;
                self.scoped(|scan| {
                    for param in params {
                        scan.bind(param.pattern);
                    }
                    scan.scan(*inner, Usage::Value);
                });
                self.forced -= forced;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tml_ast::{BodyBuilder, PrimTy, Ty};
    use tml_intern::Interner;
    use tml_span::FileId;
    use tml_types::TypeTableBuilder;

    fn int() -> Ty {
        Ty::Primitive(PrimTy::I32)
    }

    /// Defines `n: I32` and `list: List` and returns the captures of the
    /// closure built by `make`.
    fn captures_of(make: impl FnOnce(&mut BodyBuilder) -> ExprId) -> Vec<(String, CaptureKind)> {
        let interner = Interner::new();
        let types = TypeTableBuilder::new(&interner).build();
        let mut b = BodyBuilder::new(&interner, FileId(0));
        let closure = make(&mut b);
        let func = b.finish("main", None, None);

        let mut env = BorrowEnv::new();
        env.push_scope();
        env.define(interner.intern("n"), true, int(), FileSpan::default(), None);
        let list = Ty::named(interner.intern("List"));
        env.define(interner.intern("list"), true, list, FileSpan::default(), None);
        analyze_captures(&func.body, closure, &env, &types)
            .into_iter()
            .map(|capture| (interner.resolve(&capture.name), capture.kind))
            .collect()
    }

    fn named(captures: &[(&str, CaptureKind)]) -> Vec<(String, CaptureKind)> {
        captures
            .iter()
            .map(|(name, kind)| ((*name).to_string(), *kind))
            .collect()
    }

    #[test]
    fn test_most_demanding_use_wins() {
        let captures = captures_of(|b| {
            b.begin_block();
            let read = b.ident("list");
            let len = b.method_call(read, "len", vec![], ReceiverMode::Ref);
            b.expr_stmt(len);
            let n = b.ident("n");
            let print = b.call("print", vec![n]);
            b.expr_stmt(print);
            let list = b.ident("list");
            let push = b.method_call(list, "push", vec![], ReceiverMode::MutRef);
            b.expr_stmt(push);
            let body = b.end_block(None);
            b.closure(Vec::new(), body, false)
        });
        assert_eq!(
            captures,
            named(&[("list", CaptureKind::ByMutRef), ("n", CaptureKind::ByRef)])
        );
    }

    #[test]
    fn test_consuming_an_owned_value_moves_it() {
        let captures = captures_of(|b| {
            let list = b.ident("list");
            let consume = b.call("consume", vec![list]);
            b.closure(Vec::new(), consume, false)
        });
        assert_eq!(captures, named(&[("list", CaptureKind::ByMove)]));
    }

    #[test]
    fn test_move_closure_copies_copy_values() {
        let captures = captures_of(|b| {
            let n = b.ident("n");
            let list = b.ident("list");
            let pair = b.tuple(vec![n, list]);
            b.closure(Vec::new(), pair, true)
        });
        assert_eq!(
            captures,
            named(&[("n", CaptureKind::ByCopy), ("list", CaptureKind::ByMove)])
        );
    }

    #[test]
    fn test_params_and_locals_are_not_captured() {
        let captures = captures_of(|b| {
            let param = b.closure_param("n", false, int());
            b.begin_block();
            let zero = b.int(0);
            b.let_var("list", true, None, Some(zero));
            let target = b.ident("list");
            let n = b.ident("n");
            let assign = b.assign(target, n);
            b.expr_stmt(assign);
            let body = b.end_block(None);
            b.closure(vec![param], body, false)
        });
        assert!(captures.is_empty());
    }

    #[test]
    fn test_nested_closure_captures_flow_out() {
        let captures = captures_of(|b| {
            let target = b.ident("n");
            let one = b.int(1);
            let assign = b.assign(target, one);
            let inner = b.closure(Vec::new(), assign, false);
            b.closure(Vec::new(), inner, false)
        });
        assert_eq!(captures, named(&[("n", CaptureKind::ByMutRef)]));
    }
}
