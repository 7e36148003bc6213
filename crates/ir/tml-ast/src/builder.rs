//! Programmatic construction of function bodies.
//!
//! Front ends that do not parse source text (tests, synthesized glue code)
//! build bodies through [`BodyBuilder`]. Every node gets a fresh, strictly
//! increasing span so diagnostics keep a stable source order.
//!
//! ```rust
//! use tml_ast::{BodyBuilder, ReceiverMode};
//! use tml_intern::Interner;
//! use tml_span::FileId;
//!
//! let interner = Interner::new();
//! let mut b = BodyBuilder::new(&interner, FileId(0));
//! let list = b.ident("list");
//! let len_recv = b.ident("list");
//! let len = b.method_call(len_recv, "len", vec![], ReceiverMode::Ref);
//! let push = b.method_call(list, "push", vec![len], ReceiverMode::MutRef);
//! b.expr_stmt(push);
//! let func = b.finish("grow", None, None);
//! assert_eq!(func.params.len(), 0);
//! ```

use tml_intern::Interner;
use tml_span::{FileId, FileSpan, Span};

use crate::{
    BinaryOp, Body, Expr, ExprId, FuncDecl, LiteralKind, Param, Pattern, PatternId,
    ReceiverMode, Stmt, Ty, UnaryOp, WhenArm,
};

/// Incremental builder for a [`FuncDecl`].
pub struct BodyBuilder {
    interner: Interner,
    file: FileId,
    body: Body,
    params: Vec<Param>,
    /// Open blocks; the first entry is the function's root block
    blocks: Vec<(u32, Vec<crate::StmtId>)>,
    offset: u32,
}

impl BodyBuilder {
    /// Starts an empty function body in `file`.
    #[must_use]
    pub fn new(interner: &Interner, file: FileId) -> Self {
        Self {
            interner: interner.clone(),
            file,
            body: Body::new(),
            params: Vec::new(),
            blocks: vec![(0, Vec::new())],
            offset: 1,
        }
    }

    fn next_span(&mut self) -> FileSpan {
        let start = self.offset;
        self.offset += 1;
        FileSpan::new(self.file, Span::new(start, start + 1))
    }

    fn span_from(&mut self, start: u32) -> FileSpan {
        let end = self.offset.max(start + 1);
        self.offset = end + 1;
        FileSpan::new(self.file, Span::new(start, end))
    }

    fn alloc(&mut self, make: impl FnOnce(FileSpan) -> Expr) -> ExprId {
        let span = self.next_span();
        self.body.exprs.alloc(make(span))
    }

    /// Integer literal.
    pub fn int(&mut self, value: i64) -> ExprId {
        self.alloc(|span| Expr::Literal {
            kind: LiteralKind::Integer(value),
            span,
        })
    }

    /// Boolean literal.
    pub fn bool(&mut self, value: bool) -> ExprId {
        self.alloc(|span| Expr::Literal {
            kind: LiteralKind::Bool(value),
            span,
        })
    }

    /// String literal.
    pub fn string(&mut self, value: &str) -> ExprId {
        let sym = self.interner.intern(value);
        self.alloc(|span| Expr::Literal {
            kind: LiteralKind::String(sym),
            span,
        })
    }

    /// Identifier.
    pub fn ident(&mut self, name: &str) -> ExprId {
        let name = self.interner.intern(name);
        self.alloc(|span| Expr::Ident { name, span })
    }

    /// `base.field`
    pub fn field(&mut self, base: ExprId, field: &str) -> ExprId {
        let field = self.interner.intern(field);
        self.alloc(|span| Expr::Field { base, field, span })
    }

    /// `base[index]`
    pub fn index(&mut self, base: ExprId, index: ExprId) -> ExprId {
        self.alloc(|span| Expr::Index { base, index, span })
    }

    /// `*operand`
    pub fn deref(&mut self, operand: ExprId) -> ExprId {
        self.alloc(|span| Expr::Deref { operand, span })
    }

    /// `ref operand`
    pub fn ref_(&mut self, operand: ExprId) -> ExprId {
        self.alloc(|span| Expr::Ref {
            mutable: false,
            operand,
            span,
        })
    }

    /// `mut ref operand`
    pub fn mut_ref(&mut self, operand: ExprId) -> ExprId {
        self.alloc(|span| Expr::Ref {
            mutable: true,
            operand,
            span,
        })
    }

    /// `callee(args...)`
    pub fn call(&mut self, callee: &str, args: Vec<ExprId>) -> ExprId {
        let callee = self.interner.intern(callee);
        self.alloc(|span| Expr::Call { callee, args, span })
    }

    /// `receiver.method(args...)`
    pub fn method_call(
        &mut self,
        receiver: ExprId,
        method: &str,
        args: Vec<ExprId>,
        receiver_mode: ReceiverMode,
    ) -> ExprId {
        let method = self.interner.intern(method);
        self.alloc(|span| Expr::MethodCall {
            receiver,
            method,
            args,
            receiver_mode,
            span,
        })
    }

    /// `lhs op rhs`
    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.alloc(|span| Expr::Binary { op, lhs, rhs, span })
    }

    /// `op operand`
    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.alloc(|span| Expr::Unary { op, operand, span })
    }

    /// `target = value`
    pub fn assign(&mut self, target: ExprId, value: ExprId) -> ExprId {
        self.alloc(|span| Expr::Assign {
            target,
            value,
            span,
        })
    }

    /// Tuple construction.
    pub fn tuple(&mut self, elements: Vec<ExprId>) -> ExprId {
        self.alloc(|span| Expr::Tuple { elements, span })
    }

    /// Array literal.
    pub fn array(&mut self, elements: Vec<ExprId>) -> ExprId {
        self.alloc(|span| Expr::Array { elements, span })
    }

    /// Struct literal.
    pub fn struct_lit(&mut self, name: &str, fields: Vec<(&str, ExprId)>) -> ExprId {
        let name = self.interner.intern(name);
        let fields = fields
            .into_iter()
            .map(|(field, value)| (self.interner.intern(field), value))
            .collect();
        self.alloc(|span| Expr::StructLit { name, fields, span })
    }

    /// `return value`
    pub fn ret(&mut self, value: Option<ExprId>) -> ExprId {
        self.alloc(|span| Expr::Return { value, span })
    }

    /// `break`
    pub fn brk(&mut self) -> ExprId {
        self.alloc(|span| Expr::Break { span })
    }

    /// `continue`
    pub fn cont(&mut self) -> ExprId {
        self.alloc(|span| Expr::Continue { span })
    }

    /// Opens a nested block; statements added afterwards land in it.
    pub fn begin_block(&mut self) {
        let start = self.offset;
        self.offset += 1;
        self.blocks.push((start, Vec::new()));
    }

    /// Closes the innermost block opened with [`Self::begin_block`].
    ///
    /// Closing the function's root block is ignored and yields a unit literal.
    pub fn end_block(&mut self, tail: Option<ExprId>) -> ExprId {
        if self.blocks.len() <= 1 {
            return self.alloc(|span| Expr::Literal {
                kind: LiteralKind::Unit,
                span,
            });
        }
        let (start, stmts) = self.blocks.pop().unwrap_or_default();
        let span = self.span_from(start);
        self.body.exprs.alloc(Expr::Block { stmts, tail, span })
    }

    /// `if condition { then } else { else }`
    pub fn if_(&mut self, condition: ExprId, then_branch: ExprId, else_branch: Option<ExprId>) -> ExprId {
        self.alloc(|span| Expr::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    /// `when scrutinee { arms }`
    pub fn when(&mut self, scrutinee: ExprId, arms: Vec<WhenArm>) -> ExprId {
        self.alloc(|span| Expr::When {
            scrutinee,
            arms,
            span,
        })
    }

    /// `loop { body }`
    pub fn loop_(&mut self, body: ExprId) -> ExprId {
        self.alloc(|span| Expr::Loop { body, span })
    }

    /// `while condition { body }`
    pub fn while_(&mut self, condition: ExprId, body: ExprId) -> ExprId {
        self.alloc(|span| Expr::While {
            condition,
            body,
            span,
        })
    }

    /// `for pattern in iterable { body }`
    pub fn for_(&mut self, pattern: PatternId, iterable: ExprId, body: ExprId) -> ExprId {
        self.alloc(|span| Expr::For {
            pattern,
            iterable,
            body,
            span,
        })
    }

    /// Binding pattern.
    pub fn bind(&mut self, name: &str, mutable: bool) -> PatternId {
        let name = self.interner.intern(name);
        let span = self.next_span();
        self.body.patterns.alloc(Pattern::Binding {
            name,
            mutable,
            span,
        })
    }

    /// `_`
    pub fn wildcard(&mut self) -> PatternId {
        let span = self.next_span();
        self.body.patterns.alloc(Pattern::Wildcard { span })
    }

    /// Tuple pattern.
    pub fn tuple_pat(&mut self, patterns: Vec<PatternId>) -> PatternId {
        let span = self.next_span();
        self.body.patterns.alloc(Pattern::Tuple { patterns, span })
    }

    /// Struct pattern.
    pub fn struct_pat(&mut self, name: &str, fields: Vec<(&str, PatternId)>) -> PatternId {
        let name = self.interner.intern(name);
        let fields = fields
            .into_iter()
            .map(|(field, pat)| (self.interner.intern(field), pat))
            .collect();
        let span = self.next_span();
        self.body.patterns.alloc(Pattern::Struct { name, fields, span })
    }

    /// Enum variant pattern.
    pub fn variant_pat(&mut self, variant: &str, sub_patterns: Vec<PatternId>) -> PatternId {
        let variant = self.interner.intern(variant);
        let span = self.next_span();
        self.body.patterns.alloc(Pattern::Variant {
            variant,
            sub_patterns,
            span,
        })
    }

    /// Appends `let pattern: ty = initializer` to the current block.
    pub fn let_pat(&mut self, pattern: PatternId, ty: Option<Ty>, initializer: Option<ExprId>) {
        let span = self.next_span();
        let stmt = self.body.stmts.alloc(Stmt::Let {
            pattern,
            ty,
            initializer,
            span,
        });
        self.push_stmt(stmt);
    }

    /// Appends `let name: ty = initializer` and returns the binding pattern.
    pub fn let_var(
        &mut self,
        name: &str,
        mutable: bool,
        ty: Option<Ty>,
        initializer: Option<ExprId>,
    ) -> PatternId {
        let pattern = self.bind(name, mutable);
        self.let_pat(pattern, ty, initializer);
        pattern
    }

    /// Appends an expression statement to the current block.
    pub fn expr_stmt(&mut self, expr: ExprId) {
        let span = self.body.expr_span(expr);
        let stmt = self.body.stmts.alloc(Stmt::Expr { expr, span });
        self.push_stmt(stmt);
    }

    fn push_stmt(&mut self, stmt: crate::StmtId) {
        if let Some((_, stmts)) = self.blocks.last_mut() {
            stmts.push(stmt);
        }
    }

    /// Declares a parameter.
    pub fn param(&mut self, name: &str, mutable: bool, ty: Ty) -> PatternId {
        let pattern = self.bind(name, mutable);
        let span = self.body.patterns[pattern].span();
        self.params.push(Param { pattern, ty, span });
        pattern
    }

    /// Declares a closure parameter. Unlike [`Self::param`] it does not
    /// become a parameter of the function being built.
    pub fn closure_param(&mut self, name: &str, mutable: bool, ty: Ty) -> Param {
        let pattern = self.bind(name, mutable);
        let span = self.body.patterns[pattern].span();
        Param { pattern, ty, span }
    }

    /// `do(params) body`, or `move do(params) body` when `is_move` is set.
    pub fn closure(&mut self, params: Vec<Param>, body: ExprId, is_move: bool) -> ExprId {
        self.alloc(|span| Expr::Closure {
            params,
            body,
            is_move,
            span,
        })
    }

    /// Closes every open block and produces the function declaration.
    #[must_use]
    pub fn finish(mut self, name: &str, tail: Option<ExprId>, ret_ty: Option<Ty>) -> FuncDecl {
        while self.blocks.len() > 1 {
            let block = self.end_block(None);
            self.expr_stmt(block);
        }
        let stmts = self.blocks.pop().map(|(_, stmts)| stmts).unwrap_or_default();
        let span = self.span_from(0);
        self.body.root = self.body.exprs.alloc(Expr::Block { stmts, tail, span });
        FuncDecl {
            name: self.interner.intern(name),
            params: self.params,
            ret_ty,
            body: self.body,
            span,
        }
    }
}
