//! Typed abstract syntax tree consumed by the TML borrow checkers.
//!
//! The tree is produced by the parser and annotated by type inference before
//! it reaches this crate's consumers: every `let` carries its resolved type
//! and every method call carries the receiver mode inference picked for it.
//! Function bodies store their nodes in arenas addressed by [`ExprId`],
//! [`StmtId`] and [`PatternId`].

pub mod builder;
pub mod ty;
pub mod visitor;

use la_arena::{Arena, Idx};
use tml_intern::Symbol;
use tml_span::{FileId, FileSpan, Span};

pub use builder::BodyBuilder;
pub use ty::{PrimTy, Ty};

/// AST node IDs
pub type ExprId = Idx<Expr>;
/// Statement ID
pub type StmtId = Idx<Stmt>;
/// Pattern ID
pub type PatternId = Idx<Pattern>;

/// A source file's worth of items
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Module name
    pub name: Symbol,
    /// File the module was parsed from
    pub file: FileId,
    /// Top-level items in source order
    pub items: Vec<Item>,
}

impl Module {
    /// Every checkable function in source order, impl methods included.
    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.items.iter().flat_map(|item| match item {
            Item::Function(func) => std::slice::from_ref(func).iter(),
            Item::Impl(imp) => imp.methods.iter(),
        })
    }
}

/// Top-level item
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Free function
    Function(FuncDecl),
    /// `impl` block
    Impl(ImplDecl),
}

/// An `impl` block
#[derive(Debug, Clone, PartialEq)]
pub struct ImplDecl {
    /// The implementing type
    pub self_ty: Ty,
    /// Behavior being implemented, if any
    pub behavior: Option<Symbol>,
    /// Methods in source order
    pub methods: Vec<FuncDecl>,
    /// Source location
    pub span: FileSpan,
}

/// Function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    /// Function name
    pub name: Symbol,
    /// Parameters; their patterns live in `body.patterns`
    pub params: Vec<Param>,
    /// Declared return type
    pub ret_ty: Option<Ty>,
    /// Function body
    pub body: Body,
    /// Source location
    pub span: FileSpan,
}

/// Function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Binding pattern
    pub pattern: PatternId,
    /// Declared type
    pub ty: Ty,
    /// Source location
    pub span: FileSpan,
}

/// Arena storage for one function body
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Expression arena
    pub exprs: Arena<Expr>,
    /// Statement arena
    pub stmts: Arena<Stmt>,
    /// Pattern arena
    pub patterns: Arena<Pattern>,
    /// Root block expression
    pub root: ExprId,
}

impl Body {
    /// Creates a new empty body
    #[must_use]
    pub fn new() -> Self {
        let mut exprs = Arena::new();
        // Placeholder root until a builder installs the real block
        let root = exprs.alloc(Expr::Literal {
            kind: LiteralKind::Unit,
            span: FileSpan::new(FileId(0), Span::new(0, 0)),
        });

        Self {
            exprs,
            stmts: Arena::new(),
            patterns: Arena::new(),
            root,
        }
    }

    /// Source location of an expression.
    #[must_use]
    pub fn expr_span(&self, expr: ExprId) -> FileSpan {
        self.exprs[expr].span()
    }

    /// Binding patterns introduced by `pattern`, left to right.
    #[must_use]
    pub fn bindings(&self, pattern: PatternId) -> Vec<PatternId> {
        let mut out = Vec::new();
        let mut stack = vec![pattern];
        while let Some(pat) = stack.pop() {
            match &self.patterns[pat] {
                Pattern::Binding { .. } => out.push(pat),
                Pattern::Tuple { patterns, .. } | Pattern::Variant { sub_patterns: patterns, .. } => {
                    stack.extend(patterns.iter().rev());
                }
                Pattern::Struct { fields, .. } => {
                    stack.extend(fields.iter().rev().map(|(_, sub)| *sub));
                }
                Pattern::Wildcard { .. } | Pattern::Literal { .. } => {}
            }
        }
        out
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

/// How a method takes its receiver, as decided by type inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReceiverMode {
    /// `this` by value
    Value,
    /// `ref this`
    #[default]
    Ref,
    /// `mut ref this`
    MutRef,
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Literal {
        /// Literal kind
        kind: LiteralKind,
        /// Source location
        span: FileSpan,
    },
    /// Identifier reference
    Ident {
        /// Name being referenced
        name: Symbol,
        /// Source location
        span: FileSpan,
    },
    /// Field access (`base.field`)
    Field {
        /// Aggregate being projected
        base: ExprId,
        /// Field name
        field: Symbol,
        /// Source location
        span: FileSpan,
    },
    /// Indexing (`base[index]`)
    Index {
        /// Collection being indexed
        base: ExprId,
        /// Index expression
        index: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Dereference (`*operand`)
    Deref {
        /// Reference being dereferenced
        operand: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Reference creation (`ref e` / `mut ref e`)
    Ref {
        /// `mut ref`
        mutable: bool,
        /// Borrowed expression
        operand: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Free function call
    Call {
        /// Function name
        callee: Symbol,
        /// Arguments
        args: Vec<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// Method call
    MethodCall {
        /// Receiver
        receiver: ExprId,
        /// Method name
        method: Symbol,
        /// Arguments
        args: Vec<ExprId>,
        /// Receiver mode resolved by type inference
        receiver_mode: ReceiverMode,
        /// Source location
        span: FileSpan,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: ExprId,
        /// Right operand
        rhs: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Assignment (`target = value`)
    Assign {
        /// Place being written
        target: ExprId,
        /// New value
        value: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// Block expression
    Block {
        /// Statements
        stmts: Vec<StmtId>,
        /// Trailing expression
        tail: Option<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// If expression
    If {
        /// Condition
        condition: ExprId,
        /// Then branch
        then_branch: ExprId,
        /// Else branch
        else_branch: Option<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// `when` expression
    When {
        /// Scrutinee
        scrutinee: ExprId,
        /// Arms in source order
        arms: Vec<WhenArm>,
        /// Source location
        span: FileSpan,
    },
    /// Infinite loop
    Loop {
        /// Loop body
        body: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// `while` loop
    While {
        /// Condition, evaluated before each iteration
        condition: ExprId,
        /// Loop body
        body: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// `for` loop
    For {
        /// Element binding
        pattern: PatternId,
        /// Iterated expression, consumed by the loop
        iterable: ExprId,
        /// Loop body
        body: ExprId,
        /// Source location
        span: FileSpan,
    },
    /// `return`
    Return {
        /// Returned value
        value: Option<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// `break`
    Break {
        /// Source location
        span: FileSpan,
    },
    /// `continue`
    Continue {
        /// Source location
        span: FileSpan,
    },
    /// Tuple construction
    Tuple {
        /// Elements
        elements: Vec<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// Array literal
    Array {
        /// Elements
        elements: Vec<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// Struct literal
    StructLit {
        /// Struct name
        name: Symbol,
        /// Field initializers
        fields: Vec<(Symbol, ExprId)>,
        /// Source location
        span: FileSpan,
    },
    /// Closure (`do(params) body`, or `move do(params) body`)
    Closure {
        /// Parameters, scoped to the body
        params: Vec<Param>,
        /// Closure body
        body: ExprId,
        /// Captures everything by value
        is_move: bool,
        /// Source location
        span: FileSpan,
    },
}

impl Expr {
    /// Source location of this expression.
    #[must_use]
    pub fn span(&self) -> FileSpan {
        match self {
            Self::Literal { span, .. }
            | Self::Ident { span, .. }
            | Self::Field { span, .. }
            | Self::Index { span, .. }
            | Self::Deref { span, .. }
            | Self::Ref { span, .. }
            | Self::Call { span, .. }
            | Self::MethodCall { span, .. }
            | Self::Binary { span, .. }
            | Self::Unary { span, .. }
            | Self::Assign { span, .. }
            | Self::Block { span, .. }
            | Self::If { span, .. }
            | Self::When { span, .. }
            | Self::Loop { span, .. }
            | Self::While { span, .. }
            | Self::For { span, .. }
            | Self::Return { span, .. }
            | Self::Break { span }
            | Self::Continue { span }
            | Self::Tuple { span, .. }
            | Self::Array { span, .. }
            | Self::StructLit { span, .. }
            | Self::Closure { span, .. } => *span,
        }
    }

    /// Returns `true` for identifier, field, index and dereference forms.
    #[must_use]
    pub fn is_place_expr(&self) -> bool {
        matches!(
            self,
            Self::Ident { .. } | Self::Field { .. } | Self::Index { .. } | Self::Deref { .. }
        )
    }
}

/// One arm of a `when` expression
#[derive(Debug, Clone, PartialEq)]
pub struct WhenArm {
    /// Pattern
    pub pattern: PatternId,
    /// Guard expression
    pub guard: Option<ExprId>,
    /// Body expression
    pub body: ExprId,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Let binding
    Let {
        /// Pattern
        pattern: PatternId,
        /// Resolved type of the bound value
        ty: Option<Ty>,
        /// Initializer expression
        initializer: Option<ExprId>,
        /// Source location
        span: FileSpan,
    },
    /// Expression statement
    Expr {
        /// Expression
        expr: ExprId,
        /// Source location
        span: FileSpan,
    },
}

impl Stmt {
    /// Source location of this statement.
    #[must_use]
    pub fn span(&self) -> FileSpan {
        match self {
            Self::Let { span, .. } | Self::Expr { span, .. } => *span,
        }
    }
}

/// Patterns
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Wildcard pattern (_)
    Wildcard {
        /// Source location
        span: FileSpan,
    },
    /// Binding pattern
    Binding {
        /// Variable name
        name: Symbol,
        /// Declared with `mut`
        mutable: bool,
        /// Source location
        span: FileSpan,
    },
    /// Literal pattern
    Literal {
        /// Literal value
        kind: LiteralKind,
        /// Source location
        span: FileSpan,
    },
    /// Tuple pattern
    Tuple {
        /// Sub-patterns
        patterns: Vec<PatternId>,
        /// Source location
        span: FileSpan,
    },
    /// Struct pattern
    Struct {
        /// Struct name
        name: Symbol,
        /// Field patterns
        fields: Vec<(Symbol, PatternId)>,
        /// Source location
        span: FileSpan,
    },
    /// Enum variant pattern
    Variant {
        /// Variant name
        variant: Symbol,
        /// Sub-patterns
        sub_patterns: Vec<PatternId>,
        /// Source location
        span: FileSpan,
    },
}

impl Pattern {
    /// Source location of this pattern.
    #[must_use]
    pub fn span(&self) -> FileSpan {
        match self {
            Self::Wildcard { span }
            | Self::Binding { span, .. }
            | Self::Literal { span, .. }
            | Self::Tuple { span, .. }
            | Self::Struct { span, .. }
            | Self::Variant { span, .. } => *span,
        }
    }
}

/// Literal kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralKind {
    /// Integer literal
    Integer(i64),
    /// String literal
    String(Symbol),
    /// Boolean literal
    Bool(bool),
    /// Character literal
    Char(char),
    /// Unit literal
    Unit,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Division (/)
    Div,
    /// Equality (==)
    Eq,
    /// Inequality (!=)
    Ne,
    /// Less than (<)
    Lt,
    /// Greater than (>)
    Gt,
    /// Logical and
    And,
    /// Logical or
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
    /// Logical not
    Not,
}
