//! Shared fixtures for the cross-backend borrow checking tests
//!
//! Every test program is run through both backends; [`Harness::both`]
//! returns their error kinds side by side so properties that must hold for
//! either algorithm are asserted once.

use std::fmt::Write;

use tml_ast::{BodyBuilder, ExprId, FuncDecl, PrimTy, ReceiverMode, Ty};
use tml_borrow_check::{
    Algorithm, BorrowCheckBackend, BorrowCheckConfig, BorrowError, CheckContext, ErrorKind,
};
use tml_borrowck_driver::backend;
use tml_intern::Interner;
use tml_span::FileId;
use tml_types::{TypeTable, TypeTableBuilder};

/// Interner, type table and configuration for one test
pub struct Harness {
    /// Interner shared by every body built in the test
    pub interner: Interner,
    /// Frozen types
    pub types: TypeTable,
    /// Configuration used for both backends
    pub config: BorrowCheckConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// A harness with `Token { id }`, `Tokens { first, second }` and an
    /// `Option` enum, plus default configuration.
    #[must_use]
    pub fn new() -> Self {
        env_logger::builder().is_test(true).try_init().ok();
        let interner = Interner::new();
        let token = Ty::named(interner.intern("Token"));
        let mut types = TypeTableBuilder::new(&interner);
        types
            .add_struct("Token", vec![("id", int())])
            .add_struct("Tokens", vec![("first", token.clone()), ("second", token)])
            .add_enum("Option", vec![("Some", vec![int()]), ("None", vec![])]);
        Self {
            types: types.build(),
            interner,
            config: BorrowCheckConfig::default(),
        }
    }

    /// A named type.
    pub fn ty(&self, name: &str) -> Ty {
        Ty::named(self.interner.intern(name))
    }

    /// A fresh body builder in file 0.
    #[must_use]
    pub fn builder(&self) -> BodyBuilder {
        BodyBuilder::new(&self.interner, FileId(0))
    }

    /// Errors reported by `algorithm`. An internal fault becomes a single
    /// `InternalInconsistency` record.
    pub fn check(&self, algorithm: Algorithm, func: &FuncDecl) -> Vec<BorrowError> {
        let config = BorrowCheckConfig {
            algorithm,
            ..self.config.clone()
        };
        let cx = CheckContext::new(&self.types, &self.interner, &config);
        backend(algorithm)
            .check_function(func, &cx)
            .unwrap_or_else(|fault| vec![fault.to_borrow_error(func.span)])
    }

    /// Error kinds from NLL and Polonius, in that order.
    pub fn both(&self, func: &FuncDecl) -> [Vec<ErrorKind>; 2] {
        [Algorithm::Nll, Algorithm::Polonius].map(|algorithm| kinds(&self.check(algorithm, func)))
    }

    /// `let mut? name: ty = make();`
    pub fn made(&self, b: &mut BodyBuilder, name: &str, mutable: bool, ty: &str) {
        let init = b.call("make", vec![]);
        b.let_var(name, mutable, Some(self.ty(ty)), Some(init));
    }
}

/// `i32`
#[must_use]
pub fn int() -> Ty {
    Ty::Primitive(PrimTy::I32)
}

/// Error kinds in report order.
pub fn kinds(errors: &[BorrowError]) -> Vec<ErrorKind> {
    errors.iter().map(|error| error.kind).collect()
}

/// `callee(name);` as a statement. Returns the argument.
pub fn call_stmt(b: &mut BodyBuilder, callee: &str, name: &str) -> ExprId {
    let arg = b.ident(name);
    let call = b.call(callee, vec![arg]);
    b.expr_stmt(call);
    arg
}

/// `name = value;` as a statement. Returns the assignment.
pub fn assign_int(b: &mut BodyBuilder, name: &str, value: i64) -> ExprId {
    let target = b.ident(name);
    let value = b.int(value);
    let assign = b.assign(target, value);
    b.expr_stmt(assign);
    assign
}

/// `receiver.method(args)` as a statement.
pub fn method_stmt(b: &mut BodyBuilder, receiver: &str, method: &str, mode: ReceiverMode) -> ExprId {
    let recv = b.ident(receiver);
    let call = b.method_call(recv, method, vec![], mode);
    b.expr_stmt(call);
    call
}

/// Plain-text rendering of errors with byte ranges, for snapshots.
pub fn render(errors: &[BorrowError]) -> String {
    let mut out = String::new();
    for error in errors {
        writeln!(out, "{error}").ok();
        writeln!(out, "  primary: {:?}", error.primary_span.range()).ok();
        for related in &error.related {
            writeln!(out, "  {:?}: {}", related.span.range(), related.label).ok();
        }
        for note in &error.notes {
            writeln!(out, "  note: {note}").ok();
        }
        for suggestion in &error.suggestions {
            writeln!(out, "  help: {suggestion}").ok();
        }
    }
    out
}
