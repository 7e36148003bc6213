//! The interface shared by the NLL and Polonius checkers.

use tml_ast::FuncDecl;
use tml_intern::Interner;
use tml_types::TypeEnv;

use crate::{BorrowCheckConfig, CheckResult};

/// Read-only inputs shared by every function checked in one run.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    /// Frozen type environment
    pub types: &'a dyn TypeEnv,
    /// Interner the AST was built with
    pub interner: &'a Interner,
    /// Run configuration
    pub config: &'a BorrowCheckConfig,
}

impl<'a> CheckContext<'a> {
    /// Bundles the inputs of a checking run.
    #[must_use]
    pub fn new(types: &'a dyn TypeEnv, interner: &'a Interner, config: &'a BorrowCheckConfig) -> Self {
        Self {
            types,
            interner,
            config,
        }
    }
}

/// A borrow checking algorithm.
///
/// Backends are stateless between functions, so one instance can check
/// functions from several threads at once.
pub trait BorrowCheckBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks one function and returns its errors in source order.
    ///
    /// # Errors
    ///
    /// Returns an [`crate::InternalError`] if the checker's own state became
    /// inconsistent. User errors are never returned this way.
    fn check_function(&self, func: &FuncDecl, cx: &CheckContext<'_>) -> CheckResult;
}
