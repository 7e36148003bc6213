//! Borrow checking driver
//!
//! This crate runs the configured borrow checking backend over every function
//! of a module, optionally on worker threads, and collects the results in
//! item order.

use std::fs;
use std::num::NonZeroUsize;
use std::panic;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use log::{debug, info};
use tml_ast::{FuncDecl, Module};
use tml_borrow_check::{
    Algorithm, BorrowCheckBackend, BorrowCheckConfig, BorrowError, CheckContext, CheckResult,
    InternalError, NllChecker,
};
use tml_intern::{Interner, Symbol};
use tml_polonius::PoloniusChecker;
use tml_span::FileSpan;
use tml_types::TypeEnv;

/// Outcome of checking one function
#[derive(Debug)]
pub struct FunctionReport {
    /// Function name
    pub name: Symbol,
    /// Function location, used to place internal faults
    pub span: FileSpan,
    /// User errors, or the fault that aborted the function
    pub result: CheckResult,
}

/// Outcome of checking a module, one entry per function in item order
#[derive(Debug, Default)]
pub struct ModuleReport {
    /// Per-function results
    pub functions: Vec<FunctionReport>,
}

impl ModuleReport {
    /// All errors in item order. An aborted function contributes a single
    /// `InternalInconsistency` record.
    pub fn errors(&self) -> Vec<BorrowError> {
        self.functions
            .iter()
            .flat_map(|report| match &report.result {
                Ok(errors) => errors.clone(),
                Err(fault) => vec![fault.to_borrow_error(report.span)],
            })
            .collect()
    }

    /// Faults that aborted a function.
    pub fn internal_errors(&self) -> impl Iterator<Item = &InternalError> {
        self.functions.iter().filter_map(|report| report.result.as_ref().err())
    }

    /// No function produced an error or fault.
    pub fn is_clean(&self) -> bool {
        self.functions
            .iter()
            .all(|report| report.result.as_ref().is_ok_and(Vec::is_empty))
    }
}

/// The backend for `algorithm`.
pub fn backend(algorithm: Algorithm) -> Box<dyn BorrowCheckBackend> {
    match algorithm {
        Algorithm::Nll => Box::new(NllChecker::new()),
        Algorithm::Polonius => Box::new(PoloniusChecker::new()),
    }
}

/// Check every function of `module` with the backend chosen by `config`.
///
/// `types` must be fully built before this is called; it is only read.
pub fn check_module(
    module: &Module,
    types: &dyn TypeEnv,
    interner: &Interner,
    config: &BorrowCheckConfig,
) -> ModuleReport {
    let backend = backend(config.algorithm);
    let cx = CheckContext::new(types, interner, config);
    let functions: Vec<&FuncDecl> = module.functions().collect();

    let results = if config.parallel && functions.len() > 1 {
        check_parallel(backend.as_ref(), &functions, cx)
    } else {
        functions
            .iter()
            .map(|func| backend.check_function(func, &cx))
            .collect()
    };

    let report = ModuleReport {
        functions: functions
            .iter()
            .zip(results)
            .map(|(func, result)| FunctionReport {
                name: func.name,
                span: func.span,
                result,
            })
            .collect(),
    };
    info!(
        "{} checked `{}`: {} functions, {} errors",
        backend.name(),
        interner.resolve(&module.name),
        report.functions.len(),
        report.errors().len()
    );
    report
}

/// Splits `functions` into contiguous chunks, one per worker, so that
/// concatenating the chunk results keeps item order.
fn check_parallel(
    backend: &dyn BorrowCheckBackend,
    functions: &[&FuncDecl],
    cx: CheckContext<'_>,
) -> Vec<CheckResult> {
    let workers = thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(functions.len())
        .max(1);
    let chunk_size = functions.len().div_ceil(workers);
    debug!("checking {} functions on {workers} threads", functions.len());

    thread::scope(|scope| {
        let handles: Vec<_> = functions
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|func| backend.check_function(func, &cx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    })
}

/// Read a [`BorrowCheckConfig`] from a TOML file.
///
/// # Errors
///
/// Fails if the file cannot be read or does not parse.
pub fn load_config(path: impl AsRef<Path>) -> Result<BorrowCheckConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read borrow checker config {}", path.display()))?;
    let config = BorrowCheckConfig::from_toml_str(&text)
        .with_context(|| format!("failed to parse borrow checker config {}", path.display()))?;
    debug!("loaded {config:?} from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tml_ast::{BodyBuilder, ImplDecl, Item, Ty};
    use tml_borrow_check::ErrorKind;
    use tml_span::{FileId, Span};
    use tml_types::TypeTableBuilder;

    /// `fn name() { let v = make(); consume(v); print(v) }`, or the same
    /// without the second use.
    fn func(interner: &Interner, name: &str, broken: bool) -> FuncDecl {
        let mut b = BodyBuilder::new(interner, FileId(0));
        let init = b.call("make", vec![]);
        b.let_var("v", false, Some(Ty::named(interner.intern("List"))), Some(init));
        let names: &[&str] = if broken { &["consume", "print"] } else { &["consume"] };
        for callee in names {
            let v = b.ident("v");
            let call = b.call(callee, vec![v]);
            b.expr_stmt(call);
        }
        b.finish(name, None, None)
    }

    fn module(interner: &Interner) -> Module {
        let method = func(interner, "method", true);
        Module {
            name: interner.intern("demo"),
            file: FileId(0),
            items: vec![
                Item::Function(func(interner, "clean", false)),
                Item::Function(func(interner, "broken", true)),
                Item::Impl(ImplDecl {
                    self_ty: Ty::named(interner.intern("Demo")),
                    behavior: None,
                    methods: vec![method],
                    span: FileSpan::new(FileId(0), Span::new(0, 0)),
                }),
                Item::Function(func(interner, "tail", true)),
            ],
        }
    }

    fn summary(interner: &Interner, report: &ModuleReport) -> Vec<(String, usize)> {
        report
            .functions
            .iter()
            .map(|f| (interner.resolve(&f.name), f.result.as_ref().map_or(0, Vec::len)))
            .collect()
    }

    #[test]
    fn test_functions_reported_in_item_order() {
        env_logger::builder().is_test(true).try_init().ok();
        let interner = Interner::new();
        let types = TypeTableBuilder::new(&interner).build();
        let module = module(&interner);

        for algorithm in [Algorithm::Nll, Algorithm::Polonius] {
            for parallel in [false, true] {
                let config = BorrowCheckConfig {
                    algorithm,
                    parallel,
                    ..BorrowCheckConfig::default()
                };
                let report = check_module(&module, &types, &interner, &config);
                assert_eq!(
                    summary(&interner, &report),
                    [
                        (String::from("clean"), 0),
                        (String::from("broken"), 1),
                        (String::from("method"), 1),
                        (String::from("tail"), 1),
                    ]
                );
                assert!(!report.is_clean());
                assert!(report.errors().iter().all(|e| e.kind == ErrorKind::UseAfterMove));
            }
        }
    }

    #[test]
    fn test_solver_fault_aborts_only_its_function() {
        let interner = Interner::new();
        let types = TypeTableBuilder::new(&interner).build();
        let module = module(&interner);
        let config = BorrowCheckConfig {
            algorithm: Algorithm::Polonius,
            max_solver_iterations: Some(1),
            ..BorrowCheckConfig::default()
        };

        let report = check_module(&module, &types, &interner, &config);
        assert_eq!(report.internal_errors().count(), 4);
        let errors = report.errors();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::InternalInconsistency));
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(backend(Algorithm::Nll).name(), "nll");
        assert_eq!(backend(Algorithm::Polonius).name(), "polonius");
    }

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "algorithm = \"polonius\"\nparallel = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.algorithm, Algorithm::Polonius);
        assert!(config.parallel);
        assert!(config.two_phase_borrows);
    }

    #[test]
    fn test_load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("borrowck.toml");
        let err = load_config(&missing).unwrap_err();
        assert!(err.to_string().contains("borrowck.toml"));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "algorithm = \"fast\"").unwrap();
        let err = load_config(&bad).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse"));
    }
}
