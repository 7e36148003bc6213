//! String interning for identifiers, field names and type names.
//!
//! The interner is shared between the AST producer, the type table and every
//! checker worker thread, so it is backed by lasso's lock-free
//! [`ThreadedRodeo`].

pub use lasso::Spur as Symbol;
use lasso::ThreadedRodeo;
use std::sync::Arc;

/// Thread-safe string interner
#[derive(Clone, Debug)]
pub struct Interner {
    inner: Arc<ThreadedRodeo>,
}

impl Interner {
    /// Creates an empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ThreadedRodeo::new()),
        }
    }

    /// Interns `text`, returning the existing symbol if already present.
    pub fn intern(&self, text: &str) -> Symbol {
        self.inner.get_or_intern(text)
    }

    /// Looks up `text` without interning it.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<Symbol> {
        self.inner.get(text)
    }

    /// Resolves a symbol back to its text, or `"<unknown>"` for a foreign symbol.
    #[must_use]
    pub fn resolve(&self, sym: &Symbol) -> String {
        self.try_resolve(sym)
            .unwrap_or_else(|| String::from("<unknown>"))
    }

    /// Resolves a symbol back to its text.
    #[must_use]
    pub fn try_resolve(&self, sym: &Symbol) -> Option<String> {
        self.inner.try_resolve(sym).map(str::to_string)
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable_across_clones() {
        let interner = Interner::new();
        let first = interner.intern("list");
        let shared = interner.clone();
        assert_eq!(shared.intern("list"), first);
        assert_eq!(shared.resolve(&first), "list");
        assert!(interner.get("missing").is_none());
    }
}
