//! Process-wide builtin type tables.

use std::sync::OnceLock;

use rustc_hash::FxHashSet;

fn owning_builtins() -> &'static FxHashSet<&'static str> {
    static TABLE: OnceLock<FxHashSet<&'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        ["Str", "String", "List", "Vec", "HashMap", "Box", "Buffer"]
            .into_iter()
            .collect()
    })
}

/// Builtin types that own heap memory: never Copy, always need drop.
#[must_use]
pub fn is_owning_builtin(name: &str) -> bool {
    owning_builtins().contains(name)
}
