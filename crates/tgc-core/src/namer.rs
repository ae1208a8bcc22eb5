//! Deterministic naming for anonymous IR nodes.
//!
//! Two codegen runs over structurally identical IR must emit byte-identical
//! source text for the build-cache fingerprint to mean anything; names
//! minted from a fresh counter are not stable across runs unless callers
//! reset or scope a `Namer` per module, which `tgc-codegen` does.

use std::collections::HashMap;

/// Mints collision-free identifiers from a human-readable hint plus a
/// monotonic per-hint counter (`v0`, `v1`, `buf0`, `task0`, ...).
#[derive(Debug, Default)]
pub struct Namer {
    counters: HashMap<String, u32>,
}

impl Namer {
    pub fn new() -> Self {
        Namer { counters: HashMap::new() }
    }

    pub fn fresh(&mut self, hint: &str) -> String {
        let counter = self.counters.entry(hint.to_string()).or_insert(0);
        let name = format!("{hint}{counter}");
        *counter += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent_per_hint() {
        let mut namer = Namer::new();
        assert_eq!(namer.fresh("v"), "v0");
        assert_eq!(namer.fresh("v"), "v1");
        assert_eq!(namer.fresh("buf"), "buf0");
        assert_eq!(namer.fresh("v"), "v2");
    }

    #[test]
    fn fresh_names_never_repeat_for_same_hint() {
        let mut namer = Namer::new();
        let names: Vec<String> = (0..50).map(|_| namer.fresh("t")).collect();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
