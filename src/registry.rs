//! Action class registry — per-class policy flags and default risk axes.

use std::collections::HashMap;

/// Policy lookup for a namespaced action class.
///
/// The built-in [`StaticClassRegistry`] covers the self-modification classes;
/// embedders with their own action taxonomy can supply an implementation.
pub trait ActionClassRegistry: Send + Sync {
    /// Classes that must always reach a human, whatever the score says.
    fn has_hard_ceiling(&self, class: &str) -> bool;
    /// Classes that may never be applied without the validation pipeline.
    fn requires_deliberation(&self, class: &str) -> bool;
    fn default_reversibility(&self, class: &str) -> f64;
    fn default_blast_radius(&self, class: &str) -> f64;
}

#[derive(Debug, Clone, Copy)]
struct ClassEntry {
    hard_ceiling: bool,
    requires_deliberation: bool,
    reversibility: f64,
    blast_radius: f64,
}

/// In-memory registry with the built-in self-modification classes.
pub struct StaticClassRegistry {
    entries: HashMap<&'static str, ClassEntry>,
}

/// Catch-all for improvement kinds nothing else claims. Hard-ceilinged so
/// anything unrecognized lands in front of a human.
pub const UNCLASSIFIED: &str = "self.unclassified";

impl StaticClassRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "self.reflection",
            ClassEntry {
                hard_ceiling: false,
                requires_deliberation: false,
                reversibility: 0.95,
                blast_radius: 0.9,
            },
        );
        entries.insert(
            "self.prompt",
            ClassEntry {
                hard_ceiling: false,
                requires_deliberation: false,
                reversibility: 0.9,
                blast_radius: 0.7,
            },
        );
        entries.insert(
            "self.config",
            ClassEntry {
                hard_ceiling: false,
                requires_deliberation: true,
                reversibility: 0.8,
                blast_radius: 0.5,
            },
        );
        entries.insert(
            "self.code",
            ClassEntry {
                hard_ceiling: false,
                requires_deliberation: true,
                reversibility: 0.6,
                blast_radius: 0.3,
            },
        );
        entries.insert(
            "self.security",
            ClassEntry {
                hard_ceiling: true,
                requires_deliberation: true,
                reversibility: 0.2,
                blast_radius: 0.1,
            },
        );
        entries.insert(
            UNCLASSIFIED,
            ClassEntry {
                hard_ceiling: true,
                requires_deliberation: true,
                reversibility: 0.0,
                blast_radius: 0.0,
            },
        );
        Self { entries }
    }

    fn entry(&self, class: &str) -> ClassEntry {
        self.entries.get(class).copied().unwrap_or(ClassEntry {
            hard_ceiling: false,
            requires_deliberation: true,
            reversibility: 0.0,
            blast_radius: 0.0,
        })
    }
}

impl Default for StaticClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionClassRegistry for StaticClassRegistry {
    fn has_hard_ceiling(&self, class: &str) -> bool {
        self.entry(class).hard_ceiling
    }

    fn requires_deliberation(&self, class: &str) -> bool {
        self.entry(class).requires_deliberation
    }

    fn default_reversibility(&self, class: &str) -> f64 {
        self.entry(class).reversibility
    }

    fn default_blast_radius(&self, class: &str) -> f64 {
        self.entry(class).blast_radius
    }
}

/// Map an improvement kind onto its action class. Unknown kinds map to the
/// highest-scrutiny class.
#[must_use]
pub fn classify(kind: &str) -> &'static str {
    match kind {
        "reflection" => "self.reflection",
        "prompt" | "persona" => "self.prompt",
        "config" => "self.config",
        "code" => "self.code",
        "security" => "self.security",
        _ => UNCLASSIFIED,
    }
}
