//! Hash contexts.
//!
//! A context is a namespace of hash identities, e.g. plain CNF instances
//! versus their sanitized variants. Feature and database names carry their
//! context as a prefix before the first underscore (`sancnf_local`); names
//! without a recognized prefix belong to [`DEFAULT_CONTEXT`].

use std::fmt;

/// Context assumed when a name carries no known prefix.
pub const DEFAULT_CONTEXT: &str = "cnf";

/// Prefix of translator tables mapping hashes between two contexts.
pub const TRANSLATOR_PREFIX: &str = "__translator";

#[derive(Debug)]
struct ContextSpec {
    name: &'static str,
    description: &'static str,
    suffixes: &'static [&'static str],
}

static CONTEXTS: &[ContextSpec] = &[
    ContextSpec {
        name: "cnf",
        description: "Conjunctive Normal Form formulas",
        suffixes: &[".cnf", ".cnf.gz", ".cnf.lzma", ".cnf.xz", ".cnf.bz2"],
    },
    ContextSpec {
        name: "sancnf",
        description: "Sanitized Conjunctive Normal Form formulas",
        suffixes: &[".sanitized.cnf", ".sanitized.cnf.gz", ".sanitized.cnf.xz"],
    },
    ContextSpec {
        name: "kis",
        description: "k-Independent Set instances",
        suffixes: &[".kis", ".kis.gz", ".kis.xz"],
    },
    ContextSpec {
        name: "opb",
        description: "Pseudo-Boolean instances",
        suffixes: &[".opb", ".opb.gz", ".opb.xz"],
    },
    ContextSpec {
        name: "wcnf",
        description: "Weighted Conjunctive Normal Form formulas",
        suffixes: &[".wcnf", ".wcnf.gz", ".wcnf.xz"],
    },
];

/// A recognized hash namespace.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    spec: &'static ContextSpec,
}

impl Context {
    /// Look up a context by its exact tag.
    #[must_use]
    pub fn lookup(tag: &str) -> Option<Self> {
        CONTEXTS.iter().find(|c| c.name == tag).map(|spec| Self { spec })
    }

    /// The default context.
    #[must_use]
    pub fn default_context() -> Self {
        Self { spec: &CONTEXTS[0] }
    }

    /// Infer the context of a table, feature or database name.
    ///
    /// The prefix before the first underscore is the context if it is a
    /// known tag and something follows it; otherwise `fallback` is returned.
    #[must_use]
    pub fn from_name_or(name: &str, fallback: Self) -> Self {
        match name.split_once('_') {
            Some((prefix, rest)) if !rest.is_empty() => Self::lookup(prefix).unwrap_or(fallback),
            _ => fallback,
        }
    }

    /// Infer the context of a name, falling back to [`DEFAULT_CONTEXT`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::from_name_or(name, Self::default_context())
    }

    /// All known contexts.
    pub fn all() -> impl Iterator<Item = Self> {
        CONTEXTS.iter().map(|spec| Self { spec })
    }

    /// Context tag, e.g. `cnf`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Human readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.spec.description
    }

    /// Benchmark file suffixes belonging to this context.
    #[must_use]
    pub const fn suffixes(&self) -> &'static [&'static str] {
        self.spec.suffixes
    }

    /// Whether `path` looks like a benchmark file of this context.
    #[must_use]
    pub fn matches_file(&self, path: &str) -> bool {
        self.suffixes().iter().any(|suffix| path.ends_with(suffix))
    }

    /// Name of the table translating hashes of `self` into hashes of `target`.
    #[must_use]
    pub fn translator_to(&self, target: Self) -> String {
        format!("{TRANSLATOR_PREFIX}_{}_{}", self.name(), target.name())
    }

    /// Qualify a feature name with this context; the default context is implicit.
    #[must_use]
    pub fn prepend(&self, feature: &str) -> String {
        if self.name() == DEFAULT_CONTEXT {
            feature.to_string()
        } else {
            format!("{}_{feature}", self.name())
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Context {}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_prefixed_name() {
        assert_eq!(Context::from_name("sancnf_local").name(), "sancnf");
        assert_eq!(Context::from_name("kis_features").name(), "kis");
    }

    #[test]
    fn test_unknown_prefix_falls_back() {
        assert_eq!(Context::from_name("base_features").name(), DEFAULT_CONTEXT);
        assert_eq!(Context::from_name("local").name(), DEFAULT_CONTEXT);
        assert_eq!(Context::from_name("kis_").name(), DEFAULT_CONTEXT);
    }

    #[test]
    fn test_fallback_is_respected() {
        let kis = Context::lookup("kis").unwrap();
        assert_eq!(Context::from_name_or("hash", kis), kis);
    }

    #[test]
    fn test_translator_name() {
        let cnf = Context::from_name("local");
        let san = Context::from_name("sancnf_local");
        assert_eq!(cnf.translator_to(san), "__translator_cnf_sancnf");
    }

    #[test]
    fn test_prepend() {
        assert_eq!(Context::default_context().prepend("local"), "local");
        assert_eq!(Context::lookup("kis").unwrap().prepend("local"), "kis_local");
    }

    #[test]
    fn test_suffix_matching() {
        let cnf = Context::default_context();
        assert!(cnf.matches_file("/bench/a.cnf.xz"));
        assert!(!cnf.matches_file("/bench/a.opb"));
    }
}
