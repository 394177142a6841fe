//! Include/exclude path-prefix rules

use std::collections::BTreeSet;

/// Exclude rule meaning "exclude everything"
pub const EXCLUDE_ALL: &str = ".";

/// Substrings whose presence always excludes a path (cache and build artifacts)
pub const ALWAYS_IGNORED: &[&str] = &["__pycache__"];

/// Flat sets of normalized path prefixes
///
/// A path is excluded when it starts with an exclude prefix, unless it also
/// starts with an include prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRules {
    excludes: BTreeSet<String>,
    includes: BTreeSet<String>,
}

impl PathRules {
    /// Rules that admit every path
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw rule strings
    pub fn from_lists<E, I>(excludes: E, includes: I) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut rules = Self::new();
        for rule in excludes {
            rules = rules.exclude(rule.as_ref());
        }
        for rule in includes {
            rules = rules.include(rule.as_ref());
        }
        rules
    }

    /// Add an exclude prefix
    #[must_use]
    pub fn exclude(mut self, prefix: &str) -> Self {
        self.excludes.insert(normalize(prefix));
        self
    }

    /// Add an include prefix, overriding excludes
    #[must_use]
    pub fn include(mut self, prefix: &str) -> Self {
        self.includes.insert(normalize(prefix));
        self
    }

    /// Whether the exclude-everything sentinel is present
    #[must_use]
    pub fn excludes_everything(&self) -> bool {
        self.excludes.contains(EXCLUDE_ALL)
    }

    /// Whether a relative `/`-separated path passes the rules
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        if ALWAYS_IGNORED.iter().any(|pattern| path.contains(pattern)) {
            return false;
        }

        let excluded = self
            .excludes
            .iter()
            .any(|prefix| prefix == EXCLUDE_ALL || path.starts_with(prefix.as_str()));

        !excluded || self.includes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Strip a leading `./` and convert separators so rules compare against walk output
fn normalize(rule: &str) -> String {
    let rule = rule.trim().replace('\\', "/");
    match rule.strip_prefix("./") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => rule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rules_allows_everything() {
        let rules = PathRules::new();
        assert!(rules.allows("a.txt"));
        assert!(rules.allows("deep/nested/file"));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let rules = PathRules::new().exclude("a/").include("a/b/");
        assert!(rules.allows("a/b/file.txt"));
        assert!(!rules.allows("a/c/file.txt"));
        assert!(rules.allows("other.txt"));
    }

    #[test]
    fn test_include_alone_does_not_restrict() {
        let rules = PathRules::new().include("bin/");
        assert!(rules.allows("lib/x.so"));
    }

    #[test]
    fn test_prefix_is_plain_string_prefix() {
        let rules = PathRules::new().exclude("var");
        assert!(!rules.allows("var/log"));
        assert!(!rules.allows("variables.txt"));
    }

    #[test]
    fn test_cache_artifacts_always_ignored() {
        let rules = PathRules::new().include("scripts/");
        assert!(!rules.allows("scripts/__pycache__/mod.cpython-311.pyc"));
    }

    #[test]
    fn test_exclude_all_sentinel() {
        let rules = PathRules::from_lists(["."], Vec::<String>::new());
        assert!(rules.excludes_everything());
        assert!(!rules.allows("anything"));

        let rules = PathRules::from_lists(["./bin"], ["./bin/keep"]);
        assert!(!rules.excludes_everything());
        assert!(!rules.allows("bin/tool"));
        assert!(rules.allows("bin/keep"));
    }
}
