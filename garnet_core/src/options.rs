//! Per-compilation options.
//!
//! Options are built once by the compilation driver and threaded as an
//! immutable reference into every phase constructor; nothing in the
//! compiler consults process-global state.

/// Immutable options for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Emit per-candidate trace events from escape analysis.
    pub trace_escape: bool,
    /// Emit trace events from flush/monitor elimination.
    pub trace_flush: bool,
    /// Force-suppress allocation sites whose position matches this filter.
    pub suppress: Option<SourceFilter>,
}

impl CompilerOptions {
    /// Check whether an allocation site is force-suppressed.
    #[must_use]
    pub fn is_suppressed(&self, method_name: &str, bci: u32) -> bool {
        self.suppress
            .as_ref()
            .is_some_and(|f| f.matches(method_name, bci))
    }
}

/// A pattern matched against an allocation's source position.
///
/// Patterns name a method, with `*` matching any run of characters, and an
/// optional `@<bci>` suffix pinning an exact bytecode index:
///
/// - `List.grow`: every allocation in `List.grow`
/// - `Map.*`: every allocation in any `Map` method
/// - `List.grow@12`: only the allocation at bytecode index 12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    method: String,
    bci: Option<u32>,
}

impl SourceFilter {
    /// Parse a filter from its textual form.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        match pattern.rsplit_once('@') {
            Some((method, bci)) => match bci.parse::<u32>() {
                Ok(bci) => Self {
                    method: method.to_string(),
                    bci: Some(bci),
                },
                // Not a bytecode index: the '@' belongs to the method text.
                Err(_) => Self {
                    method: pattern.to_string(),
                    bci: None,
                },
            },
            None => Self {
                method: pattern.to_string(),
                bci: None,
            },
        }
    }

    /// Check the filter against a concrete source position.
    #[must_use]
    pub fn matches(&self, method_name: &str, bci: u32) -> bool {
        if let Some(want) = self.bci {
            if want != bci {
                return false;
            }
        }
        wildcard_match(&self.method, method_name)
    }
}

/// Glob-style match where `*` matches any (possibly empty) substring.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = match parts.next() {
        Some(p) => p,
        None => return text.is_empty(),
    };
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    let mut last_part: Option<&str> = None;
    for part in parts {
        last_part = Some(part);
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last_part {
        // No '*' at all: the prefix had to be the whole text.
        None => first.len() == text.len(),
        // Pattern ends with '*': anything left over is fine.
        Some("") => true,
        // Pattern ends with a literal: it must sit at the end of the text.
        Some(part) => {
            // `rest` already had `part` consumed from it; the match was at
            // the end exactly when nothing remains.
            rest.is_empty() || {
                // Re-check against the tail to handle repeats of `part`.
                text.ends_with(part)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_method_match() {
        let f = SourceFilter::new("List.grow");
        assert!(f.matches("List.grow", 0));
        assert!(f.matches("List.grow", 99));
        assert!(!f.matches("List.growAll", 0));
        assert!(!f.matches("Map.grow", 0));
    }

    #[test]
    fn test_wildcard_match() {
        let f = SourceFilter::new("Map.*");
        assert!(f.matches("Map.put", 3));
        assert!(f.matches("Map.", 3));
        assert!(!f.matches("HashMap.put", 3));

        let g = SourceFilter::new("*.grow");
        assert!(g.matches("List.grow", 0));
        assert!(g.matches("Map.grow", 0));
        assert!(!g.matches("List.shrink", 0));
    }

    #[test]
    fn test_bci_suffix() {
        let f = SourceFilter::new("List.grow@12");
        assert!(f.matches("List.grow", 12));
        assert!(!f.matches("List.grow", 13));
    }

    #[test]
    fn test_non_numeric_suffix_is_method_text() {
        let f = SourceFilter::new("Cache@shard.get");
        assert!(f.matches("Cache@shard.get", 5));
    }

    #[test]
    fn test_options_suppression() {
        let opts = CompilerOptions {
            suppress: Some(SourceFilter::new("Hot.*")),
            ..Default::default()
        };
        assert!(opts.is_suppressed("Hot.loop", 4));
        assert!(!opts.is_suppressed("Cold.path", 4));

        let none = CompilerOptions::default();
        assert!(!none.is_suppressed("Hot.loop", 4));
    }

    #[test]
    fn test_wildcard_edge_cases() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxbyy"));
        assert!(wildcard_match("abc", "abc"));
        assert!(!wildcard_match("abc", "abcd"));
    }
}
