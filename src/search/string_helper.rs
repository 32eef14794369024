use levenshtein_automata::{DFA, Distance, LevenshteinAutomatonBuilder};
use regex::{Regex, RegexBuilder};

use crate::core::error::Result;
use crate::search::term::{MatchType, SearchParams, strip_prefix_marker};

/// Compiled matcher for one string query term: exact/prefix with case
/// folding (or cased), regex partial match, or fuzzy with a literal prefix.
pub struct StringSearchHelper {
    kind: HelperKind,
    cased: bool,
}

enum HelperKind {
    Word { term: String, prefix: bool },
    Regex { regex: Regex, dict_prefix: String },
    Fuzzy { dfa: DFA, prefix: String, term: String },
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

/// Longest literal prefix usable for a dictionary range scan, extracted from
/// a regex pattern anchored with '^'.
fn regex_dictionary_prefix(pattern: &str) -> String {
    let Some(body) = pattern.strip_prefix('^') else {
        return String::new();
    };
    let mut prefix = String::new();
    for c in body.chars() {
        if c.is_alphanumeric() || c == '_' || c == ' ' {
            prefix.push(c);
        } else {
            break;
        }
    }
    prefix
}

impl StringSearchHelper {
    pub fn new(term: &str, params: &SearchParams, attribute_cased: bool) -> Result<Self> {
        let cased = params.cased.unwrap_or(attribute_cased);
        let kind = match &params.match_type {
            MatchType::Regex => {
                let regex = RegexBuilder::new(term)
                    .case_insensitive(!cased)
                    .build()
                    .map_err(crate::core::error::Error::from)?;
                let dict_prefix = if cased {
                    regex_dictionary_prefix(term)
                } else {
                    fold(&regex_dictionary_prefix(term))
                };
                HelperKind::Regex { regex, dict_prefix }
            }
            MatchType::Fuzzy { max_edits, prefix_lock_length } => {
                let folded = if cased { term.to_string() } else { fold(term) };
                let lock = (*prefix_lock_length as usize).min(folded.chars().count());
                let prefix: String = folded.chars().take(lock).collect();
                let dfa = LevenshteinAutomatonBuilder::new(*max_edits, true).build_dfa(&folded);
                HelperKind::Fuzzy { dfa, prefix, term: folded }
            }
            MatchType::Exact | MatchType::Prefix => {
                let (stripped, marker) = strip_prefix_marker(term);
                let prefix = marker || params.match_type == MatchType::Prefix;
                let term = if cased { stripped.to_string() } else { fold(stripped) };
                HelperKind::Word { term, prefix }
            }
        };
        Ok(StringSearchHelper { kind, cased })
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self.kind, HelperKind::Word { prefix: true, .. })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.kind {
            HelperKind::Word { term, prefix } => {
                if self.cased {
                    if *prefix { candidate.starts_with(term.as_str()) } else { candidate == term }
                } else {
                    let folded = fold(candidate);
                    if *prefix { folded.starts_with(term.as_str()) } else { folded == *term }
                }
            }
            HelperKind::Regex { regex, .. } => regex.is_match(candidate),
            HelperKind::Fuzzy { dfa, prefix, .. } => {
                let folded = if self.cased { candidate.to_string() } else { fold(candidate) };
                if !folded.starts_with(prefix.as_str()) {
                    return false;
                }
                let mut state = dfa.initial_state();
                for byte in folded.as_bytes() {
                    state = dfa.transition(state, *byte);
                }
                matches!(dfa.distance(state), Distance::Exact(_))
            }
        }
    }

    /// Folded dictionary prefix guiding the ordered range scan over an enum
    /// store. Empty means the whole dictionary must be scanned.
    pub fn dictionary_prefix(&self) -> &str {
        match &self.kind {
            HelperKind::Word { term, .. } => term,
            HelperKind::Regex { dict_prefix, .. } => dict_prefix,
            HelperKind::Fuzzy { prefix, .. } => prefix,
        }
    }

    /// True when the dictionary scan may stop at the end of the prefix run
    /// (exact and prefix terms; regex/fuzzy prefixes only narrow the start).
    pub fn scan_bounded_by_prefix(&self) -> bool {
        matches!(self.kind, HelperKind::Word { .. })
    }

    pub fn exact_term(&self) -> Option<&str> {
        match &self.kind {
            HelperKind::Word { term, prefix: false } => Some(term),
            _ => None,
        }
    }

    pub fn cased(&self) -> bool {
        self.cased
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_folds_by_default() {
        let helper =
            StringSearchHelper::new("Hello", &SearchParams::default(), false).unwrap();
        assert!(helper.is_match("hello"));
        assert!(helper.is_match("HELLO"));
        assert!(!helper.is_match("hello world"));
    }

    #[test]
    fn cased_exact() {
        let helper = StringSearchHelper::new("Hello", &SearchParams::default(), true).unwrap();
        assert!(helper.is_match("Hello"));
        assert!(!helper.is_match("hello"));
    }

    #[test]
    fn prefix_via_marker_and_params() {
        let helper = StringSearchHelper::new("he*", &SearchParams::default(), false).unwrap();
        assert!(helper.is_prefix());
        assert!(helper.is_match("hello"));
        assert!(!helper.is_match("world"));

        let helper = StringSearchHelper::new("he", &SearchParams::prefix(), false).unwrap();
        assert!(helper.is_match("Hero"));
    }

    #[test]
    fn regex_partial_match_and_prefix_extraction() {
        let helper = StringSearchHelper::new("^ab.*c$", &SearchParams::regex(), false).unwrap();
        assert_eq!(helper.dictionary_prefix(), "ab");
        assert!(helper.is_match("abxc"));
        assert!(!helper.is_match("xabc"));

        let helper = StringSearchHelper::new("lo", &SearchParams::regex(), false).unwrap();
        assert_eq!(helper.dictionary_prefix(), "");
        // partial match anywhere in the value
        assert!(helper.is_match("hello"));
    }

    #[test]
    fn fuzzy_with_prefix_lock() {
        let helper = StringSearchHelper::new("hello", &SearchParams::fuzzy(1, 2), false).unwrap();
        assert!(helper.is_match("hello"));
        assert!(helper.is_match("helli"));
        assert!(helper.is_match("hell"));
        // two edits is past the bound
        assert!(!helper.is_match("heiii"));
        // violates the literal prefix requirement
        assert!(!helper.is_match("jello"));
        assert_eq!(helper.dictionary_prefix(), "he");
    }
}
