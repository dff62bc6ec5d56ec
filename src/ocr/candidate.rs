//! Candidate cleaning and ensemble voting.

use regex::Regex;
use std::sync::OnceLock;

/// Challenge codes are always exactly this many characters.
pub const CODE_LEN: usize = 4;

fn alnum_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9A-Za-z]").unwrap())
}

/// Cleans raw engine output down to alphanumerics and accepts the result
/// only if exactly [`CODE_LEN`] characters remain.
///
/// Shorter or longer results are dropped silently: they are non-votes,
/// not failures.
pub fn extract_candidate(raw: &str) -> Option<String> {
    let cleaned: String = alnum_regex()
        .find_iter(raw)
        .map(|m| m.as_str())
        .collect();
    (cleaned.len() == CODE_LEN).then_some(cleaned)
}

/// Plain frequency mode with first-seen tie-break.
///
/// The insertion-ordered tally makes the result deterministic for a
/// fixed input order.
pub fn most_common<I>(items: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut tally: Vec<(String, u32)> = Vec::new();
    for item in items {
        match tally.iter_mut().find(|(s, _)| *s == item) {
            Some((_, count)) => *count += 1,
            None => tally.push((item, 1)),
        }
    }

    let mut best: Option<(String, u32)> = None;
    for (item, count) in tally {
        match &best {
            Some((_, best_count)) if *best_count >= count => {}
            _ => best = Some((item, count)),
        }
    }
    best.map(|(item, _)| item).unwrap_or_default()
}

/// Picks the most frequent candidate after case-normalization expansion.
///
/// Every candidate votes three times: as produced, uppercased, and
/// lowercased. The expansion hedges against the engine confusing letter
/// case between variants. An empty candidate set yields the empty string
/// (a recognition failure for this pass).
pub fn vote(candidates: &[String]) -> String {
    most_common(candidates.iter().flat_map(|c| {
        [c.clone(), c.to_uppercase(), c.to_lowercase()]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_candidate_strips_noise() {
        assert_eq!(extract_candidate(" a B3\nd!\t"), Some("aB3d".to_string()));
        assert_eq!(extract_candidate("7gK2"), Some("7gK2".to_string()));
    }

    #[test]
    fn test_extract_candidate_rejects_wrong_length() {
        assert_eq!(extract_candidate(""), None);
        assert_eq!(extract_candidate("abc"), None);
        assert_eq!(extract_candidate("abcde"), None);
        assert_eq!(extract_candidate("ab cd e"), None);
    }

    #[test]
    fn test_extract_candidate_output_is_alnum() {
        for raw in ["x.y,z:1", "++9 8a_b--", "....", "    Qq12   "] {
            if let Some(candidate) = extract_candidate(raw) {
                assert_eq!(candidate.len(), CODE_LEN);
                assert!(candidate.chars().all(|c| c.is_ascii_alphanumeric()));
            }
        }
    }

    #[test]
    fn test_vote_prefers_majority_with_exact_case() {
        let candidates = vec![
            "ab3D".to_string(),
            "ab3D".to_string(),
            "x9Qz".to_string(),
        ];
        // Expansion triples each candidate; "ab3D" wins on frequency and
        // keeps its original case through the first-seen tie-break.
        assert_eq!(vote(&candidates), "ab3D");
    }

    #[test]
    fn test_vote_is_deterministic() {
        let candidates = vec!["Qq12".to_string(), "zZ99".to_string()];
        let first = vote(&candidates);
        for _ in 0..10 {
            assert_eq!(vote(&candidates), first);
        }
        // Single-count tie resolves to the earliest-seen form
        assert_eq!(first, "Qq12");
    }

    #[test]
    fn test_vote_empty_input_is_empty_string() {
        assert_eq!(vote(&[]), "");
    }

    #[test]
    fn test_vote_case_expansion_bridges_variants() {
        // Two candidates differing only in case still converge on one form
        let candidates = vec!["AB3D".to_string(), "ab3d".to_string(), "ab3d".to_string()];
        assert_eq!(vote(&candidates), "ab3d");
    }

    #[test]
    fn test_most_common_first_seen_tie_break() {
        let items = ["b".to_string(), "a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(most_common(items), "b");
    }
}
