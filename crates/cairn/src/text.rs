//! Text utilities shared by consolidation, graph extraction, search and
//! quality scoring.

use std::collections::{BTreeSet, HashMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "this", "that",
    "these", "those", "it", "its", "they", "them", "their", "we", "you", "your", "our", "i",
    "me", "my", "he", "she", "his", "her", "not", "no", "yes", "what", "which", "who", "when",
    "where", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
    "some", "such", "than", "too", "very", "just", "also", "only", "then", "there", "here",
    "now", "about", "into", "over", "after", "before", "between", "under", "again", "further",
    "once", "during", "if", "so", "as", "can",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercased alphanumeric tokens, in order
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Tokens with stop words and short words removed
pub fn content_terms(text: &str, min_len: usize) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| w.chars().count() >= min_len && !is_stop_word(w))
        .collect()
}

/// Distinct significant words, ranked by frequency then first occurrence
pub fn keywords(text: &str, min_len: usize, max: usize) -> Vec<String> {
    let terms = content_terms(text, min_len);
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (i, term) in terms.iter().enumerate() {
        first_seen.entry(term.as_str()).or_insert(i);
        *counts.entry(term.as_str()).or_insert(0) += 1;
    }

    let mut ranked: Vec<&str> = counts.keys().copied().collect();
    ranked.sort_by(|a, b| counts[b].cmp(&counts[a]).then(first_seen[a].cmp(&first_seen[b])));
    ranked.into_iter().take(max).map(str::to_string).collect()
}

/// Split on sentence-ending punctuation, trimming empties
pub fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Entities of a text: capitalised non-stop-word tokens plus tags, lowercased
pub fn extract_entities<'a>(
    text: &str,
    tags: impl IntoIterator<Item = &'a String>,
    min_len: usize,
) -> BTreeSet<String> {
    let mut entities: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
        if !starts_upper || word.chars().count() < min_len {
            continue;
        }
        let lower = word.to_lowercase();
        if !is_stop_word(&lower) {
            entities.insert(lower);
        }
    }

    entities
}

/// Phrases wrapped in double quotes
pub fn quoted_phrases(text: &str) -> Vec<String> {
    text.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Shannon entropy (bits) of the token distribution
pub fn token_entropy(tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    let total = tokens.len() as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn distinct(tokens: &[String]) -> HashSet<&str> {
    tokens.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! 42x"), vec!["hello", "world", "42x"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_keywords_rank_by_frequency() {
        let text = "Deploy the service. The service failed during deploy. Service restarted.";
        let kws = keywords(text, 4, 3);
        assert_eq!(kws[0], "service");
        assert_eq!(kws[1], "deploy");
        assert!(!kws.contains(&"the".to_string()));
    }

    #[test]
    fn test_sentences() {
        let s = sentences("First one. Second one! Third?\nFourth");
        assert_eq!(s, vec!["First one", "Second one", "Third", "Fourth"]);
    }

    #[test]
    fn test_extract_entities() {
        let tags = vec!["Infra".to_string()];
        let entities = extract_entities("Alice deployed Postgres on Monday. The end.", &tags, 3);
        assert!(entities.contains("alice"));
        assert!(entities.contains("postgres"));
        assert!(entities.contains("monday"));
        assert!(entities.contains("infra"));
        assert!(!entities.contains("the"));
        assert!(!entities.contains("deployed"));
    }

    #[test]
    fn test_quoted_phrases() {
        assert_eq!(
            quoted_phrases(r#"find "connection reset" in logs"#),
            vec!["connection reset"]
        );
        assert!(quoted_phrases("no quotes").is_empty());
    }

    #[test]
    fn test_token_entropy() {
        let uniform: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!((token_entropy(&uniform) - 2.0).abs() < 1e-12);

        let single: Vec<String> = vec!["a".into(), "a".into()];
        assert_eq!(token_entropy(&single), 0.0);
        assert_eq!(token_entropy(&[]), 0.0);
    }
}
