// Tokenizers for the two matching regimes: skip-n-grams for approximate
// matching (tolerant of OCR insertions/deletions) and plain word tokens for
// order-sensitive statistics. Both are pure functions of (text, params).

use regex::Regex;
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

pub fn clean_text(text: &str, punctuation_chars: &str) -> String {
    // Convert the document to lowercase
    let mut text = text.to_lowercase();

    // Remove punctuation based on configurable character set
    let punctuation_chars: Vec<char> = punctuation_chars.chars().collect();
    text.retain(|c| !punctuation_chars.contains(&c));

    // Replace multiple whitespace characters with a single space
    let re = Regex::new(r"\s+").unwrap();
    text = re.replace_all(&text, " ").to_string();

    // Trim leading and trailing whitespace
    text.trim().to_string()
}

fn is_numeral(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// Cleaned, stopword- and numeral-filtered words in document order.
/// Stopword removal happens here, before any gram formation, so grams never
/// span a removed word.
pub fn content_words(
    text: &str,
    punctuation_chars: &str,
    stopwords: &HashSet<String>,
    strip_numerals: bool,
) -> Vec<String> {
    clean_text(text, punctuation_chars)
        .split_whitespace()
        .filter(|w| !stopwords.contains(*w))
        .filter(|w| !(strip_numerals && is_numeral(w)))
        .map(|w| w.to_string())
        .collect()
}

/// Word tokenizer for order-sensitive statistics (e.g. runs tests): unicode
/// word boundaries, lowercased, stopwords and numerals removed.
pub fn word_tokens(text: &str, stopwords: &HashSet<String>, strip_numerals: bool) -> Vec<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !stopwords.contains(w))
        .filter(|w| !(strip_numerals && is_numeral(w)))
        .collect()
}

/// Skip-n-gram tokenizer: grams of `ngram_min..=ngram_size` words drawn in
/// order, allowing up to `skip_distance` skipped words between consecutive
/// constituents. A document shorter than `ngram_min` words yields one gram
/// holding all its words, so short verses stay hashable.
pub fn skip_ngrams(
    words: &[String],
    ngram_size: usize,
    ngram_min: usize,
    skip_distance: usize,
) -> Vec<String> {
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() < ngram_min {
        return vec![words.join(" ")];
    }

    let mut grams = Vec::new();
    let mut picked = Vec::with_capacity(ngram_size);
    for start in 0..words.len() {
        picked.push(start);
        extend_gram(words, &mut picked, ngram_size, ngram_min, skip_distance, &mut grams);
        picked.pop();
    }
    grams
}

fn extend_gram(
    words: &[String],
    picked: &mut Vec<usize>,
    ngram_size: usize,
    ngram_min: usize,
    skip_distance: usize,
    grams: &mut Vec<String>,
) {
    if picked.len() >= ngram_min {
        let gram = picked
            .iter()
            .map(|&i| words[i].as_str())
            .collect::<Vec<_>>()
            .join(" ");
        grams.push(gram);
    }
    if picked.len() == ngram_size {
        return;
    }
    let last = *picked.last().unwrap();
    let limit = (last + 1 + skip_distance).min(words.len().saturating_sub(1));
    for next in (last + 1)..=limit {
        picked.push(next);
        extend_gram(words, picked, ngram_size, ngram_min, skip_distance, grams);
        picked.pop();
    }
}

/// Convenience wrapper: text straight to the deduplicated skip-gram set.
pub fn skip_ngram_set(
    text: &str,
    punctuation_chars: &str,
    stopwords: &HashSet<String>,
    strip_numerals: bool,
    ngram_size: usize,
    ngram_min: usize,
    skip_distance: usize,
) -> HashSet<String> {
    let words = content_words(text, punctuation_chars, stopwords, strip_numerals);
    skip_ngrams(&words, ngram_size, ngram_min, skip_distance)
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_stopwords() -> HashSet<String> {
        HashSet::new()
    }

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_clean_text_normalizes() {
        assert_eq!(
            clean_text("For  God so loved\tthe world!", "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"),
            "for god so loved the world"
        );
    }

    #[test]
    fn test_plain_bigrams_without_skips() {
        let grams = skip_ngrams(&words("the quick brown fox"), 2, 2, 0);
        assert_eq!(grams, vec!["the quick", "quick brown", "brown fox"]);
    }

    #[test]
    fn test_skip_grams_allow_one_gap() {
        let grams = skip_ngrams(&words("a b c"), 2, 2, 1);
        // a-b, a-c (one skip), b-c
        assert_eq!(grams.len(), 3);
        assert!(grams.contains(&"a c".to_string()));
    }

    #[test]
    fn test_variable_length_grams() {
        let grams = skip_ngrams(&words("a b c"), 3, 2, 0);
        assert!(grams.contains(&"a b".to_string()));
        assert!(grams.contains(&"a b c".to_string()));
        assert!(grams.contains(&"b c".to_string()));
    }

    #[test]
    fn test_short_document_collapses_to_single_gram() {
        let grams = skip_ngrams(&words("selah"), 3, 3, 1);
        assert_eq!(grams, vec!["selah"]);
    }

    #[test]
    fn test_empty_document_yields_no_grams() {
        assert!(skip_ngrams(&[], 3, 3, 1).is_empty());
    }

    #[test]
    fn test_stopwords_removed_before_gram_formation() {
        let mut stopwords = HashSet::new();
        stopwords.insert("the".to_string());
        let set = skip_ngram_set(
            "the quick brown fox",
            "",
            &stopwords,
            true,
            2,
            2,
            0,
        );
        // Grams form over "quick brown fox"; no gram touches "the"
        assert!(set.contains("quick brown"));
        assert!(set.contains("brown fox"));
        assert!(!set.iter().any(|g| g.contains("the")));
    }

    #[test]
    fn test_word_tokens_strip_numerals_and_stopwords() {
        let mut stopwords = HashSet::new();
        stopwords.insert("and".to_string());
        let tokens = word_tokens("And 4 angels stood, waiting.", &stopwords, true);
        assert_eq!(tokens, vec!["angels", "stood", "waiting"]);
    }

    #[test]
    fn test_tokenizer_is_deterministic() {
        let a = skip_ngram_set("behold the lamb of god", "", &no_stopwords(), true, 3, 2, 1);
        let b = skip_ngram_set("behold the lamb of god", "", &no_stopwords(), true, 3, 2, 1);
        assert_eq!(a, b);
    }
}
