//! Lexical (keyword) scoring for hybrid search.
//!
//! Word-set overlap between the normalized query and a normalized
//! description, used alongside embedding similarity.

use super::normalize::word_set;

/// Jaccard similarity of the word sets of two normalized strings, scaled
/// to [0, 100].
///
/// Defined as 0 when both sets are empty.
pub fn jaccard_score(query_norm: &str, description_norm: &str) -> f32 {
    let query_words = word_set(query_norm);
    let description_words = word_set(description_norm);

    let union = query_words.union(&description_words).count();
    if union == 0 {
        return 0.0;
    }

    let intersection = query_words.intersection(&description_words).count();
    intersection as f32 / union as f32 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text() {
        assert_eq!(jaccard_score("black wallet", "black wallet"), 100.0);
    }

    #[test]
    fn test_no_overlap() {
        assert_eq!(jaccard_score("black wallet", "blue umbrella"), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        // {black, wallet} vs {black, leather, wallet}: 2 / 3
        let score = jaccard_score("black wallet", "black leather wallet");
        assert!((score - 66.666_67).abs() < 0.01);
    }

    #[test]
    fn test_both_empty() {
        assert_eq!(jaccard_score("", ""), 0.0);
    }

    #[test]
    fn test_one_empty() {
        assert_eq!(jaccard_score("", "black wallet"), 0.0);
        assert_eq!(jaccard_score("black wallet", ""), 0.0);
    }

    #[test]
    fn test_duplicates_do_not_count_twice() {
        assert_eq!(jaccard_score("black black wallet", "black wallet"), 100.0);
    }

    #[test]
    fn test_symmetric() {
        let a = jaccard_score("red phone case", "phone with red cover");
        let b = jaccard_score("phone with red cover", "red phone case");
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_latin_words() {
        assert_eq!(jaccard_score("කළු පසුම්බිය", "කළු පසුම්බිය"), 100.0);
        let score = jaccard_score("කළු පසුම්බිය", "රතු පසුම්බිය");
        assert!((score - 100.0 / 3.0).abs() < 0.01);
    }
}
