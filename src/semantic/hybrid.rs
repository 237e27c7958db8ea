//! Hybrid scoring combining embedding similarity, lexical overlap and
//! category agreement.
//!
//! final = clamp(calibrated(cosine) * W_e + jaccard * W_l, then category term)
//!
//! - `calibrated` is a monotonic piecewise-linear curve from config
//! - the category term is additive points or a multiplicative factor
//! - every component and the result live on a 0-100 scale

use serde::Serialize;

use super::lexical::jaccard_score;
use crate::config::{CalibrationPoint, CategoryTerm, ScoringConfig};

/// Per-candidate score components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Inner product reported by the vector index
    pub raw_similarity: f32,
    /// Calibrated embedding score [0, 100]
    pub embedding_score: f32,
    /// Word-set Jaccard [0, 100]
    pub lexical_score: f32,
    pub category_match: bool,
    /// Combined score [0, 100]
    pub final_score: f32,
}

impl ScoreBreakdown {
    /// Human-readable explanation of how the score was reached.
    pub fn reason(&self) -> String {
        let mut parts = vec![
            format!("cosine {:.4}", self.raw_similarity),
            format!("vector {:.1}", self.embedding_score),
            format!("keyword {:.1}", self.lexical_score),
        ];
        if self.category_match {
            parts.push("category boost".to_string());
        }
        parts.join(" | ")
    }
}

/// Scores candidates according to a validated [`ScoringConfig`].
#[derive(Debug, Clone)]
pub struct HybridScorer {
    config: ScoringConfig,
}

impl HybridScorer {
    /// Create a scorer. The config is validated so that the calibration
    /// curve is guaranteed monotonic.
    pub fn new(config: ScoringConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Score one candidate.
    ///
    /// `raw_similarity` must be finite; the caller rejects NaN before
    /// getting here.
    pub fn score(
        &self,
        query_norm: &str,
        query_category: Option<&str>,
        candidate_norm: &str,
        candidate_category: &str,
        raw_similarity: f32,
    ) -> ScoreBreakdown {
        debug_assert!(raw_similarity.is_finite());

        let embedding_score = self.calibrate(raw_similarity);
        let lexical_score = jaccard_score(query_norm, candidate_norm);
        let category_match = query_category
            .map(|category| categories_match(category, candidate_category))
            .unwrap_or(false);

        let weighted = embedding_score * self.config.embedding_weight
            + lexical_score * self.config.lexical_weight;

        let combined = match (category_match, &self.config.category) {
            (false, _) => weighted,
            (true, CategoryTerm::Additive { points }) => weighted + points,
            (true, CategoryTerm::Multiplicative { factor }) => weighted * factor,
        };

        ScoreBreakdown {
            raw_similarity,
            embedding_score,
            lexical_score,
            category_match,
            final_score: combined.clamp(0.0, 100.0),
        }
    }

    /// Map a cosine similarity onto the configured 0-100 curve.
    pub fn calibrate(&self, cosine: f32) -> f32 {
        interpolate(&self.config.calibration, cosine).clamp(0.0, 100.0)
    }
}

/// Piecewise-linear interpolation through `points` (sorted by cosine).
/// Values outside the curve take the nearest end score.
fn interpolate(points: &[CalibrationPoint], cosine: f32) -> f32 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };

    if cosine <= first.cosine {
        return first.score;
    }
    if cosine >= last.cosine {
        return last.score;
    }

    for pair in points.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if cosine <= hi.cosine {
            let t = (cosine - lo.cosine) / (hi.cosine - lo.cosine);
            return lo.score + t * (hi.score - lo.score);
        }
    }

    last.score
}

/// Case-insensitive, whitespace-tolerant category comparison.
pub fn categories_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> HybridScorer {
        HybridScorer::new(ScoringConfig::default()).unwrap()
    }

    #[test]
    fn test_default_calibration_bands() {
        let scorer = scorer();

        assert_eq!(scorer.calibrate(1.0), 100.0);
        assert!((scorer.calibrate(0.75) - 80.0).abs() < 1e-4);
        assert!((scorer.calibrate(0.5) - 60.0).abs() < 1e-4);
        assert!((scorer.calibrate(0.3) - 40.0).abs() < 1e-4);
        assert_eq!(scorer.calibrate(0.0), 0.0);
        assert_eq!(scorer.calibrate(-0.8), 0.0);

        // high similarities land in 80-100, mid in 60-80
        assert!((80.0..=100.0).contains(&scorer.calibrate(0.9)));
        assert!((60.0..=80.0).contains(&scorer.calibrate(0.6)));
        assert!(scorer.calibrate(0.2) < 40.0);
    }

    #[test]
    fn test_calibration_is_not_linear() {
        let scorer = scorer();
        // pure linear scaling of [-1, 1] would give 75 at 0.5
        assert!((scorer.calibrate(0.5) - 75.0).abs() > 1.0);
    }

    #[test]
    fn test_calibration_monotonic() {
        let scorer = scorer();
        let mut previous = scorer.calibrate(-1.0);
        for step in -1000..=1000 {
            let cosine = step as f32 / 1000.0;
            let score = scorer.calibrate(cosine);
            assert!(
                score >= previous,
                "calibration decreased at {cosine}: {score} < {previous}"
            );
            previous = score;
        }
    }

    #[test]
    fn test_final_score_monotonic_in_similarity() {
        let scorer = scorer();
        let mut previous = 0.0;
        for step in -100..=100 {
            let cosine = step as f32 / 100.0;
            let breakdown = scorer.score("black wallet", None, "black purse", "Wallet", cosine);
            assert!(breakdown.final_score >= previous);
            previous = breakdown.final_score;
        }
    }

    #[test]
    fn test_self_match_hits_ceiling() {
        let scorer = scorer();
        let breakdown = scorer.score("black wallet", None, "black wallet", "Wallet", 1.0);

        assert_eq!(breakdown.embedding_score, 100.0);
        assert_eq!(breakdown.lexical_score, 100.0);
        assert!((breakdown.final_score - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_weighted_combination() {
        let scorer = scorer();
        // vector 60 * 0.7 + keyword 50 * 0.3 = 57
        let breakdown = scorer.score("black wallet", None, "black phone", "Phone", 0.5);

        assert!((breakdown.lexical_score - 100.0 / 3.0).abs() < 0.01);
        let expected = 60.0 * 0.7 + (100.0 / 3.0) * 0.3;
        assert!((breakdown.final_score - expected).abs() < 0.01);
        assert!(!breakdown.category_match);
    }

    #[test]
    fn test_additive_category_boost() {
        let scorer = scorer();
        let plain = scorer.score("black wallet", Some("Wallet"), "black wallet", "Phone", 0.5);
        let boosted = scorer.score("black wallet", Some("wallet "), "black wallet", "Wallet", 0.5);

        assert!(boosted.category_match);
        assert!(!plain.category_match);
        assert!((boosted.final_score - plain.final_score - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_multiplicative_category_boost() {
        let config = ScoringConfig {
            embedding_weight: 0.9,
            lexical_weight: 0.1,
            category: CategoryTerm::Multiplicative { factor: 1.1 },
            ..ScoringConfig::default()
        };
        let scorer = HybridScorer::new(config).unwrap();

        let plain = scorer.score("lost keys", Some("Keys"), "car keys", "Bag", 0.5);
        let boosted = scorer.score("lost keys", Some("Keys"), "car keys", "Keys", 0.5);

        assert!((boosted.final_score - plain.final_score * 1.1).abs() < 1e-3);
    }

    #[test]
    fn test_boost_is_clamped() {
        let scorer = scorer();
        let breakdown = scorer.score("black wallet", Some("Wallet"), "black wallet", "Wallet", 1.0);
        assert_eq!(breakdown.final_score, 100.0);
    }

    #[test]
    fn test_no_query_category_never_matches() {
        let scorer = scorer();
        let breakdown = scorer.score("wallet", None, "wallet", "Wallet", 0.9);
        assert!(!breakdown.category_match);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ScoringConfig {
            embedding_weight: 0.5,
            lexical_weight: 0.2,
            ..ScoringConfig::default()
        };
        assert!(HybridScorer::new(config).is_err());
    }

    #[test]
    fn test_reason_mentions_components() {
        let breakdown = ScoreBreakdown {
            raw_similarity: 0.91,
            embedding_score: 92.8,
            lexical_score: 50.0,
            category_match: true,
            final_score: 85.0,
        };

        assert_eq!(
            breakdown.reason(),
            "cosine 0.9100 | vector 92.8 | keyword 50.0 | category boost"
        );
    }
}
