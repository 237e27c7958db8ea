use std::sync::atomic::Ordering;

use crate::config::{CategoryTerm, ScoringConfig, StoreBackend};
use crate::errors::MatchError;
use crate::items::{InMemoryStore, ItemRecord, RecordStore};
use crate::semantic::{Embedder, EmbeddingError, HybridScorer, RetrievalOptions, RetrievalService};
use crate::tests::app::{create_app, HashEmbedder};

fn memory_service() -> RetrievalService {
    service_with(Box::new(InMemoryStore::new()), ScoringConfig::default())
}

fn service_with(store: Box<dyn RecordStore>, scoring: ScoringConfig) -> RetrievalService {
    RetrievalService::new(
        Box::new(HashEmbedder::new()),
        store,
        None,
        HybridScorer::new(scoring).unwrap(),
        RetrievalOptions::default(),
    )
}

/// 2-d embedder with fixed cosines against the query `"lost item"`.
struct AngleEmbedder;

impl Embedder for AngleEmbedder {
    fn name(&self) -> &str {
        "test-angle-2"
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let cosine: f32 = match text {
            "lost item" => 1.0,
            "alpha" => 0.95,
            "beta" => 0.94,
            "gamma" => 0.90,
            other => return Err(EmbeddingError::EmbeddingFailed(format!("unknown text {other}"))),
        };
        Ok(vec![cosine, (1.0 - cosine * cosine).max(0.0).sqrt()])
    }
}

struct FailingStore;

impl RecordStore for FailingStore {
    fn load_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        Ok(vec![])
    }

    fn save(&self, _record: &ItemRecord) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}

#[test]
fn test_count_tracks_successful_inserts_only() {
    let service = memory_service();

    service.add_item("F1", "Black leather wallet", "Wallet").unwrap();
    service.add_item("F2", "Silver house keys", "Keys").unwrap();
    assert!(service.add_item("F1", "Another wallet", "Wallet").is_err());
    assert!(service.add_item("F3", "   ", "Wallet").is_err());
    service.add_item("F4", "Green water bottle", "Bottle").unwrap();

    assert_eq!(service.len(), 3);
}

#[test]
fn test_positions_are_assigned_in_order() {
    let service = memory_service();

    let first = service.add_item("F1", "Black leather wallet", "Wallet").unwrap();
    let second = service.add_item("F2", "Silver house keys", "Keys").unwrap();

    assert_eq!(first.position, 0);
    assert_eq!(second.position, 1);
    assert_eq!(second.assigned_id, "F2");
}

#[test]
fn test_empty_fields_are_rejected_before_embedding() {
    let embedder = HashEmbedder::new();
    let calls = embedder.calls();
    let service = RetrievalService::new(
        Box::new(embedder),
        Box::new(InMemoryStore::new()),
        None,
        HybridScorer::new(ScoringConfig::default()).unwrap(),
        RetrievalOptions::default(),
    );

    let err = service.add_item("", "Black wallet", "Wallet").unwrap_err();
    assert!(matches!(err, MatchError::Validation { field: "id", .. }));
    let err = service.add_item("F1", "Black wallet", " ").unwrap_err();
    assert!(matches!(err, MatchError::Validation { field: "category", .. }));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(service.is_empty());
}

#[test]
fn test_duplicate_id_leaves_original() {
    let service = memory_service();
    service.add_item("F1", "Black leather wallet", "Wallet").unwrap();

    let err = service.add_item("F1", "Red umbrella", "Umbrella").unwrap_err();
    assert!(matches!(err, MatchError::DuplicateId(ref id) if id == "F1"));
    assert!(err.is_client_error());

    let matches = service.search("red umbrella", None, 10).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].description, "Black leather wallet");
}

#[test]
fn test_store_failure_leaves_index_untouched() {
    let service = service_with(Box::new(FailingStore), ScoringConfig::default());

    let err = service.add_item("F1", "Black leather wallet", "Wallet").unwrap_err();

    assert!(matches!(err, MatchError::Store(_)));
    assert!(!err.is_client_error());
    assert!(service.is_empty());
    assert!(service.search("wallet", None, 5).unwrap().is_empty());
}

#[test]
fn test_search_on_empty_collection() {
    let service = memory_service();
    assert!(service.search("black wallet", None, 10).unwrap().is_empty());
    assert!(service.search("black wallet", Some("Wallet"), 10).unwrap().is_empty());
}

#[test]
fn test_search_validates_input() {
    let service = memory_service();
    service.add_item("F1", "Black leather wallet", "Wallet").unwrap();

    assert!(matches!(
        service.search("  ", None, 10),
        Err(MatchError::Validation { field: "text", .. })
    ));
    assert!(matches!(
        service.search("wallet", None, 0),
        Err(MatchError::Validation { field: "limit", .. })
    ));
}

#[test]
fn test_identical_description_scores_at_ceiling() {
    let service = memory_service();
    service.add_item("F1", "Black leather wallet", "Wallet").unwrap();
    service.add_item("F2", "Silver house keys", "Keys").unwrap();

    let matches = service.search("Black leather wallet", None, 2).unwrap();

    let top = &matches[0];
    assert_eq!(top.id, "F1");
    assert!(top.score_breakdown.raw_similarity > 0.999);
    assert!(top.score > 99.0, "score {}", top.score);
    assert!(top.score <= 100.0);
}

#[test]
fn test_search_is_deterministic() {
    let service = memory_service();
    service.add_item("F1", "Black leather wallet with cards", "Wallet").unwrap();
    service.add_item("F2", "Brown leather bag", "Bag").unwrap();
    service.add_item("F3", "Black phone cover", "Phone").unwrap();

    let first = service.search("lost black leather wallet", Some("Wallet"), 3).unwrap();
    let second = service.search("lost black leather wallet", Some("Wallet"), 3).unwrap();

    let ids = |m: &[crate::semantic::Match]| m.iter().map(|m| m.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.score, b.score);
    }
}

#[test]
fn test_category_boosts_without_excluding() {
    let service = memory_service();
    service.add_item("F1", "black wallet with cards", "Wallet").unwrap();
    service.add_item("F2", "black wallet with cards", "Bag").unwrap();

    // equal scores keep insertion order
    let plain = service.search("lost black wallet", None, 2).unwrap();
    assert_eq!(plain[0].id, "F1");
    assert_eq!(plain[0].score, plain[1].score);

    let boosted = service.search("lost black wallet", Some("bag"), 2).unwrap();
    assert_eq!(boosted.len(), 2);
    assert_eq!(boosted[0].id, "F2");
    assert!(boosted[0].score_breakdown.category_match);
    assert!(!boosted[1].score_breakdown.category_match);
    assert!((boosted[0].score - boosted[1].score - 5.0).abs() < 1e-3);

    let unknown = service.search("lost black wallet", Some("Umbrella"), 2).unwrap();
    assert_eq!(unknown.len(), 2);
    assert!(unknown.iter().all(|m| !m.score_breakdown.category_match));
}

#[test]
fn test_multiplicative_category_term() {
    let scoring = ScoringConfig {
        category: CategoryTerm::Multiplicative { factor: 1.5 },
        ..ScoringConfig::default()
    };
    let service = service_with(Box::new(InMemoryStore::new()), scoring);
    service.add_item("F1", "black wallet with cards", "Wallet").unwrap();
    service.add_item("F2", "black wallet with cards", "Bag").unwrap();

    let matches = service.search("lost black wallet", Some("Bag"), 2).unwrap();

    assert_eq!(matches[0].id, "F2");
    let expected = (matches[1].score * 1.5).min(100.0);
    assert!((matches[0].score - expected).abs() < 1e-3);
}

#[test]
fn test_limit_truncates_sorted_results() {
    let service = memory_service();
    for i in 0..20 {
        service
            .add_item(&format!("F{i}"), &format!("item number {i} black wallet"), "Wallet")
            .unwrap();
    }

    let matches = service.search("black wallet", None, 3).unwrap();

    assert_eq!(matches.len(), 3);
    assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_limit_above_count_returns_everything() {
    let service = memory_service();
    service.add_item("F1", "Black leather wallet", "Wallet").unwrap();
    service.add_item("F2", "Silver house keys", "Keys").unwrap();

    assert_eq!(service.search("keys", None, 50).unwrap().len(), 2);
}

#[test]
fn test_non_latin_descriptions_match() {
    let service = memory_service();
    service.add_item("F1", "කළු පසුම්බිය", "Wallet").unwrap();
    service.add_item("F2", "நீல குடை", "Umbrella").unwrap();

    let matches = service.search("කළු පසුම්බිය", None, 1).unwrap();

    assert_eq!(matches[0].id, "F1");
    assert!(matches[0].score_breakdown.lexical_score > 99.0);
}

#[test]
fn test_concurrent_inserts_keep_views_aligned() {
    let (app, _tmp) = create_app(StoreBackend::Memory);

    std::thread::scope(|scope| {
        for t in 0..4 {
            let service = app.service.clone();
            scope.spawn(move || {
                for i in 0..10 {
                    service
                        .add_item(&format!("T{t}-{i}"), &format!("thread {t} item {i}"), "Misc")
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(app.service.len(), 40);
    let matches = app.service.search("thread 2 item 7", None, 40).unwrap();
    assert_eq!(matches.len(), 40);
    assert_eq!(matches[0].id, "T2-7");
}

#[test]
fn test_boosted_item_wins_from_outside_over_fetch_window() {
    let service = RetrievalService::new(
        Box::new(AngleEmbedder),
        Box::new(InMemoryStore::new()),
        None,
        HybridScorer::new(ScoringConfig::default()).unwrap(),
        RetrievalOptions {
            over_fetch_factor: 2,
            snapshot_every: 0,
        },
    );
    service.add_item("X", "alpha", "Wallet").unwrap();
    service.add_item("Y", "beta", "Wallet").unwrap();
    service.add_item("Z", "gamma", "Bag").unwrap();

    // Z is third by cosine but first once the category boost applies
    let all = service.search("lost item", Some("Bag"), 3).unwrap();
    let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["Z", "X", "Y"]);

    let top = service.search("lost item", Some("Bag"), 1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "Z");
    assert_eq!(top[0].score, all[0].score);
}
