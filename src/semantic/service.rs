//! Retrieval service for lost-and-found matching.
//!
//! Owns the vector index and metadata store and keeps them aligned:
//! - Inserts are all-or-nothing (check vector, persist record, then mutate)
//! - Searches embed the query, over-fetch candidates and re-rank them
//! - The whole collection can be rebuilt by replaying the record store

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

use crate::errors::MatchError;
use crate::items::{ItemRecord, RecordStore};
use crate::semantic::hybrid::{HybridScorer, ScoreBreakdown};
use crate::semantic::index::VectorIndex;
use crate::semantic::metadata::{IndexedItem, MetadataStore};
use crate::semantic::normalize::{content_hash, normalize};
use crate::semantic::snapshot::{CachedVector, SnapshotError, VectorSnapshot};
use crate::semantic::Embedder;

/// Tunables that are not part of scoring.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Candidates fetched from the index per requested result
    pub over_fetch_factor: usize,
    /// Save the snapshot after this many inserts (0 disables)
    pub snapshot_every: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            over_fetch_factor: 2,
            snapshot_every: 0,
        }
    }
}

/// Result of a successful insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddedItem {
    pub assigned_id: String,
    pub position: usize,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub id: String,
    pub description: String,
    pub category: String,
    pub score: f32,
    pub score_breakdown: ScoreBreakdown,
}

/// Outcome of replaying the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    /// Records now in the index
    pub loaded: usize,
    /// Records whose cached vector was missing or stale
    pub reembedded: usize,
    /// Records ignored because their id was already loaded
    pub skipped: usize,
}

struct RetrievalState {
    index: VectorIndex,
    metadata: MetadataStore,
    /// Inserts since the last snapshot save
    unsaved: usize,
}

/// Service for matching lost-item queries against found items.
///
/// Thread-safe: one mutex covers index + metadata so the two can never
/// drift apart. Embedding runs outside that lock.
pub struct RetrievalService {
    embedder: Box<dyn Embedder>,
    store: Box<dyn RecordStore>,
    snapshot: Option<VectorSnapshot>,
    scorer: HybridScorer,
    options: RetrievalOptions,
    state: Mutex<RetrievalState>,
}

impl RetrievalService {
    /// Create an empty service. Call [`restore`](Self::restore) to load
    /// records already in the store.
    pub fn new(
        embedder: Box<dyn Embedder>,
        store: Box<dyn RecordStore>,
        snapshot: Option<VectorSnapshot>,
        scorer: HybridScorer,
        options: RetrievalOptions,
    ) -> Self {
        let dimensions = embedder.dimensions();
        Self {
            embedder,
            store,
            snapshot,
            scorer,
            options,
            state: Mutex::new(RetrievalState {
                index: VectorIndex::new(dimensions),
                metadata: MetadataStore::new(),
                unsaved: 0,
            }),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.metadata.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a found item.
    ///
    /// Fails with `Validation` for empty fields and `DuplicateId` for a
    /// repeated id, in both cases before anything is embedded or stored.
    pub fn add_item(
        &self,
        id: &str,
        description: &str,
        category: &str,
    ) -> Result<AddedItem, MatchError> {
        let id = required("id", id)?;
        let description = required("description", description)?;
        let category = required("category", category)?;

        if self.lock()?.metadata.contains(id) {
            return Err(MatchError::DuplicateId(id.to_string()));
        }

        let normalized_text = normalize(description);
        let embedding = self.embedder.embed(&normalized_text)?;

        let record = ItemRecord {
            id: id.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            created_at: Utc::now(),
        };

        let mut state = self.lock()?;

        // another insert may have taken the id while we were embedding
        if state.metadata.contains(id) {
            return Err(MatchError::DuplicateId(id.to_string()));
        }

        state.index.check(&embedding)?;
        self.store.save(&record).map_err(MatchError::Store)?;

        let position = Self::push(&mut state, record, normalized_text, embedding)?;
        state.unsaved += 1;

        log::info!("indexed item {id} ({category}) at position {position}");

        if self.options.snapshot_every > 0 && state.unsaved >= self.options.snapshot_every {
            self.write_snapshot(&mut state);
        }

        Ok(AddedItem {
            assigned_id: id.to_string(),
            position,
        })
    }

    /// Rank found items against a lost-item description.
    ///
    /// An empty collection yields an empty list. A category only boosts
    /// matching candidates; it never removes the others.
    pub fn search(
        &self,
        text: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Match>, MatchError> {
        let text = required("text", text)?;
        if limit == 0 {
            return Err(MatchError::validation("limit", "must be greater than 0"));
        }
        let category = category.map(str::trim).filter(|c| !c.is_empty());

        if self.is_empty() {
            return Ok(vec![]);
        }

        let query_norm = normalize(text);
        let query_vector = self.embedder.embed(&query_norm)?;

        let state = self.lock()?;
        // max(limit × factor, count) clamped to count: every item gets scored
        let k = limit
            .saturating_mul(self.options.over_fetch_factor)
            .max(state.index.len())
            .min(state.index.len());
        let candidates = state.index.query(&query_vector, k)?;

        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !candidate.similarity.is_finite() {
                return Err(MatchError::InvalidSimilarity {
                    position: candidate.position,
                });
            }

            let item = state.metadata.get(candidate.position).ok_or_else(|| {
                MatchError::Internal(format!(
                    "index position {} has no metadata",
                    candidate.position
                ))
            })?;

            let breakdown = self.scorer.score(
                &query_norm,
                category,
                &item.normalized_text,
                &item.category,
                candidate.similarity,
            );
            ranked.push((candidate.position, item, breakdown));
        }
        sort_ranked(&mut ranked);
        ranked.truncate(limit);

        let matches = ranked
            .into_iter()
            .map(|(_, item, breakdown)| Match {
                id: item.id.clone(),
                description: item.description.clone(),
                category: item.category.clone(),
                score: breakdown.final_score,
                score_breakdown: breakdown,
            })
            .collect::<Vec<_>>();

        log::debug!(
            "search {:?} (category {:?}) -> {} of {} candidates",
            query_norm,
            category,
            matches.len(),
            k
        );

        Ok(matches)
    }

    /// Rebuild the in-memory collection from the record store.
    ///
    /// Cached vectors are reused when the snapshot matches the model and the
    /// record's content hash; everything else is embedded again.
    pub fn restore(&self) -> Result<RestoreReport, MatchError> {
        let records = self.store.load_all().map_err(MatchError::Store)?;
        let cached = self.load_snapshot();

        let mut state = self.lock()?;
        if state.metadata.is_empty() {
            state.index = VectorIndex::with_capacity(self.embedder.dimensions(), records.len());
            state.metadata = MetadataStore::with_capacity(records.len());
        }
        let mut report = RestoreReport::default();

        for record in records {
            if state.metadata.contains(&record.id) {
                log::warn!("skipping duplicate id {:?} in {} store", record.id, self.store.kind());
                report.skipped += 1;
                continue;
            }

            let normalized_text = normalize(&record.description);
            let hash = content_hash(&record.id, &normalized_text);

            let embedding = match cached
                .get(state.index.len())
                .filter(|entry| entry.content_hash == hash)
                .filter(|entry| state.index.check(&entry.embedding).is_ok())
            {
                Some(entry) => entry.embedding.clone(),
                None => {
                    report.reembedded += 1;
                    self.embedder.embed(&normalized_text)?
                }
            };

            state.index.check(&embedding)?;
            Self::push(&mut state, record, normalized_text, embedding)?;
            report.loaded += 1;
        }

        if report.reembedded > 0 || report.skipped > 0 || cached.len() != report.loaded {
            self.write_snapshot(&mut state);
        }

        log::info!(
            "restored {} items from {} store ({} re-embedded, {} skipped)",
            report.loaded,
            self.store.kind(),
            report.reembedded,
            report.skipped
        );

        Ok(report)
    }

    /// Write the vector snapshot now. No-op without a snapshot location.
    pub fn save_snapshot(&self) -> Result<(), MatchError> {
        let mut state = self.lock()?;
        self.write_snapshot(&mut state);
        Ok(())
    }

    fn load_snapshot(&self) -> Vec<CachedVector> {
        let Some(snapshot) = &self.snapshot else {
            return vec![];
        };
        if !snapshot.exists() {
            log::info!("No vector snapshot, embeddings will be computed");
            return vec![];
        }

        match snapshot.load(&self.embedder.model_id(), self.embedder.dimensions()) {
            Ok(entries) => {
                log::info!("Loaded {} cached vectors from snapshot", entries.len());
                entries
            }
            Err(SnapshotError::ModelMismatch) => {
                log::warn!("Model changed, ignoring vector snapshot");
                vec![]
            }
            Err(err) => {
                log::warn!("Ignoring unreadable vector snapshot: {}", err);
                vec![]
            }
        }
    }

    fn write_snapshot(&self, state: &mut RetrievalState) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };

        let entries = state
            .metadata
            .all()
            .iter()
            .zip(state.index.iter())
            .map(|(item, vector)| (item.content_hash, vector));

        match snapshot.save(&self.embedder.model_id(), state.index.dimensions(), entries) {
            Ok(()) => {
                log::debug!("saved {} vectors to {}", state.index.len(), snapshot.path().display());
                state.unsaved = 0;
            }
            Err(err) => log::warn!("Failed to save vector snapshot: {}", err),
        }
    }

    /// Append to index and metadata. The vector must already have passed
    /// `VectorIndex::check`, so neither step can fail halfway.
    fn push(
        state: &mut RetrievalState,
        record: ItemRecord,
        normalized_text: String,
        embedding: Vec<f32>,
    ) -> Result<usize, MatchError> {
        let content_hash = content_hash(&record.id, &normalized_text);
        let position = state.index.insert(embedding)?;

        let metadata_position = state.metadata.append(IndexedItem {
            id: record.id,
            description: record.description,
            category: record.category,
            normalized_text,
            content_hash,
            created_at: record.created_at,
        });

        debug_assert_eq!(position, metadata_position);
        debug_assert_eq!(state.index.len(), state.metadata.len());

        Ok(position)
    }

    fn lock(&self) -> Result<MutexGuard<'_, RetrievalState>, MatchError> {
        self.state
            .lock()
            .map_err(|e| MatchError::Internal(format!("Lock poisoned: {}", e)))
    }
}

/// Sort by final score (highest first), earlier insertion wins ties.
fn sort_ranked(ranked: &mut [(usize, &IndexedItem, ScoreBreakdown)]) {
    ranked.sort_by(|a, b| {
        b.2.final_score
            .partial_cmp(&a.2.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, MatchError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MatchError::validation(field, "must not be empty"));
    }
    Ok(trimmed)
}
