use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use rayon::prelude::*;
use uuid::Uuid;

use crate::{
    chatbot::TrainingExample,
    embedding::EmbeddingProvider,
    error::{Error, Result},
    vector_index::{Neighbor, VectorIndex},
};

/// Answer returned when the index is built but nothing qualifies as a match.
pub const NO_RELEVANT_ANSWER: &str =
    "Sorry, I couldn't find a relevant answer in the dataset.";

/// Built entries of an engine in a form that can be persisted and restored.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub model_name: String,
    pub dimension: usize,
    /// `(unit vector, answer)` in index order.
    pub entries: Vec<(Vec<f32>, String)>,
}

/// Embeds a dataset, owns the resulting [`VectorIndex`], and answers queries
/// against it.
///
/// The index sits behind an `RwLock<Option<Arc<_>>>`: training builds a new
/// index off to the side and swaps it in only once it is complete, and
/// queries clone the `Arc` so they never hold the lock while scoring.
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    min_similarity: Option<f32>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            index: RwLock::new(None),
            min_similarity: None,
        }
    }

    /// Hits scoring below `threshold` are ignored by [`respond`].
    ///
    /// [`respond`]: RetrievalEngine::respond
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Embed every question and replace the index with one built from them.
    ///
    /// Returns the number of indexed examples. The previous index, if any,
    /// stays in place when this fails.
    pub fn train(&self, examples: &[TrainingExample]) -> Result<usize> {
        if examples.is_empty() {
            return Err(Error::EmptyDataset(
                "no training examples supplied".to_string(),
            ));
        }

        let vectors: Vec<Vec<f32>> = examples
            .par_iter()
            .map(|ex| self.embedder.embed(&ex.question))
            .collect::<Result<_>>()?;

        let mut index = VectorIndex::new(self.embedder.dimension());
        index.build(
            vectors
                .into_iter()
                .zip(examples.iter().map(|ex| ex.answer.clone())),
        )?;

        let count = index.len();
        tracing::debug!(
            count,
            model = self.embedder.model_name(),
            "built retrieval index"
        );
        self.install(index);
        Ok(count)
    }

    /// Answer `query` with the payload of its nearest stored question.
    ///
    /// `k` bounds how many neighbors are retrieved before the similarity
    /// threshold is applied; `0` is treated as `1`.
    pub fn respond(&self, query: &str, k: usize) -> Result<String> {
        let hits = self.respond_detailed(query, k)?;
        Ok(hits
            .into_iter()
            .next()
            .map(|hit| hit.payload)
            .unwrap_or_else(|| NO_RELEVANT_ANSWER.to_string()))
    }

    /// Ranked neighbors of `query` that clear the similarity threshold.
    pub fn respond_detailed(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        let index = self.current_index().ok_or_else(|| {
            Error::NotTrained("retrieval engine has no index".to_string())
        })?;

        let vector = self.embedder.embed(query)?;
        let hits = index.query(&vector, k.max(1))?;

        Ok(match self.min_similarity {
            Some(threshold) => hits
                .into_iter()
                .filter(|hit| hit.similarity >= threshold)
                .collect(),
            None => hits,
        })
    }

    pub fn is_trained(&self) -> bool {
        self.current_index().is_some()
    }

    /// Number of entries in the current index, zero when untrained.
    pub fn len(&self) -> usize {
        self.current_index().map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export the built entries, or `None` when untrained.
    pub fn snapshot(&self) -> Option<IndexSnapshot> {
        let index = self.current_index()?;
        Some(IndexSnapshot {
            model_name: self.embedder.model_name().to_string(),
            dimension: index.dimension().unwrap_or_default(),
            entries: index
                .entries()
                .iter()
                .map(|e| (e.vector.clone(), e.payload.clone()))
                .collect(),
        })
    }

    /// Rebuild an engine from a persisted snapshot.
    ///
    /// The snapshot must match the embedder's dimension; vectors from a
    /// different embedding space would make every query meaningless.
    pub fn from_snapshot(
        embedder: Arc<dyn EmbeddingProvider>,
        snapshot: IndexSnapshot,
    ) -> Result<Self> {
        if snapshot.dimension != embedder.dimension() {
            return Err(Error::DimensionMismatch {
                expected: embedder.dimension(),
                actual: snapshot.dimension,
            });
        }
        if snapshot.model_name != embedder.model_name() {
            tracing::warn!(
                stored = %snapshot.model_name,
                current = embedder.model_name(),
                "restoring index built with a different embedding model"
            );
        }

        let mut index = VectorIndex::new(snapshot.dimension);
        index.build(snapshot.entries)?;

        let engine = Self::new(embedder);
        engine.install(index);
        Ok(engine)
    }

    fn install(&self, index: VectorIndex) {
        let mut slot = match self.index.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(index));
    }

    fn current_index(&self) -> Option<Arc<VectorIndex>> {
        let slot = match self.index.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone()
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("model", &self.embedder.model_name())
            .field("entries", &self.len())
            .field("min_similarity", &self.min_similarity)
            .finish()
    }
}

/// Trained engines keyed by chatbot id.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<Uuid, Arc<RetrievalEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<RetrievalEngine>> {
        let map = match self.engines.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(id).cloned()
    }

    /// Register `engine` for `id`, returning the engine it replaced.
    pub fn install(
        &self,
        id: Uuid,
        engine: Arc<RetrievalEngine>,
    ) -> Option<Arc<RetrievalEngine>> {
        let mut map = match self.engines.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(id, engine)
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<RetrievalEngine>> {
        let mut map = match self.engines.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(id)
    }

    pub fn len(&self) -> usize {
        match self.engines.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder::default())
    }

    fn dataset() -> Vec<TrainingExample> {
        vec![
            TrainingExample::new("What is 2+2?", "4"),
            TrainingExample::new("Capital of France?", "Paris"),
        ]
    }

    /// Embeds every text to the same constant vector.
    struct ConstantEmbedder(usize);

    impl EmbeddingProvider for ConstantEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; self.0])
        }

        fn dimension(&self) -> usize {
            self.0
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    /// Claims one dimension but produces another.
    struct LyingEmbedder;

    impl EmbeddingProvider for LyingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; 3])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "lying"
        }
    }

    #[test]
    fn train_returns_count_and_answers_exact_questions() {
        let engine = RetrievalEngine::new(embedder());
        assert_eq!(engine.train(&dataset()).unwrap(), 2);
        assert_eq!(engine.respond("What is 2+2?", 1).unwrap(), "4");
        assert_eq!(engine.respond("Capital of France?", 1).unwrap(), "Paris");
    }

    #[test]
    fn unrelated_query_still_returns_a_stored_answer() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        let answer = engine.respond("Unrelated nonsense query", 1).unwrap();
        assert!(answer == "4" || answer == "Paris", "got {answer}");
    }

    #[test]
    fn respond_before_train_is_not_trained() {
        let engine = RetrievalEngine::new(embedder());
        assert!(!engine.is_trained());
        assert!(matches!(
            engine.respond("anything", 1),
            Err(Error::NotTrained(_))
        ));
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let engine = RetrievalEngine::new(embedder());
        assert!(matches!(engine.train(&[]), Err(Error::EmptyDataset(_))));
        assert!(!engine.is_trained());
    }

    #[test]
    fn retrain_replaces_index() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        engine
            .train(&[TrainingExample::new("Capital of France?", "Paris, France")])
            .unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(
            engine.respond("Capital of France?", 1).unwrap(),
            "Paris, France"
        );
    }

    #[test]
    fn failed_retrain_keeps_previous_index() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        assert!(engine.train(&[]).is_err());
        assert_eq!(engine.respond("What is 2+2?", 1).unwrap(), "4");
    }

    #[test]
    fn wrong_embedding_dimension_fails_fast() {
        let engine = RetrievalEngine::new(Arc::new(LyingEmbedder));
        let err = engine.train(&dataset()).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(!engine.is_trained());
    }

    #[test]
    fn equal_scores_resolve_to_first_example() {
        let engine = RetrievalEngine::new(Arc::new(ConstantEmbedder(4)));
        engine
            .train(&[
                TrainingExample::new("a", "first"),
                TrainingExample::new("b", "second"),
            ])
            .unwrap();
        assert_eq!(engine.respond("zzz", 2).unwrap(), "first");
    }

    #[test]
    fn threshold_above_every_score_yields_sentinel() {
        let engine =
            RetrievalEngine::new(embedder()).with_min_similarity(Some(1.5));
        engine.train(&dataset()).unwrap();
        assert_eq!(
            engine.respond("What is 2+2?", 1).unwrap(),
            NO_RELEVANT_ANSWER
        );
    }

    #[test]
    fn zero_k_behaves_like_one() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        assert_eq!(engine.respond("What is 2+2?", 0).unwrap(), "4");
    }

    #[test]
    fn detailed_hits_are_ranked() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        let hits = engine.respond_detailed("Capital of France?", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload, "Paris");
        assert_eq!(hits[0].source_index, 1);
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn snapshot_roundtrip_preserves_answers() {
        let engine = RetrievalEngine::new(embedder());
        assert!(engine.snapshot().is_none());
        engine.train(&dataset()).unwrap();

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.entries.len(), 2);

        let restored =
            RetrievalEngine::from_snapshot(embedder(), snapshot).unwrap();
        assert_eq!(restored.respond("What is 2+2?", 1).unwrap(), "4");
    }

    #[test]
    fn snapshot_with_other_dimension_is_rejected() {
        let engine = RetrievalEngine::new(embedder());
        engine.train(&dataset()).unwrap();
        let snapshot = engine.snapshot().unwrap();

        let small: Arc<dyn EmbeddingProvider> =
            Arc::new(HashingEmbedder::new(8).unwrap());
        assert!(matches!(
            RetrievalEngine::from_snapshot(small, snapshot),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn registry_install_get_remove() {
        let registry = EngineRegistry::new();
        let id = Uuid::new_v4();
        assert!(registry.get(&id).is_none());

        let engine = Arc::new(RetrievalEngine::new(embedder()));
        assert!(registry.install(id, engine.clone()).is_none());
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &engine));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
    }
}
