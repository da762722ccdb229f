use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    chatbot::{Chatbot, ChatbotStatus},
    chatbot_db::ChatbotStore,
    dataset_db::DatasetLoader,
    embedding::EmbeddingProvider,
    engine::{EngineRegistry, RetrievalEngine},
    error::{Error, Result},
    index_db::IndexDb,
};

/// Result of a successful [`ChatbotLifecycle::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    /// The record as persisted after the transition.
    pub chatbot: Chatbot,
    /// Number of examples in the built index.
    pub examples: usize,
}

/// Drives chatbots through `Inactive -> Trained -> Active`.
///
/// Every transition re-reads the record from the store, checks the current
/// status, and writes the new record back while holding a lock scoped to
/// that chatbot id. Reads (`get`, `list`, `respond`) take no per-id lock.
///
/// Built indexes are kept in an [`EngineRegistry`]. When an [`IndexDb`] is
/// attached, each index is also persisted so it can be restored lazily
/// after a restart.
pub struct ChatbotLifecycle {
    store: Arc<dyn ChatbotStore>,
    datasets: Arc<dyn DatasetLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    indexes: Option<Arc<IndexDb>>,
    engines: EngineRegistry,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    min_similarity: Option<f32>,
}

impl ChatbotLifecycle {
    pub fn new(
        store: Arc<dyn ChatbotStore>,
        datasets: Arc<dyn DatasetLoader>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            datasets,
            embedder,
            indexes: None,
            engines: EngineRegistry::new(),
            locks: Mutex::new(HashMap::new()),
            min_similarity: None,
        }
    }

    /// Persist built indexes to `indexes` and restore them on demand.
    pub fn with_index_db(mut self, indexes: Arc<IndexDb>) -> Self {
        self.indexes = Some(indexes);
        self
    }

    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Number of engines currently loaded in memory.
    pub fn loaded_engines(&self) -> usize {
        self.engines.len()
    }

    pub fn create(&self, name: &str, description: &str) -> Result<Chatbot> {
        let chatbot = Chatbot::new(name, description);
        self.store.create(&chatbot)?;
        tracing::info!(id = %chatbot.id, name = %chatbot.name, "created chatbot");
        Ok(chatbot)
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<Chatbot>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<Chatbot>> {
        self.store.list()
    }

    /// Build an index for an `Inactive` chatbot from dataset `dataset_id`.
    ///
    /// Nothing is changed unless every step succeeds: on failure the record
    /// stays `Inactive`, no engine is registered and no index is left in the
    /// index database. A dataset that is missing or empty is
    /// [`Error::EmptyDataset`]; a dataset that cannot be read is reported as
    /// the underlying storage error.
    pub fn train(&self, id: &Uuid, dataset_id: &str) -> Result<TrainOutcome> {
        // Unknown ids never get a lock entry.
        self.require(id)?;
        let lock = self.lock_for(id);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut chatbot = self.require(id)?;
        if chatbot.status != ChatbotStatus::Inactive {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                current: chatbot.status,
                attempted: ChatbotStatus::Trained,
            });
        }

        let examples = self.datasets.load_dataset(dataset_id)?;
        if examples.is_empty() {
            return Err(Error::EmptyDataset(dataset_id.to_string()));
        }

        let engine = RetrievalEngine::new(Arc::clone(&self.embedder))
            .with_min_similarity(self.min_similarity);
        let count = engine.train(&examples)?;

        if let (Some(indexes), Some(snapshot)) =
            (&self.indexes, engine.snapshot())
        {
            indexes.store(id, &snapshot)?;
        }

        chatbot.status = ChatbotStatus::Trained;
        chatbot.last_trained_at = Some(Utc::now());
        chatbot.dataset_id = Some(dataset_id.to_string());

        // Readers check the record before the registry, so the engine is
        // invisible until the update commits.
        self.engines.install(*id, Arc::new(engine));

        if let Err(e) = self.store.update(&chatbot) {
            self.engines.remove(id);
            if let Some(indexes) = &self.indexes
                && let Err(cleanup) = indexes.remove(id)
            {
                tracing::warn!(%id, error = %cleanup, "failed to remove orphaned index");
            }
            return Err(e);
        }

        tracing::info!(%id, dataset_id, examples = count, "chatbot trained");

        Ok(TrainOutcome {
            chatbot,
            examples: count,
        })
    }

    /// Activate a `Trained` chatbot under `base_url`.
    ///
    /// The deployment URL is `<base_url>/chat/<id>` with trailing slashes of
    /// `base_url` removed.
    pub fn deploy(&self, id: &Uuid, base_url: &str) -> Result<Chatbot> {
        self.require(id)?;
        let lock = self.lock_for(id);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut chatbot = self.require(id)?;
        if chatbot.status != ChatbotStatus::Trained {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                current: chatbot.status,
                attempted: ChatbotStatus::Active,
            });
        }

        chatbot.deployment_url = deployment_url(base_url, id);
        chatbot.status = ChatbotStatus::Active;
        self.store.update(&chatbot)?;

        tracing::info!(%id, url = %chatbot.deployment_url, "chatbot deployed");
        Ok(chatbot)
    }

    /// Answer `query` with the chatbot's index.
    pub fn respond(&self, id: &Uuid, query: &str, k: usize) -> Result<String> {
        self.engine_for(id)?.respond(query, k)
    }

    /// The chatbot's engine, restored from the index database if it is not
    /// loaded yet.
    pub fn engine_for(&self, id: &Uuid) -> Result<Arc<RetrievalEngine>> {
        let chatbot = self.require(id)?;
        if !chatbot.status.has_index() {
            return Err(Error::NotTrained(id.to_string()));
        }

        if let Some(engine) = self.engines.get(id) {
            return Ok(engine);
        }

        let snapshot = match &self.indexes {
            Some(indexes) => indexes.load(id)?,
            None => None,
        };
        let Some(snapshot) = snapshot else {
            tracing::warn!(%id, status = %chatbot.status, "no stored index for chatbot");
            return Err(Error::NotTrained(id.to_string()));
        };

        let engine = Arc::new(
            RetrievalEngine::from_snapshot(Arc::clone(&self.embedder), snapshot)?
                .with_min_similarity(self.min_similarity),
        );
        tracing::debug!(%id, entries = engine.len(), "restored index");
        self.engines.install(*id, Arc::clone(&engine));
        Ok(engine)
    }

    fn require(&self, id: &Uuid) -> Result<Chatbot> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::chatbot_not_found(id))
    }

    fn lock_for(&self, id: &Uuid) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(*id).or_default())
    }
}

impl std::fmt::Debug for ChatbotLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatbotLifecycle")
            .field("model", &self.embedder.model_name())
            .field("engines", &self.engines.len())
            .field("persistent", &self.indexes.is_some())
            .finish_non_exhaustive()
    }
}

pub fn deployment_url(base_url: &str, id: &Uuid) -> String {
    format!("{}/chat/{id}", base_url.trim_end_matches('/'))
}
