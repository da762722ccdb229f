//! qabot - retrieval chatbots built from question/answer datasets.
//!
//! Each chatbot owns a small exact-search vector index over the embedded
//! questions of one dataset. A query is embedded the same way and answered
//! with the stored answer of its most similar question. Chatbots move
//! through `Inactive -> Trained -> Active`: training builds the index,
//! deploying assigns a public URL.
//!
//! Chatbot records, datasets and built indexes persist in
//! [redb](https://github.com/cberner/redb) files under the data directory.
//!
//! # Quick start
//!
//! ```no_run
//! use std::{collections::HashMap, sync::Arc};
//!
//! use qabot::{
//!     ChatbotDb, ChatbotLifecycle, DataDir, HashingEmbedder, TrainingExample,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = Arc::new(ChatbotDb::open(&data_dir.chatbots_db()).unwrap());
//! let datasets = Arc::new(HashMap::from([(
//!     "faq".to_string(),
//!     vec![TrainingExample::new("What is 2+2?", "4")],
//! )]));
//!
//! let lifecycle = ChatbotLifecycle::new(
//!     store,
//!     datasets,
//!     Arc::new(HashingEmbedder::default()),
//! );
//! let bot = lifecycle.create("math", "arithmetic answers").unwrap();
//! lifecycle.train(&bot.id, "faq").unwrap();
//! lifecycle.deploy(&bot.id, "http://localhost:5000").unwrap();
//!
//! assert_eq!(lifecycle.respond(&bot.id, "what is 2+2", 1).unwrap(), "4");
//! ```

pub mod chatbot;
pub mod chatbot_db;
pub mod config;
pub mod data_dir;
pub mod dataset_db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index_db;
pub mod lifecycle;
pub mod server;
pub mod text_util;
pub mod vector_index;

pub use chatbot::{Chatbot, ChatbotStatus, TrainingExample};
pub use chatbot_db::{ChatbotDb, ChatbotStore};
pub use config::Config;
pub use data_dir::DataDir;
pub use dataset_db::{DatasetDb, DatasetLoader};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use engine::{EngineRegistry, RetrievalEngine};
pub use error::{Error, Result};
pub use index_db::IndexDb;
pub use lifecycle::{ChatbotLifecycle, TrainOutcome};
pub use vector_index::VectorIndex;
