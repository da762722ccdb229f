use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_NAME: &str = "Untitled Chatbot";
pub const DEFAULT_DESCRIPTION: &str = "Generated from testset";

/// Deployment state of a chatbot.
///
/// Transitions only move forward: `Inactive -> Trained -> Active`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChatbotStatus {
    Inactive,
    Trained,
    Active,
}

impl ChatbotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatbotStatus::Inactive => "inactive",
            ChatbotStatus::Trained => "trained",
            ChatbotStatus::Active => "active",
        }
    }

    /// Whether a chatbot in this state owns a built index.
    pub fn has_index(&self) -> bool {
        !matches!(self, ChatbotStatus::Inactive)
    }
}

impl fmt::Display for ChatbotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted chatbot record.
///
/// Timestamps serialize as RFC 3339 strings and the status as its lower-case
/// name, which is also the wire format of the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chatbot {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub deployment_url: String,
    pub created_at: DateTime<Utc>,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub status: ChatbotStatus,
    /// Dataset the current index was built from.
    #[serde(default)]
    pub dataset_id: Option<String>,
}

impl Chatbot {
    /// A fresh `Inactive` record with no deployment URL.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            deployment_url: String::new(),
            created_at: Utc::now(),
            last_trained_at: None,
            status: ChatbotStatus::Inactive,
            dataset_id: None,
        }
    }
}

/// One (question, answer) pair of a training dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub question: String,
    pub answer: String,
}

impl TrainingExample {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

impl<Q: Into<String>, A: Into<String>> From<(Q, A)> for TrainingExample {
    fn from((question, answer): (Q, A)) -> Self {
        Self::new(question, answer)
    }
}
