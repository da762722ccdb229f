use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::{
    chatbot::Chatbot,
    error::{Error, Result},
};

const CHATBOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("chatbots");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Durable storage for chatbot records.
///
/// `update` is keyed by id and replaces every field of the stored record in
/// one step; readers never see a partially written record.
pub trait ChatbotStore: Send + Sync {
    /// Insert a new record. Fails if the id is already taken.
    fn create(&self, chatbot: &Chatbot) -> Result<()>;

    fn get(&self, id: &Uuid) -> Result<Option<Chatbot>>;

    fn list(&self) -> Result<Vec<Chatbot>>;

    /// Overwrite an existing record. Fails with `NotFound` if it is missing.
    fn update(&self, chatbot: &Chatbot) -> Result<()>;
}

/// redb-backed chatbot records plus a small key/value settings table.
///
/// Records are stored as JSON keyed by the hyphenated id.
pub struct ChatbotDb {
    db: Database,
}

impl ChatbotDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHATBOTS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

impl ChatbotStore for ChatbotDb {
    fn create(&self, chatbot: &Chatbot) -> Result<()> {
        let key = chatbot.id.to_string();
        let bytes = serde_json::to_vec(chatbot)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHATBOTS)?;
            if table.get(key.as_str())?.is_some() {
                return Err(Error::InvalidInput(format!(
                    "chatbot {key} already exists"
                )));
            }
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<Option<Chatbot>> {
        let key = id.to_string();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHATBOTS)?;
        match table.get(key.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<Chatbot>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHATBOTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice::<Chatbot>(v.value())?);
        }
        result.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
        });
        Ok(result)
    }

    fn update(&self, chatbot: &Chatbot) -> Result<()> {
        let key = chatbot.id.to_string();
        let bytes = serde_json::to_vec(chatbot)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHATBOTS)?;
            if table.get(key.as_str())?.is_none() {
                return Err(Error::chatbot_not_found(&key));
            }
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for ChatbotDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatbotDb").finish_non_exhaustive()
    }
}
