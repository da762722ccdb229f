use std::{collections::HashMap, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    chatbot::TrainingExample,
    error::{Error, Result},
};

const DATASETS: TableDefinition<&str, &[u8]> = TableDefinition::new("datasets");

/// Source of training data keyed by dataset (meta) id.
///
/// A missing id yields an empty dataset rather than an error; callers treat
/// both the same way.
pub trait DatasetLoader: Send + Sync {
    fn load_dataset(&self, meta_id: &str) -> Result<Vec<TrainingExample>>;
}

impl DatasetLoader for HashMap<String, Vec<TrainingExample>> {
    fn load_dataset(&self, meta_id: &str) -> Result<Vec<TrainingExample>> {
        Ok(self.get(meta_id).cloned().unwrap_or_default())
    }
}

/// Summary row for `dataset list`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DatasetInfo {
    pub id: String,
    pub examples: usize,
}

/// redb-backed datasets, each stored as a JSON array of examples.
pub struct DatasetDb {
    db: Database,
}

impl DatasetDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(DATASETS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store `examples` under `id`, replacing any previous dataset.
    pub fn put_dataset(
        &self,
        id: &str,
        examples: &[TrainingExample],
    ) -> Result<()> {
        let bytes = serde_json::to_vec(examples)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DATASETS)?;
            table.insert(id, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn remove_dataset(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DATASETS)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DATASETS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let examples: Vec<TrainingExample> =
                serde_json::from_slice(v.value())?;
            result.push(DatasetInfo {
                id: k.value().to_string(),
                examples: examples.len(),
            });
        }
        Ok(result)
    }

    /// Read a dataset file and store it under `id`.
    ///
    /// Returns the number of imported examples.
    pub fn import_file(&self, id: &str, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let examples = parse_examples(&content)?;
        if examples.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} contains no examples",
                path.display()
            )));
        }
        self.put_dataset(id, &examples)?;
        Ok(examples.len())
    }
}

impl DatasetLoader for DatasetDb {
    fn load_dataset(&self, meta_id: &str) -> Result<Vec<TrainingExample>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DATASETS)?;
        match table.get(meta_id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for DatasetDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetDb").finish_non_exhaustive()
    }
}

/// Parse examples from either a JSON array or JSON Lines.
///
/// Each item is an object with `question` and `answer` string fields.
/// Blank lines in JSON Lines input are skipped. Examples with an empty
/// question are rejected.
///
/// # Examples
///
/// ```
/// use qabot::dataset_db::parse_examples;
///
/// let jsonl = r#"{"question": "hi", "answer": "hello"}
/// {"question": "bye", "answer": "goodbye"}"#;
/// let examples = parse_examples(jsonl).unwrap();
/// assert_eq!(examples.len(), 2);
/// assert_eq!(examples[1].answer, "goodbye");
/// ```
pub fn parse_examples(content: &str) -> Result<Vec<TrainingExample>> {
    let trimmed = content.trim_start();
    let examples: Vec<TrainingExample> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::InvalidInput(format!("line {}: {e}", n + 1))
                })
            })
            .collect::<Result<_>>()?
    };

    if let Some(pos) =
        examples.iter().position(|ex| ex.question.trim().is_empty())
    {
        return Err(Error::InvalidInput(format!(
            "example {} has an empty question",
            pos + 1
        )));
    }

    Ok(examples)
}
