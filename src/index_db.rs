use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    engine::IndexSnapshot,
    error::{Error, Result},
};

const INDEX_VECTORS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("index_vectors");
const INDEX_META: TableDefinition<&str, &[u8]> =
    TableDefinition::new("index_meta");

/// Header size: 4 bytes entry count + 4 bytes dimension.
const HEADER_SIZE: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    model_name: String,
    answers: Vec<String>,
}

/// Persisted retrieval indexes keyed by chatbot id.
///
/// Vectors and answers live in separate tables but are always written and
/// removed in the same transaction.
///
/// Binary format of a vector entry:
/// - 4 bytes: entry count N (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - N * D * 4 bytes: f32 LE values, one row per entry
pub struct IndexDb {
    db: Database,
}

impl IndexDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(INDEX_VECTORS)?;
        txn.open_table(INDEX_META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store the snapshot for `id`, replacing any previous one.
    pub fn store(&self, id: &Uuid, snapshot: &IndexSnapshot) -> Result<()> {
        let key = id.to_string();
        let count = snapshot.entries.len();
        let dimension = snapshot.dimension;
        let header_count = header_field("entry count", count)?;
        let header_dimension = header_field("dimension", dimension)?;

        let mut flat = Vec::with_capacity(count * dimension);
        let mut answers = Vec::with_capacity(count);
        for (vector, answer) in &snapshot.entries {
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
            answers.push(answer.clone());
        }

        let meta = serde_json::to_vec(&IndexMeta {
            model_name: snapshot.model_name.clone(),
            answers,
        })?;
        let byte_len = HEADER_SIZE + std::mem::size_of_val(flat.as_slice());

        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(INDEX_VECTORS)?;
            let mut guard = vectors.insert_reserve(key.as_str(), byte_len)?;
            let dest = guard.as_mut();

            dest[0..4].copy_from_slice(&header_count.to_le_bytes());
            dest[4..8].copy_from_slice(&header_dimension.to_le_bytes());
            dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(&flat));
        }
        {
            let mut metas = txn.open_table(INDEX_META)?;
            metas.insert(key.as_str(), meta.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Load the snapshot for `id`.
    ///
    /// Returns `None` if nothing is stored or the stored bytes are
    /// inconsistent.
    pub fn load(&self, id: &Uuid) -> Result<Option<IndexSnapshot>> {
        let key = id.to_string();
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(INDEX_VECTORS)?;
        let metas = txn.open_table(INDEX_META)?;

        let (Some(vec_guard), Some(meta_guard)) =
            (vectors.get(key.as_str())?, metas.get(key.as_str())?)
        else {
            return Ok(None);
        };

        let bytes = vec_guard.value();
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let count = read_u32(&bytes[0..4]) as usize;
        let dimension = read_u32(&bytes[4..8]) as usize;
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected != Some(bytes.len()) {
            return Ok(None);
        }

        let meta: IndexMeta = serde_json::from_slice(meta_guard.value())?;
        if meta.answers.len() != count {
            return Ok(None);
        }

        // redb gives no alignment guarantee, so decode rather than cast.
        let flat: Vec<f32> = bytes[HEADER_SIZE..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let entries = flat
            .chunks_exact(dimension.max(1))
            .map(<[f32]>::to_vec)
            .zip(meta.answers)
            .collect();

        Ok(Some(IndexSnapshot {
            model_name: meta.model_name,
            dimension,
            entries,
        }))
    }

    pub fn remove(&self, id: &Uuid) -> Result<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write()?;
        let removed = {
            let mut vectors = txn.open_table(INDEX_VECTORS)?;
            let mut metas = txn.open_table(INDEX_META)?;
            let a = vectors.remove(key.as_str())?.is_some();
            let b = metas.remove(key.as_str())?.is_some();
            a || b
        };
        txn.commit()?;
        Ok(removed)
    }

    /// List the ids of all stored indexes.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INDEX_META)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }
}

impl std::fmt::Debug for IndexDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDb").finish_non_exhaustive()
    }
}

fn header_field(name: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::InvalidInput(format!("index {name} {value} does not fit in u32"))
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
