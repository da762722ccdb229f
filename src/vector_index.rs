use std::cmp::Ordering;

use rayon::prelude::*;

use crate::{
    embedding::normalize,
    error::{Error, Result},
};

/// A stored vector together with the answer it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// Unit-length copy of the vector passed to [`VectorIndex::build`].
    pub vector: Vec<f32>,
    pub payload: String,
    /// Position of the entry in the build input.
    pub source_index: usize,
}

/// One result of a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub payload: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
    /// Cosine distance, `1 - similarity`.
    pub distance: f32,
    pub source_index: usize,
}

/// Exact nearest-neighbor index under cosine distance.
///
/// Vectors are normalized on the way in, and queries are normalized before
/// scoring, so build and query always share one metric. Results are ordered
/// nearest-first with ties broken by insertion order.
///
/// # Examples
///
/// ```
/// use qabot::vector_index::VectorIndex;
///
/// let mut index = VectorIndex::new(2);
/// index
///     .build(vec![
///         (vec![1.0, 0.0], "east".to_string()),
///         (vec![0.0, 1.0], "north".to_string()),
///     ])
///     .unwrap();
///
/// let hits = index.query(&[0.9, 0.1], 1).unwrap();
/// assert_eq!(hits[0].payload, "east");
/// ```
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    entries: Vec<VectorEntry>,
    built: bool,
}

impl VectorIndex {
    /// An empty index that only accepts vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            entries: Vec::new(),
            built: false,
        }
    }

    /// An empty index whose dimension is fixed by the first built entry.
    pub fn with_inferred_dimension() -> Self {
        Self::default()
    }

    /// Populate the index, replacing anything built before.
    ///
    /// Fails with [`Error::EmptyIndex`] on empty input and with
    /// [`Error::DimensionMismatch`] if any vector has the wrong length. On
    /// failure the index keeps its previous contents.
    pub fn build<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (Vec<f32>, String)>,
    {
        let mut built = Vec::new();
        let mut expected = self.dimension;

        for (source_index, (mut vector, payload)) in
            entries.into_iter().enumerate()
        {
            let dim = *expected.get_or_insert(vector.len());
            if vector.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            built.push(VectorEntry {
                vector,
                payload,
                source_index,
            });
        }

        if built.is_empty() {
            return Err(Error::EmptyIndex);
        }

        self.dimension = expected;
        self.entries = built;
        self.built = true;
        Ok(())
    }

    /// Return up to `k` entries nearest to `vector`, nearest first.
    ///
    /// `k` is clamped to the number of stored entries.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if !self.built {
            return Err(Error::NotBuilt);
        }
        let expected = self.entries[0].vector.len();
        if vector.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let k = k.min(self.entries.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut query = vector.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .par_iter()
            .enumerate()
            .map(|(pos, entry)| (pos, dot(&query, &entry.vector)))
            .collect();

        // Highest similarity first; equal scores keep insertion order.
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(pos, similarity)| {
                let entry = &self.entries[pos];
                Neighbor {
                    payload: entry.payload.clone(),
                    similarity,
                    distance: 1.0 - similarity,
                    source_index: entry.source_index,
                }
            })
            .collect())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured or inferred dimension; `None` before the first build of an
    /// index created with [`with_inferred_dimension`].
    ///
    /// [`with_inferred_dimension`]: VectorIndex::with_inferred_dimension
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    // Adding 0.0 folds -0.0 into 0.0 so total_cmp sees them as equal.
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: &[f32], payload: &str) -> (Vec<f32>, String) {
        (v.to_vec(), payload.to_string())
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .build(vec![
                entry(&[1.0, 0.0, 0.0], "x"),
                entry(&[0.0, 1.0, 0.0], "y"),
                entry(&[0.0, 0.0, 1.0], "z"),
            ])
            .unwrap();
        index
    }

    #[test]
    fn query_before_build_fails() {
        let index = VectorIndex::new(3);
        assert!(!index.is_built());
        assert!(matches!(index.query(&[1.0, 0.0, 0.0], 1), Err(Error::NotBuilt)));
    }

    #[test]
    fn build_empty_fails_and_stays_unbuilt() {
        let mut index = VectorIndex::new(3);
        let err = index.build(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
        assert!(!index.is_built());
    }

    #[test]
    fn build_rejects_wrong_dimension() {
        let mut index = VectorIndex::new(3);
        let err = index
            .build(vec![entry(&[1.0, 0.0, 0.0], "a"), entry(&[1.0, 0.0], "b")])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(!index.is_built());
        assert!(index.is_empty());
    }

    #[test]
    fn failed_rebuild_keeps_previous_entries() {
        let mut index = sample_index();
        assert!(index.build(vec![entry(&[1.0], "bad")]).is_err());
        assert!(index.is_built());
        assert_eq!(index.len(), 3);
        assert_eq!(index.query(&[0.0, 1.0, 0.0], 1).unwrap()[0].payload, "y");
    }

    #[test]
    fn inferred_dimension_comes_from_first_entry() {
        let mut index = VectorIndex::with_inferred_dimension();
        assert_eq!(index.dimension(), None);
        index
            .build(vec![entry(&[1.0, 2.0], "a"), entry(&[2.0, 1.0], "b")])
            .unwrap();
        assert_eq!(index.dimension(), Some(2));

        let err = index
            .build(vec![entry(&[1.0, 2.0, 3.0], "c")])
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, .. }));
    }

    #[test]
    fn query_orders_nearest_first() {
        let index = sample_index();
        let hits = index.query(&[0.1, 0.9, 0.4], 3).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.payload.as_str()).collect();
        assert_eq!(order, vec!["y", "z", "x"]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn large_k_is_clamped() {
        let index = sample_index();
        let hits = index.query(&[1.0, 1.0, 1.0], 100).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn zero_k_returns_nothing() {
        let index = sample_index();
        assert!(index.query(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut index = VectorIndex::new(2);
        index
            .build(vec![
                entry(&[0.0, 1.0], "other"),
                entry(&[1.0, 0.0], "first"),
                entry(&[2.0, 0.0], "second"),
                entry(&[1.0, 0.0], "third"),
            ])
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 3).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.payload.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
        assert_eq!(hits[0].source_index, 1);
    }

    #[test]
    fn query_dimension_mismatch() {
        let index = sample_index();
        let err = index.query(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn identical_vector_has_similarity_one() {
        let index = sample_index();
        let hit = &index.query(&[0.0, 0.0, 5.0], 1).unwrap()[0];
        assert_eq!(hit.payload, "z");
        assert!((hit.similarity - 1.0).abs() < 1e-6);
        assert!(hit.distance.abs() < 1e-6);
    }
}
