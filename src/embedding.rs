use crate::{
    error::{Error, Result},
    text_util,
};

pub const DEFAULT_DIMENSION: usize = 256;
pub const HASHING_MODEL_NAME: &str = "hashing-unigram-bigram-v1";

/// Weight of a bigram feature relative to a unigram.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Turns text into fixed-dimension vectors.
///
/// Every vector an instance returns has exactly [`dimension`] components.
/// Implementations must be deterministic for the lifetime of an index:
/// questions embedded at train time and queries embedded later are compared
/// directly.
///
/// [`dimension`]: EmbeddingProvider::dimension
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    /// Identifier recorded next to persisted indexes.
    fn model_name(&self) -> &str;
}

/// Feature-hashing embedder over word unigrams and bigrams.
///
/// Each feature is hashed (FNV-1a) into one of `dimension` buckets with a
/// hash-derived sign, and the result is L2-normalized. Identical texts
/// always map to identical vectors, and the mapping is stable across
/// processes, so persisted indexes stay valid after a restart.
///
/// # Examples
///
/// ```
/// use qabot::embedding::{EmbeddingProvider, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64).unwrap();
/// let a = embedder.embed("What is 2+2?").unwrap();
/// let b = embedder.embed("what is 2 + 2").unwrap();
/// assert_eq!(a.len(), 64);
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = text_util::tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for bigram in text_util::bigrams(&tokens) {
            self.accumulate(&mut vector, &bigram, BIGRAM_WEIGHT);
        }

        normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        HASHING_MODEL_NAME
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(PRIME)
    })
}
