//! Embedding provider seam. The indexer and retriever only see [Embedder];
//! the Ollama adapter lives in [crate::ollama].

use async_trait::async_trait;
use tracing::info;

use crate::ollama::OllamaError;

/// Default number of texts sent per provider request at index time.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Anything that turns texts into fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// all of the same non-zero length.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single string (the query side).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbedError::Malformed {
            reason: "provider returned no vector for a single input".to_string(),
        })
    }
}

/// Checks a raw provider response against the request it answers.
pub fn check_response(inputs: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != inputs {
        return Err(EmbedError::Malformed {
            reason: format!("expected {inputs} vectors, got {}", vectors.len()),
        });
    }
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if dim == 0 {
            return Err(EmbedError::Malformed {
                reason: "empty embedding vector".to_string(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(EmbedError::Malformed {
                reason: format!("mixed dimensions in one response: {dim} and {}", bad.len()),
            });
        }
        if let Some(i) = vectors.iter().position(|v| !v.iter().all(|x| x.is_finite())) {
            return Err(EmbedError::Malformed {
                reason: format!("vector {i} has a NaN or infinite component"),
            });
        }
    }
    Ok(vectors)
}

/// Embeds `texts` in requests of at most `batch_size` items and concatenates
/// the results in input order. The first failing request aborts the run.
pub async fn embed_batched<E>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedError>
where
    E: Embedder + ?Sized,
{
    let batch_size = batch_size.max(1);
    let total = texts.len().div_ceil(batch_size);
    let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size).enumerate() {
        info!(batch = i + 1, of = total, items = batch.len(), "embedding batch");
        let vectors = embedder.embed(batch).await?;
        if let (Some(prev), Some(next)) = (out.first(), vectors.first()) {
            if prev.len() != next.len() {
                return Err(EmbedError::Malformed {
                    reason: format!(
                        "dimension changed between batches: {} then {}",
                        prev.len(),
                        next.len()
                    ),
                });
            }
        }
        out.extend(vectors);
    }
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider failed: {0}")]
    Ollama(#[from] OllamaError),
    #[error("malformed embedding response: {reason}")]
    Malformed { reason: String },
    /// Failure reported by an [Embedder] implementation other than
    /// [crate::ollama::OllamaClient], e.g. another hosted API or a local model.
    #[error("embedding provider failed: {0}")]
    Provider(String),
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic stand-ins for the network provider.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Bag-of-words embedder: each lowercase alphanumeric token is hashed
    /// (FNV-1a) into one of `dim` buckets.
    #[derive(Debug)]
    pub struct HashEmbedder {
        pub dim: usize,
        pub calls: AtomicUsize,
    }

    impl HashEmbedder {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dim];
            let lower = text.to_lowercase();
            for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
                let mut h: u64 = 0xcbf2_9ce4_8422_2325;
                for b in token.bytes() {
                    h ^= u64::from(b);
                    h = h.wrapping_mul(0x0100_0000_01b3);
                }
                v[(h % self.dim as u64) as usize] += 1.0;
            }
            v
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }
    }

    /// Returns fixed vectors for known texts; unknown texts are a provider error.
    #[derive(Debug, Default)]
    pub struct TableEmbedder {
        pub table: Vec<(String, Vec<f32>)>,
    }

    impl TableEmbedder {
        pub fn with(mut self, text: &str, vector: &[f32]) -> Self {
            self.table.push((text.to_string(), vector.to_vec()));
            self
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            texts
                .iter()
                .map(|t| {
                    self.table
                        .iter()
                        .find(|(k, _)| k == t)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| EmbedError::Provider(format!("no vector for {t:?}")))
                })
                .collect()
        }
    }

    /// Always fails, counting attempts.
    #[derive(Debug, Default)]
    pub struct FailingEmbedder {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbedError::Provider("connection refused".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk {i}")).collect()
    }

    #[tokio::test]
    async fn batches_preserve_order() {
        let e = HashEmbedder::new(16);
        let input = texts(7);
        let out = embed_batched(&e, &input, 3).await.unwrap();
        assert_eq!(e.calls(), 3);
        assert_eq!(out.len(), 7);
        for (t, v) in input.iter().zip(&out) {
            assert_eq!(v, &e.vector(t));
        }
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let e = HashEmbedder::new(8);
        let out = embed_batched(&e, &[], DEFAULT_BATCH_SIZE).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(e.calls(), 0);
    }

    #[tokio::test]
    async fn zero_batch_size_is_one() {
        let e = HashEmbedder::new(8);
        embed_batched(&e, &texts(3), 0).await.unwrap();
        assert_eq!(e.calls(), 3);
    }

    #[tokio::test]
    async fn provider_error_stops_after_first_batch() {
        let e = FailingEmbedder::default();
        let err = embed_batched(&e, &texts(250), 100).await.unwrap_err();
        assert!(matches!(err, EmbedError::Provider(_)));
        assert_eq!(e.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embed_one_uses_single_item_call() {
        let e = HashEmbedder::new(8);
        let v = e.embed_one("hcf of 24 and 36").await.unwrap();
        assert_eq!(v, e.vector("hcf of 24 and 36"));
        assert_eq!(e.calls(), 1);
    }

    #[test]
    fn check_response_rejects_count_mismatch() {
        let err = check_response(2, vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, EmbedError::Malformed { .. }));
    }

    #[test]
    fn check_response_rejects_mixed_or_empty_dims() {
        assert!(check_response(2, vec![vec![1.0, 2.0], vec![1.0]]).is_err());
        assert!(check_response(1, vec![vec![]]).is_err());
        assert_eq!(check_response(0, vec![]).unwrap().len(), 0);
    }

    #[test]
    fn check_response_rejects_non_finite_values() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let err = check_response(2, vec![vec![1.0, 2.0], vec![bad, 0.0]]).unwrap_err();
            assert!(matches!(err, EmbedError::Malformed { ref reason } if reason.contains("vector 1")));
        }
    }
}
