//! Query-time retrieval: a wide nearest-neighbour pass, then a keyword
//! re-rank that prefers candidates carrying a domain signal.
//!
//! Candidates are split into a strict bucket (some signal present) and a
//! fallback bucket (none), each kept in distance order. The result takes from
//! strict first and backfills from fallback, so a narrow keyword list never
//! shrinks the result below `min(top_k, pool)`.

use tracing::debug;

use crate::chunks::Chunk;
use crate::embed::{EmbedError, Embedder};
use crate::index::{ArtifactPaths, IndexArtifacts, IndexError};
use crate::store::StoreError;

/// Number of nearest neighbours fetched before re-ranking.
pub const DEFAULT_CANDIDATE_POOL: usize = 40;
pub const DEFAULT_TOP_K: usize = 3;

/// Signals for the bundled Class 10 "Real Numbers" corpus.
pub const DEFAULT_DOMAIN_SIGNALS: &[&str] = &[
    "integer",
    "positive integer",
    "hcf",
    "remainder",
    "divisor",
    "a = bq",
    "algorithm",
    "euclid",
];

/// Lowercased keywords matched as case-insensitive substrings of chunk text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainSignals {
    keywords: Vec<String>,
}

impl DomainSignals {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// True if any keyword occurs in `text`. Always false with no keywords.
    pub fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let low = text.to_lowercase();
        self.keywords.iter().any(|k| low.contains(k.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    /// Neighbours fetched before re-ranking. Zero is treated as one.
    pub candidate_pool: usize,
    pub signals: DomainSignals,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            candidate_pool: DEFAULT_CANDIDATE_POOL,
            signals: DomainSignals::new(DEFAULT_DOMAIN_SIGNALS),
        }
    }
}

/// Strict-then-fallback selection over distance-ranked candidates.
pub fn rerank<'a, I>(candidates: I, signals: &DomainSignals, top_k: usize) -> Vec<&'a Chunk>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let (strict, fallback): (Vec<&Chunk>, Vec<&Chunk>) =
        candidates.into_iter().partition(|c| signals.matches(&c.text));
    debug!(strict = strict.len(), fallback = fallback.len(), top_k, "re-rank buckets");

    let mut results: Vec<&Chunk> = strict.into_iter().take(top_k).collect();
    let missing = top_k - results.len();
    results.extend(fallback.into_iter().take(missing));
    results
}

/// Serves queries against one loaded, read-only artifact pair.
#[derive(Debug)]
pub struct Retriever<E> {
    artifacts: IndexArtifacts,
    embedder: E,
    options: RetrieverOptions,
}

impl<E: Embedder> Retriever<E> {
    pub fn new(artifacts: IndexArtifacts, embedder: E, options: RetrieverOptions) -> Self {
        Self {
            artifacts,
            embedder,
            options,
        }
    }

    /// Loads the artifacts from disk. Fails if either is missing or they disagree.
    pub fn open(paths: &ArtifactPaths, embedder: E, options: RetrieverOptions) -> Result<Self, RetrieveError> {
        let artifacts = IndexArtifacts::load(paths)?;
        Ok(Self::new(artifacts, embedder, options))
    }

    pub fn artifacts(&self) -> &IndexArtifacts {
        &self.artifacts
    }

    pub fn options(&self) -> &RetrieverOptions {
        &self.options
    }

    /// Embeds a query with the same provider the index was built with.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RetrieveError> {
        let vector = self.embedder.embed_one(text).await?;
        let dim = self.artifacts.index().dim();
        if vector.len() != dim {
            return Err(RetrieveError::DimensionMismatch {
                index: dim,
                query: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Top-`top_k` chunks for `query`, most relevant first.
    ///
    /// Returns `min(top_k, candidate_pool, corpus size)` chunks. An empty index
    /// or `top_k == 0` returns nothing without calling the provider.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>, RetrieveError> {
        if top_k == 0 || self.artifacts.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        let pool = self.options.candidate_pool.max(1);
        let neighbors = self.artifacts.index().search(&vector, pool)?;
        debug!(candidates = neighbors.len(), "nearest-neighbour pass");

        let chunks = self.artifacts.chunks();
        let candidates = neighbors.iter().filter_map(|n| chunks.get(n.ordinal));
        Ok(rerank(candidates, &self.options.signals, top_k)
            .into_iter()
            .cloned()
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("failed to load index: {0}")]
    Index(#[from] IndexError),
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("search error: {0}")]
    Search(#[from] StoreError),
    #[error("query embedding has {query} dimensions but the index has {index}; was it built with another model?")]
    DimensionMismatch { index: usize, query: usize },
}
