//! Retrieval core for the StepWise tutoring bot, independent of how it is run.
//!
//! Offline: a textbook is chunked ([chunks]), embedded ([embed], [ollama]) and
//! stored as a flat L2 index plus a position-aligned metadata array ([store],
//! [index]). Online: [retriever] embeds a question, pulls a wide candidate pool
//! and re-ranks it by domain keywords. Artifacts and config live in the app
//! data directory (see [app_data]) unless configured elsewhere.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod embed;
pub mod index;
pub mod ollama;
pub mod retriever;
pub mod store;

pub use app_data::{app_data_dir, default_vectorstore_dir};
pub use chunks::{
    build_chunks, chunk_file, clean_line, read_source, Chunk, ChunkLabels, ChunkerOptions, Passage, SourceError,
    DEFAULT_JUNK_MARKERS, DEFAULT_MAX_WORDS,
};
pub use config::{
    config_path, load_config, load_config_from, save_config, save_config_to, Config, ConfigError,
};
pub use embed::{embed_batched, EmbedError, Embedder, DEFAULT_BATCH_SIZE};
pub use index::{build_index, index_source, ArtifactPaths, IndexArtifacts, IndexError, DEFAULT_ARTIFACT_NAME};
pub use ollama::{OllamaClient, OllamaError};
pub use retriever::{
    rerank, DomainSignals, RetrieveError, Retriever, RetrieverOptions, DEFAULT_CANDIDATE_POOL, DEFAULT_TOP_K,
};
pub use store::{FlatIndex, Neighbor, PairDigest, StoreError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "stepwise-core ready"
}
