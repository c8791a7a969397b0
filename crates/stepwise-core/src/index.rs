//! Index pipeline: read → chunk → embed → flat index, plus persistence of the
//! (vector index, metadata array) pair.
//!
//! The two files are only meaningful together: vector `i` belongs to chunk `i`.
//! The index header records the SHA-256 of the metadata file it was saved
//! with, and loading refuses any pair whose digest or lengths disagree.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chunks::{chunk_file, Chunk, ChunkerOptions, SourceError};
use crate::embed::{embed_batched, EmbedError, Embedder};
use crate::store::{FlatIndex, PairDigest, StoreError};

/// Default artifact base name: `class10_maths.index` + `class10_maths_meta.json`.
pub const DEFAULT_ARTIFACT_NAME: &str = "class10_maths";

/// Locations of the two persisted artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    /// `<dir>/<name>.index` and `<dir>/<name>_meta.json`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            index: dir.join(format!("{name}.index")),
            metadata: dir.join(format!("{name}_meta.json")),
        }
    }
}

/// A vector index and its position-aligned chunk array.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexArtifacts {
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl IndexArtifacts {
    /// Pairs an index with its chunks. Fails if their lengths differ.
    pub fn new(index: FlatIndex, chunks: Vec<Chunk>) -> Result<Self, IndexError> {
        if index.len() != chunks.len() {
            return Err(IndexError::Mismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }
        Ok(Self { index, chunks })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Writes both artifacts. Each is written to a temp sibling and renamed
    /// into place; the index is rolled back if the metadata cannot follow.
    /// A reader racing the swap gets an error from [IndexArtifacts::load],
    /// never a mispaired result.
    pub fn save(&self, paths: &ArtifactPaths) -> Result<(), IndexError> {
        for p in [&paths.index, &paths.metadata] {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::Io(parent.to_path_buf(), e))?;
            }
        }
        let json = serde_json::to_vec_pretty(&self.chunks)
            .map_err(|e| IndexError::Metadata(paths.metadata.clone(), e))?;
        let digest = metadata_digest(&json);
        let index_tmp = temp_sibling(&paths.index, "tmp");
        let meta_tmp = temp_sibling(&paths.metadata, "tmp");

        let result = self
            .index
            .write_to(&index_tmp, &digest)
            .map_err(IndexError::from)
            .and_then(|()| std::fs::write(&meta_tmp, &json).map_err(|e| IndexError::Io(meta_tmp.clone(), e)))
            .and_then(|()| swap_into_place(&index_tmp, &meta_tmp, paths));
        if result.is_err() {
            let _ = std::fs::remove_file(&index_tmp);
            let _ = std::fs::remove_file(&meta_tmp);
            return result;
        }
        info!(
            index = %paths.index.display(),
            metadata = %paths.metadata.display(),
            chunks = self.len(),
            "saved index artifacts"
        );
        Ok(())
    }

    /// Loads both artifacts. Missing files, unreadable contents, a metadata
    /// file other than the one the index was saved with, or a length mismatch
    /// are all errors.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, IndexError> {
        for p in [&paths.index, &paths.metadata] {
            if !p.is_file() {
                return Err(IndexError::Missing(p.clone()));
            }
        }
        let (index, digest) = FlatIndex::read_from(&paths.index)?;
        let raw = std::fs::read(&paths.metadata).map_err(|e| IndexError::Io(paths.metadata.clone(), e))?;
        if metadata_digest(&raw) != digest {
            return Err(IndexError::Unpaired {
                index: paths.index.clone(),
                metadata: paths.metadata.clone(),
            });
        }
        let chunks: Vec<Chunk> =
            serde_json::from_slice(&raw).map_err(|e| IndexError::Metadata(paths.metadata.clone(), e))?;
        let artifacts = Self::new(index, chunks)?;
        info!(
            chunks = artifacts.len(),
            dim = artifacts.index.dim(),
            "loaded index artifacts"
        );
        Ok(artifacts)
    }
}

fn metadata_digest(bytes: &[u8]) -> PairDigest {
    Sha256::digest(bytes).into()
}

/// Index first, then metadata. The previous index is copied to a `.bak`
/// sibling until the metadata rename succeeds, and renamed back if it fails.
fn swap_into_place(index_tmp: &Path, meta_tmp: &Path, paths: &ArtifactPaths) -> Result<(), IndexError> {
    let backup = temp_sibling(&paths.index, "bak");
    let had_old = paths.index.is_file();
    if had_old {
        std::fs::copy(&paths.index, &backup).map_err(|e| IndexError::Io(paths.index.clone(), e))?;
    }
    let discard_backup = || {
        if had_old {
            let _ = std::fs::remove_file(&backup);
        }
    };

    if let Err(e) = std::fs::rename(index_tmp, &paths.index) {
        discard_backup();
        return Err(IndexError::Io(paths.index.clone(), e));
    }
    if let Err(e) = std::fs::rename(meta_tmp, &paths.metadata) {
        // Put the previous index back so it matches the metadata still on disk.
        if had_old {
            let _ = std::fs::rename(&backup, &paths.index);
        } else {
            let _ = std::fs::remove_file(&paths.index);
        }
        return Err(IndexError::Io(paths.metadata.clone(), e));
    }
    discard_backup();
    Ok(())
}

fn temp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{suffix}"))
}

/// Embeds every chunk and builds a flat L2 index in chunk order.
/// The dimension is taken from the first vector. An empty chunk list yields
/// empty artifacts without calling the provider.
pub async fn build_index<E>(
    chunks: Vec<Chunk>,
    embedder: &E,
    batch_size: usize,
) -> Result<IndexArtifacts, IndexError>
where
    E: Embedder + ?Sized,
{
    if chunks.is_empty() {
        warn!("no chunks to index");
        return IndexArtifacts::new(FlatIndex::new(0), chunks);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    info!(chunks = texts.len(), batch_size, "embedding chunks");
    let embeddings = embed_batched(embedder, &texts, batch_size).await?;
    if embeddings.len() != chunks.len() {
        return Err(IndexError::Mismatch {
            vectors: embeddings.len(),
            chunks: chunks.len(),
        });
    }

    let dim = embeddings.first().map_or(0, Vec::len);
    let mut index = FlatIndex::new(dim);
    index.add_all(&embeddings)?;
    IndexArtifacts::new(index, chunks)
}

/// Runs the full pipeline for one source file: read, chunk, embed, index.
pub async fn index_source<E>(
    source: &Path,
    chunker: &ChunkerOptions,
    embedder: &E,
    batch_size: usize,
) -> Result<IndexArtifacts, IndexError>
where
    E: Embedder + ?Sized,
{
    let chunks = chunk_file(source, chunker)?;
    build_index(chunks, embedder, batch_size).await
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("index error: {0}")]
    Store(#[from] StoreError),
    #[error("artifact not found: {0}")]
    Missing(PathBuf),
    #[error("invalid metadata {0}: {1}")]
    Metadata(PathBuf, serde_json::Error),
    #[error("io error for {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("{index} was not saved together with {metadata}")]
    Unpaired { index: PathBuf, metadata: PathBuf },
    #[error("index has {vectors} vectors but metadata has {chunks} chunks")]
    Mismatch { vectors: usize, chunks: usize },
}
