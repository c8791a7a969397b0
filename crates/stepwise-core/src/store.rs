//! Flat (exact, non-quantized) L2 vector index.
//!
//! Vectors are stored row-major in insertion order; a vector's row number is
//! its ordinal, which is the position of its chunk in the metadata array.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const INDEX_MAGIC: u32 = 0x5357_464C; // "SWFL"
const INDEX_VERSION: u32 = 2;

/// SHA-256 of the metadata file this index was saved with.
pub type PairDigest = [u8; 32];

/// One search hit: squared Euclidean distance and row ordinal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Empty index for vectors of length `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append one vector; its ordinal is the previous `len()`.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, StoreError> {
        if self.dim == 0 || vector.len() != self.dim {
            return Err(StoreError::Dimension {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(StoreError::NonFinite { ordinal: self.len() });
        }
        let ordinal = self.len();
        self.data.extend_from_slice(vector);
        Ok(ordinal)
    }

    /// Append vectors in order. Nothing is added if any vector has the wrong
    /// length or a non-finite component.
    pub fn add_all(&mut self, vectors: &[Vec<f32>]) -> Result<(), StoreError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim || self.dim == 0) {
            return Err(StoreError::Dimension {
                expected: self.dim,
                actual: bad.len(),
            });
        }
        if let Some(i) = vectors.iter().position(|v| !v.iter().all(|x| x.is_finite())) {
            return Err(StoreError::NonFinite { ordinal: self.len() + i });
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Vector stored at `ordinal`.
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Exact k-nearest-neighbour search by squared Euclidean distance.
    /// Results are closest first, ties broken by lower ordinal; at most
    /// `min(k, len())` hits are returned. NaN distances rank last.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, StoreError> {
        if query.len() != self.dim {
            return Err(StoreError::Dimension {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(ordinal, row)| Neighbor {
                distance: match squared_l2(query, row) {
                    d if d.is_nan() => f32::INFINITY,
                    d => d,
                },
                ordinal,
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Writes: magic(u32) + version(u32) + dim(u32) + count(u64) + digest([u8; 32])
    /// + f32[], little endian. `digest` ties the file to its metadata.
    pub fn write_to(&self, path: &Path, digest: &PairDigest) -> Result<(), StoreError> {
        let file = std::fs::File::create(path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
        let mut w = BufWriter::new(file);
        let io = |e: std::io::Error| StoreError::Io(path.to_path_buf(), e);
        let dim = u32::try_from(self.dim).map_err(|_| StoreError::Format {
            path: path.to_path_buf(),
            reason: format!("dimension {} does not fit the header", self.dim),
        })?;
        w.write_all(&INDEX_MAGIC.to_le_bytes()).map_err(io)?;
        w.write_all(&INDEX_VERSION.to_le_bytes()).map_err(io)?;
        w.write_all(&dim.to_le_bytes()).map_err(io)?;
        w.write_all(&(self.len() as u64).to_le_bytes()).map_err(io)?;
        w.write_all(digest).map_err(io)?;
        for x in &self.data {
            w.write_all(&x.to_le_bytes()).map_err(io)?;
        }
        w.flush().map_err(io)?;
        w.get_ref().sync_all().map_err(io)
    }

    /// Reads an index and the metadata digest recorded with it.
    pub fn read_from(path: &Path) -> Result<(Self, PairDigest), StoreError> {
        let file = std::fs::File::open(path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
        let mut r = BufReader::new(file);
        let bad = |reason: String| StoreError::Format {
            path: path.to_path_buf(),
            reason,
        };

        let mut u32_buf = [0u8; 4];
        let mut u64_buf = [0u8; 8];
        let mut read_u32 = |r: &mut BufReader<std::fs::File>| -> Result<u32, StoreError> {
            r.read_exact(&mut u32_buf)
                .map_err(|e| bad(format!("truncated header: {e}")))?;
            Ok(u32::from_le_bytes(u32_buf))
        };
        let magic = read_u32(&mut r)?;
        if magic != INDEX_MAGIC {
            return Err(bad(format!("bad magic {magic:#010x}")));
        }
        let version = read_u32(&mut r)?;
        if version != INDEX_VERSION {
            return Err(bad(format!("unsupported version {version}")));
        }
        let dim = read_u32(&mut r)? as usize;
        r.read_exact(&mut u64_buf)
            .map_err(|e| bad(format!("truncated header: {e}")))?;
        let count = usize::try_from(u64::from_le_bytes(u64_buf))
            .map_err(|_| bad("count overflows usize".to_string()))?;
        let mut digest: PairDigest = [0u8; 32];
        r.read_exact(&mut digest)
            .map_err(|e| bad(format!("truncated header: {e}")))?;
        if dim == 0 && count > 0 {
            return Err(bad("zero dimension with non-zero count".to_string()));
        }

        let expected = count
            .checked_mul(dim)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| bad(format!("count {count} * dim {dim} overflows")))?;
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)
            .map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
        if bytes.len() != expected {
            return Err(bad(format!(
                "expected {expected} bytes of vector data, found {}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok((Self { dim, data }, digest))
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("io error for {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("vector {ordinal} has a NaN or infinite component")]
    NonFinite { ordinal: usize },
    #[error("invalid index file {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}
