//! Binary snapshot of item embeddings.
//!
//! The snapshot is a cache: the record store stays the source of truth and
//! any entry can be recomputed by embedding the record again.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in insertion order):
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::storage;

/// Current file format version
const FORMAT_VERSION: u8 = 2;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// One cached embedding, tagged with the content hash it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVector {
    pub content_hash: u64,
    pub embedding: Vec<f32>,
}

/// Errors that can occur during snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid snapshot: {0}")]
    InvalidFormat(String),
}

/// Reads and writes the embedding snapshot file.
pub struct VectorSnapshot {
    path: PathBuf,
}

impl VectorSnapshot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load cached vectors, validating model identity and dimensions.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Vec<CachedVector>, SnapshotError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        if header.model_id != *expected_model_id {
            return Err(SnapshotError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(SnapshotError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let dimensions = header.dimensions as usize;
        let mut entries = Vec::with_capacity(header.entry_count.min(1 << 20) as usize);
        let mut hasher = crc32fast::Hasher::new();

        for _ in 0..header.entry_count {
            let mut hash_bytes = [0u8; 8];
            reader.read_exact(&mut hash_bytes)?;
            hasher.update(&hash_bytes);

            let mut embedding = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                let mut float_bytes = [0u8; 4];
                reader.read_exact(&mut float_bytes)?;
                hasher.update(&float_bytes);
                embedding.push(f32::from_le_bytes(float_bytes));
            }

            entries.push(CachedVector {
                content_hash: u64::from_le_bytes(hash_bytes),
                embedding,
            });
        }

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != hasher.finalize() {
            return Err(SnapshotError::ChecksumMismatch);
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(SnapshotError::InvalidFormat(
                "trailing bytes after checksum".to_string(),
            ));
        }

        Ok(entries)
    }

    /// Save vectors in position order. Atomic: temp file -> fsync -> rename.
    pub fn save<'a, I>(
        &self,
        model_id: &[u8; 32],
        dimensions: usize,
        entries: I,
    ) -> Result<(), SnapshotError>
    where
        I: ExactSizeIterator<Item = (u64, &'a [f32])>,
    {
        let dims = u16::try_from(dimensions).map_err(|_| {
            SnapshotError::InvalidFormat(format!("{dimensions} dimensions do not fit the header"))
        })?;

        let mut buffer =
            Vec::with_capacity(HEADER_SIZE + entries.len() * (8 + dimensions * 4) + 4);
        buffer.extend_from_slice(&encode_header(model_id, dims, entries.len() as u64));

        for (content_hash, embedding) in entries {
            if embedding.len() != dimensions {
                return Err(SnapshotError::DimensionMismatch {
                    expected: dimensions,
                    got: embedding.len(),
                });
            }
            buffer.extend_from_slice(&content_hash.to_le_bytes());
            for &value in embedding {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }

        let checksum = crc32fast::hash(&buffer[HEADER_SIZE..]);
        buffer.extend_from_slice(&checksum.to_le_bytes());

        storage::write_atomic(&self.path, &buffer)?;
        Ok(())
    }

    /// Delete the snapshot file if it exists.
    pub fn delete(&self) -> Result<(), SnapshotError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn encode_header(model_id: &[u8; 32], dimensions: u16, entry_count: u64) -> [u8; HEADER_SIZE] {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(model_id);
    header_bytes[33..35].copy_from_slice(&dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    header_bytes
}

fn read_header(reader: &mut impl Read) -> Result<Header, SnapshotError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let entry_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        model_id,
        dimensions,
        entry_count,
    })
}
