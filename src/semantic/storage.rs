//! On-disk cache of catalog image embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - fingerprint: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl VectorStorageError {
    /// Errors after which the cache should be discarded and rebuilt.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch(..)
                | Self::ModelMismatch
                | Self::ChecksumMismatch
                | Self::DimensionMismatch { .. }
                | Self::InvalidFormat(_)
        )
    }
}

/// SHA256 of the model name, stored in the header.
pub fn model_id(model_name: &str) -> [u8; 32] {
    Sha256::digest(model_name.as_bytes()).into()
}

/// Cached embeddings keyed by item fingerprint.
#[derive(Debug, Clone, Default)]
pub struct VectorCache {
    dimensions: usize,
    entries: HashMap<u64, Vec<f32>>,
}

impl VectorCache {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: HashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, fingerprint: u64) -> Option<&Vec<f32>> {
        self.entries.get(&fingerprint)
    }

    /// Insert an embedding. Vectors of the wrong length are ignored.
    pub fn insert(&mut self, fingerprint: u64, embedding: Vec<f32>) -> bool {
        if embedding.len() != self.dimensions {
            return false;
        }
        self.entries.insert(fingerprint, embedding);
        true
    }

    /// Drop every entry whose fingerprint is not in `keep`. Returns the number removed.
    pub fn retain(&mut self, keep: &std::collections::HashSet<u64>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|fp, _| keep.contains(fp));
        before - self.entries.len()
    }
}

/// Storage manager for the embedding cache.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    /// Create a new storage manager for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the storage file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the cache, checking it was written by the same model.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorCache, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        Self::validate_header(&header, expected_model_id, expected_dimensions)?;

        let dimensions = header.dimensions as usize;
        let mut cache = VectorCache::new(dimensions);
        cache.entries.reserve(header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (fingerprint, embedding) = Self::read_entry(&mut reader, dimensions)?;
            cache.entries.insert(fingerprint, embedding);
        }

        // Trailing bytes mean the count in the header is wrong
        let mut probe = [0u8; 1];
        if reader.read(&mut probe)? != 0 {
            return Err(VectorStorageError::InvalidFormat(
                "unexpected data after last entry".to_string(),
            ));
        }

        Ok(cache)
    }

    /// Save the cache.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, cache: &VectorCache, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(cache.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                cache.dimensions()
            ))
        })?;

        let temp_path = self.path.with_extension("tmp");

        let result = Self::write_to_file(&temp_path, cache, dimensions, model_id);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        path: &Path,
        cache: &VectorCache,
        dimensions: u16,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: cache.len() as u64,
        };
        Self::write_header(&mut writer, &header)?;

        // Sorted so identical caches produce identical files
        let mut fingerprints: Vec<&u64> = cache.entries.keys().collect();
        fingerprints.sort();
        for fingerprint in fingerprints {
            writer.write_all(&fingerprint.to_le_bytes())?;
            for value in &cache.entries[fingerprint] {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                VectorStorageError::InvalidFormat("file shorter than header".to_string())
            } else {
                VectorStorageError::Io(e)
            }
        })?;

        let version = header_bytes[0];
        if version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[43..47]));
        if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        Ok(Header {
            version,
            model_id,
            dimensions: u16::from_le_bytes(le_array(&header_bytes[33..35])),
            entry_count: u64::from_le_bytes(le_array(&header_bytes[35..43])),
        })
    }

    fn validate_header(
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        reader: &mut impl Read,
        dimensions: usize,
    ) -> Result<(u64, Vec<f32>), VectorStorageError> {
        let truncated = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                VectorStorageError::InvalidFormat("truncated entry".to_string())
            } else {
                VectorStorageError::Io(e)
            }
        };

        let mut fp_bytes = [0u8; 8];
        reader.read_exact(&mut fp_bytes).map_err(truncated)?;
        let fingerprint = u64::from_le_bytes(fp_bytes);

        let mut raw = vec![0u8; dimensions * 4];
        reader.read_exact(&mut raw).map_err(truncated)?;
        let embedding = raw
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(le_array(chunk)))
            .collect();

        Ok((fingerprint, embedding))
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::{Seek, SeekFrom};

    fn storage_in(dir: &tempfile::TempDir) -> VectorStorage {
        VectorStorage::new(dir.path().join("vectors.bin"))
    }

    #[test]
    fn test_model_id_is_stable() {
        assert_eq!(model_id("clip-vit-b32"), model_id("clip-vit-b32"));
        assert_ne!(model_id("clip-vit-b32"), model_id("nomic-embed-v1.5"));
    }

    #[test]
    fn test_save_and_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let id = model_id("test");

        storage.save(&VectorCache::new(512), &id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&id, 512).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), 512);
    }

    #[test]
    fn test_save_and_load_with_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let id = model_id("test");

        let mut cache = VectorCache::new(3);
        assert!(cache.insert(100, vec![1.0, 0.0, 0.0]));
        assert!(cache.insert(200, vec![0.0, 0.5, -0.5]));
        storage.save(&cache, &id).unwrap();

        let loaded = storage.load(&id, 3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(200), Some(&vec![0.0, 0.5, -0.5]));
        assert!(loaded.get(300).is_none());
    }

    #[test]
    fn test_insert_wrong_length_ignored() {
        let mut cache = VectorCache::new(3);
        assert!(!cache.insert(1, vec![1.0, 0.0]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retain_drops_stale() {
        let mut cache = VectorCache::new(1);
        cache.insert(1, vec![1.0]);
        cache.insert(2, vec![1.0]);
        cache.insert(3, vec![1.0]);

        let removed = cache.retain(&HashSet::from([1, 3]));
        assert_eq!(removed, 1);
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);

        storage.save(&VectorCache::new(3), &model_id("a")).unwrap();

        let err = storage.load(&model_id("b"), 3).unwrap_err();
        assert!(matches!(err, VectorStorageError::ModelMismatch));
        assert!(err.is_stale());
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let id = model_id("test");

        storage.save(&VectorCache::new(3), &id).unwrap();

        let result = storage.load(&id, 512);
        assert!(matches!(result, Err(VectorStorageError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        let result = storage.save(&VectorCache::new(3), &model_id("test"));

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);

        storage.save(&VectorCache::new(3), &model_id("test")).unwrap();
        storage.delete().unwrap();
        assert!(!storage.exists());
        storage.delete().unwrap();
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let id = model_id("test");

        let mut cache = VectorCache::new(3);
        cache.insert(1, vec![1.0, 0.0, 0.0]);
        storage.save(&cache, &id).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&id, 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let id = model_id("test");

        let mut cache = VectorCache::new(3);
        cache.insert(1, vec![1.0, 0.0, 0.0]);
        storage.save(&cache, &id).unwrap();

        let len = std::fs::metadata(storage.path()).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.set_len(len - 2).unwrap();

        let err = storage.load(&id, 3).unwrap_err();
        assert!(matches!(err, VectorStorageError::InvalidFormat(_)));
        assert!(err.is_stale());
    }
}
