//! Snapshot-based persistence.
//!
//! Each collection lives in its own snapshot file inside a data directory.
//! Writes are buffered in memory and a collection's file is rewritten
//! atomically when the collection is flushed.

use super::{MemoryBackend, StorageBackend, StorageStats, StoredRecord};
use crate::error::{QuadmapError, Result};
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_MAGIC: &[u8] = b"QUADMAP_SNAPSHOT";
const SNAPSHOT_VERSION: u8 = 1;
const SNAPSHOT_EXTENSION: &str = "snapshot";

/// One collection's snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<BTreeMap<u64, Bytes>> {
        if !self.exists() {
            return Ok(BTreeMap::new());
        }

        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Ok(BTreeMap::new());
        }

        let mut reader = BufReader::new(file);

        let mut magic = vec![0u8; SNAPSHOT_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(QuadmapError::InvalidFormat);
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(QuadmapError::InvalidFormat);
        }

        let mut timestamp_bytes = [0u8; 12];
        reader.read_exact(&mut timestamp_bytes)?;

        let entry_count = read_u64(&mut reader)?;
        let mut records = BTreeMap::new();

        for _ in 0..entry_count {
            let key = read_u64(&mut reader)?;
            let value_len = read_u64(&mut reader)?;
            if value_len > file_len {
                return Err(QuadmapError::InvalidFormat);
            }
            let mut value_buf = vec![0u8; value_len as usize];
            reader.read_exact(&mut value_buf)?;
            records.insert(key, Bytes::from(value_buf));
        }

        Ok(records)
    }

    pub fn save(&self, records: &BTreeMap<u64, Bytes>) -> Result<()> {
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&[SNAPSHOT_VERSION])?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| QuadmapError::InvalidTimestamp)?;
        write_u64(&mut writer, timestamp.as_secs())?;
        writer.write_all(&timestamp.subsec_nanos().to_le_bytes())?;

        write_u64(&mut writer, records.len() as u64)?;

        for (key, value) in records {
            write_u64(&mut writer, *key)?;
            write_u64(&mut writer, value.len() as u64)?;
            writer.write_all(value)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        self.sync_parent_dir()?;

        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            std::fs::remove_file(&self.path)?;
            self.sync_parent_dir()?;
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }

    fn sync_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }
}

/// Directory of snapshot files, one per collection.
///
/// All records are held in memory; [`StorageBackend::flush`] persists the
/// named collection. Unflushed inserts are lost if the process dies.
#[derive(Debug)]
pub struct SnapshotBackend {
    dir: PathBuf,
    memory: MemoryBackend,
    dirty: FxHashSet<String>,
}

impl SnapshotBackend {
    /// Open (or create) a data directory and load every collection in it.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_search_limit(dir, MemoryBackend::new().search_limit())
    }

    pub fn open_with_search_limit<P: AsRef<Path>>(dir: P, search_limit: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut collections = FxHashMap::default();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records = SnapshotFile::new(&path).load()?;
            log::debug!("Loaded collection {} ({} records)", name, records.len());
            collections.insert(name.to_string(), records);
        }

        Ok(Self {
            dir,
            memory: MemoryBackend::from_collections(collections, search_limit),
            dirty: FxHashSet::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_for(&self, name: &str) -> Result<SnapshotFile> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(QuadmapError::InvalidInput(format!(
                "collection name '{}' cannot be used as a file name",
                name
            )));
        }
        Ok(SnapshotFile::new(
            self.dir.join(format!("{}.{}", name, SNAPSHOT_EXTENSION)),
        ))
    }

    fn persist(&mut self, name: &str) -> Result<()> {
        let snapshot = self.snapshot_for(name)?;
        let records = self
            .memory
            .collection(name)
            .ok_or_else(|| QuadmapError::CollectionNotFound(name.to_string()))?;
        snapshot.save(records)?;
        self.dirty.remove(name);
        Ok(())
    }
}

impl StorageBackend for SnapshotBackend {
    fn has_collection(&self, name: &str) -> Result<bool> {
        self.memory.has_collection(name)
    }

    fn create_collection(&mut self, name: &str) -> Result<()> {
        if self.memory.has_collection(name)? {
            return Ok(());
        }
        self.snapshot_for(name)?;
        self.memory.create_collection(name)?;
        self.persist(name)
    }

    fn drop_collection(&mut self, name: &str) -> Result<()> {
        self.snapshot_for(name)?.remove()?;
        self.dirty.remove(name);
        self.memory.drop_collection(name)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        self.memory.list_collections()
    }

    fn num_entities(&self, name: &str) -> Result<usize> {
        self.memory.num_entities(name)
    }

    fn insert(&mut self, name: &str, records: &[StoredRecord]) -> Result<()> {
        self.memory.insert(name, records)?;
        self.dirty.insert(name.to_string());
        Ok(())
    }

    fn query(&self, name: &str, keys: &[u64]) -> Result<Vec<StoredRecord>> {
        self.memory.query(name, keys)
    }

    fn query_range(&self, name: &str, range: Range<u64>) -> Result<Vec<StoredRecord>> {
        self.memory.query_range(name, range)
    }

    fn flush(&mut self, name: &str) -> Result<()> {
        self.memory.flush(name)?;
        if self.dirty.contains(name) {
            self.persist(name)?;
        }
        Ok(())
    }

    fn search_limit(&self) -> usize {
        self.memory.search_limit()
    }

    fn stats(&self) -> Result<StorageStats> {
        self.memory.stats()
    }
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
