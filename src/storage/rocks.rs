// src/storage/rocks.rs
// RocksDB-backed local store

use async_trait::async_trait;
use rocksdb::{Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use super::{ChainStore, StorageError, CHAIN_KEY, NODES_KEY};
use crate::ledger::{now_millis, ChainSnapshot};
use crate::registry::RegistryExport;

pub const BACKUP_PREFIX: &str = "blockchain-backup:";
pub const MAX_BACKUPS: usize = 5;

/// Type alias for RocksDB (Arc for cheap cloning)
pub type RocksDb = Arc<DB>;

/// Try to open RocksDB, retrying with backoff while another process holds the lock.
pub fn try_open_db(path: &Path) -> Result<RocksDb, StorageError> {
    let mut attempt = 0u32;
    let max_attempts = 8u32;
    let mut wait = 250u64;

    loop {
        match open_rocksdb_internal(path) {
            Ok(db) => return Ok(Arc::new(db)),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(StorageError::Backend(format!(
                        "failed to open RocksDB at '{}' after {} attempts: {}",
                        path.display(),
                        attempt,
                        e
                    )));
                }
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "open_db failed, retrying in {}ms",
                    wait
                );
                sleep(Duration::from_millis(wait));
                wait = std::cmp::min(wait * 2, 2000);
            }
        }
    }
}

fn open_rocksdb_internal(path: &Path) -> Result<DB, rocksdb::Error> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.increase_parallelism(num_cpus::get() as i32);
    opts.set_max_background_jobs(2);
    opts.set_max_open_files(256);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    DB::open(&opts, path)
}

fn encode<V: Serialize>(val: &V) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(val)?)
}

fn decode<T: DeserializeOwned>(bytes: Option<Vec<u8>>) -> Result<Option<T>, StorageError> {
    match bytes {
        Some(b) => Ok(Some(serde_json::from_slice(&b)?)),
        None => Ok(None),
    }
}

fn backup_key(millis: i64) -> String {
    format!("{}{:020}", BACKUP_PREFIX, millis.max(0))
}

/// Backup keys, oldest first.
fn backup_keys(db: &DB) -> Result<Vec<Vec<u8>>, rocksdb::Error> {
    let prefix = BACKUP_PREFIX.as_bytes();
    let mut keys = Vec::new();
    for item in db.prefix_iterator(prefix) {
        let (k, _) = item?;
        if !k.starts_with(prefix) {
            break;
        }
        keys.push(k.to_vec());
    }
    Ok(keys)
}

/// Local durable store. Each chain save also writes a timestamped backup and
/// keeps only the newest few.
#[derive(Clone)]
pub struct RocksStore {
    db: RocksDb,
    path: PathBuf,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = try_open_db(&path)?;
        tracing::info!(path = %path.display(), "local store opened");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys of the retained chain backups, oldest first.
    pub async fn backups(&self) -> Result<Vec<String>, StorageError> {
        let db = self.db.clone();
        let keys = tokio::task::spawn_blocking(move || backup_keys(&db))
            .await?
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(keys
            .into_iter()
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .collect())
    }

    async fn put(&self, key: &'static str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.put(key, bytes))
            .await?
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn get(&self, key: &'static str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.get(key))
            .await?
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait]
impl ChainStore for RocksStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn save_blockchain(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        let bytes = encode(snapshot)?;
        let db = self.db.clone();
        let key = backup_key(now_millis());
        tokio::task::spawn_blocking(move || -> Result<(), rocksdb::Error> {
            let mut batch = WriteBatch::default();
            batch.put(CHAIN_KEY, &bytes);
            batch.put(key.as_bytes(), &bytes);
            db.write(batch)?;

            let keys = backup_keys(&db)?;
            if keys.len() > MAX_BACKUPS {
                let mut prune = WriteBatch::default();
                for k in &keys[..keys.len() - MAX_BACKUPS] {
                    prune.delete(k);
                }
                db.write(prune)?;
            }
            Ok(())
        })
        .await?
        .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn load_blockchain(&self) -> Result<Option<ChainSnapshot>, StorageError> {
        decode(self.get(CHAIN_KEY).await?)
    }

    async fn save_nodes(&self, nodes: &RegistryExport) -> Result<(), StorageError> {
        self.put(NODES_KEY, encode(nodes)?).await
    }

    async fn load_nodes(&self) -> Result<Option<RegistryExport>, StorageError> {
        decode(self.get(NODES_KEY).await?)
    }
}
