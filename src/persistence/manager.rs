//! Persistence Manager
//!
//! Writes and reads snapshot files. Entries are split into batches of
//! `batch_size` keys; up to `parallelism` batches are encoded or decoded
//! concurrently and cancellation is checked between batch groups.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{CachedValue, NearCacheEntry, StatsRecorder};
use crate::config::{InMemoryFormat, PersistenceConfig};
use crate::error::{NearCacheError, Result};
use crate::persistence::{encode_record, SnapshotReader};
use crate::serializer::Serializer;

/// Outcome of a successful persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub keys: usize,
    pub bytes: u64,
    pub duration_ms: u64,
}

type Decoded<K, V> = (K, CachedValue<V>, Arc<[u8]>);

// == Persistence Manager ==
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    config: PersistenceConfig,
    stats: Arc<StatsRecorder>,
}

impl PersistenceManager {
    pub fn new(config: PersistenceConfig, stats: Arc<StatsRecorder>) -> Self {
        Self { config, stats }
    }

    // == Persist ==
    /// Writes `entries` to the snapshot file.
    ///
    /// Failures are recorded in the stats and returned; whatever was
    /// already written stays on disk.
    pub fn persist<K, V>(
        &self,
        entries: Vec<(K, Arc<NearCacheEntry<V>>)>,
        keys: &dyn Serializer<K>,
        values: &dyn Serializer<V>,
        cancel: &CancellationToken,
    ) -> Result<PersistReport>
    where
        K: Send + Sync,
        V: Send + Sync,
    {
        let started = Instant::now();
        match self.write_snapshot(&entries, keys, values, cancel) {
            Ok(bytes) => {
                let duration = started.elapsed();
                self.stats.record_persistence(entries.len() as u64, bytes, duration);
                info!(keys = entries.len(), bytes, duration_ms = duration.as_millis() as u64, "Near cache persisted");
                Ok(PersistReport {
                    keys: entries.len(),
                    bytes,
                    duration_ms: duration.as_millis() as u64,
                })
            }
            Err(e) => {
                self.stats.record_persistence_failure(e.to_string(), started.elapsed());
                error!(error = %e, "Near cache persistence failed");
                Err(e)
            }
        }
    }

    fn write_snapshot<K, V>(
        &self,
        entries: &[(K, Arc<NearCacheEntry<V>>)],
        keys: &dyn Serializer<K>,
        values: &dyn Serializer<V>,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        K: Send + Sync,
        V: Send + Sync,
    {
        let path = self.file_path()?;
        let pool = self.thread_pool()?;
        let batch_size = self.config.batch_size;
        let mut writer = BufWriter::new(File::create(&path)?);
        let mut written = 0u64;

        for group in entries.chunks(batch_size * self.config.parallelism) {
            if cancel.is_cancelled() {
                return Err(NearCacheError::Cancelled);
            }
            let encoded: Vec<Result<Vec<u8>>> = pool.install(|| {
                group
                    .par_chunks(batch_size)
                    .map(|batch| encode_batch(batch, keys, values))
                    .collect()
            });
            for batch in encoded {
                let bytes = batch?;
                writer.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(written)
    }

    // == Restore ==
    /// Reads the snapshot file and hands every record to `admit`, which
    /// returns whether the entry was kept. Returns the number kept.
    pub fn restore<K, V, F>(
        &self,
        keys: &dyn Serializer<K>,
        values: &dyn Serializer<V>,
        format: InMemoryFormat,
        cancel: &CancellationToken,
        admit: F,
    ) -> Result<usize>
    where
        K: Send,
        V: Send + Sync,
        F: FnMut(K, CachedValue<V>, Arc<[u8]>) -> bool,
    {
        let started = Instant::now();
        match self.read_snapshot(keys, values, format, cancel, admit) {
            Ok(admitted) => {
                self.stats.record_restored_keys(admitted as u64);
                info!(admitted, duration_ms = started.elapsed().as_millis() as u64, "Near cache restored");
                Ok(admitted)
            }
            Err(e) => {
                self.stats.record_persistence_failure(e.to_string(), started.elapsed());
                error!(error = %e, "Near cache restore failed");
                Err(e)
            }
        }
    }

    fn read_snapshot<K, V, F>(
        &self,
        keys: &dyn Serializer<K>,
        values: &dyn Serializer<V>,
        format: InMemoryFormat,
        cancel: &CancellationToken,
        mut admit: F,
    ) -> Result<usize>
    where
        K: Send,
        V: Send + Sync,
        F: FnMut(K, CachedValue<V>, Arc<[u8]>) -> bool,
    {
        let path = self.file_path()?;
        let pool = self.thread_pool()?;
        let data = std::fs::read(&path)?;
        let records = SnapshotReader::new(&data).collect::<Result<Vec<_>>>()?;
        let batch_size = self.config.batch_size;
        let mut admitted = 0;

        for group in records.chunks(batch_size * self.config.parallelism) {
            if cancel.is_cancelled() {
                return Err(NearCacheError::Cancelled);
            }
            let decoded: Vec<Result<Vec<Decoded<K, V>>>> = pool.install(|| {
                group
                    .par_chunks(batch_size)
                    .map(|batch| decode_batch(batch, keys, values, format))
                    .collect()
            });
            for batch in decoded {
                for (key, value, key_bytes) in batch? {
                    if admit(key, value, key_bytes) {
                        admitted += 1;
                    }
                }
            }
        }
        Ok(admitted)
    }

    fn file_path(&self) -> Result<PathBuf> {
        self.config
            .file_path
            .clone()
            .ok_or_else(|| NearCacheError::Configuration("no persistence file configured".to_string()))
    }

    fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("near-cache-persist-{}", i))
            .build()
            .map_err(|e| NearCacheError::PersistenceIo(std::io::Error::other(e)))
    }
}

fn encode_batch<K, V>(
    batch: &[(K, Arc<NearCacheEntry<V>>)],
    keys: &dyn Serializer<K>,
    values: &dyn Serializer<V>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (key, entry) in batch {
        let key_bytes = match entry.key_bytes() {
            Some(bytes) => bytes.to_vec(),
            None => keys.serialize(key)?,
        };
        match entry.value() {
            CachedValue::Binary(bytes) => encode_record(&mut buf, &key_bytes, bytes)?,
            CachedValue::Object(value) => encode_record(&mut buf, &key_bytes, &values.serialize(value)?)?,
        }
    }
    Ok(buf)
}

fn decode_batch<K, V>(
    batch: &[(&[u8], &[u8])],
    keys: &dyn Serializer<K>,
    values: &dyn Serializer<V>,
    format: InMemoryFormat,
) -> Result<Vec<Decoded<K, V>>> {
    batch
        .iter()
        .map(|(key_bytes, value_bytes)| {
            let key = keys.deserialize(key_bytes)?;
            let value = values.deserialize(value_bytes)?;
            let cached = match format {
                InMemoryFormat::Object => CachedValue::Object(Arc::new(value)),
                InMemoryFormat::Binary => CachedValue::Binary(Arc::from(*value_bytes)),
            };
            Ok((key, cached, Arc::from(*key_bytes)))
        })
        .collect()
}
