use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use async_lock::Mutex;
use log::Level;

use crate::{
    codec::CodecError,
    config::PartitionConfig,
    id::{random_file_token, RecordId},
    logging::strata_log,
    lsm::{
        compaction::{CompactionStrategy, NoopStrategy},
        snapshot::{PartitionSnapshot, SnapshotCell, SnapshotError, SNAPSHOT_FILE},
        table::{TableError, TableWriter},
        version_index::VersionIndex,
        LsmTableRef, RecordArena,
    },
    record::RecordRef,
    schema::TableSchema,
};

/// Errors from partition write, commit and compaction paths.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Insert attempted on a frozen partition.
    #[error("partition is frozen")]
    Frozen,
    /// The table list changed between compaction capture and install;
    /// the caller retries the whole compaction.
    #[error("table list changed while compaction was installing")]
    ConcurrentModification,
    /// Disk I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record payload did not decode against the table schema; the flush
    /// that hit it aborts and the compacting arena is retained.
    #[error("record decode failed: {0}")]
    Decode(#[from] CodecError),
    /// Columnar write/read failed.
    #[error(transparent)]
    Table(TableError),
    /// Snapshot metadata persistence failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl From<TableError> for PartitionError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Decode(err) => PartitionError::Decode(err),
            other => PartitionError::Table(other),
        }
    }
}

/// Owns the evolution of one partition: record ingestion into the head
/// arena, the flip/flush/install commit protocol, and compaction installs.
///
/// Two mutexes split the work: the write mutex guards snapshot publication
/// and arena mutation; the commit mutex serialises `commit`/`compact`
/// against each other without stalling inserts. The flush itself (phase B)
/// runs with no mutex held.
pub struct LsmPartitionWriter {
    config: Arc<PartitionConfig>,
    schema: Arc<TableSchema>,
    head: Arc<SnapshotCell>,
    strategy: Arc<dyn CompactionStrategy>,
    mutex: Mutex<()>,
    commit_mutex: Mutex<()>,
    frozen: AtomicBool,
}

impl LsmPartitionWriter {
    /// Open a partition, creating its directory and loading the snapshot
    /// metadata if the partition already exists on disk.
    pub async fn open(
        config: PartitionConfig,
        schema: TableSchema,
    ) -> Result<Self, PartitionError> {
        tokio::fs::create_dir_all(config.base_path()).await?;
        let snapshot = if tokio::fs::try_exists(config.base_path().join(SNAPSHOT_FILE)).await? {
            PartitionSnapshot::load(&config).await?
        } else {
            PartitionSnapshot::create(&config)
        };
        Ok(Self {
            config: Arc::new(config),
            schema: Arc::new(schema),
            head: Arc::new(SnapshotCell::new(snapshot)),
            strategy: Arc::new(NoopStrategy),
            mutex: Mutex::new(()),
            commit_mutex: Mutex::new(()),
            frozen: AtomicBool::new(false),
        })
    }

    /// Replace the compaction strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn CompactionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<PartitionSnapshot> {
        self.head.get().await
    }

    /// Stop accepting inserts; commits and compactions may still run.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Ingest a batch of records, returning the ids that were retained.
    ///
    /// For every record the highest known version is determined from the
    /// head arena, the compacting arena, then each on-disk sidecar newest
    /// first. The probe map is populated lazily: only ids whose incoming
    /// version beats the head arena are looked up further.
    pub async fn insert_records(
        &self,
        records: &[RecordRef],
    ) -> Result<HashSet<RecordId>, PartitionError> {
        let _write_lk = self.mutex.lock().await;
        if self.frozen.load(Ordering::SeqCst) {
            return Err(PartitionError::Frozen);
        }

        let snap = self.head.get().await;
        strata_log!(
            Level::Trace,
            "insert",
            "{} records into partition {}/{}/{}",
            records.len(),
            snap.namespace(),
            snap.table_name(),
            snap.partition_id(),
        );

        let mut rec_versions: HashMap<RecordId, u64> = HashMap::new();
        for record in records {
            if snap.head_arena.fetch_record_version(&record.record_id) < record.record_version {
                rec_versions.entry(record.record_id).or_insert(0);
            }
        }

        if let Some(compacting) = &snap.compacting_arena {
            for (id, known) in rec_versions.iter_mut() {
                let version = compacting.fetch_record_version(id);
                if version > *known {
                    *known = version;
                }
            }
        }

        for table in snap.tables.iter().rev() {
            VersionIndex::lookup(&mut rec_versions, &table.index_path(snap.base_path())).await?;
        }

        let mut inserted_ids = HashSet::new();
        if !rec_versions.is_empty() {
            for record in records {
                let Some(&known) = rec_versions.get(&record.record_id) else {
                    continue;
                };
                if record.record_version <= known {
                    continue;
                }
                let mut record = record.clone();
                if known > 0 {
                    record.is_update = true;
                }
                if snap.head_arena.insert(&record) {
                    inserted_ids.insert(record.record_id);
                }
            }
        }

        Ok(inserted_ids)
    }

    /// Highest version of `id` across the merged view: head arena,
    /// compacting arena and every on-disk table.
    pub async fn fetch_record_version(&self, id: &RecordId) -> Result<u64, PartitionError> {
        let snap = self.head.get().await;
        let mut version = snap.head_arena.fetch_record_version(id);
        if let Some(compacting) = &snap.compacting_arena {
            version = version.max(compacting.fetch_record_version(id));
        }
        let mut probe = HashMap::from([(*id, version)]);
        for table in snap.tables.iter().rev() {
            VersionIndex::lookup(&mut probe, &table.index_path(snap.base_path())).await?;
        }
        Ok(probe[id])
    }

    /// True iff the head arena holds at least one record.
    pub async fn needs_commit(&self) -> bool {
        let _write_lk = self.mutex.lock().await;
        self.head.get().await.head_arena.size() > 0
    }

    /// Compaction implies commit; stricter thresholds belong to the
    /// strategy.
    pub async fn needs_compaction(&self) -> bool {
        self.needs_commit().await
    }

    /// Flush pending records to a new on-disk table.
    ///
    /// Phase A flips the head arena into the compacting slot under the
    /// write mutex. Phase B writes the `.cst` and `.idx` files holding no
    /// mutex. Phase C installs the new table reference and clears the
    /// compacting slot under the write mutex again. A failure during
    /// phase B leaves the compacting arena in place for the next attempt;
    /// any files written become unreferenced orphans.
    pub async fn commit(&self) -> Result<(), PartitionError> {
        let _commit_lk = self.commit_mutex.lock().await;

        // flip arenas if records pending
        let arena = {
            let _write_lk = self.mutex.lock().await;
            let current = self.head.get().await;
            if current.compacting_arena.is_none() && current.head_arena.size() > 0 {
                let mut snap = current.as_ref().clone();
                let flipped = snap.head_arena.clone();
                snap.compacting_arena = Some(flipped.clone());
                snap.head_arena = Arc::new(RecordArena::new());
                self.head.set(Arc::new(snap)).await;
                Some(flipped)
            } else {
                current.compacting_arena.clone()
            }
        };

        // flush arena to disk if pending
        if let Some(arena) = arena {
            if arena.size() > 0 {
                let snap = self.head.get().await;
                let filename = random_file_token();
                let stem = snap.base_path().join(&filename);
                let started = Instant::now();
                TableWriter::new(&self.schema, self.config.write_parquet_properties.clone())
                    .write_arena(&arena, &stem)
                    .await?;

                strata_log!(
                    Level::Debug,
                    "commit",
                    "partition {}/{}/{} flushed {} records to {}, took {:.3}s",
                    snap.namespace(),
                    snap.table_name(),
                    snap.partition_id(),
                    arena.size(),
                    filename,
                    started.elapsed().as_secs_f64(),
                );

                // swap compacting arena with the on-disk table
                let _write_lk = self.mutex.lock().await;
                let mut snap = self.head.get().await.as_ref().clone();
                snap.compacting_arena = None;
                snap.tables.push(LsmTableRef::new(filename));
                snap.write_to_disk().await?;
                self.head.set(Arc::new(snap)).await;
            }
        }

        Ok(())
    }

    /// Commit, run the compaction strategy over the captured table list,
    /// and install its result.
    ///
    /// The install re-checks the captured list against the current one:
    /// a changed prefix entry or a shortened list fails with
    /// [`PartitionError::ConcurrentModification`] and the strategy's
    /// outputs become orphans. Tables appended after the capture are
    /// preserved by appending them to the new list.
    pub async fn compact(&self) -> Result<(), PartitionError> {
        self.commit().await?;

        // fetch current table list
        let old_tables = self.head.get().await.tables.clone();

        let new_tables = self
            .strategy
            .compact(&self.config, &self.schema, &old_tables)
            .await?;

        // commit table list
        {
            let _write_lk = self.mutex.lock().await;
            let mut snap = self.head.get().await.as_ref().clone();

            if snap.tables.len() < old_tables.len() {
                return Err(PartitionError::ConcurrentModification);
            }

            let mut merged = new_tables;
            for (i, table) in snap.tables.iter().enumerate() {
                if i < old_tables.len() {
                    if old_tables[i].filename() != table.filename() {
                        return Err(PartitionError::ConcurrentModification);
                    }
                } else {
                    merged.push(table.clone());
                }
            }

            snap.tables = merged;
            snap.write_to_disk().await?;
            self.head.set(Arc::new(snap)).await;
        }

        Ok(())
    }
}
