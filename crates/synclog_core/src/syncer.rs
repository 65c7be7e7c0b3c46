//! The append orchestrator.
//!
//! One writer at a time appends through the syncer; readers catch up
//! through [`Syncer::get_all_logs`]. Appends follow a two-phase
//! protocol: persist an intent marker, append to the pool, persist the
//! counters, clear the marker. A crash between any two steps is
//! resolved by [`Syncer::new`]'s recovery pass before the next append.

use crate::error::{CoreError, CoreResult};
use crate::kv::get_json;
use crate::log::{new_version_id, Log};
use crate::pool::LogPool;
use crate::seq::SeqId;
use crate::snapshot::{build_pool_snapshot, last_snapshot_data};
use crate::storage::SyncStorage;
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

const KV_CUR_LOG_POOL: &str = "cur_log_pool";
const KV_NEXT_LOG_ID: &str = "next_log_id_on_current_pool";

// Pending build signals beyond this are dropped; the pool stays
// buildable later.
const BUILD_QUEUE_DEPTH: usize = 10;

struct WriterState {
    current_pool: u64,
    next_index: u64,
    pool: Option<Box<dyn LogPool>>,
}

/// The log engine's write and catch-up surface.
pub struct Syncer {
    store: Arc<dyn SyncStorage>,
    capacity: u64,
    state: Mutex<WriterState>,
    build_tx: Option<SyncSender<u64>>,
    builder: Option<JoinHandle<()>>,
}

impl Syncer {
    /// Opens a syncer over `store` with the given pool capacity.
    ///
    /// Capacity 0 disables rollover and compaction: all logs live in
    /// pool 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted counters cannot be read or
    /// the current pool cannot be opened. A syncer that cannot see its
    /// counters must not accept appends.
    pub fn new(store: Arc<dyn SyncStorage>, capacity: u64) -> CoreResult<Self> {
        let current_pool = get_json::<u64>(store.kv(), KV_CUR_LOG_POOL)?.unwrap_or(0);
        let next_index = get_json::<u64>(store.kv(), KV_NEXT_LOG_ID)?.unwrap_or(0);

        let pool = store.new_log_pool(current_pool)?;

        let (build_tx, build_rx) = sync_channel::<u64>(BUILD_QUEUE_DEPTH);
        let builder_store = Arc::clone(&store);
        let builder = std::thread::Builder::new()
            .name("snapshot-builder".to_string())
            .spawn(move || {
                for pool_index in build_rx {
                    build_pool_snapshot(&builder_store, pool_index);
                }
            })?;

        Ok(Self {
            store,
            capacity,
            state: Mutex::new(WriterState {
                current_pool,
                next_index,
                pool: Some(pool),
            }),
            build_tx: Some(build_tx),
            builder: Some(builder),
        })
    }

    /// Appends an `Add` for a core record, assigning a fresh version.
    ///
    /// # Errors
    ///
    /// Returns an error if the append protocol fails; the log is not
    /// durable in that case unless recovery later proves otherwise.
    pub fn append_add_record_log(&self, record_id: &str, data: &[u8]) -> CoreResult<()> {
        self.append_with(|| Ok(Log::add(record_id, data, new_version_id())))
    }

    /// Appends a `Del` for a core record.
    ///
    /// # Errors
    ///
    /// See [`Syncer::append_add_record_log`].
    pub fn append_del_record_log(&self, record_id: &str, version_id: &str) -> CoreResult<()> {
        self.append_with(|| Ok(Log::del(record_id, version_id)))
    }

    /// Appends a `Change` for a core record, assigning a fresh version.
    ///
    /// # Errors
    ///
    /// See [`Syncer::append_add_record_log`].
    pub fn append_change_record_log(
        &self,
        record_id: &str,
        version_id: &str,
        data: &[u8],
    ) -> CoreResult<()> {
        self.append_with(|| Ok(Log::change(record_id, version_id, data, new_version_id())))
    }

    /// Appends a plugin log produced by `build`.
    ///
    /// `build` runs under the writer lock, after crash recovery; an
    /// error from it abandons the append with nothing persisted.
    ///
    /// # Errors
    ///
    /// Returns `build`'s error, or an append protocol failure.
    pub fn append_plugin_log(&self, build: impl FnOnce() -> CoreResult<Log>) -> CoreResult<()> {
        self.append_with(build)
    }

    fn append_with(&self, build: impl FnOnce() -> CoreResult<Log>) -> CoreResult<()> {
        let mut state = self.state.lock();

        self.process_interrupted(&mut state)?;

        let log = build()?;

        let (pool_index, index_on_pool) = self.select_pool(&state);
        self.ensure_pool(&mut state, pool_index)?;

        self.store.pre_log(&log, pool_index, index_on_pool)?;

        let pool = state
            .pool
            .as_ref()
            .ok_or_else(|| CoreError::logic("writer pool not open"))?;
        if let Err(err) = pool.add_record_log(index_on_pool, log) {
            // Nothing landed; the marker is stale.
            if let Err(clear_err) = self.store.after_log() {
                warn!(%clear_err, "failed to clear intent marker after failed append");
            }
            return Err(err);
        }

        // On failure the marker stays put on purpose: the log is
        // durable, and the next append's recovery advances the counter
        // from it.
        self.persist_counters(&mut state, pool_index, index_on_pool + 1)?;

        if let Err(err) = self.store.after_log() {
            warn!(%err, "failed to clear intent marker");
        }

        Ok(())
    }

    /// Resolves a marker left by a crashed append.
    ///
    /// The marker is trusted only when it points exactly at the
    /// current pool's durable tail and that tail carries the marker's
    /// operation; then the counters are advanced past it. Every other
    /// shape means the append never landed, and the marker is simply
    /// discarded.
    fn process_interrupted(&self, state: &mut WriterState) -> CoreResult<()> {
        let Some(marker) = self.store.interrupted_log()? else {
            return Ok(());
        };

        let (pool_index, _) = self.select_pool(state);
        if marker.pool_index != pool_index {
            self.discard_marker();
            return Ok(());
        }

        self.ensure_pool(state, marker.pool_index)?;
        let pool = state
            .pool
            .as_ref()
            .ok_or_else(|| CoreError::logic("writer pool not open"))?;

        let Some((last_index, last_log)) = pool.get_last_record_log()? else {
            self.discard_marker();
            return Ok(());
        };

        if last_index != marker.index_on_pool {
            self.discard_marker();
            return Ok(());
        }

        if last_log.same_operation(&marker.log) {
            debug!(
                pool = marker.pool_index,
                index = marker.index_on_pool,
                "recovering counters past an interrupted append"
            );
            // Failure keeps the marker for the next attempt.
            self.persist_counters(state, marker.pool_index, marker.index_on_pool + 1)?;
        }

        self.discard_marker();
        Ok(())
    }

    fn discard_marker(&self) {
        if let Err(err) = self.store.after_log() {
            warn!(%err, "failed to discard intent marker");
        }
    }

    /// Picks the pool and in-pool index the next log goes to.
    fn select_pool(&self, state: &WriterState) -> (u64, u64) {
        if self.capacity == 0 {
            return (0, state.next_index);
        }

        if state.next_index < self.capacity {
            (state.current_pool, state.next_index)
        } else {
            (state.current_pool + 1, 0)
        }
    }

    /// Makes `pool_index` the open writer pool, closing the previous
    /// one and signaling the builder when rolling over.
    fn ensure_pool(&self, state: &mut WriterState, pool_index: u64) -> CoreResult<()> {
        if let Some(pool) = &state.pool {
            if pool.id() != pool_index {
                pool.close();
                self.try_snapshot(pool.id());
                state.pool = None;
            }
        }

        if state.pool.is_none() {
            state.pool = Some(self.store.new_log_pool(pool_index)?);
        }

        Ok(())
    }

    fn persist_counters(
        &self,
        state: &mut WriterState,
        pool_index: u64,
        next_index: u64,
    ) -> CoreResult<()> {
        self.store.kv().set_many(vec![
            (KV_CUR_LOG_POOL.to_string(), serde_json::to_vec(&pool_index)?),
            (KV_NEXT_LOG_ID.to_string(), serde_json::to_vec(&next_index)?),
        ])?;

        state.current_pool = pool_index;
        state.next_index = next_index;
        Ok(())
    }

    /// Queues a snapshot build for a closed pool. Dropping the signal
    /// is fine; the pool stays buildable.
    fn try_snapshot(&self, pool_index: u64) {
        if self.capacity == 0 {
            return;
        }

        if let Some(tx) = &self.build_tx {
            match tx.try_send(pool_index) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(pool = pool_index, "snapshot build queue full, dropping signal");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(pool = pool_index, "snapshot builder gone, dropping signal");
                }
            }
        }
    }

    /// Builds the snapshot of the closed pool `pool_index` on the
    /// calling thread.
    ///
    /// The builder thread does this on rollover; calling it directly
    /// compacts a pool eagerly (or again, should a build have been
    /// dropped). Idempotent and infallible by design: failures are
    /// logged, and the raw log remains authoritative.
    pub fn build_snapshot(&self, pool_index: u64) {
        if self.capacity == 0 {
            return;
        }
        build_pool_snapshot(&self.store, pool_index);
    }

    /// Returns every log strictly after `start_seq_id`, in order.
    ///
    /// An empty string means "from the beginning"; in that case, when a
    /// compacted closed pool exists, the response opens with one
    /// synthetic `Snapshot` log whose sequence ID is the last sequence
    /// it subsumes, followed by raw logs. The result always ends at
    /// the last durable log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSeqId`] for an undecodable cursor,
    /// or a storage error from reading the pools.
    pub fn get_all_logs(&self, start_seq_id: &str) -> CoreResult<Vec<Log>> {
        let start_seq = if start_seq_id.is_empty() {
            0
        } else {
            SeqId::parse(start_seq_id)?.next().as_u64()
        };

        let (mut start_pool, mut start_index) = SeqId::new(start_seq).split(self.capacity);

        let (last_pool, next_on_pool) = {
            let state = self.state.lock();
            self.select_pool(&state)
        };

        if last_pool == 0 && next_on_pool == 0 {
            return Ok(Vec::new());
        }

        // Step back to the last non-empty pool.
        let last_pool = if next_on_pool == 0 {
            last_pool - 1
        } else {
            last_pool
        };

        let mut logs = Vec::new();

        if start_seq == 0 && last_pool > 0 {
            match last_snapshot_data(&self.store, last_pool) {
                Ok(Some(data)) => {
                    let covered_end = SeqId::new(last_pool * self.capacity - 1);
                    logs.push(Log::snapshot(covered_end, serde_json::to_vec(&data)?));
                    start_pool = last_pool;
                    start_index = 0;
                }
                Ok(None) => {}
                Err(err) => {
                    // Compaction is an optimization; fall back to the
                    // raw log.
                    warn!(pool = last_pool, %err, "snapshot read failed, replaying raw logs");
                }
            }
        }

        for pool_index in start_pool..=last_pool {
            let pool = self.store.read_log_pool(pool_index)?;
            for (offset, mut log) in pool.get_record_logs(start_index, 0)?.into_iter().enumerate()
            {
                log.seq_id = SeqId::join(pool_index, start_index + offset as u64, self.capacity);
                logs.push(log);
            }
            start_index = 0;
        }

        Ok(logs)
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        // Closing the channel ends the builder loop.
        drop(self.build_tx.take());
        if let Some(builder) = self.builder.take() {
            let _ = builder.join();
        }
    }
}
