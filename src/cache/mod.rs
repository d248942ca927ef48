//! Chunk Cache — the bounded, single-flight cache of decoded segments
//! shared by every open file.
//!
//! Grounded on two patterns from elsewhere in the corpus: the O(1)
//! capacity-bounded eviction structure ([`lru::LruList`]) and a
//! `tokio::sync::watch`-based promise for single-flight coalescing, so that
//! concurrent readers asking for the same segment at the same time trigger
//! exactly one decode.

mod lru;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::decoder::Matrix;
use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::types::FileId;
use lru::LruList;

/// Identifies one decoded segment. `version` ties the entry to a specific
/// generation of its file's view: bumping the view's version (on a
/// segmentation or channel-set change) makes every previously cached key
/// for that file unreachable without needing to walk and delete them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub file_id: FileId,
    pub version: u64,
    pub segment_index: u64,
}

/// A decoded segment, shared via `Arc` so cache hits and in-flight waiters
/// never clone sample data.
#[derive(Debug)]
pub struct Chunk {
    pub matrix: Matrix,
    pub channel_names: Vec<String>,
    pub sample_rates: Vec<f64>,
    pub t_start_us: i64,
    pub t_end_us: i64,
}

fn chunk_bytes(chunk: &Chunk) -> u64 {
    let (rows, cols) = chunk.matrix.shape();
    (rows * cols * std::mem::size_of::<f64>()) as u64
}

type ChunkResult = Result<Arc<Chunk>>;

/// A pending entry's generation distinguishes "the compute this waiter is
/// watching" from any later compute that lands in the same slot after an
/// invalidation — without it, a slow decode that outlives an invalidation
/// could resurrect a stale chunk into the map right after the sweep that
/// removed it.
enum Entry {
    Pending {
        rx: watch::Receiver<Option<ChunkResult>>,
        tx: watch::Sender<Option<ChunkResult>>,
        generation: u64,
    },
    Ready(Arc<Chunk>),
}

struct Inner {
    entries: HashMap<ChunkKey, Entry>,
    order: LruList<ChunkKey>,
    next_generation: u64,
}

/// Bounded, single-flight cache of [`Chunk`]s keyed by [`ChunkKey`].
///
/// Capacity bounds entry *count*; eviction never consults byte size. Byte
/// size is tracked separately, via `Metrics::bytes_cached`, for
/// observability only (see the design notes on byte-bounded eviction).
pub struct ChunkCache {
    inner: Mutex<Inner>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl ChunkCache {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: LruList::new(),
                next_generation: 0,
            }),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Look up `key`, computing it via `compute` on a miss. Concurrent
    /// callers for the same `key` share one in-flight computation: the
    /// first caller runs `compute`, the rest await its result.
    pub async fn get_or_compute<F, Fut>(&self, key: ChunkKey, compute: F) -> Result<Arc<Chunk>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Chunk>>,
    {
        enum Lookup {
            Pending(watch::Receiver<Option<ChunkResult>>),
            New(u64),
        }

        let lookup = {
            let mut inner = self.inner.lock();
            match inner.entries.get(&key) {
                Some(Entry::Ready(chunk)) => {
                    let chunk = Arc::clone(chunk);
                    inner.order.touch(&key);
                    self.metrics.inc_hit();
                    return Ok(chunk);
                }
                Some(Entry::Pending { rx, .. }) => {
                    self.metrics.inc_coalesced();
                    Lookup::Pending(rx.clone())
                }
                None => {
                    let generation = inner.next_generation;
                    inner.next_generation += 1;
                    let (tx, rx) = watch::channel(None);
                    inner.entries.insert(
                        key,
                        Entry::Pending {
                            rx: rx.clone(),
                            tx,
                            generation,
                        },
                    );
                    self.metrics.inc_miss();
                    Lookup::New(generation)
                }
            }
        };

        let generation = match lookup {
            Lookup::New(generation) => generation,
            Lookup::Pending(rx) => {
                // A pending entry already existed; wait for its resolution
                // without holding the lock.
                let mut rx = rx;
                loop {
                    if let Some(result) = rx.borrow().clone() {
                        return result;
                    }
                    if rx.changed().await.is_err() {
                        return Err(CoreError::Invalidated);
                    }
                }
            }
        };
        return self.drive_compute(key, generation, compute).await;
    }

    /// Run `compute` for a freshly-registered pending entry and land its
    /// result. Before committing, re-checks that the slot still holds the
    /// same `generation` of pending entry this call started with: an
    /// `invalidate`/`invalidate_file` that ran while `compute` was in
    /// flight will have already removed or superseded it and fulfilled any
    /// waiters itself, in which case this result is discarded rather than
    /// resurrecting a chunk the invalidation meant to drop.
    async fn drive_compute<F, Fut>(
        &self,
        key: ChunkKey,
        generation: u64,
        compute: F,
    ) -> Result<Arc<Chunk>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Chunk>>,
    {
        let outcome = compute().await.map(Arc::new);

        let mut inner = self.inner.lock();
        let still_current = matches!(
            inner.entries.get(&key),
            Some(Entry::Pending { generation: g, .. }) if *g == generation
        );
        let tx = if still_current {
            match inner.entries.remove(&key) {
                Some(Entry::Pending { tx, .. }) => Some(tx),
                _ => None,
            }
        } else {
            None
        };

        if still_current {
            match &outcome {
                Ok(chunk) => {
                    self.metrics.add_bytes_cached(chunk_bytes(chunk));
                    inner.entries.insert(key, Entry::Ready(Arc::clone(chunk)));
                    inner.order.touch(&key);
                    self.evict_if_needed(&mut inner);
                }
                Err(_) => {
                    // Never cache a failed decode; the next lookup retries.
                }
            }
        }
        drop(inner);

        if let Some(tx) = tx {
            let _ = tx.send(Some(outcome.clone()));
        }
        outcome
    }

    fn evict_if_needed(&self, inner: &mut Inner) {
        while inner.order.len() > self.capacity {
            if let Some(doomed) = inner.order.pop_lru() {
                if let Some(Entry::Ready(chunk)) = inner.entries.remove(&doomed) {
                    self.metrics.sub_bytes_cached(chunk_bytes(&chunk));
                }
                self.metrics.inc_eviction();
            } else {
                break;
            }
        }
    }

    /// Drop every cached entry for `file_id` at a generation other than
    /// `keep_version`. Called when a view change bumps the version so old
    /// chunks stop being servable, without scanning on every lookup. Any
    /// dropped entry that was still pending has its promise fulfilled with
    /// [`CoreError::Invalidated`] so waiters don't hang, and don't get
    /// handed a chunk `drive_compute` finishes decoding afterwards.
    pub fn invalidate(&self, file_id: FileId, keep_version: u64) {
        self.invalidate_matching(|k| k.file_id == file_id && k.version != keep_version);
    }

    /// Drop every cached entry for `file_id`, regardless of version. Called
    /// on file close.
    pub fn invalidate_file(&self, file_id: FileId) {
        self.invalidate_matching(|k| k.file_id == file_id);
    }

    fn invalidate_matching(&self, predicate: impl Fn(&ChunkKey) -> bool) {
        let mut inner = self.inner.lock();
        let doomed: Vec<ChunkKey> = inner
            .entries
            .keys()
            .filter(|k| predicate(k))
            .copied()
            .collect();
        let mut fulfillments = Vec::new();
        for key in &doomed {
            match inner.entries.remove(key) {
                Some(Entry::Pending { tx, .. }) => fulfillments.push(tx),
                Some(Entry::Ready(chunk)) => self.metrics.sub_bytes_cached(chunk_bytes(&chunk)),
                None => {}
            }
            inner.order.remove(key);
        }
        drop(inner);

        for tx in fulfillments {
            let _ = tx.send(Some(Err(CoreError::Invalidated)));
        }
    }

    /// True if `key` is already cached (ready or pending); used by the
    /// prefetch scheduler to avoid resubmitting work already underway.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
