//! Prefetch Scheduler — speculatively decodes the next `n_prefetch`
//! segments after each access, off the caller's critical path.
//!
//! Grounded on the dispatcher pattern of a bounded worker pool draining an
//! unbounded submission queue: an unbounded `mpsc` channel decouples
//! submission from execution, and a `Semaphore` caps how many decodes run
//! concurrently regardless of how many jobs are queued.
//!
//! The scheduler never holds the file manager, or even its open-file
//! registry, to avoid a back-reference cycle between the two: a job holds
//! only a `Weak<FileView>`. Closing a file drops the manager's strong
//! reference, so `Weak::upgrade` on a queued or in-flight job starts
//! failing immediately and the job becomes a silent no-op — cancellation
//! falls out of ownership instead of an explicit cancel list. A
//! still-open file whose segmentation changed is caught the same way, by
//! comparing the job's submitted version against the view's current one.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::cache::{Chunk, ChunkCache, ChunkKey};
use crate::decoder::adapter::DecoderAdapter;
use crate::metrics::Metrics;
use crate::types::FileId;
use crate::view::FileView;

struct Job {
    file_id: FileId,
    view: Weak<FileView>,
    version: u64,
    segment_index: u64,
}

struct Context {
    cache: Arc<ChunkCache>,
    adapter: Arc<DecoderAdapter>,
    metrics: Arc<Metrics>,
    semaphore: Arc<Semaphore>,
}

/// Submits and runs speculative decodes. Cheap to clone: it is just a
/// sender handle onto the dispatcher task.
#[derive(Clone)]
pub struct PrefetchScheduler {
    tx: mpsc::UnboundedSender<Job>,
}

impl PrefetchScheduler {
    pub fn new(
        cache: Arc<ChunkCache>,
        adapter: Arc<DecoderAdapter>,
        metrics: Arc<Metrics>,
        max_workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Context {
            cache,
            adapter,
            metrics,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        });
        tokio::spawn(Self::dispatch(rx, ctx));
        Self { tx }
    }

    /// Enqueue the `n` segments following `from_index` (exclusive) for the
    /// file behind `view`, stopping at `segment_count`. Already
    /// cached-or-pending segments are filtered out before they ever reach
    /// the queue.
    pub fn submit_following(
        &self,
        view: &Arc<FileView>,
        version: u64,
        from_index: u64,
        n: usize,
        segment_count: u64,
        cache: &ChunkCache,
    ) {
        let file_id = view.file_id;
        let weak = Arc::downgrade(view);
        for offset in 1..=n as u64 {
            let segment_index = from_index + offset;
            if segment_index >= segment_count {
                break;
            }
            let key = ChunkKey {
                file_id,
                version,
                segment_index,
            };
            if cache.contains(&key) {
                continue;
            }
            if self
                .tx
                .send(Job {
                    file_id,
                    view: weak.clone(),
                    version,
                    segment_index,
                })
                .is_err()
            {
                // Dispatcher task gone (shutdown); nothing left to do.
                break;
            }
        }
    }

    async fn dispatch(mut rx: mpsc::UnboundedReceiver<Job>, ctx: Arc<Context>) {
        while let Some(job) = rx.recv().await {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let Ok(_permit) = ctx.semaphore.clone().acquire_owned().await else {
                    return;
                };
                Self::run_job(&ctx, job).await;
            });
        }
    }

    async fn run_job(ctx: &Context, job: Job) {
        let Some(view) = job.view.upgrade() else {
            debug!(file_id = job.file_id.0, "prefetch dropped: file no longer open");
            ctx.metrics.inc_prefetch_dropped();
            return;
        };
        if view.version() != job.version {
            debug!(file_id = job.file_id.0, "prefetch dropped: view changed");
            ctx.metrics.inc_prefetch_dropped();
            return;
        }

        let key = ChunkKey {
            file_id: job.file_id,
            version: job.version,
            segment_index: job.segment_index,
        };
        if ctx.cache.contains(&key) {
            return;
        }

        let Ok((t0_us, t1_us)) = view.segment_range(job.segment_index) else {
            ctx.metrics.inc_prefetch_dropped();
            return;
        };
        let channels = view.active_channels();
        let sample_rates = view.sample_rates_for(&channels);
        let channel_names = channels.clone();
        let adapter = Arc::clone(&ctx.adapter);
        let open_handle = view.open_handle.clone();
        drop(view);

        let result = ctx
            .cache
            .get_or_compute(key, || async move {
                let matrix = adapter.read(&open_handle, channels, t0_us, t1_us).await?;
                Ok(Chunk {
                    matrix,
                    channel_names,
                    sample_rates,
                    t_start_us: t0_us,
                    t_end_us: t1_us,
                })
            })
            .await;

        match result {
            Ok(_) => ctx.metrics.inc_prefetch_completed(),
            Err(_) => ctx.metrics.inc_decode_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::adapter::DecoderAdapter;
    use crate::decoder::fake::{FakeDecoder, FakeRecording};
    use std::time::Duration;

    async fn open_view(adapter: &DecoderAdapter, path: &str, file_id: FileId) -> Arc<FileView> {
        let (metadata, open_handle) = adapter.open(path.to_string()).await.unwrap();
        Arc::new(FileView::new(file_id, path.to_string(), metadata, open_handle))
    }

    #[tokio::test]
    async fn submit_following_populates_cache() {
        let decoder = Arc::new(
            FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 100.0)),
        );
        let adapter = Arc::new(DecoderAdapter::new(decoder));
        let cache = Arc::new(ChunkCache::new(16, Arc::new(Metrics::new())));
        let metrics = Arc::new(Metrics::new());

        let view = open_view(&adapter, "/rec.mefd", FileId(1)).await;
        view.set_segment_seconds(10.0).unwrap();
        let version = view.version();

        let scheduler = PrefetchScheduler::new(Arc::clone(&cache), adapter, metrics, 4);
        scheduler.submit_following(&view, version, 0, 3, view.segment_count(), &cache);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.contains(&ChunkKey {
            file_id: FileId(1),
            version,
            segment_index: 1
        }));
        assert!(cache.contains(&ChunkKey {
            file_id: FileId(1),
            version,
            segment_index: 3
        }));
    }

    #[tokio::test]
    async fn prefetch_for_closed_file_is_dropped_silently() {
        let decoder = Arc::new(
            FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 100.0)),
        );
        let adapter = Arc::new(DecoderAdapter::new(decoder));
        let cache = Arc::new(ChunkCache::new(16, Arc::new(Metrics::new())));
        let metrics = Arc::new(Metrics::new());

        let view = open_view(&adapter, "/rec.mefd", FileId(1)).await;
        let version = view.version();
        let segment_count = view.segment_count();

        let scheduler = PrefetchScheduler::new(Arc::clone(&cache), adapter, metrics, 4);
        scheduler.submit_following(&view, version, 0, 2, segment_count, &cache);

        // Drop the only strong reference before the dispatcher gets to run
        // the job — equivalent to the manager closing the file.
        drop(view);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len(), 0);
    }
}
