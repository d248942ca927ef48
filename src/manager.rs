// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! File Manager: the top-level façade. Owns the registry of open files,
//! the shared chunk cache, and the prefetch scheduler, and is the only
//! place lock order across those three is decided — always registry, then
//! a given file's view, then the cache, never the reverse.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::{Chunk, ChunkCache, ChunkKey};
use crate::config::Config;
use crate::decoder::adapter::DecoderAdapter;
use crate::decoder::RawDecoder;
use crate::error::{CoreError, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::prefetch::PrefetchScheduler;
use crate::types::{FileId, FileIdAllocator, OpenFiles};
use crate::view::FileView;

/// Summary of an open recording, returned by [`FileManager::open_file`] and
/// [`FileManager::file_info`].
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub channel_names: Vec<String>,
    pub start_us: i64,
    pub end_us: i64,
}

/// Top-level façade over an open-file registry, the shared chunk cache, and
/// the prefetch scheduler.
pub struct FileManager {
    open_files: OpenFiles,
    ids: FileIdAllocator,
    adapter: Arc<DecoderAdapter>,
    cache: Arc<ChunkCache>,
    scheduler: PrefetchScheduler,
    metrics: Arc<Metrics>,
    n_prefetch: usize,
}

impl FileManager {
    pub fn new(config: &Config, raw_decoder: Arc<dyn RawDecoder>) -> Self {
        let open_files: OpenFiles = Arc::new(RwLock::new(HashMap::new()));
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(ChunkCache::new(config.cache_capacity(), Arc::clone(&metrics)));
        let adapter = Arc::new(DecoderAdapter::new(raw_decoder));

        let scheduler = PrefetchScheduler::new(
            Arc::clone(&cache),
            Arc::clone(&adapter),
            Arc::clone(&metrics),
            config.max_workers,
        );

        info!(
            cache_capacity = config.cache_capacity(),
            n_prefetch = config.n_prefetch,
            max_workers = config.max_workers,
            "file manager started"
        );

        Self {
            open_files,
            ids: FileIdAllocator::new(),
            adapter,
            cache,
            scheduler,
            metrics,
            n_prefetch: config.n_prefetch,
        }
    }

    /// Open `path`, returning its [`FileId`]. Idempotent: if `path` is
    /// already open, returns the existing file's id without touching its
    /// view state or decoder handle, instead of opening a second
    /// independent `FileView` for the same recording.
    pub async fn open_file(&self, path: String) -> Result<FileId> {
        if let Some(file_id) = self.find_by_path(&path) {
            return Ok(file_id);
        }

        let (metadata, open_handle) = self.adapter.open(path.clone()).await?;

        // Re-check under the write lock: another opener may have raced this
        // one to register `path` while the decoder open above was in
        // flight.
        let winner = {
            let mut files = self.open_files.write();
            match files.values().find(|v| v.path == path).map(|v| v.file_id) {
                Some(existing) => Err(existing),
                None => {
                    let file_id = self.ids.next();
                    let view = Arc::new(FileView::new(file_id, path.clone(), metadata, open_handle.clone()));
                    files.insert(file_id, view);
                    Ok(file_id)
                }
            }
        };

        match winner {
            Ok(file_id) => {
                info!(file_id = file_id.0, path = %path, "file opened");
                Ok(file_id)
            }
            Err(existing) => {
                let _ = self.adapter.close(open_handle).await;
                Ok(existing)
            }
        }
    }

    /// Resolve an already-open path to its [`FileId`], for the path-keyed
    /// RPC surface.
    pub fn file_id_for_path(&self, path: &str) -> Result<FileId> {
        self.find_by_path(path)
            .ok_or_else(|| CoreError::NotOpen(path.to_string()))
    }

    pub fn file_info(&self, file_id: FileId) -> Result<FileInfo> {
        let view = self.view(file_id)?;
        Ok(FileInfo {
            path: view.path.clone(),
            channel_names: view.metadata.channel_names(),
            start_us: view.metadata.start_us,
            end_us: view.metadata.end_us,
        })
    }

    fn find_by_path(&self, path: &str) -> Option<FileId> {
        self.open_files
            .read()
            .values()
            .find(|v| v.path == path)
            .map(|v| v.file_id)
    }

    /// Close `file_id`: removes it from the registry (so in-flight prefetch
    /// for it becomes a no-op), drops every cached chunk for it, and closes
    /// the underlying decoder handle.
    pub async fn close_file(&self, file_id: FileId) -> Result<()> {
        let view = self
            .open_files
            .write()
            .remove(&file_id)
            .ok_or_else(|| CoreError::NotOpen(format!("file {}", file_id.0)))?;
        self.cache.invalidate_file(file_id);
        self.adapter.close(view.open_handle.clone()).await?;
        info!(file_id = file_id.0, "file closed");
        Ok(())
    }

    pub fn list_open_files(&self) -> Vec<(FileId, String)> {
        self.open_files
            .read()
            .values()
            .map(|v| (v.file_id, v.path.clone()))
            .collect()
    }

    pub fn set_segment_seconds(&self, file_id: FileId, seconds: f64) -> Result<()> {
        let view = self.view(file_id)?;
        let new_version = view.set_segment_seconds(seconds)?;
        self.cache.invalidate(file_id, new_version);
        Ok(())
    }

    pub fn set_active_channels(&self, file_id: FileId, channels: Vec<String>) -> Result<()> {
        let view = self.view(file_id)?;
        let new_version = view.set_active_channels(channels)?;
        self.cache.invalidate(file_id, new_version);
        Ok(())
    }

    pub fn get_segment_count(&self, file_id: FileId) -> Result<u64> {
        Ok(self.view(file_id)?.segment_count())
    }

    /// Fetch segment `segment_index` of `file_id`, triggering a decode on a
    /// cache miss and sharing the decode with any other concurrent caller
    /// asking for the same segment. Submits the next `n_prefetch` segments
    /// for speculative decode before returning.
    pub async fn get_signal_segment(
        &self,
        file_id: FileId,
        segment_index: u64,
    ) -> Result<Arc<Chunk>> {
        let view = self.view(file_id)?;
        let version = view.version();
        let (t0_us, t1_us) = view.segment_range(segment_index)?;
        let channels = view.active_channels();
        let sample_rates = view.sample_rates_for(&channels);
        let channel_names = channels.clone();
        let open_handle = view.open_handle.clone();
        let adapter = Arc::clone(&self.adapter);

        let key = ChunkKey {
            file_id,
            version,
            segment_index,
        };
        let chunk = self
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

        if chunk.is_err() {
            self.metrics.inc_decode_error();
        }

        if self.n_prefetch > 0 {
            self.scheduler.submit_following(
                &view,
                version,
                segment_index,
                self.n_prefetch,
                view.segment_count(),
                &self.cache,
            );
        }

        chunk
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn view(&self, file_id: FileId) -> Result<Arc<FileView>> {
        self.open_files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| CoreError::NotOpen(format!("file {}", file_id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fake::{FakeDecoder, FakeRecording};

    fn manager_with(decoder: FakeDecoder, n_prefetch: usize) -> FileManager {
        let mut config = Config::from_str("").unwrap();
        config.n_prefetch = n_prefetch;
        config.cache_capacity_multiplier = 4;
        FileManager::new(&config, Arc::new(decoder))
    }

    #[tokio::test]
    async fn open_read_close_round_trip() {
        let decoder = FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 30.0));
        let manager = manager_with(decoder, 0);

        let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
        assert_eq!(manager.get_segment_count(file_id).unwrap(), 3);

        let chunk = manager.get_signal_segment(file_id, 0).await.unwrap();
        assert_eq!(chunk.matrix.shape().0, 1);

        manager.close_file(file_id).await.unwrap();
        assert!(manager.get_segment_count(file_id).is_err());
    }

    #[tokio::test]
    async fn resize_invalidates_old_segmentation() {
        let decoder = FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 30.0));
        let manager = manager_with(decoder, 0);
        let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();

        manager.get_signal_segment(file_id, 0).await.unwrap();
        manager.set_segment_seconds(file_id, 5.0).unwrap();
        assert_eq!(manager.get_segment_count(file_id).unwrap(), 6);
    }

    #[tokio::test]
    async fn closing_unknown_file_is_not_open() {
        let decoder = FakeDecoder::new();
        let manager = manager_with(decoder, 0);
        let err = manager.close_file(FileId(999)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotOpen(_)));
    }

    #[tokio::test]
    async fn opening_the_same_path_twice_is_idempotent() {
        let decoder = FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 30.0));
        let manager = manager_with(decoder, 0);

        let first = manager.open_file("/rec.mefd".to_string()).await.unwrap();
        let second = manager.open_file("/rec.mefd".to_string()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.list_open_files().len(), 1);
    }

    #[tokio::test]
    async fn file_id_for_path_resolves_open_files() {
        let decoder = FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 10.0, 30.0));
        let manager = manager_with(decoder, 0);

        assert!(manager.file_id_for_path("/rec.mefd").is_err());
        let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
        assert_eq!(manager.file_id_for_path("/rec.mefd").unwrap(), file_id);
    }
}
