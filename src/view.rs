//! File View — the mutable, per-open-file segmentation and channel
//! selection that sits between the file manager and the decoder adapter.
//!
//! Two properties are load-bearing: changing segmentation or the active
//! channel set bumps `version`, and every chunk cache key embeds that
//! version, so stale chunks from before the change are never served even
//! though they are never walked and deleted eagerly.

use parking_lot::RwLock;

use crate::decoder::adapter::OpenHandle;
use crate::decoder::FileMetadata;
use crate::error::{CoreError, Result};
use crate::types::FileId;

const DEFAULT_SEGMENT_SECONDS: f64 = 10.0;

struct MutableState {
    segment_seconds: f64,
    active_channels: Vec<String>,
    version: u64,
}

/// One open recording: its immutable decoder metadata plus the mutable
/// segmentation/channel-selection state a client can change at any time.
pub struct FileView {
    pub file_id: FileId,
    pub path: String,
    pub metadata: FileMetadata,
    pub open_handle: OpenHandle,
    state: RwLock<MutableState>,
}

impl FileView {
    pub fn new(
        file_id: FileId,
        path: String,
        metadata: FileMetadata,
        open_handle: OpenHandle,
    ) -> Self {
        let active_channels = metadata.channel_names();
        Self {
            file_id,
            path,
            metadata,
            open_handle,
            state: RwLock::new(MutableState {
                segment_seconds: DEFAULT_SEGMENT_SECONDS,
                active_channels,
                version: 0,
            }),
        }
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn segment_seconds(&self) -> f64 {
        self.state.read().segment_seconds
    }

    pub fn active_channels(&self) -> Vec<String> {
        self.state.read().active_channels.clone()
    }

    /// Per-channel sample rate for each name in `channels`, in the same
    /// order, looked up from the recording's static metadata.
    pub fn sample_rates_for(&self, channels: &[String]) -> Vec<f64> {
        channels
            .iter()
            .map(|name| {
                self.metadata
                    .channels
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.sample_rate_hz)
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Change the segment length. Returns the new version. Any chunk keyed
    /// on a lower version is now stale.
    pub fn set_segment_seconds(&self, seconds: f64) -> Result<u64> {
        if !(seconds > 0.0) || !seconds.is_finite() {
            return Err(CoreError::InvalidArgument(
                "segment_seconds must be a positive, finite number".into(),
            ));
        }
        let mut state = self.state.write();
        state.segment_seconds = seconds;
        state.version += 1;
        Ok(state.version)
    }

    /// Replace the active channel set. An empty list resets to "all
    /// channels, in recording order". A non-empty list must name channels
    /// that exist in the recording, each at most once. Returns the new
    /// version.
    pub fn set_active_channels(&self, channels: Vec<String>) -> Result<u64> {
        let known = self.metadata.channel_names();
        let channels = if channels.is_empty() {
            known
        } else {
            let mut seen = std::collections::HashSet::with_capacity(channels.len());
            for name in &channels {
                if !known.contains(name) {
                    return Err(CoreError::InvalidChannel(name.clone()));
                }
                if !seen.insert(name) {
                    return Err(CoreError::InvalidArgument(format!(
                        "channel '{name}' requested more than once"
                    )));
                }
            }
            channels
        };
        let mut state = self.state.write();
        state.active_channels = channels;
        state.version += 1;
        Ok(state.version)
    }

    /// Number of fixed-length segments the recording is divided into at the
    /// current segmentation, rounding the final partial segment up.
    pub fn segment_count(&self) -> u64 {
        let seconds = self.segment_seconds();
        let duration_us = self.metadata.duration_us().max(0) as f64;
        let segment_us = seconds * 1_000_000.0;
        if duration_us <= 0.0 {
            return 0;
        }
        (duration_us / segment_us).ceil() as u64
    }

    /// The `[t0_us, t1_us)` range covered by `index`, clipped to the
    /// recording's end.
    pub fn segment_range(&self, index: u64) -> Result<(i64, i64)> {
        let count = self.segment_count();
        if index >= count {
            return Err(CoreError::OutOfRange { index, count });
        }
        let seconds = self.segment_seconds();
        let segment_us = (seconds * 1_000_000.0).round() as i64;
        let start = self.metadata.start_us + index as i64 * segment_us;
        let end = (start + segment_us).min(self.metadata.end_us);
        Ok((start, end))
    }
}
