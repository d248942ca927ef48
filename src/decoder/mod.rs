//! Decoder Adapter — the only part of the crate that touches the native
//! MEF3 decoding library.
//!
//! [`RawDecoder`] is the exact capability contract consumed from the
//! decoder: `open`, `read`, `close`. It is intentionally synchronous — the
//! native library is blocking/FFI — and is wrapped by [`adapter::DecoderAdapter`]
//! which runs it on the blocking thread pool and serializes concurrent
//! reads against the same handle.

pub mod adapter;
pub mod fake;
pub mod native;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Per-channel static metadata reported by the decoder on open.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    pub name: String,
    pub sample_rate_hz: f64,
}

/// Immutable snapshot of a recording's metadata, captured once on open.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub channels: Vec<ChannelMeta>,
    /// Recording start, in microseconds relative to itself (always 0) —
    /// kept for symmetry with `end_us` and to make time-range math read
    /// naturally as `[start_us, end_us)`.
    pub start_us: i64,
    pub end_us: i64,
    /// Wall-clock anchor for the recording, used only for logs and status
    /// reporting; it plays no part in any cache key or invariant.
    pub recording_start: DateTime<Utc>,
}

impl FileMetadata {
    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }
}

/// A decoded [rows = channels][cols = samples] matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub rows: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn shape(&self) -> (usize, usize) {
        let cols = self.rows.first().map(|r| r.len()).unwrap_or(0);
        (self.rows.len(), cols)
    }
}

/// Opaque handle to an open recording, owned by the raw decoder
/// implementation. Adapters are free to stash whatever they need inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

/// The capability set a native MEF3 decoder must provide (see the external
/// interfaces design). `t0_us` is inclusive, `t1_us` is exclusive. Rows of
/// the returned matrix are ordered exactly as `channels` was given.
pub trait RawDecoder: Send + Sync {
    fn open(&self, path: &str) -> Result<(FileMetadata, RawHandle)>;

    fn read(
        &self,
        handle: RawHandle,
        channels: &[String],
        t0_us: i64,
        t1_us: i64,
    ) -> Result<Matrix>;

    fn close(&self, handle: RawHandle) -> Result<()>;
}
