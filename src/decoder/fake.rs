//! Deterministic in-memory decoder used by the test suite (see the
//! "Polymorphic decoder" design note: the decoder is a capability set, and
//! tests substitute a fake that counts calls and returns known matrices).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use super::{ChannelMeta, FileMetadata, Matrix, RawDecoder, RawHandle};
use crate::error::{CoreError, Result};

/// One synthetic recording the fake decoder can serve.
#[derive(Debug, Clone)]
pub struct FakeRecording {
    pub channels: Vec<ChannelMeta>,
    pub duration_us: i64,
}

impl FakeRecording {
    /// A recording with `n_channels` channels, each sampled at `hz`, lasting
    /// `duration_secs`. Channel values are deterministic: sample `s` of
    /// channel `c` is `c as f64 * 1_000_000.0 + s as f64`, so tests can
    /// assert on exact content without depending on read order.
    pub fn new(n_channels: usize, hz: f64, duration_secs: f64) -> Self {
        let channels = (0..n_channels)
            .map(|i| ChannelMeta {
                name: format!("Ch{}", i + 1),
                sample_rate_hz: hz,
            })
            .collect();
        Self {
            channels,
            duration_us: (duration_secs * 1_000_000.0).round() as i64,
        }
    }
}

struct OpenEntry {
    path: String,
    recording: FakeRecording,
}

/// A [`RawDecoder`] backed by [`FakeRecording`]s registered ahead of time.
/// Counts `open`/`read`/`close` calls per path for assertions about
/// single-flight and prefetch behavior.
pub struct FakeDecoder {
    recordings: HashMap<String, FakeRecording>,
    open_handles: Mutex<HashMap<RawHandle, OpenEntry>>,
    next_handle: AtomicU64,
    read_calls: AtomicU64,
    open_calls: AtomicU64,
    close_calls: AtomicU64,
    /// Optional artificial latency, used to widen the window in which
    /// concurrent callers can race on the same pending decode.
    read_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self {
            recordings: HashMap::new(),
            open_handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            read_calls: AtomicU64::new(0),
            open_calls: AtomicU64::new(0),
            close_calls: AtomicU64::new(0),
            read_delay: Mutex::new(None),
        }
    }

    pub fn with_recording(mut self, path: &str, recording: FakeRecording) -> Self {
        self.recordings.insert(path.to_string(), recording);
        self
    }

    pub fn set_read_delay(&self, delay: std::time::Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn read_call_count(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn open_call_count(&self) -> u64 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_call_count(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RawDecoder for FakeDecoder {
    fn open(&self, path: &str) -> Result<(FileMetadata, RawHandle)> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let recording = self
            .recordings
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(path.to_string()))?;

        let handle = RawHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let metadata = FileMetadata {
            channels: recording.channels.clone(),
            start_us: 0,
            end_us: recording.duration_us,
            recording_start: Utc::now(),
        };
        self.open_handles.lock().unwrap().insert(
            handle,
            OpenEntry {
                path: path.to_string(),
                recording,
            },
        );
        Ok((metadata, handle))
    }

    fn read(
        &self,
        handle: RawHandle,
        channels: &[String],
        t0_us: i64,
        t1_us: i64,
    ) -> Result<Matrix> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = *self.read_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }

        let handles = self.open_handles.lock().unwrap();
        let entry = handles
            .get(&handle)
            .ok_or_else(|| CoreError::NotOpen(format!("handle {:?}", handle)))?;

        let hz = entry
            .recording
            .channels
            .first()
            .map(|c| c.sample_rate_hz)
            .unwrap_or(1.0);
        let n_samples = (((t1_us - t0_us) as f64 / 1_000_000.0) * hz).round() as usize;
        let first_sample = ((t0_us as f64 / 1_000_000.0) * hz).round() as i64;

        let mut rows = Vec::with_capacity(channels.len());
        for name in channels {
            let channel_idx = entry
                .recording
                .channels
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| CoreError::InvalidChannel(name.clone()))?;
            let row: Vec<f64> = (0..n_samples)
                .map(|s| channel_idx as f64 * 1_000_000.0 + (first_sample + s as i64) as f64)
                .collect();
            rows.push(row);
        }

        let _ = &entry.path;
        Ok(Matrix { rows })
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open_handles.lock().unwrap().remove(&handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_unknown_path_is_not_found() {
        let decoder = FakeDecoder::new();
        let err = decoder.open("/nope.mefd").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn read_is_deterministic_across_calls() {
        let decoder = FakeDecoder::new().with_recording(
            "/rec.mefd",
            FakeRecording::new(2, 1000.0, 1.0),
        );
        let (_meta, handle) = decoder.open("/rec.mefd").unwrap();
        let names = vec!["Ch1".to_string(), "Ch2".to_string()];
        let a = decoder.read(handle, &names, 0, 1_000_000).unwrap();
        let b = decoder.read(handle, &names, 0, 1_000_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), (2, 1000));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let decoder = FakeDecoder::new().with_recording(
            "/rec.mefd",
            FakeRecording::new(1, 1000.0, 1.0),
        );
        let (_meta, handle) = decoder.open("/rec.mefd").unwrap();
        let err = decoder
            .read(handle, &["Ghost".to_string()], 0, 1000)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidChannel(_)));
    }
}
