//! Async wrapper around a [`RawDecoder`].
//!
//! The raw decoder is synchronous and, in the native case, backed by FFI
//! calls into a library with no documented thread-safety guarantees beyond
//! "one call at a time per handle." [`DecoderAdapter`] is the sole place
//! that serialization happens: every call runs on the blocking thread pool
//! via [`tokio::task::spawn_blocking`], and reads against the same open
//! handle are additionally serialized behind a per-handle mutex.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use super::{FileMetadata, Matrix, RawDecoder, RawHandle};
use crate::error::{CoreError, Result};

/// An open recording plus the mutex that serializes calls against its handle.
#[derive(Clone)]
pub struct OpenHandle {
    handle: RawHandle,
    lock: Arc<AsyncMutex<()>>,
}

/// Wraps an `Arc<dyn RawDecoder>` and runs every call off the async runtime's
/// worker threads, since the raw implementation may block on native I/O.
pub struct DecoderAdapter {
    raw: Arc<dyn RawDecoder>,
}

impl DecoderAdapter {
    pub fn new(raw: Arc<dyn RawDecoder>) -> Self {
        Self { raw }
    }

    /// Open `path`, returning its metadata and an [`OpenHandle`] to use for
    /// subsequent reads and the final close.
    pub async fn open(&self, path: String) -> Result<(FileMetadata, OpenHandle)> {
        let raw = Arc::clone(&self.raw);
        let (metadata, handle) = tokio::task::spawn_blocking(move || raw.open(&path))
            .await
            .map_err(join_error)??;
        Ok((
            metadata,
            OpenHandle {
                handle,
                lock: Arc::new(AsyncMutex::new(())),
            },
        ))
    }

    /// Decode `channels` over `[t0_us, t1_us)` from an already-open handle.
    /// Holds the handle's lock for the duration, so two reads against the
    /// same open file never race inside the native library.
    pub async fn read(
        &self,
        open: &OpenHandle,
        channels: Vec<String>,
        t0_us: i64,
        t1_us: i64,
    ) -> Result<Matrix> {
        let _guard = open.lock.lock().await;
        let raw = Arc::clone(&self.raw);
        let handle = open.handle;
        tokio::task::spawn_blocking(move || raw.read(handle, &channels, t0_us, t1_us))
            .await
            .map_err(join_error)?
    }

    /// Close a previously-opened handle. Idempotent from the caller's
    /// perspective: the file manager calls this at most once per open file.
    pub async fn close(&self, open: OpenHandle) -> Result<()> {
        let _guard = open.lock.lock().await;
        let raw = Arc::clone(&self.raw);
        let handle = open.handle;
        tokio::task::spawn_blocking(move || raw.close(handle))
            .await
            .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> CoreError {
    CoreError::Io("<blocking task>".into(), format!("decoder task panicked: {e}"))
}

/// Test-only helpers for crates that need an [`OpenHandle`] without going
/// through a full `DecoderAdapter::open` round trip (e.g. exercising
/// `FileView`'s own state machine in isolation).
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn dummy_handle() -> OpenHandle {
        OpenHandle {
            handle: RawHandle(0),
            lock: Arc::new(AsyncMutex::new(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fake::{FakeDecoder, FakeRecording};

    #[tokio::test]
    async fn open_read_close_round_trip() {
        let decoder = Arc::new(
            FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(2, 1000.0, 1.0)),
        );
        let adapter = DecoderAdapter::new(decoder);

        let (meta, open) = adapter.open("/rec.mefd".to_string()).await.unwrap();
        assert_eq!(meta.channels.len(), 2);

        let matrix = adapter
            .read(&open, vec!["Ch1".to_string()], 0, 1_000_000)
            .await
            .unwrap();
        assert_eq!(matrix.shape().0, 1);

        adapter.close(open).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_reads_on_same_handle_are_serialized() {
        let decoder = Arc::new(
            FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 1.0)),
        );
        decoder.set_read_delay(std::time::Duration::from_millis(20));
        let adapter = Arc::new(DecoderAdapter::new(decoder));

        let (_meta, open) = adapter.open("/rec.mefd".to_string()).await.unwrap();
        let open = Arc::new(open);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let adapter = Arc::clone(&adapter);
            let open = Arc::clone(&open);
            handles.push(tokio::spawn(async move {
                adapter
                    .read(&open, vec!["Ch1".to_string()], 0, 1_000_000)
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}
