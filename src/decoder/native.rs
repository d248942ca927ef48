//! Production [`RawDecoder`] backed by a dynamically-loaded native MEF3
//! library.
//!
//! The MEF3 decoding library itself is an external dependency out of scope
//! for this crate (see the purpose & scope section): we never link a
//! specific build at compile time, only a documented C ABI resolved at
//! runtime from a path given in configuration. This keeps the crate
//! buildable and testable without the native library present, and lets an
//! operator point at whichever MEF3 build matches their platform.
//!
//! Expected C ABI (all functions return `0` on success, or one of the
//! negative `MEF3_ERR_*` codes below):
//!
//! ```text
//! int32_t mef3_open(const char *path, uint64_t *out_handle,
//!                    uint32_t *out_n_channels, int64_t *out_start_us, int64_t *out_end_us);
//! int32_t mef3_channel_name(uint64_t handle, uint32_t index, char *out_buf, uint32_t buf_len);
//! int32_t mef3_channel_rate(uint64_t handle, uint32_t index, double *out_hz);
//! int32_t mef3_read(uint64_t handle, const char *const *channel_names, uint32_t n_channels,
//!                    int64_t t0_us, int64_t t1_us, double *out_buf, uint32_t out_buf_cap,
//!                    uint32_t *out_cols);
//! int32_t mef3_close(uint64_t handle);
//! ```
//!
//! `mef3_read` fills `out_buf` row-major (`n_channels * out_cols` doubles,
//! caller-allocated) and writes the actual column count to `out_cols`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;

use chrono::Utc;
use libloading::{Library, Symbol};

use super::{ChannelMeta, FileMetadata, Matrix, RawDecoder, RawHandle};
use crate::error::{CoreError, Result};

const MEF3_ERR_NOT_FOUND: i32 = -1;
const MEF3_ERR_CORRUPT: i32 = -2;
const MEF3_ERR_IO: i32 = -3;
const MEF3_ERR_UNSUPPORTED: i32 = -4;

const CHANNEL_NAME_BUF_LEN: u32 = 128;

type OpenFn = unsafe extern "C" fn(
    path: *const c_char,
    out_handle: *mut u64,
    out_n_channels: *mut u32,
    out_start_us: *mut i64,
    out_end_us: *mut i64,
) -> i32;
type ChannelNameFn =
    unsafe extern "C" fn(handle: u64, index: u32, out_buf: *mut c_char, buf_len: u32) -> i32;
type ChannelRateFn = unsafe extern "C" fn(handle: u64, index: u32, out_hz: *mut f64) -> i32;
type ReadFn = unsafe extern "C" fn(
    handle: u64,
    channel_names: *const *const c_char,
    n_channels: u32,
    t0_us: i64,
    t1_us: i64,
    out_buf: *mut f64,
    out_buf_cap: u32,
    out_cols: *mut u32,
) -> i32;
type CloseFn = unsafe extern "C" fn(handle: u64) -> i32;

fn classify(path: &str, code: i32) -> CoreError {
    match code {
        MEF3_ERR_NOT_FOUND => CoreError::NotFound(path.to_string()),
        MEF3_ERR_CORRUPT => CoreError::Corrupt(path.to_string(), "decoder rejected file".into()),
        MEF3_ERR_IO => CoreError::Io(path.to_string(), "native decoder I/O failure".into()),
        MEF3_ERR_UNSUPPORTED => CoreError::Unsupported("decoder feature unsupported".into()),
        other => CoreError::Io(path.to_string(), format!("native decoder error code {other}")),
    }
}

/// Wraps a `.so`/`.dylib`/`.dll` implementing the ABI above. One instance is
/// shared across all open files; each call resolves symbols fresh from the
/// loaded library, which is cheap and avoids self-referential lifetimes.
pub struct NativeMef3Decoder {
    library: Library,
}

impl NativeMef3Decoder {
    /// Load the native library from `path`. Fails with `unsupported` if the
    /// library cannot be loaded (missing, wrong architecture, etc.) — this
    /// is a startup-time failure, not a per-file one.
    pub fn load(path: &Path) -> Result<Self> {
        // Safety: loading an operator-configured native library is inherently
        // unsafe; we trust the deployment to point at a real MEF3 build.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            CoreError::Unsupported(format!("failed to load MEF3 library {path:?}: {e}"))
        })?;
        Ok(Self { library })
    }

    fn symbol<T>(&self, name: &[u8]) -> Result<Symbol<'_, T>> {
        // Safety: the symbol name/signature pair is part of the documented
        // ABI this module exists to call.
        unsafe { self.library.get::<T>(name) }
            .map_err(|e| CoreError::Unsupported(format!("missing symbol {name:?}: {e}")))
    }
}

impl RawDecoder for NativeMef3Decoder {
    fn open(&self, path: &str) -> Result<(FileMetadata, RawHandle)> {
        let open_fn: Symbol<OpenFn> = self.symbol(b"mef3_open")?;
        let name_fn: Symbol<ChannelNameFn> = self.symbol(b"mef3_channel_name")?;
        let rate_fn: Symbol<ChannelRateFn> = self.symbol(b"mef3_channel_rate")?;

        let c_path = CString::new(path)
            .map_err(|_| CoreError::InvalidArgument("path contains a NUL byte".into()))?;

        let mut handle = 0u64;
        let mut n_channels = 0u32;
        let mut start_us = 0i64;
        let mut end_us = 0i64;

        // Safety: pointers are valid, stack-owned out-params matching the ABI.
        let code = unsafe {
            open_fn(
                c_path.as_ptr(),
                &mut handle,
                &mut n_channels,
                &mut start_us,
                &mut end_us,
            )
        };
        if code != 0 {
            return Err(classify(path, code));
        }

        let mut channels = Vec::with_capacity(n_channels as usize);
        let mut name_buf = vec![0u8; CHANNEL_NAME_BUF_LEN as usize];
        for index in 0..n_channels {
            // Safety: `name_buf` is sized per the documented buffer contract.
            let code = unsafe {
                name_fn(
                    handle,
                    index,
                    name_buf.as_mut_ptr() as *mut c_char,
                    CHANNEL_NAME_BUF_LEN,
                )
            };
            if code != 0 {
                return Err(classify(path, code));
            }
            // Safety: the library null-terminates within `name_buf`.
            let name = unsafe { CStr::from_ptr(name_buf.as_ptr() as *const c_char) }
                .to_string_lossy()
                .into_owned();

            let mut hz = 0.0f64;
            // Safety: `hz` is a valid stack out-param.
            let code = unsafe { rate_fn(handle, index, &mut hz) };
            if code != 0 {
                return Err(classify(path, code));
            }

            channels.push(ChannelMeta {
                name,
                sample_rate_hz: hz,
            });
        }

        Ok((
            FileMetadata {
                channels,
                start_us,
                end_us,
                recording_start: Utc::now(),
            },
            RawHandle(handle),
        ))
    }

    fn read(
        &self,
        handle: RawHandle,
        channels: &[String],
        t0_us: i64,
        t1_us: i64,
    ) -> Result<Matrix> {
        let read_fn: Symbol<ReadFn> = self.symbol(b"mef3_read")?;

        let c_names: Vec<CString> = channels
            .iter()
            .map(|n| {
                CString::new(n.as_str())
                    .map_err(|_| CoreError::InvalidArgument("channel name contains NUL".into()))
            })
            .collect::<Result<_>>()?;
        let name_ptrs: Vec<*const c_char> = c_names.iter().map(|c| c.as_ptr()).collect();

        // The duration alone doesn't bound the sample count (sample rate is
        // per-channel and not passed here), so request a generous buffer
        // and let the library report the real column count.
        let duration_us = (t1_us - t0_us).max(0) as usize;
        let max_samples_per_channel = duration_us.saturating_mul(4) + 1024;
        let cap = channels.len().saturating_mul(max_samples_per_channel);
        let mut buf = vec![0f64; cap];
        let mut cols = 0u32;

        // Safety: `buf` has `cap` valid f64 slots; `cols` is a valid out-param.
        let code = unsafe {
            read_fn(
                handle.0,
                name_ptrs.as_ptr(),
                name_ptrs.len() as u32,
                t0_us,
                t1_us,
                buf.as_mut_ptr(),
                cap as u32,
                &mut cols,
            )
        };
        if code != 0 {
            return Err(classify("<open handle>", code));
        }

        let cols = cols as usize;
        let mut rows = Vec::with_capacity(channels.len());
        for c in 0..channels.len() {
            let start = c * cols;
            rows.push(buf[start..start + cols].to_vec());
        }
        Ok(Matrix { rows })
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        let close_fn: Symbol<CloseFn> = self.symbol(b"mef3_close")?;
        // Safety: `handle` was returned by a prior successful `open`.
        let code = unsafe { close_fn(handle.0) };
        if code != 0 {
            return Err(classify("<open handle>", code));
        }
        Ok(())
    }
}
