// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// The error taxonomy surfaced by the core (see the error handling design).
///
/// The cache never caches an error: a failed decode removes its pending
/// entry so the next lookup retries from scratch. Prefetch workers count
/// these but never surface them to a client.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("path '{0}' could not be opened")]
    NotFound(String),

    #[error("decoder reported malformed data for '{0}': {1}")]
    Corrupt(String, String),

    #[error("'{0}' is not open")]
    NotOpen(String),

    #[error("segment index {index} out of range [0, {count})")]
    OutOfRange { index: u64, count: u64 },

    #[error("channel '{0}' is not present in the recording")]
    InvalidChannel(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error reading '{0}': {1}")]
    Io(String, String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("wait was interrupted by a view change or file close")]
    Invalidated,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
