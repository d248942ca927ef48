//! Shared identifiers used across the file manager, cache, and scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::view::FileView;

/// Registry of currently open files, shared between the file manager and
/// the prefetch scheduler. A file's absence here is how the scheduler
/// learns a close happened and abandons any prefetch still in flight for
/// it.
pub type OpenFiles = Arc<RwLock<HashMap<FileId, Arc<FileView>>>>;

/// Identifies one open recording for the lifetime of its open handle.
/// Never reused within a process, so a stale [`FileId`] held by a caller
/// after close can never silently alias a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

#[derive(Debug, Default)]
pub struct FileIdAllocator {
    next: AtomicU64,
}

impl FileIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> FileId {
        FileId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
