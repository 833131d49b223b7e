//! Progress notifications and cancellation.
//!
//! Long-running operations (saving an archive, extracting entries) report
//! their progress as a stream of [`ProgressEvent`] messages delivered
//! synchronously, in order, on the calling thread. Each delivery returns a
//! [`Flow`]; returning [`Flow::Cancel`] asks the operation to stop at the next
//! safe point.
//!
//! Per entry, the sequence is always:
//!
//! ```text
//! EntryStarted -> Bytes (one or more) -> EntryCompleted
//! ```
//!
//! bracketed by a single `Started` / `Completed` pair for the whole operation.
//!
//! # Example
//!
//! ```
//! use oxizip_core::progress::{Flow, ProgressEvent, ProgressHandler};
//!
//! let mut started = 0;
//! let mut handler = |event: &ProgressEvent| {
//!     if matches!(event, ProgressEvent::EntryStarted { .. }) {
//!         started += 1;
//!     }
//!     Flow::Continue
//! };
//! # let event = oxizip_core::progress::ProgressEvent::EntryStarted {
//! #     operation: oxizip_core::progress::Operation::Save,
//! #     index: 0,
//! #     name: "a.txt".into(),
//! #     total_bytes: Some(3),
//! # };
//! assert_eq!(handler.on_event(&event), Flow::Continue);
//! ```

use std::sync::mpsc::Sender;

/// Default spacing between [`ProgressEvent::Bytes`] notifications.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 64 * 1024;

/// Which operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    /// Writing an archive.
    Save,
    /// Extracting entries from an archive.
    Extract,
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProgressEvent {
    /// The operation began.
    Started {
        /// Operation kind.
        operation: Operation,
        /// Number of entries to process, when known up front.
        total_entries: Option<u64>,
    },
    /// An entry is about to be processed.
    EntryStarted {
        /// Operation kind.
        operation: Operation,
        /// Position of the entry in archive order.
        index: usize,
        /// Entry name.
        name: String,
        /// Uncompressed size, when known.
        total_bytes: Option<u64>,
    },
    /// Uncompressed bytes of the current entry have been transferred.
    Bytes {
        /// Operation kind.
        operation: Operation,
        /// Position of the entry in archive order.
        index: usize,
        /// Entry name.
        name: String,
        /// Uncompressed bytes transferred so far for this entry.
        transferred: u64,
        /// Uncompressed size, when known.
        total: Option<u64>,
    },
    /// An entry finished successfully.
    EntryCompleted {
        /// Operation kind.
        operation: Operation,
        /// Position of the entry in archive order.
        index: usize,
        /// Entry name.
        name: String,
        /// Uncompressed bytes transferred.
        bytes: u64,
    },
    /// The operation finished.
    Completed {
        /// Operation kind.
        operation: Operation,
        /// Number of entries processed.
        entries: u64,
    },
}

impl ProgressEvent {
    /// Operation this event belongs to.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Started { operation, .. }
            | Self::EntryStarted { operation, .. }
            | Self::Bytes { operation, .. }
            | Self::EntryCompleted { operation, .. }
            | Self::Completed { operation, .. } => *operation,
        }
    }

    /// Entry name for per-entry events.
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            Self::EntryStarted { name, .. }
            | Self::Bytes { name, .. }
            | Self::EntryCompleted { name, .. } => Some(name),
            Self::Started { .. } | Self::Completed { .. } => None,
        }
    }
}

/// Answer from a progress handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Flow {
    /// Keep going.
    #[default]
    Continue,
    /// Stop at the next safe point.
    Cancel,
}

impl Flow {
    /// Whether the handler asked to stop.
    pub fn is_cancel(self) -> bool {
        self == Self::Cancel
    }
}

/// Receiver of progress notifications.
pub trait ProgressHandler {
    /// Handle one event.
    fn on_event(&mut self, event: &ProgressEvent) -> Flow;
}

impl<F> ProgressHandler for F
where
    F: FnMut(&ProgressEvent) -> Flow,
{
    fn on_event(&mut self, event: &ProgressEvent) -> Flow {
        self(event)
    }
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressHandler for NoProgress {
    fn on_event(&mut self, _event: &ProgressEvent) -> Flow {
        Flow::Continue
    }
}

/// Handler that forwards events over a channel.
///
/// Once the receiving side hangs up, the operation is cancelled.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create a handler sending on `sender`.
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressHandler for ChannelProgress {
    fn on_event(&mut self, event: &ProgressEvent) -> Flow {
        match self.sender.send(event.clone()) {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Cancel,
        }
    }
}

/// Bookkeeping for byte-count notifications.
///
/// Tracks how many bytes have been transferred for the current entry and
/// reports when the next [`ProgressEvent::Bytes`] is due.
#[derive(Debug, Clone)]
pub struct ByteThrottle {
    interval: u64,
    transferred: u64,
    last_reported: u64,
}

impl ByteThrottle {
    /// Create a throttle reporting every `interval` bytes (at least 1).
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            transferred: 0,
            last_reported: 0,
        }
    }

    /// Record `n` more bytes. Returns `true` when a notification is due.
    pub fn advance(&mut self, n: u64) -> bool {
        self.transferred += n;
        if self.transferred - self.last_reported >= self.interval {
            self.last_reported = self.transferred;
            true
        } else {
            false
        }
    }

    /// Whether the final count has not been reported yet.
    ///
    /// Also true for an entry that transferred nothing and never reported,
    /// so every entry gets at least one byte-count notification.
    pub fn has_pending(&self) -> bool {
        self.transferred != self.last_reported || self.transferred == 0
    }

    /// Mark the current count as reported.
    pub fn mark_reported(&mut self) {
        self.last_reported = self.transferred;
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Start counting a new entry.
    pub fn reset(&mut self) {
        self.transferred = 0;
        self.last_reported = 0;
    }
}

impl Default for ByteThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}
