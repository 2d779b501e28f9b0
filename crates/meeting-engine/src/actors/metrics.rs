//! Mailbox monitoring for meeting actors.
//!
//! | Level    | Depth     |
//! |----------|-----------|
//! | Normal   | <= 32     |
//! | Warning  | 33-128    |
//! | Critical | > 128     |
//!
//! The handle records an enqueue before sending; the actor records the
//! dequeue once the message is handled. Depth therefore counts queued plus
//! in-flight operations.
//!
//! Every monitor also adds to a total shared by all actors of a supervisor;
//! the `engine_actor_mailbox_depth` gauge reports that total.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth up to which a meeting mailbox is considered healthy.
pub const MEETING_MAILBOX_NORMAL: usize = 32;

/// Depth above which a meeting mailbox is critical.
pub const MEETING_MAILBOX_WARNING: usize = 128;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Depth and throughput counters for one actor mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    meeting_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    total: Arc<AtomicUsize>,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(meeting_id: impl Into<String>, total: Arc<AtomicUsize>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            total,
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_actor_mailbox_depth(total);

        match level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "engine.actor.mailbox",
                meeting_id = %self.meeting_id,
                depth = new_depth,
                threshold = MEETING_MAILBOX_WARNING,
                "Mailbox depth critical"
            ),
            // Log once when crossing into warning
            MailboxLevel::Warning if new_depth == MEETING_MAILBOX_NORMAL + 1 => debug!(
                target: "engine.actor.mailbox",
                meeting_id = %self.meeting_id,
                depth = new_depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Record a message leaving the mailbox after it was handled.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or_default();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        if previous > 0 {
            let total = self
                .total
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                    Some(t.saturating_sub(1))
                })
                .unwrap_or_default();
            metrics::set_actor_mailbox_depth(total.saturating_sub(1));
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > MEETING_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth > MEETING_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}
