//! Live counters describing what the server is doing right now.
//!
//! Both counters are updated at the connection-state transitions described
//! in the connection state machine: a connection is either actively being
//! read/processed/written (`active_handlers`) or parked between keep-alive
//! requests (`keep_alive_handlers`). At quiescence both should be provable
//! from the set of open sockets, which is exactly what the test suite
//! checks.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot-friendly, lock-free counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ServerStats {
    active_handlers: AtomicUsize,
    keep_alive_handlers: AtomicUsize,
}

impl ServerStats {
    pub const fn new() -> Self {
        Self {
            active_handlers: AtomicUsize::new(0),
            keep_alive_handlers: AtomicUsize::new(0),
        }
    }

    /// Currently parsing/processing/writing a request.
    #[inline]
    pub fn active_handlers(&self) -> usize {
        self.active_handlers.load(Ordering::Acquire)
    }

    /// Idle on an open keep-alive connection, waiting on the next request.
    #[inline]
    pub fn keep_alive_handlers(&self) -> usize {
        self.keep_alive_handlers.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn enter_active(&self) {
        self.active_handlers.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn leave_active(&self) {
        self.active_handlers.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn enter_keep_alive(&self) {
        self.keep_alive_handlers.fetch_add(1, Ordering::AcqRel);
    }

    /// Transition Keep-Alive-Idle -> Reading-Request.
    #[inline]
    pub(crate) fn leave_keep_alive_to_active(&self) {
        self.keep_alive_handlers.fetch_sub(1, Ordering::AcqRel);
        self.active_handlers.fetch_add(1, Ordering::AcqRel);
    }

    /// Transition Processing/Writing-Response -> Keep-Alive-Idle.
    #[inline]
    pub(crate) fn active_to_keep_alive(&self) {
        self.active_handlers.fetch_sub(1, Ordering::AcqRel);
        self.keep_alive_handlers.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop out of either state on close (Closing), without entering the other.
    #[inline]
    pub(crate) fn leave_keep_alive(&self) {
        self.keep_alive_handlers.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn is_quiescent(&self) -> bool {
        self.active_handlers() == 0 && self.keep_alive_handlers() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_balance() {
        let stats = ServerStats::new();
        stats.enter_active();
        assert_eq!(stats.active_handlers(), 1);

        stats.active_to_keep_alive();
        assert_eq!(stats.active_handlers(), 0);
        assert_eq!(stats.keep_alive_handlers(), 1);

        stats.leave_keep_alive_to_active();
        assert_eq!(stats.active_handlers(), 1);
        assert_eq!(stats.keep_alive_handlers(), 0);

        stats.leave_active();
        assert!(stats.is_quiescent());
    }
}
