/*!
 * Duplicate Suppression
 * Per-listener window collapsing repeated notices for one target pid
 */

use crate::core::limits::{SUPPRESSION_INTERVAL, SUPPRESSION_WINDOW};
use crate::core::types::Pid;
use std::time::Instant;

/// The last few `(target_pid, seen_at)` pairs a listener rendered.
///
/// A ring with oldest-first overwrite; sized so that the recent past is
/// remembered without ever growing. Several instances can observe one
/// process death and each publish it; a listener renders it once.
pub(crate) struct SuppressionWindow {
    seen: [Option<(Pid, Instant)>; SUPPRESSION_WINDOW],
    next: usize,
}

impl SuppressionWindow {
    pub(crate) fn new() -> Self {
        Self {
            seen: [None; SUPPRESSION_WINDOW],
            next: 0,
        }
    }

    /// Record `target` at `now` unless it was already seen within the
    /// suppression interval; returns whether the event should be rendered.
    pub(crate) fn admit(&mut self, target: Pid, now: Instant) -> bool {
        let duplicate = self.seen.iter().flatten().any(|&(pid, at)| {
            pid == target && now.saturating_duration_since(at) < SUPPRESSION_INTERVAL
        });
        if duplicate {
            return false;
        }

        self.seen[self.next] = Some((target, now));
        self.next = (self.next + 1) % SUPPRESSION_WINDOW;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_duplicate_within_interval_suppressed() {
        let mut window = SuppressionWindow::new();
        let t0 = Instant::now();

        assert!(window.admit(100, t0));
        assert!(!window.admit(100, t0 + Duration::from_millis(500)));
        assert!(!window.admit(100, t0 + Duration::from_millis(1900)));
    }

    #[test]
    fn test_different_target_never_suppressed() {
        let mut window = SuppressionWindow::new();
        let t0 = Instant::now();

        assert!(window.admit(100, t0));
        assert!(window.admit(200, t0 + Duration::from_millis(100)));
        assert!(!window.admit(100, t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_admitted_again_after_interval() {
        let mut window = SuppressionWindow::new();
        let t0 = Instant::now();

        assert!(window.admit(100, t0));
        assert!(window.admit(100, t0 + SUPPRESSION_INTERVAL + Duration::from_millis(1)));
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut window = SuppressionWindow::new();
        let t0 = Instant::now();

        // fill the window, then one more to evict target 0
        for i in 0..=SUPPRESSION_WINDOW as Pid {
            assert!(window.admit(i, t0));
        }
        // target 0 was evicted, so it is admitted again within the interval
        assert!(window.admit(0, t0 + Duration::from_millis(10)));
        // target 1 is still remembered
        assert!(!window.admit(1, t0 + Duration::from_millis(10)));
    }
}
