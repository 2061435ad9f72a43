//! In-Flight Tracker Module
//!
//! Records which keys currently have a fetch running and hands out the
//! per-key completion signals that waiting callers subscribe to.
//!
//! Each running fetch owns a `watch` channel carrying a generation counter.
//! When the fetch finishes the counter is bumped and the channel is removed,
//! so a caller that subscribed while the fetch was running is woken exactly
//! once and only keys with a fetch in progress hold a signal.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

// == Flight State ==
#[derive(Debug, Default)]
struct FlightState {
    /// Keys with a fetch in progress
    in_flight: HashSet<String>,
    /// Completion signal per in-flight key
    signals: HashMap<String, watch::Sender<u64>>,
}

impl FlightState {
    /// Subscribes to the running fetch for `key`, if there is one.
    fn follow(&self, key: &str) -> Option<Completion> {
        if !self.in_flight.contains(key) {
            return None;
        }
        self.signals.get(key).map(|signal| Completion {
            rx: signal.subscribe(),
        })
    }
}

// == Claim ==
/// Outcome of asking to fetch a key.
pub(crate) enum Claim<'a> {
    /// Nobody was fetching the key; the caller now owns the fetch.
    Leader(FlightGuard<'a>),
    /// Another caller is fetching the key.
    Follower(Completion),
}

// == Completion ==
/// Handle a follower awaits until the running fetch finishes.
pub(crate) struct Completion {
    rx: watch::Receiver<u64>,
}

impl Completion {
    pub(crate) async fn wait(mut self) {
        // An error means the sender is gone, which only happens once the flight is over.
        let _ = self.rx.changed().await;
    }
}

// == Flight Guard ==
/// Exclusive right to fetch one key.
///
/// Dropping the guard clears the in-flight mark and wakes every follower,
/// whether the fetch succeeded, failed, panicked or was cancelled.
pub(crate) struct FlightGuard<'a> {
    tracker: &'a FlightTracker,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release(&self.key);
    }
}

// == Flight Tracker ==
/// Single-flight bookkeeping, locked independently of the value store.
#[derive(Debug, Default)]
pub(crate) struct FlightTracker {
    state: RwLock<FlightState>,
}

impl FlightTracker {
    /// Claims the fetch for `key` or subscribes to the one already running.
    ///
    /// The read lock answers the common contended case. Becoming leader
    /// re-checks under the write lock so two racing callers cannot both win.
    pub(crate) fn claim(&self, key: &str) -> Claim<'_> {
        if let Some(completion) = self.state.read().follow(key) {
            return Claim::Follower(completion);
        }

        let mut state = self.state.write();
        if let Some(completion) = state.follow(key) {
            return Claim::Follower(completion);
        }

        state.in_flight.insert(key.to_string());
        state
            .signals
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(0).0);

        Claim::Leader(FlightGuard {
            tracker: self,
            key: key.to_string(),
        })
    }

    fn release(&self, key: &str) {
        let mut state = self.state.write();
        state.in_flight.remove(key);

        // The next flight of this key gets a fresh channel from `claim`.
        if let Some(signal) = state.signals.remove(key) {
            signal.send_modify(|generation| *generation = generation.wrapping_add(1));
        }

        debug!(key, "Flight released");
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, key: &str) -> bool {
        self.state.read().in_flight.contains(key)
    }

    #[cfg(test)]
    fn signal_count(&self) -> usize {
        self.state.read().signals.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn expect_leader(claim: Claim<'_>) -> FlightGuard<'_> {
        match claim {
            Claim::Leader(guard) => guard,
            Claim::Follower(_) => panic!("expected to lead the fetch"),
        }
    }

    fn expect_follower(claim: Claim<'_>) -> Completion {
        match claim {
            Claim::Follower(completion) => completion,
            Claim::Leader(_) => panic!("expected to follow the fetch"),
        }
    }

    #[test]
    fn test_first_claim_leads() {
        let tracker = FlightTracker::default();

        let guard = expect_leader(tracker.claim("a"));
        assert!(tracker.is_in_flight("a"));

        drop(guard);
        assert!(!tracker.is_in_flight("a"));
    }

    #[test]
    fn test_second_claim_follows() {
        let tracker = FlightTracker::default();

        let _guard = expect_leader(tracker.claim("a"));
        let _completion = expect_follower(tracker.claim("a"));
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = FlightTracker::default();

        let _a = expect_leader(tracker.claim("a"));
        let _b = expect_leader(tracker.claim("b"));
        assert!(tracker.is_in_flight("a"));
        assert!(tracker.is_in_flight("b"));
    }

    #[test]
    fn test_claim_after_release_leads_again() {
        let tracker = FlightTracker::default();

        drop(expect_leader(tracker.claim("a")));
        let _guard = expect_leader(tracker.claim("a"));
    }

    #[test]
    fn test_idle_signal_is_pruned() {
        let tracker = FlightTracker::default();

        let guard = expect_leader(tracker.claim("a"));
        assert_eq!(tracker.signal_count(), 1);

        drop(guard);
        assert_eq!(tracker.signal_count(), 0);
    }

    #[tokio::test]
    async fn test_contended_signal_is_removed_on_release() {
        let tracker = FlightTracker::default();

        for i in 0..100 {
            let key = i.to_string();
            let guard = expect_leader(tracker.claim(&key));
            let completion = expect_follower(tracker.claim(&key));

            drop(guard);
            tokio::time::timeout(Duration::from_secs(1), completion.wait())
                .await
                .expect("follower should be released");
        }

        assert_eq!(tracker.signal_count(), 0);
    }

    #[tokio::test]
    async fn test_release_wakes_followers() {
        let tracker = FlightTracker::default();

        let guard = expect_leader(tracker.claim("a"));
        let first = expect_follower(tracker.claim("a"));
        let second = expect_follower(tracker.claim("a"));

        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), async {
            first.wait().await;
            second.wait().await;
        })
        .await
        .expect("followers should be released");
    }

    #[tokio::test]
    async fn test_follower_waits_while_in_flight() {
        let tracker = FlightTracker::default();

        let _guard = expect_leader(tracker.claim("a"));
        let completion = expect_follower(tracker.claim("a"));

        let waited = tokio::time::timeout(Duration::from_millis(50), completion.wait()).await;
        assert!(waited.is_err(), "follower must not wake before release");
    }
}
