//! Retry backoff for peers whose dial or connection failed.
//!
//! The schedule is a fixed list of delays indexed by the peer's retry count.
//! A peer is requeued after `delays[retries]` and its retry count incremented;
//! once the count runs past the end of the list the peer is dropped.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default requeue delays: 1s, 1s, 5s, 15s.
pub const DEFAULT_BACKOFF: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// What to do with a peer after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Requeue after `delay`; the peer's retry count becomes `retries`.
    Retry { delay: Duration, retries: usize },
    /// Retries exhausted, forget the peer.
    Drop,
}

/// Fixed delay schedule indexed by retry count.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackoffSchedule {
    #[serde_as(as = "Vec<DurationMilliSeconds<u64>>")]
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF.to_vec())
    }
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Schedule that drops a peer on its first failure.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of retries before a peer is dropped.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Decide the next step for a peer that has already been retried `retries` times.
    pub fn next(&self, retries: usize) -> Backoff {
        match self.delays.get(retries) {
            Some(&delay) => Backoff::Retry {
                delay,
                retries: retries + 1,
            },
            None => Backoff::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.len(), 4);
        assert_eq!(
            schedule.next(0),
            Backoff::Retry {
                delay: Duration::from_secs(1),
                retries: 1
            }
        );
        assert_eq!(
            schedule.next(3),
            Backoff::Retry {
                delay: Duration::from_secs(15),
                retries: 4
            }
        );
        assert_eq!(schedule.next(4), Backoff::Drop);
    }

    #[test]
    fn test_retries_until_drop() {
        let schedule = BackoffSchedule::new(vec![Duration::from_millis(5); 3]);
        let mut retries = 0;
        let mut attempts = 0;
        while let Backoff::Retry { retries: next, .. } = schedule.next(retries) {
            retries = next;
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert_eq!(schedule.next(retries), Backoff::Drop);
    }

    #[test]
    fn test_empty_schedule_drops_immediately() {
        assert_eq!(BackoffSchedule::none().next(0), Backoff::Drop);
    }

    #[test]
    fn test_serde_millis() {
        #[derive(Deserialize)]
        struct Wrapper {
            backoff: BackoffSchedule,
        }

        let parsed: Wrapper = toml::from_str("backoff = [250, 1000]").unwrap();
        assert_eq!(
            parsed.backoff.delays(),
            &[Duration::from_millis(250), Duration::from_secs(1)]
        );
    }
}
