use crate::models::ComposingSignal;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// "Peer is composing" state with a sliding expiry
///
/// Every signal restarts the expiry window; the indicator clears once the
/// window passes without a new signal.
#[derive(Debug, Clone)]
pub struct ComposingIndicator {
    ttl: Duration,
    last: Option<ComposingSignal>,
}

impl ComposingIndicator {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, last: None }
    }

    pub fn signal(&mut self, signal: ComposingSignal) {
        self.last = Some(signal);
    }

    /// When the indicator should clear, if it is up
    pub fn deadline(&self) -> Option<Instant> {
        self.last.map(|s| s.received_at + self.ttl)
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now < deadline)
    }

    /// Clears the indicator if its window has passed; returns whether it did
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

/// Rate limit for outgoing composing signals
#[derive(Debug, Clone)]
pub struct ComposingThrottle {
    window: Duration,
    last_sent: Option<Instant>,
}

impl ComposingThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: None,
        }
    }

    /// Returns true and records the send when a signal may go out at `now`
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(at: Instant) -> ComposingSignal {
        ComposingSignal {
            conversation_id: Uuid::nil(),
            user_id: Uuid::nil(),
            received_at: at,
        }
    }

    #[test]
    fn test_each_signal_restarts_window() {
        let start = Instant::now();
        let mut indicator = ComposingIndicator::new(Duration::from_secs(3));

        indicator.signal(signal(start));
        indicator.signal(signal(start + Duration::from_secs(2)));

        assert!(indicator.is_active(start + Duration::from_secs(4)));
        assert!(!indicator.expire(start + Duration::from_secs(4)));
        assert!(!indicator.is_active(start + Duration::from_secs(5)));
        assert!(indicator.expire(start + Duration::from_secs(5)));
        assert_eq!(indicator.deadline(), None);
    }

    #[test]
    fn test_throttle_window() {
        let start = Instant::now();
        let mut throttle = ComposingThrottle::new(Duration::from_secs(1));

        assert!(throttle.try_acquire(start));
        assert!(!throttle.try_acquire(start + Duration::from_millis(400)));
        assert!(!throttle.try_acquire(start + Duration::from_millis(999)));
        assert!(throttle.try_acquire(start + Duration::from_secs(1)));
    }
}
