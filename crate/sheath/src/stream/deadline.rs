use std::time::{Duration, Instant};

/// Absolute expiry point for one stream operation.
///
/// Built once from the caller-supplied timeout at the start of a public
/// call, then passed by value through the driving functions. Never stored
/// on the stream itself, so budgets cannot leak across unrelated calls.
///
/// The deadline is advisory time-slicing over blocking primitives: it is
/// consulted between underlying calls, and the remaining budget is handed
/// to each underlying call as its own timeout. A call that ignores its
/// timeout can overrun the deadline by its own worst-case latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Deadline `timeout` from now. `None` means unbounded.
    pub fn after(timeout: Option<Duration>) -> Self {
        Deadline(timeout.map(|t| Instant::now() + t))
    }

    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Deadline(None)
    }

    /// Budget left for the next underlying call.
    ///
    /// `None` for an unbounded deadline. Once expired, this stays at
    /// `Some(Duration::ZERO)`: later underlying calls run with a zero
    /// timeout instead of blocking, so an expired budget still lets
    /// already-available bytes through.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|expire| expire.saturating_duration_since(Instant::now()))
    }

    /// True once a bounded deadline has elapsed. Unbounded deadlines
    /// never expire.
    pub fn has_expired(&self) -> bool {
        match self.0 {
            None => false,
            Some(expire) => Instant::now() >= expire,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.has_expired());

        let deadline = Deadline::after(None);
        assert!(!deadline.has_expired());
    }

    #[test]
    fn bounded_deadline_expires() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        assert!(deadline.has_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn remaining_shrinks_but_clamps_at_zero() {
        let deadline = Deadline::after(Some(Duration::from_secs(60)));
        let first = deadline.remaining().unwrap();
        assert!(first <= Duration::from_secs(60));
        assert!(first > Duration::from_secs(59));
        let second = deadline.remaining().unwrap();
        assert!(second <= first);

        let expired = Deadline::after(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(expired.remaining(), Some(Duration::ZERO));
    }
}
