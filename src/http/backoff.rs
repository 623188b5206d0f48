use std::time::Duration;

/// Delay before the first retry of a call.
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Once a doubled delay would go past this value the sequence starts again from [INITIAL_DELAY].
pub const DELAY_LIMIT: Duration = Duration::from_secs(180);

/// Exponential backoff in base 2 that wraps around to its initial delay instead of giving up.
///
/// A new value must be created for each call, so every call starts from the initial delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial_delay: Duration,
    limit: Duration,
    tries: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL_DELAY,
            initial_delay: INITIAL_DELAY,
            limit: DELAY_LIMIT,
            tries: 0,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.current = initial_delay;
        self
    }

    pub fn with_limit(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }

    /// Number of delays handed out so far.
    pub fn tries(&self) -> usize {
        self.tries
    }

    /// Returns the delay to wait before the next attempt and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let doubled = self.current * 2;
        self.current = if doubled > self.limit {
            self.initial_delay
        } else {
            doubled
        };
        self.tries += 1;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_exponential() {
        let mut b = Backoff::new();
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(vec![1, 2, 4, 8, 16], delays);
        assert_eq!(5, b.tries());
    }

    #[test]
    fn test_backoff_wraps_after_limit() {
        let mut b = Backoff::new();
        let delays: Vec<u64> = (0..10).map(|_| b.next_delay().as_secs()).collect();
        // 256 would be past the 180 seconds limit
        assert_eq!(vec![1, 2, 4, 8, 16, 32, 64, 128, 1, 2], delays);
    }

    #[test]
    fn test_backoff_with_initial_delay_and_limit() {
        let mut b = Backoff::new()
            .with_initial_delay(Duration::from_millis(10))
            .with_limit(Duration::from_millis(30));
        let delays: Vec<u128> = (0..4).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(vec![10, 20, 10, 20], delays);
    }
}
