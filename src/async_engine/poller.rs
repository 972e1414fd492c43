//! Poll-loop backoff schedule (spec §4.4 step 8): initial delay 1s, grown
//! by ×1.5 per round, capped at a configurable maximum (default 5s).

use std::time::Duration;

pub struct BackoffSchedule {
    current: Duration,
    max: Duration,
    factor: f64,
}

impl BackoffSchedule {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
            factor: 1.5,
        }
    }

    pub fn default_schedule() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }

    /// The delay to sleep before the *next* poll; grows the internal
    /// state for the round after that.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn advance(&mut self) {
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = Duration::from_secs_f64(grown.min(self.max.as_secs_f64()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_factor_and_caps() {
        let mut schedule = BackoffSchedule::new(Duration::from_millis(1000), Duration::from_millis(5000));
        assert_eq!(schedule.current_delay(), Duration::from_millis(1000));
        schedule.advance();
        assert_eq!(schedule.current_delay(), Duration::from_millis(1500));
        schedule.advance();
        assert_eq!(schedule.current_delay(), Duration::from_millis(2250));
        for _ in 0..10 {
            schedule.advance();
        }
        assert_eq!(schedule.current_delay(), Duration::from_millis(5000));
    }
}
