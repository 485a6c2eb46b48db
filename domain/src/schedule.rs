//! Fixed-interval ticker that blocks between ticks.
//!
//! Handlers run on the caller's thread, one at a time. A handler that overruns
//! its interval causes the missed ticks to be dropped: the next tick fires
//! immediately and the schedule then continues on the original cadence.

use std::time::{Duration, SystemTime};

use crate::{Clock, Sleeper};

/// Information about one fired tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 1-based count of fired ticks.
    pub number: u64,
    /// Ticks dropped because the previous handler ran past them.
    pub skipped: u64,
}

pub struct Ticker<C: Clock, S: Sleeper> {
    interval: Duration,
    next: SystemTime,
    fired: u64,
    clock: C,
    sleeper: S,
}

impl<C: Clock, S: Sleeper> Ticker<C, S> {
    /// The first tick fires one full interval after construction.
    ///
    /// # Panics
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration, clock: C, sleeper: S) -> Self {
        assert!(!interval.is_zero(), "ticker interval must be non-zero");
        let next = clock.now() + interval;
        Self {
            interval,
            next,
            fired: 0,
            clock,
            sleeper,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next tick is due.
    pub fn tick(&mut self) -> Tick {
        let now = self.clock.now();
        if let Ok(wait) = self.next.duration_since(now) {
            if !wait.is_zero() {
                self.sleeper.sleep(wait);
            }
        }

        let mut skipped = 0;
        while self.next + self.interval <= now {
            self.next += self.interval;
            skipped += 1;
        }
        self.next += self.interval;
        self.fired += 1;
        Tick {
            number: self.fired,
            skipped,
        }
    }

    /// Call `handler` on every tick; `max_ticks = None` runs forever.
    pub fn run<F: FnMut(Tick)>(&mut self, max_ticks: Option<u64>, mut handler: F) {
        let mut n = 0u64;
        while max_ticks.map_or(true, |max| n < max) {
            let tick = self.tick();
            handler(tick);
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_cloud::ManualClock;

    #[test]
    fn first_tick_waits_one_full_interval() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut t = Ticker::new(Duration::from_secs(5), clock.clone(), clock.clone());
        let tick = t.tick();
        assert_eq!(tick, Tick { number: 1, skipped: 0 });
        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }

    #[test]
    fn fast_handlers_keep_a_steady_cadence() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut t = Ticker::new(Duration::from_secs(10), clock.clone(), clock.clone());
        let mut fired_at = Vec::new();
        t.run(Some(3), |_| {
            fired_at.push(clock.now());
            clock.advance(Duration::from_secs(2));
        });
        assert_eq!(
            fired_at,
            vec![
                start + Duration::from_secs(10),
                start + Duration::from_secs(20),
                start + Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn overrunning_handler_drops_missed_ticks() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut t = Ticker::new(Duration::from_secs(5), clock.clone(), clock.clone());
        let mut ticks = Vec::new();
        t.run(Some(3), |tick| {
            ticks.push((tick, clock.now()));
            if tick.number == 1 {
                // Runs until t=17, past the ticks due at 10 and 15.
                clock.advance(Duration::from_secs(12));
            }
        });
        assert_eq!(ticks[0].0, Tick { number: 1, skipped: 0 });
        assert_eq!(ticks[1].0, Tick { number: 2, skipped: 1 });
        assert_eq!(ticks[1].1, start + Duration::from_secs(17));
        // Back on the original cadence.
        assert_eq!(ticks[2].0, Tick { number: 3, skipped: 0 });
        assert_eq!(ticks[2].1, start + Duration::from_secs(20));
    }
}
