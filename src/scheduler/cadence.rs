//! Timing decisions for the scheduler loop, kept free of threads and
//! clocks so they can be driven with synthetic instants.

use rand::Rng;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::constants::{MAX_CATCH_UP_PERIODS, MIN_RATE, RATE_RECOMPUTE_INTERVAL};

/// Draw one effective rate from `base ± variance`.
///
/// Whole-number variances give integer offsets, fractional ones give real
/// offsets. The result never drops below [`MIN_RATE`].
pub fn sample_rate<R: Rng + ?Sized>(base: f64, variance: f64, rng: &mut R) -> f64 {
    if variance <= 0.0 {
        return base.max(MIN_RATE);
    }

    let offset = if variance.fract() == 0.0 {
        let spread = variance as i64;
        rng.gen_range(-spread..=spread) as f64
    } else {
        rng.gen_range(-variance..=variance)
    };
    (base + offset).max(MIN_RATE)
}

/// Static-mode rate, re-drawn on a fixed cadence rather than per click.
#[derive(Debug, Clone)]
pub struct RateTracker {
    current: Option<f64>,
    next_update: Option<Instant>,
    recompute_every: Duration,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(RATE_RECOMPUTE_INTERVAL)
    }
}

impl RateTracker {
    pub fn new(recompute_every: Duration) -> Self {
        Self {
            current: None,
            next_update: None,
            recompute_every,
        }
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.next_update = None;
    }

    /// Period between clicks at `now`. The first call of a run uses the
    /// base rate; later calls re-draw once the recompute interval passes.
    pub fn period<R: Rng + ?Sized>(
        &mut self,
        base: f64,
        variance: f64,
        now: Instant,
        rng: &mut R,
    ) -> Duration {
        let rate = match (self.current, self.next_update) {
            (Some(rate), Some(next)) if now < next => rate,
            (Some(_), _) => {
                let rate = sample_rate(base, variance, rng);
                debug!(
                    "CPS target now: {:.3} (base={:.3} var={:.3})",
                    rate, base, variance
                );
                self.next_update = Some(now + self.recompute_every);
                rate
            }
            (None, _) => {
                self.next_update = Some(now + self.recompute_every);
                base.max(MIN_RATE)
            }
        };
        self.current = Some(rate);
        Duration::from_secs_f64(1.0 / rate)
    }
}

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fire,
    Wait(Instant),
}

/// Monotonic firing deadline.
///
/// After a click the deadline moves forward by exactly one period, so
/// sleep overshoot never accumulates. A deadline that has fallen more than
/// `max_lag_periods` behind is snapped to the present instead of being
/// worked off as a burst.
#[derive(Debug, Clone)]
pub struct Cadence {
    deadline: Option<Instant>,
    last_fire: Option<Instant>,
    max_lag_periods: u32,
}

impl Default for Cadence {
    fn default() -> Self {
        Self::new(MAX_CATCH_UP_PERIODS)
    }
}

impl Cadence {
    pub fn new(max_lag_periods: u32) -> Self {
        Self {
            deadline: None,
            last_fire: None,
            max_lag_periods,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Forget the deadline but remember the last click, so the next
    /// deadline is placed one period after it. Used on reconfiguration.
    pub fn reset(&mut self) {
        self.deadline = None;
    }

    /// Forget everything; the next step fires immediately.
    pub fn restart(&mut self) {
        self.deadline = None;
        self.last_fire = None;
    }

    pub fn next_step(&mut self, now: Instant, period: Duration) -> Step {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                let deadline = match self.last_fire {
                    Some(last) => (last + period).max(now),
                    None => now,
                };
                self.deadline = Some(deadline);
                deadline
            }
        };

        if now < deadline {
            return Step::Wait(deadline);
        }

        if now.duration_since(deadline) > period * self.max_lag_periods {
            debug!(
                "Deadline {:?} behind, snapping to now",
                now.duration_since(deadline)
            );
            self.deadline = Some(now);
        }
        Step::Fire
    }

    /// Record a successful click made for the current deadline.
    pub fn fired(&mut self, at: Instant, period: Duration) {
        self.last_fire = Some(at);
        self.deadline = Some(self.deadline.unwrap_or(at) + period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_rate_samples_stay_within_variance() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let rate = sample_rate(12.0, 3.0, &mut rng);
            assert!((9.0..=15.0).contains(&rate), "rate {} out of bounds", rate);
            assert_eq!(rate.fract(), 0.0, "whole variance gives whole offsets");
        }
    }

    #[test]
    fn test_fractional_variance_gives_real_offsets() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut saw_fraction = false;
        for _ in 0..1_000 {
            let rate = sample_rate(10.0, 0.5, &mut rng);
            assert!((9.5..=10.5).contains(&rate));
            saw_fraction |= rate.fract() != 0.0;
        }
        assert!(saw_fraction);
    }

    #[test]
    fn test_rate_never_below_floor() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let rate = sample_rate(2.0, 5.0, &mut rng);
            assert!(rate >= MIN_RATE);
            assert!(rate <= 7.0);
        }
        assert_eq!(sample_rate(0.0, 0.0, &mut rng), MIN_RATE);
    }

    #[test]
    fn test_tracker_recomputes_on_cadence() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut tracker = RateTracker::new(ms(250));
        let t0 = Instant::now();

        // First period of a run uses the base rate.
        assert_eq!(tracker.period(10.0, 4.0, t0, &mut rng), ms(100));
        assert_eq!(tracker.current(), Some(10.0));

        // Inside the window the rate is held.
        for step in 1..25 {
            tracker.period(10.0, 4.0, t0 + ms(step * 10), &mut rng);
            assert_eq!(tracker.current(), Some(10.0));
        }

        tracker.period(10.0, 4.0, t0 + ms(250), &mut rng);
        let drawn = tracker.current().unwrap();
        assert!((6.0..=14.0).contains(&drawn));

        tracker.reset();
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_first_step_fires_immediately() {
        let mut cadence = Cadence::default();
        let t0 = Instant::now();
        assert_eq!(cadence.next_step(t0, ms(100)), Step::Fire);
        cadence.fired(t0, ms(100));
        assert_eq!(cadence.next_step(t0 + ms(1), ms(100)), Step::Wait(t0 + ms(100)));
    }

    #[test]
    fn test_interval_firing_does_not_drift() {
        let period = ms(100);
        let mut cadence = Cadence::default();
        let t0 = Instant::now();

        assert_eq!(cadence.next_step(t0, period), Step::Fire);
        cadence.fired(t0, period);

        // Every wake-up overshoots the deadline by a varying amount.
        for n in 1..=50u32 {
            let deadline = cadence.deadline().unwrap();
            assert_eq!(deadline, t0 + period * n);

            let overshoot = Duration::from_micros(u64::from(n % 7) * 900);
            let now = deadline + overshoot;
            assert_eq!(cadence.next_step(now, period), Step::Fire);
            cadence.fired(now, period);
        }
        assert_eq!(cadence.deadline().unwrap(), t0 + period * 51);
    }

    #[test]
    fn test_stall_fires_once_then_waits() {
        let period = ms(50);
        let mut cadence = Cadence::default();
        let t0 = Instant::now();
        cadence.next_step(t0, period);
        cadence.fired(t0, period);

        // Loop stalls for ten periods.
        let resumed = t0 + period * 10;
        let mut fired = 0;
        let mut now = resumed;
        loop {
            match cadence.next_step(now, period) {
                Step::Fire => {
                    fired += 1;
                    cadence.fired(now, period);
                    now += Duration::from_micros(50);
                }
                Step::Wait(deadline) => {
                    assert_eq!(deadline, resumed + period);
                    break;
                }
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_small_lag_is_caught_up_without_snap() {
        let period = ms(50);
        let mut cadence = Cadence::default();
        let t0 = Instant::now();
        cadence.next_step(t0, period);
        cadence.fired(t0, period);

        // Two periods late: within the catch-up allowance.
        let now = t0 + period * 3;
        assert_eq!(cadence.next_step(now, period), Step::Fire);
        cadence.fired(now, period);
        assert_eq!(cadence.deadline().unwrap(), t0 + period * 2);
    }

    #[test]
    fn test_reset_keeps_spacing_from_last_click() {
        let period = ms(100);
        let mut cadence = Cadence::default();
        let t0 = Instant::now();
        cadence.next_step(t0, period);
        cadence.fired(t0, period);

        // Reconfigured 10ms after a click: no immediate second click.
        cadence.reset();
        assert_eq!(
            cadence.next_step(t0 + ms(10), ms(200)),
            Step::Wait(t0 + ms(200))
        );

        // Reconfigured long after the last click: fire now.
        cadence.reset();
        assert_eq!(cadence.next_step(t0 + ms(500), period), Step::Fire);

        cadence.restart();
        assert_eq!(cadence.next_step(t0 + ms(501), period), Step::Fire);
    }
}
