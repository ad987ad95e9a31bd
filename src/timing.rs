//! Time keeping for settle delays, retry back-off and polling deadlines

use cortex_m::peripheral::{DCB, DWT};
use embedded_hal::blocking::delay::DelayUs;
use fugit::HertzU32;

/// Microsecond timestamp
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Microsecond duration
pub type Duration = fugit::MicrosDurationU64;

/// Busy-wait timing service used by the driver.
///
/// Nothing in the driver sleeps or yields; every wait is a spin on either
/// [`Timing::delay_us`] or a [`Deadline`] fed by [`Timing::now`].
pub trait Timing {
    /// Current time. Must be monotonic for the lifetime of the driver.
    fn now(&mut self) -> Instant;

    /// Spin for at least `us` microseconds
    fn delay_us(&mut self, us: u32);

    /// Spin for at least `ms` milliseconds
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1_000);
        }
    }
}

impl<T: Timing + ?Sized> Timing for &mut T {
    fn now(&mut self) -> Instant {
        (**self).now()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// A point in time after which a polling loop gives up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    expires: Instant,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after<T: Timing + ?Sized>(timing: &mut T, budget: Duration) -> Self {
        Self {
            expires: timing.now() + budget,
        }
    }

    /// Returns true once the deadline has passed
    pub fn expired<T: Timing + ?Sized>(&self, timing: &mut T) -> bool {
        timing.now() >= self.expires
    }

    /// Time left before the deadline, zero if already passed
    pub fn remaining<T: Timing + ?Sized>(&self, timing: &mut T) -> Duration {
        self.expires
            .checked_duration_since(timing.now())
            .unwrap_or(Duration::from_ticks(0))
    }
}

/// [`Timing`] for Cortex-M3 and up: the DWT cycle counter provides the clock,
/// any blocking delay provider does the waiting.
pub struct DwtTiming<D> {
    delay: D,
    cycles_per_us: u32,
    last_cycles: u32,
    elapsed_cycles: u64,
}

impl<D: DelayUs<u32>> DwtTiming<D> {
    /// Enable the cycle counter and start counting from zero.
    /// `sysclk` is the core clock the DWT counts at.
    pub fn new(delay: D, sysclk: HertzU32, dcb: &mut DCB, dwt: &mut DWT) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();

        Self {
            delay,
            cycles_per_us: (sysclk.raw() / 1_000_000).max(1),
            last_cycles: DWT::cycle_count(),
            elapsed_cycles: 0,
        }
    }

    /// Give back the delay provider
    pub fn free(self) -> D {
        self.delay
    }
}

impl<D: DelayUs<u32>> Timing for DwtTiming<D> {
    fn now(&mut self) -> Instant {
        // The counter wraps every few tens of seconds, so accumulate deltas
        let cycles = DWT::cycle_count();
        self.elapsed_cycles += cycles.wrapping_sub(self.last_cycles) as u64;
        self.last_cycles = cycles;

        Instant::from_ticks(self.elapsed_cycles / self.cycles_per_us as u64)
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker {
        now: u64,
    }

    impl Timing for Ticker {
        fn now(&mut self) -> Instant {
            self.now += 1;
            Instant::from_ticks(self.now)
        }

        fn delay_us(&mut self, us: u32) {
            self.now += us as u64;
        }
    }

    #[test]
    fn deadline_expires_after_budget() {
        let mut ticker = Ticker { now: 0 };
        let deadline = Deadline::after(&mut ticker, Duration::millis(1));

        assert!(!deadline.expired(&mut ticker));
        ticker.delay_us(500);
        assert!(!deadline.expired(&mut ticker));
        ticker.delay_ms(1);
        assert!(deadline.expired(&mut ticker));
        assert_eq!(deadline.remaining(&mut ticker), Duration::from_ticks(0));
    }
}
