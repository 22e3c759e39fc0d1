// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time source and bounded busy-waiting.
//!
//! Everything that polls hardware in the boot flow takes a [`Clock`] rather
//! than reading the timebase directly, so that the same code runs against a
//! [`FakeClock`] in host tests and only advances time when it delays.

#![cfg_attr(target_os = "none", no_std)]

cfg_if::cfg_if! {
    if #[cfg(target_arch = "powerpc64")] {
        mod timebase;
        pub use timebase::Timebase;
    }
}

#[cfg(not(target_os = "none"))]
mod fakes;
#[cfg(not(target_os = "none"))]
pub use fakes::FakeClock;

/// A monotonic microsecond clock that can also spin for a while.
pub trait Clock {
    /// Microseconds since some arbitrary fixed point.
    fn now_us(&self) -> u64;

    /// Busy-waits for at least `us` microseconds.
    fn delay_us(&self, us: u64);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u64) {
        (**self).delay_us(us)
    }
}

pub fn udelay<C: Clock + ?Sized>(clock: &C, us: u64) {
    clock.delay_us(us);
}

pub fn mdelay<C: Clock + ?Sized>(clock: &C, ms: u64) {
    clock.delay_us(ms.saturating_mul(1000));
}

/// Polls `cond` until it returns `true` or `timeout_us` microseconds pass,
/// sleeping `interval_us` between polls.
///
/// The condition is evaluated before the deadline is checked, so a condition
/// that already holds succeeds even with a zero timeout. Returns the time
/// it took for the condition to hold (never 0, so callers can use the value
/// as a truth value) or `None` on timeout. An error from `cond` ends the wait
/// immediately.
pub fn wait_us<C, E>(
    clock: &C,
    timeout_us: u64,
    interval_us: u64,
    mut cond: impl FnMut() -> Result<bool, E>,
) -> Result<Option<u64>, E>
where
    C: Clock + ?Sized,
{
    let start = clock.now_us();
    loop {
        if cond()? {
            let elapsed = clock.now_us().saturating_sub(start);
            return Ok(Some(elapsed.max(1)));
        }

        let elapsed = clock.now_us().saturating_sub(start);
        if elapsed >= timeout_us {
            return Ok(None);
        }

        // Never sleep past the deadline, and always make progress.
        let step = interval_us.clamp(1, timeout_us - elapsed);
        clock.delay_us(step);
    }
}

/// Millisecond flavor of [`wait_us`], polling once per millisecond.
pub fn wait_ms<C, E>(
    clock: &C,
    timeout_ms: u64,
    cond: impl FnMut() -> Result<bool, E>,
) -> Result<Option<u64>, E>
where
    C: Clock + ?Sized,
{
    let elapsed = wait_us(clock, timeout_ms.saturating_mul(1000), 1000, cond)?;
    Ok(elapsed.map(|us| us.div_ceil(1000)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[test]
    fn immediate_success_reports_nonzero() {
        let clock = FakeClock::new();
        let r = wait_us(&clock, 0, 16, || Ok::<_, Infallible>(true));
        assert_eq!(r, Ok(Some(1)));
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn times_out_exactly_at_budget() {
        let clock = FakeClock::new();
        let mut polls = 0;
        let r = wait_us(&clock, 200 * 16, 16, || {
            polls += 1;
            Ok::<_, Infallible>(false)
        });
        assert_eq!(r, Ok(None));
        assert_eq!(clock.now_us(), 3200);
        // One poll at t=0 and one after each of the 200 sleeps.
        assert_eq!(polls, 201);
    }

    #[test]
    fn last_sleep_is_clamped() {
        let clock = FakeClock::new();
        let r = wait_us(&clock, 50, 16, || Ok::<_, Infallible>(false));
        assert_eq!(r, Ok(None));
        assert_eq!(clock.now_us(), 50);
    }

    #[test]
    fn success_reports_elapsed() {
        let clock = FakeClock::new();
        let r = wait_us(&clock, 1000, 10, || {
            Ok::<_, Infallible>(clock.now_us() >= 30)
        });
        assert_eq!(r, Ok(Some(30)));
    }

    #[test]
    fn condition_error_stops_wait() {
        let clock = FakeClock::new();
        let r: Result<Option<u64>, &str> =
            wait_us(&clock, 1000, 10, || Err("bus fault"));
        assert_eq!(r, Err("bus fault"));
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn wait_ms_rounds_up() {
        let clock = FakeClock::new();
        let r = wait_ms(&clock, 90_000, || {
            Ok::<_, Infallible>(clock.now_us() >= 2_500)
        });
        assert_eq!(r, Ok(Some(3)));

        let clock = FakeClock::new();
        let r = wait_ms(&clock, 5, || Ok::<_, Infallible>(false));
        assert_eq!(r, Ok(None));
        assert_eq!(clock.now_us(), 5_000);
    }

    proptest::proptest! {
        #[test]
        fn never_overshoots(timeout in 0u64..10_000, interval in 0u64..500) {
            let clock = FakeClock::new();
            let r = wait_us(&clock, timeout, interval, || Ok::<_, Infallible>(false));
            proptest::prop_assert_eq!(r, Ok(None));
            proptest::prop_assert_eq!(clock.now_us(), timeout);
        }
    }
}
