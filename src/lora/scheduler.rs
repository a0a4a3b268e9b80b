//! Microsecond alignment for downlink transmissions.
//!
//! Downlink requests carry the timestamp the network server wants the
//! packet on the air, in the radio's own wrapping microsecond domain.
//! Long waits sleep in coarse slices so the scheduler keeps running;
//! the final stretch busy-waits, since thread wakeup jitter is far
//! larger than the alignment LoRa receive windows tolerate.

use crate::lora::bus::RadioError;
use crate::lora::clock::MonotonicClock;
use crate::lora::plan::SpreadingFactor;

/// Above this many microseconds of remaining wait, sleep coarsely
/// instead of busy-waiting.
const COARSE_WAIT_THRESHOLD_US: u32 = 16_000;

/// Coarse sleep slice. Shorter than the threshold, so the hand-off to
/// the busy-wait never overshoots the target.
const COARSE_SLICE_MS: u32 = 15;

/// Microseconds left until `target`, or `None` once it has passed.
///
/// Timestamps wrap every ~71.6 minutes; a difference in the upper half
/// of the u32 range reads as "already behind us".
fn remaining_us(target: u32, now: u32) -> Option<u32> {
    let diff = target.wrapping_sub(now) as i32;
    if diff > 0 {
        Some(diff as u32)
    } else {
        None
    }
}

/// Block until the adjusted target timestamp.
///
/// The raw target is shifted by the fixed downlink delay and, for SF7
/// only, by the extra SF7 adjustment. A target at or before the current
/// instant returns [`RadioError::MissedWindow`] without waiting; the
/// caller decides whether to key the transmitter anyway.
pub fn wait_until<C: MonotonicClock>(
    clock: &C,
    target_us: u32,
    sf: SpreadingFactor,
    tx_delay_us: u32,
    sf7_adjust_us: u32,
) -> Result<(), RadioError> {
    let mut adjusted = target_us.wrapping_add(tx_delay_us);
    if sf == SpreadingFactor::Sf7 {
        adjusted = adjusted.wrapping_add(sf7_adjust_us);
    }

    let now = clock.now_us();
    let mut wait = match remaining_us(adjusted, now) {
        Some(wait) => wait,
        None => {
            return Err(RadioError::MissedWindow {
                target: adjusted,
                now,
            })
        }
    };

    while wait > COARSE_WAIT_THRESHOLD_US {
        clock.delay_ms(COARSE_SLICE_MS);
        wait = match remaining_us(adjusted, clock.now_us()) {
            Some(wait) => wait,
            // A coarse slice overslept past the target; it can only be
            // late by about one slice, so transmit now.
            None => return Ok(()),
        };
    }
    clock.delay_us(wait);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::clock::TestClock;

    #[test]
    fn test_short_wait_lands_on_target() {
        let clock = TestClock::starting_at(1_000);
        wait_until(&clock, 5_000, SpreadingFactor::Sf9, 0, 60_000).unwrap();
        assert_eq!(clock.now_us(), 5_000);
    }

    #[test]
    fn test_long_wait_sleeps_coarsely_then_aligns() {
        let clock = TestClock::new();
        wait_until(&clock, 100_000, SpreadingFactor::Sf12, 0, 60_000).unwrap();
        assert_eq!(clock.now_us(), 100_000);
    }

    #[test]
    fn test_past_target_reports_missed_window() {
        let clock = TestClock::starting_at(10_000);
        let result = wait_until(&clock, 5_000, SpreadingFactor::Sf9, 0, 0);
        match result {
            Err(RadioError::MissedWindow { target, now }) => {
                assert_eq!(target, 5_000);
                assert_eq!(now, 10_000);
            }
            other => panic!("expected MissedWindow, got {:?}", other),
        }
        // No waiting happened.
        assert_eq!(clock.now_us(), 10_000);
    }

    #[test]
    fn test_target_equal_to_now_is_missed() {
        let clock = TestClock::starting_at(7_777);
        assert!(wait_until(&clock, 7_777, SpreadingFactor::Sf9, 0, 0).is_err());
    }

    #[test]
    fn test_sf7_adjustment_shifts_target() {
        let clock = TestClock::new();
        wait_until(&clock, 1_000, SpreadingFactor::Sf7, 0, 60_000).unwrap();
        assert_eq!(clock.now_us(), 61_000);
    }

    #[test]
    fn test_sf7_adjustment_skipped_for_other_rates() {
        let clock = TestClock::new();
        wait_until(&clock, 1_000, SpreadingFactor::Sf8, 0, 60_000).unwrap();
        assert_eq!(clock.now_us(), 1_000);
    }

    #[test]
    fn test_tx_delay_shifts_target() {
        let clock = TestClock::new();
        wait_until(&clock, 10_000, SpreadingFactor::Sf9, 2_000, 0).unwrap();
        assert_eq!(clock.now_us(), 12_000);
    }

    #[test]
    fn test_target_past_counter_wrap() {
        let clock = TestClock::starting_at(u32::MAX - 1_000);
        wait_until(&clock, 2_000, SpreadingFactor::Sf9, 0, 0).unwrap();
        assert_eq!(clock.now_us(), 2_000);
    }
}
