//! Converts successive cumulative tick readings into speed, distance and
//! cadence.
//!
//! Wheel and crank sensors report lifetime revolution counters plus an event
//! timestamp in 1/1024 s ticks. The trackers here keep just enough state to
//! turn consecutive readings into rates, handling the 16-bit event-time
//! wrap. A decrease in the revolution counter itself is treated as
//! no-motion rather than a wrap: the 32-bit wheel counter would take years
//! of continuous riding to roll over, so sensor resets are the realistic
//! cause of a decrease.

use crate::types::{CadenceSample, CrankReading, SpeedSample, WheelReading};

const TICKS_PER_SECOND: f64 = 1024.0;

/// Derives speed and session distance from cumulative wheel readings
#[derive(Debug, Clone)]
pub struct WheelTracker {
    circumference_m: f64,
    prev: Option<WheelReading>,
    session_start_revolutions: u32,
}

impl WheelTracker {
    /// Create a tracker for a wheel of the given circumference in meters
    #[must_use]
    pub const fn new(circumference_m: f64) -> Self {
        Self {
            circumference_m,
            prev: None,
            session_start_revolutions: 0,
        }
    }

    /// Feed the next wheel reading
    ///
    /// The first reading establishes the session baseline and yields no
    /// sample. Afterwards each reading yields a speed plus the cumulative
    /// session distance; a stalled event clock or a decreasing revolution
    /// counter yields a zero-speed sample.
    pub fn update(&mut self, reading: WheelReading) -> Option<SpeedSample> {
        let Some(prev) = self.prev.replace(reading) else {
            self.session_start_revolutions = reading.revolutions;
            return None;
        };

        let time_delta = reading.event_time.wrapping_sub(prev.event_time);
        let distance_m = f64::from(
            reading
                .revolutions
                .saturating_sub(self.session_start_revolutions),
        ) * self.circumference_m;

        if time_delta == 0 || reading.revolutions < prev.revolutions {
            return Some(SpeedSample {
                speed_kph: 0.0,
                distance_m,
            });
        }

        let revs_delta = f64::from(reading.revolutions - prev.revolutions);
        let seconds = f64::from(time_delta) / TICKS_PER_SECOND;
        let speed_kph = (revs_delta * self.circumference_m / seconds) * 3.6;

        Some(SpeedSample {
            speed_kph,
            distance_m,
        })
    }

    /// Distance covered since the first reading, in meters
    #[must_use]
    pub fn session_distance_m(&self) -> f64 {
        self.prev.map_or(0.0, |p| {
            f64::from(p.revolutions.saturating_sub(self.session_start_revolutions))
                * self.circumference_m
        })
    }
}

/// Derives cadence from cumulative crank readings
#[derive(Debug, Clone, Default)]
pub struct CrankTracker {
    prev: Option<CrankReading>,
}

impl CrankTracker {
    /// Create an empty tracker
    #[must_use]
    pub const fn new() -> Self {
        Self { prev: None }
    }

    /// Feed the next crank reading
    ///
    /// Same baseline and wrap rules as [`WheelTracker::update`], producing
    /// revolutions per minute.
    pub fn update(&mut self, reading: CrankReading) -> Option<CadenceSample> {
        let prev = self.prev.replace(reading)?;

        let time_delta = reading.event_time.wrapping_sub(prev.event_time);
        if time_delta == 0 || reading.revolutions < prev.revolutions {
            return Some(CadenceSample { rpm: 0.0 });
        }

        let revs_delta = f64::from(reading.revolutions - prev.revolutions);
        let minutes = f64::from(time_delta) / TICKS_PER_SECOND / 60.0;
        Some(CadenceSample {
            rpm: revs_delta / minutes,
        })
    }
}
