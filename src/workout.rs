//! Workout intensity waveforms, the grade-to-resistance calibration table,
//! and session recording.

use crate::types::{WorkoutDataPoint, WorkoutMode, WorkoutReport, WorkoutSummary};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::f64::consts::PI;

/// Calibration anchors mapping course grade (percent) to brake fraction.
///
/// Ordered and monotonic non-decreasing: a downhill must never be harder
/// than the flat. Values outside the table clamp to the end anchors.
const GRADE_RESISTANCE_TABLE: [(f64, f64); 8] = [
    (-10.0, 0.000),
    (0.0, 0.005),
    (2.0, 0.030),
    (5.0, 0.090),
    (8.0, 0.150),
    (12.0, 0.220),
    (15.0, 0.280),
    (20.0, 0.300),
];

/// Map a virtual grade to a device-safe resistance fraction
///
/// Piecewise-linear interpolation over the fixed calibration table; output
/// is always within `[0, 0.30]`.
#[must_use]
pub fn grade_to_resistance(grade_percent: f64) -> f64 {
    let (first_grade, first_res) = GRADE_RESISTANCE_TABLE[0];
    if grade_percent <= first_grade {
        return first_res;
    }
    let (last_grade, last_res) = GRADE_RESISTANCE_TABLE[GRADE_RESISTANCE_TABLE.len() - 1];
    if grade_percent >= last_grade {
        return last_res;
    }

    for window in GRADE_RESISTANCE_TABLE.windows(2) {
        let (g0, r0) = window[0];
        let (g1, r1) = window[1];
        if grade_percent <= g1 {
            let t = (grade_percent - g0) / (g1 - g0);
            return r0 + t * (r1 - r0);
        }
    }

    last_res
}

/// Step period of the Hilly and Mountain waveforms
const SHORT_PERIOD: u32 = 20;
/// Step period of the Pyramid waveform
const PYRAMID_PERIOD: u32 = 40;

/// Produce the target value for one workout step
///
/// `min`/`max` are normalized (swapped if reversed) before use. Hilly is a
/// sine wave starting at the midpoint; Mountain is a symmetric triangle over
/// a 20-step period; Pyramid is the same triangle stretched over 40 steps;
/// Random draws uniformly from `[min, max]` using the supplied source, which
/// makes tests deterministic with a seeded generator. No clamping happens
/// here; callers apply their own output-domain clamps.
pub fn generate<R: Rng>(mode: WorkoutMode, min: f64, max: f64, step: u32, rng: &mut R) -> f64 {
    let (min, max) = if min > max { (max, min) } else { (min, max) };

    match mode {
        WorkoutMode::Random => rng.gen_range(min..=max),
        WorkoutMode::Hilly => {
            let amplitude = (max - min) / 2.0;
            let midpoint = min + amplitude;
            let phase = 2.0 * PI * f64::from(step % SHORT_PERIOD) / f64::from(SHORT_PERIOD);
            midpoint + amplitude * phase.sin()
        }
        WorkoutMode::Mountain => triangle(min, max, step, SHORT_PERIOD),
        WorkoutMode::Pyramid => triangle(min, max, step, PYRAMID_PERIOD),
    }
}

/// Symmetric triangle: linear ramp up for the first half-period, down for
/// the second.
fn triangle(min: f64, max: f64, step: u32, period: u32) -> f64 {
    let half = period / 2;
    let position = step % period;
    let t = if position <= half {
        f64::from(position) / f64::from(half)
    } else {
        f64::from(period - position) / f64::from(half)
    };
    min + t * (max - min)
}

/// Accumulates workout samples during a session and produces the final report
///
/// Append-only while the session runs; [`WorkoutRecorder::finish`] consumes
/// the recorder, computes the summary once, and freezes the data.
#[derive(Debug)]
pub struct WorkoutRecorder {
    mode: WorkoutMode,
    started_at: DateTime<Utc>,
    points: Vec<WorkoutDataPoint>,
}

impl WorkoutRecorder {
    /// Start recording a session in the given mode
    #[must_use]
    pub fn new(mode: WorkoutMode) -> Self {
        Self::starting_at(mode, Utc::now())
    }

    /// Start recording with an explicit session start time
    #[must_use]
    pub const fn starting_at(mode: WorkoutMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            started_at,
            points: Vec::new(),
        }
    }

    /// Append one sample
    pub fn push(&mut self, point: WorkoutDataPoint) {
        self.points.push(point);
    }

    /// Number of samples recorded so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no samples have been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// End the session: compute the summary and hand out the report
    #[must_use]
    pub fn finish(self) -> WorkoutReport {
        let summary = summarize(self.mode, &self.points);
        WorkoutReport {
            started_at: self.started_at,
            summary,
            data_points: self.points,
        }
    }
}

fn summarize(mode: WorkoutMode, points: &[WorkoutDataPoint]) -> WorkoutSummary {
    let duration_seconds = points.last().map_or(0, |p| p.elapsed_seconds);
    let total_distance_m = points.last().map_or(0.0, |p| p.distance_m);

    let count = points.len() as u64;
    let (avg_power, max_power) = if count == 0 {
        (0, 0)
    } else {
        let sum: u64 = points.iter().map(|p| u64::from(p.power)).sum();
        let max = points.iter().map(|p| p.power).max().unwrap_or(0);
        ((sum / count) as u16, max)
    };

    let (avg_speed_kph, max_speed_kph) = if count == 0 {
        (0.0, 0.0)
    } else {
        let sum: f64 = points.iter().map(|p| p.speed_kph).sum();
        let max = points.iter().map(|p| p.speed_kph).fold(0.0, f64::max);
        (sum / count as f64, max)
    };

    let heart_rates: Vec<u8> = points.iter().filter_map(|p| p.heart_rate).collect();
    let (avg_heart_rate, max_heart_rate) = if heart_rates.is_empty() {
        (None, None)
    } else {
        let sum: u64 = heart_rates.iter().map(|&h| u64::from(h)).sum();
        (
            Some((sum / heart_rates.len() as u64) as u8),
            heart_rates.iter().copied().max(),
        )
    };

    WorkoutSummary {
        duration_seconds,
        total_distance_m,
        avg_power,
        max_power,
        avg_speed_kph,
        max_speed_kph,
        avg_heart_rate,
        max_heart_rate,
        mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_grade_mapping_endpoints() {
        assert!((grade_to_resistance(0.0) - 0.005).abs() < 1e-4);
        assert!((grade_to_resistance(20.0) - 0.30).abs() < 1e-4);
        assert!((grade_to_resistance(-10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_grade_mapping_clamps_outside_table() {
        assert!((grade_to_resistance(-25.0)).abs() < 1e-9);
        assert!((grade_to_resistance(-10.001)).abs() < 1e-9);
        assert!((grade_to_resistance(20.001) - 0.30).abs() < 1e-9);
        assert!((grade_to_resistance(60.0) - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_grade_mapping_interpolates() {
        // Halfway between (2, 0.030) and (5, 0.090)
        assert!((grade_to_resistance(3.5) - 0.060).abs() < 1e-9);
        // Halfway between (-10, 0.000) and (0, 0.005)
        assert!((grade_to_resistance(-5.0) - 0.0025).abs() < 1e-9);
    }

    #[test]
    fn test_grade_mapping_is_monotonic() {
        // Safety property: more grade never means less resistance
        let mut grade = -10.0;
        let mut prev = grade_to_resistance(grade);
        while grade <= 20.0 {
            let current = grade_to_resistance(grade);
            assert!(
                current >= prev,
                "resistance decreased between {:.2}% and {:.2}%",
                grade - 0.01,
                grade
            );
            prev = current;
            grade += 0.01;
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_hilly_starts_at_midpoint() {
        let value = generate(WorkoutMode::Hilly, 2.0, 8.0, 0, &mut rng());
        assert!((value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_mountain_shape() {
        let mut r = rng();
        assert!((generate(WorkoutMode::Mountain, 2.0, 8.0, 0, &mut r) - 2.0).abs() < 1e-9);
        assert!((generate(WorkoutMode::Mountain, 2.0, 8.0, 10, &mut r) - 8.0).abs() < 1e-9);
        assert!((generate(WorkoutMode::Mountain, 2.0, 8.0, 5, &mut r) - 5.0).abs() < 1e-9);
        // Period 20: step 20 is back at the bottom
        assert!((generate(WorkoutMode::Mountain, 2.0, 8.0, 20, &mut r) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pyramid_peaks_at_half_period() {
        let mut r = rng();
        assert!((generate(WorkoutMode::Pyramid, 0.0, 10.0, 0, &mut r)).abs() < 1e-9);
        assert!((generate(WorkoutMode::Pyramid, 0.0, 10.0, 20, &mut r) - 10.0).abs() < 1e-9);
        assert!((generate(WorkoutMode::Pyramid, 0.0, 10.0, 40, &mut r)).abs() < 1e-9);
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let mut r = rng();
        for step in 0..200 {
            let value = generate(WorkoutMode::Random, 1.0, 6.0, step, &mut r);
            assert!((1.0..=6.0).contains(&value));
        }
    }

    #[test]
    fn test_reversed_bounds_are_normalized() {
        let mut r = rng();
        for step in 0..100 {
            let value = generate(WorkoutMode::Random, 6.0, 1.0, step, &mut r);
            assert!((1.0..=6.0).contains(&value));
        }
        // Deterministic modes normalize the same way
        assert!((generate(WorkoutMode::Mountain, 8.0, 2.0, 10, &mut r) - 8.0).abs() < 1e-9);
    }

    fn point(elapsed: u32, power: u16, heart_rate: Option<u8>) -> WorkoutDataPoint {
        WorkoutDataPoint {
            elapsed_seconds: elapsed,
            power,
            speed_kph: 30.0,
            distance_m: f64::from(elapsed) * 8.3,
            grade_percent: 2.0,
            heart_rate,
        }
    }

    #[test]
    fn test_recorder_summary() {
        let mut recorder = WorkoutRecorder::new(WorkoutMode::Hilly);
        recorder.push(point(1, 100, Some(120)));
        recorder.push(point(2, 200, Some(140)));
        recorder.push(point(3, 300, Some(160)));

        let report = recorder.finish();
        assert_eq!(report.summary.duration_seconds, 3);
        assert_eq!(report.summary.avg_power, 200);
        assert_eq!(report.summary.max_power, 300);
        assert_eq!(report.summary.avg_heart_rate, Some(140));
        assert_eq!(report.summary.max_heart_rate, Some(160));
        assert_eq!(report.summary.mode, WorkoutMode::Hilly);
        assert_eq!(report.data_points.len(), 3);
    }

    #[test]
    fn test_recorder_without_heart_rate() {
        let mut recorder = WorkoutRecorder::new(WorkoutMode::Random);
        recorder.push(point(1, 150, None));
        recorder.push(point(2, 150, None));

        let report = recorder.finish();
        assert_eq!(report.summary.avg_heart_rate, None);
        assert_eq!(report.summary.max_heart_rate, None);
    }

    #[test]
    fn test_empty_recorder_produces_zeroed_summary() {
        let report = WorkoutRecorder::new(WorkoutMode::Mountain).finish();
        assert_eq!(report.summary.duration_seconds, 0);
        assert_eq!(report.summary.avg_power, 0);
        assert!(report.data_points.is_empty());
    }
}
