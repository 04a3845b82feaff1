use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// One decoded telemetry notification
///
/// Produced by the [`crate::protocol`] decoders from a raw notification
/// buffer and consumed exactly once by the telemetry trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryReading {
    /// Instantaneous pedalling power
    Power {
        /// Power in watts, never negative
        watts: u16,
    },
    /// Cumulative wheel revolution data
    Wheel(WheelReading),
    /// Cumulative crank revolution data
    Crank(CrankReading),
}

/// Cumulative wheel revolutions with their event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelReading {
    /// Total wheel revolutions since the sensor powered on
    pub revolutions: u32,
    /// Sensor event time in 1/1024 s ticks, wraps at 65536
    pub event_time: u16,
}

/// Cumulative crank revolutions with their event timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankReading {
    /// Total crank revolutions since the sensor powered on
    pub revolutions: u16,
    /// Sensor event time in 1/1024 s ticks, wraps at 65536
    pub event_time: u16,
}

/// Derived speed sample from successive wheel readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    /// Instantaneous speed in km/h
    pub speed_kph: f64,
    /// Distance covered since the start of the session, in meters
    pub distance_m: f64,
}

/// Derived cadence sample from successive crank readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceSample {
    /// Pedalling cadence in revolutions per minute
    pub rpm: f64,
}

/// Workout intensity waveform selection
///
/// Immutable for the duration of a session; selects the algorithm used by
/// [`crate::workout::generate`] to produce a target grade per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkoutMode {
    /// Uniform random grade within the configured bounds
    Random,
    /// Rolling sine-wave terrain
    Hilly,
    /// Symmetric triangle climb and descent
    Mountain,
    /// Long triangle climb and descent over twice the period
    Pyramid,
}

impl fmt::Display for WorkoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "Random"),
            Self::Hilly => write!(f, "Hilly"),
            Self::Mountain => write!(f, "Mountain"),
            Self::Pyramid => write!(f, "Pyramid"),
        }
    }
}

/// What a queued command asks the trainer to do
///
/// Dialects differ in how they express load: the vendor dialect always takes
/// a brake fraction, FTMS distinguishes grade simulation from a raw target
/// resistance level. The kind preserves the caller's intent so each dialect
/// can pick the right frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Simulate a virtual course grade
    Grade,
    /// Apply a raw brake fraction directly
    Resistance,
}

/// A resistance update awaiting transmission
///
/// Held as at most one pending value: queueing a newer command overwrites an
/// older un-sent one. The fraction is clamped to `[0, 1]` on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResistanceCommand {
    /// The caller's intent, preserved for dialect-specific encoding
    pub kind: CommandKind,
    /// The virtual grade this command simulates, in percent
    pub target_grade_percent: f64,
    /// Normalized brake load in `[0, 1]` actually sent to the hardware
    pub resistance_fraction: f64,
}

impl ResistanceCommand {
    /// Grade-simulation command carrying its pre-mapped brake fraction
    ///
    /// The fraction is what vendor-dialect hardware receives; FTMS hardware
    /// receives the grade itself.
    #[must_use]
    pub fn from_grade(target_grade_percent: f64, resistance_fraction: f64) -> Self {
        Self {
            kind: CommandKind::Grade,
            target_grade_percent,
            resistance_fraction: resistance_fraction.clamp(0.0, 1.0),
        }
    }

    /// Raw resistance command with no associated grade
    #[must_use]
    pub fn from_fraction(resistance_fraction: f64) -> Self {
        Self {
            kind: CommandKind::Resistance,
            target_grade_percent: 0.0,
            resistance_fraction: resistance_fraction.clamp(0.0, 1.0),
        }
    }
}

/// One recorded sample of a workout session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkoutDataPoint {
    /// Seconds elapsed since the session started
    pub elapsed_seconds: u32,
    /// Instantaneous power in watts
    pub power: u16,
    /// Instantaneous speed in km/h
    pub speed_kph: f64,
    /// Cumulative distance in meters
    pub distance_m: f64,
    /// Simulated grade at this sample, in percent
    pub grade_percent: f64,
    /// Heart rate in bpm, if a heart-rate source was paired
    pub heart_rate: Option<u8>,
}

/// Aggregates computed once over a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSummary {
    /// Session duration in seconds
    pub duration_seconds: u32,
    /// Total distance in meters
    pub total_distance_m: f64,
    /// Average power in watts
    pub avg_power: u16,
    /// Maximum power in watts
    pub max_power: u16,
    /// Average speed in km/h
    pub avg_speed_kph: f64,
    /// Maximum speed in km/h
    pub max_speed_kph: f64,
    /// Average heart rate in bpm, absent if never recorded
    pub avg_heart_rate: Option<u8>,
    /// Maximum heart rate in bpm, absent if never recorded
    pub max_heart_rate: Option<u8>,
    /// Waveform mode the session ran under
    pub mode: WorkoutMode,
}

/// A finished workout: summary plus the full ordered sample sequence
///
/// Read-only input of the FIT exporter. The data points are ordered by
/// `elapsed_seconds` and immutable once the session has ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutReport {
    /// Wall-clock session start
    pub started_at: DateTime<Utc>,
    /// Aggregates over the whole session
    pub summary: WorkoutSummary,
    /// Ordered samples, one per recorded tick
    pub data_points: Vec<WorkoutDataPoint>,
}

/// Connection state of the trainer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainerStatus {
    /// No link
    Disconnected,
    /// Scanning for devices
    Scanning,
    /// Link establishment in progress
    Connecting,
    /// Link established, init command not yet sent
    Connected,
    /// Init/unlock sent, trainer accepts control commands
    Ready,
}

impl fmt::Display for TrainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Events observable by the embedding application
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerEvent {
    /// A candidate trainer was seen during scanning
    DeviceDiscovered(DeviceInfo),
    /// The link state changed
    StatusChanged(TrainerStatus),
    /// A power reading arrived
    PowerReceived {
        /// Power in watts
        watts: u16,
    },
    /// A new speed/distance sample was derived from wheel data
    SpeedUpdated {
        /// Instantaneous speed in km/h
        speed_kph: f64,
        /// Session distance in meters
        distance_m: f64,
    },
    /// A new cadence sample was derived from crank data
    CadenceUpdated {
        /// Cadence in rpm
        rpm: f64,
    },
    /// The link dropped; pending commands were discarded
    ConnectionLost,
}

/// Information about a discovered trainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Peripheral address
    pub address: String,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, address: String, rssi: i16) -> Self {
        Self {
            name,
            address,
            rssi,
        }
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Wheel circumference in meters, used for speed/distance derivation
    pub wheel_circumference_m: f64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            scan_timeout_ms: 10_000,
            wheel_circumference_m: 2.105,
        }
    }
}

/// Pacing configuration for the command transmission loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Interval between transmission attempts
    pub tick: Duration,
    /// Extra wait after a failed write before the command is retried
    pub retry_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(200),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Unit preference for distance/speed presentation
///
/// Presentation only: all computation inside the library is metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceUnit {
    /// Kilometers and km/h
    Kilometers,
    /// Miles and mph
    Miles,
}

impl DistanceUnit {
    /// Convert a km/h speed into this unit's speed figure
    #[must_use]
    pub fn speed_from_kph(self, kph: f64) -> f64 {
        match self {
            Self::Kilometers => kph,
            Self::Miles => kph * 0.6214,
        }
    }

    /// Convert meters into this unit's large distance figure (km or mi)
    #[must_use]
    pub fn distance_from_meters(self, meters: f64) -> f64 {
        match self {
            Self::Kilometers => meters / 1000.0,
            Self::Miles => meters / 1609.34,
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kilometers => write!(f, "km/h"),
            Self::Miles => write!(f, "mph"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resistance_command_clamps_fraction() {
        let over = ResistanceCommand::from_grade(25.0, 1.7);
        assert!((over.resistance_fraction - 1.0).abs() < f64::EPSILON);

        let under = ResistanceCommand::from_grade(-12.0, -0.3);
        assert!(under.resistance_fraction.abs() < f64::EPSILON);

        let mid = ResistanceCommand::from_fraction(0.42);
        assert!((mid.resistance_fraction - 0.42).abs() < f64::EPSILON);
        assert!((ResistanceCommand::from_fraction(1.3).resistance_fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resistance_command_preserves_intent() {
        assert_eq!(
            ResistanceCommand::from_grade(5.0, 0.09).kind,
            CommandKind::Grade
        );
        assert_eq!(
            ResistanceCommand::from_fraction(0.5).kind,
            CommandKind::Resistance
        );
    }

    #[test]
    fn test_distance_unit_conversion() {
        let kph = 30.0;
        assert!((DistanceUnit::Kilometers.speed_from_kph(kph) - 30.0).abs() < 1e-9);
        assert!((DistanceUnit::Miles.speed_from_kph(kph) - 18.642).abs() < 0.001);

        assert!((DistanceUnit::Kilometers.distance_from_meters(5000.0) - 5.0).abs() < 1e-9);
        assert!((DistanceUnit::Miles.distance_from_meters(1609.34) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.tick, Duration::from_millis(200));
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::default();
        assert_eq!(params.timeout_ms, 30_000);
        assert_eq!(params.scan_timeout_ms, 10_000);
        assert!((params.wheel_circumference_m - 2.105).abs() < 1e-9);
    }

    #[test]
    fn test_workout_mode_display() {
        assert_eq!(WorkoutMode::Hilly.to_string(), "Hilly");
        assert_eq!(WorkoutMode::Pyramid.to_string(), "Pyramid");
    }
}
