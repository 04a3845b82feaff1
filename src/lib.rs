#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Spinlink 🚴
//!
//! A Rust library for controlling smart bicycle trainers via Bluetooth Low Energy.
//!
//! Spinlink drives the trainer's resistance from a virtual course grade, decodes
//! the trainer's power / speed / cadence telemetry, records the resulting
//! workout and exports it as a FIT activity file that third-party fitness
//! platforms can ingest.
//!
//! ## Supported hardware
//!
//! The library speaks two control dialects and picks whichever the connected
//! trainer advertises, in priority order:
//!
//! - **Vendor trainer control** (Wahoo-style): legacy resistance and grade
//!   simulation op-codes on a proprietary characteristic, unlocked once at
//!   connection time
//! - **FTMS** (standard Fitness Machine Service): the Fitness Machine Control
//!   Point with indoor bike simulation parameters
//!
//! Telemetry is consumed from the standard Cycling Power and Cycling Speed and
//! Cadence measurement characteristics.
//!
//! ## Command coalescing
//!
//! Resistance updates are produced far faster than a BLE link should be
//! written to. Spinlink therefore keeps a single *pending command* slot:
//! queueing a new command silently replaces any not-yet-sent one, and a
//! background loop drains the slot at a fixed pace, backing off on write
//! failures without ever interleaving two writes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spinlink::Trainer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and connect to the first trainer in range
//!     let mut trainer = Trainer::connect_first().await?;
//!
//!     // Simulate a 5% climb
//!     trainer.queue_grade(5.0).await;
//!
//!     // ...ride...
//!
//!     trainer.disconnect().await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy communication module
pub mod ble;
/// Error types and handling
pub mod error;
/// FIT activity file export
pub mod fit;
/// Command encoding and telemetry decoding
pub mod protocol;
/// Wheel and crank telemetry accumulation
pub mod telemetry;
/// Main trainer control interface
pub mod trainer;
/// Type definitions and data structures
pub mod types;
/// Workout waveforms, grade mapping and session recording
pub mod workout;

// Re-export the main types for convenient usage
pub use error::{Result, TrainerError};
pub use trainer::Trainer;
pub use types::{
    CommandKind, ConnectionParams, DeviceInfo, DistanceUnit, LoopConfig, ResistanceCommand,
    TelemetryReading, TrainerEvent, TrainerStatus, WorkoutDataPoint, WorkoutMode, WorkoutReport,
    WorkoutSummary,
};
pub use workout::{grade_to_resistance, WorkoutRecorder};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vendor trainer service UUID (Wahoo-style trainers)
///
/// Proprietary service carrying the legacy trainer control characteristic.
/// Probed before FTMS because trainers that expose both tend to implement
/// the vendor dialect more completely.
pub const VENDOR_TRAINER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xA026_EE01_0A7D_4AB3_97FA_F150_0F9F_EB8B);

/// Vendor trainer control characteristic UUID
///
/// All vendor control op-codes ([`protocol::OP_RESISTANCE_MODE`],
/// [`protocol::OP_SIM_MODE`], ...) are written to this characteristic.
pub const VENDOR_TRAINER_CONTROL_UUID: Uuid =
    Uuid::from_u128(0xA026_E005_0A7D_4AB3_97FA_F150_0F9F_EB8B);

/// Fitness Machine Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5F9B_34FB);

/// Fitness Machine Control Point characteristic UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2AD9_0000_1000_8000_0080_5F9B_34FB);

/// Cycling Power service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5F9B_34FB);

/// Cycling Power Measurement characteristic UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2A63_0000_1000_8000_0080_5F9B_34FB);

/// Cycling Speed and Cadence service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5F9B_34FB);

/// CSC Measurement characteristic UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2A5B_0000_1000_8000_0080_5F9B_34FB);
