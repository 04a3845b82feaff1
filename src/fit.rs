//! Export of recorded sessions to the FIT activity format.
//!
//! Produces a minimal but well-formed activity file: file id, timer
//! events, one record per sample, then lap, session and activity messages,
//! followed by the CRC-16 trailer. Heart-rate columns are only declared in
//! the definitions when the session actually carries heart-rate data; the
//! virtual grade column is always present.

use crate::error::Result;
use crate::types::WorkoutReport;
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::info;

/// FIT timestamps count seconds since 1989-12-31 00:00:00 UTC
const FIT_EPOCH_OFFSET: i64 = 631_065_600;

const FIT_HEADER_SIZE: u8 = 14;
const FIT_PROTOCOL_VERSION: u8 = 0x20;
const FIT_PROFILE_VERSION: u16 = 2100;

/// Global message numbers
mod message_type {
    pub const FILE_ID: u16 = 0;
    pub const SESSION: u16 = 18;
    pub const LAP: u16 = 19;
    pub const RECORD: u16 = 20;
    pub const EVENT: u16 = 21;
    pub const ACTIVITY: u16 = 34;
}

/// Record message field numbers
mod field_type {
    pub const TIMESTAMP: u8 = 253;
    pub const HEART_RATE: u8 = 3;
    pub const DISTANCE: u8 = 5;
    pub const SPEED: u8 = 6;
    pub const POWER: u8 = 7;
    pub const GRADE: u8 = 9;
}

/// Base type codes used in field definitions
mod base_type {
    pub const ENUM: u8 = 0x00;
    pub const UINT8: u8 = 0x02;
    pub const SINT16: u8 = 0x83;
    pub const UINT16: u8 = 0x84;
    pub const UINT32: u8 = 0x86;
}

/// Invalid-value sentinel for absent heart-rate samples
const INVALID_U8: u8 = 0xFF;

/// Builds a FIT byte stream into an in-memory buffer
///
/// The header is laid down first with a zero data size; [`FitWriter::finalize`]
/// patches the real size in and appends the file CRC.
struct FitWriter {
    buffer: Vec<u8>,
}

impl FitWriter {
    fn new() -> Self {
        let mut writer = Self { buffer: Vec::new() };
        writer.write_file_header();
        writer
    }

    fn write_file_header(&mut self) {
        self.buffer.push(FIT_HEADER_SIZE);
        self.buffer.push(FIT_PROTOCOL_VERSION);
        self.buffer.extend_from_slice(&FIT_PROFILE_VERSION.to_le_bytes());
        // Data size placeholder, patched in finalize()
        self.buffer.extend_from_slice(&0u32.to_le_bytes());
        self.buffer.extend_from_slice(b".FIT");
        let header_crc = calculate_crc(&self.buffer[0..12]);
        self.buffer.extend_from_slice(&header_crc.to_le_bytes());
    }

    /// Write a definition message: `fields` are (field number, size, base type)
    fn write_definition(&mut self, local_mesg: u8, global_mesg: u16, fields: &[(u8, u8, u8)]) {
        self.write_u8(0x40 | (local_mesg & 0x0F));
        self.write_u8(0); // reserved
        self.write_u8(0); // little-endian architecture
        self.write_u16(global_mesg);
        self.write_u8(fields.len() as u8);
        for &(number, size, base) in fields {
            self.write_u8(number);
            self.write_u8(size);
            self.write_u8(base);
        }
    }

    fn write_data_header(&mut self, local_mesg: u8) {
        self.write_u8(local_mesg & 0x0F);
    }

    fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Patch the data size into the header and append the file CRC
    fn finalize(mut self) -> Vec<u8> {
        let data_size = (self.buffer.len() - usize::from(FIT_HEADER_SIZE)) as u32;
        self.buffer[4..8].copy_from_slice(&data_size.to_le_bytes());

        let file_crc = calculate_crc(&self.buffer);
        self.buffer.extend_from_slice(&file_crc.to_le_bytes());
        self.buffer
    }
}

fn fit_timestamp(dt: DateTime<Utc>) -> u32 {
    (dt.timestamp() - FIT_EPOCH_OFFSET).max(0) as u32
}

/// CRC-16 over the given bytes, per the FIT trailer algorithm
fn calculate_crc(data: &[u8]) -> u16 {
    const CRC_TABLE: [u16; 16] = [
        0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
        0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
    ];

    let mut crc: u16 = 0;
    for byte in data {
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[(byte & 0xF) as usize];

        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize];
    }
    crc
}

/// Render a session report as a FIT activity file
///
/// A session with no samples still yields a structurally valid file with
/// zeroed lap, session and activity messages.
#[must_use]
pub fn export(report: &WorkoutReport) -> Vec<u8> {
    let mut writer = FitWriter::new();
    let started_at = report.started_at;
    let ended_at = started_at + Duration::seconds(i64::from(report.summary.duration_seconds));
    let has_heart_rate = report.data_points.iter().any(|p| p.heart_rate.is_some());

    write_file_id(&mut writer, started_at);
    write_event(&mut writer, started_at, 0); // timer start
    write_records(&mut writer, report, has_heart_rate);
    write_event(&mut writer, ended_at, 4); // timer stop_all
    write_lap(&mut writer, report, ended_at, has_heart_rate);
    write_session(&mut writer, report, ended_at, has_heart_rate);
    write_activity(&mut writer, report, ended_at);

    writer.finalize()
}

/// Render and write a session report atomically
///
/// The file is staged next to the target and renamed into place, so an
/// aborted export never leaves a truncated activity behind.
///
/// # Errors
///
/// Returns [`crate::TrainerError::Io`] on any filesystem failure.
pub fn export_to_file(report: &WorkoutReport, path: &Path) -> Result<()> {
    let content = export(report);
    let staging = path.with_extension("fit.tmp");
    std::fs::write(&staging, &content)?;
    std::fs::rename(&staging, path)?;
    info!(
        "Exported {} data points ({} bytes) to {}",
        report.data_points.len(),
        content.len(),
        path.display()
    );
    Ok(())
}

fn write_file_id(writer: &mut FitWriter, started_at: DateTime<Utc>) {
    let fields = [
        (0, 1, base_type::ENUM),   // type
        (1, 2, base_type::UINT16), // manufacturer
        (2, 2, base_type::UINT16), // product
        (3, 4, base_type::UINT32), // serial_number
        (4, 4, base_type::UINT32), // time_created
    ];
    writer.write_definition(0, message_type::FILE_ID, &fields);

    writer.write_data_header(0);
    writer.write_u8(4); // type = activity
    writer.write_u16(255); // manufacturer = development
    writer.write_u16(1);
    writer.write_u32(1);
    writer.write_u32(fit_timestamp(started_at));
}

fn write_event(writer: &mut FitWriter, timestamp: DateTime<Utc>, event_type: u8) {
    let fields = [
        (field_type::TIMESTAMP, 4, base_type::UINT32),
        (0, 1, base_type::ENUM), // event = timer
        (1, 1, base_type::ENUM), // event_type
    ];
    writer.write_definition(1, message_type::EVENT, &fields);

    writer.write_data_header(1);
    writer.write_u32(fit_timestamp(timestamp));
    writer.write_u8(0);
    writer.write_u8(event_type);
}

fn write_records(writer: &mut FitWriter, report: &WorkoutReport, has_heart_rate: bool) {
    let mut fields = vec![
        (field_type::TIMESTAMP, 4, base_type::UINT32),
        (field_type::POWER, 2, base_type::UINT16),
        (field_type::DISTANCE, 4, base_type::UINT32), // meters * 100
        (field_type::SPEED, 2, base_type::UINT16),    // m/s * 1000
        (field_type::GRADE, 2, base_type::SINT16),    // percent * 100
    ];
    if has_heart_rate {
        fields.push((field_type::HEART_RATE, 1, base_type::UINT8));
    }
    writer.write_definition(2, message_type::RECORD, &fields);

    for point in &report.data_points {
        writer.write_data_header(2);

        let timestamp = report.started_at + Duration::seconds(i64::from(point.elapsed_seconds));
        writer.write_u32(fit_timestamp(timestamp));
        writer.write_u16(point.power);
        writer.write_u32((point.distance_m * 100.0) as u32);
        writer.write_u16((point.speed_kph / 3.6 * 1000.0) as u16);
        writer.write_i16((point.grade_percent * 100.0).clamp(-32768.0, 32767.0) as i16);
        if has_heart_rate {
            writer.write_u8(point.heart_rate.unwrap_or(INVALID_U8));
        }
    }
}

fn write_lap(
    writer: &mut FitWriter,
    report: &WorkoutReport,
    ended_at: DateTime<Utc>,
    has_heart_rate: bool,
) {
    let mut fields = vec![
        (field_type::TIMESTAMP, 4, base_type::UINT32),
        (2, 4, base_type::UINT32),  // start_time
        (7, 4, base_type::UINT32),  // total_elapsed_time (ms)
        (8, 4, base_type::UINT32),  // total_timer_time (ms)
        (9, 4, base_type::UINT32),  // total_distance (m * 100)
        (19, 2, base_type::UINT16), // avg_power
        (20, 2, base_type::UINT16), // max_power
        (25, 1, base_type::ENUM),   // event = lap
        (26, 1, base_type::ENUM),   // event_type = stop
    ];
    if has_heart_rate {
        fields.push((15, 1, base_type::UINT8)); // avg_heart_rate
        fields.push((16, 1, base_type::UINT8)); // max_heart_rate
    }
    writer.write_definition(3, message_type::LAP, &fields);

    let summary = &report.summary;
    let total_ms = summary.duration_seconds.saturating_mul(1000);

    writer.write_data_header(3);
    writer.write_u32(fit_timestamp(ended_at));
    writer.write_u32(fit_timestamp(report.started_at));
    writer.write_u32(total_ms);
    writer.write_u32(total_ms);
    writer.write_u32((summary.total_distance_m * 100.0) as u32);
    writer.write_u16(summary.avg_power);
    writer.write_u16(summary.max_power);
    writer.write_u8(9); // event = lap
    writer.write_u8(1); // event_type = stop
    if has_heart_rate {
        writer.write_u8(summary.avg_heart_rate.unwrap_or(INVALID_U8));
        writer.write_u8(summary.max_heart_rate.unwrap_or(INVALID_U8));
    }
}

fn write_session(
    writer: &mut FitWriter,
    report: &WorkoutReport,
    ended_at: DateTime<Utc>,
    has_heart_rate: bool,
) {
    let mut fields = vec![
        (field_type::TIMESTAMP, 4, base_type::UINT32),
        (2, 4, base_type::UINT32),  // start_time
        (5, 1, base_type::ENUM),    // sport
        (6, 1, base_type::ENUM),    // sub_sport
        (7, 4, base_type::UINT32),  // total_elapsed_time (ms)
        (8, 4, base_type::UINT32),  // total_timer_time (ms)
        (9, 4, base_type::UINT32),  // total_distance (m * 100)
        (20, 2, base_type::UINT16), // avg_power
        (21, 2, base_type::UINT16), // max_power
        (25, 1, base_type::ENUM),   // event = session
        (26, 1, base_type::ENUM),   // event_type = stop
        (28, 2, base_type::UINT16), // num_laps
    ];
    if has_heart_rate {
        fields.push((16, 1, base_type::UINT8)); // avg_heart_rate
        fields.push((17, 1, base_type::UINT8)); // max_heart_rate
    }
    writer.write_definition(4, message_type::SESSION, &fields);

    let summary = &report.summary;
    let total_ms = summary.duration_seconds.saturating_mul(1000);

    writer.write_data_header(4);
    writer.write_u32(fit_timestamp(ended_at));
    writer.write_u32(fit_timestamp(report.started_at));
    writer.write_u8(2); // sport = cycling
    writer.write_u8(6); // sub_sport = indoor_cycling
    writer.write_u32(total_ms);
    writer.write_u32(total_ms);
    writer.write_u32((summary.total_distance_m * 100.0) as u32);
    writer.write_u16(summary.avg_power);
    writer.write_u16(summary.max_power);
    writer.write_u8(8); // event = session
    writer.write_u8(1); // event_type = stop
    writer.write_u16(1);
    if has_heart_rate {
        writer.write_u8(summary.avg_heart_rate.unwrap_or(INVALID_U8));
        writer.write_u8(summary.max_heart_rate.unwrap_or(INVALID_U8));
    }
}

fn write_activity(writer: &mut FitWriter, report: &WorkoutReport, ended_at: DateTime<Utc>) {
    let fields = [
        (field_type::TIMESTAMP, 4, base_type::UINT32),
        (0, 4, base_type::UINT32), // total_timer_time (ms)
        (1, 2, base_type::UINT16), // num_sessions
        (2, 1, base_type::ENUM),   // type = manual
        (3, 1, base_type::ENUM),   // event = activity
        (4, 1, base_type::ENUM),   // event_type = stop
        (5, 4, base_type::UINT32), // local_timestamp
    ];
    writer.write_definition(5, message_type::ACTIVITY, &fields);

    writer.write_data_header(5);
    writer.write_u32(fit_timestamp(ended_at));
    writer.write_u32(report.summary.duration_seconds.saturating_mul(1000));
    writer.write_u16(1);
    writer.write_u8(0);
    writer.write_u8(26);
    writer.write_u8(1);
    writer.write_u32(fit_timestamp(ended_at));
}
