//! Byte-exact command encoding and telemetry decoding.
//!
//! Pure functions, no state, no I/O. Encoders build the outgoing control
//! buffers for both the vendor dialect and FTMS; decoders pick apart the
//! standard Cycling Power and CSC measurement notifications. All multi-byte
//! values are little-endian. A decoder handed a buffer too short for its
//! target field reports the field as absent instead of failing.

use crate::types::{CrankReading, TelemetryReading, WheelReading};
use crate::{CSC_MEASUREMENT_UUID, CYCLING_POWER_MEASUREMENT_UUID};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Vendor op-code: unlock the control characteristic
pub const OP_UNLOCK: u8 = 0x20;
/// Vendor op-code: set brake load as a percentage
pub const OP_RESISTANCE_MODE: u8 = 0x41;
/// Vendor op-code: standard (level) mode
pub const OP_STANDARD_MODE: u8 = 0x42;
/// Vendor op-code: grade simulation mode
pub const OP_SIM_MODE: u8 = 0x43;

/// FTMS control point op-code: request control
pub const FTMS_OP_REQUEST_CONTROL: u8 = 0x00;
/// FTMS control point op-code: set target resistance level
pub const FTMS_OP_SET_RESISTANCE: u8 = 0x04;
/// FTMS control point op-code: set target power
pub const FTMS_OP_SET_POWER: u8 = 0x05;
/// FTMS control point op-code: set indoor bike simulation parameters
pub const FTMS_OP_SET_SIMULATION: u8 = 0x11;

/// Magic payload following [`OP_UNLOCK`]
pub const UNLOCK_MAGIC: [u8; 2] = [0xEE, 0xFC];

/// Default rider-plus-bike weight for grade simulation, in kg
pub const DEFAULT_WEIGHT_KG: f64 = 85.0;
/// Default rolling resistance coefficient for grade simulation
pub const DEFAULT_CRR: f64 = 0.004;
/// Default wind resistance coefficient for vendor grade simulation
pub const DEFAULT_CW: f64 = 0.6;
/// Default wind resistance coefficient for FTMS simulation
pub const DEFAULT_FTMS_CW: f64 = 0.51;

/// Encode a bare one-byte command
#[must_use]
pub fn encode_opcode(code: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(1);
    buf.put_u8(code);
    buf.freeze()
}

/// Encode `[code, value]`
#[must_use]
pub fn encode_opcode_u8(code: u8, value: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8(code);
    buf.put_u8(value);
    buf.freeze()
}

/// Encode `[code, low, high]` with a little-endian value
#[must_use]
pub fn encode_opcode_u16(code: u8, value: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(code);
    buf.put_u16_le(value);
    buf.freeze()
}

/// Encode the fixed unlock command sent once at connection establishment
#[must_use]
pub fn encode_unlock() -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(OP_UNLOCK);
    buf.put_slice(&UNLOCK_MAGIC);
    buf.freeze()
}

/// Encode a vendor resistance-mode command
///
/// The fraction is clamped to `[0, 1]` and transmitted as a whole percentage
/// in a single byte after [`OP_RESISTANCE_MODE`].
#[must_use]
pub fn encode_resistance_mode(fraction: f64) -> Bytes {
    let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
    encode_opcode_u8(OP_RESISTANCE_MODE, percent.min(100))
}

/// Encode a vendor grade-simulation command (9 bytes)
///
/// Layout after [`OP_SIM_MODE`]: weight kg x100 (u16), rolling resistance
/// x10000 (u16), wind coefficient x1000 (u16), grade percent x100 (i16).
#[must_use]
pub fn encode_simulation_grade(grade_percent: f64, weight_kg: f64, crr: f64, cw: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u8(OP_SIM_MODE);
    buf.put_u16_le(scale_u16(weight_kg, 0.0, 200.0, 100.0));
    buf.put_u16_le(scale_u16(crr, 0.0, 0.1, 10_000.0));
    buf.put_u16_le(scale_u16(cw, 0.0, 2.0, 1_000.0));
    buf.put_i16_le(scale_i16(grade_percent, -15.0, 20.0, 100.0));
    buf.freeze()
}

/// [`encode_simulation_grade`] with the default physics parameters
#[must_use]
pub fn encode_simulation_grade_default(grade_percent: f64) -> Bytes {
    encode_simulation_grade(grade_percent, DEFAULT_WEIGHT_KG, DEFAULT_CRR, DEFAULT_CW)
}

/// Encode an FTMS target-resistance command
///
/// The fraction is clamped to `[0, 1]` and transmitted as a whole percentage
/// in a single byte after [`FTMS_OP_SET_RESISTANCE`].
#[must_use]
pub fn encode_ftms_resistance(fraction: f64) -> Bytes {
    let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
    encode_opcode_u8(FTMS_OP_SET_RESISTANCE, percent.min(100))
}

/// Encode an FTMS indoor-bike-simulation command (7 bytes)
///
/// Layout after [`FTMS_OP_SET_SIMULATION`]: wind m/s x1000 (i16), grade
/// percent x100 (i16), rolling resistance x10000 (u8), wind coefficient
/// x100 (u8).
#[must_use]
pub fn encode_ftms_simulation(grade_percent: f64, crr: f64, cw: f64, wind_mps: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u8(FTMS_OP_SET_SIMULATION);
    buf.put_i16_le(scale_i16(wind_mps, -50.0, 50.0, 1_000.0));
    buf.put_i16_le(scale_i16(grade_percent, -45.0, 45.0, 100.0));
    buf.put_u8(scale_u8(crr, 0.0, 0.0254, 10_000.0));
    buf.put_u8(scale_u8(cw, 0.0, 2.54, 100.0));
    buf.freeze()
}

/// [`encode_ftms_simulation`] with the default physics parameters and no wind
#[must_use]
pub fn encode_ftms_simulation_default(grade_percent: f64) -> Bytes {
    encode_ftms_simulation(grade_percent, DEFAULT_CRR, DEFAULT_FTMS_CW, 0.0)
}

fn scale_u16(value: f64, min: f64, max: f64, scale: f64) -> u16 {
    (value.clamp(min, max) * scale)
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16
}

fn scale_i16(value: f64, min: f64, max: f64, scale: f64) -> i16 {
    (value.clamp(min, max) * scale)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn scale_u8(value: f64, min: f64, max: f64, scale: f64) -> u8 {
    (value.clamp(min, max) * scale)
        .round()
        .clamp(0.0, f64::from(u8::MAX)) as u8
}

// --- Cycling Power Measurement (0x2A63) ---
//
// 2-byte flags, i16 instantaneous power, then optional sub-fields in fixed
// order: pedal balance (1), accumulated torque (2), wheel data (6),
// crank data (4).

const CPM_FLAG_PEDAL_BALANCE: u16 = 0x0001;
const CPM_FLAG_TORQUE: u16 = 0x0004;
const CPM_FLAG_WHEEL: u16 = 0x0010;
const CPM_FLAG_CRANK: u16 = 0x0020;

/// Decode instantaneous power from a power-measurement frame
///
/// Negative readings (coasting artifacts on some power meters) are clamped
/// to zero. A frame shorter than four bytes yields zero.
#[must_use]
pub fn decode_power(data: &[u8]) -> u16 {
    if data.len() < 4 {
        return 0;
    }
    let mut buf = &data[2..];
    let watts = buf.get_i16_le();
    watts.max(0) as u16
}

/// Offset of the optional sub-field block a power frame's flags gate
fn power_frame_offset(flags: u16, through_wheel: bool) -> usize {
    let mut offset = 4;
    if flags & CPM_FLAG_PEDAL_BALANCE != 0 {
        offset += 1;
    }
    if flags & CPM_FLAG_TORQUE != 0 {
        offset += 2;
    }
    if through_wheel && flags & CPM_FLAG_WHEEL != 0 {
        offset += 6;
    }
    offset
}

/// Decode wheel revolution data from a power-measurement frame
#[must_use]
pub fn decode_wheel_from_power(data: &[u8]) -> Option<WheelReading> {
    if data.len() < 2 {
        return None;
    }
    let flags = u16::from_le_bytes([data[0], data[1]]);
    if flags & CPM_FLAG_WHEEL == 0 {
        return None;
    }
    let offset = power_frame_offset(flags, false);
    read_wheel(data, offset)
}

/// Decode crank revolution data from a power-measurement frame
#[must_use]
pub fn decode_crank_from_power(data: &[u8]) -> Option<CrankReading> {
    if data.len() < 2 {
        return None;
    }
    let flags = u16::from_le_bytes([data[0], data[1]]);
    if flags & CPM_FLAG_CRANK == 0 {
        return None;
    }
    let offset = power_frame_offset(flags, true);
    read_crank(data, offset)
}

// --- CSC Measurement (0x2A5B) ---
//
// 1-byte flags: bit 0 wheel data present (6 bytes), bit 1 crank data
// present (4 bytes), wheel first.

const CSC_FLAG_WHEEL: u8 = 0x01;
const CSC_FLAG_CRANK: u8 = 0x02;

/// Decode wheel revolution data from a CSC measurement frame
#[must_use]
pub fn decode_wheel_from_csc(data: &[u8]) -> Option<WheelReading> {
    let flags = *data.first()?;
    if flags & CSC_FLAG_WHEEL == 0 {
        return None;
    }
    read_wheel(data, 1)
}

/// Decode crank revolution data from a CSC measurement frame
#[must_use]
pub fn decode_crank_from_csc(data: &[u8]) -> Option<CrankReading> {
    let flags = *data.first()?;
    if flags & CSC_FLAG_CRANK == 0 {
        return None;
    }
    let offset = if flags & CSC_FLAG_WHEEL != 0 { 7 } else { 1 };
    read_crank(data, offset)
}

/// Decode one raw notification into the readings it carries
///
/// A power-measurement frame can carry up to three readings (power plus
/// optional wheel and crank data); a CSC frame up to two. Unknown
/// characteristics and malformed frames yield an empty vector.
#[must_use]
pub fn decode_notification(uuid: Uuid, data: &[u8]) -> Vec<TelemetryReading> {
    let mut readings = Vec::with_capacity(3);

    if uuid == CYCLING_POWER_MEASUREMENT_UUID {
        if data.len() >= 4 {
            readings.push(TelemetryReading::Power {
                watts: decode_power(data),
            });
        }
        if let Some(wheel) = decode_wheel_from_power(data) {
            readings.push(TelemetryReading::Wheel(wheel));
        }
        if let Some(crank) = decode_crank_from_power(data) {
            readings.push(TelemetryReading::Crank(crank));
        }
    } else if uuid == CSC_MEASUREMENT_UUID {
        if let Some(wheel) = decode_wheel_from_csc(data) {
            readings.push(TelemetryReading::Wheel(wheel));
        }
        if let Some(crank) = decode_crank_from_csc(data) {
            readings.push(TelemetryReading::Crank(crank));
        }
    }

    readings
}

fn read_wheel(data: &[u8], offset: usize) -> Option<WheelReading> {
    let mut buf = data.get(offset..offset + 6)?;
    Some(WheelReading {
        revolutions: buf.get_u32_le(),
        event_time: buf.get_u16_le(),
    })
}

fn read_crank(data: &[u8], offset: usize) -> Option<CrankReading> {
    let mut buf = data.get(offset..offset + 4)?;
    Some(CrankReading {
        revolutions: buf.get_u16_le(),
        event_time: buf.get_u16_le(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_encoders() {
        assert_eq!(encode_opcode(0x01).as_ref(), &[0x01]);
        assert_eq!(encode_opcode_u8(0x04, 50).as_ref(), &[0x04, 50]);
        assert_eq!(encode_opcode_u16(0x05, 1000).as_ref(), &[0x05, 0xE8, 0x03]);
    }

    #[test]
    fn test_unlock_command() {
        assert_eq!(encode_unlock().as_ref(), &[0x20, 0xEE, 0xFC]);
    }

    #[test]
    fn test_resistance_mode_encoding() {
        assert_eq!(encode_resistance_mode(0.5).as_ref(), &[0x41, 50]);
        assert_eq!(encode_resistance_mode(0.0).as_ref(), &[0x41, 0]);
        assert_eq!(encode_resistance_mode(1.0).as_ref(), &[0x41, 100]);
        // Out-of-range fractions clamp
        assert_eq!(encode_resistance_mode(1.5).as_ref(), &[0x41, 100]);
        assert_eq!(encode_resistance_mode(-0.2).as_ref(), &[0x41, 0]);
    }

    #[test]
    fn test_simulation_grade_encoding() {
        let buf = encode_simulation_grade(8.0, 85.0, 0.004, 0.6);
        assert_eq!(buf.len(), 9);
        assert_eq!(buf[0], OP_SIM_MODE);
        // weight 85 kg x100 = 8500
        assert_eq!(&buf[1..3], &8500u16.to_le_bytes());
        // crr 0.004 x10000 = 40
        assert_eq!(&buf[3..5], &40u16.to_le_bytes());
        // cw 0.6 x1000 = 600
        assert_eq!(&buf[5..7], &600u16.to_le_bytes());
        // grade 8% x100 = 800
        assert_eq!(&buf[7..9], &800i16.to_le_bytes());
    }

    #[test]
    fn test_simulation_grade_clamps() {
        let buf = encode_simulation_grade(30.0, 500.0, 1.0, 9.0);
        assert_eq!(&buf[1..3], &20_000u16.to_le_bytes()); // 200 kg cap
        assert_eq!(&buf[3..5], &1000u16.to_le_bytes()); // crr cap 0.1
        assert_eq!(&buf[5..7], &2000u16.to_le_bytes()); // cw cap 2.0
        assert_eq!(&buf[7..9], &2000i16.to_le_bytes()); // grade cap 20%

        let downhill = encode_simulation_grade(-40.0, 85.0, 0.004, 0.6);
        assert_eq!(&downhill[7..9], &(-1500i16).to_le_bytes()); // grade floor -15%
    }

    #[test]
    fn test_ftms_resistance_encoding() {
        assert_eq!(encode_ftms_resistance(0.5).as_ref(), &[0x04, 50]);
        assert_eq!(encode_ftms_resistance(0.0).as_ref(), &[0x04, 0]);
        assert_eq!(encode_ftms_resistance(1.0).as_ref(), &[0x04, 100]);
        assert_eq!(encode_ftms_resistance(2.0).as_ref(), &[0x04, 100]);
    }

    #[test]
    fn test_ftms_simulation_encoding() {
        let buf = encode_ftms_simulation(-4.5, 0.004, 0.51, 0.0);
        assert_eq!(buf.len(), 7);
        assert_eq!(buf[0], FTMS_OP_SET_SIMULATION);
        assert_eq!(&buf[1..3], &0i16.to_le_bytes()); // no wind
        assert_eq!(&buf[3..5], &(-450i16).to_le_bytes()); // grade -4.5% x100
        assert_eq!(buf[5], 40); // crr x10000
        assert_eq!(buf[6], 51); // cw x100
    }

    #[test]
    fn test_decode_power() {
        // flags 0x0000, power 1000 W
        assert_eq!(decode_power(&[0x00, 0x00, 0xE8, 0x03]), 1000);
        // negative power clamps to zero
        assert_eq!(decode_power(&[0x00, 0x00, 0xFF, 0xFF]), 0);
        // short buffer decodes as zero
        assert_eq!(decode_power(&[0x00, 0x00, 0xE8]), 0);
        assert_eq!(decode_power(&[]), 0);
    }

    #[test]
    fn test_decode_wheel_from_csc() {
        let mut frame = vec![CSC_FLAG_WHEEL];
        frame.extend_from_slice(&1234u32.to_le_bytes());
        frame.extend_from_slice(&5000u16.to_le_bytes());

        let wheel = decode_wheel_from_csc(&frame).unwrap();
        assert_eq!(wheel.revolutions, 1234);
        assert_eq!(wheel.event_time, 5000);

        // flag unset: absent
        assert!(decode_wheel_from_csc(&[0x00, 1, 2, 3, 4, 5, 6]).is_none());
        // truncated: absent, not an error
        assert!(decode_wheel_from_csc(&frame[..5]).is_none());
        assert!(decode_wheel_from_csc(&[]).is_none());
    }

    #[test]
    fn test_decode_crank_from_csc() {
        // crank only
        let mut frame = vec![CSC_FLAG_CRANK];
        frame.extend_from_slice(&77u16.to_le_bytes());
        frame.extend_from_slice(&900u16.to_le_bytes());
        let crank = decode_crank_from_csc(&frame).unwrap();
        assert_eq!(crank.revolutions, 77);
        assert_eq!(crank.event_time, 900);

        // wheel + crank: crank shifted past the 6 wheel bytes
        let mut both = vec![CSC_FLAG_WHEEL | CSC_FLAG_CRANK];
        both.extend_from_slice(&1u32.to_le_bytes());
        both.extend_from_slice(&2u16.to_le_bytes());
        both.extend_from_slice(&77u16.to_le_bytes());
        both.extend_from_slice(&900u16.to_le_bytes());
        let crank = decode_crank_from_csc(&both).unwrap();
        assert_eq!(crank.revolutions, 77);
        assert_eq!(crank.event_time, 900);
    }

    #[test]
    fn test_decode_wheel_from_power_walks_flags() {
        // flags: pedal balance + torque + wheel
        let flags = CPM_FLAG_PEDAL_BALANCE | CPM_FLAG_TORQUE | CPM_FLAG_WHEEL;
        let mut frame = Vec::new();
        frame.extend_from_slice(&flags.to_le_bytes());
        frame.extend_from_slice(&250i16.to_le_bytes()); // power
        frame.push(50); // pedal balance
        frame.extend_from_slice(&0u16.to_le_bytes()); // torque
        frame.extend_from_slice(&4321u32.to_le_bytes()); // wheel revs
        frame.extend_from_slice(&1024u16.to_le_bytes()); // wheel time

        let wheel = decode_wheel_from_power(&frame).unwrap();
        assert_eq!(wheel.revolutions, 4321);
        assert_eq!(wheel.event_time, 1024);
    }

    #[test]
    fn test_decode_crank_from_power_offsets_past_wheel() {
        let flags = CPM_FLAG_WHEEL | CPM_FLAG_CRANK;
        let mut frame = Vec::new();
        frame.extend_from_slice(&flags.to_le_bytes());
        frame.extend_from_slice(&250i16.to_le_bytes());
        frame.extend_from_slice(&4321u32.to_le_bytes());
        frame.extend_from_slice(&1024u16.to_le_bytes());
        frame.extend_from_slice(&88u16.to_le_bytes()); // crank revs
        frame.extend_from_slice(&2048u16.to_le_bytes()); // crank time

        let crank = decode_crank_from_power(&frame).unwrap();
        assert_eq!(crank.revolutions, 88);
        assert_eq!(crank.event_time, 2048);

        // Same frame truncated just before the crank field: absent
        assert!(decode_crank_from_power(&frame[..frame.len() - 4]).is_none());
    }

    #[test]
    fn test_decode_notification_splits_power_frame() {
        let flags = CPM_FLAG_WHEEL | CPM_FLAG_CRANK;
        let mut frame = Vec::new();
        frame.extend_from_slice(&flags.to_le_bytes());
        frame.extend_from_slice(&250i16.to_le_bytes());
        frame.extend_from_slice(&4321u32.to_le_bytes());
        frame.extend_from_slice(&1024u16.to_le_bytes());
        frame.extend_from_slice(&88u16.to_le_bytes());
        frame.extend_from_slice(&2048u16.to_le_bytes());

        let readings = decode_notification(CYCLING_POWER_MEASUREMENT_UUID, &frame);
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0], TelemetryReading::Power { watts: 250 });
        assert!(matches!(readings[1], TelemetryReading::Wheel(w) if w.revolutions == 4321));
        assert!(matches!(readings[2], TelemetryReading::Crank(c) if c.revolutions == 88));
    }

    #[test]
    fn test_decode_notification_ignores_unknown_uuid() {
        let readings = decode_notification(Uuid::nil(), &[0x00, 0x00, 0xE8, 0x03]);
        assert!(readings.is_empty());
    }

    #[test]
    fn test_decode_absent_on_missing_flags() {
        let flags = 0u16;
        let mut frame = Vec::new();
        frame.extend_from_slice(&flags.to_le_bytes());
        frame.extend_from_slice(&250i16.to_le_bytes());
        assert!(decode_wheel_from_power(&frame).is_none());
        assert!(decode_crank_from_power(&frame).is_none());
    }
}
