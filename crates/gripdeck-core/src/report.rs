//! Wire formats for reporting power status to the host
//!
//! Two encodings of a [`PowerSnapshot`]: the `POWER_INFO` text line answered
//! to the remote command protocol, and the fixed binary payload read by the
//! host-side battery driver.

use core::fmt::Write;

use heapless::String;
use log::warn;

use crate::state::PowerSnapshot;

/// Fits the longest line with saturated fields
pub const POWER_INFO_CAPACITY: usize = 128;

pub const STATUS_PAYLOAD_LEN: usize = 24;

/// `POWER_INFO:<battV>|<battA>|<secToEmpty>|<chgV>|<chgA>|<secToFull>|<pct>`
///
/// Volts and amps with three decimals, seconds as integers, percentage with
/// one decimal. The remote client parses this byte for byte.
pub fn power_info_line(snapshot: &PowerSnapshot) -> String<POWER_INFO_CAPACITY> {
    let battery = &snapshot.battery;
    let charger = &snapshot.charger;

    let mut line = String::new();
    if write!(
        line,
        "POWER_INFO:{:.3}|{:.3}|{}|{:.3}|{:.3}|{}|{:.1}",
        battery.voltage,
        battery.current,
        battery.seconds_to_empty,
        charger.voltage,
        charger.current,
        charger.seconds_to_full,
        battery.percentage
    )
    .is_err()
    {
        warn!("POWER_INFO line truncated at {} bytes", POWER_INFO_CAPACITY);
    }
    line
}

/// Little-endian status record answered to the host `GET_STATUS` request.
///
/// | offset | type | field                  |
/// |--------|------|------------------------|
/// | 0      | u16  | battery voltage, mV    |
/// | 2      | i16  | battery current, mA    |
/// | 4      | u32  | seconds to empty       |
/// | 8      | u16  | charger voltage, mV    |
/// | 10     | i16  | charger current, mA    |
/// | 12     | u32  | seconds to full        |
/// | 16     | u16  | charger power, mW      |
/// | 18     | u8   | charger connected, 0/1 |
/// | 19     | u8   | percentage (truncated) |
/// | 20     | u32  | uptime, s              |
///
/// Values outside a field's range saturate.
pub fn status_payload(snapshot: &PowerSnapshot) -> [u8; STATUS_PAYLOAD_LEN] {
    let battery = &snapshot.battery;
    let charger = &snapshot.charger;
    let uptime_s = u32::try_from(snapshot.timestamp_ms / 1000).unwrap_or(u32::MAX);

    let mut payload = [0u8; STATUS_PAYLOAD_LEN];
    payload[0..2].copy_from_slice(&((battery.voltage * 1000.0) as u16).to_le_bytes());
    payload[2..4].copy_from_slice(&((battery.current * 1000.0) as i16).to_le_bytes());
    payload[4..8].copy_from_slice(&battery.seconds_to_empty.to_le_bytes());
    payload[8..10].copy_from_slice(&((charger.voltage * 1000.0) as u16).to_le_bytes());
    payload[10..12].copy_from_slice(&((charger.current * 1000.0) as i16).to_le_bytes());
    payload[12..16].copy_from_slice(&charger.seconds_to_full.to_le_bytes());
    payload[16..18].copy_from_slice(&((charger.power * 1000.0) as u16).to_le_bytes());
    payload[18] = u8::from(charger.connected);
    payload[19] = battery.percentage as u8;
    payload[20..24].copy_from_slice(&uptime_s.to_le_bytes());
    payload
}
