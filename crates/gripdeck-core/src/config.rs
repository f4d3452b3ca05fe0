//! Power-management configuration
//!
//! `PowerConfig::default()` reproduces the constants of the GripDeck board
//! (4500 mAh LiPo pack, 0.1 Ω shunts, 15 s USB handshake).

use embassy_time::Duration;
use thiserror_no_std::Error;

use crate::button::ButtonTimings;
use crate::estimate::TimeModel;
use crate::soc::BatteryChemistry;

/// Smallest accepted shunt; keeps full-scale current within the report formats
pub const MIN_SHUNT_RESISTANCE_OHMS: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerConfig {
    /// Minimum battery percentage to allow (and keep) the SBC powered
    pub min_startup_percentage: u8,
    /// Battery percentage at or below which power-saving mode engages
    pub saving_threshold_percentage: u8,
    pub battery_capacity_mah: u32,
    /// Minimum input voltage considered a connected charger
    pub min_charging_voltage: f32,
    pub shunt_resistance_ohms: f32,
    /// Discharge curve and internal resistance of the fitted cell
    pub chemistry: BatteryChemistry,
    /// How long the sequencer waits for USB enumeration changes
    pub connection_timeout_ms: u32,
    pub handshake_poll_interval_ms: u32,
    /// Bound on waiting for the shared snapshot lock
    pub lock_timeout_ms: u32,
    /// Cadence of the telemetry poll
    pub poll_interval_ms: u32,
    /// Draw assumed when the battery current reads near zero with no charger.
    /// Tunable, not derived from the hardware.
    pub assumed_quiescent_current_a: f32,
    pub led_power_save_divisor: u8,
    pub status_blink_duration_ms: u32,
    pub button: ButtonTimings,
    /// Rewrite the sense chip configuration register at start-up
    pub configure_chip_on_init: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            min_startup_percentage: 5,
            saving_threshold_percentage: 15,
            battery_capacity_mah: 4500,
            min_charging_voltage: 4.0,
            shunt_resistance_ohms: 0.1,
            chemistry: BatteryChemistry::LiPo,
            connection_timeout_ms: 15_000,
            handshake_poll_interval_ms: 100,
            lock_timeout_ms: 100,
            poll_interval_ms: 1500,
            assumed_quiescent_current_a: 0.05,
            led_power_save_divisor: 4,
            status_blink_duration_ms: 3000,
            button: ButtonTimings::default(),
            configure_chip_on_init: true,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("percentage threshold {0} is above 100")]
    ThresholdOutOfRange(u8),
    #[error("battery capacity must be non-zero")]
    ZeroCapacity,
    #[error("shunt resistance must be at least 1 mΩ")]
    InvalidShuntResistance,
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
    #[error("LED power-save divisor must be non-zero")]
    ZeroDivisor,
    #[error("button press windows overlap")]
    InconsistentButtonTimings,
}

impl PowerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for threshold in [self.min_startup_percentage, self.saving_threshold_percentage] {
            if threshold > 100 {
                return Err(ConfigError::ThresholdOutOfRange(threshold));
            }
        }
        if self.battery_capacity_mah == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !(self.shunt_resistance_ohms >= MIN_SHUNT_RESISTANCE_OHMS) {
            return Err(ConfigError::InvalidShuntResistance);
        }
        for (name, value) in [
            ("connection timeout", self.connection_timeout_ms),
            ("handshake poll interval", self.handshake_poll_interval_ms),
            ("lock timeout", self.lock_timeout_ms),
            ("poll interval", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if self.led_power_save_divisor == 0 {
            return Err(ConfigError::ZeroDivisor);
        }
        let b = &self.button;
        if b.short_press_min_ms > b.short_press_max_ms || b.short_press_max_ms >= b.long_press_min_ms
        {
            return Err(ConfigError::InconsistentButtonTimings);
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms as u64)
    }

    pub fn handshake_poll_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_interval_ms as u64)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    /// Parameters of the time-remaining estimator
    pub fn time_model(&self) -> TimeModel {
        TimeModel {
            capacity_mah: self.battery_capacity_mah,
            min_charging_voltage: self.min_charging_voltage,
            assumed_quiescent_current_a: self.assumed_quiescent_current_a,
        }
    }
}
