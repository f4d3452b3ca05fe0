//! Time-to-full and time-to-empty estimation
//!
//! Both estimates convert a current into a rate in percent per hour against
//! the pack capacity, then divide the remaining percentage by that rate.

/// At or above this percentage the battery counts as full
pub const FULL_PERCENTAGE_THRESHOLD: f32 = 99.0;

/// At or below this percentage the battery counts as empty
pub const EMPTY_PERCENTAGE_FLOOR: f32 = 1.0;

/// Currents at or below this magnitude are treated as zero (amps)
pub const CURRENT_NOISE_FLOOR_A: f32 = 0.001;

const SECONDS_PER_HOUR: f32 = 3600.0;

/// Pack parameters the estimates depend on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeModel {
    pub capacity_mah: u32,
    pub min_charging_voltage: f32,
    /// Draw assumed on battery when the sensed current reads near zero
    pub assumed_quiescent_current_a: f32,
}

impl TimeModel {
    fn seconds_for(&self, current_a: f32, remaining_percentage: f32) -> u32 {
        if self.capacity_mah == 0 {
            return 0;
        }
        let percent_per_hour = current_a * 1000.0 / self.capacity_mah as f32 * 100.0;
        if !(percent_per_hour > 0.0) {
            return 0;
        }
        let seconds = remaining_percentage / percent_per_hour * SECONDS_PER_HOUR;
        // `as` saturates, NaN maps to 0
        seconds as u32
    }

    /// Seconds until the battery is full, or 0 when it is not charging.
    ///
    /// `battery_current` is signed, positive while the battery gains charge.
    pub fn seconds_to_full(
        &self,
        charger_current: f32,
        charger_voltage: f32,
        battery_current: f32,
        percentage: f32,
    ) -> u32 {
        if charger_voltage < self.min_charging_voltage
            || charger_current <= CURRENT_NOISE_FLOOR_A
            || percentage >= FULL_PERCENTAGE_THRESHOLD
        {
            return 0;
        }

        let effective = if battery_current >= 0.0 {
            battery_current
        } else {
            // The load eats part of what the charger supplies
            charger_current + battery_current
        };
        if effective <= CURRENT_NOISE_FLOOR_A {
            return 0;
        }

        self.seconds_for(effective, 100.0 - percentage.max(0.0))
    }

    /// Seconds until the battery is empty, or 0 when it is not discharging.
    pub fn seconds_to_empty(
        &self,
        charger_current: f32,
        charger_voltage: f32,
        battery_current: f32,
        percentage: f32,
    ) -> u32 {
        if percentage <= EMPTY_PERCENTAGE_FLOOR {
            return 0;
        }

        let charger_active = charger_voltage >= self.min_charging_voltage
            && charger_current > CURRENT_NOISE_FLOOR_A;

        let draw = if battery_current < -CURRENT_NOISE_FLOOR_A {
            -battery_current
        } else if charger_active {
            return 0;
        } else {
            self.assumed_quiescent_current_a
        };

        self.seconds_for(draw, percentage.min(100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerConfig;

    fn model() -> TimeModel {
        PowerConfig::default().time_model()
    }

    fn assert_near(actual: u32, expected: u32) {
        assert!(actual.abs_diff(expected) <= 2, "{} != {}", actual, expected);
    }

    #[test]
    fn test_full_needs_charger_voltage() {
        let m = model();
        assert_eq!(m.seconds_to_full(0.5, 3.99, 0.4, 50.0), 0);
        assert!(m.seconds_to_full(0.5, 4.0, 0.4, 50.0) > 0);
    }

    #[test]
    fn test_full_conversion() {
        // 0.45 A into 4500 mAh is 10 %/h, 50 % remaining is 5 h
        assert_near(model().seconds_to_full(0.6, 5.0, 0.45, 50.0), 18_000);
    }

    #[test]
    fn test_full_when_load_offsets_charger() {
        // Battery still discharging: net = 0.9 - 0.45 = 0.45 A
        assert_near(model().seconds_to_full(0.9, 5.0, -0.45, 50.0), 18_000);
        // Load exceeds supply, never fills
        assert_eq!(model().seconds_to_full(0.3, 5.0, -0.45, 50.0), 0);
    }

    #[test]
    fn test_full_zero_when_nearly_full_or_no_current() {
        let m = model();
        assert_eq!(m.seconds_to_full(0.5, 5.0, 0.4, 99.0), 0);
        assert_eq!(m.seconds_to_full(0.0, 5.0, 0.4, 50.0), 0);
        assert_eq!(m.seconds_to_full(-0.2, 5.0, 0.4, 50.0), 0);
    }

    #[test]
    fn test_empty_conversion() {
        // 0.9 A out of 4500 mAh is 20 %/h, 40 % left is 2 h
        assert_near(model().seconds_to_empty(0.0, 0.0, -0.9, 40.0), 7_200);
    }

    #[test]
    fn test_empty_zero_at_floor_regardless_of_current() {
        let m = model();
        for current in [-2.0, -0.1, 0.0, 0.3] {
            assert_eq!(m.seconds_to_empty(0.0, 0.0, current, 1.0), 0);
            assert_eq!(m.seconds_to_empty(0.0, 0.0, current, 0.5), 0);
        }
    }

    #[test]
    fn test_empty_with_charger_only_while_discharging() {
        let m = model();
        assert_eq!(m.seconds_to_empty(0.5, 5.0, 0.2, 60.0), 0);
        assert_near(m.seconds_to_empty(0.5, 5.0, -0.9, 40.0), 7_200);
    }

    #[test]
    fn test_empty_falls_back_to_quiescent_draw() {
        // 0.05 A out of 4500 mAh: 90 h for 100 %, 45 h for 50 %
        let seconds = model().seconds_to_empty(0.0, 0.0, 0.0, 50.0);
        assert!(seconds > 161_000 && seconds < 163_000, "{}", seconds);
    }
}
