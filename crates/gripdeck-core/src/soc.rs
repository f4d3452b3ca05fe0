//! Battery state-of-charge estimation
//!
//! A memoryless model: the percentage is fully determined by the battery
//! terminal voltage and current. The voltage is mapped through a piecewise
//! linear discharge curve, with a correction for the voltage sag of a cell
//! under heavy load.

use thiserror_no_std::Error;

/// Discharge current above which sag compensation applies (amps)
pub const SAG_CURRENT_THRESHOLD_A: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub voltage: f32,
    pub percentage: f32,
}

impl CurvePoint {
    pub const fn new(voltage: f32, percentage: f32) -> Self {
        Self {
            voltage,
            percentage,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveError {
    #[error("calibration curve needs at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("curve voltage does not increase at point {index}")]
    NotIncreasing { index: usize },
    #[error("curve percentage out of range at point {index}")]
    PercentageOutOfRange { index: usize },
}

/// Ordered (voltage, percentage) control points with strictly increasing
/// voltage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationCurve {
    points: &'static [CurvePoint],
}

impl CalibrationCurve {
    pub fn new(points: &'static [CurvePoint]) -> Result<Self, CurveError> {
        if points.len() < 2 {
            return Err(CurveError::TooFewPoints(points.len()));
        }
        for (index, point) in points.iter().enumerate() {
            if !(0.0..=100.0).contains(&point.percentage) {
                return Err(CurveError::PercentageOutOfRange { index });
            }
            if index > 0 && !(point.voltage > points[index - 1].voltage) {
                return Err(CurveError::NotIncreasing { index });
            }
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &'static [CurvePoint] {
        self.points
    }

    /// Percentage for a resting voltage.
    ///
    /// Below the first point this is the first point's percentage, at or
    /// above the last point it is 100.
    pub fn interpolate(&self, voltage: f32) -> f32 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if !voltage.is_finite() || voltage <= first.voltage {
            return first.percentage;
        }
        if voltage >= last.voltage {
            return 100.0;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if voltage <= hi.voltage {
                let ratio = (voltage - lo.voltage) / (hi.voltage - lo.voltage);
                return lo.percentage + ratio * (hi.percentage - lo.percentage);
            }
        }
        100.0
    }
}

// =============================================================================
// Built-in chemistries
// =============================================================================

pub static LIPO_POINTS: [CurvePoint; 10] = [
    CurvePoint::new(3.0, 0.0),
    CurvePoint::new(3.3, 5.0),
    CurvePoint::new(3.5, 15.0),
    CurvePoint::new(3.6, 25.0),
    CurvePoint::new(3.7, 40.0),
    CurvePoint::new(3.8, 60.0),
    CurvePoint::new(3.9, 75.0),
    CurvePoint::new(4.0, 85.0),
    CurvePoint::new(4.1, 95.0),
    CurvePoint::new(4.2, 100.0),
];

pub static LI_ION_POINTS: [CurvePoint; 10] = [
    CurvePoint::new(2.5, 0.0),
    CurvePoint::new(2.9, 5.0),
    CurvePoint::new(3.2, 15.0),
    CurvePoint::new(3.4, 25.0),
    CurvePoint::new(3.6, 40.0),
    CurvePoint::new(3.7, 60.0),
    CurvePoint::new(3.8, 75.0),
    CurvePoint::new(3.9, 85.0),
    CurvePoint::new(4.0, 95.0),
    CurvePoint::new(4.2, 100.0),
];

/// Cell chemistry fitted to the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryChemistry {
    #[default]
    LiPo,
    LiIon,
}

impl BatteryChemistry {
    pub fn curve(self) -> CalibrationCurve {
        let points: &'static [CurvePoint] = match self {
            BatteryChemistry::LiPo => &LIPO_POINTS,
            BatteryChemistry::LiIon => &LI_ION_POINTS,
        };
        // Both tables are strictly increasing and in range
        CalibrationCurve { points }
    }

    pub fn internal_resistance_ohms(self) -> f32 {
        match self {
            BatteryChemistry::LiPo => 0.04,
            BatteryChemistry::LiIon => 0.08,
        }
    }
}

/// Estimate the battery percentage from terminal voltage and current.
///
/// `current` is signed, positive while charging. When discharging harder
/// than [`SAG_CURRENT_THRESHOLD_A`], the voltage lost across the internal
/// resistance by the excess current is added back before interpolating.
///
/// Only the current beyond the threshold is compensated, not the full
/// `|current| * R` drop. The full drop would make the estimate jump by
/// `0.5 A * R` worth of curve at the threshold; the excess form keeps it
/// continuous there.
///
/// # Returns
/// A percentage clamped to `0.0..=100.0`
pub fn estimate_percentage(
    voltage: f32,
    current: f32,
    curve: &CalibrationCurve,
    internal_resistance_ohms: f32,
) -> f32 {
    let base = curve.interpolate(voltage);

    let estimate = if current < -SAG_CURRENT_THRESHOLD_A {
        let excess = -current - SAG_CURRENT_THRESHOLD_A;
        let compensated = curve.interpolate(voltage + excess * internal_resistance_ohms);
        let sag_delta = compensated - base;
        base + sag_delta
    } else {
        base
    };

    if estimate.is_nan() {
        return 0.0;
    }
    estimate.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::approx_eq;

    fn lipo() -> CalibrationCurve {
        BatteryChemistry::LiPo.curve()
    }

    #[test]
    fn test_below_first_point_clamps() {
        assert_eq!(estimate_percentage(2.7, 0.0, &lipo(), 0.04), 0.0);
        assert_eq!(estimate_percentage(3.0, 0.0, &lipo(), 0.04), 0.0);
    }

    #[test]
    fn test_at_or_above_last_point_is_full() {
        assert_eq!(estimate_percentage(4.2, 0.0, &lipo(), 0.04), 100.0);
        assert_eq!(estimate_percentage(4.35, 0.2, &lipo(), 0.04), 100.0);
    }

    #[test]
    fn test_linear_between_points() {
        assert!(approx_eq(lipo().interpolate(3.75), 50.0, 0.01));
        assert!(approx_eq(lipo().interpolate(3.4), 10.0, 0.01));
    }

    #[test]
    fn test_monotonic_in_voltage() {
        let curve = lipo();
        let mut previous = curve.interpolate(2.9);
        let mut v = 2.9;
        while v < 4.3 {
            let p = curve.interpolate(v);
            assert!(p >= previous, "{} dropped below {} at {}V", p, previous, v);
            previous = p;
            v += 0.01;
        }
    }

    #[test]
    fn test_no_sag_term_at_zero_current() {
        for v in [3.2, 3.55, 3.81, 4.05] {
            assert_eq!(estimate_percentage(v, 0.0, &lipo(), 0.04), lipo().interpolate(v));
        }
    }

    #[test]
    fn test_sag_compensation_raises_estimate_under_load() {
        let resting = estimate_percentage(3.65, -0.2, &lipo(), 0.04);
        let loaded = estimate_percentage(3.65, -2.5, &lipo(), 0.04);
        assert!(loaded > resting);
        // 2.0 A over the threshold across 40 mΩ is 80 mV
        assert!(approx_eq(loaded, lipo().interpolate(3.73), 0.01));
    }

    #[test]
    fn test_sag_continuous_at_threshold() {
        let curve = lipo();
        let just_below = estimate_percentage(3.65, -0.4999, &curve, 0.04);
        let just_above = estimate_percentage(3.65, -0.5001, &curve, 0.04);
        assert!(approx_eq(just_below, just_above, 0.01));
    }

    #[test]
    fn test_implausible_inputs_are_clamped() {
        assert_eq!(estimate_percentage(f32::NAN, 0.0, &lipo(), 0.04), 0.0);
        assert_eq!(estimate_percentage(-5.0, -40.0, &lipo(), 0.04), 0.0);
        assert_eq!(estimate_percentage(9.0, -40.0, &lipo(), 0.04), 100.0);
    }

    #[test]
    fn test_li_ion_curve_is_selectable() {
        let curve = BatteryChemistry::LiIon.curve();
        assert_eq!(curve.interpolate(2.5), 0.0);
        assert!(approx_eq(curve.interpolate(3.5), 32.5, 0.01));
        assert_eq!(BatteryChemistry::LiIon.internal_resistance_ohms(), 0.08);
    }

    #[test]
    fn test_builtin_curves_are_valid() {
        assert!(CalibrationCurve::new(&LIPO_POINTS).is_ok());
        assert!(CalibrationCurve::new(&LI_ION_POINTS).is_ok());
    }

    #[test]
    fn test_rejects_malformed_curves() {
        static SINGLE: [CurvePoint; 1] = [CurvePoint::new(3.0, 0.0)];
        static FLAT: [CurvePoint; 3] = [
            CurvePoint::new(3.0, 0.0),
            CurvePoint::new(3.5, 50.0),
            CurvePoint::new(3.5, 60.0),
        ];
        static OVERFLOW: [CurvePoint; 2] =
            [CurvePoint::new(3.0, 0.0), CurvePoint::new(4.2, 120.0)];

        assert_eq!(CalibrationCurve::new(&SINGLE), Err(CurveError::TooFewPoints(1)));
        assert_eq!(
            CalibrationCurve::new(&FLAT),
            Err(CurveError::NotIncreasing { index: 2 })
        );
        assert_eq!(
            CalibrationCurve::new(&OVERFLOW),
            Err(CurveError::PercentageOutOfRange { index: 1 })
        );
    }
}
