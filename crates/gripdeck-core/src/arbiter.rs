//! Power-saving mode and LED brightness arbitration

use embedded_hal::pwm::SetDutyCycle;
use log::{info, warn};

use crate::sequencer::StatusSink;
use crate::state::{BatteryData, ChargerData, PowerState};

/// Power saving is on while running from a battery at or below the threshold.
pub fn is_power_saving(battery: &BatteryData, charger: &ChargerData, threshold: u8) -> bool {
    !charger.connected && battery.percentage <= threshold as f32
}

/// Brightness actually applied for a requested brightness.
pub fn scale_brightness(requested: u8, power_saving: bool, divisor: u8) -> u8 {
    if power_saving && requested > 0 {
        requested / divisor.max(1)
    } else {
        requested
    }
}

/// Tracks the power-saving mode and reports changes only.
#[derive(Debug, Default)]
pub struct PowerSavingArbiter {
    active: bool,
}

impl PowerSavingArbiter {
    pub const fn new() -> Self {
        Self { active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record this tick's mode.
    ///
    /// # Returns
    /// `true` if the mode changed and the sink was told
    pub fn update<N: StatusSink>(&mut self, power_saving: bool, sink: &N) -> bool {
        if power_saving == self.active {
            return false;
        }
        self.active = power_saving;
        info!(
            "Power saving mode {}",
            if power_saving { "enabled" } else { "disabled" }
        );
        sink.set_low_power_mode(power_saving);
        true
    }
}

/// Sole owner of the LED PWM output.
///
/// Brightness requests from anywhere in the firmware go through here so the
/// power-saving reduction is always applied.
pub struct LedPower<'a, PWM> {
    pwm: PWM,
    state: &'a PowerState,
    enabled: bool,
    divisor: u8,
}

impl<'a, PWM> LedPower<'a, PWM>
where
    PWM: SetDutyCycle,
{
    pub fn new(mut pwm: PWM, state: &'a PowerState, divisor: u8) -> Self {
        if let Err(e) = pwm.set_duty_cycle_fully_off() {
            warn!("Failed to switch LEDs off: {:?}", e);
        }
        Self {
            pwm,
            state,
            enabled: false,
            divisor,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the LED brightness (0-255).
    ///
    /// A non-zero request enables the LEDs, zero disables them.
    ///
    /// # Returns
    /// The brightness actually applied
    pub async fn set_brightness(&mut self, requested: u8) -> u8 {
        self.enabled = requested > 0;

        let saving = self.state.is_power_saving().await;
        let applied = scale_brightness(requested, saving, self.divisor);

        if let Err(e) = self.pwm.set_duty_cycle_fraction(applied as u16, u8::MAX as u16) {
            warn!("Failed to set LED brightness: {:?}", e);
        }
        applied
    }

    pub async fn enable(&mut self, enable: bool) {
        self.enabled = enable;
        if !enable {
            self.set_brightness(0).await;
        }
    }
}
