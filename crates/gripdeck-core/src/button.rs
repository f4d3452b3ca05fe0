//! Power button press classification
//!
//! The button is sampled at a fixed cadence by the firmware. Level changes
//! closer together than the debounce window are ignored; each release is
//! classified by how long the button was held.

/// Press-duration windows of the power button, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonTimings {
    pub debounce_ms: u32,
    pub short_press_min_ms: u32,
    pub short_press_max_ms: u32,
    pub long_press_min_ms: u32,
}

impl Default for ButtonTimings {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            short_press_min_ms: 50,
            short_press_max_ms: 2000,
            long_press_min_ms: 3000,
        }
    }
}

/// What a completed press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Short press: toggle SBC power through the regular sequencing path
    TogglePower,
    /// Long press: cut SBC power immediately
    HardShutdown,
}

pub struct PowerButton {
    timings: ButtonTimings,
    pressed: bool,
    last_change_ms: Option<u64>,
    pressed_at_ms: Option<u64>,
}

impl PowerButton {
    pub const fn new(timings: ButtonTimings) -> Self {
        Self {
            timings,
            pressed: false,
            last_change_ms: None,
            pressed_at_ms: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feed one sample of the button level.
    ///
    /// Returns an action when a release completes a press that falls into
    /// the short or long window. Releases in the gap between the two windows
    /// are ignored.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonAction> {
        if pressed == self.pressed {
            return None;
        }

        if let Some(last) = self.last_change_ms {
            if now_ms.saturating_sub(last) <= self.timings.debounce_ms as u64 {
                return None;
            }
        }

        self.pressed = pressed;
        self.last_change_ms = Some(now_ms);

        if pressed {
            log::debug!("Power button pressed");
            self.pressed_at_ms = Some(now_ms);
            return None;
        }

        let held_ms = now_ms.saturating_sub(self.pressed_at_ms.take()?);
        log::debug!("Power button released after {}ms", held_ms);
        self.classify(held_ms)
    }

    fn classify(&self, held_ms: u64) -> Option<ButtonAction> {
        let t = &self.timings;
        if held_ms >= t.short_press_min_ms as u64 && held_ms <= t.short_press_max_ms as u64 {
            Some(ButtonAction::TogglePower)
        } else if held_ms >= t.long_press_min_ms as u64 {
            Some(ButtonAction::HardShutdown)
        } else {
            None
        }
    }
}
