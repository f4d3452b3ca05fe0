//! Status LED patterns
//!
//! The power manager reports transitions through [`ChannelStatusSink`]; the
//! status task drains [`STATUS_CHANNEL`] and blinks the LED through
//! [`LedPower`], which applies the power-saving brightness reduction.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::pwm::SetDutyCycle;
use gripdeck_core::arbiter::LedPower;
use gripdeck_core::sequencer::{StatusEvent, StatusSink};
use log::{info, warn};

/// Brightness while no pattern is playing
pub const IDLE_BRIGHTNESS: u8 = 64;

pub const BLINK_BRIGHTNESS: u8 = 255;

#[derive(Debug, Clone, Copy)]
pub enum StatusMessage {
    Event(StatusEvent, u32),
    LowPower(bool),
}

pub static STATUS_CHANNEL: Channel<CriticalSectionRawMutex, StatusMessage, 8> = Channel::new();

/// Queues status messages without waiting
pub struct ChannelStatusSink;

impl ChannelStatusSink {
    fn send(&self, message: StatusMessage) {
        if STATUS_CHANNEL.try_send(message).is_err() {
            warn!("Status queue full, dropping {:?}", message);
        }
    }
}

impl StatusSink for ChannelStatusSink {
    fn notify(&self, event: StatusEvent, duration_ms: u32) {
        self.send(StatusMessage::Event(event, duration_ms));
    }

    fn set_low_power_mode(&self, enabled: bool) {
        self.send(StatusMessage::LowPower(enabled));
    }
}

/// Half-period of the blink pattern for an event
fn blink_half_period(event: StatusEvent) -> Duration {
    match event {
        StatusEvent::PowerOn => Duration::from_millis(500),
        StatusEvent::PowerOff => Duration::from_millis(250),
        StatusEvent::LowBattery => Duration::from_millis(100),
        StatusEvent::Shutdown => Duration::from_millis(50),
    }
}

async fn blink<PWM: SetDutyCycle>(led: &mut LedPower<'_, PWM>, event: StatusEvent, duration_ms: u32) {
    let half_period = blink_half_period(event);
    let until = Instant::now() + Duration::from_millis(duration_ms as u64);
    let mut lit = false;

    while Instant::now() < until {
        lit = !lit;
        led.set_brightness(if lit { BLINK_BRIGHTNESS } else { 0 })
            .await;
        Timer::after(half_period).await;
    }
}

/// Play status messages on the LED forever
pub async fn run_status_led<PWM: SetDutyCycle>(mut led: LedPower<'_, PWM>) -> ! {
    led.set_brightness(IDLE_BRIGHTNESS).await;
    loop {
        match STATUS_CHANNEL.receive().await {
            StatusMessage::Event(event, duration_ms) => {
                blink(&mut led, event, duration_ms).await;
            }
            StatusMessage::LowPower(enabled) => {
                info!("LED power saving {}", if enabled { "on" } else { "off" });
            }
        }
        // Re-applied so the current power-saving scale takes effect
        led.set_brightness(IDLE_BRIGHTNESS).await;
    }
}
