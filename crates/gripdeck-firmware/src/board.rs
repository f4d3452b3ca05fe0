//! Pin map and peripheral bring-up of the GripDeck controller board

use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, TimerIFace};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::time::Rate;
use esp_hal::Async;
use embedded_hal::pwm::{ErrorKind, ErrorType, SetDutyCycle};
use log::{info, warn};
use static_cell::StaticCell;

// =============================================================================
// Pin Map
// =============================================================================
//
// GPIO6  - SBC power enable (active high)
// GPIO7  - status LED (LEDC PWM)
// GPIO8  - I2C SDA (INA3221)
// GPIO9  - I2C SCL (INA3221)
// GPIO11 - power button (active low, internal pull-up)

/// I2C clock for the sense chip
pub const I2C_FREQUENCY_KHZ: u32 = 100;

/// LED PWM carrier frequency
pub const LED_PWM_FREQUENCY_KHZ: u32 = 5;

/// Power-enable output of the SBC, driven low until the manager takes it
pub fn sbc_power_pin(pin: esp_hal::peripherals::GPIO6<'static>) -> Output<'static> {
    Output::new(pin, Level::Low, OutputConfig::default())
}

pub fn power_button(pin: esp_hal::peripherals::GPIO11<'static>) -> Input<'static> {
    Input::new(pin, InputConfig::default().with_pull(Pull::Up))
}

/// Create the I2C bus the INA3221 sits on
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO8<'static>,
    scl: esp_hal::peripherals::GPIO9<'static>,
) -> Result<I2c<'static, Async>, esp_hal::i2c::master::ConfigError> {
    Ok(I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(I2C_FREQUENCY_KHZ)),
    )?
    .with_sda(sda)
    .with_scl(scl)
    .into_async())
}

// =============================================================================
// Status LED
// =============================================================================

/// LEDC channel error wrapped for the embedded-hal PWM traits
#[derive(Debug)]
pub struct LedError(pub channel::Error);

impl embedded_hal::pwm::Error for LedError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Status LED on an LEDC channel, duty set in whole percent
pub struct StatusLed {
    channel: channel::Channel<'static, LowSpeed>,
}

impl ErrorType for StatusLed {
    type Error = LedError;
}

impl SetDutyCycle for StatusLed {
    fn max_duty_cycle(&self) -> u16 {
        100
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.channel
            .set_duty(duty.min(100) as u8)
            .map_err(LedError)
    }
}

/// Configure LEDC timer 0 and channel 0 for the status LED
pub fn status_led(
    ledc: esp_hal::peripherals::LEDC<'static>,
    pin: esp_hal::peripherals::GPIO7<'static>,
) -> Option<StatusLed> {
    static LEDC: StaticCell<Ledc<'static>> = StaticCell::new();
    static LED_TIMER: StaticCell<timer::Timer<'static, LowSpeed>> = StaticCell::new();

    let ledc = LEDC.init(Ledc::new(ledc));
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

    let led_timer = LED_TIMER.init(ledc.timer::<LowSpeed>(timer::Number::Timer0));
    if let Err(e) = led_timer.configure(timer::config::Config {
        duty: timer::config::Duty::Duty8Bit,
        clock_source: timer::LSClockSource::APBClk,
        frequency: Rate::from_khz(LED_PWM_FREQUENCY_KHZ),
    }) {
        warn!("Failed to configure LED timer: {:?}", e);
        return None;
    }

    let mut channel = ledc.channel(channel::Number::Channel0, pin);
    if let Err(e) = channel.configure(channel::config::Config {
        timer: &*led_timer,
        duty_pct: 0,
        drive_mode: esp_hal::gpio::DriveMode::PushPull,
    }) {
        warn!("Failed to configure LED channel: {:?}", e);
        return None;
    }

    info!("Status LED ready");
    Some(StatusLed { channel })
}
