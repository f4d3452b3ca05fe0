//! Test doubles for the hardware and collaborators the core talks to.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType as DigitalErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::i2c::{ErrorKind, Operation};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use embedded_hal_async::i2c::{ErrorType as I2cErrorType, I2c};

use crate::config::PowerConfig;
use crate::ina3221::{
    ADDR_CONFIG, ADDR_MANUFACTURER_ID, BUS_VOLTAGE_LSB_V, CONFIG_CONTINUOUS_ALL, CONFIG_RESET,
    Channel, I2C_ADDR, MANUFACTURER_ID, SHUNT_VOLTAGE_LSB_V,
};
use crate::sequencer::{EnumerationObserver, ShutdownRequester, StatusEvent, StatusSink};

pub fn approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
    let diff = a - b;
    diff <= tolerance && diff >= -tolerance
}

/// Configuration with timeouts short enough for tests.
pub fn fast_config() -> PowerConfig {
    PowerConfig {
        connection_timeout_ms: 60,
        handshake_poll_interval_ms: 2,
        lock_timeout_ms: 20,
        poll_interval_ms: 5,
        ..PowerConfig::default()
    }
}

fn encode_counts(value: f32, lsb: f32) -> u16 {
    let counts = value / lsb;
    let rounded = if counts >= 0.0 {
        counts + 0.5
    } else {
        counts - 0.5
    };
    let counts = rounded as i16;
    (counts << 3) as u16
}

// =============================================================================
// Sense chip
// =============================================================================

#[derive(Debug)]
pub struct FakeI2cError;

impl embedded_hal::i2c::Error for FakeI2cError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Register-level model of an INA3221.
pub struct FakeIna3221 {
    registers: [u16; 256],
    pointer: u8,
    fail: bool,
    ignore_config: bool,
    config_writes: heapless::Vec<u16, 16>,
}

impl FakeIna3221 {
    pub fn new() -> Self {
        let mut registers = [0u16; 256];
        registers[ADDR_CONFIG as usize] = CONFIG_CONTINUOUS_ALL;
        registers[ADDR_MANUFACTURER_ID as usize] = MANUFACTURER_ID;
        registers[0xFF] = 0x3220;
        Self {
            registers,
            pointer: 0,
            fail: false,
            ignore_config: false,
            config_writes: heapless::Vec::new(),
        }
    }

    pub fn set_register(&mut self, reg: u8, value: u16) {
        self.registers[reg as usize] = value;
    }

    pub fn set_channel(&mut self, channel: Channel, bus_volts: f32, shunt_volts: f32) {
        self.registers[channel.bus_register() as usize] =
            encode_counts(bus_volts, BUS_VOLTAGE_LSB_V);
        self.registers[channel.shunt_register() as usize] =
            encode_counts(shunt_volts, SHUNT_VOLTAGE_LSB_V);
    }

    pub fn fail_transactions(&mut self, fail: bool) {
        self.fail = fail;
    }

    pub fn ignore_config_writes(&mut self, ignore: bool) {
        self.ignore_config = ignore;
    }

    pub fn config_writes(&self) -> &[u16] {
        &self.config_writes
    }

    fn write_register(&mut self, reg: u8, value: u16) {
        if reg == ADDR_CONFIG {
            let _ = self.config_writes.push(value);
            if self.ignore_config {
                return;
            }
            self.registers[reg as usize] = if value & CONFIG_RESET != 0 {
                CONFIG_CONTINUOUS_ALL
            } else {
                value
            };
        } else {
            self.registers[reg as usize] = value;
        }
    }
}

impl I2cErrorType for FakeIna3221 {
    type Error = FakeI2cError;
}

impl I2c for FakeIna3221 {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.fail || address != I2C_ADDR {
            return Err(FakeI2cError);
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    if let Some((&reg, data)) = bytes.split_first() {
                        self.pointer = reg;
                        if let [hi, lo, ..] = data {
                            self.write_register(reg, u16::from_be_bytes([*hi, *lo]));
                        }
                    }
                }
                Operation::Read(buf) => {
                    let value = self.registers[self.pointer as usize].to_be_bytes();
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = value.get(i).copied().unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Output pin
// =============================================================================

/// Output pin whose level lives in a caller-owned cell.
pub struct FakePin<'a> {
    level: &'a Cell<bool>,
    writes: &'a Cell<u32>,
}

impl<'a> FakePin<'a> {
    pub fn new(level: &'a Cell<bool>, writes: &'a Cell<u32>) -> Self {
        Self { level, writes }
    }
}

impl DigitalErrorType for FakePin<'_> {
    type Error = Infallible;
}

impl OutputPin for FakePin<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.set(false);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.set(true);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

impl StatefulOutputPin for FakePin<'_> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.get())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.get())
    }
}

// =============================================================================
// PWM
// =============================================================================

pub struct FakePwm<'a> {
    duty: &'a Cell<u16>,
    max: u16,
}

impl<'a> FakePwm<'a> {
    pub fn new(duty: &'a Cell<u16>, max: u16) -> Self {
        Self { duty, max }
    }
}

impl PwmErrorType for FakePwm<'_> {
    type Error = Infallible;
}

impl SetDutyCycle for FakePwm<'_> {
    fn max_duty_cycle(&self) -> u16 {
        self.max
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty.set(duty);
        Ok(())
    }
}

// =============================================================================
// USB host
// =============================================================================

/// Scripted behaviour of the SBC as seen over USB.
pub struct UsbScript {
    available: Cell<bool>,
    enumerated: Cell<bool>,
    /// Number of enumeration polls after which the SBC shows up
    enumerate_after: Cell<Option<u32>>,
    polls: Cell<u32>,
    /// Whether a shutdown request makes the SBC drop off the bus
    drops_on_shutdown: Cell<bool>,
    shutdown_requests: Cell<u32>,
}

impl UsbScript {
    pub fn new() -> Self {
        Self {
            available: Cell::new(true),
            enumerated: Cell::new(false),
            enumerate_after: Cell::new(None),
            polls: Cell::new(0),
            drops_on_shutdown: Cell::new(true),
            shutdown_requests: Cell::new(0),
        }
    }

    pub fn enumerate_after(&self, polls: u32) -> &Self {
        self.enumerate_after.set(Some(polls));
        self
    }

    pub fn set_enumerated(&self, enumerated: bool) -> &Self {
        self.enumerated.set(enumerated);
        self
    }

    pub fn set_available(&self, available: bool) -> &Self {
        self.available.set(available);
        self
    }

    pub fn set_drops_on_shutdown(&self, drops: bool) -> &Self {
        self.drops_on_shutdown.set(drops);
        self
    }

    pub fn shutdown_requests(&self) -> u32 {
        self.shutdown_requests.get()
    }

    pub fn polls(&self) -> u32 {
        self.polls.get()
    }
}

impl EnumerationObserver for UsbScript {
    fn is_available(&self) -> bool {
        self.available.get()
    }

    fn is_peripheral_enumerated(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        if let Some(after) = self.enumerate_after.get() {
            if polls >= after {
                self.enumerated.set(true);
                self.enumerate_after.set(None);
            }
        }
        self.enumerated.get()
    }
}

pub struct ScriptedShutdown<'a>(pub &'a UsbScript);

impl ShutdownRequester for ScriptedShutdown<'_> {
    async fn request_graceful_shutdown(&mut self) {
        let script = self.0;
        script
            .shutdown_requests
            .set(script.shutdown_requests.get() + 1);
        if script.drops_on_shutdown.get() {
            script.enumerated.set(false);
        }
    }
}

// =============================================================================
// Status indicator
// =============================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: RefCell<heapless::Vec<StatusEvent, 16>>,
    low_power: RefCell<heapless::Vec<bool, 16>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> heapless::Vec<StatusEvent, 16> {
        self.events.borrow().clone()
    }

    pub fn low_power_changes(&self) -> heapless::Vec<bool, 16> {
        self.low_power.borrow().clone()
    }
}

impl StatusSink for RecordingSink {
    fn notify(&self, event: StatusEvent, _duration_ms: u32) {
        let _ = self.events.borrow_mut().push(event);
    }

    fn set_low_power_mode(&self, enabled: bool) {
        let _ = self.low_power.borrow_mut().push(enabled);
    }
}
