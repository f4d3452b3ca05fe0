//! Desktop simulator for the GripDeck power-management core.
//!
//! Runs the real `PowerManager` and `PowerMonitor` against a simulated
//! INA3221, a battery/charger model and a simulated SBC that enumerates over
//! USB some time after it is powered. Simulated time runs faster than the
//! wall clock: every poll advances the battery model by
//! [`SIM_MINUTES_PER_TICK`].
//!
//! # Scenario
//!
//! | Tick | Event                                   |
//! |------|-----------------------------------------|
//! | 1    | short button press powers the SBC on    |
//! | 3    | charger plugged in                      |
//! | 9    | charger unplugged                       |
//! | ...  | battery drains into power saving        |
//! | ...  | low-battery cutoff shuts the SBC down   |
//! | end  | long button press (hard shutdown)       |
//!
//! Set `RUST_LOG=debug` to see every snapshot and the host status payload.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::{ErrorType as DigitalErrorType, OutputPin, StatefulOutputPin};
use embedded_hal::i2c::Operation;
use embedded_hal_async::i2c::{ErrorType as I2cErrorType, I2c};
use log::{debug, error, info};

use gripdeck_core::button::{ButtonAction, PowerButton};
use gripdeck_core::channels::{BATTERY_CHANNEL, CHARGER_CHANNEL, ChannelReader};
use gripdeck_core::ina3221::{
    ADDR_CONFIG, ADDR_DIE_ID, ADDR_MANUFACTURER_ID, BUS_VOLTAGE_LSB_V, CONFIG_CONTINUOUS_ALL,
    CONFIG_RESET, Ina3221, MANUFACTURER_ID, SHUNT_VOLTAGE_LSB_V,
};
use gripdeck_core::report::{power_info_line, status_payload};
use gripdeck_core::sequencer::{EnumerationObserver, ShutdownRequester, StatusEvent, StatusSink};
use gripdeck_core::soc::{BatteryChemistry, CurvePoint};
use gripdeck_core::{PowerConfig, PowerManager, PowerMonitor};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Battery model time covered by one poll
const SIM_MINUTES_PER_TICK: f32 = 10.0;

const START_PERCENTAGE: f32 = 38.0;

/// Draw of the SBC while powered (amps)
const SBC_LOAD_A: f32 = 1.2;

/// Draw of the controller alone (amps)
const IDLE_LOAD_A: f32 = 0.05;

/// Current delivered by a plugged-in charger (amps)
const CHARGE_CURRENT_A: f32 = 1.5;

const CHARGER_VOLTAGE_V: f32 = 5.1;

/// How long the SBC takes from power-on to USB enumeration
const SBC_BOOT_TIME: Duration = Duration::from_millis(800);

/// How long the SBC OS takes to shut down after the power key
const SBC_SHUTDOWN_TIME: Duration = Duration::from_millis(400);

const PLUG_TICK: u32 = 3;
const UNPLUG_TICK: u32 = 9;
const MAX_TICKS: u32 = 40;

// ---------------------------------------------------------------------------
// Battery and charger model
// ---------------------------------------------------------------------------

struct Board {
    /// True state of charge, percent
    charge: f32,
    charger_plugged: bool,
    sbc_power: Rc<Cell<bool>>,
    capacity_mah: f32,
    curve: &'static [CurvePoint],
    internal_resistance_ohms: f32,
}

impl Board {
    fn new(config: &PowerConfig, sbc_power: Rc<Cell<bool>>) -> Self {
        Self {
            charge: START_PERCENTAGE,
            charger_plugged: false,
            sbc_power,
            capacity_mah: config.battery_capacity_mah as f32,
            curve: config.chemistry.curve().points(),
            internal_resistance_ohms: config.chemistry.internal_resistance_ohms(),
        }
    }

    fn charger_current(&self) -> f32 {
        if self.charger_plugged && self.charge < 100.0 {
            CHARGE_CURRENT_A
        } else {
            0.0
        }
    }

    fn charger_voltage(&self) -> f32 {
        if self.charger_plugged {
            CHARGER_VOLTAGE_V
        } else {
            0.0
        }
    }

    /// Signed battery current, positive while charging
    fn battery_current(&self) -> f32 {
        let load = if self.sbc_power.get() {
            SBC_LOAD_A
        } else {
            IDLE_LOAD_A
        };
        self.charger_current() - load
    }

    /// Open-circuit voltage for the true charge, plus the drop across the
    /// internal resistance
    fn battery_voltage(&self) -> f32 {
        let ocv = self
            .curve
            .windows(2)
            .find(|pair| self.charge <= pair[1].percentage)
            .map(|pair| {
                let (lo, hi) = (pair[0], pair[1]);
                let ratio = (self.charge - lo.percentage) / (hi.percentage - lo.percentage);
                lo.voltage + ratio * (hi.voltage - lo.voltage)
            })
            .unwrap_or_else(|| self.curve[self.curve.len() - 1].voltage);
        ocv + self.battery_current() * self.internal_resistance_ohms
    }

    fn advance(&mut self, minutes: f32) {
        let delta_mah = self.battery_current() * 1000.0 * minutes / 60.0;
        self.charge = (self.charge + delta_mah / self.capacity_mah * 100.0).clamp(0.0, 100.0);
    }
}

// ---------------------------------------------------------------------------
// Simulated sense chip
// ---------------------------------------------------------------------------

fn encode(value: f32, lsb: f32) -> u16 {
    let counts = (value / lsb).round() as i16;
    (counts << 3) as u16
}

struct SimIna3221 {
    board: Rc<RefCell<Board>>,
    shunt_resistance_ohms: f32,
    pointer: u8,
    config: u16,
}

impl SimIna3221 {
    fn new(board: Rc<RefCell<Board>>, shunt_resistance_ohms: f32) -> Self {
        Self {
            board,
            shunt_resistance_ohms,
            pointer: 0,
            config: CONFIG_CONTINUOUS_ALL,
        }
    }

    fn read(&self, reg: u8) -> u16 {
        let board = self.board.borrow();
        let r = self.shunt_resistance_ohms;
        match reg {
            ADDR_CONFIG => self.config,
            ADDR_MANUFACTURER_ID => MANUFACTURER_ID,
            ADDR_DIE_ID => 0x3220,
            reg if reg == BATTERY_CHANNEL.bus_register() => {
                encode(board.battery_voltage(), BUS_VOLTAGE_LSB_V)
            }
            reg if reg == BATTERY_CHANNEL.shunt_register() => {
                encode(board.battery_current() * r, SHUNT_VOLTAGE_LSB_V)
            }
            reg if reg == CHARGER_CHANNEL.bus_register() => {
                encode(board.charger_voltage(), BUS_VOLTAGE_LSB_V)
            }
            reg if reg == CHARGER_CHANNEL.shunt_register() => {
                encode(board.charger_current() * r, SHUNT_VOLTAGE_LSB_V)
            }
            _ => 0,
        }
    }

    fn write(&mut self, reg: u8, value: u16) {
        if reg == ADDR_CONFIG {
            self.config = if value & CONFIG_RESET != 0 {
                CONFIG_CONTINUOUS_ALL
            } else {
                value
            };
        }
    }
}

impl I2cErrorType for SimIna3221 {
    type Error = Infallible;
}

impl I2c for SimIna3221 {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    if let Some((&reg, data)) = bytes.split_first() {
                        self.pointer = reg;
                        if let [hi, lo, ..] = data {
                            self.write(reg, u16::from_be_bytes([*hi, *lo]));
                        }
                    }
                }
                Operation::Read(buf) => {
                    let value = SimIna3221::read(self, self.pointer).to_be_bytes();
                    for (byte, v) in buf.iter_mut().zip(value) {
                        *byte = v;
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SBC power pin and USB host
// ---------------------------------------------------------------------------

struct SimPin(Rc<Cell<bool>>);

impl DigitalErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set(true);
        Ok(())
    }
}

impl StatefulOutputPin for SimPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.get())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.get())
    }
}

/// SBC that enumerates the controller once it has booted
struct SimUsbHost {
    power: Rc<Cell<bool>>,
    powered_at: Cell<Option<Instant>>,
    shutdown_at: Cell<Option<Instant>>,
}

impl SimUsbHost {
    fn new(power: Rc<Cell<bool>>) -> Self {
        Self {
            power,
            powered_at: Cell::new(None),
            shutdown_at: Cell::new(None),
        }
    }
}

impl EnumerationObserver for SimUsbHost {
    fn is_peripheral_enumerated(&self) -> bool {
        if !self.power.get() {
            self.powered_at.set(None);
            self.shutdown_at.set(None);
            return false;
        }

        let now = Instant::now();
        let powered_at = match self.powered_at.get() {
            Some(at) => at,
            None => {
                self.powered_at.set(Some(now));
                now
            }
        };
        let booted = now.duration_since(powered_at) >= SBC_BOOT_TIME;
        let halted = self
            .shutdown_at
            .get()
            .is_some_and(|at| now.duration_since(at) >= SBC_SHUTDOWN_TIME);
        booted && !halted
    }
}

struct SimShutdown<'a>(&'a SimUsbHost);

impl ShutdownRequester for SimShutdown<'_> {
    async fn request_graceful_shutdown(&mut self) {
        info!("[host] power key received, shutting down");
        self.0.shutdown_at.set(Some(Instant::now()));
    }
}

struct LogSink;

impl StatusSink for LogSink {
    fn notify(&self, event: StatusEvent, duration_ms: u32) {
        info!("[status] {:?} for {}ms", event, duration_ms);
    }

    fn set_low_power_mode(&self, enabled: bool) {
        info!("[status] low power mode {}", if enabled { "on" } else { "off" });
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn press_button(button: &mut PowerButton, held_ms: u64) -> Option<ButtonAction> {
    let pressed_at = Instant::now().as_millis();
    button.update(true, pressed_at);
    button.update(false, pressed_at + held_ms)
}

async fn handle_button<P, U, R, N>(manager: &PowerManager<P, U, R, N>, action: ButtonAction)
where
    P: OutputPin + StatefulOutputPin,
    U: EnumerationObserver,
    R: ShutdownRequester,
    N: StatusSink,
{
    match action {
        ButtonAction::TogglePower => {
            let on = !manager.is_power_asserted();
            let ok = manager.try_set_power(on).await;
            info!(
                "Power {} {}",
                if on { "on" } else { "off" },
                if ok { "succeeded" } else { "failed" }
            );
        }
        ButtonAction::HardShutdown => manager.hard_shutdown(),
    }
}

async fn run() {
    let config = PowerConfig {
        chemistry: BatteryChemistry::LiPo,
        connection_timeout_ms: 3000,
        handshake_poll_interval_ms: 50,
        poll_interval_ms: 250,
        ..PowerConfig::default()
    };

    let sbc_power = Rc::new(Cell::new(false));
    let board = Rc::new(RefCell::new(Board::new(&config, sbc_power.clone())));
    let host = SimUsbHost::new(sbc_power.clone());
    let sink = LogSink;

    let manager = match PowerManager::new(
        config,
        SimPin(sbc_power.clone()),
        &host,
        SimShutdown(&host),
        &sink,
    ) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Invalid power configuration: {}", e);
            return;
        }
    };

    let chip = Ina3221::new(
        SimIna3221::new(board.clone(), config.shunt_resistance_ohms),
        config.shunt_resistance_ohms,
    );
    let mut monitor = PowerMonitor::new(ChannelReader::new(chip));
    let identity = monitor.init(config.configure_chip_on_init).await;
    info!("Sense chip: {:?}", identity);

    let mut button = PowerButton::new(config.button);

    for tick in 0..MAX_TICKS {
        if let Some(snapshot) = monitor.tick(&manager).await {
            info!("{}", power_info_line(&snapshot));
            debug!("Status payload: {:02x?}", status_payload(&snapshot));
        }

        match tick {
            1 => {
                info!("Short press on the power button");
                if let Some(action) = press_button(&mut button, 300) {
                    handle_button(&manager, action).await;
                }
            }
            PLUG_TICK => {
                info!("Charger plugged in");
                board.borrow_mut().charger_plugged = true;
            }
            UNPLUG_TICK => {
                info!("Charger unplugged");
                board.borrow_mut().charger_plugged = false;
            }
            _ => {}
        }

        if tick > UNPLUG_TICK && !manager.is_power_asserted() {
            info!("SBC is off after {} ticks", tick + 1);
            break;
        }

        board.borrow_mut().advance(SIM_MINUTES_PER_TICK);
        Timer::after(config.poll_interval()).await;
    }

    info!("Long press on the power button");
    if let Some(action) = press_button(&mut button, 3500) {
        handle_button(&manager, action).await;
    }

    let snapshot = manager.snapshot().await;
    info!("Final state:\n{}", snapshot);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    block_on(run());
}
