//! Power manager and periodic power monitor
//!
//! [`PowerManager`] owns the SBC power-enable output and the shared snapshot
//! and exposes the power API used by the button handler and the command
//! protocol. [`PowerMonitor`] is the periodic poller: the only writer of the
//! snapshot and the only user of the sense chip.
//!
//! Sequencing calls (`try_set_power`) go through a single async mutex, so
//! at most one power-on or power-off sequence runs at a time. They block for
//! up to the configured connection timeout while the SBC boots or shuts down
//! and cannot be cancelled once started.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{Instant, Ticker, Timer};
use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use embedded_hal_async::i2c::I2c;
use heapless::String;
use log::{debug, error, info, warn};

use crate::arbiter::{PowerSavingArbiter, is_power_saving};
use crate::channels::{BATTERY_PRESENT_MIN_V, ChannelReader};
use crate::config::{ConfigError, PowerConfig};
use crate::ina3221::ChipIdentity;
use crate::report::{POWER_INFO_CAPACITY, power_info_line};
use crate::sequencer::{
    EnumerationObserver, Sequence, SequencerState, ShutdownRequester, StatusEvent, StatusSink,
};
use crate::state::{PowerSnapshot, PowerState};

/// USB collaborators, only reachable while holding the sequencing lock
struct UsbLink<U, R> {
    observer: U,
    shutdown: R,
}

pub struct PowerManager<P, U, R, N> {
    config: PowerConfig,
    state: PowerState,
    output: BlockingMutex<CriticalSectionRawMutex, RefCell<P>>,
    /// Last level successfully written to the output
    asserted: AtomicBool,
    sequencing: AsyncMutex<CriticalSectionRawMutex, UsbLink<U, R>>,
    status: N,
}

impl<P, U, R, N> PowerManager<P, U, R, N>
where
    P: OutputPin + StatefulOutputPin,
    U: EnumerationObserver,
    R: ShutdownRequester,
    N: StatusSink,
{
    /// Validate the configuration and take the power output.
    ///
    /// The output is driven low whatever its previous state.
    pub fn new(
        config: PowerConfig,
        pin: P,
        observer: U,
        shutdown: R,
        status: N,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let manager = Self {
            config,
            state: PowerState::new(config.lock_timeout()),
            output: BlockingMutex::new(RefCell::new(pin)),
            asserted: AtomicBool::new(false),
            sequencing: AsyncMutex::new(UsbLink { observer, shutdown }),
            status,
        };
        manager.force_set_power(false);
        Ok(manager)
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn state(&self) -> &PowerState {
        &self.state
    }

    pub fn status(&self) -> &N {
        &self.status
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn snapshot(&self) -> PowerSnapshot {
        self.state.snapshot().await
    }

    /// Whether the battery holds enough charge to power the SBC
    pub async fn can_startup(&self) -> bool {
        self.meets_startup_threshold(&self.state.snapshot().await)
    }

    pub async fn is_power_saving(&self) -> bool {
        self.state.is_power_saving().await
    }

    /// Whether the SBC power output is currently driven high
    pub fn is_power_asserted(&self) -> bool {
        self.output
            .lock(|pin| pin.borrow_mut().is_set_high())
            .unwrap_or_else(|_| self.asserted.load(Ordering::Acquire))
    }

    /// `POWER_INFO` status line of the latest snapshot
    pub async fn power_info(&self) -> String<POWER_INFO_CAPACITY> {
        power_info_line(&self.state.snapshot().await)
    }

    fn meets_startup_threshold(&self, snapshot: &PowerSnapshot) -> bool {
        snapshot.battery.percentage >= self.config.min_startup_percentage as f32
    }

    // =========================================================================
    // Output control
    // =========================================================================

    fn drive_output(&self, on: bool) -> bool {
        let result = self.output.lock(|pin| {
            let mut pin = pin.borrow_mut();
            if on { pin.set_high() } else { pin.set_low() }
        });

        match result {
            Ok(()) => {
                self.asserted.store(on, Ordering::Release);
                true
            }
            Err(e) => {
                error!(
                    "Failed to drive SBC power {}: {:?}",
                    if on { "high" } else { "low" },
                    e
                );
                false
            }
        }
    }

    /// Drive the power output directly, skipping the USB handshake.
    pub fn force_set_power(&self, on: bool) {
        info!("Forcing SBC power {}", if on { "ON" } else { "OFF" });
        self.drive_output(on);
    }

    /// Cut SBC power immediately (long press)
    pub fn hard_shutdown(&self) {
        self.force_set_power(false);
        self.notify(StatusEvent::Shutdown);
    }

    fn notify(&self, event: StatusEvent) {
        self.status
            .notify(event, self.config.status_blink_duration_ms);
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Power the SBC on or off through the USB handshake.
    ///
    /// Blocks for up to the connection timeout.
    ///
    /// # Returns
    /// * on: `true` once the SBC enumerated the controller. Refusals and
    ///   handshake timeouts return `false` with the output low.
    /// * off: `true` if the SBC shut down gracefully or there was nothing to
    ///   wait for, `false` if power had to be cut after the timeout. The
    ///   output is low either way.
    pub async fn try_set_power(&self, on: bool) -> bool {
        let mut link = self.sequencing.lock().await;
        if on {
            self.power_on(&mut link).await
        } else {
            self.power_off(&mut link).await
        }
    }

    async fn power_on(&self, link: &mut UsbLink<U, R>) -> bool {
        if self.is_power_asserted() {
            warn!("SBC power already on");
            return false;
        }

        let snapshot = self.state.snapshot().await;
        if !self.meets_startup_threshold(&snapshot) {
            warn!(
                "Battery too low to power SBC: {:.1}% < {}%",
                snapshot.battery.percentage, self.config.min_startup_percentage
            );
            return false;
        }

        if !link.observer.is_available() {
            warn!("USB link unavailable, not powering SBC");
            return false;
        }

        info!("Powering SBC on, waiting for USB enumeration");
        if !self.drive_output(true) {
            self.drive_output(false);
            return false;
        }

        let mut sequence = Sequence::power_on(Instant::now(), self.config.connection_timeout());
        self.wait_for(&mut sequence, &link.observer).await;

        match sequence.state() {
            SequencerState::OnConfirmed => {
                info!("SBC enumerated, power on confirmed");
                self.notify(StatusEvent::PowerOn);
                true
            }
            _ => {
                warn!(
                    "SBC did not enumerate within {}ms, powering off",
                    self.config.connection_timeout_ms
                );
                self.power_off(link).await;
                false
            }
        }
    }

    async fn power_off(&self, link: &mut UsbLink<U, R>) -> bool {
        if !self.is_power_asserted() {
            debug!("SBC power already off");
            self.drive_output(false);
            return true;
        }

        if !link.observer.is_available() {
            warn!("USB link unavailable, cutting SBC power");
            self.drive_output(false);
            self.notify(StatusEvent::PowerOff);
            return true;
        }

        info!("Requesting SBC shutdown");
        link.shutdown.request_graceful_shutdown().await;

        let mut sequence =
            Sequence::power_off(Instant::now(), self.config.connection_timeout());
        self.wait_for(&mut sequence, &link.observer).await;

        let graceful = sequence.state() == SequencerState::OffConfirmed;
        if graceful {
            info!("SBC shut down");
        } else {
            warn!(
                "SBC still enumerated after {}ms, cutting power",
                self.config.connection_timeout_ms
            );
        }

        self.drive_output(false);
        self.notify(StatusEvent::PowerOff);
        graceful
    }

    async fn wait_for(&self, sequence: &mut Sequence, observer: &U) {
        loop {
            sequence.advance(Instant::now(), observer.is_peripheral_enumerated());
            if sequence.is_finished() {
                return;
            }
            Timer::after(self.config.handshake_poll_interval()).await;
        }
    }

    /// Low-battery cutoff, run by the poller after every publish.
    ///
    /// Skipped for this tick if a sequence is already running, or if the
    /// battery reading is zeroed (failed bus read or no battery).
    pub async fn supervise(&self, snapshot: &PowerSnapshot) {
        if !self.is_power_asserted() || self.meets_startup_threshold(snapshot) {
            return;
        }

        if snapshot.battery.voltage <= BATTERY_PRESENT_MIN_V {
            warn!(
                "Battery reads {:.3}V, ignoring sample for low-battery cutoff",
                snapshot.battery.voltage
            );
            return;
        }

        let Ok(mut link) = self.sequencing.try_lock() else {
            debug!("Sequencing in progress, deferring low-battery cutoff");
            return;
        };

        warn!(
            "Battery at {:.1}%, below {}%, shutting SBC down",
            snapshot.battery.percentage, self.config.min_startup_percentage
        );
        self.notify(StatusEvent::LowBattery);
        self.power_off(&mut link).await;
    }
}

/// Periodic poller of the sense chip
pub struct PowerMonitor<I2C> {
    reader: ChannelReader<I2C>,
    arbiter: PowerSavingArbiter,
}

impl<I2C> PowerMonitor<I2C>
where
    I2C: I2c,
{
    pub fn new(reader: ChannelReader<I2C>) -> Self {
        Self {
            reader,
            arbiter: PowerSavingArbiter::new(),
        }
    }

    pub async fn init(&mut self, configure_chip: bool) -> ChipIdentity {
        self.reader.init(configure_chip).await
    }

    /// Read, estimate, publish, then run the arbiter and the supervisor.
    ///
    /// # Returns
    /// The published snapshot, or `None` if the state lock was busy and the
    /// tick was skipped.
    pub async fn tick<P, U, R, N>(
        &mut self,
        manager: &PowerManager<P, U, R, N>,
    ) -> Option<PowerSnapshot>
    where
        P: OutputPin + StatefulOutputPin,
        U: EnumerationObserver,
        R: ShutdownRequester,
        N: StatusSink,
    {
        let config = manager.config();
        let samples = self.reader.read_all().await;
        let (battery, charger) = samples.to_power_data(config);

        let snapshot = PowerSnapshot {
            battery,
            charger,
            timestamp_ms: Instant::now().as_millis(),
            power_saving_mode: is_power_saving(
                &battery,
                &charger,
                config.saving_threshold_percentage,
            ),
        };

        let published = manager.state().publish(snapshot).await?;
        debug!("{}", published);

        self.arbiter
            .update(published.power_saving_mode, manager.status());
        manager.supervise(&published).await;
        Some(published)
    }

    /// Tick forever at the configured poll interval
    pub async fn run<P, U, R, N>(&mut self, manager: &PowerManager<P, U, R, N>) -> !
    where
        P: OutputPin + StatefulOutputPin,
        U: EnumerationObserver,
        R: ShutdownRequester,
        N: StatusSink,
    {
        let mut ticker = Ticker::every(manager.config().poll_interval());
        loop {
            self.tick(manager).await;
            ticker.next().await;
        }
    }
}
