#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Ticker};
use esp_hal::Async;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, Output};
use esp_hal::i2c::master::I2c;
use esp_hal::rtc_cntl::{SleepSource, wakeup_cause};
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

use gripdeck_core::arbiter::LedPower;
use gripdeck_core::button::{ButtonAction, PowerButton};
use gripdeck_core::channels::ChannelReader;
use gripdeck_core::ina3221::Ina3221;
use gripdeck_core::sequencer::EnumerationObserver;
use gripdeck_core::{PowerConfig, PowerManager, PowerMonitor};
use gripdeck_firmware::board::{self, StatusLed};
use gripdeck_firmware::status::{self, ChannelStatusSink};
use gripdeck_firmware::usb::{HidShutdown, UsbPresence};

type Manager = PowerManager<Output<'static>, UsbPresence, HidShutdown, ChannelStatusSink>;
type Monitor = PowerMonitor<I2c<'static, Async>>;

/// Power button sampling period
const BUTTON_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn power_task(mut monitor: Monitor, manager: &'static Manager) {
    monitor.run(manager).await
}

#[embassy_executor::task]
async fn button_task(input: Input<'static>, manager: &'static Manager, wake_power_on: bool) {
    if wake_power_on {
        // Let the poller publish a first snapshot before checking the battery
        embassy_time::Timer::after(manager.config().poll_interval()).await;
        info!("Woken by power button, powering SBC on");
        manager.try_set_power(true).await;
    }

    let mut button = PowerButton::new(manager.config().button);
    let mut ticker = Ticker::every(BUTTON_SAMPLE_INTERVAL);
    loop {
        let action = button.update(input.is_low(), Instant::now().as_millis());
        match action {
            Some(ButtonAction::TogglePower) => {
                let on = !manager.is_power_asserted();
                if !manager.try_set_power(on).await {
                    warn!("Power {} request failed", if on { "on" } else { "off" });
                }
            }
            Some(ButtonAction::HardShutdown) => manager.hard_shutdown(),
            None => {}
        }
        ticker.next().await;
    }
}

#[embassy_executor::task]
async fn status_task(led: LedPower<'static, StatusLed>) {
    status::run_status_led(led).await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let wake_power_on = matches!(
        wakeup_cause(),
        SleepSource::Ext0 | SleepSource::Ext1 | SleepSource::Gpio
    );

    let config = PowerConfig::default();

    static MANAGER: StaticCell<Manager> = StaticCell::new();
    let sbc_power = board::sbc_power_pin(peripherals.GPIO6);
    let manager = match PowerManager::new(
        config,
        sbc_power,
        UsbPresence,
        HidShutdown,
        ChannelStatusSink,
    ) {
        Ok(manager) => MANAGER.init(manager),
        Err(e) => panic!("Invalid power configuration: {}", e),
    };

    match board::create_i2c_bus(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9) {
        Ok(i2c) => {
            let chip = Ina3221::new(i2c, config.shunt_resistance_ohms);
            let mut monitor = PowerMonitor::new(ChannelReader::new(chip));
            monitor.init(config.configure_chip_on_init).await;
            match power_task(monitor, manager) {
                Ok(task) => spawner.spawn(task),
                Err(e) => error!("Failed to spawn power task: {:?}", e),
            }
        }
        Err(e) => error!("Failed to create I2C bus, power monitoring disabled: {:?}", e),
    }

    match board::status_led(peripherals.LEDC, peripherals.GPIO7) {
        Some(led) => {
            let led = LedPower::new(led, manager.state(), config.led_power_save_divisor);
            match status_task(led) {
                Ok(task) => spawner.spawn(task),
                Err(e) => error!("Failed to spawn status task: {:?}", e),
            }
        }
        None => warn!("Status LED unavailable"),
    }

    let button = board::power_button(peripherals.GPIO11);
    match button_task(button, manager, wake_power_on) {
        Ok(task) => spawner.spawn(task),
        Err(e) => error!("Failed to spawn button task: {:?}", e),
    }

    if !UsbPresence.is_available() {
        warn!("USB HID stack not running, SBC power-on requests will be refused");
    }

    info!("GripDeck controller running");
    loop {
        embassy_time::Timer::after(Duration::from_secs(60)).await;
    }
}
