//! Hooks between the power manager and the USB HID stack
//!
//! The HID stack is not part of this crate. Whatever task runs it must:
//!
//! * call `USB_STATE.set_ready(true)` once the device stack is running, and
//!   `set_ready(false)` if it stops;
//! * call `USB_STATE.set_mounted` from its configured/reset callbacks
//!   (embassy-usb `Handler::configured` and `Handler::reset`);
//! * loop on `SHUTDOWN_REQUEST.wait().await` and send the consumer-control
//!   power key to the SBC for each request.
//!
//! Until such a task is spawned the link reads as unavailable, so
//! `try_set_power(true)` refuses and `try_set_power(false)` cuts power
//! without a handshake.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use gripdeck_core::sequencer::{EnumerationObserver, ShutdownRequester};
use log::info;

pub struct UsbState {
    /// The USB device stack is running
    ready: AtomicBool,
    /// The SBC has enumerated the controller
    mounted: AtomicBool,
}

impl UsbState {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            mounted: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::Release);
    }
}

impl Default for UsbState {
    fn default() -> Self {
        Self::new()
    }
}

pub static USB_STATE: UsbState = UsbState::new();

pub static SHUTDOWN_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Reads the mount state published by the HID stack
pub struct UsbPresence;

impl EnumerationObserver for UsbPresence {
    fn is_available(&self) -> bool {
        USB_STATE.ready.load(Ordering::Acquire)
    }

    fn is_peripheral_enumerated(&self) -> bool {
        USB_STATE.mounted.load(Ordering::Acquire)
    }
}

/// Asks the HID stack to send the power key
pub struct HidShutdown;

impl ShutdownRequester for HidShutdown {
    async fn request_graceful_shutdown(&mut self) {
        info!("Sending power key to SBC");
        SHUTDOWN_REQUEST.signal(());
    }
}
