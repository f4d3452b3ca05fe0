//! SBC power sequencing
//!
//! Powering the single-board computer is only considered successful once it
//! enumerates the controller as a USB peripheral, which proves the SBC booted.
//! Powering it down first asks the operating system to shut down and waits for
//! the controller to drop off the bus.
//!
//! [`Sequence`] is the pure state machine. It does not sleep or touch
//! hardware; the caller advances it with the current time and the latest
//! enumeration status until it reports a terminal state.

use core::future::Future;

use embassy_time::{Duration, Instant};

// =============================================================================
// Collaborators
// =============================================================================

/// Reports whether the SBC has enumerated the controller over USB
pub trait EnumerationObserver {
    /// Whether the USB link can be observed at all
    fn is_available(&self) -> bool {
        true
    }

    fn is_peripheral_enumerated(&self) -> bool;
}

impl<T: EnumerationObserver + ?Sized> EnumerationObserver for &T {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn is_peripheral_enumerated(&self) -> bool {
        (**self).is_peripheral_enumerated()
    }
}

/// Asks the SBC's operating system to shut down gracefully
pub trait ShutdownRequester {
    fn request_graceful_shutdown(&mut self) -> impl Future<Output = ()>;
}

/// Power transitions reported to the status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    PowerOn,
    PowerOff,
    LowBattery,
    Shutdown,
}

/// Fire-and-forget status indicator
pub trait StatusSink {
    fn notify(&self, event: StatusEvent, duration_ms: u32);

    /// Called on power-saving mode changes only
    fn set_low_power_mode(&self, enabled: bool);
}

impl<T: StatusSink + ?Sized> StatusSink for &T {
    fn notify(&self, event: StatusEvent, duration_ms: u32) {
        (**self).notify(event, duration_ms)
    }

    fn set_low_power_mode(&self, enabled: bool) {
        (**self).set_low_power_mode(enabled)
    }
}

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    RequestingOn,
    OnConfirmed,
    RequestingOff,
    OffConfirmed,
}

/// One power-on or power-off attempt
#[derive(Debug, Clone, Copy)]
pub struct Sequence {
    state: SequencerState,
    started: Instant,
    timeout: Duration,
}

impl Sequence {
    /// Start waiting for the SBC to enumerate
    pub fn power_on(now: Instant, timeout: Duration) -> Self {
        Self {
            state: SequencerState::RequestingOn,
            started: now,
            timeout,
        }
    }

    /// Start waiting for the SBC to drop off the bus
    pub fn power_off(now: Instant, timeout: Duration) -> Self {
        Self {
            state: SequencerState::RequestingOff,
            started: now,
            timeout,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        !matches!(
            self.state,
            SequencerState::RequestingOn | SequencerState::RequestingOff
        )
    }

    /// Feed the latest enumeration status.
    ///
    /// A request that is not confirmed before the timeout falls back to
    /// `Idle`. Terminal states are sticky.
    pub fn advance(&mut self, now: Instant, enumerated: bool) -> SequencerState {
        let timed_out = now.saturating_duration_since(self.started) >= self.timeout;

        self.state = match self.state {
            SequencerState::RequestingOn if enumerated => SequencerState::OnConfirmed,
            SequencerState::RequestingOff if !enumerated => SequencerState::OffConfirmed,
            SequencerState::RequestingOn | SequencerState::RequestingOff if timed_out => {
                SequencerState::Idle
            }
            state => state,
        };
        self.state
    }
}
