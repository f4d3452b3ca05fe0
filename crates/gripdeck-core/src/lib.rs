//! Hardware-independent core library for GripDeck
//!
//! This crate contains the power-management logic of the GripDeck controller
//! board: decoding the INA3221 sense chip, estimating battery state of charge
//! and time remaining, sequencing power to the attached single-board computer
//! and arbitrating the power-saving mode.
//!
//! It is `#![no_std]` so it compiles on both the ESP32-S3 target and desktop
//! hosts (for the simulator and tests).

#![no_std]

pub mod arbiter;
pub mod button;
pub mod channels;
pub mod config;
pub mod estimate;
pub mod ina3221;
pub mod manager;
pub mod report;
pub mod sequencer;
pub mod soc;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::PowerConfig;
pub use manager::{PowerManager, PowerMonitor};
pub use state::{BatteryData, ChargerData, PowerSnapshot, PowerState};
