//! ESP32-S3 firmware-specific modules for GripDeck
//!
//! This crate contains the hardware-specific glue that cannot compile on
//! desktop targets: pin assignments, ESP32 peripheral initialization and the
//! adapters that connect `gripdeck-core` to the USB and status-LED tasks.

#![no_std]

pub mod board;
pub mod status;
pub mod usb;
