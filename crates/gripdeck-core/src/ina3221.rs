//! INA3221 triple-channel current/voltage sense chip driver
//!
//! The chip exposes one shunt-voltage and one bus-voltage register per
//! channel. Both hold a 13-bit two's-complement value left-shifted by three,
//! so an arithmetic shift of the register read as `i16` recovers the signed
//! count.

use embedded_hal_async::i2c::I2c;
use log::{debug, info, warn};

// =============================================================================
// I2C Address
// =============================================================================

/// INA3221 I2C address (A0 tied to GND)
pub const I2C_ADDR: u8 = 0x40;

// =============================================================================
// Register Addresses
// =============================================================================

// Configuration Register
pub const ADDR_CONFIG: u8 = 0x00;

// Channel Measurement Registers
pub const ADDR_CH1_SHUNT: u8 = 0x01;
pub const ADDR_CH1_BUS: u8 = 0x02;
pub const ADDR_CH2_SHUNT: u8 = 0x03;
pub const ADDR_CH2_BUS: u8 = 0x04;
pub const ADDR_CH3_SHUNT: u8 = 0x05;
pub const ADDR_CH3_BUS: u8 = 0x06;

// Identification Registers
pub const ADDR_MANUFACTURER_ID: u8 = 0xFE;
pub const ADDR_DIE_ID: u8 = 0xFF;

// =============================================================================
// Register Values
// =============================================================================

/// Manufacturer ID reported by genuine parts ("TI")
pub const MANUFACTURER_ID: u16 = 0x5449;

/// Configuration bit that resets every register to its power-on value
pub const CONFIG_RESET: u16 = 0x8000;

/// All channels enabled, 1 sample average, 1.1 ms conversions,
/// continuous shunt and bus conversion
pub const CONFIG_CONTINUOUS_ALL: u16 = 0x7127;

/// Bus voltage resolution: 8 mV per count
pub const BUS_VOLTAGE_LSB_V: f32 = 0.008;

/// Shunt voltage resolution: 40 µV per count
pub const SHUNT_VOLTAGE_LSB_V: f32 = 0.000_04;

// =============================================================================
// Enums
// =============================================================================

/// Measurement channel of the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    One = 1,
    Two = 2,
    Three = 3,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::One, Channel::Two, Channel::Three];

    /// Channel number as printed on the datasheet (1-3)
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Shunt-voltage register of this channel
    pub const fn shunt_register(self) -> u8 {
        match self {
            Self::One => ADDR_CH1_SHUNT,
            Self::Two => ADDR_CH2_SHUNT,
            Self::Three => ADDR_CH3_SHUNT,
        }
    }

    /// Bus-voltage register of this channel
    pub const fn bus_register(self) -> u8 {
        match self {
            Self::One => ADDR_CH1_BUS,
            Self::Two => ADDR_CH2_BUS,
            Self::Three => ADDR_CH3_BUS,
        }
    }
}

/// Outcome of the start-up presence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipIdentity {
    /// Manufacturer ID matched
    Verified,
    /// The chip answered with an unexpected manufacturer ID
    UnexpectedId(u16),
    /// The identification read failed on the bus
    Unresponsive,
}

// =============================================================================
// Raw Decoding
// =============================================================================

/// Sign-extend the 13-bit count packed in a measurement register.
#[inline]
const fn register_counts(raw: u16) -> i16 {
    (raw as i16) >> 3
}

/// Decode a bus-voltage register value into volts.
pub fn decode_bus_voltage(raw: u16) -> f32 {
    register_counts(raw) as f32 * BUS_VOLTAGE_LSB_V
}

/// Decode a shunt-voltage register value into volts.
pub fn decode_shunt_voltage(raw: u16) -> f32 {
    register_counts(raw) as f32 * SHUNT_VOLTAGE_LSB_V
}

// =============================================================================
// Driver Error Type
// =============================================================================

/// Errors that can occur during INA3221 operations
#[derive(Debug)]
pub enum Error<E> {
    /// I2C communication error
    I2c(E),
    /// Register contents did not match what was written
    InvalidData,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::I2c(e)
    }
}

// =============================================================================
// Driver Implementation
// =============================================================================

/// INA3221 driver with async I2C interface
///
/// Register-level methods return `Result`. The measurement helpers
/// (`bus_voltage`, `shunt_voltage`, `current`) never fail: a failed bus
/// transaction is logged and read as 0.0 so one bad sample cannot stall the
/// poll loop.
pub struct Ina3221<I2C> {
    /// I2C bus for communicating with the sense chip
    i2c: I2C,
    /// Device address on the bus
    address: u8,
    /// Value of the current-sense resistor on every channel
    shunt_resistance_ohms: f32,
}

impl<I2C> Ina3221<I2C>
where
    I2C: I2c,
{
    /// Create a new driver at the default address
    ///
    /// # Arguments
    /// * `i2c` - I2C bus instance that implements embedded_hal_async::i2c::I2c
    /// * `shunt_resistance_ohms` - value of the sense resistor fitted to the board
    pub fn new(i2c: I2C, shunt_resistance_ohms: f32) -> Self {
        Self::with_address(i2c, I2C_ADDR, shunt_resistance_ohms)
    }

    /// Create a new driver at a non-default address
    pub fn with_address(i2c: I2C, address: u8, shunt_resistance_ohms: f32) -> Self {
        Self {
            i2c,
            address,
            shunt_resistance_ohms,
        }
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn i2c_mut(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    pub fn shunt_resistance_ohms(&self) -> f32 {
        self.shunt_resistance_ohms
    }

    // =========================================================================
    // Register Access
    // =========================================================================

    /// Read a 16-bit big-endian register
    pub async fn read_register(&mut self, reg: u8) -> Result<u16, Error<I2C::Error>> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(self.address, &[reg], &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Write a 16-bit big-endian register
    pub async fn write_register(&mut self, reg: u8, value: u16) -> Result<(), Error<I2C::Error>> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c.write(self.address, &[reg, hi, lo]).await?;
        Ok(())
    }

    pub async fn manufacturer_id(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ADDR_MANUFACTURER_ID).await
    }

    pub async fn die_id(&mut self) -> Result<u16, Error<I2C::Error>> {
        self.read_register(ADDR_DIE_ID).await
    }

    /// Pulse the reset bit, then enable continuous conversion on all channels.
    ///
    /// The configuration register is read back afterwards; a mismatch is
    /// reported as [`Error::InvalidData`].
    pub async fn configure_continuous(&mut self) -> Result<(), Error<I2C::Error>> {
        self.write_register(ADDR_CONFIG, CONFIG_RESET).await?;
        self.write_register(ADDR_CONFIG, CONFIG_CONTINUOUS_ALL)
            .await?;

        let readback = self.read_register(ADDR_CONFIG).await?;
        if readback & !CONFIG_RESET != CONFIG_CONTINUOUS_ALL {
            return Err(Error::InvalidData);
        }
        Ok(())
    }

    /// Soft presence check and optional configuration rewrite.
    ///
    /// Never fails: some units answer the identification register
    /// incorrectly yet measure fine, so a mismatch is only logged.
    pub async fn init(&mut self, configure: bool) -> ChipIdentity {
        info!("Initializing INA3221 at address 0x{:02X}", self.address);

        let identity = match self.manufacturer_id().await {
            Ok(MANUFACTURER_ID) => {
                info!("INA3221 manufacturer ID verified");
                ChipIdentity::Verified
            }
            Ok(id) => {
                warn!(
                    "Unexpected INA3221 manufacturer ID: 0x{:04X} (expected 0x{:04X})",
                    id, MANUFACTURER_ID
                );
                ChipIdentity::UnexpectedId(id)
            }
            Err(e) => {
                warn!("INA3221 did not answer the manufacturer ID read: {:?}", e);
                ChipIdentity::Unresponsive
            }
        };

        if let Ok(die) = self.die_id().await {
            debug!("INA3221 die ID: 0x{:04X}", die);
        }

        if configure {
            match self.configure_continuous().await {
                Ok(()) => info!("INA3221 set to continuous conversion on all channels"),
                Err(e) => warn!("Failed to configure INA3221: {:?}", e),
            }
        }

        for channel in Channel::ALL {
            let voltage = self.bus_voltage(channel).await;
            let current = self.current(channel).await;
            debug!(
                "Channel {}: {:.3}V, {:.6}A",
                channel.number(),
                voltage,
                current
            );
        }

        identity
    }

    // =========================================================================
    // Measurements
    // =========================================================================

    /// Bus voltage of a channel in volts, 0.0 if the read failed
    pub async fn bus_voltage(&mut self, channel: Channel) -> f32 {
        match self.read_register(channel.bus_register()).await {
            Ok(raw) => decode_bus_voltage(raw),
            Err(e) => {
                warn!(
                    "Failed to read bus voltage on channel {}: {:?}",
                    channel.number(),
                    e
                );
                0.0
            }
        }
    }

    /// Shunt voltage of a channel in volts, 0.0 if the read failed
    pub async fn shunt_voltage(&mut self, channel: Channel) -> f32 {
        match self.read_register(channel.shunt_register()).await {
            Ok(raw) => decode_shunt_voltage(raw),
            Err(e) => {
                warn!(
                    "Failed to read shunt voltage on channel {}: {:?}",
                    channel.number(),
                    e
                );
                0.0
            }
        }
    }

    /// Current through a channel's shunt in amperes
    pub async fn current(&mut self, channel: Channel) -> f32 {
        self.shunt_voltage(channel).await / self.shunt_resistance_ohms
    }
}
