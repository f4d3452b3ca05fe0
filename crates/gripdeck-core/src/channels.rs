//! Battery and charger channels of the sense chip
//!
//! The board wires the charger input to channel 1 and the battery to
//! channel 2; channel 3 is unused.

use embedded_hal_async::i2c::I2c;
use log::warn;

use crate::config::PowerConfig;
use crate::ina3221::{Channel, ChipIdentity, Ina3221};
use crate::soc::estimate_percentage;
use crate::state::{BatteryData, ChargerData};

pub const CHARGER_CHANNEL: Channel = Channel::One;
pub const BATTERY_CHANNEL: Channel = Channel::Two;

/// At or below this the battery channel has nothing attached or the read
/// failed; such a sample says nothing about the charge left.
pub const BATTERY_PRESENT_MIN_V: f32 = 0.1;

/// One raw reading of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawChannelSample {
    pub bus_voltage: f32,
    pub shunt_voltage: f32,
}

impl RawChannelSample {
    pub fn current(&self, shunt_resistance_ohms: f32) -> f32 {
        self.shunt_voltage / shunt_resistance_ohms
    }
}

/// Raw readings of both channels taken in one poll
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSamples {
    pub battery: RawChannelSample,
    pub charger: RawChannelSample,
}

impl ChannelSamples {
    /// Derive the typed battery and charger data, including the estimates.
    pub fn to_power_data(&self, config: &PowerConfig) -> (BatteryData, ChargerData) {
        let shunt = config.shunt_resistance_ohms;
        let chemistry = config.chemistry;
        let model = config.time_model();

        let battery_voltage = self.battery.bus_voltage;
        let battery_current = self.battery.current(shunt);
        let charger_voltage = self.charger.bus_voltage;
        let charger_current = self.charger.current(shunt);

        let percentage = estimate_percentage(
            battery_voltage,
            battery_current,
            &chemistry.curve(),
            chemistry.internal_resistance_ohms(),
        );

        let battery = BatteryData {
            voltage: battery_voltage,
            current: battery_current,
            power: battery_voltage * battery_current,
            percentage,
            seconds_to_empty: model.seconds_to_empty(
                charger_current,
                charger_voltage,
                battery_current,
                percentage,
            ),
        };

        let charger = ChargerData {
            voltage: charger_voltage,
            current: charger_current,
            power: charger_voltage * charger_current,
            connected: charger_voltage >= config.min_charging_voltage,
            seconds_to_full: model.seconds_to_full(
                charger_current,
                charger_voltage,
                battery_current,
                percentage,
            ),
        };

        (battery, charger)
    }
}

/// Reads the battery and charger channels
pub struct ChannelReader<I2C> {
    chip: Ina3221<I2C>,
}

impl<I2C> ChannelReader<I2C>
where
    I2C: I2c,
{
    pub fn new(chip: Ina3221<I2C>) -> Self {
        Self { chip }
    }

    pub fn chip(&mut self) -> &mut Ina3221<I2C> {
        &mut self.chip
    }

    pub async fn init(&mut self, configure: bool) -> ChipIdentity {
        let identity = self.chip.init(configure).await;

        let battery = self.chip.bus_voltage(BATTERY_CHANNEL).await;
        if battery <= BATTERY_PRESENT_MIN_V {
            warn!("Battery channel reads {:.3}V, is a battery connected?", battery);
        }
        identity
    }

    pub async fn read(&mut self, channel: Channel) -> RawChannelSample {
        RawChannelSample {
            bus_voltage: self.chip.bus_voltage(channel).await,
            shunt_voltage: self.chip.shunt_voltage(channel).await,
        }
    }

    pub async fn read_battery(&mut self) -> RawChannelSample {
        self.read(BATTERY_CHANNEL).await
    }

    pub async fn read_charger(&mut self) -> RawChannelSample {
        self.read(CHARGER_CHANNEL).await
    }

    pub async fn read_all(&mut self) -> ChannelSamples {
        ChannelSamples {
            battery: self.read_battery().await,
            charger: self.read_charger().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeIna3221, approx_eq};
    use embassy_futures::block_on;

    fn reader(battery: (f32, f32), charger: (f32, f32)) -> ChannelReader<FakeIna3221> {
        let mut fake = FakeIna3221::new();
        fake.set_channel(BATTERY_CHANNEL, battery.0, battery.1);
        fake.set_channel(CHARGER_CHANNEL, charger.0, charger.1);
        ChannelReader::new(Ina3221::new(fake, 0.1))
    }

    #[test]
    fn test_reads_channels_into_samples() {
        let mut reader = reader((3.8, -0.03), (5.0, 0.02));
        let samples = block_on(reader.read_all());

        assert!(approx_eq(samples.battery.bus_voltage, 3.8, 0.008));
        assert!(approx_eq(samples.battery.current(0.1), -0.3, 0.001));
        assert!(approx_eq(samples.charger.bus_voltage, 5.0, 0.008));
        assert!(approx_eq(samples.charger.current(0.1), 0.2, 0.001));
    }

    #[test]
    fn test_charger_connected_follows_voltage_threshold() {
        let config = PowerConfig::default();
        let sample = |volts| ChannelSamples {
            battery: RawChannelSample {
                bus_voltage: 3.8,
                shunt_voltage: 0.0,
            },
            charger: RawChannelSample {
                bus_voltage: volts,
                shunt_voltage: 0.0,
            },
        };

        assert!(!sample(3.99).to_power_data(&config).1.connected);
        assert!(sample(4.0).to_power_data(&config).1.connected);
    }

    #[test]
    fn test_power_data_on_battery() {
        let config = PowerConfig::default();
        let samples = ChannelSamples {
            battery: RawChannelSample {
                bus_voltage: 3.75,
                shunt_voltage: -0.02,
            },
            charger: RawChannelSample::default(),
        };

        let (battery, charger) = samples.to_power_data(&config);
        assert!(approx_eq(battery.current, -0.2, 1e-4));
        assert!(approx_eq(battery.power, -0.75, 1e-3));
        assert!(approx_eq(battery.percentage, 50.0, 0.01));
        assert!(battery.seconds_to_empty > 0);
        assert!(!charger.connected);
        assert_eq!(charger.seconds_to_full, 0);
    }

    #[test]
    fn test_power_data_while_charging() {
        let config = PowerConfig::default();
        let samples = ChannelSamples {
            battery: RawChannelSample {
                bus_voltage: 3.9,
                shunt_voltage: 0.05,
            },
            charger: RawChannelSample {
                bus_voltage: 5.1,
                shunt_voltage: 0.08,
            },
        };

        let (battery, charger) = samples.to_power_data(&config);
        assert!(charger.connected);
        assert!(charger.seconds_to_full > 0);
        assert_eq!(battery.seconds_to_empty, 0);
    }

    #[test]
    fn test_failed_bus_degrades_to_zero_sample() {
        let mut fake = FakeIna3221::new();
        fake.fail_transactions(true);
        let mut reader = ChannelReader::new(Ina3221::new(fake, 0.1));

        assert_eq!(block_on(reader.read_all()), ChannelSamples::default());
    }
}
