//! Shared power snapshot
//!
//! The periodic poller is the only writer. Everyone else gets a copy of the
//! latest snapshot through a lock with a bounded wait; when the lock cannot be
//! taken in time, readers fall back to a default snapshot instead of stalling.

use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{Duration, with_timeout};
use log::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryData {
    pub voltage: f32,
    /// Positive while charging, negative while discharging
    pub current: f32,
    pub power: f32,
    pub percentage: f32,
    pub seconds_to_empty: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChargerData {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
    pub connected: bool,
    pub seconds_to_full: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerSnapshot {
    pub battery: BatteryData,
    pub charger: ChargerData,
    /// Milliseconds since boot at which the snapshot was taken
    pub timestamp_ms: u64,
    pub power_saving_mode: bool,
}

struct Eta(u32);

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("N/A")
        } else {
            write!(f, "{}m {}s", self.0 / 60, self.0 % 60)
        }
    }
}

impl fmt::Display for BatteryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery: {:.3}V, {:.3}A, {:.3}W, {:.1}%, ETA: {}",
            self.voltage,
            self.current,
            self.power,
            self.percentage,
            Eta(self.seconds_to_empty)
        )
    }
}

impl fmt::Display for ChargerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Charger: {:.3}V, {:.3}A, {:.3}W, {}, ETA: {}",
            self.voltage,
            self.current,
            self.power,
            if self.connected {
                "Connected"
            } else {
                "Disconnected"
            },
            Eta(self.seconds_to_full)
        )
    }
}

impl fmt::Display for PowerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.battery)?;
        writeln!(f, "{}", self.charger)?;
        write!(
            f,
            "Power saving: {}",
            if self.power_saving_mode { "ON" } else { "OFF" }
        )
    }
}

/// Single shared [`PowerSnapshot`] behind a bounded-wait lock
pub struct PowerState {
    inner: AsyncMutex<CriticalSectionRawMutex, PowerSnapshot>,
    lock_timeout: Duration,
}

impl PowerState {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: AsyncMutex::new(PowerSnapshot::default()),
            lock_timeout,
        }
    }

    /// Copy of the latest snapshot.
    ///
    /// Waits at most the lock timeout; on timeout a default snapshot is
    /// returned.
    pub async fn snapshot(&self) -> PowerSnapshot {
        match with_timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(guard) => *guard,
            Err(_) => {
                warn!("Power state lock timed out, using default snapshot");
                PowerSnapshot::default()
            }
        }
    }

    /// Copy of the latest snapshot if the lock is free right now
    pub fn try_snapshot(&self) -> Option<PowerSnapshot> {
        self.inner.try_lock().ok().map(|guard| *guard)
    }

    /// Replace the stored snapshot.
    ///
    /// The timestamp never moves backwards: a snapshot older than the stored
    /// one keeps the stored timestamp.
    ///
    /// # Returns
    /// The snapshot as stored, or `None` if the lock could not be taken
    /// within the lock timeout and nothing was published.
    pub async fn publish(&self, mut snapshot: PowerSnapshot) -> Option<PowerSnapshot> {
        let Ok(mut guard) = with_timeout(self.lock_timeout, self.inner.lock()).await else {
            warn!("Power state lock timed out, skipping publish");
            return None;
        };
        snapshot.timestamp_ms = snapshot.timestamp_ms.max(guard.timestamp_ms);
        *guard = snapshot;
        Some(snapshot)
    }

    pub async fn is_power_saving(&self) -> bool {
        self.snapshot().await.power_saving_mode
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;
    use std::string::ToString;

    fn sample() -> PowerSnapshot {
        PowerSnapshot {
            battery: BatteryData {
                voltage: 3.85,
                current: -0.12,
                power: -0.462,
                percentage: 62.3,
                seconds_to_empty: 1800,
            },
            charger: ChargerData {
                voltage: 5.05,
                current: 0.4,
                power: 2.02,
                connected: true,
                seconds_to_full: 3725,
            },
            timestamp_ms: 1500,
            power_saving_mode: false,
        }
    }

    #[test]
    fn test_snapshot_starts_empty() {
        let state = PowerState::new(Duration::from_millis(20));
        assert_eq!(block_on(state.snapshot()), PowerSnapshot::default());
    }

    #[test]
    fn test_publish_then_read_copy() {
        let state = PowerState::new(Duration::from_millis(20));
        assert_eq!(block_on(state.publish(sample())), Some(sample()));
        assert_eq!(block_on(state.snapshot()), sample());
        assert_eq!(state.try_snapshot(), Some(sample()));
    }

    #[test]
    fn test_timestamp_never_moves_backwards() {
        let state = PowerState::new(Duration::from_millis(20));
        block_on(state.publish(sample()));

        let older = PowerSnapshot {
            timestamp_ms: 900,
            ..sample()
        };
        let stored = block_on(state.publish(older)).unwrap();
        assert_eq!(stored.timestamp_ms, 1500);
    }

    #[test]
    fn test_held_lock_degrades_instead_of_stalling() {
        let state = PowerState::new(Duration::from_millis(20));
        block_on(state.publish(sample()));

        let _guard = state.inner.try_lock().unwrap();
        assert_eq!(block_on(state.snapshot()), PowerSnapshot::default());
        assert_eq!(state.try_snapshot(), None);
        assert_eq!(block_on(state.publish(sample())), None);
    }

    #[test]
    fn test_display_matches_log_format() {
        let text = sample().to_string();
        assert_eq!(
            text,
            "Battery: 3.850V, -0.120A, -0.462W, 62.3%, ETA: 30m 0s\n\
             Charger: 5.050V, 0.400A, 2.020W, Connected, ETA: 62m 5s\n\
             Power saving: OFF"
        );
    }

    #[test]
    fn test_display_without_eta() {
        let text = ChargerData::default().to_string();
        assert_eq!(
            text,
            "Charger: 0.000V, 0.000A, 0.000W, Disconnected, ETA: N/A"
        );
    }
}
