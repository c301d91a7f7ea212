//! Best-known value of every sensor source
//!
//! A [`Snapshot`] is not atomic across sources: each field is updated
//! independently whenever its source delivers, so fields can come from
//! different sampling instants. Instead of guessing how current a value is,
//! every field remembers the cycle it was last written in and reports a
//! [`Freshness`] relative to the snapshot's current cycle.

use serde::{Deserialize, Serialize};

use crate::sensors::{Humidity, Motion, Pressure, Reading, SensorSource, Temperature, Vector3};

/// How current a snapshot field is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freshness {
    /// No value has ever been received for this source
    Missing,
    /// Updated during the current cycle
    Fresh,
    /// Holding the value received `cycles` cycles ago
    Stale { cycles: u32 },
}

/// One snapshot field: a value plus the cycle it was written in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field<T> {
    value: T,
    updated_cycle: Option<u32>,
}

impl<T: Copy> Field<T> {
    const fn empty(value: T) -> Self {
        Self {
            value,
            updated_cycle: None,
        }
    }

    pub fn value(&self) -> T {
        self.value
    }

    fn set(&mut self, value: T, cycle: u32) {
        self.value = value;
        self.updated_cycle = Some(cycle);
    }

    fn freshness(&self, current: u32) -> Freshness {
        match self.updated_cycle {
            None => Freshness::Missing,
            Some(c) if c >= current => Freshness::Fresh,
            Some(c) => Freshness::Stale {
                cycles: current - c,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    cycle: u32,
    humidity: Field<Humidity>,
    temperature: Field<Temperature>,
    pressure: Field<Pressure>,
    motion: Field<Motion>,
}

impl Snapshot {
    /// Snapshot with every field missing, at cycle 0
    pub const fn new() -> Self {
        Self {
            cycle: 0,
            humidity: Field::empty(Humidity { percent: 0.0 }),
            temperature: Field::empty(Temperature { celsius: 0.0 }),
            pressure: Field::empty(Pressure { hpa: 0.0 }),
            motion: Field::empty(Motion {
                accel: Vector3::ZERO,
                gyro: Vector3::ZERO,
            }),
        }
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Start a new collection cycle. Every field written before this call
    /// becomes one cycle staler.
    pub fn advance_cycle(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
    }

    /// Overwrite the field belonging to `reading`'s source
    pub fn apply(&mut self, reading: Reading) {
        let cycle = self.cycle;
        match reading {
            Reading::Humidity(r) => self.humidity.set(r, cycle),
            Reading::Temperature(r) => self.temperature.set(r, cycle),
            Reading::Pressure(r) => self.pressure.set(r, cycle),
            Reading::Motion(r) => self.motion.set(r, cycle),
        }
    }

    pub fn humidity(&self) -> Humidity {
        self.humidity.value()
    }

    pub fn temperature(&self) -> Temperature {
        self.temperature.value()
    }

    pub fn pressure(&self) -> Pressure {
        self.pressure.value()
    }

    pub fn motion(&self) -> Motion {
        self.motion.value()
    }

    pub fn freshness(&self, source: SensorSource) -> Freshness {
        match source {
            SensorSource::Humidity => self.humidity.freshness(self.cycle),
            SensorSource::Temperature => self.temperature.freshness(self.cycle),
            SensorSource::Pressure => self.pressure.freshness(self.cycle),
            SensorSource::Motion => self.motion.freshness(self.cycle),
        }
    }

    /// Freshness of all sources, in [`SensorSource::ALL`] order
    pub fn freshness_all(&self) -> [Freshness; 4] {
        SensorSource::ALL.map(|source| self.freshness(source))
    }

    /// Emit the snapshot to the log, one line per source
    pub fn log(&self) {
        let [h, t, p, m] = self.freshness_all();
        let motion = self.motion();
        log::info!("Snapshot cycle {}", self.cycle);
        log::info!("Humidity: {:.2} % ({:?})", self.humidity().percent, h);
        log::info!("Temperature: {:.2} C ({:?})", self.temperature().celsius, t);
        log::info!("Pressure: {:.2} hPa ({:?})", self.pressure().hpa, p);
        log::info!(
            "Accelerometer: X={:.2} Y={:.2} Z={:.2} ({:?})",
            motion.accel.x,
            motion.accel.y,
            motion.accel.z,
            m
        );
        log::info!(
            "Gyroscope: X={:.2} Y={:.2} Z={:.2} ({:?})",
            motion.gyro.x,
            motion.gyro.y,
            motion.gyro.z,
            m
        );
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}
