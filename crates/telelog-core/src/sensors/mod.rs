pub mod mock;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// The four sensor sources sampled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorSource {
    Humidity,
    Temperature,
    Pressure,
    /// Accelerometer and gyroscope triplets from the IMU
    Motion,
}

impl SensorSource {
    /// All sources, in the order the aggregator drains them.
    pub const ALL: [SensorSource; 4] = [
        SensorSource::Humidity,
        SensorSource::Temperature,
        SensorSource::Pressure,
        SensorSource::Motion,
    ];

    /// Short label used in log lines
    pub const fn name(self) -> &'static str {
        match self {
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Pressure => "pressure",
            Self::Motion => "imu",
        }
    }

    /// Position of this source in per-source tables
    pub const fn index(self) -> usize {
        match self {
            Self::Humidity => 0,
            Self::Temperature => 1,
            Self::Pressure => 2,
            Self::Motion => 3,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} device not ready")]
    NotReady { sensor: &'static str },
    #[error("{sensor} sample fetch failed: {details}")]
    FetchFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor} could not decode {channel} channel")]
    DecodeFailed {
        sensor: &'static str,
        channel: &'static str,
    },
}

/// Three-axis vector used by the accelerometer and gyroscope
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Relative humidity in percent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Humidity {
    pub percent: f64,
}

/// Ambient temperature in degrees Celsius
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperature {
    pub celsius: f64,
}

/// Barometric pressure in hectopascal
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pressure {
    pub hpa: f64,
}

/// Inertial sample: acceleration (m/s²) and angular rate (rad/s)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub accel: Vector3,
    pub gyro: Vector3,
}

/// A successfully decoded sample from one source.
///
/// A `Reading` only exists when sampling succeeded; failures surface as
/// [`SensorError`] and never produce a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Humidity(Humidity),
    Temperature(Temperature),
    Pressure(Pressure),
    Motion(Motion),
}

impl Reading {
    pub const fn source(&self) -> SensorSource {
        match self {
            Self::Humidity(_) => SensorSource::Humidity,
            Self::Temperature(_) => SensorSource::Temperature,
            Self::Pressure(_) => SensorSource::Pressure,
            Self::Motion(_) => SensorSource::Motion,
        }
    }
}

impl From<Humidity> for Reading {
    fn from(value: Humidity) -> Self {
        Self::Humidity(value)
    }
}

impl From<Temperature> for Reading {
    fn from(value: Temperature) -> Self {
        Self::Temperature(value)
    }
}

impl From<Pressure> for Reading {
    fn from(value: Pressure) -> Self {
        Self::Pressure(value)
    }
}

impl From<Motion> for Reading {
    fn from(value: Motion) -> Self {
        Self::Motion(value)
    }
}

/// Trait for sensors that produce typed readings.
///
/// This is the only capability the pipeline needs from a transducer driver:
/// report readiness once at start-up, then fetch the latest decoded reading
/// or fail.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Reading: Copy + Into<Reading>;

    /// Which source this sensor feeds.
    fn source(&self) -> SensorSource;

    /// Whether the underlying device is initialised and usable.
    fn is_ready(&mut self) -> bool;

    /// Sample the device and decode the result.
    fn fetch(&mut self) -> impl Future<Output = Result<Self::Reading, SensorError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_index_matches_drain_order() {
        for (i, source) in SensorSource::ALL.iter().enumerate() {
            assert_eq!(source.index(), i);
        }
    }

    #[test]
    fn reading_reports_its_source() {
        let reading: Reading = Pressure { hpa: 1013.25 }.into();
        assert_eq!(reading.source(), SensorSource::Pressure);

        let reading: Reading = Motion::default().into();
        assert_eq!(reading.source(), SensorSource::Motion);
    }
}
