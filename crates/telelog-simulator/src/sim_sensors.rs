//! Synthetic sensors that vary smoothly over time.
//!
//! Values follow slow sinusoids around plausible indoor conditions. Every
//! `fail_every`-th fetch reports a bus error so the producers' error path is
//! exercised too.

use embassy_time::{Duration, Instant, Timer};

use telelog_core::sensors::{
    Humidity, Motion, Pressure, Reading, Sensor, SensorError, SensorSource, Temperature, Vector3,
};

/// Simulated conversion time of one measurement
const CONVERSION_TIME: Duration = Duration::from_millis(5);

pub struct SimSensor<R> {
    source: SensorSource,
    online: bool,
    fail_every: u32,
    fetches: u32,
    generate: fn(f64) -> R,
}

impl<R: Copy + Into<Reading>> SimSensor<R> {
    fn new(source: SensorSource, generate: fn(f64) -> R) -> Self {
        Self {
            source,
            online: true,
            fail_every: 0,
            fetches: 0,
            generate,
        }
    }

    /// Report "device not ready" at start-up
    pub fn offline(mut self, offline: bool) -> Self {
        self.online = !offline;
        self
    }

    /// Fail every `n`th fetch; 0 never fails
    pub fn fail_every(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }
}

impl SimSensor<Humidity> {
    pub fn humidity() -> Self {
        Self::new(SensorSource::Humidity, |t| Humidity {
            percent: 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos(),
        })
    }
}

impl SimSensor<Temperature> {
    pub fn temperature() -> Self {
        Self::new(SensorSource::Temperature, |t| Temperature {
            celsius: 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos(),
        })
    }
}

impl SimSensor<Pressure> {
    pub fn pressure() -> Self {
        Self::new(SensorSource::Pressure, |t| Pressure {
            hpa: 1013.25 + 4.0 * (t / 300.0).sin() + 0.3 * (t / 17.0).cos(),
        })
    }
}

impl SimSensor<Motion> {
    pub fn motion() -> Self {
        Self::new(SensorSource::Motion, |t| Motion {
            accel: Vector3::new(0.02 * t.sin(), 0.02 * t.cos(), 9.81 + 0.05 * (t / 3.0).sin()),
            gyro: Vector3::new(
                0.01 * (t / 2.0).sin(),
                -0.01 * (t / 5.0).cos(),
                0.002 * (t / 7.0).sin(),
            ),
        })
    }
}

impl<R: Copy + Into<Reading>> Sensor for SimSensor<R> {
    type Reading = R;

    fn source(&self) -> SensorSource {
        self.source
    }

    fn is_ready(&mut self) -> bool {
        self.online
    }

    async fn fetch(&mut self) -> Result<R, SensorError> {
        Timer::after(CONVERSION_TIME).await;
        self.fetches = self.fetches.wrapping_add(1);

        if self.fail_every > 0 && self.fetches % self.fail_every == 0 {
            return Err(SensorError::FetchFailed {
                sensor: self.source.name(),
                details: "simulated bus error",
            });
        }

        let t = Instant::now().as_millis() as f64 / 1000.0;
        Ok((self.generate)(t))
    }
}
