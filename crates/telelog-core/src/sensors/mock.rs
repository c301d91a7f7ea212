//! Scripted sensor for tests and host runs
//!
//! Plays back a fixed sequence of fetch results. Once the script runs out the
//! last successful reading is repeated, or a fetch error is returned if there
//! never was one.

use alloc::collections::VecDeque;

use super::{Reading, Sensor, SensorError, SensorSource};

pub struct ScriptedSensor<R> {
    source: SensorSource,
    ready: bool,
    script: VecDeque<Result<R, SensorError>>,
    last: Option<R>,
    fetches: usize,
}

impl<R: Copy + Into<Reading>> ScriptedSensor<R> {
    pub fn new(source: SensorSource) -> Self {
        Self {
            source,
            ready: true,
            script: VecDeque::new(),
            last: None,
            fetches: 0,
        }
    }

    /// A sensor whose device never becomes ready
    pub fn not_ready(source: SensorSource) -> Self {
        Self {
            ready: false,
            ..Self::new(source)
        }
    }

    pub fn with_readings(source: SensorSource, readings: &[R]) -> Self {
        let mut sensor = Self::new(source);
        sensor.script = readings.iter().copied().map(Ok).collect();
        sensor
    }

    pub fn push(&mut self, result: Result<R, SensorError>) {
        self.script.push_back(result);
    }

    /// Number of times `fetch` has been called
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}

impl<R: Copy + Into<Reading>> Sensor for ScriptedSensor<R> {
    type Reading = R;

    fn source(&self) -> SensorSource {
        self.source
    }

    fn is_ready(&mut self) -> bool {
        self.ready
    }

    async fn fetch(&mut self) -> Result<R, SensorError> {
        self.fetches += 1;
        match self.script.pop_front() {
            Some(Ok(reading)) => {
                self.last = Some(reading);
                Ok(reading)
            }
            Some(Err(e)) => Err(e),
            None => self.last.ok_or(SensorError::FetchFailed {
                sensor: self.source.name(),
                details: "script exhausted",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Humidity;
    use embassy_futures::block_on;

    #[test]
    fn repeats_last_reading_after_script() {
        let mut sensor =
            ScriptedSensor::with_readings(SensorSource::Humidity, &[Humidity { percent: 41.0 }]);

        assert_eq!(block_on(sensor.fetch()), Ok(Humidity { percent: 41.0 }));
        assert_eq!(block_on(sensor.fetch()), Ok(Humidity { percent: 41.0 }));
        assert_eq!(sensor.fetch_count(), 2);
    }

    #[test]
    fn empty_script_fails() {
        let mut sensor = ScriptedSensor::<Humidity>::new(SensorSource::Humidity);
        assert!(matches!(
            block_on(sensor.fetch()),
            Err(SensorError::FetchFailed { .. })
        ));
    }
}
