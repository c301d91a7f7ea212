use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::SensorSource;
use crate::storage::RecordFormat;

/// Pipeline settings.
///
/// Loadable from a postcard blob; strings borrow from the blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct PipelineConfig<'a> {
    /// Indexed by [`SensorSource::index`]
    pub producers: [ProducerConfig; 4],
    pub aggregator: AggregatorConfig,
    pub storage: StorageConfig<'a>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Sleep between samples
    pub interval_ms: u64,
    /// How long a full queue may block the producer before the reading is dropped
    pub put_timeout_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Sleep between aggregation cycles
    pub period_ms: u64,
    /// Wait per source queue; a cycle takes at most four of these
    pub get_timeout_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig<'a> {
    /// Flash partition erased as the last mount recovery step
    pub partition: u8,
    pub mount_point: &'a str,
    pub log_file: &'a str,
    pub format: RecordFormat,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config encoding failed: {0}")]
    Codec(postcard::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl ProducerConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            put_timeout_ms: 1_000,
        }
    }
}

impl AggregatorConfig {
    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub const fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            period_ms: 5_000,
            get_timeout_ms: 1_000,
        }
    }
}

impl Default for StorageConfig<'_> {
    fn default() -> Self {
        Self {
            partition: 0,
            mount_point: "/lfs1",
            log_file: "sensor_data.bin",
            format: RecordFormat::Framed,
        }
    }
}

impl Default for PipelineConfig<'_> {
    fn default() -> Self {
        Self {
            producers: [ProducerConfig::default(); 4],
            aggregator: AggregatorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl<'a> PipelineConfig<'a> {
    /// Decode a postcard blob and validate it
    pub fn load(bytes: &'a [u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(ConfigError::Codec)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_bytes(&self) -> Result<alloc::vec::Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(ConfigError::Codec)
    }

    pub fn producer(&self, source: SensorSource) -> &ProducerConfig {
        &self.producers[source.index()]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for producer in &self.producers {
            if producer.interval_ms == 0 {
                return Err(ConfigError::Zero("producer interval"));
            }
            if producer.put_timeout_ms == 0 {
                return Err(ConfigError::Zero("producer put timeout"));
            }
        }
        if self.aggregator.period_ms == 0 {
            return Err(ConfigError::Zero("aggregator period"));
        }
        if self.aggregator.get_timeout_ms == 0 {
            return Err(ConfigError::Zero("aggregator get timeout"));
        }
        if self.storage.mount_point.is_empty() {
            return Err(ConfigError::Empty("mount point"));
        }
        if self.storage.log_file.is_empty() {
            return Err(ConfigError::Empty("log file"));
        }
        Ok(())
    }
}
