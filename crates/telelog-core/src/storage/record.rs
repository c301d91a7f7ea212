//! On-flash record formats for the append-only sensor log.
//!
//! Two layouts are supported:
//!
//! - **Legacy**: 9 × f64 little-endian, no header, no checksum. 72 bytes per
//!   record, so a reader steps through the file in fixed strides.
//! - **Framed** (default): a small envelope around a postcard payload that
//!   also carries the aggregation cycle and per-source freshness.
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────┬──────────────────┬──────────┐
//! │ magic "TL"   │ version │ payload len  │ postcard payload │ CRC-32   │
//! │ 2 bytes      │ u8 = 1  │ u16 LE       │ len bytes        │ u32 LE   │
//! └──────────────┴─────────┴──────────────┴──────────────────┴──────────┘
//! ```
//!
//! The CRC (ISO-HDLC) covers version, length and payload.

use alloc::vec::Vec;

use crc::{CRC_32_ISO_HDLC, Crc};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::{SensorSource, Vector3};
use crate::snapshot::{Freshness, Snapshot};

/// Number of f64 fields per record
pub const RECORD_FIELDS: usize = 9;

/// Size of one legacy record in bytes
pub const LEGACY_RECORD_SIZE: usize = RECORD_FIELDS * 8;

pub const FRAME_MAGIC: [u8; 2] = *b"TL";
pub const FRAME_VERSION: u8 = 1;

const FRAME_HEADER_LEN: usize = 5;
const FRAME_CRC_LEN: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// Headerless fixed 72-byte records
    Legacy,
    /// Length-prefixed, versioned, checksummed records
    #[default]
    Framed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("bad record magic")]
    BadMagic,
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
    #[error("payload codec error: {0}")]
    Payload(postcard::Error),
}

/// Cycle number and freshness, only present in framed records
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RecordMeta {
    pub cycle: u32,
    /// In [`SensorSource::ALL`] order
    pub freshness: [Freshness; 4],
}

/// One persisted snapshot.
///
/// Field order: humidity, temperature, pressure, accel x/y/z, gyro x/y/z.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StorageRecord {
    pub values: [f64; RECORD_FIELDS],
    pub meta: Option<RecordMeta>,
}

impl StorageRecord {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let motion = snapshot.motion();
        Self {
            values: [
                snapshot.humidity().percent,
                snapshot.temperature().celsius,
                snapshot.pressure().hpa,
                motion.accel.x,
                motion.accel.y,
                motion.accel.z,
                motion.gyro.x,
                motion.gyro.y,
                motion.gyro.z,
            ],
            meta: Some(RecordMeta {
                cycle: snapshot.cycle(),
                freshness: snapshot.freshness_all(),
            }),
        }
    }

    pub fn humidity(&self) -> f64 {
        self.values[0]
    }

    pub fn temperature(&self) -> f64 {
        self.values[1]
    }

    pub fn pressure(&self) -> f64 {
        self.values[2]
    }

    pub fn accel(&self) -> Vector3 {
        Vector3::new(self.values[3], self.values[4], self.values[5])
    }

    pub fn gyro(&self) -> Vector3 {
        Vector3::new(self.values[6], self.values[7], self.values[8])
    }

    pub fn freshness(&self, source: SensorSource) -> Option<Freshness> {
        self.meta.map(|meta| meta.freshness[source.index()])
    }

    pub fn to_legacy_bytes(&self) -> [u8; LEGACY_RECORD_SIZE] {
        let mut bytes = [0u8; LEGACY_RECORD_SIZE];
        for (chunk, value) in bytes.chunks_exact_mut(8).zip(self.values.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_legacy_bytes(bytes: &[u8; LEGACY_RECORD_SIZE]) -> Self {
        let mut values = [0f64; RECORD_FIELDS];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *value = f64::from_le_bytes(raw);
        }
        Self { values, meta: None }
    }

    /// Encode in the requested on-flash format
    pub fn encode(&self, format: RecordFormat) -> Result<Vec<u8>, RecordError> {
        match format {
            RecordFormat::Legacy => Ok(self.to_legacy_bytes().to_vec()),
            RecordFormat::Framed => self.encode_framed(),
        }
    }

    fn encode_framed(&self) -> Result<Vec<u8>, RecordError> {
        let payload = postcard::to_allocvec(self).map_err(RecordError::Payload)?;
        let len = u16::try_from(payload.len()).map_err(|_| RecordError::TooLarge(payload.len()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + FRAME_CRC_LEN);
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.push(FRAME_VERSION);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = CRC32.checksum(&frame[FRAME_MAGIC.len()..]);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode one framed record from the start of `bytes`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn decode_framed(bytes: &[u8]) -> Result<(Self, usize), RecordError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(RecordError::Truncated {
                needed: FRAME_HEADER_LEN,
                available: bytes.len(),
            });
        }
        if bytes[..2] != FRAME_MAGIC {
            return Err(RecordError::BadMagic);
        }
        if bytes[2] != FRAME_VERSION {
            return Err(RecordError::UnsupportedVersion(bytes[2]));
        }

        let len = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        let total = FRAME_HEADER_LEN + len + FRAME_CRC_LEN;
        if bytes.len() < total {
            return Err(RecordError::Truncated {
                needed: total,
                available: bytes.len(),
            });
        }

        let body_end = FRAME_HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = CRC32.checksum(&bytes[FRAME_MAGIC.len()..body_end]);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch { stored, computed });
        }

        let record = postcard::from_bytes(&bytes[FRAME_HEADER_LEN..body_end])
            .map_err(RecordError::Payload)?;
        Ok((record, total))
    }
}

/// Walks a log buffer record by record.
///
/// A short tail ends the scan with a single truncation error in either format.
/// Legacy logs are read in fixed strides. Framed logs resynchronise on the next
/// magic after a damaged record, so one bad record does not hide the ones after
/// it.
pub struct LogScanner<'a> {
    bytes: &'a [u8],
    offset: usize,
    format: RecordFormat,
}

impl<'a> LogScanner<'a> {
    pub fn new(bytes: &'a [u8], format: RecordFormat) -> Self {
        Self {
            bytes,
            offset: 0,
            format,
        }
    }

    fn next_legacy(&mut self) -> Result<StorageRecord, RecordError> {
        let rest = &self.bytes[self.offset..];
        let Some(chunk) = rest.first_chunk::<LEGACY_RECORD_SIZE>() else {
            self.offset = self.bytes.len();
            return Err(RecordError::Truncated {
                needed: LEGACY_RECORD_SIZE,
                available: rest.len(),
            });
        };
        self.offset += LEGACY_RECORD_SIZE;
        Ok(StorageRecord::from_legacy_bytes(chunk))
    }

    fn next_framed(&mut self) -> Result<StorageRecord, RecordError> {
        match StorageRecord::decode_framed(&self.bytes[self.offset..]) {
            Ok((record, used)) => {
                self.offset += used;
                Ok(record)
            }
            Err(e @ RecordError::Truncated { .. }) => {
                self.offset = self.bytes.len();
                Err(e)
            }
            Err(e) => {
                self.offset = self.resync_from(self.offset + 1);
                Err(e)
            }
        }
    }

    /// Offset of the next frame magic at or after `from`, or the end
    fn resync_from(&self, from: usize) -> usize {
        self.bytes
            .get(from..)
            .and_then(|rest| rest.windows(FRAME_MAGIC.len()).position(|w| w == FRAME_MAGIC))
            .map_or(self.bytes.len(), |pos| from + pos)
    }
}

impl Iterator for LogScanner<'_> {
    type Item = Result<StorageRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        Some(match self.format {
            RecordFormat::Legacy => self.next_legacy(),
            RecordFormat::Framed => self.next_framed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Humidity, Motion, Pressure};

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.advance_cycle();
        snapshot.apply(Humidity { percent: 48.25 }.into());
        snapshot.apply(Pressure { hpa: 1009.5 }.into());
        snapshot.apply(
            Motion {
                accel: Vector3::new(0.1, -0.2, 9.81),
                gyro: Vector3::new(0.01, 0.02, -0.03),
            }
            .into(),
        );
        snapshot.advance_cycle();
        snapshot
    }

    #[test]
    fn legacy_record_is_72_bytes_in_field_order() {
        let record = StorageRecord::from_snapshot(&sample_snapshot());
        let bytes = record.to_legacy_bytes();

        assert_eq!(bytes.len(), 72);
        assert_eq!(bytes[0..8], 48.25f64.to_le_bytes());
        assert_eq!(bytes[16..24], 1009.5f64.to_le_bytes());
        assert_eq!(bytes[64..72], (-0.03f64).to_le_bytes());

        let decoded = StorageRecord::from_legacy_bytes(&bytes);
        assert_eq!(decoded.values, record.values);
        assert_eq!(decoded.meta, None);
    }

    #[test]
    fn framed_record_keeps_freshness() {
        let record = StorageRecord::from_snapshot(&sample_snapshot());
        let frame = record.encode(RecordFormat::Framed).unwrap();

        assert_eq!(frame[..2], FRAME_MAGIC);
        let (decoded, used) = StorageRecord::decode_framed(&frame).unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, record);
        assert_eq!(
            decoded.freshness(SensorSource::Humidity),
            Some(Freshness::Stale { cycles: 1 })
        );
        assert_eq!(
            decoded.freshness(SensorSource::Temperature),
            Some(Freshness::Missing)
        );
    }

    #[test]
    fn framed_record_detects_bit_flips() {
        let record = StorageRecord::from_snapshot(&sample_snapshot());
        let mut frame = record.encode(RecordFormat::Framed).unwrap();
        frame[FRAME_HEADER_LEN + 3] ^= 0x40;

        assert!(matches!(
            StorageRecord::decode_framed(&frame),
            Err(RecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn scanner_skips_a_damaged_frame() {
        let first = StorageRecord::from_snapshot(&sample_snapshot());
        let mut second_snapshot = sample_snapshot();
        second_snapshot.apply(Humidity { percent: 12.0 }.into());
        let second = StorageRecord::from_snapshot(&second_snapshot);

        let mut log = first.encode(RecordFormat::Framed).unwrap();
        let damaged_at = FRAME_HEADER_LEN + 1;
        log[damaged_at] ^= 0xFF;
        log.extend(second.encode(RecordFormat::Framed).unwrap());

        let results: Vec<_> = LogScanner::new(&log, RecordFormat::Framed).collect();
        assert!(results[0].is_err());
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(results.last(), Some(&Ok(second)));
    }

    #[test]
    fn scanner_reports_a_short_legacy_tail() {
        let record = StorageRecord::from_snapshot(&sample_snapshot());
        let mut log = record.to_legacy_bytes().to_vec();
        log.extend_from_slice(&[0u8; 10]);

        let mut scanner = LogScanner::new(&log, RecordFormat::Legacy);
        assert!(scanner.next().unwrap().is_ok());
        assert_eq!(
            scanner.next(),
            Some(Err(RecordError::Truncated {
                needed: 72,
                available: 10
            }))
        );
        assert_eq!(scanner.next(), None);
    }

    #[test]
    fn torn_framed_tail_ends_the_scan() {
        let record = StorageRecord::from_snapshot(&sample_snapshot());
        let mut log = record.encode(RecordFormat::Framed).unwrap();
        // Header promising 40 payload bytes, cut off after a stray magic
        log.extend_from_slice(&[b'T', b'L', FRAME_VERSION, 40, 0]);
        log.extend_from_slice(b"\x07TL\x01\x02");

        let results: Vec<_> = LogScanner::new(&log, RecordFormat::Framed).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(record));
        assert!(matches!(results[1], Err(RecordError::Truncated { .. })));
    }
}
