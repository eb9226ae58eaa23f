//! Historical build timing records, used to estimate remaining time for
//! in-flight builds.
//!
//! One fixed-size binary record exists per (tenant, project, branch, job):
//! a 1-byte version, ten 16-bit success-duration samples, ten 16-bit
//! failure-duration samples, and ten 8-bit result-class samples, all
//! big-endian. Storage of the encoded records is external; this module
//! owns the codec and the in-memory table.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::build::BuildResult;
use crate::error::{Error, Result};

const RECORD_VERSION: u8 = 1;
const SAMPLES: usize = 10;
/// version + 10 u16 + 10 u16 + 10 u8
pub const RECORD_LEN: usize = 1 + SAMPLES * 2 + SAMPLES * 2 + SAMPLES;

/// Result classes stored in the record's third ring.
const CLASS_OTHER: u8 = 0;
const CLASS_SUCCESS: u8 = 1;
const CLASS_FAILURE: u8 = 2;

/// Ring buffers of recent build durations for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTimeRecord {
    success_durations: [u16; SAMPLES],
    failure_durations: [u16; SAMPLES],
    results: [u8; SAMPLES],
}

impl Default for JobTimeRecord {
    fn default() -> Self {
        Self {
            success_durations: [0; SAMPLES],
            failure_durations: [0; SAMPLES],
            results: [0; SAMPLES],
        }
    }
}

impl JobTimeRecord {
    /// Record one completed build. Durations are whole seconds, saturated
    /// at the 16-bit range; the oldest sample falls off.
    pub fn add(&mut self, duration_secs: u64, result: BuildResult) {
        let sample = duration_secs.min(u16::MAX as u64) as u16;
        match result {
            BuildResult::Success => push(&mut self.success_durations, sample),
            BuildResult::Failure => push(&mut self.failure_durations, sample),
            _ => {}
        }
        push(&mut self.results, result_class(result));
    }

    /// Mean of the recorded success durations, in seconds. None until at
    /// least one success has been recorded.
    pub fn estimated_duration(&self) -> Option<f64> {
        let samples: Vec<u16> = self
            .success_durations
            .iter()
            .copied()
            .filter(|&s| s != 0)
            .collect();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RECORD_LEN);
        buf.put_u8(RECORD_VERSION);
        for s in self.success_durations {
            buf.put_u16(s);
        }
        for s in self.failure_durations {
            buf.put_u16(s);
        }
        for s in self.results {
            buf.put_u8(s);
        }
        buf.freeze()
    }

    pub fn decode(mut data: impl Buf) -> Result<Self> {
        if data.remaining() != RECORD_LEN {
            return Err(Error::TimeRecordDecode(format!(
                "expected {RECORD_LEN} bytes, got {}",
                data.remaining()
            )));
        }
        let version = data.get_u8();
        if version != RECORD_VERSION {
            return Err(Error::TimeRecordDecode(format!(
                "unknown version {version}"
            )));
        }
        let mut record = Self::default();
        for slot in record.success_durations.iter_mut() {
            *slot = data.get_u16();
        }
        for slot in record.failure_durations.iter_mut() {
            *slot = data.get_u16();
        }
        for slot in record.results.iter_mut() {
            *slot = data.get_u8();
        }
        Ok(record)
    }
}

fn push<T: Copy>(ring: &mut [T; SAMPLES], sample: T) {
    ring.rotate_left(1);
    ring[SAMPLES - 1] = sample;
}

fn result_class(result: BuildResult) -> u8 {
    match result {
        BuildResult::Success => CLASS_SUCCESS,
        BuildResult::Failure => CLASS_FAILURE,
        _ => CLASS_OTHER,
    }
}

/// Key for one timing record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeKey {
    pub tenant: String,
    pub project: String,
    pub branch: String,
    pub job: String,
}

/// In-memory table of timing records.
#[derive(Debug, Default)]
pub struct TimeDatabase {
    records: HashMap<TimeKey, JobTimeRecord>,
}

impl TimeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: TimeKey, duration_secs: u64, result: BuildResult) {
        self.records.entry(key).or_default().add(duration_secs, result);
    }

    pub fn estimated_duration(&self, key: &TimeKey) -> Option<f64> {
        self.records.get(key)?.estimated_duration()
    }

    pub fn get(&self, key: &TimeKey) -> Option<&JobTimeRecord> {
        self.records.get(key)
    }

    /// Install a record decoded from external storage.
    pub fn load(&mut self, key: TimeKey, record: JobTimeRecord) {
        self.records.insert(key, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_rotation() {
        let mut record = JobTimeRecord::default();
        for i in 1..=12 {
            record.add(i * 10, BuildResult::Success);
        }
        // Two oldest samples (10, 20) have fallen off.
        assert_eq!(record.success_durations[0], 30);
        assert_eq!(record.success_durations[SAMPLES - 1], 120);
        assert_eq!(record.estimated_duration(), Some(75.0));
    }

    #[test]
    fn test_estimate_ignores_failures() {
        let mut record = JobTimeRecord::default();
        assert_eq!(record.estimated_duration(), None);
        record.add(100, BuildResult::Failure);
        assert_eq!(record.estimated_duration(), None);
        record.add(60, BuildResult::Success);
        record.add(120, BuildResult::Success);
        assert_eq!(record.estimated_duration(), Some(90.0));
    }

    #[test]
    fn test_codec_round_trip() {
        let mut record = JobTimeRecord::default();
        record.add(90, BuildResult::Success);
        record.add(30, BuildResult::Failure);
        record.add(70000, BuildResult::Success); // saturates at u16::MAX

        let encoded = record.encode();
        assert_eq!(encoded.len(), RECORD_LEN);
        let decoded = JobTimeRecord::decode(encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.success_durations[SAMPLES - 1], u16::MAX);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(JobTimeRecord::decode(Bytes::from_static(&[0u8; 3])).is_err());
        let mut bad_version = BytesMut::zeroed(RECORD_LEN);
        bad_version[0] = 9;
        assert!(JobTimeRecord::decode(bad_version.freeze()).is_err());
    }
}
