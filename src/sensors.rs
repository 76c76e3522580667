use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::TrackerResult;
use crate::types::{AccelerationSample, SensorReading};

/// Supplier of acceleration samples, polled once per tick
pub trait SensorSource {
    /// Sample for this tick, `None` when the sensor had nothing
    fn next_sample(&mut self) -> Option<AccelerationSample>;

    /// Compass heading in degrees, if the source has one
    fn current_heading(&mut self) -> Option<f64> {
        None
    }

    /// True once a finite source has nothing left to deliver
    fn is_exhausted(&self) -> bool {
        false
    }
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<SensorReading>,
}

/// Replays a recorded session log, one reading per tick
pub struct ReplaySource {
    readings: VecDeque<SensorReading>,
    heading: Option<f64>,
}

impl ReplaySource {
    pub fn new(readings: Vec<SensorReading>) -> Self {
        Self {
            readings: readings.into(),
            heading: None,
        }
    }

    /// Load `{ "readings": [...] }` JSON, gzip-compressed if the extension is `.gz`
    pub fn load<P: AsRef<Path>>(path: P) -> TrackerResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let log: LogFile = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        log::info!("Loaded {} readings from {}", log.readings.len(), path.display());
        Ok(Self::new(log.readings))
    }

    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
}

impl SensorSource for ReplaySource {
    fn next_sample(&mut self) -> Option<AccelerationSample> {
        let reading = self.readings.pop_front()?;
        if reading.heading.is_some() {
            self.heading = reading.heading;
        }
        reading.accel
    }

    fn current_heading(&mut self) -> Option<f64> {
        self.heading
    }

    fn is_exhausted(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Kind of motion in a scripted segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Stationary,
    Walking,
}

/// Deterministic gravity-removed acceleration for demos and tests.
///
/// Stationary ticks are small hash noise pointing in arbitrary directions.
/// Walking ticks follow a ~2 Hz gait oscillation on top of a forward bias, so
/// consecutive vectors stay nearly parallel.
pub struct SyntheticWalkSource {
    segments: Vec<(Motion, u64)>,
    segment_index: usize,
    segment_tick: u64,
    tick: u64,
    dt_secs: f64,
    heading: Option<f64>,
    dropout_every: Option<u64>,
}

impl SyntheticWalkSource {
    pub fn new(segments: Vec<(Motion, u64)>, dt_secs: f64) -> Self {
        Self {
            segments,
            segment_index: 0,
            segment_tick: 0,
            tick: 0,
            dt_secs,
            heading: None,
            dropout_every: None,
        }
    }

    /// Compass heading reported from now on
    pub fn set_heading(&mut self, heading: Option<f64>) {
        self.heading = heading;
    }

    /// Drop every n-th sample to exercise the missing-sample path
    pub fn with_dropouts(mut self, every: u64) -> Self {
        self.dropout_every = Some(every.max(1));
        self
    }

    /// Replace the remaining script
    pub fn queue(&mut self, segments: Vec<(Motion, u64)>) {
        self.segments = segments;
        self.segment_index = 0;
        self.segment_tick = 0;
    }

    fn current_motion(&mut self) -> Option<Motion> {
        while let Some(&(motion, ticks)) = self.segments.get(self.segment_index) {
            if self.segment_tick < ticks {
                self.segment_tick += 1;
                return Some(motion);
            }
            self.segment_index += 1;
            self.segment_tick = 0;
        }
        None
    }
}

/// Deterministic pseudo-noise in [-1, 1]
fn hash_noise(n: f64) -> f64 {
    let v = (n * 12.9898).sin() * 43_758.545_3;
    (v - v.floor()) * 2.0 - 1.0
}

impl SensorSource for SyntheticWalkSource {
    fn next_sample(&mut self) -> Option<AccelerationSample> {
        let motion = self.current_motion()?;
        let n = self.tick as f64;
        self.tick += 1;

        if let Some(every) = self.dropout_every {
            if self.tick % every == 0 {
                return None;
            }
        }

        let sample = match motion {
            Motion::Stationary => AccelerationSample::new(
                hash_noise(n) * 0.01,
                hash_noise(n + 0.31) * 0.01,
                hash_noise(n + 0.67) * 0.01,
            ),
            Motion::Walking => {
                let phase = 2.0 * PI * 2.0 * n * self.dt_secs;
                AccelerationSample::new(
                    0.05 * phase.sin() + hash_noise(n) * 0.002,
                    0.2 + 0.1 * phase.sin() + hash_noise(n + 0.31) * 0.002,
                    0.12 * phase.cos() + hash_noise(n + 0.67) * 0.002,
                )
            }
        };
        Some(sample)
    }

    fn current_heading(&mut self) -> Option<f64> {
        self.heading
    }

    fn is_exhausted(&self) -> bool {
        self.segments
            .iter()
            .skip(self.segment_index)
            .enumerate()
            .all(|(i, (_, ticks))| if i == 0 { self.segment_tick >= *ticks } else { *ticks == 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::angle_cosine;

    #[test]
    fn test_synthetic_script_length() {
        let mut source =
            SyntheticWalkSource::new(vec![(Motion::Stationary, 3), (Motion::Walking, 2)], 0.01);
        let mut count = 0;
        while !source.is_exhausted() {
            assert!(source.next_sample().is_some());
            count += 1;
        }
        assert_eq!(count, 5);
        assert!(source.next_sample().is_none());
    }

    #[test]
    fn test_synthetic_walking_vectors_are_parallel() {
        let mut source = SyntheticWalkSource::new(vec![(Motion::Walking, 200)], 0.01);
        let mut previous = source.next_sample().unwrap().to_vector();
        for _ in 1..200 {
            let v = source.next_sample().unwrap().to_vector();
            assert!(angle_cosine(&previous, &v).unwrap() > 0.9);
            previous = v;
        }
    }

    #[test]
    fn test_synthetic_stationary_is_uncorrelated() {
        let mut source = SyntheticWalkSource::new(vec![(Motion::Stationary, 500)], 0.01);
        let mut previous = source.next_sample().unwrap().to_vector();
        let mut sum = 0.0;
        for _ in 1..500 {
            let v = source.next_sample().unwrap().to_vector();
            sum += angle_cosine(&previous, &v).unwrap();
            previous = v;
        }
        assert!((sum / 499.0).abs() < 0.3);
    }

    #[test]
    fn test_dropouts() {
        let mut source =
            SyntheticWalkSource::new(vec![(Motion::Walking, 10)], 0.01).with_dropouts(5);
        let missing = (0..10).filter(|_| source.next_sample().is_none()).count();
        assert_eq!(missing, 2);
    }

    #[test]
    fn test_replay_log() {
        let json = r#"{"readings": [
            {"timestamp": 0.00, "accel": {"x": 0.0, "y": 0.1, "z": 0.0}, "heading": 10.0},
            {"timestamp": 0.01, "accel": null},
            {"timestamp": 0.02, "accel": {"x": 0.0, "y": 0.2, "z": 0.0}}
        ]}"#;
        let path = std::env::temp_dir().join(format!("stride_replay_{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        let mut source = ReplaySource::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(source.remaining(), 3);
        assert!(source.next_sample().is_some());
        assert_eq!(source.current_heading(), Some(10.0));
        assert!(source.next_sample().is_none());
        assert!(!source.is_exhausted());
        assert!(source.next_sample().is_some());
        // Heading persists until the log reports a new one
        assert_eq!(source.current_heading(), Some(10.0));
        assert!(source.is_exhausted());
    }
}
