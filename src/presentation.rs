use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

/// Receiver of displacement updates and log lines
pub trait PresentationSink {
    fn on_displacement_update(&mut self, meters: f64);
    fn on_log_line(&mut self, text: &str);
}

/// Forwards everything to the `log` facade
#[derive(Debug, Default)]
pub struct LogSink {
    last_reported_m: f64,
}

impl PresentationSink for LogSink {
    fn on_displacement_update(&mut self, meters: f64) {
        // Only report whole-centimetre changes
        if (meters - self.last_reported_m).abs() >= 0.01 {
            log::info!("Displacement: {:.2}m", meters);
            self.last_reported_m = meters;
        }
    }

    fn on_log_line(&mut self, text: &str) {
        log::debug!("{}", text);
    }
}

/// Keeps every update, newest last
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub displacements: Vec<f64>,
    pub lines: Vec<String>,
}

impl PresentationSink for RecordingSink {
    fn on_displacement_update(&mut self, meters: f64) {
        self.displacements.push(meters);
    }

    fn on_log_line(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }
}

/// Point-in-time summary of a session, written as JSON for external viewers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp: f64,
    pub mode: String,
    pub walking: bool,
    pub displacement_m: f64,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub inconclusive_ticks: u64,
    pub walking_transitions: u64,
    pub calibration_intervals: usize,
    pub calibration_complete: bool,
    pub average_velocity: Option<f64>,
    pub average_wma_baseline: Option<f64>,
}

impl StatusSnapshot {
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
