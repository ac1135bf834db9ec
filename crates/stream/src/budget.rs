use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Streaming configuration: how far to load and eject along the portal
/// graph, and how much work each frame may do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Chunks reachable within this path distance of the camera are loaded.
    pub max_load_path: f32,
    /// Online chunks farther than this along the graph are ejected.
    pub min_eject_path: f32,
    /// Maximum number of chunks ejected per frame.
    pub max_eject_chunks: usize,
    /// Maximum number of loads in flight on the loader thread.
    pub max_loading_chunks: usize,
    /// Time allowed for focusing each frame, in milliseconds.
    pub focus_budget_ms: u64,
    /// Maximum number of completed loads bound per frame.
    pub bind_budget: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_load_path: 750.0,
            min_eject_path: 1000.0,
            max_eject_chunks: 1,
            max_loading_chunks: 4,
            focus_budget_ms: 2,
            bind_budget: 8,
        }
    }
}

impl StreamConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, StreamError> {
        let config: StreamConfig = serde_yaml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, StreamError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, StreamError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn focus_budget(&self) -> Duration {
        Duration::from_millis(self.focus_budget_ms)
    }

    /// Loading must stop short of ejecting, or chunks would thrash.
    fn check(&self) -> Result<(), StreamError> {
        if self.min_eject_path <= self.max_load_path {
            return Err(StreamError::Config(format!(
                "min_eject_path ({}) must exceed max_load_path ({})",
                self.min_eject_path, self.max_load_path
            )));
        }
        if self.max_loading_chunks == 0 {
            return Err(StreamError::Config("max_loading_chunks must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-frame streaming statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    pub loads_started: usize,
    pub loads_bound: usize,
    pub loads_discarded: usize,
    pub chunks_ejected: usize,
    pub chunks_focused: usize,
    pub loading: usize,
    pub online: usize,
    /// Path distance to the unloaded chunk the scan wanted most.
    pub closest_unloaded: Option<f32>,
    pub frame_time: Duration,
}

/// Frame time tracker for instrumentation.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recorded(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let samples = self.recorded();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recorded().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recorded().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.max_load_path, 750.0);
        assert_eq!(config.min_eject_path, 1000.0);
        assert_eq!(config.max_eject_chunks, 1);
        assert_eq!(config.focus_budget(), Duration::from_millis(2));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = StreamConfig::from_yaml_str("max_load_path: 300\nmin_eject_path: 450\n").unwrap();
        assert_eq!(config.max_load_path, 300.0);
        assert_eq!(config.min_eject_path, 450.0);
        assert_eq!(config.max_loading_chunks, 4);

        let back = StreamConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn eject_path_inside_load_path_is_rejected() {
        let err = StreamConfig::from_yaml_str("max_load_path: 500\nmin_eject_path: 400\n").unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.yaml");
        std::fs::write(&path, "max_eject_chunks: 3\n").unwrap();
        assert_eq!(StreamConfig::load(&path).unwrap().max_eject_chunks, 3);
    }

    #[test]
    fn frame_timer_tracks_history() {
        let mut timer = FrameTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn frame_timer_wraps_around() {
        let mut timer = FrameTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30)); // overwrites first

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
    }
}
