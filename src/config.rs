use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::analysis::DetectionStrategy;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            server: ServerConfig::default(),
            detection: DetectionConfig::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Listener and CORS settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed browser origins; "*" allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Scoring thresholds, window sizes and capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub strategy: DetectionStrategy,

    // Weighted strategy
    pub fall_threshold: f32,
    pub angle_threshold_deg: f32,
    pub velocity_threshold: f32,
    pub hip_height_threshold: f32,
    pub sudden_change_threshold_deg: f32,
    pub sudden_change_window: usize,

    // Simple horizontal/low strategy
    pub simple_horizontal_tolerance: f32,
    pub simple_low_threshold: f32,
    pub simple_confidence: f32,

    // History
    pub short_history_capacity: usize,
    pub long_history_capacity: usize,

    // Gait
    pub gait_window: usize,
    pub gait_high_threshold: f32,
    pub gait_medium_threshold: f32,

    pub incident_log_capacity: usize,

    // Frame timing
    pub frame_rate: f32,
    /// Derive velocity from client timestamps instead of `frame_rate`
    pub measure_frame_interval: bool,

    /// Joints below this confidence are treated as undetected
    pub min_joint_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::Weighted,
            fall_threshold: 0.6,
            angle_threshold_deg: 60.0,
            velocity_threshold: 2.0,
            hip_height_threshold: 0.7,
            sudden_change_threshold_deg: 30.0,
            sudden_change_window: 10,
            simple_horizontal_tolerance: 0.15,
            simple_low_threshold: 0.5,
            simple_confidence: 0.85,
            short_history_capacity: 30,
            long_history_capacity: 90,
            gait_window: 30,
            gait_high_threshold: 0.15,
            gait_medium_threshold: 0.08,
            incident_log_capacity: 100,
            frame_rate: 30.0,
            measure_frame_interval: false,
            min_joint_confidence: 0.0,
        }
    }
}

/// Where keypoints come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Client sends keypoints with each frame
    Inline,
    /// Frames are posted to a pose-inference service
    Http { url: String, timeout_ms: u64 },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Inline
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for rolling JSON activity logs; console only when unset
    pub json_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
        }
    }
}

impl Config {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".fallwatch"))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|p| Self::load(&p)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Reject settings the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        if let SourceConfig::Http { url, timeout_ms } = &self.source {
            if url.trim().is_empty() {
                bail!("source.url must not be empty");
            }
            if *timeout_ms == 0 {
                bail!("source.timeout_ms must be positive");
            }
        }
        Ok(())
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("fall_threshold", self.fall_threshold),
            ("simple_confidence", self.simple_confidence),
            ("min_joint_confidence", self.min_joint_confidence),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        let capacities = [
            ("short_history_capacity", self.short_history_capacity),
            ("long_history_capacity", self.long_history_capacity),
            ("gait_window", self.gait_window),
            ("incident_log_capacity", self.incident_log_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }

        if self.gait_window > self.long_history_capacity {
            bail!(
                "gait_window ({}) exceeds long_history_capacity ({})",
                self.gait_window,
                self.long_history_capacity
            );
        }
        if self.sudden_change_window > self.short_history_capacity {
            bail!(
                "sudden_change_window ({}) exceeds short_history_capacity ({})",
                self.sudden_change_window,
                self.short_history_capacity
            );
        }
        if self.gait_medium_threshold > self.gait_high_threshold {
            bail!("gait_medium_threshold must not exceed gait_high_threshold");
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            bail!("frame_rate must be positive, got {}", self.frame_rate);
        }
        Ok(())
    }
}
