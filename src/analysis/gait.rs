//! Gait stability over a sliding window.
//!
//! Lateral wobble of the hips and irregular stance width are early signs of
//! fall risk that no single frame shows. The analyzer reads the most recent
//! `window` samples of the session's long history and reports their spread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::HistoryBuffer;
use crate::config::DetectionConfig;

/// One gait observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaitSample {
    pub step_width: f32,
    pub com_x: f32,
    pub timestamp: DateTime<Utc>,
}

/// Discrete instability tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitAssessment {
    pub instability_score: f32,
    /// Population std-dev of step width over the window
    pub step_width_variance: f32,
    /// Population std-dev of lateral centre of mass over the window
    pub com_variance: f32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy)]
pub struct GaitStabilityAnalyzer {
    window: usize,
    high_threshold: f32,
    medium_threshold: f32,
}

impl Default for GaitStabilityAnalyzer {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}

impl GaitStabilityAnalyzer {
    pub fn new(window: usize, high_threshold: f32, medium_threshold: f32) -> Self {
        Self {
            window: window.max(1),
            high_threshold,
            medium_threshold,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            config.gait_window,
            config.gait_high_threshold,
            config.gait_medium_threshold,
        )
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Assess the buffer's newest `window` samples. `None` while fewer are held.
    pub fn assess(&self, history: &HistoryBuffer<GaitSample>) -> Option<GaitAssessment> {
        if history.len() < self.window {
            return None;
        }

        let (widths, coms): (Vec<f32>, Vec<f32>) = history
            .recent(self.window)
            .map(|s| (s.step_width, s.com_x))
            .unzip();

        let step_width_variance = population_std(&widths);
        let com_variance = population_std(&coms);
        let instability_score = (2.0 * step_width_variance + com_variance) / 3.0;

        Some(GaitAssessment {
            instability_score,
            step_width_variance,
            com_variance,
            risk_level: self.classify(instability_score),
        })
    }

    pub fn classify(&self, instability_score: f32) -> RiskLevel {
        if instability_score > self.high_threshold {
            RiskLevel::High
        } else if instability_score > self.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Shifted-data variance: deviations are taken from the first value, so a
/// constant series is exactly zero.
fn population_std(values: &[f32]) -> f32 {
    let Some(&shift) = values.first() else {
        return 0.0;
    };
    let n = values.len() as f32;
    let (sum, sum_sq) = values.iter().fold((0.0f32, 0.0f32), |(s, sq), v| {
        let d = v - shift;
        (s + d, sq + d * d)
    });
    let variance = (sum_sq - sum * sum / n) / n;
    variance.max(0.0).sqrt()
}
