//! Per-frame fall scoring.
//!
//! Two strategies sit behind [`FallScorer`]:
//!
//! - **Weighted**: additive multi-factor heuristic over the current features
//!   and the short angle history. Each clause fires independently and adds
//!   its weight and a reason.
//! - **SimpleHorizontal**: a coarse "torso horizontal and low in frame" test
//!   that needs no history. Confidence is fixed.
//!
//! The scorer has no side effects; recording incidents and alerting is the
//! caller's job.

use serde::{Deserialize, Serialize};

use super::features::FeatureSet;
use crate::config::DetectionConfig;

const ANGLE_WEIGHT: f32 = 0.4;
const VELOCITY_WEIGHT: f32 = 0.3;
const LOW_POSITION_WEIGHT: f32 = 0.3;
const SUDDEN_CHANGE_WEIGHT: f32 = 0.2;

/// Which scoring algorithm to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStrategy {
    Weighted,
    SimpleHorizontal,
}

impl Default for DetectionStrategy {
    fn default() -> Self {
        Self::Weighted
    }
}

impl DetectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::SimpleHorizontal => "simple-horizontal",
        }
    }
}

impl std::str::FromStr for DetectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "weighted" => Ok(Self::Weighted),
            "simple-horizontal" | "simple" => Ok(Self::SimpleHorizontal),
            _ => Err(format!("Unknown detection strategy: {}", s)),
        }
    }
}

/// Result of scoring one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallScore {
    /// Risk in [0, 1]
    pub score: f32,
    pub is_fall: bool,
    /// Fired clauses, in evaluation order
    pub reasons: Vec<String>,
}

impl FallScore {
    pub fn none() -> Self {
        Self {
            score: 0.0,
            is_fall: false,
            reasons: Vec::new(),
        }
    }
}

/// Thresholds the scorer reads, lifted out of [`DetectionConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallThresholds {
    pub fall_threshold: f32,
    pub angle_threshold_deg: f32,
    pub velocity_threshold: f32,
    pub hip_height_threshold: f32,
    pub sudden_change_threshold_deg: f32,
    pub sudden_change_window: usize,
    pub simple_horizontal_tolerance: f32,
    pub simple_low_threshold: f32,
    pub simple_confidence: f32,
}

impl Default for FallThresholds {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for FallThresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            fall_threshold: config.fall_threshold,
            angle_threshold_deg: config.angle_threshold_deg,
            velocity_threshold: config.velocity_threshold,
            hip_height_threshold: config.hip_height_threshold,
            sudden_change_threshold_deg: config.sudden_change_threshold_deg,
            sudden_change_window: config.sudden_change_window,
            simple_horizontal_tolerance: config.simple_horizontal_tolerance,
            simple_low_threshold: config.simple_low_threshold,
            simple_confidence: config.simple_confidence,
        }
    }
}

/// Maps features (and recent history) to a [`FallScore`]
#[derive(Debug, Clone, Copy)]
pub struct FallScorer {
    strategy: DetectionStrategy,
    thresholds: FallThresholds,
}

impl FallScorer {
    pub fn new(strategy: DetectionStrategy, thresholds: FallThresholds) -> Self {
        Self { strategy, thresholds }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.strategy, FallThresholds::from(config))
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    /// Score `current`. `history` yields earlier frames' features, oldest
    /// first, not including `current`.
    pub fn score<'a, I>(&self, current: &FeatureSet, history: I) -> FallScore
    where
        I: IntoIterator<Item = &'a FeatureSet>,
    {
        match self.strategy {
            DetectionStrategy::Weighted => self.score_weighted(current, history),
            DetectionStrategy::SimpleHorizontal => self.score_simple(current),
        }
    }

    fn score_weighted<'a, I>(&self, current: &FeatureSet, history: I) -> FallScore
    where
        I: IntoIterator<Item = &'a FeatureSet>,
    {
        let t = &self.thresholds;
        let mut score = 0.0f32;
        let mut reasons = Vec::new();

        if let Some(angle) = current.body_angle_deg {
            if angle > t.angle_threshold_deg {
                score += ANGLE_WEIGHT;
                reasons.push(format!("Body angle: {:.1}°", angle));
            }
        }

        if current.vertical_velocity > t.velocity_threshold {
            score += VELOCITY_WEIGHT;
            reasons.push(format!("Fast downward movement: {:.2}", current.vertical_velocity));
        }

        if let Some(hip) = current.hip_height {
            if hip > t.hip_height_threshold {
                score += LOW_POSITION_WEIGHT;
                reasons.push(format!("Low position: {:.2}", hip));
            }
        }

        if let Some(angle) = current.body_angle_deg {
            if let Some(mean) = recent_angle_mean(history, t.sudden_change_window) {
                let change = angle - mean;
                if change > t.sudden_change_threshold_deg {
                    score += SUDDEN_CHANGE_WEIGHT;
                    reasons.push(format!("Sudden angle change: {:.1}°", change));
                }
            }
        }

        let score = score.clamp(0.0, 1.0);
        FallScore {
            score,
            is_fall: score >= t.fall_threshold,
            reasons,
        }
    }

    fn score_simple(&self, current: &FeatureSet) -> FallScore {
        let t = &self.thresholds;
        let (Some(hip), Some(shoulder)) = (current.hip_height, current.shoulder_height) else {
            return FallScore::none();
        };

        let is_horizontal = (hip - shoulder).abs() < t.simple_horizontal_tolerance;
        let is_low = hip > t.simple_low_threshold;

        if is_horizontal && is_low {
            FallScore {
                score: t.simple_confidence,
                is_fall: true,
                reasons: Vec::new(),
            }
        } else {
            FallScore::none()
        }
    }
}

/// Mean of the last `window` defined angles; `None` until that many exist
fn recent_angle_mean<'a, I>(history: I, window: usize) -> Option<f32>
where
    I: IntoIterator<Item = &'a FeatureSet>,
{
    if window == 0 {
        return None;
    }
    let angles: Vec<f32> = history.into_iter().filter_map(|f| f.body_angle_deg).collect();
    if angles.len() < window {
        return None;
    }
    let recent = &angles[angles.len() - window..];
    Some(recent.iter().sum::<f32>() / window as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn weighted() -> FallScorer {
        FallScorer::new(DetectionStrategy::Weighted, FallThresholds::default())
    }

    fn features(angle: Option<f32>, velocity: f32, hip: f32) -> FeatureSet {
        FeatureSet {
            body_angle_deg: angle,
            vertical_velocity: velocity,
            hip_height: Some(hip),
            ..FeatureSet::default()
        }
    }

    fn angle_history(angles: &[f32]) -> Vec<FeatureSet> {
        angles.iter().map(|a| features(Some(*a), 0.0, 0.4)).collect()
    }

    #[test]
    fn test_angle_only_is_not_fall() {
        let result = weighted().score(&features(Some(65.0), 0.0, 0.3), &[]);
        assert!((result.score - 0.4).abs() < 1e-6);
        assert!(!result.is_fall);
        assert_eq!(result.reasons, vec!["Body angle: 65.0°".to_string()]);
    }

    #[test]
    fn test_three_clauses_is_fall() {
        let result = weighted().score(&features(Some(65.0), 2.5, 0.8), &[]);
        assert!((result.score - 1.0).abs() < 1e-6);
        assert!(result.is_fall);
        assert_eq!(result.reasons.len(), 3);
        assert!(result.reasons[0].starts_with("Body angle"));
        assert!(result.reasons[1].starts_with("Fast downward movement"));
        assert!(result.reasons[2].starts_with("Low position"));
    }

    #[test]
    fn test_nothing_fires() {
        let result = weighted().score(&features(Some(10.0), 0.1, 0.4), &[]);
        assert_eq!(result, FallScore::none());
    }

    #[test]
    fn test_missing_angle_never_fires_angle_clauses() {
        let history = angle_history(&[0.0; 10]);
        let result = weighted().score(&features(None, 0.0, 0.4), &history);
        assert_eq!(result.score, 0.0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_sudden_change_needs_full_window() {
        let current = features(Some(50.0), 0.0, 0.4);

        // Nine samples: not enough history
        let result = weighted().score(&current, &angle_history(&[5.0; 9]));
        assert!(result.reasons.is_empty());

        // Ten samples averaging 5 degrees: 45 degree jump fires
        let result = weighted().score(&current, &angle_history(&[5.0; 10]));
        assert!((result.score - 0.2).abs() < 1e-6);
        assert_eq!(result.reasons, vec!["Sudden angle change: 45.0°".to_string()]);
    }

    #[test]
    fn test_sudden_change_uses_last_window_only() {
        // Old upright samples are outside the window; recent ones are already tilted
        let mut angles = vec![0.0; 20];
        angles.extend_from_slice(&[40.0; 10]);
        let result = weighted().score(&features(Some(55.0), 0.0, 0.4), &angle_history(&angles));
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_all_four_clauses_clamped() {
        let history = angle_history(&[0.0; 10]);
        let result = weighted().score(&features(Some(85.0), 3.0, 0.9), &history);
        assert_eq!(result.reasons.len(), 4);
        assert_eq!(result.score, 1.0);
        assert!(result.is_fall);
    }

    #[test]
    fn test_simple_strategy_horizontal_and_low() {
        let scorer = FallScorer::new(DetectionStrategy::SimpleHorizontal, FallThresholds::default());
        let current = FeatureSet {
            hip_height: Some(0.55),
            shoulder_height: Some(0.5),
            ..FeatureSet::default()
        };
        let result = scorer.score(&current, &[]);
        assert!(result.is_fall);
        assert!((result.score - 0.85).abs() < 1e-6);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_simple_strategy_upright() {
        let scorer = FallScorer::new(DetectionStrategy::SimpleHorizontal, FallThresholds::default());
        let current = FeatureSet {
            hip_height: Some(0.55),
            shoulder_height: Some(0.25),
            ..FeatureSet::default()
        };
        assert_eq!(scorer.score(&current, &[]), FallScore::none());

        let high = FeatureSet {
            hip_height: Some(0.3),
            shoulder_height: Some(0.28),
            ..FeatureSet::default()
        };
        assert_eq!(scorer.score(&high, &[]), FallScore::none());
    }

    #[test]
    fn test_simple_strategy_missing_shoulders() {
        let scorer = FallScorer::new(DetectionStrategy::SimpleHorizontal, FallThresholds::default());
        let current = FeatureSet {
            hip_height: Some(0.9),
            ..FeatureSet::default()
        };
        assert!(!scorer.score(&current, &[]).is_fall);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("weighted".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::Weighted);
        assert_eq!(
            "simple_horizontal".parse::<DetectionStrategy>().unwrap(),
            DetectionStrategy::SimpleHorizontal
        );
        assert!("neural".parse::<DetectionStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&DetectionStrategy::SimpleHorizontal).unwrap(),
            "\"simple-horizontal\""
        );
    }

    proptest! {
        #[test]
        fn prop_score_monotonic_in_angle(
            a in 0.0f32..180.0,
            b in 0.0f32..180.0,
            velocity in -5.0f32..5.0,
            hip in 0.0f32..1.0,
            past in proptest::collection::vec(0.0f32..180.0, 0..20),
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let history = angle_history(&past);
            let s_lo = weighted().score(&features(Some(lo), velocity, hip), &history);
            let s_hi = weighted().score(&features(Some(hi), velocity, hip), &history);
            prop_assert!(s_hi.score >= s_lo.score);
        }

        #[test]
        fn prop_score_monotonic_in_velocity_and_height(
            angle in 0.0f32..180.0,
            v1 in -5.0f32..5.0,
            v2 in -5.0f32..5.0,
            h1 in 0.0f32..1.0,
            h2 in 0.0f32..1.0,
        ) {
            let (v_lo, v_hi) = if v1 <= v2 { (v1, v2) } else { (v2, v1) };
            let (h_lo, h_hi) = if h1 <= h2 { (h1, h2) } else { (h2, h1) };
            let base = weighted().score(&features(Some(angle), v_lo, h_lo), &[]);
            let faster = weighted().score(&features(Some(angle), v_hi, h_lo), &[]);
            let lower = weighted().score(&features(Some(angle), v_lo, h_hi), &[]);
            prop_assert!(faster.score >= base.score);
            prop_assert!(lower.score >= base.score);
        }

        #[test]
        fn prop_score_in_unit_range(
            angle in proptest::option::of(0.0f32..180.0),
            velocity in -10.0f32..10.0,
            hip in 0.0f32..1.0,
        ) {
            let result = weighted().score(&features(angle, velocity, hip), &angle_history(&[0.0; 10]));
            prop_assert!((0.0..=1.0).contains(&result.score));
            prop_assert_eq!(result.is_fall, result.score >= 0.6);
        }
    }
}
