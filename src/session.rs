//! Per-connection scoring state.
//!
//! A [`SessionState`] is created when a client connects and dropped when it
//! disconnects. It exclusively owns its two history buffers; nothing else in
//! the process can see or mutate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::analysis::{
    FallScore, FallScorer, FeatureExtractor, FeatureSet, GaitAssessment, GaitSample,
    GaitStabilityAnalyzer, HistoryBuffer,
};
use crate::config::DetectionConfig;
use crate::pose::PersonFrame;

/// Stateless scoring components, shared by every session
#[derive(Debug, Clone, Copy)]
pub struct Scoring {
    pub extractor: FeatureExtractor,
    pub scorer: FallScorer,
    pub gait: GaitStabilityAnalyzer,
    /// Derive velocity from client timestamps when both frames carry one
    pub measure_frame_interval: bool,
}

impl Scoring {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.frame_rate),
            scorer: FallScorer::from_config(config),
            gait: GaitStabilityAnalyzer::from_config(config),
            measure_frame_interval: config.measure_frame_interval,
        }
    }
}

/// Short-history entry: the scored person and what was derived from it
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub person: PersonFrame,
    pub features: FeatureSet,
    pub timestamp_ms: Option<u64>,
}

/// Outward result for one processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "frame_result")]
pub struct FrameResult {
    pub session_id: Uuid,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub people_detected: usize,
    /// Detected joints on the scored person
    pub keypoints_detected: usize,
    pub fall: Option<FallScore>,
    pub gait: Option<GaitAssessment>,
}

/// One slot in a shared active-session count, released on drop
#[derive(Debug)]
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionState {
    id: Uuid,
    opened_at: Instant,
    short: HistoryBuffer<FrameSample>,
    long: HistoryBuffer<GaitSample>,
    frames: u64,
    falls: u64,
    last_fall: Option<FallScore>,
    last_gait: Option<GaitAssessment>,
    active: Option<ActiveSlot>,
}

impl SessionState {
    pub fn new(config: &DetectionConfig) -> Self {
        Self::with_id(Uuid::new_v4(), config)
    }

    pub fn with_id(id: Uuid, config: &DetectionConfig) -> Self {
        Self {
            id,
            opened_at: Instant::now(),
            short: HistoryBuffer::new(config.short_history_capacity),
            long: HistoryBuffer::new(config.long_history_capacity),
            frames: 0,
            falls: 0,
            last_fall: None,
            last_gait: None,
            active: None,
        }
    }

    /// Count this session in `active` for as long as it lives, including
    /// when its owning task unwinds
    pub fn track(mut self, active: &Arc<AtomicUsize>) -> Self {
        if self.active.is_none() {
            active.fetch_add(1, Ordering::SeqCst);
            self.active = Some(ActiveSlot(active.clone()));
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Frames processed so far, including ones without a person
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that scored as a fall
    pub fn falls(&self) -> u64 {
        self.falls
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }

    pub fn short_history(&self) -> &HistoryBuffer<FrameSample> {
        &self.short
    }

    pub fn long_history(&self) -> &HistoryBuffer<GaitSample> {
        &self.long
    }

    /// Most recent fall score and gait assessment
    pub fn latest(&self) -> (Option<&FallScore>, Option<&GaitAssessment>) {
        (self.last_fall.as_ref(), self.last_gait.as_ref())
    }

    /// Score one frame. `person` is the primary person, or `None` when the
    /// frame had nobody usable; such frames leave both buffers untouched.
    ///
    /// The fall scorer sees only the history before this frame; the short
    /// buffer is pushed after scoring, the long buffer before gait assessment.
    pub fn observe(
        &mut self,
        scoring: &Scoring,
        person: Option<PersonFrame>,
        people_detected: usize,
        timestamp_ms: Option<u64>,
    ) -> FrameResult {
        let frame_index = self.frames;
        self.frames += 1;

        let Some(person) = person else {
            return FrameResult {
                session_id: self.id,
                frame_index,
                timestamp: Utc::now(),
                people_detected,
                keypoints_detected: 0,
                fall: None,
                gait: None,
            };
        };

        let keypoints_detected = person.len();
        let previous = self.short.latest();
        let measured_rate = if scoring.measure_frame_interval {
            previous.and_then(|p| measured_frame_rate(p.timestamp_ms, timestamp_ms))
        } else {
            None
        };

        let features = scoring
            .extractor
            .extract(&person, previous.map(|p| &p.person), measured_rate);
        let fall = scoring
            .scorer
            .score(&features, self.short.iter().map(|s| &s.features));

        self.short.push(FrameSample {
            person,
            features,
            timestamp_ms,
        });

        if let (Some(step_width), Some(com_x)) = (features.step_width, features.com_x) {
            self.long.push(GaitSample {
                step_width,
                com_x,
                timestamp: Utc::now(),
            });
        }
        let gait = scoring.gait.assess(&self.long);

        if fall.is_fall {
            self.falls += 1;
        }
        self.last_fall = Some(fall.clone());
        if gait.is_some() {
            self.last_gait = gait;
        }

        FrameResult {
            session_id: self.id,
            frame_index,
            timestamp: Utc::now(),
            people_detected,
            keypoints_detected,
            fall: Some(fall),
            gait,
        }
    }
}

/// Frames per second implied by two client timestamps
fn measured_frame_rate(previous_ms: Option<u64>, current_ms: Option<u64>) -> Option<f32> {
    let gap = current_ms?.checked_sub(previous_ms?)?;
    if gap == 0 {
        return None;
    }
    Some(1000.0 / gap as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RiskLevel;
    use crate::pose::{Joint, Keypoint};

    fn kp(x: f32, y: f32) -> Keypoint {
        Keypoint::new(x, y, 0.9)
    }

    fn standing(hip_y: f32) -> PersonFrame {
        PersonFrame::new()
            .with(Joint::Nose, kp(0.5, hip_y - 0.4))
            .with(Joint::LeftShoulder, kp(0.45, hip_y - 0.3))
            .with(Joint::RightShoulder, kp(0.55, hip_y - 0.3))
            .with(Joint::LeftHip, kp(0.45, hip_y))
            .with(Joint::RightHip, kp(0.55, hip_y))
            .with(Joint::LeftAnkle, kp(0.42, hip_y + 0.4))
            .with(Joint::RightAnkle, kp(0.58, hip_y + 0.4))
    }

    fn setup() -> (DetectionConfig, Scoring) {
        let config = DetectionConfig::default();
        let scoring = Scoring::from_config(&config);
        (config, scoring)
    }

    #[test]
    fn test_empty_frame_leaves_buffers_untouched() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);

        let result = session.observe(&scoring, None, 0, None);
        assert_eq!(result.frame_index, 0);
        assert_eq!(result.people_detected, 0);
        assert!(result.fall.is_none());
        assert!(result.gait.is_none());
        assert!(session.short_history().is_empty());
        assert!(session.long_history().is_empty());
        assert_eq!(session.frames(), 1);
    }

    #[test]
    fn test_buffers_bounded_by_config() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        for i in 0..200 {
            session.observe(&scoring, Some(standing(0.5)), 1, Some(i * 33));
        }
        assert_eq!(session.short_history().len(), config.short_history_capacity);
        assert_eq!(session.long_history().len(), config.long_history_capacity);
        assert_eq!(session.frames(), 200);
    }

    #[test]
    fn test_gait_appears_after_window() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        for i in 0..29 {
            let result = session.observe(&scoring, Some(standing(0.5)), 1, None);
            assert!(result.gait.is_none(), "frame {} had gait", i);
        }
        let result = session.observe(&scoring, Some(standing(0.5)), 1, None);
        let gait = result.gait.unwrap();
        assert_eq!(gait.risk_level, RiskLevel::Low);
        assert_eq!(gait.instability_score, 0.0);
        assert!(session.latest().1.is_some());
    }

    #[test]
    fn test_frames_without_ankles_skip_gait_history() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        let mut person = standing(0.5);
        person.insert(Joint::LeftAnkle, Keypoint::new(0.0, 0.0, 0.0));
        session.observe(&scoring, Some(person), 1, None);
        assert_eq!(session.short_history().len(), 1);
        assert!(session.long_history().is_empty());
    }

    #[test]
    fn test_velocity_uses_previous_frame() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        session.observe(&scoring, Some(standing(0.4)), 1, None);
        session.observe(&scoring, Some(standing(0.5)), 1, None);
        let latest = session.short_history().latest().unwrap();
        assert!((latest.features.vertical_velocity - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_measured_interval_overrides_frame_rate() {
        let mut config = DetectionConfig::default();
        config.measure_frame_interval = true;
        let scoring = Scoring::from_config(&config);
        let mut session = SessionState::new(&config);

        // 100 ms apart = 10 fps
        session.observe(&scoring, Some(standing(0.4)), 1, Some(1_000));
        session.observe(&scoring, Some(standing(0.5)), 1, Some(1_100));
        let latest = session.short_history().latest().unwrap();
        assert!((latest.features.vertical_velocity - 1.0).abs() < 1e-4);

        // Missing timestamp falls back to the configured rate
        session.observe(&scoring, Some(standing(0.6)), 1, None);
        let latest = session.short_history().latest().unwrap();
        assert!((latest.features.vertical_velocity - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_measured_frame_rate() {
        assert_eq!(measured_frame_rate(Some(0), Some(50)), Some(20.0));
        assert_eq!(measured_frame_rate(Some(50), Some(50)), None);
        assert_eq!(measured_frame_rate(Some(60), Some(50)), None);
        assert_eq!(measured_frame_rate(None, Some(50)), None);
    }

    #[test]
    fn test_latest_survives_empty_frames() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        session.observe(&scoring, Some(standing(0.5)), 1, None);
        session.observe(&scoring, None, 0, None);
        let (fall, _) = session.latest();
        assert!(fall.is_some());
    }

    #[test]
    fn test_tracked_session_released_on_drop() {
        let (config, _) = setup();
        let active = Arc::new(AtomicUsize::new(0));
        let a = SessionState::new(&config).track(&active);
        let b = SessionState::new(&config).track(&active).track(&active);
        assert_eq!(active.load(Ordering::SeqCst), 2);
        drop(a);
        assert_eq!(active.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_frame_result_wire_format() {
        let (config, scoring) = setup();
        let mut session = SessionState::new(&config);
        let result = session.observe(&scoring, Some(standing(0.5)), 2, None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["type"], "frame_result");
        assert_eq!(value["people_detected"], 2);
        assert_eq!(value["keypoints_detected"], 7);
        assert_eq!(value["fall"]["is_fall"], false);
        assert!(value["gait"].is_null());

        let back: FrameResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
