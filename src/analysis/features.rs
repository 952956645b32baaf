//! Geometric and kinematic features derived from keypoints.
//!
//! Coordinates are image-style: y grows toward the bottom of the frame, so
//! a larger hip height means the hips are lower, and a positive vertical
//! velocity means moving down.

use serde::{Deserialize, Serialize};

use crate::pose::{Joint, PersonFrame};

/// Scalar features for one frame. `None` means the joints were missing, which
/// is distinct from a measured zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Angle between nose - hip-midpoint and vertical, degrees in [0, 180]
    pub body_angle_deg: Option<f32>,
    /// Hip-midpoint y velocity, per second; 0 without a previous frame
    pub vertical_velocity: f32,
    /// Mean hip y
    pub hip_height: Option<f32>,
    /// Mean shoulder y
    pub shoulder_height: Option<f32>,
    /// |left ankle x - right ankle x|
    pub step_width: Option<f32>,
    /// Mean hip x (lateral centre of mass)
    pub com_x: Option<f32>,
}

/// Computes [`FeatureSet`]s. Holds only the configured frame rate.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    frame_rate: f32,
}

impl FeatureExtractor {
    pub fn new(frame_rate: f32) -> Self {
        Self { frame_rate }
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Extract features for `current`. `previous` is the preceding frame of
    /// the same session; `frame_rate` overrides the configured rate when the
    /// caller measured the real interval.
    pub fn extract(
        &self,
        current: &PersonFrame,
        previous: Option<&PersonFrame>,
        frame_rate: Option<f32>,
    ) -> FeatureSet {
        let rate = frame_rate.filter(|r| r.is_finite() && *r > 0.0).unwrap_or(self.frame_rate);

        FeatureSet {
            body_angle_deg: body_angle_deg(current),
            vertical_velocity: vertical_velocity(current, previous, rate),
            hip_height: hip_height(current),
            shoulder_height: shoulder_height(current),
            step_width: step_width(current),
            com_x: com_x(current),
        }
    }
}

fn midpoint_y(frame: &PersonFrame, left: Joint, right: Joint) -> Option<f32> {
    let l = frame.get(left)?;
    let r = frame.get(right)?;
    Some((l.y + r.y) / 2.0)
}

fn midpoint_x(frame: &PersonFrame, left: Joint, right: Joint) -> Option<f32> {
    let l = frame.get(left)?;
    let r = frame.get(right)?;
    Some((l.x + r.x) / 2.0)
}

/// atan2(dx, -dy) of nose relative to the hip midpoint, absolute, in degrees.
/// 0 = upright, 90 = horizontal.
pub fn body_angle_deg(frame: &PersonFrame) -> Option<f32> {
    let nose = frame.get(Joint::Nose)?;
    let hip_x = midpoint_x(frame, Joint::LeftHip, Joint::RightHip)?;
    let hip_y = midpoint_y(frame, Joint::LeftHip, Joint::RightHip)?;

    let dx = nose.x - hip_x;
    let dy = nose.y - hip_y;
    Some(dx.atan2(-dy).to_degrees().abs())
}

pub fn vertical_velocity(current: &PersonFrame, previous: Option<&PersonFrame>, frame_rate: f32) -> f32 {
    let Some(previous) = previous else {
        return 0.0;
    };
    match (hip_height(current), hip_height(previous)) {
        (Some(now), Some(before)) => (now - before) * frame_rate,
        _ => 0.0,
    }
}

pub fn hip_height(frame: &PersonFrame) -> Option<f32> {
    midpoint_y(frame, Joint::LeftHip, Joint::RightHip)
}

pub fn shoulder_height(frame: &PersonFrame) -> Option<f32> {
    midpoint_y(frame, Joint::LeftShoulder, Joint::RightShoulder)
}

pub fn step_width(frame: &PersonFrame) -> Option<f32> {
    let l = frame.get(Joint::LeftAnkle)?;
    let r = frame.get(Joint::RightAnkle)?;
    Some((l.x - r.x).abs())
}

pub fn com_x(frame: &PersonFrame) -> Option<f32> {
    midpoint_x(frame, Joint::LeftHip, Joint::RightHip)
}
