//! Keypoint data model shared by every pose source.
//!
//! Joints use the 17-point COCO vocabulary. A [`PersonFrame`] only ever holds
//! joints that were actually detected: origin placeholders, non-finite
//! coordinates and sub-threshold confidences are rejected at insertion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named body joint (COCO ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Joint {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

/// Number of joints in the COCO vocabulary
pub const JOINT_COUNT: usize = 17;

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    /// Joints the feature extractor reads
    pub const LOAD_BEARING: [Joint; 9] = [
        Joint::Nose,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftEye => "left_eye",
            Joint::RightEye => "right_eye",
            Joint::LeftEar => "left_ear",
            Joint::RightEar => "right_ear",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
        }
    }

    /// Map a COCO keypoint index (0..17) to a joint
    pub fn from_coco_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Joint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|j| j.as_str() == lowered)
            .ok_or_else(|| format!("Unknown joint: {}", s))
    }
}

/// A single joint position with detection confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(alias = "conf", default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// False for origin placeholders and non-finite values
    pub fn is_detected(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.confidence.is_finite()
            && !(self.x == 0.0 && self.y == 0.0)
    }
}

/// One person's keypoints at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Keypoint>", into = "BTreeMap<String, Keypoint>")]
pub struct PersonFrame {
    joints: [Option<Keypoint>; JOINT_COUNT],
}

impl PersonFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a joint; undetected keypoints are dropped and leave the joint absent.
    /// Returns whether the keypoint was stored.
    pub fn insert(&mut self, joint: Joint, keypoint: Keypoint) -> bool {
        if keypoint.is_detected() {
            self.joints[joint.index()] = Some(keypoint);
            true
        } else {
            self.joints[joint.index()] = None;
            false
        }
    }

    /// Builder-style insert
    pub fn with(mut self, joint: Joint, keypoint: Keypoint) -> Self {
        self.insert(joint, keypoint);
        self
    }

    pub fn get(&self, joint: Joint) -> Option<&Keypoint> {
        self.joints[joint.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, &Keypoint)> {
        Joint::ALL
            .iter()
            .zip(self.joints.iter())
            .filter_map(|(joint, kp)| kp.as_ref().map(|kp| (*joint, kp)))
    }

    /// Number of detected joints
    pub fn len(&self) -> usize {
        self.joints.iter().filter(|kp| kp.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop joints whose confidence is below `min_confidence`
    pub fn retain_confident(&mut self, min_confidence: f32) {
        for slot in self.joints.iter_mut() {
            if slot.map_or(false, |kp| kp.confidence < min_confidence) {
                *slot = None;
            }
        }
    }

    /// Scale pixel coordinates into [0, 1]
    pub fn normalize(&mut self, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        for kp in self.joints.iter_mut().flatten() {
            kp.x /= width;
            kp.y /= height;
        }
    }

    /// Mean confidence over the load-bearing joints (missing joints count as 0)
    pub fn load_bearing_confidence(&self) -> f32 {
        let total: f32 = Joint::LOAD_BEARING
            .iter()
            .filter_map(|j| self.get(*j))
            .map(|kp| kp.confidence)
            .sum();
        total / Joint::LOAD_BEARING.len() as f32
    }
}

impl From<BTreeMap<String, Keypoint>> for PersonFrame {
    fn from(map: BTreeMap<String, Keypoint>) -> Self {
        let mut frame = PersonFrame::new();
        for (name, keypoint) in map {
            if let Ok(joint) = name.parse::<Joint>() {
                frame.insert(joint, keypoint);
            }
        }
        frame
    }
}

impl From<PersonFrame> for BTreeMap<String, Keypoint> {
    fn from(frame: PersonFrame) -> Self {
        frame
            .iter()
            .map(|(joint, kp)| (joint.as_str().to_string(), *kp))
            .collect()
    }
}
