pub mod keypoint;
pub mod source;

pub use keypoint::{Joint, Keypoint, PersonFrame, JOINT_COUNT};
pub use source::{
    DetectError, Frame, FramePayload, HttpKeypointSource, InlineKeypointSource, KeypointSource,
};
