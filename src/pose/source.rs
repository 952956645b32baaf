//! Keypoint sources: the boundary to the external pose-estimation model.
//!
//! The monitor only consumes [`KeypointSource::detect`]; how a frame becomes
//! keypoints is up to the adapter. Two adapters ship:
//!
//! - [`InlineKeypointSource`] - the client ran pose estimation itself and sent
//!   the people alongside the frame
//! - [`HttpKeypointSource`] - the image is POSTed to a pose-inference service

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::keypoint::{Joint, Keypoint, PersonFrame, JOINT_COUNT};

/// Content delivered with one inbound frame
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Encoded image bytes (JPEG/PNG) plus MIME type when known
    Image { bytes: Vec<u8>, mime: Option<String> },
    /// Pose already estimated on the client
    People(Vec<PersonFrame>),
}

/// One inbound video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Client capture timestamp (ms), if the client sent one
    pub timestamp_ms: Option<u64>,
    pub payload: FramePayload,
}

impl Frame {
    pub fn image(bytes: Vec<u8>, mime: Option<String>, timestamp_ms: Option<u64>) -> Self {
        Self {
            timestamp_ms,
            payload: FramePayload::Image { bytes, mime },
        }
    }

    pub fn people(people: Vec<PersonFrame>, timestamp_ms: Option<u64>) -> Self {
        Self {
            timestamp_ms,
            payload: FramePayload::People(people),
        }
    }
}

/// Keypoint source failure; always contained to the frame that caused it
#[derive(Debug, Clone, Error)]
pub enum DetectError {
    #[error("Frame payload not supported by this source: {0}")]
    Unsupported(String),
    #[error("Inference request failed: {0}")]
    Request(String),
    #[error("Inference service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed inference response: {0}")]
    Malformed(String),
}

/// Given a frame, return zero or more detected people
#[async_trait]
pub trait KeypointSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<PersonFrame>, DetectError>;
}

/// Passes through people the client already extracted
#[derive(Debug, Default, Clone)]
pub struct InlineKeypointSource;

#[async_trait]
impl KeypointSource for InlineKeypointSource {
    fn name(&self) -> &str {
        "inline"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<PersonFrame>, DetectError> {
        match &frame.payload {
            FramePayload::People(people) => Ok(people.clone()),
            FramePayload::Image { .. } => Err(DetectError::Unsupported(
                "inline source needs client-side keypoints, got an image".to_string(),
            )),
        }
    }
}

/// Response body of the pose-inference service
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InferenceResponse {
    /// Image width in pixels; when present coordinates are normalized
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    #[serde(default)]
    pub people: Vec<InferencePerson>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InferencePerson {
    /// COCO-ordered `[x, y, confidence]` triples
    pub keypoints: Vec<[f32; 3]>,
}

impl InferenceResponse {
    /// Convert to person frames. Points with a non-positive coordinate are
    /// undetected (the model reports missing joints at the origin).
    pub(crate) fn into_people(self) -> Result<Vec<PersonFrame>, DetectError> {
        let mut people = Vec::with_capacity(self.people.len());
        for (idx, person) in self.people.into_iter().enumerate() {
            if person.keypoints.len() != JOINT_COUNT {
                return Err(DetectError::Malformed(format!(
                    "person {} has {} keypoints, expected {}",
                    idx,
                    person.keypoints.len(),
                    JOINT_COUNT
                )));
            }

            let mut frame = PersonFrame::new();
            for (i, [x, y, conf]) in person.keypoints.into_iter().enumerate() {
                if x > 0.0 && y > 0.0 {
                    if let Some(joint) = Joint::from_coco_index(i) {
                        frame.insert(joint, Keypoint::new(x, y, conf));
                    }
                }
            }

            if let (Some(w), Some(h)) = (self.width, self.height) {
                frame.normalize(w, h);
            }
            people.push(frame);
        }
        Ok(people)
    }
}

/// Sends frame images to an external pose-inference endpoint
pub struct HttpKeypointSource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeypointSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DetectError> {
        let url = url.trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DetectError::Request(format!(
                "Inference URL must use http or https scheme, got: {}",
                url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeypointSource for HttpKeypointSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<PersonFrame>, DetectError> {
        let (bytes, mime) = match &frame.payload {
            FramePayload::Image { bytes, mime } => (bytes, mime),
            // Client already did the work
            FramePayload::People(people) => return Ok(people.clone()),
        };

        let content_type = mime.as_deref().unwrap_or("image/jpeg");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.clone())
            .send()
            .await
            .map_err(|e| DetectError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| DetectError::Malformed(e.to_string()))?;

        debug!(people = parsed.people.len(), "Inference response received");
        parsed.into_people()
    }
}
