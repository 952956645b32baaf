//! The owning service: wires the keypoint source, the scoring components,
//! the shared incident log and the alert hub.
//!
//! Sessions are driven one frame at a time by their connection task. The
//! monitor itself holds no per-session state, so any number of sessions can
//! call [`FallMonitor::process_frame`] concurrently.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::analysis::FallScore;
use crate::broadcast::{AlertMessage, BroadcastHub};
use crate::config::{DetectionConfig, SourceConfig};
use crate::incident_log::{Incident, IncidentLog};
use crate::logging;
use crate::pose::{Frame, HttpKeypointSource, InlineKeypointSource, KeypointSource, PersonFrame};
use crate::session::{FrameResult, Scoring, SessionState};

pub struct FallMonitor {
    config: DetectionConfig,
    source: Arc<dyn KeypointSource>,
    scoring: Scoring,
    incidents: Arc<IncidentLog>,
    hub: Arc<BroadcastHub>,
    active_sessions: Arc<AtomicUsize>,
}

impl FallMonitor {
    pub fn new(config: DetectionConfig, source: Arc<dyn KeypointSource>) -> Self {
        let scoring = Scoring::from_config(&config);
        let incidents = Arc::new(IncidentLog::new(config.incident_log_capacity));
        Self {
            config,
            source,
            scoring,
            incidents,
            hub: Arc::new(BroadcastHub::new()),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the monitor and the configured keypoint source
    pub fn from_config(detection: &DetectionConfig, source: &SourceConfig) -> Result<Self> {
        let source: Arc<dyn KeypointSource> = match source {
            SourceConfig::Inline => Arc::new(InlineKeypointSource),
            SourceConfig::Http { url, timeout_ms } => Arc::new(
                HttpKeypointSource::new(url, Duration::from_millis(*timeout_ms))
                    .context("Failed to create inference client")?,
            ),
        };
        info!(
            source = source.name(),
            strategy = detection.strategy.as_str(),
            "Fall monitor configured"
        );
        Ok(Self::new(detection.clone(), source))
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn incidents(&self) -> &Arc<IncidentLog> {
        &self.incidents
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// The session counts as active until it is dropped, whether through
    /// [`close_session`](Self::close_session) or by its task unwinding
    pub fn open_session(&self, peer: Option<&str>) -> SessionState {
        let session = SessionState::new(&self.config).track(&self.active_sessions);
        logging::log_session_open(&session.id(), peer);
        session
    }

    /// Release a session and its buffers
    pub fn close_session(&self, session: SessionState) {
        logging::log_session_close(
            &session.id(),
            session.frames(),
            session.falls(),
            session.elapsed_ms(),
        );
    }

    /// Run one frame through detection and scoring. Never fails: a source
    /// error is logged and the frame reports nobody.
    pub async fn process_frame(&self, session: &mut SessionState, frame: Frame) -> FrameResult {
        let people = match self.source.detect(&frame).await {
            Ok(people) => people,
            Err(e) => {
                logging::log_detection_failure(&session.id(), self.source.name(), &e);
                Vec::new()
            }
        };

        let mut people: Vec<PersonFrame> = people
            .into_iter()
            .map(|mut person| {
                person.retain_confident(self.config.min_joint_confidence);
                person
            })
            .filter(|person| !person.is_empty())
            .collect();
        let people_detected = people.len();
        let primary = take_primary(&mut people);

        let result = session.observe(&self.scoring, primary, people_detected, frame.timestamp_ms);

        if let Some(score) = result.fall.as_ref().filter(|s| s.is_fall) {
            self.raise_alert(session.id(), score);
        }
        result
    }

    /// Record the incident and fan the alert out
    fn raise_alert(&self, session_id: Uuid, score: &FallScore) {
        let strategy = self.scoring.scorer.strategy();
        logging::log_fall_detected(&session_id, score, strategy);

        self.incidents
            .append(Incident::from_score(score, session_id, strategy));
        self.hub
            .broadcast(&AlertMessage::fall_detected(score.clone(), session_id));
    }
}

/// Remove and return the person with the highest load-bearing confidence
fn take_primary(people: &mut Vec<PersonFrame>) -> Option<PersonFrame> {
    let best = people
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.load_bearing_confidence()
                .total_cmp(&b.load_bearing_confidence())
        })
        .map(|(i, _)| i)?;
    Some(people.swap_remove(best))
}
