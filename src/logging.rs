//! Logging setup and structured activity events.
//!
//! Console output is always on. When a JSON directory is configured, a
//! second layer writes daily-rotated JSON files for later analysis.
//!
//! Events carry ids, scores and counts only. Frame images and raw keypoints
//! are never logged.

use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use uuid::Uuid;

use crate::analysis::{DetectionStrategy, FallScore};
use crate::broadcast::DeliveryError;
use crate::pose::DetectError;

/// Keeps the non-blocking file writer flushing until exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str, json_dir: Option<&Path>) -> anyhow::Result<()> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    let file_layer = match json_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "activity.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();

            Some(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_filter(EnvFilter::new(level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        json_dir = json_dir.map(|d| d.display().to_string()),
        "Logging initialized"
    );
    Ok(())
}

// ============================================================================
// Session Lifecycle Events
// ============================================================================

pub fn log_session_open(session_id: &Uuid, peer: Option<&str>) {
    info!(
        event = "session_open",
        session_id = %session_id,
        peer = peer,
        "Session opened"
    );
}

pub fn log_session_close(session_id: &Uuid, frames: u64, falls: u64, duration_ms: u64) {
    info!(
        event = "session_close",
        session_id = %session_id,
        frames = frames,
        falls = falls,
        duration_ms = duration_ms,
        "Session closed"
    );
}

// ============================================================================
// Detection Events
// ============================================================================

pub fn log_fall_detected(session_id: &Uuid, score: &FallScore, strategy: DetectionStrategy) {
    warn!(
        event = "fall_detected",
        session_id = %session_id,
        score = score.score,
        reason_count = score.reasons.len(),
        strategy = strategy.as_str(),
        "Fall detected"
    );
}

pub fn log_detection_failure(session_id: &Uuid, source: &str, error: &DetectError) {
    warn!(
        event = "detection_failure",
        session_id = %session_id,
        source = source,
        error = %error,
        "Keypoint source failed; frame treated as empty"
    );
}

pub fn log_frame_rejected(session_id: &Uuid, error: &dyn std::fmt::Display) {
    debug!(
        event = "frame_rejected",
        session_id = %session_id,
        error = %error,
        "Inbound frame could not be decoded"
    );
}

// ============================================================================
// Shared Resource Events
// ============================================================================

pub fn log_incident_evicted(incident_id: &Uuid, capacity: usize) {
    debug!(
        event = "incident_evicted",
        incident_id = %incident_id,
        capacity = capacity,
        "Incident log full, oldest entry evicted"
    );
}

pub fn log_delivery_failure(observer_id: &Uuid, error: &DeliveryError) {
    warn!(
        event = "delivery_failure",
        observer_id = %observer_id,
        error = %error,
        "Alert delivery to observer failed"
    );
}
