//! Process-wide bounded log of fall incidents.
//!
//! Append-only from the scoring path, readable by anyone through snapshots.
//! When full the oldest incident is evicted. All access goes through one
//! mutex; readers get a copy, so a snapshot never changes under them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::analysis::{DetectionStrategy, FallScore};
use crate::logging;

/// A recorded fall event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
    pub reasons: Vec<String>,
    pub session_id: Uuid,
    pub strategy: DetectionStrategy,
}

impl Incident {
    pub fn from_score(score: &FallScore, session_id: Uuid, strategy: DetectionStrategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            confidence: score.score,
            reasons: score.reasons.clone(),
            session_id,
            strategy,
        }
    }
}

pub struct IncidentLog {
    capacity: usize,
    entries: Mutex<VecDeque<Incident>>,
}

impl IncidentLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Incident>> {
        // A panic elsewhere must not take the log down with it
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an incident, returning the one evicted to make room
    pub fn append(&self, incident: Incident) -> Option<Incident> {
        let mut entries = self.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(incident);
        drop(entries);

        if let Some(ref old) = evicted {
            logging::log_incident_evicted(&old.id, self.capacity);
        }
        evicted
    }

    /// Copy of every incident, oldest first
    pub fn snapshot(&self) -> Vec<Incident> {
        self.lock().iter().cloned().collect()
    }

    /// Copy of the newest `limit` incidents, oldest first
    pub fn recent(&self, limit: usize) -> Vec<Incident> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
