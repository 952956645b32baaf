//! Fan-out of fall alerts to every connected observer.
//!
//! The hub only holds weak references: an observer lives as long as its
//! connection keeps the `Arc`, and dead entries are pruned on the next
//! broadcast. Deliveries happen under the hub lock, so every observer sees
//! alerts in the order `broadcast` was called. Observers must therefore not
//! block in `deliver`; the channel observer only tries to enqueue, and a full
//! queue is a failed delivery. A panicking observer is counted as failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::analysis::FallScore;
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FallDetected,
}

/// Out-of-band alert pushed to all observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub alert: AlertKind,
    pub data: FallScore,
    pub timestamp: DateTime<Utc>,
    /// Session whose frame triggered the alert
    pub session_id: Uuid,
}

impl AlertMessage {
    pub fn fall_detected(score: FallScore, session_id: Uuid) -> Self {
        Self {
            alert: AlertKind::FallDetected,
            data: score,
            timestamp: Utc::now(),
            session_id,
        }
    }
}

/// A single observer failed to take an alert
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Observer channel closed")]
    Closed,
    #[error("Observer queue full")]
    Full,
    #[error("Observer panicked during delivery")]
    Panicked,
    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// Something that wants fall alerts
pub trait AlertObserver: Send + Sync {
    fn id(&self) -> Uuid;

    /// Hand over one alert; must not block
    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError>;
}

/// Outcome counters for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    /// Observers dropped since the last broadcast
    pub pruned: usize,
}

#[derive(Default)]
pub struct BroadcastHub {
    observers: Mutex<HashMap<Uuid, Weak<dyn AlertObserver>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Weak<dyn AlertObserver>>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an observer. Returns false if it was already subscribed.
    pub fn subscribe(&self, observer: &Arc<dyn AlertObserver>) -> bool {
        let id = observer.id();
        let mut observers = self.lock();
        if observers.get(&id).map_or(false, |w| w.strong_count() > 0) {
            return false;
        }
        observers.insert(id, Arc::downgrade(observer));
        true
    }

    /// Remove an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Live subscriber count
    pub fn len(&self) -> usize {
        self.lock().values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every live observer. Failures are logged and counted,
    /// never returned.
    pub fn broadcast(&self, message: &AlertMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut observers = self.lock();

        observers.retain(|id, weak| {
            let Some(observer) = weak.upgrade() else {
                report.pruned += 1;
                return false;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.deliver(message)))
                .unwrap_or(Err(DeliveryError::Panicked));
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    logging::log_delivery_failure(id, &e);
                }
            }
            true
        });

        report
    }
}

/// Observer that enqueues alerts onto a connection's bounded outbound channel
pub struct ChannelObserver<M> {
    id: Uuid,
    tx: mpsc::Sender<M>,
}

impl<M> ChannelObserver<M> {
    pub fn new(id: Uuid, tx: mpsc::Sender<M>) -> Self {
        Self { id, tx }
    }
}

impl<M> AlertObserver for ChannelObserver<M>
where
    M: From<AlertMessage> + Send + 'static,
{
    fn id(&self) -> Uuid {
        self.id
    }

    fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        self.tx
            .try_send(M::from(message.clone()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        id: Uuid,
        seen: Mutex<Vec<AlertMessage>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl AlertObserver for Recording {
        fn id(&self) -> Uuid {
            self.id
        }

        fn deliver(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Failing(Uuid);

    impl AlertObserver for Failing {
        fn id(&self) -> Uuid {
            self.0
        }

        fn deliver(&self, _message: &AlertMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Failed("socket gone".to_string()))
        }
    }

    fn alert(score: f32) -> AlertMessage {
        AlertMessage::fall_detected(
            FallScore {
                score,
                is_fall: true,
                reasons: Vec::new(),
            },
            Uuid::nil(),
        )
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let hub = BroadcastHub::new();
        let failing: Arc<dyn AlertObserver> = Arc::new(Failing(Uuid::new_v4()));
        let recording = Recording::new();
        let recording_dyn: Arc<dyn AlertObserver> = recording.clone();

        hub.subscribe(&failing);
        hub.subscribe(&recording_dyn);

        let report = hub.broadcast(&alert(0.9));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(recording.count(), 1);
        // Failing observers stay subscribed; only dropped ones are pruned
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let hub = BroadcastHub::new();
        let recording = Recording::new();
        let observer: Arc<dyn AlertObserver> = recording.clone();

        assert!(hub.subscribe(&observer));
        assert!(!hub.subscribe(&observer));
        hub.broadcast(&alert(0.7));
        assert_eq!(recording.count(), 1);

        assert!(hub.unsubscribe(observer.id()));
        assert!(!hub.unsubscribe(observer.id()));
        hub.broadcast(&alert(0.7));
        assert_eq!(recording.count(), 1);
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let hub = BroadcastHub::new();
        let observer: Arc<dyn AlertObserver> = Recording::new();
        hub.subscribe(&observer);
        assert_eq!(hub.len(), 1);

        drop(observer);
        assert_eq!(hub.len(), 0);
        let report = hub.broadcast(&alert(0.8));
        assert_eq!(report.pruned, 1);
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn test_per_observer_order_preserved() {
        let hub = BroadcastHub::new();
        let recording = Recording::new();
        let observer: Arc<dyn AlertObserver> = recording.clone();
        hub.subscribe(&observer);

        for i in 0..20 {
            hub.broadcast(&alert(i as f32 / 20.0));
        }
        let scores: Vec<f32> = recording.seen.lock().unwrap().iter().map(|m| m.data.score).collect();
        let expected: Vec<f32> = (0..20).map(|i| i as f32 / 20.0).collect();
        assert_eq!(scores, expected);
    }

    struct Panicking(Uuid);

    impl AlertObserver for Panicking {
        fn id(&self) -> Uuid {
            self.0
        }

        fn deliver(&self, _message: &AlertMessage) -> Result<(), DeliveryError> {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_panicking_observer_counted_as_failed() {
        let hub = BroadcastHub::new();
        let panicking: Arc<dyn AlertObserver> = Arc::new(Panicking(Uuid::new_v4()));
        let recording = Recording::new();
        let recording_dyn: Arc<dyn AlertObserver> = recording.clone();
        hub.subscribe(&panicking);
        hub.subscribe(&recording_dyn);

        let report = hub.broadcast(&alert(0.9));
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(recording.count(), 1);

        // The hub keeps working afterwards
        let report = hub.broadcast(&alert(0.9));
        assert_eq!(report.delivered, 1);
        assert_eq!(recording.count(), 2);
    }

    #[test]
    fn test_full_channel_is_isolated_failure() {
        let hub = BroadcastHub::new();
        let (slow_tx, mut slow_rx) = mpsc::channel::<AlertMessage>(1);
        let slow: Arc<dyn AlertObserver> = Arc::new(ChannelObserver::new(Uuid::new_v4(), slow_tx));
        let recording = Recording::new();
        let recording_dyn: Arc<dyn AlertObserver> = recording.clone();
        hub.subscribe(&slow);
        hub.subscribe(&recording_dyn);

        assert_eq!(hub.broadcast(&alert(0.7)).delivered, 2);
        let report = hub.broadcast(&alert(0.8));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(recording.count(), 2);
        assert!(matches!(slow.deliver(&alert(0.9)), Err(DeliveryError::Full)));

        // Draining the queue makes room again
        assert_eq!(slow_rx.try_recv().unwrap().data.score, 0.7);
        assert!(slow.deliver(&alert(0.9)).is_ok());
    }

    #[tokio::test]
    async fn test_channel_observer_delivery_and_close() {
        let (tx, mut rx) = mpsc::channel::<AlertMessage>(4);
        let observer: Arc<dyn AlertObserver> = Arc::new(ChannelObserver::new(Uuid::new_v4(), tx));
        assert!(observer.deliver(&alert(0.9)).is_ok());
        assert_eq!(rx.recv().await.unwrap().data.score, 0.9);

        drop(rx);
        assert!(matches!(observer.deliver(&alert(0.9)), Err(DeliveryError::Closed)));
    }

    #[test]
    fn test_alert_wire_format() {
        let value = serde_json::to_value(alert(0.95)).unwrap();
        assert_eq!(value["alert"], "fall_detected");
        assert!((value["data"]["score"].as_f64().unwrap() - 0.95).abs() < 1e-6);
        assert_eq!(value["data"]["is_fall"], true);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_concurrent_broadcasts() {
        let hub = Arc::new(BroadcastHub::new());
        let recording = Recording::new();
        let observer: Arc<dyn AlertObserver> = recording.clone();
        hub.subscribe(&observer);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        hub.broadcast(&alert(0.9));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recording.count(), 100);
    }
}
