//! Streaming fall and gait-instability detection over pose keypoints.
//!
//! Frames arrive per connection, are turned into keypoints by a
//! [`pose::KeypointSource`], and are scored against that connection's
//! private history. Falls land in a shared [`incident_log::IncidentLog`] and
//! are pushed to every connected observer through a
//! [`broadcast::BroadcastHub`].

pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod incident_log;
pub mod logging;
pub mod monitor;
pub mod pose;
pub mod server;
pub mod session;

pub use config::Config;
pub use monitor::FallMonitor;
