//! Sigil - network mesh telemetry agent
//!
//! This library measures a device's network throughput and position, reports
//! the measurements to a mesh backend, and turns the backend's movement
//! recommendations into human-readable guidance.
//!
//! # Architecture
//!
//! ```text
//! PositionSource ─┐
//!                 ├──► TelemetryReporter ──► POST /submit_data
//! SpeedProbe ─────┘          │
//!      │                     └── (1s) SpeedDisplay
//!      │
//! RecommendationPoller ◄── GET /get_{q_learning,dqn}_recommendation
//!      │  └── MovementAdvisor ──► Notifier
//!      └── TrackedPosition (single writer)
//!
//! HeatmapViewer ◄── GET /get_heatmap
//! ```
//!
//! The [`agent::SigilAgent`] wires these together as four independent
//! periodic tasks sharing one cancellation token.

pub mod advisor;
pub mod agent;
pub mod backend;
pub mod config;
pub mod coord;
pub mod heatmap;
pub mod logging;
pub mod notify;
pub mod poller;
pub mod position;
pub mod probe;
pub mod recommendation;
pub mod reporter;
pub mod schedule;
pub mod transport;
