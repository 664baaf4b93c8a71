//! MITM testbed
//!
//! An attack-simulation relay that can delay, drop or reorder a TCP stream,
//! and a stream anomaly detector that proves whether those perturbations are
//! observable from the receiving end.

/// Relay, detector and sender configuration
pub mod config;
/// Structured events and the sinks that record them
pub mod events;
/// Wire codec and socket helpers
pub mod network;
/// Relay, detector and sender servers
pub mod servers;
