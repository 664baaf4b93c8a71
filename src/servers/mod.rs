//! Server implementations
//!
//! The three processes of the testbed:
//! - relay: sits between sender and receiver and perturbs the stream
//! - detector: receiving endpoint that flags what the relay did
//! - sender: generates the numbered message stream

pub mod detector;
pub mod relay;
pub mod sender;
