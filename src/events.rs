//! Structured session events
//!
//! Sessions never configure logging themselves. They report what happened
//! to an injected [`EventSink`]; the binaries plug in [`TracingSink`] and
//! tests plug in [`MemorySink`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::network::codec::{IntegrityViolation, Message};
use crate::servers::detector::analyzer::Alert;

/// Which way bytes are flowing through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToServer => f.write_str("client->server"),
            Self::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Why a forwarding loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Source returned an empty read.
    PeerClosed,
    /// The opposite direction finished first.
    PartnerClosed,
    Io(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::PartnerClosed => f.write_str("opposite direction closed"),
            Self::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Forwarded {
        direction: Direction,
        bytes: usize,
    },
    Delayed {
        direction: Direction,
        delay: Duration,
        bytes: usize,
    },
    Dropped {
        direction: Direction,
        bytes: usize,
    },
    /// Chunk parked in the reorder buffer.
    Held {
        direction: Direction,
        buffered: usize,
    },
    /// Reorder buffer drained at stream end.
    Flushed {
        direction: Direction,
        chunks: usize,
        bytes: usize,
    },
    DirectionClosed {
        direction: Direction,
        reason: CloseReason,
    },
    /// A decoded message, alerted or not.
    Message {
        message: Message,
        delay: i64,
    },
    Integrity(IntegrityViolation),
    Alert(Alert),
}

impl Event {
    /// Stable name used as the `event` field in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Forwarded { .. } => "forward",
            Self::Delayed { .. } => "delay",
            Self::Dropped { .. } => "drop",
            Self::Held { .. } => "hold",
            Self::Flushed { .. } => "flush",
            Self::DirectionClosed { .. } => "closed",
            Self::Message { .. } => "message",
            Self::Integrity(_) => "integrity_violation",
            Self::Alert(alert) => alert.kind(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Writes every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl EventSink for TracingSink {
    fn record(&self, event: Event) {
        match &event {
            Event::Forwarded { direction, bytes } => {
                tracing::info!("[relay] [forward] {}: forwarded {} bytes", direction, bytes);
            }
            Event::Delayed { direction, delay, bytes } => {
                tracing::warn!(
                    "[relay] [delay] {}: delaying {} bytes by {:.3}s",
                    direction,
                    bytes,
                    delay.as_secs_f64()
                );
            }
            Event::Dropped { direction, bytes } => {
                tracing::warn!("[relay] [drop] {}: dropped {} bytes", direction, bytes);
            }
            Event::Held { direction, buffered } => {
                tracing::debug!("[relay] [hold] {}: buffered={}", direction, buffered);
            }
            Event::Flushed { direction, chunks, bytes } => {
                tracing::info!(
                    "[relay] [flush] {}: flushed {} held chunks ({} bytes)",
                    direction,
                    chunks,
                    bytes
                );
            }
            Event::DirectionClosed { direction, reason } => {
                tracing::info!("[relay] [closed] {}: stopped ({})", direction, reason);
            }
            Event::Message { message, delay } => {
                tracing::info!(
                    "[detector] [message] SEQ={} | TS={} | Delay={}s | DATA={}",
                    message.sequence,
                    message.timestamp,
                    delay,
                    message.payload
                );
            }
            Event::Integrity(violation) => {
                tracing::error!(alert = event.kind(), "[detector] [ALERT] {}", violation);
            }
            Event::Alert(alert) => {
                tracing::error!(alert = alert.kind(), "[detector] [ALERT] {}", alert);
            }
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Alert(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Message { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_filters_by_kind() {
        let sink = MemorySink::new();
        sink.record(Event::Forwarded {
            direction: Direction::ClientToServer,
            bytes: 4,
        });
        sink.record(Event::Alert(Alert::OutOfOrder {
            sequence: 1,
            expected: 3,
        }));
        sink.record(Event::Message {
            message: Message::new(1, 0, "x"),
            delay: 0,
        });

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.count("forward"), 1);
        assert_eq!(sink.count("out_of_order"), 1);
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(sink.messages(), vec![Message::new(1, 0, "x")]);
    }

    #[test]
    fn direction_renders_arrow() {
        assert_eq!(Direction::ServerToClient.to_string(), "server->client");
    }
}
