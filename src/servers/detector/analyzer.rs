//! Streaming anomaly detector
//!
//! Keeps a single counter, the next expected sequence number, and compares
//! every decoded message against it and against the wall clock. Messages
//! must be fed in arrival order.

use std::fmt;
use std::ops::Range;

use crate::network::codec::Message;

/// A detection finding. Not an error: processing always continues.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Sequence number already passed (replay or late delivery).
    OutOfOrder { sequence: u64, expected: u128 },
    /// Sequence numbers skipped; `missing` is half-open.
    DroppedPackets { missing: Range<u64> },
    /// Message spent longer than `max_delay` seconds in flight.
    DelayAttack {
        sequence: u64,
        delay: i64,
        max_delay: f64,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfOrder { .. } => "out_of_order",
            Self::DroppedPackets { .. } => "dropped_packets",
            Self::DelayAttack { .. } => "delay_attack",
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { sequence, expected } => write!(
                f,
                "Replay or reordering detected (SEQ={}, expected={})",
                sequence, expected
            ),
            Self::DroppedPackets { missing } => write!(
                f,
                "Dropped packets detected (missing SEQ {}..{}, {} lost)",
                missing.start,
                missing.end,
                missing.end - missing.start
            ),
            Self::DelayAttack {
                sequence,
                delay,
                max_delay,
            } => write!(
                f,
                "Suspicious delay detected (SEQ={}, {}s > {}s)",
                sequence, delay, max_delay
            ),
        }
    }
}

/// Outcome of inspecting one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// `now - timestamp` in seconds; negative when the sender clock is ahead.
    pub delay: i64,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    /// One past the highest sequence seen; exceeds `u64::MAX` once that
    /// sequence has arrived, so every later message is out of order.
    expected_sequence: u128,
    max_delay: f64,
    enabled: bool,
}

impl AnomalyDetector {
    pub fn new(max_delay: f64, enabled: bool) -> Self {
        Self {
            expected_sequence: 1,
            max_delay,
            enabled,
        }
    }

    pub fn expected_sequence(&self) -> u128 {
        self.expected_sequence
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run the sequence and delay checks for one message received at `now`
    /// (unix seconds). With detection disabled only the delay is computed.
    pub fn inspect(&mut self, message: &Message, now: u64) -> Inspection {
        let delay = delay_secs(now, message.timestamp);
        if !self.enabled {
            return Inspection {
                delay,
                alerts: Vec::new(),
            };
        }

        let mut alerts = Vec::new();
        let sequence = message.sequence;

        if u128::from(sequence) < self.expected_sequence {
            alerts.push(Alert::OutOfOrder {
                sequence,
                expected: self.expected_sequence,
            });
        } else {
            // expected <= sequence here, so it fits in u64.
            let expected = self.expected_sequence as u64;
            if sequence > expected {
                alerts.push(Alert::DroppedPackets {
                    missing: expected..sequence,
                });
            }
            self.expected_sequence = u128::from(sequence) + 1;
        }

        if delay as f64 > self.max_delay {
            alerts.push(Alert::DelayAttack {
                sequence,
                delay,
                max_delay: self.max_delay,
            });
        }

        Inspection { delay, alerts }
    }
}

fn delay_secs(now: u64, timestamp: u64) -> i64 {
    let delay = now as i128 - timestamp as i128;
    delay.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn msg(sequence: u64, timestamp: u64) -> Message {
        Message::new(sequence, timestamp, "x")
    }

    #[test]
    fn in_order_stream_raises_nothing() {
        let mut detector = AnomalyDetector::new(2.0, true);
        for seq in 1..=50 {
            let inspection = detector.inspect(&msg(seq, NOW), NOW);
            assert!(inspection.alerts.is_empty(), "seq={}", seq);
            assert_eq!(inspection.delay, 0);
        }
        assert_eq!(detector.expected_sequence(), 51);
    }

    #[test]
    fn gap_raises_dropped_packets_and_jumps_ahead() {
        let mut detector = AnomalyDetector::new(2.0, true);
        let inspection = detector.inspect(&msg(3, NOW), NOW);
        assert_eq!(
            inspection.alerts,
            vec![Alert::DroppedPackets { missing: 1..3 }]
        );
        assert_eq!(detector.expected_sequence(), 4);

        let inspection = detector.inspect(&msg(2, NOW), NOW);
        assert_eq!(
            inspection.alerts,
            vec![Alert::OutOfOrder {
                sequence: 2,
                expected: 4
            }]
        );
        assert_eq!(detector.expected_sequence(), 4);
    }

    #[test]
    fn stale_sequence_never_moves_expected_backwards() {
        let mut detector = AnomalyDetector::new(2.0, true);
        for seq in 1..=5 {
            detector.inspect(&msg(seq, NOW), NOW);
        }
        for stale in [0, 1, 3, 5] {
            let inspection = detector.inspect(&msg(stale, NOW), NOW);
            assert_eq!(inspection.alerts.len(), 1);
            assert_eq!(inspection.alerts[0].kind(), "out_of_order");
            assert_eq!(detector.expected_sequence(), 6);
        }
    }

    #[test]
    fn duplicate_is_out_of_order() {
        let mut detector = AnomalyDetector::new(2.0, true);
        detector.inspect(&msg(1, NOW), NOW);
        let inspection = detector.inspect(&msg(1, NOW), NOW);
        assert_eq!(
            inspection.alerts,
            vec![Alert::OutOfOrder {
                sequence: 1,
                expected: 2
            }]
        );
    }

    #[test]
    fn late_message_raises_delay_attack() {
        let mut detector = AnomalyDetector::new(2.0, true);
        let inspection = detector.inspect(&msg(1, NOW - 5), NOW);
        assert_eq!(inspection.delay, 5);
        assert_eq!(
            inspection.alerts,
            vec![Alert::DelayAttack {
                sequence: 1,
                delay: 5,
                max_delay: 2.0
            }]
        );
        assert_eq!(detector.expected_sequence(), 2);
    }

    #[test]
    fn delay_at_threshold_is_tolerated() {
        let mut detector = AnomalyDetector::new(2.0, true);
        assert!(detector.inspect(&msg(1, NOW - 2), NOW).alerts.is_empty());
    }

    #[test]
    fn delay_check_runs_alongside_sequence_check() {
        let mut detector = AnomalyDetector::new(2.0, true);
        let inspection = detector.inspect(&msg(4, NOW - 10), NOW);
        let kinds: Vec<_> = inspection.alerts.iter().map(Alert::kind).collect();
        assert_eq!(kinds, vec!["dropped_packets", "delay_attack"]);
    }

    #[test]
    fn future_timestamp_has_negative_delay() {
        let mut detector = AnomalyDetector::new(2.0, true);
        let inspection = detector.inspect(&msg(1, NOW + 30), NOW);
        assert_eq!(inspection.delay, -30);
        assert!(inspection.alerts.is_empty());
    }

    #[test]
    fn disabled_detector_raises_nothing() {
        let mut detector = AnomalyDetector::new(2.0, true);
        assert_eq!(detector.inspect(&msg(1, NOW - 5), NOW).alerts.len(), 1);

        let mut detector = AnomalyDetector::new(2.0, false);
        for seq in [1, 1, 9, 2] {
            let inspection = detector.inspect(&msg(seq, NOW - 5), NOW);
            assert!(inspection.alerts.is_empty());
            assert_eq!(inspection.delay, 5);
        }
        assert_eq!(detector.expected_sequence(), 1);
    }

    #[test]
    fn replay_of_max_sequence_is_out_of_order() {
        let mut detector = AnomalyDetector::new(2.0, true);
        let first = detector.inspect(&msg(u64::MAX, NOW), NOW);
        assert_eq!(
            first.alerts,
            vec![Alert::DroppedPackets {
                missing: 1..u64::MAX
            }]
        );
        assert_eq!(detector.expected_sequence(), u128::from(u64::MAX) + 1);

        let replay = detector.inspect(&msg(u64::MAX, NOW), NOW);
        assert_eq!(
            replay.alerts,
            vec![Alert::OutOfOrder {
                sequence: u64::MAX,
                expected: u128::from(u64::MAX) + 1
            }]
        );
    }

    #[test]
    fn alert_display() {
        let alert = Alert::DroppedPackets { missing: 1..3 };
        assert_eq!(
            alert.to_string(),
            "Dropped packets detected (missing SEQ 1..3, 2 lost)"
        );
    }
}
