//! Detection session: one inbound stream, processed strictly in arrival order.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::analyzer::{Alert, AnomalyDetector};
use crate::events::{Event, SharedSink};
use crate::network::codec::{self, LineSplitter};
use crate::network::unix_now;

/// Tallies for a finished detection session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub messages: u64,
    pub integrity_violations: u64,
    pub out_of_order: u64,
    pub dropped_packets: u64,
    pub delay_attacks: u64,
}

impl DetectionReport {
    fn count(&mut self, alert: &Alert) {
        match alert {
            Alert::OutOfOrder { .. } => self.out_of_order += 1,
            Alert::DroppedPackets { .. } => self.dropped_packets += 1,
            Alert::DelayAttack { .. } => self.delay_attacks += 1,
        }
    }

    pub fn alerts(&self) -> u64 {
        self.out_of_order + self.dropped_packets + self.delay_attacks
    }
}

pub struct DetectionSession<S> {
    stream: S,
    detector: AnomalyDetector,
    splitter: LineSplitter,
    buffer_size: usize,
    sink: SharedSink,
    clock: fn() -> u64,
    report: DetectionReport,
}

impl<S: AsyncRead + Unpin> DetectionSession<S> {
    pub fn new(stream: S, detector: AnomalyDetector, buffer_size: usize, sink: SharedSink) -> Self {
        Self {
            stream,
            detector,
            splitter: LineSplitter::new(),
            buffer_size: buffer_size.max(1),
            sink,
            clock: unix_now,
            report: DetectionReport::default(),
        }
    }

    /// Replace the wall clock used for delay checks.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Read until the peer closes or the socket fails. The stream is dropped
    /// (closed) on return.
    pub async fn run(mut self) -> DetectionReport {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!("[detector] [disconnect] Client disconnected");
                    break;
                }
                Ok(n) => {
                    for line in self.splitter.push(&buf[..n]) {
                        self.process_line(&line);
                    }
                }
                Err(e) => {
                    tracing::error!("[detector] [read_failed] {}", e);
                    break;
                }
            }
        }

        if let Some(line) = self.splitter.finish() {
            self.process_line(&line);
        }
        self.report
    }

    fn process_line(&mut self, line: &str) {
        let message = match codec::decode(line) {
            Ok(message) => message,
            Err(violation) => {
                self.report.integrity_violations += 1;
                self.sink.record(Event::Integrity(violation));
                return;
            }
        };

        let inspection = self.detector.inspect(&message, (self.clock)());
        for alert in inspection.alerts {
            self.report.count(&alert);
            self.sink.record(Event::Alert(alert));
        }
        self.report.messages += 1;
        self.sink.record(Event::Message {
            message,
            delay: inspection.delay,
        });
    }
}
