//! Relay session: two forwarding loops over one client/upstream pair.
//!
//! Each direction runs in its own task with its own [`AttackEngine`], so a
//! RandomDelay sleep stalls only that direction while the other keeps
//! flowing. When one loop ends it drops its watch sender, which tells the
//! opposite loop to stop reading and close its destination.

use bytes::Bytes;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::attack::{AttackEngine, Decision};
use crate::config::RelayConfig;
use crate::events::{CloseReason, Direction, Event, SharedSink};

/// Counters for one direction of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub direction: Direction,
    pub chunks_in: u64,
    pub chunks_out: u64,
    pub bytes_out: u64,
    pub dropped: u64,
    /// Chunks released from the reorder buffer at stream end.
    pub flushed: u64,
    pub close: CloseReason,
}

impl DirectionReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            chunks_in: 0,
            chunks_out: 0,
            bytes_out: 0,
            dropped: 0,
            flushed: 0,
            close: CloseReason::PeerClosed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub client_to_server: DirectionReport,
    pub server_to_client: DirectionReport,
}

pub struct RelaySession<R = rand::rngs::StdRng> {
    client: TcpStream,
    upstream: TcpStream,
    outbound: AttackEngine<R>,
    inbound: AttackEngine<R>,
    buffer_size: usize,
    sink: SharedSink,
}

impl RelaySession {
    /// Both directions get the configured mode, each with a private engine.
    pub fn new(
        client: TcpStream,
        upstream: TcpStream,
        config: &RelayConfig,
        sink: SharedSink,
    ) -> Self {
        let mode = config.attack_mode();
        let params = config.attack_params();
        Self::with_engines(
            client,
            upstream,
            AttackEngine::new(mode, params),
            AttackEngine::new(mode, params),
            config.buffer_size,
            sink,
        )
    }
}

impl<R: Rng + Send + 'static> RelaySession<R> {
    pub fn with_engines(
        client: TcpStream,
        upstream: TcpStream,
        outbound: AttackEngine<R>,
        inbound: AttackEngine<R>,
        buffer_size: usize,
        sink: SharedSink,
    ) -> Self {
        Self {
            client,
            upstream,
            outbound,
            inbound,
            buffer_size: buffer_size.max(1),
            sink,
        }
    }

    /// Forward in both directions until both loops have returned.
    pub async fn run(self) -> RelayReport {
        let (client_read, client_write) = self.client.into_split();
        let (upstream_read, upstream_write) = self.upstream.into_split();

        let (outbound_done, outbound_watch) = watch::channel(());
        let (inbound_done, inbound_watch) = watch::channel(());

        let outbound = tokio::spawn(forward(
            client_read,
            upstream_write,
            self.outbound,
            Leg {
                direction: Direction::ClientToServer,
                buffer_size: self.buffer_size,
                sink: self.sink.clone(),
                done: outbound_done,
                partner: inbound_watch,
            },
        ));
        let inbound = tokio::spawn(forward(
            upstream_read,
            client_write,
            self.inbound,
            Leg {
                direction: Direction::ServerToClient,
                buffer_size: self.buffer_size,
                sink: self.sink.clone(),
                done: inbound_done,
                partner: outbound_watch,
            },
        ));

        let (outbound, inbound) = tokio::join!(outbound, inbound);
        RelayReport {
            client_to_server: joined(outbound, Direction::ClientToServer),
            server_to_client: joined(inbound, Direction::ServerToClient),
        }
    }
}

fn joined(
    result: Result<DirectionReport, tokio::task::JoinError>,
    direction: Direction,
) -> DirectionReport {
    result.unwrap_or_else(|e| {
        tracing::error!("[relay] [task_failed] {}: {}", direction, e);
        DirectionReport {
            close: CloseReason::Io(e.to_string()),
            ..DirectionReport::new(direction)
        }
    })
}

/// Per-direction wiring for [`forward`].
pub struct Leg {
    pub direction: Direction,
    pub buffer_size: usize,
    pub sink: SharedSink,
    /// Dropped when the loop returns, waking the opposite loop.
    pub done: watch::Sender<()>,
    /// Fires when the opposite loop has returned.
    pub partner: watch::Receiver<()>,
}

/// One forwarding loop: read, pass through the engine, write.
///
/// The reorder buffer is flushed into `dst` before `dst` is shut down.
pub async fn forward<S, D, R>(
    mut src: S,
    mut dst: D,
    mut engine: AttackEngine<R>,
    leg: Leg,
) -> DirectionReport
where
    S: AsyncRead + Unpin,
    D: AsyncWrite + Unpin,
    R: Rng,
{
    let Leg {
        direction,
        buffer_size,
        sink,
        done: _done,
        mut partner,
    } = leg;
    let mut report = DirectionReport::new(direction);
    let mut buf = vec![0u8; buffer_size.max(1)];

    report.close = loop {
        let read = tokio::select! {
            read = src.read(&mut buf) => read,
            _ = partner.changed() => break CloseReason::PartnerClosed,
        };

        let n = match read {
            Ok(0) => break CloseReason::PeerClosed,
            Ok(n) => n,
            Err(e) => break CloseReason::Io(e.to_string()),
        };
        report.chunks_in += 1;

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let out = match engine.apply(chunk) {
            Decision::Forward(out) => out,
            Decision::Delay(delay, out) => {
                sink.record(Event::Delayed {
                    direction,
                    delay,
                    bytes: out.len(),
                });
                tokio::time::sleep(delay).await;
                out
            }
            Decision::Discard => {
                report.dropped += 1;
                sink.record(Event::Dropped { direction, bytes: n });
                continue;
            }
            Decision::Hold => {
                sink.record(Event::Held {
                    direction,
                    buffered: engine.buffered(),
                });
                continue;
            }
        };

        if let Err(e) = dst.write_all(&out).await {
            break CloseReason::Io(e.to_string());
        }
        report.chunks_out += 1;
        report.bytes_out += out.len() as u64;
        sink.record(Event::Forwarded {
            direction,
            bytes: out.len(),
        });
    };

    let held = engine.flush();
    if !held.is_empty() {
        let chunks = held.len();
        let mut bytes = 0;
        for chunk in held {
            if let Err(e) = dst.write_all(&chunk).await {
                tracing::warn!("[relay] [flush_failed] {}: {}", direction, e);
                break;
            }
            bytes += chunk.len();
            report.flushed += 1;
            report.chunks_out += 1;
            report.bytes_out += chunk.len() as u64;
        }
        sink.record(Event::Flushed {
            direction,
            chunks,
            bytes,
        });
    }

    let _ = dst.shutdown().await;
    sink.record(Event::DirectionClosed {
        direction,
        reason: report.close.clone(),
    });
    report
}
