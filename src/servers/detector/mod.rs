pub mod analyzer;
pub mod session;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::config::DetectorConfig;
use crate::events::SharedSink;
use crate::network;
use analyzer::AnomalyDetector;
use session::{DetectionReport, DetectionSession};

/// Receiving endpoint that inspects the stream for MITM side effects.
pub struct DetectionServer {
    config: DetectorConfig,
    listener: TcpListener,
    sink: SharedSink,
}

impl DetectionServer {
    pub async fn bind(config: DetectorConfig, sink: SharedSink) -> Result<Self> {
        let listener = network::bind_listener(&config.listen_host, config.listen_port).await?;
        let server = Self {
            config,
            listener,
            sink,
        };
        tracing::info!("[detector] [ready] addr={}", server.local_addr()?);
        tracing::info!(
            "[detector] [config] MAX_DELAY={}s detection_enabled={}",
            server.config.max_delay,
            server.config.detection_enabled
        );
        Ok(server)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Cannot read detector listen address")
    }

    /// Accept one connection and analyse it until the peer goes away.
    pub async fn serve_one(self) -> Result<DetectionReport> {
        tracing::info!("[detector] [waiting] Waiting for connection...");
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .context("Detector accept failed")?;
        drop(self.listener);
        tracing::info!("[detector] [accept] Connected with {}", peer);

        let detector = AnomalyDetector::new(self.config.max_delay, self.config.detection_enabled);
        let report = DetectionSession::new(stream, detector, self.config.buffer_size, self.sink)
            .run()
            .await;

        tracing::info!(
            "[detector] [session_end] peer={} messages={} violations={} alerts={}",
            peer,
            report.messages,
            report.integrity_violations,
            report.alerts()
        );
        Ok(report)
    }
}
