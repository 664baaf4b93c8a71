pub mod attack;
pub mod session;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

use crate::config::RelayConfig;
use crate::events::SharedSink;
use crate::network;
use session::{RelayReport, RelaySession};

/// Listening side of the attack relay.
///
/// Serves one client per process: accept, dial the real server, forward
/// until both directions are done.
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    sink: SharedSink,
}

impl RelayServer {
    pub async fn bind(mut config: RelayConfig, sink: SharedSink) -> Result<Self> {
        // Resolve once so an unknown mode warns a single time.
        config.mode = config.attack_mode().as_str().to_string();
        let listener = network::bind_listener(&config.listen_host, config.listen_port).await?;
        let server = Self {
            config,
            listener,
            sink,
        };
        tracing::info!(
            "[relay] [ready] addr={} upstream={}:{} mode={}",
            server.local_addr()?,
            server.config.server_host,
            server.config.server_port,
            server.config.attack_mode()
        );
        Ok(server)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Cannot read relay listen address")
    }

    /// Accept a single client and relay it to completion.
    ///
    /// Returns `None` when the upstream could not be reached; the client
    /// socket is closed and the failure only ends this session.
    pub async fn serve_one(self) -> Result<Option<RelayReport>> {
        let (client, peer) = self
            .listener
            .accept()
            .await
            .context("Relay accept failed")?;
        drop(self.listener);
        Ok(handle_connection(&self.config, client, peer, self.sink).await)
    }
}

pub async fn handle_connection(
    config: &RelayConfig,
    client: TcpStream,
    peer: SocketAddr,
    sink: SharedSink,
) -> Option<RelayReport> {
    tracing::info!("[relay] [accept] client={}", peer);
    client.set_nodelay(true).ok();

    let upstream = match network::connect(&config.server_host, config.server_port).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("[relay] [upstream_failed] client={} error={:#}", peer, e);
            return None;
        }
    };
    tracing::info!(
        "[relay] [upstream] connected to {}:{}",
        config.server_host,
        config.server_port
    );

    let report = RelaySession::new(client, upstream, config, sink).run().await;
    tracing::info!(
        "[relay] [session_end] client={} c2s_bytes={} s2c_bytes={} dropped={}",
        peer,
        report.client_to_server.bytes_out,
        report.server_to_client.bytes_out,
        report.client_to_server.dropped + report.server_to_client.dropped
    );
    Some(report)
}
