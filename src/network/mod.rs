pub mod codec;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

/// Bind a listener on `host:port`. Port 0 picks a free port.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot bind listener on {}", addr))
}

/// Open a TCP connection to `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Cannot connect to {}", addr))?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Current wall clock in unix seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
