//! Message generator
//!
//! Emits `SEQ=n|TS=now|DATA=payload` lines at a fixed interval, starting at
//! sequence 1. Points at the relay normally, or straight at the detector for
//! a clean baseline.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::SenderConfig;
use crate::network::{self, codec};

/// Connect and send until `max_messages` is reached.
///
/// Returns the number of messages written. Runs forever when
/// `max_messages` is unset; the caller decides when to stop.
pub async fn run(config: &SenderConfig) -> Result<u64> {
    let mut stream = network::connect(&config.host, config.port).await?;
    tracing::info!("[sender] [connected] Connected to {}:{}", config.host, config.port);

    let interval =
        Duration::try_from_secs_f64(config.message_interval.max(0.0)).unwrap_or(Duration::MAX);
    let mut sent = 0u64;
    let mut sequence = 1u64;

    while config.max_messages.map_or(true, |max| sent < max) {
        if sent > 0 {
            tokio::time::sleep(interval).await;
        }

        let line = codec::encode_line(sequence, network::unix_now(), &config.payload);
        stream
            .write_all(&line)
            .await
            .with_context(|| format!("Failed to send SEQ={}", sequence))?;
        tracing::info!("[sender] [sent] {}", String::from_utf8_lossy(&line).trim_end());

        sent += 1;
        sequence += 1;
    }

    stream.shutdown().await.ok();
    tracing::info!("[sender] [closed] sent={}", sent);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_numbered_lines_then_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut text = String::new();
            stream.read_to_string(&mut text).await.unwrap();
            text
        });

        let config = SenderConfig {
            host: "127.0.0.1".to_string(),
            port,
            message_interval: 0.0,
            payload: "ping=1".to_string(),
            max_messages: Some(3),
        };
        assert_eq!(run(&config).await.unwrap(), 3);

        let text = reader.await.unwrap();
        let messages: Vec<_> = text.lines().map(|l| codec::decode(l).unwrap()).collect();
        assert_eq!(messages.len(), 3);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.sequence, i as u64 + 1);
            assert_eq!(message.payload, "ping=1");
        }
    }

    #[tokio::test]
    async fn unreachable_target_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = SenderConfig {
            host: "127.0.0.1".to_string(),
            port,
            max_messages: Some(1),
            ..SenderConfig::default()
        };
        assert!(run(&config).await.is_err());
    }
}
