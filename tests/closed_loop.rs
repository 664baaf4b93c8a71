//! Sender -> relay -> detector, all on loopback.

use std::sync::Arc;

use mitm_testbed::config::{DetectorConfig, RelayConfig, SenderConfig};
use mitm_testbed::events::{MemorySink, SharedSink};
use mitm_testbed::servers::detector::session::DetectionReport;
use mitm_testbed::servers::detector::DetectionServer;
use mitm_testbed::servers::relay::RelayServer;
use mitm_testbed::servers::sender;

async fn run_loop(
    mode: &str,
    tweak: impl FnOnce(&mut RelayConfig),
    count: u64,
) -> (DetectionReport, Arc<MemorySink>) {
    let detector_sink = MemorySink::new();
    let shared: SharedSink = detector_sink.clone();
    let detector = DetectionServer::bind(
        DetectorConfig {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            max_delay: 30.0,
            buffer_size: 4096,
            detection_enabled: true,
        },
        shared,
    )
    .await
    .unwrap();
    let detector_port = detector.local_addr().unwrap().port();
    let detector = tokio::spawn(async move { detector.serve_one().await.unwrap() });

    let mut relay_config = RelayConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        server_host: "127.0.0.1".to_string(),
        server_port: detector_port,
        mode: mode.to_string(),
        delay_min: 0.0,
        delay_max: 0.0,
        drop_rate: 0.0,
        reorder_window: 1,
        buffer_size: 4096,
    };
    tweak(&mut relay_config);
    let relay = RelayServer::bind(relay_config, MemorySink::new()).await.unwrap();
    let relay_port = relay.local_addr().unwrap().port();
    let relay = tokio::spawn(async move { relay.serve_one().await.unwrap() });

    let sent = sender::run(&SenderConfig {
        host: "127.0.0.1".to_string(),
        port: relay_port,
        message_interval: 0.02,
        payload: "Username=ROOT=, Password=SSHTERMINAL".to_string(),
        max_messages: Some(count),
    })
    .await
    .unwrap();
    assert_eq!(sent, count);

    relay.await.unwrap().expect("detector reachable");
    (detector.await.unwrap(), detector_sink)
}

#[tokio::test]
async fn test_transparent_relay_is_invisible() {
    let (report, sink) = run_loop("transparent", |_| {}, 6).await;
    assert_eq!(report.messages, 6);
    assert_eq!(report.alerts(), 0);
    assert_eq!(report.integrity_violations, 0);
    assert_eq!(sink.messages()[0].payload, "Username=ROOT=, Password=SSHTERMINAL");
}

#[tokio::test]
async fn test_dropping_relay_starves_the_detector() {
    let (report, _) = run_loop("drop", |c| c.drop_rate = 1.0, 4).await;
    assert_eq!(report.messages, 0);
}

#[tokio::test]
async fn test_reordering_relay_loses_nothing() {
    let (report, sink) = run_loop("reorder", |c| c.reorder_window = 3, 6).await;
    assert_eq!(report.integrity_violations, 0);

    let mut sequences: Vec<u64> = sink.messages().iter().map(|m| m.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=6).collect::<Vec<_>>());
}
