use std::sync::Arc;

use mitm_testbed::config::DetectorConfig;
use mitm_testbed::events::{MemorySink, SharedSink};
use mitm_testbed::network::{codec, unix_now};
use mitm_testbed::servers::detector::analyzer::Alert;
use mitm_testbed::servers::detector::session::DetectionReport;
use mitm_testbed::servers::detector::DetectionServer;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn detector_config(max_delay: f64, detection_enabled: bool) -> DetectorConfig {
    DetectorConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        max_delay,
        buffer_size: 4096,
        detection_enabled,
    }
}

async fn start_detector(
    config: DetectorConfig,
) -> (TcpStream, JoinHandle<DetectionReport>, Arc<MemorySink>) {
    let sink = MemorySink::new();
    let shared: SharedSink = sink.clone();
    let server = DetectionServer::bind(config, shared).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move { server.serve_one().await.unwrap() });
    let client = TcpStream::connect(addr).await.unwrap();
    (client, handle, sink)
}

async fn send(client: &mut TcpStream, lines: &[String]) {
    for line in lines {
        client.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
    }
}

#[tokio::test]
async fn test_gap_then_late_arrival() {
    let (mut client, detector, sink) = start_detector(detector_config(2.0, true)).await;
    let now = unix_now();

    send(
        &mut client,
        &[codec::encode(3, now, "x"), codec::encode(2, now, "x")],
    )
    .await;
    drop(client);

    let report = detector.await.unwrap();
    assert_eq!(report.messages, 2);
    assert_eq!(report.dropped_packets, 1);
    assert_eq!(report.out_of_order, 1);
    assert_eq!(
        sink.alerts(),
        vec![
            Alert::DroppedPackets { missing: 1..3 },
            Alert::OutOfOrder {
                sequence: 2,
                expected: 4
            },
        ]
    );
}

#[tokio::test]
async fn test_in_order_stream_is_clean() {
    let (mut client, detector, sink) = start_detector(detector_config(2.0, true)).await;
    let now = unix_now();

    let lines: Vec<String> = (1..=20).map(|seq| codec::encode(seq, now, "hello")).collect();
    // One write carrying every line, to exercise line splitting.
    client.write_all(format!("{}\n", lines.join("\n")).as_bytes()).await.unwrap();
    drop(client);

    let report = detector.await.unwrap();
    assert_eq!(report.messages, 20);
    assert_eq!(report.alerts(), 0);
    assert_eq!(sink.messages().last().map(|m| m.sequence), Some(20));
}

#[tokio::test]
async fn test_stale_timestamp_raises_delay_attack() {
    let (mut client, detector, sink) = start_detector(detector_config(2.0, true)).await;

    send(&mut client, &[codec::encode(1, unix_now() - 5, "x")]).await;
    drop(client);

    let report = detector.await.unwrap();
    assert_eq!(report.delay_attacks, 1);
    assert_eq!(sink.alerts()[0].kind(), "delay_attack");
}

#[tokio::test]
async fn test_disabled_detection_logs_without_alerting() {
    let (mut client, detector, sink) = start_detector(detector_config(2.0, false)).await;
    let now = unix_now();

    send(
        &mut client,
        &[
            codec::encode(1, now - 5, "x"),
            codec::encode(1, now, "x"),
            codec::encode(7, now, "x"),
        ],
    )
    .await;
    drop(client);

    let report = detector.await.unwrap();
    assert_eq!(report.messages, 3);
    assert_eq!(report.alerts(), 0);
    assert!(sink.alerts().is_empty());
    assert_eq!(sink.count("message"), 3);
}

#[tokio::test]
async fn test_garbage_does_not_end_the_session() {
    let (mut client, detector, sink) = start_detector(detector_config(2.0, true)).await;
    let now = unix_now();

    send(
        &mut client,
        &[
            "HELLO 1".to_string(),
            "SEQ=1|TS=soon|DATA=x".to_string(),
            codec::encode(1, now, "x"),
        ],
    )
    .await;
    drop(client);

    let report = detector.await.unwrap();
    assert_eq!(report.integrity_violations, 2);
    assert_eq!(report.messages, 1);
    assert_eq!(report.alerts(), 0);
    assert_eq!(sink.count("integrity_violation"), 2);
}
