use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use common::{ReconnectPolicy, SensorKind, SensorValue};
use link::{EventBus, LinkEvent, SensorLink};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Sensor endpoint that sends `payloads` on every accepted session, then
/// closes it. Counts sessions served.
async fn fake_sensor(payloads: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let sessions = Arc::new(AtomicUsize::new(0));
    let served = Arc::clone(&sessions);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = accept_async(stream).await else { continue };
            served.fetch_add(1, Ordering::SeqCst);
            for p in &payloads {
                ws.send(Message::text(*p)).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = ws.close(None).await;
        }
    });
    (url, sessions)
}

#[tokio::test]
async fn test_readings_update_latest_value() {
    let (url, _) = fake_sensor(vec![
        r#"{"sensor":"ultrasonic","distance":10.0}"#,
        r#"{"sensor":"ultrasonic","distance":42.5}"#,
    ])
    .await;
    let link = SensorLink::new(SensorKind::Ultrasonic, url, ReconnectPolicy::None);
    let state = link.state();
    let (tx, rx) = watch::channel(false);
    let task = link.spawn(EventBus::default(), rx);

    wait_until(|| state.latest() == Some(SensorValue::Float(42.5))).await;
    tx.send_replace(true);
    task.await.unwrap();
}

#[tokio::test]
async fn test_without_reconnect_the_link_stays_down() {
    let (url, sessions) = fake_sensor(vec![r#"{"sensor":"infrared","value":5}"#]).await;
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let link = SensorLink::new(SensorKind::Infrared, url, ReconnectPolicy::None);
    let state = link.state();
    let (_tx, rx) = watch::channel(false);

    link.spawn(bus, rx).await.unwrap();
    assert_eq!(state.latest(), Some(SensorValue::Integer(5)));
    assert!(!state.is_connected());
    assert_eq!(sessions.load(Ordering::SeqCst), 1);
    assert_eq!(events.recv().await.unwrap(), LinkEvent::SensorConnected(SensorKind::Infrared));
    assert_eq!(events.recv().await.unwrap(), LinkEvent::SensorDisconnected(SensorKind::Infrared));
}

#[tokio::test]
async fn test_fixed_interval_reconnects() {
    let (url, sessions) = fake_sensor(vec![r#"{"sensor":"light","value":1.5}"#]).await;
    let policy = ReconnectPolicy::FixedInterval { interval_ms: 20 };
    let link = SensorLink::new(SensorKind::LightRight, url, policy);
    let (tx, rx) = watch::channel(false);
    let task = link.spawn(EventBus::default(), rx);

    wait_until(|| sessions.load(Ordering::SeqCst) >= 3).await;
    tx.send_replace(true);
    task.await.unwrap();
    assert!(!link.state().is_connected());
}

#[tokio::test]
async fn test_bad_payloads_do_not_break_the_session() {
    let (url, _) = fake_sensor(vec![
        r#"{"sensor":"light","value":7.0}"#,
        "garbage",
        r#"{"sensor":"light"}"#,
    ])
    .await;
    let link = SensorLink::new(SensorKind::LightLeft, url, ReconnectPolicy::None);
    let state = link.state();
    let (_tx, rx) = watch::channel(false);

    link.spawn(EventBus::default(), rx).await.unwrap();
    assert_eq!(state.latest(), Some(SensorValue::Float(7.0)));
    assert_eq!(state.diagnostics().parse_errors(), 2);
}

#[tokio::test]
async fn test_camera_frames_reach_the_slot() {
    let (url, _) = fake_sensor(vec![r#"{"sensor":"picam","image":"/9j/4A=="}"#]).await;
    let link = SensorLink::new(SensorKind::Camera, url, ReconnectPolicy::None);
    let state = link.state();
    let (_tx, rx) = watch::channel(false);

    link.spawn(EventBus::default(), rx).await.unwrap();
    assert_eq!(state.frame_slot().take(), Some(vec![0xff, 0xd8, 0xff, 0xe0]));
}

#[tokio::test]
async fn test_unreachable_endpoint_counts_transport_error() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let link = SensorLink::new(SensorKind::Ultrasonic, format!("ws://127.0.0.1:{port}"), ReconnectPolicy::None);
    let state = link.state();
    let (_tx, rx) = watch::channel(false);

    link.spawn(EventBus::default(), rx).await.unwrap();
    assert!(!state.is_connected());
    assert_eq!(state.diagnostics().transport_errors(), 1);
}
