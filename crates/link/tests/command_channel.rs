use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{client_async, connect_async};
use tokio_tungstenite::tungstenite::Message;

use common::{ActuatorKind, DriveCommand, SoundCommand};
use link::{ActuatorServer, CommandChannel, DriveServer, EventBus, LinkEvent, SpeakerServer, SESSION_QUEUE_DEPTH};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn url(channel: &CommandChannel, route: &str) -> String {
    let addr = channel.local_addr().expect("channel is listening");
    format!("ws://{}{}", addr, route)
}

#[tokio::test]
async fn test_broadcast_without_client_is_a_no_op() {
    let server: DriveServer = ActuatorServer::new("127.0.0.1:0", EventBus::default());
    assert_eq!(server.send(&DriveCommand::STOP), 0);
    assert!(server.initialize().await.unwrap());
    assert_eq!(server.send(&DriveCommand::STOP), 0);
    assert!(!server.is_connected());
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let channel = CommandChannel::new(ActuatorKind::Speaker, "127.0.0.1:0", EventBus::default());
    assert!(channel.initialize().await.unwrap());
    let addr = channel.local_addr();
    assert!(!channel.initialize().await.unwrap());
    assert_eq!(channel.local_addr(), addr);
}

#[tokio::test]
async fn test_bind_failure_allows_retry() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let channel = CommandChannel::new(ActuatorKind::Drive, format!("127.0.0.1:{port}"), EventBus::default());

    assert!(channel.initialize().await.is_err());
    assert!(!channel.is_listening());

    drop(taken);
    assert!(channel.initialize().await.unwrap());
}

#[tokio::test]
async fn test_attach_and_detach_flip_connected() {
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let server: SpeakerServer = ActuatorServer::new("127.0.0.1:0", bus);
    server.initialize().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), LinkEvent::ActuatorListening(ActuatorKind::Speaker));

    let (mut ws, _) = connect_async(url(server.channel(), "/speaker")).await.unwrap();
    wait_until(|| server.is_connected()).await;
    assert_eq!(events.recv().await.unwrap(), LinkEvent::ActuatorAttached(ActuatorKind::Speaker));

    assert_eq!(server.send(&SoundCommand::new("3")), 1);
    let msg = ws.next().await.unwrap().unwrap();
    assert_eq!(msg, Message::text(r#"{"sound":"3"}"#));

    ws.close(None).await.unwrap();
    wait_until(|| !server.is_connected()).await;
    assert_eq!(events.recv().await.unwrap(), LinkEvent::ActuatorDetached(ActuatorKind::Speaker));
    assert_eq!(server.send(&SoundCommand::new("4")), 0);
}

#[tokio::test]
async fn test_wrong_route_is_rejected() {
    let channel = CommandChannel::new(ActuatorKind::Drive, "127.0.0.1:0", EventBus::default());
    channel.initialize().await.unwrap();

    let err = connect_async(url(&channel, "/led")).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 404),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_commands_arrive_in_send_order() {
    let server: DriveServer = ActuatorServer::new("127.0.0.1:0", EventBus::default());
    server.initialize().await.unwrap();
    let (mut ws, _) = connect_async(url(server.channel(), "/motor")).await.unwrap();
    wait_until(|| server.is_connected()).await;

    for duty in 0..20 {
        server.set_duty(duty, duty, duty, duty);
    }
    for duty in 0..20 {
        let msg = ws.next().await.unwrap().unwrap();
        let cmd: DriveCommand = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(cmd, DriveCommand::new(duty, duty, duty, duty));
    }
}

#[tokio::test]
async fn test_client_messages_are_ignored() {
    let server: DriveServer = ActuatorServer::new("127.0.0.1:0", EventBus::default());
    server.initialize().await.unwrap();
    let (mut ws, _) = connect_async(url(server.channel(), "/motor")).await.unwrap();
    wait_until(|| server.is_connected()).await;

    ws.send(Message::text(r#"{"module":"motor_client","status":"connected"}"#))
        .await
        .unwrap();
    assert_eq!(server.stop(), 1);
    let msg = ws.next().await.unwrap().unwrap();
    assert_eq!(msg, Message::text(r#"{"duty1":0,"duty2":0,"duty3":0,"duty4":0}"#));
    assert!(server.is_connected());
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let channel = CommandChannel::new(ActuatorKind::PanTilt, "127.0.0.1:0", EventBus::default());
    channel.initialize().await.unwrap();
    let (mut ws, _) = connect_async(url(&channel, "/servo")).await.unwrap();
    wait_until(|| channel.is_connected()).await;

    channel.shutdown();
    assert!(!channel.is_listening());
    match ws.next().await {
        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
        other => panic!("expected close, got {other:?}"),
    }
    wait_until(|| !channel.is_connected()).await;
}

#[tokio::test]
async fn test_handshake_after_shutdown_is_refused() {
    let channel = CommandChannel::new(ActuatorKind::Drive, "127.0.0.1:0", EventBus::default());
    channel.initialize().await.unwrap();
    let url = url(&channel, "/motor");
    let addr = channel.local_addr().unwrap();

    // TCP accepted before shutdown, WebSocket upgrade sent after it.
    let stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    channel.shutdown();

    if let Ok((mut ws, _)) = client_async(url, stream).await {
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!channel.is_listening());
    assert!(!channel.is_connected());
    assert_eq!(channel.session_count(), 0);
    assert_eq!(channel.broadcast(r#"{"duty1":0,"duty2":0,"duty3":0,"duty4":0}"#), 0);
}

#[tokio::test]
async fn test_reinitialize_after_shutdown_accepts_clients() {
    let channel = CommandChannel::new(ActuatorKind::Speaker, "127.0.0.1:0", EventBus::default());
    channel.initialize().await.unwrap();
    channel.shutdown();
    assert!(channel.initialize().await.unwrap());

    let (_ws, _) = connect_async(url(&channel, "/speaker")).await.unwrap();
    wait_until(|| channel.is_connected()).await;
    assert_eq!(channel.session_count(), 1);
}

#[tokio::test]
async fn test_stalled_client_drops_overflow() {
    let server: DriveServer = ActuatorServer::new("127.0.0.1:0", EventBus::default());
    server.initialize().await.unwrap();
    let (mut ws, _) = connect_async(url(server.channel(), "/motor")).await.unwrap();
    wait_until(|| server.is_connected()).await;

    // No await in the loop, so the session writer cannot drain meanwhile.
    let total = SESSION_QUEUE_DEPTH + 100;
    let queued: usize = (0..total as i32).map(|d| server.set_duty(d, d, d, d)).sum();
    assert_eq!(queued, SESSION_QUEUE_DEPTH);
    assert_eq!(server.channel().diagnostics().dropped_messages(), 100);

    let first = ws.next().await.unwrap().unwrap();
    let cmd: DriveCommand = serde_json::from_str(first.to_text().unwrap()).unwrap();
    assert_eq!(cmd, DriveCommand::new(0, 0, 0, 0));
    assert!(server.is_connected());
}
