//! Session behavior against a local WebSocket server.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use doorlink_client::{ClientError, ConnectionState, DeviceSession, Event, EventKind, StatusUpdate};
use doorlink_protocol::encode_frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// Accepts one connection and runs `handler` on it.
async fn serve<F, Fut>(handler: F) -> Url
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        handler(ws).await;
    });
    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

/// Forwards every text message the client sends, until the client closes.
async fn forward_text(ws: &mut WebSocketStream<TcpStream>, seen: &mpsc::UnboundedSender<Value>) {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            let _ = seen.send(serde_json::from_str(&text).unwrap());
        }
    }
}

#[tokio::test]
async fn password_query_fires_target_listener_once() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let url = serve(move |mut ws| async move {
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            return;
        };
        let _ = seen_tx.send(serde_json::from_str::<Value>(&text).unwrap());
        ws.send(Message::Text(
            r#"{"type":"query_result","target":"password","status":"success","data":{}}"#.into(),
        ))
        .await
        .unwrap();
        forward_text(&mut ws, &seen_tx).await;
    })
    .await;

    let session = DeviceSession::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let counter = Arc::clone(&calls);
    session.on(EventKind::target_result("password"), move |event| {
        let Event::TargetResult(result) = event else {
            return;
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = fired_tx.send(result.password().map(str::to_string));
    });

    session.connect(&url).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    let seq_id = session.query("password", Map::new()).unwrap();

    let sent = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(sent["type"], "query");
    assert_eq!(sent["target"], "password");
    assert_eq!(sent["seq_id"], seq_id.as_str());

    let password = timeout(WAIT, fired_rx.recv()).await.unwrap().unwrap();
    assert_eq!(password.as_deref(), Some("123456"));

    // give a duplicate dispatch the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.pending_count(), 0);

    session.disconnect();
}

#[tokio::test]
async fn send_before_connect_produces_no_traffic() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let url = serve(move |mut ws| async move { forward_text(&mut ws, &seen_tx).await }).await;

    let session = DeviceSession::new();
    assert!(session.query("password", Map::new()).is_none());
    assert!(!session.send_audio(&[1, 2, 3]));
    assert_eq!(session.pending_count(), 0);

    session.connect(&url).await.unwrap();
    session.query("events", Map::new()).unwrap();

    let first = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first["target"], "events");

    session.disconnect();
}

#[tokio::test]
async fn interleaved_binary_and_json_are_demultiplexed() {
    let url = serve(|mut ws| async move {
        let outgoing = [
            Message::Binary(encode_frame(2, 0, 0, &[1, 0, 2, 0]).unwrap()),
            Message::Text(r#"{"type":"log","msg":"a"}"#.into()),
            Message::Binary(encode_frame(2, 0, 9, b"jpeg").unwrap()),
            Message::Binary(vec![0, 2]),
            Message::Text("not json".into()),
            Message::Text(r#"{"type":"stats","fps":12}"#.into()),
        ];
        for message in outgoing {
            ws.send(message).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let session = DeviceSession::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [EventKind::Audio, EventKind::Video, EventKind::Log, EventKind::Stats] {
        let tx = tx.clone();
        session.on(kind, move |event| {
            let _ = tx.send(event.kind().to_string());
        });
    }

    session.connect(&url).await.unwrap();

    let mut order = Vec::new();
    while order.len() < 4 {
        order.push(timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    assert_eq!(order, vec!["audio", "log", "video", "stats"]);
    assert!(session.is_connected());

    session.disconnect();
}

#[tokio::test]
async fn disconnect_abandons_pending_replies() {
    let url = serve(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

    let session = DeviceSession::new();
    session.connect(&url).await.unwrap();

    let reply = session.query_reply("unlock_logs", Map::new()).unwrap();
    let late = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&late);
    session
        .query_with("events", Map::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(session.pending_count(), 2);
    assert!(session.oldest_pending_age().is_some());

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.pending_count(), 0);

    let outcome = timeout(WAIT, reply).await.unwrap();
    assert!(matches!(outcome, Err(ClientError::Abandoned)));
    assert_eq!(late.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn device_close_emits_disconnected_status() {
    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let url = serve(|mut ws| async move {
        let _ = close_rx.await;
        let _ = ws.close(None).await;
    })
    .await;

    let session = DeviceSession::new();
    let statuses = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    session.on(EventKind::Status, move |event| {
        if let Event::Status(StatusUpdate::Connection(state)) = event {
            sink.lock().unwrap().push(*state);
        }
    });

    session.connect(&url).await.unwrap();
    let reply = session.query_reply("password", Map::new()).unwrap();
    let mut state = session.subscribe_state();

    close_tx.send(()).unwrap();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(timeout(WAIT, reply).await.unwrap(), Err(ClientError::Abandoned)));
    assert!(session.query("password", Map::new()).is_none());
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn reply_with_echoed_seq_id_resolves_that_request() {
    let url = serve(|mut ws| async move {
        let mut ids = Vec::new();
        while ids.len() < 2 {
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                return;
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            ids.push(value["seq_id"].clone());
        }
        // answer the second request first
        for (id, count) in [(&ids[1], 2), (&ids[0], 1)] {
            let reply = json!({
                "type": "query_result",
                "target": "visitor_intents",
                "status": "success",
                "seq_id": id,
                "data": [],
                "total": count,
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let session = DeviceSession::new();
    session.connect(&url).await.unwrap();

    let first = session.query_reply("visitor_intents", Map::new()).unwrap();
    let second = session.query_reply("visitor_intents", Map::new()).unwrap();

    let first = timeout(WAIT, first).await.unwrap().unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap();
    assert_eq!(first.total, Some(1));
    assert_eq!(second.total, Some(2));

    session.disconnect();
}
