//! Streaming transport against a real loopback WebSocket server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_dashsync::{DashboardSession, SyncConfig, TransportMode};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type Ws = WebSocketStream<TcpStream>;

async fn within<F: Future>(fut: F) -> F::Output {
    timeout(Duration::from_secs(5), fut).await.expect("timed out")
}

fn config_for(addr: SocketAddr) -> SyncConfig {
    SyncConfig {
        base_url: format!("http://{}", addr),
        reconnect_delay_ms: 50,
        ..Default::default()
    }
}

async fn bind() -> (TcpListener, SyncConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(listener.local_addr().unwrap());
    (listener, config)
}

async fn accept(listener: &TcpListener) -> Ws {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Reads until the client goes away.
async fn drain(ws: &mut Ws) {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_close() {
            break;
        }
    }
}

#[tokio::test]
async fn updates_merge_in_arrival_order() {
    let (listener, config) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, json!({ "type": "update", "status": { "total": 42 } })).await;
        send_json(
            &mut ws,
            json!({ "type": "update", "fleet": { "workers": [ { "worker_id": "w1", "cores": 8 } ] } }),
        )
        .await;
        drain(&mut ws).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    assert_eq!(session.mode(), TransportMode::Streaming);
    let mut snapshots = session.subscribe_snapshot();
    within(snapshots.wait_for(|s| s.fleet.is_some())).await.unwrap();

    assert_eq!(session.status().unwrap().total, 42);
    let fleet = session.fleet().unwrap();
    assert_eq!(fleet.workers.len(), 1);
    assert_eq!(fleet.workers[0].worker_id, "w1");
    assert!(session.connected());
    session.shutdown().await;
}

#[tokio::test]
async fn prime_found_notifies_without_touching_snapshot() {
    let (listener, config) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, json!({ "type": "update", "status": { "total": 1 } })).await;
        send_json(
            &mut ws,
            json!({
                "type": "prime_found",
                "form": "factorial",
                "expression": "100!+1",
                "digits": 158,
                "timestamp_ms": 1_700_000_000_000i64
            }),
        )
        .await;
        drain(&mut ws).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = session.on_prime_found(move |record| {
        let _ = tx.send(record);
    });

    let record = within(rx.recv()).await.unwrap();
    assert_eq!(record.id, 0);
    assert_eq!(record.form, "factorial");
    assert_eq!(record.digits, 158);
    assert_eq!(record.found_at, "2023-11-14T22:13:20.000Z");

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status.unwrap().total, 1);
    assert!(snapshot.fleet.is_none());
    assert!(snapshot.records.is_none());
    assert_eq!(session.latest_discovery(), Some(record));
    session.shutdown().await;
}

#[tokio::test]
async fn send_message_reaches_server_while_connected() {
    let (listener, config) = bind().await;
    let (got_tx, got_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = got_tx.send(text.as_str().to_string());
                break;
            }
        }
        drain(&mut ws).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    let mut connected = session.subscribe_connected();
    within(connected.wait_for(|c| *c)).await.unwrap();

    session.send_message(&json!({ "action": "pause_search", "id": 3 }));

    let raw = within(got_rx).await.unwrap();
    let received: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(received, json!({ "action": "pause_search", "id": 3 }));
    session.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_connection_kept() {
    let (listener, config) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Text("{not json".into())).await.unwrap();
        send_json(&mut ws, json!({ "type": "heartbeat" })).await;
        send_json(&mut ws, json!({ "type": "update", "status": { "total": 5 } })).await;
        drain(&mut ws).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    let mut snapshots = session.subscribe_snapshot();
    within(snapshots.wait_for(|s| s.status.is_some())).await.unwrap();

    assert_eq!(session.status().unwrap().total, 5);
    assert!(session.connected());
    session.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_server_closes() {
    let (listener, config) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut first = accept(&listener).await;
        counter.fetch_add(1, Ordering::SeqCst);
        send_json(&mut first, json!({ "type": "update", "status": { "total": 1 } })).await;
        let _ = first.close(None).await;
        drop(first);

        let mut second = accept(&listener).await;
        counter.fetch_add(1, Ordering::SeqCst);
        send_json(&mut second, json!({ "type": "update", "status": { "total": 2 } })).await;
        drain(&mut second).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    let mut snapshots = session.subscribe_snapshot();
    within(snapshots.wait_for(|s| s.status.as_ref().map(|st| st.total) == Some(2)))
        .await
        .unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    let mut connected = session.subscribe_connected();
    within(connected.wait_for(|c| *c)).await.unwrap();
    session.shutdown().await;
}

#[tokio::test]
async fn teardown_freezes_state_and_stops_reconnecting() {
    let (listener, config) = bind().await;
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (reconnect_tx, reconnect_rx) = oneshot::channel::<bool>();
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(&mut ws, json!({ "type": "update", "status": { "total": 1 } })).await;

        let _ = go_rx.await;
        let late = json!({
            "type": "prime_found",
            "form": "kbn",
            "expression": "3*2^100+1",
            "digits": 31,
            "timestamp_ms": 0
        });
        let _ = ws.send(Message::Text(late.to_string().into())).await;
        let _ = ws
            .send(Message::Text(json!({ "type": "update", "status": { "total": 99 } }).to_string().into()))
            .await;
        drain(&mut ws).await;

        let again = timeout(Duration::from_millis(300), listener.accept()).await.is_ok();
        let _ = reconnect_tx.send(again);
    });

    let session = DashboardSession::start(&config).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _sub = session.on_prime_found(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut snapshots = session.subscribe_snapshot();
    within(snapshots.wait_for(|s| s.status.is_some())).await.unwrap();

    session.teardown();
    session.teardown();
    let _ = go_tx.send(());

    assert!(!within(reconnect_rx).await.unwrap(), "client reconnected after teardown");
    sleep(Duration::from_millis(50)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(session.status().unwrap().total, 1);
    assert!(session.latest_discovery().is_none());
    session.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_stays_disconnected() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = SyncConfig {
        base_url: format!("http://127.0.0.1:{}", port),
        reconnect_delay_ms: 20,
        ..Default::default()
    };

    let session = DashboardSession::start(&config).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(!session.connected());
    session.send_message(&json!({ "action": "noop" }));
    within(session.shutdown()).await;
}

#[tokio::test]
async fn odd_sub_fields_still_apply_the_update() {
    let (listener, config) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_json(
            &mut ws,
            json!({ "type": "update", "status": { "total": 42 }, "deployments": [ { "id": 1, "hostname": null } ] }),
        )
        .await;
        send_json(
            &mut ws,
            json!({ "type": "update", "status": { "total": 43, "uptime_secs": 12.5 }, "fleet": { "workers": [] } }),
        )
        .await;
        drain(&mut ws).await;
    });

    let session = DashboardSession::start(&config).unwrap();
    let mut snapshots = session.subscribe_snapshot();
    within(snapshots.wait_for(|s| s.fleet.is_some())).await.unwrap();

    let status = session.status().unwrap();
    assert_eq!(status.total, 43);
    assert_eq!(status.uptime_secs, Some(12));
    let deployments = session.deployments().unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].hostname, "");
    assert!(session.connected());
    session.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_from_discovery_callback_returns() {
    let (listener, config) = bind().await;
    let (go_tx, go_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let _ = go_rx.await;
        for expression in ["3*2^7+1", "5*2^9+1"] {
            let found = json!({
                "type": "prime_found",
                "form": "kbn",
                "expression": expression,
                "digits": 3,
                "timestamp_ms": 0
            });
            let _ = ws.send(Message::Text(found.to_string().into())).await;
        }
        let _ = ws
            .send(Message::Text(json!({ "type": "update", "status": { "total": 99 } }).to_string().into()))
            .await;
        drain(&mut ws).await;
    });

    let session = Arc::new(DashboardSession::start(&config).unwrap());
    let slot: Arc<OnceLock<Weak<DashboardSession>>> = Arc::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = Arc::clone(&slot);
    let _sub = session.on_prime_found(move |record| {
        let _ = tx.send(record.expression);
        if let Some(session) = handle.get().and_then(Weak::upgrade) {
            session.teardown();
        }
    });
    let _ = slot.set(Arc::downgrade(&session));
    let _ = go_tx.send(());

    assert_eq!(within(rx.recv()).await.unwrap(), "3*2^7+1");
    within(session.shutdown()).await;

    assert!(rx.try_recv().is_err(), "callback fired after teardown");
    assert!(session.status().is_none());
    assert_eq!(session.latest_discovery().unwrap().expression, "3*2^7+1");
}
