// PoloCloudPanel/tests/session_lifecycle_test.rs

mod common;

use common::{harness, settle, EventLog, ALIVE_URL, SCREEN_URL};
use common_models::ws_payloads::{PongPayload, PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE};
use common_models::ConnectionState;
use polocloud_panel::ws_client::SessionConfig;
use rust_websocket_utils::{TypedMessage, WsError};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
/// 连续失败后任意一次成功打开都会把失败计数清零。
async fn test_attempt_counter_resets_after_successful_open() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    session.connect();

    h.controller.next_attempt().await.unwrap().reject(WsError::ConnectionFailed("refused".into()));
    settle().await;
    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert_eq!(session.attempts(), 1);
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(1)]);

    h.scheduler.advance(Duration::from_secs(1));
    assert_eq!(session.state(), ConnectionState::Connecting);
    h.controller.next_attempt().await.unwrap().reject(WsError::ConnectionFailed("refused".into()));
    settle().await;
    assert_eq!(session.attempts(), 2);
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(2)]);

    h.scheduler.advance(Duration::from_secs(2));
    let _peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Open);
    assert_eq!(session.attempts(), 0);
    assert_eq!(h.controller.attempt_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
/// 并发获取同一个新标识只会产生一个会话、一次握手。
async fn test_concurrent_acquire_opens_exactly_one_transport() {
    let mut h = harness();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = h.registry.clone();
            tokio::spawn(async move {
                let handle = registry
                    .acquire("service-screen:lobby-1", SessionConfig::new(SCREEN_URL))
                    .expect("获取连接失败");
                handle.connect();
                handle
            })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    let _attempt = h.controller.next_attempt().await.expect("应当有一次握手");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.controller.try_next_attempt().is_none(), "不应出现第二次握手");
    assert_eq!(h.controller.attempt_count(), 1);
    assert_eq!(h.registry.session_count(), 1);
    assert_eq!(h.registry.ref_count("service-screen:lobby-1"), 8);
    assert!(handles.iter().all(|handle| handle.same_session(&handles[0])));
}

#[tokio::test]
/// ping 在 T 发出、pong 在 T+Δ 到达：延迟恰好记录为 Δ 一次，重复的 pong 被忽略。
async fn test_latency_recorded_exactly_once() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    let events = EventLog::attach(&session);
    session.connect();
    let mut peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;

    h.scheduler.advance(Duration::from_secs(30));
    let frame = peer.next_sent().await.expect("心跳应当发出 ping");
    let ping = TypedMessage::decode_frame(&frame).unwrap();
    assert!(ping.is_type(PING_MESSAGE_TYPE));
    let id: String = ping.data["id"].as_str().unwrap().to_string();
    assert_eq!(session.outstanding_pings(), 1);

    h.scheduler.advance(Duration::from_millis(250));
    let pong = TypedMessage::new(PONG_MESSAGE_TYPE, &PongPayload { id }).unwrap();
    assert!(peer.send_message(&pong));
    assert!(peer.send_message(&pong));
    settle().await;

    assert_eq!(session.latency(), Some(Duration::from_millis(250)));
    assert_eq!(events.latencies(), vec![Duration::from_millis(250)]);
    assert_eq!(session.outstanding_pings(), 0);
    // 只剩下一次心跳定时器，pong 超时已取消
    assert_eq!(h.scheduler.pending_count(), 1);
    assert_eq!(session.state(), ConnectionState::Open);
}

#[tokio::test]
/// 在窗口内没有 pong：视为断开并进入重连。
async fn test_pong_timeout_triggers_reconnect() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    let events = EventLog::attach(&session);
    session.connect();
    let mut peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;

    h.scheduler.advance(Duration::from_secs(30));
    assert!(peer.next_sent().await.is_some());
    h.scheduler.advance(Duration::from_secs(10));

    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert_eq!(events.count("disconnected"), 1);
    assert!(peer.client_closed(), "断开时应当关闭旧的出站通道");
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
/// 释放一个订阅后它不再收到消息，其他订阅者照常接收，会话保持打开。
async fn test_disposed_subscription_receives_nothing_more() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    session.connect();
    let peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;

    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));
    let (a, b) = (Arc::clone(&seen_a), Arc::clone(&seen_b));
    let sub_a = session.on_message("service-update", move |m| a.lock().unwrap().push(m.data.clone()));
    let _sub_b = session.on_message("service-update", move |m| b.lock().unwrap().push(m.data.clone()));

    peer.send_message(&TypedMessage::new("service-update", &json!({"seq": 1})).unwrap());
    settle().await;
    sub_a.dispose();
    peer.send_message(&TypedMessage::new("service-update", &json!({"seq": 2})).unwrap());
    settle().await;

    assert_eq!(*seen_a.lock().unwrap(), vec![json!({"seq": 1})]);
    assert_eq!(*seen_b.lock().unwrap(), vec![json!({"seq": 1}), json!({"seq": 2})]);
    assert_eq!(session.state(), ConnectionState::Open);
}

#[tokio::test]
/// 格式错误的帧与 panic 的订阅者都不会影响会话。
async fn test_malformed_frames_and_panicking_handlers_are_contained() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    session.connect();
    let peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _boom = session.on_message("service-update", |_m| panic!("订阅者内部错误"));
    let _ok = session.on_message("service-update", move |m| sink.lock().unwrap().push(m.data.clone()));

    peer.send_frame(r#"{"type": "service-update", "data": "#);
    peer.send_message(&TypedMessage::new("unknown-type", &1).unwrap());
    peer.send_message(&TypedMessage::new("service-update", &json!({"seq": 7})).unwrap());
    settle().await;

    assert_eq!(*seen.lock().unwrap(), vec![json!({"seq": 7})]);
    assert_eq!(session.state(), ConnectionState::Open);
}

#[tokio::test]
/// 在 Connecting 期间断开：迟到的握手成功被丢弃，不发布 connected，也不启动心跳。
async fn test_disconnect_during_connecting_suppresses_late_success() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    let events = EventLog::attach(&session);
    session.connect();
    let attempt = h.controller.next_attempt().await.unwrap();

    session.disconnect();
    let events_after_disconnect = events.len();
    let mut peer = attempt.accept();
    settle().await;

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(events.count("connected"), 0);
    assert_eq!(events.len(), events_after_disconnect, "断开后不应再发布事件");
    assert_eq!(h.scheduler.pending_count(), 0, "不应有任何定时器");
    assert!(peer.client_closed());
}

#[tokio::test]
/// Idle → Connecting → Open → 出错 → Reconnecting(基础延迟) → 重试耗尽 → Failed，且不再有定时器。
async fn test_reconnect_until_failed() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    let events = EventLog::attach(&session);
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _states_sub = session.on_state_change(move |s| sink.lock().unwrap().push(s));

    session.connect();
    let mut peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Open);

    peer.fail(WsError::ConnectionFailed("connection reset".into()));
    settle().await;
    assert_eq!(session.state(), ConnectionState::Reconnecting);
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_secs(1)]);

    for delay in [1u64, 2, 4] {
        h.scheduler.advance(Duration::from_secs(delay));
        h.controller.next_attempt().await.unwrap().reject(WsError::ConnectionFailed("refused".into()));
        settle().await;
    }

    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(h.scheduler.pending_count(), 0);
    assert_eq!(events.count("connected"), 1);
    assert_eq!(events.count("disconnected"), 1);
    assert_eq!(events.fatal_errors(), 1);
    assert_eq!(h.controller.attempt_count(), 4);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Failed,
        ]
    );

    // disconnected 先于下一次 connecting 发布
    let names = events.names();
    let disconnected = names.iter().position(|n| *n == "disconnected").unwrap();
    let next_connecting = names.iter().rposition(|n| *n == "connecting").unwrap();
    assert!(disconnected < next_connecting);

    // 不会自动恢复；手动 connect() 以新的计数重新开始
    h.scheduler.advance(Duration::from_secs(60));
    assert!(h.controller.try_next_attempt().is_none());
    session.connect();
    assert_eq!(session.state(), ConnectionState::Connecting);
    assert_eq!(session.attempts(), 0);
    let _peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Open);
}

#[tokio::test]
/// 晚到的状态订阅者立即得到当前状态，之后只收到新的变化。
async fn test_late_state_subscriber_gets_current_state_only() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    session.connect();
    let _peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _sub = session.on_state_change(move |s| sink.lock().unwrap().push(s));
    session.disconnect();

    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Open, ConnectionState::Closing, ConnectionState::Closed]
    );
}

#[tokio::test]
async fn test_send_reaches_peer_only_while_open() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    assert!(matches!(session.send_typed("hello", &1), Err(WsError::NotConnected)));

    session.connect();
    let mut peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;
    session.send_typed("hello", &json!({"from": "panel"})).unwrap();
    let frame = peer.next_sent().await.unwrap();
    let message = TypedMessage::decode_frame(&frame).unwrap();
    assert!(message.is_type("hello"));
    assert_eq!(message.data, json!({"from": "panel"}));
}

#[tokio::test]
/// 重试耗尽后重新获取得到新会话；旧句柄上的 connect() 不会为同一标识再打开一条连接。
async fn test_stale_handle_cannot_open_second_transport() {
    let mut h = harness();
    let old = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    old.connect();
    h.controller.next_attempt().await.unwrap().reject(WsError::ConnectionFailed("refused".into()));
    settle().await;
    for delay in [1u64, 2, 4] {
        h.scheduler.advance(Duration::from_secs(delay));
        h.controller.next_attempt().await.unwrap().reject(WsError::ConnectionFailed("refused".into()));
        settle().await;
    }
    assert_eq!(old.state(), ConnectionState::Failed);

    let fresh = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    assert!(!fresh.same_session(&old));
    fresh.connect();
    let _peer = h.controller.next_attempt().await.unwrap().accept();
    settle().await;
    assert_eq!(fresh.state(), ConnectionState::Open);

    old.connect();
    settle().await;
    assert_eq!(old.state(), ConnectionState::Failed);
    assert!(h.controller.try_next_attempt().is_none());
    assert_eq!(h.controller.attempt_count(), 5);
    assert_eq!(h.registry.session_count(), 1);
}

#[tokio::test]
/// 握手成功后立即到达的帧：connected 一定先于第一条 message 发布。
async fn test_connected_precedes_first_message() {
    let mut h = harness();
    let session = h.registry.acquire("alive", SessionConfig::new(ALIVE_URL)).unwrap();
    let events = EventLog::attach(&session);
    session.connect();

    let peer = h.controller.next_attempt().await.unwrap().accept();
    peer.send_frame(r#"{"type":"service-update","data":{"seq":1}}"#);
    peer.send_frame("plain console line");
    settle().await;

    let names = events.all_names();
    let connected = names.iter().position(|n| *n == "connected").expect("应当发布 connected");
    let first_message = names.iter().position(|n| *n == "message").expect("应当发布 message");
    assert!(connected < first_message, "事件顺序: {:?}", names);
    assert_eq!(events.count("message"), 2);
}
