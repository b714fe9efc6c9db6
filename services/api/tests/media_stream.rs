use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use callbridge_api::{
    config::{AgentConfig, BridgeMode, Config, TwilioConfig},
    router::create_router,
    state::AppState,
};
use callbridge_core::{
    agent_bridge::{AgentBridge, AgentReply},
    composer::VoiceSettings,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::Level;
use url::Url;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct RecordingBridge {
    calls: AtomicUsize,
}

#[async_trait]
impl AgentBridge for RecordingBridge {
    async fn send(&self, transcript: &str, session_id: &str) -> AgentReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AgentReply::new(format!("[{session_id}] heard: {transcript}"))
    }
}

/// Stalls past any test timeout; records when the call starts and whether it was dropped unfinished.
#[derive(Default)]
struct StalledBridge {
    started: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentBridge for StalledBridge {
    async fn send(&self, _transcript: &str, _session_id: &str) -> AgentReply {
        let flag = CancelFlag(Arc::clone(&self.cancelled));
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        std::mem::forget(flag);
        AgentReply::new("too late")
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: Level::INFO,
        twilio: TwilioConfig {
            account_sid: "AC123".into(),
            auth_token: "token".into(),
            phone_number: "+15550001111".into(),
            webhook_base_url: Url::parse("http://127.0.0.1").unwrap(),
        },
        agent: AgentConfig {
            mode: BridgeMode::Echo,
            api_url: "http://localhost:3000".into(),
            agent_id: "First Help Agent".into(),
            timeout: Duration::from_secs(2),
        },
        voice: VoiceSettings::default(),
        validate_webhooks: false,
        verify_account: false,
        media_flush_chunks: 10,
    }
}

async fn spawn_server(bridge: Arc<dyn AgentBridge>) -> SocketAddr {
    let app = create_router(Arc::new(AppState::new(test_config(), bridge)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/twilio/media")).await.unwrap();
    client
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

async fn next_event(client: &mut Client) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for relay")
        .unwrap()
        .unwrap();
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

fn start_event() -> Value {
    json!({
        "event": "start",
        "streamSid": "MZ1",
        "start": {
            "callSid": "CA1",
            "streamSid": "MZ1",
            "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
        }
    })
}

#[tokio::test]
async fn test_full_media_stream_conversation() {
    let bridge = Arc::new(RecordingBridge::default());
    let addr = spawn_server(bridge.clone()).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({ "event": "connected", "protocol": "Call" })).await;
    send(&mut client, start_event()).await;
    let configure = next_event(&mut client).await;
    assert_eq!(configure["event"], "configure");
    assert_eq!(configure["streamSid"], "MZ1");
    assert_eq!(configure["configure"]["options"]["model"], "phone_call");

    for i in 0..10u8 {
        send(
            &mut client,
            json!({ "event": "media", "media": { "payload": STANDARD.encode([i; 4]) } }),
        )
        .await;
    }
    let media = next_event(&mut client).await;
    assert_eq!(media["event"], "media");
    let batch = STANDARD
        .decode(media["media"]["payload"].as_str().unwrap())
        .unwrap();
    assert_eq!(batch.len(), 40);
    assert_eq!(&batch[..4], &[0, 0, 0, 0]);
    assert_eq!(&batch[36..], &[9, 9, 9, 9]);

    send(&mut client, json!({ "event": "speech", "speech": { "type": "hypothesis", "alternatives": [{ "transcript": "I fell", "confidence": 0.3 }] } })).await;
    send(&mut client, json!({ "event": "speech", "speech": { "type": "recognition", "alternatives": [{ "transcript": "I fell down", "confidence": 0.9 }] } })).await;
    let mark = next_event(&mut client).await;
    assert_eq!(
        mark,
        json!({ "event": "mark", "streamSid": "MZ1", "mark": { "name": "response", "value": "[CA1] heard: I fell down" } })
    );
    assert_eq!(bridge.calls.load(Ordering::SeqCst), 1);

    send(&mut client, json!({ "event": "stop", "stop": { "callSid": "CA1" } })).await;
    send(&mut client, json!({ "event": "stop", "stop": { "callSid": "CA1" } })).await;
    client.close(None).await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_does_not_drop_connection() {
    let bridge = Arc::new(RecordingBridge::default());
    let addr = spawn_server(bridge).await;
    let mut client = connect(addr).await;

    client.send(Message::text("this is not json")).await.unwrap();
    send(&mut client, start_event()).await;

    let configure = next_event(&mut client).await;
    assert_eq!(configure["event"], "configure");
}

async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..100 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_transport_close_cancels_agent_call_in_flight() {
    let bridge = Arc::new(StalledBridge::default());
    let addr = spawn_server(bridge.clone()).await;
    let mut client = connect(addr).await;

    send(&mut client, start_event()).await;
    assert_eq!(next_event(&mut client).await["event"], "configure");

    for i in 0..3u8 {
        send(
            &mut client,
            json!({ "event": "media", "media": { "payload": STANDARD.encode([i; 4]) } }),
        )
        .await;
    }
    send(&mut client, json!({ "event": "speech", "speech": { "type": "recognition", "alternatives": [{ "transcript": "I need help", "confidence": 0.9 }] } })).await;
    assert!(wait_for(&bridge.started).await, "agent call never started");

    client.close(None).await.unwrap();
    drop(client);

    assert!(
        wait_for(&bridge.cancelled).await,
        "agent call kept running after the transport closed"
    );
}
