use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lily_bridge::platform::{PlatformClient, PlatformEvent};
use lily_common::{AudioFrame, PlatformError};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{serve, PlatformGateway};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Fixture {
    gateway: PlatformGateway,
    events: mpsc::Receiver<PlatformEvent>,
    url: String,
    cancel: CancellationToken,
}

impl Fixture {
    async fn start(ack_timeout: Duration) -> Self {
        let (gateway, events) = PlatformGateway::new(ack_timeout, 16);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(gateway.clone(), listener, cancel.clone()));
        Self {
            gateway,
            events,
            url,
            cancel,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(&self.url).await.unwrap();
        client
    }

    /// Connect and wait until the gateway has adopted the client.
    async fn connect_current(&self) -> Client {
        let client = self.connect().await;
        wait_for(|| self.gateway.is_connected()).await;
        client
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a command")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Drive a join through the client, acknowledging it.
async fn joined(
    fixture: &Fixture,
    client: &mut Client,
) -> lily_bridge::platform::VoiceConnection {
    let gateway = fixture.gateway.clone();
    let join = tokio::spawn(async move { gateway.join_voice("g1", "v1").await });
    let command = next_json(client).await;
    assert_eq!(command["type"], "join_voice");
    assert_eq!(command["guild_id"], "g1");
    assert_eq!(command["channel_id"], "v1");
    send_json(
        client,
        json!({"type": "voice_ready", "request_id": command["request_id"]}),
    )
    .await;
    join.await.unwrap().unwrap()
}

#[tokio::test]
async fn text_messages_become_platform_events() {
    let mut fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    send_json(
        &mut client,
        json!({
            "type": "text_message",
            "guild_id": "g1",
            "channel_id": "c1",
            "user_id": "u1",
            "username": "ann",
            "content": "hey lily"
        }),
    )
    .await;

    let event = tokio::time::timeout(Duration::from_secs(2), fixture.events.recv())
        .await
        .unwrap()
        .unwrap();
    let PlatformEvent::TextMessage(msg) = event else {
        panic!("expected a text message, got {event:?}");
    };
    assert_eq!(msg.user_id, "u1");
    assert_eq!(msg.content, "hey lily");
}

#[tokio::test]
async fn voice_requests_become_platform_events() {
    let mut fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    send_json(
        &mut client,
        json!({"type": "voice_join_request", "guild_id": "g1", "channel_id": "v1", "user_id": "u1"}),
    )
    .await;
    send_json(
        &mut client,
        json!({"type": "voice_leave_request", "guild_id": "g1", "user_id": "u1", "reply_channel_id": "c1"}),
    )
    .await;

    let first = fixture.events.recv().await.unwrap();
    assert!(matches!(first, PlatformEvent::VoiceJoinRequest(ref r) if r.channel_id == "v1"));
    let second = fixture.events.recv().await.unwrap();
    assert!(matches!(
        second,
        PlatformEvent::VoiceLeaveRequest(ref r) if r.reply_channel_id.as_deref() == Some("c1")
    ));
}

#[tokio::test]
async fn music_commands_become_platform_events() {
    let mut fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    send_json(
        &mut client,
        json!({
            "type": "music_command",
            "action": "play",
            "query": "https://youtu.be/dQw4w9WgXcQ",
            "guild_id": "g1",
            "voice_channel_id": "v1",
            "user_id": "u1",
            "reply_channel_id": "c1",
        }),
    )
    .await;

    let event = fixture.events.recv().await.unwrap();
    let PlatformEvent::Music(req) = event else {
        panic!("expected a music request, got {event:?}");
    };
    assert_eq!(req.guild_id, "g1");
    assert_eq!(req.reply_channel_id, "c1");
}

#[tokio::test]
async fn garbage_does_not_drop_the_client() {
    let mut fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    send_json(&mut client, json!({"type": "typing", "channel_id": "c1"})).await;
    send_json(
        &mut client,
        json!({"type": "text_message", "channel_id": "dm", "user_id": "u1", "content": "hi"}),
    )
    .await;

    let event = fixture.events.recv().await.unwrap();
    assert_eq!(event.guild_id(), "@me");
    assert!(fixture.gateway.is_connected());
}

#[tokio::test]
async fn send_text_without_client_fails() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let err = fixture.gateway.send_text("c1", "hello").await.unwrap_err();
    assert_eq!(err, PlatformError::NotConnected);
}

#[tokio::test]
async fn send_text_reaches_client() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    fixture
        .gateway
        .send_text("c1", "**Lily:** hello")
        .await
        .unwrap();

    let command = next_json(&mut client).await;
    assert_eq!(
        command,
        json!({"type": "send_text", "channel_id": "c1", "text": "**Lily:** hello"})
    );
}

#[tokio::test]
async fn join_voice_streams_audio_both_ways() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;
    let mut voice = joined(&fixture, &mut client).await;

    // "AQI=" is [1, 2], "Aw==" is [3]
    send_json(&mut client, json!({"type": "voice_frame", "guild_id": "g1", "data": "AQI="})).await;
    send_json(&mut client, json!({"type": "voice_frame", "guild_id": "g1", "data": "Aw=="})).await;
    let first = voice.capture.recv().await.unwrap();
    let second = voice.capture.recv().await.unwrap();
    assert_eq!((first.seq, first.data), (0, vec![1, 2]));
    assert_eq!((second.seq, second.data), (1, vec![3]));

    voice
        .playback
        .send(AudioFrame::new(9, vec![1, 2, 3]))
        .await
        .unwrap();
    let command = next_json(&mut client).await;
    assert_eq!(
        command,
        json!({"type": "play_frame", "guild_id": "g1", "seq": 9, "data": "AQID"})
    );
}

#[tokio::test]
async fn refused_join_is_rejected() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;

    let gateway = fixture.gateway.clone();
    let join = tokio::spawn(async move { gateway.join_voice("g1", "v1").await });
    let command = next_json(&mut client).await;
    send_json(
        &mut client,
        json!({
            "type": "voice_failed",
            "request_id": command["request_id"],
            "message": "missing permissions"
        }),
    )
    .await;

    let err = join.await.unwrap().unwrap_err();
    assert_eq!(err, PlatformError::Rejected("missing permissions".into()));

    // No stream is left behind for the guild.
    assert!(fixture.gateway.state().voice.is_empty());
}

#[tokio::test]
async fn unanswered_join_times_out() {
    let fixture = Fixture::start(Duration::from_millis(200)).await;
    let mut client = fixture.connect_current().await;

    let err = fixture.gateway.join_voice("g1", "v1").await.unwrap_err();
    assert_eq!(err, PlatformError::Timeout("voice join".into()));
    assert_eq!(next_json(&mut client).await["type"], "join_voice");

    let state = fixture.gateway.state();
    assert!(state.pending.is_empty());
    assert!(state.voice.is_empty());
}

#[tokio::test]
async fn join_without_client_fails_fast() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let err = fixture.gateway.join_voice("g1", "v1").await.unwrap_err();
    assert_eq!(err, PlatformError::NotConnected);
}

#[tokio::test]
async fn voice_closed_ends_capture() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;
    let mut voice = joined(&fixture, &mut client).await;

    send_json(&mut client, json!({"type": "voice_closed", "guild_id": "g1"})).await;

    let end = tokio::time::timeout(Duration::from_secs(2), voice.capture.recv())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn client_disconnect_ends_capture() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;
    let mut voice = joined(&fixture, &mut client).await;

    client.close(None).await.unwrap();

    let end = tokio::time::timeout(Duration::from_secs(2), voice.capture.recv())
        .await
        .unwrap();
    assert!(end.is_none());
    wait_for(|| !fixture.gateway.is_connected()).await;
}

#[tokio::test]
async fn leave_voice_waits_for_ack() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut client = fixture.connect_current().await;
    let mut voice = joined(&fixture, &mut client).await;

    let gateway = fixture.gateway.clone();
    let leave = tokio::spawn(async move { gateway.leave_voice("g1").await });
    let command = next_json(&mut client).await;
    assert_eq!(command["type"], "leave_voice");
    send_json(
        &mut client,
        json!({"type": "leave_ack", "request_id": command["request_id"]}),
    )
    .await;

    leave.await.unwrap().unwrap();
    assert!(voice.capture.recv().await.is_none());
}

#[tokio::test]
async fn new_client_replaces_old() {
    let fixture = Fixture::start(Duration::from_secs(2)).await;
    let mut old = fixture.connect_current().await;
    let mut voice = joined(&fixture, &mut old).await;

    let mut new = fixture.connect().await;

    // The old connection is closed by the gateway.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match old.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(voice.capture.recv().await.is_none());

    fixture.gateway.send_text("c1", "still here").await.unwrap();
    let command = next_json(&mut new).await;
    assert_eq!(command["text"], "still here");
}
