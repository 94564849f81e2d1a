//! End-to-end tests over a real socket.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_server::{serve, AppState, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = Config::default();
        config.metrics.enabled = false;
        config.shutdown.grace_ms = 2_000;
        let state = Arc::new(AppState::new(config));

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, state.clone(), async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            state,
            stop: Some(stop),
            task,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        client
    }

    async fn register(&self, identity: &str) -> Client {
        let mut client = self.connect().await;
        send(&mut client, json!({"type": "register", "username": identity})).await;
        let ack = next(&mut client).await;
        assert_eq!(ack["type"], "registered");
        assert_eq!(ack["username"], identity);
        let update = next(&mut client).await;
        assert_eq!(update["type"], "presence_update");
        assert_eq!(update["changed"]["username"], identity);
        client
    }

    async fn request(&self, method: &str, path: &str, headers: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\n{headers}Connection: close\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn get(&self, path: &str) -> Value {
        let response = self.request("GET", path, "").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next JSON frame, skipping control frames.
async fn next(client: &mut Client) -> Value {
    try_next(client).await.expect("connection closed")
}

async fn try_next(client: &mut Client) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame");
        match message {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_register_route_and_acknowledge() {
    let server = TestServer::start().await;
    let mut alice = server.register("alice").await;
    let mut bob = server.register("bob").await;

    let update = next(&mut alice).await;
    assert_eq!(update["changed"]["username"], "bob");
    assert_eq!(update["changed"]["status"], "online");
    assert_eq!(update["users"], json!(["alice", "bob"]));

    send(
        &mut alice,
        json!({
            "event": "chat.message",
            "channel": "chat.user.bob",
            "data": {"user": "alice", "messageId": "m-1", "text": "hello"}
        }),
    )
    .await;

    let forwarded = next(&mut bob).await;
    assert_eq!(forwarded["type"], "message");
    assert_eq!(forwarded["event"], "chat.message");
    assert_eq!(forwarded["data"]["text"], "hello");

    let status = next(&mut alice).await;
    assert_eq!(
        status,
        json!({"type": "delivery_status", "to": "bob", "delivered": true, "message_id": "m-1"})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_announces_offline_and_fails_delivery() {
    let server = TestServer::start().await;
    let mut alice = server.register("alice").await;
    let mut bob = server.register("bob").await;
    next(&mut alice).await;

    bob.close(None).await.unwrap();

    let update = next(&mut alice).await;
    assert_eq!(update["changed"]["username"], "bob");
    assert_eq!(update["changed"]["status"], "offline");
    assert_eq!(update["users"], json!(["alice"]));

    send(
        &mut alice,
        json!({"event": "chat.message", "channel": "chat.user.bob", "data": {"user": "alice"}}),
    )
    .await;
    let status = next(&mut alice).await;
    assert_eq!(status["type"], "delivery_status");
    assert_eq!(status["delivered"], false);

    server.stop().await;
}

#[tokio::test]
async fn test_online_query_and_bad_frames() {
    let server = TestServer::start().await;
    let mut alice = server.register("alice").await;

    alice.send(Message::Text("{not json".to_string())).await.unwrap();
    send(&mut alice, json!({"type": "subscribe", "channel": "x"})).await;
    send(&mut alice, json!({"event": "e", "channel": "nowhere", "data": {}})).await;
    send(&mut alice, json!({"type": "is_online_request", "username": "alice"})).await;

    assert_eq!(
        next(&mut alice).await,
        json!({"type": "is_online_response", "username": "alice", "online": true})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_http_views() {
    let server = TestServer::start().await;
    let _alice = server.register("alice").await;

    let health = server.get("/health").await;
    assert_eq!(health["ok"], true);

    let users = server.get("/online-users").await;
    assert_eq!(users["success"], true);
    assert_eq!(users["users"][0]["username"], "alice");
    assert_eq!(users["users"][0]["online"], true);

    let check = server.get("/online-users/check?usernames=alice,bob").await;
    assert_eq!(check["statuses"], json!({"alice": true, "bob": false}));

    let empty = server.get("/online-users/check").await;
    assert_eq!(empty["statuses"], json!({}));

    server.stop().await;
}

#[tokio::test]
async fn test_http_views_allow_any_origin() {
    let server = TestServer::start().await;

    let response = server
        .request("GET", "/online-users", "Origin: https://site.example\r\n")
        .await
        .to_lowercase();
    assert!(response.starts_with("http/1.1 200"), "{response}");
    assert!(response.contains("access-control-allow-origin: *"), "{response}");

    let preflight = server
        .request(
            "OPTIONS",
            "/online-users/check",
            "Origin: https://site.example\r\nAccess-Control-Request-Method: GET\r\n",
        )
        .await
        .to_lowercase();
    assert!(preflight.starts_with("http/1.1 200"), "{preflight}");
    assert!(preflight.contains("access-control-allow-origin: *"), "{preflight}");
    assert!(preflight.contains("access-control-allow-methods: *"), "{preflight}");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let server = TestServer::start().await;
    let mut alice = server.register("alice").await;
    let mut anonymous = server.connect().await;
    let state = server.state.clone();
    while state.hub.connections().len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    server.stop().await;

    assert_eq!(try_next(&mut alice).await, None);
    assert_eq!(try_next(&mut anonymous).await, None);
    assert!(state.hub.connections().is_empty());
    assert!(state.hub.online().is_empty());
}
