//! WebSocket transport tests against a local tokio-tungstenite server.

use futures::{SinkExt, StreamExt};
use interactive_rpc::wire::{self, Frame, Method};
use interactive_rpc::{ConnectionState, Socket, SocketError, SocketOptions, WebSocketConnector};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Headers and URI seen by the server during the handshake.
#[derive(Debug)]
struct Handshake {
    uri: String,
    authorization: Option<String>,
    protocol_version: Option<String>,
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Accept one connection, answer `hello` with `"hi"` and push one method to
/// the client.
async fn start_server() -> (SocketAddr, oneshot::Receiver<Handshake>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback =
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let _ = handshake_tx.send(Handshake {
                    uri: request.uri().to_string(),
                    authorization: header(request, "authorization"),
                    protocol_version: header(request, "x-protocol-version"),
                });
                Ok(response)
            };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        let push = Method::new("onReady", json!({"isReady": true}), true);
        ws.send(Message::Text(wire::encode(&push.into()).unwrap()))
            .await
            .unwrap();

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            if let Ok(Frame::Method(method)) = wire::decode(&text) {
                if method.method == "hello" {
                    let reply = wire::encode(&method.reply(json!("hi")).into()).unwrap();
                    ws.send(Message::Text(reply)).await.unwrap();
                }
            }
        }
    });

    (addr, handshake_rx)
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let (addr, handshake) = start_server().await;
    let options =
        SocketOptions::new(format!("ws://{}/gameClient", addr)).with_auth_token("secret");
    let (socket, mut inbound) = Socket::new(
        options,
        WebSocketConnector::new().with_connect_timeout(Duration::from_secs(5)),
    )
    .unwrap();

    socket.connect();
    assert!(socket.wait_for_state(ConnectionState::Connected).await);

    let handshake = handshake.await.unwrap();
    assert_eq!(handshake.uri, "/gameClient");
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer secret"));
    assert_eq!(handshake.protocol_version.as_deref(), Some("2.0"));

    let pushed = inbound.recv().await.unwrap();
    assert_eq!(pushed.method, "onReady");
    assert!(pushed.discard);

    let result = socket.execute("hello", json!({}), false).await.unwrap();
    assert_eq!(result, json!("hi"));
}

#[tokio::test]
async fn test_websocket_jwt_in_query() {
    let (addr, handshake) = start_server().await;
    let options = SocketOptions::new(format!("ws://{}/gameClient", addr)).with_jwt("tok");
    let (socket, _inbound) = Socket::new(options, WebSocketConnector::new()).unwrap();

    socket.connect();
    assert!(socket.wait_for_state(ConnectionState::Connected).await);

    let handshake = handshake.await.unwrap();
    assert_eq!(handshake.uri, "/gameClient?Authorization=JWT+tok");
    assert_eq!(handshake.authorization, None);
}

#[tokio::test]
async fn test_websocket_connection_refused() {
    // Reserve a port, then free it so nothing is listening.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let options =
        SocketOptions::new(format!("ws://{}/gameClient", addr)).with_auto_reconnect(false);
    let (socket, _inbound) = Socket::new(options, WebSocketConnector::new()).unwrap();
    let mut errors = socket.subscribe_errors();

    socket.connect();
    let error = errors.recv().await.unwrap();
    assert!(matches!(error, SocketError::Transport { .. }));
    assert!(socket.wait_for_state(ConnectionState::Idle).await);
}
