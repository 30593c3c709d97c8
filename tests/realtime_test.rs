//! Realtime protocol: auth-first handshake, room membership, and feed
//! fan-out over a real WebSocket server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use collabd::chat::{self, PostMessageInput};
use collabd::identity;
use collabd::realtime;
use collabd::storage::UserRow;
use collabd::workspace;
use collabd::AppContext;
use common::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Bind the realtime server on an ephemeral port and return its URL.
async fn start_realtime(ctx: Arc<AppContext>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(realtime::run(ctx, listener));
    format!("ws://{addr}")
}

async fn connect(url: &str) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_event(ws: &mut WsClient) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap();
    match frame {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

async fn send(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Connect, authenticate, and join a workspace room.
async fn join_room(url: &str, ctx: &AppContext, user: &UserRow, workspace_id: i64) -> WsClient {
    let (_, token) = identity::issue_token(&ctx.storage, &user.email).await.unwrap();
    let mut ws = connect(url).await;
    send(&mut ws, json!({ "type": "auth", "token": token })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "authenticated");
    assert_eq!(event["user_id"], user.id);
    send(&mut ws, json!({ "type": "join_workspace", "workspace_id": workspace_id })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "joined_workspace");
    ws
}

#[tokio::test]
async fn invalid_tokens_are_rejected_at_the_door() {
    let ctx = test_ctx().await;
    let url = start_realtime(ctx.clone()).await;

    let mut ws = connect(&url).await;
    send(&mut ws, json!({ "type": "auth", "token": "bogus" })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");

    // Server closes after the rejection.
    let timeout = tokio::time::timeout(Duration::from_secs(5), ws.next()).await;
    match timeout {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn the_first_frame_must_be_auth() {
    let ctx = test_ctx().await;
    let url = start_realtime(ctx.clone()).await;

    let mut ws = connect(&url).await;
    send(&mut ws, json!({ "type": "join_workspace", "workspace_id": 1 })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
}

#[tokio::test]
async fn chat_messages_fan_out_to_the_room() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let bob = make_user(&ctx, "bob@example.com", "Bob").await;
    let ws_view = make_workspace(&ctx, &alice, "FYP", 10).await;
    let token = invite(&ctx, &alice, ws_view.id, "bob@example.com", "member").await;
    workspace::accept_invite(&ctx, &bob, &token).await.unwrap();

    let url = start_realtime(ctx.clone()).await;
    let mut alice_ws = join_room(&url, &ctx, &alice, ws_view.id).await;
    let mut bob_ws = join_room(&url, &ctx, &bob, ws_view.id).await;

    chat::post_message(
        &ctx,
        &alice,
        ws_view.id,
        PostMessageInput {
            body: "shipping tonight".to_string(),
            message_type: None,
        },
    )
    .await
    .unwrap();

    for client in [&mut alice_ws, &mut bob_ws] {
        let event = next_event(client).await;
        assert_eq!(event["type"], "new_message");
        assert_eq!(event["workspace_id"], ws_view.id);
        assert_eq!(event["message"]["body"], "shipping tonight");
        assert_eq!(event["message"]["author_name"], "Alice");
    }
}

#[tokio::test]
async fn non_members_cannot_join_a_room() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let mallory = make_user(&ctx, "mallory@example.com", "Mallory").await;
    let ws_view = make_workspace(&ctx, &alice, "FYP", 10).await;

    let url = start_realtime(ctx.clone()).await;
    let (_, token) = identity::issue_token(&ctx.storage, &mallory.email).await.unwrap();
    let mut ws = connect(&url).await;
    send(&mut ws, json!({ "type": "auth", "token": token })).await;
    next_event(&mut ws).await; // authenticated

    send(&mut ws, json!({ "type": "join_workspace", "workspace_id": ws_view.id })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(ctx.rooms.room_size(ws_view.id), 0);
}

#[tokio::test]
async fn leaving_a_room_stops_delivery() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws_view = make_workspace(&ctx, &alice, "FYP", 10).await;

    let url = start_realtime(ctx.clone()).await;
    let mut ws = join_room(&url, &ctx, &alice, ws_view.id).await;
    assert_eq!(ctx.rooms.room_size(ws_view.id), 1);

    send(&mut ws, json!({ "type": "leave_workspace", "workspace_id": ws_view.id })).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "left_workspace");
    assert_eq!(ctx.rooms.room_size(ws_view.id), 0);

    // A message posted now reaches nobody.
    chat::post_message(
        &ctx,
        &alice,
        ws_view.id,
        PostMessageInput {
            body: "anyone there?".to_string(),
            message_type: None,
        },
    )
    .await
    .unwrap();
    let silence = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(silence.is_err(), "expected no frame after leaving the room");
}

#[tokio::test]
async fn uploads_and_activity_reach_the_room() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws_view = make_workspace(&ctx, &alice, "FYP", 10).await;

    let url = start_realtime(ctx.clone()).await;
    let mut ws = join_room(&url, &ctx, &alice, ws_view.id).await;

    collabd::files::upload(&ctx, &alice, ws_view.id, "demo.png", Some("image/png"), "", b"png")
        .await
        .unwrap();

    // The activity record lands first, then the file event.
    let first = next_event(&mut ws).await;
    assert_eq!(first["type"], "new_activity");
    assert_eq!(first["activity"]["activity_type"], "file_uploaded");
    let second = next_event(&mut ws).await;
    assert_eq!(second["type"], "new_file");
    assert_eq!(second["file"]["original_filename"], "demo.png");
}

#[tokio::test]
async fn disconnect_prunes_room_membership() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws_view = make_workspace(&ctx, &alice, "FYP", 10).await;

    let url = start_realtime(ctx.clone()).await;
    let mut ws = join_room(&url, &ctx, &alice, ws_view.id).await;
    ws.close(None).await.unwrap();
    drop(ws);

    // The server notices the close and removes the connection.
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.rooms.room_size(ws_view.id) != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("room was not pruned after disconnect");
}
