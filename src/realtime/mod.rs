//! Realtime WebSocket server.
//!
//! Protocol: the first client frame must be `{"type":"auth","token":...}`
//! within [`AUTH_TIMEOUT`]; anything else closes the connection. After
//! authentication the client may join and leave workspace rooms, and
//! receives feed events for every room it is in. Delivery is best-effort,
//! at-most-once; there is no replay for missed events.

pub mod rooms;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::identity;
use crate::storage::UserRow;
use crate::AppContext;
use rooms::next_conn_id;

/// How long an unauthenticated connection may hold a socket open.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user_id: i64,
    },
    JoinedWorkspace {
        workspace_id: i64,
    },
    LeftWorkspace {
        workspace_id: i64,
    },
    NewMessage {
        workspace_id: i64,
        message: serde_json::Value,
    },
    NewFile {
        workspace_id: i64,
        file: serde_json::Value,
    },
    NewActivity {
        workspace_id: i64,
        activity: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_owned()
        })
    }
}

/// Frames clients send to the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Auth { token: String },
    JoinWorkspace { workspace_id: i64 },
    LeaveWorkspace { workspace_id: i64 },
}

/// Accept loop. Runs until the listener errors or the task is aborted.
pub async fn run(ctx: Arc<AppContext>, listener: TcpListener) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "realtime server listening");
    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(ctx, stream, addr).await {
                tracing::debug!(%addr, error = %err, "realtime connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    ctx: Arc<AppContext>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    let user = match authenticate_first_frame(&ctx, &mut ws).await {
        Ok(user) => user,
        Err(reason) => {
            let event = ServerEvent::Error {
                message: reason.to_owned(),
            };
            let _ = ws.send(Message::Text(event.to_frame())).await;
            let _ = ws.close(None).await;
            return Ok(());
        }
    };

    let conn_id = next_conn_id();
    tracing::debug!(%addr, conn_id, user_id = user.id, "realtime client authenticated");
    ws.send(Message::Text(
        ServerEvent::Authenticated { user_id: user.id }.to_frame(),
    ))
    .await?;

    let (tx, rx) = unbounded_channel::<String>();
    let result = connection_loop(&ctx, &mut ws, &user, conn_id, tx, rx).await;
    ctx.rooms.remove_connection(conn_id);
    tracing::debug!(conn_id, "realtime client disconnected");
    result
}

/// Wait for the auth frame, enforcing [`AUTH_TIMEOUT`].
async fn authenticate_first_frame(
    ctx: &AppContext,
    ws: &mut WebSocketStream<TcpStream>,
) -> std::result::Result<UserRow, &'static str> {
    let frame = tokio::time::timeout(AUTH_TIMEOUT, ws.next())
        .await
        .map_err(|_| "authentication timed out")?
        .ok_or("connection closed before authentication")?
        .map_err(|_| "websocket error before authentication")?;
    let text = match frame {
        Message::Text(text) => text,
        _ => return Err("first frame must be an auth text frame"),
    };
    let ClientFrame::Auth { token } =
        serde_json::from_str(&text).map_err(|_| "first frame must be an auth frame")?
    else {
        return Err("first frame must be an auth frame");
    };
    identity::authenticate(&ctx.storage, &token)
        .await
        .map_err(|_| "invalid token")
}

async fn connection_loop(
    ctx: &AppContext,
    ws: &mut WebSocketStream<TcpStream>,
    user: &UserRow,
    conn_id: u64,
    tx: tokio::sync::mpsc::UnboundedSender<String>,
    mut rx: UnboundedReceiver<String>,
) -> Result<()> {
    loop {
        tokio::select! {
            incoming = ws.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => return Err(err.into()),
                    None => return Ok(()),
                };
                match msg {
                    Message::Text(text) => {
                        let reply = handle_frame(ctx, user, conn_id, &tx, &text).await;
                        ws.send(Message::Text(reply.to_frame())).await?;
                    }
                    Message::Ping(payload) => {
                        ws.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => ws.send(Message::Text(frame)).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}

async fn handle_frame(
    ctx: &AppContext,
    user: &UserRow,
    conn_id: u64,
    tx: &tokio::sync::mpsc::UnboundedSender<String>,
    text: &str,
) -> ServerEvent {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            return ServerEvent::Error {
                message: "unrecognized frame".to_owned(),
            }
        }
    };
    match frame {
        ClientFrame::Auth { .. } => ServerEvent::Error {
            message: "already authenticated".to_owned(),
        },
        ClientFrame::JoinWorkspace { workspace_id } => {
            match ctx.storage.get_membership(workspace_id, user.id).await {
                Ok(Some(_)) => {
                    ctx.rooms.join(workspace_id, conn_id, tx.clone());
                    ServerEvent::JoinedWorkspace { workspace_id }
                }
                Ok(None) => ServerEvent::Error {
                    message: format!("not a member of workspace {workspace_id}"),
                },
                Err(err) => {
                    tracing::error!(error = %err, "membership lookup failed");
                    ServerEvent::Error {
                        message: "internal error".to_owned(),
                    }
                }
            }
        }
        ClientFrame::LeaveWorkspace { workspace_id } => {
            ctx.rooms.leave(workspace_id, conn_id);
            ServerEvent::LeftWorkspace { workspace_id }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_events_serialize_with_snake_case_type_tag() {
        let event = ServerEvent::JoinedWorkspace { workspace_id: 4 };
        let value: serde_json::Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(value["type"], "joined_workspace");
        assert_eq!(value["workspace_id"], 4);
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"auth","token":"abc"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Auth { ref token } if token == "abc"));
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"join_workspace","workspace_id":9}"#).unwrap();
        assert!(matches!(frame, ClientFrame::JoinWorkspace { workspace_id: 9 }));
    }
}
