//! Server-to-client push channels over WebSocket.
//!
//! A channel is opened per `(node, player)` at `GET /ws?player_id=…`. The
//! socket is used uni-directionally: the server pushes JSON frames, the
//! read side is a drain loop that only watches for disconnection. Writes
//! are serialized through a per-connection lock with a 5 s deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cardmesh_core::matching::Match;

use crate::server::MatchServer;

const SEND_DEADLINE: Duration = Duration::from_secs(5);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Frames pushed to connected players. Client frames are ignored.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        player_id: String,
        server: String,
    },
    MatchStart {
        #[serde(rename = "match")]
        game: Match,
    },
}

/// A push frame could not be delivered.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Send(#[from] axum::Error),
    #[error("write deadline exceeded")]
    Timeout,
}

/// The send half of one player connection.
pub struct PushChannel {
    conn: u64,
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl PushChannel {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            conn: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            sink: Mutex::new(sink),
        }
    }

    /// Process-wide connection id, used to make deregistration precise.
    #[must_use]
    pub fn conn(&self) -> u64 {
        self.conn
    }

    /// Serialize and push one frame, bounded by the write deadline.
    pub async fn send_json(&self, frame: &ServerFrame) -> Result<(), PushError> {
        let text = serde_json::to_string(frame)?;
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text.into())).await
        };
        match tokio::time::timeout(SEND_DEADLINE, send).await {
            Ok(result) => result.map_err(PushError::from),
            Err(_) => Err(PushError::Timeout),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub player_id: String,
}

/// `GET /ws?player_id=…` upgrade endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(server): State<Arc<MatchServer>>,
) -> Response {
    if query.player_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "player_id required as query param").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, server, query.player_id))
}

async fn handle_socket(socket: WebSocket, server: Arc<MatchServer>, player: String) {
    let (sink, stream) = socket.split();
    let channel = Arc::new(PushChannel::new(sink));
    let conn = channel.conn();
    server.link_player(&player, Arc::clone(&channel));

    let welcome = ServerFrame::Welcome {
        player_id: player.clone(),
        server: server.addr().to_string(),
    };
    if let Err(err) = channel.send_json(&welcome).await {
        warn!(player, error = %err, "welcome push failed");
    }

    drain(stream, &player).await;
    server.unlink_player(&player, conn);
}

/// Discard inbound frames until the client goes away.
async fn drain(mut stream: SplitStream<WebSocket>, player: &str) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => {
                debug!(player, "push channel closed by client");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(player, error = %err, "push channel read error");
                return;
            }
        }
    }
}
