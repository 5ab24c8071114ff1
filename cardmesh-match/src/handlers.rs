//! Matchmaking HTTP surface.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use cardmesh_core::matching::{Card, HAND_SIZE, Match, PlayerInfo, WaitingPlayer};

use crate::push::{ServerFrame, ws_handler};
use crate::server::MatchServer;

/// `POST /play` body: a player commits a five-card hand.
#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// `POST /find-waiter` body: a peer's challenger looking for a waiter,
/// with the callback URL and the address their push channel lives on.
#[derive(Debug, Serialize, Deserialize)]
pub struct FindWaiterRequest {
    pub player_id: String,
    pub cards: Vec<Card>,
    pub callback: String,
    pub server: String,
}

#[derive(Debug, Deserialize)]
struct AddPeerRequest {
    peer: String,
}

/// Build the node's router. Each server owns its own router instance.
pub fn create_router(server: Arc<MatchServer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/play", post(play))
        .route("/find-waiter", post(find_waiter))
        .route("/start-remote-match", post(start_remote_match))
        .route("/peers", get(list_peers).post(add_peer))
        .layer(cors)
        .with_state(server)
}

/// Pairing pipeline: local queue, then peers in order, then enqueue.
async fn play(State(server): State<Arc<MatchServer>>, Json(request): Json<PlayRequest>) -> Response {
    if request.player_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "player_id required in request body").into_response();
    }
    if request.cards.len() != HAND_SIZE {
        return (StatusCode::BAD_REQUEST, "must send exactly 5 cards").into_response();
    }
    if server.is_waiting(&request.player_id) {
        return (StatusCode::CONFLICT, "player already queued for a match").into_response();
    }

    let challenger = WaitingPlayer {
        player_id: request.player_id.clone(),
        cards: request.cards.clone(),
    };

    if let Some(game) = server.try_local_match(challenger.clone()) {
        let frame = ServerFrame::MatchStart { game: game.clone() };
        server.notify_local(&game.host.id, &frame).await;
        server.notify_local(&game.guest.id, &frame).await;
        return Json(game).into_response();
    }

    let callback = format!("http://{}/start-remote-match", server.addr());
    let peers = server.list_peers();
    for peer in &peers {
        let body = FindWaiterRequest {
            player_id: request.player_id.clone(),
            cards: request.cards.clone(),
            callback: callback.clone(),
            server: server.addr().to_string(),
        };
        let url = format!("http://{peer}/find-waiter");
        let response = match server.client().post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer, error = %err, "error contacting peer");
                continue;
            }
        };
        if response.status() == StatusCode::NO_CONTENT {
            continue;
        }
        if !response.status().is_success() {
            warn!(peer = %peer, status = %response.status(), "find-waiter rejected");
            continue;
        }
        match response.json::<Match>().await {
            Ok(game) => {
                let frame = ServerFrame::MatchStart { game: game.clone() };
                server.notify_local(&request.player_id, &frame).await;
                return Json(game).into_response();
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "undecodable find-waiter reply");
                continue;
            }
        }
    }

    server.enqueue_waiter(challenger);
    let detail = if peers.is_empty() {
        "queued local; no peers configured"
    } else {
        "queued local; no peer match found"
    };
    (StatusCode::ACCEPTED, detail).into_response()
}

/// A peer's challenger asks for our queue head. The challenger's own
/// server address is recorded in their half of the match so both sides
/// stay locatable.
async fn find_waiter(
    State(server): State<Arc<MatchServer>>,
    Json(request): Json<FindWaiterRequest>,
) -> Response {
    let Some(waiter) = server.pop_waiter() else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let host = server.local_player(waiter);
    let guest = PlayerInfo {
        id: request.player_id,
        server: request.server,
        cards: request.cards,
    };
    let game = Match::resolve(host, guest);

    let frame = ServerFrame::MatchStart { game: game.clone() };
    let waiter_id = game.host.id.clone();
    let notifier = Arc::clone(&server);
    tokio::spawn(async move {
        notifier.notify_local(&waiter_id, &frame).await;
    });

    let client = server.client().clone();
    let callback = request.callback;
    let payload = game.clone();
    tokio::spawn(async move {
        if let Err(err) = client.post(&callback).json(&payload).send().await {
            warn!(callback = %callback, error = %err, "failed to deliver match to callback");
        }
    });

    Json(game).into_response()
}

/// Callback target: deliver `match_start` to whichever of the two players
/// is connected here.
async fn start_remote_match(
    State(server): State<Arc<MatchServer>>,
    Json(game): Json<Match>,
) -> StatusCode {
    let frame = ServerFrame::MatchStart { game: game.clone() };
    if game.host.server == server.addr() {
        server.notify_local(&game.host.id, &frame).await;
    }
    if game.guest.server == server.addr() {
        server.notify_local(&game.guest.id, &frame).await;
    }
    StatusCode::OK
}

async fn list_peers(State(server): State<Arc<MatchServer>>) -> Json<Vec<String>> {
    Json(server.list_peers())
}

async fn add_peer(
    State(server): State<Arc<MatchServer>>,
    Json(request): Json<AddPeerRequest>,
) -> StatusCode {
    server.add_peer(request.peer);
    StatusCode::CREATED
}
