//! HTTP surface of an inventory node.
//!
//! Reads are always answered from local state. Mutating routes sit behind
//! the [`leader_gate`] middleware: on the leader they fall through to their
//! handler, on a follower the request is proxied verbatim to the believed
//! leader and the response streamed back. Error bodies are plain text;
//! success bodies are JSON.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use cardmesh_core::deck::{Card, SnapshotPayload, TradeProposal};

use crate::node::{AcceptError, Node, REGEN_BATCH, ReplicateRequest, StatusReport};

/// Forwarded bodies are buffered in full; inventory payloads are tiny.
const BODY_LIMIT: usize = 1 << 20;

/// Request failures mapped onto the HTTP error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("trade not found")]
    TradeNotFound,
    #[error("only the counterparty can accept the trade")]
    Forbidden,
    #[error("no leader known")]
    NoLeader,
    #[error("leader unreachable: {0}")]
    LeaderUnreachable(String),
    #[error("no cards available")]
    NoCardsAvailable,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TradeNotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NoLeader | Self::LeaderUnreachable(_) | Self::NoCardsAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<AcceptError> for ApiError {
    fn from(err: AcceptError) -> Self {
        match err {
            AcceptError::NotFound => Self::TradeNotFound,
            AcceptError::Forbidden => Self::Forbidden,
        }
    }
}

/// Build the node's router. Every node owns its own router instance, so
/// several nodes can live in one process.
pub fn create_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Domain surface
        .route("/cards", get(get_cards).post(post_card))
        .route("/cards/{id}", delete(delete_card))
        .route("/users/{user}/cards", get(get_user_cards).post(post_user_card))
        .route("/users/{user}/cards/{id}", delete(delete_user_card))
        .route("/users/{user}/claim", get(claim_card))
        .route("/trade", post(propose_trade))
        .route("/trade/{id}/accept", post(accept_trade))
        // Peer surface
        .route("/replicate", post(replicate))
        .route("/snapshot", get(snapshot))
        .route("/status", get(status))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&node),
            leader_gate,
        ))
        .layer(cors)
        .with_state(node)
}

/// True for the routes only the leader may serve.
fn requires_leader(method: &Method, path: &str) -> bool {
    if *method == Method::POST {
        path == "/cards"
            || path == "/trade"
            || (path.starts_with("/trade/") && path.ends_with("/accept"))
            || (path.starts_with("/users/") && path.ends_with("/cards"))
    } else if *method == Method::DELETE {
        path.starts_with("/cards/") || (path.starts_with("/users/") && path.contains("/cards/"))
    } else if *method == Method::GET {
        path.starts_with("/users/") && path.ends_with("/claim")
    } else {
        false
    }
}

/// Middleware guarding leader-only routes: leaders fall through, followers
/// proxy to the believed leader.
async fn leader_gate(State(node): State<Arc<Node>>, request: Request, next: Next) -> Response {
    if node.is_leader() || !requires_leader(request.method(), request.uri().path()) {
        return next.run(request).await;
    }
    match forward_to_leader(&node, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Proxy a mutating request to the leader, re-electing and retrying once
/// if the leader is unreachable.
async fn forward_to_leader(node: &Node, request: Request) -> Result<Response, ApiError> {
    let leader = node.leader();
    if leader.addr.is_empty() {
        return Err(ApiError::NoLeader);
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|err| ApiError::Internal(format!("failed to read request body: {err}")))?;

    match proxy_once(node, &leader.addr, &parts, body.clone()).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(
                leader_addr = %leader.addr,
                error = %err,
                "leader unreachable; triggering re-election"
            );
            node.elect_leader().await;
            let new_leader = node.leader();
            if new_leader.addr != leader.addr {
                if let Ok(response) = proxy_once(node, &new_leader.addr, &parts, body).await {
                    return Ok(response);
                }
            }
            Err(ApiError::LeaderUnreachable(err.to_string()))
        }
    }
}

async fn proxy_once(
    node: &Node,
    leader_addr: &str,
    parts: &Parts,
    body: Bytes,
) -> Result<Response, reqwest::Error> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    let url = format!("{}{}", leader_addr.trim_end_matches('/'), path_and_query);

    let mut headers = parts.headers.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = node
        .client()
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body.to_vec())
        .send()
        .await?;

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    for (name, value) in &upstream_headers {
        if *name == header::TRANSFER_ENCODING
            || *name == header::CONNECTION
            || *name == header::CONTENT_LENGTH
        {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    Ok(response)
}

async fn get_cards(State(node): State<Arc<Node>>) -> Json<Vec<Card>> {
    Json(node.store().list(""))
}

async fn post_card(State(node): State<Arc<Node>>, Json(card): Json<Card>) -> impl IntoResponse {
    node.store().add("", card.clone());
    node.replicate_to_followers(&ReplicateRequest::add(card.clone(), None));
    (StatusCode::CREATED, Json(card))
}

async fn delete_card(State(node): State<Arc<Node>>, Path(id): Path<i64>) -> StatusCode {
    node.store().remove("", id);
    node.replicate_to_followers(&ReplicateRequest::remove(id, None));
    StatusCode::NO_CONTENT
}

async fn get_user_cards(
    State(node): State<Arc<Node>>,
    Path(user): Path<String>,
) -> Json<Vec<Card>> {
    Json(node.store().list(&user))
}

async fn post_user_card(
    State(node): State<Arc<Node>>,
    Path(user): Path<String>,
    Json(card): Json<Card>,
) -> impl IntoResponse {
    node.store().add(&user, card.clone());
    node.replicate_to_followers(&ReplicateRequest::add(card.clone(), Some(user)));
    (StatusCode::CREATED, Json(card))
}

async fn delete_user_card(
    State(node): State<Arc<Node>>,
    Path((user, id)): Path<(String, i64)>,
) -> StatusCode {
    node.store().remove(&user, id);
    node.replicate_to_followers(&ReplicateRequest::remove(id, Some(user)));
    StatusCode::NO_CONTENT
}

/// Transfer the last card of the global deck to `user`, minting a fresh
/// batch first if the deck ran dry.
async fn claim_card(
    State(node): State<Arc<Node>>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let store = node.store();
    if store.list("").is_empty() {
        node.regen_global_deck(REGEN_BATCH);
    }
    let card = store.claim_last(&user).ok_or(ApiError::NoCardsAvailable)?;
    node.replicate_to_followers(&ReplicateRequest::remove(card.id, None));
    node.replicate_to_followers(&ReplicateRequest::add(card.clone(), Some(user)));
    Ok((StatusCode::CREATED, Json(card)))
}

async fn propose_trade(
    State(node): State<Arc<Node>>,
    Json(proposal): Json<TradeProposal>,
) -> Result<Json<Value>, ApiError> {
    if proposal.user_a.is_empty()
        || proposal.user_b.is_empty()
        || proposal.a_card_id == 0
        || proposal.b_card_id == 0
    {
        return Err(ApiError::BadRequest("missing fields".to_string()));
    }
    let trade_id = node.propose_trade(proposal);
    Ok(Json(json!({ "trade_id": trade_id, "status": "pending" })))
}

#[derive(Debug, Deserialize)]
struct AcceptTradeRequest {
    #[serde(default)]
    user: String,
}

async fn accept_trade(
    State(node): State<Arc<Node>>,
    Path(id): Path<u64>,
    Json(request): Json<AcceptTradeRequest>,
) -> Result<Json<Value>, ApiError> {
    let proposal = node.claim_proposal(id, &request.user)?;

    let (a_card, b_card) = node
        .store()
        .swap_cards(
            &proposal.user_a,
            proposal.a_card_id,
            &proposal.user_b,
            proposal.b_card_id,
        )
        .map_err(|_| ApiError::BadRequest("one or both cards not found".to_string()))?;

    node.replicate_to_followers(&ReplicateRequest::remove(
        a_card.id,
        Some(proposal.user_a.clone()),
    ));
    node.replicate_to_followers(&ReplicateRequest::remove(
        b_card.id,
        Some(proposal.user_b.clone()),
    ));
    node.replicate_to_followers(&ReplicateRequest::add(
        b_card.clone(),
        Some(proposal.user_a.clone()),
    ));
    node.replicate_to_followers(&ReplicateRequest::add(
        a_card.clone(),
        Some(proposal.user_b.clone()),
    ));

    Ok(Json(
        json!({ "user_a_received": b_card, "user_b_received": a_card }),
    ))
}

async fn replicate(
    State(node): State<Arc<Node>>,
    Json(request): Json<ReplicateRequest>,
) -> StatusCode {
    node.apply_replicate(&request);
    StatusCode::OK
}

async fn snapshot(State(node): State<Arc<Node>>) -> Json<SnapshotPayload> {
    Json(node.snapshot())
}

async fn status(State(node): State<Arc<Node>>) -> Json<StatusReport> {
    Json(node.status())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_only_routes_are_gated() {
        assert!(requires_leader(&Method::POST, "/cards"));
        assert!(requires_leader(&Method::DELETE, "/cards/7"));
        assert!(requires_leader(&Method::POST, "/users/alice/cards"));
        assert!(requires_leader(&Method::DELETE, "/users/alice/cards/7"));
        assert!(requires_leader(&Method::GET, "/users/alice/claim"));
        assert!(requires_leader(&Method::POST, "/trade"));
        assert!(requires_leader(&Method::POST, "/trade/3/accept"));
    }

    #[test]
    fn reads_and_peer_routes_are_open() {
        assert!(!requires_leader(&Method::GET, "/cards"));
        assert!(!requires_leader(&Method::GET, "/users/alice/cards"));
        assert!(!requires_leader(&Method::POST, "/replicate"));
        assert!(!requires_leader(&Method::GET, "/snapshot"));
        assert!(!requires_leader(&Method::GET, "/status"));
    }
}
