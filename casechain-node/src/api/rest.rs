use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

use casechain_common::{
    wire::{CaseSummary, DispatchAck, FromWire, HealthReport, SubmitRequest, SuffixResponse},
    Block, CaseChainError, Peer, PoolEntry,
};
use casechain_p2p::{PeerEvent, PeerHandler};

use crate::runtime::service::LedgerService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<LedgerService>,
    /// Bearer token → identity.
    pub tokens: Arc<HashMap<String, String>>,
}

impl ApiState {
    pub fn new(service: Arc<LedgerService>, tokens: HashMap<String, String>) -> Self {
        Self { service, tokens: Arc::new(tokens) }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or unknown bearer token")]
    Unauthorized,
    #[error("case {0} is not available to this user")]
    Forbidden(String),
    #[error(transparent)]
    Service(#[from] CaseChainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Service(CaseChainError::Parse(_) | CaseChainError::Json(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(CaseChainError::Consensus(_)) => StatusCode::CONFLICT,
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("request failed with {}: {}", status, self);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Identity behind the request's bearer token.
pub struct Caller(pub String);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;
        state
            .tokens
            .get(token)
            .cloned()
            .map(Caller)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Deserialize)]
struct CaseQuery {
    id: String,
}

/// New location of a registered peer.
#[derive(Deserialize)]
struct Relocation {
    ip_address: String,
    port: u16,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/receivepool", post(receive_pool))
        .route("/receive_response", post(receive_response))
        .route("/sync", get(sync_summary).post(sync_suffix))
        .route("/announce", post(announce))
        .route("/submit", post(submit))
        .route("/usercase", get(user_cases))
        .route("/caseinfo", get(case_info))
        .route("/peers", get(list_peers).post(register_peer))
        .route("/peers/{address}", put(relocate_peer).delete(drop_peer))
        .with_state(state)
}

/// Serves the API until `shutdown` resolves. The peer's IP is the origin
/// of inbound dispatches and votes.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("REST API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.service.on_health().await)
}

async fn receive_pool(
    State(state): State<ApiState>,
    _caller: Caller,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<Value>,
) -> ApiResult<Json<DispatchAck>> {
    let ack = state.service.on_dispatch(&addr.ip().to_string(), body).await?;
    Ok(Json(ack))
}

async fn receive_response(
    State(state): State<ApiState>,
    _caller: Caller,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    state.service.on_vote(&addr.ip().to_string(), body).await?;
    Ok(StatusCode::OK)
}

async fn sync_summary(State(state): State<ApiState>, _caller: Caller) -> ApiResult<Json<CaseSummary>> {
    Ok(Json(state.service.on_summary().await?))
}

async fn sync_suffix(
    State(state): State<ApiState>,
    _caller: Caller,
    Json(body): Json<Value>,
) -> ApiResult<Json<SuffixResponse>> {
    Ok(Json(state.service.on_suffix(body).await?))
}

async fn announce(State(state): State<ApiState>, _caller: Caller, Json(body): Json<Value>) -> ApiResult<StatusCode> {
    state.service.on_announce(body).await?;
    Ok(StatusCode::OK)
}

async fn submit(
    State(state): State<ApiState>,
    Caller(identity): Caller,
    Json(body): Json<Value>,
) -> ApiResult<Json<PoolEntry>> {
    let request = SubmitRequest::from_wire(&body).map_err(CaseChainError::from)?;
    debug!("{} submits to case {}", identity, request.case_id);
    Ok(Json(state.service.submit(request).await?))
}

async fn user_cases(State(state): State<ApiState>, Caller(identity): Caller) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.service.cases_for_user(&identity).await?))
}

async fn case_info(
    State(state): State<ApiState>,
    Caller(identity): Caller,
    Query(query): Query<CaseQuery>,
) -> ApiResult<Json<Vec<Block>>> {
    if !state.service.cases_for_user(&identity).await?.contains(&query.id) {
        return Err(ApiError::Forbidden(query.id));
    }
    Ok(Json(state.service.case_info(&query.id).await?))
}

async fn list_peers(State(state): State<ApiState>, _caller: Caller) -> Json<Vec<Peer>> {
    Json(state.service.peers().await)
}

async fn register_peer(
    State(state): State<ApiState>,
    _caller: Caller,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    let peer = Peer::from_wire(&body).map_err(CaseChainError::from)?;
    Ok(match state.service.register_peer(peer).await {
        PeerEvent::Registered(_) => StatusCode::CREATED,
        _ => StatusCode::CONFLICT,
    })
}

async fn relocate_peer(
    State(state): State<ApiState>,
    _caller: Caller,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    let target: Relocation = serde_json::from_value(body).map_err(CaseChainError::from)?;
    Ok(match state.service.relocate_peer(&address, &target.ip_address, target.port).await {
        PeerEvent::Relocated { .. } => StatusCode::OK,
        PeerEvent::Unknown(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::CONFLICT,
    })
}

async fn drop_peer(State(state): State<ApiState>, _caller: Caller, Path(address): Path<String>) -> StatusCode {
    match state.service.drop_peer(&address).await {
        PeerEvent::Dropped(_) => StatusCode::NO_CONTENT,
        _ => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NodeMode};
    use casechain_common::{utils::time::now, PeerRole};
    use casechain_ledger::MemoryLedger;
    use casechain_p2p::InMemoryNetwork;

    struct Running {
        base: String,
        service: Arc<LedgerService>,
        client: reqwest::Client,
        stop: tokio::sync::oneshot::Sender<()>,
    }

    async fn spawn_api(mode: NodeMode, peers: Vec<Peer>) -> Running {
        let mut config = Config::new("api-node", "127.0.0.1:0", mode);
        config.peers = peers;
        let service = LedgerService::new(
            &config,
            Arc::new(MemoryLedger::new()),
            Arc::new(InMemoryNetwork::new().transport("127.0.0.1")),
        );
        let tokens = HashMap::from([("t-alice".to_string(), "alice".to_string())]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let state = ApiState::new(service.clone(), tokens);
        tokio::spawn(serve(listener, state, async move {
            let _ = stopped.await;
        }));

        Running { base, service, client: reqwest::Client::new(), stop }
    }

    #[tokio::test]
    async fn test_health_is_open_and_rest_needs_token() {
        let node = spawn_api(NodeMode::Replica, vec![]).await;

        let health: HealthReport = node.client.get(format!("{}/health", node.base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health, HealthReport { node: "api-node".into(), role: PeerRole::Replica });

        let status = node.client.get(format!("{}/usercase", node.base)).send().await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
        let status = node
            .client
            .get(format!("{}/usercase", node.base))
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
        let _ = node.stop.send(());
    }

    #[tokio::test]
    async fn test_submit_then_case_visibility() {
        let node = spawn_api(NodeMode::Replica, vec![]).await;

        let response = node
            .client
            .post(format!("{}/submit", node.base))
            .bearer_auth("t-alice")
            .json(&json!({ "case_id": "C1", "metadata": "m1", "log": "l1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let entry: PoolEntry = response.json().await.unwrap();
        assert_eq!((entry.sequence_number, entry.previous_hash.as_str()), (0, ""));

        let response = node
            .client
            .post(format!("{}/submit", node.base))
            .bearer_auth("t-alice")
            .json(&json!({ "case_id": "C1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let status = node
            .client
            .get(format!("{}/caseinfo?id=C1", node.base))
            .bearer_auth("t-alice")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::FORBIDDEN);

        let store = node.service.store();
        let genesis = PoolEntry::new("C1", "m", "l", now(), 0, "").to_block();
        store.append_blocks("C1", vec![genesis.clone()]).await.unwrap();
        store.grant_access("alice", "C1").await.unwrap();

        let cases: Vec<String> = node
            .client
            .get(format!("{}/usercase", node.base))
            .bearer_auth("t-alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cases, vec!["C1".to_string()]);

        let blocks: Vec<Block> = node
            .client
            .get(format!("{}/caseinfo?id=C1", node.base))
            .bearer_auth("t-alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(blocks, vec![genesis]);
        let _ = node.stop.send(());
    }

    #[tokio::test]
    async fn test_vote_origin_is_remote_ip() {
        let node = spawn_api(NodeMode::Replica, vec![Peer::voter("127.0.0.1", 5000)]).await;
        let mut entry = node
            .service
            .submit(SubmitRequest { case_id: "C1".into(), metadata: "m".into(), log: "l".into() })
            .await
            .unwrap();
        entry.dispatch_time = Some(now());
        node.service.store().update_pool_entry(entry.clone()).await.unwrap();

        let status = node
            .client
            .post(format!("{}/receive_response", node.base))
            .bearer_auth("t-alice")
            .json(&json!({ "pool_id": entry.id.0, "response": 1 }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);

        let votes = node.service.store().votes_for(entry.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].voter_address, "127.0.0.1");
        let _ = node.stop.send(());
    }

    #[tokio::test]
    async fn test_register_peer_conflict() {
        let node = spawn_api(NodeMode::Replica, vec![]).await;
        let body = json!({ "ip_address": "10.0.0.7", "port": 5000, "role": "voter" });
        let post = || {
            node.client
                .post(format!("{}/peers", node.base))
                .bearer_auth("t-alice")
                .json(&body)
                .send()
        };
        assert_eq!(post().await.unwrap().status(), reqwest::StatusCode::CREATED);
        assert_eq!(post().await.unwrap().status(), reqwest::StatusCode::CONFLICT);
        assert_eq!(node.service.peers().await, vec![Peer::voter("10.0.0.7", 5000)]);
        let _ = node.stop.send(());
    }

    #[tokio::test]
    async fn test_relocate_and_drop_peer() {
        let node = spawn_api(NodeMode::Replica, vec![Peer::voter("10.0.0.7", 5000), Peer::replica("10.0.1.1", 5000)]).await;
        let relocate = |address: &str, body: Value| {
            node.client
                .put(format!("{}/peers/{}", node.base, address))
                .bearer_auth("t-alice")
                .json(&body)
                .send()
        };

        let status = relocate("10.0.0.7", json!({ "ip_address": "10.0.0.8", "port": 5001 })).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::OK);
        let status = relocate("10.0.0.8", json!({ "ip_address": "10.0.1.1", "port": 5000 })).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::CONFLICT);
        let status = relocate("10.0.0.99", json!({ "ip_address": "10.0.0.9", "port": 5000 })).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
        let status = relocate("10.0.0.8", json!({ "port": 5000 })).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

        let drop = || {
            node.client
                .delete(format!("{}/peers/10.0.1.1", node.base))
                .bearer_auth("t-alice")
                .send()
        };
        assert_eq!(drop().await.unwrap().status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(drop().await.unwrap().status(), reqwest::StatusCode::NOT_FOUND);

        assert_eq!(node.service.peers().await, vec![Peer::voter("10.0.0.8", 5001)]);
        assert_eq!(node.service.cluster().voter_count().await, 1);
        let _ = node.stop.send(());
    }
}
