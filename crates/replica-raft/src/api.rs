//! Inter-node HTTP endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};

use crate::cluster::Shared;
use crate::network::paths;
use crate::types::{
    JoinRequest, PeerResult, ReadRequest, ReadResponse, Request, Response, TypeConfig,
};

pub fn router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route(paths::VOTE, post(vote))
        .route(paths::APPEND, post(append))
        .route(paths::SNAPSHOT, post(snapshot))
        .route(paths::JOIN, post(join))
        .route(paths::EXECUTE, post(execute))
        .route(paths::QUERY, post(query))
        .with_state(shared)
}

async fn vote(
    State(shared): State<Arc<Shared>>,
    Json(rpc): Json<VoteRequest<TypeConfig>>,
) -> Json<Result<VoteResponse<TypeConfig>, RaftError<TypeConfig>>> {
    Json(shared.raft.vote(rpc).await)
}

async fn append(
    State(shared): State<Arc<Shared>>,
    Json(rpc): Json<AppendEntriesRequest<TypeConfig>>,
) -> Json<Result<AppendEntriesResponse<TypeConfig>, RaftError<TypeConfig>>> {
    Json(shared.raft.append_entries(rpc).await)
}

async fn snapshot(
    State(shared): State<Arc<Shared>>,
    Json(rpc): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Json<Result<InstallSnapshotResponse<TypeConfig>, RaftError<TypeConfig, InstallSnapshotError>>>
{
    Json(shared.raft.install_snapshot(rpc).await)
}

async fn join(
    State(shared): State<Arc<Shared>>,
    Json(request): Json<JoinRequest>,
) -> Json<PeerResult<()>> {
    Json(shared.join_local(request).await)
}

async fn execute(
    State(shared): State<Arc<Shared>>,
    Json(request): Json<Request>,
) -> Json<PeerResult<Response>> {
    Json(shared.write_local(request).await)
}

async fn query(
    State(shared): State<Arc<Shared>>,
    Json(request): Json<ReadRequest>,
) -> Json<PeerResult<ReadResponse>> {
    Json(shared.read_local(request).await)
}
