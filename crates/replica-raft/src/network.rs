//! Inter-node transport: raft RPCs and cluster requests as JSON over mutually
//! authenticated HTTPS.

use std::error::Error as StdError;
use std::time::Duration;

use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use rustls::ClientConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::Error;
use crate::types::{PeerFailure, PeerResult, TypeConfig};

/// Inter-node endpoint paths.
pub mod paths {
    /// Raft vote RPC.
    pub const VOTE: &str = "/raft/vote";
    /// Raft append-entries RPC.
    pub const APPEND: &str = "/raft/append";
    /// Raft install-snapshot RPC.
    pub const SNAPSHOT: &str = "/raft/snapshot";
    /// Membership requests from fresh members.
    pub const JOIN: &str = "/cluster/join";
    /// Writes forwarded to the leader.
    pub const EXECUTE: &str = "/db/execute";
    /// Reads forwarded to the leader.
    pub const QUERY: &str = "/db/query";
}

/// HTTPS client used for every call to a peer.
#[derive(Clone, Debug)]
pub struct PeerClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl PeerClient {
    /// Builds a client that presents the node's identity. Cluster and
    /// database calls give up after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(tls: ClientConfig, request_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn url(addr: &str, path: &str) -> String {
        format!("https://{addr}{path}")
    }

    async fn post<Req, Resp>(
        &self,
        addr: &str,
        path: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp, reqwest::Error>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        trace!(addr, path, "peer request");

        let mut request = self.client.post(Self::url(addr, path)).json(body);

        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        request.send().await?.error_for_status()?.json().await
    }

    /// Calls a cluster or database endpoint on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the peer cannot be reached and
    /// [`Error::Peer`] or [`Error::NoLeader`] if it rejected the request.
    pub async fn call<Req, Resp>(&self, addr: &str, path: &str, body: &Req) -> Result<Resp, Error>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let result: PeerResult<Resp> = self
            .post(addr, path, body, Some(self.request_timeout))
            .await?;

        result.map_err(|failure| match failure {
            PeerFailure::NotLeader { leader: None } => Error::NoLeader,
            PeerFailure::NotLeader {
                leader: Some(leader),
            } => Error::Peer {
                peer: addr.to_string(),
                message: format!("not the leader, leader is {leader}"),
            },
            PeerFailure::Failed(message) => Error::Peer {
                peer: addr.to_string(),
                message,
            },
        })
    }

    /// Calls an endpoint and returns the peer's verdict unmapped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the peer cannot be reached.
    pub async fn call_raw<Req, Resp>(
        &self,
        addr: &str,
        path: &str,
        body: &Req,
    ) -> Result<PeerResult<Resp>, Error>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        Ok(self
            .post(addr, path, body, Some(self.request_timeout))
            .await?)
    }
}

/// Network factory for creating openraft network instances
#[derive(Clone, Debug)]
pub struct NetworkFactory {
    peers: PeerClient,
}

impl NetworkFactory {
    /// Creates a factory sharing the given client.
    #[must_use]
    pub const fn new(peers: PeerClient) -> Self {
        Self { peers }
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = Network;

    async fn new_client(&mut self, target: String, node: &BasicNode) -> Self::Network {
        Network {
            peers: self.peers.clone(),
            target,
            addr: node.addr.clone(),
        }
    }
}

/// Openraft network for a single target node
#[derive(Clone, Debug)]
pub struct Network {
    peers: PeerClient,
    target: String,
    addr: String,
}

impl Network {
    async fn send<Req, Resp, Err>(
        &self,
        path: &str,
        rpc: &Req,
        option: &RPCOption,
    ) -> Result<Resp, RPCError<TypeConfig, Err>>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
        Err: StdError + DeserializeOwned,
    {
        let result: Result<Resp, Err> = self
            .peers
            .post(&self.addr, path, rpc, Some(option.hard_ttl()))
            .await
            .map_err(|e| {
                debug!(target = %self.target, path, error = %e, "raft rpc failed");

                if e.is_connect() {
                    RPCError::Unreachable(Unreachable::new(&e))
                } else {
                    RPCError::Network(NetworkError::new(&e))
                }
            })?;

        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target.clone(), e)))
    }
}

impl RaftNetwork<TypeConfig> for Network {
    async fn vote(
        &mut self,
        rpc: VoteRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<VoteResponse<TypeConfig>, RPCError<TypeConfig, RaftError<TypeConfig>>> {
        self.send(paths::VOTE, &rpc, &option).await
    }

    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<AppendEntriesResponse<TypeConfig>, RPCError<TypeConfig, RaftError<TypeConfig>>>
    {
        self.send(paths::APPEND, &rpc, &option).await
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<TypeConfig>,
        RPCError<TypeConfig, RaftError<TypeConfig, InstallSnapshotError>>,
    > {
        self.send(paths::SNAPSHOT, &rpc, &option).await
    }
}
