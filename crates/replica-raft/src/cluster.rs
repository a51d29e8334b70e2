//! Cluster-level operations shared by the replica, its connections and the
//! inter-node endpoints.

use std::collections::BTreeSet;

use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, ChangeMembers, Raft, RaftMetrics};
use tracing::{debug, info};

use crate::error::Error;
use crate::network::{PeerClient, paths};
use crate::state_machine::StateMachineStore;
use crate::types::{
    JoinRequest, PeerFailure, PeerResult, ReadRequest, ReadResponse, Request, Response, TypeConfig,
};

/// State every part of a running replica needs.
pub struct Shared {
    pub node_id: String,
    pub addr: String,
    pub raft: Raft<TypeConfig>,
    pub state_machine: StateMachineStore,
    pub peers: PeerClient,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("node_id", &self.node_id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub fn metrics(&self) -> RaftMetrics<TypeConfig> {
        self.raft.metrics().borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().state.is_leader()
    }

    pub fn is_voter(metrics: &RaftMetrics<TypeConfig>, node_id: &str) -> bool {
        metrics
            .membership_config
            .membership()
            .voter_ids()
            .any(|id| id == node_id)
    }

    /// `host:port` of the current leader, if one is known.
    pub fn leader_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics();
        let metrics = metrics.borrow();
        let leader = metrics.current_leader.as_ref()?;

        metrics
            .membership_config
            .nodes()
            .find(|(id, _)| *id == leader)
            .map(|(_, node)| node.addr.clone())
    }

    /// Proposes a write, forwarding it to the leader when this node is not.
    pub async fn write(&self, request: Request) -> Result<Response, Error> {
        match self.write_local(request.clone()).await {
            Ok(response) => Ok(response),
            Err(PeerFailure::NotLeader {
                leader: Some(leader),
            }) => {
                debug!(leader, "forwarding write to leader");
                self.peers.call(&leader, paths::EXECUTE, &request).await
            }
            Err(PeerFailure::NotLeader { leader: None }) => Err(Error::NoLeader),
            Err(PeerFailure::Failed(message)) => Err(Error::Raft(message)),
        }
    }

    /// Proposes a write on this node only.
    pub async fn write_local(&self, request: Request) -> PeerResult<Response> {
        match self.raft.client_write(request).await {
            Ok(response) => Ok(response.data),
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                Err(PeerFailure::NotLeader {
                    leader: forward.leader_node.map(|node| node.addr),
                })
            }
            Err(e) => Err(PeerFailure::Failed(e.to_string())),
        }
    }

    /// Serves a read from the leader's copy, forwarding when needed.
    pub async fn read(&self, request: ReadRequest) -> Result<ReadResponse, Error> {
        match self.read_local(request.clone()).await {
            Ok(response) => Ok(response),
            Err(PeerFailure::NotLeader {
                leader: Some(leader),
            }) => {
                debug!(leader, "forwarding read to leader");
                self.peers.call(&leader, paths::QUERY, &request).await
            }
            Err(PeerFailure::NotLeader { leader: None }) => Err(Error::NoLeader),
            Err(PeerFailure::Failed(message)) => Err(Error::Sql(message)),
        }
    }

    /// Serves a read only if this node leads.
    pub async fn read_local(&self, request: ReadRequest) -> PeerResult<ReadResponse> {
        if !self.is_leader() {
            return Err(PeerFailure::NotLeader {
                leader: self.leader_addr(),
            });
        }

        self.state_machine
            .read(request)
            .await
            .map_err(|e| PeerFailure::Failed(e.to_string()))
    }

    /// Admits a member: first as a learner so it catches up, then as a voter.
    /// Re-joining an existing voter is a no-op.
    pub async fn join_local(&self, request: JoinRequest) -> PeerResult<()> {
        if !self.is_leader() {
            return Err(PeerFailure::NotLeader {
                leader: self.leader_addr(),
            });
        }

        if Self::is_voter(&self.metrics(), &request.node_id) {
            debug!(node_id = %request.node_id, "join from existing voter");
            return Ok(());
        }

        info!(node_id = %request.node_id, addr = %request.addr, "adding learner");

        self.raft
            .add_learner(
                request.node_id.clone(),
                BasicNode::new(request.addr.clone()),
                true,
            )
            .await
            .map_err(|e| Self::membership_failure(&e))?;

        self.raft
            .change_membership(
                ChangeMembers::AddVoterIds(BTreeSet::from([request.node_id.clone()])),
                false,
            )
            .await
            .map_err(|e| Self::membership_failure(&e))?;

        info!(node_id = %request.node_id, "promoted learner to voter");

        Ok(())
    }

    fn membership_failure(e: &RaftError<TypeConfig, ClientWriteError<TypeConfig>>) -> PeerFailure {
        match e {
            RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => {
                PeerFailure::NotLeader {
                    leader: forward.leader_node.as_ref().map(|node| node.addr.clone()),
                }
            }
            e => PeerFailure::Failed(e.to_string()),
        }
    }
}
