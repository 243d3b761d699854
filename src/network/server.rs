use std::sync::Arc;

use log::{debug, error};
use tonic::{Request, Response, Status};

use crate::network::proto::raft_service_server::RaftService;
use crate::raft::{CommandMsg, Raft, RaftError};

use super::proto;

pub struct RaftServer {
    raft: Arc<Raft>,
}

impl RaftServer {
    pub fn new(raft: Arc<Raft>) -> Self {
        Self { raft }
    }
}

fn to_status(method: &str, err: RaftError) -> Status {
    error!("Error handling {method}: {err}");
    match err {
        RaftError::NotRunning | RaftError::ShuttingDown => Status::unavailable(err.to_string()),
        other => Status::internal(format!("Internal error: {other}")),
    }
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn heartbeat(
        &self,
        request: Request<proto::CommandMsg>,
    ) -> Result<Response<proto::CommandMsg>, Status> {
        let message = CommandMsg::from(request.into_inner());
        let reply = self
            .raft
            .handle_heartbeat(message)
            .await
            .map_err(|e| to_status("Heartbeat", e))?;
        Ok(Response::new(reply.into()))
    }

    async fn vote_request(
        &self,
        request: Request<proto::CommandMsg>,
    ) -> Result<Response<proto::CommandMsg>, Status> {
        let message = CommandMsg::from(request.into_inner());
        debug!("Received VoteRequest from {}", message.sender().name);
        let reply = self
            .raft
            .handle_vote_request(message)
            .await
            .map_err(|e| to_status("VoteRequest", e))?;
        Ok(Response::new(reply.into()))
    }

    async fn replicate_entry(
        &self,
        request: Request<proto::CommandMsg>,
    ) -> Result<Response<proto::CommandMsg>, Status> {
        let message = CommandMsg::from(request.into_inner());
        let raft = Arc::clone(&self.raft);
        // Store writes hit the disk; keep them off the async workers.
        let reply = tokio::task::spawn_blocking(move || raft.handle_replicate(message))
            .await
            .map_err(|e| Status::internal(format!("Internal error: {e}")))?;
        Ok(Response::new(reply.into()))
    }
}
