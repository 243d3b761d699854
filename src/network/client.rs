use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::network::proto::raft_service_client::RaftServiceClient;
use crate::raft::{CommandMsg, Node};

use super::{Dialer, NetworkError, PeerClient, RpcMethod};

pub struct RaftClient {
    address: String,
    client: RaftServiceClient<Channel>,
}

impl RaftClient {
    pub async fn connect(
        address: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", address))
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;

        let channel = endpoint
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .connect()
            .await?;

        Ok(Self {
            address: address.to_string(),
            client: RaftServiceClient::new(channel),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn heartbeat(&self, request: CommandMsg) -> Result<CommandMsg, NetworkError> {
        let response = self
            .client
            .clone()
            .heartbeat(Request::new(request.into()))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn vote_request(&self, request: CommandMsg) -> Result<CommandMsg, NetworkError> {
        let response = self
            .client
            .clone()
            .vote_request(Request::new(request.into()))
            .await?
            .into_inner();
        Ok(response.into())
    }

    pub async fn replicate_entry(&self, request: CommandMsg) -> Result<CommandMsg, NetworkError> {
        let response = self
            .client
            .clone()
            .replicate_entry(Request::new(request.into()))
            .await?
            .into_inner();
        Ok(response.into())
    }
}

#[async_trait]
impl PeerClient for RaftClient {
    async fn call(
        &self,
        method: RpcMethod,
        request: CommandMsg,
    ) -> Result<CommandMsg, NetworkError> {
        match method {
            RpcMethod::Heartbeat => self.heartbeat(request).await,
            RpcMethod::VoteRequest => self.vote_request(request).await,
            RpcMethod::ReplicateEntry => self.replicate_entry(request).await,
        }
    }
}

/// Dials peers over gRPC.
pub struct GrpcDialer {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl GrpcDialer {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, node: &Node) -> Result<Arc<dyn PeerClient>, NetworkError> {
        let client =
            RaftClient::connect(&node.address, self.connect_timeout, self.request_timeout).await?;
        debug!("Opened gRPC channel to {} at {}", node.name, client.address());
        Ok(Arc::new(client))
    }
}
