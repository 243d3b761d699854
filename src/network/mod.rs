mod convert;
mod error;

pub mod client;
pub mod http_api;
pub mod server;
pub mod transport;

pub use self::error::NetworkError;
pub use client::{GrpcDialer, RaftClient};
pub use server::RaftServer;
pub use transport::{Dialer, PeerClient, RpcMethod, Transport, TransportConfig};

pub mod proto {
    tonic::include_proto!("raft");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn display_includes_error_kind() {
        let conn = NetworkError::ConnectionError("boom".to_string());
        assert!(format!("{conn}").contains("Connection error"));

        let missing = NetworkError::NotConnected("n2".to_string());
        assert_eq!(format!("{missing}"), "node n2 not connected");

        assert_eq!(format!("{}", NetworkError::TimeoutError), "Timeout error");
    }

    #[test]
    fn from_tonic_status_maps_to_grpc_error() {
        let status = Status::unavailable("oops");
        let err: NetworkError = status.into();
        match err {
            NetworkError::GrpcError(status) => {
                assert!(status.message().contains("oops"));
            }
            other => panic!("expected GrpcError, got {other:?}"),
        }
    }
}
