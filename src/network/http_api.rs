use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::HttpBody as _;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::raft::{LogEntry, Raft, RaftError};
use crate::storage::StorageError;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Body of a `PUT /put` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

/// Envelope for every client API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub code: u16,
    pub msg: String,
}

impl ResponseBody {
    fn new(code: u16, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

/// Serve the client API until `shutdown` resolves, then drain open requests.
pub async fn run_http_api<F>(
    addr: SocketAddr,
    raft: Arc<Raft>,
    shutdown: F,
) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let raft = Arc::clone(&raft);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let raft = Arc::clone(&raft);
                async move { handle(req, raft).await }
            }))
        }
    });

    log::info!("HTTP API listening on {addr}");
    hyper::Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

fn json_response(status: StatusCode, body: &ResponseBody) -> Response<Body> {
    let payload = serde_json::to_string(body).unwrap_or_else(|e| {
        format!("{{\"code\":500,\"msg\":\"failed to encode response: {e}\"}}")
    });
    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn reply(code: StatusCode, msg: impl Into<String>) -> Response<Body> {
    json_response(code, &ResponseBody::new(code.as_u16(), msg))
}

enum ReadBodyError {
    TooLarge,
    Hyper(hyper::Error),
}

impl From<hyper::Error> for ReadBodyError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

async fn read_body_limited(mut body: Body, max_bytes: usize) -> Result<Vec<u8>, ReadBodyError> {
    let mut out = Vec::new();
    while let Some(next) = body.data().await {
        let chunk = next?;
        if out.len() + chunk.len() > max_bytes {
            return Err(ReadBodyError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

fn query_param(req: &Request<Body>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn handle(req: Request<Body>, raft: Arc<Raft>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match path.as_str() {
        "/put" if method == Method::PUT => handle_put(req, raft).await,
        "/get" if method == Method::GET => {
            handle_get(&query_param(&req, "key").unwrap_or_default(), &raft)
        }
        "/status" if method == Method::GET => handle_status(raft).await,
        "/put" | "/get" | "/status" => reply(StatusCode::BAD_REQUEST, "request method error"),
        _ => reply(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn handle_put(req: Request<Body>, raft: Arc<Raft>) -> Response<Body> {
    let bytes = match read_body_limited(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(ReadBodyError::TooLarge) => {
            return reply(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
        }
        Err(ReadBodyError::Hyper(e)) => {
            return reply(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            )
        }
    };

    let body: PutRequest = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(e) => return reply(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if body.key.is_empty() {
        return reply(StatusCode::BAD_REQUEST, "key must not be empty");
    }

    match raft.propose(LogEntry::put(&body.key, &body.value)).await {
        Ok(_) => reply(StatusCode::OK, "success"),
        Err(e @ RaftError::NotLeader { .. }) => {
            reply(StatusCode::MISDIRECTED_REQUEST, e.to_string())
        }
        Err(e @ RaftError::StoreApply(StorageError::InvalidEntry(_))) => {
            reply(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ RaftError::ShuttingDown) => reply(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        Err(e) => {
            log::warn!("PUT {} failed: {e}", body.key);
            reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn handle_get(key: &str, raft: &Raft) -> Response<Body> {
    match raft.store().get(key) {
        Ok(value) => reply(StatusCode::OK, value),
        Err(e @ StorageError::KeyNotFound(_)) => reply(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_status(raft: Arc<Raft>) -> Response<Body> {
    match raft.status().await {
        Ok(view) => match serde_json::to_string(&view) {
            Ok(json) => {
                let mut response = Response::new(Body::from(json));
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => reply(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::testing::{echo, FakeDialer};
    use crate::network::{Transport, TransportConfig};
    use crate::raft::{CommandMsg, Node, NodeRole, RaftConfig};
    use crate::storage::{FileStore, Store};

    fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let req = request(Method::GET, "/get?key=hello%20world&x=a+b&flag", Body::empty());
        assert_eq!(query_param(&req, "key").as_deref(), Some("hello world"));
        assert_eq!(query_param(&req, "x").as_deref(), Some("a b"));
        assert_eq!(query_param(&req, "flag").as_deref(), Some(""));
        assert_eq!(query_param(&req, "missing"), None);

        let req = request(Method::GET, "/get?key=100%25zz", Body::empty());
        assert_eq!(query_param(&req, "key").as_deref(), Some("100%zz"));
    }

    struct Follower {
        raft: Arc<Raft>,
        _tmp: tempfile::TempDir,
    }

    fn follower() -> Follower {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let store = Arc::new(FileStore::open(tmp.path().join("n1.log")).expect("store"));
        let mut config = RaftConfig::new("n1", "127.0.0.1:7001");
        config.add_peer("n2", "127.0.0.1:7002");
        let transport = Transport::new(Arc::new(FakeDialer::new(echo())), TransportConfig::default());
        Follower {
            raft: Raft::new(config, store, transport),
            _tmp: tmp,
        }
    }

    async fn call(raft: &Arc<Raft>, req: Request<Body>) -> (StatusCode, String) {
        let response = handle(req, Arc::clone(raft)).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn envelope(body: &str) -> ResponseBody {
        serde_json::from_str(body).expect("{code,msg} envelope")
    }

    #[tokio::test]
    async fn put_on_follower_is_misdirected_with_leader_hint() {
        let node = follower();
        let put = r#"{"key":"k","value":"v"}"#;

        let (status, body) = call(&node.raft, request(Method::PUT, "/put", put)).await;
        assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);
        let reply = envelope(&body);
        assert_eq!(reply.code, 421);
        assert!(reply.msg.contains("unknown"));

        let mut leader = Node::new("n2", "127.0.0.1:7002");
        leader.role = NodeRole::Leader;
        node.raft
            .handle_heartbeat(CommandMsg::heartbeat(leader))
            .await
            .unwrap();

        let (status, body) = call(&node.raft, request(Method::PUT, "/put", put)).await;
        assert_eq!(status, StatusCode::MISDIRECTED_REQUEST);
        assert!(envelope(&body).msg.contains("n2"));
        assert!(node.raft.store().get("k").is_err());
    }

    #[tokio::test]
    async fn put_rejects_bad_json_and_empty_key() {
        let node = follower();

        let (status, body) = call(&node.raft, request(Method::PUT, "/put", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope(&body).code, 400);

        let (status, _) = call(
            &node.raft,
            request(Method::PUT, "/put", r#"{"key":"","value":"v"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_body_over_limit_is_too_large() {
        let node = follower();
        let value = "x".repeat(70 * 1024);
        let put = serde_json::to_string(&PutRequest {
            key: "k".to_string(),
            value,
        })
        .unwrap();

        let (status, body) = call(&node.raft, request(Method::PUT, "/put", put)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(envelope(&body).code, 413);
    }

    #[tokio::test]
    async fn get_reads_local_store() {
        let node = follower();
        node.raft
            .store()
            .resolve(&LogEntry::put("color", "blue"))
            .unwrap();

        let (status, body) = call(&node.raft, request(Method::GET, "/get?key=color", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope(&body), ResponseBody::new(200, "blue"));

        let (status, body) = call(&node.raft, request(Method::GET, "/get?key=size", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope(&body).code, 404);
    }

    #[tokio::test]
    async fn wrong_method_and_unknown_path() {
        let node = follower();

        let (status, body) = call(&node.raft, request(Method::POST, "/get?key=k", Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope(&body), ResponseBody::new(400, "request method error"));

        let (status, _) = call(&node.raft, request(Method::GET, "/put", Body::empty())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&node.raft, request(Method::GET, "/nowhere", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope(&body).code, 404);
    }

    #[tokio::test]
    async fn status_returns_cluster_view() {
        let node = follower();

        let (status, body) = call(&node.raft, request(Method::GET, "/status", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        let view: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(view["me"]["name"], "n1");
        assert_eq!(view["peers"][0]["name"], "n2");
    }

    #[test]
    fn response_body_serializes_code_and_msg() {
        let json = serde_json::to_string(&ResponseBody::new(200, "success")).unwrap();
        assert_eq!(json, r#"{"code":200,"msg":"success"}"#);
    }
}
