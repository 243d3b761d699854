use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use raftkv::network::http_api::{run_http_api, PutRequest};
use raftkv::network::proto::raft_service_server::RaftServiceServer;
use raftkv::network::{GrpcDialer, RaftServer, Transport};
use raftkv::shutdown::install_shutdown_handler;
use raftkv::{Config, FileStore, Raft};

#[derive(Parser)]
#[command(name = "raftkv")]
#[command(about = "A small replicated key-value store with leader election")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a node in a cluster
    Node {
        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Unique name of this node
        #[arg(short, long)]
        name: Option<String>,

        /// Peer RPC address to listen on
        #[arg(short, long)]
        address: Option<String>,

        /// Client HTTP API address to listen on
        #[arg(long)]
        http: Option<String>,

        /// Comma-separated list of peers (name=address)
        #[arg(short, long)]
        peers: Option<String>,

        /// Directory holding the node's log file
        #[arg(short, long)]
        data_dir: Option<String>,
    },

    /// Write a key through the leader's HTTP API
    Put {
        /// HTTP API address, e.g. 127.0.0.1:8001
        #[arg(long)]
        http: String,
        key: String,
        value: String,
    },

    /// Read a key from a node's local store
    Get {
        /// HTTP API address, e.g. 127.0.0.1:8001
        #[arg(long)]
        http: String,
        key: String,
    },

    /// Show a node's view of the cluster
    Status {
        /// HTTP API address, e.g. 127.0.0.1:8001
        #[arg(long)]
        http: String,
    },
}

fn http_request(
    host_port: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> anyhow::Result<String> {
    let mut stream = TcpStream::connect(host_port)
        .with_context(|| format!("failed to connect to {host_port}"))?;
    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host_port}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes())?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    let resp = String::from_utf8_lossy(&buf);
    if let Some(pos) = resp.find("\r\n\r\n") {
        Ok(resp[pos + 4..].to_string())
    } else {
        Ok(resp.to_string())
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn build_config(
    config: Option<PathBuf>,
    name: Option<String>,
    address: Option<String>,
    http: Option<String>,
    peers: Option<String>,
    data_dir: Option<String>,
) -> anyhow::Result<Config> {
    let mut cfg = match config {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(name) = name {
        cfg.name = name;
    }
    if let Some(address) = address {
        cfg.address = address;
    }
    if let Some(http) = http {
        cfg.http_address = http;
    }
    if let Some(data_dir) = data_dir {
        cfg.data_dir = data_dir;
    }
    if let Some(peers) = peers {
        cfg.peers = Config::parse_peers(&peers, &cfg.name)?;
    } else {
        let me = cfg.name.clone();
        cfg.peers.retain(|p| p.name != me);
    }

    cfg.validate()?;
    Ok(cfg)
}

async fn run_node(cfg: Config) -> anyhow::Result<()> {
    let grpc_addr: SocketAddr = cfg
        .address
        .parse()
        .with_context(|| format!("invalid peer address {}", cfg.address))?;
    let http_addr: SocketAddr = cfg
        .http_address
        .parse()
        .with_context(|| format!("invalid HTTP address {}", cfg.http_address))?;

    let shutdown = install_shutdown_handler()?;

    let store = Arc::new(FileStore::open(cfg.log_path())?);
    info!("Using log file {}", store.path().display());

    let call_timeout = Duration::from_millis(cfg.call_timeout_ms);
    let dialer = Arc::new(GrpcDialer::new(call_timeout, call_timeout));
    let transport = Transport::new(dialer, cfg.transport_config());

    for peer in &cfg.peers {
        info!("Added peer: {} at {}", peer.name, peer.address);
    }
    let raft = Raft::new(cfg.raft_config(), store, transport);
    raft.start().await?;

    let grpc_task = {
        let token = shutdown.clone();
        let server = RaftServer::new(Arc::clone(&raft));
        tokio::spawn(async move {
            info!("gRPC server listening on {grpc_addr}");
            let signal = token.clone();
            let result = tonic::transport::Server::builder()
                .add_service(RaftServiceServer::new(server))
                .serve_with_shutdown(grpc_addr, async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("gRPC server error: {e}");
                token.cancel();
            }
        })
    };

    let http_task = {
        let token = shutdown.clone();
        let raft = Arc::clone(&raft);
        tokio::spawn(async move {
            let signal = token.clone();
            let result = run_http_api(http_addr, raft, async move { signal.cancelled().await }).await;
            if let Err(e) = result {
                error!("HTTP API error: {e}");
                token.cancel();
            }
        })
    };

    shutdown.cancelled().await;
    raft.shutdown();
    drain(cfg.shutdown_grace(), grpc_task, http_task).await;
    Ok(())
}

async fn drain(
    grace: Duration,
    grpc_task: tokio::task::JoinHandle<()>,
    http_task: tokio::task::JoinHandle<()>,
) {
    let servers = async {
        let _ = grpc_task.await;
        let _ = http_task.await;
    };
    match tokio::time::timeout(grace, servers).await {
        Ok(()) => info!("Servers drained, exiting"),
        Err(_) => warn!("Servers did not drain within {grace:?}, exiting anyway"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Node {
            config,
            name,
            address,
            http,
            peers,
            data_dir,
        } => {
            let cfg = build_config(config, name, address, http, peers, data_dir)?;
            info!("Starting node {} at {}", cfg.name, cfg.address);
            run_node(cfg).await?;
        }
        Command::Put { http, key, value } => {
            let body = serde_json::to_string(&PutRequest { key, value })?;
            println!("{}", http_request(&http, "PUT", "/put", Some(&body))?);
        }
        Command::Get { http, key } => {
            let path = format!(
                "/get?key={}",
                form_urlencoded::byte_serialize(key.as_bytes()).collect::<String>()
            );
            println!("{}", http_request(&http, "GET", &path, None)?);
        }
        Command::Status { http } => {
            println!("{}", http_request(&http, "GET", "/status", None)?);
        }
    }

    Ok(())
}
