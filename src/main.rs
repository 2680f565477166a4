use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use blackboard_lite::board::BoardEntry;
use blackboard_lite::config::{NodeConfig, PeerId, ReplicationMode};
use blackboard_lite::ledger::SignRequest;
use blackboard_lite::node::Node;
use blackboard_lite::rpc::WriteReceipt;
use blackboard_lite::shutdown::install_shutdown_handler;
use blackboard_lite::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "blackboard-lite")]
#[command(version)]
#[command(about = "A replicated blackboard with Bully election and a co-signed ledger")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a server node
    Server(ServerArgs),

    /// Read and write board entries
    Board {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: BoardCommands,
    },

    /// Cluster management commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },

    /// Co-signing workflow
    Sign {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: SignCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Ordinal of this node, 1-based index into --servers
    #[arg(long)]
    id: u64,

    /// Addresses of every cluster member in ordinal order (comma-separated host:port)
    /// Example: "127.0.0.1:8001,127.0.0.1:8002,127.0.0.1:8003"
    #[arg(long, value_delimiter = ',', required = true)]
    servers: Vec<String>,

    /// Address to bind; defaults to this node's entry in --servers
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// How writes reach other nodes
    #[arg(long, value_enum, default_value = "leader")]
    mode: ModeArg,

    /// Election priority (lower is more eligible); drawn at random if omitted
    #[arg(long)]
    priority: Option<u32>,

    /// Run the proof-of-work miner on this node
    #[arg(long)]
    mine: bool,

    /// Required hex prefix of a sealed block's digest
    #[arg(long, default_value = "0")]
    difficulty: String,

    /// How long a candidate waits for an answer before declaring itself
    #[arg(long, default_value = "1000")]
    answer_window_ms: u64,

    /// Per-request timeout for peer RPCs
    #[arg(long, default_value = "2000")]
    rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Leader,
    Clock,
}

impl From<ModeArg> for ReplicationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Leader => ReplicationMode::LeaderMediated,
            ModeArg::Clock => ReplicationMode::ScalarClock,
        }
    }
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Node address to talk to
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8001")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum BoardCommands {
    /// List every entry
    List,
    /// Add an entry under a fresh key
    Add { entry: String },
    /// Replace the value of an existing entry
    Modify { key: String, entry: String },
    /// Remove an entry
    Delete { key: String },
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Show the node's election, clock and ledger state
    Status,
}

#[derive(clap::Subcommand, Debug)]
enum SignCommands {
    /// Sign a payload and send it to a counterpart for co-signing
    Propose {
        #[arg(long)]
        counterpart: u64,
        payload: String,
    },
    /// Accept or reject a pending sign request on this node
    Approve {
        id: uuid::Uuid,
        #[arg(long)]
        reject: bool,
    },
    /// List pending sign requests
    List,
}

// =============================================================================
// Server
// =============================================================================

fn build_config(args: &ServerArgs) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let index = args
        .id
        .checked_sub(1)
        .filter(|i| (*i as usize) < args.servers.len())
        .ok_or_else(|| format!("--id {} is not an ordinal of --servers", args.id))?;
    let advertise = args.servers[index as usize].clone();
    let listen_addr = match args.listen {
        Some(addr) => addr,
        None => advertise.parse()?,
    };

    let peers = args
        .servers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i as u64 != index)
        .map(|(i, addr)| PeerId::new(i as u64 + 1, addr.clone()))
        .collect();

    let mut config = NodeConfig::new(args.id, listen_addr);
    config.advertise_addr = advertise;
    config.peers = peers;
    config.priority = args.priority;
    config.rpc_timeout_ms = args.rpc_timeout_ms;
    config.election.answer_window_ms = args.answer_window_ms;
    config.replication.mode = args.mode.into();
    config.mining.enabled = args.mine;
    config.mining.difficulty_prefix = args.difficulty.clone();
    Ok(config)
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(&args)?;
    tracing::info!(
        node_id = config.node_id,
        listen_addr = %config.listen_addr,
        mode = %config.replication.mode,
        mining = config.mining.enabled,
        peers = ?config.peers.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        "Starting blackboard-lite node"
    );

    let transport = HttpTransport::new(config.rpc_timeout())?;
    let shutdown = install_shutdown_handler();
    let node = Arc::new(Node::new(config, Arc::new(transport), shutdown));
    node.run().await?;
    Ok(())
}

// =============================================================================
// Client
// =============================================================================

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(args: &ClientArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()?;
        let base = if args.addr.starts_with("http://") || args.addr.starts_with("https://") {
            args.addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", args.addr.trim_end_matches('/'))
        };
        Ok(Self { http, base })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Box<dyn std::error::Error>> {
        let response = self.http.get(format!("{}{}", self.base, path)).send().await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no details")
            .to_string();
        Err(format!("{}: {}", status, message).into())
    }
}

fn print_receipt(receipt: &WriteReceipt, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(receipt)?),
        OutputFormat::Table => {
            println!("Key:        {}", receipt.key);
            match (receipt.leader, receipt.clock) {
                (Some(leader), _) => println!("Leader:     node {}", leader),
                (None, Some(clock)) => println!("Clock:      {}", clock),
                (None, None) => {}
            }
            println!("Replicated: {} peers", receipt.replicated_to);
            println!("Attempts:   {}", receipt.attempts);
        }
    }
    Ok(())
}

async fn handle_board(
    client: &Client,
    command: BoardCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        BoardCommands::List => {
            let entries: Vec<BoardEntry> = client.get("/board").await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Table => {
                    if entries.is_empty() {
                        println!("Board is empty.");
                        return Ok(());
                    }
                    println!("{:<34} VALUE", "KEY");
                    println!("{}", "-".repeat(60));
                    for entry in entries {
                        println!("{:<34} {}", entry.key, entry.value);
                    }
                }
            }
        }
        BoardCommands::Add { entry } => {
            let receipt: WriteReceipt = client
                .post("/board/entries", json!({ "entry": entry }))
                .await?;
            print_receipt(&receipt, output)?;
        }
        BoardCommands::Modify { key, entry } => {
            let receipt: WriteReceipt = client
                .post(&format!("/board/entries/{}", key), json!({ "entry": entry }))
                .await?;
            print_receipt(&receipt, output)?;
        }
        BoardCommands::Delete { key } => {
            let receipt: WriteReceipt = client
                .post(&format!("/board/entries/{}", key), json!({ "delete": true }))
                .await?;
            print_receipt(&receipt, output)?;
        }
    }
    Ok(())
}

async fn handle_cluster_status(
    client: &Client,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let status: Value = client.get("/status").await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => {
            let election = &status["election"];
            println!("Node Status");
            println!("{}", "=".repeat(40));
            println!("Node:         {}", status["node_id"]);
            println!("Address:      {}", status["address"].as_str().unwrap_or("-"));
            println!("Mode:         {}", status["mode"].as_str().unwrap_or("-"));
            println!("Role:         {}", election["role"].as_str().unwrap_or("-"));
            match election["leader"].as_u64() {
                Some(leader) => println!("Leader:       node {}", leader),
                None => println!("Leader:       none"),
            }
            println!("Priority:     {}", election["priority"]);
            println!("Round:        {}", election["round"]);
            println!("Clock:        {}", status["clock"]);
            println!("Entries:      {}", status["board_entries"]);
            println!("Chain height: {}", status["chain_height"]);
            println!("Pending txs:  {}", status["pending_transactions"]);
            println!("Tip:          {}", status["tip_hash"].as_str().unwrap_or("-"));
        }
    }
    Ok(())
}

async fn handle_sign(
    client: &Client,
    command: SignCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        SignCommands::Propose {
            counterpart,
            payload,
        } => {
            let response: Value = client
                .post(
                    "/cosign",
                    json!({ "counterpart": counterpart, "payload": payload }),
                )
                .await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Table => {
                    println!("Sign request queued on node {}", counterpart);
                    println!("Request ID: {}", response["request_id"].as_str().unwrap_or("-"));
                }
            }
        }
        SignCommands::Approve { id, reject } => {
            let response: Value = client
                .post(
                    &format!("/signrequest/approve/{}", id),
                    json!({ "accept": !reject }),
                )
                .await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Table => {
                    if response["transaction"].is_null() {
                        println!("Sign request {} rejected.", id);
                    } else {
                        println!("Sign request {} approved, transaction submitted.", id);
                    }
                }
            }
        }
        SignCommands::List => {
            let requests: Vec<SignRequest> = client.get("/signrequests").await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&requests)?),
                OutputFormat::Table => {
                    if requests.is_empty() {
                        println!("No pending sign requests.");
                        return Ok(());
                    }
                    println!("{:<38} {:<22} PAYLOAD", "REQUEST ID", "RECEIVED");
                    println!("{}", "-".repeat(80));
                    for request in requests {
                        println!(
                            "{:<38} {:<22} {}",
                            request.id,
                            request.received_at.format("%Y-%m-%d %H:%M:%S"),
                            request.payload
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Board { client, command } => {
            let http = Client::new(&client)?;
            handle_board(&http, command, &client.output).await?;
        }
        Commands::Cluster { client, command } => {
            let http = Client::new(&client)?;
            match command {
                ClusterCommands::Status => handle_cluster_status(&http, &client.output).await?,
            }
        }
        Commands::Sign { client, command } => {
            let http = Client::new(&client)?;
            handle_sign(&http, command, &client.output).await?;
        }
    }

    Ok(())
}
