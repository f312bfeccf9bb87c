use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use wirepool::crypto::CipherKey;

#[derive(Parser)]
#[command(name = "wirepool-cli")]
#[command(about = "Management CLI for the wirepool daemon", long_about = None)]
struct Cli {
    #[arg(short, long, env = "WIREPOOL_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "WIREPOOL_ADMIN_KEY", default_value = "admin-secret-key")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check daemon status
    Status,
    /// List registered upstream connections
    Connections,
    /// Open a named upstream connection
    Open {
        name: String,
        /// Target host; omit host and port to use the load balancer
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Wrap the transport in TLS
        #[arg(long)]
        tls: bool,
        /// Connect timeout override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Retry transient failures with backoff
        #[arg(long)]
        retry: bool,
    },
    /// Close a named upstream connection
    Close { name: String },
    /// Write a payload to a named connection
    Send {
        name: String,
        data: String,
        /// Treat `data` as hex-encoded bytes
        #[arg(long)]
        hex: bool,
        /// Encrypt with the daemon's configured cipher key
        #[arg(long)]
        encrypt: bool,
    },
    /// Wait for the next payload on a named connection
    Receive {
        name: String,
        /// Decrypt with the daemon's configured cipher key
        #[arg(long)]
        encrypt: bool,
    },
    /// List active proxy listeners
    Listeners,
    /// Inspect the response cache
    Cache,
    /// Drop every cached response
    FlushCache,
    /// Print a fresh random 256-bit payload key as hex
    Keygen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Connections => client.get(format!("{base}/admin/connections")),
        Commands::Open {
            name,
            host,
            port,
            tls,
            timeout_ms,
            retry,
        } => client.post(format!("{base}/admin/connections")).json(&json!({
            "name": name,
            "host": host,
            "port": port,
            "transport": if tls { "tls" } else { "plain" },
            "timeout_ms": timeout_ms,
            "retry": retry,
        })),
        Commands::Close { name } => client.delete(format!("{base}/admin/connections/{name}")),
        Commands::Send {
            name,
            data,
            hex,
            encrypt,
        } => client
            .post(format!("{base}/admin/connections/{name}/send"))
            .json(&json!({
                "data": data,
                "encoding": if hex { "hex" } else { "utf8" },
                "encrypt": encrypt,
            })),
        Commands::Receive { name, encrypt } => client
            .post(format!("{base}/admin/connections/{name}/receive"))
            .json(&json!({ "encrypt": encrypt })),
        Commands::Listeners => client.get(format!("{base}/admin/listeners")),
        Commands::Cache => client.get(format!("{base}/admin/cache")),
        Commands::FlushCache => client.delete(format!("{base}/admin/cache")),
        Commands::Keygen => {
            println!("{}", CipherKey::generate()?.to_hex());
            return Ok(());
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
