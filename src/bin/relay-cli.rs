use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for the inference relay gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway version, uptime and counts
    Status,
    /// List connected bridges
    Bridges,
    /// Relay endpoint and session counts
    Relay,
    /// List registered tunnels with health
    Tunnels,
    /// List live compute units
    Compute,
    /// Terminate every compute unit
    TerminateAll,
}

impl Commands {
    fn endpoint(&self) -> (Method, &'static str) {
        match self {
            Commands::Status => (Method::GET, "/admin/status"),
            Commands::Bridges => (Method::GET, "/admin/bridges"),
            Commands::Relay => (Method::GET, "/admin/relay"),
            Commands::Tunnels => (Method::GET, "/admin/tunnels"),
            Commands::Compute => (Method::GET, "/admin/compute"),
            Commands::TerminateAll => (Method::POST, "/admin/compute/terminate-all"),
        }
    }
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

    let (method, path) = cli.command.endpoint();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
