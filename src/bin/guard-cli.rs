use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for upstream-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check daemon status
    Status,
    /// List services and their breaker states
    Services,
    /// Show one service's breaker
    Breaker { service: String },
    /// Force a service's breaker closed
    Reset { service: String },
    /// Drop cached responses under a key prefix (e.g. "fx:/rates")
    Invalidate { prefix: String },
    /// Show cache statistics
    Cache,
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
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Services => client.get(format!("{}/admin/services", base)),
        Commands::Breaker { service } => client.get(format!("{}/admin/breakers/{}", base, service)),
        Commands::Reset { service } => client.post(format!("{}/admin/breakers/{}/reset", base, service)),
        Commands::Invalidate { prefix } => client
            .post(format!("{}/admin/cache/invalidate", base))
            .json(&serde_json::json!({ "prefix": prefix })),
        Commands::Cache => client.get(format!("{}/admin/cache", base)),
    };

    let res = request.headers(headers).send().await?;
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
