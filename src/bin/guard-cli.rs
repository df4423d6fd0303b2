use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the FarmFresh guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check guard status
    Status,
    /// List every circuit breaker with its window stats
    Breakers,
    /// Show one circuit breaker
    Breaker { name: String },
    /// Force one circuit breaker closed
    Reset { name: String },
    /// Force every circuit breaker closed
    ResetAll,
    /// Show the quota tiers in effect
    Tiers,
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

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Breakers => client.get(format!("{}/admin/breakers", cli.url)),
        Commands::Breaker { name } => client.get(format!("{}/admin/breakers/{}", cli.url, name)),
        Commands::Reset { name } => client.post(format!("{}/admin/breakers/{}/reset", cli.url, name)),
        Commands::ResetAll => client.post(format!("{}/admin/breakers/reset", cli.url)),
        Commands::Tiers => client.get(format!("{}/admin/quota", cli.url)),
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
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
