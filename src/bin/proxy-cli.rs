use clap::{Parser, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Admin CLI for roundproxy", long_about = None)]
struct Cli {
    /// Base URL of the admin API
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    admin: String,

    /// Bearer token configured as `admin.api_key`
    #[arg(short, long, env = "ROUNDPROXY_ADMIN_KEY")]
    key: String,

    /// Print raw JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pool size, healthy count and total connections
    Status,
    /// List backends with status and live connections
    Backends,
    /// Register a backend
    Add {
        /// Upstream base URL, e.g. http://127.0.0.1:3000
        target: String,
    },
    /// Remove a backend, waiting for its in-flight requests to drain
    Remove {
        /// Backend id as listed by `backends`
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.admin.trim_end_matches('/');

    let (method, path, body) = match &cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Backends => (Method::GET, "/admin/backends".to_string(), None),
        Commands::Add { target } => (
            Method::POST,
            "/admin/backends".to_string(),
            Some(serde_json::json!({ "url": target })),
        ),
        Commands::Remove { id } => (Method::DELETE, format!("/admin/backends/{}", id), None),
    };

    let mut request = client
        .request(method, format!("{}{}", base, path))
        .bearer_auth(&cli.key);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let res = request.send().await?;

    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("admin API returned {}: {}", status, text.trim());
        std::process::exit(1);
    }

    match (&cli.command, status) {
        (Commands::Remove { id }, StatusCode::NO_CONTENT) => println!("removed {}", id),
        (Commands::Backends, _) if !cli.json => print_backends(&serde_json::from_str(&text)?),
        _ => {
            let json: Value = serde_json::from_str(&text)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn print_backends(backends: &Value) {
    let Some(rows) = backends.as_array() else {
        println!("{}", backends);
        return;
    };

    println!("{:<38} {:<10} {:>6}  TARGET", "ID", "STATUS", "CONNS");
    for row in rows {
        println!(
            "{:<38} {:<10} {:>6}  {}",
            row["id"].as_str().unwrap_or("-"),
            row["status"].as_str().unwrap_or("-"),
            row["connections"].as_u64().unwrap_or(0),
            row["url"].as_str().unwrap_or("-"),
        );
    }
}
