//! Demonstration backend: answers `/hello` with its identity and `/health`
//! with 200 OK.

use axum::{extract::State, routing::get, Router};
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "demo-backend")]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "PORT", default_value = "127.0.0.1:8081")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let identity = format!("{} (host={})", cli.listen, hostname);

    let app = Router::new()
        .route("/hello", get(|State(id): State<String>| async move { format!("Hello from backend {id}\n") }))
        .route("/health", get(|| async { "OK" }))
        .with_state(identity);

    let listener = TcpListener::bind(&cli.listen).await?;
    tracing::info!(address = %listener.local_addr()?, "Backend server running");
    axum::serve(listener, app).await?;
    Ok(())
}
