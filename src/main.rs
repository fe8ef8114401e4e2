//!
//! sheetsync server binary
//! -----------------------
//! Loads `.env`, reads configuration from the environment, applies CLI
//! overrides and serves the HTTP API.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sheetsync::config::ServiceConfig;

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("sheetsync\n\nUSAGE:\n  sheetsync [--port N]\n\nOPTIONS:\n  --port N    HTTP port (env: PORT, default 3000)\n\nOther settings come from the environment or a .env file:\n  DATABASE_URL, SPREADSHEET_ID, SHEET_RANGE, SHEETS_ACCESS_TOKEN, SHEETS_API_KEY,\n  SHEETS_API_BASE, SHEETS_TIMEOUT_SECS, SYNC_TIMEOUT_SECS, RETRY_ATTEMPTS,\n  UPSERT_KEY, QUERYABLE_FIELDS, MAX_PAGE_SIZE, MALFORMED_DATES, CORS_PERMISSIVE, API_PREFIX\n");
        return Ok(());
    }

    // A missing .env file is fine; the environment may already be complete
    let dotenv = dotenvy::dotenv().ok();

    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "startup", "sheetsync starting: RUST_LOG='{}', dotenv={:?}", rust_log, dotenv);

    let mut config = ServiceConfig::from_env()?;
    // CLI arguments override environment
    if let Some(port) = parse_port_arg(&args, "--port") {
        config.port = port;
    }

    sheetsync::server::run(config).await
}
