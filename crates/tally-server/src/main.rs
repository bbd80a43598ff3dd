//! `tally-server`: the attendance API over HTTP.
//!
//! ```text
//! tally-server --config /etc/tally/config.toml
//! echo -n 'hunter2' | tally-server --hash-password
//! ```
//!
//! `--hash-password` prints the PHC string to paste into a `[[users]]` entry.

use std::{
  io::{self, BufRead as _, IsTerminal as _, Write as _},
  path::PathBuf,
  sync::Arc,
};

use anyhow::{Context as _, anyhow, ensure};
use clap::Parser;
use tally_server::{
  AppState, ServerConfig,
  auth::{self, AuthConfig},
};
use tally_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Serve the tally attendance API")]
struct Args {
  /// TOML configuration; a missing file leaves only defaults and `TALLY_*`
  /// variables.
  #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
  config: PathBuf,

  /// Hash one password read from stdin, print it, and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args = Args::parse();
  init_tracing();

  if args.hash_password {
    return print_password_hash();
  }

  let config = ServerConfig::load(&args.config)
    .with_context(|| format!("invalid configuration in {}", args.config.display()))?;
  serve(config).await
}

/// `RUST_LOG` wins; otherwise info for tally and request spans from
/// tower-http.
fn init_tracing() {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_password_hash() -> anyhow::Result<()> {
  let stdin = io::stdin();
  if stdin.is_terminal() {
    eprint!("password: ");
    io::stderr().flush().ok();
  }
  let mut line = String::new();
  stdin.lock().read_line(&mut line).context("no password on stdin")?;
  let password = line.strip_suffix('\n').unwrap_or(&line);
  let password = password.strip_suffix('\r').unwrap_or(password);
  ensure!(!password.is_empty(), "refusing to hash an empty password");

  let phc = auth::hash_password(password).map_err(|e| anyhow!("hashing failed: {e}"))?;
  println!("{phc}");
  Ok(())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
  if config.users.is_empty() {
    warn!("no [[users]] configured, every /api request will be refused");
  }

  let db = config.resolved_store_path();
  let store = SqliteStore::open(&db)
    .await
    .with_context(|| format!("cannot open database {}", db.display()))?;
  info!(db = %db.display(), users = config.users.len(), "store ready");

  let app = tally_server::router(AppState {
    store: Arc::new(store),
    auth:  Arc::new(AuthConfig { users: config.users }),
  });

  let listener = TcpListener::bind((config.host.as_str(), config.port))
    .await
    .with_context(|| format!("cannot listen on {}:{}", config.host, config.port))?;
  info!(addr = %listener.local_addr()?, "accepting connections");

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, draining connections"),
        Err(e) => {
          warn!(error = %e, "cannot watch for ctrl-c, running until killed");
          std::future::pending::<()>().await;
        }
      }
    })
    .await
    .context("server stopped unexpectedly")
}
