//! `tally` — command-line attendance tracker talking to a tally server.
//!
//! # Usage
//!
//! ```text
//! tally --url http://localhost:5280 --user alice --password secret list
//! tally --config ~/.config/tally/config.toml present MATH101
//! ```

mod client;

use std::{
  io::{self, BufRead, Write},
  path::PathBuf,
  sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use client::{ApiConfig, HttpStore};
use serde::Deserialize;
use tally_core::{
  coordinator::UpdateCoordinator,
  event::AttendanceEvent,
  session::{self, Session},
  subject::{NewSubject, OwnerId, SubjectView, normalize_code},
  summary::AttendanceSummary,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Track class attendance against a tally server")]
struct Args {
  /// Path to a TOML config file (url, username, password).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the tally server (default: http://localhost:5280).
  #[arg(long, env = "TALLY_URL")]
  url: Option<String>,

  /// API username.
  #[arg(long, env = "TALLY_USER")]
  user: Option<String>,

  /// API password (plaintext).
  #[arg(long, env = "TALLY_PASSWORD")]
  password: Option<String>,

  /// Print results as JSON instead of a table.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every subject with its derived figures.
  List,
  /// Start tracking a subject.
  Add {
    code:     String,
    /// Classes held so far.
    #[arg(long)]
    classes:  i64,
    /// Minimum attendance percentage to stay above.
    #[arg(long, default_value_t = 75.0)]
    required: f64,
  },
  /// Mark a class attended.
  Present { subject: String },
  /// Mark a class missed.
  Absent { subject: String },
  /// A scheduled class was cancelled.
  NoClass { subject: String },
  /// An unscheduled class was held.
  ExtraClass { subject: String },
  /// Stop tracking a subject.
  Delete {
    subject: String,
    #[arg(short, long)]
    yes:     bool,
  },
  /// Stop tracking every subject.
  Clear {
    #[arg(short, long)]
    yes: bool,
  },
  /// Totals across all subjects.
  Summary,
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let api_config = ApiConfig {
    base_url: args
      .url
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or_else(|| "http://localhost:5280".to_string()),
    username: args
      .user
      .or_else(|| (!file_cfg.username.is_empty()).then(|| file_cfg.username.clone()))
      .unwrap_or_default(),
    password: args
      .password
      .or_else(|| (!file_cfg.password.is_empty()).then(|| file_cfg.password.clone()))
      .unwrap_or_default(),
  };

  // Without a username the session starts signed out and every command is
  // rejected by the coordinator as not authenticated.
  let session = match OwnerId::new(api_config.username.clone()) {
    Some(owner) => Session::fixed(owner),
    None => session::channel(None).1,
  };

  let store = HttpStore::new(api_config).context("failed to build HTTP client")?;
  let coordinator = UpdateCoordinator::new(Arc::new(store), session);

  run(&coordinator, args.command, args.json).await
}

async fn run(coordinator: &UpdateCoordinator<HttpStore>, command: Command, json: bool) -> Result<()> {
  // Every command except `add` works on the current list.
  if !matches!(command, Command::Add { .. }) {
    coordinator.load().await?;
  }

  match command {
    Command::List => print_subjects(&coordinator.subjects(), json)?,

    Command::Add { code, classes, required } => {
      let input = NewSubject::new(&code, classes, required)?;
      let view = coordinator.create(input).await?;
      print_subjects(&[view], json)?;
    }

    Command::Present { subject } => {
      record(coordinator, &subject, AttendanceEvent::MarkPresent, json).await?
    }
    Command::Absent { subject } => {
      record(coordinator, &subject, AttendanceEvent::MarkAbsent, json).await?
    }
    Command::NoClass { subject } => {
      record(coordinator, &subject, AttendanceEvent::NoClass, json).await?
    }
    Command::ExtraClass { subject } => {
      record(coordinator, &subject, AttendanceEvent::ExtraClass, json).await?
    }

    Command::Delete { subject, yes } => {
      let id = resolve(coordinator, &subject)?;
      let label = coordinator
        .subject(id)
        .map(|v| v.record.code)
        .unwrap_or_else(|| id.to_string());
      if !yes && !confirm(&format!("Delete {label}?"))? {
        println!("Aborted.");
        return Ok(());
      }
      coordinator.delete(id).await?;
      println!("Deleted {label}.");
    }

    Command::Clear { yes } => {
      let count = coordinator.subjects().len();
      if !yes && !confirm(&format!("Delete all {count} subjects?"))? {
        println!("Aborted.");
        return Ok(());
      }
      let deleted = coordinator.clear_all().await?;
      println!("Deleted {deleted} subjects.");
    }

    Command::Summary => print_summary(&coordinator.summary(), json)?,
  }

  Ok(())
}

async fn record(
  coordinator: &UpdateCoordinator<HttpStore>,
  subject: &str,
  event: AttendanceEvent,
  json: bool,
) -> Result<()> {
  let id = resolve(coordinator, subject)?;
  let view = coordinator.apply(id, event).await?;
  print_subjects(&[view], json)
}

/// Find a cached subject by id or by code.
///
/// An id that is not cached is passed through so the coordinator reports it
/// as unknown. Codes are not unique; an ambiguous code is an error.
fn resolve(coordinator: &UpdateCoordinator<HttpStore>, subject: &str) -> Result<Uuid> {
  if let Ok(id) = subject.parse::<Uuid>() {
    return Ok(id);
  }

  let code = normalize_code(subject);
  let matches: Vec<Uuid> = coordinator
    .subjects()
    .into_iter()
    .filter(|v| v.record.code == code)
    .map(|v| v.record.id)
    .collect();

  match matches.as_slice() {
    [id] => Ok(*id),
    [] => Err(anyhow!("no subject with code {code}")),
    _ => bail!("{} subjects share code {code}; use an id instead", matches.len()),
  }
}

fn confirm(prompt: &str) -> Result<bool> {
  print!("{prompt} [y/N] ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_subjects(views: &[SubjectView], json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(views)?);
    return Ok(());
  }
  if views.is_empty() {
    println!("No subjects.");
    return Ok(());
  }

  println!(
    "{:<36}  {:<12} {:>7} {:>7} {:>6} {:>8} {:>9}",
    "ID", "CODE", "CLASSES", "PRESENT", "ABSENT", "PERCENT", "CAN MISS"
  );
  for v in views {
    let r = &v.record;
    println!(
      "{:<36}  {:<12} {:>7} {:>7} {:>6} {:>7.2}% {:>9}",
      r.id, r.code, r.classes_held, r.present, r.absent, v.percent_present, v.safe_bunks
    );
  }
  Ok(())
}

fn print_summary(summary: &AttendanceSummary, json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(summary)?);
    return Ok(());
  }

  println!(
    "{} subjects, {} classes held, {} present, {} absent, {:.2}% overall",
    summary.subjects,
    summary.classes_held,
    summary.present,
    summary.absent,
    summary.percent_present
  );
  for s in &summary.per_subject {
    println!("  {:<12} {:>7.2}%  can miss {}", s.code, s.percent_present, s.safe_bunks);
  }
  Ok(())
}
