mod cache;
mod config;
mod links;
mod query;
mod service;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing_subscriber::EnvFilter;

use cache::{CacheStore, SqliteStore};
use config::Config;
use links::{LinkHealthCache, ReqwestProbe, TrustTable};
use service::ContentClient;
use store::{Direction, FilterOp, QueryDescriptor};

#[derive(Parser, Debug)]
#[command(name = "newsdesk")]
#[command(about = "Resilient content-data client for the insights site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/newsdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Skip the durable cache; snapshots live only for this run
  #[arg(long)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch records from a collection, serving cached data when the store is unreachable
  Fetch {
    /// Collection name, e.g. "articles"
    collection: String,

    /// Projection of fields to select
    #[arg(short, long, default_value = "*")]
    fields: String,

    /// Ordering as "field" or "field:asc" / "field:desc"
    #[arg(short, long)]
    order: Option<String>,

    /// Filter as "field=value" (also !=, >, >=, <, <=, ~ for contains)
    #[arg(long)]
    filter: Option<String>,
  },

  /// Check reachability and trust for one or more URLs
  Check { urls: Vec<String> },

  /// List trusted content sources
  Sources {
    #[arg(short = 'g', long)]
    category: Option<String>,
  },

  /// Delete the cached snapshot for a cache key
  ClearCache { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing();

  let args = Args::parse();

  match args.command {
    Command::Fetch {
      collection,
      fields,
      order,
      filter,
    } => {
      let config = Config::load(args.config.as_deref())?;

      let mut descriptor = QueryDescriptor::new(collection, fields);
      if let Some(order) = order {
        let (field, direction) = parse_order(&order)?;
        descriptor = descriptor.ordered_by(field, direction);
      }
      if let Some(filter) = filter {
        let (field, op, value) = parse_filter(&filter)?;
        descriptor = descriptor.filtered(field, op, value);
      }

      if args.no_cache {
        run_fetch(&ContentClient::ephemeral(&config)?, &descriptor).await
      } else {
        run_fetch(&ContentClient::new(&config)?, &descriptor).await
      }
    }

    Command::Check { urls } => {
      let links = match Config::load(args.config.as_deref()) {
        Ok(config) => config.links,
        Err(_) if args.config.is_none() => config::LinksConfig::default(),
        Err(err) => return Err(err),
      };
      run_check(&urls, &links).await
    }

    Command::Sources { category } => {
      run_sources(category.as_deref());
      Ok(())
    }

    Command::ClearCache { key } => {
      let cache = SqliteStore::open()?;
      cache.delete(&key)?;
      println!("Cleared cached snapshot for {}", key);
      Ok(())
    }
  }
}

fn init_tracing() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsdesk=info")),
    )
    .with_writer(std::io::stderr)
    .init();
}

async fn run_fetch<S: CacheStore + 'static>(
  client: &ContentClient<S>,
  descriptor: &QueryDescriptor,
) -> Result<()> {
  tracing::info!("fetching {}", descriptor.description());

  let mut query = client.query::<serde_json::Value>(descriptor, Vec::new());
  query.start();

  if query.is_loading() && query.serving_from_cache() {
    eprintln!("(serving cached snapshot while revalidating)");
  }

  query.wait_settled().await;

  tracing::debug!(
    phase = ?query.phase(),
    connected = query.connected(),
    attempts = query.retry_attempt(),
    "query settled"
  );

  for record in query.records() {
    println!("{}", serde_json::to_string_pretty(record)?);
  }

  match query.error() {
    Some(error) if query.serving_from_cache() => {
      eprintln!("degraded: {} (showing last good snapshot)", error);
    }
    Some(error) => eprintln!("degraded: {}", error),
    None => {}
  }

  Ok(())
}

async fn run_check(urls: &[String], links: &config::LinksConfig) -> Result<()> {
  let probe = ReqwestProbe::new(Duration::from_millis(links.probe_timeout_ms))?;
  let cache = LinkHealthCache::new(Arc::new(probe), TrustTable::builtin())
    .with_ttl(chrono::Duration::hours(links.verdict_ttl_hours));

  let verdicts = futures::future::join_all(urls.iter().map(|url| cache.validate(url))).await;

  for (url, verdict) in urls.iter().zip(verdicts) {
    let status = if verdict.valid {
      format!("ok ({})", verdict.status_code)
    } else if verdict.status_code == 0 {
      format!(
        "unknown ({})",
        verdict.failure_reason.as_deref().unwrap_or("no reason")
      )
    } else {
      format!("broken ({})", verdict.status_code)
    };
    println!("{}  authority={}  {}", url, verdict.authority_score, status);
    if let Some(target) = verdict.redirect_target {
      println!("  redirects to {}", target);
    }
  }

  Ok(())
}

fn run_sources(category: Option<&str>) {
  for source in TrustTable::builtin().sources(category) {
    println!(
      "{:<28} {:<20} authority={:>3}  {}",
      source.display_name, source.domain, source.base_authority_score, source.category
    );
  }
}

fn parse_order(raw: &str) -> Result<(String, Direction)> {
  let (field, direction) = raw.split_once(':').unwrap_or((raw, "asc"));
  let direction = match direction {
    "asc" => Direction::Ascending,
    "desc" => Direction::Descending,
    other => return Err(eyre!("Unknown sort direction '{}': use asc or desc", other)),
  };
  Ok((field.to_string(), direction))
}

fn parse_filter(raw: &str) -> Result<(String, FilterOp, serde_json::Value)> {
  // Two-character operators must match before their one-character prefixes
  const OPS: &[(&str, FilterOp)] = &[
    ("!=", FilterOp::Ne),
    (">=", FilterOp::Gte),
    ("<=", FilterOp::Lte),
    (">", FilterOp::Gt),
    ("<", FilterOp::Lt),
    ("~", FilterOp::Contains),
    ("=", FilterOp::Eq),
  ];

  for (token, op) in OPS {
    if let Some((field, value)) = raw.split_once(token) {
      if field.is_empty() {
        break;
      }
      return Ok((field.trim().to_string(), *op, parse_filter_value(value.trim())));
    }
  }

  Err(eyre!(
    "Filter must look like field=value (also !=, >, >=, <, <=, ~), got '{}'",
    raw
  ))
}

fn parse_filter_value(raw: &str) -> serde_json::Value {
  if let Ok(value) = raw.parse::<i64>() {
    return serde_json::Value::from(value);
  }
  if let Ok(value) = raw.parse::<f64>() {
    return serde_json::Value::from(value);
  }
  match raw {
    "true" => serde_json::Value::Bool(true),
    "false" => serde_json::Value::Bool(false),
    _ => serde_json::Value::String(raw.to_string()),
  }
}
