//! QuizCache smoke harness.
//!
//! Deploys a worker version against a live origin, replays the static asset
//! list through the interceptor and prints a JSON summary.
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate v2 against a local dev server
//! quizcache-smoke deploy --origin http://localhost:8080/ --tag v2
//!
//! # Inspect a saved snapshot
//! quizcache-smoke status --snapshot ~/.cache/quizcache/cache.json
//!
//! # Purge expired dynamic entries
//! quizcache-smoke sweep --config quizcache.json
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quizcache_common::{init_logging, now_millis, LogConfig, LogFormat};
use quizcache_net::{HttpNetwork, Request};
use quizcache_sw::{
    purge_expired, CacheStore, FetchOutcome, MessageEvent, MessageOutcome, VersionDescriptor,
    WorkerConfig, WorkerHost,
};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "quizcache-smoke")]
#[command(about = "Smoke harness for the QuizCache offline layer")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate a version, then replay its assets
    Deploy {
        /// JSON worker config
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the origin
        #[arg(long)]
        origin: Option<Url>,
        /// Override the version tag
        #[arg(long)]
        tag: Option<String>,
        /// Snapshot file to restore from and save to
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Write the JSON summary here instead of stdout
        #[arg(long)]
        perf_output: Option<PathBuf>,
    },

    /// Print generations and sizes from a snapshot
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Purge expired dynamic entries from a snapshot
    Sweep {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

/// Collects operation durations for the summary.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let round = |ms: f64| (ms * 100.0).round() / 100.0;
        let mut summary = serde_json::Map::new();

        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }
            let millis: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let count = millis.len();
            let total_ms: f64 = millis.iter().sum();
            let min_ms = millis.iter().copied().fold(f64::INFINITY, f64::min);
            let max_ms = millis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": count,
                    "total_ms": round(total_ms),
                    "avg_ms": round(total_ms / count as f64),
                    "min_ms": round(min_ms),
                    "max_ms": round(max_ms),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

fn load_config(path: Option<&Path>, origin: Option<Url>, tag: Option<String>) -> Result<WorkerConfig> {
    let mut config = match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(origin) = origin {
        config.origin = origin;
    }
    if let Some(tag) = tag {
        config.version = VersionDescriptor {
            tag,
            ..config.version
        };
    }
    config.validate().context("validating config")?;
    Ok(config)
}

async fn open_store(snapshot: Option<&Path>, max_bytes: Option<u64>) -> Result<CacheStore> {
    match snapshot {
        Some(path) if path.exists() => CacheStore::load_snapshot(path, max_bytes)
            .await
            .with_context(|| format!("restoring snapshot {}", path.display())),
        _ => Ok(CacheStore::with_quota(max_bytes)),
    }
}

async fn deploy(
    config: WorkerConfig,
    snapshot: Option<PathBuf>,
    perf_output: Option<PathBuf>,
) -> Result<()> {
    let mut perf = PerfTiming::default();
    let snapshot = snapshot.or_else(|| config.snapshot_path.clone());

    let store = open_store(snapshot.as_deref(), config.quota.max_bytes).await?;
    let network = HttpNetwork::new(config.origin.clone(), config.http.loader_config())
        .context("building HTTP client")?;
    let (host, mut events) = WorkerHost::new(config.origin.clone(), store.clone(), Arc::new(network));

    let started = Instant::now();
    let report = host.deploy(config.clone()).await.context("deploying worker")?;
    perf.record("deploy", started.elapsed());

    let (mut hits, mut network_hits, mut fallbacks) = (0usize, 0usize, 0usize);
    for asset in &config.static_assets {
        let url = config.resolve(asset)?;
        let request = if asset == "/" || asset == &config.root_document {
            Request::navigate(url)
        } else {
            Request::get(url)
        };

        let started = Instant::now();
        let outcome = host.handle_fetch(request).await?;
        perf.record("fetch", started.elapsed());
        match outcome {
            FetchOutcome::Cache { .. } => hits += 1,
            FetchOutcome::Network { .. } => network_hits += 1,
            FetchOutcome::Fallback { .. } => fallbacks += 1,
            FetchOutcome::Passthrough => {}
        }
    }

    let (event, reply) = MessageEvent::with_reply(json!({ "type": "GET_CACHE_STATUS" }));
    let status = match host.post_message(event).await? {
        MessageOutcome::Status(_) => Some(reply.await.context("waiting for cache status")?),
        _ => None,
    };

    if let Some(path) = &snapshot {
        let started = Instant::now();
        store.save_snapshot(path).await.context("saving snapshot")?;
        perf.record("snapshot", started.elapsed());
        info!(path = %path.display(), "Snapshot saved");
    }

    let mut host_events = 0;
    while events.try_recv().is_ok() {
        host_events += 1;
    }

    let summary = json!({
        "generation": report.install.generation,
        "install": { "cached": report.install.cached },
        "activation": report.activation.as_ref().map(|a| json!({
            "deleted": a.deleted,
            "claimed": a.claimed,
        })),
        "replay": {
            "requests": config.static_assets.len(),
            "cache_hits": hits,
            "network": network_hits,
            "fallbacks": fallbacks,
        },
        "status": status,
        "host_events": host_events,
        "used_bytes": store.used_bytes().await,
        "timings": perf.summary(),
    });
    emit(&summary, perf_output.as_deref())
}

async fn status(config: WorkerConfig, snapshot: Option<PathBuf>) -> Result<()> {
    let path = snapshot
        .or(config.snapshot_path)
        .context("no snapshot path given and no default cache directory")?;
    let store = CacheStore::load_snapshot(&path, config.quota.max_bytes)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;

    let mut generations = serde_json::Map::new();
    for name in store.list_generation_names().await {
        let entries = store.entry_count(&name).await;
        generations.insert(name, json!(entries));
    }
    let summary = json!({
        "snapshot": path.display().to_string(),
        "current": config.version.static_name(),
        "generations": generations,
        "used_bytes": store.used_bytes().await,
    });
    emit(&summary, None)
}

async fn sweep(config: WorkerConfig, snapshot: Option<PathBuf>) -> Result<()> {
    let path = snapshot
        .or(config.snapshot_path.clone())
        .context("no snapshot path given and no default cache directory")?;
    let store = CacheStore::load_snapshot(&path, config.quota.max_bytes)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;

    let purged = purge_expired(&store, &config.version, &config.expiry, now_millis()).await;
    if purged > 0 {
        store.save_snapshot(&path).await.context("saving snapshot")?;
    }
    emit(&json!({ "purged": purged }), None)
}

fn emit(summary: &serde_json::Value, path: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(summary)?;
    match path {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Summary written");
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    if let Err(err) = init_logging(log_config.with_format(cli.log_format)) {
        eprintln!("logging disabled: {err}");
    }

    match cli.command {
        Commands::Deploy {
            config,
            origin,
            tag,
            snapshot,
            perf_output,
        } => {
            let config = load_config(config.as_deref(), origin, tag)?;
            deploy(config, snapshot, perf_output).await
        }
        Commands::Status { config, snapshot } => {
            let config = load_config(config.as_deref(), None, None)?;
            status(config, snapshot).await
        }
        Commands::Sweep { config, snapshot } => {
            let config = load_config(config.as_deref(), None, None)?;
            if !config.expiry.enabled {
                warn!("Expiry is disabled in the config; sweeping anyway");
            }
            sweep(config, snapshot).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_deploy() {
        let cli = Cli::try_parse_from([
            "quizcache-smoke",
            "--log-format",
            "json",
            "deploy",
            "--origin",
            "https://quiz.example/",
            "--tag",
            "v9",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Deploy { tag: Some(ref t), .. } if t == "v9"));
    }

    #[test]
    fn test_overrides_apply() {
        let config = load_config(
            None,
            Some(Url::parse("https://quiz.example/").unwrap()),
            Some("v9".into()),
        )
        .unwrap();
        assert_eq!(config.origin.as_str(), "https://quiz.example/");
        assert_eq!(config.version.static_name(), "static-v9");
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quizcache.json");
        std::fs::write(
            &path,
            r#"{ "origin": "https://quiz.example/", "version": { "tag": "v4", "prefix": "ssc" } }"#,
        )
        .unwrap();

        let config = load_config(Some(path.as_path()), None, None).unwrap();
        assert_eq!(config.version.static_name(), "ssc-static-v4");
    }

    #[test]
    fn test_invalid_tag_override_fails() {
        assert!(load_config(None, None, Some("v 1".into())).is_err());
    }

    #[test]
    fn test_perf_summary() {
        let mut perf = PerfTiming::default();
        perf.record("fetch", Duration::from_millis(10));
        perf.record("fetch", Duration::from_millis(30));

        let summary = perf.summary();
        assert_eq!(summary["fetch"]["count"], 2);
        assert_eq!(summary["fetch"]["avg_ms"], 20.0);
        assert_eq!(summary["fetch"]["max_ms"], 30.0);
    }

    #[tokio::test]
    async fn test_open_store_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("none.json").as_path()), Some(10)).await.unwrap();
        assert!(store.list_generation_names().await.is_empty());
    }
}
