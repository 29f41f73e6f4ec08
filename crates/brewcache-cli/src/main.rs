//! brewcache - maintenance commands for the local brew guide data store.
//!
//! Runs against the data directory resolved from the config file or the
//! `BREWCACHE_DATA_DIR` environment variable. Results go to stdout as JSON,
//! logs go to stderr.

use std::io;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brewcache_core::{CacheStats, Config, EntityManager, EquipmentExport, EventBus, MigrationReport};

/// Optional directory for a daily rolling log file.
const LOG_DIR_ENV: &str = "BREWCACHE_LOG_DIR";

const USAGE: &str = "\
Usage: brewcache <command>

Commands:
  migrate          Copy legacy flat data into the document store
  cleanup          Remove legacy keys that have been migrated
  stats            Show record counts and cache statistics
  list             List custom equipment with method counts
  export <id>      Print one equipment and its methods as JSON
  import <file>    Import equipment exported with `export`";

enum Command {
    Migrate,
    Cleanup,
    Stats,
    List,
    Export(String),
    Import(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            bail!("missing command\n\n{}", USAGE);
        };
        let operand = || {
            args.get(1)
                .cloned()
                .with_context(|| format!("`{}` needs an argument\n\n{}", name, USAGE))
        };
        match name.as_str() {
            "migrate" => Ok(Self::Migrate),
            "cleanup" => Ok(Self::Cleanup),
            "stats" => Ok(Self::Stats),
            "list" => Ok(Self::List),
            "export" => Ok(Self::Export(operand()?)),
            "import" => Ok(Self::Import(operand()?)),
            other => bail!("unknown command `{}`\n\n{}", other, USAGE),
        }
    }
}

/// Initialize the tracing subscriber. The returned guard flushes the file
/// writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // RUST_LOG controls the level, e.g. RUST_LOG=brewcache_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer().with_writer(io::stderr);

    match std::env::var(LOG_DIR_ENV).ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "brewcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).with(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help" | "help")) {
        println!("{}", USAGE);
        return Ok(());
    }
    let command = Command::parse(&args)?;

    let config = Config::load().context("Failed to load config")?;
    let manager = EntityManager::open(&config, EventBus::new())?;
    info!(data_dir = ?config.data_dir().ok(), "brewcache starting");

    let output = match command {
        Command::Migrate => report_json(&manager.migrate().await?),
        Command::Cleanup => {
            let removed = manager.migration().cleanup_legacy_keys().await?;
            json!({ "removed": removed })
        }
        Command::Stats => stats(&manager).await,
        Command::List => list(&manager).await,
        Command::Export(id) => {
            let export = manager.export_equipment(&id).await?;
            serde_json::to_value(export)?
        }
        Command::Import(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path))?;
            let export = EquipmentExport::from_json(&contents)?;
            let methods = export.methods.len();
            let saved = manager.import_equipment(export).await?;
            json!({ "equipmentId": saved.id, "name": saved.name, "methods": methods })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    manager.shutdown().await;
    Ok(())
}

fn report_json(report: &MigrationReport) -> serde_json::Value {
    json!({
        "alreadyMigrated": report.already_migrated,
        "complete": report.is_complete(),
        "records": report.total_records(),
        "migrated": report.migrated.iter().map(|(key, n)| json!({ "key": key, "count": n })).collect::<Vec<_>>(),
        "failed": report.failed.iter().map(|(key, e)| json!({ "key": key, "error": e })).collect::<Vec<_>>(),
        "skipped": report.skipped,
    })
}

fn cache_json(stats: &CacheStats) -> serde_json::Value {
    json!({
        "size": stats.size,
        "maxSize": stats.max_size,
        "expired": stats.expired_count,
        "accesses": stats.total_access_count,
        "memoryUsage": stats.memory_usage,
    })
}

async fn stats(manager: &EntityManager) -> serde_json::Value {
    let equipment = manager.load_custom_equipments().await;
    let ids: Vec<String> = equipment.iter().map(|e| e.id.clone()).collect();
    manager.warmup_methods(ids).await;

    let beans = manager.get_all_beans().await.len();
    let notes = manager.get_all_notes().await.len();
    let caches = manager.cache_stats().await;

    json!({
        "migrationState": format!("{:?}", manager.migration_state()),
        "records": {
            "customEquipments": equipment.len(),
            "coffeeBeans": beans,
            "brewingNotes": notes,
        },
        "caches": {
            "equipment": cache_json(&caches.equipment),
            "methods": cache_json(&caches.methods),
            "beans": cache_json(&caches.beans),
            "notes": cache_json(&caches.notes),
        },
    })
}

async fn list(manager: &EntityManager) -> serde_json::Value {
    let mut rows = Vec::new();
    for equipment in manager.load_custom_equipments().await {
        let methods = manager.load_custom_methods_for_equipment(&equipment.id).await;
        rows.push(json!({
            "id": equipment.id,
            "name": equipment.name,
            "animationType": equipment.animation_type.as_str(),
            "hasValve": equipment.has_valve,
            "methods": methods.len(),
        }));
    }
    serde_json::Value::Array(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(Command::parse(&args(&["migrate"])), Ok(Command::Migrate)));
        assert!(matches!(Command::parse(&args(&["list"])), Ok(Command::List)));
        match Command::parse(&args(&["export", "custom-v60-1-abc"])) {
            Ok(Command::Export(id)) => assert_eq!(id, "custom-v60-1-abc"),
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(&[]).is_err());
        assert!(Command::parse(&args(&["export"])).is_err());
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn test_report_json() {
        let report = MigrationReport {
            migrated: vec![("coffeeBeans".to_string(), 3)],
            skipped: 1,
            ..MigrationReport::default()
        };
        let value = report_json(&report);
        assert_eq!(value["records"], 3);
        assert_eq!(value["complete"], true);
        assert_eq!(value["migrated"][0]["key"], "coffeeBeans");
    }
}
