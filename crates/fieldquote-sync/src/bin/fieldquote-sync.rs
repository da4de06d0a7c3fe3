//! # FieldQuote Sync CLI
//!
//! Inspects and drains the local offline queue from a terminal.
//!
//! ## Usage
//! ```bash
//! # Queue depths, storage mode and open conflicts
//! cargo run -p fieldquote-sync -- status
//!
//! # Run one manual replay pass against the configured API
//! cargo run -p fieldquote-sync -- sync
//!
//! # Re-queue or drop a failed write
//! cargo run -p fieldquote-sync -- resolve <CONFLICT_ID> keep-local
//!
//! # Write a default config file
//! cargo run -p fieldquote-sync -- --config ./fieldquote.toml init
//! ```
//!
//! Output is JSON on stdout; logs go to stderr (`RUST_LOG` applies).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use fieldquote_core::Resolution;
use fieldquote_db::{open_store, DbConfig};
use fieldquote_sync::{
    ConnectivityMonitor, DetachedRemote, HttpRemoteApi, RemoteApi, SyncConfig, SyncEngine,
    SyncEngineBuilder, SyncError, Trigger,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("FieldQuote offline sync");
    println!();
    println!("Usage: fieldquote-sync [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  status                          Pending actions, media and conflicts");
    println!("  sync                            Run one manual replay pass");
    println!("  conflicts                       List open conflicts");
    println!("  resolve <ID> <keep-local|discard>  Resolve a conflict");
    println!("  init                            Write the default config file");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>   Config file (default: platform config dir)");
    println!("      --offline         Do not contact the server");
    println!("  -h, --help            Show this help message");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fieldquote=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut offline = false;
    let mut command: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--offline" => offline = true,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => command.push(other.to_string()),
        }
        i += 1;
    }

    init_tracing();

    if command.first().map(String::as_str) == Some("init") {
        let config = SyncConfig::new();
        config.save(config_path)?;
        println!("{}", json!({ "device_id": config.device_id() }));
        return Ok(());
    }

    let mut config = SyncConfig::load(config_path)?;
    if offline {
        config.connectivity.force_offline = true;
    }
    // only `sync` talks to the server; the rest work without an API configured
    let online = command.first().map(String::as_str) == Some("sync");
    let engine = build_engine(&config, online).await?;

    match command.first().map(String::as_str) {
        Some("status") | None => {
            let count = engine.get_queue_count().await?;
            let status = engine.status().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "queue": count,
                    "dead_letters": engine.repositories().dead_letters().count().await?,
                    "storage_mode": status.storage_mode,
                    "conflicts": engine.conflicts().list().await?,
                }))?
            );
        }
        Some("sync") => {
            let report = engine.process_offline_sync(Trigger::Manual).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some("conflicts") => {
            let conflicts = engine.conflicts().list().await?;
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
        Some("resolve") => {
            let (Some(id), Some(choice)) = (command.get(1), command.get(2)) else {
                print_help();
                return Err("resolve needs a conflict id and a resolution".into());
            };
            let resolution = match choice.as_str() {
                "keep-local" => Resolution::KeepLocal,
                "discard" => Resolution::Discard,
                other => return Err(format!("unknown resolution: {other}").into()),
            };
            let outcome = engine.resolve_conflict(id, resolution).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Some(other) => {
            print_help();
            return Err(format!("unknown command: {other}").into());
        }
    }

    Ok(())
}

async fn build_engine(config: &SyncConfig, online: bool) -> Result<Arc<SyncEngine>, SyncError> {
    let path = config
        .database_path()
        .ok_or_else(|| SyncError::InvalidConfig("No database path available".into()))?;
    let opened = open_store(DbConfig::new(path), config.storage.allow_memory_fallback).await?;

    // a one-shot CLI has no platform signal; assume online unless forced
    let connectivity = ConnectivityMonitor::from_config(config, online);
    let remote: Arc<dyn RemoteApi> = if online {
        Arc::new(HttpRemoteApi::from_config(config)?)
    } else {
        Arc::new(DetachedRemote)
    };

    SyncEngineBuilder::new(config.clone())
        .with_store(opened.store, opened.mode)
        .with_remote(remote)
        .with_connectivity(connectivity)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(dir: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::new();
        config.api.base_url = None;
        config.storage.database_path = Some(dir.join("fieldquote.db"));
        config
    }

    #[tokio::test]
    async fn test_read_only_commands_need_no_api() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());

        let engine = build_engine(&config, false).await.unwrap();
        assert!(engine.get_queue_count().await.unwrap().is_idle());
        assert!(engine.conflicts().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_requires_an_api() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());

        let err = build_engine(&config, true).await.err().unwrap();
        assert!(err.is_config_error());
    }
}
