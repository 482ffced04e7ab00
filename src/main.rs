//! App Storage - maintenance CLI
//!
//! Inspects and maintains the on-disk cache and prints service summaries.
//! Configuration comes from the environment (see [`Config::from_env`]).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use app_storage::config::Config;
use app_storage::logging::init_tracing;
use app_storage::{CacheCategory, StorageContext};

#[derive(Parser, Debug)]
#[command(name = "app_storage")]
#[command(version, about = "Inspect and maintain local app storage", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-category file counts and sizes
    Stats,
    /// Total payload bytes
    Size,
    /// Delete expired entries
    Expire,
    /// Enforce the size bound, expired entries first then oldest
    Cleanup {
        /// Override CACHE_MAX_SIZE_BYTES
        #[arg(long)]
        max_bytes: Option<u64>,
    },
    /// Empty the cache, or one category of it
    Clear {
        /// images, data or temp
        #[arg(long)]
        category: Option<CacheCategory>,
    },
    /// Auth, user and app summaries
    Summary,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_env();
    init_tracing(&config).context("Failed to initialize logging")?;
    info!(?config, "Configuration loaded");

    let ctx = StorageContext::from_config(&config)
        .await
        .context("Failed to open storage")?;

    match args.command {
        Command::Stats => print_json(&ctx.cache.get_cache_stats().await)?,
        Command::Size => println!("{}", ctx.cache.get_cache_size().await),
        Command::Expire => {
            let removed = ctx.cache.clear_expired_cache().await;
            print_json(&serde_json::json!({ "expired_removed": removed }))?;
        }
        Command::Cleanup { max_bytes } => {
            let report = ctx.cache.cleanup_cache_if_needed(max_bytes).await;
            info!(freed = report.bytes_freed(), "Cleanup finished");
            print_json(&report)?;
        }
        Command::Clear { category: None } => {
            ctx.cache.clear_all_cache().await.context("Failed to clear cache")?;
            print_json(&ctx.cache.get_cache_stats().await)?;
        }
        Command::Clear {
            category: Some(category),
        } => {
            ctx.cache
                .clear_cache_by_type(category)
                .await
                .with_context(|| format!("Failed to clear {} cache", category))?;
            print_json(&ctx.cache.get_cache_stats().await)?;
        }
        Command::Summary => {
            let summary = serde_json::json!({
                "auth": ctx.auth().get_auth_summary().await,
                "user": ctx.user().get_user_summary().await,
                "app": ctx.app().get_app_summary().await,
                "errors": ctx.tracker.stats(),
            });
            print_json(&summary)?;
        }
    }

    Ok(())
}
