//! pnsindex CLI: run the indexer and manage its cursor.
//!
//! Usage:
//! ```bash
//! pnsindex run
//! pnsindex status
//! pnsindex reset --block 41000000
//! pnsindex info
//! ```
//!
//! Configuration comes from the environment (and `.env`); see
//! `IndexerConfig::from_env`.

mod logging;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use pnsindex_core::config::{defaults, IndexerConfig};
use pnsindex_core::cursor::CursorStore;
use pnsindex_core::store::{KeyValueStore, MirrorStore};
use pnsindex_evm::rpc::{ChainClient, HttpChainClient};
use pnsindex_evm::IndexerService;
use pnsindex_storage::memory::{InMemoryKv, InMemoryMirror};
use pnsindex_storage::postgres::PostgresMirror;
use pnsindex_storage::redis::RedisKv;

use crate::logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run().await,
        "status" => cmd_status().await,
        "reset" => cmd_reset(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("pnsindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("pnsindex {}", env!("CARGO_PKG_VERSION"));
    println!("Naming-service event indexer with reconciliation\n");
    println!("USAGE:");
    println!("    pnsindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run                  Run the watcher, ingestion and reconciliation loops");
    println!("    status               Show cursor, chain head and mirror size");
    println!("    reset --block <N>    Set the cursor to block N");
    println!("    reset --clear        Remove the cursor (restart from PNS_START_BLOCK)");
    println!("    info                 Show defaults and configuration keys");
    println!("    version              Print version");
    println!("    help                 Print this help");
}

fn cmd_info() {
    println!("pnsindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chain: {}", defaults::CHAIN);
    println!("  Default confirmation depth: {} blocks", defaults::CONFIRMATIONS);
    println!(
        "  Default chunk size: {} blocks (floor {})",
        defaults::MAX_CHUNK_SIZE,
        defaults::MIN_CHUNK_SIZE
    );
    println!("  Default blocks per cycle: {}", defaults::MAX_BLOCKS_PER_CYCLE);
    println!("  Default retries per chunk: {}", defaults::MAX_RETRIES);
    println!("  Storage: Redis cursor (REDIS_URL), Postgres mirror (DATABASE_URL), memory fallback");
    println!("  Contracts: PNS_REGISTRY_ADDRESS, PNS_RESOLVER_ADDRESS, PNS_NFT_ADDRESS");
}

fn load_config() -> Result<IndexerConfig> {
    let config = IndexerConfig::from_env().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

async fn open_kv(config: &IndexerConfig) -> Result<Arc<dyn KeyValueStore>> {
    match &config.redis_url {
        Some(url) => Ok(Arc::new(RedisKv::connect(url).await.context("connecting to Redis")?)),
        None => {
            tracing::warn!("REDIS_URL not set; cursor is kept in memory and lost on exit");
            Ok(Arc::new(InMemoryKv::new()))
        }
    }
}

async fn open_mirror(config: &IndexerConfig) -> Result<Arc<dyn MirrorStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(
            PostgresMirror::connect(url, &config.chain)
                .await
                .context("connecting to PostgreSQL")?,
        )),
        None => {
            tracing::warn!("DATABASE_URL not set; mirror is kept in memory and lost on exit");
            Ok(Arc::new(InMemoryMirror::new()))
        }
    }
}

async fn cmd_run() -> Result<()> {
    let config = load_config()?;
    init_tracing(&LogConfig::from_env());

    let client: Arc<dyn ChainClient> =
        Arc::new(HttpChainClient::new(&config.rpc_url, config.request_timeout())?);
    let kv = open_kv(&config).await?;
    let mirror = open_mirror(&config).await?;

    let handle = IndexerService::new(config, client, kv, mirror)?.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!(head = ?handle.latest_head(), "shutdown requested");
    handle.stop().await;
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let kv = open_kv(&config).await?;
    let cursor = CursorStore::new(kv, &config.chain, &config.indexer_id);

    let client = HttpChainClient::new(&config.rpc_url, config.request_timeout())?;
    let head = tokio::time::timeout(config.request_timeout(), client.get_block_number())
        .await
        .map_err(|_| anyhow::anyhow!("timed out fetching chain head"))?
        .context("fetching chain head")?;

    println!("chain:        {}", config.chain);
    println!("indexer:      {}", config.indexer_id);
    println!("cursor key:   {}", cursor.key());
    match cursor.load().await? {
        Some(block) => {
            let safe = head.saturating_sub(config.confirmations);
            println!("cursor:       {block}");
            println!("chain head:   {head}");
            println!("behind safe:  {} blocks", safe.saturating_sub(block));
        }
        None => {
            println!("cursor:       (none, starts at {})", config.start_block);
            println!("chain head:   {head}");
        }
    }

    if config.database_url.is_some() {
        let mirror = open_mirror(&config).await?;
        println!("events:       {}", mirror.event_count().await?);
    }
    Ok(())
}

async fn cmd_reset(args: &[String]) -> Result<()> {
    let target = parse_reset_args(args)?;
    let config = load_config()?;
    if config.redis_url.is_none() {
        bail!("REDIS_URL is not set; there is no persistent cursor to reset");
    }
    let cursor = CursorStore::new(open_kv(&config).await?, &config.chain, &config.indexer_id);

    match target {
        ResetTarget::Block(block) => {
            cursor.reset(block).await?;
            println!("cursor {} set to {block}", cursor.key());
        }
        ResetTarget::Clear => {
            cursor.clear().await?;
            println!("cursor {} cleared", cursor.key());
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ResetTarget {
    Block(u64),
    Clear,
}

fn parse_reset_args(args: &[String]) -> Result<ResetTarget> {
    match args {
        [flag] if flag == "--clear" => Ok(ResetTarget::Clear),
        [flag, block] if flag == "--block" => block
            .parse()
            .map(ResetTarget::Block)
            .with_context(|| format!("invalid block number: {block}")),
        _ => bail!("usage: pnsindex reset --block <N> | --clear"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reset_args() {
        assert_eq!(
            parse_reset_args(&args(&["--block", "123"])).unwrap(),
            ResetTarget::Block(123)
        );
        assert_eq!(parse_reset_args(&args(&["--clear"])).unwrap(), ResetTarget::Clear);
        assert!(parse_reset_args(&args(&["--block", "abc"])).is_err());
        assert!(parse_reset_args(&args(&[])).is_err());
    }
}
