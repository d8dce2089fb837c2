use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use token_transfer_watcher::blockchain::{ChainSource, MonitorSettings, RpcClient, TransferWatcher};
use token_transfer_watcher::config::AppConfig;
use token_transfer_watcher::error::WatcherError;
use token_transfer_watcher::logging::{init_logging, log_file_paths, ErrorLogger, LogContext};
use token_transfer_watcher::notifier::Notifier;

#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watch an ERC-20 token for transfers to and from an address")]
#[command(version)]
struct Args {
    /// Environment file loaded before reading configuration
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Report transfers from the last N blocks before going live
    #[arg(long)]
    history_blocks: Option<u64>,

    /// Maximum number of historical transfers to report
    #[arg(long, default_value_t = 10)]
    history_limit: usize,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        if !e.not_found() {
            eprintln!("Failed to read {}: {}", args.env_file, e);
            return ExitCode::FAILURE;
        }
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.check_config {
        print_config_summary(&config);
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    if config.logging.file_enabled {
        let paths: Vec<String> = log_file_paths(&config.logging.dir)
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        info!("Writing logs to {}", paths.join(", "));
    }

    match run(config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ErrorLogger::log_error(&e, Some(LogContext::new("main", "run")));
            error!("Watcher failed to start: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig, args: &Args) -> Result<(), WatcherError> {
    let client = RpcClient::new(config.watch.rpc_url.clone(), config.rpc.timeout_seconds)?;
    let source: Arc<dyn ChainSource> = Arc::new(client);

    let mut watcher = TransferWatcher::new(
        Arc::new(config.watch),
        Arc::clone(&source),
        Arc::new(Notifier::new()),
        Some(MonitorSettings::from(&config.rpc)),
    );

    watcher.initialize().await?;

    if let Some(blocks) = args.history_blocks {
        let head = source.latest_block_number().await?;
        if let Some((from_block, to_block)) = history_range(head, blocks) {
            info!("Querying transfers in blocks {}..={}", from_block, to_block);
            if let Err(e) = watcher.query_history(from_block, to_block, args.history_limit).await {
                warn!("Historical query failed, continuing with live monitoring: {}", e);
            }
        }
    }

    watcher.start().await?;
    info!("Watching for transfers, press Ctrl+C to stop");

    shutdown_signal().await;
    watcher.stop().await;
    info!("Shutdown complete");
    Ok(())
}

/// Inclusive block range covering the last `blocks` blocks up to `head`
fn history_range(head: u64, blocks: u64) -> Option<(u64, u64)> {
    if blocks == 0 {
        return None;
    }
    Some((head.saturating_sub(blocks - 1), head))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn print_config_summary(config: &AppConfig) {
    let watch = &config.watch;
    println!("Configuration OK");
    println!("  RPC URL:          {}", watch.rpc_url);
    println!("  Token contract:   {}", watch.contract_address);
    match &watch.watch_address {
        Some(address) => println!("  Watch address:    {} ({:?})", address, watch.mode),
        None => println!("  Watch address:    none (all transfers)"),
    }
    if let Some(threshold) = watch.min_token_amount {
        println!("  Token threshold:  {}", threshold);
    }
    if watch.monitor_eth {
        match watch.min_eth_amount {
            Some(threshold) => println!("  ETH monitoring:   on, threshold {}", threshold),
            None => println!("  ETH monitoring:   on"),
        }
    }
    println!("  Token decimals:   {}", watch.token_decimals);
    println!("  Poll interval:    {} ms", config.rpc.poll_interval_ms);
}
