// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! mefcached — concurrent chunk cache and prefetch server for MEF3
//! recordings.
//!
//! Usage:
//!   mefcached serve --config config.toml
//!   mefcached check-config --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mefcached::config::Config;
use mefcached::decoder::fake::FakeDecoder;
use mefcached::decoder::native::NativeMef3Decoder;
use mefcached::decoder::RawDecoder;
use mefcached::manager::FileManager;
use mefcached::rpc;

#[derive(Parser)]
#[command(name = "mefcached", about = "MEF3 chunk cache and prefetch server", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the RPC server.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit.
    CheckConfig {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await,
        Command::CheckConfig { config } => run_check_config(config),
    }
}

fn init_tracing(cfg: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_filter_str())),
        )
        .init();
}

async fn run_serve(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&cfg);

    info!(
        bind_addr = %cfg.bind_addr,
        port = cfg.port,
        n_prefetch = cfg.n_prefetch,
        cache_capacity = cfg.cache_capacity(),
        max_workers = cfg.max_workers,
        "starting mefcached"
    );

    let raw_decoder: Arc<dyn RawDecoder> = match &cfg.decoder_library_path {
        Some(path) => match NativeMef3Decoder::load(path) {
            Ok(d) => Arc::new(d),
            Err(e) => {
                error!(error = %e, path = ?path, "failed to load native decoder");
                std::process::exit(1);
            }
        },
        None => {
            info!("no decoder_library_path configured, running with the in-memory test decoder");
            Arc::new(FakeDecoder::new())
        }
    };

    let manager = Arc::new(FileManager::new(&cfg, raw_decoder));
    let bind_addr = cfg.bind_addr.clone();
    let port = cfg.port;

    let server = tokio::spawn(async move {
        if let Err(e) = rpc::serve(manager, &bind_addr, port).await {
            error!(error = %e, "RPC server exited with an error");
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!(error = %e, "signal error"),
    }
    server.abort();
}

fn run_check_config(config_path: PathBuf) {
    match Config::from_file(&config_path) {
        Ok(cfg) => {
            println!("config OK: {} (port {})", config_path.display(), cfg.port);
        }
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    }
}
