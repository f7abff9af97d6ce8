//! Native wallet host.
//!
//! A long-running local process bridging three worlds: an AI agent speaking
//! MCP over HTTP/SSE, a browser extension speaking Chrome Native Messaging
//! over stdio, and the chain RPC endpoints of Ethereum, BSC, and Solana.
//!
//! # Usage
//!
//! ```bash
//! # Default config (arca.toml in the working directory, defaults otherwise)
//! arca-host
//!
//! # Custom config path and verbose logs
//! CONFIG=/path/to/arca.toml RUST_LOG=debug arca-host
//!
//! # Deterministic mock adapters for integration tests
//! RUN_MODE=test arca-host
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — path to the TOML configuration file (default: `arca.toml`)
//! - `HOST` / `PORT` — override the MCP listener address
//! - `ARCA_DATA_DIR` — override the keystore directory
//! - `RUN_MODE` — `test` selects mock chain adapters
//! - `RUST_LOG` — log filter (default: `info`); logs go to standard error
//!   because standard output belongs to the native messaging framing

mod shutdown;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use arca::adapter::ChainAdapter;
use arca::adapter::mock::MockChainAdapter;
use arca::broadcast::Broadcaster;
use arca::chain::ChainRef;
use arca::config::{HostConfig, RunMode};
use arca::dispatch::Dispatcher;
use arca::keystore::Keystore;
use arca::monitor::ConfirmationMonitor;
use arca::pending::PendingTxStore;
use arca_keystore::FileKeystore;
use arca_native::NativeTransport;

use crate::shutdown::HostShutdown;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Stdout carries native messaging frames; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        tracing::error!("host failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), arca::HostError> {
    // Startup order: config, keystore (locked), chain adapters, pending
    // store, broadcaster, transports.
    let config = HostConfig::load()?;
    let run_mode = RunMode::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        test_mode = run_mode.is_test(),
        "configuration loaded"
    );

    let keystore: Arc<dyn Keystore> = Arc::new(FileKeystore::open(
        config.data_dir.clone(),
        config.min_password_len,
    )?);

    let chains = build_adapters(&config, run_mode, &keystore);
    let broadcaster = Arc::new(Broadcaster::new());
    let pending = Arc::new(PendingTxStore::new(Arc::clone(&broadcaster)));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&keystore),
        chains.clone(),
        Arc::clone(&pending),
        Arc::clone(&broadcaster),
        run_mode,
        Duration::from_secs(config.tool_timeout_secs),
    ));

    let shutdown = HostShutdown::install(Arc::clone(&keystore), Duration::from_secs(5))
        .map_err(|e| arca::HostError::internal(format!("cannot install signal handlers: {e}")))?;
    let token = shutdown.token();

    // Background confirmation polling stays off in test mode so the state
    // machine can be driven deterministically.
    if !run_mode.is_test() {
        let monitor = ConfirmationMonitor::new(
            Arc::clone(&pending),
            chains.clone(),
            Arc::clone(&broadcaster),
        );
        let monitor_token = token.clone();
        shutdown.spawn("confirmation-monitor", async move {
            monitor.run(monitor_token).await;
            Ok(())
        });
    }

    let mcp_state = arca_mcp::http::AppState::new(
        Arc::clone(&dispatcher),
        arca_mcp::default_registry(),
        Duration::from_secs(config.resource_timeout_secs),
    );
    let addr = SocketAddr::new(config.host, config.port);
    shutdown.spawn("mcp", arca_mcp::http::serve(addr, mcp_state, token.clone()));

    let native = NativeTransport::new(Arc::clone(&dispatcher));
    shutdown.spawn("native-messaging", native.run(token.clone()));

    tracing::info!("wallet host started");
    shutdown.run_to_completion().await;
    tracing::info!("wallet host shut down");
    Ok(())
}

fn build_adapters(
    config: &HostConfig,
    run_mode: RunMode,
    keystore: &Arc<dyn Keystore>,
) -> HashMap<ChainRef, Arc<dyn ChainAdapter>> {
    let mut chains: HashMap<ChainRef, Arc<dyn ChainAdapter>> = HashMap::new();
    for chain in ChainRef::ALL {
        let adapter: Arc<dyn ChainAdapter> = if run_mode.is_test() {
            Arc::new(MockChainAdapter::new(chain))
        } else {
            let settings = config.chain_settings(chain);
            match chain {
                ChainRef::Ethereum | ChainRef::Bsc => Arc::new(arca_evm::EvmAdapter::new(
                    chain,
                    &settings,
                    Arc::clone(keystore),
                )),
                ChainRef::Solana => {
                    Arc::new(arca_svm::SolanaAdapter::new(&settings, Arc::clone(keystore)))
                }
            }
        };
        tracing::info!(chain = %chain, test_mode = run_mode.is_test(), "chain adapter ready");
        chains.insert(chain, adapter);
    }
    chains
}
