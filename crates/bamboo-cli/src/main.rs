//! `bamboo-agent`: the single-binary host firewall daemon (§6).
//!
//! Grounded on `cmd/agent/main.go`'s startup sequence: load config, init
//! logging, probe kernel tooling, wire the connector and dataplane
//! workers, then run both to completion under one cancellation signal.

use std::path::PathBuf;

use clap::Parser;

use bamboo_connector::{DatastoreConnector, PolicyClient};
use bamboo_core::model::IpFamily;
use bamboo_core::{cancel::Canceller, config::Config};
use bamboo_dataplane::InternalDataplane;
use bamboo_iptables::version::{self, Capabilities};

/// `--version` output per spec.md:200: version, branch, build date, and
/// organization. Branch/build-date/organization come from `build.rs`.
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbranch: ",
    env!("BAMBOO_BUILD_BRANCH"),
    "\nbuild date: ",
    env!("BAMBOO_BUILD_DATE"),
    "\norganization: ",
    env!("BAMBOO_BUILD_ORG"),
);

#[derive(Parser)]
#[command(name = "bamboo-agent")]
#[command(version = env!("CARGO_PKG_VERSION"), long_version = LONG_VERSION)]
#[command(about = "Bamboo host firewall agent", long_about = None)]
struct Cli {
    /// Path to a YAML or KEY=value config file, overlaid beneath env vars.
    #[arg(long, value_name = "PATH")]
    config_file: Option<PathBuf>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config_file.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal startup error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    init_logging(config.debug);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal startup error: failed to start async runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent exiting with fatal error");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string()),
        ))
        .init();
}

async fn run(config: Config) -> Result<(), bamboo_core::AgentError> {
    use bamboo_core::AgentError;

    tracing::info!(
        api_server = %config.api_server_address,
        tenant_id = config.tenant_id,
        ipv6_support = config.ipv6_support,
        "starting bamboo-agent"
    );

    let v4_capabilities = probe_capabilities(IpFamily::V4)?;
    let v6_capabilities = if config.ipv6_support { Some(probe_capabilities(IpFamily::V6)?) } else { None };

    let canceller = Canceller::new();
    install_signal_handlers(canceller.clone());

    let client = PolicyClient::new(
        config.api_server_address.clone(),
        config.tenant_id,
        config.host_ipv4.clone(),
        config.host_name.clone(),
    );
    client.ping().await.map_err(|e| AgentError::Startup(format!("policy server unreachable: {e}")))?;

    let (dataplane, inbox_tx) = InternalDataplane::new(
        Some(v4_capabilities),
        v6_capabilities,
        config.iptables_lock_seconds_timeout,
        config.dataplane_refresh_interval,
        config.api_server_ipv4.clone(),
        canceller.clone(),
    );

    let connector = DatastoreConnector::new(client, inbox_tx, canceller.clone(), config.datastore_refresh_interval);

    let (dataplane_result, connector_result) = tokio::join!(dataplane.run(), connector.run());
    dataplane_result?;
    connector_result?;
    Ok(())
}

fn probe_capabilities(family: IpFamily) -> Result<Capabilities, bamboo_core::AgentError> {
    let capabilities = version::probe(family)?;
    tracing::info!(
        family = ?family,
        mode = ?capabilities.mode,
        version = %format!(
            "{}.{}.{}",
            capabilities.version.major, capabilities.version.minor, capabilities.version.patch
        ),
        "probed iptables capabilities"
    );
    Ok(capabilities)
}

#[cfg(unix)]
fn install_signal_handlers(canceller: Canceller) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("received shutdown signal");
        canceller.cancel();
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(canceller: Canceller) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        canceller.cancel();
    });
}
