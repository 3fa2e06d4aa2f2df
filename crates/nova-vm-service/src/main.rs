use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use nova_cdp::{CdpClient, CdpClientConfig};
use nova_config::{NovaConfig, NOVA_CONFIG_ENV_VAR};
use nova_vm_service::compiler::{CommandCompiler, ExpressionCompiler, PassthroughCompiler};
use nova_vm_service::locations::ModuleMetadata;
use nova_vm_service::{wire_server, ProxyService};

/// Nova VM service bridge.
///
/// Serves a VM-service-style debugging protocol on stdio for a program running in a browser
/// runtime reachable through the Chrome DevTools Protocol.
#[derive(Debug, Parser)]
#[command(name = "nova-vm-service", version, about)]
struct Cli {
    /// `host:port` of a `Content-Length` framed CDP endpoint.
    #[arg(long)]
    backend: String,

    /// Module metadata JSON (libraries, sources and location mappings).
    #[arg(long)]
    metadata: PathBuf,

    /// Path to a TOML config file.
    ///
    /// If unset, `NOVA_VM_SERVICE_CONFIG` is used as a fallback. When neither are provided
    /// the service uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    nova_vm_service::hardening::init(&config);

    let metadata = Arc::new(
        ModuleMetadata::load_from_path(&cli.metadata)
            .with_context(|| format!("loading module metadata from {}", cli.metadata.display()))?,
    );

    let addr = tokio::net::lookup_host(&cli.backend)
        .await
        .with_context(|| format!("resolving backend address {}", cli.backend))?
        .next()
        .with_context(|| format!("backend address {} did not resolve", cli.backend))?;
    let client = CdpClient::connect_with_config(
        addr,
        CdpClientConfig {
            reply_timeout: config.backend.reply_timeout(),
            event_channel_size: config.backend.event_channel_size,
        },
    )
    .await
    .with_context(|| format!("connecting to backend at {addr}"))?;

    let compiler: Arc<dyn ExpressionCompiler> = match config
        .compiler
        .command
        .as_deref()
        .and_then(|command| CommandCompiler::new(command, config.compiler.timeout()))
    {
        Some(compiler) => Arc::new(compiler),
        None => Arc::new(PassthroughCompiler),
    };

    let service = ProxyService::new(
        client,
        metadata.clone(),
        metadata,
        compiler,
        config.service.clone(),
    );
    service.start().await.context("attaching to backend")?;

    let result = wire_server::run_stdio(service.clone()).await;
    service.shutdown();
    result
}

fn load_config(cli_path: Option<PathBuf>) -> NovaConfig {
    let path = cli_path.or_else(|| std::env::var_os(NOVA_CONFIG_ENV_VAR).map(PathBuf::from));
    let Some(path) = path else {
        return NovaConfig::default();
    };

    match NovaConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "nova-vm-service: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            NovaConfig::default()
        }
    }
}
