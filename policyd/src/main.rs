use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use policyd::config::{KubeNamespaceSource, NamespaceSource, PlatformConfig};
use policyd::server::{self, TlsFiles};
use policyd::webhook::Topology;
use policyd::{Dispatcher, SharedRegistry, hooks, manifest};

#[derive(Parser, Debug)]
#[command(name = "policyd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "POLICYD_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve admission decisions
    Serve(ServeArgs),

    /// Print webhook configurations as a YAML stream
    Manifests {
        #[arg(long, value_enum, env = "POLICYD_TOPOLOGY")]
        topology: Option<Topology>,
    },

    /// Print policy documentation as JSON
    Docs {
        #[arg(long)]
        hide_rules: bool,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "POLICYD_LISTEN", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    listen: IpAddr,

    #[arg(long, env = "POLICYD_PORT", default_value_t = 5000)]
    port: u16,

    #[arg(long, env = "POLICYD_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "POLICYD_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Seconds between managed-namespace refreshes
    #[arg(long, env = "POLICYD_REFRESH_SECONDS", default_value_t = 300)]
    refresh_seconds: u64,

    /// Only serve webhooks enabled for this control-plane topology
    #[arg(long, value_enum, env = "POLICYD_TOPOLOGY")]
    topology: Option<Topology>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Manifests { topology } => {
            let config = Arc::new(PlatformConfig::fallback()?);
            let registry = hooks::registry(&config, topology)?;
            print!("{}", manifest::render_manifests(&registry)?);
            Ok(())
        }
        Command::Docs { hide_rules } => {
            let config = Arc::new(PlatformConfig::fallback()?);
            let registry = hooks::registry(&config, None)?;
            println!("{}", manifest::render_docs(&registry, hide_rules)?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let addr = SocketAddr::new(args.listen, args.port);
    let tls = args
        .tls_cert
        .zip(args.tls_key)
        .map(|(cert, key)| TlsFiles { cert, key });

    let source: Option<Arc<dyn NamespaceSource>> = match kube::Client::try_default().await {
        Ok(client) => Some(Arc::new(KubeNamespaceSource::new(client))),
        Err(err) => {
            warn!(
                error = %err,
                "no cluster client, serving the fallback configuration without refresh"
            );
            None
        }
    };

    let registry = match &source {
        Some(source) => server::build_registry(source.as_ref(), args.topology).await,
        None => hooks::registry(&Arc::new(PlatformConfig::fallback()?), args.topology),
    }
    .context("failed to register webhooks")?;
    info!(webhooks = registry.len(), topology = ?args.topology, "webhooks registered");

    let registry = SharedRegistry::new(registry);
    let refresh = source.map(|source| {
        tokio::spawn(server::refresh_loop(
            source,
            registry.clone(),
            args.topology,
            Duration::from_secs(args.refresh_seconds.max(1)),
        ))
    });

    let result = server::serve(Dispatcher::new(registry), addr, tls, shutdown_signal()).await;

    if let Some(task) = refresh {
        task.abort();
    }

    result.context("server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutting down");
}
