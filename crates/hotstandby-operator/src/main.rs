//! Hot-standby operator entry point

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use hotstandby_operator::{HotStandbyDeployment, OperatorBuilder};
use kube::CustomResourceExt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hotstandby-operator", version, about = "Keeps hot-standby worker pools sized to demand")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "HSD_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the operator
    Run(RunArgs),
    /// Print the CustomResourceDefinition as YAML
    Crd,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Namespace to watch (all namespaces when omitted)
    #[arg(long, env = "HSD_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between periodic reconciles of each resource
    #[arg(long, env = "HSD_RESYNC_SECONDS", default_value_t = 10)]
    resync_seconds: u64,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "HSD_ERROR_REQUEUE_SECONDS", default_value_t = 30)]
    error_requeue_seconds: u64,

    /// Bind address of the health and metrics server
    #[arg(long, env = "HSD_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: SocketAddr,

    /// Install the CRD at startup if it is missing
    #[arg(long, env = "HSD_INSTALL_CRD")]
    install_crd: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&HotStandbyDeployment::crd())?);
        }
        Command::Run(args) => {
            let manager = OperatorBuilder::new()
                .namespace(args.namespace)
                .resync_interval(Duration::from_secs(args.resync_seconds))
                .error_requeue(Duration::from_secs(args.error_requeue_seconds))
                .health_addr(args.health_addr)
                .install_crd(args.install_crd)
                .build()
                .await?;
            manager.run().await?;
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
