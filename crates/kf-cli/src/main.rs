//! kftray CLI
//!
//! Thin client for the kftray orchestrator daemon:
//! - Start and stop port forwards by config id
//! - Audit and clean up proxy resources in the cluster
//! - Manage stored configurations

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kftray::commands;
use kftray::ipc::{OrchestratorClient, DEFAULT_IPC_PORT};
use kftray::output::{print_error, print_info, print_success, print_warning};

#[derive(Parser)]
#[command(name = "kftray")]
#[command(author, version, about = "Kubernetes port-forward manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Orchestrator IPC port on localhost
    #[arg(short, long, global = true, env = "KFTRAY_IPC_PORT", default_value_t = DEFAULT_IPC_PORT)]
    port: u16,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Cluster scope shared by the cluster-facing commands
#[derive(Args)]
struct ClusterArgs {
    /// Kubeconfig context (defaults to the current context)
    #[arg(long)]
    context: Option<String>,

    /// Path to a kubeconfig file
    #[arg(long)]
    kubeconfig: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start port forwards for stored configs
    Start {
        /// Config ids to start
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        ids: Vec<i64>,
        /// Start every stored config
        #[arg(long)]
        all: bool,
    },

    /// Stop running port forwards
    Stop {
        /// Config ids to stop
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        ids: Vec<i64>,
        /// Stop every running forward
        #[arg(long)]
        all: bool,
    },

    /// Show orchestrator status and active forwards
    Status,

    /// Inspect and clean up kftray resources in the cluster
    Resources {
        #[command(subcommand)]
        action: ResourcesAction,
    },

    /// Manage stored configurations
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List kubeconfig contexts
    Contexts {
        /// Path to a kubeconfig file
        #[arg(long)]
        kubeconfig: Option<String>,
    },

    /// List namespaces in a context
    Namespaces {
        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Stop the orchestrator daemon
    Shutdown,
}

#[derive(Subcommand)]
enum ResourcesAction {
    /// List pods, deployments and services created by kftray
    List {
        #[command(flatten)]
        cluster: ClusterArgs,
        /// Only show resources no running forward owns
        #[arg(long)]
        orphaned: bool,
    },
    /// Delete one resource
    Delete {
        #[command(flatten)]
        cluster: ClusterArgs,
        /// Namespace of the resource
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// pod, deployment or service
        #[arg(short = 't', long = "type", default_value = "pod")]
        resource_type: String,
        /// Resource name
        name: String,
    },
    /// Delete every orphaned resource
    Cleanup {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List stored configs
    List,
    /// Show one config as JSON
    Show { id: i64 },
    /// Import configs from a JSON file
    Import { file: PathBuf },
    /// Export configs as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored config
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut client = OrchestratorClient::with_address(format!("127.0.0.1:{}", cli.port));

    match cli.command {
        Commands::Start { ids, all } => {
            commands::start_command(&mut client, &ids, all).await?;
        }

        Commands::Stop { ids, all } => {
            commands::stop_command(&mut client, &ids, all).await?;
        }

        Commands::Status => {
            commands::status_command(&mut client).await?;
        }

        Commands::Resources { action } => match action {
            ResourcesAction::List { cluster, orphaned } => {
                commands::resources_list(&mut client, cluster.context, cluster.kubeconfig, orphaned)
                    .await?;
            }
            ResourcesAction::Delete {
                cluster,
                namespace,
                resource_type,
                name,
            } => {
                commands::resources_delete(
                    &mut client,
                    cluster.context,
                    cluster.kubeconfig,
                    namespace,
                    resource_type,
                    name,
                )
                .await?;
            }
            ResourcesAction::Cleanup { cluster } => {
                commands::resources_cleanup(&mut client, cluster.context, cluster.kubeconfig)
                    .await?;
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::List => commands::config_list(&mut client).await?,
            ConfigAction::Show { id } => commands::config_show(&mut client, id).await?,
            ConfigAction::Import { file } => commands::config_import(&mut client, &file).await?,
            ConfigAction::Export { output } => {
                commands::config_export(&mut client, output.as_deref()).await?
            }
            ConfigAction::Delete { id } => commands::config_delete(&mut client, id).await?,
        },

        Commands::Contexts { kubeconfig } => {
            commands::contexts_command(&mut client, kubeconfig).await?;
        }

        Commands::Namespaces { cluster } => {
            commands::namespaces_command(&mut client, cluster.context, cluster.kubeconfig)
                .await?;
        }

        Commands::Shutdown => {
            print_info("Stopping orchestrator...");
            match client.shutdown().await {
                Ok(()) => print_success("Orchestrator stopped"),
                Err(e) => {
                    // Connection refused likely means it's not running
                    if e.to_string().contains("Is it running") {
                        print_warning("Orchestrator is not running");
                    } else {
                        print_error(&format!("Failed to stop orchestrator: {}", e));
                        return Err(e);
                    }
                }
            }
        }
    }

    Ok(())
}
