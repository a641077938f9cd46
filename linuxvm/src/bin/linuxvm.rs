//! linuxvm command line.

use clap::{Args, Parser, Subcommand};
use linuxvm::{
    CancelScope, LimitPolicy, LinuxvmResult, LoggingOptions, Orchestrator, RuntimeOptions,
    VmOptions, init_logging,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "linuxvm")]
#[command(about = "Run a Linux shell in a lightweight VM", long_about = None)]
struct Cli {
    #[command(flatten)]
    runtime: RuntimeArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RuntimeArgs {
    /// gvproxy binary (default: next to this executable, then PATH)
    #[arg(long, global = true, env = "LINUXVM_GVPROXY")]
    gvproxy: Option<PathBuf>,

    /// VM runtime shim binary
    #[arg(long, global = true, env = "LINUXVM_SHIM")]
    shim: Option<PathBuf>,

    /// Bootstrap binary copied into the rootfs
    #[arg(long, global = true, env = "LINUXVM_BOOTSTRAP")]
    bootstrap: Option<PathBuf>,

    /// Parent directory for the ephemeral workspace
    #[arg(long, global = true, env = "LINUXVM_TMPDIR")]
    tmpdir: Option<PathBuf>,

    /// Keep the workspace after exit
    #[arg(long, global = true, env = "LINUXVM_KEEP_WORKSPACE")]
    keep_workspace: bool,

    /// Continue if the open-file limit cannot be raised
    #[arg(long, global = true)]
    allow_rlimit_failure: bool,

    /// Also write logs to this directory
    #[arg(long, global = true, env = "LINUXVM_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a VM from a rootfs directory and run a command in it
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Rootfs path, e.g. /var/lib/libkrun/rootfs/alpine-3.15.0
    #[arg(long)]
    rootfs: PathBuf,

    /// Number of CPU cores
    #[arg(long, default_value_t = 1)]
    cpus: u8,

    /// Memory in MB
    #[arg(long, default_value_t = 512)]
    memory: u32,

    /// Environment for the guest command (KEY=VALUE), repeatable
    #[arg(long = "envs", value_name = "KEY=VALUE")]
    envs: Vec<String>,

    /// Data disk image, mapped to /dev/vdX in order, repeatable
    #[arg(long = "data-disk", value_name = "PATH")]
    data_disk: Vec<PathBuf>,

    /// Share a host directory (HOST:GUEST[:ro]), repeatable
    #[arg(long, value_name = "HOST:GUEST")]
    mount: Vec<String>,

    /// Command to run in the guest
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl RuntimeArgs {
    fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            gvproxy_path: self.gvproxy.clone(),
            shim_path: self.shim.clone(),
            bootstrap_path: self.bootstrap.clone(),
            temp_root: self.tmpdir.clone(),
            keep_workspace: self.keep_workspace,
            limit_policy: if self.allow_rlimit_failure {
                LimitPolicy::BestEffort
            } else {
                LimitPolicy::Strict
            },
        }
    }
}

impl From<RunArgs> for VmOptions {
    fn from(args: RunArgs) -> Self {
        VmOptions {
            rootfs: args.rootfs,
            cpus: Some(args.cpus),
            memory_mib: Some(args.memory),
            env: args.envs,
            data_disks: args.data_disk,
            mounts: args.mount,
            command: args.command,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(&LoggingOptions {
        log_dir: cli.runtime.log_dir.clone(),
        default_filter: None,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("linuxvm: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        drop(guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> LinuxvmResult<()> {
    let runtime = cli.runtime.runtime_options();

    match cli.command {
        Commands::Run(args) => {
            let options = VmOptions::from(args);

            let scope = CancelScope::new();
            cancel_on_signal(scope.clone());

            let report = Orchestrator::from_runtime(runtime)
                .run(options, scope)
                .await?;
            tracing::debug!(run_id = %report.run_id, "Exiting");
        }
    }

    Ok(())
}

/// Cancel `scope` on SIGINT or SIGTERM.
fn cancel_on_signal(scope: CancelScope) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT"),
            _ = terminate => tracing::info!("Received SIGTERM"),
        }

        scope.cancel();
    });
}
