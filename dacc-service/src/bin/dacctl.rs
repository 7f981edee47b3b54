// SPDX-License-Identifier: GPL-3.0-only

//! Job scheduler integration for the data accelerator
//!
//! Called once per burst buffer phase. Output that the scheduler parses is
//! JSON on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use dacc_registry::build_registries;
use dacc_service::store::connect_shared_keystore;
use dacc_service::workflow::parse_host_list;
use dacc_service::{
    BrickAllocator, BufferRequest, ServiceConfig, SessionFacade, SessionWorkflow, logging,
};
use dacc_types::{Capacity, JobRequest, Session};

#[derive(Parser)]
#[command(name = "dacctl")]
#[command(about = "Burst buffer commands for the job scheduler", long_about = None)]
struct Cli {
    /// TOML configuration file (also read from DACC_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// List pools with their granularity and free bricks
    Pools,
    /// List buffer instances
    ShowInstances,
    /// List buffer sessions
    ShowSessions,
    /// List configurations (always empty)
    ShowConfigurations,
    /// Validate the burst buffer directives of a job script
    JobProcess {
        #[arg(long)]
        job: PathBuf,
    },
    /// Create the per job buffer
    Setup {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
        /// Caller, e.g. SLURM
        #[arg(long)]
        caller: String,
        #[arg(long)]
        user: u32,
        #[arg(long)]
        groupid: u32,
        /// Pool and size, e.g. dwcache:1GiB
        #[arg(long)]
        capacity: Capacity,
    },
    /// Create a buffer that outlives any one job
    CreatePersistent {
        #[arg(long)]
        token: String,
        #[arg(long)]
        caller: String,
        #[arg(long)]
        capacity: Capacity,
        #[arg(long)]
        user: u32,
        #[arg(long)]
        groupid: Option<u32>,
        #[arg(long, default_value = "striped")]
        access: String,
        #[arg(long = "type", default_value = "scratch")]
        buffer_type: String,
    },
    /// Report the granted buffer size
    RealSize {
        #[arg(long)]
        token: String,
    },
    /// Write the job's buffer environment to a file
    Paths {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
        #[arg(long)]
        pathfile: PathBuf,
    },
    /// Stage data into the buffer
    DataIn {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
    },
    /// Mount the buffer on the job's compute hosts
    PreRun {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
        #[arg(long)]
        nodehostnamefile: PathBuf,
    },
    /// Unmount the buffer from the compute hosts
    PostRun {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
    },
    /// Stage data out of the buffer
    DataOut {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
    },
    /// Delete the buffer
    Teardown {
        #[arg(long)]
        token: String,
        #[arg(long)]
        job: PathBuf,
        /// Skip copying data out
        #[arg(long)]
        hurry: bool,
    },
}

/// Slurm passes the subcommand as `--function <name>`
fn scheduler_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .filter_map(|arg| match arg.strip_prefix("--function=") {
            Some(name) => Some(name.to_string()),
            None if arg == "--function" => None,
            None => Some(arg),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::DEFAULT_FILTER);
    let cli = Cli::parse_from(scheduler_args(std::env::args()));

    if let Err(e) = run(cli).await {
        tracing::error!("dacctl failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_job(path: &Path) -> Result<JobRequest> {
    let script = std::fs::read_to_string(path)
        .with_context(|| format!("reading job script {}", path.display()))?;
    JobRequest::parse(&script)
}

fn instance_json(session: &Session) -> serde_json::Value {
    json!({
        "id": session.name,
        "capacity": {
            "bytes": session.actual_size_bytes,
            "nodes": session.allocated_bricks.len(),
        },
        "links": { "session": session.name },
    })
}

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "id": session.name,
        "created": session.created_at,
        "owner": session.owner,
        "token": session.name,
        "state": session.state,
    })
}

async fn run(cli: Cli) -> Result<()> {
    // these need no store
    match &cli.command {
        Commands::ShowConfigurations => return print_json(&json!({ "configurations": [] })),
        Commands::JobProcess { job } => {
            let request = read_job(job)?;
            tracing::info!(job = %job.display(), request = ?request, "job script valid");
            return Ok(());
        }
        _ => {}
    }

    let config = ServiceConfig::load(cli.config.as_deref())?;
    let keystore = connect_shared_keystore(&config.store).await?;
    let registries = build_registries(keystore, config.registry_options());
    let facade = Arc::new(SessionFacade::new(
        registries.sessions.clone(),
        registries.pools.clone(),
        registries.actions.clone(),
        Arc::new(BrickAllocator::new()),
        config.timeouts(),
    ));
    let workflow = SessionWorkflow::new(
        facade,
        registries.sessions.clone(),
        registries.volumes.clone(),
        registries.pools.clone(),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::ShowConfigurations | Commands::JobProcess { .. } => {}
        Commands::Pools => {
            let pools = workflow.pools().await?;
            print_json(&json!({ "pools": pools }))?;
        }
        Commands::ShowInstances => {
            let sessions = workflow.sessions().await?;
            let instances: Vec<_> = sessions.iter().map(instance_json).collect();
            print_json(&json!({ "instances": instances }))?;
        }
        Commands::ShowSessions => {
            let sessions = workflow.sessions().await?;
            let sessions: Vec<_> = sessions.iter().map(session_json).collect();
            print_json(&json!({ "sessions": sessions }))?;
        }
        Commands::Setup {
            token,
            job,
            caller,
            user,
            groupid,
            capacity,
        } => {
            let directives = read_job(&job)?;
            let request = BufferRequest {
                token,
                capacity,
                caller,
                user,
                group: groupid,
                job_file: job.display().to_string(),
                access: directives.access_mode,
                buffer_type: directives.buffer_type,
                persistent: false,
            };
            let session = workflow.setup(request, &cancel).await?;
            tracing::info!(session = %session.name, bytes = session.actual_size_bytes, "buffer created");
        }
        Commands::CreatePersistent {
            token,
            caller,
            capacity,
            user,
            groupid,
            access,
            buffer_type,
        } => {
            let request = BufferRequest {
                token,
                capacity,
                caller,
                user,
                group: groupid.unwrap_or(user),
                job_file: String::new(),
                access,
                buffer_type,
                persistent: true,
            };
            let session = workflow.setup(request, &cancel).await?;
            println!("created {}", session.name);
        }
        Commands::RealSize { token } => {
            let size = workflow.real_size(&token).await?;
            print_json(&serde_json::to_value(size)?)?;
        }
        Commands::Paths {
            token, pathfile, ..
        } => {
            let lines = workflow.paths(&token).await?;
            let mut contents = lines.join("\n");
            contents.push('\n');
            std::fs::write(&pathfile, contents)
                .with_context(|| format!("writing {}", pathfile.display()))?;
        }
        Commands::DataIn { token, .. } => {
            workflow.data_in(&token).await?;
        }
        Commands::PreRun {
            token,
            nodehostnamefile,
            ..
        } => {
            let contents = std::fs::read_to_string(&nodehostnamefile)
                .with_context(|| format!("reading {}", nodehostnamefile.display()))?;
            workflow.pre_run(&token, &parse_host_list(&contents)).await?;
        }
        Commands::PostRun { token, .. } => {
            workflow.post_run(&token).await?;
        }
        Commands::DataOut { token, .. } => {
            workflow.data_out(&token).await?;
        }
        Commands::Teardown { token, hurry, .. } => {
            workflow.teardown(&token, hurry, &cancel).await?;
        }
    }
    Ok(())
}
