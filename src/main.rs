use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use patchpilot::api::ApiServer;
use patchpilot::bootstrap;
use patchpilot::config::PilotConfig;
use patchpilot::credentials::CredentialRef;
use patchpilot::error::PilotError;
use patchpilot::workflow::{RunDescriptor, RunOutcome, WorkflowEngine};
use std::path::PathBuf;
use tracing::{debug, error, info, trace};

/// Let a coding agent change a repository and open a pull request
#[derive(Parser)]
#[command(name = "patchpilot")]
#[command(about = "Durable AI coding pipeline: sandbox, change, pull request, notify", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and resume interrupted runs
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Execute one run in the foreground and print its final status
    Run {
        /// What the agent should change
        #[arg(long)]
        prompt: String,

        /// Repository URL, e.g. https://github.com/owner/repo
        #[arg(long)]
        repo: String,

        /// Email address to notify when the pull request is open
        #[arg(long)]
        recipient: Option<String>,

        /// Environment variable holding the repository token
        #[arg(long, default_value = "GITHUB_TOKEN")]
        credential_env: String,
    },
    /// Resume a checkpointed run in the foreground
    Resume {
        /// Id of the run to resume
        run_id: String,
    },
    /// List checkpointed runs
    Checkpoints,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("patchpilot started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match PilotConfig::load(cli.config.as_deref()) {
        Ok(config) => run_command(cli.command, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<PilotError>()
            .map(PilotError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run_command(command: Commands, mut config: PilotConfig) -> Result<()> {
    match command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await
        }
        Commands::Run {
            prompt,
            repo,
            recipient,
            credential_env,
        } => {
            let descriptor = RunDescriptor::new(
                &prompt,
                &repo,
                CredentialRef::env(credential_env),
                recipient.as_deref(),
            )?;
            let engine = bootstrap::build(&config)?.engine;
            let run_id = engine.submit(descriptor).await?;
            info!("Started run {}", run_id);
            run_to_end(&engine, &run_id).await
        }
        Commands::Resume { run_id } => {
            let engine = bootstrap::build(&config)?.engine;
            run_to_end(&engine, &run_id).await
        }
        Commands::Checkpoints => list_checkpoints(&config).await,
    }
}

async fn serve(config: PilotConfig) -> Result<()> {
    let addr = config.bind_addr()?;
    let services = bootstrap::build(&config)?;

    let resumed = services.engine.resume_incomplete().await?;
    if !resumed.is_empty() {
        info!("Resumed {} interrupted runs", resumed.len());
    }

    if let Some(ttl) = config.storage.run_ttl {
        services
            .engine
            .spawn_sweeper(ttl, config.storage.sweep_interval);
    }

    ApiServer::new(addr, services.engine, services.credentials)
        .start()
        .await
}

async fn run_to_end(engine: &WorkflowEngine, run_id: &str) -> Result<()> {
    let outcome = engine.execute(run_id).await?;

    let run = engine
        .store()
        .get(run_id)
        .await
        .with_context(|| format!("Run {run_id} has no status document"))?;
    println!("{}", serde_json::to_string_pretty(run.as_ref())?);

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Failed {
            step,
            failure,
            attempts,
        } => bail!(
            "Run {run_id} failed at {step} after {attempts} attempt(s) [{}]: {}",
            failure.kind,
            failure.message
        ),
    }
}

async fn list_checkpoints(config: &PilotConfig) -> Result<()> {
    let engine = bootstrap::build(config)?.engine;
    let checkpoints = engine.checkpoints();

    let ids = checkpoints.list().await?;
    if ids.is_empty() {
        println!(
            "No checkpoints in {}",
            config.storage.checkpoint_dir.display()
        );
        return Ok(());
    }

    for run_id in ids {
        match checkpoints.load(&run_id).await {
            Ok(Some(checkpoint)) => {
                let next = checkpoint
                    .next_step()
                    .map(|step| step.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{run_id}  {:<9}  next: {next:<18}  updated {}",
                    format!("{:?}", checkpoint.status).to_lowercase(),
                    checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(None) => {}
            Err(e) => println!("{run_id}  unreadable: {e}"),
        }
    }
    Ok(())
}
