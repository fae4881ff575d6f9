use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tool_version_manager::config::ServiceConfig;
use tool_version_manager::logging::{LogOptions, init_logging};
use tool_version_manager::schedule::events::{EventData, EventFilter, VersionEvent};
use tool_version_manager::service::VersionService;
use tool_version_manager::update::command::get_update_command;
use tool_version_manager::update::executor::ShellExecutor;
use tool_version_manager::update::status::UpdateProgress;
use tool_version_manager::update::updater::UpdateOptions;
use tool_version_manager::version::checker::CheckOptions;
use tool_version_manager::version::sources::npm::{DEFAULT_BASE_URL, NpmRegistrySource};
use tool_version_manager::version::types::VersionInfo;

#[derive(Parser)]
#[command(name = "tool-version-manager")]
#[command(version, about = "Check, schedule and apply updates for developer tools")]
struct Cli {
    /// Service configuration file (JSON, camelCase keys)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// npm registry used to resolve latest versions
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    registry: String,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show installed and latest versions
    Check {
        #[arg(required = true)]
        tools: Vec<String>,
        /// Bypass the cache
        #[arg(long)]
        force: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a tool, to the latest version unless one is given
    Update {
        tool: String,
        #[arg(long)]
        version: Option<String>,
        /// Skip the pre-update backup
        #[arg(long)]
        no_backup: bool,
    },
    /// Print the command that would install a tool
    Command {
        tool: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Check tools periodically and print events until interrupted
    Watch {
        #[arg(required = true)]
        tools: Vec<String>,
        /// Seconds between checks of each tool
        #[arg(long, default_value_t = 3600)]
        interval: u64,
        /// Update automatically when a newer version is found
        #[arg(long)]
        auto_update: bool,
    },
    /// List or prune backups of a tool
    Backups {
        tool: String,
        /// Keep only this many newest backups
        #[arg(long)]
        clean: Option<usize>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServiceConfig> {
    let Some(path) = path else {
        return Ok(ServiceConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn print_info(info: &VersionInfo) {
    let current = info.current_version.as_deref().unwrap_or("-");
    let latest = info.latest_version.as_deref().unwrap_or("-");
    let note = match (info.installed, info.update_available) {
        (false, _) => "not installed",
        (true, true) => "update available",
        (true, false) => "up to date",
    };
    println!("{:<20} {:<12} {:<12} {}", info.tool, current, latest, note);
}

fn print_event(event: &VersionEvent) {
    let detail = match &event.data {
        Some(EventData::Info(info)) => format!(
            "{} -> {}",
            info.current_version.as_deref().unwrap_or("-"),
            info.latest_version.as_deref().unwrap_or("-")
        ),
        Some(EventData::Update {
            current_version,
            target_version,
        }) => format!(
            "{} -> {}",
            current_version.as_deref().unwrap_or("-"),
            target_version
        ),
        Some(EventData::Progress(progress)) => {
            format!("{:>3}% {}", progress.progress, progress.message)
        }
        Some(EventData::Error { message }) => message.clone(),
        None => String::new(),
    };
    println!(
        "{} {:<16} {:<20} {}",
        event.timestamp.format("%H:%M:%S"),
        event.kind.as_str(),
        event.tool,
        detail
    );
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let service = VersionService::new(
        config,
        Arc::new(NpmRegistrySource::new(&cli.registry)),
        Arc::new(ShellExecutor::new()),
    )?;

    match cli.command {
        Command::Check { tools, force, json } => {
            let options = CheckOptions {
                force,
                ..CheckOptions::default()
            };
            let result = service.batch_check(tools.as_slice(), &options).await;

            if json {
                let mut infos: Vec<_> = result.results.values().collect();
                infos.sort_by(|a, b| a.tool.cmp(&b.tool));
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                for tool in &tools {
                    if let Some(info) = result.results.get(tool) {
                        print_info(info);
                    }
                }
            }
            for (tool, error) in &result.errors {
                eprintln!("{tool}: {error}");
            }
            if !result.errors.is_empty() {
                anyhow::bail!("{} of {} checks failed", result.errors.len(), tools.len());
            }
        }
        Command::Update {
            tool,
            version,
            no_backup,
        } => {
            let options = UpdateOptions {
                backup: !no_backup,
                on_progress: Some(Arc::new(|progress: &UpdateProgress| {
                    println!("[{:>3}%] {}", progress.progress, progress.message);
                })),
                ..UpdateOptions::default()
            };
            let installed = service
                .update_tool(&tool, version.as_deref(), options)
                .await?;
            println!("{tool} is now at {installed}");
        }
        Command::Command { tool, version } => {
            println!("{}", get_update_command(&tool, version.as_deref()));
        }
        Command::Watch {
            tools,
            interval,
            auto_update,
        } => {
            let mut events = service.subscribe(EventFilter::All);
            for tool in &tools {
                service.schedule_check(tool, Duration::from_secs(interval), auto_update)?;
            }
            service.start_scheduler();
            service.check_all_scheduled().await;

            loop {
                tokio::select! {
                    Some(event) = events.recv() => print_event(&event),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            service.stop_scheduler();
        }
        Command::Backups { tool, clean } => {
            if let Some(keep) = clean {
                let removed = service.clean_backups(&tool, keep).await?;
                println!("Removed {removed} backups of {tool}");
            }
            for record in service.list_backups(&tool).await? {
                println!(
                    "{}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.backup_path.display()
                );
            }
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&LogOptions {
        stderr: cli.log_stderr,
        json: cli.log_json,
        ..LogOptions::default()
    })?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}
