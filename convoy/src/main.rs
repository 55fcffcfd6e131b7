//! Multi-role agent coordinator.
//!
//! Each role runs in its own git clone next to a shared `logs/` directory.
//! `convoy run <role>` starts that role's poll loop; the other commands
//! scaffold, inspect and reset the shared state.

use std::path::Path;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use convoy::agents::planner::run_plan;
use convoy::agents::{REGISTRY, RunOptions, Services, Workspace, lookup};
use convoy::core::role::Role;
use convoy::exit_codes;
use convoy::io::activity_log::ActivityLog;
use convoy::io::agent::{CommandAgent, CommandReauth, Reauthenticator};
use convoy::io::clock::ThreadSleeper;
use convoy::io::config::{ConvoyConfig, load_config};
use convoy::io::paths::{InitOptions, ProjectPaths, init_project};
use convoy::io::prereq::{PrerequisiteError, check_prerequisites};
use convoy::logging;
use convoy::status::{collect_status, render_text};

#[derive(Parser)]
#[command(
    name = "convoy",
    version,
    about = "Coordinate LLM agent roles through git and shared markdown files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `logs/`, `convoy.toml` and empty coordination files.
    Init {
        /// Overwrite an existing convoy.toml.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one planner pass that extends the backlog from a brief.
    Plan {
        /// What to build, in plain words.
        brief: String,
    },
    /// Run a role's poll loop from its clone directory.
    Run {
        role: Role,
        /// Run a single poll cycle and exit.
        #[arg(long)]
        once: bool,
        /// Instance number when several builders share one logs root.
        #[arg(long)]
        instance: Option<u32>,
    },
    /// Show milestone progress, backlog, ledger and pending work.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove the builder-done sentinel to start a new cycle.
    Reset,
    /// List the roles `convoy run` accepts.
    Roles,
    /// Check prerequisites (git, agent CLI, work tree).
    Check,
}

/// How a command failed, which decides the exit code.
enum Failure {
    /// Bad config or arguments.
    Invalid(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Failure {
    fn exit_code(&self) -> i32 {
        match self {
            Failure::Invalid(_) => exit_codes::INVALID,
            Failure::Fatal(err) if err.downcast_ref::<PrerequisiteError>().is_some() => {
                exit_codes::ENVIRONMENT
            }
            Failure::Fatal(_) => exit_codes::FATAL,
        }
    }

    fn error(&self) -> &anyhow::Error {
        match self {
            Failure::Invalid(err) | Failure::Fatal(err) => err,
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Fatal(err)
    }
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            std::process::exit(code);
        }
    };
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("convoy: cannot read current directory: {err}");
            std::process::exit(exit_codes::FATAL);
        }
    };

    let activity_role = match &cli.command {
        Command::Run { role, .. } => Some(*role),
        Command::Plan { .. } => Some(Role::Planner),
        _ => None,
    };
    let code = match run(cli, &cwd) {
        Ok(()) => exit_codes::OK,
        Err(failure) => {
            report_fatal(&failure, &cwd, activity_role);
            failure.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli, cwd: &Path) -> Result<(), Failure> {
    match cli.command {
        Command::Init { force } => cmd_init(cwd, force),
        Command::Plan { brief } => cmd_plan(cwd, &brief),
        Command::Run {
            role,
            once,
            instance,
        } => cmd_run(cwd, role, RunOptions { once, instance }),
        Command::Status { json } => cmd_status(cwd, json),
        Command::Reset => cmd_reset(cwd),
        Command::Roles => {
            cmd_roles();
            Ok(())
        }
        Command::Check => cmd_check(cwd),
    }
}

fn cmd_init(cwd: &Path, force: bool) -> Result<(), Failure> {
    let paths = ProjectPaths::resolve(cwd);
    if paths.config_path.exists() && !force {
        return Err(Failure::Invalid(anyhow!(
            "{} already exists (use --force to overwrite)",
            paths.config_path.display()
        )));
    }
    init_project(&paths, InitOptions { force })?;
    println!("initialized {}", paths.root.display());
    Ok(())
}

fn cmd_plan(cwd: &Path, brief: &str) -> Result<(), Failure> {
    if brief.trim().is_empty() {
        return Err(Failure::Invalid(anyhow!("plan brief is empty")));
    }
    let ws = open_workspace(cwd)?;
    check_prerequisites(&ws.config, &ws.paths.workdir)?;
    let outcome = with_services(&ws.config, |services| run_plan(&ws, services, brief))?;
    println!(
        "backlog: {} -> {} stories",
        outcome.stories_before, outcome.stories_after
    );
    for issue in &outcome.issues {
        println!("issue: {issue}");
    }
    Ok(())
}

fn cmd_run(cwd: &Path, role: Role, options: RunOptions) -> Result<(), Failure> {
    let entry = lookup(role).map_err(Failure::Invalid)?;
    let ws = open_workspace(cwd)?;
    check_prerequisites(&ws.config, &ws.paths.workdir)?;
    info!(role = %role, workdir = %ws.paths.workdir.display(), "starting role");
    let outcome = with_services(&ws.config, |services| (entry.run)(&ws, services, &options))?;
    info!(
        role = %role,
        cycles = outcome.cycles,
        processed = outcome.processed,
        failed = outcome.failed,
        stop = ?outcome.stop,
        "role stopped"
    );
    Ok(())
}

fn cmd_status(cwd: &Path, json: bool) -> Result<(), Failure> {
    let ws = open_workspace(cwd)?;
    let report = collect_status(&ws)?;
    if json {
        let payload = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
        println!("{payload}");
    } else {
        print!("{}", render_text(&report));
    }
    Ok(())
}

fn cmd_reset(cwd: &Path) -> Result<(), Failure> {
    let ws = open_workspace(cwd)?;
    if ws.sentinel().clear()? {
        println!("cleared {}", ws.paths.sentinel_path.display());
    } else {
        println!("no sentinel at {}", ws.paths.sentinel_path.display());
    }
    Ok(())
}

fn cmd_roles() {
    for entry in REGISTRY {
        println!("{:<18} {}", entry.role.as_str(), entry.summary);
    }
    println!(
        "{:<18} one-shot: convoy plan <brief>",
        Role::Planner.as_str()
    );
}

fn cmd_check(cwd: &Path) -> Result<(), Failure> {
    let ws = open_workspace(cwd)?;
    check_prerequisites(&ws.config, &ws.paths.workdir)?;
    println!("ok");
    Ok(())
}

/// Load and validate config; config problems are `Invalid`.
fn open_workspace(cwd: &Path) -> Result<Workspace, Failure> {
    let paths = ProjectPaths::resolve(cwd);
    let config = load_config(&paths.config_path).map_err(Failure::Invalid)?;
    config.validate().map_err(Failure::Invalid)?;
    Ok(Workspace::with_config(paths, config)?)
}

fn with_services<T>(
    config: &ConvoyConfig,
    body: impl FnOnce(&Services<'_>) -> Result<T>,
) -> Result<T> {
    let agent = CommandAgent::new(config.agent.command.clone())?;
    let reauth = CommandReauth::from_config(&config.agent.reauth_command);
    if reauth.is_none() {
        warn!("agent.reauth_command not set; auth expiry will not be recovered");
    }
    let sleeper = ThreadSleeper;
    let services = Services {
        agent: &agent,
        reauth: reauth.as_ref().map(|r| r as &dyn Reauthenticator),
        sleeper: &sleeper,
    };
    body(&services)
}

/// Log the failure to stderr, tracing and the role's activity log.
fn report_fatal(failure: &Failure, cwd: &Path, role: Option<Role>) {
    let err = failure.error();
    error!("FATAL: {err:#}");
    eprintln!("convoy: {err:#}");
    if let Some(role) = role {
        let paths = ProjectPaths::resolve(cwd);
        if paths.logs_dir.is_dir() {
            ActivityLog::new(paths.activity_log_path(role), role.as_str())
                .append(&format!("FATAL: {err:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["convoy", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["convoy", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_with_instance() {
        let cli = Cli::parse_from(["convoy", "run", "builder", "--once", "--instance", "2"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                role: Role::Builder,
                once: true,
                instance: Some(2)
            }
        ));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(Cli::try_parse_from(["convoy", "run", "janitor"]).is_err());
    }

    #[test]
    fn prerequisite_failures_map_to_environment_code() {
        let failure = Failure::Fatal(
            PrerequisiteError {
                tool: "git".to_string(),
                hint: "install git".to_string(),
            }
            .into(),
        );
        assert_eq!(failure.exit_code(), exit_codes::ENVIRONMENT);
        assert_eq!(
            Failure::Invalid(anyhow!("bad")).exit_code(),
            exit_codes::INVALID
        );
        assert_eq!(Failure::Fatal(anyhow!("boom")).exit_code(), exit_codes::FATAL);
    }
}
