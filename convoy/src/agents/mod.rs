//! Role drivers and the role registration table.
//!
//! Each long-running role is a [`PollWorker`](crate::looping::PollWorker)
//! driven by [`run_poll_loop`](crate::looping::run_poll_loop). The planner is
//! a one-shot pass invoked by `convoy plan`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::role::Role;
use crate::io::activity_log::ActivityLog;
use crate::io::agent::{Agent, AgentRequest, AgentRun, Reauthenticator, run_agent};
use crate::io::artifacts::Artifacts;
use crate::io::clock::Sleeper;
use crate::io::config::{ConvoyConfig, load_config};
use crate::io::git::Git;
use crate::io::paths::ProjectPaths;
use crate::io::prompt::PromptEngine;
use crate::io::sentinel::{BuilderDone, Sentinel};
use crate::io::sync::{SyncOutcome, commit_and_push};
use crate::looping::{LoopOutcome, LoopSettings};

pub mod builder;
pub mod milestone;
pub mod planner;
pub mod reviewer;

/// Everything a role needs to know about its clone and the shared logs root.
pub struct Workspace {
    pub paths: ProjectPaths,
    pub config: ConvoyConfig,
    pub git: Git,
    pub artifacts: Artifacts,
    pub prompts: PromptEngine,
}

impl Workspace {
    /// Resolve paths from `cwd` and load `convoy.toml` from the logs root.
    pub fn open(cwd: &Path) -> Result<Self> {
        let paths = ProjectPaths::resolve(cwd);
        let config = load_config(&paths.config_path)?;
        Self::with_config(paths, config)
    }

    pub fn with_config(paths: ProjectPaths, config: ConvoyConfig) -> Result<Self> {
        let git = Git::new(&paths.workdir).with_timeouts(
            std::time::Duration::from_secs(config.poll.git_timeout_secs),
            std::time::Duration::from_secs(config.poll.git_network_timeout_secs),
        );
        let artifacts = Artifacts::new(&paths.workdir, config.artifacts.clone());
        let prompts = PromptEngine::new(config.artifacts.clone()).context("build prompt engine")?;
        Ok(Self {
            paths,
            config,
            git,
            artifacts,
            prompts,
        })
    }

    pub fn sentinel(&self) -> Sentinel {
        Sentinel::new(&self.paths.sentinel_path)
    }

    /// Sentinel present, or builder log and transcript both quiet past
    /// `poll.builder_stale_secs`.
    pub fn builder_done(&self) -> BuilderDone {
        BuilderDone::new(
            self.sentinel(),
            self.paths.activity_log_path(Role::Builder),
            self.config.builder_stale_after(),
        )
        .with_liveness_file(self.paths.transcript_path(Role::Builder))
    }

    pub fn activity_log(&self, role: Role, label: &str) -> ActivityLog {
        ActivityLog::new(self.paths.activity_log_path(role), label)
    }

    pub fn loop_settings(&self, options: &RunOptions) -> LoopSettings {
        LoopSettings {
            interval: self.config.poll_interval(),
            max_cycles: options.once.then_some(1),
        }
    }
}

/// External collaborators, injected so tests can script them.
pub struct Services<'a> {
    pub agent: &'a dyn Agent,
    pub reauth: Option<&'a dyn Reauthenticator>,
    pub sleeper: &'a dyn Sleeper,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run a single poll cycle.
    pub once: bool,
    /// Distinguishes several builders sharing one logs root.
    pub instance: Option<u32>,
}

impl RunOptions {
    pub fn label(&self, role: Role) -> String {
        match self.instance {
            Some(n) => format!("{role}-{n}"),
            None => role.to_string(),
        }
    }
}

pub type RoleHandler = fn(&Workspace, &Services<'_>, &RunOptions) -> Result<LoopOutcome>;

/// A long-running role and the loop that drives it.
pub struct RoleEntry {
    pub role: Role,
    pub summary: &'static str,
    pub run: RoleHandler,
}

/// Every role `convoy run` can start, in pipeline order.
pub static REGISTRY: &[RoleEntry] = &[
    RoleEntry {
        role: Role::Builder,
        summary: "claims stories, builds milestones, records boundaries",
        run: builder::run,
    },
    RoleEntry {
        role: Role::Reviewer,
        summary: "reviews each non-coordination commit",
        run: reviewer::run,
    },
    RoleEntry {
        role: Role::MilestoneWatcher,
        summary: "reviews each completed milestone as a whole",
        run: milestone::run_milestone_watcher,
    },
    RoleEntry {
        role: Role::Tester,
        summary: "tests each completed milestone",
        run: milestone::run_tester,
    },
    RoleEntry {
        role: Role::Validator,
        summary: "validates each completed milestone end to end",
        run: milestone::run_validator,
    },
];

pub fn lookup(role: Role) -> Result<&'static RoleEntry> {
    REGISTRY.iter().find(|entry| entry.role == role).ok_or_else(|| {
        anyhow!("role '{role}' has no poll loop; the planner runs via `convoy plan <brief>`")
    })
}

/// Run one agent pass for `role` with the recovery policy applied.
pub(crate) fn invoke_agent(
    ws: &Workspace,
    services: &Services<'_>,
    role: Role,
    prompt: String,
) -> Result<AgentRun> {
    let request = AgentRequest {
        role,
        workdir: ws.paths.workdir.clone(),
        prompt,
        transcript_path: Some(ws.paths.transcript_path(role)),
        idle_timeout: ws.config.idle_timeout(),
    };
    run_agent(services.agent, services.reauth, &request)
}

/// Fail with a readable message when an agent pass did not succeed.
pub(crate) fn ensure_succeeded(run: &AgentRun, what: &str) -> Result<()> {
    if run.succeeded() {
        return Ok(());
    }
    let last = run.lines.last().map(String::as_str).unwrap_or("");
    Err(anyhow!(
        "{what}: agent failed (exit {:?}, idle_killed={}, auth_expired={}) {last}",
        run.exit_code,
        run.idle_killed,
        run.auth_expired
    ))
}

pub(crate) fn publish(
    ws: &Workspace,
    services: &Services<'_>,
    message: &str,
) -> Result<SyncOutcome> {
    commit_and_push(
        &ws.git,
        message,
        &ws.config.retry_policy(),
        services.sleeper,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_looping_role_once() {
        for role in Role::ALL {
            let matches = REGISTRY.iter().filter(|entry| entry.role == role).count();
            let expected = usize::from(role != Role::Planner);
            assert_eq!(matches, expected, "{role}");
        }
        assert!(lookup(Role::Planner).is_err());
        assert_eq!(lookup(Role::Tester).expect("tester").role, Role::Tester);
    }

    #[test]
    fn instance_label() {
        let options = RunOptions {
            once: false,
            instance: Some(2),
        };
        assert_eq!(options.label(Role::Builder), "builder-2");
        assert_eq!(RunOptions::default().label(Role::Reviewer), "reviewer");
    }

    #[test]
    fn streaming_builder_pass_is_not_mistaken_for_a_dead_builder() {
        use crate::io::agent::CommandAgent;
        use crate::io::clock::RecordingSleeper;
        use crate::io::sentinel::DoneSignal;
        use crate::test_support::{TestRepo, workspace_for};
        use std::fs;
        use std::time::SystemTime;

        let repo = TestRepo::new().expect("repo");
        let ws = workspace_for(repo.path()).expect("workspace");
        let log = ws.paths.activity_log_path(Role::Builder);
        ws.activity_log(Role::Builder, "builder").append("building milestone API");
        let quiet_for = ws.config.builder_stale_after() + std::time::Duration::from_secs(60);
        let quiet_since = SystemTime::now() - quiet_for;
        fs::File::options()
            .write(true)
            .open(&log)
            .expect("open log")
            .set_modified(quiet_since)
            .expect("backdate log");
        assert!(ws.builder_done().is_done());

        let agent = CommandAgent::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "for i in 1 2 3; do echo still working $i; done".to_string(),
        ])
        .expect("agent");
        let sleeper = RecordingSleeper::new();
        let services = Services {
            agent: &agent,
            reauth: None,
            sleeper: &sleeper,
        };
        let run = invoke_agent(&ws, &services, Role::Builder, "build API".to_string())
            .expect("invoke");
        assert!(run.succeeded());
        assert!(!ws.builder_done().is_done());
    }
}
