//! One milestone travels through every role, each in its own clone of a
//! shared bare remote, coordinating only through git and the logs root.

use std::fs;

use convoy::agents::{RunOptions, Services, builder, milestone, reviewer};
use convoy::core::types::StoryStatus;
use convoy::io::agent::AgentRun;
use convoy::io::ledger::MilestoneLedger;
use convoy::looping::LoopStop;
use convoy::test_support::{RecordingSleeper, ScriptedAgent, TestRepo, workspace_for};

const ONCE: RunOptions = RunOptions {
    once: true,
    instance: None,
};

#[test]
fn milestone_flows_from_builder_to_downstream_roles() {
    let repo = TestRepo::with_remote().expect("repo");
    repo.commit_file("BACKLOG.md", "1. [ ] Greeting\n", "plan: backlog")
        .expect("commit");
    let sleeper = RecordingSleeper::new();

    // Builder: claim and plan, build, then record the boundary.
    let builder_ws = workspace_for(repo.path()).expect("builder workspace");
    let builder_agent = ScriptedAgent::new(Vec::new());
    let tasks = repo.path().join("TASKS.md");
    let plan_tasks = tasks.clone();
    builder_agent.push_action(move |_| {
        fs::write(&plan_tasks, "## Milestone: Greeting\n- [ ] print hello\n").expect("plan");
        AgentRun::success()
    });
    let src = repo.path().join("src");
    builder_agent.push_action(move |_| {
        fs::create_dir_all(&src).expect("src");
        fs::write(src.join("main.rs"), "fn main() { println!(\"hello\"); }\n").expect("code");
        fs::write(&tasks, "## Milestone: Greeting\n- [x] print hello\n").expect("tasks");
        AgentRun::success()
    });
    let builder_services = Services {
        agent: &builder_agent,
        reauth: None,
        sleeper: &sleeper,
    };
    for _ in 0..3 {
        builder::run(&builder_ws, &builder_services, &ONCE).expect("builder cycle");
    }
    let ledger = MilestoneLedger::new(&builder_ws.paths.ledger_path).load();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].name, "Greeting");

    // Tester files a bug from its own clone.
    let tester_clone = repo.clone_remote("tester").expect("tester clone");
    let tester_ws = workspace_for(tester_clone.path()).expect("tester workspace");
    assert_eq!(tester_ws.paths.ledger_path, builder_ws.paths.ledger_path);
    let bugs = tester_clone.path().join("BUGS.md");
    let tester_agent = ScriptedAgent::new(Vec::new());
    tester_agent.push_action(move |_| {
        fs::write(&bugs, "- [ ] [Greeting] missing trailing newline\n").expect("bugs");
        AgentRun::success()
    });
    let tester_services = Services {
        agent: &tester_agent,
        reauth: None,
        sleeper: &sleeper,
    };
    milestone::run_tester(&tester_ws, &tester_services, &ONCE).expect("tester cycle");
    assert_eq!(tester_agent.requests().len(), 1);

    // Milestone watcher and validator find nothing to report.
    for (name, run) in [
        ("milestone-watcher", milestone::run_milestone_watcher as convoy::agents::RoleHandler),
        ("validator", milestone::run_validator),
    ] {
        let clone = repo.clone_remote(name).expect("clone");
        let ws = workspace_for(clone.path()).expect("workspace");
        let agent = ScriptedAgent::new(Vec::new());
        let services = Services {
            agent: &agent,
            reauth: None,
            sleeper: &sleeper,
        };
        run(&ws, &services, &ONCE).expect("cycle");
        assert_eq!(agent.requests().len(), 1, "{name}");
    }

    // Builder pulls the bug, fixes it, and with everyone caught up finishes.
    let bugs = repo.path().join("BUGS.md");
    builder_agent.push_action(move |request| {
        assert!(request.prompt.contains("BUGS.md"));
        fs::write(&bugs, "- [x] [Greeting] missing trailing newline\n").expect("fix");
        AgentRun::success()
    });
    builder::run(&builder_ws, &builder_services, &ONCE).expect("fix cycle");
    let outcome = builder::run(&builder_ws, &builder_services, &ONCE).expect("final cycle");
    assert_eq!(outcome.stop, LoopStop::WorkerFinished);
    assert!(builder_ws.sentinel().exists());
    let stories = builder_ws.artifacts.stories().expect("stories");
    assert_eq!(stories[0].status, StoryStatus::Done);

    // The commit reviewer drains everything published and stops on the sentinel.
    let reviewer_clone = repo.clone_remote("reviewer").expect("reviewer clone");
    let reviewer_ws = workspace_for(reviewer_clone.path()).expect("reviewer workspace");
    let reviewer_agent = ScriptedAgent::new(Vec::new());
    let reviewer_services = Services {
        agent: &reviewer_agent,
        reauth: None,
        sleeper: &sleeper,
    };
    let outcome = reviewer::run(&reviewer_ws, &reviewer_services, &RunOptions::default())
        .expect("reviewer");
    assert_eq!(outcome.stop, LoopStop::Drained);
    let prompts: Vec<String> = reviewer_agent
        .requests()
        .into_iter()
        .map(|request| request.prompt)
        .collect();
    assert!(prompts.iter().any(|p| p.contains("build: Greeting")));
    assert!(!prompts.iter().any(|p| p.contains("chore: claim story 1")));
}
