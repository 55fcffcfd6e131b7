//! Exit codes and output of the `convoy` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use convoy::exit_codes;
use convoy::test_support::TestRepo;

fn convoy(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_convoy"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn convoy")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn roles_lists_the_registry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = convoy(temp.path(), &["roles"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    for role in ["builder", "reviewer", "milestone-watcher", "tester", "validator", "planner"] {
        assert!(text.contains(role), "{role} missing from:\n{text}");
    }
}

#[test]
fn init_scaffolds_shared_root_once() {
    let repo = TestRepo::new().expect("repo");
    let output = convoy(repo.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(repo.root().join("convoy.toml").is_file());
    assert!(repo.root().join("logs").is_dir());
    assert!(repo.path().join("TASKS.md").is_file());
    assert!(repo.path().join("BACKLOG.md").is_file());

    let again = convoy(repo.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    let forced = convoy(repo.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn bad_arguments_are_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let unknown = convoy(temp.path(), &["run", "janitor"]);
    assert_eq!(unknown.status.code(), Some(exit_codes::INVALID));
    let planner = convoy(temp.path(), &["run", "planner"]);
    assert_eq!(planner.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn invalid_config_is_rejected() {
    let repo = TestRepo::new().expect("repo");
    fs::write(repo.root().join("convoy.toml"), "[poll]\ninterval_secs = 0\n").expect("config");
    let output = convoy(repo.path(), &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn missing_agent_is_an_environment_error() {
    let repo = TestRepo::new().expect("repo");
    fs::write(
        repo.root().join("convoy.toml"),
        "[agent]\ncommand = [\"convoy-no-such-agent\"]\n",
    )
    .expect("config");
    let output = convoy(repo.path(), &["check"]);
    assert_eq!(output.status.code(), Some(exit_codes::ENVIRONMENT));
    assert!(String::from_utf8_lossy(&output.stderr).contains("convoy-no-such-agent"));
}

#[test]
fn status_json_and_reset() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("TASKS.md", "## Milestone: Setup\n- [ ] init\n", "chore: tasks")
        .expect("commit");
    assert_eq!(convoy(repo.path(), &["init"]).status.code(), Some(exit_codes::OK));

    let output = convoy(repo.path(), &["status", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json");
    assert_eq!(report["current_milestone"]["name"], "Setup");
    assert_eq!(report["sentinel"], false);
    assert!(report["ledger"].as_array().expect("ledger").is_empty());

    fs::write(repo.root().join("logs").join("builder.done"), "done\n").expect("sentinel");
    let reset = convoy(repo.path(), &["reset"]);
    assert_eq!(reset.status.code(), Some(exit_codes::OK));
    assert!(!repo.root().join("logs").join("builder.done").exists());
}

#[test]
fn single_tester_cycle_with_nothing_to_do() {
    let repo = TestRepo::new().expect("repo");
    fs::write(repo.root().join("convoy.toml"), "[agent]\ncommand = [\"true\"]\n").expect("config");
    let output = convoy(repo.path(), &["run", "tester", "--once"]);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let log = fs::read_to_string(repo.root().join("logs").join("tester.log")).expect("log");
    assert!(log.contains("tester started"));
}
