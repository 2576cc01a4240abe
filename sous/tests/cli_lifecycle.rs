//! End-to-end cycle through the `sous` binary.
//!
//! The tracker is a shell script standing in for `bd`; it logs every call so
//! the test can check what the workflow asked of the tracker.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use sous::exit_codes;
use sous::io::config::{ReviewConfig, SousConfig, TrackerConfig, config_path, write_config};
use sous::test_support::TestRepo;

const FAKE_BD: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
case "$1" in
  ready) echo '[{"id":"bd-1","title":"Add login","priority":1,"status":"open"}]' ;;
  show) echo "{\"id\":\"$2\",\"title\":\"Shown task\"}" ;;
  create) echo '{"id":"bd-50","title":"filed"}' ;;
esac
"#;

const NEEDS_CHANGES_REVIEW: &str = r#"#!/bin/sh
cat > /dev/null
echo "please add tests"
exit 1
"#;

struct Fixture {
    repo: TestRepo,
    tools: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let repo = TestRepo::with_remote().expect("repo");
        let tools = tempfile::tempdir().expect("tools dir");
        fs::write(tools.path().join("bd.sh"), FAKE_BD).expect("write bd");
        fs::write(tools.path().join("review.sh"), NEEDS_CHANGES_REVIEW).expect("write review");

        let config = SousConfig {
            state_dir: Some(repo.state_dir()),
            tracker: TrackerConfig {
                command: vec!["sh".to_string(), script(tools.path(), "bd.sh")],
            },
            review: ReviewConfig {
                command: vec!["sh".to_string(), script(tools.path(), "review.sh")],
            },
            ..SousConfig::default()
        };
        write_config(&config_path(repo.root()), &config).expect("write config");
        repo.git_cmd(&["add", ".sous/config.toml"]).expect("add config");
        repo.git_cmd(&["commit", "-m", "chore: configure sous"])
            .expect("commit config");
        repo.git_cmd(&["push"]).expect("push config");
        Self { repo, tools }
    }

    fn sous(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_sous"))
            .arg("--project")
            .arg(self.repo.root())
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .expect("run sous")
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        let output = self.sous(&full);
        assert_eq!(
            output.status.code(),
            Some(exit_codes::OK),
            "sous {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("json report")
    }

    fn tracker_calls(&self) -> Vec<String> {
        fs::read_to_string(self.tools.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn script(dir: &Path, name: &str) -> String {
    PathBuf::from(dir).join(name).display().to_string()
}

#[test]
fn full_cycle_through_the_binary() {
    let fx = Fixture::new();

    let prep = fx.json(&["prep"]);
    assert_eq!(prep["branch"], "main");
    assert_eq!(prep["synced"], true);
    assert_eq!(prep["ready"][0]["id"], "bd-1");

    let cook = fx.json(&["cook"]);
    assert_eq!(cook["task"]["id"], "bd-1");

    let edit = fx.sous(&["hook", "pre-tool", "Edit"]);
    assert_eq!(edit.status.code(), Some(exit_codes::OK));
    fx.repo
        .write_file("src/login.rs", "pub fn login() {}\n")
        .expect("write");
    let stop = fx.sous(&["hook", "stop"]);
    assert_eq!(stop.status.code(), Some(exit_codes::BLOCKED));

    let find = fx.json(&["find", "task", "document login", "-p", "3"]);
    assert_eq!(find["pending"], 1);

    let serve = fx.json(&["serve"]);
    assert_eq!(serve["verdict"], "needs_changes");
    assert_eq!(serve["notes"][0], "please add tests");
    assert_eq!(serve["finding"]["type"], "improvement");

    let tidy = fx.json(&["tidy"]);
    assert_eq!(tidy["filed"], serde_json::json!(["bd-50", "bd-50"]));
    assert_eq!(tidy["committed"], true);
    assert_eq!(tidy["closed"], "bd-1");

    let status = fx.json(&["status"]);
    assert_eq!(status["session"]["phase"], "idle");
    assert_eq!(status["session"]["findings"], serde_json::json!([]));
    assert_eq!(status["session"]["recently_completed"][0], "bd-1");

    assert_eq!(
        fx.repo.remote_log().expect("remote log")[0],
        "chore: tidy bd-1"
    );
    let stop = fx.sous(&["hook", "stop"]);
    assert_eq!(stop.status.code(), Some(exit_codes::OK));

    let calls = fx.tracker_calls();
    assert_eq!(calls[0], "ready --json");
    assert!(calls.contains(&"update bd-1 --status in_progress".to_string()));
    assert!(calls.contains(&"create document login -t task -p 3 --json".to_string()));
    assert!(calls.contains(&"close bd-1".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("sync"));
}

#[test]
fn quiet_suppresses_report_text() {
    let fx = Fixture::new();
    let output = fx.sous(&["-q", "prep"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(output.stdout.is_empty());
}
