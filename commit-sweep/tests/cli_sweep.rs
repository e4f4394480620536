//! CLI tests for `commit-sweep`.
//!
//! Spawns the binary against scratch repositories and checks exit codes,
//! the JSON plan, and the resulting history.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

use commit_sweep::exit_codes;
use commit_sweep::io::lock::{LockHandle, LockSettings};
use commit_sweep::io::signal::CancelToken;
use commit_sweep::test_support::TestRepo;

const CONFIG: &str = "[tracker]\nenabled = false\n\n[lock]\ntimeout_secs = 1\nretry_interval_ms = 50\n";

struct Sweep {
    config_dir: tempfile::TempDir,
}

impl Sweep {
    fn new() -> Self {
        let config_dir = tempfile::tempdir().expect("tempdir");
        fs::write(config_dir.path().join("sweep.toml"), CONFIG).expect("config");
        Self { config_dir }
    }

    fn config_path(&self) -> String {
        self.config_dir
            .path()
            .join("sweep.toml")
            .display()
            .to_string()
    }

    fn plan_path(&self) -> String {
        self.config_dir.path().join("plan.json").display().to_string()
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_commit-sweep"))
            .current_dir(dir)
            .arg("--config")
            .arg(self.config_path())
            .args(args)
            .env("RUST_LOG", "off")
            .output()
            .expect("run commit-sweep")
    }

    fn json(&self, dir: &Path, args: &[&str]) -> (i32, Value) {
        let mut all = vec!["--json"];
        all.extend_from_slice(args);
        let out = self.run(dir, &all);
        let plan = serde_json::from_slice(&out.stdout).unwrap_or_else(|err| {
            panic!(
                "plan json: {err}\nstdout: {}\nstderr: {}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            )
        });
        (out.status.code().expect("exit code"), plan)
    }
}

fn messages(plan: &Value, repo: usize) -> Vec<String> {
    plan["repos"][repo]["groups"]
        .as_array()
        .expect("groups")
        .iter()
        .map(|group| group["message"].as_str().expect("message").to_string())
        .collect()
}

const REJECT_ALL_HOOK: &str = "#!/bin/sh\necho 'rejected by policy' >&2\nexit 1\n";

const REJECT_DOCS_HOOK: &str = "#!/bin/sh\n\
    if git diff --cached --name-only | grep -q '^docs/'; then\n\
    \texit 1\n\
    fi\n\
    exit 0\n";

/// Sends SIGINT to the commit-sweep process that (indirectly) runs the hook.
const INTERRUPT_SWEEP_HOOK: &str = r#"#!/bin/sh
pid=$PPID
while [ "${pid:-1}" -gt 1 ]; do
  if [ -r "/proc/$pid/comm" ]; then
    name=$(cat "/proc/$pid/comm")
    parent=$(awk '/^PPid:/ {print $2}' "/proc/$pid/status")
  else
    name=$(basename "$(ps -o comm= -p "$pid")")
    parent=$(ps -o ppid= -p "$pid" | tr -d ' ')
  fi
  if [ "$name" = "commit-sweep" ]; then
    kill -INT "$pid"
    exit 0
  fi
  pid=$parent
done
exit 0
"#;

#[test]
fn clean_repository_is_a_no_op() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::OK);
    assert_eq!(plan["repos"][0]["groups"].as_array().map(Vec::len), Some(0));
    assert_eq!(plan["repos"][0]["status"], "completed");
    assert_eq!(repo.commit_count().expect("count"), 1);
}

#[test]
fn scenario_a_modified_file_on_task_branch() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("lib/session.sh", "echo 1\n").expect("commit");
    repo.checkout_new_branch("feature/br-123").expect("branch");
    repo.write("lib/session.sh", "echo 2\n").expect("write");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::OK);
    let group = &plan["repos"][0]["groups"][0];
    assert_eq!(group["type"], "fix");
    assert_eq!(group["scope"], "lib");
    assert_eq!(group["confidence"]["level"], "high");
    assert_eq!(
        repo.last_subject().expect("subject"),
        "fix(lib): update session.sh (br-123)"
    );
    assert!(repo.status_porcelain().expect("status").is_empty());
}

#[test]
fn scenario_b_test_merges_into_source_group() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("lib/foo.sh", "echo 1\n").expect("commit");
    repo.write("lib/foo.sh", "echo 2\n").expect("write");
    repo.write("lib/foo_test.sh", "echo test\n").expect("write");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::OK);
    let groups = plan["repos"][0]["groups"].as_array().expect("groups");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["type"], "fix");
    assert_eq!(groups[0]["scope"], "lib");
    assert_eq!(repo.commit_count().expect("count"), 3);
}

#[test]
fn scenario_c_deleted_root_file() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("old.py", "print(1)\n").expect("commit");
    repo.remove("old.py").expect("remove");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::OK);
    assert_eq!(plan["repos"][0]["groups"][0]["type"], "chore");
    assert_eq!(plan["repos"][0]["groups"][0]["scope"], "root");
    assert_eq!(repo.last_subject().expect("subject"), "chore(root): remove old.py");
    assert!(!repo.run_git(&["ls-files"]).expect("ls").contains("old.py"));
}

#[test]
fn scenario_d_atomic_repos_rolls_back_every_repository() {
    let sweep = Sweep::new();
    let first = TestRepo::new().expect("repo");
    let second = TestRepo::new().expect("repo");
    let first_before = first.git().head().expect("head");
    let second_before = second.git().head().expect("head");
    first.write("src/app.rs", "fn main() {}\n").expect("write");
    second.write("src/lib.rs", "pub fn f() {}\n").expect("write");
    second.install_hook("pre-commit", REJECT_ALL_HOOK).expect("hook");

    let first_path = first.path().display().to_string();
    let second_path = second.path().display().to_string();
    let (code, plan) = sweep.json(
        first.path(),
        &["--execute", "--atomic-repos", &first_path, &second_path],
    );

    assert_eq!(code, exit_codes::PARTIAL);
    assert_eq!(first.git().head().expect("head"), first_before);
    assert_eq!(second.git().head().expect("head"), second_before);
    assert_eq!(plan["repos"][0]["status"], "failed");
    assert_eq!(plan["repos"][1]["status"], "failed");
    assert!(plan["repos"][0]["groups"][0].get("commit").is_none());
    assert_eq!(plan["summary"]["groups_executed"], 0);
    assert!(first.path().join("src/app.rs").exists());
}

#[test]
fn planning_is_deterministic() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/a.rs", "a\n").expect("write");
    repo.write("src/a_test.rs", "t\n").expect("write");
    repo.write("docs/guide.md", "# g\n").expect("write");
    repo.write(".github/ci.yml", "on: push\n").expect("write");

    let (_, first) = sweep.json(repo.path(), &[]);
    let (_, second) = sweep.json(repo.path(), &[]);
    assert_eq!(first["repos"][0]["groups"], second["repos"][0]["groups"]);
    assert_eq!(messages(&first, 0).len(), 3);
}

#[test]
fn saved_plan_executes_like_a_direct_run() {
    let sweep = Sweep::new();
    let frozen = TestRepo::new().expect("repo");
    let direct = TestRepo::new().expect("repo");
    for repo in [&frozen, &direct] {
        repo.write("src/app.rs", "fn main() {}\n").expect("write");
        repo.write("docs/guide.md", "# guide\n").expect("write");
    }

    let plan_path = sweep.plan_path();
    let saved = sweep.run(frozen.path(), &["--save-plan", &plan_path]);
    assert_eq!(saved.status.code(), Some(exit_codes::OK));
    let executed = sweep.run(frozen.path(), &["--execute-plan", &plan_path]);
    assert_eq!(
        executed.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&executed.stderr)
    );
    let direct_run = sweep.run(direct.path(), &["--execute"]);
    assert_eq!(direct_run.status.code(), Some(exit_codes::OK));

    assert_eq!(
        frozen.subjects(2).expect("log"),
        direct.subjects(2).expect("log")
    );
}

#[test]
fn plan_saved_inside_the_repository_round_trips() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");

    let saved = sweep.run(repo.path(), &["--save-plan", "plan.json"]);
    assert_eq!(saved.status.code(), Some(exit_codes::OK));
    assert!(repo.path().join("plan.json").exists());

    let (code, plan) = sweep.json(repo.path(), &["--execute-plan", "plan.json"]);
    assert_eq!(code, exit_codes::OK, "{plan}");
    assert_eq!(plan["repos"][0]["status"], "completed");
    assert_eq!(plan["repos"][0]["groups"][0]["files"][0], "src/app.rs");
    assert_eq!(repo.last_subject().expect("subject"), "feat(src): add app.rs");
    assert_eq!(repo.status_porcelain().expect("status"), "?? plan.json");
}

#[test]
fn tampered_plan_is_rejected() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let plan_path = sweep.plan_path();
    sweep.run(repo.path(), &["--save-plan", &plan_path]);

    let contents = fs::read_to_string(&plan_path).expect("read");
    fs::write(&plan_path, contents.replace("add app.rs", "add evil.rs")).expect("write");

    let out = sweep.run(repo.path(), &["--execute-plan", &plan_path]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert_eq!(repo.commit_count().expect("count"), 1);
}

#[test]
fn diverged_tree_fails_closed() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let plan_path = sweep.plan_path();
    sweep.run(repo.path(), &["--save-plan", &plan_path]);

    repo.write("src/app.rs", "fn main() { changed() }\n").expect("write");
    let (code, plan) = sweep.json(repo.path(), &["--execute-plan", &plan_path]);
    assert_eq!(code, exit_codes::PREFLIGHT);
    assert_eq!(plan["repos"][0]["status"], "failed");
    assert_eq!(repo.commit_count().expect("count"), 1);
}

#[test]
fn failing_group_leaves_partial_run_that_needs_resume() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    repo.write("docs/guide.md", "# guide\n").expect("write");
    repo.install_hook("pre-commit", REJECT_DOCS_HOOK).expect("hook");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::PARTIAL);
    assert_eq!(plan["repos"][0]["status"], "partial");
    assert!(plan["repos"][0]["groups"][0]["commit"].is_string());
    assert_eq!(plan["summary"]["groups_failed"], 1);
    assert_eq!(repo.last_subject().expect("subject"), "feat(src): add app.rs");
    assert!(repo.git().staged_paths().expect("staged").is_empty());

    let refused = sweep.run(repo.path(), &["--execute"]);
    assert_eq!(refused.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&refused.stderr).contains("--resume"));

    let dry = sweep.run(repo.path(), &[]);
    assert_eq!(dry.status.code(), Some(exit_codes::OK));

    fs::remove_file(repo.git_dir().join("hooks/pre-commit")).expect("remove hook");
    let (code, _) = sweep.json(repo.path(), &["--execute", "--resume"]);
    assert_eq!(code, exit_codes::OK);
    assert_eq!(
        repo.subjects(2).expect("log"),
        vec!["docs(docs): add guide.md", "feat(src): add app.rs"]
    );
}

#[test]
fn restart_discards_the_partial_sweep() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    let before = repo.git().head().expect("head");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    repo.write("docs/guide.md", "# guide\n").expect("write");
    repo.install_hook("pre-commit", REJECT_DOCS_HOOK).expect("hook");
    let (code, _) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::PARTIAL);
    assert_eq!(repo.commit_count().expect("count"), 2);

    fs::remove_file(repo.git_dir().join("hooks/pre-commit")).expect("remove hook");
    let (code, plan) = sweep.json(repo.path(), &["--execute", "--restart"]);
    assert_eq!(code, exit_codes::OK);
    let warnings = plan["repos"][0]["warnings"].to_string();
    assert!(warnings.contains("restarted: rolled back sweep"), "{warnings}");
    assert_eq!(
        repo.subjects(2).expect("log"),
        vec!["docs(docs): add guide.md", "feat(src): add app.rs"]
    );
    let base = repo.run_git(&["rev-parse", "HEAD~2"]).expect("rev-parse");
    assert_eq!(Some(base.trim().to_string()), before);
    assert!(!repo.git_dir().join("commit-sweep/state.json").exists());
}

#[cfg(unix)]
#[test]
fn interrupt_after_a_commit_restores_the_checkpoint() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    let before = repo.git().head().expect("head");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    repo.write("docs/guide.md", "# guide\n").expect("write");
    repo.install_hook("pre-commit", INTERRUPT_SWEEP_HOOK).expect("hook");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::INTERRUPTED);
    assert_eq!(plan["repos"][0]["status"], "interrupted");
    assert_eq!(repo.git().head().expect("head"), before);
    assert!(repo.path().join("src/app.rs").exists());

    let state = fs::read_to_string(repo.git_dir().join("commit-sweep/state.json")).expect("state");
    assert!(state.contains("\"interrupted\""));
    let refused = sweep.run(repo.path(), &["--execute"]);
    assert_eq!(refused.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn unmerged_paths_skip_the_repository() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("lib/a.sh", "base\n").expect("commit");
    repo.write("lib/a.sh", "stashed\n").expect("write");
    repo.run_git(&["stash", "-q"]).expect("stash");
    repo.commit_file("lib/a.sh", "upstream\n").expect("commit");
    assert!(repo.run_git(&["stash", "pop", "-q"]).is_err());
    let before = repo.commit_count().expect("count");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::PREFLIGHT);
    assert_eq!(plan["repos"][0]["status"], "skipped_conflict");
    assert!(plan["repos"][0]["groups"].as_array().expect("groups").is_empty());
    assert!(
        plan["repos"][0]["errors"][0]
            .as_str()
            .expect("error")
            .contains("lib/a.sh")
    );
    assert_eq!(repo.commit_count().expect("count"), before);
}

#[test]
fn atomic_repos_preflight_failure_touches_no_repository() {
    let sweep = Sweep::new();
    let first = TestRepo::new().expect("repo");
    let second = TestRepo::new().expect("repo");
    first.write("src/app.rs", "fn main() {}\n").expect("write");
    second.write("src/lib.rs", "pub fn f() {}\n").expect("write");
    let head = second.git().head().expect("head").expect("born");
    fs::write(second.git_dir().join("MERGE_HEAD"), format!("{head}\n")).expect("merge head");

    let first_path = first.path().display().to_string();
    let second_path = second.path().display().to_string();
    let (code, plan) = sweep.json(
        first.path(),
        &["--execute", "--atomic-repos", &first_path, &second_path],
    );

    assert_eq!(code, exit_codes::PREFLIGHT);
    assert_eq!(plan["repos"][0]["status"], "failed");
    assert!(
        plan["repos"][0]["errors"][0]
            .as_str()
            .expect("error")
            .starts_with("not executed")
    );
    assert_eq!(first.commit_count().expect("count"), 1);
    assert_eq!(second.commit_count().expect("count"), 1);
    assert!(!first.git_dir().join("commit-sweep/checkpoint.json").exists());
    assert!(first.status_porcelain().expect("status").contains("src/app.rs"));
}

#[test]
fn held_lock_times_out_with_dependency_code() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let target = repo.target().expect("target");
    let _held = LockHandle::acquire(
        &target.paths.lock_path,
        &LockSettings::default(),
        &CancelToken::new(),
    )
    .expect("lock");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::DEPENDENCY);
    let error = plan["repos"][0]["errors"][0].as_str().expect("error");
    assert!(error.contains("timed out"));
    assert_eq!(repo.commit_count().expect("count"), 1);
}

#[test]
fn undo_rewinds_the_last_sweep() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let before = repo.git().head().expect("head");
    assert_eq!(
        sweep.run(repo.path(), &["--execute"]).status.code(),
        Some(exit_codes::OK)
    );
    assert_eq!(repo.commit_count().expect("count"), 2);

    let out = sweep.run(repo.path(), &["--undo"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(repo.git().head().expect("head"), before);
    assert!(repo.status_porcelain().expect("status").contains("src/app.rs"));

    let again = sweep.run(repo.path(), &["--undo"]);
    assert_eq!(again.status.code(), Some(exit_codes::PARTIAL));
}

#[test]
fn merge_in_progress_blocks_the_repository() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let head = repo.git().head().expect("head").expect("born");
    fs::write(repo.git_dir().join("MERGE_HEAD"), format!("{head}\n")).expect("merge head");

    let (code, plan) = sweep.json(repo.path(), &["--execute"]);
    assert_eq!(code, exit_codes::PREFLIGHT);
    assert!(
        plan["repos"][0]["errors"][0]
            .as_str()
            .expect("error")
            .contains("merge in progress")
    );
    assert_eq!(repo.commit_count().expect("count"), 1);
}

#[test]
fn argument_errors_exit_with_invalid_code() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    let conflicting = sweep.run(repo.path(), &["--execute", "--dry-run"]);
    assert_eq!(conflicting.status.code(), Some(exit_codes::INVALID));
    let ignored_rollback = sweep.run(repo.path(), &["--atomic-repos"]);
    assert_eq!(ignored_rollback.status.code(), Some(exit_codes::INVALID));
    let unknown = sweep.run(repo.path(), &["--frobnicate"]);
    assert_eq!(unknown.status.code(), Some(exit_codes::INVALID));
    let help = sweep.run(repo.path(), &["--help"]);
    assert_eq!(help.status.code(), Some(exit_codes::OK));

    let temp = tempfile::tempdir().expect("tempdir");
    let not_a_repo = sweep.run(temp.path(), &[]);
    assert_eq!(not_a_repo.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn text_report_is_key_value_lines() {
    let sweep = Sweep::new();
    let repo = TestRepo::new().expect("repo");
    repo.write("src/app.rs", "fn main() {}\n").expect("write");
    let out = sweep.run(repo.path(), &[]);
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("run_id="));
    assert!(text.contains("status=planned"));
    assert!(text.contains("message=\"feat(src): add app.rs\""));
    assert!(text.trim_end().ends_with("exit_code=0"));
}
