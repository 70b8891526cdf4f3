use std::io::Write;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile, TempDir};

use dagstack::config::{load_and_validate, load_or_default};
use dagstack::engine::ExecutionOptions;
use dagstack::errors::DagstackError;
use dagstack::plan::load_plan;
use dagstack::types::{BranchCollisionPolicy, Complexity, ConflictStrategy, ExecutionMode, ExecutionStrategy};

#[test]
fn loads_json_plan_by_default() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
  "name": "auth split",
  "strategy": "serial",
  "tasks": [
    {{ "id": "A", "name": "Extract trait", "description": "Pull the trait out.",
      "files": ["src/auth.rs"], "acceptanceCriteria": ["compiles"], "complexity": "small" }},
    {{ "id": "B", "name": "Port callers", "dependencies": ["A"], "maxRetries": 1,
      "produces": ["src/api/new.rs"] }}
  ]
}}"#
    )
    .unwrap();

    let plan = load_plan(file.path()).unwrap();

    assert_eq!(plan.name, "auth split");
    assert_eq!(plan.strategy, ExecutionStrategy::Serial);
    let a = plan.task("A").unwrap();
    assert_eq!(a.title, "Extract trait");
    assert_eq!(a.instructions, "Pull the trait out.");
    assert_eq!(a.touches, vec!["src/auth.rs"]);
    assert_eq!(a.complexity, Complexity::Small);
    let b = plan.task("B").unwrap();
    assert_eq!(b.max_retries, 1);
    assert_eq!(b.claimed_files(), vec!["src/api/new.rs"]);
    assert_eq!(a.max_retries, 3);
}

#[test]
fn loads_toml_plan_by_extension() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
name = "toml plan"

[[tasks]]
id = "A"
name = "first"

[[tasks]]
id = "B"
name = "second"
dependencies = ["A"]
"#
    )
    .unwrap();

    let plan = load_plan(file.path()).unwrap();
    assert_eq!(plan.tasks.len(), 2);
    assert_eq!(plan.strategy, ExecutionStrategy::Parallel);
}

#[test]
fn malformed_plan_is_a_json_error() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{{ not json").unwrap();

    let err = load_plan(file.path()).unwrap_err();
    assert!(matches!(err, DagstackError::JsonError(_)), "{err:?}");
}

#[test]
fn missing_plan_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_plan(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, DagstackError::IoError(_)), "{err:?}");
}

#[test]
fn config_file_overrides_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[execution]
mode = "dry-run"
strategy = "phased"
continue_on_error = true
timeout_secs = 120
retry_attempts = 0
retry_delay_ms = 250
max_concurrency = 2

[agent]
command = "agent-cli"
args = ["--yes"]
env = {{ AGENT_MODEL = "large" }}
commit_template = "feat({{id}}): {{title}}"

[workspace]
root = "/tmp/dagstack-ws"
cleanup_on_failure = true
collision = "reset"

[stack]
branch_prefix = "review/"
conflict_strategy = "manual"
"#
    )
    .unwrap();

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.agent.command.as_deref(), Some("agent-cli"));
    assert_eq!(cfg.agent.args, vec!["--yes"]);
    assert_eq!(cfg.agent.env.get("AGENT_MODEL").map(String::as_str), Some("large"));
    assert_eq!(cfg.agent.commit_template.as_deref(), Some("feat({id}): {title}"));

    let mut options = ExecutionOptions::default();
    cfg.apply_to(&mut options);

    assert_eq!(options.mode, ExecutionMode::DryRun);
    assert_eq!(options.strategy, Some(ExecutionStrategy::Phased));
    assert!(options.continue_on_error);
    assert_eq!(options.task_timeout, Some(Duration::from_secs(120)));
    assert_eq!(options.retry_attempts, 0);
    assert_eq!(options.retry_delay, Duration::from_millis(250));
    assert_eq!(options.max_concurrency, Some(2));
    assert!(options.workspace.cleanup.on_failure);
    assert!(options.workspace.cleanup.on_success);
    assert_eq!(options.workspace.collision, BranchCollisionPolicy::Reset);
    assert_eq!(options.stack.branch_prefix, "review/");
    assert_eq!(options.stack.conflict_strategy, ConflictStrategy::Manual);
    // Untouched values keep their defaults.
    assert_eq!(options.base_ref, "HEAD");
    assert!(options.build_stack);
}

#[test]
fn invalid_config_value_is_a_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[execution]\nretry_backoff = 0.0\n").unwrap();

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, DagstackError::ConfigError(_)), "{err:?}");
}

#[test]
fn unknown_enum_value_is_a_toml_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[stack]\nconflict_strategy = \"ours\"\n").unwrap();

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, DagstackError::TomlError(_)), "{err:?}");
}

#[test]
fn config_is_discovered_in_the_working_directory() {
    let dir = TempDir::new().unwrap();

    let cfg = load_or_default(None, dir.path()).unwrap();
    assert!(cfg.agent.command.is_none());

    std::fs::write(dir.path().join("Dagstack.toml"), "[agent]\ncommand = \"found\"\n").unwrap();
    let cfg = load_or_default(None, dir.path()).unwrap();
    assert_eq!(cfg.agent.command.as_deref(), Some("found"));
}
