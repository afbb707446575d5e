//! Runs every YAML scenario under `tests/scenarios`

use std::path::{Path, PathBuf};

use inspector::testing::{load_scenario, run_scenario};

fn scenario_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("scenarios")
}

fn scenario_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(scenario_dir())
        .expect("scenario directory")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    files.sort();
    files
}

#[test]
fn test_scenarios_parse() {
    let files = scenario_files();
    assert!(!files.is_empty());
    for path in files {
        let scenario = load_scenario(&path)
            .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        assert!(!scenario.steps.is_empty(), "{} has no steps", path.display());
    }
}

#[tokio::test]
async fn test_scenarios_pass() {
    let mut failures = Vec::new();
    for path in scenario_files() {
        let result = run_scenario(&path, false)
            .await
            .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        if !result.passed {
            failures.push(format!(
                "{} (step {}/{}): {}",
                path.display(),
                result.steps_run,
                result.steps_total,
                result.error.unwrap_or_default()
            ));
        }
    }
    assert!(failures.is_empty(), "failed scenarios:\n{}", failures.join("\n"));
}
