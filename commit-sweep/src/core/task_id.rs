//! Task identifier extraction from branch names.

use std::sync::LazyLock;

use regex::Regex;

/// Beads-style hash ids (`bd-a1b2c3`), checked first.
static HASH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(bd-[0-9a-f]{3,12})\b").expect("hash id pattern is valid")
});

/// Tracker-prefix ids (`br-123`, `PROJ-42`).
static PREFIX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z]{2,10}-[0-9]+)\b").expect("prefix id pattern is valid")
});

/// Branch-kind words that look like prefixes but never name a task.
const NOT_A_PREFIX: [&str; 7] = ["feature", "release", "hotfix", "bugfix", "fix", "chore", "wip"];

/// Extract a task identifier from a branch name, if the pattern family matches.
pub fn extract_task_id(branch: &str) -> Option<String> {
    if let Some(found) = HASH_ID.captures(branch).and_then(|caps| caps.get(1)) {
        return Some(found.as_str().to_string());
    }
    PREFIX_ID
        .captures_iter(branch)
        .filter_map(|caps| caps.get(1))
        .map(|found| found.as_str())
        .find(|candidate| {
            let prefix = candidate.split('-').next().unwrap_or_default();
            !NOT_A_PREFIX.contains(&prefix.to_ascii_lowercase().as_str())
        })
        .map(str::to_string)
}
