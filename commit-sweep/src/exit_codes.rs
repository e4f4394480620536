//! Stable exit codes for the commit-sweep CLI.

/// Every selected repository completed (or had nothing to commit).
pub const OK: i32 = 0;
/// Some groups committed, some failed, or an unclassified error occurred.
pub const PARTIAL: i32 = 1;
/// A merge, rebase, cherry-pick, bisect, or revert is in progress, or the
/// repository diverged from a frozen plan.
pub const PREFLIGHT: i32 = 2;
/// Missing or incompatible external dependency, or lock timeout.
pub const DEPENDENCY: i32 = 3;
/// Invalid arguments, unreadable plan file, or an unresolved previous run.
pub const INVALID: i32 = 4;
/// Cancelled by a signal; cleanup ran.
pub const INTERRUPTED: i32 = 5;

/// Combine per-repository outcomes: the most severe code wins.
pub fn most_severe(a: i32, b: i32) -> i32 {
    if rank(a) >= rank(b) { a } else { b }
}

fn rank(code: i32) -> u8 {
    match code {
        INTERRUPTED => 5,
        INVALID => 4,
        DEPENDENCY => 3,
        PREFLIGHT => 2,
        PARTIAL => 1,
        _ => 0,
    }
}
