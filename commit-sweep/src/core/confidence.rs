//! Additive confidence scoring over named factors.

use crate::core::grouper::spanned_dirs;
use crate::core::types::{Bucket, Confidence, ConfidenceLevel, FileChange};

/// Inputs beyond the file list that influence the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreContext {
    pub has_task_id: bool,
    pub ambiguous_type: bool,
}

/// Score a group. Factor codes are recorded in evaluation order.
pub fn score(files: &[FileChange], ctx: ScoreContext) -> Confidence {
    let mut total = 0i32;
    let mut factors = Vec::new();
    let mut apply = |code: &str, delta: i32| {
        total += delta;
        factors.push(code.to_string());
    };

    if ctx.has_task_id {
        apply("task_id", 2);
    }

    match files.len() {
        1 => apply("single_file", 1),
        2..=3 => apply("small_group", 1),
        n if n > 5 => apply("large_group", -1),
        _ => {}
    }

    if files.windows(2).all(|pair| pair[0].bucket == pair[1].bucket) {
        apply("single_bucket", 1);
    }

    if files.windows(2).all(|pair| pair[0].code == pair[1].code) {
        apply("uniform_status", 1);
    } else {
        apply("mixed_status", -1);
    }

    let has_source = files.iter().any(|file| file.bucket == Bucket::Source);
    let has_tests = files.iter().any(|file| file.bucket == Bucket::Test);
    if has_source && !has_tests {
        apply("untested_source", -1);
    }

    if spanned_dirs(files) > 2 {
        apply("wide_scope", -1);
    }

    if ctx.ambiguous_type {
        apply("ambiguous_type", -1);
    }

    Confidence {
        level: ConfidenceLevel::from_score(total),
        score: total,
        factors,
    }
}
