//! Commit type, scope, subject, and body derivation.
//!
//! Everything here is a pure function of the group's files so that planning
//! the same tree twice yields byte-identical messages.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::grouper::FileGroup;
use crate::core::types::{Bucket, ChangeKind, CommitType, FileChange, ROOT_SCOPE};

/// Maximum subject length, task suffix included.
pub const MAX_SUBJECT_LEN: usize = 72;
const ELLIPSIS: &str = "...";

/// Default body template.
pub const DEFAULT_BODY_TEMPLATE: &str = "\
{% for file in files %}- {{ file.kind }}: {% if file.orig_path %}{{ file.orig_path }} -> {% endif %}{{ file.path }}
{% endfor %}{% if task_id %}
Task: {{ task_id }}{% if task_title %} - {{ task_title }}{% endif %}
{% endif %}";

/// Commit type plus whether the source status mix was ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDecision {
    pub commit_type: CommitType,
    pub ambiguous: bool,
}

/// Derive the commit type for a group.
///
/// Non-source buckets map directly. Source groups look only at their source
/// files: attached tests, docs, and config ride along without changing it.
pub fn derive_type(group: &FileGroup) -> TypeDecision {
    let sources: Vec<&FileChange> = group
        .files
        .iter()
        .filter(|file| file.bucket == Bucket::Source)
        .collect();

    if sources.is_empty() {
        return TypeDecision {
            commit_type: bucket_type(group),
            ambiguous: false,
        };
    }

    let mut counts: BTreeMap<ChangeKind, usize> = BTreeMap::new();
    for file in &sources {
        *counts.entry(file.kind()).or_default() += 1;
    }

    // BTreeMap iterates in precedence order; strict `>` keeps the earlier kind on ties.
    let mut dominant = ChangeKind::Modified;
    let mut best = 0usize;
    for (kind, count) in &counts {
        if *count > best {
            dominant = *kind;
            best = *count;
        }
    }

    if best * 2 <= sources.len() && counts.len() >= 3 {
        return TypeDecision {
            commit_type: CommitType::Chore,
            ambiguous: true,
        };
    }

    let commit_type = match dominant {
        ChangeKind::Added => CommitType::Feat,
        ChangeKind::Renamed => CommitType::Refactor,
        ChangeKind::Deleted => CommitType::Chore,
        ChangeKind::Modified => CommitType::Fix,
    };
    TypeDecision {
        commit_type,
        ambiguous: false,
    }
}

fn bucket_type(group: &FileGroup) -> CommitType {
    let first = group.files.first().map(|file| file.bucket);
    let uniform = group.files.iter().all(|file| Some(file.bucket) == first);
    match (uniform, first) {
        (true, Some(Bucket::Test)) => CommitType::Test,
        (true, Some(Bucket::Doc)) => CommitType::Docs,
        _ => CommitType::Chore,
    }
}

/// Scope label: top-level directory or the root sentinel.
pub fn scope_label(scope: Option<&str>) -> String {
    scope.unwrap_or(ROOT_SCOPE).to_string()
}

/// Build the one-line subject, truncated to [`MAX_SUBJECT_LEN`].
pub fn build_subject(
    commit_type: CommitType,
    scope: &str,
    group: &FileGroup,
    task_id: Option<&str>,
) -> String {
    let head = format!("{commit_type}({scope}): {}", describe(group));
    let suffix = task_id.map(|id| format!(" ({id})")).unwrap_or_default();
    truncate_subject(&head, &suffix)
}

fn describe(group: &FileGroup) -> String {
    let verb = verb_for(dominant_kind(&group.files));
    if let [file] = group.files.as_slice() {
        return match (&file.orig_path, file.kind()) {
            (Some(orig), ChangeKind::Renamed) => format!(
                "rename {} to {}",
                crate::core::types::file_name(orig),
                file.file_name()
            ),
            _ => format!("{} {}", verb_for(file.kind()), file.file_name()),
        };
    }

    let sources: Vec<&FileChange> = group
        .files
        .iter()
        .filter(|file| file.bucket == Bucket::Source)
        .collect();
    let attachments = attachment_labels(&group.files);

    if sources.is_empty() || attachments.is_empty() {
        let noun = if group.pre_staged && !uniform_bucket(&group.files) {
            "staged"
        } else {
            group.bucket.as_str()
        };
        return format!("{verb} {} {noun} files", group.files.len());
    }

    let source_verb = verb_for(dominant_kind_of(sources.iter().copied()));
    let subject = match sources.as_slice() {
        [only] => only.file_name().to_string(),
        _ => format!("{} source files", sources.len()),
    };
    format!("{source_verb} {subject} with {}", attachments.join(" and "))
}

fn uniform_bucket(files: &[FileChange]) -> bool {
    files.windows(2).all(|pair| pair[0].bucket == pair[1].bucket)
}

fn attachment_labels(files: &[FileChange]) -> Vec<&'static str> {
    let mut labels = Vec::new();
    for (bucket, label) in [
        (Bucket::Test, "tests"),
        (Bucket::Doc, "docs"),
        (Bucket::Config, "config"),
    ] {
        if files.iter().any(|file| file.bucket == bucket) {
            labels.push(label);
        }
    }
    labels
}

fn dominant_kind(files: &[FileChange]) -> ChangeKind {
    dominant_kind_of(files.iter())
}

fn dominant_kind_of<'a>(files: impl Iterator<Item = &'a FileChange>) -> ChangeKind {
    let mut counts: BTreeMap<ChangeKind, usize> = BTreeMap::new();
    for file in files {
        *counts.entry(file.kind()).or_default() += 1;
    }
    let mut dominant = ChangeKind::Modified;
    let mut best = 0usize;
    for (kind, count) in counts {
        if count > best {
            dominant = kind;
            best = count;
        }
    }
    dominant
}

fn verb_for(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "add",
        ChangeKind::Renamed => "rename",
        ChangeKind::Deleted => "remove",
        ChangeKind::Modified => "update",
    }
}

/// Join head and suffix, shortening the head so the suffix always survives.
fn truncate_subject(head: &str, suffix: &str) -> String {
    if head.chars().count() + suffix.chars().count() <= MAX_SUBJECT_LEN {
        return format!("{head}{suffix}");
    }
    let budget = MAX_SUBJECT_LEN
        .saturating_sub(suffix.chars().count())
        .saturating_sub(ELLIPSIS.len());
    let shortened: String = head.chars().take(budget).collect();
    format!("{}{ELLIPSIS}{suffix}", shortened.trim_end())
}

#[derive(Serialize)]
struct BodyFile<'a> {
    kind: &'static str,
    path: &'a str,
    orig_path: Option<&'a str>,
}

/// Render the optional body enumerating each file and the task reference.
pub fn build_body(
    template: &str,
    files: &[FileChange],
    task_id: Option<&str>,
    task_title: Option<&str>,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("body", template)
        .context("parse commit body template")?;
    let rows: Vec<BodyFile<'_>> = files
        .iter()
        .map(|file| BodyFile {
            kind: file.kind().as_str(),
            path: &file.path,
            orig_path: file.orig_path.as_deref(),
        })
        .collect();
    let rendered = env
        .get_template("body")
        .context("load commit body template")?
        .render(context! {
            files => rows,
            task_id => task_id,
            task_title => task_title.filter(|title| !title.is_empty()),
        })
        .context("render commit body")?;
    Ok(rendered.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify_all;
    use crate::core::grouper::group_files;

    fn single_group(entries: &[(&str, &str)]) -> FileGroup {
        let mut files: Vec<FileChange> = entries
            .iter()
            .map(|(code, path)| FileChange::new(*path, *code))
            .collect();
        classify_all(&mut files);
        let mut groups = group_files(files, Vec::new());
        assert_eq!(groups.len(), 1, "expected a single group");
        groups.remove(0)
    }

    #[test]
    fn modified_single_file_is_fix_with_task_suffix() {
        let group = single_group(&[(" M", "lib/session.sh")]);
        let decision = derive_type(&group);
        assert_eq!(decision.commit_type, CommitType::Fix);
        let subject = build_subject(decision.commit_type, "lib", &group, Some("br-123"));
        assert_eq!(subject, "fix(lib): update session.sh (br-123)");
    }

    #[test]
    fn attached_test_does_not_change_type() {
        let group = single_group(&[(" M", "lib/foo.sh"), ("??", "lib/foo_test.sh")]);
        let decision = derive_type(&group);
        assert_eq!(decision.commit_type, CommitType::Fix);
        let subject = build_subject(decision.commit_type, "lib", &group, None);
        assert_eq!(subject, "fix(lib): update foo.sh with tests");
    }

    #[test]
    fn deleted_root_file_is_chore() {
        let group = single_group(&[(" D", "old.py")]);
        assert_eq!(derive_type(&group).commit_type, CommitType::Chore);
        let scope = scope_label(group.scope.as_deref());
        assert_eq!(scope, "root");
        assert_eq!(
            build_subject(CommitType::Chore, &scope, &group, None),
            "chore(root): remove old.py"
        );
    }

    #[test]
    fn tie_breaks_by_precedence() {
        let group = single_group(&[("??", "src/a.rs"), (" M", "src/b.rs")]);
        let decision = derive_type(&group);
        assert_eq!(decision.commit_type, CommitType::Feat);
        assert!(!decision.ambiguous);
    }

    #[test]
    fn three_way_mix_without_majority_is_ambiguous() {
        let group = single_group(&[("??", "src/a.rs"), (" M", "src/b.rs"), (" D", "src/c.rs")]);
        let decision = derive_type(&group);
        assert_eq!(decision.commit_type, CommitType::Chore);
        assert!(decision.ambiguous);
    }

    #[test]
    fn rename_single_file_names_both_sides() {
        let mut file = FileChange::new("src/new.rs", "R ");
        file.orig_path = Some("src/old.rs".to_string());
        let group = group_files(vec![file], Vec::new()).remove(0);
        assert_eq!(derive_type(&group).commit_type, CommitType::Refactor);
        assert_eq!(
            build_subject(CommitType::Refactor, "src", &group, None),
            "refactor(src): rename old.rs to new.rs"
        );
    }

    #[test]
    fn multi_file_bucket_subject() {
        let group = single_group(&[(" M", "docs/a.md"), (" M", "docs/b.md")]);
        assert_eq!(derive_type(&group).commit_type, CommitType::Docs);
        assert_eq!(
            build_subject(CommitType::Docs, "docs", &group, None),
            "docs(docs): update 2 doc files"
        );
    }

    #[test]
    fn truncation_keeps_task_suffix() {
        let long = format!("lib/{}.sh", "x".repeat(90));
        let group = single_group(&[(" M", long.as_str())]);
        let subject = build_subject(CommitType::Fix, "lib", &group, Some("br-123"));
        assert_eq!(subject.chars().count(), MAX_SUBJECT_LEN);
        assert!(subject.ends_with("... (br-123)"));
        assert!(subject.starts_with("fix(lib): update xxx"));
    }

    #[test]
    fn body_lists_files_and_task() {
        let files = vec![FileChange::new("lib/a.sh", " M"), FileChange::new("lib/b.sh", "??")];
        let body = build_body(
            DEFAULT_BODY_TEMPLATE,
            &files,
            Some("br-1"),
            Some("Fix login"),
        )
        .expect("body");
        assert_eq!(
            body,
            "- modified: lib/a.sh\n- added: lib/b.sh\n\nTask: br-1 - Fix login"
        );
    }

    #[test]
    fn body_without_task_has_no_trailer() {
        let files = vec![FileChange::new("a.sh", " D")];
        let body = build_body(DEFAULT_BODY_TEMPLATE, &files, None, None).expect("body");
        assert_eq!(body, "- deleted: a.sh");
    }
}
