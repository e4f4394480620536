//! Partition classified files into atomic commit groups.
//!
//! Pass 1 keys files by `(bucket, top-level directory)`. Pass 2 merges test,
//! doc, and config candidates into the source group with the same scope so a
//! change and its tests land in one commit. Every input file ends up in
//! exactly one group.

use std::collections::BTreeMap;

use crate::core::types::{Bucket, FileChange};

/// Files destined for one commit, before type and message derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    /// Bucket that keyed the group (source for merged groups).
    pub bucket: Bucket,
    /// Top-level directory, `None` for root-level files.
    pub scope: Option<String>,
    /// Sorted by path.
    pub files: Vec<FileChange>,
    pub pre_staged: bool,
}

/// Split of a change set when manual staging is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingSplit {
    pub staged: Vec<FileChange>,
    pub unstaged: Vec<FileChange>,
    /// Staged paths that also carry unstaged edits; those edits stay uncommitted.
    pub overlap: Vec<String>,
}

/// Separate manually staged entries from the rest.
pub fn split_staged(files: Vec<FileChange>) -> StagingSplit {
    let mut split = StagingSplit::default();
    for file in files {
        if file.is_staged() {
            if file.has_unstaged() {
                split.overlap.push(file.path.clone());
            }
            split.staged.push(file);
        } else {
            split.unstaged.push(file);
        }
    }
    split
}

/// Build groups. `staged` (possibly empty) becomes the first group untouched.
pub fn group_files(files: Vec<FileChange>, staged: Vec<FileChange>) -> Vec<FileGroup> {
    let mut groups = Vec::new();

    if !staged.is_empty() {
        let mut staged = staged;
        staged.sort_by(|a, b| a.path.cmp(&b.path));
        groups.push(FileGroup {
            bucket: dominant_bucket(&staged),
            scope: staged_scope(&staged),
            files: staged,
            pre_staged: true,
        });
    }

    // Pass 1: candidates keyed by (bucket, scope).
    let mut candidates: BTreeMap<(Bucket, ScopeKey), Vec<FileChange>> = BTreeMap::new();
    for file in files {
        let key = (file.bucket, ScopeKey::from(file.top_level()));
        candidates.entry(key).or_default().push(file);
    }

    // Pass 2: affinity merge into co-located source groups.
    let mut merged: BTreeMap<(Bucket, ScopeKey), Vec<FileChange>> = BTreeMap::new();
    for ((bucket, scope), files) in candidates {
        let target = if bucket != Bucket::Source
            && merged.contains_key(&(Bucket::Source, scope.clone()))
        {
            (Bucket::Source, scope)
        } else {
            (bucket, scope)
        };
        merged.entry(target).or_default().extend(files);
    }

    for ((bucket, scope), mut files) in merged {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        groups.push(FileGroup {
            bucket,
            scope: scope.into_option(),
            files,
            pre_staged: false,
        });
    }

    groups
}

/// Ordering key that sorts named scopes alphabetically and the root last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ScopeKey {
    Dir(String),
    Root,
}

impl ScopeKey {
    fn into_option(self) -> Option<String> {
        match self {
            ScopeKey::Dir(dir) => Some(dir),
            ScopeKey::Root => None,
        }
    }
}

impl From<Option<&str>> for ScopeKey {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(dir) => ScopeKey::Dir(dir.to_string()),
            None => ScopeKey::Root,
        }
    }
}

fn dominant_bucket(files: &[FileChange]) -> Bucket {
    if files.iter().any(|file| file.bucket == Bucket::Source) {
        return Bucket::Source;
    }
    let first = files.first().map(|file| file.bucket).unwrap_or(Bucket::Source);
    if files.iter().all(|file| file.bucket == first) {
        first
    } else {
        Bucket::Source
    }
}

/// Most frequent top-level directory (ties alphabetical), `None` if root-only.
fn staged_scope(files: &[FileChange]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for file in files {
        if let Some(dir) = file.top_level() {
            *counts.entry(dir).or_default() += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (dir, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((dir, count));
        }
    }
    best.map(|(dir, _)| dir.to_string())
}

/// Distinct top-level directories touched by a file list (root counts as one).
pub fn spanned_dirs(files: &[FileChange]) -> usize {
    let mut dirs: Vec<Option<&str>> = files.iter().map(FileChange::top_level).collect();
    dirs.sort_unstable();
    dirs.dedup();
    dirs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify_all;

    fn changes(entries: &[(&str, &str)]) -> Vec<FileChange> {
        let mut files: Vec<FileChange> = entries
            .iter()
            .map(|(code, path)| FileChange::new(*path, *code))
            .collect();
        classify_all(&mut files);
        files
    }

    fn paths(group: &FileGroup) -> Vec<&str> {
        group.files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_file_merges_into_colocated_source_group() {
        let groups = group_files(
            changes(&[(" M", "lib/foo.sh"), ("??", "lib/foo_test.sh")]),
            Vec::new(),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].bucket, Bucket::Source);
        assert_eq!(groups[0].scope.as_deref(), Some("lib"));
        assert_eq!(paths(&groups[0]), vec!["lib/foo.sh", "lib/foo_test.sh"]);
    }

    #[test]
    fn unmatched_non_source_files_keep_their_own_groups() {
        let groups = group_files(
            changes(&[
                (" M", "src/app.rs"),
                (" M", "docs/guide.md"),
                (" M", "tests/app.rs"),
                (" M", "Cargo.toml"),
            ]),
            Vec::new(),
        );
        let summary: Vec<(Bucket, Option<&str>)> = groups
            .iter()
            .map(|g| (g.bucket, g.scope.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Bucket::Source, Some("src")),
                (Bucket::Test, Some("tests")),
                (Bucket::Doc, Some("docs")),
                (Bucket::Config, None),
            ]
        );
    }

    #[test]
    fn root_scope_sorts_after_named_scopes() {
        let groups = group_files(
            changes(&[(" D", "old.py"), (" M", "api/handler.py")]),
            Vec::new(),
        );
        let scopes: Vec<Option<&str>> = groups.iter().map(|g| g.scope.as_deref()).collect();
        assert_eq!(scopes, vec![Some("api"), None]);
    }

    #[test]
    fn partition_covers_every_file_once() {
        let input = changes(&[
            (" M", "a/x.rs"),
            (" M", "a/x_test.rs"),
            ("??", "b/README.md"),
            (" D", "c/old.rs"),
            (" M", "README.md"),
            (" M", "main.rs"),
            ("??", ".editorconfig"),
        ]);
        let mut expected: Vec<String> = input.iter().map(|f| f.path.clone()).collect();
        expected.sort();

        let groups = group_files(input, Vec::new());
        let mut seen: Vec<String> = groups
            .iter()
            .flat_map(|g| g.files.iter().map(|f| f.path.clone()))
            .collect();
        seen.sort();
        assert_eq!(seen, expected);
        assert!(groups.iter().all(|g| !g.files.is_empty()));
    }

    #[test]
    fn staged_files_are_isolated_first() {
        let split = split_staged(changes(&[
            ("M ", "lib/a.sh"),
            ("MM", "lib/b.sh"),
            (" M", "lib/c.sh"),
            ("??", "lib/d.sh"),
        ]));
        assert_eq!(split.overlap, vec!["lib/b.sh".to_string()]);

        let groups = group_files(split.unstaged, split.staged);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].pre_staged);
        assert_eq!(paths(&groups[0]), vec!["lib/a.sh", "lib/b.sh"]);
        assert_eq!(paths(&groups[1]), vec!["lib/c.sh", "lib/d.sh"]);
    }

    #[test]
    fn staged_scope_prefers_most_frequent_dir() {
        let files = changes(&[("M ", "b/one.rs"), ("M ", "a/two.rs"), ("M ", "b/three.rs")]);
        assert_eq!(staged_scope(&files).as_deref(), Some("b"));
        let root_only = changes(&[("M ", "main.rs")]);
        assert_eq!(staged_scope(&root_only), None);
    }
}
