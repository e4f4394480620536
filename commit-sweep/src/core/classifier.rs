//! Deterministic classification of changed paths into buckets.
//!
//! The rule chain is order-sensitive: test patterns win over documentation,
//! documentation wins over configuration, and anything unmatched is source.
//! A `README.md` under `tests/` is therefore a test file.

use std::path::{Component, Path};

use crate::core::types::{Bucket, FileChange};

const TEST_DIRS: [&str; 6] = ["test", "tests", "__tests__", "spec", "specs", "testdata"];
const DOC_DIRS: [&str; 3] = ["docs", "doc", "documentation"];
const DOC_EXTENSIONS: [&str; 5] = ["md", "markdown", "rst", "adoc", "asciidoc"];
const DOC_NAME_PREFIXES: [&str; 4] = ["README", "CHANGELOG", "LICENSE", "CONTRIBUTING"];
const CONFIG_EXTENSIONS: [&str; 6] = ["toml", "yaml", "yml", "ini", "cfg", "conf"];
const BUILD_MANIFESTS: [&str; 24] = [
    "Cargo.toml",
    "Cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "tsconfig.json",
    "go.mod",
    "go.sum",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "Pipfile",
    "Pipfile.lock",
    "Gemfile",
    "Gemfile.lock",
    "Makefile",
    "Justfile",
    "justfile",
    "Dockerfile",
    "CMakeLists.txt",
    "build.gradle",
    "pom.xml",
    "Jenkinsfile",
];

/// Assign a bucket to a repository-relative path.
pub fn classify_path(path: &str) -> Bucket {
    if is_test(path) {
        Bucket::Test
    } else if is_doc(path) {
        Bucket::Doc
    } else if is_config(path) {
        Bucket::Config
    } else {
        Bucket::Source
    }
}

/// Classify every change in place.
pub fn classify_all(changes: &mut [FileChange]) {
    for change in changes.iter_mut() {
        change.bucket = classify_path(&change.path);
    }
}

fn dir_components(path: &str) -> impl Iterator<Item = &str> {
    let mut parts: Vec<&str> = Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    parts.pop();
    parts.into_iter()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() { None } else { Some(ext) }
}

fn is_test(path: &str) -> bool {
    if dir_components(path).any(|dir| TEST_DIRS.contains(&dir)) {
        return true;
    }
    let name = file_name(path);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    stem.ends_with("_test")
        || stem.ends_with("_spec")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
        || name.starts_with("test_")
        || name.ends_with(".bats")
}

fn is_doc(path: &str) -> bool {
    if dir_components(path).any(|dir| DOC_DIRS.contains(&dir)) {
        return true;
    }
    let name = file_name(path);
    if DOC_NAME_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        return true;
    }
    extension(name).is_some_and(|ext| DOC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_config(path: &str) -> bool {
    if dir_components(path).any(|dir| dir.starts_with('.')) {
        return true;
    }
    let name = file_name(path);
    if name.starts_with('.') {
        return true;
    }
    if BUILD_MANIFESTS.contains(&name) {
        return true;
    }
    if name.starts_with("requirements") && name.ends_with(".txt") {
        return true;
    }
    if name.starts_with("docker-compose") {
        return true;
    }
    extension(name)
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
