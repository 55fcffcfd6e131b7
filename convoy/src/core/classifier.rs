//! Deterministic classification of commits for the commit reviewer.

use std::path::{Component, Path};

use crate::core::types::{CommitClass, CommitInfo};

/// Paths and patterns that decide which commits carry no reviewable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    /// Directory the reviewer writes its own findings into.
    pub reviewer_output_dir: String,
    /// Bookkeeping files (task list, backlog, bug list, ...).
    pub coordination_files: Vec<String>,
    /// Directories holding only bookkeeping (milestone definitions, findings).
    pub coordination_dirs: Vec<String>,
    /// Substring (case-insensitive) that marks a builder milestone merge.
    pub milestone_merge_pattern: String,
}

/// Classify a commit.
///
/// - Merges are skipped unless the subject names a milestone merge.
/// - `SkipSelf` if every changed file is under the reviewer output dir.
/// - `SkipCoordination` if every changed file is a coordination file or under a
///   coordination dir.
///
/// An empty file list is never `SkipSelf` or `SkipCoordination`.
pub fn classify_commit(commit: &CommitInfo, rules: &ClassifierRules) -> CommitClass {
    if commit.is_merge() && !is_milestone_merge(&commit.subject, rules) {
        return CommitClass::SkipMerge;
    }
    if is_reviewer_self(&commit.files, rules) {
        return CommitClass::SkipSelf;
    }
    if is_coordination_only(&commit.files, rules) {
        return CommitClass::SkipCoordination;
    }
    CommitClass::Review
}

pub fn is_milestone_merge(subject: &str, rules: &ClassifierRules) -> bool {
    let pattern = rules.milestone_merge_pattern.trim();
    !pattern.is_empty() && subject.to_lowercase().contains(&pattern.to_lowercase())
}

pub fn is_reviewer_self<P: AsRef<Path>>(files: &[P], rules: &ClassifierRules) -> bool {
    !files.is_empty()
        && files
            .iter()
            .all(|file| is_under(file.as_ref(), Path::new(&rules.reviewer_output_dir)))
}

pub fn is_coordination_only<P: AsRef<Path>>(files: &[P], rules: &ClassifierRules) -> bool {
    !files.is_empty()
        && files.iter().all(|file| {
            let file = file.as_ref();
            rules
                .coordination_files
                .iter()
                .any(|known| same_path(file, Path::new(known)))
                || rules
                    .coordination_dirs
                    .iter()
                    .any(|dir| is_under(file, Path::new(dir)))
        })
}

fn normal_components(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir | Component::RootDir))
        .collect()
}

fn same_path(path: &Path, known: &Path) -> bool {
    let known = normal_components(known);
    !known.is_empty() && normal_components(path) == known
}

/// True if `path` lives strictly inside `dir` (component-wise, not string prefix).
fn is_under(path: &Path, dir: &Path) -> bool {
    let dir = normal_components(dir);
    let path = normal_components(path);
    !dir.is_empty() && path.len() > dir.len() && path[..dir.len()] == dir[..]
}
