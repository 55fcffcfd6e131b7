//! Reading and writing the shared markdown artifacts in the working tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::parse::{count_unchecked_items, parse_backlog, set_story_status};
use crate::core::types::{Story, StoryStatus};
use crate::io::checkpoint::read_optional;
use crate::io::config::ArtifactsConfig;

/// An artifact file with unchecked items and how many it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenFindings {
    pub file: String,
    pub count: usize,
}

/// Artifact files of one working tree, named per config.
#[derive(Debug, Clone)]
pub struct Artifacts {
    workdir: PathBuf,
    cfg: ArtifactsConfig,
}

impl Artifacts {
    pub fn new(workdir: impl Into<PathBuf>, cfg: ArtifactsConfig) -> Self {
        Self {
            workdir: workdir.into(),
            cfg,
        }
    }

    pub fn config(&self) -> &ArtifactsConfig {
        &self.cfg
    }

    /// Missing files read as empty.
    pub fn read_tasks(&self) -> Result<String> {
        read_text(&self.workdir.join(&self.cfg.tasks_file))
    }

    pub fn read_backlog(&self) -> Result<String> {
        read_text(&self.workdir.join(&self.cfg.backlog_file))
    }

    pub fn stories(&self) -> Result<Vec<Story>> {
        Ok(parse_backlog(&self.read_backlog()?))
    }

    /// Rewrite one story's marker. Returns false if the story is not in the file.
    pub fn set_story_status(&self, id: u32, status: StoryStatus) -> Result<bool> {
        let path = self.workdir.join(&self.cfg.backlog_file);
        let content = read_text(&path)?;
        let Some(updated) = set_story_status(&content, id, status) else {
            return Ok(false);
        };
        fs::write(&path, updated).with_context(|| format!("write {}", path.display()))?;
        Ok(true)
    }

    /// Bugs, validation issues and review findings still unchecked.
    pub fn open_findings(&self) -> Result<Vec<OpenFindings>> {
        let mut files = vec![self.cfg.bugs_file.clone(), self.cfg.validation_file.clone()];
        files.extend(self.review_files()?);

        let mut open = Vec::new();
        for file in files {
            let count = count_unchecked_items(&read_text(&self.workdir.join(&file))?);
            if count > 0 {
                open.push(OpenFindings { file, count });
            }
        }
        Ok(open)
    }

    /// Markdown files directly under the reviews directory, sorted.
    fn review_files(&self) -> Result<Vec<String>> {
        let dir = self.workdir.join(&self.cfg.reviews_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir {}", dir.display())),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.push(format!("{}/{name}", self.cfg.reviews_dir));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_text(path: &Path) -> Result<String> {
    Ok(read_optional(path)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Artifacts) {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = Artifacts::new(temp.path(), ArtifactsConfig::default());
        (temp, artifacts)
    }

    #[test]
    fn missing_files_read_empty() {
        let (_temp, artifacts) = setup();
        assert_eq!(artifacts.read_tasks().expect("tasks"), "");
        assert!(artifacts.stories().expect("stories").is_empty());
        assert!(artifacts.open_findings().expect("findings").is_empty());
    }

    #[test]
    fn counts_open_findings_across_files() {
        let (temp, artifacts) = setup();
        fs::write(temp.path().join("BUGS.md"), "- [ ] crash\n- [x] old\n").expect("bugs");
        fs::create_dir_all(temp.path().join("reviews")).expect("reviews");
        fs::write(temp.path().join("reviews/abc1234.md"), "- [ ] a\n- [ ] b\n").expect("review");
        fs::write(temp.path().join("reviews/notes.txt"), "- [ ] ignored\n").expect("txt");

        let open = artifacts.open_findings().expect("findings");
        assert_eq!(
            open,
            vec![
                OpenFindings {
                    file: "BUGS.md".to_string(),
                    count: 1
                },
                OpenFindings {
                    file: "reviews/abc1234.md".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn claims_story_in_place() {
        let (temp, artifacts) = setup();
        fs::write(
            temp.path().join("BACKLOG.md"),
            "1. [x] A\n2. [ ] B <!-- depends: 1 -->\n",
        )
        .expect("backlog");

        assert!(artifacts.set_story_status(2, StoryStatus::Claimed).expect("claim"));
        assert!(!artifacts.set_story_status(9, StoryStatus::Claimed).expect("missing"));
        let stories = artifacts.stories().expect("stories");
        assert_eq!(stories[1].status, StoryStatus::Claimed);
    }
}
