//! Prompt rendering for agent passes.

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::core::types::{CommitInfo, MilestoneBoundary, MilestoneProgress, Story};
use crate::io::config::ArtifactsConfig;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const PLAN_STORY_TEMPLATE: &str = include_str!("prompts/plan_story.md");
const BUILD_TEMPLATE: &str = include_str!("prompts/build.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");
const REVIEW_COMMIT_TEMPLATE: &str = include_str!("prompts/review_commit.md");
const REVIEW_MILESTONE_TEMPLATE: &str = include_str!("prompts/review_milestone.md");
const TEST_MILESTONE_TEMPLATE: &str = include_str!("prompts/test_milestone.md");
const VALIDATE_MILESTONE_TEMPLATE: &str = include_str!("prompts/validate_milestone.md");

/// Which milestone-scoped pass to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestonePass {
    Review,
    Test,
    Validate,
}

impl MilestonePass {
    fn template_name(self) -> &'static str {
        match self {
            MilestonePass::Review => "review_milestone",
            MilestonePass::Test => "test_milestone",
            MilestonePass::Validate => "validate_milestone",
        }
    }
}

/// Template engine wrapper around minijinja. Built once per process.
pub struct PromptEngine {
    env: Environment<'static>,
    artifacts: ArtifactsConfig,
}

impl PromptEngine {
    pub fn new(artifacts: ArtifactsConfig) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("plan", PLAN_TEMPLATE),
            ("plan_story", PLAN_STORY_TEMPLATE),
            ("build", BUILD_TEMPLATE),
            ("fix", FIX_TEMPLATE),
            ("review_commit", REVIEW_COMMIT_TEMPLATE),
            ("review_milestone", REVIEW_MILESTONE_TEMPLATE),
            ("test_milestone", TEST_MILESTONE_TEMPLATE),
            ("validate_milestone", VALIDATE_MILESTONE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env, artifacts })
    }

    pub fn render_plan(&self, brief: &str, backlog: &str) -> Result<String> {
        self.render(
            "plan",
            context! {
                brief => brief.trim(),
                backlog => non_empty(backlog),
            },
        )
    }

    pub fn render_plan_story(&self, story: &Story, tasks: &str) -> Result<String> {
        self.render(
            "plan_story",
            context! {
                story => story,
                tasks => non_empty(tasks),
            },
        )
    }

    pub fn render_build(&self, milestone: &MilestoneProgress) -> Result<String> {
        self.render("build", context! { milestone => milestone })
    }

    pub fn render_fix(&self, count: usize, files: &[String]) -> Result<String> {
        self.render("fix", context! { count => count, files => files })
    }

    pub fn render_review_commit(&self, commit: &CommitInfo) -> Result<String> {
        self.render(
            "review_commit",
            context! {
                commit => commit,
                short_sha => commit.short_sha(),
            },
        )
    }

    pub fn render_milestone_pass(
        &self,
        pass: MilestonePass,
        boundary: &MilestoneBoundary,
        diff_stat: &str,
        output_file: &str,
    ) -> Result<String> {
        self.render(
            pass.template_name(),
            context! {
                boundary => boundary,
                diff_stat => non_empty(diff_stat),
                output_file => output_file,
            },
        )
    }

    fn render(&self, name: &str, ctx: Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! { artifacts => &self.artifacts, ..ctx })
            .with_context(|| format!("render prompt {name}"))?;
        debug!(template = name, bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
