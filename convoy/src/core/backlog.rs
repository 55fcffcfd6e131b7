//! Deterministic story selection over the backlog dependency graph.

use std::collections::{HashMap, HashSet};

use crate::core::types::{Story, StoryStatus};

/// True if `story` is open and every dependency is a known, lower-numbered,
/// done story. Unknown or forward dependencies keep the story blocked.
pub fn is_eligible(story: &Story, stories: &[Story]) -> bool {
    if story.status != StoryStatus::Open {
        return false;
    }
    let status_by_id = index_status(stories);
    dependencies_done(story, &status_by_id)
}

fn dependencies_done(story: &Story, status_by_id: &HashMap<u32, StoryStatus>) -> bool {
    story.depends_on.iter().all(|dep| {
        *dep < story.id && status_by_id.get(dep).copied() == Some(StoryStatus::Done)
    })
}

fn index_status(stories: &[Story]) -> HashMap<u32, StoryStatus> {
    let mut map = HashMap::new();
    for story in stories {
        // First entry wins on duplicate ids, matching document order.
        map.entry(story.id).or_insert(story.status);
    }
    map
}

/// The lowest-id eligible story, if any.
pub fn next_eligible_story(stories: &[Story]) -> Option<&Story> {
    let status_by_id = index_status(stories);
    stories
        .iter()
        .filter(|story| story.status == StoryStatus::Open)
        .filter(|story| dependencies_done(story, &status_by_id))
        .min_by_key(|story| story.id)
}

/// The lowest-id story currently claimed by a builder.
pub fn claimed_story(stories: &[Story]) -> Option<&Story> {
    stories
        .iter()
        .filter(|story| story.status == StoryStatus::Claimed)
        .min_by_key(|story| story.id)
}

/// Stories that are open but can never become eligible as written.
pub fn permanently_blocked(stories: &[Story]) -> Vec<&Story> {
    let known: HashSet<u32> = stories.iter().map(|story| story.id).collect();
    stories
        .iter()
        .filter(|story| story.status == StoryStatus::Open)
        .filter(|story| {
            story
                .depends_on
                .iter()
                .any(|dep| *dep >= story.id || !known.contains(dep))
        })
        .collect()
}

/// Human-readable backlog problems:
/// - duplicate ids
/// - self or forward dependencies
/// - dependencies on ids that do not exist
pub fn validate_backlog(stories: &[Story]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let known: HashSet<u32> = stories.iter().map(|story| story.id).collect();

    for story in stories {
        if !seen.insert(story.id) {
            issues.push(format!("duplicate story id {}", story.id));
        }
        for dep in &story.depends_on {
            if *dep >= story.id {
                issues.push(format!(
                    "story {} depends on {} (dependencies must point to lower ids)",
                    story.id, dep
                ));
            } else if !known.contains(dep) {
                issues.push(format!(
                    "story {} depends on missing story {}",
                    story.id, dep
                ));
            }
        }
    }
    issues
}
