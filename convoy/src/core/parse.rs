//! Parsers for the markdown and flat-file artifacts agents share.
//!
//! All functions take raw text and never fail: lines that do not match the
//! expected shape are skipped, because the inputs are written by LLM sessions
//! (and by writers that may crash mid-append).

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{
    Milestone, MilestoneBoundary, MilestoneProgress, Story, StoryStatus, TaskItem,
};

static MILESTONE_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^##\s+Milestone:\s*(.+)$").unwrap());
static SECTION_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,2}\s").unwrap());
static CHECKED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\[x\]").unwrap());
static UNCHECKED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[ \]").unwrap());
static BACKLOG_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\.\s*\[([ xX~])\]\s*(.*)$").unwrap());
static DEPENDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<!--\s*depends\s*:\s*([^>]*?)\s*-->").unwrap());

/// Parse every `## Milestone: <name>` section with its checkbox tasks.
///
/// A section ends at the next level-1/2 heading or at EOF. Sections without a
/// single checkbox are dropped so an empty header is never reported.
pub fn parse_milestones(content: &str) -> Vec<Milestone> {
    let mut milestones = Vec::new();
    let mut current: Option<Milestone> = None;

    for raw in content.lines() {
        let line = raw.trim_end();
        if let Some(caps) = MILESTONE_HEADING_RE.captures(line) {
            flush(&mut current, &mut milestones);
            current = Some(Milestone {
                name: caps[1].trim().to_string(),
                tasks: Vec::new(),
            });
            continue;
        }
        if SECTION_BREAK_RE.is_match(line) {
            flush(&mut current, &mut milestones);
            continue;
        }
        let Some(section) = current.as_mut() else {
            continue;
        };
        if let Some(task) = parse_task_line(line) {
            section.tasks.push(task);
        }
    }
    flush(&mut current, &mut milestones);
    milestones
}

fn flush(current: &mut Option<Milestone>, out: &mut Vec<Milestone>) {
    if let Some(section) = current.take()
        && !section.tasks.is_empty()
    {
        out.push(section);
    }
}

fn parse_task_line(line: &str) -> Option<TaskItem> {
    let (found, done) = match CHECKED_RE.find(line) {
        Some(m) => (m, true),
        None => (UNCHECKED_RE.find(line)?, false),
    };
    Some(TaskItem {
        text: line[found.end()..].trim().to_string(),
        done,
    })
}

/// Per-milestone checkbox counts, in document order.
pub fn parse_milestones_from_text(content: &str) -> Vec<MilestoneProgress> {
    parse_milestones(content)
        .iter()
        .map(Milestone::progress)
        .collect()
}

/// The first milestone that still has unchecked tasks.
pub fn get_current_milestone_progress(content: &str) -> Option<MilestoneProgress> {
    parse_milestones_from_text(content)
        .into_iter()
        .find(|progress| progress.done < progress.total)
}

/// Parse `name|start_sha|end_sha` lines. Malformed lines are skipped.
pub fn parse_milestone_log(text: &str) -> Vec<MilestoneBoundary> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('|').map(str::trim).collect();
            match fields.as_slice() {
                [name, start, end] if !name.is_empty() && !start.is_empty() && !end.is_empty() => {
                    Some(MilestoneBoundary {
                        name: name.to_string(),
                        start_sha: start.to_string(),
                        end_sha: end.to_string(),
                    })
                }
                _ => None,
            }
        })
        .collect()
}

/// Format a boundary as one ledger line (newline-terminated).
///
/// `|` and line breaks in the name are replaced so the line always parses back.
pub fn format_milestone_log_line(boundary: &MilestoneBoundary) -> String {
    let name: String = boundary
        .name
        .chars()
        .map(|c| match c {
            '|' => '/',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect();
    format!(
        "{}|{}|{}\n",
        name.trim(),
        boundary.start_sha.trim(),
        boundary.end_sha.trim()
    )
}

/// Parse numbered backlog entries: `N. [m] name <!-- depends: a, b -->`.
///
/// Entries with an unknown marker, an empty name or a non-numeric dependency
/// token are skipped.
pub fn parse_backlog(content: &str) -> Vec<Story> {
    content.lines().filter_map(parse_backlog_line).collect()
}

fn parse_backlog_line(line: &str) -> Option<Story> {
    let caps = BACKLOG_LINE_RE.captures(line)?;
    let id: u32 = caps[1].parse().ok()?;
    let marker = caps[2].chars().next()?;
    let status = StoryStatus::from_marker(marker)?;
    let rest = &caps[3];

    let mut depends_on = BTreeSet::new();
    if let Some(dep_caps) = DEPENDS_RE.captures(rest) {
        for token in dep_caps[1]
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            depends_on.insert(token.parse::<u32>().ok()?);
        }
    }

    let name = DEPENDS_RE.replace_all(rest, "").trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(Story {
        id,
        name,
        depends_on,
        status,
    })
}

/// Rewrite the checkbox marker of story `id`, leaving every other byte intact.
///
/// Returns `None` when no parsable entry with that id exists.
pub fn set_story_status(content: &str, id: u32, status: StoryStatus) -> Option<String> {
    let mut out = String::with_capacity(content.len());
    let mut replaced = false;
    for line in content.split_inclusive('\n') {
        if !replaced
            && let Some(caps) = BACKLOG_LINE_RE.captures(line.trim_end_matches(['\n', '\r']))
            && caps[1].parse::<u32>().ok() == Some(id)
            && let Some(marker) = caps.get(2)
        {
            out.push_str(&line[..marker.start()]);
            out.push(status.marker());
            out.push_str(&line[marker.end()..]);
            replaced = true;
            continue;
        }
        out.push_str(line);
    }
    replaced.then_some(out)
}

/// Number of `[ ]` occurrences: a cheap "is there pending work" signal.
pub fn count_unchecked_items(content: &str) -> usize {
    UNCHECKED_RE.find_iter(content).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_sections_count_checkboxes() {
        let text = "\
# Tasks

## Milestone: Setup
- [x] init repo
- [X] add ci
- [ ] write readme

## Milestone: API
- [ ] routes
";
        let progress = parse_milestones_from_text(text);
        assert_eq!(
            progress,
            vec![
                MilestoneProgress {
                    name: "Setup".to_string(),
                    done: 2,
                    total: 3
                },
                MilestoneProgress {
                    name: "API".to_string(),
                    done: 0,
                    total: 1
                },
            ]
        );
    }

    #[test]
    fn empty_milestone_heading_is_dropped() {
        let text =
            "## Milestone: Phantom\n## Milestone: Real\n- [ ] task\n## milestone: Trailing\n";
        let names: Vec<String> = parse_milestones_from_text(text)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Real".to_string()]);
    }

    #[test]
    fn heading_match_is_case_insensitive() {
        let text = "## MILESTONE:   Loud  \n- [x] done\n";
        let progress = parse_milestones_from_text(text);
        assert_eq!(progress[0].name, "Loud");
        assert!(progress[0].is_complete());
    }

    #[test]
    fn level_two_heading_closes_section_but_subheading_does_not() {
        let text = "\
## Milestone: Core
### Backend
- [x] a
## Notes
- [ ] not a task of Core
";
        let progress = parse_milestones_from_text(text);
        assert_eq!(progress.len(), 1);
        assert_eq!((progress[0].done, progress[0].total), (1, 1));
    }

    #[test]
    fn checkboxes_outside_sections_are_ignored() {
        let text = "- [ ] stray\n## Milestone: M\n- [ ] one\n";
        let progress = parse_milestones_from_text(text);
        assert_eq!((progress[0].done, progress[0].total), (0, 1));
    }

    #[test]
    fn done_never_exceeds_total() {
        let text = "## Milestone: A\n- [x] [x] twice\n- [ ] [x] mixed\nplain line\n- [ ] open\n";
        for progress in parse_milestones_from_text(text) {
            assert!(progress.done <= progress.total);
        }
    }

    #[test]
    fn task_text_follows_the_checkbox() {
        let milestones = parse_milestones("## Milestone: M\n- [ ] wire the router\n");
        assert_eq!(
            milestones[0].tasks,
            vec![TaskItem {
                text: "wire the router".to_string(),
                done: false
            }]
        );
    }

    #[test]
    fn current_milestone_is_first_incomplete() {
        let text = "\
## Milestone: Done
- [x] a
## Milestone: Partial
- [x] a
- [x] b
- [x] c
- [ ] d
## Milestone: Untouched
- [ ] a
- [ ] b
- [ ] c
- [ ] d
- [ ] e
";
        let current = get_current_milestone_progress(text).expect("current milestone");
        assert_eq!(current.name, "Partial");
        assert_eq!((current.done, current.total), (3, 4));
    }

    #[test]
    fn current_milestone_none_when_all_complete() {
        assert_eq!(get_current_milestone_progress("## Milestone: A\n- [x] a\n"), None);
        assert_eq!(get_current_milestone_progress(""), None);
    }

    #[test]
    fn ledger_lines_parse_in_order() {
        let parsed = parse_milestone_log("Setup|aaa111|bbb222\nAPI|bbb222|ccc333\n");
        assert_eq!(
            parsed,
            vec![
                MilestoneBoundary {
                    name: "Setup".to_string(),
                    start_sha: "aaa111".to_string(),
                    end_sha: "bbb222".to_string(),
                },
                MilestoneBoundary {
                    name: "API".to_string(),
                    start_sha: "bbb222".to_string(),
                    end_sha: "ccc333".to_string(),
                },
            ]
        );
    }

    #[test]
    fn ledger_skips_malformed_lines() {
        let text = "Setup|aaa|bbb\ngarbage\nhalf|written\n\nx|y|z|extra\nAPI||ccc\nAPI|bbb|ccc";
        let names: Vec<String> = parse_milestone_log(text)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Setup".to_string(), "API".to_string()]);
    }

    #[test]
    fn ledger_line_formatting_sanitizes_separators() {
        let line = format_milestone_log_line(&MilestoneBoundary {
            name: "Auth | Login\n".to_string(),
            start_sha: "a".to_string(),
            end_sha: "b".to_string(),
        });
        assert_eq!(line, "Auth / Login|a|b\n");
        assert_eq!(parse_milestone_log(&line).len(), 1);
    }

    #[test]
    fn backlog_entries_parse_status_and_dependencies() {
        let text = "1. [x] A\n2. [ ] B <!--depends:1-->\n3. [~] C <!-- depends: 1, 2 -->";
        let stories = parse_backlog(text);
        assert_eq!(stories.len(), 3);
        assert_eq!(stories[0].status, StoryStatus::Done);
        assert_eq!(stories[1].name, "B");
        assert_eq!(stories[1].depends_on, BTreeSet::from([1]));
        assert_eq!(stories[2].status, StoryStatus::Claimed);
        assert_eq!(stories[2].depends_on, BTreeSet::from([1, 2]));
    }

    #[test]
    fn backlog_skips_unparsable_entries() {
        let text = "\
# Backlog
1. [?] weird marker
2. [ ] bad deps <!-- depends: one -->
3. [ ]
- [ ] not numbered
4. [ ] fine
";
        let ids: Vec<u32> = parse_backlog(text).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn set_story_status_rewrites_only_the_marker() {
        let text = "# Backlog\n1. [x] A\n2. [ ] B <!--depends:1-->\r\n3. [ ] C\n";
        let updated = set_story_status(text, 2, StoryStatus::Claimed).expect("story exists");
        assert_eq!(
            updated,
            "# Backlog\n1. [x] A\n2. [~] B <!--depends:1-->\r\n3. [ ] C\n"
        );
        assert_eq!(set_story_status(text, 9, StoryStatus::Done), None);
    }

    #[test]
    fn counts_unchecked_items() {
        assert_eq!(count_unchecked_items("- [ ] a\n- [x] b\n- [ ] c [ ]\n"), 3);
        assert_eq!(count_unchecked_items(""), 0);
    }
}
