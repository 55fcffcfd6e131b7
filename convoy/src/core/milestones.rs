//! Set arithmetic between the boundary ledger, the task list and checkpoints.

use std::collections::HashSet;

use crate::core::types::{MilestoneBoundary, MilestoneProgress};

/// Boundaries whose name is not in `processed`, in ledger order.
pub fn find_unreviewed_milestones(
    boundaries: &[MilestoneBoundary],
    processed: &HashSet<String>,
) -> Vec<MilestoneBoundary> {
    boundaries
        .iter()
        .filter(|boundary| !processed.contains(&boundary.name))
        .cloned()
        .collect()
}

/// Complete milestones from the task list that the ledger does not know yet,
/// in document order, each name at most once.
pub fn newly_completed_milestones(
    progress: &[MilestoneProgress],
    boundaries: &[MilestoneBoundary],
) -> Vec<String> {
    let mut recorded: HashSet<&str> = boundaries.iter().map(|b| b.name.as_str()).collect();
    let mut names = Vec::new();
    for milestone in progress.iter().filter(|p| p.is_complete()) {
        if recorded.insert(milestone.name.as_str()) {
            names.push(milestone.name.clone());
        }
    }
    names
}

/// True if every processed set covers every ledger entry.
pub fn roles_caught_up<'a, I>(boundaries: &[MilestoneBoundary], processed_sets: I) -> bool
where
    I: IntoIterator<Item = &'a HashSet<String>>,
{
    processed_sets
        .into_iter()
        .all(|processed| find_unreviewed_milestones(boundaries, processed).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(name: &str) -> MilestoneBoundary {
        MilestoneBoundary {
            name: name.to_string(),
            start_sha: format!("{name}-start"),
            end_sha: format!("{name}-end"),
        }
    }

    fn progress(name: &str, done: usize, total: usize) -> MilestoneProgress {
        MilestoneProgress {
            name: name.to_string(),
            done,
            total,
        }
    }

    #[test]
    fn unreviewed_preserves_order_and_removes_processed() {
        let boundaries = vec![boundary("a"), boundary("b"), boundary("c"), boundary("d")];
        let processed = HashSet::from(["b".to_string(), "zzz".to_string()]);
        let names: Vec<String> = find_unreviewed_milestones(&boundaries, &processed)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn newly_completed_skips_recorded_and_incomplete() {
        let list = vec![
            progress("Setup", 2, 2),
            progress("API", 3, 4),
            progress("Docs", 1, 1),
            progress("Empty", 0, 0),
        ];
        let recorded = vec![boundary("Setup")];
        assert_eq!(newly_completed_milestones(&list, &recorded), vec!["Docs"]);
    }

    #[test]
    fn newly_completed_deduplicates_repeated_names() {
        let list = vec![progress("Same", 1, 1), progress("Same", 2, 2)];
        assert_eq!(newly_completed_milestones(&list, &[]), vec!["Same"]);
    }

    #[test]
    fn caught_up_requires_every_role() {
        let boundaries = vec![boundary("a"), boundary("b")];
        let full = HashSet::from(["a".to_string(), "b".to_string()]);
        let partial = HashSet::from(["a".to_string()]);
        assert!(roles_caught_up(&boundaries, [&full, &full]));
        assert!(!roles_caught_up(&boundaries, [&full, &partial]));
        assert!(roles_caught_up(&[], [&partial]));
    }
}
