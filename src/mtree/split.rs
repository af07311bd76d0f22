//! Node split: farthest-pair promotion with a balanced partition

use std::cmp::Ordering;

use super::entry::MkTabEntry;
use super::error::MkTabResult;
use crate::relation::ObjectId;

/// Outcome of splitting one overflowing node into two groups
///
/// Parent distances of the assigned entries are already measured from the
/// group's promoted routing object.
#[derive(Debug)]
pub struct Assignments {
    pub first_routing: ObjectId,
    pub second_routing: ObjectId,
    pub first_entries: Vec<MkTabEntry>,
    pub second_entries: Vec<MkTabEntry>,
    pub first_radius: f64,
    pub second_radius: f64,
}

/// Split `entries` (at least two) into two groups
///
/// The two entries farthest apart become the routing objects. The remaining
/// entries are handed out alternately, each group taking its nearest
/// unassigned entry, so both halves end up the same size.
pub fn split_entries<F>(entries: Vec<MkTabEntry>, mut distance: F) -> MkTabResult<Assignments>
where
    F: FnMut(ObjectId, ObjectId) -> MkTabResult<f64>,
{
    debug_assert!(entries.len() >= 2, "split needs at least two entries");
    let m = entries.len();

    let ids = entries
        .iter()
        .map(|e| e.routing_id())
        .collect::<MkTabResult<Vec<_>>>()?;

    let mut matrix = vec![0.0; m * m];
    let (mut first, mut second) = (0, 1);
    let mut max_distance = f64::NEG_INFINITY;
    for i in 0..m {
        for j in (i + 1)..m {
            let d = distance(ids[i], ids[j])?;
            matrix[i * m + j] = d;
            matrix[j * m + i] = d;
            if d > max_distance {
                max_distance = d;
                first = i;
                second = j;
            }
        }
    }
    let dist = |a: usize, b: usize| matrix[a * m + b];

    let by_distance_to = |pivot: usize| {
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| {
            dist(pivot, a)
                .total_cmp(&dist(pivot, b))
                .then_with(|| prefer(a, b, pivot))
        });
        order
    };
    let first_order = by_distance_to(first);
    let second_order = by_distance_to(second);

    let mut target: Vec<Option<bool>> = vec![None; m];
    let (mut i1, mut i2) = (0, 0);
    let mut remaining = m;
    while remaining > 0 {
        while i1 < m && target[first_order[i1]].is_some() {
            i1 += 1;
        }
        if i1 < m {
            target[first_order[i1]] = Some(true);
            remaining -= 1;
        }

        while i2 < m && target[second_order[i2]].is_some() {
            i2 += 1;
        }
        if i2 < m && remaining > 0 {
            target[second_order[i2]] = Some(false);
            remaining -= 1;
        }
    }

    let mut assignments = Assignments {
        first_routing: ids[first],
        second_routing: ids[second],
        first_entries: Vec::with_capacity(m / 2 + 1),
        second_entries: Vec::with_capacity(m / 2 + 1),
        first_radius: 0.0,
        second_radius: 0.0,
    };

    for (i, mut entry) in entries.into_iter().enumerate() {
        let to_first = target[i] == Some(true);
        let pivot = if to_first { first } else { second };
        let parent_distance = dist(pivot, i);
        entry.set_parent_distance(parent_distance);
        let reach = parent_distance + entry.covering_radius();

        if to_first {
            assignments.first_radius = assignments.first_radius.max(reach);
            assignments.first_entries.push(entry);
        } else {
            assignments.second_radius = assignments.second_radius.max(reach);
            assignments.second_entries.push(entry);
        }
    }

    Ok(assignments)
}

/// Tie-break for equal distances: the pivot itself first, then by position
fn prefer(a: usize, b: usize, pivot: usize) -> Ordering {
    match (a == pivot, b == pivot) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtree::entry::{DirectoryEntry, LeafEntry};

    fn line_distance(points: &[f64]) -> impl FnMut(ObjectId, ObjectId) -> MkTabResult<f64> + '_ {
        move |a, b| Ok((points[a.0 as usize] - points[b.0 as usize]).abs())
    }

    fn leaves(n: u32) -> Vec<MkTabEntry> {
        (0..n)
            .map(|i| LeafEntry::new(ObjectId(i), vec![0.0]).into())
            .collect()
    }

    #[test]
    fn test_farthest_pair_is_promoted() {
        let points = [0.0, 1.0, 2.0, 10.0, 11.0];
        let split = split_entries(leaves(5), line_distance(&points)).unwrap();

        assert_eq!(split.first_routing, ObjectId(0));
        assert_eq!(split.second_routing, ObjectId(4));
    }

    #[test]
    fn test_partition_is_balanced_and_complete() {
        let points = [0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        let split = split_entries(leaves(6), line_distance(&points)).unwrap();

        assert_eq!(split.first_entries.len(), 3);
        assert_eq!(split.second_entries.len(), 3);

        let mut first: Vec<u32> = split
            .first_entries
            .iter()
            .map(|e| e.routing_object().unwrap().0)
            .collect();
        first.sort();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(split.first_radius, 2.0);
        assert_eq!(split.second_radius, 2.0);
    }

    #[test]
    fn test_parent_distances_are_rewritten() {
        let points = [5.0, 0.0, 9.0];
        let split = split_entries(leaves(3), line_distance(&points)).unwrap();

        for entry in &split.first_entries {
            let id = entry.routing_object().unwrap();
            let expected = (points[id.0 as usize] - points[split.first_routing.0 as usize]).abs();
            assert_eq!(entry.parent_distance(), expected);
        }
        for entry in &split.second_entries {
            let id = entry.routing_object().unwrap();
            let expected =
                (points[id.0 as usize] - points[split.second_routing.0 as usize]).abs();
            assert_eq!(entry.parent_distance(), expected);
        }
    }

    #[test]
    fn test_directory_radius_includes_child_radius() {
        let points = [0.0, 4.0];
        let entries = vec![
            DirectoryEntry::new(ObjectId(0), 0.0, 1, 1.5, 1).into(),
            DirectoryEntry::new(ObjectId(1), 0.0, 2, 0.5, 1).into(),
        ];
        let split = split_entries(entries, line_distance(&points)).unwrap();

        assert_eq!(split.first_radius, 1.5);
        assert_eq!(split.second_radius, 0.5);
    }

    #[test]
    fn test_identical_objects_still_split() {
        let points = [3.0, 3.0, 3.0, 3.0];
        let split = split_entries(leaves(4), line_distance(&points)).unwrap();

        assert_eq!(split.first_entries.len(), 2);
        assert_eq!(split.second_entries.len(), 2);
        assert_ne!(split.first_routing, split.second_routing);
    }
}
