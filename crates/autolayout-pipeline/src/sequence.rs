//! Reading-order sequencing of accepted regions.
//!
//! Masks arrive in whatever order the segmentation service (or a
//! parallel worker pool) produced them. Regions are bucketed into rows
//! of `row_tolerance` original pixels, sorted left to right within a
//! row, and only then numbered, so the ids a caller sees depend on
//! geometry alone.

use crate::types::{DetectedRegion, RegionCandidate};

/// Row bucket for a top edge: `floor(y / row_tolerance)`.
#[must_use]
pub const fn row_bucket(y: u32, row_tolerance: u32) -> u32 {
    y / row_tolerance
}

/// Identifier for the region at zero-based `index`: `item_001`, ...
#[must_use]
pub fn region_id(index: usize) -> String {
    format!("item_{:03}", index + 1)
}

/// Sort candidates into reading order and assign ids and titles.
///
/// Sort key is `(row_bucket, x)`; exact ties fall back to the mask
/// index so the result never depends on input order. Titles are
/// `Item N`, or the service label when `keep_labels` is set and a
/// label is present.
///
/// `row_tolerance` of zero is treated as one.
#[must_use]
pub fn sequence(
    mut candidates: Vec<RegionCandidate>,
    row_tolerance: u32,
    keep_labels: bool,
) -> Vec<DetectedRegion> {
    let tolerance = row_tolerance.max(1);
    candidates.sort_by_key(|c| (row_bucket(c.coords.y, tolerance), c.coords.x, c.mask_index));

    candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let title = match c.label {
                Some(label) if keep_labels && !label.is_empty() => label,
                _ => format!("Item {}", i + 1),
            };
            DetectedRegion {
                id: region_id(i),
                title,
                coords: c.coords,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn candidate(mask_index: usize, x: u32, y: u32) -> RegionCandidate {
        RegionCandidate {
            mask_index,
            label: None,
            confidence: None,
            coords: BoundingBox::new(x, y, 40, 40),
        }
    }

    #[test]
    fn ids_are_zero_padded() {
        assert_eq!(region_id(0), "item_001");
        assert_eq!(region_id(41), "item_042");
        assert_eq!(region_id(999), "item_1000");
    }

    #[test]
    fn same_row_is_ordered_by_x() {
        let regions = sequence(vec![candidate(0, 200, 12), candidate(1, 10, 10)], 50, false);
        assert_eq!(regions[0].coords.x, 10);
        assert_eq!(regions[0].id, "item_001");
        assert_eq!(regions[0].title, "Item 1");
        assert_eq!(regions[1].coords.x, 200);
        assert_eq!(regions[1].id, "item_002");
        assert_eq!(regions[1].title, "Item 2");
    }

    #[test]
    fn rows_take_precedence_over_x() {
        let regions = sequence(vec![candidate(0, 10, 80), candidate(1, 500, 10)], 50, false);
        assert_eq!(regions[0].coords.y, 10);
        assert_eq!(regions[1].coords.y, 80);
    }

    #[test]
    fn bucket_boundary_splits_close_rows() {
        // y=49 and y=50 are one pixel apart but in different buckets.
        let regions = sequence(vec![candidate(0, 10, 50), candidate(1, 300, 49)], 50, false);
        assert_eq!(regions[0].coords.y, 49);
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let base = vec![
            candidate(0, 300, 5),
            candidate(1, 20, 140),
            candidate(2, 20, 30),
            candidate(3, 300, 130),
            candidate(4, 20, 30),
        ];
        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(sequence(base, 50, false), sequence(reversed, 50, false));
    }

    #[test]
    fn labels_are_used_only_when_requested() {
        let mut labelled = candidate(0, 10, 10);
        labelled.label = Some("card".to_owned());
        let plain = candidate(1, 100, 10);

        let generic = sequence(vec![labelled.clone(), plain.clone()], 50, false);
        assert_eq!(generic[0].title, "Item 1");

        let kept = sequence(vec![labelled, plain], 50, true);
        assert_eq!(kept[0].title, "card");
        assert_eq!(kept[1].title, "Item 2");
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(sequence(Vec::new(), 50, false).is_empty());
    }
}
