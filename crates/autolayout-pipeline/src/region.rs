//! Bounding-box extraction and noise rejection.

use serde::{Deserialize, Serialize};

use crate::grid::BinaryGrid;
use crate::scale::Scale;
use crate::types::BoundingBox;

/// Result of extracting a region from one refined mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegionOutcome {
    /// A region large enough to keep, in original-image space.
    Accepted(BoundingBox),
    /// The grid had no foreground pixels.
    Empty,
    /// The region was smaller than the noise threshold.
    BelowMinArea {
        /// The rejected box, in original-image space.
        coords: BoundingBox,
        /// `coords.w * coords.h`.
        area: u64,
        /// The threshold it failed to reach.
        min_area: f64,
    },
}

impl RegionOutcome {
    /// The accepted box, if any.
    #[must_use]
    pub const fn accepted(&self) -> Option<BoundingBox> {
        match *self {
            Self::Accepted(b) => Some(b),
            Self::Empty | Self::BelowMinArea { .. } => None,
        }
    }
}

/// Minimal box enclosing all foreground cells, in working space.
///
/// The box is `{min_x, min_y, max_x - min_x, max_y - min_y}`: a single
/// pixel has zero width and height. Returns `None` for an empty grid.
///
/// Scans down for the first non-empty row and up for the last, then
/// looks for left/right extrema only inside that row range.
#[must_use]
pub fn find_bounding_box(grid: &BinaryGrid) -> Option<BoundingBox> {
    let w = grid.width() as usize;
    if w == 0 {
        return None;
    }
    let rows: Vec<&[u8]> = grid.cells().chunks_exact(w).collect();
    let occupied = |row: &&[u8]| row.contains(&1);

    let min_y = rows.iter().position(occupied)?;
    let max_y = rows.iter().rposition(occupied)?;

    let mut min_x = w;
    let mut max_x = 0;
    for row in &rows[min_y..=max_y] {
        if let Some(left) = row.iter().position(|&c| c == 1) {
            min_x = min_x.min(left);
        }
        if let Some(right) = row.iter().rposition(|&c| c == 1) {
            max_x = max_x.max(right);
        }
    }

    Some(BoundingBox::new(
        to_u32(min_x),
        to_u32(min_y),
        to_u32(max_x - min_x),
        to_u32(max_y - min_y),
    ))
}

/// Extract the region for a refined grid and apply the area filter.
///
/// The working-space box is mapped to original space first; the region
/// is rejected when `w * h < min_area`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn extract_region(grid: &BinaryGrid, scale: &Scale, min_area: f64) -> RegionOutcome {
    let Some(working) = find_bounding_box(grid) else {
        return RegionOutcome::Empty;
    };
    let coords = scale.to_original(working);
    let area = coords.area();

    if (area as f64) < min_area {
        RegionOutcome::BelowMinArea {
            coords,
            area,
            min_area,
        }
    } else {
        RegionOutcome::Accepted(coords)
    }
}

/// Smallest area kept for an original image: `ratio * width * height`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn min_area(scale: &Scale, ratio: f64) -> f64 {
    ratio * scale.original().pixel_count() as f64
}

#[allow(clippy::cast_possible_truncation)]
const fn to_u32(v: usize) -> u32 {
    v as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn grid_with(dims: Dimensions, on: &[(u32, u32)]) -> BinaryGrid {
        BinaryGrid::from_fn(dims, |x, y| on.contains(&(x, y)))
    }

    #[test]
    fn empty_grid_has_no_region() {
        let grid = BinaryGrid::new(Dimensions::new(10, 10));
        assert_eq!(find_bounding_box(&grid), None);
        let scale = Scale::new(Dimensions::new(10, 10), 2000).unwrap();
        assert_eq!(extract_region(&grid, &scale, 0.0), RegionOutcome::Empty);
    }

    #[test]
    fn bounding_box_spans_extrema_from_different_rows() {
        // Leftmost pixel is on the last row, rightmost on the first.
        let grid = grid_with(Dimensions::new(12, 10), &[(8, 2), (5, 4), (3, 7)]);
        assert_eq!(find_bounding_box(&grid), Some(BoundingBox::new(3, 2, 5, 5)));
    }

    #[test]
    fn single_pixel_has_zero_extent() {
        let grid = grid_with(Dimensions::new(5, 5), &[(2, 3)]);
        assert_eq!(find_bounding_box(&grid), Some(BoundingBox::new(2, 3, 0, 0)));
    }

    #[test]
    fn box_is_mapped_to_original_space() {
        let scale = Scale::new(Dimensions::new(400, 200), 100).unwrap();
        assert_eq!(scale.working(), Dimensions::new(100, 50));
        let grid = BinaryGrid::from_fn(scale.working(), |x, y| {
            (10..=30).contains(&x) && (5..=25).contains(&y)
        });
        let outcome = extract_region(&grid, &scale, 0.0);
        assert_eq!(
            outcome,
            RegionOutcome::Accepted(BoundingBox::new(40, 20, 80, 80))
        );
    }

    #[test]
    fn tiny_region_is_rejected() {
        // w=2, h=2 on a 1000x1000 image: 4 < 0.0005 * 1e6 = 500.
        let scale = Scale::new(Dimensions::new(1000, 1000), 2000).unwrap();
        let grid = BinaryGrid::from_fn(scale.working(), |x, y| {
            (100..=102).contains(&x) && (100..=102).contains(&y)
        });
        let threshold = min_area(&scale, 0.0005);
        assert!((threshold - 500.0).abs() < 1e-9);
        let outcome = extract_region(&grid, &scale, threshold);
        assert!(matches!(
            outcome,
            RegionOutcome::BelowMinArea { area: 4, .. }
        ));
        assert_eq!(outcome.accepted(), None);
    }

    #[test]
    fn region_at_threshold_is_kept() {
        // 25 x 20 = 500, exactly the threshold.
        let scale = Scale::new(Dimensions::new(1000, 1000), 2000).unwrap();
        let grid = grid_with(scale.working(), &[(0, 0), (25, 20)]);
        let outcome = extract_region(&grid, &scale, 500.0);
        assert_eq!(
            outcome,
            RegionOutcome::Accepted(BoundingBox::new(0, 0, 25, 20))
        );
    }
}
