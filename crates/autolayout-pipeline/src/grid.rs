//! Binary working grid.

use image::GrayImage;

use crate::types::{Dimensions, PipelineError};

/// A row-major binary raster with values in `{0, 1}`, origin top-left.
///
/// The cell buffer always holds exactly `width * height` entries; the
/// only public constructors enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryGrid {
    width: u32,
    height: u32,
    cells: Vec<u8>,
}

impl BinaryGrid {
    /// An all-background grid.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        let len = cell_count(dimensions);
        Self {
            width: dimensions.width,
            height: dimensions.height,
            cells: vec![0; len],
        }
    }

    /// Wrap an existing buffer. Any non-zero value is normalized to 1.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidGrid`] if `cells.len()` is not
    /// `width * height`.
    pub fn from_cells(dimensions: Dimensions, mut cells: Vec<u8>) -> Result<Self, PipelineError> {
        let expected = cell_count(dimensions);
        if cells.len() != expected {
            return Err(PipelineError::InvalidGrid {
                expected,
                actual: cells.len(),
            });
        }
        for cell in &mut cells {
            *cell = u8::from(*cell != 0);
        }
        Ok(Self {
            width: dimensions.width,
            height: dimensions.height,
            cells,
        })
    }

    /// Build a grid by evaluating `f(x, y)` for every cell.
    pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut grid = Self::new(dimensions);
        for y in 0..dimensions.height {
            for x in 0..dimensions.width {
                if f(x, y) {
                    grid.set(x, y, true);
                }
            }
        }
        grid
    }

    /// Threshold the first channel of a grayscale image: cell is 1 iff
    /// the pixel value is strictly greater than `threshold`.
    #[must_use]
    pub fn from_gray(image: &GrayImage, threshold: u8) -> Self {
        let cells = image
            .as_raw()
            .iter()
            .map(|&v| u8::from(v > threshold))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            cells,
        }
    }

    /// Assemble a grid from pre-validated parts. Callers guarantee the
    /// buffer length and that every cell is 0 or 1.
    pub(crate) fn from_parts(width: u32, height: u32, cells: Vec<u8>) -> Self {
        debug_assert_eq!(cells.len(), width as usize * height as usize);
        Self {
            width,
            height,
            cells,
        }
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Grid dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Row-major cell buffer.
    #[must_use]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Whether the cell at `(x, y)` is foreground. Out-of-range
    /// coordinates are background.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.cells[self.index(x, y)] == 1
    }

    /// Set the cell at `(x, y)`. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            let i = self.index(x, y);
            self.cells[i] = u8::from(value);
        }
    }

    /// Number of foreground cells.
    #[must_use]
    pub fn count_foreground(&self) -> u64 {
        self.cells.iter().map(|&c| u64::from(c)).sum()
    }

    /// Whether no cell is foreground.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|&c| c == 0)
    }

    /// Render as a 0/255 grayscale image for debug snapshots.
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        let pixels = self.cells.iter().map(|&c| c * 255).collect();
        GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    const fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

fn cell_count(dimensions: Dimensions) -> usize {
    dimensions.width as usize * dimensions.height as usize
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_grid_is_empty_with_matching_length() {
        let grid = BinaryGrid::new(Dimensions::new(7, 3));
        assert_eq!(grid.cells().len(), 21);
        assert!(grid.is_empty());
    }

    #[test]
    fn from_cells_rejects_wrong_length() {
        let result = BinaryGrid::from_cells(Dimensions::new(4, 4), vec![0; 15]);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidGrid {
                expected: 16,
                actual: 15
            })
        ));
    }

    #[test]
    fn from_cells_normalizes_values() {
        let grid = BinaryGrid::from_cells(Dimensions::new(2, 2), vec![0, 7, 255, 1]).unwrap();
        assert_eq!(grid.cells(), &[0, 1, 1, 1]);
        assert_eq!(grid.count_foreground(), 3);
    }

    #[test]
    fn from_gray_uses_strict_threshold() {
        let img = GrayImage::from_raw(4, 1, vec![0, 128, 129, 255]).unwrap();
        let grid = BinaryGrid::from_gray(&img, 128);
        assert_eq!(grid.cells(), &[0, 0, 1, 1]);
    }

    #[test]
    fn get_and_set_ignore_out_of_range() {
        let mut grid = BinaryGrid::new(Dimensions::new(3, 3));
        grid.set(5, 5, true);
        assert!(grid.is_empty());
        grid.set(2, 1, true);
        assert!(grid.get(2, 1));
        assert!(!grid.get(1, 2));
        assert!(!grid.get(9, 9));
    }

    #[test]
    fn to_gray_maps_to_full_range() {
        let grid = BinaryGrid::from_fn(Dimensions::new(2, 1), |x, _| x == 1);
        let gray = grid.to_gray();
        assert_eq!(gray.as_raw(), &vec![0, 255]);
    }
}
