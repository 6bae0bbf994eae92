//! Binary erosion and dilation with square kernels.
//!
//! The primary implementation, [`MorphologyKind::SlidingWindow`], runs
//! each operator as two separable 1-D passes (rows, then columns). Each
//! pass keeps a running count of foreground cells in the window, adding
//! the cell that enters and subtracting the one that leaves, so a pass
//! costs `O(W·H)` regardless of kernel size.
//!
//! # Boundary policy
//!
//! Windows are clipped to the grid. Near an edge the window shrinks;
//! it is never zero-padded or wrapped. Erosion compares the foreground
//! count against the clipped window size, so a pixel on the border of a
//! full-grid object survives erosion. The noise-area threshold used by
//! region extraction is tuned against this behavior.
//!
//! # Strategy pattern
//!
//! [`MorphologyKind::Naive`] evaluates every window directly. It exists
//! to cross-check the sliding-window version and is far too slow for
//! production-size masks.

use serde::{Deserialize, Serialize};

use crate::grid::BinaryGrid;

/// Smallest kernel size used by the pipeline.
pub const MIN_KERNEL_SIZE: u32 = 3;

/// Square structuring element of odd size `>= 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kernel(u32);

impl Kernel {
    /// Normalize an arbitrary size into a valid kernel: forced odd,
    /// then raised to at least [`MIN_KERNEL_SIZE`].
    #[must_use]
    pub const fn new(size: u32) -> Self {
        let odd = force_odd(size);
        if odd < MIN_KERNEL_SIZE {
            Self(MIN_KERNEL_SIZE)
        } else {
            Self(odd)
        }
    }

    /// Kernel side length.
    #[must_use]
    pub const fn size(self) -> u32 {
        self.0
    }

    /// Kernel radius `(size - 1) / 2`.
    #[must_use]
    pub const fn radius(self) -> usize {
        ((self.0 - 1) / 2) as usize
    }
}

/// Round an even number up to the next odd number.
#[must_use]
pub const fn force_odd(n: u32) -> u32 {
    if n % 2 == 0 { n.saturating_add(1) } else { n }
}

/// Opening kernel: `max(3, force_odd(floor(working_width * shave_ratio)))`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn shave_kernel(working_width: u32, shave_ratio: f64) -> Kernel {
    let raw = (f64::from(working_width) * shave_ratio).floor().max(0.0) as u32;
    Kernel::new(raw)
}

/// Closing kernel: `max(3, force_odd(round(base * scale)))`.
///
/// `base` is the kernel size tuned at full resolution; it shrinks in
/// proportion to the working downscale factor.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn close_kernel(base: u32, scale: f64) -> Kernel {
    let raw = (f64::from(base) * scale).round().max(0.0) as u32;
    Kernel::new(raw)
}

/// Selects the erode/dilate implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MorphologyKind {
    /// Separable running-count passes, `O(W·H)` per operator.
    #[default]
    SlidingWindow,
    /// Direct evaluation of every clipped window. Reference only.
    Naive,
}

/// Binary morphology operators.
///
/// Implementors provide [`erode`](Self::erode) and
/// [`dilate`](Self::dilate); opening and closing are composed from them.
pub trait Morphology {
    /// Cell is 1 iff every cell of its clipped window is 1.
    fn erode(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid;

    /// Cell is 1 iff at least one cell of its clipped window is 1.
    fn dilate(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid;

    /// Erode then dilate: removes protrusions and specks smaller than
    /// the kernel ("shaving").
    fn open(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid {
        self.dilate(&self.erode(grid, kernel), kernel)
    }

    /// Dilate then erode: fills holes and gaps smaller than the kernel.
    fn close(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid {
        self.erode(&self.dilate(grid, kernel), kernel)
    }
}

impl Morphology for MorphologyKind {
    fn erode(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid {
        match *self {
            Self::SlidingWindow => separable(grid, kernel, Operator::Erode),
            Self::Naive => naive(grid, kernel, Operator::Erode),
        }
    }

    fn dilate(&self, grid: &BinaryGrid, kernel: Kernel) -> BinaryGrid {
        match *self {
            Self::SlidingWindow => separable(grid, kernel, Operator::Dilate),
            Self::Naive => naive(grid, kernel, Operator::Dilate),
        }
    }
}

#[derive(Clone, Copy)]
enum Operator {
    Erode,
    Dilate,
}

impl Operator {
    /// Decide a cell from the window's foreground count and size.
    const fn apply(self, count: usize, window: usize) -> u8 {
        let on = match self {
            Self::Erode => count == window,
            Self::Dilate => count > 0,
        };
        on as u8
    }
}

/// Horizontal pass into a scratch buffer, then vertical pass into the
/// output.
fn separable(grid: &BinaryGrid, kernel: Kernel, op: Operator) -> BinaryGrid {
    let w = grid.width() as usize;
    let h = grid.height() as usize;
    let r = kernel.radius();
    let input = grid.cells();

    let mut temp = vec![0u8; w * h];
    for y in 0..h {
        let row = y * w;
        slide_line(input, &mut temp, row, 1, w, r, op);
    }

    let mut output = vec![0u8; w * h];
    for x in 0..w {
        slide_line(&temp, &mut output, x, w, h, r, op);
    }

    BinaryGrid::from_parts(grid.width(), grid.height(), output)
}

/// Run one 1-D window over `len` cells starting at `start` with the
/// given `stride`, reading from `src` and writing to `dst`.
///
/// Before cell `i` is decided, `count` holds the sum over
/// `[i - r, i + r - 1]` clipped to the line; adding cell `i + r` (if
/// present) completes the window, and cell `i - r` (if present) leaves
/// it afterwards.
fn slide_line(
    src: &[u8],
    dst: &mut [u8],
    start: usize,
    stride: usize,
    len: usize,
    r: usize,
    op: Operator,
) {
    if len == 0 {
        return;
    }
    let at = |i: usize| start + i * stride;

    let mut count: usize = (0..r.min(len)).map(|i| usize::from(src[at(i)])).sum();
    for i in 0..len {
        if i + r < len {
            count += usize::from(src[at(i + r)]);
        }
        let lo = i.saturating_sub(r);
        let hi = (i + r).min(len - 1);
        dst[at(i)] = op.apply(count, hi - lo + 1);
        if i >= r {
            count -= usize::from(src[at(i - r)]);
        }
    }
}

/// Evaluate each clipped `k × k` window directly.
fn naive(grid: &BinaryGrid, kernel: Kernel, op: Operator) -> BinaryGrid {
    let w = grid.width() as usize;
    let h = grid.height() as usize;
    let r = kernel.radius();
    let input = grid.cells();
    let mut output = vec![0u8; w * h];

    for y in 0..h {
        let (top, bottom) = (y.saturating_sub(r), (y + r).min(h - 1));
        for x in 0..w {
            let (left, right) = (x.saturating_sub(r), (x + r).min(w - 1));
            let mut count = 0;
            for wy in top..=bottom {
                let row = wy * w;
                count += input[row + left..=row + right]
                    .iter()
                    .map(|&c| usize::from(c))
                    .sum::<usize>();
            }
            let window = (bottom - top + 1) * (right - left + 1);
            output[y * w + x] = op.apply(count, window);
        }
    }

    BinaryGrid::from_parts(grid.width(), grid.height(), output)
}
