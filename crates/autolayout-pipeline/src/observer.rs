//! Debug snapshots of intermediate mask rasters.
//!
//! When a batch is run with a debug mask selected, the three rasters
//! that decide its region (thresholded, opened, closed) are handed to a
//! [`StageObserver`] along with a human-readable title. Observers only
//! see copies; nothing they do can change the result.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::morphology::Kernel;
use crate::types::{Dimensions, GrayImage};

/// Receiver for labelled intermediate rasters.
pub trait StageObserver: Send + Sync {
    /// Called once per snapshot. `raster` is 0/255 grayscale.
    fn on_stage(&self, title: &str, raster: &GrayImage);
}

impl<T: StageObserver + ?Sized> StageObserver for Arc<T> {
    fn on_stage(&self, title: &str, raster: &GrayImage) {
        (**self).on_stage(title, raster);
    }
}

/// Which mask to observe and who receives the snapshots.
#[derive(Clone, Copy)]
pub struct DebugTarget<'a> {
    /// Zero-based index of the observed mask within the batch.
    pub mask_index: usize,
    /// Snapshot receiver.
    pub observer: &'a dyn StageObserver,
}

impl std::fmt::Debug for DebugTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTarget")
            .field("mask_index", &self.mask_index)
            .finish_non_exhaustive()
    }
}

/// One captured snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Stage title, e.g. `Item 2 (card) - 2. Shaved (K=41)`.
    pub title: String,
    /// The raster as it was at that stage.
    pub raster: GrayImage,
}

/// Observer that keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl CollectingObserver {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Whether no snapshot has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Titles in arrival order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.snapshots.lock().iter().map(|s| s.title.clone()).collect()
    }

    /// Take every snapshot received so far, leaving the collector empty.
    #[must_use]
    pub fn take(&self) -> Vec<Snapshot> {
        std::mem::take(&mut *self.snapshots.lock())
    }
}

impl StageObserver for CollectingObserver {
    fn on_stage(&self, title: &str, raster: &GrayImage) {
        self.snapshots.lock().push(Snapshot {
            title: title.to_owned(),
            raster: raster.clone(),
        });
    }
}

/// Display name of a mask in snapshot titles: `Item 3 (card)`.
#[must_use]
pub fn mask_name(mask_index: usize, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("Item {} ({label})", mask_index + 1),
        _ => format!("Item {}", mask_index + 1),
    }
}

/// Title of the thresholded snapshot.
#[must_use]
pub fn original_title(name: &str, working: Dimensions) -> String {
    format!(
        "{name} - 1. Original (Scaled to {}x{})",
        working.width, working.height
    )
}

/// Title of the opened snapshot.
#[must_use]
pub fn shaved_title(name: &str, kernel: Kernel) -> String {
    format!("{name} - 2. Shaved (K={})", kernel.size())
}

/// Title of the closed snapshot.
#[must_use]
pub fn closed_title(name: &str) -> String {
    format!("{name} - 3. Closed (Final)")
}
