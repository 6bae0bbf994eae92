//! Batch diagnostics: per-mask verdicts, timings and pixel counts.
//!
//! Every batch collects these alongside its regions. They are the only
//! place where rejected or undecodable masks are visible: neither is an
//! error from the caller's point of view.
//!
//! Durations are serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::region::RegionOutcome;
use crate::types::{BoundingBox, Dimensions};

/// Serde support for `std::time::Duration` as fractional seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Fails for negative, non-finite or out-of-range values.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// What happened to one mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaskVerdict {
    /// A region was produced.
    Accepted {
        /// Region in original-image space.
        coords: BoundingBox,
    },
    /// Nothing survived thresholding and morphology.
    NoForeground,
    /// The region was discarded as noise.
    BelowMinArea {
        /// Rejected region in original-image space.
        coords: BoundingBox,
        /// Its area.
        area: u64,
        /// The threshold it missed.
        min_area: f64,
    },
    /// The mask could not be rasterized.
    DecodeFailed {
        /// Rendered error.
        message: String,
    },
}

impl From<RegionOutcome> for MaskVerdict {
    fn from(outcome: RegionOutcome) -> Self {
        match outcome {
            RegionOutcome::Accepted(coords) => Self::Accepted { coords },
            RegionOutcome::Empty => Self::NoForeground,
            RegionOutcome::BelowMinArea {
                coords,
                area,
                min_area,
            } => Self::BelowMinArea {
                coords,
                area,
                min_area,
            },
        }
    }
}

/// Foreground cell counts after each refinement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageCounts {
    /// After thresholding.
    pub thresholded: u64,
    /// After opening.
    pub opened: u64,
    /// After closing.
    pub closed: u64,
}

/// Diagnostics for one mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskDiagnostics {
    /// Position of the mask in the service response.
    pub index: usize,
    /// Service label, if any.
    pub label: Option<String>,
    /// Outcome.
    pub verdict: MaskVerdict,
    /// Wall-clock time spent on this mask (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Foreground counts; `None` when rasterization failed.
    pub foreground: Option<StageCounts>,
}

/// Diagnostics for a whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDiagnostics {
    /// Source image size.
    pub original: Dimensions,
    /// Working grid size.
    pub working: Dimensions,
    /// Downscale factor.
    pub scale: f64,
    /// Opening kernel size.
    pub shave_kernel: u32,
    /// Closing kernel size.
    pub close_kernel: u32,
    /// Noise-rejection area threshold, in original pixels.
    pub min_area: f64,
    /// Per-mask entries, ordered by mask index.
    pub masks: Vec<MaskDiagnostics>,
    /// Wall-clock duration of the batch (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl BatchDiagnostics {
    /// Number of masks that produced a region.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.count(|v| matches!(v, MaskVerdict::Accepted { .. }))
    }

    /// Number of masks discarded as empty or too small.
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.count(|v| {
            matches!(
                v,
                MaskVerdict::NoForeground | MaskVerdict::BelowMinArea { .. }
            )
        })
    }

    /// Number of masks that failed to rasterize.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|v| matches!(v, MaskVerdict::DecodeFailed { .. }))
    }

    fn count(&self, pred: impl Fn(&MaskVerdict) -> bool) -> usize {
        self.masks.iter().filter(|m| pred(&m.verdict)).count()
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Batch Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} -> working {}x{} (scale {:.4})",
            self.original.width,
            self.original.height,
            self.working.width,
            self.working.height,
            self.scale,
        ));
        lines.push(format!(
            "Kernels: shave K={}  close K={}  |  min area {:.1}px",
            self.shave_kernel, self.close_kernel, self.min_area,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<6} {:<16} {:>10}  {:<24} {}",
            "Mask", "Label", "Duration", "Foreground", "Verdict"
        ));
        lines.push("-".repeat(80));

        for mask in &self.masks {
            let label = mask.label.as_deref().unwrap_or("-");
            let ms = duration_ms(mask.duration);
            let foreground = mask.foreground.map_or_else(
                || "-".to_owned(),
                |c| format!("{}->{}->{}", c.thresholded, c.opened, c.closed),
            );
            let verdict = format_verdict(&mask.verdict);
            lines.push(format!(
                "{:<6} {label:<16} {ms:>8.3}ms  {foreground:<24} {verdict}",
                mask.index
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "Accepted: {}  |  Rejected: {}  |  Failed: {}",
            self.accepted_count(),
            self.rejected_count(),
            self.failed_count(),
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_verdict(verdict: &MaskVerdict) -> String {
    match verdict {
        MaskVerdict::Accepted { coords } => format!(
            "accepted ({}, {}) {}x{}",
            coords.x, coords.y, coords.w, coords.h
        ),
        MaskVerdict::NoForeground => "no foreground".to_owned(),
        MaskVerdict::BelowMinArea { area, min_area, .. } => {
            format!("too small ({area} < {min_area:.1})")
        }
        MaskVerdict::DecodeFailed { message } => format!("failed: {message}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> BatchDiagnostics {
        BatchDiagnostics {
            original: Dimensions::new(4000, 3000),
            working: Dimensions::new(2000, 1500),
            scale: 0.5,
            shave_kernel: 41,
            close_kernel: 9,
            min_area: 6000.0,
            masks: vec![
                MaskDiagnostics {
                    index: 0,
                    label: Some("card".to_owned()),
                    verdict: MaskVerdict::Accepted {
                        coords: BoundingBox::new(10, 20, 300, 400),
                    },
                    duration: Duration::from_millis(12),
                    foreground: Some(StageCounts {
                        thresholded: 30_500,
                        opened: 30_000,
                        closed: 30_010,
                    }),
                },
                MaskDiagnostics {
                    index: 1,
                    label: None,
                    verdict: MaskVerdict::BelowMinArea {
                        coords: BoundingBox::new(0, 0, 4, 4),
                        area: 16,
                        min_area: 6000.0,
                    },
                    duration: Duration::from_millis(3),
                    foreground: Some(StageCounts::default()),
                },
                MaskDiagnostics {
                    index: 2,
                    label: None,
                    verdict: MaskVerdict::DecodeFailed {
                        message: "input image data is empty".to_owned(),
                    },
                    duration: Duration::ZERO,
                    foreground: None,
                },
            ],
            total_duration: Duration::from_millis(20),
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn counts_by_verdict() {
        let diag = sample();
        assert_eq!(diag.accepted_count(), 1);
        assert_eq!(diag.rejected_count(), 1);
        assert_eq!(diag.failed_count(), 1);
    }

    #[test]
    fn report_lists_every_mask() {
        let report = sample().report();
        assert!(report.contains("Batch Diagnostics Report"));
        assert!(report.contains("shave K=41"));
        assert!(report.contains("card"));
        assert!(report.contains("too small (16 < 6000.0)"));
        assert!(report.contains("failed: input image data is empty"));
        assert!(report.contains("Accepted: 1  |  Rejected: 1  |  Failed: 1"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        let total = json["total_duration"].as_f64().unwrap();
        assert!((total - 0.02).abs() < 1e-9);

        let back: BatchDiagnostics = serde_json::from_value(json).unwrap();
        assert!((back.masks[0].duration.as_secs_f64() - 0.012).abs() < 1e-9);
        assert_eq!(back.masks[2].verdict, sample().masks[2].verdict);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<BatchDiagnostics>(json).is_err());
    }

    #[test]
    fn verdict_from_outcome() {
        assert_eq!(
            MaskVerdict::from(RegionOutcome::Empty),
            MaskVerdict::NoForeground
        );
        let coords = BoundingBox::new(1, 2, 3, 4);
        assert_eq!(
            MaskVerdict::from(RegionOutcome::Accepted(coords)),
            MaskVerdict::Accepted { coords }
        );
    }
}
