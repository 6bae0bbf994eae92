//! Integration tests: drive the detector end to end with a static
//! segmentation client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use autolayout_detect::autolayout_pipeline::{
    CollectingObserver, Dimensions, GrayImage, MaskVerdict, Point, PolygonMask, RawMask,
    SegmentedMask, StageObserver,
};
use autolayout_detect::{
    CancellationToken, Credentials, DetectRequest, DetectState, Detector, DetectorConfig,
    ExecutionMode, SegmentationError, StaticSegmentationClient, StatusKind,
};

const SOURCE: Dimensions = Dimensions::new(400, 300);

fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgba8,
    )
    .unwrap();
    buf
}

fn source_png() -> Vec<u8> {
    encode_png(&image::RgbaImage::from_pixel(
        SOURCE.width,
        SOURCE.height,
        image::Rgba([240, 240, 240, 255]),
    ))
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64, label: &str) -> SegmentedMask {
    SegmentedMask::new(RawMask::Polygon(PolygonMask {
        points: vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ],
        frame: SOURCE,
    }))
    .with_label(label)
}

fn encoded_rect(x0: u32, y0: u32, x1: u32, y1: u32) -> SegmentedMask {
    let img = image::RgbaImage::from_fn(SOURCE.width, SOURCE.height, |x, y| {
        if (x0..=x1).contains(&x) && (y0..=y1).contains(&y) {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    });
    SegmentedMask::new(RawMask::Encoded(encode_png(&img)))
}

/// Five objects in two rows, deliberately out of reading order.
fn layout_masks() -> Vec<SegmentedMask> {
    vec![
        rect(260.0, 170.0, 380.0, 280.0, "photo"),
        rect(20.0, 20.0, 120.0, 120.0, "card"),
        encoded_rect(150, 175, 240, 280),
        rect(280.0, 30.0, 380.0, 130.0, "card"),
        rect(150.0, 25.0, 250.0, 125.0, "card"),
    ]
}

fn detector(masks: Vec<SegmentedMask>, execution: ExecutionMode) -> Detector<StaticSegmentationClient> {
    Detector::new(
        StaticSegmentationClient::new(masks),
        DetectorConfig {
            execution,
            ..DetectorConfig::default()
        },
    )
}

#[tokio::test]
async fn regions_come_back_in_reading_order() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let outcome = detector.detect(DetectRequest::new(source_png(), "cards")).await;

    assert_eq!(outcome.status.kind, StatusKind::Done);
    let order: Vec<(u32, u32)> = outcome
        .regions
        .iter()
        .map(|r| (r.coords.x, r.coords.y))
        .collect();
    assert_eq!(
        order,
        vec![(20, 20), (150, 25), (280, 30), (150, 175), (260, 170)]
    );
    let ids: Vec<&str> = outcome.regions.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["item_001", "item_002", "item_003", "item_004", "item_005"]
    );
    assert_eq!(outcome.status.message, "Found 5 regions");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequential_and_parallel_agree() {
    let sequential = detector(layout_masks(), ExecutionMode::Sequential)
        .detect(DetectRequest::new(source_png(), "cards"))
        .await;
    let parallel = detector(layout_masks(), ExecutionMode::Parallel)
        .detect(DetectRequest::new(source_png(), "cards"))
        .await;

    assert_eq!(parallel.status.kind, StatusKind::Done);
    assert_eq!(sequential.regions, parallel.regions);

    let seq_masks: Vec<usize> = sequential.diagnostics.unwrap().masks.iter().map(|m| m.index).collect();
    let par_masks: Vec<usize> = parallel.diagnostics.unwrap().masks.iter().map(|m| m.index).collect();
    assert_eq!(seq_masks, par_masks);
}

#[tokio::test]
async fn connect_failure_fails_with_empty_result() {
    let client = StaticSegmentationClient::new(layout_masks())
        .failing_connect(SegmentationError::Unreachable("connection refused".to_owned()));
    let detector = Detector::new(client, DetectorConfig::default());
    let progress = detector.subscribe();

    let outcome = detector.detect(DetectRequest::new(source_png(), "cards")).await;
    assert!(outcome.is_failed());
    assert!(outcome.regions.is_empty());
    assert!(outcome.diagnostics.is_none());
    assert!(outcome.status.message.contains("connection refused"));
    assert_eq!(progress.borrow().state, DetectState::Failed);

    // The failed connect is not cached: the next call tries again.
    assert!(!detector.is_connected());
    let _ = detector.detect(DetectRequest::new(source_png(), "cards")).await;
    assert_eq!(detector.client().connect_count(), 2);
}

#[tokio::test]
async fn request_failure_fails_with_empty_result() {
    let client = StaticSegmentationClient::new(layout_masks())
        .failing_segment(SegmentationError::MalformedResponse("no outputs".to_owned()));
    let detector = Detector::new(client, DetectorConfig::default());

    let outcome = detector.detect(DetectRequest::new(source_png(), "cards")).await;
    assert_eq!(outcome.status.kind, StatusKind::Failed);
    assert!(outcome.regions.is_empty());
    assert!(detector.is_connected());
}

#[tokio::test]
async fn undecodable_source_fails_before_connecting() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let outcome = detector
        .detect(DetectRequest::new(vec![0xDE, 0xAD, 0xBE, 0xEF], "cards"))
        .await;
    assert!(outcome.is_failed());
    assert_eq!(detector.client().connect_count(), 0);
}

#[tokio::test]
async fn malformed_mask_does_not_affect_others() {
    let masks = vec![
        rect(20.0, 20.0, 120.0, 120.0, "card"),
        SegmentedMask::new(RawMask::Encoded(vec![0x89, 0x50, 0x4E, 0x47])),
        rect(150.0, 25.0, 250.0, 125.0, "card"),
    ];
    let outcome = detector(masks, ExecutionMode::Sequential)
        .detect(DetectRequest::new(source_png(), "cards"))
        .await;

    assert_eq!(outcome.status.kind, StatusKind::Done);
    assert_eq!(outcome.regions.len(), 2);
    let diagnostics = outcome.diagnostics.unwrap();
    assert_eq!(diagnostics.failed_count(), 1);
    assert!(matches!(
        diagnostics.masks[1].verdict,
        MaskVerdict::DecodeFailed { .. }
    ));
}

#[tokio::test]
async fn session_connects_once_across_batches() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let creds = Credentials::new().with("api_key", "first");

    let first = detector
        .detect(DetectRequest::new(source_png(), "cards").with_credentials(creds))
        .await;
    let second = detector
        .detect(
            DetectRequest::new(source_png(), "cards")
                .with_credentials(Credentials::new().with("api_key", "second")),
        )
        .await;

    assert_eq!(first.regions, second.regions);
    assert_eq!(detector.client().connect_count(), 1);
    assert_eq!(detector.client().segment_count(), 2);
}

/// Cancels the shared token as soon as it sees the first snapshot.
struct CancelOnSnapshot(CancellationToken);

impl StageObserver for CancelOnSnapshot {
    fn on_stage(&self, _title: &str, _raster: &GrayImage) {
        self.0.cancel();
    }
}

#[tokio::test]
async fn cancellation_returns_regions_accepted_so_far() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let cancel = CancellationToken::new();
    let request = DetectRequest::new(source_png(), "cards")
        .with_cancellation(cancel.clone())
        .with_debug(Some(1), Arc::new(CancelOnSnapshot(cancel)));

    let outcome = detector.detect(request).await;

    // Mask 1 is cancelled mid-flight but still finishes.
    assert_eq!(outcome.status.kind, StatusKind::Cancelled);
    let origins: Vec<(u32, u32)> = outcome
        .regions
        .iter()
        .map(|r| (r.coords.x, r.coords.y))
        .collect();
    assert_eq!(origins, vec![(20, 20), (260, 170)]);
    assert_eq!(outcome.regions[0].id, "item_001");
    assert_eq!(outcome.diagnostics.unwrap().masks.len(), 2);
}

#[tokio::test]
async fn cancelled_before_start_returns_nothing() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = detector
        .detect(DetectRequest::new(source_png(), "cards").with_cancellation(cancel))
        .await;
    assert_eq!(outcome.status.kind, StatusKind::Cancelled);
    assert!(outcome.regions.is_empty());
}

#[tokio::test]
async fn parallel_cancelled_before_start_returns_nothing() {
    let detector = detector(layout_masks(), ExecutionMode::Parallel);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = detector
        .detect(DetectRequest::new(source_png(), "cards").with_cancellation(cancel))
        .await;
    assert_eq!(outcome.status.kind, StatusKind::Cancelled);
    assert!(outcome.regions.is_empty());
    assert!(outcome.diagnostics.unwrap().masks.is_empty());
    assert_eq!(detector.subscribe().borrow().state, DetectState::Cancelled);
}

#[tokio::test]
async fn debug_observer_gets_three_snapshots() {
    let observer = Arc::new(CollectingObserver::new());
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let request = DetectRequest::new(source_png(), "cards").with_debug(
        autolayout_detect::debug_index_from_raw(3),
        Arc::clone(&observer) as Arc<dyn StageObserver>,
    );
    let _ = detector.detect(request).await;

    assert_eq!(
        observer.titles(),
        vec![
            "Item 4 (card) - 1. Original (Scaled to 400x300)",
            "Item 4 (card) - 2. Shaved (K=9)",
            "Item 4 (card) - 3. Closed (Final)",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debug_observer_works_in_parallel_mode() {
    let observer = Arc::new(CollectingObserver::new());
    let detector = detector(layout_masks(), ExecutionMode::Parallel);
    let request = DetectRequest::new(source_png(), "cards")
        .with_debug(Some(0), Arc::clone(&observer) as Arc<dyn StageObserver>);
    let _ = detector.detect(request).await;
    assert_eq!(observer.len(), 3);
}

#[tokio::test]
async fn disabled_debug_index_sends_nothing() {
    let observer = Arc::new(CollectingObserver::new());
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let request = DetectRequest::new(source_png(), "cards").with_debug(
        autolayout_detect::debug_index_from_raw(-1),
        Arc::clone(&observer) as Arc<dyn StageObserver>,
    );
    let _ = detector.detect(request).await;
    assert!(observer.is_empty());
}

#[tokio::test]
async fn zero_masks_is_done_with_empty_result() {
    let detector = detector(Vec::new(), ExecutionMode::Sequential);
    let progress = detector.subscribe();
    let outcome = detector.detect(DetectRequest::new(source_png(), "cards")).await;

    assert_eq!(outcome.status.kind, StatusKind::Done);
    assert_eq!(outcome.status.message, "No objects detected");
    assert!(outcome.regions.is_empty());
    assert_eq!(progress.borrow().state, DetectState::Done);
}

#[tokio::test]
async fn shave_ratio_is_clamped() {
    let detector = detector(layout_masks(), ExecutionMode::Sequential);
    let outcome = detector
        .detect(DetectRequest::new(source_png(), "cards").with_shave_ratio(0.5))
        .await;

    assert_eq!(outcome.status.kind, StatusKind::Done);
    // floor(400 * 0.05) = 20 -> 21
    assert_eq!(outcome.diagnostics.unwrap().shave_kernel, 21);
}
