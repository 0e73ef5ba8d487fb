//! Integration tests for the adaptive timing feedback loop
//!
//! Drives the engine through its handle the same way the coordinator and
//! monitor loops do. Jitter is disabled so intervals are exact.

mod common;

use std::time::Duration;
use ticketstrike::domain::models::{OperatingMode, TimingConfig};
use ticketstrike::services::{TimingEngine, TimingHandle, TimingPattern};
use tokio_util::sync::CancellationToken;

const BASE: Duration = Duration::from_secs(5);
const STEADY_RATE: f64 = 1.0;

fn spawn_engine() -> (TimingHandle, CancellationToken) {
    let config = TimingConfig {
        jitter: 0.0,
        ..TimingConfig::default()
    };
    let shutdown = CancellationToken::new();
    let (handle, _task) = TimingEngine::new(config).spawn(shutdown.clone());
    (handle, shutdown)
}

#[tokio::test]
async fn test_success_streak_shortens_adaptive_interval() {
    let (timing, shutdown) = spawn_engine();

    let baseline = timing
        .next_interval(BASE, OperatingMode::Adaptive, STEADY_RATE)
        .await;
    assert_eq!(baseline, BASE);

    for _ in 0..10 {
        timing.record_outcome(true, false, Duration::from_millis(400));
    }
    let snapshot = timing.flush().await;
    assert_eq!(snapshot.pattern, TimingPattern::Eager);
    assert!(snapshot.delay_scale < 1.0);

    let after = timing
        .next_interval(BASE, OperatingMode::Adaptive, STEADY_RATE)
        .await;
    assert!(after < baseline, "{after:?} should be below {baseline:?}");
    assert!(after >= TimingEngine::floor(OperatingMode::Adaptive));

    shutdown.cancel();
}

#[tokio::test]
async fn test_long_streaks_never_cross_the_floor() {
    let (timing, shutdown) = spawn_engine();
    let floor = TimingEngine::floor(OperatingMode::Adaptive);
    let base = Duration::from_millis(2_500);

    let mut previous = timing
        .next_interval(base, OperatingMode::Adaptive, STEADY_RATE)
        .await;
    for _ in 0..8 {
        for _ in 0..10 {
            timing.record_outcome(true, false, Duration::from_millis(300));
        }
        timing.flush().await;

        let interval = timing
            .next_interval(base, OperatingMode::Adaptive, STEADY_RATE)
            .await;
        assert!(interval <= previous);
        assert!(interval >= floor);
        previous = interval;
    }
    assert_eq!(previous, floor);

    shutdown.cancel();
}

#[tokio::test]
async fn test_failure_streak_lengthens_interval() {
    let (timing, shutdown) = spawn_engine();
    let baseline = timing
        .next_interval(BASE, OperatingMode::Adaptive, STEADY_RATE)
        .await;

    for _ in 0..3 {
        timing.record_outcome(false, false, Duration::from_millis(900));
    }
    let snapshot = timing.flush().await;
    assert_eq!(snapshot.pattern, TimingPattern::Cautious);

    let after = timing
        .next_interval(BASE, OperatingMode::Adaptive, STEADY_RATE)
        .await;
    assert!(after > baseline);

    shutdown.cancel();
}

#[tokio::test]
async fn test_fixed_modes_ignore_feedback() {
    let (timing, shutdown) = spawn_engine();
    let before = timing
        .next_interval(BASE, OperatingMode::Stealth, STEADY_RATE)
        .await;

    for _ in 0..10 {
        timing.record_outcome(true, false, Duration::from_millis(200));
    }
    timing.flush().await;

    let after = timing
        .next_interval(BASE, OperatingMode::Stealth, STEADY_RATE)
        .await;
    assert_eq!(before, after);
    assert_eq!(after, Duration::from_millis(7_500));

    shutdown.cancel();
}

#[tokio::test]
async fn test_activity_and_detection_adjustments() {
    let (timing, shutdown) = spawn_engine();

    let busy = timing.next_interval(BASE, OperatingMode::Hybrid, 10.0).await;
    let quiet = timing.next_interval(BASE, OperatingMode::Hybrid, 0.0).await;
    assert!(busy < BASE);
    assert!(quiet > BASE);

    // Four detections push the EMA past the 0.3 threshold
    for _ in 0..4 {
        timing.record_outcome(true, true, Duration::from_millis(500));
    }
    let snapshot = timing.flush().await;
    assert!(snapshot.detection_rate > 0.3);

    let penalised = timing
        .next_interval(BASE, OperatingMode::Hybrid, STEADY_RATE)
        .await;
    assert_eq!(penalised, BASE * 2);

    shutdown.cancel();
}

#[tokio::test]
async fn test_stopped_engine_falls_back_to_floor_scaled_base() {
    common::setup_test_logging();
    let (timing, shutdown) = spawn_engine();
    shutdown.cancel();
    tokio::task::yield_now().await;

    let interval = timing
        .next_interval(Duration::from_millis(100), OperatingMode::Beast, STEADY_RATE)
        .await;
    assert!(interval >= TimingEngine::floor(OperatingMode::Beast));
}
