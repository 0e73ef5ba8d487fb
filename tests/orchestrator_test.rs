//! End-to-end tests for the strike orchestrator
//!
//! Runs the dispatch loop against a scripted executor and checks reports,
//! dispositions and shutdown behavior.

mod common;

use common::{agents, listing, test_config, Behavior, Harness, ScriptedExecutor};
use std::time::Duration;
use ticketstrike::application::OrchestratorState;
use ticketstrike::domain::models::{OperatingMode, Platform};
use ticketstrike::{StrikeOutcome, StrikeReport};
use tokio::sync::mpsc;

async fn next_report(rx: &mut mpsc::Receiver<StrikeReport>) -> StrikeReport {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a strike report")
        .expect("report channel closed")
}

#[tokio::test]
async fn test_dispatches_and_wins_every_listing() {
    common::setup_test_logging();
    let mut harness = Harness::new(
        test_config(),
        agents(12),
        ScriptedExecutor::new(Behavior::WinAfter(Duration::from_millis(30))),
    );
    let (report_tx, mut report_rx) = mpsc::channel(16);
    let mut orchestrator = harness.orchestrator().with_report_sender(report_tx);

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Running);
    assert!(orchestrator.start().await.is_err(), "double start must fail");

    for section in ["Prato", "Tribuna", "Anello"] {
        harness.scheduler.submit(listing(Platform::Fansale, section)).await;
    }
    for _ in 0..3 {
        let report = next_report(&mut report_rx).await;
        assert!(report.outcome.is_won(), "got {:?}", report.outcome);
    }

    orchestrator.stop().await.unwrap();
    let stats = orchestrator.get_stats().await;
    assert_eq!(stats.state, OrchestratorState::Stopped);
    assert_eq!(stats.strikes_dispatched, 3);
    assert_eq!(stats.won, 3);
    assert_eq!(stats.active_strikes, 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_listing_retried_until_strike_limit() {
    let mut config = test_config();
    config.scheduler.max_strikes_per_opportunity = 2;
    config.scheduler.retry_delay_ms = 50;
    let hybrid = config.strategies.for_mode_mut(OperatingMode::Hybrid);
    hybrid.failure_cooldown_secs = 0;
    hybrid.max_parallel_agents = 2;

    let mut harness = Harness::new(
        config,
        agents(2),
        ScriptedExecutor::new(Behavior::FailAfter(Duration::from_millis(10))),
    );
    let (report_tx, mut report_rx) = mpsc::channel(16);
    let mut orchestrator = harness.orchestrator().with_report_sender(report_tx);
    orchestrator.start().await.unwrap();

    let opportunity = listing(Platform::Eventim, "Parterre");
    harness.scheduler.submit(opportunity.clone()).await;

    let first = next_report(&mut report_rx).await;
    assert_eq!(first.outcome, StrikeOutcome::Exhausted);
    assert_eq!(first.opportunity.strikes, 1);

    let second = next_report(&mut report_rx).await;
    assert_eq!(second.outcome, StrikeOutcome::Exhausted);
    assert_eq!(second.opportunity.strikes, 2);
    assert_eq!(second.opportunity.fingerprint, opportunity.fingerprint);

    // Terminal after the second strike: nothing else arrives
    assert!(
        tokio::time::timeout(Duration::from_millis(300), report_rx.recv())
            .await
            .is_err()
    );
    assert!(!harness.scheduler.is_queued(&opportunity.fingerprint).await);

    orchestrator.stop().await.unwrap();
    let stats = orchestrator.get_stats().await;
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.exhausted, 1);
    assert_eq!(harness.executor.attempts(), 4);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_stop_cancels_running_strikes() {
    let mut harness = Harness::new(
        test_config(),
        agents(3),
        ScriptedExecutor::new(Behavior::WaitForCancel),
    );
    let mut orchestrator = harness.orchestrator();
    orchestrator.start().await.unwrap();

    let opportunity = listing(Platform::Ticketmaster, "Curva Nord");
    harness.scheduler.submit(opportunity.clone()).await;

    let executor = harness.executor.clone();
    assert!(common::wait_for(|| executor.attempts() > 0, 2_000).await);

    let started = std::time::Instant::now();
    orchestrator.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(harness.executor.cancelled() > 0);
    // Shutdown neither requeues nor strands the fingerprint
    assert!(!harness.scheduler.is_queued(&opportunity.fingerprint).await);
    assert!(!harness.scheduler.is_in_flight(&opportunity.fingerprint).await);
    assert_eq!(orchestrator.get_stats().await.requeued, 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_mode_switch_reaches_coordinator() {
    let mut harness = Harness::new(
        test_config(),
        agents(1),
        ScriptedExecutor::new(Behavior::WinAfter(Duration::from_millis(5))),
    );
    let orchestrator = harness.orchestrator();

    assert_eq!(harness.coordinator.current_mode(), OperatingMode::Hybrid);
    orchestrator.set_mode(OperatingMode::Beast);
    assert_eq!(orchestrator.mode(), OperatingMode::Beast);
    assert_eq!(harness.coordinator.current_mode(), OperatingMode::Beast);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let mut harness = Harness::new(
        test_config(),
        agents(1),
        ScriptedExecutor::new(Behavior::WinAfter(Duration::from_millis(5))),
    );
    let mut orchestrator = harness.orchestrator();

    orchestrator.stop().await.unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    harness.shutdown().await;
}
