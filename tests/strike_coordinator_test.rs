//! Integration tests for the strike coordinator
//!
//! Timing-sensitive tests run on a paused clock so stagger, timeouts and
//! grace periods resolve deterministically.

mod common;

use chrono::Utc;
use common::{agents, listing, test_config, Behavior, Harness, ScriptedExecutor};
use std::time::Duration;
use ticketstrike::domain::errors::StrikeError;
use ticketstrike::domain::models::{OperatingMode, Platform};
use ticketstrike::services::AttemptKind;
use ticketstrike::StrikeOutcome;

const fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn three_agent_config() -> ticketstrike::Config {
    let mut config = test_config();
    let hybrid = config.strategies.for_mode_mut(OperatingMode::Hybrid);
    hybrid.max_parallel_agents = 3;
    hybrid.strike_timeout_secs = 30;
    hybrid.early_termination_on_success = true;
    config
}

#[tokio::test(start_paused = true)]
async fn test_first_win_cancels_remaining_agents() {
    common::setup_test_logging();
    let executor = ScriptedExecutor::new(Behavior::WaitForCancel)
        .with("agent-2", Behavior::WinAfter(ms(400)));
    let harness = Harness::new(three_agent_config(), agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Fansale, "Prato Gold")).await;
    let started = tokio::time::Instant::now();
    let report = harness.coordinator.execute(opportunity).await;
    let took = started.elapsed();

    match &report.outcome {
        StrikeOutcome::Won { agent_id, elapsed } => {
            assert_eq!(agent_id, "agent-2");
            assert!(*elapsed >= ms(400));
            assert!(*elapsed < ms(1_000));
        }
        other => panic!("Expected a win, got {other:?}"),
    }
    // Returned right after the win, nowhere near the 30s timeout
    assert!(took < Duration::from_secs(1), "strike took {took:?}");

    assert_eq!(harness.executor.attempts(), 3);
    assert_eq!(harness.executor.cancelled(), 2);

    assert_eq!(report.attempts.len(), 3);
    for attempt in &report.attempts {
        let expected = if attempt.agent_id == "agent-2" {
            AttemptKind::Success
        } else {
            AttemptKind::Cancelled
        };
        assert_eq!(attempt.kind, expected, "agent {}", attempt.agent_id);
    }

    assert!(!harness.scheduler.is_in_flight(&report.opportunity.fingerprint).await);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_agent_ignoring_cancellation_is_aborted_after_grace() {
    let executor = ScriptedExecutor::new(Behavior::Hang)
        .with("agent-1", Behavior::WinAfter(ms(100)));
    let mut config = three_agent_config();
    config
        .strategies
        .for_mode_mut(OperatingMode::Hybrid)
        .max_parallel_agents = 2;
    let harness = Harness::new(config, agents(2), executor);

    let opportunity = harness.dispatch(listing(Platform::Ticketmaster, "Anello B")).await;
    let started = tokio::time::Instant::now();
    let report = harness.coordinator.execute(opportunity).await;
    let took = started.elapsed();

    assert!(report.outcome.is_won());
    // Grace is a tenth of the 30s strike timeout
    assert!(took >= Duration::from_secs(3));
    assert!(took < Duration::from_secs(5));

    let hung = report
        .attempts
        .iter()
        .find(|a| a.agent_id == "agent-2")
        .expect("hung agent should still be reported");
    assert_eq!(hung.kind, AttemptKind::Cancelled);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_without_early_termination_all_agents_finish() {
    let mut config = three_agent_config();
    config.mode = OperatingMode::Beast;
    let executor = ScriptedExecutor::new(Behavior::FailAfter(ms(300)))
        .with("agent-1", Behavior::WinAfter(ms(100)));
    let harness = Harness::new(config, agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Eventim, "Tribuna Est")).await;
    let report = harness.coordinator.execute(opportunity).await;

    assert!(report.outcome.is_won());
    assert_eq!(harness.executor.cancelled(), 0);
    let failures = report
        .attempts
        .iter()
        .filter(|a| a.kind == AttemptKind::Failure)
        .count();
    assert_eq!(failures, 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_strike_counts_attempt() {
    let executor = ScriptedExecutor::new(Behavior::FailAfter(ms(50)));
    let harness = Harness::new(three_agent_config(), agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Vivaticket, "Curva Sud")).await;
    let report = harness.coordinator.execute(opportunity).await;

    assert_eq!(report.outcome, StrikeOutcome::Exhausted);
    assert_eq!(report.opportunity.strikes, 1);
    assert_eq!(report.opportunity.attempt_count, 1);
    assert_eq!(report.opportunity.per_agent_scores.len(), 3);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.error.is_some() && a.kind == AttemptKind::Failure));

    // Rejections are not blocks; the circuit stays closed
    assert!(!harness.circuit_breaker.is_blocked(Platform::Vivaticket).await);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_feedback_and_cooldowns_applied() {
    let executor = ScriptedExecutor::new(Behavior::WaitForCancel)
        .with("agent-2", Behavior::WinAfter(ms(200)));
    let harness = Harness::new(three_agent_config(), agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Fansale, "Parterre")).await;
    let report = harness.coordinator.execute(opportunity).await;
    assert!(report.outcome.is_won());

    let winner = harness.registry.get("agent-2").await.unwrap();
    let stats = winner.platform_stats.get(&Platform::Fansale).unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.successes, 1);
    assert!(winner.is_cooling_down(Utc::now()));

    // Cancelled agents get no feedback but still rest
    let loser = harness.registry.get("agent-1").await.unwrap();
    assert!(loser.platform_stats.get(&Platform::Fansale).is_none());
    assert!(loser.is_cooling_down(Utc::now()));

    // Everyone is cooling down, so the next strike finds nobody
    let next = harness.dispatch(listing(Platform::Fansale, "Settore 3")).await;
    let report = harness.coordinator.execute(next).await;
    assert_eq!(report.outcome, StrikeOutcome::NoAgents);
    assert!(report.attempts.is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_expired_opportunity_is_not_struck() {
    let harness = Harness::new(
        three_agent_config(),
        agents(3),
        ScriptedExecutor::new(Behavior::WinAfter(ms(10))),
    );

    let stale = listing(Platform::Eventim, "Prato")
        .detected_at(Utc::now() - chrono::Duration::seconds(900));
    let report = harness.coordinator.execute(stale).await;

    assert_eq!(report.outcome, StrikeOutcome::Expired);
    assert_eq!(harness.executor.attempts(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_min_tier_filters_agents() {
    let mut config = three_agent_config();
    config
        .strategies
        .for_mode_mut(OperatingMode::Hybrid)
        .min_quality_tier = 5;
    // Fixture agents are tier 3
    let harness = Harness::new(
        config,
        agents(3),
        ScriptedExecutor::new(Behavior::WinAfter(ms(10))),
    );

    let opportunity = harness.dispatch(listing(Platform::Ticketmaster, "Tribuna")).await;
    let report = harness.coordinator.execute(opportunity).await;

    assert_eq!(report.outcome, StrikeOutcome::NoAgents);
    assert_eq!(harness.executor.attempts(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_observations_during_strike_are_folded_in() {
    let executor = ScriptedExecutor::new(Behavior::WaitForCancel)
        .with("agent-1", Behavior::WinAfter(ms(500)));
    let harness = Harness::new(three_agent_config(), agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Fansale, "Anello A")).await;
    let coordinator = harness.coordinator.clone();
    let strike = tokio::spawn(async move { coordinator.execute(opportunity).await });

    tokio::time::sleep(ms(100)).await;
    let again = listing(Platform::Fansale, "Anello A").with_confidence(0.95);
    harness.scheduler.submit(again.clone()).await;
    harness.scheduler.submit(again).await;

    let report = strike.await.unwrap();
    assert!(report.outcome.is_won());
    assert_eq!(report.opportunity.attempt_count, 2);
    assert!((report.opportunity.confidence_score - 0.95).abs() < 1e-9);
    assert!(!harness.scheduler.is_queued(&report.opportunity.fingerprint).await);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_metrics_record_completed_strike() {
    let executor = ScriptedExecutor::new(Behavior::WaitForCancel)
        .with("agent-3", Behavior::WinAfter(ms(250)));
    let harness = Harness::new(three_agent_config(), agents(3), executor);

    let opportunity = harness.dispatch(listing(Platform::Vivaticket, "Galleria")).await;
    harness.coordinator.execute(opportunity).await;

    let metrics = harness.metrics.flush().await;
    assert_eq!(metrics.total_strikes, 1);
    assert_eq!(metrics.successes, 1);
    assert_eq!(metrics.per_agent_win_count.get("agent-3"), Some(&1));
    assert_eq!(metrics.attempts.success, 1);
    assert_eq!(metrics.attempts.cancelled, 2);
    harness.shutdown().await;
}

fn single_agent_config() -> ticketstrike::Config {
    let mut config = three_agent_config();
    config
        .strategies
        .for_mode_mut(OperatingMode::Hybrid)
        .max_parallel_agents = 1;
    config
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_with_failure_cooldown() {
    let mut config = single_agent_config();
    config
        .strategies
        .for_mode_mut(OperatingMode::Hybrid)
        .strike_timeout_secs = 1;
    let failure_cooldown = chrono::Duration::seconds(
        config
            .strategies
            .for_mode(OperatingMode::Hybrid)
            .failure_cooldown_secs as i64,
    );
    let harness = Harness::new(config, agents(1), ScriptedExecutor::new(Behavior::Hang));

    let opportunity = harness.dispatch(listing(Platform::Eventim, "Tribuna Nord")).await;
    let before = Utc::now();
    let started = tokio::time::Instant::now();
    let report = harness.coordinator.execute(opportunity).await;
    let after = Utc::now();

    assert_eq!(report.outcome, StrikeOutcome::Exhausted);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].kind, AttemptKind::Timeout);
    assert_eq!(
        report.attempts[0].error,
        Some(StrikeError::Timeout {
            after: Duration::from_secs(1)
        })
    );

    let agent = harness.registry.get("agent-1").await.unwrap();
    let until = agent.cooldown_until.expect("timed out agent should rest");
    assert!(until >= before + failure_cooldown);
    assert!(until <= after + failure_cooldown);

    // A timeout is not a block
    assert!(!harness.circuit_breaker.is_blocked(Platform::Eventim).await);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_blocked_agent_gets_blocked_cooldown() {
    let config = single_agent_config();
    assert_eq!(config.agents.blocked_cooldown_secs, 1_800);
    let blocked_cooldown = chrono::Duration::seconds(1_800);
    let harness = Harness::new(
        config,
        agents(1),
        ScriptedExecutor::new(Behavior::BlockAfter(ms(50))),
    );

    let opportunity = harness.dispatch(listing(Platform::Fansale, "Poltronissima")).await;
    let before = Utc::now();
    let report = harness.coordinator.execute(opportunity).await;
    let after = Utc::now();

    assert_eq!(report.outcome, StrikeOutcome::Exhausted);
    assert_eq!(report.attempts[0].kind, AttemptKind::Blocked);
    assert_eq!(report.error(), Some(StrikeError::blocked("captcha wall")));

    let agent = harness.registry.get("agent-1").await.unwrap();
    let until = agent.cooldown_until.expect("blocked agent should rest");
    assert!(until >= before + blocked_cooldown);
    assert!(until <= after + blocked_cooldown);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_strikes_never_share_an_agent() {
    let harness = Harness::new(
        three_agent_config(),
        agents(1),
        ScriptedExecutor::new(Behavior::WinAfter(ms(200))),
    );

    let first = harness.dispatch(listing(Platform::Ticketmaster, "Anello A")).await;
    let second = harness.dispatch(listing(Platform::Ticketmaster, "Anello B")).await;
    let (a, b) = tokio::join!(
        harness.coordinator.execute(first),
        harness.coordinator.execute(second)
    );

    assert_eq!(harness.executor.attempts(), 1);
    let won = [&a, &b].iter().filter(|r| r.outcome.is_won()).count();
    let refused = [&a, &b]
        .iter()
        .filter(|r| r.outcome == StrikeOutcome::NoAgents)
        .count();
    assert_eq!((won, refused), (1, 1));
    assert!(harness.registry.leased().await.is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_strikes_lease_distinct_agents() {
    let harness = Harness::new(
        single_agent_config(),
        agents(2),
        ScriptedExecutor::new(Behavior::WinAfter(ms(200))),
    );

    let first = harness.dispatch(listing(Platform::Eventim, "Platea")).await;
    let second = harness.dispatch(listing(Platform::Eventim, "Galleria")).await;
    let (a, b) = tokio::join!(
        harness.coordinator.execute(first),
        harness.coordinator.execute(second)
    );

    assert!(a.outcome.is_won());
    assert!(b.outcome.is_won());
    assert_eq!(harness.executor.attempts(), 2);
    assert_ne!(a.attempts[0].agent_id, b.attempts[0].agent_id);
    assert!(harness.registry.leased().await.is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_aborted_strike_releases_its_agents() {
    let harness = Harness::new(
        single_agent_config(),
        agents(1),
        ScriptedExecutor::new(Behavior::Hang),
    );

    let opportunity = harness.dispatch(listing(Platform::Vivaticket, "Curva Nord")).await;
    let coordinator = harness.coordinator.clone();
    let strike = tokio::spawn(async move { coordinator.execute(opportunity).await });

    tokio::time::sleep(ms(100)).await;
    assert_eq!(harness.registry.leased().await, vec!["agent-1".to_string()]);

    strike.abort();
    assert!(strike.await.unwrap_err().is_cancelled());
    tokio::time::sleep(ms(10)).await;

    assert!(harness.registry.leased().await.is_empty());
    harness.shutdown().await;
}
