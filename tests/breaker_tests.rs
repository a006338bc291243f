use hermes_gateway::gateway::breaker::{BreakerConfig, BreakerState, CircuitBreaker};

const MIN30: i64 = 30 * 60_000;
const HOUR4: i64 = 4 * 60 * 60_000;

#[test]
fn test_quota_exhaustion_timeline() {
    // 一小时内三次配额类失败：处罚翻倍、触发重同步，之后探测恢复
    let breaker = CircuitBreaker::default();
    let t0 = 1_700_000_000_000;

    let v1 = breaker.on_failure_at("p1", t0);
    assert_eq!(v1.penalty_ms, MIN30);
    assert!(!v1.should_resync);

    let v2 = breaker.on_failure_at("p1", t0 + 20 * 60_000);
    assert_eq!(v2.penalty_ms, MIN30 * 2);
    assert!(!v2.should_resync);

    let v3 = breaker.on_failure_at("p1", t0 + 40 * 60_000);
    assert_eq!(v3.penalty_ms, MIN30 * 4);
    assert_eq!(v3.consecutive_failures, 3);
    assert!(v3.should_resync, "threshold of 3 must request a resync");

    // 处罚期内 OPEN，期满 HALF_OPEN
    let half_open_at = v3.penalty_until;
    assert_eq!(breaker.state_at("p1", half_open_at - 1), BreakerState::Open);
    assert_eq!(breaker.state_at("p1", half_open_at), BreakerState::HalfOpen);

    // 探测成功 → CLOSED，计数清零
    assert!(breaker.try_begin_probe_at("p1", half_open_at));
    breaker.finish_probe_at("p1", true, half_open_at + 100);
    assert_eq!(breaker.state_at("p1", half_open_at + 101), BreakerState::Closed);

    let fresh = breaker.on_failure_at("p1", half_open_at + 200);
    assert_eq!(fresh.consecutive_failures, 1);
    assert_eq!(fresh.penalty_ms, MIN30);
}

#[test]
fn test_penalty_never_exceeds_cap() {
    let breaker = CircuitBreaker::default();
    for i in 0..20 {
        let verdict = breaker.on_failure_at("p1", i);
        assert!(verdict.penalty_ms >= MIN30);
        assert!(verdict.penalty_ms <= HOUR4);
    }
    let last = breaker.on_failure_at("p1", 100);
    assert_eq!(last.penalty_ms, HOUR4);
}

#[test]
fn test_second_failure_doubles_not_quadruples() {
    let breaker = CircuitBreaker::default();
    breaker.on_failure_at("p1", 0);
    // 第二次失败发生在处罚刚过期的瞬间
    let verdict = breaker.on_failure_at("p1", MIN30 + 1);
    assert_eq!(verdict.penalty_ms, MIN30 * 2);
}

#[test]
fn test_custom_config_is_honored() {
    let breaker = CircuitBreaker::new(BreakerConfig {
        initial_penalty_ms: 1_000,
        max_penalty_ms: 4_000,
        resync_threshold: 2,
        resync_cooldown_ms: 60_000,
    });

    assert_eq!(breaker.on_failure_at("p1", 0).penalty_ms, 1_000);
    let v2 = breaker.on_failure_at("p1", 1);
    assert_eq!(v2.penalty_ms, 2_000);
    assert!(v2.should_resync);
    assert_eq!(breaker.on_failure_at("p1", 2).penalty_ms, 4_000);
    assert_eq!(breaker.on_failure_at("p1", 3).penalty_ms, 4_000);
}

#[test]
fn test_manual_reset_clears_state() {
    let breaker = CircuitBreaker::default();
    breaker.on_failure_at("p1", 0);
    assert_eq!(breaker.state_at("p1", 1), BreakerState::Open);

    breaker.reset("p1");
    assert_eq!(breaker.state_at("p1", 2), BreakerState::Closed);
    assert!(breaker.all_status().is_empty());
}

#[test]
fn test_status_export_reports_remaining_penalty() {
    let breaker = CircuitBreaker::default();
    breaker.on_failure_at("p1", 0);
    breaker.on_failure_at("p2", 0);

    let status = breaker.all_status_at(60_000);
    assert_eq!(status.len(), 2);
    let p1 = status.iter().find(|s| s.provider_id == "p1").unwrap();
    assert_eq!(p1.state, BreakerState::Open);
    assert_eq!(p1.retry_in_ms, MIN30 - 60_000);
}

#[test]
fn test_probes_are_single_flight() {
    let breaker = CircuitBreaker::default();
    breaker.on_failure_at("p1", 0);

    assert!(!breaker.try_begin_probe_at("p1", 1), "no probe while OPEN");
    assert!(breaker.try_begin_probe_at("p1", MIN30));
    assert!(!breaker.try_begin_probe_at("p1", MIN30 + 1));

    breaker.finish_probe_at("p1", false, MIN30 + 2);
    // 失败后回到 OPEN，处罚翻倍
    assert_eq!(breaker.state_at("p1", MIN30 + 3), BreakerState::Open);
}
