use hermes_gateway::gateway::limiter::SlidingWindowLimiter;

const BASE: i64 = 1_700_000_000_000;

#[test]
fn test_sixty_first_request_is_denied() {
    let limiter = SlidingWindowLimiter::new(60, 60);

    // 5 秒内打满 60 个请求
    for i in 0..60 {
        let decision = limiter.allow_at("1.2.3.4", BASE + i * 80);
        assert!(decision.allowed, "request {} should be admitted", i);
        assert_eq!(decision.limit, 60);
    }

    let denied = limiter.allow_at("1.2.3.4", BASE + 5_000);
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.retry_after_secs >= 1);
}

#[test]
fn test_oldest_slot_expiry_restores_capacity() {
    let limiter = SlidingWindowLimiter::new(60, 60);
    for i in 0..60 {
        assert!(limiter.allow_at("k", BASE + i).allowed);
    }
    assert!(!limiter.allow_at("k", BASE + 30_000).allowed);

    // 整窗滑过后最老的槽失效，请求重新放行
    assert!(limiter.allow_at("k", BASE + 61_000 + 5_000).allowed);
}

#[test]
fn test_remaining_header_value_counts_down() {
    let limiter = SlidingWindowLimiter::new(5, 60);
    for expected in (0..5).rev() {
        let decision = limiter.allow_at("k", BASE);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
    }
    assert!(!limiter.allow_at("k", BASE).allowed);
}

#[test]
fn test_clients_do_not_share_budgets() {
    let limiter = SlidingWindowLimiter::new(2, 60);
    assert!(limiter.allow_at("1.1.1.1", BASE).allowed);
    assert!(limiter.allow_at("1.1.1.1", BASE).allowed);
    assert!(!limiter.allow_at("1.1.1.1", BASE).allowed);

    assert!(limiter.allow_at("2.2.2.2", BASE).allowed);
}

#[test]
fn test_spread_requests_within_window_still_count() {
    let limiter = SlidingWindowLimiter::new(12, 60);
    // 每槽一个请求铺满整个窗口
    for slot in 0..12 {
        assert!(limiter.allow_at("k", BASE + slot * 5_000).allowed);
    }
    assert!(!limiter.allow_at("k", BASE + 59_000).allowed);
}

#[test]
fn test_idle_keys_are_collected() {
    let limiter = SlidingWindowLimiter::new(60, 60);
    limiter.allow_at("ephemeral", BASE);
    assert_eq!(limiter.tracked_keys(), 1);

    // 超过清理间隔后触碰其他键，过期键被回收
    limiter.allow_at("fresh", BASE + 6 * 60_000);
    assert_eq!(limiter.tracked_keys(), 1);
}
