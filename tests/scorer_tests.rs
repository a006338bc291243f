use hermes_gateway::gateway::scorer::RoutingScorer;

const DAY_MS: i64 = 86_400_000;

#[test]
fn test_unseen_provider_gets_exploration_score() {
    let scorer = RoutingScorer::new();
    // 成功率 1.0、时延未知 0.5、新鲜度 0 => 0.5 + 0.15 + 0
    let score = scorer.score_at("fresh", 0);
    assert!((score - 0.65).abs() < 1e-9);
}

#[test]
fn test_happy_path_observation() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("p1", 180, 1_000);

    let stats = scorer.stats("p1").unwrap();
    assert!((stats.ewma_success - 1.0).abs() < 1e-9);
    assert_eq!(stats.ewma_latency_ms, Some(180.0));
    assert_eq!(stats.last_sample_at, Some(1_000));
    assert_eq!(stats.total_success, 1);
}

#[test]
fn test_latency_ewma_smoothing() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("p1", 100, 0);
    scorer.observe_success_at("p1", 200, 1);

    // 0.2 * 200 + 0.8 * 100 = 120
    let stats = scorer.stats("p1").unwrap();
    assert!((stats.ewma_latency_ms.unwrap() - 120.0).abs() < 1e-9);
}

#[test]
fn test_failures_never_leave_unit_interval() {
    let scorer = RoutingScorer::new();
    for i in 0..500 {
        scorer.observe_failure_at("p1", i);
        let stats = scorer.stats("p1").unwrap();
        assert!(stats.ewma_success >= 0.0 && stats.ewma_success <= 1.0);
    }
    // 长期全失败，成功率趋近 0
    assert!(scorer.stats("p1").unwrap().ewma_success < 0.01);
}

#[test]
fn test_failure_does_not_touch_latency() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("p1", 300, 0);
    scorer.observe_failure_at("p1", 1);
    assert_eq!(scorer.stats("p1").unwrap().ewma_latency_ms, Some(300.0));
}

#[test]
fn test_score_monotone_in_success_rate() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("good", 100, 0);
    scorer.observe_success_at("bad", 100, 0);
    scorer.observe_failure_at("bad", 1);

    assert!(scorer.score_at("good", 10) > scorer.score_at("bad", 10));
}

#[test]
fn test_score_monotone_in_latency() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("fast", 50, 0);
    scorer.observe_success_at("slow", 9_500, 0);

    assert!(scorer.score_at("fast", 0) > scorer.score_at("slow", 0));
}

#[test]
fn test_score_decays_with_age() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("p1", 100, 0);

    let now = scorer.score_at("p1", 0);
    let day = scorer.score_at("p1", DAY_MS);
    let week = scorer.score_at("p1", 7 * DAY_MS);

    assert!(now > day && day > week);
    // 半衰期 24 小时：新鲜度分量从 0.2 掉到 0.1
    assert!((now - day - 0.1).abs() < 1e-6);
}

#[test]
fn test_latency_beyond_reference_floors_at_zero() {
    let scorer = RoutingScorer::new();
    scorer.observe_success_at("p1", 60_000, 0);
    let score = scorer.score_at("p1", 0);
    // 成功率 1.0 + 时延 0 + 新鲜度 0.2
    assert!((score - 0.7).abs() < 1e-9);
}

#[test]
fn test_removed_provider_forgets_history() {
    let scorer = RoutingScorer::new();
    scorer.observe_failure_at("p1", 0);
    scorer.remove("p1");
    assert!(scorer.stats("p1").is_none());
    assert!((scorer.score_at("p1", 0) - 0.65).abs() < 1e-9);
}
